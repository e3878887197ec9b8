use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::Catalog;
use crate::models::{MealPlan, Micronutrients, NutrientGoals, NutrientIntake};
use crate::nutrition::{parse_micronutrients, parse_nutrition_value};

/// Intake of one person for one plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntakeReport {
    pub intake: NutrientIntake,
    pub micronutrients: Micronutrients,
}

/// Sum catalog nutrition over a person's breakfast, lunch and dinner.
///
/// Missing plans, people or dishes contribute nothing. Micronutrients with
/// the same name in several slots are not summed: the later slot replaces
/// the earlier entry.
pub fn aggregate_intake(person: &str, plan: Option<&MealPlan>, catalog: &Catalog) -> IntakeReport {
    let mut report = IntakeReport::default();
    let Some(slots) = plan.and_then(|p| p.meals.get(person)) else {
        return report;
    };

    for (slot, name) in slots.iter() {
        let Some(dish) = catalog.find(name) else {
            debug!(person, slot = slot.as_str(), dish = name, "dish not in catalog");
            continue;
        };
        let nutrition = &dish.nutrition;
        let intake = &mut report.intake;
        intake.calories += nutrition.calories;
        intake.protein += parse_nutrition_value(Some(&nutrition.protein));
        intake.carbohydrates += parse_nutrition_value(Some(&nutrition.carbohydrates));
        intake.fat += parse_nutrition_value(Some(&nutrition.fat));

        let micros = parse_micronutrients(nutrition);
        report.micronutrients.vitamins.extend(micros.vitamins);
        report.micronutrients.minerals.extend(micros.minerals);
    }

    report
}

/// Share of the calorie goal covered, capped at 100.
pub fn calorie_progress(intake: &NutrientIntake, goals: &NutrientGoals) -> f64 {
    percent(intake.calories, goals.calories)
}

/// Per-nutrient progress towards the goals, each capped at 100.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MacroProgress {
    pub calories: f64,
    pub protein: f64,
    pub carbohydrates: f64,
    pub fat: f64,
}

impl MacroProgress {
    pub fn new(intake: &NutrientIntake, goals: &NutrientGoals) -> Self {
        Self {
            calories: percent(intake.calories, goals.calories),
            protein: percent(intake.protein, goals.protein),
            carbohydrates: percent(intake.carbohydrates, goals.carbohydrates),
            fat: percent(intake.fat, goals.fat),
        }
    }
}

fn percent(amount: f64, goal: u32) -> f64 {
    if goal == 0 {
        return 0.0;
    }
    (amount / f64::from(goal) * 100.0).min(100.0)
}
