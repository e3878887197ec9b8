use crate::models::{NutrientGoals, Person};
use crate::nutrition::{parse_leading_float, parse_leading_int};

const KCAL_PER_G_PROTEIN: f64 = 4.0;
const KCAL_PER_G_CARBS: f64 = 4.0;
const KCAL_PER_G_FAT: f64 = 9.0;

/// Age plugged into the adult BMR estimate, since adults carry no age.
const ASSUMED_ADULT_AGE: f64 = 35.0;

/// Calorie share of each macro: (protein, carbohydrates, fat).
type MacroSplit = (f64, f64, f64);

const CHILD_SPLIT: MacroSplit = (0.15, 0.55, 0.30);
const ADULT_SPLIT: MacroSplit = (0.20, 0.50, 0.30);

/// Daily targets for a family member.
pub fn goals_for(person: &Person) -> NutrientGoals {
    estimate_goals(&person.height, &person.weight, person.age.as_deref())
}

/// Daily calorie and macro targets from height (cm), weight (kg) and optional age.
///
/// A present, numeric age selects the per-kg child estimate; otherwise an
/// adult Mifflin-St Jeor estimate is scaled by a BMI band. Missing or
/// non-positive height or weight gives [`NutrientGoals::DEFAULT`].
pub fn estimate_goals(height: &str, weight: &str, age: Option<&str>) -> NutrientGoals {
    let (Some(height), Some(weight)) = (parse_leading_float(height), parse_leading_float(weight))
    else {
        return NutrientGoals::DEFAULT;
    };
    if !(height > 0.0 && weight > 0.0) || !height.is_finite() || !weight.is_finite() {
        return NutrientGoals::DEFAULT;
    }

    if let Some(age) = age.filter(|a| !a.is_empty()).and_then(parse_leading_int) {
        let per_kg = match age {
            a if a <= 3 => 100.0,
            a if a <= 10 => 75.0,
            _ => 60.0,
        };
        return split(weight * per_kg, CHILD_SPLIT);
    }

    let height_m = height / 100.0;
    let bmi = weight / (height_m * height_m);
    let bmr = 10.0 * weight + 6.25 * height - 5.0 * ASSUMED_ADULT_AGE + 5.0;
    let activity = if bmi < 18.5 {
        1.3
    } else if bmi >= 25.0 {
        1.1
    } else {
        1.2
    };
    split((bmr * activity).round(), ADULT_SPLIT)
}

fn split(calories: f64, (protein, carbs, fat): MacroSplit) -> NutrientGoals {
    NutrientGoals {
        calories: to_u32(calories),
        protein: to_u32(calories * protein / KCAL_PER_G_PROTEIN),
        carbohydrates: to_u32(calories * carbs / KCAL_PER_G_CARBS),
        fat: to_u32(calories * fat / KCAL_PER_G_FAT),
    }
}

// Saturating: negative estimates (implausibly small adults) clamp to 0.
fn to_u32(value: f64) -> u32 {
    value.round().clamp(0.0, u32::MAX as f64) as u32
}
