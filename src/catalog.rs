use std::sync::OnceLock;

use anyhow::{Context, Result};
use tracing::error;

use crate::models::{Dish, MealType};

const BUILTIN_DISHES: &str = include_str!("../data/dishes.json");

/// The fixed table of dishes that plans refer to by name.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    dishes: Vec<Dish>,
}

impl Catalog {
    pub fn new(dishes: Vec<Dish>) -> Self {
        Self { dishes }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let dishes: Vec<Dish> = serde_json::from_str(json).context("invalid dish catalog")?;
        Ok(Self::new(dishes))
    }

    /// The catalog shipped with the crate, parsed on first use.
    pub fn builtin() -> &'static Catalog {
        static CATALOG: OnceLock<Catalog> = OnceLock::new();
        CATALOG.get_or_init(|| {
            Catalog::from_json(BUILTIN_DISHES).unwrap_or_else(|e| {
                error!("builtin dish catalog failed to load: {:#}", e);
                Catalog::default()
            })
        })
    }

    /// Exact, case-sensitive name lookup.
    pub fn find(&self, name: &str) -> Option<&Dish> {
        self.dishes.iter().find(|d| d.name == name)
    }

    pub fn dishes(&self) -> &[Dish] {
        &self.dishes
    }

    /// Dishes offered for a plan slot. Lunch and dinner share one pool.
    pub fn options_for(&self, slot: MealType) -> impl Iterator<Item = &Dish> + '_ {
        self.dishes.iter().filter(move |d| match slot {
            MealType::Breakfast => d.meal_type == MealType::Breakfast,
            MealType::Lunch | MealType::Dinner => d.meal_type != MealType::Breakfast,
        })
    }
}
