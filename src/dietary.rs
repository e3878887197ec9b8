use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;

use crate::models::{DietaryNotes, Dish};

/// Food preferences a family member can select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Preference {
    Vegetarian,
    Vegan,
    GlutenFree,
    DairyFree,
    NutFree,
}

impl Preference {
    pub const ALL: [Preference; 5] = [
        Preference::Vegetarian,
        Preference::Vegan,
        Preference::GlutenFree,
        Preference::DairyFree,
        Preference::NutFree,
    ];

    /// Tag as stored in person records.
    pub fn label(self) -> &'static str {
        match self {
            Preference::Vegetarian => "Vegetarian",
            Preference::Vegan => "Vegan",
            Preference::GlutenFree => "Gluten-free",
            Preference::DairyFree => "Dairy-free",
            Preference::NutFree => "Nut-free",
        }
    }

    /// Whether a dish with these notes satisfies the preference.
    pub fn allows(self, notes: &DietaryNotes) -> bool {
        match self {
            Preference::Vegetarian => notes.vegetarian,
            Preference::Vegan => notes.vegan,
            Preference::GlutenFree => notes.gluten_free,
            Preference::DairyFree => notes.dairy_free,
            Preference::NutFree => notes.nut_free,
        }
    }

    pub fn conflict(self) -> &'static str {
        match self {
            Preference::Vegetarian => "not vegetarian",
            Preference::Vegan => "not vegan",
            Preference::GlutenFree => "contains gluten",
            Preference::DairyFree => "contains dairy",
            Preference::NutFree => "contains nuts",
        }
    }
}

impl FromStr for Preference {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Preference::ALL
            .into_iter()
            .find(|p| p.label() == s)
            .ok_or_else(|| anyhow!("unknown food preference: {}", s))
    }
}

impl fmt::Display for Preference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Conflicts between a dish and a person's preference tags, in tag order.
///
/// Unknown tags are ignored; no dish means no conflicts.
pub fn dietary_conflicts<S: AsRef<str>>(dish: Option<&Dish>, preferences: &[S]) -> Vec<String> {
    let Some(dish) = dish else {
        return Vec::new();
    };
    preferences
        .iter()
        .filter_map(|tag| tag.as_ref().parse::<Preference>().ok())
        .filter(|pref| !pref.allows(&dish.dietary_notes))
        .map(|pref| pref.conflict().to_string())
        .collect()
}
