//! Parsing of free-text nutrition amounts such as `"28g (10% DV)"`.
//!
//! Everything here is total: malformed input yields a zero default.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::models::{Micronutrient, Micronutrients, Nutrition};

fn pattern(cell: &'static OnceLock<Option<Regex>>, re: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(re).ok()).as_ref()
}

fn leading_amount() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    pattern(&RE, r"^(\d+(?:\.\d+)?)(?:[a-zA-Z]+)?")
}

fn daily_value() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    pattern(&RE, r"\((\d+)%\s*DV\)")
}

fn micronutrient() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    pattern(&RE, r"^([\d.]+[a-zA-Z]+)\s*(\(.*?\))?")
}

fn leading_float() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    pattern(&RE, r"^\s*([+-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?)")
}

fn leading_int() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    pattern(&RE, r"^\s*([+-]?\d+)")
}

/// Leading numeric magnitude of a nutrition amount: `"28g (10% DV)"` → 28.
///
/// Returns 0 for missing, empty, or non-numeric input.
pub fn parse_nutrition_value(value: Option<&str>) -> f64 {
    let Some(value) = value.filter(|v| !v.is_empty()) else {
        return 0.0;
    };
    leading_amount()
        .and_then(|re| re.captures(value))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0.0)
}

/// Integer percentage in a `(<n>% DV)` annotation, or 0 when absent.
pub fn extract_dv_percentage(value: &str) -> u32 {
    daily_value()
        .and_then(|re| re.captures(value))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// Split `"2.4mcg (100% DV)"` into amount and annotation.
///
/// `None` when the string does not start with an amount and unit.
pub fn split_micronutrient(raw: &str) -> Option<Micronutrient> {
    let caps = micronutrient()?.captures(raw)?;
    let value = caps.get(1).map_or(raw, |m| m.as_str());
    let dv = caps.get(2).map_or("", |m| m.as_str());
    Some(Micronutrient {
        value: value.to_string(),
        dv: dv.to_string(),
    })
}

impl Micronutrient {
    pub fn dv_percentage(&self) -> u32 {
        extract_dv_percentage(&self.dv)
    }
}

fn split_all(raw: &BTreeMap<String, String>) -> BTreeMap<String, Micronutrient> {
    raw.iter()
        .filter_map(|(name, value)| split_micronutrient(value).map(|m| (name.clone(), m)))
        .collect()
}

/// Micronutrients of one dish, dropping entries without a leading amount.
pub fn parse_micronutrients(nutrition: &Nutrition) -> Micronutrients {
    Micronutrients {
        vitamins: split_all(&nutrition.vitamins),
        minerals: split_all(&nutrition.minerals),
    }
}

/// Lenient float read of a body metric, accepting trailing text: `"170cm"` → 170.
pub fn parse_leading_float(value: &str) -> Option<f64> {
    leading_float()?
        .captures(value)?
        .get(1)?
        .as_str()
        .parse()
        .ok()
}

/// Lenient integer read: `"7 years"` → 7, `"3.9"` → 3.
pub fn parse_leading_int(value: &str) -> Option<i64> {
    leading_int()?.captures(value)?.get(1)?.as_str().parse().ok()
}
