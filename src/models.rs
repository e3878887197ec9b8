use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use tracing::warn;

/// Which meal of the day a dish or a plan slot belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MealType {
    Breakfast,
    Lunch,
    Dinner,
}

impl MealType {
    pub const ALL: [MealType; 3] = [MealType::Breakfast, MealType::Lunch, MealType::Dinner];

    pub fn as_str(self) -> &'static str {
        match self {
            MealType::Breakfast => "breakfast",
            MealType::Lunch => "lunch",
            MealType::Dinner => "dinner",
        }
    }
}

/// A static catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dish {
    pub name: String,
    #[serde(rename = "type")]
    pub meal_type: MealType,
    #[serde(default)]
    pub servings: u32,
    pub nutrition: Nutrition,
    #[serde(default)]
    pub dietary_notes: DietaryNotes,
    #[serde(default)]
    pub ingredients: Vec<Ingredient>,
    #[serde(default)]
    pub total_cost: f64,
}

/// Nutrition facts for one serving of a dish.
///
/// Macros are free-text amounts such as `"28g"`; micronutrients carry an
/// optional daily value suffix, e.g. `"2.4mcg (100% DV)"`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Nutrition {
    #[serde(default)]
    pub calories: f64,
    #[serde(default)]
    pub protein: String,
    #[serde(default)]
    pub carbohydrates: String,
    #[serde(default)]
    pub fat: String,
    #[serde(default)]
    pub vitamins: BTreeMap<String, String>,
    #[serde(default)]
    pub minerals: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DietaryNotes {
    pub vegetarian: bool,
    pub vegan: bool,
    pub gluten_free: bool,
    pub dairy_free: bool,
    pub nut_free: bool,
    pub notes: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ingredient {
    pub name: String,
    #[serde(default)]
    pub amount: String,
    #[serde(default)]
    pub cost: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[default]
    Adult,
    Child,
}

/// A family member profile.
///
/// Stored inside the owning user document under `adults` or `children`;
/// `role` is derived from which array the record came from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    #[serde(default)]
    pub name: String,
    #[serde(skip)]
    pub role: Role,
    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub age: Option<String>,
    /// Height in cm
    #[serde(default, deserialize_with = "lenient_string")]
    pub height: String,
    /// Weight in kg
    #[serde(default, deserialize_with = "lenient_string")]
    pub weight: String,
    #[serde(default)]
    pub preferences: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub meal_reminders: Vec<MealReminder>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MealReminder {
    pub label: String,
    pub time: String,
    #[serde(default)]
    pub enabled: bool,
}

/// The three meal slots of one person in a plan, each resolved to a dish name.
///
/// Slots are stored either as a plain dish name or as `{ "meal": "<name>" }`.
/// Both shapes are accepted on read and collapse to the same value here;
/// an empty name reads as an unset slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MealSlots {
    #[serde(default, deserialize_with = "read_meal_slot", serialize_with = "write_meal_slot")]
    pub breakfast: Option<String>,
    #[serde(default, deserialize_with = "read_meal_slot", serialize_with = "write_meal_slot")]
    pub lunch: Option<String>,
    #[serde(default, deserialize_with = "read_meal_slot", serialize_with = "write_meal_slot")]
    pub dinner: Option<String>,
}

impl MealSlots {
    pub fn get(&self, slot: MealType) -> Option<&str> {
        match slot {
            MealType::Breakfast => self.breakfast.as_deref(),
            MealType::Lunch => self.lunch.as_deref(),
            MealType::Dinner => self.dinner.as_deref(),
        }
    }

    pub fn set(&mut self, slot: MealType, dish: Option<String>) {
        let dish = dish.filter(|d| !d.is_empty());
        match slot {
            MealType::Breakfast => self.breakfast = dish,
            MealType::Lunch => self.lunch = dish,
            MealType::Dinner => self.dinner = dish,
        }
    }

    /// Set slots in breakfast, lunch, dinner order.
    pub fn iter(&self) -> impl Iterator<Item = (MealType, &str)> + '_ {
        MealType::ALL
            .into_iter()
            .filter_map(move |slot| self.get(slot).map(|name| (slot, name)))
    }
}

/// Resolve a stored meal slot value to a dish name.
pub fn resolve_meal_slot(value: &Value) -> Option<String> {
    let name = match value {
        Value::String(s) => s.as_str(),
        Value::Object(map) => map.get("meal").and_then(Value::as_str)?,
        _ => return None,
    };
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

fn read_meal_slot<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(resolve_meal_slot(&Value::deserialize(d)?))
}

fn write_meal_slot<S: Serializer>(slot: &Option<String>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(slot.as_deref().unwrap_or(""))
}

/// Read a stored `meals` map.
///
/// Per-person entries that do not decode are dropped; anything but a map
/// reads as no meals.
pub fn meals_from_value(value: &Value) -> BTreeMap<String, MealSlots> {
    let mut meals = BTreeMap::new();
    match value {
        Value::Object(map) => {
            for (person, entry) in map {
                match MealSlots::deserialize(entry) {
                    Ok(slots) => {
                        meals.insert(person.clone(), slots);
                    }
                    Err(e) => warn!(%person, error = %e, "skipping malformed meal entry"),
                }
            }
        }
        Value::Null => {}
        other => warn!(kind = value_kind(other), "meals field is not a map"),
    }
    meals
}

fn lenient_meals<'de, D: Deserializer<'de>>(
    d: D,
) -> Result<BTreeMap<String, MealSlots>, D::Error> {
    Ok(meals_from_value(&Value::deserialize(d)?))
}

fn lenient_opt_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    lenient_opt_string(d).map(Option::unwrap_or_default)
}

pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Creation times are stored as fixed-width RFC 3339 strings, so string
/// ordering matches time ordering.
pub mod timestamp {
    use super::*;

    pub fn format(time: &DateTime<Utc>) -> String {
        time.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    pub fn now() -> String {
        format(&Utc::now())
    }

    /// True for strings written by [`format`]; the document codec stores
    /// these as native timestamps.
    pub fn is_formatted(text: &str) -> bool {
        text.len() == 27
            && text.ends_with('Z')
            && DateTime::parse_from_rfc3339(text)
                .is_ok_and(|t| format(&t.with_timezone(&Utc)) == text)
    }

    pub fn serialize<S: Serializer>(time: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
        match time {
            Some(time) => s.serialize_str(&format(time)),
            None => s.serialize_none(),
        }
    }

    /// Unparseable values read as `None`.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::String(s) => DateTime::parse_from_rfc3339(&s)
                .map(|t| t.with_timezone(&Utc))
                .ok(),
            _ => None,
        })
    }
}

/// Name and role of a person as captured in a saved plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FamilyMemberRef {
    pub name: String,
    #[serde(rename = "type", default)]
    pub role: Role,
    #[serde(default)]
    pub preferences: Vec<String>,
}

/// A named assignment of dishes to meal slots for each family member.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MealPlan {
    /// Document ID, taken from the storage path
    #[serde(default, skip_serializing)]
    pub id: String,
    /// Owning user ID
    #[serde(default, alias = "userId")]
    pub owner: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default)]
    pub plan_name: String,
    #[serde(default, with = "timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub family_members: Vec<FamilyMemberRef>,
    #[serde(default, deserialize_with = "lenient_meals")]
    pub meals: BTreeMap<String, MealSlots>,
}

/// Daily targets for one person.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NutrientGoals {
    /// kcal
    pub calories: u32,
    /// g
    pub protein: u32,
    /// g
    pub carbohydrates: u32,
    /// g
    pub fat: u32,
}

impl NutrientGoals {
    pub const DEFAULT: NutrientGoals = NutrientGoals {
        calories: 2000,
        protein: 50,
        carbohydrates: 275,
        fat: 65,
    };
}

impl Default for NutrientGoals {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Summed nutrition of a person's planned meals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NutrientIntake {
    pub calories: f64,
    pub protein: f64,
    pub carbohydrates: f64,
    pub fat: f64,
}

/// A micronutrient amount split from its daily value annotation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Micronutrient {
    /// Amount with unit, e.g. `"2.4mcg"`
    pub value: String,
    /// Parenthesised daily value, e.g. `"(100% DV)"`, or empty
    pub dv: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Micronutrients {
    pub vitamins: BTreeMap<String, Micronutrient>,
    pub minerals: BTreeMap<String, Micronutrient>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MealFrequency {
    pub meal_name: String,
    pub count: usize,
}

/// The top-level `users/{uid}` document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default, skip_serializing)]
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, with = "timestamp", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub is_nutritionist: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_name: Option<String>,
    #[serde(default)]
    pub family_info_completed: bool,
    #[serde(default)]
    pub adults: Vec<Person>,
    #[serde(default)]
    pub children: Vec<Person>,
}

impl UserProfile {
    /// All named family members, adults first, with roles filled in.
    pub fn family(&self) -> Vec<Person> {
        let adults = self.adults.iter().map(|p| Person {
            role: Role::Adult,
            ..p.clone()
        });
        let children = self.children.iter().map(|p| Person {
            role: Role::Child,
            ..p.clone()
        });
        adults
            .chain(children)
            .filter(|p| !p.name.is_empty())
            .collect()
    }

    pub fn find_member(&self, name: &str) -> Option<Person> {
        self.family().into_iter().find(|p| p.name == name)
    }
}

/// A community forum post.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    #[serde(default, skip_serializing)]
    pub id: String,
    #[serde(default)]
    pub author: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_id: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default, with = "timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub votes: i64,
    #[serde(default)]
    pub user_vote: i64,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub replies: Vec<Reply>,
}

pub const DEFAULT_CATEGORY: &str = "General";

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    pub id: String,
    #[serde(default)]
    pub author: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_id: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default, with = "timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

/// A moderation report against a post, or against one reply of a post.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    #[serde(default, skip_serializing)]
    pub id: String,
    pub post_id: String,
    #[serde(default)]
    pub reply_id: Option<String>,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub reported_by: String,
    #[serde(default, with = "timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn meal_slot_shapes_resolve_to_the_same_name() {
        let plain: MealSlots = serde_json::from_value(json!({"lunch": "Pasta"})).unwrap();
        let wrapped: MealSlots =
            serde_json::from_value(json!({"lunch": {"meal": "Pasta", "time": "12:00 PM"}})).unwrap();
        assert_eq!(plain, wrapped);
        assert_eq!(plain.get(MealType::Lunch), Some("Pasta"));
    }

    #[test]
    fn empty_and_odd_slots_read_as_unset() {
        let slots: MealSlots = serde_json::from_value(json!({
            "breakfast": "",
            "lunch": {"meal": ""},
            "dinner": 42
        }))
        .unwrap();
        assert_eq!(slots, MealSlots::default());
        assert_eq!(slots.iter().count(), 0);
    }

    #[test]
    fn slots_write_as_plain_strings() {
        let mut slots = MealSlots::default();
        slots.set(MealType::Dinner, Some("Lentil Soup".into()));
        assert_eq!(
            serde_json::to_value(&slots).unwrap(),
            json!({"breakfast": "", "lunch": "", "dinner": "Lentil Soup"})
        );
    }

    #[test]
    fn malformed_person_entries_are_dropped() {
        let plan: MealPlan = serde_json::from_value(json!({
            "planName": "Week 1",
            "meals": {
                "Ana": {"breakfast": "Oatmeal"},
                "Ben": null,
                "Cy": "not a record"
            }
        }))
        .unwrap();
        assert_eq!(plan.meals.len(), 1);
        assert_eq!(plan.meals["Ana"].breakfast.as_deref(), Some("Oatmeal"));
    }

    #[test]
    fn non_map_meals_read_as_empty() {
        let plan: MealPlan =
            serde_json::from_value(json!({"planName": "x", "meals": [1, 2]})).unwrap();
        assert!(plan.meals.is_empty());
    }

    #[test]
    fn timestamps_are_fixed_width() {
        use chrono::TimeZone;
        let whole = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let later = whole + chrono::Duration::microseconds(1500);
        assert_eq!(timestamp::format(&whole), "2024-05-01T12:00:00.000000Z");
        assert!(timestamp::format(&whole) < timestamp::format(&later));

        let plan: MealPlan = serde_json::from_value(json!({"createdAt": "yesterday"})).unwrap();
        assert_eq!(plan.created_at, None);
        let plan: MealPlan =
            serde_json::from_value(json!({"createdAt": "2024-05-01T14:00:00+02:00"})).unwrap();
        assert_eq!(plan.created_at, Some(whole));
    }

    #[test]
    fn person_metrics_accept_numbers() {
        let person: Person =
            serde_json::from_value(json!({"name": "Kid", "age": 4, "height": 102.5, "weight": "16"}))
                .unwrap();
        assert_eq!(person.age.as_deref(), Some("4"));
        assert_eq!(person.height, "102.5");
        assert_eq!(person.weight, "16");
    }

    #[test]
    fn formatted_timestamps_are_recognized() {
        assert!(timestamp::is_formatted(&timestamp::now()));
        assert!(timestamp::is_formatted("2024-05-01T12:00:00.000000Z"));
        assert!(!timestamp::is_formatted("2024-05-01T12:00:00Z"));
        assert!(!timestamp::is_formatted("2024-05-01T12:00:00.000000+00:00"));
        assert!(!timestamp::is_formatted("lunch at noon, bring 27 chars"));
    }

    #[test]
    fn unnamed_family_member_does_not_break_the_profile() {
        let profile: UserProfile = serde_json::from_value(json!({
            "name": "U",
            "adults": [{"height": "170"}, {"name": "Ana"}]
        }))
        .unwrap();
        assert_eq!(profile.adults.len(), 2);
        assert_eq!(profile.adults[0].name, "");
        let names: Vec<_> = profile.family().into_iter().map(|p| p.name).collect();
        assert_eq!(names, ["Ana"]);
    }

    #[test]
    fn family_lists_adults_then_children_with_roles() {
        let profile: UserProfile = serde_json::from_value(json!({
            "adults": [{"name": "Ana"}, {"name": ""}],
            "children": [{"name": "Cy", "age": "6"}]
        }))
        .unwrap();
        let family = profile.family();
        assert_eq!(family.len(), 2);
        assert_eq!(family[0].role, Role::Adult);
        assert_eq!(family[1].role, Role::Child);
        assert_eq!(profile.find_member("Cy").unwrap().age.as_deref(), Some("6"));
    }
}
