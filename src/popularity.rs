use std::collections::{BTreeMap, HashMap};

use chrono::{Days, NaiveDate};
use serde_json::Value;

use crate::models::{meals_from_value, MealFrequency, MealPlan, MealSlots, UserProfile};

pub const TOP_MEALS: usize = 5;

/// Longest signup histogram, in days.
pub const MAX_SIGNUP_DAYS: u32 = 3660;

/// The most planned dishes across all plans, highest count first.
///
/// Ties keep the order in which dishes were first counted.
pub fn popular_meals<'a, I>(plans: I) -> Vec<MealFrequency>
where
    I: IntoIterator<Item = &'a MealPlan>,
{
    rank_meals(plans.into_iter().map(|plan| &plan.meals))
}

/// Like [`popular_meals`], over raw plan documents.
///
/// Only the `meals` field is read, so other malformed fields never hide a
/// plan. Malformed per-person entries are logged and skipped.
pub fn popular_meals_from_documents<'a, I>(documents: I) -> Vec<MealFrequency>
where
    I: IntoIterator<Item = &'a Value>,
{
    let meals: Vec<BTreeMap<String, MealSlots>> = documents
        .into_iter()
        .map(|doc| doc.get("meals").map(meals_from_value).unwrap_or_default())
        .collect();
    rank_meals(&meals)
}

fn rank_meals<'a, I>(meal_maps: I) -> Vec<MealFrequency>
where
    I: IntoIterator<Item = &'a BTreeMap<String, MealSlots>>,
{
    let mut counts: Vec<MealFrequency> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for meals in meal_maps {
        for slots in meals.values() {
            for (_, name) in slots.iter() {
                match index.get(name) {
                    Some(&i) => counts[i].count += 1,
                    None => {
                        index.insert(name.to_string(), counts.len());
                        counts.push(MealFrequency {
                            meal_name: name.to_string(),
                            count: 1,
                        });
                    }
                }
            }
        }
    }

    // stable: equal counts stay in first-seen order
    counts.sort_by(|a, b| b.count.cmp(&a.count));
    counts.truncate(TOP_MEALS);
    counts
}

/// Signups per day for the `days` days ending on `today`, oldest first.
///
/// The window is capped at [`MAX_SIGNUP_DAYS`] and never reaches past the
/// earliest representable date. Users without a creation time are not
/// counted.
pub fn signups_by_day(
    users: &[UserProfile],
    days: u32,
    today: NaiveDate,
) -> BTreeMap<NaiveDate, usize> {
    let mut buckets = BTreeMap::new();
    if days == 0 {
        return buckets;
    }
    let span = days.min(MAX_SIGNUP_DAYS) - 1;
    let start = today
        .checked_sub_days(Days::new(u64::from(span)))
        .unwrap_or(NaiveDate::MIN);
    for day in start.iter_days().take_while(|d| *d <= today) {
        buckets.insert(day, 0);
    }
    for created in users.iter().filter_map(|u| u.created_at) {
        if let Some(count) = buckets.get_mut(&created.date_naive()) {
            *count += 1;
        }
    }
    buckets
}

/// The `n` most recently created users, newest first.
pub fn newest_users(users: &[UserProfile], n: usize) -> Vec<&UserProfile> {
    let mut dated: Vec<&UserProfile> = users.iter().filter(|u| u.created_at.is_some()).collect();
    dated.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    dated.truncate(n);
    dated
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn plan(meals: Value) -> MealPlan {
        serde_json::from_value(json!({ "meals": meals })).unwrap()
    }

    #[test]
    fn most_frequent_first() {
        let plans = vec![
            plan(json!({"Ana": {"breakfast": "Oatmeal"}})),
            plan(json!({"Ben": {"breakfast": {"meal": "Oatmeal"}}})),
            plan(json!({"Cy": {"breakfast": "Omelette"}})),
        ];
        let top = popular_meals(&plans);
        assert_eq!(
            top[0],
            MealFrequency {
                meal_name: "Oatmeal".into(),
                count: 2
            }
        );
        assert_eq!(top[1].meal_name, "Omelette");
    }

    #[test]
    fn keeps_top_five_with_first_seen_ties() {
        let plans = vec![plan(json!({
            "Ana": {"breakfast": "A", "lunch": "B", "dinner": "C"},
            "Ben": {"breakfast": "D", "lunch": "E", "dinner": "F"},
            "Cy":  {"breakfast": "F", "lunch": "", "dinner": null}
        }))];
        let top = popular_meals(&plans);
        let names: Vec<_> = top.iter().map(|m| m.meal_name.as_str()).collect();
        assert_eq!(names, ["F", "A", "B", "C", "D"]);
    }

    #[test]
    fn malformed_documents_do_not_stop_the_scan() {
        let docs = vec![
            json!({"meals": {"Ana": {"breakfast": "Oatmeal"}}}),
            json!({"planName": 12, "meals": {"Ben": {"breakfast": "Oatmeal"}}}),
            json!({"meals": "garbage"}),
            json!({"meals": {"Cy": null, "Di": {"dinner": {"meal": "Oatmeal"}}}}),
            json!({"meals": {"Ed": {"lunch": "Omelette"}}}),
            json!("not a plan"),
        ];
        let top = popular_meals_from_documents(&docs);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].meal_name, "Oatmeal");
        assert_eq!(top[0].count, 3);
        assert_eq!(top[1].meal_name, "Omelette");
        assert_eq!(top[1].count, 1);
    }

    #[test]
    fn stray_field_types_still_count_meals() {
        let docs = vec![
            json!({"planName": "ok", "meals": {"Ana": {"breakfast": "Oatmeal"}}}),
            json!({"isPublic": "yes", "meals": {"Ben": {"breakfast": "Omelette"}}}),
            json!({"createdAt": 5, "familyMembers": "x", "meals": {"Cy": {"lunch": "Omelette"}}}),
        ];
        let top = popular_meals_from_documents(&docs);
        assert_eq!(top[0].meal_name, "Omelette");
        assert_eq!(top[0].count, 2);
        assert_eq!(top[1].meal_name, "Oatmeal");
    }

    fn user(id: &str, created: Option<(i32, u32, u32)>) -> UserProfile {
        UserProfile {
            id: id.into(),
            created_at: created
                .map(|(y, m, d)| Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()),
            ..Default::default()
        }
    }

    #[test]
    fn signup_histogram() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let users = vec![
            user("a", Some((2024, 3, 10))),
            user("b", Some((2024, 3, 10))),
            user("c", Some((2024, 3, 4))),
            user("d", Some((2024, 3, 3))),
            user("e", None),
        ];
        let days = signups_by_day(&users, 7, today);
        assert_eq!(days.len(), 7);
        assert_eq!(days.keys().next(), NaiveDate::from_ymd_opt(2024, 3, 4).as_ref());
        assert_eq!(days[&today], 2);
        assert_eq!(days.values().sum::<usize>(), 3);
        assert!(signups_by_day(&users, 0, today).is_empty());
    }

    #[test]
    fn huge_signup_windows_are_capped() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let users = vec![user("a", Some((2024, 3, 10)))];
        let days = signups_by_day(&users, u32::MAX, today);
        assert_eq!(days.len(), MAX_SIGNUP_DAYS as usize);
        assert_eq!(days[&today], 1);

        let early = signups_by_day(&users, 30, NaiveDate::MIN);
        assert_eq!(early.len(), 1);
        assert_eq!(early.keys().next(), Some(&NaiveDate::MIN));
    }

    #[test]
    fn newest_users_sorted() {
        let users = vec![
            user("old", Some((2023, 1, 1))),
            user("none", None),
            user("new", Some((2024, 1, 1))),
        ];
        let ids: Vec<_> = newest_users(&users, 5).iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, ["new", "old"]);
    }
}
