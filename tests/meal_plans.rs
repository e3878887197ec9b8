use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;

use savorella::blob::BlobUploader;
use savorella::client::SavorellaClient;
use savorella::config::Config;
use savorella::models::{MealReminder, MealSlots, MealType, Person, NutrientGoals};
use savorella::store::{DocumentStore, MemoryStore, SetOptions};

fn client_for(store: &MemoryStore, uid: &str) -> SavorellaClient {
    let config = Config {
        poll_interval: Duration::from_millis(5),
        ..Config::new("test-key", "test-project")
    };
    SavorellaClient::new(Arc::new(store.clone()), config, uid)
}

async fn seed_family(store: &MemoryStore, uid: &str) {
    store
        .set(
            &format!("users/{}", uid),
            json!({
                "name": "Dana",
                "email": "dana@example.com",
                "adults": [
                    {"name": "Dana", "height": "165", "weight": "60", "preferences": ["Vegetarian"]}
                ],
                "children": [
                    {"name": "Kit", "age": "7", "height": 120, "weight": 22, "preferences": []}
                ]
            }),
            SetOptions::REPLACE,
        )
        .await
        .unwrap();
}

fn slots(breakfast: &str, lunch: &str, dinner: &str) -> MealSlots {
    let mut slots = MealSlots::default();
    slots.set(MealType::Breakfast, Some(breakfast.into()));
    slots.set(MealType::Lunch, Some(lunch.into()));
    slots.set(MealType::Dinner, Some(dinner.into()));
    slots
}

#[tokio::test]
async fn plans_list_newest_first_and_delete() {
    let store = MemoryStore::new();
    seed_family(&store, "u1").await;
    let client = client_for(&store, "u1");

    let first = client
        .create_meal_plan("Week 1", BTreeMap::new())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(2)).await;
    let second = client
        .create_meal_plan("Week 2", BTreeMap::new())
        .await
        .unwrap();

    let plans = client.meal_plans().await.unwrap();
    let ids: Vec<_> = plans.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, [second.as_str(), first.as_str()]);
    assert!(plans.iter().all(|p| p.owner == "u1" && !p.is_public));
    assert_eq!(plans[0].user_name.as_deref(), Some("Dana"));
    assert_eq!(plans[0].family_members.len(), 2);

    client.delete_meal_plan(&first).await.unwrap();
    assert_eq!(client.meal_plans().await.unwrap().len(), 1);
}

#[tokio::test]
async fn empty_plan_name_is_rejected() {
    let store = MemoryStore::new();
    let client = client_for(&store, "u1");
    assert!(client.create_meal_plan("  ", BTreeMap::new()).await.is_err());
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn wrapped_and_plain_slots_give_the_same_dashboard() {
    let store = MemoryStore::new();
    seed_family(&store, "u1").await;
    let client = client_for(&store, "u1");

    store
        .set(
            "users/u1/mealPlans/plain",
            json!({"planName": "a", "meals": {"Dana": {"breakfast": "Avocado Toast", "lunch": "Lentil Soup"}}}),
            SetOptions::REPLACE,
        )
        .await
        .unwrap();
    store
        .set(
            "users/u1/mealPlans/wrapped",
            json!({"planName": "b", "meals": {"Dana": {
                "breakfast": {"meal": "Avocado Toast"},
                "lunch": {"meal": "Lentil Soup", "time": "12:00 PM"}
            }}}),
            SetOptions::REPLACE,
        )
        .await
        .unwrap();

    let plain = client.dashboard("Dana", Some("plain")).await.unwrap();
    let wrapped = client.dashboard("Dana", Some("wrapped")).await.unwrap();
    assert_eq!(plain, wrapped);
    assert!(plain.intake.calories > 0.0);
    assert_ne!(plain.goals, NutrientGoals::DEFAULT);
}

#[tokio::test]
async fn dashboard_for_unknown_person_uses_defaults() {
    let store = MemoryStore::new();
    seed_family(&store, "u1").await;
    let client = client_for(&store, "u1");

    let dashboard = client.dashboard("Stranger", None).await.unwrap();
    assert_eq!(dashboard.goals, NutrientGoals::DEFAULT);
    assert_eq!(dashboard.intake.calories, 0.0);
    assert_eq!(dashboard.total_progress, 0.0);
}

#[tokio::test]
async fn public_plans_and_search() {
    let store = MemoryStore::new();
    let alice = client_for(&store, "alice");
    let bob = client_for(&store, "bob");

    let vegan = alice
        .create_meal_plan("Vegan Week", BTreeMap::new())
        .await
        .unwrap();
    alice
        .create_meal_plan("Private Week", BTreeMap::new())
        .await
        .unwrap();
    let kids = bob
        .create_meal_plan("Kids lunches", BTreeMap::new())
        .await
        .unwrap();

    alice.set_plan_visibility(&vegan, true).await.unwrap();
    bob.set_plan_visibility(&kids, true).await.unwrap();

    let public = bob.public_meal_plans().await.unwrap();
    assert_eq!(public.len(), 2);

    let found = bob.search_public_plans("week").await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, vegan);
    assert_eq!(found[0].owner, "alice");

    assert!(bob.search_public_plans("   ").await.unwrap().is_empty());

    alice.set_plan_visibility(&vegan, false).await.unwrap();
    assert!(bob.search_public_plans("vegan").await.unwrap().is_empty());
}

#[tokio::test]
async fn plan_conflicts_follow_member_preferences() {
    let store = MemoryStore::new();
    seed_family(&store, "u1").await;
    let client = client_for(&store, "u1");

    let meals = BTreeMap::from([
        ("Dana".to_string(), slots("Avocado Toast", "Grilled Chicken Salad", "Beef Tacos")),
        ("Kit".to_string(), slots("Avocado Toast", "Grilled Chicken Salad", "Beef Tacos")),
    ]);
    let id = client.create_meal_plan("Mixed", meals).await.unwrap();
    let plan = client.get_meal_plan(&id).await.unwrap().unwrap();

    let conflicts = client.plan_conflicts(&plan);
    assert!(!conflicts.is_empty());
    assert!(conflicts.iter().all(|c| c.person == "Dana"));
    assert!(conflicts
        .iter()
        .any(|c| c.dish == "Beef Tacos" && c.conflicts == ["not vegetarian"]));
}

#[tokio::test]
async fn family_save_keeps_other_fields() {
    let store = MemoryStore::new();
    seed_family(&store, "u1").await;
    let client = client_for(&store, "u1");

    let adults = vec![Person {
        name: "Sam".into(),
        height: "180".into(),
        weight: "80".into(),
        ..Default::default()
    }];
    client.save_family("Sam", &adults, &[]).await.unwrap();
    assert!(client.save_family(" ", &adults, &[]).await.is_err());

    let profile = client.get_profile().await.unwrap().unwrap();
    assert_eq!(profile.email.as_deref(), Some("dana@example.com"));
    assert!(profile.family_info_completed);
    assert_eq!(profile.parent_name.as_deref(), Some("Sam"));
    let names: Vec<_> = client
        .family_members()
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.name)
        .collect();
    assert_eq!(names, ["Sam"]);
}

#[tokio::test]
async fn meal_reminders_are_normalized() {
    let store = MemoryStore::new();
    seed_family(&store, "u1").await;
    let client = client_for(&store, "u1");

    let reminders = vec![MealReminder {
        label: "Breakfast".into(),
        time: "7:5am".into(),
        enabled: true,
    }];
    assert!(client.save_meal_reminders("Kit", &reminders).await.unwrap());
    assert!(!client.save_meal_reminders("Nobody", &reminders).await.unwrap());

    let bad = vec![MealReminder {
        time: "whenever".into(),
        ..reminders[0].clone()
    }];
    assert!(client.save_meal_reminders("Kit", &bad).await.is_err());

    let kit = client.get_profile().await.unwrap().unwrap().find_member("Kit").unwrap();
    assert_eq!(kit.meal_reminders[0].time, "7:05 AM");
    // untouched members and metrics survive
    assert_eq!(kit.height, "120");
}

struct FakeUploader;

#[async_trait]
impl BlobUploader for FakeUploader {
    async fn upload(&self, bytes: Vec<u8>, mime_hint: &str) -> anyhow::Result<String> {
        Ok(format!("https://img.test/{}-{}", bytes.len(), mime_hint))
    }
}

#[tokio::test]
async fn profile_update_uploads_avatar() {
    let store = MemoryStore::new();
    seed_family(&store, "u1").await;

    let without = client_for(&store, "u1");
    assert!(without
        .update_profile(None, Some((vec![1, 2, 3], "png")))
        .await
        .is_err());

    let client = client_for(&store, "u1").with_uploader(Arc::new(FakeUploader));
    client
        .update_profile(Some("Dee"), Some((vec![1, 2, 3], "png")))
        .await
        .unwrap();
    let profile = client.get_profile().await.unwrap().unwrap();
    assert_eq!(profile.name.as_deref(), Some("Dee"));
    assert_eq!(profile.avatar.as_deref(), Some("https://img.test/3-png"));
    assert_eq!(profile.adults.len(), 1);
}

#[tokio::test]
async fn watch_meal_plans_sees_new_plans() {
    let store = MemoryStore::new();
    let client = client_for(&store, "u1");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let sub = client.watch_meal_plans(move |plans| {
        let _ = tx.send(plans.len());
    });

    assert_eq!(timeout(Duration::from_secs(2), rx.recv()).await.unwrap(), Some(0));
    client
        .create_meal_plan("Week 1", BTreeMap::new())
        .await
        .unwrap();
    assert_eq!(timeout(Duration::from_secs(2), rx.recv()).await.unwrap(), Some(1));
    drop(sub);
}
