use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::auth::FirebaseAuth;
use crate::blob::{BlobUploader, CloudinaryUploader};
use crate::catalog::Catalog;
use crate::config::Config;
use crate::dietary::dietary_conflicts;
use crate::error::StoreError;
use crate::firestore::FirestoreClient;
use crate::goals::goals_for;
use crate::intake::{aggregate_intake, calorie_progress, MacroProgress};
use crate::models::*;
use crate::store::{
    get_as, subscribe, Direction, DocumentStore, Query, SetOptions, Snapshot, StoredDocument,
    Subscription,
};

/// Application operations for one signed-in user.
#[derive(Clone)]
pub struct SavorellaClient {
    pub store: Arc<dyn DocumentStore>,
    pub(crate) auth: Option<FirebaseAuth>,
    pub(crate) config: Config,
    uploader: Option<Arc<dyn BlobUploader>>,
    catalog: Arc<Catalog>,
    user_id: String,
}

impl SavorellaClient {
    /// Compose a client over any store, acting as `user_id`.
    pub fn new(store: Arc<dyn DocumentStore>, config: Config, user_id: &str) -> Self {
        Self {
            store,
            auth: None,
            config,
            uploader: None,
            catalog: Arc::new(Catalog::builtin().clone()),
            user_id: user_id.to_string(),
        }
    }

    pub fn with_uploader(mut self, uploader: Arc<dyn BlobUploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn with_catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = Arc::new(catalog);
        self
    }

    fn connect(config: Config, auth: FirebaseAuth, user_id: &str) -> Self {
        let firestore = FirestoreClient::new(auth.clone(), &config.project_id);
        let uploader = CloudinaryUploader::from_config(&config)
            .ok()
            .map(|u| Arc::new(u) as Arc<dyn BlobUploader>);
        let mut client = Self::new(Arc::new(firestore), config, user_id);
        client.auth = Some(auth);
        client.uploader = uploader;
        client
    }

    /// Sign in with email and password against Firebase.
    pub async fn login(config: Config, email: &str, password: &str) -> Result<Self> {
        let (auth, account) =
            FirebaseAuth::sign_in_with_email(&config.firebase_api_key, email, password).await?;
        Ok(Self::connect(config, auth, &account.uid))
    }

    /// Resume a session from a refresh token.
    pub async fn resume(config: Config, refresh_token: String) -> Result<Self> {
        let auth = FirebaseAuth::new(&config.firebase_api_key, refresh_token);
        let uid = auth.get_user_id().await?;
        Ok(Self::connect(config, auth, &uid))
    }

    /// Create an account and its `users/{uid}` profile document.
    ///
    /// Emails on the configured admin list get admin rights.
    pub async fn sign_up(config: Config, name: &str, email: &str, password: &str) -> Result<Self> {
        let (auth, account) =
            FirebaseAuth::sign_up_with_email(&config.firebase_api_key, email, password, name)
                .await?;
        let client = Self::connect(config, auth, &account.uid);
        client.create_profile(name, email).await?;
        Ok(client)
    }

    pub async fn send_password_reset(config: &Config, email: &str) -> Result<()> {
        FirebaseAuth::send_password_reset(&config.firebase_api_key, email).await
    }

    /// Write the initial profile document for the current user.
    pub async fn create_profile(&self, name: &str, email: &str) -> Result<()> {
        let is_admin = self.config.is_admin_email(email);
        self.store
            .set(
                &self.user_path(),
                json!({
                    "name": name,
                    "email": email,
                    "createdAt": timestamp::now(),
                    "isAdmin": is_admin,
                }),
                SetOptions::REPLACE,
            )
            .await?;
        info!(uid = %self.user_id, is_admin, "profile created");
        Ok(())
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn user_path(&self) -> String {
        format!("users/{}", self.user_id)
    }

    fn plans_path(&self, owner: &str) -> String {
        format!("users/{}/mealPlans", owner)
    }

    /// The current user's profile document.
    pub async fn get_profile(&self) -> Result<Option<UserProfile>> {
        load_profile(self.store.as_ref(), &self.user_id).await
    }

    pub async fn is_admin(&self) -> Result<bool> {
        Ok(self.get_profile().await?.is_some_and(|p| p.is_admin))
    }

    /// Change the display name and/or avatar image.
    pub async fn update_profile(&self, name: Option<&str>, avatar: Option<(Vec<u8>, &str)>) -> Result<()> {
        let mut fields = serde_json::Map::new();
        if let Some(name) = name {
            fields.insert("name".into(), json!(name));
        }
        if let Some((bytes, mime)) = avatar {
            let uploader = self
                .uploader
                .as_ref()
                .ok_or_else(|| anyhow!("no image uploader configured"))?;
            let url = uploader.upload(bytes, mime).await?;
            fields.insert("avatar".into(), json!(url));
        }
        if fields.is_empty() {
            return Ok(());
        }
        self.store
            .set(&self.user_path(), Value::Object(fields), SetOptions::MERGE)
            .await
    }

    /// Adults then children, skipping unnamed entries.
    pub async fn family_members(&self) -> Result<Vec<Person>> {
        Ok(self
            .get_profile()
            .await?
            .map(|p| p.family())
            .unwrap_or_default())
    }

    /// Save the family questionnaire.
    pub async fn save_family(
        &self,
        parent_name: &str,
        adults: &[Person],
        children: &[Person],
    ) -> Result<()> {
        if parent_name.trim().is_empty() {
            return Err(anyhow!("parent name is required"));
        }
        self.store
            .set(
                &self.user_path(),
                json!({
                    "familyInfoCompleted": true,
                    "parentName": parent_name,
                    "adults": adults,
                    "children": children,
                }),
                SetOptions::MERGE,
            )
            .await
    }

    /// Replace one family member's meal reminders.
    ///
    /// Returns false when no member has that name.
    pub async fn save_meal_reminders(&self, person: &str, reminders: &[MealReminder]) -> Result<bool> {
        let reminders = reminders
            .iter()
            .map(|r| {
                let time = normalize_reminder_time(&r.time)
                    .ok_or_else(|| anyhow!("invalid reminder time {:?}", r.time))?;
                Ok(MealReminder { time, ..r.clone() })
            })
            .collect::<Result<Vec<_>>>()?;
        let Some(mut profile) = self.get_profile().await? else {
            return Ok(false);
        };
        let (field, members) = if let Some(i) = profile.adults.iter().position(|a| a.name == person) {
            profile.adults[i].meal_reminders = reminders;
            ("adults", &profile.adults)
        } else if let Some(i) = profile.children.iter().position(|c| c.name == person) {
            profile.children[i].meal_reminders = reminders;
            ("children", &profile.children)
        } else {
            return Ok(false);
        };
        let mut fields = serde_json::Map::new();
        fields.insert(field.to_string(), serde_json::to_value(members)?);
        self.store
            .update(&self.user_path(), Value::Object(fields))
            .await?;
        Ok(true)
    }

    /// The current user's plans, newest first.
    pub async fn meal_plans(&self) -> Result<Vec<MealPlan>> {
        let query = Query::collection(&self.plans_path(&self.user_id))
            .order_by("createdAt", Direction::Descending);
        Ok(decode_plans(self.store.query(&query).await?))
    }

    pub async fn get_meal_plan(&self, plan_id: &str) -> Result<Option<MealPlan>> {
        let path = format!("{}/{}", self.plans_path(&self.user_id), plan_id);
        Ok(get_as::<MealPlan>(self.store.as_ref(), &path)
            .await?
            .map(|mut plan| {
                plan.id = plan_id.to_string();
                if plan.owner.is_empty() {
                    plan.owner = self.user_id.clone();
                }
                plan
            }))
    }

    /// Save a new private plan for the current family, returning its ID.
    pub async fn create_meal_plan(
        &self,
        plan_name: &str,
        meals: BTreeMap<String, MealSlots>,
    ) -> Result<String> {
        if plan_name.trim().is_empty() {
            return Err(anyhow!("plan name is required"));
        }
        let profile = self.get_profile().await?.unwrap_or_default();
        let family_members = profile
            .family()
            .into_iter()
            .map(|p| FamilyMemberRef {
                name: p.name,
                role: p.role,
                preferences: p.preferences,
            })
            .collect();
        let plan = MealPlan {
            owner: self.user_id.clone(),
            user_name: profile.name,
            plan_name: plan_name.to_string(),
            created_at: Some(Utc::now()),
            is_public: false,
            family_members,
            meals,
            ..Default::default()
        };
        let id = self
            .store
            .add(&self.plans_path(&self.user_id), serde_json::to_value(&plan)?)
            .await?;
        info!(plan_id = %id, "meal plan created");
        Ok(id)
    }

    pub async fn delete_meal_plan(&self, plan_id: &str) -> Result<()> {
        self.store
            .delete(&format!("{}/{}", self.plans_path(&self.user_id), plan_id))
            .await
    }

    /// Publish or unpublish one of the current user's plans.
    pub async fn set_plan_visibility(&self, plan_id: &str, is_public: bool) -> Result<()> {
        self.write_visibility(&self.user_id, plan_id, is_public)
            .await
    }

    pub(crate) async fn write_visibility(&self, owner: &str, plan_id: &str, is_public: bool) -> Result<()> {
        let path = format!("{}/{}", self.plans_path(owner), plan_id);
        self.store
            .update(&path, json!({ "isPublic": is_public }))
            .await?;
        info!(%owner, %plan_id, is_public, "plan visibility changed");
        Ok(())
    }

    /// Every user's published plans.
    pub async fn public_meal_plans(&self) -> Result<Vec<MealPlan>> {
        let query = Query::collection_group("mealPlans").where_eq("isPublic", true);
        Ok(decode_plans(self.store.query(&query).await?))
    }

    /// Published plans whose name contains `text`, ignoring case.
    pub async fn search_public_plans(&self, text: &str) -> Result<Vec<MealPlan>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let plans = self.public_meal_plans().await?;
        Ok(filter_plans_by_name(plans, text))
    }

    /// Call `on_change` with the current user's plans, newest first, whenever they change.
    pub fn watch_meal_plans<F>(&self, mut on_change: F) -> Subscription
    where
        F: FnMut(Vec<MealPlan>) + Send + 'static,
    {
        let query = Query::collection(&self.plans_path(&self.user_id))
            .order_by("createdAt", Direction::Descending);
        subscribe(
            self.store.clone(),
            query,
            self.config.poll_interval,
            move |snapshot| {
                if let Snapshot::Collection(docs) = snapshot {
                    on_change(decode_plans(docs));
                }
            },
        )
    }

    /// Dish names offered for a slot.
    pub fn meal_options(&self, slot: MealType) -> Vec<&str> {
        self.catalog
            .options_for(slot)
            .map(|d| d.name.as_str())
            .collect()
    }

    /// Dietary conflicts of every assigned dish in a plan against its members' preferences.
    pub fn plan_conflicts(&self, plan: &MealPlan) -> Vec<PlanConflict> {
        let mut conflicts = Vec::new();
        for member in &plan.family_members {
            let Some(slots) = plan.meals.get(&member.name) else {
                continue;
            };
            for (slot, dish) in slots.iter() {
                let found = dietary_conflicts(self.catalog.find(dish), &member.preferences);
                if !found.is_empty() {
                    conflicts.push(PlanConflict {
                        person: member.name.clone(),
                        slot,
                        dish: dish.to_string(),
                        conflicts: found,
                    });
                }
            }
        }
        conflicts
    }

    /// Goals, intake and progress for one family member and one of the user's plans.
    pub async fn dashboard(&self, person: &str, plan_id: Option<&str>) -> Result<Dashboard> {
        let member = self
            .get_profile()
            .await?
            .and_then(|p| p.find_member(person));
        let plan = match plan_id {
            Some(id) => self.get_meal_plan(id).await?,
            None => None,
        };
        Ok(build_dashboard(person, member.as_ref(), plan.as_ref(), &self.catalog))
    }
}

/// One dish that a person's preferences rule out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanConflict {
    pub person: String,
    pub slot: MealType,
    pub dish: String,
    pub conflicts: Vec<String>,
}

/// Nutrition progress for one person and plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dashboard {
    pub person: String,
    pub goals: NutrientGoals,
    pub intake: NutrientIntake,
    pub micronutrients: Micronutrients,
    pub progress: MacroProgress,
    /// Calorie goal coverage, 0..=100
    pub total_progress: f64,
}

/// Unknown people get the default goals; a missing plan gives zero intake.
pub fn build_dashboard(
    name: &str,
    person: Option<&Person>,
    plan: Option<&MealPlan>,
    catalog: &Catalog,
) -> Dashboard {
    let goals = person.map(goals_for).unwrap_or_default();
    let report = aggregate_intake(name, plan, catalog);
    Dashboard {
        person: name.to_string(),
        goals,
        progress: MacroProgress::new(&report.intake, &goals),
        total_progress: calorie_progress(&report.intake, &goals),
        intake: report.intake,
        micronutrients: report.micronutrients,
    }
}

pub fn filter_plans_by_name(plans: Vec<MealPlan>, text: &str) -> Vec<MealPlan> {
    let needle = text.trim().to_lowercase();
    plans
        .into_iter()
        .filter(|p| p.plan_name.to_lowercase().contains(&needle))
        .collect()
}

/// Reminder times are shown as `h:mm AM|PM`; this parses that shape back.
pub fn parse_reminder_time(time: &str) -> Option<(u32, u32, bool)> {
    let (hours, rest) = time.trim().split_once(':')?;
    let hours: u32 = hours.trim().parse().ok()?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    let minutes: u32 = digits.parse().ok()?;
    let pm = match rest[digits.len()..].trim() {
        "" => false,
        suffix if suffix.eq_ignore_ascii_case("am") => false,
        suffix if suffix.eq_ignore_ascii_case("pm") => true,
        _ => return None,
    };
    ((1..=12).contains(&hours) && minutes < 60).then_some((hours, minutes, pm))
}

pub fn format_reminder_time(hours: u32, minutes: u32, pm: bool) -> String {
    format!("{}:{:02} {}", hours, minutes, if pm { "PM" } else { "AM" })
}

pub fn normalize_reminder_time(time: &str) -> Option<String> {
    parse_reminder_time(time).map(|(h, m, pm)| format_reminder_time(h, m, pm))
}

pub(crate) async fn load_profile(store: &dyn DocumentStore, uid: &str) -> Result<Option<UserProfile>> {
    Ok(get_as::<UserProfile>(store, &format!("users/{}", uid))
        .await?
        .map(|mut profile| {
            profile.id = uid.to_string();
            profile
        }))
}

/// Decode each document, logging and skipping those that fail.
pub(crate) fn decode_each<T, F>(docs: Vec<StoredDocument>, mut fill: F) -> Vec<T>
where
    T: DeserializeOwned,
    F: FnMut(&mut T, &StoredDocument),
{
    docs.into_iter()
        .filter_map(|doc| match doc.decode::<T>() {
            Ok(mut item) => {
                fill(&mut item, &doc);
                Some(item)
            }
            Err(e) => {
                warn!(path = %doc.path, "skipping document: {:#}", e);
                None
            }
        })
        .collect()
}

pub(crate) fn decode_plans(docs: Vec<StoredDocument>) -> Vec<MealPlan> {
    decode_each(docs, |plan: &mut MealPlan, doc| {
        plan.id = doc.id.clone();
        if plan.owner.is_empty() {
            plan.owner = doc.parent_id().unwrap_or_default().to_string();
        }
    })
}

pub(crate) fn permission_denied(what: &str) -> anyhow::Error {
    StoreError::PermissionDenied(what.to_string()).into()
}
