use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::auth::FirebaseAuth;
use crate::client::{decode_each, decode_plans, permission_denied, SavorellaClient};
use crate::models::{timestamp, MealFrequency, MealPlan, UserProfile};
use crate::popularity::{
    newest_users, popular_meals_from_documents, signups_by_day, MAX_SIGNUP_DAYS,
};
use crate::store::{Direction, Query};

const USERS: &str = "users";

/// Signup histogram windows offered on the dashboard, in days.
pub const SIGNUP_WINDOWS: [u32; 3] = [7, 30, 90];
pub const NEWEST_USERS: usize = 5;

/// Admin dashboard figures.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminOverview {
    pub total_users: usize,
    pub signups: BTreeMap<NaiveDate, usize>,
    pub newest_users: Vec<UserProfile>,
    pub popular_meals: Vec<MealFrequency>,
}

/// Sort users newest first; users without a creation time go last.
pub fn sort_newest_first(users: &mut [UserProfile]) {
    users.sort_by(|a, b| match (a.created_at, b.created_at) {
        (Some(a), Some(b)) => b.cmp(&a),
        (a, b) => b.is_some().cmp(&a.is_some()),
    });
}

impl SavorellaClient {
    /// Fails with a permission error unless the current user is an admin.
    pub async fn require_admin(&self) -> Result<()> {
        if self.is_admin().await? {
            Ok(())
        } else {
            Err(permission_denied("admin only"))
        }
    }

    async fn all_profiles(&self) -> Result<Vec<UserProfile>> {
        let docs = self.store.list(USERS).await?;
        Ok(decode_each(docs, |user: &mut UserProfile, doc| {
            user.id = doc.id.clone()
        }))
    }

    /// IDs and names of non-admin users, read from the raw documents so a
    /// profile that fails to decode still owns its plans.
    async fn plan_owners(&self) -> Result<Vec<(String, Option<String>)>> {
        let docs = self.store.list(USERS).await?;
        Ok(docs
            .into_iter()
            .filter(|doc| doc.data.get("isAdmin") != Some(&Value::Bool(true)))
            .map(|doc| {
                let name = doc.data.get("name").and_then(Value::as_str).map(str::to_string);
                (doc.id, name)
            })
            .collect())
    }

    /// Non-admin users, newest first.
    pub async fn users(&self) -> Result<Vec<UserProfile>> {
        self.require_admin().await?;
        let mut users: Vec<UserProfile> = self
            .all_profiles()
            .await?
            .into_iter()
            .filter(|u| !u.is_admin)
            .collect();
        sort_newest_first(&mut users);
        Ok(users)
    }

    pub async fn update_user(
        &self,
        user_id: &str,
        name: &str,
        email: &str,
        is_nutritionist: bool,
    ) -> Result<()> {
        self.require_admin().await?;
        self.store
            .update(
                &format!("{}/{}", USERS, user_id),
                json!({
                    "name": name,
                    "email": email,
                    "isNutritionist": is_nutritionist,
                }),
            )
            .await?;
        info!(%user_id, "user updated");
        Ok(())
    }

    /// Delete user documents. Every ID is attempted; failures are reported together.
    pub async fn delete_users(&self, user_ids: &[&str]) -> Result<()> {
        self.require_admin().await?;
        let mut failed = Vec::new();
        for user_id in user_ids {
            if let Err(e) = self.store.delete(&format!("{}/{}", USERS, user_id)).await {
                warn!(%user_id, "failed to delete user: {:#}", e);
                failed.push(*user_id);
            }
        }
        info!(deleted = user_ids.len() - failed.len(), "users deleted");
        if failed.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("failed to delete users: {}", failed.join(", ")))
        }
    }

    /// Create a user document and, when connected to Firebase, email a
    /// password setup link. Returns the new document ID.
    pub async fn add_user(&self, name: &str, email: &str) -> Result<String> {
        self.require_admin().await?;
        if name.trim().is_empty() || email.trim().is_empty() {
            return Err(anyhow!("name and email are required"));
        }
        let id = self
            .store
            .add(
                USERS,
                json!({
                    "name": name,
                    "email": email,
                    "createdAt": timestamp::now(),
                    "isAdmin": false,
                }),
            )
            .await?;
        self.send_reset_email(email).await?;
        info!(user_id = %id, "user added");
        Ok(id)
    }

    pub async fn send_reset_email(&self, email: &str) -> Result<()> {
        if self.auth.is_none() {
            debug!(%email, "no auth backend, skipping reset email");
            return Ok(());
        }
        FirebaseAuth::send_password_reset(&self.config.firebase_api_key, email).await
    }

    /// Every non-admin user's plans, each user's newest first.
    ///
    /// A user whose plans cannot be read is logged and skipped.
    pub async fn all_meal_plans(&self) -> Result<Vec<MealPlan>> {
        self.require_admin().await?;
        let mut plans = Vec::new();
        for (user_id, name) in self.plan_owners().await? {
            let query = Query::collection(&format!("{}/{}/mealPlans", USERS, user_id))
                .order_by("createdAt", Direction::Descending);
            match self.store.query(&query).await {
                Ok(docs) => plans.extend(decode_plans(docs).into_iter().map(|mut plan| {
                    if plan.user_name.is_none() {
                        plan.user_name = name.clone();
                    }
                    plan
                })),
                Err(e) => warn!(%user_id, "failed to read meal plans: {:#}", e),
            }
        }
        Ok(plans)
    }

    /// Publish or unpublish any user's plan.
    pub async fn toggle_plan_visibility(&self, owner: &str, plan_id: &str, is_public: bool) -> Result<()> {
        self.require_admin().await?;
        self.write_visibility(owner, plan_id, is_public).await
    }

    pub async fn delete_any_plan(&self, owner: &str, plan_id: &str) -> Result<()> {
        self.require_admin().await?;
        self.store
            .delete(&format!("{}/{}/mealPlans/{}", USERS, owner, plan_id))
            .await?;
        info!(%owner, %plan_id, "plan deleted by admin");
        Ok(())
    }

    /// Most assigned dishes across all non-admin users' plans.
    pub async fn popular_meals(&self) -> Result<Vec<MealFrequency>> {
        self.require_admin().await?;
        let mut documents: Vec<Value> = Vec::new();
        for (user_id, _) in self.plan_owners().await? {
            match self.store.list(&format!("{}/{}/mealPlans", USERS, user_id)).await {
                Ok(docs) => documents.extend(docs.into_iter().map(|d| d.data)),
                Err(e) => warn!(%user_id, "failed to read meal plans: {:#}", e),
            }
        }
        Ok(popular_meals_from_documents(&documents))
    }

    /// Dashboard figures with a signup histogram over the last `days` days.
    ///
    /// `days` must be between 1 and [`MAX_SIGNUP_DAYS`].
    pub async fn admin_overview(&self, days: u32) -> Result<AdminOverview> {
        if days == 0 || days > MAX_SIGNUP_DAYS {
            return Err(anyhow!(
                "signup window must be 1 to {} days, got {}",
                MAX_SIGNUP_DAYS,
                days
            ));
        }
        let users = self.users().await?;
        let today = Utc::now().date_naive();
        Ok(AdminOverview {
            total_users: users.len(),
            signups: signups_by_day(&users, days, today),
            newest_users: newest_users(&users, NEWEST_USERS).into_iter().cloned().collect(),
            popular_meals: self.popular_meals().await?,
        })
    }
}
