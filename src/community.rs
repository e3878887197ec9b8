use anyhow::{anyhow, Result};
use chrono::Utc;
use serde_json::json;
use tracing::info;

use crate::client::{decode_each, permission_denied, SavorellaClient};
use crate::error::StoreError;
use crate::models::{Post, Reply, Report, UserProfile, DEFAULT_CATEGORY};
use crate::store::{get_as, Direction, Query, Snapshot, Subscription};

const POSTS: &str = "posts";
const REPORTS: &str = "reports";

pub const CATEGORIES: [&str; 4] = [DEFAULT_CATEGORY, "Recipes", "Tips", "Questions"];
pub const DELETED_POST: &str = "[Deleted Post]";
pub const DELETED_REPLY: &str = "[Deleted Reply]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    Up,
    Down,
}

impl Vote {
    fn value(self) -> i64 {
        match self {
            Vote::Up => 1,
            Vote::Down => -1,
        }
    }
}

/// New `(votes, user_vote)` after voting; repeating the current vote clears it.
pub fn apply_vote(votes: i64, user_vote: i64, vote: Vote) -> (i64, i64) {
    let new_vote = if user_vote == vote.value() { 0 } else { vote.value() };
    (votes + new_vote - user_vote, new_vote)
}

/// Posts in a category; `"All"` keeps everything.
pub fn posts_in_category<'a>(posts: &'a [Post], category: &str) -> Vec<&'a Post> {
    posts
        .iter()
        .filter(|p| category == "All" || p.category == category)
        .collect()
}

fn find_reply<'a>(post: &'a Post, reply_id: &str) -> Option<&'a Reply> {
    post.replies.iter().find(|r| r.id == reply_id)
}

/// Text of the reported post or reply, or a placeholder once it is gone.
pub fn reported_content(report: &Report, posts: &[Post]) -> String {
    let Some(post) = posts.iter().find(|p| p.id == report.post_id) else {
        return DELETED_POST.to_string();
    };
    match &report.reply_id {
        Some(reply_id) => find_reply(post, reply_id)
            .map(|r| r.text.clone())
            .unwrap_or_else(|| DELETED_REPLY.to_string()),
        None => post.text.clone(),
    }
}

/// Author of the reported post or reply; empty when it is gone.
pub fn reported_author(report: &Report, posts: &[Post]) -> String {
    let Some(post) = posts.iter().find(|p| p.id == report.post_id) else {
        return String::new();
    };
    match &report.reply_id {
        Some(reply_id) => find_reply(post, reply_id)
            .map(|r| r.author.clone())
            .unwrap_or_default(),
        None => post.author.clone(),
    }
}

/// Name shown on posts: profile name, else the email's local part.
pub fn display_name(profile: Option<&UserProfile>) -> String {
    let Some(profile) = profile else {
        return "you".to_string();
    };
    if let Some(name) = profile.name.as_deref().filter(|n| !n.is_empty()) {
        return name.to_string();
    }
    profile
        .email
        .as_deref()
        .and_then(|e| e.split('@').next())
        .filter(|local| !local.is_empty())
        .unwrap_or("you")
        .to_string()
}

fn decode_posts(docs: Vec<crate::store::StoredDocument>) -> Vec<Post> {
    decode_each(docs, |post: &mut Post, doc| post.id = doc.id.clone())
}

fn posts_query() -> Query {
    Query::collection(POSTS).order_by("createdAt", Direction::Descending)
}

impl SavorellaClient {
    /// All posts, newest first.
    pub async fn posts(&self) -> Result<Vec<Post>> {
        Ok(decode_posts(self.store.query(&posts_query()).await?))
    }

    pub async fn get_post(&self, post_id: &str) -> Result<Option<Post>> {
        Ok(get_as::<Post>(self.store.as_ref(), &format!("{}/{}", POSTS, post_id))
            .await?
            .map(|mut post| {
                post.id = post_id.to_string();
                post
            }))
    }

    pub fn watch_posts<F>(&self, mut on_change: F) -> Subscription
    where
        F: FnMut(Vec<Post>) + Send + 'static,
    {
        crate::store::subscribe(
            self.store.clone(),
            posts_query(),
            self.config.poll_interval,
            move |snapshot| {
                if let Snapshot::Collection(docs) = snapshot {
                    on_change(decode_posts(docs));
                }
            },
        )
    }

    /// Publish a post, starting with the author's own upvote.
    pub async fn create_post(&self, text: &str, category: Option<&str>) -> Result<String> {
        if text.trim().is_empty() {
            return Err(anyhow!("post text is empty"));
        }
        let profile = self.get_profile().await?;
        let post = Post {
            author: display_name(profile.as_ref()),
            author_id: Some(self.user_id().to_string()),
            text: text.to_string(),
            created_at: Some(Utc::now()),
            votes: 1,
            user_vote: 1,
            category: category.unwrap_or(DEFAULT_CATEGORY).to_string(),
            ..Default::default()
        };
        let id = self.store.add(POSTS, serde_json::to_value(&post)?).await?;
        info!(post_id = %id, "post created");
        Ok(id)
    }

    /// Returns the post's new vote total.
    pub async fn vote(&self, post_id: &str, vote: Vote) -> Result<i64> {
        let post = self
            .get_post(post_id)
            .await?
            .ok_or_else(|| anyhow!("post {} not found", post_id))?;
        let (votes, user_vote) = apply_vote(post.votes, post.user_vote, vote);
        self.store
            .update(
                &format!("{}/{}", POSTS, post_id),
                json!({ "votes": votes, "userVote": user_vote }),
            )
            .await?;
        Ok(votes)
    }

    /// Append a reply, returning its ID.
    pub async fn reply(&self, post_id: &str, text: &str) -> Result<String> {
        if text.trim().is_empty() {
            return Err(anyhow!("reply text is empty"));
        }
        let profile = self.get_profile().await?;
        let now = Utc::now();
        let id = now
            .timestamp_nanos_opt()
            .unwrap_or_else(|| now.timestamp_millis())
            .to_string();
        let reply = Reply {
            id: id.clone(),
            author: display_name(profile.as_ref()),
            author_id: Some(self.user_id().to_string()),
            text: text.to_string(),
            created_at: Some(now),
        };
        match self
            .store
            .append(
                &format!("{}/{}", POSTS, post_id),
                "replies",
                vec![serde_json::to_value(&reply)?],
            )
            .await
        {
            Ok(()) => Ok(id),
            Err(e) if StoreError::is_not_found(&e) => Err(anyhow!("post {} not found", post_id)),
            Err(e) => Err(e),
        }
    }

    /// Authors may delete their own posts; admins may delete any.
    pub async fn delete_post(&self, post_id: &str) -> Result<()> {
        let Some(post) = self.get_post(post_id).await? else {
            return Ok(());
        };
        if post.author_id.as_deref() != Some(self.user_id()) && !self.is_admin().await? {
            return Err(permission_denied(&format!("delete post {}", post_id)));
        }
        self.store.delete(&format!("{}/{}", POSTS, post_id)).await?;
        info!(%post_id, "post deleted");
        Ok(())
    }

    /// Flag a post, or one of its replies, for moderation.
    pub async fn report(&self, post_id: &str, reply_id: Option<&str>, reason: &str) -> Result<String> {
        if reason.trim().is_empty() {
            return Err(anyhow!("a report needs a reason"));
        }
        let report = Report {
            post_id: post_id.to_string(),
            reply_id: reply_id.map(str::to_string),
            reason: reason.to_string(),
            reported_by: self.user_id().to_string(),
            created_at: Some(Utc::now()),
            ..Default::default()
        };
        let id = self.store.add(REPORTS, serde_json::to_value(&report)?).await?;
        info!(report_id = %id, %post_id, "content reported");
        Ok(id)
    }

    /// Open reports. Admin only.
    pub async fn reports(&self) -> Result<Vec<Report>> {
        self.require_admin().await?;
        let docs = self.store.list(REPORTS).await?;
        Ok(decode_each(docs, |report: &mut Report, doc| {
            report.id = doc.id.clone()
        }))
    }

    pub async fn dismiss_report(&self, report_id: &str) -> Result<()> {
        self.require_admin().await?;
        self.store
            .delete(&format!("{}/{}", REPORTS, report_id))
            .await
    }

    /// Remove the reported post or reply, then dismiss the report.
    pub async fn delete_reported(&self, report: &Report) -> Result<()> {
        self.require_admin().await?;
        let post_path = format!("{}/{}", POSTS, report.post_id);
        match &report.reply_id {
            Some(reply_id) => {
                if let Some(post) = self.get_post(&report.post_id).await? {
                    let replies: Vec<Reply> = post
                        .replies
                        .into_iter()
                        .filter(|r| &r.id != reply_id)
                        .collect();
                    self.store
                        .update(&post_path, json!({ "replies": replies }))
                        .await?;
                }
            }
            None => self.store.delete(&post_path).await?,
        }
        info!(report_id = %report.id, post_id = %report.post_id, "reported content removed");
        self.dismiss_report(&report.id).await
    }
}
