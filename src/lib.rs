//! Meal planning, nutrition tracking and community features for families,
//! backed by Firebase.

pub mod admin;
pub mod auth;
pub mod blob;
pub mod catalog;
pub mod client;
pub mod community;
pub mod config;
pub mod dietary;
pub mod error;
pub mod firestore;
pub mod goals;
pub mod intake;
pub mod logging;
pub mod models;
pub mod nutrition;
pub mod popularity;
pub mod store;

pub use client::SavorellaClient;
pub use config::Config;
pub use error::StoreError;
pub use store::{DocumentStore, MemoryStore};
