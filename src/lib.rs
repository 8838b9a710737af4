//! talebill - subscription purchase verification for an audio-story platform
//!
//! Verifies purchases from the website (ZarinPal), CafeBazaar and Myket,
//! records them idempotently, and activates or extends the buyer's subscription.

pub mod billing;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod extractors;
pub mod fulfillment;
pub mod handlers;
pub mod id;
pub mod maintenance;
pub mod middleware;
pub mod models;
pub mod money;
pub mod pagination;
pub mod rate_limit;
pub mod response;
pub mod subscription_type;
pub mod util;
