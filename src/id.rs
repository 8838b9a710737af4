//! Prefixed ID generation for talebill entities.
//!
//! The `tb_` brand prefix keeps our IDs visually distinct from store order IDs
//! and ZarinPal authorities when they sit side by side in a payment row.
//!
//! Format: `tb_{entity}_{uuid_simple}` (32 hex chars, no hyphens)

use uuid::Uuid;

const ALL_PREFIXES: &[&str] = &["tb_usr_", "tb_tok_", "tb_plan_", "tb_pay_", "tb_sub_"];

/// Validate that a string is a valid prefixed ID.
///
/// A cheap check to reject garbage path parameters before hitting the database.
pub fn is_valid_prefixed_id(s: &str) -> bool {
    let Some(prefix) = ALL_PREFIXES.iter().find(|p| s.starts_with(*p)) else {
        return false;
    };

    let hex_part = &s[prefix.len()..];
    hex_part.len() == 32 && hex_part.chars().all(|c| c.is_ascii_hexdigit())
}

#[derive(Debug, Clone, Copy)]
pub enum EntityType {
    User,
    ApiToken,
    Plan,
    Payment,
    Subscription,
}

impl EntityType {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::User => "tb_usr",
            Self::ApiToken => "tb_tok",
            Self::Plan => "tb_plan",
            Self::Payment => "tb_pay",
            Self::Subscription => "tb_sub",
        }
    }

    pub fn gen_id(&self) -> String {
        format!("{}_{}", self.prefix(), Uuid::new_v4().as_simple())
    }
}
