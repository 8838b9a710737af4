//! Canonical subscription types and the loose plan-identifier normalization.
//!
//! Clients and older app builds send plan identifiers in many shapes
//! ("monthly", "plan-3-months", "12", "1_year", ...). Everything maps onto one
//! of four canonical types. Anything unrecognized becomes `1month` so checkout
//! is never blocked on a naming mismatch; the fallback is logged for operators.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, EnumString)]
pub enum SubscriptionType {
    #[serde(rename = "1month")]
    #[strum(serialize = "1month")]
    OneMonth,
    #[serde(rename = "3months")]
    #[strum(serialize = "3months")]
    ThreeMonths,
    #[serde(rename = "6months")]
    #[strum(serialize = "6months")]
    SixMonths,
    #[serde(rename = "1year")]
    #[strum(serialize = "1year")]
    OneYear,
}

/// Exact aliases after lowercasing and stripping separators.
const ALIASES: &[(&str, SubscriptionType)] = &[
    ("1month", SubscriptionType::OneMonth),
    ("1months", SubscriptionType::OneMonth),
    ("onemonth", SubscriptionType::OneMonth),
    ("month", SubscriptionType::OneMonth),
    ("monthly", SubscriptionType::OneMonth),
    ("1m", SubscriptionType::OneMonth),
    ("1", SubscriptionType::OneMonth),
    ("30", SubscriptionType::OneMonth),
    ("30days", SubscriptionType::OneMonth),
    ("3month", SubscriptionType::ThreeMonths),
    ("3months", SubscriptionType::ThreeMonths),
    ("threemonths", SubscriptionType::ThreeMonths),
    ("quarter", SubscriptionType::ThreeMonths),
    ("quarterly", SubscriptionType::ThreeMonths),
    ("3m", SubscriptionType::ThreeMonths),
    ("3", SubscriptionType::ThreeMonths),
    ("90", SubscriptionType::ThreeMonths),
    ("90days", SubscriptionType::ThreeMonths),
    ("6month", SubscriptionType::SixMonths),
    ("6months", SubscriptionType::SixMonths),
    ("sixmonths", SubscriptionType::SixMonths),
    ("halfyear", SubscriptionType::SixMonths),
    ("semiannual", SubscriptionType::SixMonths),
    ("semiannually", SubscriptionType::SixMonths),
    ("6m", SubscriptionType::SixMonths),
    ("6", SubscriptionType::SixMonths),
    ("180", SubscriptionType::SixMonths),
    ("180days", SubscriptionType::SixMonths),
    ("1year", SubscriptionType::OneYear),
    ("1years", SubscriptionType::OneYear),
    ("oneyear", SubscriptionType::OneYear),
    ("year", SubscriptionType::OneYear),
    ("yearly", SubscriptionType::OneYear),
    ("annual", SubscriptionType::OneYear),
    ("annually", SubscriptionType::OneYear),
    ("12month", SubscriptionType::OneYear),
    ("12months", SubscriptionType::OneYear),
    ("1y", SubscriptionType::OneYear),
    ("12", SubscriptionType::OneYear),
    ("365", SubscriptionType::OneYear),
    ("365days", SubscriptionType::OneYear),
];

/// Suffixes accepted on prefixed slugs such as `premium-3-months`.
/// Longer suffixes first so `12months` is not read as `2months`.
const SUFFIXES: &[(&str, SubscriptionType)] = &[
    ("12months", SubscriptionType::OneYear),
    ("1year", SubscriptionType::OneYear),
    ("yearly", SubscriptionType::OneYear),
    ("annual", SubscriptionType::OneYear),
    ("6months", SubscriptionType::SixMonths),
    ("6month", SubscriptionType::SixMonths),
    ("3months", SubscriptionType::ThreeMonths),
    ("3month", SubscriptionType::ThreeMonths),
    ("quarterly", SubscriptionType::ThreeMonths),
    ("1month", SubscriptionType::OneMonth),
    ("monthly", SubscriptionType::OneMonth),
];

impl SubscriptionType {
    pub const ALL: [SubscriptionType; 4] = [
        SubscriptionType::OneMonth,
        SubscriptionType::ThreeMonths,
        SubscriptionType::SixMonths,
        SubscriptionType::OneYear,
    ];

    pub fn duration_days(&self) -> i64 {
        match self {
            Self::OneMonth => 30,
            Self::ThreeMonths => 90,
            Self::SixMonths => 180,
            Self::OneYear => 365,
        }
    }

    /// Strict lookup; `None` when the identifier is not recognized.
    pub fn try_normalize(input: &str) -> Option<Self> {
        let key: String = input
            .trim()
            .to_lowercase()
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '_' | '.'))
            .collect();

        if key.is_empty() {
            return None;
        }

        if let Some((_, t)) = ALIASES.iter().find(|(alias, _)| *alias == key) {
            return Some(*t);
        }

        SUFFIXES
            .iter()
            .find(|(suffix, _)| {
                key.ends_with(suffix)
                    && !key[..key.len() - suffix.len()]
                        .ends_with(|c: char| c.is_ascii_digit())
            })
            .map(|(_, t)| *t)
    }

    /// Lenient lookup: falls back to `1month` and logs a warning.
    pub fn normalize(input: &str) -> Self {
        match Self::try_normalize(input) {
            Some(t) => t,
            None => {
                tracing::warn!(
                    plan_identifier = %input,
                    "Unrecognized plan identifier, defaulting to 1month"
                );
                Self::OneMonth
            }
        }
    }
}

impl std::fmt::Display for SubscriptionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}
