//! Decimal amounts and Iranian currency units.
//!
//! Amounts live as `BigDecimal` (stored as TEXT in SQLite) and are only turned
//! into `f64` at the serialization boundary, so API clients always receive JSON
//! numbers rather than decimal strings.

use std::str::FromStr;

use bigdecimal::{BigDecimal, ParseBigDecimalError, ToPrimitive};
use serde::{Deserialize, Serialize, Serializer};
use strum::{AsRefStr, EnumString};

/// One Toman (IRT) is ten Rials (IRR).
pub const IRT_TO_IRR: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum Currency {
    Irt,
    Irr,
}

pub fn parse_amount(s: &str) -> Result<BigDecimal, ParseBigDecimalError> {
    BigDecimal::from_str(s.trim())
}

/// Convert between IRT and IRR. Same-currency conversion is the identity.
pub fn convert(amount: &BigDecimal, from: Currency, to: Currency) -> BigDecimal {
    match (from, to) {
        (Currency::Irt, Currency::Irr) => amount.clone() * BigDecimal::from(IRT_TO_IRR),
        (Currency::Irr, Currency::Irt) => amount.clone() / BigDecimal::from(IRT_TO_IRR),
        _ => amount.clone(),
    }
}

/// Lossy conversion used only for JSON output.
pub fn to_number(amount: &BigDecimal) -> f64 {
    amount.to_f64().unwrap_or(0.0)
}

/// Whole-rial integer for gateways that reject fractional amounts.
pub fn to_whole_units(amount: &BigDecimal) -> Option<u64> {
    amount.with_scale(0).to_u64()
}

/// `serialize_with` helper: decimal → JSON number.
pub fn serialize_as_number<S: Serializer>(amount: &BigDecimal, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(to_number(amount))
}

/// An amount already expressed in the currency the client will see.
#[derive(Debug, Clone, Serialize)]
pub struct Money {
    #[serde(serialize_with = "serialize_as_number")]
    pub amount: BigDecimal,
    pub currency: Currency,
}

impl Money {
    pub fn new(amount: BigDecimal, currency: Currency) -> Self {
        Self { amount, currency }
    }

    /// Re-express in `target`, applying the fixed IRT/IRR factor when needed.
    pub fn in_currency(&self, target: Currency) -> Money {
        Money {
            amount: convert(&self.amount, self.currency, target),
            currency: target,
        }
    }
}
