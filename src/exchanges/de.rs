//! Serde helpers for exchange number fields.
//!
//! Exchanges disagree on how to encode amounts: quoted strings, bare JSON
//! numbers, empty strings, `null`, scientific notation. These helpers accept
//! all of them.

use rust_decimal::Decimal;
use serde::{de, Deserialize, Deserializer};

use crate::models::parse_amount;

#[derive(Deserialize)]
#[serde(untagged)]
enum RawNumber {
    Text(String),
    Number(serde_json::Number),
}

fn parse<E: de::Error>(raw: &str) -> Result<Decimal, E> {
    parse_amount(raw).ok_or_else(|| E::custom(format!("invalid decimal: {raw:?}")))
}

/// A required amount. `null` and `""` read as zero.
pub fn decimal<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Decimal, D::Error> {
    match Option::<RawNumber>::deserialize(deserializer)? {
        None => Ok(Decimal::ZERO),
        Some(RawNumber::Text(text)) => parse(&text),
        Some(RawNumber::Number(number)) => parse(&number.to_string()),
    }
}

/// An optional amount. `null` and `""` read as absent.
pub fn optional_decimal<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Decimal>, D::Error> {
    match Option::<RawNumber>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawNumber::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(RawNumber::Text(text)) => parse(&text).map(Some),
        Some(RawNumber::Number(number)) => parse(&number.to_string()).map(Some),
    }
}
