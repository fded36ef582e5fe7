//! NF-e access key (chave de acesso) generation and validation.
//!
//! The key is 43 digits of zero-padded document attributes followed by a
//! modulo-11 check digit:
//!
//! | field | width |
//! |---|---|
//! | jurisdiction (cUF) | 2 |
//! | emission year and month (YYMM) | 4 |
//! | issuer tax id (CNPJ) | 14 |
//! | model | 2 |
//! | series | 3 |
//! | number (nNF) | 9 |
//! | emission mode (tpEmis) | 1 |
//! | nonce (cNF) | 8 |
//! | check digit (cDV) | 1 |
use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of digits in a complete access key.
pub const ACCESS_KEY_LEN: usize = 44;
const PREFIX_LEN: usize = ACCESS_KEY_LEN - 1;
const NONCE_LEN: usize = 8;

/// Validation errors raised while building or parsing an access key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessKeyError {
    #[error("invalid emission timestamp: {value:?}")]
    InvalidTimestamp { value: String },
    #[error("nonce must have exactly 8 digits, got {value:?}")]
    InvalidNonce { value: String },
    #[error("{field} must contain only digits, got {value:?}")]
    NonDigit { field: &'static str, value: String },
    #[error("{field} is wider than {width} digits: {value:?}")]
    TooWide {
        field: &'static str,
        width: usize,
        value: String,
    },
    #[error("expected {expected} digits, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("check digit mismatch: expected {expected}, found {found}")]
    CheckDigitMismatch { expected: u8, found: u8 },
}

/// Document attributes an access key is derived from.
///
/// Numeric fields are strings so that leading zeros and stray characters are
/// reported instead of silently normalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessKeyInput {
    /// IBGE code of the issuing state, e.g. `41` for Paraná.
    pub jurisdiction: String,
    /// Emission timestamp (`dhEmi`), RFC 3339 or a leading `YYYY-MM-DD`.
    pub issued_at: String,
    /// Issuer CNPJ, digits only.
    pub tax_id: String,
    pub model: String,
    pub series: String,
    pub number: String,
    pub emission_mode: String,
    /// Random 8-digit code (`cNF`).
    pub nonce: String,
}

/// A validated 44-digit access key.
///
/// # Examples
/// ```rust
/// use nfe_core::access_key::{AccessKey, AccessKeyInput};
///
/// let key = AccessKey::generate(&AccessKeyInput {
///     jurisdiction: "41".into(),
///     issued_at: "2024-07-01T10:00:00-03:00".into(),
///     tax_id: "06101244000490".into(),
///     model: "55".into(),
///     series: "1".into(),
///     number: "6727".into(),
///     emission_mode: "1".into(),
///     nonce: "09102359".into(),
/// })?;
/// assert_eq!(key.as_str(), "41240706101244000490550010000067271091023595");
/// assert_eq!(key.check_digit(), 5);
/// # Ok::<(), nfe_core::access_key::AccessKeyError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccessKey(String);

impl AccessKey {
    /// Build the key from its attributes.
    ///
    /// # Errors
    /// Returns [`AccessKeyError`] when the timestamp is not a calendar date, the
    /// nonce is not exactly 8 digits, or any field is non-numeric or too wide.
    pub fn generate(input: &AccessKeyInput) -> Result<Self, AccessKeyError> {
        let year_month = year_month(&input.issued_at)?;
        let nonce = input.nonce.trim();
        if nonce.len() != NONCE_LEN || !is_digits(nonce) {
            return Err(AccessKeyError::InvalidNonce {
                value: input.nonce.clone(),
            });
        }

        let mut key = String::with_capacity(ACCESS_KEY_LEN);
        push_field(&mut key, "jurisdiction", &input.jurisdiction, 2)?;
        key.push_str(&year_month);
        push_field(&mut key, "tax id", &input.tax_id, 14)?;
        push_field(&mut key, "model", &input.model, 2)?;
        push_field(&mut key, "series", &input.series, 3)?;
        push_field(&mut key, "number", &input.number, 9)?;
        push_field(&mut key, "emission mode", &input.emission_mode, 1)?;
        key.push_str(nonce);

        let digit = check_digit(&key)?;
        key.push(char::from(b'0' + digit));
        Ok(AccessKey(key))
    }

    /// Parse and validate an existing key, including its check digit.
    pub fn parse(value: &str) -> Result<Self, AccessKeyError> {
        let value = value.trim();
        let actual = value.chars().count();
        if actual != ACCESS_KEY_LEN {
            return Err(AccessKeyError::InvalidLength {
                expected: ACCESS_KEY_LEN,
                actual,
            });
        }
        if !is_digits(value) {
            return Err(AccessKeyError::NonDigit {
                field: "access key",
                value: value.to_string(),
            });
        }

        let expected = check_digit(&value[..PREFIX_LEN])?;
        let found = value.as_bytes()[PREFIX_LEN] - b'0';
        if expected != found {
            return Err(AccessKeyError::CheckDigitMismatch { expected, found });
        }
        Ok(AccessKey(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn check_digit(&self) -> u8 {
        self.0.as_bytes()[PREFIX_LEN] - b'0'
    }

    pub fn jurisdiction(&self) -> &str {
        &self.0[0..2]
    }

    /// Emission period as `YYMM`.
    pub fn year_month(&self) -> &str {
        &self.0[2..6]
    }

    pub fn tax_id(&self) -> &str {
        &self.0[6..20]
    }

    pub fn model(&self) -> &str {
        &self.0[20..22]
    }

    pub fn series(&self) -> &str {
        &self.0[22..25]
    }

    pub fn number(&self) -> &str {
        &self.0[25..34]
    }

    pub fn emission_mode(&self) -> &str {
        &self.0[34..35]
    }

    pub fn nonce(&self) -> &str {
        &self.0[35..43]
    }

    /// Value of the `infNFe/@Id` attribute, `NFe` followed by the key.
    pub fn document_id(&self) -> String {
        format!("NFe{}", self.0)
    }
}

impl fmt::Display for AccessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for AccessKey {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl FromStr for AccessKey {
    type Err = AccessKeyError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AccessKey::parse(s)
    }
}

impl TryFrom<String> for AccessKey {
    type Error = AccessKeyError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        AccessKey::parse(&value)
    }
}

impl From<AccessKey> for String {
    fn from(key: AccessKey) -> Self {
        key.0
    }
}

/// Modulo-11 check digit of a 43-digit prefix.
///
/// Weights 2 through 9 cycle from the rightmost digit; a remainder of 0 or 1
/// yields `0`, anything else `11 - remainder`.
///
/// # Errors
/// Returns [`AccessKeyError::InvalidLength`] unless the prefix has 43
/// characters and [`AccessKeyError::NonDigit`] on any non-digit character.
pub fn check_digit(prefix: &str) -> Result<u8, AccessKeyError> {
    let actual = prefix.chars().count();
    if actual != PREFIX_LEN {
        return Err(AccessKeyError::InvalidLength {
            expected: PREFIX_LEN,
            actual,
        });
    }

    let mut sum = 0u32;
    for (index, ch) in prefix.chars().rev().enumerate() {
        let digit = ch.to_digit(10).ok_or_else(|| AccessKeyError::NonDigit {
            field: "access key",
            value: prefix.to_string(),
        })?;
        sum += digit * (2 + (index as u32 % 8));
    }

    match sum % 11 {
        0 | 1 => Ok(0),
        remainder => Ok((11 - remainder) as u8),
    }
}

fn year_month(issued_at: &str) -> Result<String, AccessKeyError> {
    let trimmed = issued_at.trim();
    let date = match DateTime::parse_from_rfc3339(trimmed) {
        Ok(timestamp) => Some(timestamp.date_naive()),
        Err(_) => trimmed
            .get(..10)
            .and_then(|day| NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()),
    };
    date.map(|date| date.format("%y%m").to_string())
        .ok_or_else(|| AccessKeyError::InvalidTimestamp {
            value: issued_at.to_string(),
        })
}

fn push_field(
    key: &mut String,
    field: &'static str,
    value: &str,
    width: usize,
) -> Result<(), AccessKeyError> {
    let value = value.trim();
    if value.is_empty() || !is_digits(value) {
        return Err(AccessKeyError::NonDigit {
            field,
            value: value.to_string(),
        });
    }
    if value.len() > width {
        return Err(AccessKeyError::TooWide {
            field,
            width,
            value: value.to_string(),
        });
    }
    key.extend(std::iter::repeat_n('0', width - value.len()));
    key.push_str(value);
    Ok(())
}

fn is_digits(value: &str) -> bool {
    value.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_input() -> AccessKeyInput {
        AccessKeyInput {
            jurisdiction: "41".into(),
            issued_at: "2024-07-01".into(),
            tax_id: "06101244000490".into(),
            model: "55".into(),
            series: "1".into(),
            number: "6727".into(),
            emission_mode: "1".into(),
            nonce: "09102359".into(),
        }
    }

    #[test]
    fn generates_known_key() {
        let key = AccessKey::generate(&sample_input()).expect("key");
        assert_eq!(key.as_str(), "41240706101244000490550010000067271091023595");
        assert_eq!(key.check_digit(), 5);
        assert_eq!(
            key.document_id(),
            "NFe41240706101244000490550010000067271091023595"
        );
    }

    #[test]
    fn generation_is_deterministic() {
        let first = AccessKey::generate(&sample_input()).expect("first");
        let second = AccessKey::generate(&sample_input()).expect("second");
        assert_eq!(first, second);
    }

    #[test]
    fn accessors_split_fields() {
        let key = AccessKey::generate(&sample_input()).expect("key");
        assert_eq!(key.jurisdiction(), "41");
        assert_eq!(key.year_month(), "2407");
        assert_eq!(key.tax_id(), "06101244000490");
        assert_eq!(key.model(), "55");
        assert_eq!(key.series(), "001");
        assert_eq!(key.number(), "000006727");
        assert_eq!(key.emission_mode(), "1");
        assert_eq!(key.nonce(), "09102359");
    }

    #[test]
    fn rfc3339_timestamp_uses_local_date() {
        let mut input = sample_input();
        input.issued_at = "2024-07-31T23:30:00-03:00".into();
        let key = AccessKey::generate(&input).expect("key");
        assert_eq!(key.year_month(), "2407");
    }

    #[test]
    fn recomputed_check_digit_matches_trailing_digit() {
        for number in 1..=250u32 {
            let mut input = sample_input();
            input.number = number.to_string();
            input.nonce = format!("{:08}", number * 7919);
            let key = AccessKey::generate(&input).expect("key");
            let recomputed = check_digit(&key.as_str()[..43]).expect("digit");
            assert_eq!(recomputed, key.check_digit(), "key {key}");
            assert_eq!(AccessKey::parse(key.as_str()).expect("parse"), key);
        }
    }

    #[test]
    fn low_remainders_map_to_zero() {
        // remainder 1
        assert_eq!(
            check_digit("4124070610124400049055001000006727100000004"),
            Ok(0)
        );
        // remainder 0
        assert_eq!(
            check_digit("4124070610124400049055001000006727100000009"),
            Ok(0)
        );
    }

    #[test]
    fn rejects_short_or_non_numeric_nonce() {
        for nonce in ["1234567", "123456789", "1234567a", ""] {
            let mut input = sample_input();
            input.nonce = nonce.into();
            let err = AccessKey::generate(&input).expect_err("nonce");
            assert!(matches!(err, AccessKeyError::InvalidNonce { .. }), "{nonce}");
        }
    }

    #[test]
    fn rejects_malformed_timestamp() {
        for issued_at in ["2024-13-01", "01/07/2024", "", "2024-07"] {
            let mut input = sample_input();
            input.issued_at = issued_at.into();
            let err = AccessKey::generate(&input).expect_err("timestamp");
            assert!(
                matches!(err, AccessKeyError::InvalidTimestamp { .. }),
                "{issued_at}"
            );
        }
    }

    #[test]
    fn rejects_non_digit_and_wide_fields() {
        let mut input = sample_input();
        input.tax_id = "06.101.244/0004-90".into();
        assert!(matches!(
            AccessKey::generate(&input),
            Err(AccessKeyError::NonDigit { field: "tax id", .. })
        ));

        let mut input = sample_input();
        input.series = "1000".into();
        assert!(matches!(
            AccessKey::generate(&input),
            Err(AccessKeyError::TooWide {
                field: "series",
                width: 3,
                ..
            })
        ));
    }

    #[test]
    fn check_digit_rejects_bad_prefixes() {
        assert!(matches!(
            check_digit("41240706101244000490550010000067271091023A9"),
            Err(AccessKeyError::NonDigit { .. })
        ));
        assert_eq!(
            check_digit("4124"),
            Err(AccessKeyError::InvalidLength {
                expected: 43,
                actual: 4
            })
        );
    }

    #[test]
    fn parse_rejects_tampered_key() {
        let err = AccessKey::parse("41240706101244000490550010000067271091023594")
            .expect_err("tampered");
        assert_eq!(
            err,
            AccessKeyError::CheckDigitMismatch {
                expected: 5,
                found: 4
            }
        );
        assert!(matches!(
            "4124".parse::<AccessKey>(),
            Err(AccessKeyError::InvalidLength { .. })
        ));
    }
}
