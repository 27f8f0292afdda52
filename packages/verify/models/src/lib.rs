#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Product code, lookup outcome, and verification record types.
//!
//! These are the values that flow between the source adapters, the lookup
//! orchestrator, the run controller, and the progress store. None of them
//! perform I/O.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Number of digits in a canonical UPC-A code.
pub const UPC_A_LEN: usize = 12;

/// Prefix written to a record's `source` when the code was rate limited.
///
/// Rate-limited records stay [`VerificationStatus::NotChecked`] and the
/// tag is the only thing that distinguishes them in a progress snapshot.
pub const RATE_LIMITED_TAG: &str = "rate limited: ";

/// A raw input string that failed product code validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid product code format: {raw:?}")]
pub struct InvalidCode {
    /// The rejected input, untrimmed.
    pub raw: String,
}

/// A product code that passed format validation.
///
/// Always exactly [`UPC_A_LEN`] ASCII decimal digits. The code is an opaque
/// key; the only derivation performed on it is widening to EAN-13.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValidCode(String);

impl ValidCode {
    /// Validates `raw` as a 12-digit UPC-A code.
    ///
    /// Surrounding whitespace is trimmed; nothing else is normalized.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidCode`] if the trimmed input is not exactly
    /// [`UPC_A_LEN`] decimal digits.
    pub fn parse(raw: &str) -> Result<Self, InvalidCode> {
        let trimmed = raw.trim();
        if trimmed.len() == UPC_A_LEN && trimmed.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(InvalidCode {
                raw: raw.to_string(),
            })
        }
    }

    /// Returns the code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Widens the UPC-A code to its 13-digit EAN-13 form (leading `0`).
    #[must_use]
    pub fn to_ean13(&self) -> String {
        format!("0{}", self.0)
    }

    /// Returns the code rendered in the requested format.
    #[must_use]
    pub fn formatted(&self, format: CodeFormat) -> String {
        match format {
            CodeFormat::UpcA => self.0.clone(),
            CodeFormat::Ean13 => self.to_ean13(),
        }
    }
}

impl fmt::Display for ValidCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ValidCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Classifies a raw input string as a valid product code or not.
///
/// # Errors
///
/// Returns [`InvalidCode`] when the input is not a well-formed code.
pub fn validate(raw: &str) -> Result<ValidCode, InvalidCode> {
    ValidCode::parse(raw)
}

/// How a source expects the code to be sent.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CodeFormat {
    /// The 12-digit code as given.
    #[default]
    UpcA,
    /// The code widened to 13 digits.
    Ean13,
}

/// Result of a single lookup attempt against one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    /// The source knows this code.
    Found {
        /// Product name as reported by the source (brand-prefixed when
        /// the source reports a brand).
        product_name: String,
        /// Identifier of the source that matched.
        source_id: String,
    },
    /// The source answered and does not know this code.
    NotFound,
    /// The source refused the request because of its rate limit.
    RateLimited {
        /// Identifier of the source that refused.
        source_id: String,
        /// How long the source asked us to wait, if it said.
        retry_hint: Option<Duration>,
    },
    /// Timeout, network failure, unexpected status or malformed payload.
    TransientError {
        /// Human-readable description of the failure.
        detail: String,
    },
}

impl LookupOutcome {
    /// Builds a [`LookupOutcome::Found`].
    #[must_use]
    pub fn found(product_name: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self::Found {
            product_name: product_name.into(),
            source_id: source_id.into(),
        }
    }

    /// Builds a [`LookupOutcome::TransientError`].
    #[must_use]
    pub fn transient(detail: impl Into<String>) -> Self {
        Self::TransientError {
            detail: detail.into(),
        }
    }

    /// Whether this outcome is [`LookupOutcome::RateLimited`].
    #[must_use]
    pub const fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

/// Verification state of a single code.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    /// Found in a source. Terminal.
    Verified,
    /// Every source was asked and none knew the code.
    NotFound,
    /// Not yet answered (including codes that were rate limited).
    NotChecked,
}

/// Per-code verification state stored in the progress table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRecord {
    /// The product code.
    pub code: String,
    /// Current status.
    pub status: VerificationStatus,
    /// Product name reported by the source. Empty unless verified.
    pub product_name: String,
    /// Source that verified the code, or a [`RATE_LIMITED_TAG`]-prefixed
    /// tag. Empty otherwise.
    pub source: String,
}

impl VerificationRecord {
    /// A record for a code found in `source`.
    #[must_use]
    pub fn verified(
        code: impl Into<String>,
        product_name: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            status: VerificationStatus::Verified,
            product_name: product_name.into(),
            source: source.into(),
        }
    }

    /// A record for a code no source knew.
    #[must_use]
    pub fn not_found(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            status: VerificationStatus::NotFound,
            product_name: String::new(),
            source: String::new(),
        }
    }

    /// A record for a code whose lookup was cut short by `source_id`'s
    /// rate limit.
    #[must_use]
    pub fn rate_limited(code: impl Into<String>, source_id: &str) -> Self {
        Self {
            code: code.into(),
            status: VerificationStatus::NotChecked,
            product_name: String::new(),
            source: format!("{RATE_LIMITED_TAG}{source_id}"),
        }
    }

    /// Whether this record is terminal-success.
    #[must_use]
    pub fn is_verified(&self) -> bool {
        self.status == VerificationStatus::Verified
    }

    /// Whether this record carries the rate-limit tag.
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        self.status == VerificationStatus::NotChecked && self.source.starts_with(RATE_LIMITED_TAG)
    }
}

/// Counts of records per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    /// Records with [`VerificationStatus::Verified`].
    pub verified: u64,
    /// Records with [`VerificationStatus::NotFound`].
    pub not_found: u64,
    /// Records with [`VerificationStatus::NotChecked`], rate limited ones
    /// included.
    pub not_checked: u64,
    /// Subset of `not_checked` carrying the rate-limit tag.
    pub rate_limited: u64,
}

impl StatusCounts {
    /// Total number of records counted.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.verified + self.not_found + self.not_checked
    }
}

impl fmt::Display for StatusCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} verified, {} not found, {} not checked ({} rate limited)",
            self.verified, self.not_found, self.not_checked, self.rate_limited
        )
    }
}

/// Mapping from product code to its verification record.
///
/// Ordered by code so snapshots are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressTable {
    records: BTreeMap<String, VerificationRecord>,
}

impl ProgressTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the record for `code`, if any.
    #[must_use]
    pub fn get(&self, code: &str) -> Option<&VerificationRecord> {
        self.records.get(code)
    }

    /// Whether `code` is already verified.
    #[must_use]
    pub fn is_verified(&self, code: &str) -> bool {
        self.records.get(code).is_some_and(VerificationRecord::is_verified)
    }

    /// Inserts or replaces the record for its code.
    ///
    /// A verified record is never replaced. Returns `false` when the update
    /// was refused for that reason.
    pub fn upsert(&mut self, record: VerificationRecord) -> bool {
        if self.is_verified(&record.code) {
            return false;
        }
        self.records.insert(record.code.clone(), record);
        true
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the table has no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterates over records in code order.
    pub fn iter(&self) -> impl Iterator<Item = &VerificationRecord> {
        self.records.values()
    }

    /// Counts records per status.
    #[must_use]
    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for record in self.records.values() {
            match record.status {
                VerificationStatus::Verified => counts.verified += 1,
                VerificationStatus::NotFound => counts.not_found += 1,
                VerificationStatus::NotChecked => {
                    counts.not_checked += 1;
                    if record.is_rate_limited() {
                        counts.rate_limited += 1;
                    }
                }
            }
        }
        counts
    }
}

impl FromIterator<VerificationRecord> for ProgressTable {
    fn from_iter<I: IntoIterator<Item = VerificationRecord>>(iter: I) -> Self {
        let mut table = Self::new();
        for record in iter {
            table.upsert(record);
        }
        table
    }
}
