//! Normalization of resource dates to one canonical format.
//!
//! DKAN exposes resource dates either as ISO-8601 timestamps with a fractional
//! second, or as display strings such as `"Wed 02/01/20 - 03:04"`. Both are
//! rendered as `%Y-%m-%dT%H:%M:%S.ffffff`.

use chrono::{NaiveDateTime, SubsecRound, Utc};
use thiserror::Error;

use crate::config::{
    DEFAULT_DATE_PREFIX_LEN, DEFAULT_LAST_MODIFIED_LABEL, DEFAULT_REMOTE_DATE_FORMAT, SourceConfig,
};

/// Output format of every normalized date.
pub const CANONICAL_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

const CANONICAL_INPUT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Which resource field a value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateField {
    Created,
    LastModified,
}

impl DateField {
    pub fn as_str(&self) -> &'static str {
        match self {
            DateField::Created => "created",
            DateField::LastModified => "last_modified",
        }
    }
}

/// A date matched neither the canonical nor the configured remote format.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Unparseable {field} date '{value}': {reason}")]
pub struct DateParseError {
    pub field: &'static str,
    pub value: String,
    pub reason: String,
}

/// Parses remote date strings with a per-source legacy pattern.
///
/// # Examples
///
/// ```
/// use dkan_harvest_core::dates::{DateField, DateNormalizer};
///
/// let dates = DateNormalizer::default();
///
/// // Canonical values are returned untouched.
/// let iso = "2020-01-02T03:04:05.000000";
/// assert_eq!(dates.normalize(iso, DateField::Created).unwrap(), iso);
///
/// // Legacy values lose their weekday prefix and are reformatted.
/// assert_eq!(
///     dates.normalize("Wed 02/01/20 - 03:04", DateField::Created).unwrap(),
///     "2020-01-02T03:04:00.000000"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateNormalizer {
    remote_format: String,
    prefix_len: usize,
    last_modified_label: String,
}

impl Default for DateNormalizer {
    fn default() -> Self {
        Self::new(
            DEFAULT_REMOTE_DATE_FORMAT,
            DEFAULT_DATE_PREFIX_LEN,
            DEFAULT_LAST_MODIFIED_LABEL,
        )
    }
}

impl DateNormalizer {
    pub fn new(
        remote_format: impl Into<String>,
        prefix_len: usize,
        last_modified_label: impl Into<String>,
    ) -> Self {
        Self {
            remote_format: remote_format.into(),
            prefix_len,
            last_modified_label: last_modified_label.into(),
        }
    }

    pub fn from_config(config: &SourceConfig) -> Self {
        Self::new(
            config.remote_date_format.clone(),
            config.date_prefix_len,
            config.last_modified_label.clone(),
        )
    }

    /// Normalizes `value` to [`CANONICAL_FORMAT`].
    ///
    /// Tries exactly two interpretations: canonical ISO-8601 with a fractional
    /// second (returned unchanged), then the remote pattern once the label
    /// (only for [`DateField::LastModified`]) and the prefix are stripped.
    pub fn normalize(&self, value: &str, field: DateField) -> Result<String, DateParseError> {
        if is_canonical(value) {
            return Ok(value.to_string());
        }

        let mut rest = value.trim_start();
        if field == DateField::LastModified && !self.last_modified_label.is_empty() {
            if let Some(stripped) = rest.strip_prefix(self.last_modified_label.as_str()) {
                rest = stripped.trim_start();
            }
        }
        let rest = skip_chars(rest, self.prefix_len).trim();

        NaiveDateTime::parse_from_str(rest, &self.remote_format)
            .map(|dt| dt.format(CANONICAL_FORMAT).to_string())
            .map_err(|e| DateParseError {
                field: field.as_str(),
                value: value.to_string(),
                reason: e.to_string(),
            })
    }
}

fn is_canonical(value: &str) -> bool {
    value.contains('.') && NaiveDateTime::parse_from_str(value, CANONICAL_INPUT).is_ok()
}

fn skip_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[idx..],
        None => "",
    }
}

/// Synthetic `created` value: the current time with microseconds.
pub fn now_created() -> String {
    Utc::now().naive_utc().format(CANONICAL_FORMAT).to_string()
}

/// Synthetic `last_modified` value: the current time truncated to whole
/// seconds, in the canonical format.
pub fn now_last_modified() -> String {
    Utc::now()
        .naive_utc()
        .trunc_subsecs(0)
        .format(CANONICAL_FORMAT)
        .to_string()
}
