//! Core domain model for KDFS: feed record shapes, stored row shapes, and
//! watermark timestamp parsing.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "kdfs-core";

/// Placeholder stored when no enrichment link could be obtained.
pub const NO_LINK_AVAILABLE: &str = "No link available";

/// Feed timestamp format for news articles (`YNA_YMD`).
pub const NEWS_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Feed timestamp format for disaster messages (`REG_YMD`) after
/// normalization by [`normalize_message_timestamp`].
pub const MESSAGE_TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S%.f";

/// Earliest day either feed is synchronized from; also the watermark used
/// when a table is empty or unreadable.
pub fn default_sync_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 20).expect("valid hardcoded date")
}

/// Watermark lower bound for an empty or unreadable table.
pub fn default_watermark() -> NaiveDateTime {
    default_sync_start()
        .and_hms_opt(0, 0, 0)
        .expect("valid hardcoded time")
}

/// The two upstream feeds. Each maps to one table and one watermark column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    News,
    Messages,
}

impl SourceKind {
    pub fn table(self) -> &'static str {
        match self {
            SourceKind::News => "news_articles",
            SourceKind::Messages => "disaster_messages",
        }
    }

    pub fn watermark_column(self) -> &'static str {
        match self {
            SourceKind::News => "yna_ymd",
            SourceKind::Messages => "reg_ymd",
        }
    }

    pub fn parse_watermark(self, raw: &str) -> Result<NaiveDateTime, TimestampError> {
        match self {
            SourceKind::News => parse_news_timestamp(raw),
            SourceKind::Messages => parse_message_timestamp(raw),
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::News => write!(f, "news"),
            SourceKind::Messages => write!(f, "messages"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimestampError {
    #[error("timestamp field too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },
    #[error("timestamp field contains non-ascii or non-digit padding: {0:?}")]
    BadShape(String),
    #[error("unparseable timestamp {raw:?}: {source}")]
    Unparseable {
        raw: String,
        #[source]
        source: chrono::ParseError,
    },
}

/// Parse a news-feed watermark value (`YYYY-MM-DD HH:MM:SS`).
pub fn parse_news_timestamp(raw: &str) -> Result<NaiveDateTime, TimestampError> {
    NaiveDateTime::parse_from_str(raw, NEWS_TIMESTAMP_FORMAT).map_err(|source| {
        TimestampError::Unparseable {
            raw: raw.to_string(),
            source,
        }
    })
}

/// Rebuild a message-feed `REG_YMD` value into `YYYY/MM/DD HH:MM:SS.ffffff`.
///
/// The feed emits a 19-byte date-time, one delimiter byte, six fractional
/// digits, and occasionally trailing junk. Anything shorter or differently
/// shaped is rejected rather than silently mis-sliced.
pub fn normalize_message_timestamp(raw: &str) -> Result<String, TimestampError> {
    const MIN_LEN: usize = 26;
    if raw.len() < MIN_LEN {
        return Err(TimestampError::TooShort {
            expected: MIN_LEN,
            actual: raw.len(),
        });
    }
    if !raw.is_ascii() {
        return Err(TimestampError::BadShape(raw.to_string()));
    }
    let head = &raw[..19];
    let frac = &raw[20..26];
    if !frac.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TimestampError::BadShape(raw.to_string()));
    }
    Ok(format!("{head}.{frac}"))
}

/// Parse a message-feed watermark value, normalizing its width first.
pub fn parse_message_timestamp(raw: &str) -> Result<NaiveDateTime, TimestampError> {
    let normalized = normalize_message_timestamp(raw)?;
    NaiveDateTime::parse_from_str(&normalized, MESSAGE_TIMESTAMP_FORMAT).map_err(|source| {
        TimestampError::Unparseable {
            raw: raw.to_string(),
            source,
        }
    })
}

/// One news article as returned by the feed envelope body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RawNewsRecord {
    pub yna_no: i64,
    /// Watermark field.
    pub yna_ymd: String,
    #[serde(default)]
    pub crt_dt: String,
    #[serde(default)]
    pub yna_wrtr_nm: String,
    #[serde(default)]
    pub yna_cn: String,
    #[serde(default)]
    pub yna_ttl: String,
}

/// One disaster alert message as returned by the feed envelope body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RawMessageRecord {
    pub sn: i64,
    /// Watermark field; non-standard width, see [`normalize_message_timestamp`].
    pub reg_ymd: String,
    #[serde(default)]
    pub msg_cn: String,
    #[serde(default)]
    pub rcptn_rgn_nm: String,
    #[serde(default)]
    pub crt_dt: String,
    #[serde(default)]
    pub emrg_step_nm: String,
    #[serde(default)]
    pub dst_se_nm: String,
    #[serde(default)]
    pub mdfcn_ymd: String,
}

/// Row shape persisted to `news_articles`. `news_link` is always populated,
/// either a real URL or [`NO_LINK_AVAILABLE`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewsArticle {
    pub yna_no: i64,
    pub crt_dt: String,
    pub yna_wrtr_nm: String,
    pub yna_cn: String,
    pub yna_ymd: String,
    pub yna_ttl: String,
    pub news_link: String,
}

impl NewsArticle {
    pub fn from_raw(raw: RawNewsRecord, news_link: String) -> Self {
        Self {
            yna_no: raw.yna_no,
            crt_dt: raw.crt_dt,
            yna_wrtr_nm: raw.yna_wrtr_nm,
            yna_cn: raw.yna_cn,
            yna_ymd: raw.yna_ymd,
            yna_ttl: raw.yna_ttl,
            news_link,
        }
    }
}

/// Row shape persisted to `disaster_messages`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisasterMessage {
    pub sn: i64,
    pub msg_cn: String,
    pub rcptn_rgn_nm: String,
    pub crt_dt: String,
    pub reg_ymd: String,
    pub emrg_step_nm: String,
    pub dst_se_nm: String,
    pub mdfcn_ymd: String,
}

impl From<RawMessageRecord> for DisasterMessage {
    fn from(raw: RawMessageRecord) -> Self {
        Self {
            sn: raw.sn,
            msg_cn: raw.msg_cn,
            rcptn_rgn_nm: raw.rcptn_rgn_nm,
            crt_dt: raw.crt_dt,
            reg_ymd: raw.reg_ymd,
            emrg_step_nm: raw.emrg_step_nm,
            dst_se_nm: raw.dst_se_nm,
            mdfcn_ymd: raw.mdfcn_ymd,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn news_timestamp_parses_plain_format() {
        let ts = parse_news_timestamp("2025-03-21 08:30:00").expect("parses");
        assert_eq!(
            ts,
            NaiveDate::from_ymd_opt(2025, 3, 21)
                .unwrap()
                .and_hms_opt(8, 30, 0)
                .unwrap()
        );
    }

    #[test]
    fn news_timestamp_rejects_slashed_format() {
        assert!(matches!(
            parse_news_timestamp("2025/03/21 08:30:00"),
            Err(TimestampError::Unparseable { .. })
        ));
    }

    #[test]
    fn message_timestamp_truncates_trailing_junk() {
        let ts = parse_message_timestamp("2025/03/21 10:15:30.123456|extra").expect("parses");
        assert_eq!(
            ts,
            NaiveDate::from_ymd_opt(2025, 3, 21)
                .unwrap()
                .and_hms_micro_opt(10, 15, 30, 123_456)
                .unwrap()
        );
    }

    #[test]
    fn message_timestamp_accepts_exact_width() {
        let ts = parse_message_timestamp("2025/03/21 10:15:30.000001").expect("parses");
        assert_eq!(ts.and_utc().timestamp_subsec_micros(), 1);
    }

    #[test]
    fn message_timestamp_too_short_is_loud() {
        assert_eq!(
            parse_message_timestamp("2025/03/21 10:15:30"),
            Err(TimestampError::TooShort {
                expected: 26,
                actual: 19
            })
        );
    }

    #[test]
    fn message_timestamp_rejects_non_digit_fraction() {
        assert!(matches!(
            parse_message_timestamp("2025/03/21 10:15:30.12a456"),
            Err(TimestampError::BadShape(_))
        ));
    }

    #[test]
    fn raw_news_record_uses_feed_field_names() {
        let raw: RawNewsRecord = serde_json::from_str(
            r#"{
                "YNA_NO": 42,
                "CRT_DT": "2025-03-21 09:00:00",
                "YNA_WRTR_NM": "reporter",
                "YNA_CN": "body",
                "YNA_YMD": "2025-03-21 08:30:00",
                "YNA_TTL": "title"
            }"#,
        )
        .expect("deserializes");
        assert_eq!(raw.yna_no, 42);
        assert_eq!(raw.yna_ymd, "2025-03-21 08:30:00");
    }

    #[test]
    fn raw_message_record_tolerates_missing_optional_fields() {
        let raw: RawMessageRecord = serde_json::from_str(
            r#"{"SN": 7, "REG_YMD": "2025/03/21 10:15:30.123456"}"#,
        )
        .expect("deserializes");
        assert_eq!(raw.sn, 7);
        assert!(raw.msg_cn.is_empty());
    }

    #[test]
    fn default_watermark_matches_sync_start_midnight() {
        assert_eq!(default_watermark().date(), default_sync_start());
        assert_eq!(
            default_watermark().format("%H:%M:%S").to_string(),
            "00:00:00"
        );
    }
}
