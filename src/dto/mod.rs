use time::{OffsetDateTime, format_description::well_known::Rfc3339};

pub mod action;
pub mod deck;
pub mod health;
pub mod room;
pub mod sse;
pub mod validation;

fn format_timestamp_ms(ms: i64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .ok()
        .and_then(|time| time.format(&Rfc3339).ok())
        .unwrap_or_else(|| "invalid-timestamp".into())
}
