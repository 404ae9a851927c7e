//! Clickstream transforms for the bronze and silver tiers

use super::Transform;
use crate::error::TransformError;
use chrono::{Datelike, Timelike};
use medallion_types::{Record, RecordError, Value};

/// Raw clickstream columns, in source order
pub const BRONZE_FIELDS: [&str; 14] = [
    "event_id",
    "user_id",
    "session_id",
    "event_type",
    "event_timestamp",
    "page_url",
    "product_id",
    "quantity",
    "amount",
    "device_type",
    "country",
    "browser",
    "is_logged_in",
    "referrer_source",
];

fn schema(transform: &str) -> impl Fn(RecordError) -> TransformError + '_ {
    move |source| TransformError::SchemaMismatch {
        transform: transform.to_string(),
        source,
    }
}

/// Shape check for raw events: every clickstream column must be present
#[derive(Debug, Clone, Copy, Default)]
pub struct BronzeEvents;

impl Transform for BronzeEvents {
    fn name(&self) -> &str {
        "bronze_events"
    }

    fn apply(&self, record: Record) -> Result<Record, TransformError> {
        for field in BRONZE_FIELDS {
            record.require(field).map_err(schema(self.name()))?;
        }
        Ok(record)
    }
}

/// Time dimensions, business flags and amount banding
///
/// Derived columns follow SQL null semantics: a null timestamp yields null
/// date parts, a null amount yields a null `total_value`, `has_amount = 0`
/// and falls through to the `high` amount band.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilverClean;

impl Transform for SilverClean {
    fn name(&self) -> &str {
        "silver_clean"
    }

    fn apply(&self, record: Record) -> Result<Record, TransformError> {
        let err = schema(self.name());

        let timestamp = record.optional_timestamp("event_timestamp").map_err(&err)?;
        let is_purchase = record.require("event_type").map_err(&err)?.as_str() == Some("purchase");
        let quantity = record.optional_f64("quantity").map_err(&err)?;
        let amount = record.optional_f64("amount").map_err(&err)?;

        let total_value = match (quantity, amount) {
            (Some(q), Some(a)) => Value::Float(round_cents(q * a)),
            _ => Value::Null,
        };

        let amount_category = match amount {
            Some(a) if a < 50.0 => "low",
            Some(a) if a < 200.0 => "medium",
            _ => "high",
        };

        let day_of_week = timestamp.map(|ts| ts.weekday().number_from_sunday() as i64);
        let is_weekend = matches!(day_of_week, Some(1) | Some(7));

        Ok(record
            .with_field("event_date", timestamp.map(|ts| ts.date_naive()))
            .with_field("event_hour", timestamp.map(|ts| ts.hour() as i64))
            .with_field("day_of_week", day_of_week)
            .with_field("is_weekend", is_weekend)
            .with_field("is_purchase", is_purchase as i64)
            .with_field("has_amount", amount.is_some() as i64)
            .with_field("total_value", total_value)
            .with_field("amount_category", amount_category))
    }
}

/// Device, traffic and engagement categorisation
#[derive(Debug, Clone, Copy, Default)]
pub struct SilverEnrich;

impl Transform for SilverEnrich {
    fn name(&self) -> &str {
        "silver_enrich"
    }

    fn apply(&self, record: Record) -> Result<Record, TransformError> {
        let err = schema(self.name());

        let device_type = record.require("device_type").map_err(&err)?.as_str();
        let referrer = record.require("referrer_source").map_err(&err)?.as_str();
        let event_type = record.require("event_type").map_err(&err)?.as_str();
        let is_purchase = record.require_i64("is_purchase").map_err(&err)?;

        let device_category = match device_type {
            Some("mobile") | Some("tablet") => "Mobile",
            _ => "Desktop",
        };

        let traffic_category = match referrer {
            Some("google") | Some("facebook") | Some("instagram") => "Paid",
            Some("direct") => "Direct",
            _ => "Other",
        };

        let event_bonus = match event_type {
            Some("add_to_cart") => 5,
            Some("search") => 3,
            Some("view") => 1,
            _ => 0,
        };
        let engagement_score = is_purchase * 10 + event_bonus;

        Ok(record
            .with_field("device_category", device_category)
            .with_field("traffic_category", traffic_category)
            .with_field("engagement_score", engagement_score))
    }
}

/// Amounts are generated at cent precision; keep products there too so
/// float noise does not leak into sums.
fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
