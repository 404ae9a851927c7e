//! Window and aggregation layout of a windowed node

use crate::error::{GraphError, GraphResult};
use sha2::{Digest, Sha256};

use medallion_config::{
    AggregationDefinition, AggregationKind, DerivedDefinition, EngineConfig, NodeDefinition,
};
use std::collections::HashSet;

/// Highest number of decimal places accepted for rounding
pub const MAX_ROUND_DIGITS: u32 = 15;

/// Tumbling window plus the aggregates computed per (window, group)
#[derive(Debug, Clone, PartialEq)]
pub struct WindowSpec {
    pub duration_ms: u64,
    pub allowed_lateness_ms: u64,
    pub group_by: Vec<String>,
    pub start_alias: String,
    pub end_alias: String,
    pub aggregations: Vec<AggregationDefinition>,
    pub derived: Vec<DerivedDefinition>,
    /// Open groups allowed per window before new groups are dropped
    pub max_groups: usize,
}

impl WindowSpec {
    pub fn new(duration_ms: u64) -> Self {
        Self {
            duration_ms,
            allowed_lateness_ms: 0,
            group_by: Vec::new(),
            start_alias: "window_start".to_string(),
            end_alias: "window_end".to_string(),
            aggregations: Vec::new(),
            derived: Vec::new(),
            max_groups: usize::MAX,
        }
    }

    pub fn with_lateness(mut self, allowed_lateness_ms: u64) -> Self {
        self.allowed_lateness_ms = allowed_lateness_ms;
        self
    }

    pub fn with_group_by(mut self, field: impl Into<String>) -> Self {
        self.group_by.push(field.into());
        self
    }

    pub fn with_aliases(mut self, start: impl Into<String>, end: impl Into<String>) -> Self {
        self.start_alias = start.into();
        self.end_alias = end.into();
        self
    }

    pub fn with_max_groups(mut self, max_groups: usize) -> Self {
        self.max_groups = max_groups;
        self
    }

    pub fn aggregate(
        self,
        kind: AggregationKind,
        field: impl Into<String>,
        alias: impl Into<String>,
    ) -> Self {
        self.aggregate_rounded(kind, field, alias, None)
    }

    pub fn aggregate_rounded(
        mut self,
        kind: AggregationKind,
        field: impl Into<String>,
        alias: impl Into<String>,
        round: Option<u32>,
    ) -> Self {
        self.aggregations.push(AggregationDefinition {
            kind,
            field: field.into(),
            alias: alias.into(),
            round,
        });
        self
    }

    /// `alias = numerator / denominator * scale`
    pub fn derive(
        mut self,
        alias: impl Into<String>,
        numerator: impl Into<String>,
        denominator: impl Into<String>,
        scale: f64,
        round: Option<u32>,
    ) -> Self {
        self.derived.push(DerivedDefinition {
            alias: alias.into(),
            numerator: numerator.into(),
            denominator: denominator.into(),
            scale,
            round,
        });
        self
    }

    /// Build the window spec of `def`, filling unset lateness and group caps
    /// from the engine defaults. Returns `None` for row-wise nodes.
    pub fn from_definition(def: &NodeDefinition, engine: &EngineConfig) -> GraphResult<Option<Self>> {
        let window = match &def.window {
            Some(window) => window,
            None if def.aggregations.is_empty() && def.derived.is_empty() => return Ok(None),
            None => {
                return Err(GraphError::InvalidWindow {
                    node: def.name.clone(),
                    reason: "aggregations require a window".to_string(),
                })
            }
        };

        let spec = Self {
            duration_ms: window.duration_ms,
            allowed_lateness_ms: window
                .allowed_lateness_ms
                .unwrap_or(engine.default_allowed_lateness_ms),
            group_by: window.group_by.clone(),
            start_alias: window.start_alias.clone(),
            end_alias: window.end_alias.clone(),
            aggregations: def.aggregations.clone(),
            derived: def.derived.clone(),
            max_groups: window.max_groups.unwrap_or(engine.max_groups_per_window),
        };
        spec.validate(&def.name)?;
        Ok(Some(spec))
    }

    /// Structural checks run at graph build time
    pub fn validate(&self, node: &str) -> GraphResult<()> {
        let invalid = |reason: String| GraphError::InvalidWindow {
            node: node.to_string(),
            reason,
        };

        if self.duration_ms == 0 || i64::try_from(self.duration_ms).is_err() {
            return Err(invalid(format!(
                "duration must be between 1 and {}ms, got {}",
                i64::MAX,
                self.duration_ms
            )));
        }
        if self.max_groups == 0 {
            return Err(invalid("max_groups must be greater than 0".to_string()));
        }
        if self.aggregations.is_empty() {
            return Err(invalid("at least one aggregation is required".to_string()));
        }

        let mut aliases = HashSet::new();
        let outputs = [&self.start_alias, &self.end_alias]
            .into_iter()
            .chain(&self.group_by)
            .chain(self.aggregations.iter().map(|a| &a.alias))
            .chain(self.derived.iter().map(|d| &d.alias));
        for alias in outputs {
            if alias.is_empty() {
                return Err(invalid("output names must not be empty".to_string()));
            }
            if !aliases.insert(alias.as_str()) {
                return Err(invalid(format!("output field '{}' is defined twice", alias)));
            }
        }

        for agg in &self.aggregations {
            if agg.field == "*" && agg.kind != AggregationKind::Count {
                return Err(invalid(format!(
                    "'{}': only count accepts '*' as field",
                    agg.alias
                )));
            }
            check_round(agg.round, &agg.alias).map_err(invalid)?;
        }

        let aggregate_aliases: HashSet<&str> =
            self.aggregations.iter().map(|a| a.alias.as_str()).collect();
        for derived in &self.derived {
            for input in [&derived.numerator, &derived.denominator] {
                if !aggregate_aliases.contains(input.as_str()) {
                    return Err(invalid(format!(
                        "derived field '{}' references unknown aggregate '{}'",
                        derived.alias, input
                    )));
                }
            }
            if !derived.scale.is_finite() {
                return Err(invalid(format!("'{}': scale must be finite", derived.alias)));
            }
            check_round(derived.round, &derived.alias).map_err(invalid)?;
        }

        Ok(())
    }

    /// Duration as signed milliseconds, for window arithmetic
    pub fn duration(&self) -> i64 {
        i64::try_from(self.duration_ms).unwrap_or(i64::MAX)
    }

    /// Stable fingerprint of everything that shapes the window state. A
    /// snapshot only restores into a spec with the same fingerprint.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = Sha256::new();
        hasher.update(self.duration_ms.to_le_bytes());
        hasher.update(self.allowed_lateness_ms.to_le_bytes());
        let mut write_str = |s: &str| {
            // Length prefix keeps adjacent names from aliasing
            hasher.update((s.len() as u64).to_le_bytes());
            hasher.update(s.as_bytes());
        };
        for field in &self.group_by {
            write_str(field);
        }
        write_str(&self.start_alias);
        write_str(&self.end_alias);
        for agg in &self.aggregations {
            write_str(&agg.kind.to_string());
            write_str(&agg.field);
            write_str(&agg.alias);
        }

        let digest = hasher.finalize();
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        u64::from_le_bytes(prefix)
    }
}

fn check_round(round: Option<u32>, alias: &str) -> Result<(), String> {
    match round {
        Some(digits) if digits > MAX_ROUND_DIGITS => Err(format!(
            "'{}': round must be at most {} digits",
            alias, MAX_ROUND_DIGITS
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medallion_config::WindowDefinition;

    fn hourly() -> WindowSpec {
        WindowSpec::new(300_000)
            .with_lateness(60_000)
            .with_group_by("event_type")
            .aggregate(AggregationKind::Count, "*", "event_count")
            .aggregate(AggregationKind::Sum, "is_purchase", "purchases")
    }

    #[test]
    fn test_valid_spec() {
        assert!(hourly().validate("gold").is_ok());
    }

    #[test]
    fn test_zero_duration_rejected() {
        let spec = WindowSpec::new(0).aggregate(AggregationKind::Count, "*", "n");
        assert!(matches!(
            spec.validate("gold"),
            Err(GraphError::InvalidWindow { .. })
        ));
    }

    #[test]
    fn test_duplicate_alias_rejected() {
        let spec = hourly().aggregate(AggregationKind::Max, "amount", "event_type");
        let err = spec.validate("gold").unwrap_err();
        assert!(err.to_string().contains("defined twice"));
    }

    #[test]
    fn test_star_only_for_count() {
        let spec = WindowSpec::new(1_000).aggregate(AggregationKind::Sum, "*", "total");
        assert!(spec.validate("gold").is_err());
    }

    #[test]
    fn test_derived_must_reference_aggregates() {
        let spec = hourly().derive("rate", "purchases", "sessions", 100.0, Some(2));
        let err = spec.validate("gold").unwrap_err();
        assert!(err.to_string().contains("sessions"));

        let spec = hourly().derive("rate", "purchases", "event_count", 100.0, Some(2));
        assert!(spec.validate("gold").is_ok());
    }

    #[test]
    fn test_from_definition_applies_engine_defaults() {
        let engine = EngineConfig::default();
        let def = NodeDefinition::new("gold", "identity")
            .with_window(WindowDefinition::new(300_000).with_group_by("country"))
            .with_aggregation(AggregationKind::Count, "*", "event_count");

        let spec = WindowSpec::from_definition(&def, &engine).unwrap().unwrap();
        assert_eq!(spec.allowed_lateness_ms, engine.default_allowed_lateness_ms);
        assert_eq!(spec.max_groups, engine.max_groups_per_window);
        assert_eq!(spec.group_by, vec!["country".to_string()]);

        let row_wise = NodeDefinition::new("silver", "identity");
        assert!(WindowSpec::from_definition(&row_wise, &engine).unwrap().is_none());
    }

    #[test]
    fn test_aggregations_without_window_rejected() {
        let def = NodeDefinition::new("gold", "identity")
            .with_aggregation(AggregationKind::Count, "*", "event_count");
        assert!(WindowSpec::from_definition(&def, &EngineConfig::default()).is_err());
    }

    #[test]
    fn test_fingerprint_tracks_layout() {
        let base = hourly();
        assert_eq!(base.fingerprint(), hourly().fingerprint());
        assert_ne!(
            base.fingerprint(),
            hourly().with_group_by("country").fingerprint()
        );
        assert_ne!(
            base.fingerprint(),
            WindowSpec::new(600_000)
                .with_lateness(60_000)
                .with_group_by("event_type")
                .aggregate(AggregationKind::Count, "*", "event_count")
                .aggregate(AggregationKind::Sum, "is_purchase", "purchases")
                .fingerprint()
        );
    }
}
