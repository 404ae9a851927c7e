//! Pipeline graph builder
//!
//! Resolves a declarative [`PipelineDefinition`] into a validated
//! [`PipelineGraph`]: transforms are looked up by name, filters and
//! expectations are parsed and window specs are validated. Every error is a
//! [`GraphError`] raised before execution starts.

use crate::error::{GraphError, GraphResult};
use crate::expectation::{Expectation, Predicate};
use crate::graph::{PipelineGraph, TableNode};
use crate::transform::{Transform, TransformRegistry};
use crate::window::WindowSpec;
use medallion_config::{EngineConfig, NodeDefinition, PipelineDefinition};
use std::sync::Arc;
use tracing::{debug, info};

/// Builder for pipeline graphs
///
/// # Example
///
/// ```rust
/// use medallion_config::{ExpectationPolicy, NodeDefinition, PipelineDefinition};
/// use medallion_processor::pipeline::PipelineBuilder;
///
/// # fn example() -> medallion_processor::error::GraphResult<()> {
/// let definition = PipelineDefinition {
///     name: "demo".into(),
///     nodes: vec![
///         NodeDefinition::new("bronze", "identity"),
///         NodeDefinition::new("silver", "identity")
///             .with_upstream("bronze")
///             .with_expectation("positive_id", "id > 0", ExpectationPolicy::Drop),
///     ],
/// };
///
/// let graph = PipelineBuilder::new(definition).build()?;
/// assert_eq!(graph.topological_order(), vec!["bronze", "silver"]);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    definition: PipelineDefinition,
    transforms: TransformRegistry,
    engine: EngineConfig,
}

impl PipelineBuilder {
    /// Builder with the built-in transforms and default engine settings
    pub fn new(definition: PipelineDefinition) -> Self {
        Self {
            definition,
            transforms: TransformRegistry::with_builtins(),
            engine: EngineConfig::default(),
        }
    }

    /// Replace the transform registry
    pub fn with_transforms(mut self, transforms: TransformRegistry) -> Self {
        self.transforms = transforms;
        self
    }

    /// Register an additional transform
    pub fn with_transform(mut self, transform: Arc<dyn Transform>) -> Self {
        self.transforms.register(transform);
        self
    }

    /// Engine settings supply window defaults (lateness, group cap)
    pub fn with_engine_config(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    pub fn build(self) -> GraphResult<PipelineGraph> {
        let nodes = self
            .definition
            .nodes
            .iter()
            .map(|def| build_node(def, &self.transforms, &self.engine))
            .collect::<GraphResult<Vec<_>>>()?;

        let mut graph = PipelineGraph::new();
        graph.register_all(nodes)?;

        info!(
            pipeline = %self.definition.name,
            nodes = graph.len(),
            levels = graph.levels().len(),
            "Pipeline graph built"
        );
        Ok(graph)
    }
}

/// Resolve one node definition
pub fn build_node(
    def: &NodeDefinition,
    transforms: &TransformRegistry,
    engine: &EngineConfig,
) -> GraphResult<TableNode> {
    let transform = transforms
        .get(&def.transform)
        .ok_or_else(|| GraphError::UnknownTransform {
            node: def.name.clone(),
            transform: def.transform.clone(),
        })?;

    let mut node = TableNode::new(def.name.clone(), transform);
    if let Some(comment) = &def.comment {
        node = node.with_comment(comment.clone());
    }
    for upstream in &def.upstream {
        node = node.with_upstream(upstream.clone());
    }

    if let Some(filter) = &def.filter {
        let predicate = Predicate::parse(filter).map_err(|e| GraphError::InvalidPredicate {
            node: def.name.clone(),
            name: "filter".to_string(),
            reason: e.to_string(),
        })?;
        node = node.with_filter(predicate);
    }

    for expectation in &def.expectations {
        node = node.with_expectation(Expectation::from_definition(&def.name, expectation)?);
    }

    if let Some(spec) = WindowSpec::from_definition(def, engine)? {
        node = node.with_window(spec);
    }

    debug!(
        node = %def.name,
        transform = %def.transform,
        upstream = ?def.upstream,
        windowed = node.is_windowed(),
        "Resolved node"
    );
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use medallion_config::{AggregationKind, ExpectationPolicy, MedallionConfig, WindowDefinition};

    fn definition(nodes: Vec<NodeDefinition>) -> PipelineDefinition {
        PipelineDefinition {
            name: "test".into(),
            nodes,
        }
    }

    #[test]
    fn test_build_bundled_clickstream() {
        let config = MedallionConfig::clickstream().unwrap();
        let graph = PipelineBuilder::new(config.pipeline)
            .with_engine_config(config.engine)
            .build()
            .unwrap();

        let levels = graph.levels();
        assert_eq!(levels[0], vec!["bronze_events"]);
        assert_eq!(levels[1], vec!["silver_events_cleaned"]);
        assert_eq!(levels[2], vec!["silver_events_enriched"]);
        assert_eq!(levels[3].len(), 6);
        assert!(levels[3].iter().all(|n| graph.get(n).unwrap().is_windowed()));
    }

    #[test]
    fn test_unknown_transform() {
        let err = PipelineBuilder::new(definition(vec![NodeDefinition::new("a", "nope")]))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownTransform {
                node: "a".into(),
                transform: "nope".into()
            }
        );
    }

    #[test]
    fn test_invalid_filter_and_expectation() {
        let def = definition(vec![
            NodeDefinition::new("a", "identity").with_filter("amount >")
        ]);
        assert!(matches!(
            PipelineBuilder::new(def).build(),
            Err(GraphError::InvalidPredicate { name, .. }) if name == "filter"
        ));

        let def = definition(vec![NodeDefinition::new("a", "identity").with_expectation(
            "broken",
            "(user_id > 0",
            ExpectationPolicy::Fail,
        )]);
        assert!(matches!(
            PipelineBuilder::new(def).build(),
            Err(GraphError::InvalidPredicate { name, .. }) if name == "broken"
        ));
    }

    #[test]
    fn test_invalid_window() {
        let def = definition(vec![NodeDefinition::new("gold", "identity")
            .with_window(WindowDefinition::new(0))
            .with_aggregation(AggregationKind::Count, "*", "n")]);
        assert!(matches!(
            PipelineBuilder::new(def).build(),
            Err(GraphError::InvalidWindow { .. })
        ));
    }

    #[test]
    fn test_unknown_upstream_and_cycle() {
        let def = definition(vec![NodeDefinition::new("a", "identity").with_upstream("ghost")]);
        assert!(matches!(
            PipelineBuilder::new(def).build(),
            Err(GraphError::UnknownUpstream { .. })
        ));

        let def = definition(vec![
            NodeDefinition::new("a", "identity").with_upstream("b"),
            NodeDefinition::new("b", "identity").with_upstream("a"),
        ]);
        assert!(matches!(
            PipelineBuilder::new(def).build(),
            Err(GraphError::Cycle { .. })
        ));
    }

    #[test]
    fn test_custom_transform() {
        use crate::error::TransformError;
        use medallion_types::Record;

        #[derive(Debug)]
        struct Tag;
        impl Transform for Tag {
            fn name(&self) -> &str {
                "tag"
            }
            fn apply(&self, record: Record) -> Result<Record, TransformError> {
                Ok(record.with_field("tagged", true))
            }
        }

        let def = definition(vec![NodeDefinition::new("a", "tag")]);
        let graph = PipelineBuilder::new(def)
            .with_transform(Arc::new(Tag))
            .build()
            .unwrap();
        assert_eq!(graph.get("a").unwrap().transform.name(), "tag");
    }
}
