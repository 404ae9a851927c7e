//! Label sets for pipeline metrics

use prometheus_client::encoding::EncodeLabelSet;

/// Labels of per-node series
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct NodeLabels {
    pub node: String,
}

impl NodeLabels {
    pub fn new(node: impl Into<String>) -> Self {
        Self { node: node.into() }
    }
}

/// Labels of per-expectation series
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ExpectationLabels {
    pub node: String,
    pub expectation: String,
}

impl ExpectationLabels {
    pub fn new(node: impl Into<String>, expectation: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            expectation: expectation.into(),
        }
    }
}
