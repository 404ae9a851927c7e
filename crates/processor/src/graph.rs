//! Pipeline graph: the static registry of table nodes and their dependency
//! edges.
//!
//! The graph is append-only and acyclic by construction. Every registration
//! is validated up front so that execution never meets an unknown upstream
//! or a cycle.

use crate::error::{GraphError, GraphResult};
use crate::expectation::{Expectation, Predicate};
use crate::transform::Transform;
use crate::window::WindowSpec;
use indexmap::IndexMap;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// A table of the pipeline
///
/// A node without a window is row-wise: every input record maps to at most
/// one output record. A node with a window folds its input into tumbling
/// window aggregates.
#[derive(Clone)]
pub struct TableNode {
    pub name: String,
    pub comment: Option<String>,
    /// Upstream tables; empty for nodes that read the event source
    pub upstream: Vec<String>,
    pub transform: Arc<dyn Transform>,
    /// Rows not matching the filter are skipped silently
    pub filter: Option<Predicate>,
    pub expectations: Vec<Expectation>,
    pub window: Option<WindowSpec>,
}

impl TableNode {
    pub fn new(name: impl Into<String>, transform: Arc<dyn Transform>) -> Self {
        Self {
            name: name.into(),
            comment: None,
            upstream: Vec::new(),
            transform,
            filter: None,
            expectations: Vec::new(),
            window: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_upstream(mut self, upstream: impl Into<String>) -> Self {
        self.upstream.push(upstream.into());
        self
    }

    pub fn with_filter(mut self, filter: Predicate) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_expectation(mut self, expectation: Expectation) -> Self {
        self.expectations.push(expectation);
        self
    }

    pub fn with_window(mut self, window: WindowSpec) -> Self {
        self.window = Some(window);
        self
    }

    pub fn is_windowed(&self) -> bool {
        self.window.is_some()
    }

    pub fn is_root(&self) -> bool {
        self.upstream.is_empty()
    }
}

impl fmt::Debug for TableNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableNode")
            .field("name", &self.name)
            .field("upstream", &self.upstream)
            .field("transform", &self.transform.name())
            .field("filter", &self.filter)
            .field("expectations", &self.expectations)
            .field("window", &self.window)
            .finish()
    }
}

/// Registry of table nodes in registration order
#[derive(Debug, Default, Clone)]
pub struct PipelineGraph {
    nodes: IndexMap<String, TableNode>,
}

impl PipelineGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node whose upstreams are already registered.
    ///
    /// Fails with `DuplicateNode` if the name exists, `DuplicateUpstream` if
    /// an upstream is listed twice, `Cycle` if the node lists itself as an
    /// upstream and `UnknownUpstream` if an upstream is not registered yet.
    pub fn register(&mut self, node: TableNode) -> GraphResult<()> {
        if self.nodes.contains_key(&node.name) {
            return Err(GraphError::DuplicateNode { name: node.name });
        }
        check_distinct_upstreams(&node)?;
        if node.upstream.iter().any(|u| *u == node.name) {
            return Err(GraphError::Cycle {
                path: vec![node.name.clone(), node.name],
            });
        }
        if let Some(missing) = node.upstream.iter().find(|u| !self.nodes.contains_key(*u)) {
            return Err(GraphError::UnknownUpstream {
                node: node.name.clone(),
                upstream: missing.clone(),
            });
        }

        self.nodes.insert(node.name.clone(), node);
        Ok(())
    }

    /// Register a set of nodes that may reference each other in any order.
    ///
    /// The whole set is validated before anything is inserted, so a failed
    /// call leaves the graph unchanged. Registration order is the order of
    /// `nodes`.
    pub fn register_all(&mut self, nodes: Vec<TableNode>) -> GraphResult<()> {
        let mut incoming: HashSet<&str> = HashSet::new();
        for node in &nodes {
            if self.nodes.contains_key(&node.name) || !incoming.insert(node.name.as_str()) {
                return Err(GraphError::DuplicateNode {
                    name: node.name.clone(),
                });
            }
        }

        for node in &nodes {
            check_distinct_upstreams(node)?;
            for upstream in &node.upstream {
                if !self.nodes.contains_key(upstream) && !incoming.contains(upstream.as_str()) {
                    return Err(GraphError::UnknownUpstream {
                        node: node.name.clone(),
                        upstream: upstream.clone(),
                    });
                }
            }
        }

        // Existing nodes cannot depend on new ones, so any cycle lies
        // entirely within the incoming set.
        let edges: HashMap<&str, Vec<&str>> = nodes
            .iter()
            .map(|n| {
                let ups = n
                    .upstream
                    .iter()
                    .map(String::as_str)
                    .filter(|u| incoming.contains(u))
                    .collect();
                (n.name.as_str(), ups)
            })
            .collect();
        if let Some(path) = find_cycle(&nodes, &edges) {
            return Err(GraphError::Cycle { path });
        }

        for node in nodes {
            self.nodes.insert(node.name.clone(), node);
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&TableNode> {
        self.nodes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in registration order
    pub fn nodes(&self) -> impl Iterator<Item = &TableNode> {
        self.nodes.values()
    }

    /// Direct upstreams of `name`
    pub fn upstream(&self, name: &str) -> GraphResult<&[String]> {
        self.nodes
            .get(name)
            .map(|n| n.upstream.as_slice())
            .ok_or_else(|| GraphError::UnknownNode {
                name: name.to_string(),
            })
    }

    /// Direct downstreams of `name`, in registration order
    pub fn downstream(&self, name: &str) -> Vec<&str> {
        self.nodes
            .values()
            .filter(|n| n.upstream.iter().any(|u| u == name))
            .map(|n| n.name.as_str())
            .collect()
    }

    /// Deterministic topological order. Among nodes whose upstreams are all
    /// placed, the earliest registered comes first.
    pub fn topological_order(&self) -> Vec<&str> {
        self.kahn().into_iter().map(|(_, name)| name).collect()
    }

    /// Nodes grouped by dependency depth. Every node's upstreams sit in an
    /// earlier level, so nodes of one level can run concurrently.
    pub fn levels(&self) -> Vec<Vec<&str>> {
        let mut levels: Vec<Vec<&str>> = Vec::new();
        for (depth, name) in self.kahn() {
            if levels.len() <= depth {
                levels.resize_with(depth + 1, Vec::new);
            }
            levels[depth].push(name);
        }
        levels
    }

    /// Kahn's algorithm with a registration-index priority queue. Returns
    /// (depth, name) pairs in emission order.
    fn kahn(&self) -> Vec<(usize, &str)> {
        let index: HashMap<&str, usize> = self
            .nodes
            .keys()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();

        let mut in_degree: Vec<usize> = self.nodes.values().map(|n| n.upstream.len()).collect();
        let mut children: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for (i, node) in self.nodes.values().enumerate() {
            for upstream in &node.upstream {
                if let Some(&u) = index.get(upstream.as_str()) {
                    children[u].push(i);
                }
            }
        }

        let mut depth = vec![0usize; self.nodes.len()];
        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| i)
            .collect();

        let mut out = Vec::with_capacity(self.nodes.len());
        while let Some(i) = ready.pop_first() {
            for &child in &children[i] {
                depth[child] = depth[child].max(depth[i] + 1);
                in_degree[child] -= 1;
                if in_degree[child] == 0 {
                    ready.insert(child);
                }
            }
            if let Some((name, _)) = self.nodes.get_index(i) {
                out.push((depth[i], name.as_str()));
            }
        }
        out
    }
}

/// Depth-first search for a cycle among `nodes`; returns the cycle path with
/// the first node repeated at the end.
fn find_cycle(nodes: &[TableNode], edges: &HashMap<&str, Vec<&str>>) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    fn visit<'a>(
        name: &'a str,
        edges: &HashMap<&'a str, Vec<&'a str>>,
        marks: &mut HashMap<&'a str, Mark>,
        stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        marks.insert(name, Mark::InProgress);
        stack.push(name);

        for &next in edges.get(name).map(Vec::as_slice).unwrap_or(&[]) {
            match marks.get(next).copied().unwrap_or(Mark::Unvisited) {
                Mark::InProgress => {
                    let start = stack.iter().position(|n| *n == next).unwrap_or(0);
                    let mut path: Vec<String> =
                        stack[start..].iter().map(|s| s.to_string()).collect();
                    path.push(next.to_string());
                    return Some(path);
                }
                Mark::Unvisited => {
                    if let Some(path) = visit(next, edges, marks, stack) {
                        return Some(path);
                    }
                }
                Mark::Done => {}
            }
        }

        stack.pop();
        marks.insert(name, Mark::Done);
        None
    }

    let mut marks: HashMap<&str, Mark> = HashMap::new();
    let mut stack = Vec::new();
    for node in nodes {
        if marks.get(node.name.as_str()).copied().unwrap_or(Mark::Unvisited) == Mark::Unvisited {
            if let Some(path) = visit(node.name.as_str(), edges, &mut marks, &mut stack) {
                return Some(path);
            }
        }
    }
    None
}

/// Reading the same upstream twice would feed every row in twice
fn check_distinct_upstreams(node: &TableNode) -> GraphResult<()> {
    let mut seen = HashSet::new();
    match node.upstream.iter().find(|u| !seen.insert(u.as_str())) {
        Some(repeated) => Err(GraphError::DuplicateUpstream {
            node: node.name.clone(),
            upstream: repeated.clone(),
        }),
        None => Ok(()),
    }
}
