//! Static dependency graph of builders.

use crate::triggers::{BranchFilter, ChangeFilter};
use cascade_core::flow::FlowDefinition;
use cascade_core::ids::BuilderName;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DagError {
    #[error("Cycle detected in builder dependencies")]
    CycleDetected,
    #[error("Unknown builder {dependency} referenced by a trigger of {builder}")]
    UnknownBuilder { builder: String, dependency: String },
    #[error("Builder declared twice: {0}")]
    DuplicateBuilder(String),
    #[error("Root builder {0} cannot declare triggers")]
    RootHasTriggers(String),
}

impl From<DagError> for cascade_core::Error {
    fn from(err: DagError) -> Self {
        cascade_core::Error::Graph(err.to_string())
    }
}

/// Identifier of a builder validated against the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BuilderId(NodeIndex);

/// An inbound edge of a builder.
#[derive(Clone)]
pub struct Trigger {
    /// Upstream builders that must all pass; empty for root-triggered builders.
    pub required: BTreeSet<BuilderId>,
    pub filter: Arc<dyn ChangeFilter>,
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trigger")
            .field("required", &self.required)
            .finish_non_exhaustive()
    }
}

/// A node in the builder graph.
#[derive(Debug, Clone)]
pub struct BuilderSpec {
    pub id: BuilderId,
    pub name: BuilderName,
    pub triggers: Vec<Trigger>,
}

/// Directed acyclic graph of builders. Edges point downstream.
#[derive(Debug)]
pub struct DependencyGraph {
    graph: DiGraph<BuilderSpec, ()>,
    name_to_index: HashMap<BuilderName, NodeIndex>,
    downstream: HashMap<BuilderId, Vec<(BuilderId, usize)>>,
    root: BuilderId,
    join_step: String,
    skipped_blocks: bool,
}

impl DependencyGraph {
    /// Build the graph from a flow definition.
    pub fn from_flow(flow: &FlowDefinition) -> Result<Self, DagError> {
        let mut builder = DependencyGraphBuilder::new(&flow.root)
            .join_step(&flow.join_step)
            .skipped_blocks(flow.skipped_blocks);

        for def in &flow.builders {
            if def.name == flow.root {
                if !def.triggers.is_empty() {
                    return Err(DagError::RootHasTriggers(def.name.clone()));
                }
                continue;
            }
            builder = builder.builder(&def.name)?;
        }
        for def in &flow.builders {
            for trigger in &def.triggers {
                let required: Vec<&str> = trigger.builders.iter().map(String::as_str).collect();
                builder = builder.trigger(
                    &def.name,
                    &required,
                    Arc::new(BranchFilter::from_definition(trigger)),
                )?;
            }
        }
        builder.build()
    }

    pub fn root(&self) -> BuilderId {
        self.root
    }

    pub fn join_step(&self) -> &str {
        &self.join_step
    }

    /// Whether a skipped upstream build permanently blocks its joins.
    pub fn skipped_blocks(&self) -> bool {
        self.skipped_blocks
    }

    pub fn resolve(&self, name: &str) -> Option<BuilderId> {
        self.name_to_index
            .get(&BuilderName::new(name))
            .map(|&idx| BuilderId(idx))
    }

    pub fn name(&self, id: BuilderId) -> &BuilderName {
        &self.graph[id.0].name
    }

    pub fn spec(&self, id: BuilderId) -> &BuilderSpec {
        &self.graph[id.0]
    }

    /// Every builder, root included.
    pub fn builders(&self) -> impl Iterator<Item = BuilderId> + '_ {
        self.graph.node_indices().map(BuilderId)
    }

    /// Every trigger that `id` takes part in, paired with the builder it
    /// starts. For the root this is every trigger without requirements.
    pub fn downstream_of(&self, id: BuilderId) -> Vec<(BuilderId, &Trigger)> {
        self.downstream
            .get(&id)
            .map(|edges| {
                edges
                    .iter()
                    .map(|&(target, idx)| (target, &self.graph[target.0].triggers[idx]))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Get topologically sorted builders.
    pub fn topological_order(&self) -> Result<Vec<BuilderId>, DagError> {
        toposort(&self.graph, None)
            .map(|indices| indices.into_iter().map(BuilderId).collect())
            .map_err(|_| DagError::CycleDetected)
    }
}

/// Incremental construction of a [`DependencyGraph`].
#[derive(Debug)]
pub struct DependencyGraphBuilder {
    graph: DiGraph<BuilderSpec, ()>,
    name_to_index: HashMap<BuilderName, NodeIndex>,
    root: NodeIndex,
    join_step: String,
    skipped_blocks: bool,
}

impl DependencyGraphBuilder {
    pub fn new(root: &str) -> Self {
        let mut graph = DiGraph::new();
        let name = BuilderName::new(root);
        let root_idx = graph.add_node(BuilderSpec {
            id: BuilderId(NodeIndex::new(0)),
            name: name.clone(),
            triggers: vec![],
        });
        graph[root_idx].id = BuilderId(root_idx);
        Self {
            graph,
            name_to_index: HashMap::from([(name, root_idx)]),
            root: root_idx,
            join_step: "trigger".to_string(),
            skipped_blocks: true,
        }
    }

    pub fn join_step(mut self, name: &str) -> Self {
        self.join_step = name.to_string();
        self
    }

    pub fn skipped_blocks(mut self, blocks: bool) -> Self {
        self.skipped_blocks = blocks;
        self
    }

    /// Declare a builder.
    pub fn builder(mut self, name: &str) -> Result<Self, DagError> {
        let key = BuilderName::new(name);
        if self.name_to_index.contains_key(&key) {
            return Err(DagError::DuplicateBuilder(name.to_string()));
        }
        let idx = self.graph.add_node(BuilderSpec {
            id: BuilderId(NodeIndex::new(0)),
            name: key.clone(),
            triggers: vec![],
        });
        self.graph[idx].id = BuilderId(idx);
        self.name_to_index.insert(key, idx);
        Ok(self)
    }

    /// Add an inbound trigger to `target`. Naming the root among the
    /// requirements is the same as naming nothing.
    pub fn trigger(
        mut self,
        target: &str,
        required: &[&str],
        filter: Arc<dyn ChangeFilter>,
    ) -> Result<Self, DagError> {
        let target_idx = self.lookup(target, target)?;
        if target_idx == self.root {
            return Err(DagError::RootHasTriggers(target.to_string()));
        }

        let mut required_ids = BTreeSet::new();
        for dep in required {
            let dep_idx = self.lookup(target, dep)?;
            if dep_idx != self.root {
                required_ids.insert(BuilderId(dep_idx));
            }
        }

        if required_ids.is_empty() {
            self.graph.update_edge(self.root, target_idx, ());
        }
        for dep in &required_ids {
            self.graph.update_edge(dep.0, target_idx, ());
        }
        self.graph[target_idx].triggers.push(Trigger {
            required: required_ids,
            filter,
        });
        Ok(self)
    }

    fn lookup(&self, builder: &str, name: &str) -> Result<NodeIndex, DagError> {
        self.name_to_index
            .get(&BuilderName::new(name))
            .copied()
            .ok_or_else(|| DagError::UnknownBuilder {
                builder: builder.to_string(),
                dependency: name.to_string(),
            })
    }

    pub fn build(self) -> Result<DependencyGraph, DagError> {
        let mut downstream: HashMap<BuilderId, Vec<(BuilderId, usize)>> = HashMap::new();
        let root = BuilderId(self.root);
        for idx in self.graph.node_indices() {
            let target = BuilderId(idx);
            for (i, trigger) in self.graph[idx].triggers.iter().enumerate() {
                if trigger.required.is_empty() {
                    downstream.entry(root).or_default().push((target, i));
                }
                for dep in &trigger.required {
                    downstream.entry(*dep).or_default().push((target, i));
                }
            }
        }

        let dag = DependencyGraph {
            graph: self.graph,
            name_to_index: self.name_to_index,
            downstream,
            root,
            join_step: self.join_step,
            skipped_blocks: self.skipped_blocks,
        };

        // Verify no cycles
        dag.topological_order()?;

        Ok(dag)
    }
}
