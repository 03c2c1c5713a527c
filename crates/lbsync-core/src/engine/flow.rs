// ── Flow graphs ──

use std::collections::HashSet;
use std::sync::Arc;

use super::task::Task;
use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum FlowKind {
    /// Children run strictly in order.
    Linear,
    /// Children are independent and may run concurrently.
    Unordered,
}

pub enum Node {
    Task(Arc<dyn Task>),
    Flow(Flow),
}

impl Node {
    pub fn name(&self) -> &str {
        match self {
            Self::Task(t) => t.name(),
            Self::Flow(f) => f.name(),
        }
    }

    fn provides(&self, out: &mut Vec<&'static str>) {
        match self {
            Self::Task(t) => out.extend_from_slice(t.provides()),
            Self::Flow(f) => f.nodes.iter().for_each(|n| n.provides(out)),
        }
    }
}

/// A named, composable graph of tasks.
pub struct Flow {
    name: String,
    kind: FlowKind,
    nodes: Vec<Node>,
    best_effort: bool,
}

impl Flow {
    pub fn linear(name: impl Into<String>) -> Self {
        Self::new(name, FlowKind::Linear)
    }

    pub fn unordered(name: impl Into<String>) -> Self {
        Self::new(name, FlowKind::Unordered)
    }

    fn new(name: impl Into<String>, kind: FlowKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nodes: Vec::new(),
            best_effort: false,
        }
    }

    pub fn task(mut self, task: impl Task + 'static) -> Self {
        self.nodes.push(Node::Task(Arc::new(task)));
        self
    }

    pub fn task_if(self, cond: bool, task: impl Task + 'static) -> Self {
        if cond { self.task(task) } else { self }
    }

    pub fn flow(mut self, flow: Flow) -> Self {
        self.nodes.push(Node::Flow(flow));
        self
    }

    /// For unordered flows: a failing child is reverted on its own and
    /// recorded, and its siblings' work is kept.
    pub fn best_effort(mut self) -> Self {
        self.best_effort = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FlowKind {
        self.kind
    }

    pub fn is_best_effort(&self) -> bool {
        self.best_effort
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Children of an unordered flow must not write the same store key.
    pub fn check(&self) -> Result<(), CoreError> {
        if self.kind == FlowKind::Unordered {
            let mut seen = HashSet::new();
            for node in &self.nodes {
                let mut keys = Vec::new();
                node.provides(&mut keys);
                for key in keys {
                    if !seen.insert(key) {
                        return Err(CoreError::Internal(format!(
                            "unordered flow {} has two writers for `{key}`",
                            self.name
                        )));
                    }
                }
            }
        }
        self.nodes.iter().try_for_each(|n| match n {
            Node::Flow(f) => f.check(),
            Node::Task(_) => Ok(()),
        })
    }
}

impl std::fmt::Debug for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flow")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("nodes", &self.nodes.iter().map(Node::name).collect::<Vec<_>>())
            .finish()
    }
}
