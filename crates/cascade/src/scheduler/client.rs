use crate::scheduler::TaskId;
use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum NodeStatus {
    Idle,
    Active,
    Dead,
    Paused,
}

impl NodeStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Dead => "dead",
            Self::Paused => "paused",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A compute slot owned by a [`Client`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    id: String,
    pub(crate) status: NodeStatus,
    pub(crate) task: Option<TaskId>,
}

impl Node {
    fn new(id: String) -> Self {
        Self {
            id,
            status: NodeStatus::Idle,
            task: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub const fn status(&self) -> NodeStatus {
        self.status
    }

    pub const fn task(&self) -> Option<TaskId> {
        self.task
    }
}

/// A registered worker fleet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    name: String,
    token: String,
    pub(crate) last_keepalive: u64,
    nodes: Vec<Node>,
    nodes_created: u64,
}

impl Client {
    pub(crate) fn new(name: String, token: String, now: u64) -> Self {
        Self {
            name,
            token,
            last_keepalive: now,
            nodes: Vec::new(),
            nodes_created: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub const fn last_keepalive(&self) -> u64 {
        self.last_keepalive
    }

    /// Nodes in creation order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub(crate) fn nodes_mut(&mut self) -> &mut [Node] {
        &mut self.nodes
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub(crate) fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    /// Creates a node named `<client>#<k>`, `k` counting from 1 over the
    /// client's lifetime.
    pub(crate) fn add_node(&mut self) -> String {
        self.nodes_created += 1;
        let id = format!("{}#{}", self.name, self.nodes_created);
        self.nodes.push(Node::new(id.clone()));
        id
    }
}
