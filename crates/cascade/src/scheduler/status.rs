use crate::{
    scheduler::{NodeStatus, Scheduler},
    store::ResultStore,
    time::TimeSource,
    value::VarKind,
};

/// Point-in-time view of one node.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct NodeView {
    pub id: String,
    pub status: NodeStatus,
    /// Human readable combination, empty when idle.
    pub task: String,
}

/// Point-in-time view of one client and its nodes.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ClientView {
    pub name: String,
    pub nodes: Vec<NodeView>,
}

/// Aggregate state of a running project.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SchedulerStatus {
    pub project: String,
    pub clients: Vec<ClientView>,
    pub densifications_total: u32,
    pub densifications_done: u32,
    pub level: u32,
    pub progress: f64,
    pub complete: bool,
}

/// Schema description sent to worker fleets on registration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ProjectSummary {
    pub name: String,
    pub algorithm: String,
    /// `(name, typecode)` pairs, in declaration order.
    pub inputs: Vec<(String, u8)>,
    pub outputs: Vec<(String, u8)>,
}

fn typecodes<'a>(fields: impl Iterator<Item = (&'a str, VarKind)>) -> Vec<(String, u8)> {
    fields.map(|(n, k)| (n.to_string(), k.typecode())).collect()
}

impl<S, T> Scheduler<S, T>
where
    S: ResultStore,
    T: TimeSource,
{
    pub fn summary(&self) -> ProjectSummary {
        let project = self.project();
        ProjectSummary {
            name: project.name().to_string(),
            algorithm: project.algorithm().to_string(),
            inputs: typecodes(project.inputs().iter()),
            outputs: typecodes(project.outputs().iter()),
        }
    }

    /// Snapshot of clients, nodes and progress. Clients are sorted by name.
    pub fn status(&self) -> SchedulerStatus {
        let mut clients: Vec<ClientView> = self
            .clients()
            .map(|c| ClientView {
                name: c.name().to_string(),
                nodes: c
                    .nodes()
                    .iter()
                    .map(|n| NodeView {
                        id: n.id().to_string(),
                        status: n.status(),
                        task: n
                            .task()
                            .and_then(|id| self.task(id))
                            .map(ToString::to_string)
                            .unwrap_or_default(),
                    })
                    .collect(),
            })
            .collect();
        clients.sort_by(|a, b| a.name.cmp(&b.name));

        SchedulerStatus {
            project: self.project().name().to_string(),
            clients,
            densifications_total: self.project().densify_passes(),
            densifications_done: self.densifications_done(),
            level: self.level(),
            progress: self.progress(),
            complete: self.is_complete(),
        }
    }
}
