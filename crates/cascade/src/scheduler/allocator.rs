use crate::{
    densify::{Densifier, narrowed_bounds},
    error::{Error, Result},
    project::Project,
    scheduler::{Client, Node, NodeStatus, Task, TaskId},
    sequencer::Sequencer,
    store::ResultStore,
    time::TimeSource,
    value::{LEVEL_FIELD, Record, Value},
};
use core::fmt;
use rand::Rng;
use std::collections::HashMap;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Default keep-alive window: 20 minutes.
pub const DEFAULT_KEEPALIVE_TIMEOUT_MS: u64 = 1_200_000;

/// Default cap on the nodes a single client may register.
pub const DEFAULT_MAX_NODES_PER_CLIENT: usize = 1024;

/// Name given to clients that did not suggest a usable one.
pub const UNNAMED_CLIENT: &str = "UNNAMED";

/// Client session settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Silence after which a client must register again.
    pub keepalive_timeout_ms: u64,
    /// Whether stale clients are refused. When off, the keep-alive is only
    /// recorded.
    pub enforce_keepalive: bool,
    /// Most nodes one client may hold, across all its registrations.
    pub max_nodes_per_client: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            keepalive_timeout_ms: DEFAULT_KEEPALIVE_TIMEOUT_MS,
            enforce_keepalive: false,
            max_nodes_per_client: DEFAULT_MAX_NODES_PER_CLIENT,
        }
    }
}

/// Where an allocated task came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationSource {
    /// Popped from the rejection stack.
    Rejected,
    /// Freshly drawn from the sequencer.
    Fresh,
    /// Reclaimed from another node that has not answered yet.
    Cannibalized,
}

/// A task bound to the requesting node.
#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    pub task: TaskId,
    pub values: Record,
    pub level: u32,
    pub source: AllocationSource,
}

/// Outcome of a client registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub token: String,
    /// Final, de-duplicated client name.
    pub name: String,
}

/// The scheduling core of one project.
///
/// Owns the clients, the task arena, the rejection stack, the sequencer (via
/// the [`Project`]) and the densification state. Every public operation is
/// one self-contained transition; wrap the scheduler in a
/// [`SharedScheduler`](crate::SharedScheduler) to serve concurrent callers.
pub struct Scheduler<S, T> {
    project: Project,
    store: S,
    time: T,
    config: SchedulerConfig,
    clients: HashMap<String, Client>,
    name_uses: HashMap<String, u64>,
    tasks: HashMap<TaskId, Task>,
    next_task: TaskId,
    rejected: Vec<TaskId>,
    densifier: Option<Densifier>,
    previous: Option<Sequencer>,
    densifications_done: u32,
    complete: bool,
}

impl<S, T> fmt::Debug for Scheduler<S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("project", &self.project)
            .field("clients", &self.clients.len())
            .field("tasks", &self.tasks.len())
            .field("rejected", &self.rejected)
            .field("densifications_done", &self.densifications_done)
            .field("complete", &self.complete)
            .finish_non_exhaustive()
    }
}

impl<S, T> Scheduler<S, T>
where
    S: ResultStore,
    T: TimeSource,
{
    /// Creates the scheduler and prepares the store for the project's
    /// records.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the store holds an incompatible
    /// table, or [`Error::Storage`] if it cannot be reached.
    pub fn new(project: Project, mut store: S, time: T, config: SchedulerConfig) -> Result<Self> {
        store.ensure_schema(&project.full_schema())?;
        let densifier = match project.densify() {
            Some(cfg) => Some(Densifier::new(cfg.target.clone(), cfg.keep_fraction)?),
            None => None,
        };

        #[cfg(feature = "tracing")]
        tracing::info!(
            project = project.name(),
            total = project.sequencer().total(),
            passes = project.densify_passes(),
            "Scheduler initialized"
        );

        Ok(Self {
            project,
            store,
            time,
            config,
            clients: HashMap::new(),
            name_uses: HashMap::new(),
            tasks: HashMap::new(),
            next_task: 0,
            rejected: Vec::new(),
            densifier,
            previous: None,
            densifications_done: 0,
            complete: false,
        })
    }

    pub const fn project(&self) -> &Project {
        &self.project
    }

    pub const fn store(&self) -> &S {
        &self.store
    }

    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn clients(&self) -> impl Iterator<Item = &Client> {
        self.clients.values()
    }

    pub fn client(&self, token: &str) -> Option<&Client> {
        self.clients.get(token)
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    /// Tasks waiting to be handed out again, most recent last.
    pub fn rejected(&self) -> &[TaskId] {
        &self.rejected
    }

    pub const fn densifier(&self) -> Option<&Densifier> {
        self.densifier.as_ref()
    }

    pub const fn densifications_done(&self) -> u32 {
        self.densifications_done
    }

    /// Whether every combination of every pass has been handed out and
    /// completed.
    pub const fn is_complete(&self) -> bool {
        self.complete
    }

    /// Level new tasks are tagged with.
    pub fn level(&self) -> u32 {
        self.densifier.as_ref().map_or(1, Densifier::level)
    }

    /// Registers a worker fleet.
    ///
    /// `-` and `#` are removed from the suggested name, which then gets a
    /// `-k` suffix if already taken.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AuthFailed`] if `key` is not the project password.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self, key)))]
    pub fn register_client(&mut self, name: Option<&str>, key: &str) -> Result<Registration> {
        if !self.project.check_password(key) {
            #[cfg(feature = "tracing")]
            tracing::warn!("Client registration refused");
            return Err(Error::AuthFailed);
        }

        let mut name: String = name
            .unwrap_or_default()
            .chars()
            .filter(|c| *c != '-' && *c != '#')
            .collect();
        if name.is_empty() {
            name = UNNAMED_CLIENT.to_string();
        }
        match self.name_uses.get_mut(&name) {
            Some(uses) => {
                *uses += 1;
                name = format!("{name}-{uses}");
            }
            None => {
                self.name_uses.insert(name.clone(), 0);
            }
        }

        let token = loop {
            let token = new_token();
            if !self.clients.contains_key(&token) {
                break token;
            }
        };

        let now = self.time.current_millis();
        self.clients
            .insert(token.clone(), Client::new(name.clone(), token.clone(), now));

        #[cfg(feature = "tracing")]
        tracing::info!(client = %name, "Client registered");

        Ok(Registration { token, name })
    }

    /// Checks `token` and refreshes the client's keep-alive.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownToken`] for an unknown token and
    /// [`Error::KeepAliveTimeout`] for a stale client when enforcement is
    /// on.
    pub fn authenticate(&mut self, token: &str) -> Result<&mut Client> {
        let now = self.time.current_millis();
        let client = self.clients.get_mut(token).ok_or(Error::UnknownToken)?;
        if self.config.enforce_keepalive
            && client
                .last_keepalive
                .saturating_add(self.config.keepalive_timeout_ms)
                < now
        {
            return Err(Error::KeepAliveTimeout);
        }
        client.last_keepalive = now;
        Ok(client)
    }

    /// Adds `count` nodes to a client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidValue`] if the client would end up with more
    /// than [`SchedulerConfig::max_nodes_per_client`] nodes. No node is added
    /// in that case.
    pub fn register_nodes(&mut self, token: &str, count: usize) -> Result<Vec<String>> {
        let max = self.config.max_nodes_per_client;
        let client = self.authenticate(token)?;
        let held = client.nodes().len();
        if held.saturating_add(count) > max {
            return Err(Error::InvalidValue {
                name: "nodenumber".to_string(),
                reason: format!("{held} nodes held, {count} requested, at most {max} allowed"),
            });
        }
        let ids: Vec<String> = (0..count).map(|_| client.add_node()).collect();

        #[cfg(feature = "tracing")]
        tracing::info!(client = client.name(), count, "Nodes registered");

        Ok(ids)
    }

    /// Ids of a client's nodes, in creation order.
    pub fn list_nodes(&mut self, token: &str) -> Result<Vec<String>> {
        let client = self.authenticate(token)?;
        Ok(client.nodes().iter().map(|n| n.id().to_string()).collect())
    }

    /// Hands a task to an idle node.
    ///
    /// Sources are tried in order: the rejection stack, the sequencer, the
    /// oldest reclaimable task held elsewhere, then a new densification
    /// candidate.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownToken`], [`Error::UnknownNode`] for unknown callers
    /// - [`Error::WrongNodeStatus`] unless the node is idle
    /// - [`Error::Exhausted`] once nothing is left to compute
    /// - [`Error::Storage`] if the store fails
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self, token)))]
    pub fn request_work(&mut self, token: &str, node: &str) -> Result<Allocation> {
        self.node_with_status(token, node, NodeStatus::Idle)?;
        let now = self.time.current_millis();

        loop {
            if let Some(id) = self.rejected.pop() {
                return Ok(self.bind(token, node, id, AllocationSource::Rejected));
            }

            if let Some(values) = self.draw_fresh()? {
                let id = self.next_task;
                self.next_task += 1;
                let level = self.level();
                self.tasks.insert(id, Task::new(id, values, level, now));
                return Ok(self.bind(token, node, id, AllocationSource::Fresh));
            }

            if let Some(id) = self.oldest_reclaimable() {
                if let Some(task) = self.tasks.get_mut(&id) {
                    task.realloc(now);
                }
                #[cfg(feature = "tracing")]
                tracing::debug!(task = id, "Cannibalizing task");
                return Ok(self.bind(token, node, id, AllocationSource::Cannibalized));
            }

            if !self.advance_densification()? {
                if !self.complete {
                    self.complete = true;
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Done, no more tasks to allocate");
                }
                return Err(Error::Exhausted);
            }
        }
    }

    /// Stores a node's result.
    ///
    /// Every output variable must be present and convert to its kind, and
    /// the project validator must accept the merged record. On any of these
    /// failures the task goes back to the rejection stack and the node
    /// becomes idle before the error is returned.
    ///
    /// # Errors
    ///
    /// - [`Error::WrongNodeStatus`] unless the node is active
    /// - [`Error::MissingResultVariable`], [`Error::InvalidValue`],
    ///   [`Error::ValidationFailed`] for rejected payloads
    /// - [`Error::TaskSuperseded`] if another node already delivered
    /// - [`Error::Storage`] if the record cannot be stored
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self, token, payload)))]
    pub fn submit_result(&mut self, token: &str, node: &str, payload: &Record) -> Result<()> {
        let id = self.node_with_status(token, node, NodeStatus::Active)?;
        let Some(id) = id else {
            self.release(token, node);
            return Err(Error::WrongNodeStatus {
                node: node.to_string(),
                expected: NodeStatus::Active.as_str(),
                actual: "empty",
            });
        };
        let (mut merged, level) = match self.tasks.get(&id) {
            Some(task) if !task.no_realloc() => (task.values().clone(), task.level()),
            _ => {
                self.release(token, node);
                #[cfg(feature = "tracing")]
                tracing::debug!(task = id, "Late submission for a completed task");
                return Err(Error::TaskSuperseded);
            }
        };

        let outputs = self
            .project
            .outputs()
            .iter()
            .map(|(name, kind)| {
                let value = payload
                    .get(name)
                    .ok_or_else(|| Error::MissingResultVariable {
                        name: name.to_string(),
                    })?;
                Ok((name.to_string(), kind.coerce(name, value)?))
            })
            .collect::<Result<Vec<_>>>();
        match outputs {
            Ok(outputs) => merged.extend(outputs),
            Err(e) => {
                self.abandon(token, node);
                return Err(e);
            }
        }

        if !self.project.validator().validate_output(&merged) {
            self.abandon(token, node);
            return Err(Error::ValidationFailed);
        }

        merged.insert(LEVEL_FIELD.to_string(), Value::UInt(u64::from(level)));
        if let Err(e) = self.store.insert(&merged) {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %e, task = id, "Failed to store result");
            self.abandon(token, node);
            return Err(e);
        }

        if let Some(task) = self.tasks.get_mut(&id) {
            task.complete();
        }
        self.release(token, node);
        Ok(())
    }

    /// Gives up an active node's task; it is handed out again before any
    /// fresh combination.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WrongNodeStatus`] unless the node is active.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self, token)))]
    pub fn drop_task(&mut self, token: &str, node: &str) -> Result<()> {
        self.node_with_status(token, node, NodeStatus::Active)?;
        self.abandon(token, node);
        Ok(())
    }

    /// Administrative status change.
    ///
    /// Pausing or killing an active node abandons its task. A paused or dead
    /// node can be brought back with [`NodeStatus::Idle`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidValue`] for [`NodeStatus::Active`], which is
    /// only reached through [`Scheduler::request_work`], and
    /// [`Error::WrongNodeStatus`] when idling an active node.
    pub fn set_node_status(&mut self, token: &str, node: &str, status: NodeStatus) -> Result<()> {
        let current = self.node_mut(token, node)?.status;
        match (current, status) {
            (_, NodeStatus::Active) => Err(Error::InvalidValue {
                name: "status".to_string(),
                reason: "nodes become active by requesting work".to_string(),
            }),
            (NodeStatus::Active, NodeStatus::Idle) => Err(Error::WrongNodeStatus {
                node: node.to_string(),
                expected: "not active",
                actual: current.as_str(),
            }),
            (NodeStatus::Active, _) => {
                self.abandon(token, node);
                self.node_mut(token, node)?.status = status;
                Ok(())
            }
            _ => {
                self.node_mut(token, node)?.status = status;
                Ok(())
            }
        }
    }

    /// Removes a client, abandoning every task its nodes hold.
    pub fn unregister_client(&mut self, token: &str) -> Result<()> {
        let active: Vec<String> = self
            .authenticate(token)?
            .nodes()
            .iter()
            .filter(|n| n.status() == NodeStatus::Active)
            .map(|n| n.id().to_string())
            .collect();
        for node in &active {
            self.abandon(token, node);
        }
        #[cfg_attr(not(feature = "tracing"), allow(unused_variables))]
        let removed = self.clients.remove(token);
        #[cfg(feature = "tracing")]
        {
            if let Some(client) = &removed {
                tracing::info!(client = client.name(), "Client unregistered");
            }
        }
        Ok(())
    }

    fn node_mut(&mut self, token: &str, node: &str) -> Result<&mut Node> {
        self.authenticate(token)?
            .node_mut(node)
            .ok_or_else(|| Error::UnknownNode {
                node: node.to_string(),
            })
    }

    /// Authenticates, checks the node status, and returns its task.
    fn node_with_status(
        &mut self,
        token: &str,
        node: &str,
        expected: NodeStatus,
    ) -> Result<Option<TaskId>> {
        let n = self.node_mut(token, node)?;
        if n.status != expected {
            return Err(Error::WrongNodeStatus {
                node: node.to_string(),
                expected: expected.as_str(),
                actual: n.status.as_str(),
            });
        }
        Ok(n.task)
    }

    fn bind(&mut self, token: &str, node: &str, id: TaskId, source: AllocationSource) -> Allocation {
        let task = self
            .tasks
            .get_mut(&id)
            .map(|t| {
                t.holders += 1;
                (t.values().clone(), t.level())
            });
        if let Some(n) = self
            .clients
            .get_mut(token)
            .and_then(|c| c.node_mut(node))
        {
            n.task = Some(id);
            n.status = NodeStatus::Active;
        }
        let (values, level) = task.unwrap_or_default();
        Allocation {
            task: id,
            values,
            level,
            source,
        }
    }

    /// Detaches the node from its task and makes it idle. Returns the task
    /// it held.
    fn unbind(&mut self, token: &str, node: &str) -> Option<TaskId> {
        let n = self.clients.get_mut(token)?.node_mut(node)?;
        n.status = NodeStatus::Idle;
        let id = n.task.take()?;
        if let Some(task) = self.tasks.get_mut(&id) {
            task.holders = task.holders.saturating_sub(1);
        }
        Some(id)
    }

    /// Frees a node after a completed or superseded task.
    fn release(&mut self, token: &str, node: &str) {
        if let Some(id) = self.unbind(token, node) {
            self.collect(id);
        }
    }

    /// Frees a node and re-queues its task, unless the task is completed or
    /// still held by another node.
    fn abandon(&mut self, token: &str, node: &str) {
        let Some(id) = self.unbind(token, node) else {
            return;
        };
        let requeue = self
            .tasks
            .get(&id)
            .is_some_and(|t| !t.no_realloc() && t.holders == 0);
        if requeue {
            #[cfg(feature = "tracing")]
            tracing::debug!(task = id, "Task re-queued");
            self.rejected.push(id);
        } else {
            self.collect(id);
        }
    }

    /// Drops a task nobody refers to anymore.
    fn collect(&mut self, id: TaskId) {
        let unused = self.tasks.get(&id).is_some_and(|t| t.holders == 0);
        if unused && !self.rejected.contains(&id) {
            self.tasks.remove(&id);
        }
    }

    /// Next combination that passes the input validator and is not stored
    /// yet.
    fn draw_fresh(&mut self) -> Result<Option<Record>> {
        while let Some(values) = self.project.sequencer_mut().next() {
            if !self.project.validator().validate_input(&values) {
                #[cfg(feature = "tracing")]
                tracing::debug!(?values, "Combination rejected by validator");
                continue;
            }
            if self.store.exists(&values)? {
                continue;
            }
            return Ok(Some(values));
        }
        Ok(None)
    }

    /// The held, reclaimable task with the oldest allocation.
    fn oldest_reclaimable(&self) -> Option<TaskId> {
        self.tasks
            .values()
            .filter(|t| !t.no_realloc() && t.holders > 0)
            .min_by_key(|t| (t.last_allocated_at(), t.id()))
            .map(Task::id)
    }

    /// Moves densification one step forward. Returns `false` once no pass
    /// is running and the budget is spent.
    fn advance_densification(&mut self) -> Result<bool> {
        let Some(cfg) = self.project.densify().cloned() else {
            return Ok(false);
        };
        let Some(densifier) = self.densifier.as_mut() else {
            return Ok(false);
        };

        if !densifier.is_active() {
            if self.densifications_done >= cfg.passes {
                return Ok(false);
            }
            // Step counts of the next level derive from this grid.
            self.previous = Some(self.project.sequencer().clone());
            densifier.start(&self.store)?;
            self.densifications_done += 1;
        }

        if let Some(candidate) = densifier.next_candidate(&self.store, &cfg.schema)? {
            let previous = self.previous.as_ref().unwrap_or(self.project.sequencer());
            let bounds = narrowed_bounds(&candidate, previous, cfg.amplification)?;

            #[cfg(feature = "tracing")]
            tracing::info!(?bounds, level = densifier.level(), "Reloading sequencer");

            self.project.sequencer_mut().reload_bounds(&bounds)?;
        }
        Ok(true)
    }

    /// Completion of the current pass.
    ///
    /// During densification this is `(realized + total * (offset - 1)) /
    /// (limit * total)`, unclamped: it dips below 0 while a pass has started
    /// but no candidate has been loaded yet.
    pub fn progress(&self) -> f64 {
        let seq = self.project.sequencer();
        let total = seq.total() as f64;
        if seq.total() == 0 {
            return 1.0;
        }
        let realized = seq.realized() as f64;
        if self.densifications_done == 0 {
            return realized / total;
        }
        let (offset, limit) = self
            .densifier
            .as_ref()
            .map_or((0, 0), |d| (d.offset(), d.limit()));
        if limit == 0 {
            return 1.0;
        }
        let done = realized + total * (offset as f64 - 1.0);
        done / (limit as f64 * total)
    }
}

/// 256 random bits, hex encoded.
fn new_token() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
