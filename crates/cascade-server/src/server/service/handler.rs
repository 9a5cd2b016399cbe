//! HTTP service exposing the scheduler to worker fleets.
//!
//! [`CascadeService`] owns the [`SharedScheduler`] and builds the axum
//! [`Router`]. Every route parses its JSON body, then runs exactly one
//! scheduler operation on the blocking pool, so result-store I/O never
//! stalls the async workers.

use crate::server::{
    config::ServerConfig,
    service::wire::{
        ApiError, ApiResult, Empty, Envelope, Info, NodeNames, NodeRequest, NodeStatusRequest,
        ProjectInfo, RegisterMasterRequest, RegisterMasterResponse, RegisterNodesRequest,
        SubmitRequest, TokenRequest, WorkResponse, required,
    },
    telemetry::{
        increment_cannibalizations, increment_request_errors, increment_requests,
        increment_results_stored, increment_tasks_allocated, record_request_duration,
    },
};
use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    routing::{get, post},
};
use cascade::{
    AllocationSource, MemoryStore, MonotonicClock, Project, ResultStore, Scheduler,
    SchedulerConfig, SchedulerStatus, SharedScheduler, SqliteStore,
};

/// Result store selected at startup.
pub type Store = Box<dyn ResultStore + Send>;

/// Clock used for allocation dates and keep-alives.
pub type Clock = MonotonicClock;

/// Protocol version reported by `/api/v1/info`.
pub const API_VERSION: u32 = 1;

#[derive(Clone)]
pub struct CascadeService {
    scheduler: SharedScheduler<Store, Clock>,
}

impl CascadeService {
    pub fn new(scheduler: Scheduler<Store, Clock>) -> Self {
        Self {
            scheduler: SharedScheduler::new(scheduler),
        }
    }

    /// Opens the configured store (SQLite when `DATABASE` is set, memory
    /// otherwise) and prepares the scheduler for `project`.
    pub fn open(project: Project, config: &ServerConfig) -> anyhow::Result<Self> {
        let store: Store = match &config.database {
            Some(path) => Box::new(SqliteStore::open(path, project.name())?),
            None => {
                #[cfg(feature = "tracing")]
                tracing::warn!("No DATABASE configured, results are kept in memory");
                Box::new(MemoryStore::new())
            }
        };
        Ok(Self::with_store(project, store, config.scheduler)?)
    }

    pub fn with_store(
        project: Project,
        store: Store,
        config: SchedulerConfig,
    ) -> cascade::Result<Self> {
        let scheduler = Scheduler::new(project, store, MonotonicClock::default(), config)?;
        Ok(Self::new(scheduler))
    }

    pub fn router(self) -> Router {
        Router::new()
            .route("/api/v1/info", get(info))
            .route("/api/v1/register-master", post(register_master))
            .route("/api/v1/register-nodes", post(register_nodes))
            .route("/api/v1/fetch-nodes", post(fetch_nodes))
            .route("/api/v1/fetch-work-for-node", post(fetch_work))
            .route("/api/v1/submit-results", post(submit_results))
            .route("/api/v1/drop-task", post(drop_task))
            .route("/api/v1/set-node-status", post(set_node_status))
            .route("/api/v1/sysinfo", get(sysinfo))
            .route("/api/v1/unregister-master", post(unregister_master))
            .with_state(self)
    }

    /// Runs one scheduler operation on the blocking pool.
    async fn run<R, F>(&self, route: &'static str, op: F) -> Result<R, ApiError>
    where
        F: FnOnce(&mut Scheduler<Store, Clock>) -> cascade::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        increment_requests(route);
        let start = std::time::Instant::now();
        let shared = self.scheduler.clone();
        #[cfg(feature = "tracing")]
        let span = tracing::Span::current();

        let joined = tokio::task::spawn_blocking(move || {
            #[cfg(feature = "tracing")]
            let _entered = span.enter();
            let mut guard = shared.lock()?;
            op(&mut *guard)
        })
        .await;
        record_request_duration(start.elapsed().as_secs_f64() * 1000.0);

        let result = match joined {
            Ok(res) => res.map_err(ApiError::from),
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::error!("Scheduler task failed: {}", _e);
                Err(ApiError::Internal)
            }
        };
        if let Err(e) = &result {
            increment_request_errors(e.code().as_u16());
            #[cfg(feature = "tracing")]
            {
                if let ApiError::Scheduler(cascade::Error::Storage { context }) = e {
                    tracing::error!("Result store failure: {}", context);
                }
            }
        }
        result
    }
}

async fn info() -> Json<Info> {
    Json(Info {
        version: API_VERSION,
        vendor: "cascade",
    })
}

#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
async fn register_master(
    State(svc): State<CascadeService>,
    req: Result<Json<RegisterMasterRequest>, JsonRejection>,
) -> ApiResult<RegisterMasterResponse> {
    let Json(req) = req?;
    let key = req.key.unwrap_or_default();
    let (registration, summary) = svc
        .run("register-master", move |s| {
            let registration = s.register_client(req.name.as_deref(), &key)?;
            Ok((registration, s.summary()))
        })
        .await?;

    #[cfg(feature = "tracing")]
    tracing::info!("The client {} has connected", registration.name);

    Ok(Envelope::ok(
        "Authentication succeeded",
        RegisterMasterResponse {
            master_token: registration.token,
            name: registration.name,
            project: ProjectInfo::from(summary),
        },
    ))
}

#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
async fn register_nodes(
    State(svc): State<CascadeService>,
    req: Result<Json<RegisterNodesRequest>, JsonRejection>,
) -> ApiResult<NodeNames> {
    let Json(req) = req?;
    let token = required(req.mastertoken, "mastertoken")?;
    let count = required(req.nodenumber, "nodenumber")?;
    let nodenames = svc
        .run("register-nodes", move |s| s.register_nodes(&token, count))
        .await?;

    Ok(Envelope::ok(
        format!("Successfully initialized {count} nodes"),
        NodeNames { nodenames },
    ))
}

#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
async fn fetch_nodes(
    State(svc): State<CascadeService>,
    req: Result<Json<TokenRequest>, JsonRejection>,
) -> ApiResult<NodeNames> {
    let Json(req) = req?;
    let token = required(req.mastertoken, "mastertoken")?;
    let nodenames = svc.run("fetch-nodes", move |s| s.list_nodes(&token)).await?;
    Ok(Envelope::ok("Node list", NodeNames { nodenames }))
}

#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
async fn fetch_work(
    State(svc): State<CascadeService>,
    req: Result<Json<NodeRequest>, JsonRejection>,
) -> ApiResult<WorkResponse> {
    let Json(req) = req?;
    let token = required(req.mastertoken, "mastertoken")?;
    let node = required(req.nodeid, "nodeid")?;
    let allocation = svc
        .run("fetch-work-for-node", move |s| s.request_work(&token, &node))
        .await?;

    increment_tasks_allocated();
    if allocation.source == AllocationSource::Cannibalized {
        increment_cannibalizations();
    }

    Ok(Envelope::ok(
        "Successfully allocated work",
        WorkResponse {
            task_payload: allocation.values,
            level: allocation.level,
        },
    ))
}

#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
async fn submit_results(
    State(svc): State<CascadeService>,
    req: Result<Json<SubmitRequest>, JsonRejection>,
) -> ApiResult<Empty> {
    let Json(req) = req?;
    let token = required(req.mastertoken, "mastertoken")?;
    let node = required(req.nodeid, "nodeid")?;
    let payload = required(req.payload, "payload")?;
    svc.run("submit-results", move |s| {
        s.submit_result(&token, &node, &payload)
    })
    .await?;

    increment_results_stored();
    Ok(Envelope::ok("Results successfully submitted", Empty {}))
}

#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
async fn drop_task(
    State(svc): State<CascadeService>,
    req: Result<Json<NodeRequest>, JsonRejection>,
) -> ApiResult<Empty> {
    let Json(req) = req?;
    let token = required(req.mastertoken, "mastertoken")?;
    let node = required(req.nodeid, "nodeid")?;
    svc.run("drop-task", move |s| s.drop_task(&token, &node))
        .await?;
    Ok(Envelope::ok("Task dropped", Empty {}))
}

#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
async fn set_node_status(
    State(svc): State<CascadeService>,
    req: Result<Json<NodeStatusRequest>, JsonRejection>,
) -> ApiResult<Empty> {
    let Json(req) = req?;
    let token = required(req.mastertoken, "mastertoken")?;
    let node = required(req.nodeid, "nodeid")?;
    let status = required(req.status, "status")?;
    svc.run("set-node-status", move |s| {
        s.set_node_status(&token, &node, status)
    })
    .await?;
    Ok(Envelope::ok(
        format!("Node status set to {}", status.as_str()),
        Empty {},
    ))
}

async fn sysinfo(State(svc): State<CascadeService>) -> ApiResult<SchedulerStatus> {
    let status = svc.run("sysinfo", |s| Ok(s.status())).await?;
    Ok(Envelope::ok("System status", status))
}

#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
async fn unregister_master(
    State(svc): State<CascadeService>,
    req: Result<Json<TokenRequest>, JsonRejection>,
) -> ApiResult<Empty> {
    let Json(req) = req?;
    let token = required(req.mastertoken, "mastertoken")?;
    svc.run("unregister-master", move |s| s.unregister_client(&token))
        .await?;
    Ok(Envelope::ok("Successfully unregistered", Empty {}))
}
