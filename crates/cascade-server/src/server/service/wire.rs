//! JSON messages exchanged with worker fleets.
//!
//! Every response is an envelope `{"status", "code", "msg"}`, flattened with
//! the operation's own fields. `status` is `"ok"` exactly when `code` is `0`.
//! Field names follow the protocol spoken by existing worker clients.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use cascade::{ErrorCode, ErrorKind, NodeStatus, ProjectSummary, Record};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Errors answered to API callers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The scheduler refused the operation.
    #[error(transparent)]
    Scheduler(#[from] cascade::Error),

    /// A required request field is absent.
    #[error("Missing field '{field}'")]
    MissingField { field: &'static str },

    /// The body is not the JSON object the route expects.
    #[error("Malformed request: {reason}")]
    Malformed { reason: String },

    /// The blocking scheduler task did not complete.
    #[error("Internal error")]
    Internal,
}

impl ApiError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Scheduler(e) => e.code(),
            Self::MissingField { .. } | Self::Malformed { .. } => ErrorCode::MissingRequestField,
            Self::Internal => ErrorCode::Internal,
        }
    }

    fn http_status(&self) -> StatusCode {
        match self {
            Self::Scheduler(e) => match e.kind() {
                ErrorKind::Configuration | ErrorKind::Internal => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
                ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
                ErrorKind::NotFound => match e.code() {
                    ErrorCode::AuthFailed
                    | ErrorCode::UnknownToken
                    | ErrorCode::KeepAliveTimeout => StatusCode::UNAUTHORIZED,
                    _ => StatusCode::NOT_FOUND,
                },
                ErrorKind::StateConflict => StatusCode::CONFLICT,
                ErrorKind::Storage => StatusCode::SERVICE_UNAVAILABLE,
                ErrorKind::Exhausted => StatusCode::GONE,
            },
            Self::MissingField { .. } | Self::Malformed { .. } => StatusCode::BAD_REQUEST,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn public_message(&self) -> String {
        match self {
            Self::Scheduler(e) => e.public_message(),
            other => other.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Malformed {
            reason: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Envelope {
            status: "error",
            code: self.code().as_u16(),
            msg: self.public_message(),
            body: Empty {},
        };
        (self.http_status(), Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<Json<Envelope<T>>, ApiError>;

#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub status: &'static str,
    pub code: u16,
    pub msg: String,
    #[serde(flatten)]
    pub body: T,
}

impl<T> Envelope<T> {
    pub fn ok(msg: impl Into<String>, body: T) -> Json<Self> {
        Json(Self {
            status: "ok",
            code: ErrorCode::None.as_u16(),
            msg: msg.into(),
            body,
        })
    }
}

#[derive(Debug, Default, Serialize)]
pub struct Empty {}

/// Unwraps a required request field.
pub fn required<T>(value: Option<T>, field: &'static str) -> Result<T, ApiError> {
    value.ok_or(ApiError::MissingField { field })
}

#[derive(Debug, Serialize)]
pub struct Info {
    pub version: u32,
    pub vendor: &'static str,
}

#[derive(Debug, Default, Deserialize)]
pub struct RegisterMasterRequest {
    pub key: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProjectInfo {
    pub name: String,
    pub algo: String,
    /// Variable name to typecode.
    pub scheme_in: BTreeMap<String, u8>,
    pub scheme_out: BTreeMap<String, u8>,
}

impl From<ProjectSummary> for ProjectInfo {
    fn from(summary: ProjectSummary) -> Self {
        Self {
            name: summary.name,
            algo: summary.algorithm,
            scheme_in: summary.inputs.into_iter().collect(),
            scheme_out: summary.outputs.into_iter().collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RegisterMasterResponse {
    pub master_token: String,
    pub name: String,
    pub project: ProjectInfo,
}

#[derive(Debug, Default, Deserialize)]
pub struct TokenRequest {
    pub mastertoken: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RegisterNodesRequest {
    pub mastertoken: Option<String>,
    pub nodenumber: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct NodeNames {
    pub nodenames: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NodeRequest {
    pub mastertoken: Option<String>,
    pub nodeid: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct WorkResponse {
    #[serde(rename = "task-payload")]
    pub task_payload: Record,
    pub level: u32,
}

#[derive(Debug, Default, Deserialize)]
pub struct SubmitRequest {
    pub mastertoken: Option<String>,
    pub nodeid: Option<String>,
    pub payload: Option<Record>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NodeStatusRequest {
    pub mastertoken: Option<String>,
    pub nodeid: Option<String>,
    pub status: Option<NodeStatus>,
}
