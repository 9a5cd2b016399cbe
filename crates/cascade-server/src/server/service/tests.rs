use super::handler::{CascadeService, Store};
use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header::CONTENT_TYPE},
};
use cascade::{MemoryStore, Project, SchedulerConfig, Sequencer, ValueRange, VarKind};
use serde_json::{Value, json};
use tower::ServiceExt;

fn app() -> Router {
    // X in {0, 1}
    let seq = Sequencer::builder()
        .dimension("X", VarKind::Double, ValueRange::linear(0.0, 1.0, 1).unwrap())
        .build()
        .unwrap();
    let project = Project::builder("demo", seq)
        .algorithm("paraboloid")
        .password("secret")
        .output("E", VarKind::Double)
        .build()
        .unwrap();
    let store: Store = Box::new(MemoryStore::new());
    CascadeService::with_store(project, store, SchedulerConfig::default())
        .unwrap()
        .router()
}

async fn send(app: &Router, method: Method, uri: &str, body: Body) -> (StatusCode, Value) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(body)
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn post(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    send(app, Method::POST, uri, Body::from(body.to_string())).await
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(app, Method::GET, uri, Body::empty()).await
}

/// Registers a client with `nodes` nodes, returns the token and node ids.
async fn login(app: &Router, nodes: usize) -> (String, Vec<String>) {
    let (_, body) = post(
        app,
        "/api/v1/register-master",
        json!({ "key": "secret", "name": "fleet" }),
    )
    .await;
    let token = body["master_token"].as_str().unwrap().to_string();
    let (_, body) = post(
        app,
        "/api/v1/register-nodes",
        json!({ "mastertoken": token, "nodenumber": nodes }),
    )
    .await;
    let nodes = body["nodenames"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n.as_str().unwrap().to_string())
        .collect();
    (token, nodes)
}

#[tokio::test]
async fn info_reports_version() {
    let app = app();
    let (status, body) = get(&app, "/api/v1/info").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version"], 1);
    assert_eq!(body["vendor"], "cascade");
}

#[tokio::test]
async fn registration_returns_token_and_project_summary() {
    let app = app();
    let (status, body) = post(
        &app,
        "/api/v1/register-master",
        json!({ "key": "secret", "name": "my-fleet" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["code"], 0);
    assert_eq!(body["name"], "myfleet");
    assert_eq!(body["master_token"].as_str().unwrap().len(), 64);
    assert_eq!(body["project"]["name"], "demo");
    assert_eq!(body["project"]["algo"], "paraboloid");
    assert_eq!(body["project"]["scheme_in"]["X"], VarKind::Double.typecode());
    assert_eq!(body["project"]["scheme_out"]["E"], VarKind::Double.typecode());
}

#[tokio::test]
async fn wrong_key_is_refused() {
    let app = app();
    let (status, body) = post(&app, "/api/v1/register-master", json!({ "key": "nope" })).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["status"], "error");
    assert_eq!(body["code"], 1);

    let (_, body) = post(&app, "/api/v1/register-master", json!({})).await;
    assert_eq!(body["code"], 1);
}

#[tokio::test]
async fn unknown_token_is_refused() {
    let app = app();
    let (status, body) = post(
        &app,
        "/api/v1/fetch-nodes",
        json!({ "mastertoken": "deadbeef" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], 2);
}

#[tokio::test]
async fn missing_fields_and_malformed_bodies() {
    let app = app();
    let (token, _) = login(&app, 1).await;

    let (status, body) = post(
        &app,
        "/api/v1/register-nodes",
        json!({ "mastertoken": token }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 4);
    assert_eq!(body["msg"], "Missing field 'nodenumber'");

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/fetch-work-for-node",
        Body::from("{not json"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 4);
}

#[tokio::test]
async fn full_sweep_then_exhaustion() {
    let app = app();
    let (token, nodes) = login(&app, 1).await;
    let node = &nodes[0];
    assert_eq!(node, "fleet#1");

    let (_, body) = post(&app, "/api/v1/fetch-nodes", json!({ "mastertoken": token })).await;
    assert_eq!(body["nodenames"], json!(["fleet#1"]));

    for expected in [0.0, 1.0] {
        let (status, body) = post(
            &app,
            "/api/v1/fetch-work-for-node",
            json!({ "mastertoken": token, "nodeid": node }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["task-payload"]["X"], expected);
        assert_eq!(body["level"], 1);

        let (status, body) = post(
            &app,
            "/api/v1/submit-results",
            json!({ "mastertoken": token, "nodeid": node, "payload": { "E": expected * 2.0 } }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["code"], 0);
    }

    let (status, body) = post(
        &app,
        "/api/v1/fetch-work-for-node",
        json!({ "mastertoken": token, "nodeid": node }),
    )
    .await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["code"], 7);

    let (status, body) = get(&app, "/api/v1/sysinfo").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["project"], "demo");
    assert_eq!(body["progress"], 1.0);
    assert_eq!(body["complete"], true);
    assert_eq!(body["clients"][0]["nodes"][0]["status"], "idle");
}

#[tokio::test]
async fn rejected_submission_requeues_the_task() {
    let app = app();
    let (token, nodes) = login(&app, 1).await;
    let node = &nodes[0];

    post(
        &app,
        "/api/v1/fetch-work-for-node",
        json!({ "mastertoken": token, "nodeid": node }),
    )
    .await;
    let (status, body) = post(
        &app,
        "/api/v1/submit-results",
        json!({ "mastertoken": token, "nodeid": node, "payload": { "F": 1.0 } }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], 8);

    // Same combination comes back.
    let (_, body) = post(
        &app,
        "/api/v1/fetch-work-for-node",
        json!({ "mastertoken": token, "nodeid": node }),
    )
    .await;
    assert_eq!(body["task-payload"]["X"], 0.0);
}

#[tokio::test]
async fn node_status_is_enforced() {
    let app = app();
    let (token, nodes) = login(&app, 1).await;
    let node = &nodes[0];

    let (status, body) = post(
        &app,
        "/api/v1/submit-results",
        json!({ "mastertoken": token, "nodeid": node, "payload": { "E": 1.0 } }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], 5);

    let (_, body) = post(
        &app,
        "/api/v1/set-node-status",
        json!({ "mastertoken": token, "nodeid": node, "status": "paused" }),
    )
    .await;
    assert_eq!(body["code"], 0);

    let (_, body) = post(
        &app,
        "/api/v1/fetch-work-for-node",
        json!({ "mastertoken": token, "nodeid": node }),
    )
    .await;
    assert_eq!(body["code"], 5);

    let (status, body) = post(
        &app,
        "/api/v1/drop-task",
        json!({ "mastertoken": token, "nodeid": "fleet#9" }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], 10);
}

#[tokio::test]
async fn unregister_invalidates_the_token() {
    let app = app();
    let (token, _) = login(&app, 2).await;

    let (_, body) = post(
        &app,
        "/api/v1/unregister-master",
        json!({ "mastertoken": token }),
    )
    .await;
    assert_eq!(body["code"], 0);

    let (_, body) = post(&app, "/api/v1/fetch-nodes", json!({ "mastertoken": token })).await;
    assert_eq!(body["code"], 2);
}

#[tokio::test]
async fn oversized_node_request_is_refused() {
    let app = app();
    let (token, _) = login(&app, 1).await;

    let (status, body) = post(
        &app,
        "/api/v1/register-nodes",
        json!({ "mastertoken": token, "nodenumber": 1_000_000_000_000_u64 }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], 6);

    let (_, body) = post(&app, "/api/v1/fetch-nodes", json!({ "mastertoken": token })).await;
    assert_eq!(body["nodenames"], json!(["fleet#1"]));
}
