use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{TimeZone, Utc};
use pointcount::tracker::{AsOfQuery, IssueTrackerClient, JiraClient, TrackerError};
use pointcount::{Credentials, FieldType, PointCountConfig};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

// base64("ada@example.com:token-1")
const EXPECTED_AUTH: &str = "Basic YWRhQGV4YW1wbGUuY29tOnRva2VuLTE=";

#[derive(Clone, Default)]
struct StubState {
    searched_jql: Arc<Mutex<Vec<String>>>,
    time_zone: Arc<Mutex<Option<String>>>,
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == EXPECTED_AUTH)
        .unwrap_or(false)
}

async fn myself(State(state): State<StubState>, headers: HeaderMap) -> Result<Json<Value>, StatusCode> {
    if !authorized(&headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    let mut profile = json!({ "accountId": "5b10a2844c20165700ede21g", "emailAddress": "ada@example.com" });
    if let Some(zone) = state.time_zone.lock().unwrap().clone() {
        profile["timeZone"] = json!(zone);
    }
    Ok(Json(profile))
}

async fn parse_jql(headers: HeaderMap, Json(body): Json<Value>) -> Result<Json<Value>, StatusCode> {
    if !authorized(&headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    let query = body["queries"][0].as_str().unwrap_or_default().to_string();
    let errors = if query.contains("projekt") {
        json!([
            "Field 'projekt' does not exist or you do not have permission to view it.",
            "Expecting operator but got 'X'."
        ])
    } else {
        json!([])
    };
    Ok(Json(json!({ "queries": [{ "query": query, "errors": errors }] })))
}

async fn fields(headers: HeaderMap) -> Result<Json<Value>, StatusCode> {
    if !authorized(&headers) {
        return Err(StatusCode::FORBIDDEN);
    }
    Ok(Json(json!([
        { "id": "customfield_10016", "name": "Story Points", "schema": { "type": "number" } },
        { "id": "assignee", "name": "Assignee", "schema": { "type": "user" } },
        { "id": "issuekey", "name": "Key" }
    ])))
}

async fn search(
    State(state): State<StubState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, (StatusCode, String)> {
    if !authorized(&headers) {
        return Err((StatusCode::UNAUTHORIZED, String::new()));
    }
    let jql = body["jql"].as_str().unwrap_or_default().to_string();
    state.searched_jql.lock().unwrap().push(jql.clone());
    if jql.contains("explode") {
        return Err((StatusCode::INTERNAL_SERVER_ERROR, "search backend down".to_string()));
    }

    let all = vec![
        json!({ "key": "X-1", "fields": { "customfield_10016": 3 } }),
        json!({ "key": "X-2", "fields": { "customfield_10016": 5.5 } }),
        json!({ "key": "X-3", "fields": { "customfield_10016": null } }),
        json!({ "key": "X-4", "fields": {} }),
        json!({ "key": "X-5", "fields": { "customfield_10016": 8 } }),
    ];
    let start = body["startAt"].as_u64().unwrap_or(0) as usize;
    let max = body["maxResults"].as_u64().unwrap_or(50) as usize;
    let page: Vec<Value> = all.iter().skip(start).take(max).cloned().collect();

    Ok(Json(json!({
        "startAt": start,
        "maxResults": max,
        "total": all.len(),
        "issues": page
    })))
}

async fn start_stub() -> (String, StubState) {
    let state = StubState::default();
    let app = Router::new()
        .route("/rest/api/2/myself", get(myself))
        .route("/rest/api/2/jql/parse", post(parse_jql))
        .route("/rest/api/2/field", get(fields))
        .route("/rest/api/2/search", post(search))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), state)
}

fn client(base_url: &str) -> JiraClient {
    let config = PointCountConfig {
        tracker_base_url: base_url.to_string(),
        search_page_size: 2,
        http_timeout_seconds: 5,
        ..PointCountConfig::default()
    };
    JiraClient::new(&config).unwrap()
}

fn credentials() -> Credentials {
    Credentials::new("ada@example.com", "token-1", "acme")
}

#[tokio::test]
async fn test_authenticate_against_stub() {
    let (base_url, _) = start_stub().await;
    let client = client(&base_url);

    let session = client.authenticate(&credentials()).await.unwrap();
    assert!(session.is_valid());
    assert_eq!(session.base_url(), base_url);

    let err = client
        .authenticate(&Credentials::new("ada@example.com", "wrong", "acme"))
        .await
        .unwrap_err();
    assert!(matches!(err, TrackerError::Unauthorized(_)));
}

#[tokio::test]
async fn test_query_validation_against_stub() {
    let (base_url, _) = start_stub().await;
    let client = client(&base_url);
    let session = client.authenticate(&credentials()).await.unwrap();

    let ok = client.validate_query_syntax(&session, "project = X").await.unwrap();
    assert!(ok.is_empty());

    let errors = client.validate_query_syntax(&session, "projekt X").await.unwrap();
    assert_eq!(errors.len(), 2);
    assert!(errors[0].starts_with("Field 'projekt'"));
}

#[tokio::test]
async fn test_field_resolution_against_stub() {
    let (base_url, _) = start_stub().await;
    let client = client(&base_url);
    let session = client.authenticate(&credentials()).await.unwrap();

    let by_name = client.resolve_field(&session, "Story Points").await.unwrap().unwrap();
    assert_eq!(by_name.id, "customfield_10016");
    assert_eq!(by_name.declared_type, FieldType::Number);

    let assignee = client.resolve_field(&session, "assignee").await.unwrap().unwrap();
    assert_eq!(assignee.declared_type, FieldType::User);

    let no_schema = client.resolve_field(&session, "issuekey").await.unwrap().unwrap();
    assert!(!no_schema.is_usable());

    assert!(client.resolve_field(&session, "nope").await.unwrap().is_none());
}

#[tokio::test]
async fn test_search_paginates_and_bounds_query() {
    let (base_url, state) = start_stub().await;
    let client = client(&base_url);
    let session = client.authenticate(&credentials()).await.unwrap();
    let as_of = Utc.with_ymd_and_hms(2024, 5, 13, 0, 0, 0).unwrap();

    let result = client
        .search_issues_as_of(&session, &AsOfQuery::new("project = X", as_of), "customfield_10016")
        .await
        .unwrap();

    assert_eq!(result.issue_count(), 5);
    assert_eq!(result.total(), 16.5);

    let searched = state.searched_jql.lock().unwrap().clone();
    // five issues at two per page
    assert_eq!(searched.len(), 3);
    assert!(searched
        .iter()
        .all(|jql| jql == "(project = X) AND created <= \"2024-05-13 00:00\""));
}

#[tokio::test]
async fn test_search_server_error_and_revoked_session() {
    let (base_url, _) = start_stub().await;
    let client = client(&base_url);
    let session = client.authenticate(&credentials()).await.unwrap();
    let as_of = Utc.with_ymd_and_hms(2024, 5, 13, 0, 0, 0).unwrap();

    let err = client
        .search_issues_as_of(&session, &AsOfQuery::new("labels = explode", as_of), "customfield_10016")
        .await
        .unwrap_err();
    assert!(matches!(err, TrackerError::Status { status: 500, .. }));
    assert!(session.is_valid());

    // a session built from bad credentials is rejected and marked invalid
    let forged = pointcount::tracker::AuthenticatedSession::new(
        &Credentials::new("ada@example.com", "forged", "acme"),
        base_url.clone(),
    );
    let err = client.resolve_field(&forged, "assignee").await.unwrap_err();
    assert!(matches!(err, TrackerError::Unauthorized(_)));
    assert!(!forged.is_valid());
}

#[tokio::test]
async fn test_unreachable_tracker_is_network_error() {
    // nothing listens on the discard port
    let client = client("http://127.0.0.1:9");
    let err = client.authenticate(&credentials()).await.unwrap_err();
    assert!(matches!(err, TrackerError::Network(_)));
}

#[tokio::test]
async fn test_search_bound_uses_profile_time_zone() {
    let (base_url, state) = start_stub().await;
    *state.time_zone.lock().unwrap() = Some("America/Los_Angeles".to_string());
    let client = client(&base_url);

    let session = client.authenticate(&credentials()).await.unwrap();
    assert_eq!(session.time_zone(), chrono_tz::America::Los_Angeles);

    // midnight UTC is 17:00 the previous day in Pacific daylight time
    let as_of = Utc.with_ymd_and_hms(2024, 5, 13, 0, 0, 0).unwrap();
    client
        .search_issues_as_of(&session, &AsOfQuery::new("project = X", as_of), "customfield_10016")
        .await
        .unwrap();

    let searched = state.searched_jql.lock().unwrap().clone();
    assert!(!searched.is_empty());
    assert!(searched
        .iter()
        .all(|jql| jql == "(project = X) AND created <= \"2024-05-12 17:00\""));
}
