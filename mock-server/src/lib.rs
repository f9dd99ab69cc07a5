//! In-memory stand-in for the BaaS backend, mounted under `/1/{TENANT}`.
//!
//! Covers the endpoints the client core talks to: login/logout, JSON
//! objects, files and custom API gateway calls. Every request must carry the
//! app id/key headers; a session header, when present, must name a live
//! session.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};

use axum::{
    body::Bytes,
    extract::{Path, Query, Request, State},
    http::{HeaderMap, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{any, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

pub const TENANT: &str = "tenant";
pub const APP_ID: &str = "app-id";
pub const APP_KEY: &str = "app-key";
pub const USERNAME: &str = "alice";
pub const EMAIL: &str = "alice@example.com";
pub const PASSWORD: &str = "secret";
pub const USER_ID: &str = "user-1";
pub const SESSION_LIFETIME_SECS: i64 = 3600;
/// Downloads from this bucket declare ten more bytes than they send.
pub const TRUNCATED_BUCKET: &str = "truncated";

const HEADER_APP_ID: &str = "x-application-id";
const HEADER_APP_KEY: &str = "x-application-key";
const HEADER_SESSION_TOKEN: &str = "x-session-token";
const HEADER_ACL: &str = "x-acl";

struct StoredFile {
    metadata: Map<String, Value>,
    data: Vec<u8>,
}

#[derive(Default)]
pub struct Store {
    /// Session token to expiry (epoch seconds).
    sessions: HashMap<String, i64>,
    objects: HashMap<String, BTreeMap<String, Map<String, Value>>>,
    files: HashMap<String, BTreeMap<String, StoredFile>>,
}

pub type Db = Arc<RwLock<Store>>;

type ApiError = (StatusCode, Json<Value>);
type Params = Query<HashMap<String, String>>;

fn error(status: StatusCode, message: &str) -> ApiError {
    (status, Json(json!({ "error": message })))
}

fn not_found() -> ApiError {
    error(StatusCode::NOT_FOUND, "Not found")
}

fn now_epoch() -> i64 {
    jiff::Timestamp::now().as_second()
}

fn now_string() -> String {
    jiff::Timestamp::now().to_string()
}

fn new_etag() -> String {
    Uuid::new_v4().to_string()
}

fn flag(params: &HashMap<String, String>, key: &str) -> bool {
    params.get(key).is_some_and(|value| value == "1" || value == "true")
}

pub fn app() -> Router {
    let db: Db = Arc::default();
    let api = Router::new()
        .route("/login", post(login).delete(logout))
        .route("/objects/{bucket}", get(query_objects).post(create_object))
        .route(
            "/objects/{bucket}/{id}",
            get(get_object).put(update_object).delete(delete_object),
        )
        .route("/files/{bucket}", get(list_files))
        .route(
            "/files/{bucket}/{name}",
            get(download_file)
                .post(upload_new_file)
                .put(upload_update_file)
                .delete(delete_file),
        )
        .route("/api/{name}", any(custom_api))
        .route("/api/{name}/{*rest}", any(custom_api))
        .route_layer(middleware::from_fn_with_state(db.clone(), check_request))
        .with_state(db);
    Router::new().nest(&format!("/1/{TENANT}"), api)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

/// Owned header value; nothing borrowed from the request may live across an
/// await in the middleware.
fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
}

async fn check_request(State(db): State<Db>, request: Request, next: Next) -> Response {
    let (app_id, app_key, session) = {
        let headers = request.headers();
        (
            header_value(headers, HEADER_APP_ID),
            header_value(headers, HEADER_APP_KEY),
            header_value(headers, HEADER_SESSION_TOKEN),
        )
    };
    if app_id.as_deref() != Some(APP_ID) || app_key.as_deref() != Some(APP_KEY) {
        return error(StatusCode::UNAUTHORIZED, "Invalid application").into_response();
    }
    if let Some(token) = session {
        if !session_is_live(&db, &token).await {
            return error(StatusCode::UNAUTHORIZED, "Invalid session token").into_response();
        }
    }
    next.run(request).await
}

async fn session_is_live(db: &Db, token: &str) -> bool {
    db.read()
        .await
        .sessions
        .get(token)
        .is_some_and(|expire| *expire > now_epoch())
}

// --- users ---

fn user_json() -> Map<String, Value> {
    let Value::Object(user) = json!({
        "_id": USER_ID,
        "username": USERNAME,
        "email": EMAIL,
        "options": { "lang": "en" },
        "groups": ["staff"],
        "createdAt": "2017-03-07T08:49:58.000Z",
        "updatedAt": "2017-03-07T08:49:58.000Z",
    }) else {
        unreachable!("literal is an object")
    };
    user
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: String,
}

async fn login(State(db): State<Db>, Json(input): Json<LoginRequest>) -> Result<Json<Value>, ApiError> {
    let account_ok = input.username.as_deref() == Some(USERNAME) || input.email.as_deref() == Some(EMAIL);
    if !account_ok || input.password != PASSWORD {
        return Err(error(StatusCode::UNAUTHORIZED, "Unauthorized"));
    }

    let token = Uuid::new_v4().to_string();
    let expire = now_epoch() + SESSION_LIFETIME_SECS;
    db.write().await.sessions.insert(token.clone(), expire);

    let mut body = user_json();
    body.insert("sessionToken".to_string(), token.into());
    body.insert("expire".to_string(), expire.into());
    Ok(Json(Value::Object(body)))
}

async fn logout(State(db): State<Db>, headers: HeaderMap) -> Result<Json<Value>, ApiError> {
    let token = headers
        .get(HEADER_SESSION_TOKEN)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| error(StatusCode::UNAUTHORIZED, "No session token"))?;
    db.write().await.sessions.remove(token);
    Ok(Json(Value::Object(user_json())))
}

// --- objects ---

fn matches_where(object: &Map<String, Value>, conditions: &Map<String, Value>) -> bool {
    conditions.iter().all(|(key, value)| object.get(key) == Some(value))
}

async fn query_objects(
    State(db): State<Db>,
    Path(bucket): Path<String>,
    Query(params): Params,
) -> Result<Json<Value>, ApiError> {
    let conditions = match params.get("where") {
        Some(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => map,
            _ => return Err(error(StatusCode::BAD_REQUEST, "Invalid where")),
        },
        None => Map::new(),
    };
    let include_deleted = flag(&params, "deleteMark");
    let limit = params.get("limit").and_then(|l| l.parse::<usize>().ok());

    let store = db.read().await;
    let matched: Vec<Value> = store
        .objects
        .get(&bucket)
        .into_iter()
        .flat_map(|objects| objects.values())
        .filter(|object| include_deleted || object.get("_deleted") != Some(&Value::Bool(true)))
        .filter(|object| matches_where(object, &conditions))
        .map(|object| Value::Object(object.clone()))
        .collect();

    let total = matched.len();
    let results: Vec<Value> = matched.into_iter().take(limit.unwrap_or(usize::MAX)).collect();
    let mut body = json!({ "results": results });
    if flag(&params, "count") {
        body["count"] = total.into();
    }
    Ok(Json(body))
}

async fn create_object(
    State(db): State<Db>,
    Path(bucket): Path<String>,
    Json(input): Json<Value>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let Value::Object(mut object) = input else {
        return Err(error(StatusCode::BAD_REQUEST, "Body must be an object"));
    };
    let id = Uuid::new_v4().to_string();
    let now = now_string();
    object.insert("_id".to_string(), id.clone().into());
    object.insert("etag".to_string(), new_etag().into());
    object.insert("createdAt".to_string(), now.clone().into());
    object.insert("updatedAt".to_string(), now.into());

    db.write()
        .await
        .objects
        .entry(bucket)
        .or_default()
        .insert(id, object.clone());
    Ok((StatusCode::CREATED, Json(Value::Object(object))))
}

async fn get_object(
    State(db): State<Db>,
    Path((bucket, id)): Path<(String, String)>,
    Query(params): Params,
) -> Result<Json<Value>, ApiError> {
    let store = db.read().await;
    let object = store
        .objects
        .get(&bucket)
        .and_then(|objects| objects.get(&id))
        .ok_or_else(not_found)?;
    if object.get("_deleted") == Some(&Value::Bool(true)) && !flag(&params, "deleteMark") {
        return Err(not_found());
    }
    Ok(Json(Value::Object(object.clone())))
}

fn check_etag(params: &HashMap<String, String>, key: &str, current: Option<&Value>) -> Result<(), ApiError> {
    match params.get(key) {
        Some(expected) if current.and_then(Value::as_str) != Some(expected.as_str()) => {
            Err(error(StatusCode::CONFLICT, "ETag mismatch"))
        }
        _ => Ok(()),
    }
}

async fn update_object(
    State(db): State<Db>,
    Path((bucket, id)): Path<(String, String)>,
    Query(params): Params,
    Json(input): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let Value::Object(input) = input else {
        return Err(error(StatusCode::BAD_REQUEST, "Body must be an object"));
    };

    let mut store = db.write().await;
    let object = store
        .objects
        .get_mut(&bucket)
        .and_then(|objects| objects.get_mut(&id))
        .ok_or_else(not_found)?;
    check_etag(&params, "etag", object.get("etag"))?;

    let mut updated = match input.get("$full_update").cloned() {
        Some(Value::Object(mut replacement)) => {
            for key in ["_id", "createdAt"] {
                if let Some(value) = object.get(key) {
                    replacement.insert(key.to_string(), value.clone());
                }
            }
            replacement
        }
        Some(_) => return Err(error(StatusCode::BAD_REQUEST, "Invalid $full_update")),
        None => {
            let mut merged = object.clone();
            merged.extend(input);
            merged
        }
    };
    updated.insert("etag".to_string(), new_etag().into());
    updated.insert("updatedAt".to_string(), now_string().into());
    *object = updated;
    Ok(Json(Value::Object(object.clone())))
}

async fn delete_object(
    State(db): State<Db>,
    Path((bucket, id)): Path<(String, String)>,
    Query(params): Params,
) -> Result<Json<Value>, ApiError> {
    let mut store = db.write().await;
    let objects = store.objects.get_mut(&bucket).ok_or_else(not_found)?;
    let object = objects.get_mut(&id).ok_or_else(not_found)?;
    check_etag(&params, "etag", object.get("etag"))?;

    if flag(&params, "deleteMark") {
        object.insert("_deleted".to_string(), true.into());
        object.insert("etag".to_string(), new_etag().into());
        object.insert("updatedAt".to_string(), now_string().into());
        return Ok(Json(Value::Object(object.clone())));
    }
    objects.remove(&id);
    Ok(Json(json!({ "_id": id })))
}

// --- files ---

fn content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

async fn list_files(
    State(db): State<Db>,
    Path(bucket): Path<String>,
    Query(params): Params,
) -> Json<Value> {
    let include_deleted = flag(&params, "deleteMark");
    let published_only = flag(&params, "published");
    let store = db.read().await;
    let results: Vec<Value> = store
        .files
        .get(&bucket)
        .into_iter()
        .flat_map(|files| files.values())
        .map(|file| &file.metadata)
        .filter(|meta| include_deleted || meta.get("_deleted") != Some(&Value::Bool(true)))
        .filter(|meta| !published_only || meta.get("publicUrl").and_then(Value::as_str).is_some_and(|u| !u.is_empty()))
        .map(|meta| Value::Object(meta.clone()))
        .collect();
    Json(json!({ "results": results }))
}

async fn download_file(
    State(db): State<Db>,
    Path((bucket, name)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let store = db.read().await;
    let file = store
        .files
        .get(&bucket)
        .and_then(|files| files.get(&name))
        .filter(|file| file.metadata.get("_deleted") != Some(&Value::Bool(true)))
        .ok_or_else(not_found)?;

    let declared = if bucket == TRUNCATED_BUCKET {
        file.data.len() + 10
    } else {
        file.data.len()
    };
    let content_type = file
        .metadata
        .get("contentType")
        .and_then(Value::as_str)
        .unwrap_or("application/octet-stream")
        .to_string();
    Ok((
        StatusCode::OK,
        [
            ("Content-Type", content_type),
            ("X-Content-Length", declared.to_string()),
        ],
        file.data.clone(),
    )
        .into_response())
}

async fn upload_new_file(
    State(db): State<Db>,
    Path((bucket, name)): Path<(String, String)>,
    Query(params): Params,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let content_type = content_type(&headers).ok_or_else(|| error(StatusCode::BAD_REQUEST, "No Content-Type"))?;
    let acl = match headers.get(HEADER_ACL).and_then(|v| v.to_str().ok()) {
        Some(text) => serde_json::from_str::<Value>(text)
            .ok()
            .filter(Value::is_object)
            .ok_or_else(|| error(StatusCode::BAD_REQUEST, "Invalid X-ACL"))?,
        None => json!({ "owner": USER_ID }),
    };

    let mut store = db.write().await;
    let files = store.files.entry(bucket).or_default();
    if files.contains_key(&name) {
        return Err(error(StatusCode::CONFLICT, "Duplicate file name"));
    }

    let now = now_string();
    let cache_disabled = flag(&params, "cacheDisabled");
    let Value::Object(metadata) = json!({
        "filename": name,
        "contentType": content_type,
        "length": body.len(),
        "createdAt": now,
        "updatedAt": now,
        "metaETag": new_etag(),
        "fileETag": new_etag(),
        "cacheDisabled": cache_disabled,
        "publicUrl": "",
        "ACL": acl,
    }) else {
        unreachable!("literal is an object")
    };
    files.insert(
        name,
        StoredFile {
            metadata: metadata.clone(),
            data: body.to_vec(),
        },
    );
    Ok((StatusCode::CREATED, Json(Value::Object(metadata))))
}

async fn upload_update_file(
    State(db): State<Db>,
    Path((bucket, name)): Path<(String, String)>,
    Query(params): Params,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let mut store = db.write().await;
    let file = store
        .files
        .get_mut(&bucket)
        .and_then(|files| files.get_mut(&name))
        .ok_or_else(not_found)?;
    check_etag(&params, "metaETag", file.metadata.get("metaETag"))?;
    check_etag(&params, "fileETag", file.metadata.get("fileETag"))?;

    if let Some(content_type) = content_type(&headers) {
        file.metadata.insert("contentType".to_string(), content_type.into());
    }
    file.metadata.insert("length".to_string(), body.len().into());
    file.metadata.insert("fileETag".to_string(), new_etag().into());
    file.metadata.insert("updatedAt".to_string(), now_string().into());
    file.data = body.to_vec();
    Ok(Json(Value::Object(file.metadata.clone())))
}

async fn delete_file(
    State(db): State<Db>,
    Path((bucket, name)): Path<(String, String)>,
    Query(params): Params,
) -> Result<Json<Value>, ApiError> {
    let mut store = db.write().await;
    let files = store.files.get_mut(&bucket).ok_or_else(not_found)?;
    let file = files.get_mut(&name).ok_or_else(not_found)?;
    check_etag(&params, "metaETag", file.metadata.get("metaETag"))?;
    check_etag(&params, "fileETag", file.metadata.get("fileETag"))?;

    if flag(&params, "deleteMark") {
        file.metadata.insert("_deleted".to_string(), true.into());
        file.metadata.insert("metaETag".to_string(), new_etag().into());
        return Ok(Json(Value::Object(file.metadata.clone())));
    }
    let removed = files.remove(&name).map(|file| file.metadata).unwrap_or_default();
    Ok(Json(Value::Object(removed)))
}

// --- custom API ---

/// Echoes the call back. Two names behave specially: `sleep` waits
/// `?secs=N` seconds first, `fail` answers with `?status=N`.
async fn custom_api(
    method: Method,
    Path(path): Path<HashMap<String, String>>,
    Query(params): Params,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let name = path.get("name").cloned().unwrap_or_default();
    let subpath = path.get("rest").map(|rest| format!("/{rest}")).unwrap_or_default();

    match name.as_str() {
        "sleep" => {
            let secs = params.get("secs").and_then(|s| s.parse().ok()).unwrap_or(1);
            tokio::time::sleep(Duration::from_secs(secs)).await;
        }
        "fail" => {
            let status = params
                .get("status")
                .and_then(|s| s.parse::<u16>().ok())
                .and_then(|s| StatusCode::from_u16(s).ok())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            return error(status, "Requested failure").into_response();
        }
        _ => {}
    }

    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).unwrap_or("");
    Json(json!({
        "api": name,
        "subpath": subpath,
        "method": method.as_str(),
        "query": params,
        "contentType": header("content-type"),
        "userAgent": header("user-agent"),
        "body": String::from_utf8_lossy(&body),
    }))
    .into_response()
}
