//! Request handlers for the artifact API. Each one authenticates the
//! caller from headers, extracts what the route needs, and delegates to
//! `LifecycleEngine`; the engine's `ApiError` already implements
//! `IntoResponse` (see `error.rs`), so handlers simply propagate it with
//! `?`, the same shape as typical `AppResult<T>` handlers.

use axum::body::Body;
use axum::extract::{Json, Path, RawQuery, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use http_body_util::BodyExt;
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::http::AppState;
use crate::identity::Identity;
use crate::lifecycle::render_artifact;

fn identity_of(state: &AppState, headers: &HeaderMap) -> Identity {
    Identity::from_headers_with_admin_role(headers, &state.config.admin_role)
}

fn content_type_base(headers: &HeaderMap) -> String {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(';').next())
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

fn parse_query_string(raw: Option<&str>) -> Vec<(String, String)> {
    match raw {
        Some(q) => form_urlencoded::parse(q.as_bytes()).map(|(k, v)| (k.into_owned(), v.into_owned())).collect(),
        None => Vec::new(),
    }
}

fn next_link(type_name: &str, params: &[(String, String)], marker: &str) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (k, v) in params.iter().filter(|(k, _)| k != "marker") {
        serializer.append_pair(k, v);
    }
    serializer.append_pair("marker", marker);
    format!("/artifacts/{type_name}?{}", serializer.finish())
}

pub async fn healthcheck() -> Json<JsonValue> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// `GET /schemas`.
pub async fn list_schemas(State(state): State<AppState>) -> ApiResult<Json<JsonValue>> {
    let schemas = state.engine.list_types()?;
    Ok(Json(serde_json::json!({ "schemas": schemas })))
}

/// `GET /schemas/{type}`.
pub async fn get_schema(State(state): State<AppState>, Path(type_name): Path<String>) -> ApiResult<Json<JsonValue>> {
    let schema = state.engine.schema_of(&type_name)?;
    let mut obj = Map::new();
    obj.insert(type_name, schema);
    Ok(Json(JsonValue::Object(obj)))
}

/// `POST /artifacts/{type}`.
pub async fn create_artifact(
    State(state): State<AppState>,
    Path(type_name): Path<String>,
    headers: HeaderMap,
    Json(body): Json<JsonValue>,
) -> ApiResult<(StatusCode, Json<JsonValue>)> {
    let identity = identity_of(&state, &headers);
    let (descriptor, record) = state.engine.create_artifact(&identity, &type_name, &body).await?;
    Ok((StatusCode::CREATED, Json(render_artifact(&descriptor, &record))))
}

/// `GET /artifacts/{type}`.
pub async fn list_artifacts(
    State(state): State<AppState>,
    Path(type_name): Path<String>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> ApiResult<Json<JsonValue>> {
    let identity = identity_of(&state, &headers);
    let params = parse_query_string(query.as_deref());
    let (descriptor, page) = state.engine.list_artifacts(&identity, &type_name, &params).await?;

    let rows: Vec<JsonValue> = page.rows.iter().map(|r| render_artifact(&descriptor, r)).collect();
    let mut obj = Map::new();
    obj.insert(type_name.clone(), JsonValue::Array(rows));
    obj.insert("first".to_string(), JsonValue::String(format!("/artifacts/{type_name}")));
    if let Some(marker) = &page.next_marker {
        obj.insert("next".to_string(), JsonValue::String(next_link(&type_name, &params, marker)));
    }
    obj.insert("schema".to_string(), JsonValue::String(format!("/schemas/{type_name}")));
    Ok(Json(JsonValue::Object(obj)))
}

/// `GET /artifacts/{type}/{id}`.
pub async fn get_artifact(
    State(state): State<AppState>,
    Path((type_name, id)): Path<(String, Uuid)>,
    headers: HeaderMap,
) -> ApiResult<Json<JsonValue>> {
    let identity = identity_of(&state, &headers);
    let (descriptor, record) = state.engine.get_artifact(&identity, &type_name, id).await?;
    Ok(Json(render_artifact(&descriptor, &record)))
}

/// `PATCH /artifacts/{type}/{id}`, `application/json-patch+json` only.
pub async fn patch_artifact(
    State(state): State<AppState>,
    Path((type_name, id)): Path<(String, Uuid)>,
    headers: HeaderMap,
    body: Body,
) -> ApiResult<Json<JsonValue>> {
    let content_type = content_type_base(&headers);
    if content_type != "application/json-patch+json" {
        return Err(ApiError::UnsupportedMediaType(format!(
            "patch requires content-type 'application/json-patch+json', got '{content_type}'"
        )));
    }
    let bytes = body.collect().await.map_err(|e| ApiError::bad_value(format!("failed to read body: {e}")))?.to_bytes();
    let json: JsonValue =
        serde_json::from_slice(&bytes).map_err(|e| ApiError::bad_value(format!("invalid JSON body: {e}")))?;

    let identity = identity_of(&state, &headers);
    let (descriptor, record) = state.engine.patch_artifact(&identity, &type_name, id, &json).await?;
    Ok(Json(render_artifact(&descriptor, &record)))
}

/// `DELETE /artifacts/{type}/{id}`.
pub async fn delete_artifact(
    State(state): State<AppState>,
    Path((type_name, id)): Path<(String, Uuid)>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    let identity = identity_of(&state, &headers);
    state.engine.delete_artifact(&identity, &type_name, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /artifacts/{type}/{id}/tags`.
pub async fn get_tags(
    State(state): State<AppState>,
    Path((type_name, id)): Path<(String, Uuid)>,
    headers: HeaderMap,
) -> ApiResult<Json<JsonValue>> {
    let identity = identity_of(&state, &headers);
    let (_, record) = state.engine.get_artifact(&identity, &type_name, id).await?;
    Ok(Json(JsonValue::Array(record.tags.iter().map(|t| JsonValue::String(t.clone())).collect())))
}

/// `PUT /artifacts/{type}/{id}/tags`.
pub async fn replace_tags(
    State(state): State<AppState>,
    Path((type_name, id)): Path<(String, Uuid)>,
    headers: HeaderMap,
    Json(body): Json<JsonValue>,
) -> ApiResult<Json<JsonValue>> {
    let identity = identity_of(&state, &headers);
    let (descriptor, record) = state.engine.replace_tags(&identity, &type_name, id, &body).await?;
    Ok(Json(render_artifact(&descriptor, &record)))
}

/// `DELETE /artifacts/{type}/{id}/tags`.
pub async fn clear_tags(
    State(state): State<AppState>,
    Path((type_name, id)): Path<(String, Uuid)>,
    headers: HeaderMap,
) -> ApiResult<Json<JsonValue>> {
    let identity = identity_of(&state, &headers);
    let (descriptor, record) = state.engine.clear_tags(&identity, &type_name, id).await?;
    Ok(Json(render_artifact(&descriptor, &record)))
}

/// `PUT /artifacts/{type}/{id}/{blob_path}`. Distinguishes a raw byte
/// upload (`application/octet-stream`, streamed straight into the blob
/// adapter) from external-location registration (any `+json` body of
/// the form `{"url": "..."}`) by content-type.
pub async fn upload_blob(
    State(state): State<AppState>,
    Path((type_name, id, blob_path)): Path<(String, Uuid, String)>,
    headers: HeaderMap,
    body: Body,
) -> ApiResult<Json<JsonValue>> {
    let identity = identity_of(&state, &headers);
    let content_type = content_type_base(&headers);

    let (descriptor, record) = if content_type.ends_with("+json") || content_type == "application/json" {
        let bytes =
            body.collect().await.map_err(|e| ApiError::bad_value(format!("failed to read body: {e}")))?.to_bytes();
        let json: JsonValue =
            serde_json::from_slice(&bytes).map_err(|e| ApiError::bad_value(format!("invalid JSON body: {e}")))?;
        let url = json
            .get("url")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| ApiError::bad_value("external location body must be {\"url\": \"...\"}"))?;
        state.engine.register_external_blob(&identity, &type_name, id, &blob_path, url).await?
    } else if content_type == "application/octet-stream" {
        let declared_content_type =
            headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()).map(|s| s.to_string());
        let stream = body.into_data_stream();
        state.engine.upload_blob(&identity, &type_name, id, &blob_path, stream, declared_content_type).await?
    } else {
        return Err(ApiError::UnsupportedMediaType(format!(
            "unsupported content-type '{content_type}' for blob upload"
        )));
    };

    Ok(Json(render_artifact(&descriptor, &record)))
}

/// `GET /artifacts/{type}/{id}/{blob_path}`.
pub async fn download_blob(
    State(state): State<AppState>,
    Path((type_name, id, blob_path)): Path<(String, Uuid, String)>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let identity = identity_of(&state, &headers);
    let (bytes, slot) = state.engine.download_blob(&identity, &type_name, id, &blob_path).await?;

    let mut response = Body::from(bytes).into_response();
    let content_type = slot.content_type.as_deref().unwrap_or("application/octet-stream");
    if let Ok(value) = HeaderValue::from_str(content_type) {
        response.headers_mut().insert(CONTENT_TYPE, value);
    }
    Ok(response)
}
