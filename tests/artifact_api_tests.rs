//! End-to-end HTTP surface tests, in the style of
//! `persist_schema_rest_tests.rs`: build a fresh in-memory router
//! per test, drive it with `tower::ServiceExt::oneshot`, decode JSON
//! bodies with a small helper.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use glaredb::config::Config;
use glaredb::lifecycle::LifecycleEngine;
use glaredb::{build_router, AppState};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

fn test_router() -> Router {
    let engine = LifecycleEngine::new(
        Arc::new(glaredb::types::TypeRegistry::bootstrap()),
        glaredb::store::Store::new(),
        glaredb::blob::InMemoryBlobStore::new(),
        glaredb::notify::NotificationEmitter::channel().0,
        1024 * 1024,
    );
    build_router(AppState { engine: Arc::new(engine), config: Arc::new(Config::default()) })
}

fn owner_headers(tenant: &str, user: &str) -> Vec<(&'static str, String)> {
    vec![
        ("x-identity-status", "Confirmed".to_string()),
        ("x-user-id", user.to_string()),
        ("x-tenant-id", tenant.to_string()),
        ("x-roles", "member".to_string()),
    ]
}

fn admin_headers() -> Vec<(&'static str, String)> {
    vec![
        ("x-identity-status", "Confirmed".to_string()),
        ("x-user-id", "root".to_string()),
        ("x-tenant-id", "ops".to_string()),
        ("x-roles", "admin".to_string()),
    ]
}

fn request(method: Method, uri: &str, content_type: Option<&str>, ident: &[(&str, String)], body: Body) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(ct) = content_type {
        builder = builder.header("content-type", ct);
    }
    for (k, v) in ident {
        builder = builder.header(*k, v);
    }
    builder.body(body).expect("request")
}

fn json_request(method: Method, uri: &str, ident: &[(&str, String)], body: Value) -> Request<Body> {
    request(method, uri, Some("application/json"), ident, Body::from(body.to_string()))
}

async fn decode_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("response body");
    serde_json::from_slice(&bytes).expect("json body")
}

async fn create(router: &Router, ident: &[(&str, String)], body: Value) -> Value {
    let response = router
        .clone()
        .oneshot(json_request(Method::POST, "/artifacts/sample_artifact", ident, body))
        .await
        .expect("create response");
    assert_eq!(response.status(), StatusCode::CREATED);
    decode_json(response).await
}

#[tokio::test]
async fn full_lifecycle_create_upload_activate_deactivate_download_delete() {
    let router = test_router();
    let alice = owner_headers("tenant-a", "alice");
    let admin = admin_headers();

    let created = create(&router, &alice, json!({ "name": "widget", "version": "1.0" })).await;
    let id = created["id"].as_str().unwrap().to_string();

    // Upload a byte-stream blob.
    let upload = router
        .clone()
        .oneshot(request(
            Method::PUT,
            &format!("/artifacts/sample_artifact/{id}/blob"),
            Some("application/octet-stream"),
            &alice,
            Body::from(vec![1u8, 2, 3, 4]),
        ))
        .await
        .expect("upload response");
    assert_eq!(upload.status(), StatusCode::OK);

    // `string_required` must be set before activation succeeds.
    let patched = router
        .clone()
        .oneshot(request(
            Method::PATCH,
            &format!("/artifacts/sample_artifact/{id}"),
            Some("application/json-patch+json"),
            &alice,
            Body::from(json!([{"op": "add", "path": "/string_required", "value": "set"}]).to_string()),
        ))
        .await
        .expect("patch response");
    assert_eq!(patched.status(), StatusCode::OK);

    let activate = router
        .clone()
        .oneshot(request(
            Method::PATCH,
            &format!("/artifacts/sample_artifact/{id}"),
            Some("application/json-patch+json"),
            &alice,
            Body::from(json!([{"op": "replace", "path": "/status", "value": "active"}]).to_string()),
        ))
        .await
        .expect("activate response");
    assert_eq!(activate.status(), StatusCode::OK);
    let activated = decode_json(activate).await;
    assert_eq!(activated["status"], "active");

    // Only an admin may deactivate.
    let deactivate_denied = router
        .clone()
        .oneshot(request(
            Method::PATCH,
            &format!("/artifacts/sample_artifact/{id}"),
            Some("application/json-patch+json"),
            &alice,
            Body::from(json!([{"op": "replace", "path": "/status", "value": "deactivated"}]).to_string()),
        ))
        .await
        .expect("deactivate denied response");
    assert_eq!(deactivate_denied.status(), StatusCode::FORBIDDEN);

    let deactivate = router
        .clone()
        .oneshot(request(
            Method::PATCH,
            &format!("/artifacts/sample_artifact/{id}"),
            Some("application/json-patch+json"),
            &admin,
            Body::from(json!([{"op": "replace", "path": "/status", "value": "deactivated"}]).to_string()),
        ))
        .await
        .expect("deactivate response");
    assert_eq!(deactivate.status(), StatusCode::OK);

    // Blob downloads are admin-only while deactivated, even for the owner.
    let bob = owner_headers("tenant-b", "bob");
    let denied = router
        .clone()
        .oneshot(request(Method::GET, &format!("/artifacts/sample_artifact/{id}/blob"), None, &bob, Body::empty()))
        .await
        .expect("foreign download response");
    assert_eq!(denied.status(), StatusCode::NOT_FOUND);

    let owner_denied = router
        .clone()
        .oneshot(request(Method::GET, &format!("/artifacts/sample_artifact/{id}/blob"), None, &alice, Body::empty()))
        .await
        .expect("owner download while deactivated response");
    assert_eq!(owner_denied.status(), StatusCode::FORBIDDEN);

    let allowed = router
        .clone()
        .oneshot(request(Method::GET, &format!("/artifacts/sample_artifact/{id}/blob"), None, &admin, Body::empty()))
        .await
        .expect("admin download response");
    assert_eq!(allowed.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(allowed.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], &[1, 2, 3, 4]);

    // Owner may delete their own artifact even while deactivated.
    let delete = router
        .clone()
        .oneshot(request(Method::DELETE, &format!("/artifacts/sample_artifact/{id}"), None, &alice, Body::empty()))
        .await
        .expect("delete response");
    assert_eq!(delete.status(), StatusCode::NO_CONTENT);

    let gone = router
        .clone()
        .oneshot(request(Method::GET, &format!("/artifacts/sample_artifact/{id}"), None, &alice, Body::empty()))
        .await
        .expect("post-delete get response");
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn patch_rejections() {
    let router = test_router();
    let alice = owner_headers("tenant-a", "alice");
    let created = create(&router, &alice, json!({ "name": "a", "version": "1.0" })).await;
    let id = created["id"].as_str().unwrap().to_string();

    let unknown_attr = router
        .clone()
        .oneshot(request(
            Method::PATCH,
            &format!("/artifacts/sample_artifact/{id}"),
            Some("application/json-patch+json"),
            &alice,
            Body::from(json!([{"op": "add", "path": "/not_a_real_attribute", "value": 1}]).to_string()),
        ))
        .await
        .expect("unknown attribute response");
    assert_eq!(unknown_attr.status(), StatusCode::BAD_REQUEST);

    let remove_name = router
        .clone()
        .oneshot(request(
            Method::PATCH,
            &format!("/artifacts/sample_artifact/{id}"),
            Some("application/json-patch+json"),
            &alice,
            Body::from(json!([{"op": "remove", "path": "/name"}]).to_string()),
        ))
        .await
        .expect("remove name response");
    assert_eq!(remove_name.status(), StatusCode::BAD_REQUEST);

    let replace_owner = router
        .clone()
        .oneshot(request(
            Method::PATCH,
            &format!("/artifacts/sample_artifact/{id}"),
            Some("application/json-patch+json"),
            &alice,
            Body::from(json!([{"op": "replace", "path": "/owner", "value": "someone-else"}]).to_string()),
        ))
        .await
        .expect("replace owner response");
    assert_eq!(replace_owner.status(), StatusCode::FORBIDDEN);

    let replace_blob_status = router
        .clone()
        .oneshot(request(
            Method::PATCH,
            &format!("/artifacts/sample_artifact/{id}"),
            Some("application/json-patch+json"),
            &alice,
            Body::from(json!([{"op": "replace", "path": "/blob/status", "value": "active"}]).to_string()),
        ))
        .await
        .expect("replace blob status response");
    assert_eq!(replace_blob_status.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn filter_semantics_scope_to_public_and_reject_bad_visibility_value() {
    let router = test_router();
    let alice = owner_headers("tenant-a", "alice");
    let admin = admin_headers();

    for n in 0..5 {
        create(&router, &alice, json!({ "name": format!("priv-{n}"), "version": "1.0", "int1": 1024 + n })).await;
    }
    let published = create(&router, &alice, json!({ "name": "pub", "version": "1.0", "int1": 2048 })).await;
    let published_id = published["id"].as_str().unwrap().to_string();

    let activate = router
        .clone()
        .oneshot(request(
            Method::PATCH,
            &format!("/artifacts/sample_artifact/{published_id}"),
            Some("application/json-patch+json"),
            &alice,
            Body::from(json!([{"op": "replace", "path": "/status", "value": "active"}]).to_string()),
        ))
        .await
        .unwrap();
    assert_eq!(activate.status(), StatusCode::OK);
    let publish = router
        .clone()
        .oneshot(request(
            Method::PATCH,
            &format!("/artifacts/sample_artifact/{published_id}"),
            Some("application/json-patch+json"),
            &admin,
            Body::from(json!([{"op": "replace", "path": "/visibility", "value": "public"}]).to_string()),
        ))
        .await
        .unwrap();
    assert_eq!(publish.status(), StatusCode::OK);

    // Anonymous caller only ever sees the public, published artifact.
    let listed = router
        .clone()
        .oneshot(Request::builder().method(Method::GET).uri("/artifacts/sample_artifact?int1=gt:2000").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(listed.status(), StatusCode::OK);
    let body = decode_json(listed).await;
    let rows = body["sample_artifact"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"], published_id);

    let bad_visibility = router
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::GET)
                .uri("/artifacts/sample_artifact?visibility=neq:private")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(bad_visibility.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn pagination_follows_next_link_in_sorted_order() {
    let router = test_router();
    let alice = owner_headers("tenant-a", "alice");
    for name in ["e", "d", "c", "b", "a"] {
        create(&router, &alice, json!({ "name": name, "version": "1.0" })).await;
    }

    let mut seen = Vec::new();
    let mut uri = "/artifacts/sample_artifact?limit=2&sort=name:desc".to_string();
    loop {
        let response = router
            .clone()
            .oneshot(request(Method::GET, &uri, None, &alice, Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = decode_json(response).await;
        for row in body["sample_artifact"].as_array().unwrap() {
            seen.push(row["name"].as_str().unwrap().to_string());
        }
        match body.get("next").and_then(Value::as_str) {
            Some(next) => uri = next.to_string(),
            None => break,
        }
    }

    assert_eq!(seen, vec!["e", "d", "c", "b", "a"]);
}

#[tokio::test]
async fn pagination_accepts_a_bare_artifact_id_as_marker() {
    let router = test_router();
    let alice = owner_headers("tenant-a", "alice");
    let mut ids = Vec::new();
    for i in 0..5 {
        let created = create(
            &router,
            &alice,
            json!({ "name": format!("name{i}"), "version": "1.0", "int1": 1024 + i }),
        )
        .await;
        ids.push(created["id"].as_str().unwrap().to_string());
    }

    // a hand-built `marker=<id>` (not the server's own opaque `next`
    // token) still produces the strictly-after page for the requested sort.
    let uri = format!("/artifacts/sample_artifact?sort=int1:asc&marker={}", ids[1]);
    let response =
        router.clone().oneshot(request(Method::GET, &uri, None, &alice, Body::empty())).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = decode_json(response).await;
    let names: Vec<String> =
        body["sample_artifact"].as_array().unwrap().iter().map(|r| r["name"].as_str().unwrap().to_string()).collect();
    assert_eq!(names, vec!["name2", "name3", "name4"]);

    // same marker, descending sort, yields only what comes strictly before it.
    let uri = format!("/artifacts/sample_artifact?sort=int1:desc&marker={}", ids[1]);
    let response =
        router.clone().oneshot(request(Method::GET, &uri, None, &alice, Body::empty())).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = decode_json(response).await;
    let names: Vec<String> =
        body["sample_artifact"].as_array().unwrap().iter().map(|r| r["name"].as_str().unwrap().to_string()).collect();
    assert_eq!(names, vec!["name0"]);
}

#[tokio::test]
async fn uniqueness_conflict_then_resolved_by_patching_version() {
    let router = test_router();
    let alice = owner_headers("tenant-a", "alice");

    let first = create(&router, &alice, json!({ "name": "dup", "version": "1.0" })).await;
    let first_id = first["id"].as_str().unwrap().to_string();

    let conflict = router
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/artifacts/sample_artifact",
            &alice,
            json!({ "name": "dup", "version": "1.0" }),
        ))
        .await
        .unwrap();
    assert_eq!(conflict.status(), StatusCode::CONFLICT);

    // Bump the first artifact's version before activation; it frees up
    // the (name, version, owner) tuple for a second create.
    let bump = router
        .clone()
        .oneshot(request(
            Method::PATCH,
            &format!("/artifacts/sample_artifact/{first_id}"),
            Some("application/json-patch+json"),
            &alice,
            Body::from(json!([{"op": "replace", "path": "/version", "value": "1.0.1"}]).to_string()),
        ))
        .await
        .unwrap();
    assert_eq!(bump.status(), StatusCode::OK);

    let second = router
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/artifacts/sample_artifact",
            &alice,
            json!({ "name": "dup", "version": "1.0" }),
        ))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn list_validators_cap_and_uniqueness() {
    let router = test_router();
    let alice = owner_headers("tenant-a", "alice");
    let created = create(&router, &alice, json!({ "name": "v", "version": "1.0" })).await;
    let id = created["id"].as_str().unwrap().to_string();

    let fill = router
        .clone()
        .oneshot(request(
            Method::PATCH,
            &format!("/artifacts/sample_artifact/{id}"),
            Some("application/json-patch+json"),
            &alice,
            Body::from(json!([{"op": "replace", "path": "/list_validators", "value": ["a", "b", "c"]}]).to_string()),
        ))
        .await
        .unwrap();
    assert_eq!(fill.status(), StatusCode::OK);

    let over_cap = router
        .clone()
        .oneshot(request(
            Method::PATCH,
            &format!("/artifacts/sample_artifact/{id}"),
            Some("application/json-patch+json"),
            &alice,
            Body::from(json!([{"op": "add", "path": "/list_validators/-", "value": "d"}]).to_string()),
        ))
        .await
        .unwrap();
    assert_eq!(over_cap.status(), StatusCode::BAD_REQUEST);

    let duplicate = router
        .clone()
        .oneshot(request(
            Method::PATCH,
            &format!("/artifacts/sample_artifact/{id}"),
            Some("application/json-patch+json"),
            &alice,
            Body::from(json!([{"op": "replace", "path": "/list_validators", "value": ["a", "a"]}]).to_string()),
        ))
        .await
        .unwrap();
    assert_eq!(duplicate.status(), StatusCode::BAD_REQUEST);

    let bad_dict_key = router
        .clone()
        .oneshot(request(
            Method::PATCH,
            &format!("/artifacts/sample_artifact/{id}"),
            Some("application/json-patch+json"),
            &alice,
            Body::from(json!([{"op": "add", "path": "/dict_validators/aaa", "value": "x"}]).to_string()),
        ))
        .await
        .unwrap();
    assert_eq!(bad_dict_key.status(), StatusCode::BAD_REQUEST);

    let good_dict_key = router
        .clone()
        .oneshot(request(
            Method::PATCH,
            &format!("/artifacts/sample_artifact/{id}"),
            Some("application/json-patch+json"),
            &alice,
            Body::from(json!([{"op": "add", "path": "/dict_validators/abc", "value": "x"}]).to_string()),
        ))
        .await
        .unwrap();
    assert_eq!(good_dict_key.status(), StatusCode::OK);
}
