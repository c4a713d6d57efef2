use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use super::common::*;
use crate::workflows::leads::router::lead_router;

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(&body).expect("encode body")))
        .expect("request")
}

fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

fn intake_body(postal_code: &str) -> Value {
    json!({
        "tenant_id": "t1",
        "category_id": "plumbing",
        "postal_code": postal_code,
        "email": "customer@example.test",
        "note": "Leaking pipe under the sink"
    })
}

async fn create_lead(router: &axum::Router, postal_code: &str) -> String {
    let response = router
        .clone()
        .oneshot(json_request("POST", "/api/v1/leads", intake_body(postal_code)))
        .await
        .expect("intake response");
    assert_eq!(response.status(), StatusCode::CREATED);
    let payload = read_json_body(response).await;
    assert_eq!(payload["status"], "new");
    payload["id"].as_str().expect("lead id").to_string()
}

#[tokio::test]
async fn full_flow_over_http() {
    let harness = harness(Arc::new(ScriptedTransport::failing_for(&["C1"])));
    let router = lead_router(Arc::clone(&harness.controller));
    let lead_id = create_lead(&router, "67500").await;

    let response = router
        .clone()
        .oneshot(empty_request(
            "POST",
            &format!("/api/v1/leads/{lead_id}/qualify"),
        ))
        .await
        .expect("qualify response");
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["lead"]["status"], "assigned");
    assert_eq!(payload["assignments"][0]["company_id"], "C2");
    assert_eq!(payload["assignments"][0]["rank"], 1);

    let response = router
        .clone()
        .oneshot(empty_request(
            "POST",
            &format!("/api/v1/leads/{lead_id}/dispatch"),
        ))
        .await
        .expect("dispatch response");
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["notificationsSent"], 2);
    assert_eq!(
        payload["summary"],
        json!({ "total": 3, "notified": 2, "failed": 1, "skipped": 0 })
    );
    assert_eq!(payload["status"], "dispatched");
    assert!(payload["message"].as_str().is_some());
    assert_eq!(payload["assignments"].as_array().map(Vec::len), Some(3));

    let response = router
        .clone()
        .oneshot(empty_request("GET", &format!("/api/v1/leads/{lead_id}")))
        .await
        .expect("detail response");
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["lead"]["status"], "dispatched");
    assert_eq!(payload["communications"].as_array().map(Vec::len), Some(6));
}

#[tokio::test]
async fn qualify_without_candidates_requests_manual_triage() {
    let harness = harness(Arc::new(ScriptedTransport::default()));
    let router = lead_router(Arc::clone(&harness.controller));
    let lead_id = create_lead(&router, "13001").await;

    let response = router
        .oneshot(empty_request(
            "POST",
            &format!("/api/v1/leads/{lead_id}/qualify"),
        ))
        .await
        .expect("qualify response");

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let payload = read_json_body(response).await;
    assert_eq!(payload["needs_manual_triage"], true);
}

#[tokio::test]
async fn dispatch_of_new_lead_is_a_conflict_with_both_states() {
    let harness = harness(Arc::new(ScriptedTransport::default()));
    let router = lead_router(Arc::clone(&harness.controller));
    let lead_id = create_lead(&router, "67500").await;

    let response = router
        .oneshot(empty_request(
            "POST",
            &format!("/api/v1/leads/{lead_id}/dispatch"),
        ))
        .await
        .expect("dispatch response");

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let payload = read_json_body(response).await;
    assert_eq!(payload["current"], "new");
    assert_eq!(payload["requested"], "dispatched");
}

#[tokio::test]
async fn unknown_lead_is_not_found() {
    let harness = harness(Arc::new(ScriptedTransport::default()));
    let router = lead_router(Arc::clone(&harness.controller));

    let response = router
        .oneshot(empty_request("GET", "/api/v1/leads/lead-missing"))
        .await
        .expect("detail response");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_update_uses_the_actor_header() {
    let harness = harness(Arc::new(ScriptedTransport::default()));
    let router = lead_router(Arc::clone(&harness.controller));
    let lead_id = create_lead(&router, "67500").await;

    let mut request = json_request(
        "PUT",
        &format!("/api/v1/leads/{lead_id}"),
        json!({ "status": "qualified", "notes": "confirmed by phone" }),
    );
    request
        .headers_mut()
        .insert("x-actor", "ops-7".parse().expect("header value"));

    let response = router.oneshot(request).await.expect("update response");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["status"], "qualified");
    assert_eq!(payload["admin_notes"], "confirmed by phone");
    let last = harness
        .ledger
        .entries()
        .into_iter()
        .last()
        .expect("ledger row");
    assert_eq!(last.recipient, "admin:ops-7");
}

#[tokio::test]
async fn delete_soft_deletes_and_repeats_conflict() {
    let harness = harness(Arc::new(ScriptedTransport::default()));
    let router = lead_router(Arc::clone(&harness.controller));
    let lead_id = create_lead(&router, "67500").await;
    let uri = format!("/api/v1/leads/{lead_id}");

    let response = router
        .clone()
        .oneshot(empty_request("DELETE", &uri))
        .await
        .expect("delete response");
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["status"], "spam");
    let last = harness
        .ledger
        .entries()
        .into_iter()
        .last()
        .expect("ledger row");
    assert_eq!(last.recipient, "admin:admin");

    let response = router
        .oneshot(empty_request("DELETE", &uri))
        .await
        .expect("second delete");
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn invalid_intake_is_unprocessable() {
    let harness = harness(Arc::new(ScriptedTransport::default()));
    let router = lead_router(Arc::clone(&harness.controller));

    let response = router
        .oneshot(json_request("POST", "/api/v1/leads", intake_body(" ")))
        .await
        .expect("intake response");

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn retry_before_dispatch_is_a_conflict() {
    let harness = harness(Arc::new(ScriptedTransport::default()));
    let router = lead_router(Arc::clone(&harness.controller));
    let lead_id = create_lead(&router, "67500").await;

    let response = router
        .oneshot(empty_request(
            "POST",
            &format!("/api/v1/leads/{lead_id}/retry"),
        ))
        .await
        .expect("retry response");

    assert_eq!(response.status(), StatusCode::CONFLICT);
}
