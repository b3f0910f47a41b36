use super::common::*;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, Request, StatusCode};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::verification::memory::InMemoryBlobStore;
use crate::verification::router::{self, CALLER_HEADER, REVIEWER_HEADER};
use crate::verification::verification_router;

fn identity_body(id_number: &str) -> Value {
    json!({
        "id_number": id_number,
        "evidence": {
            "front": STANDARD.encode(b"front-photo"),
            "back": STANDARD.encode(b"back-photo"),
        }
    })
}

fn post(uri: &str, headers: &[(&str, &str)], body: &Value) -> Request<Body> {
    let mut request = Request::post(uri).header(header::CONTENT_TYPE, "application/json");
    for (name, value) in headers {
        request = request.header(*name, *value);
    }
    request
        .body(Body::from(serde_json::to_vec(body).expect("serialize body")))
        .expect("request")
}

#[tokio::test]
async fn status_route_requires_a_caller() {
    let (h, _) = harness();
    let router = verification_router(h.service.clone());

    let response = router
        .oneshot(
            Request::get("/api/v1/onboarding/status")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("router responds");

    assert_error(response, StatusCode::UNAUTHORIZED, "authentication_failed").await;
}

#[tokio::test]
async fn identity_route_accepts_base64_evidence() {
    let (h, blobs) = harness();
    let router = verification_router(h.service.clone());

    let response = router
        .oneshot(post(
            "/api/v1/onboarding/identity-card",
            &[(CALLER_HEADER, "1")],
            &identity_body("0012345678"),
        ))
        .await
        .expect("router responds");

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await;
    assert_eq!(body["result"]["status"], "PENDING");
    assert_eq!(body["result"]["document"]["kind"], "identity_card");
    assert_eq!(body["progress"]["next_step"], "driverLicense");
    assert_eq!(body["progress"]["identity_status"], "PENDING");

    let front = blobs
        .keys()
        .into_iter()
        .find(|key| key.ends_with("-front.jpg"))
        .expect("front stored");
    assert_eq!(blobs.get(&front).as_deref(), Some(&b"front-photo"[..]));
}

#[tokio::test]
async fn identity_route_reports_field_errors() {
    let (h, _) = harness();
    let router = verification_router(h.service.clone());

    let mut body = identity_body("0012345678");
    body["evidence"]["front"] = json!("not base64!");
    let response = router
        .oneshot(post(
            "/api/v1/onboarding/identity-card",
            &[(CALLER_HEADER, "1")],
            &body,
        ))
        .await
        .expect("router responds");

    let body = assert_error(
        response,
        StatusCode::UNPROCESSABLE_ENTITY,
        "validation_failed",
    )
    .await;
    assert_eq!(body["fields"][0]["field"], "evidence.front");
}

#[tokio::test]
async fn duplicate_submission_is_a_conflict() {
    let (h, _) = harness();
    h.service
        .submit(Some(&h.session()), identity_submission("0012345678"))
        .expect("first submission");
    let router = verification_router(h.service.clone());

    let response = router
        .oneshot(post(
            "/api/v1/onboarding/identity-card",
            &[(CALLER_HEADER, "1")],
            &identity_body("0012345678"),
        ))
        .await
        .expect("router responds");

    assert_error(response, StatusCode::CONFLICT, "document_already_uploaded").await;
}

#[tokio::test]
async fn car_and_card_routes_follow_the_onboarding_order() {
    let (h, _) = harness();
    h.service
        .submit(Some(&h.session()), license_submission())
        .expect("license");

    let response = verification_router(h.service.clone())
        .oneshot(post(
            "/api/v1/onboarding/cars",
            &[(CALLER_HEADER, "1")],
            &json!({
                "plate": "12 ab 345",
                "brand": "Toyota",
                "model": "Corolla",
                "color": "white",
                "year": 2019,
            }),
        ))
        .await
        .expect("router responds");
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await;
    assert_eq!(body["result"]["car"]["plate"], "12AB345");
    let car_id = body["result"]["car"]["id"].as_u64().expect("car id");

    let response = verification_router(h.service.clone())
        .oneshot(post(
            &format!("/api/v1/onboarding/cars/{car_id}/cards"),
            &[(CALLER_HEADER, "1")],
            &json!({
                "card_type": "GREEN",
                "evidence": {
                    "front": STANDARD.encode(b"card-front"),
                    "back": STANDARD.encode(b"card-back"),
                }
            }),
        ))
        .await
        .expect("router responds");
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await;
    assert_eq!(body["result"]["document"]["kind"], "vehicle_card");
    assert_eq!(body["progress"]["has_pending_cards"], true);
}

#[tokio::test]
async fn insurance_route_accepts_a_pdf() {
    let (h, _) = harness();
    let car = h.driver_with_car();

    let response = verification_router(h.service.clone())
        .oneshot(post(
            &format!("/api/v1/onboarding/cars/{}/insurance", car.0),
            &[(CALLER_HEADER, "1")],
            &json!({
                "policy_number": "PM-2025-0042",
                "insurer_id": h.insurer.0,
                "start_date": "2025-05-01",
                "expire_date": "2026-05-01",
                "evidence": {
                    "front": STANDARD.encode(b"%PDF-1.7"),
                    "file_kind": "PDF",
                }
            }),
        ))
        .await
        .expect("router responds");

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await;
    assert_eq!(body["progress"]["has_pending_insurance"], true);
    assert_eq!(body["progress"]["next_step"], "carCard");
}

#[tokio::test]
async fn admin_routes_review_documents() {
    let (h, _) = harness();
    let document = h
        .service
        .submit(Some(&h.session()), identity_submission("0012345678"))
        .expect("identity")
        .result
        .document;

    let response = verification_router(h.service.clone())
        .oneshot(
            Request::get("/api/v1/admin/documents/identity-card/pending")
                .header(REVIEWER_HEADER, "ops-maria")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("router responds");
    assert_eq!(response.status(), StatusCode::OK);
    let queue = json_body(response).await;
    assert_eq!(queue[0]["owner"], 1);
    assert_eq!(queue[0]["document"]["id"], document.id.0);

    let response = verification_router(h.service.clone())
        .oneshot(post(
            &format!("/api/v1/admin/documents/identity_card/{}/reject", document.id.0),
            &[(REVIEWER_HEADER, "ops-maria")],
            &json!({ "reason": "" }),
        ))
        .await
        .expect("router responds");
    assert_error(
        response,
        StatusCode::UNPROCESSABLE_ENTITY,
        "validation_failed",
    )
    .await;

    let response = verification_router(h.service.clone())
        .oneshot(post(
            &format!("/api/v1/admin/documents/identity_card/{}/approve", document.id.0),
            &[(REVIEWER_HEADER, "ops-maria")],
            &json!({ "expected_revision": 1 }),
        ))
        .await
        .expect("router responds");
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["result"]["status"], "VERIFIED");
    assert_eq!(body["progress"]["next_step"], "driverLicense");

    let response = verification_router(h.service.clone())
        .oneshot(post(
            &format!("/api/v1/admin/documents/identity_card/{}/approve", document.id.0),
            &[(REVIEWER_HEADER, "ops-maria")],
            &json!({}),
        ))
        .await
        .expect("router responds");
    assert_error(response, StatusCode::CONFLICT, "invalid_transition").await;
}

#[tokio::test]
async fn admin_routes_reject_unknown_kinds_and_missing_reviewers() {
    let (h, _) = harness();

    let response = verification_router(h.service.clone())
        .oneshot(
            Request::get("/api/v1/admin/documents/passport/pending")
                .header(REVIEWER_HEADER, "ops-maria")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("router responds");
    assert_error(response, StatusCode::NOT_FOUND, "unknown_document_kind").await;

    let response = verification_router(h.service.clone())
        .oneshot(post(
            "/api/v1/admin/documents/insurance/1/approve",
            &[],
            &json!({}),
        ))
        .await
        .expect("router responds");
    assert_error(response, StatusCode::UNAUTHORIZED, "authentication_failed").await;
}

#[tokio::test]
async fn status_handler_hides_infrastructure_details() {
    let (service, _) = unavailable_service();
    let mut headers = HeaderMap::new();
    headers.insert(CALLER_HEADER, HeaderValue::from_static("1"));

    let response = router::status_handler::<UnavailableStore, InMemoryBlobStore>(
        State(service),
        headers,
    )
    .await;

    let body = assert_error(
        response,
        StatusCode::INTERNAL_SERVER_ERROR,
        "persistence_error",
    )
    .await;
    let message = body["message"].as_str().expect("message");
    assert!(!message.contains("connection refused"));
}

#[tokio::test]
async fn malformed_license_body_is_a_field_error_and_audited() {
    let (h, _) = harness();

    let response = verification_router(h.service.clone())
        .oneshot(post(
            "/api/v1/onboarding/driver-license",
            &[(CALLER_HEADER, "1")],
            &json!({
                "expiration_date": "2026-13-40",
                "evidence": {
                    "front": STANDARD.encode(b"front"),
                    "back": STANDARD.encode(b"back"),
                }
            }),
        ))
        .await
        .expect("router responds");

    let body = assert_error(
        response,
        StatusCode::UNPROCESSABLE_ENTITY,
        "validation_failed",
    )
    .await;
    assert_eq!(body["fields"][0]["field"], "expiration_date");

    let records = h.audit.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].origin, "submit");
    assert_eq!(records[0].code, "validation_failed");
}

#[tokio::test]
async fn car_body_missing_fields_is_refused_with_json() {
    let (h, _) = harness();

    let response = verification_router(h.service.clone())
        .oneshot(post(
            "/api/v1/onboarding/cars",
            &[(CALLER_HEADER, "1")],
            &json!({ "plate": "12AB345" }),
        ))
        .await
        .expect("router responds");

    let body = assert_error(
        response,
        StatusCode::UNPROCESSABLE_ENTITY,
        "validation_failed",
    )
    .await;
    assert_eq!(body["fields"][0]["field"], "body");
    let message = body["fields"][0]["message"].as_str().expect("message");
    assert!(message.contains("missing field"));

    let origins: Vec<_> = h.audit.records().iter().map(|record| record.origin).collect();
    assert_eq!(origins, vec!["register_car"]);
}

#[tokio::test]
async fn invalid_evidence_encoding_is_audited() {
    let (h, _) = harness();

    let mut body = identity_body("0012345678");
    body["evidence"]["back"] = json!("%%%");
    let response = verification_router(h.service.clone())
        .oneshot(post(
            "/api/v1/onboarding/identity-card",
            &[(CALLER_HEADER, "1")],
            &body,
        ))
        .await
        .expect("router responds");

    assert_error(
        response,
        StatusCode::UNPROCESSABLE_ENTITY,
        "validation_failed",
    )
    .await;
    assert_eq!(h.audit.records()[0].origin, "submit");
}

#[tokio::test]
async fn approval_accepts_an_empty_body() {
    let (h, _) = harness();
    let document = h
        .service
        .submit(Some(&h.session()), identity_submission("0012345678"))
        .expect("identity")
        .result
        .document;

    let response = verification_router(h.service.clone())
        .oneshot(
            Request::post(format!(
                "/api/v1/admin/documents/identity_card/{}/approve",
                document.id.0
            ))
            .header(REVIEWER_HEADER, "ops-maria")
            .body(Body::empty())
            .expect("request"),
        )
        .await
        .expect("router responds");

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["result"]["status"], "VERIFIED");
}

#[tokio::test]
async fn approval_with_a_broken_body_is_refused() {
    let (h, _) = harness();
    let document = h
        .service
        .submit(Some(&h.session()), identity_submission("0012345678"))
        .expect("identity")
        .result
        .document;

    let response = verification_router(h.service.clone())
        .oneshot(
            Request::post(format!(
                "/api/v1/admin/documents/identity_card/{}/approve",
                document.id.0
            ))
            .header(REVIEWER_HEADER, "ops-maria")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{\"expected_revision\": \"one\"}"))
            .expect("request"),
        )
        .await
        .expect("router responds");

    let body = assert_error(
        response,
        StatusCode::UNPROCESSABLE_ENTITY,
        "validation_failed",
    )
    .await;
    assert_eq!(body["fields"][0]["field"], "expected_revision");
    assert_eq!(h.audit.records()[0].origin, "approve");
}
