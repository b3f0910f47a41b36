use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;

use super::domain::{
    CarId, CardType, DocumentId, DocumentKind, DocumentRef, FileKind, InsurerId, UserId,
};
use super::error::{FieldError, VerificationError};
use super::registry::{
    CarRegistration, DocumentSubmission, DriverLicenseSubmission, IdentityCardSubmission,
    InsuranceSubmission, VehicleCardSubmission,
};
use super::repository::VerificationStore;
use super::review::{ReviewRequest, ReviewerSession};
use super::service::{CallerSession, VerificationService};
use super::upload::{BlobStore, Evidence};

pub const CALLER_HEADER: &str = "x-caller-id";
pub const REVIEWER_HEADER: &str = "x-reviewer-id";
const PENDING_PAGE: usize = 50;

/// Router builder exposing owner onboarding and reviewer endpoints.
pub fn verification_router<S, B>(service: Arc<VerificationService<S, B>>) -> Router
where
    S: VerificationStore + 'static,
    B: BlobStore + 'static,
{
    Router::new()
        .route("/api/v1/onboarding/status", get(status_handler::<S, B>))
        .route(
            "/api/v1/onboarding/identity-card",
            post(identity_card_handler::<S, B>),
        )
        .route(
            "/api/v1/onboarding/driver-license",
            post(driver_license_handler::<S, B>),
        )
        .route("/api/v1/onboarding/cars", post(register_car_handler::<S, B>))
        .route(
            "/api/v1/onboarding/cars/:car_id/insurance",
            post(insurance_handler::<S, B>),
        )
        .route(
            "/api/v1/onboarding/cars/:car_id/cards",
            post(vehicle_card_handler::<S, B>),
        )
        .route(
            "/api/v1/admin/documents/:kind/pending",
            get(pending_handler::<S, B>),
        )
        .route(
            "/api/v1/admin/documents/:kind/:id/approve",
            post(approve_handler::<S, B>),
        )
        .route(
            "/api/v1/admin/documents/:kind/:id/reject",
            post(reject_handler::<S, B>),
        )
        .with_state(service)
}

/// Base64 evidence as sent by the mobile clients.
#[derive(Debug, Clone, Deserialize)]
pub struct EvidencePayload {
    pub front: String,
    #[serde(default)]
    pub back: Option<String>,
    #[serde(default)]
    pub file_kind: Option<FileKind>,
}

impl EvidencePayload {
    fn decode(self) -> Result<Evidence, VerificationError> {
        let front = decode_side("evidence.front", &self.front);
        let back = self
            .back
            .as_deref()
            .map(|raw| decode_side("evidence.back", raw))
            .transpose();

        match (front, back) {
            (Ok(front), Ok(back)) => Ok(Evidence {
                front,
                back,
                file_kind: self.file_kind.unwrap_or(FileKind::Image),
            }),
            (front, back) => Err(VerificationError::ValidationFailed(
                front.err().into_iter().chain(back.err()).collect(),
            )),
        }
    }
}

fn decode_side(field: &str, raw: &str) -> Result<Vec<u8>, FieldError> {
    STANDARD
        .decode(raw.trim())
        .map_err(|_| FieldError::new(field, "must be base64 encoded"))
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityCardRequest {
    pub id_number: String,
    pub evidence: EvidencePayload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DriverLicenseRequest {
    pub expiration_date: NaiveDate,
    pub evidence: EvidencePayload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InsuranceRequest {
    pub policy_number: String,
    pub insurer_id: InsurerId,
    pub start_date: NaiveDate,
    pub expire_date: NaiveDate,
    pub evidence: EvidencePayload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VehicleCardRequest {
    pub card_type: CardType,
    pub evidence: EvidencePayload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CarRequest {
    pub plate: String,
    pub brand: String,
    pub model: String,
    pub color: String,
    pub year: u16,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApproveRequest {
    #[serde(default)]
    pub expected_revision: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RejectRequest {
    pub reason: String,
    #[serde(default)]
    pub expected_revision: Option<u32>,
}

fn caller_session(headers: &HeaderMap) -> Option<CallerSession> {
    headers
        .get(CALLER_HEADER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(|id| CallerSession {
            caller: UserId(id),
        })
}

fn reviewer_session(headers: &HeaderMap) -> Option<ReviewerSession> {
    let reviewer = headers.get(REVIEWER_HEADER)?.to_str().ok()?.trim();
    if reviewer.is_empty() {
        return None;
    }
    Some(ReviewerSession {
        reviewer: reviewer.to_string(),
    })
}

fn status_code(error: &VerificationError) -> StatusCode {
    match error {
        VerificationError::AuthenticationFailed => StatusCode::UNAUTHORIZED,
        VerificationError::OwnerNotFound(_) | VerificationError::DocumentNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        VerificationError::ValidationFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
        VerificationError::DocumentAlreadyUploaded { .. }
        | VerificationError::ActivePolicyExists { .. }
        | VerificationError::DuplicateEntry { .. }
        | VerificationError::InvalidTransition { .. }
        | VerificationError::StaleReview { .. } => StatusCode::CONFLICT,
        VerificationError::UploadFailed(_) => StatusCode::BAD_GATEWAY,
        VerificationError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for VerificationError {
    fn into_response(self) -> Response {
        let message = if self.is_infrastructure() {
            "the request could not be completed, please retry later".to_string()
        } else {
            self.to_string()
        };
        let payload = json!({
            "error": self.code(),
            "message": message,
            "fields": self.field_errors(),
        });
        (status_code(&self), axum::Json(payload)).into_response()
    }
}

fn parse_kind(raw: &str) -> Result<DocumentKind, Response> {
    raw.parse::<DocumentKind>().map_err(|err| {
        let payload = json!({
            "error": "unknown_document_kind",
            "message": err.to_string(),
            "fields": [],
        });
        (StatusCode::NOT_FOUND, axum::Json(payload)).into_response()
    })
}

fn respond<T: serde::Serialize>(
    status: StatusCode,
    result: Result<T, VerificationError>,
) -> Response {
    match result {
        Ok(body) => (status, axum::Json(body)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn status_handler<S, B>(
    State(service): State<Arc<VerificationService<S, B>>>,
    headers: HeaderMap,
) -> Response
where
    S: VerificationStore + 'static,
    B: BlobStore + 'static,
{
    let session = caller_session(&headers);
    respond(StatusCode::OK, service.snapshot(session.as_ref()))
}

/// Unwrap a JSON body, turning serde failures into field errors.
fn extract_body<T>(
    body: Result<axum::Json<T>, JsonRejection>,
) -> Result<T, VerificationError> {
    body.map(|axum::Json(value)| value).map_err(|rejection| {
        VerificationError::ValidationFailed(vec![rejection_field(&rejection)])
    })
}

fn rejection_field(rejection: &JsonRejection) -> FieldError {
    let text = rejection.body_text();
    if let JsonRejection::JsonDataError(_) = rejection {
        // "<summary>: <path>: <message>"; a bare root error carries no path
        let located = text
            .split_once(": ")
            .and_then(|(_, detail)| detail.split_once(": "))
            .filter(|(path, _)| {
                !path.is_empty()
                    && path
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '[' | ']'))
            });
        if let Some((path, message)) = located {
            return FieldError::new(path, message);
        }
    }
    FieldError::new("body", text)
}

fn submit<S, B>(
    service: &VerificationService<S, B>,
    headers: &HeaderMap,
    submission: Result<DocumentSubmission, VerificationError>,
) -> Response
where
    S: VerificationStore + 'static,
    B: BlobStore + 'static,
{
    let session = caller_session(headers);
    let result = submission
        .map_err(|err| service.refuse("submit", err))
        .and_then(|submission| service.submit(session.as_ref(), submission));
    respond(StatusCode::CREATED, result)
}

pub(crate) async fn identity_card_handler<S, B>(
    State(service): State<Arc<VerificationService<S, B>>>,
    headers: HeaderMap,
    body: Result<axum::Json<IdentityCardRequest>, JsonRejection>,
) -> Response
where
    S: VerificationStore + 'static,
    B: BlobStore + 'static,
{
    let submission = extract_body(body).and_then(|request| {
        Ok(DocumentSubmission::IdentityCard(IdentityCardSubmission {
            id_number: request.id_number,
            evidence: request.evidence.decode()?,
        }))
    });
    submit(&service, &headers, submission)
}

pub(crate) async fn driver_license_handler<S, B>(
    State(service): State<Arc<VerificationService<S, B>>>,
    headers: HeaderMap,
    body: Result<axum::Json<DriverLicenseRequest>, JsonRejection>,
) -> Response
where
    S: VerificationStore + 'static,
    B: BlobStore + 'static,
{
    let submission = extract_body(body).and_then(|request| {
        Ok(DocumentSubmission::DriverLicense(DriverLicenseSubmission {
            expiration_date: request.expiration_date,
            evidence: request.evidence.decode()?,
        }))
    });
    submit(&service, &headers, submission)
}

pub(crate) async fn register_car_handler<S, B>(
    State(service): State<Arc<VerificationService<S, B>>>,
    headers: HeaderMap,
    body: Result<axum::Json<CarRequest>, JsonRejection>,
) -> Response
where
    S: VerificationStore + 'static,
    B: BlobStore + 'static,
{
    let session = caller_session(&headers);
    let result = extract_body(body)
        .map_err(|err| service.refuse("register_car", err))
        .and_then(|request| {
            let registration = CarRegistration {
                plate: request.plate,
                brand: request.brand,
                model: request.model,
                color: request.color,
                year: request.year,
            };
            service.register_car(session.as_ref(), registration)
        });
    respond(StatusCode::CREATED, result)
}

pub(crate) async fn insurance_handler<S, B>(
    State(service): State<Arc<VerificationService<S, B>>>,
    Path(car_id): Path<u64>,
    headers: HeaderMap,
    body: Result<axum::Json<InsuranceRequest>, JsonRejection>,
) -> Response
where
    S: VerificationStore + 'static,
    B: BlobStore + 'static,
{
    let submission = extract_body(body).and_then(|request| {
        Ok(DocumentSubmission::Insurance(InsuranceSubmission {
            car_id: CarId(car_id),
            policy_number: request.policy_number,
            insurer_id: request.insurer_id,
            start_date: request.start_date,
            expire_date: request.expire_date,
            evidence: request.evidence.decode()?,
        }))
    });
    submit(&service, &headers, submission)
}

pub(crate) async fn vehicle_card_handler<S, B>(
    State(service): State<Arc<VerificationService<S, B>>>,
    Path(car_id): Path<u64>,
    headers: HeaderMap,
    body: Result<axum::Json<VehicleCardRequest>, JsonRejection>,
) -> Response
where
    S: VerificationStore + 'static,
    B: BlobStore + 'static,
{
    let submission = extract_body(body).and_then(|request| {
        Ok(DocumentSubmission::VehicleCard(VehicleCardSubmission {
            car_id: CarId(car_id),
            card_type: request.card_type,
            evidence: request.evidence.decode()?,
        }))
    });
    submit(&service, &headers, submission)
}

pub(crate) async fn pending_handler<S, B>(
    State(service): State<Arc<VerificationService<S, B>>>,
    Path(kind): Path<String>,
    headers: HeaderMap,
) -> Response
where
    S: VerificationStore + 'static,
    B: BlobStore + 'static,
{
    let kind = match parse_kind(&kind) {
        Ok(kind) => kind,
        Err(response) => return response,
    };
    let reviewer = reviewer_session(&headers);
    respond(
        StatusCode::OK,
        service.pending(reviewer.as_ref(), kind, PENDING_PAGE),
    )
}

pub(crate) async fn approve_handler<S, B>(
    State(service): State<Arc<VerificationService<S, B>>>,
    Path((kind, id)): Path<(String, u64)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response
where
    S: VerificationStore + 'static,
    B: BlobStore + 'static,
{
    let kind = match parse_kind(&kind) {
        Ok(kind) => kind,
        Err(response) => return response,
    };
    // approval carries no required fields, so an empty body is accepted
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        Ok(ApproveRequest::default())
    } else {
        extract_body(axum::Json::<ApproveRequest>::from_bytes(&body))
    };
    let reviewer = reviewer_session(&headers);
    let result = request
        .map_err(|err| service.refuse("approve", err))
        .and_then(|request| {
            let review = ReviewRequest {
                document: DocumentRef {
                    kind,
                    id: DocumentId(id),
                },
                expected_revision: request.expected_revision,
            };
            service.approve(reviewer.as_ref(), review)
        });
    respond(StatusCode::OK, result)
}

pub(crate) async fn reject_handler<S, B>(
    State(service): State<Arc<VerificationService<S, B>>>,
    Path((kind, id)): Path<(String, u64)>,
    headers: HeaderMap,
    body: Result<axum::Json<RejectRequest>, JsonRejection>,
) -> Response
where
    S: VerificationStore + 'static,
    B: BlobStore + 'static,
{
    let kind = match parse_kind(&kind) {
        Ok(kind) => kind,
        Err(response) => return response,
    };
    let reviewer = reviewer_session(&headers);
    let result = extract_body(body)
        .map_err(|err| service.refuse("reject", err))
        .and_then(|request| {
            let review = ReviewRequest {
                document: DocumentRef {
                    kind,
                    id: DocumentId(id),
                },
                expected_revision: request.expected_revision,
            };
            service.reject(reviewer.as_ref(), review, &request.reason)
        });
    respond(StatusCode::OK, result)
}
