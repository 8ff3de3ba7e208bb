//! Appointment endpoints.
//!
//! Malformed identifiers are rejected here with specific codes before
//! the engine is touched; engine error kinds map to the stable wire
//! codes in [`crate::error`].

use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use slotwise_core::{
    Appointment, AppointmentDetail, AppointmentId, PatientId, SlotId,
};
use slotwise_engine::MAX_LIST_LIMIT;

use crate::context::RequestId;
use crate::error::{ApiError, ApiResult};
use crate::server::AppState;

const DEFAULT_LIST_LIMIT: usize = 20;

/// Request body for `POST /appointments`.
#[derive(Debug, Deserialize)]
pub struct CreateAppointmentRequest {
    /// The slot to reserve.
    pub slot_id: String,
    /// The requesting patient.
    pub patient_id: String,
}

/// Wire shape of a bare appointment.
#[derive(Debug, Serialize)]
pub struct AppointmentResponse {
    /// Appointment ID.
    pub id: AppointmentId,
    /// Reserved slot.
    pub slot_id: SlotId,
    /// Holding patient.
    pub patient_id: PatientId,
    /// Lifecycle status.
    pub status: String,
    /// When the pending hold auto-releases.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<Appointment> for AppointmentResponse {
    fn from(appt: Appointment) -> Self {
        Self {
            id: appt.id,
            slot_id: appt.slot_id,
            patient_id: appt.patient_id,
            status: appt.status.to_string(),
            expires_at: appt.expires_at,
        }
    }
}

/// Wire shape of the slot section of a hydrated appointment.
#[derive(Debug, Serialize)]
pub struct SlotView {
    /// Slot ID.
    pub id: SlotId,
    /// Window start.
    pub start_time: DateTime<Utc>,
    /// Window end.
    pub end_time: DateTime<Utc>,
    /// Availability status.
    pub status: String,
    /// Slot capacity.
    pub capacity: u32,
}

/// Wire shape of the patient section of a hydrated appointment.
#[derive(Debug, Serialize)]
pub struct PatientView {
    /// Patient ID.
    pub id: PatientId,
    /// Display name.
    pub name: String,
    /// Optional contact string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Wire shape of the clinician section of a hydrated appointment.
#[derive(Debug, Serialize)]
pub struct ClinicianView {
    /// Clinician ID.
    pub id: slotwise_core::ClinicianId,
    /// Display name.
    pub name: String,
    /// Optional specialty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specialty: Option<String>,
}

/// Wire shape of a hydrated appointment.
#[derive(Debug, Serialize)]
pub struct AppointmentDetailResponse {
    /// Appointment ID.
    pub id: AppointmentId,
    /// Lifecycle status.
    pub status: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
    /// When the pending hold auto-releases.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// The reserved slot.
    pub slot: SlotView,
    /// The holding patient.
    pub patient: PatientView,
    /// The slot's owning clinician.
    pub clinician: ClinicianView,
}

impl From<AppointmentDetail> for AppointmentDetailResponse {
    fn from(detail: AppointmentDetail) -> Self {
        Self {
            id: detail.appointment.id,
            status: detail.appointment.status.to_string(),
            created_at: detail.appointment.created_at,
            updated_at: detail.appointment.updated_at,
            expires_at: detail.appointment.expires_at,
            slot: SlotView {
                id: detail.slot.id,
                start_time: detail.slot.start_time,
                end_time: detail.slot.end_time,
                status: detail.slot.status.as_str().to_string(),
                capacity: detail.slot.capacity,
            },
            patient: PatientView {
                id: detail.patient.id,
                name: detail.patient.name,
                email: detail.patient.email,
            },
            clinician: ClinicianView {
                id: detail.clinician.id,
                name: detail.clinician.name,
                specialty: detail.clinician.specialty,
            },
        }
    }
}

/// Response body for listings.
#[derive(Debug, Serialize)]
pub struct AppointmentListResponse {
    /// The hydrated appointments, newest first.
    pub appointments: Vec<AppointmentDetailResponse>,
    /// Number of appointments returned.
    pub total: usize,
}

/// Query parameters for `GET /appointments`.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Filter by patient.
    pub patient_id: Option<String>,
    /// Filter by slot.
    pub slot_id: Option<String>,
    /// Page size (default 20, max 100).
    pub limit: Option<usize>,
    /// Page offset.
    pub offset: Option<usize>,
}

/// `POST /appointments`
pub async fn create(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(req): Json<CreateAppointmentRequest>,
) -> ApiResult<(StatusCode, Json<AppointmentResponse>)> {
    let slot_id: SlotId = req.slot_id.parse().map_err(|_| {
        ApiError::bad_request("invalid_slot_id", "slot_id must be a valid UUID")
            .with_request_id(request_id.0.clone())
    })?;
    let patient_id: PatientId = req.patient_id.parse().map_err(|_| {
        ApiError::bad_request("invalid_patient_id", "patient_id must be a valid UUID")
            .with_request_id(request_id.0.clone())
    })?;

    let appointment = state
        .engine
        .create(slot_id, patient_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id.0.clone()))?;

    Ok((StatusCode::CREATED, Json(appointment.into())))
}

/// `POST /appointments/{id}/confirm`
pub async fn confirm(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<String>,
) -> ApiResult<Json<AppointmentResponse>> {
    let id: AppointmentId = id.parse().map_err(|_| {
        ApiError::bad_request("invalid_appointment_id", "id must be a valid UUID")
            .with_request_id(request_id.0.clone())
    })?;

    let appointment = state
        .engine
        .confirm(id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id.0.clone()))?;

    Ok(Json(appointment.into()))
}

/// `GET /appointments/{id}`
pub async fn get_detail(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<String>,
) -> ApiResult<Json<AppointmentDetailResponse>> {
    let id: AppointmentId = id.parse().map_err(|_| {
        ApiError::bad_request("invalid_appointment_id", "id must be a valid UUID")
            .with_request_id(request_id.0.clone())
    })?;

    let detail = state
        .engine
        .appointment_detail(id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id.0.clone()))?;

    Ok(Json(detail.into()))
}

/// `GET /appointments?patient_id=…|slot_id=…`
pub async fn list(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<AppointmentListResponse>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    let offset = query.offset.unwrap_or(0);

    let details = match (query.patient_id.as_deref(), query.slot_id.as_deref()) {
        (Some(patient_id), _) => {
            let patient_id: PatientId = patient_id.parse().map_err(|_| {
                ApiError::bad_request("invalid_patient_id", "patient_id must be a valid UUID")
                    .with_request_id(request_id.0.clone())
            })?;
            state
                .engine
                .list_by_patient(patient_id, limit, offset)
                .await
        }
        (None, Some(slot_id)) => {
            let slot_id: SlotId = slot_id.parse().map_err(|_| {
                ApiError::bad_request("invalid_slot_id", "slot_id must be a valid UUID")
                    .with_request_id(request_id.0.clone())
            })?;
            state.engine.list_by_slot(slot_id).await
        }
        (None, None) => {
            return Err(ApiError::bad_request(
                "missing_filter",
                "must provide either patient_id or slot_id query parameter",
            )
            .with_request_id(request_id.0.clone()));
        }
    }
    .map_err(|e| ApiError::from(e).with_request_id(request_id.0.clone()))?;

    let appointments: Vec<AppointmentDetailResponse> =
        details.into_iter().map(Into::into).collect();
    let total = appointments.len();

    Ok(Json(AppointmentListResponse {
        appointments,
        total,
    }))
}
