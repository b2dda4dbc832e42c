use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{MatchedPath, Path, Query, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self as mw, Next};
use axum::response::sse::{self, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Json, Router};
use chrono::NaiveDate;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{error, info};
use ulid::Ulid;

use crate::auth::{Principal, TokenRegistry};
use crate::engine::{BookingFilter, BookingPatch, CreateBooking, Engine, EngineError, FieldAttrs};
use crate::model::*;
use crate::tenant::TenantManager;

#[derive(Clone)]
pub struct AppState {
    pub tenants: Arc<TenantManager>,
    pub tokens: Arc<TokenRegistry>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/fields", get(list_fields).post(create_field))
        .route(
            "/fields/:id",
            axum::routing::put(update_field).delete(deactivate_field),
        )
        .route("/field-bookings", get(list_bookings).post(create_booking))
        .route("/field-bookings/availability", get(check_availability))
        .route("/field-bookings/field/:field_id", get(bookings_for_field))
        .route("/field-bookings/field/:field_id/watch", get(watch_field))
        .route(
            "/field-bookings/:id",
            axum::routing::put(update_booking).delete(cancel_booking),
        )
        .layer(mw::from_fn_with_state(state.clone(), authenticate))
        // Health stays outside the auth layer.
        .route("/health", get(health))
        .layer(mw::from_fn(track_metrics))
        .with_state(state)
}

// ── Middleware ────────────────────────────────────────────────────

async fn authenticate(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let principal = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| state.tokens.authenticate(v));

    match principal {
        Some(p) => {
            req.extensions_mut().insert(p);
            next.run(req).await
        }
        None => {
            metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL).increment(1);
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "missing or invalid bearer token"})),
            )
                .into_response()
        }
    }
}

async fn track_metrics(req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".into());
    let start = Instant::now();

    let response = next.run(req).await;

    metrics::counter!(
        crate::observability::HTTP_REQUESTS_TOTAL,
        "method" => method.clone(),
        "path" => path.clone(),
        "status" => response.status().as_u16().to_string(),
    )
    .increment(1);
    metrics::histogram!(
        crate::observability::HTTP_REQUEST_DURATION_SECONDS,
        "method" => method,
        "path" => path,
    )
    .record(start.elapsed().as_secs_f64());

    response
}

// ── Error mapping ─────────────────────────────────────────────────

struct ApiError {
    status: StatusCode,
    body: serde_json::Value,
}

impl ApiError {
    fn missing_fields(fields: Vec<&'static str>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: json!({"error": "validation failed", "fields": fields}),
        }
    }

    /// Existence is not leaked to callers who may not act on a booking:
    /// Forbidden and NotFound share one body.
    fn not_found() -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            body: json!({"error": "not found"}),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Validation(fields) => ApiError::missing_fields(fields),
            EngineError::NotFound(_) | EngineError::Inactive(_) | EngineError::Forbidden => {
                ApiError::not_found()
            }
            EngineError::AlreadyExists(id) => ApiError {
                status: StatusCode::CONFLICT,
                body: json!({"error": "already exists", "id": id.to_string()}),
            },
            EngineError::Conflict(bookings) => ApiError {
                status: StatusCode::CONFLICT,
                body: json!({
                    "error": "slot conflicts with existing bookings",
                    "conflicts": bookings.into_iter().map(BookingResponse::from).collect::<Vec<_>>(),
                }),
            },
            EngineError::LimitExceeded(msg) => ApiError {
                status: StatusCode::BAD_REQUEST,
                body: json!({"error": msg}),
            },
            EngineError::WalError(e) => {
                error!("persistence failure: {e}");
                ApiError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    body: json!({"error": "internal error"}),
                }
            }
        }
    }
}

impl From<std::io::Error> for ApiError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::InvalidInput {
            ApiError {
                status: StatusCode::BAD_REQUEST,
                body: json!({"error": e.to_string()}),
            }
        } else {
            error!("tenant setup failure: {e}");
            ApiError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: json!({"error": "internal error"}),
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

// ── DTOs ──────────────────────────────────────────────────────────

#[derive(Serialize)]
struct BookingResponse {
    id: Ulid,
    field_id: Ulid,
    booking_title: String,
    booking_date: NaiveDate,
    start_time: TimeOfDay,
    end_time: TimeOfDay,
    booking_type: BookingKind,
    status: BookingStatus,
    booked_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    recurrence: Option<Recurrence>,
}

impl From<Booking> for BookingResponse {
    fn from(b: Booking) -> Self {
        Self {
            id: b.id,
            field_id: b.field_id,
            booking_title: b.title,
            booking_date: b.date,
            start_time: b.slot.start,
            end_time: b.slot.end,
            booking_type: b.kind,
            status: b.status,
            booked_by: b.booked_by,
            notes: b.notes,
            recurrence: b.recurrence,
        }
    }
}

#[derive(Serialize)]
struct SlotView {
    start_time: TimeOfDay,
    end_time: TimeOfDay,
}

impl From<TimeSlot> for SlotView {
    fn from(s: TimeSlot) -> Self {
        Self {
            start_time: s.start,
            end_time: s.end,
        }
    }
}

#[derive(Deserialize)]
struct FieldRequest {
    name: Option<String>,
    capacity: Option<u32>,
    indoor: Option<bool>,
    maintenance_notes: Option<String>,
}

impl FieldRequest {
    fn into_attrs(self) -> Result<FieldAttrs, ApiError> {
        let Some(name) = self.name else {
            return Err(ApiError::missing_fields(vec!["name"]));
        };
        Ok(FieldAttrs {
            name,
            capacity: self.capacity.unwrap_or(22),
            indoor: self.indoor.unwrap_or(false),
            maintenance_notes: self.maintenance_notes,
        })
    }
}

#[derive(Deserialize)]
struct CreateBookingRequest {
    field_id: Option<Ulid>,
    booking_title: Option<String>,
    booking_date: Option<NaiveDate>,
    start_time: Option<TimeOfDay>,
    end_time: Option<TimeOfDay>,
    booking_type: Option<BookingKind>,
    notes: Option<String>,
    recurrence: Option<Recurrence>,
}

impl CreateBookingRequest {
    fn into_create(self) -> Result<CreateBooking, ApiError> {
        let mut missing = Vec::new();
        if self.field_id.is_none() {
            missing.push("field_id");
        }
        if self.booking_title.is_none() {
            missing.push("booking_title");
        }
        if self.booking_date.is_none() {
            missing.push("booking_date");
        }
        if self.start_time.is_none() {
            missing.push("start_time");
        }
        if self.end_time.is_none() {
            missing.push("end_time");
        }
        if !missing.is_empty() {
            return Err(ApiError::missing_fields(missing));
        }
        Ok(CreateBooking {
            field_id: self.field_id.unwrap(),
            title: self.booking_title.unwrap(),
            date: self.booking_date.unwrap(),
            slot: TimeSlot {
                start: self.start_time.unwrap(),
                end: self.end_time.unwrap(),
            },
            kind: self.booking_type.unwrap_or(BookingKind::Training),
            notes: self.notes,
            recurrence: self.recurrence,
        })
    }
}

/// Absent key = keep, explicit `"notes": null` = clear.
fn double_option<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

#[derive(Deserialize)]
struct UpdateBookingRequest {
    booking_title: Option<String>,
    booking_date: Option<NaiveDate>,
    start_time: Option<TimeOfDay>,
    end_time: Option<TimeOfDay>,
    booking_type: Option<BookingKind>,
    status: Option<BookingStatus>,
    #[serde(default, deserialize_with = "double_option")]
    notes: Option<Option<String>>,
}

impl From<UpdateBookingRequest> for BookingPatch {
    fn from(r: UpdateBookingRequest) -> Self {
        BookingPatch {
            title: r.booking_title,
            date: r.booking_date,
            start: r.start_time,
            end: r.end_time,
            kind: r.booking_type,
            status: r.status,
            notes: r.notes,
        }
    }
}

#[derive(Deserialize)]
struct ListBookingsQuery {
    field_id: Option<Ulid>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    booking_type: Option<BookingKind>,
    status: Option<BookingStatus>,
}

#[derive(Deserialize)]
struct AvailabilityQuery {
    field_id: Option<Ulid>,
    date: Option<NaiveDate>,
    start_time: Option<TimeOfDay>,
    end_time: Option<TimeOfDay>,
}

#[derive(Deserialize)]
struct RangeQuery {
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
}

#[derive(Deserialize)]
struct CancelQuery {
    reason: Option<String>,
}

// ── Handlers ──────────────────────────────────────────────────────

/// Academy = the `x-academy` header; absent means the default tenant.
fn academy_engine(state: &AppState, headers: &HeaderMap) -> Result<Arc<Engine>, ApiError> {
    let academy = headers
        .get("x-academy")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("default");
    Ok(state.tenants.get_or_create(academy)?)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

async fn list_fields(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let engine = academy_engine(&state, &headers)?;
    Ok(Json(engine.list_fields().await).into_response())
}

async fn create_field(
    State(state): State<AppState>,
    headers: HeaderMap,
    Extension(principal): Extension<Principal>,
    Json(req): Json<FieldRequest>,
) -> Result<Response, ApiError> {
    if !principal.role.is_privileged() {
        return Err(EngineError::Forbidden.into());
    }
    let engine = academy_engine(&state, &headers)?;
    let id = Ulid::new();
    engine.create_field(id, req.into_attrs()?).await?;
    info!("field {id} created by {}", principal.user);
    Ok((StatusCode::CREATED, Json(json!({"id": id.to_string()}))).into_response())
}

async fn update_field(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Ulid>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<FieldRequest>,
) -> Result<Response, ApiError> {
    if !principal.role.is_privileged() {
        return Err(EngineError::Forbidden.into());
    }
    let engine = academy_engine(&state, &headers)?;
    engine.update_field(id, req.into_attrs()?).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn deactivate_field(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Ulid>,
    Extension(principal): Extension<Principal>,
) -> Result<Response, ApiError> {
    if !principal.role.is_privileged() {
        return Err(EngineError::Forbidden.into());
    }
    let engine = academy_engine(&state, &headers)?;
    engine.deactivate_field(id).await?;
    info!("field {id} deactivated by {}", principal.user);
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn list_bookings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<ListBookingsQuery>,
) -> Result<Response, ApiError> {
    let engine = academy_engine(&state, &headers)?;
    let filter = BookingFilter {
        field_id: q.field_id,
        from: q.from,
        to: q.to,
        kind: q.booking_type,
        status: q.status,
    };
    let (bookings, stats) = engine.list_bookings(&filter).await?;
    Ok(Json(json!({
        "bookings": bookings.into_iter().map(BookingResponse::from).collect::<Vec<_>>(),
        "stats": stats,
    }))
    .into_response())
}

async fn check_availability(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<AvailabilityQuery>,
) -> Result<Response, ApiError> {
    let mut missing = Vec::new();
    if q.field_id.is_none() {
        missing.push("field_id");
    }
    if q.date.is_none() {
        missing.push("date");
    }
    if q.start_time.is_none() {
        missing.push("start_time");
    }
    if q.end_time.is_none() {
        missing.push("end_time");
    }
    if !missing.is_empty() {
        return Err(ApiError::missing_fields(missing));
    }

    let engine = academy_engine(&state, &headers)?;
    let result = engine
        .check_availability(
            q.field_id.unwrap(),
            q.date.unwrap(),
            TimeSlot {
                start: q.start_time.unwrap(),
                end: q.end_time.unwrap(),
            },
        )
        .await?;
    Ok(Json(json!({
        "is_available": result.is_available,
        "conflicts": result.conflicts.into_iter().map(BookingResponse::from).collect::<Vec<_>>(),
        "alternative_slots": result.alternative_slots.into_iter().map(SlotView::from).collect::<Vec<_>>(),
    }))
    .into_response())
}

async fn bookings_for_field(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(field_id): Path<Ulid>,
    Query(q): Query<RangeQuery>,
) -> Result<Response, ApiError> {
    let engine = academy_engine(&state, &headers)?;
    let bookings = engine.bookings_for_field(field_id, q.from, q.to).await?;
    Ok(Json(
        bookings
            .into_iter()
            .map(BookingResponse::from)
            .collect::<Vec<_>>(),
    )
    .into_response())
}

/// Server-sent events: every committed change to the field's schedule,
/// serialized as JSON. Slow consumers that lag behind the broadcast buffer
/// skip missed events rather than stalling writers.
async fn watch_field(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(field_id): Path<Ulid>,
) -> Result<Sse<impl Stream<Item = Result<sse::Event, Infallible>>>, ApiError> {
    let engine = academy_engine(&state, &headers)?;
    if engine.get_field(&field_id).is_none() {
        return Err(ApiError::not_found());
    }

    let rx = engine.notify.subscribe(field_id);
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let data = serde_json::to_string(&event).unwrap_or_default();
                    return Some((Ok(sse::Event::default().data(data)), rx));
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn create_booking(
    State(state): State<AppState>,
    headers: HeaderMap,
    Extension(principal): Extension<Principal>,
    Json(req): Json<CreateBookingRequest>,
) -> Result<Response, ApiError> {
    if !principal.role.can_book() {
        return Err(EngineError::Forbidden.into());
    }
    let engine = academy_engine(&state, &headers)?;
    let booking = engine.create_booking(req.into_create()?, &principal).await?;
    info!("booking {} created by {}", booking.id, principal.user);
    Ok((StatusCode::CREATED, Json(BookingResponse::from(booking))).into_response())
}

async fn update_booking(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Ulid>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<UpdateBookingRequest>,
) -> Result<Response, ApiError> {
    if !principal.role.can_book() {
        return Err(EngineError::Forbidden.into());
    }
    let engine = academy_engine(&state, &headers)?;
    let booking = engine.update_booking(id, req.into(), &principal).await?;
    Ok(Json(BookingResponse::from(booking)).into_response())
}

async fn cancel_booking(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Ulid>,
    Extension(principal): Extension<Principal>,
    Query(q): Query<CancelQuery>,
) -> Result<Response, ApiError> {
    if !principal.role.can_book() {
        return Err(EngineError::Forbidden.into());
    }
    let engine = academy_engine(&state, &headers)?;
    engine.cancel_booking(id, q.reason, &principal).await?;
    info!("booking {id} cancelled by {}", principal.user);
    Ok(StatusCode::NO_CONTENT.into_response())
}
