use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use dispatch_core::types::{Driver, DriverId, Job, JobId, NewDriver, NewJob};
use tokio_stream::StreamExt;

use crate::error::WebError;
use crate::model::{
    sse_event_name, ClaimRequest, DriverRequest, JobListQuery, PhotoRequest, StatusRequest,
};
use crate::state::WebState;

pub const SSE_KEEP_ALIVE: Duration = Duration::from_secs(15);

pub fn router(state: WebState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/jobs", get(list_jobs).post(create_job))
        .route("/api/jobs/{id}/claim", post(claim_job))
        .route("/api/jobs/{id}/status", post(set_status))
        .route("/api/jobs/{id}/photo", post(attach_photo))
        .route("/api/drivers", get(list_drivers).post(register_driver))
        .route("/api/drivers/{id}/toggle", post(toggle_driver))
        .route("/api/events", get(stream_events))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "ok": true }))
}

async fn create_job(
    State(state): State<WebState>,
    Json(spec): Json<NewJob>,
) -> Result<Json<Job>, WebError> {
    let job = state.call(move |svc| svc.create_job(&spec)).await?;
    Ok(Json(job))
}

async fn list_jobs(
    State(state): State<WebState>,
    Query(query): Query<JobListQuery>,
) -> Result<Json<Vec<Job>>, WebError> {
    // An empty `?status=` means no filter.
    let status = query.status.filter(|s| !s.is_empty());
    let jobs = state
        .call(move |svc| svc.list_jobs(status.as_deref()))
        .await?;
    Ok(Json(jobs))
}

async fn claim_job(
    State(state): State<WebState>,
    Path(id): Path<i64>,
    Json(request): Json<ClaimRequest>,
) -> Result<Json<Job>, WebError> {
    let job = state
        .call(move |svc| svc.claim(JobId(id), &request.driver_name))
        .await?;
    Ok(Json(job))
}

async fn set_status(
    State(state): State<WebState>,
    Path(id): Path<i64>,
    Json(request): Json<StatusRequest>,
) -> Result<Json<Job>, WebError> {
    let job = state
        .call(move |svc| svc.set_status(JobId(id), &request.status))
        .await?;
    Ok(Json(job))
}

async fn attach_photo(
    State(state): State<WebState>,
    Path(id): Path<i64>,
    Json(request): Json<PhotoRequest>,
) -> Result<Json<Job>, WebError> {
    let job = state
        .call(move |svc| svc.attach_photo(JobId(id), &request.photo_path))
        .await?;
    Ok(Json(job))
}

async fn list_drivers(State(state): State<WebState>) -> Result<Json<Vec<Driver>>, WebError> {
    let drivers = state.call(|svc| svc.list_drivers()).await?;
    Ok(Json(drivers))
}

async fn register_driver(
    State(state): State<WebState>,
    Json(request): Json<DriverRequest>,
) -> Result<Json<Driver>, WebError> {
    let spec = NewDriver::from(request);
    let driver = state.call(move |svc| svc.register_driver(&spec)).await?;
    Ok(Json(driver))
}

async fn toggle_driver(
    State(state): State<WebState>,
    Path(id): Path<i64>,
) -> Result<Json<Driver>, WebError> {
    let driver = state
        .call(move |svc| svc.toggle_driver(DriverId(id)))
        .await?;
    Ok(Json(driver))
}

async fn stream_events(
    State(state): State<WebState>,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let stream = state.subscribe().map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        Ok::<SseEvent, Infallible>(SseEvent::default().event(sse_event_name(&event)).data(data))
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(SSE_KEEP_ALIVE)
            .text("keepalive"),
    )
}
