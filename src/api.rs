use std::sync::Arc;

use axum::{
    extract::{Path, Query, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::dispatch::render::verify_unsubscribe_token;
use crate::dispatch::DeliveryResult;
use crate::error::BriefError;
use crate::lifecycle::{self, TransitionOutcome};
use crate::scheduler::{JobOutcome, Scheduler};
use crate::sources::RatingUpdate;

pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    /// `None` leaves admin routes open (local development).
    pub admin_token: Option<String>,
}

impl AppState {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        let admin_token = scheduler
            .config()
            .admin
            .token
            .clone()
            .filter(|t| !t.is_empty());
        Self {
            scheduler,
            admin_token,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/admin/briefs/{date}/generate", post(generate))
        .route("/admin/briefs/{date}/publish", post(publish))
        .route("/admin/briefs/{date}/skip", post(skip))
        .route("/admin/briefs/{date}/test-send", post(test_send))
        .route("/admin/dispatch/run", post(dispatch_run))
        .route("/admin/sources/ratings", post(apply_ratings))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/briefs/{date}", get(get_brief))
        .route("/brief/unsubscribe", get(unsubscribe))
        .merge(admin)
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// HTTP face of `BriefError`.
pub struct ApiError(BriefError);

impl From<BriefError> for ApiError {
    fn from(e: BriefError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            BriefError::BriefNotFound(_) => StatusCode::NOT_FOUND,
            BriefError::BriefExists(_)
            | BriefError::InvalidTransition { .. }
            | BriefError::ItemsLocked(_) => StatusCode::CONFLICT,
            BriefError::InsufficientCandidates { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            BriefError::Config(_) => StatusCode::BAD_REQUEST,
            BriefError::Store(_) | BriefError::Anyhow(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(error = %self.0, "admin request failed");
        }
        let body = Json(serde_json::json!({
            "error": self.0.kind(),
            "message": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

async fn require_admin(
    State(state): State<AppState>,
    headers: HeaderMap,
    req: Request,
    next: Next,
) -> Response {
    if let Some(expected) = &state.admin_token {
        let given = headers
            .get(ADMIN_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if given != expected {
            return (StatusCode::UNAUTHORIZED, "missing or invalid admin token").into_response();
        }
    }
    next.run(req).await
}

async fn get_brief(
    State(state): State<AppState>,
    Path(date): Path<NaiveDate>,
) -> ApiResult<crate::model::DailyBrief> {
    let brief = state
        .scheduler
        .store()
        .brief(date)
        .await?
        .ok_or(BriefError::BriefNotFound(date))?;
    Ok(Json(brief))
}

async fn generate(
    State(state): State<AppState>,
    Path(date): Path<NaiveDate>,
) -> ApiResult<JobOutcome> {
    let outcome = state.scheduler.generate_now(date, Utc::now()).await?;
    info!(%date, ?outcome, "manual generation");
    Ok(Json(outcome))
}

#[derive(Serialize)]
struct TransitionResp {
    date: NaiveDate,
    outcome: TransitionOutcome,
}

async fn publish(
    State(state): State<AppState>,
    Path(date): Path<NaiveDate>,
) -> ApiResult<TransitionResp> {
    let outcome = lifecycle::publish(&**state.scheduler.store(), date, Utc::now()).await?;
    Ok(Json(TransitionResp { date, outcome }))
}

#[derive(Deserialize)]
struct SkipReq {
    reason: String,
}

async fn skip(
    State(state): State<AppState>,
    Path(date): Path<NaiveDate>,
    Json(body): Json<SkipReq>,
) -> ApiResult<TransitionResp> {
    let reason = body.reason.trim();
    if reason.is_empty() {
        return Err(BriefError::Config("skip reason must not be empty".into()).into());
    }
    let outcome = lifecycle::skip(&**state.scheduler.store(), date, reason, Utc::now()).await?;
    Ok(Json(TransitionResp { date, outcome }))
}

#[derive(Deserialize)]
struct TestSendReq {
    email: String,
}

#[derive(Serialize)]
struct TestSendResp {
    delivered: bool,
    detail: Option<String>,
}

async fn test_send(
    State(state): State<AppState>,
    Path(date): Path<NaiveDate>,
    Json(body): Json<TestSendReq>,
) -> ApiResult<TestSendResp> {
    let result = state
        .scheduler
        .dispatcher()
        .test_send(date, body.email.trim())
        .await?;
    let resp = match result {
        DeliveryResult::Accepted => TestSendResp {
            delivered: true,
            detail: None,
        },
        DeliveryResult::Transient(m) | DeliveryResult::Permanent(m) => TestSendResp {
            delivered: false,
            detail: Some(m),
        },
    };
    Ok(Json(resp))
}

async fn dispatch_run(State(state): State<AppState>) -> ApiResult<crate::dispatch::DispatchReport> {
    let report = state.scheduler.dispatcher().run_hourly(Utc::now()).await?;
    Ok(Json(report))
}

#[derive(Serialize)]
struct RatingsResp {
    changed: usize,
}

async fn apply_ratings(
    State(state): State<AppState>,
    Json(updates): Json<Vec<RatingUpdate>>,
) -> Json<RatingsResp> {
    let changed = state.scheduler.apply_rating_feed(updates, Utc::now()).await;
    Json(RatingsResp { changed })
}

#[derive(Deserialize)]
struct UnsubscribeQuery {
    sid: u64,
    token: String,
}

async fn unsubscribe(
    State(state): State<AppState>,
    Query(q): Query<UnsubscribeQuery>,
) -> Result<&'static str, ApiError> {
    let secret = &state.scheduler.config().dispatch.unsubscribe_secret;
    if !verify_unsubscribe_token(secret, q.sid, &q.token) {
        return Err(BriefError::Config("invalid unsubscribe link".into()).into());
    }
    if state.scheduler.store().unsubscribe(q.sid).await? {
        info!(subscriber_id = q.sid, "unsubscribed");
    }
    Ok("You have been unsubscribed.")
}
