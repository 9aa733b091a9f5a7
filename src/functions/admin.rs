use crate::error::AppError;
use crate::functions::router::AppState;
use crate::functions::sync::{PreloadRequest, SyncRequest};
use crate::schema::{AppConfig, Board, ChatRecipient, NewUserForward, NotifierRule, UserForward};
use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::Next;
use axum::response::Response;
use serde::Deserialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

type JsonBody<T> = Result<Json<T>, JsonRejection>;
type IdPath = Result<Path<i32>, PathRejection>;

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let (a, b) = (Sha256::digest(a), Sha256::digest(b));
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Bearer-token guard for operator routes. Disabled when no key is set.
pub async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(expected) = state.admin_key.as_deref() else {
        return Ok(next.run(request).await);
    };
    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::AuthFailure("missing bearer token".into()))?;
    if !constant_time_eq(provided.trim().as_bytes(), expected.as_bytes()) {
        return Err(AppError::AuthFailure("invalid api key".into()));
    }
    Ok(next.run(request).await)
}

pub async fn ping() -> Json<Value> {
    Json(json!({ "result": "pong" }))
}

pub async fn start_sync(
    State(state): State<AppState>,
    payload: JsonBody<SyncRequest>,
) -> Result<Json<Value>, AppError> {
    let Json(req) = payload?;
    let flight = state.sync.begin()?;
    let engine = state.sync.clone();
    let ctx = state.shutdown.child_token();
    tokio::spawn(async move {
        if let Err(e) = engine.run(&ctx, req, flight).await {
            tracing::error!(error = %e, "sync failed");
        }
    });
    Ok(Json(json!({ "result": "sync started" })))
}

pub async fn sync_status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "status": state.sync.is_running() }))
}

pub async fn start_preload(
    State(state): State<AppState>,
    payload: JsonBody<PreloadRequest>,
) -> Result<Json<Value>, AppError> {
    let Json(req) = payload?;
    let flight = state.sync.begin()?;
    let engine = state.sync.clone();
    let ctx = state.shutdown.child_token();
    tokio::spawn(async move {
        if let Err(e) = engine.run(&ctx, req.into(), flight).await {
            tracing::error!(error = %e, "preload failed");
        }
    });
    Ok(Json(json!({ "result": "preload started" })))
}

pub async fn get_config(State(state): State<AppState>) -> Json<AppConfig> {
    Json(state.config.snapshot().as_ref().clone())
}

pub async fn put_config(
    State(state): State<AppState>,
    payload: JsonBody<AppConfig>,
) -> Result<Json<AppConfig>, AppError> {
    let Json(config) = payload?;
    if config.max_message_length <= 0 {
        return Err(AppError::Validation("max_message_length must be positive".into()));
    }
    if config.max_concurrent_syncs <= 0 {
        return Err(AppError::Validation("max_concurrent_syncs must be positive".into()));
    }
    let saved = state.store.upsert_app_config(&config).await?;
    state.config.replace(saved.clone());
    tracing::info!(?saved, "config updated");
    Ok(Json(saved))
}

pub async fn list_boards(State(state): State<AppState>) -> Result<Json<Vec<Board>>, AppError> {
    Ok(Json(state.store.list_boards().await?))
}

#[derive(Debug, Deserialize)]
pub struct BoardNotify {
    pub enabled: bool,
}

pub async fn set_board_notify(
    State(state): State<AppState>,
    id: IdPath,
    payload: JsonBody<BoardNotify>,
) -> Result<Json<Board>, AppError> {
    let Path(id) = id?;
    let Json(body) = payload?;
    let board = state.store.set_board_notify(id, body.enabled).await?;
    tracing::info!(board_id = id, enabled = body.enabled, "board notifications toggled");
    Ok(Json(board))
}

pub async fn list_recipients(
    State(state): State<AppState>,
) -> Result<Json<Vec<ChatRecipient>>, AppError> {
    Ok(Json(state.store.list_recipients().await?))
}

pub async fn list_notifiers(
    State(state): State<AppState>,
) -> Result<Json<Vec<NotifierRule>>, AppError> {
    Ok(Json(state.store.list_rules().await?))
}

#[derive(Debug, Deserialize)]
pub struct NewNotifierRule {
    pub board_id: i32,
    pub recipient_id: i32,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

pub async fn create_notifier(
    State(state): State<AppState>,
    payload: JsonBody<NewNotifierRule>,
) -> Result<(StatusCode, Json<NotifierRule>), AppError> {
    let Json(rule) = payload?;
    let created = state
        .store
        .insert_rule(rule.board_id, rule.recipient_id, rule.enabled)
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn delete_notifier(
    State(state): State<AppState>,
    id: IdPath,
) -> Result<StatusCode, AppError> {
    let Path(id) = id?;
    state.store.delete_rule(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_forwards(
    State(state): State<AppState>,
) -> Result<Json<Vec<UserForward>>, AppError> {
    Ok(Json(state.store.list_forwards().await?))
}

pub async fn create_forward(
    State(state): State<AppState>,
    payload: JsonBody<NewUserForward>,
) -> Result<(StatusCode, Json<UserForward>), AppError> {
    let Json(forward) = payload?;
    if forward.source_id == forward.dest_id {
        return Err(AppError::Validation("a recipient cannot forward to itself".into()));
    }
    if let (Some(start), Some(end)) = (forward.start_date, forward.end_date)
        && end <= start
    {
        return Err(AppError::Validation("end_date must be after start_date".into()));
    }
    let created = state.store.insert_forward(&forward).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn delete_forward(
    State(state): State<AppState>,
    id: IdPath,
) -> Result<StatusCode, AppError> {
    let Path(id) = id?;
    state.store.delete_forward(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
