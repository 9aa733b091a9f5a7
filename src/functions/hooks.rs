use crate::error::AppError;
use crate::functions::pipeline::{ProcessOptions, TicketAction};
use crate::functions::router::AppState;
use crate::services::{PsaCallback, PsaError, PsaService, SIGNATURE_HEADER};
use axum::Json;
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::Instrument;
use uuid::Uuid;

const MAX_WEBHOOK_BYTES: usize = 1024 * 1024;

pub const CALLBACK_PATH: &str = "/hooks/psa/tickets";

/// Ticket event as posted by the PSA callback.
#[derive(Debug, Clone, Deserialize)]
pub struct TicketWebhook {
    #[serde(alias = "ID")]
    pub id: i32,
    #[serde(alias = "Action")]
    pub action: TicketAction,
}

/// Buffers the body, checks its signature and hands the same bytes on.
pub async fn verify_psa_signature(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(validator) = state.signatures.as_ref() else {
        return Ok(next.run(request).await);
    };

    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, MAX_WEBHOOK_BYTES)
        .await
        .map_err(|e| AppError::Validation(format!("reading webhook body: {e}")))?;
    let header = parts
        .headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    validator
        .validate(&bytes, header)
        .await
        .map_err(|e| AppError::SignatureInvalid(e.to_string()))?;

    Ok(next.run(Request::from_parts(parts, Body::from(bytes))).await)
}

/// Acknowledges immediately; processing continues in a detached task that
/// only observes process shutdown.
pub async fn ticket_webhook(
    State(state): State<AppState>,
    payload: Result<Json<TicketWebhook>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(hook) = payload?;
    let trace_id = Uuid::new_v4();
    let opts = ProcessOptions {
        override_notify: false,
        attempt_notify: state.config.snapshot().attempt_notify,
        trace_id: Some(trace_id),
    };
    let ctx = state.shutdown.child_token();
    let pipeline = state.pipeline.clone();
    let span = tracing::info_span!(
        "ticket_webhook",
        ticket_id = hook.id,
        action = %hook.action,
        %trace_id
    );

    tokio::spawn(
        async move {
            match pipeline.process_ticket(&ctx, hook.id, hook.action, opts).await {
                Ok(outcome) => tracing::debug!(?outcome, "ticket webhook handled"),
                Err(e) => tracing::error!(
                    ticket_id = hook.id,
                    action = %hook.action,
                    error = %e,
                    "ticket webhook processing failed"
                ),
            }
        }
        .instrument(span),
    );

    Ok(Json(json!({ "result": "ticket payload received" })))
}

/// Leaves exactly one active ticket callback pointing at `url`.
pub async fn register_callbacks(psa: &dyn PsaService, url: &str) -> Result<PsaCallback, PsaError> {
    let mut keep = None;
    for callback in psa.list_callbacks().await? {
        if callback.url != url {
            continue;
        }
        let usable = callback.kind == "ticket" && callback.level == "owner" && !callback.inactive_flag;
        if keep.is_none() && usable {
            keep = Some(callback);
        } else {
            psa.delete_callback(callback.id).await?;
            tracing::info!(callback_id = callback.id, url, "removed stale psa callback");
        }
    }
    if let Some(callback) = keep {
        tracing::info!(callback_id = callback.id, url, "psa callback already registered");
        return Ok(callback);
    }

    let created = psa
        .post_callback(&PsaCallback {
            id: 0,
            description: "ticketbridge ticket events".into(),
            url: url.to_string(),
            object_id: 1,
            kind: "ticket".into(),
            level: "owner".into(),
            inactive_flag: false,
        })
        .await?;
    tracing::info!(callback_id = created.id, url, "registered psa callback");
    Ok(created)
}
