use crate::config::SharedConfig;
use crate::functions::hooks::{self, CALLBACK_PATH};
use crate::functions::admin;
use crate::functions::pipeline::TicketPipeline;
use crate::functions::sync::SyncEngine;
use crate::services::SignatureValidator;
use crate::store::Store;
use axum::Router;
use axum::middleware;
use axum::routing::{delete, get, post, put};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub pipeline: Arc<TicketPipeline>,
    pub sync: SyncEngine,
    pub config: SharedConfig,
    /// `None` when webhook signatures are not checked.
    pub signatures: Option<SignatureValidator>,
    /// `None` when admin auth is disabled.
    pub admin_key: Option<String>,
    pub shutdown: CancellationToken,
}

pub fn build_router(state: AppState) -> Router {
    let hooks = Router::new()
        .route(CALLBACK_PATH, post(hooks::ticket_webhook))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            hooks::verify_psa_signature,
        ));

    let admin = Router::new()
        .route("/sync", post(admin::start_sync))
        .route("/sync/status", get(admin::sync_status))
        .route("/preload", post(admin::start_preload))
        .route("/config", get(admin::get_config).put(admin::put_config))
        .route("/boards", get(admin::list_boards))
        .route("/boards/{id}/notify", put(admin::set_board_notify))
        .route("/recipients", get(admin::list_recipients))
        .route(
            "/notifiers",
            get(admin::list_notifiers).post(admin::create_notifier),
        )
        .route("/notifiers/{id}", delete(admin::delete_notifier))
        .route(
            "/forwards",
            get(admin::list_forwards).post(admin::create_forward),
        )
        .route("/forwards/{id}", delete(admin::delete_forward))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            admin::require_admin,
        ));

    Router::new()
        .route("/ping", get(admin::ping))
        .merge(hooks)
        .merge(admin)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
