use anyhow::Context;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

mod config;
mod error;
mod functions;
mod schema;
mod services;
mod store;

#[cfg(test)]
mod testing;

use config::{Settings, SharedConfig};
use functions::{
    AppState, Notifier, Reconciler, SyncEngine, SyncRequest, TicketLinks, TicketLocks,
    TicketPipeline, build_router,
};
use services::{
    ChatClient, ChatService, DryRunChat, HttpKeySource, PsaClient, PsaClientConfig, PsaService,
    SignatureValidator,
};
use store::{PgStore, Store};

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
    shutdown.cancel();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let settings = Settings::load()?;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&settings.postgres_dsn)
        .await
        .context("failed to connect to postgres")?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run migrations")?;
    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool));

    let app_config = match store.get_app_config().await? {
        Some(config) => config,
        None => {
            tracing::info!("seeding live config from settings");
            store
                .upsert_app_config(&settings.initial_app_config())
                .await?
        }
    };
    let config = SharedConfig::new(app_config.clone());

    let psa: Arc<dyn PsaService> = Arc::new(PsaClient::new(PsaClientConfig {
        base_url: settings.cw_api_url.clone(),
        company_id: settings.cw_company_id.clone(),
        public_key: settings.cw_pub_key.clone(),
        private_key: settings.cw_priv_key.clone(),
        client_id: settings.cw_client_id.clone(),
    })?);
    if settings.mock_connectwise {
        tracing::warn!("mock_connectwise set: psa credentials were not validated");
    }

    let mut chat: Arc<dyn ChatService> = Arc::new(ChatClient::new(
        settings.webex_api_url.clone(),
        settings.webex_secret.clone(),
    )?);
    if settings.mock_webex {
        tracing::warn!("mock_webex set: chat messages will be logged, not sent");
        chat = Arc::new(DryRunChat::new(chat));
    }

    let links = TicketLinks {
        view_url: settings.cw_ticket_url.clone(),
        company_id: settings.cw_company_id.clone(),
    };
    let reconciler = Reconciler::new(psa.clone(), store.clone(), settings.cache_ttl());
    let notifier = Arc::new(Notifier::new(
        store.clone(),
        chat.clone(),
        config.clone(),
        links,
        settings.excluded_members(),
    ));
    let pipeline = Arc::new(TicketPipeline::new(
        psa.clone(),
        store.clone(),
        reconciler,
        notifier,
        Arc::new(TicketLocks::new()),
    ));
    let sync = SyncEngine::new(
        psa.clone(),
        chat,
        store.clone(),
        pipeline.clone(),
        config.clone(),
    );
    let shutdown = CancellationToken::new();

    let signatures = if settings.skip_hooks {
        tracing::warn!("skip_hooks set: webhook signatures are not checked");
        None
    } else {
        Some(SignatureValidator::new(Arc::new(HttpKeySource::new()?)))
    };
    if !settings.skip_hooks {
        let url = settings.callback_url();
        if let Err(e) = functions::hooks::register_callbacks(psa.as_ref(), &url).await {
            tracing::error!(error = %e, url = %url, "failed to register psa callback");
        }
    }

    if !app_config.skip_launch_syncs {
        let engine = sync.clone();
        let ctx = shutdown.child_token();
        tokio::spawn(async move {
            let req = SyncRequest {
                cw_boards: true,
                webex_recipients: true,
                ..SyncRequest::default()
            };
            if let Err(e) = engine.sync(&ctx, req).await {
                tracing::error!(error = %e, "launch sync failed");
            }
        });
    }

    let state = AppState {
        store,
        pipeline,
        sync,
        config,
        signatures,
        admin_key: (!settings.skip_auth).then(|| settings.admin_api_key.clone()),
        shutdown: shutdown.clone(),
    };

    let listener = tokio::net::TcpListener::bind(&settings.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.listen_addr))?;
    tracing::info!(addr = %settings.listen_addr, "ticketbridge listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .context("server error")?;
    Ok(())
}
