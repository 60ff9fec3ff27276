/*
 * SPDX-FileCopyrightText: 2026 Comentario Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! The comentario_server binary: configuration, service wiring, the axum
//! router, and graceful shutdown.

use axum::body::Bytes;
use axum::extract::{Path as UrlPath, State};
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, delete, get, post, put};
use axum::Router;
use comentario_core::authsessions::AuthSessionService;
use comentario_core::cleanup::CleanupService;
use comentario_core::comments::CommentService;
use comentario_core::config_store::ConfigStore;
use comentario_core::db::Database;
use comentario_core::domains::DomainService;
use comentario_core::mail::Mailer;
use comentario_core::pages::PageService;
use comentario_core::perlustration::{AkismetScanner, PerlustrationService, Scanner};
use comentario_core::tokens::TokenService;
use comentario_core::users::UserService;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, info_span};

mod api;
mod auth;
mod comments_api;
mod config;
mod errors;
mod oauth;
mod plugins;
mod ws_hub;

use plugins::{ComentarioPlugin, HostConfig, PluginRegistry, PluginRequest, PluginResponse};
use ws_hub::HubHandle;

static REQ_ID: AtomicU64 = AtomicU64::new(1);

fn next_request_id() -> String {
    let id = REQ_ID.fetch_add(1, Ordering::Relaxed);
    format!("req-{id}")
}

#[derive(Clone)]
pub struct AppState {
    pub cfg: config::ServerConfig,
    pub secrets: config::Secrets,
    pub db: Database,
    pub users: UserService,
    pub tokens: TokenService,
    pub authsessions: AuthSessionService,
    pub domains: DomainService,
    pub pages: PageService,
    pub comments: CommentService,
    pub cfgstore: ConfigStore,
    pub perlustration: PerlustrationService,
    pub mailer: Mailer,
    pub plugins: PluginRegistry,
    pub hub: Option<HubHandle>,
    pub http: reqwest::Client,
}

/// Compiled-in plugins registered at startup. Empty by default; deployments
/// add their modules here.
fn plugin_candidates() -> Vec<Arc<dyn ComentarioPlugin>> {
    Vec::new()
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse().expect("valid directive")),
        )
        .init();

    let cfg = config::load_config().expect("config load");
    let secrets = config::Secrets::load(&cfg.secrets_path).expect("secrets load");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let db = Database::connect(&secrets.db_config(), shutdown_rx.clone())
        .await
        .expect("database connect");
    if cfg.e2e {
        db.recreate_schema(&cfg.migrations_path, cfg.e2e_seed_path.as_deref())
            .await
            .expect("e2e schema recreate");
    } else {
        let applied = db.migrate(&cfg.migrations_path).await.expect("migrations");
        info!(applied, "migrations up to date");
    }

    let cfgstore = ConfigStore::new(db.clone(), Duration::from_secs(cfg.domain_config_ttl_secs));
    cfgstore.load().await.expect("configuration load");

    let users = UserService::new(db.clone(), cfg.log_full_ips);
    let tokens = TokenService::new(db.clone());
    let authsessions = AuthSessionService::new(db.clone());
    let domains = DomainService::new(db.clone());
    let pages = PageService::new(db.clone(), cfg.log_full_ips);
    let comments = CommentService::new(db.clone());

    // Startup elevation is fatal on failure: a misnamed superuser must not go
    // unnoticed.
    if !cfg.superuser.is_empty() {
        let user = users
            .elevate_superuser(&cfg.superuser)
            .await
            .expect("superuser elevation");
        info!(user = %user.email, "superuser ensured");
    }

    let mut scanners: Vec<Box<dyn Scanner>> = Vec::new();
    if !secrets.akismet.key.is_empty() {
        scanners.push(Box::new(AkismetScanner::new(secrets.akismet.key.clone())));
    }
    let perlustration = PerlustrationService::new(scanners);

    let mailer = Mailer::new(&secrets.smtp_config(), &cfg.email_from).expect("mailer init");

    let cleanup = CleanupService::new(db.clone(), cfg.page_view_retention_days);
    let cleanup_handles = cleanup.spawn(shutdown_rx.clone());

    let hub = if cfg.no_live_update {
        info!("live updates disabled");
        None
    } else {
        Some(ws_hub::spawn_hub(cfg.ws_max_clients, shutdown_rx.clone()))
    };

    let plugins = PluginRegistry::build(
        plugin_candidates(),
        db.clone(),
        HostConfig {
            base_url: cfg.base_url.clone(),
            default_lang: "en".to_string(),
        },
        &secrets,
    )
    .await
    .expect("plugin registry");

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .expect("http client init");

    let state = AppState {
        cfg,
        secrets,
        db,
        users,
        tokens,
        authsessions,
        domains,
        pages,
        comments,
        cfgstore,
        perlustration,
        mailer,
        plugins,
        hub,
        http,
    };

    let app = router(state.clone());
    let bind = state.cfg.bind;
    info!("comentario_server listening on http://{bind}");
    let listener = tokio::net::TcpListener::bind(bind).await.expect("bind");
    let mut shutdown = shutdown_rx.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
        .expect("server");

    // Connections are drained; stop the rest in order.
    for handle in cleanup_handles {
        let _ = handle.await;
    }
    state.plugins.shutdown().await;
    info!("shut down cleanly");
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("sigterm handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn router(state: AppState) -> Router {
    Router::new()
        // Local accounts.
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/signup", post(auth::signup))
        .route("/api/auth/confirm", get(auth::confirm_email))
        .route("/api/auth/pwd-reset", post(auth::request_pwd_reset))
        .route("/api/auth/pwd-reset/complete", post(auth::complete_pwd_reset))
        .route("/api/auth/password", put(auth::change_password))
        .route("/api/user", get(auth::current_user))
        .route("/api/mail/unsubscribe", get(auth::unsubscribe))
        // Federated sign-in.
        .route("/api/auth/oauth/:provider", get(oauth::oauth_init))
        .route("/api/auth/oauth/:provider/callback", get(oauth::oauth_callback))
        .route("/api/auth/sso", get(oauth::sso_init))
        .route("/api/auth/sso/callback", get(oauth::sso_callback))
        // The embed surface.
        .route("/api/embed/page", post(comments_api::register_page))
        .route(
            "/api/embed/comments",
            get(comments_api::list_comments).post(comments_api::create_comment),
        )
        .route(
            "/api/embed/comments/:id",
            put(comments_api::edit_comment).delete(comments_api::delete_comment),
        )
        .route("/api/embed/comments/:id/vote", post(comments_api::vote_comment))
        .route(
            "/api/embed/comments/:id/moderate",
            post(comments_api::moderate_comment),
        )
        // Management.
        .route("/api/domains", get(api::list_domains).post(api::create_domain))
        .route(
            "/api/domains/:id",
            get(api::get_domain).put(api::update_domain).delete(api::delete_domain),
        )
        .route("/api/domains/:id/sso-secret", post(api::rotate_sso_secret))
        .route("/api/domains/:id/moderators", get(api::list_moderators))
        .route("/api/domains/:id/users/:user_id", put(api::save_domain_user))
        .route(
            "/api/domains/:id/pages/:page_id/readonly",
            put(api::set_page_readonly),
        )
        .route(
            "/api/domains/:id/config",
            get(api::get_domain_config).put(api::update_domain_config),
        )
        .route("/api/config", get(api::get_config).put(api::update_config))
        .route("/api/users/:id", get(api::get_user).delete(api::delete_user))
        .route("/api/users/:id/ban", put(api::ban_user))
        .route("/api/users/:id/lock", put(api::lock_user))
        .route("/api/users/:id/avatar", get(api::get_avatar))
        // Live updates.
        .route("/ws", get(ws_hub::ws_upgrade))
        .route("/healthz", get(api::healthz))
        .route("/readyz", get(api::readyz))
        // Plugin surfaces: API under /api/plugin, static everywhere else.
        .route("/api/plugin/*rest", any(plugin_api))
        .fallback(plugin_static)
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
                let request_id = req
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
                    .unwrap_or_else(next_request_id);
                info_span!(
                    "http",
                    method = %req.method(),
                    uri = %req.uri(),
                    request_id = %request_id,
                )
            }),
        )
        .with_state(state)
}

fn plugin_response(resp: PluginResponse) -> Response {
    let status = StatusCode::from_u16(resp.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        [(axum::http::header::CONTENT_TYPE, resp.content_type)],
        resp.body,
    )
        .into_response()
}

/// `ANY /api/plugin/<plugin-path>/…` — dispatched to the owning plugin with
/// the prefix stripped.
async fn plugin_api(
    State(state): State<AppState>,
    UrlPath(rest): UrlPath<String>,
    method: Method,
    body: Bytes,
) -> Response {
    let Some((plugin, remainder)) = state.plugins.resolve(&rest) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match plugin
        .api_request(PluginRequest {
            method,
            path: remainder.to_string(),
            body,
        })
        .await
    {
        Some(resp) => plugin_response(resp),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Unrouted paths go to the plugins' static surfaces, read-only methods only.
async fn plugin_static(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Response {
    if !matches!(method, Method::GET | Method::HEAD | Method::OPTIONS) {
        return StatusCode::NOT_FOUND.into_response();
    }
    let Some((plugin, remainder)) = state.plugins.resolve(uri.path()) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match plugin
        .static_request(PluginRequest {
            method,
            path: remainder.to_string(),
            body,
        })
        .await
    {
        Some(resp) => plugin_response(resp),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
