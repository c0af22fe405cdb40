//! HTTP surface of the honeypot.
//!
//! Every inbound request passes the gate middleware first: a blocklisted
//! address gets 403, a throttled one 429, and both outcomes are recorded as
//! events. Allowed requests reach the deception endpoints, which serve the
//! mirrored artifact and capture whatever the client submits.

use std::{
    collections::{BTreeMap, HashSet},
    future::Future,
    net::SocketAddr,
    sync::Arc,
};

use axum::{
    extract::{ConnectInfo, Extension, Path, Request, State},
    http::{header, HeaderMap, StatusCode, Uri},
    middleware::{self, Next},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::error;

use crate::{
    analysis::{self, LogAnalyzer},
    blocklist::BlocklistStore,
    cloner::{decoy_login_page, Artifact, ContentCloner, TRAP_PATHS},
    config::Config,
    events::{CapturedDataStore, CapturedEvent, EventKind, EventLog},
    gate::{Decision, RateGate},
};

const LOAD_ERROR_PAGE: &str = "Error cargando el sitio clonado.";

const THANK_YOU_PAGE: &str = r#"<html><body><h2>¡Gracias!</h2><p>Te redirigimos al inicio.</p><a href="/">Volver</a></body></html>"#;

const ADMIN_PANEL_PAGE: &str = r#"<html><body>
<h1>Panel de Administración</h1>
<p>Usa los endpoints /stats, /analysis, /captured_data</p>
</body></html>"#;

/// Shared handles to the core services. Cheap to clone; all state lives
/// behind the Arcs.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub blocklist: Arc<BlocklistStore>,
    pub gate: Arc<RateGate>,
    pub events: Arc<EventLog>,
    pub captured: Arc<CapturedDataStore>,
    pub analyzer: Arc<LogAnalyzer>,
    pub cloner: Arc<ContentCloner>,
    pub artifact: Arc<RwLock<Option<Artifact>>>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let blocklist = Arc::new(BlocklistStore::load(config.blocklist_path()));
        let gate = Arc::new(RateGate::new(
            config.max_requests_per_minute,
            blocklist.clone(),
        ));
        let events = Arc::new(EventLog::new(
            config.event_log_path(),
            config.advanced_logging,
        ));
        let captured = Arc::new(CapturedDataStore::new(config.captured_data_path()));
        let analyzer = Arc::new(LogAnalyzer::new(events.clone(), blocklist.clone()));
        let cloner = Arc::new(ContentCloner::new(events.clone(), config.trap_injection));

        Self {
            config: Arc::new(config),
            blocklist,
            gate,
            events,
            captured,
            analyzer,
            cloner,
            artifact: Arc::new(RwLock::new(None)),
        }
    }

    /// Manual unblock. Membership removal is all it takes: the gate dropped
    /// the address's window when it tripped, so no history is replayed.
    pub fn unblock(&self, ip: &str) {
        match self.blocklist.remove(ip) {
            Ok(true) => record(
                self,
                &CapturedEvent::system(EventKind::Admin)
                    .with("action", "manual_unblock")
                    .with("ip", ip),
            ),
            Ok(false) => {}
            Err(e) => error!(%ip, error = %e, "failed to persist unblock"),
        }
    }
}

/// Identity of the requesting client, resolved once in the gate middleware
/// and handed to handlers through request extensions.
#[derive(Debug, Clone)]
pub struct ClientMeta {
    pub ip: String,
    pub user_agent: String,
    pub referer: String,
}

impl ClientMeta {
    fn resolve(headers: &HeaderMap, addr: SocketAddr) -> Self {
        let ip = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .unwrap_or_else(|| addr.ip().to_string());
        let user_agent = header_or(headers, header::USER_AGENT.as_str(), "Unknown");
        let referer = header_or(headers, header::REFERER.as_str(), "Direct");
        Self {
            ip,
            user_agent,
            referer,
        }
    }

    pub fn event(&self, kind: EventKind) -> CapturedEvent {
        CapturedEvent::new(kind, &self.ip, &self.user_agent, &self.referer)
    }
}

fn header_or(headers: &HeaderMap, name: &str, fallback: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(fallback)
        .to_string()
}

fn record(state: &AppState, event: &CapturedEvent) {
    if let Err(e) = state.events.append(event) {
        error!(error = %e, "failed to append event");
    }
}

/// Blocklist check, then rate check. Runs ahead of every route.
async fn request_gate(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut req: Request,
    next: Next,
) -> Response {
    let meta = ClientMeta::resolve(req.headers(), addr);

    if state.blocklist.contains(&meta.ip) {
        record(
            &state,
            &meta
                .event(EventKind::Blocked)
                .with("message", format!("Acceso bloqueado: {}", meta.ip)),
        );
        return (StatusCode::FORBIDDEN, "Acceso denegado").into_response();
    }

    if state.gate.check(&meta.ip, Utc::now()) == Decision::Throttled {
        record(
            &state,
            &meta
                .event(EventKind::RateLimit)
                .with("message", format!("Rate limit excedido: {}", meta.ip)),
        );
        return (StatusCode::TOO_MANY_REQUESTS, "Demasiadas solicitudes").into_response();
    }

    req.extensions_mut().insert(meta);
    next.run(req).await
}

pub fn build_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/", get(index).post(index_post))
        .route("/assets/{name}", get(serve_asset))
        .route("/capturar_credenciales", post(capture_credentials))
        .route("/log_teclas", post(log_keypress))
        .route("/log_keypress", post(log_keypress))
        .route("/trampa_datos", post(trap_data))
        .route("/captured_data", get(captured_data))
        .route("/stats", get(stats))
        .route("/analysis", get(analysis_report))
        .route("/debug", get(debug_probe))
        .route("/admin_panel", get(admin_panel));

    for (path, _) in TRAP_PATHS {
        router = router.route(path, get(decoy_page));
    }

    router
        .layer(middleware::from_fn_with_state(state.clone(), request_gate))
        .with_state(state)
}

/// Bind-and-serve with graceful shutdown: on the signal the listener stops
/// accepting and in-flight requests drain before the task resolves.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let router = build_router(state);
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}

async fn index(State(state): State<AppState>) -> Response {
    serve_artifact(&state).await
}

async fn index_post(
    State(state): State<AppState>,
    Extension(meta): Extension<ClientMeta>,
    Form(fields): Form<BTreeMap<String, String>>,
) -> Response {
    record(
        &state,
        &meta.event(EventKind::Credentials).with_data(fields),
    );
    serve_artifact(&state).await
}

async fn serve_artifact(state: &AppState) -> Response {
    match state.artifact.read().await.as_ref() {
        Some(artifact) => Html(artifact.html.clone()).into_response(),
        None => LOAD_ERROR_PAGE.into_response(),
    }
}

async fn serve_asset(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    let body = {
        let guard = state.artifact.read().await;
        guard.as_ref().and_then(|a| a.assets.get(&name).cloned())
    };
    match body {
        Some(content) => {
            ([(header::CONTENT_TYPE, content_type_for(&name))], content).into_response()
        }
        None => (StatusCode::NOT_FOUND, "Not found").into_response(),
    }
}

fn content_type_for(name: &str) -> &'static str {
    if name.ends_with(".css") {
        "text/css"
    } else if name.ends_with(".js") {
        "application/javascript"
    } else {
        "application/octet-stream"
    }
}

async fn capture_credentials(
    State(state): State<AppState>,
    Extension(meta): Extension<ClientMeta>,
    Form(mut fields): Form<BTreeMap<String, String>>,
) -> Html<&'static str> {
    // internal routing tag, not part of the captured data
    fields.remove("origen");
    record(
        &state,
        &meta
            .event(EventKind::Credentials)
            .with_data(fields.clone()),
    );
    if let Err(e) = state.captured.append(&fields) {
        error!(error = %e, "failed to append captured credentials");
    }
    Html(THANK_YOU_PAGE)
}

#[derive(Debug, Deserialize)]
struct KeypressPayload {
    #[serde(alias = "key")]
    tecla: Option<String>,
    #[serde(alias = "page")]
    pagina: Option<String>,
    timestamp: Option<String>,
}

async fn log_keypress(
    State(state): State<AppState>,
    Extension(meta): Extension<ClientMeta>,
    Json(payload): Json<KeypressPayload>,
) -> Json<Value> {
    let mut event = meta.event(EventKind::Keylogger);
    if let Some(tecla) = payload.tecla {
        event = event.with("tecla", tecla);
    }
    if let Some(pagina) = payload.pagina {
        event = event.with("pagina", pagina);
    }
    if let Some(timestamp) = payload.timestamp {
        event = event.with("timestamp", timestamp);
    }
    record(&state, &event);
    Json(json!({ "ok": true }))
}

async fn trap_data(
    State(state): State<AppState>,
    Extension(meta): Extension<ClientMeta>,
    Form(fields): Form<BTreeMap<String, String>>,
) -> Json<Value> {
    record(&state, &meta.event(EventKind::Trap).with_data(fields));
    Json(json!({ "ok": true }))
}

async fn captured_data(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "captured": state.captured.read_lines() }))
}

async fn stats(State(state): State<AppState>) -> Json<Value> {
    let lines = state.events.read_all();
    let unique: HashSet<String> = lines.iter().filter_map(|l| analysis::extract_ip(l)).collect();
    Json(json!({
        "total_entries": lines.len(),
        "unique_ips": unique.len(),
        "blocked": state.blocklist.list(),
    }))
}

async fn analysis_report(State(state): State<AppState>) -> Response {
    Json(state.analyzer.compute()).into_response()
}

async fn debug_probe(Extension(meta): Extension<ClientMeta>) -> Json<Value> {
    Json(json!({ "status": "honeypot_running", "ip": meta.ip }))
}

async fn admin_panel() -> Html<&'static str> {
    Html(ADMIN_PANEL_PAGE)
}

/// Trap paths render a believable login form wired to the capture
/// endpoints; the visit itself is recorded as a TRAP event.
async fn decoy_page(
    State(state): State<AppState>,
    Extension(meta): Extension<ClientMeta>,
    uri: Uri,
    headers: HeaderMap,
) -> Html<String> {
    record(
        &state,
        &meta.event(EventKind::Trap).with("path", uri.path()),
    );
    let section = uri.path().trim_start_matches('/').to_string();
    let host = header_or(&headers, header::HOST.as_str(), "intranet");
    Html(decoy_login_page(&section, &host))
}
