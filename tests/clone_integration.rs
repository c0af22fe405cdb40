//! Clone tests against a stub origin server.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    http::header,
    response::{Html, IntoResponse},
    routing::get,
    Router,
};
use tokio::net::TcpListener;

use panal::cloner::{trap_markup, ContentCloner};
use panal::config::Config;
use panal::events::EventLog;
use panal::server::{self, AppState};

const ORIGIN_PAGE: &str = r#"<html>
<head>
<link rel="stylesheet" href="/style.css">
<script src="/app.js"></script>
</head>
<body><h1>Bienvenido</h1></body>
</html>"#;

const ORIGIN_CSS: &str = "body { background: #fff; }";

/// Origin serving the root page and the stylesheet; `/app.js` 404s so the
/// script fetch fails.
async fn spawn_origin() -> SocketAddr {
    let app = Router::new()
        .route("/", get(|| async { Html(ORIGIN_PAGE) }))
        .route(
            "/style.css",
            get(|| async { ([(header::CONTENT_TYPE, "text/css")], ORIGIN_CSS) }),
        );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn cloner(dir: &tempfile::TempDir, inject: bool) -> (ContentCloner, Arc<EventLog>) {
    let events = Arc::new(EventLog::new(dir.path().join("events.log"), true));
    (ContentCloner::new(events.clone(), inject), events)
}

#[tokio::test]
async fn failed_asset_keeps_the_remote_reference() {
    let origin = spawn_origin().await;
    let dir = tempfile::tempdir().unwrap();
    let (cloner, _events) = cloner(&dir, false);

    let artifact = cloner
        .clone_site(&format!("http://{origin}/"))
        .await
        .unwrap();

    // the stylesheet was mirrored and its reference rewritten
    assert!(artifact.html.contains(r#"href="/assets/style.css""#));
    assert_eq!(artifact.assets.get("style.css").unwrap(), ORIGIN_CSS);

    // the script fetch failed: reference points at the origin, nothing stored
    assert!(artifact
        .html
        .contains(&format!(r#"src="http://{origin}/app.js""#)));
    assert!(!artifact.html.contains("/assets/app.js"));
    assert!(!artifact.assets.contains_key("app.js"));
}

#[tokio::test]
async fn traps_are_injected_before_the_single_body_close() {
    let origin = spawn_origin().await;
    let dir = tempfile::tempdir().unwrap();
    let (cloner, events) = cloner(&dir, true);

    let artifact = cloner
        .clone_site(&format!("http://{origin}/"))
        .await
        .unwrap();

    assert_eq!(artifact.html.matches("</body>").count(), 1);
    let markup_at = artifact.html.find(&trap_markup()).unwrap();
    let marker_at = artifact.html.find("</body>").unwrap();
    assert_eq!(markup_at + trap_markup().len(), marker_at);

    // clone lifecycle was audited
    let log = events.read_all().join("\n");
    assert!(log.contains("clone_start"));
    assert!(log.contains("clone_done"));
}

#[tokio::test]
async fn unreachable_root_aborts_the_clone() {
    let dir = tempfile::tempdir().unwrap();
    let (cloner, events) = cloner(&dir, true);

    // port 1 refuses connections
    let err = cloner.clone_site("http://127.0.0.1:1/").await;
    assert!(err.is_err());

    let log = events.read_all().join("\n");
    assert!(log.contains("clone_error"));
    assert!(!log.contains("clone_done"));
}

#[tokio::test]
async fn mirrored_artifact_is_served_with_inferred_content_types() {
    let origin = spawn_origin().await;
    let dir = tempfile::tempdir().unwrap();

    let mut config = Config::default();
    config.data_dir = dir.path().to_path_buf();
    let state = AppState::new(config);

    let artifact = state
        .cloner
        .clone_site(&format!("http://{origin}/"))
        .await
        .unwrap();
    *state.artifact.write().await = Some(artifact);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(server::serve(
        listener,
        state.clone(),
        std::future::pending(),
    ));

    // the mirror itself, traps included
    let body = reqwest::get(format!("http://{addr}/"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.contains("Bienvenido"));
    assert!(body.contains("fetch('/log_teclas'"));

    // mirrored asset with inferred content type
    let resp = reqwest::get(format!("http://{addr}/assets/style.css"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/css");
    assert_eq!(resp.text().await.unwrap(), ORIGIN_CSS);

    // absent asset
    let resp = reqwest::get(format!("http://{addr}/assets/nope.js"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    handle.abort();
}
