use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use actix::{Actor, ActorContext, AsyncContext, StreamHandler};
use actix_web::http::header::{self, ContentType};
use actix_web::{App, HttpRequest, HttpResponse, HttpServer, get, web};
use actix_web_actors::ws;
use miette::Diagnostic;
use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher, event::ModifyKind};
use owo_colors::OwoColorize;
use thiserror::Error;
use tokio::sync::{RwLock, broadcast};
use tracing::{info, warn};

use crate::config::ServeConfig;
use crate::console::{self, Status};
use crate::error::{Result, SiteError, render_error_html};
use crate::site::{RouteEntry, Site};
use crate::styles::{STATIC_URL_PREFIX, STYLES_URL_PREFIX};

/// Maximum number of port retry attempts before giving up
const MAX_PORT_RETRIES: u16 = 50;

const LIVE_RELOAD_PATH: &str = "/__frostpage_live_reload";

/// A port number that displays with bold cyan highlighting
#[derive(Debug, Clone, Copy)]
struct StyledPort(u16);

impl std::fmt::Display for StyledPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.cyan().bold())
    }
}

/// Warning for port change during dev server startup
#[derive(Error, Diagnostic, Debug, Clone)]
#[error("I couldn't use port {wanted_port}, so I'm using port {actual_port} instead")]
#[diagnostic(code(frostpage::dev::port_changed), severity(warning))]
struct PortChangedWarning {
    wanted_port: StyledPort,
    actual_port: StyledPort,
    #[help]
    help_text: String,
}

impl PortChangedWarning {
    fn new(wanted_port: u16, actual_port: u16) -> Self {
        Self {
            wanted_port: StyledPort(wanted_port),
            actual_port: StyledPort(actual_port),
            help_text: format!(
                "That port was already in use. If you'd like me to fail instead of retrying, specify a port explicitly with {}",
                "--port".cyan().bold()
            ),
        }
    }

    fn display(&self) {
        let report = miette::Report::new(self.clone());
        eprintln!("{:?}", report);
    }
}

const LIVE_RELOAD_SCRIPT: &str = r#"<script>
(function() {
    let reloading = false;
    let wasConnected = false;
    function connect() {
        if (reloading) return;
        const ws = new WebSocket('ws://' + window.location.host + '/__frostpage_live_reload');
        ws.onopen = function() {
            if (wasConnected && !reloading) {
                console.log('[frostpage] reconnected to dev server, reloading...');
                reloading = true;
                window.location.reload();
            } else {
                console.log('[frostpage] connected to dev server');
            }
            wasConnected = true;
        };
        ws.onmessage = function(event) {
            if (event.data === 'reload' && !reloading) {
                console.log('[frostpage] file change detected, reloading...');
                reloading = true;
                window.location.reload();
            }
        };
        ws.onclose = function() {
            if (!reloading) {
                console.log('[frostpage] disconnected from dev server, retrying in 1s...');
                setTimeout(connect, 1000);
            }
        };
        ws.onerror = function() {
            ws.close();
        };
    }
    connect();
})();
</script>"#;

pub struct DevAppState {
    pub site_path: PathBuf,
    pub var_overrides: Vec<(String, String)>,
    pub site: RwLock<Option<Site>>,
    /// Set when the site couldn't be loaded; every request shows it until the next good reload
    pub load_error: RwLock<Option<SiteError>>,
    pub reload_tx: broadcast::Sender<()>,
}

impl DevAppState {
    async fn reload(&self) {
        match Site::load(self.site_path.clone(), &self.var_overrides).await {
            Ok(site) => {
                console::warnings(&site.styles.failures);
                *self.load_error.write().await = None;
                *self.site.write().await = Some(site);
                console::status(Status::Reloaded, "site");
            }
            Err(e) => {
                console::status(Status::Warning, "couldn't reload the site");
                console::report(e.clone());
                *self.load_error.write().await = Some(e);
            }
        }
        // Reload either way so the browser shows the new page or the error
        let _ = self.reload_tx.send(());
    }
}

struct LiveReloadWs {
    reload_rx: broadcast::Receiver<()>,
}

impl LiveReloadWs {
    fn new(mut reload_rx: broadcast::Receiver<()>) -> Self {
        // Drain any pending messages so we don't immediately reload on connect
        while reload_rx.try_recv().is_ok() {}
        Self { reload_rx }
    }
}

impl Actor for LiveReloadWs {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        ctx.run_interval(Duration::from_millis(100), |act, ctx| {
            // Lagged, empty and closed are all ignored
            if act.reload_rx.try_recv().is_ok() {
                ctx.text("reload");
            }
        });
    }
}

impl StreamHandler<std::result::Result<ws::Message, ws::ProtocolError>> for LiveReloadWs {
    fn handle(
        &mut self,
        msg: std::result::Result<ws::Message, ws::ProtocolError>,
        ctx: &mut Self::Context,
    ) {
        match msg {
            Ok(ws::Message::Ping(msg)) => ctx.pong(&msg),
            Ok(ws::Message::Close(_)) => ctx.stop(),
            _ => {}
        }
    }
}

#[get("/__frostpage_live_reload")]
async fn live_reload_ws(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<Arc<DevAppState>>,
) -> std::result::Result<HttpResponse, actix_web::Error> {
    let reload_rx = state.reload_tx.subscribe();
    ws::start(LiveReloadWs::new(reload_rx), &req, stream)
}

/// What a request URL maps to in the current site
#[derive(Debug)]
enum Resolved<'a> {
    Style(&'a str),
    StaticFile(PathBuf),
    Page(&'a RouteEntry),
    Redirect(String),
    NotFound(Option<&'a RouteEntry>),
}

/// Join a URL remainder onto a directory, refusing anything that could escape it
fn safe_join(base: &Path, relative: &str) -> Option<PathBuf> {
    let relative = Path::new(relative);
    if relative
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
    {
        Some(base.join(relative))
    } else {
        None
    }
}

fn resolve_request<'a>(site: &'a Site, url: &str) -> Resolved<'a> {
    if url.starts_with(STYLES_URL_PREFIX)
        && let Some(style) = site.styles.get(url)
    {
        return Resolved::Style(&style.css);
    }

    if let Some(rest) = url.strip_prefix(STATIC_URL_PREFIX)
        && let Some(file) = safe_join(&site.static_dir(), rest)
        && file.is_file()
    {
        return Resolved::StaticFile(file);
    }

    if let Some(entry) = site.routes.get(url) {
        return Resolved::Page(entry);
    }

    if !url.ends_with('/') {
        let with_slash = format!("{}/", url);
        if site.routes.get(&with_slash).is_some() {
            return Resolved::Redirect(with_slash);
        }
    }

    Resolved::NotFound(site.not_found_route())
}

/// Insert the live reload script before `</body>`, or append it
fn inject_live_reload(html: &str) -> String {
    match html.rfind("</body>") {
        Some(idx) => format!("{}{}{}", &html[..idx], LIVE_RELOAD_SCRIPT, &html[idx..]),
        None => format!("{}{}", html, LIVE_RELOAD_SCRIPT),
    }
}

fn error_response(error: &SiteError) -> HttpResponse {
    HttpResponse::InternalServerError()
        .content_type(ContentType::html())
        .body(render_error_html(error, LIVE_RELOAD_SCRIPT))
}

fn render_entry(
    site: &Site,
    entry: &RouteEntry,
    mut response: actix_web::HttpResponseBuilder,
) -> HttpResponse {
    match site.render(entry) {
        Ok(body) if entry.kind.is_html() => response
            .content_type(ContentType::html())
            .body(inject_live_reload(&body)),
        Ok(body) => {
            let mime = mime_guess::from_path(&entry.render_source).first_or_text_plain();
            response.content_type(ContentType(mime)).body(body)
        }
        Err(e) => {
            warn!(url = %entry.url, source = %entry.render_source, "Page failed to render");
            error_response(&e)
        }
    }
}

async fn serve_static_file(file: &Path) -> HttpResponse {
    match tokio::fs::read(file).await {
        Ok(contents) => {
            let mime = mime_guess::from_path(file).first_or_octet_stream();
            HttpResponse::Ok().content_type(ContentType(mime)).body(contents)
        }
        Err(e) => error_response(&SiteError::FileRead {
            path: file.into(),
            cause: e,
        }),
    }
}

/// Answer one request. The site lock is released before any file IO so a
/// reload is never stuck behind a slow read.
async fn respond(state: &DevAppState, url: &str) -> HttpResponse {
    if let Some(error) = state.load_error.read().await.as_ref() {
        return error_response(error);
    }

    let file = {
        let site_guard = state.site.read().await;
        let Some(site) = site_guard.as_ref() else {
            return HttpResponse::InternalServerError()
                .content_type(ContentType::html())
                .body("I couldn't load the site");
        };

        match resolve_request(site, url) {
            Resolved::StaticFile(file) => file,
            Resolved::Style(css) => {
                return HttpResponse::Ok()
                    .content_type(ContentType(mime_guess::mime::TEXT_CSS_UTF_8))
                    .body(css.to_string());
            }
            Resolved::Page(entry) => {
                info!(url = %url, source = %entry.render_source, "Serving page");
                return render_entry(site, entry, HttpResponse::Ok());
            }
            Resolved::Redirect(target) => {
                return HttpResponse::Found()
                    .insert_header((header::LOCATION, target))
                    .finish();
            }
            Resolved::NotFound(Some(entry)) => {
                return render_entry(site, entry, HttpResponse::NotFound());
            }
            Resolved::NotFound(None) => {
                return HttpResponse::NotFound()
                    .content_type(ContentType::html())
                    .body(inject_live_reload("Not Found"));
            }
        }
    };

    serve_static_file(&file).await
}

#[get("/{tail:.*}")]
async fn page(path: web::Path<String>, state: web::Data<Arc<DevAppState>>) -> HttpResponse {
    let url = format!("/{}", path.into_inner());
    respond(&state, &url).await
}

fn start_file_watcher(state: Arc<DevAppState>) -> notify::Result<RecommendedWatcher> {
    let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(100);

    let watcher = RecommendedWatcher::new(
        move |res: std::result::Result<notify::Event, notify::Error>| {
            if let Ok(event) = res {
                // Only content changes, creations and removals
                let relevant = matches!(
                    event.kind,
                    EventKind::Create(_)
                        | EventKind::Remove(_)
                        | EventKind::Modify(ModifyKind::Data(_))
                        | EventKind::Modify(ModifyKind::Name(_))
                );
                if relevant {
                    let _ = tx.blocking_send(());
                }
            }
        },
        Config::default(),
    )?;

    tokio::spawn(async move {
        const DEBOUNCE_MS: u64 = 150;

        loop {
            // Wait for the first event
            if rx.recv().await.is_none() {
                break;
            }

            // Debounce: wait for events to stop arriving
            loop {
                let sleep = std::pin::pin!(tokio::time::sleep(Duration::from_millis(DEBOUNCE_MS)));

                tokio::select! {
                    result = rx.recv() => {
                        if result.is_none() {
                            return;
                        }
                    }
                    _ = sleep => {
                        break;
                    }
                }
            }

            console::status(Status::Reloading, "file change detected");
            state.reload().await;
        }
    });

    Ok(watcher)
}

pub async fn run_dev_server(
    path: PathBuf,
    requested_port: Option<u16>,
    var_overrides: Vec<(String, String)>,
) -> Result<()> {
    console::status(Status::Starting, "development server with live reload");
    console::status(Status::Watching, path.display());

    let (reload_tx, _) = broadcast::channel(16);

    // A broken site still starts the server; the error is shown in the browser
    let (site, load_error) = match Site::load(path.clone(), &var_overrides).await {
        Ok(site) => {
            console::warnings(&site.styles.failures);
            (Some(site), None)
        }
        Err(e) => {
            console::status(Status::Warning, "couldn't load the site");
            console::report(e.clone());
            console::status(Status::Waiting, "for file changes to retry...");
            (None, Some(e))
        }
    };

    let default_port = site
        .as_ref()
        .map(|site| site.config.serve.port)
        .unwrap_or_else(|| ServeConfig::default().port);

    let state = Arc::new(DevAppState {
        site_path: path.clone(),
        var_overrides,
        site: RwLock::new(site),
        load_error: RwLock::new(load_error),
        reload_tx,
    });

    let mut watcher = start_file_watcher(Arc::clone(&state))
        .map_err(|e| SiteError::WatcherInit { cause: e })?;

    watcher
        .watch(&path, RecursiveMode::Recursive)
        .map_err(|e| SiteError::WatcherPath {
            path: (&path).into(),
            cause: e,
        })?;

    let (server, actual_port) =
        try_bind_server(Arc::clone(&state), &path, requested_port, default_port)?;

    console::status(Status::Listening, format!("http://127.0.0.1:{}", actual_port));
    info!(live_reload = LIVE_RELOAD_PATH, "Dev server started");

    if requested_port.is_none() && actual_port != default_port {
        PortChangedWarning::new(default_port, actual_port).display();
    }

    server
        .await
        .map_err(|e| SiteError::ServerRuntime { cause: e })?;

    drop(watcher);
    Ok(())
}

fn bind(state: &Arc<DevAppState>, port: u16) -> std::io::Result<actix_web::dev::Server> {
    let state = Arc::clone(state);
    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(Arc::clone(&state)))
            .service(live_reload_ws)
            .service(page)
    })
    .bind(("127.0.0.1", port))?;
    Ok(server.run())
}

/// Bind the requested port, or retry upward from the default when none was given
fn try_bind_server(
    state: Arc<DevAppState>,
    path: &Path,
    requested_port: Option<u16>,
    default_port: u16,
) -> Result<(actix_web::dev::Server, u16)> {
    if let Some(port) = requested_port {
        let server = bind(&state, port).map_err(|e| SiteError::port_bind(path, port, e))?;
        return Ok((server, port));
    }

    for attempt in 0..MAX_PORT_RETRIES {
        let try_port = match default_port.checked_add(attempt) {
            Some(p) => p,
            None => break,
        };

        if let Ok(server) = bind(&state, try_port) {
            return Ok((server, try_port));
        }
    }

    Err(SiteError::NoAvailablePort {
        start_port: default_port.into(),
        end_port: default_port.saturating_add(MAX_PORT_RETRIES - 1).into(),
    })
}
