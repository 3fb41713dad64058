// SPDX-License-Identifier: GPL-3.0-only

//! Web control surface
//!
//! A small authenticated HTTP server: a status/control page, the current
//! state as plain text, operator state overrides, and MJPEG previews of both
//! camera streams. Every endpoint sits behind HTTP Basic authentication
//! against the single configured credential pair.
//!
//! The server runs a tokio runtime on its own thread; each preview
//! connection gets a dedicated OS thread that reads the hub subscription,
//! encodes JPEG parts, and feeds them into the response body.

mod preview;

use crate::config::WebConfig;
use crate::controller::ControlShared;
use crate::errors::{AppError, AppResult};
use crate::hub::{FrameStream, StreamHub};
use axum::body::Body;
use axum::extract::{RawQuery, Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{error, info, warn};

/// Previews read every 15th frame
const PREVIEW_DECIMATE: u64 = 15;
/// MJPEG part separator
const BOUNDARY: &str = "depthwatch-frame";
/// Directory holding the control page and allow-listed static files
const TEMPLATE_DIR: &str = "templates";
/// Static paths served from the template directory
const STATIC_FILES: &[(&str, &str)] = &[("/jquery.js", "application/javascript")];

#[derive(Clone)]
struct WebState {
    hub: Arc<StreamHub>,
    control: Arc<ControlShared>,
    username: Arc<str>,
    password: Arc<str>,
}

/// Handle to the web server thread.
pub struct WebServer {
    thread: Option<JoinHandle<()>>,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
}

impl WebServer {
    /// Bind the configured port and start serving on a dedicated thread.
    pub fn start(
        cfg: &WebConfig,
        hub: Arc<StreamHub>,
        control: Arc<ControlShared>,
    ) -> AppResult<WebServer> {
        let state = WebState {
            hub,
            control,
            username: cfg.username.as_str().into(),
            password: cfg.password.as_str().into(),
        };

        let listener = std::net::TcpListener::bind(("0.0.0.0", cfg.port))
            .map_err(|e| AppError::Web(format!("Failed to bind port {}: {}", cfg.port, e)))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| AppError::Web(format!("Failed to configure listener: {}", e)))?;
        info!(port = cfg.port, "Web server started");

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let thread = std::thread::Builder::new()
            .name("web".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Runtime::new() {
                    Ok(rt) => rt,
                    Err(e) => {
                        error!(error = %e, "Failed to start web runtime");
                        return;
                    }
                };
                runtime.block_on(async move {
                    let listener = match tokio::net::TcpListener::from_std(listener) {
                        Ok(l) => l,
                        Err(e) => {
                            error!(error = %e, "Failed to adopt web listener");
                            return;
                        }
                    };
                    let server = axum::serve(listener, router(state))
                        .with_graceful_shutdown(async {
                            let _ = shutdown_rx.await;
                        });
                    if let Err(e) = server.await {
                        error!(error = %e, "Web server failed");
                    }
                });
                info!("Web server stopped");
            })
            .map_err(|e| AppError::Web(format!("Failed to spawn web thread: {}", e)))?;

        Ok(WebServer {
            thread: Some(thread),
            shutdown: Some(shutdown_tx),
        })
    }

    /// Stop serving and join the server thread.
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("Web server thread panicked");
            }
        }
    }
}

impl Drop for WebServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn router(state: WebState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/state", get(current_state))
        .route("/setstate", get(set_state))
        .route("/video", get(video_stream))
        .route("/depth", get(depth_stream))
        .route("/jquery.js", get(static_file))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state)
}

/// Check an Authorization header against the configured credential pair.
fn authorized(header: Option<&str>, username: &str, password: &str) -> bool {
    let Some(header) = header else {
        return false;
    };
    let Some(encoded) = header.strip_prefix("Basic ") else {
        return false;
    };
    let Ok(decoded) = BASE64.decode(encoded.trim()) else {
        return false;
    };
    let Ok(decoded) = String::from_utf8(decoded) else {
        return false;
    };
    decoded == format!("{}:{}", username, password)
}

async fn require_auth(State(state): State<WebState>, request: Request, next: Next) -> Response {
    let header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if authorized(header, &state.username, &state.password) {
        next.run(request).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            [
                (header::WWW_AUTHENTICATE, "Basic realm=\"depthwatch\""),
                (header::CONNECTION, "close"),
            ],
            "401 Unauthorized",
        )
            .into_response()
    }
}

async fn index() -> Response {
    match tokio::fs::read_to_string(Path::new(TEMPLATE_DIR).join("index.html")).await {
        Ok(page) => Html(page).into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to read control page template");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn current_state(State(state): State<WebState>) -> String {
    state.control.current().display_name()
}

/// `GET /setstate?<name>`: queue an operator override. Unknown names are
/// silently ignored.
async fn set_state(State(state): State<WebState>, RawQuery(query): RawQuery) -> StatusCode {
    if let Some(name) = query {
        state.control.request_state(&name);
    }
    StatusCode::OK
}

async fn static_file(request: Request) -> Response {
    let path = request.uri().path();
    let Some((_, mime)) = STATIC_FILES.iter().find(|(p, _)| *p == path) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let file = Path::new(TEMPLATE_DIR).join(path.trim_start_matches('/'));
    match tokio::fs::read(&file).await {
        Ok(data) => ([(header::CONTENT_TYPE, *mime)], data).into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn video_stream(State(state): State<WebState>) -> Response {
    match state.hub.subscribe_video(PREVIEW_DECIMATE) {
        Ok(frames) => mjpeg_response(frames, preview::video_to_jpeg),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}

async fn depth_stream(State(state): State<WebState>) -> Response {
    match state.hub.subscribe_depth(PREVIEW_DECIMATE) {
        Ok(frames) => mjpeg_response(frames, preview::depth_to_jpeg),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}

/// Build a `multipart/x-mixed-replace` response fed by a dedicated thread
/// for the life of the connection. The thread ends when the hub closes the
/// subscription or the viewer disconnects.
fn mjpeg_response<T, F>(mut frames: FrameStream<T>, encode: F) -> Response
where
    T: Send + 'static,
    F: Fn(&T) -> Option<Vec<u8>> + Send + 'static,
{
    let (tx, mut rx) = tokio::sync::mpsc::channel::<Vec<u8>>(1);
    let spawned = std::thread::Builder::new()
        .name("mjpeg".to_string())
        .spawn(move || {
            while let Ok(frame) = frames.recv() {
                let Some(jpeg) = encode(&frame) else {
                    continue;
                };
                let mut part = Vec::with_capacity(jpeg.len() + 128);
                part.extend_from_slice(
                    format!(
                        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
                        BOUNDARY,
                        jpeg.len()
                    )
                    .as_bytes(),
                );
                part.extend_from_slice(&jpeg);
                part.extend_from_slice(b"\r\n");
                if tx.blocking_send(part).is_err() {
                    // Viewer went away
                    break;
                }
            }
        });
    if spawned.is_err() {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    let body = Body::from_stream(async_stream::stream! {
        while let Some(chunk) = rx.recv().await {
            yield Ok::<_, std::convert::Infallible>(chunk);
        }
    });

    match Response::builder()
        .header(
            header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace;boundary={}", BOUNDARY),
        )
        .header(header::PRAGMA, "no-cache")
        .header(header::EXPIRES, "0")
        .header(header::CONNECTION, "close")
        .body(body)
    {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, "Failed to build MJPEG response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_accepts_only_the_configured_pair() {
        // "user:secret"
        let good = format!("Basic {}", BASE64.encode("user:secret"));
        assert!(authorized(Some(&good), "user", "secret"));

        let wrong_pass = format!("Basic {}", BASE64.encode("user:nope"));
        assert!(!authorized(Some(&wrong_pass), "user", "secret"));

        assert!(!authorized(None, "user", "secret"));
        assert!(!authorized(Some("Bearer abc"), "user", "secret"));
        assert!(!authorized(Some("Basic !!notbase64!!"), "user", "secret"));
    }
}
