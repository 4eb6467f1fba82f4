//! Actix Web preview server exposing the fusion snapshot and metrics.
//!
//! The server runs on a dedicated thread with its own Actix system so the
//! sensor workers never touch an async runtime.

use std::{net::SocketAddr, sync::PoisonError, time::Duration};

use actix_web::{
    App, HttpResponse, HttpServer,
    http::header,
    web::{self, Bytes},
};
use anyhow::{Context, Result};
use async_stream::stream;
use fusion_core::FusionSnapshot;
use serde_json::to_string;
use tokio::sync::oneshot;
use tracing::{error, info};

use crate::assist::{ingestion::SharedSnapshot, telemetry};

const SSE_INTERVAL: Duration = Duration::from_millis(250);

/// Shared state backing HTTP handlers.
pub struct ServerState {
    pub snapshot: SharedSnapshot,
}

/// Handle for the preview server thread.
pub struct PreviewServer {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl PreviewServer {
    /// Signal the server to stop and block until the thread exits.
    pub fn stop(self) {
        if let Some(tx) = self.shutdown {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle {
            telemetry::join_worker("preview server", handle);
        }
    }
}

/// Register the preview routes.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/snapshot", web::get().to(snapshot_handler))
        .route("/stream_snapshot", web::get().to(stream_snapshot_handler))
        .route("/metrics", web::get().to(metrics_handler));
}

pub fn spawn_preview_server(snapshot: SharedSnapshot, addr: SocketAddr) -> Result<PreviewServer> {
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = telemetry::spawn_thread("assist-preview-server", move || {
        let result = actix_web::rt::System::new().block_on(async move {
            let server = HttpServer::new(move || {
                App::new()
                    .app_data(web::Data::new(ServerState {
                        snapshot: snapshot.clone(),
                    }))
                    .configure(configure)
            })
            .workers(1)
            .bind(addr)?
            .run();
            info!("preview available at http://{addr}/snapshot");

            let srv_handle = server.handle();
            actix_web::rt::spawn(async move {
                let _ = shutdown_rx.await;
                srv_handle.stop(true).await;
            });

            server.await
        });
        if let Err(err) = result {
            error!("HTTP server error: {err}");
        }
    })
    .context("failed to spawn preview server thread")?;
    Ok(PreviewServer {
        shutdown: Some(shutdown_tx),
        handle: Some(handle),
    })
}

fn latest(snapshot: &SharedSnapshot) -> Option<FusionSnapshot> {
    snapshot
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Return the most recent fusion snapshot as JSON.
async fn snapshot_handler(state: web::Data<ServerState>) -> HttpResponse {
    match latest(&state.snapshot) {
        Some(snapshot) => HttpResponse::Ok().json(snapshot),
        None => HttpResponse::NoContent().finish(),
    }
}

/// Stream snapshots as Server-Sent Events.
async fn stream_snapshot_handler(state: web::Data<ServerState>) -> HttpResponse {
    let state = state.clone();
    let stream = stream! {
        yield Ok::<Bytes, actix_web::Error>(Bytes::from_static(b"retry: 500\n\n"));
        let mut interval = actix_web::rt::time::interval(SSE_INTERVAL);
        let mut sequence: u64 = 0;
        loop {
            interval.tick().await;
            match latest(&state.snapshot) {
                Some(snapshot) => match to_string(&snapshot) {
                    Ok(json) => {
                        sequence += 1;
                        yield Ok::<Bytes, actix_web::Error>(Bytes::from(format!(
                            "id: {sequence}\ndata: {json}\n\n"
                        )));
                    }
                    Err(err) => {
                        yield Ok::<Bytes, actix_web::Error>(Bytes::from(format!(
                            "event: error\ndata: {err}\n\n"
                        )));
                    }
                },
                None => {
                    yield Ok::<Bytes, actix_web::Error>(Bytes::from_static(b": keep-alive\n\n"));
                }
            }
        }
    };

    HttpResponse::Ok()
        .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
        .append_header(("Cache-Control", "no-cache"))
        .append_header(("Content-Type", "text/event-stream"))
        .append_header(("Connection", "keep-alive"))
        .streaming(stream)
}

/// Render the Prometheus exposition text.
async fn metrics_handler() -> HttpResponse {
    match telemetry::prometheus_handle() {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::ServiceUnavailable().body("metrics recorder not installed"),
    }
}
