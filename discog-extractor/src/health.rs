//! `GET /health`. A minimal `hyper` service: the ingest binary has no reason
//! to carry a full web framework dependency just for a liveness probe.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use discog_types::EntityClass;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use log::{error, info};
use serde::Serialize;
use std::sync::RwLock;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Serialize)]
pub struct FileProgress {
    pub pct: f64,
    pub last_error: Option<String>,
    pub last_error_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Default for FileProgress {
    fn default() -> Self {
        Self { pct: 0.0, last_error: None, last_error_at: None }
    }
}

#[derive(Debug, Default)]
struct HealthState {
    current_version: Option<String>,
    files: HashMap<EntityClass, FileProgress>,
}

#[derive(Clone, Default)]
pub struct HealthHandle(Arc<RwLock<HealthState>>);

impl HealthHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_version(&self, version: Option<String>) {
        self.0.write().expect("health lock poisoned").current_version = version;
    }

    pub fn set_progress(&self, class: EntityClass, pct: f64) {
        let mut state = self.0.write().expect("health lock poisoned");
        state.files.entry(class).or_default().pct = pct;
    }

    pub fn record_error(&self, class: EntityClass, message: String) {
        let mut state = self.0.write().expect("health lock poisoned");
        let entry = state.files.entry(class).or_default();
        entry.last_error = Some(message);
        entry.last_error_at = Some(chrono::Utc::now());
    }

    fn snapshot(&self) -> serde_json::Value {
        let state = self.0.read().expect("health lock poisoned");
        serde_json::json!({
            "status": "ok",
            "version": state.current_version,
            "files": state.files,
        })
    }
}

async fn handle_request(handle: HealthHandle, req: Request<Body>) -> Result<Response<Body>, Infallible> {
    if req.uri().path() != "/health" {
        return Ok(Response::builder().status(StatusCode::NOT_FOUND).body(Body::empty()).unwrap());
    }

    let body = serde_json::to_vec(&handle.snapshot()).unwrap_or_else(|_| b"{}".to_vec());
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap())
}

/// Serves `/health` until `shutdown` is cancelled.
pub async fn serve(bind_addr: SocketAddr, handle: HealthHandle, shutdown: CancellationToken) {
    let make_svc = make_service_fn(move |_conn| {
        let handle = handle.clone();
        async move { Ok::<_, Infallible>(service_fn(move |req| handle_request(handle.clone(), req))) }
    });

    let server = Server::bind(&bind_addr).serve(make_svc);
    info!("event=health_listening addr={bind_addr}");

    let graceful = server.with_graceful_shutdown(async move {
        shutdown.cancelled().await;
    });

    if let Err(err) = graceful.await {
        error!("event=health_server_error error={err}");
    }
}
