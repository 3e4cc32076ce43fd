//! Transports: JSON-RPC over HTTP (one endpoint per project) and over stdio.
//!
//! Both resolve the project before routing, run the synchronous [`Router`] on the
//! blocking pool, and feed request events to a background telemetry task.

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;

use crate::config::TesseraConfig;
use crate::db::Store;
use crate::projects;
use crate::protocol::{error_response, parse_error_response, Handled, Router, RpcError};
use crate::telemetry::{self, ChannelSink, EventSink};
use crate::tools::{CallContext, Registry};

/// Header carrying the caller's agent identity.
pub const AGENT_HEADER: &str = "x-agent-id";

/// How long shutdown waits for queued request events to reach the database.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub router: Arc<Router>,
}

impl AppState {
    pub fn new(store: Store, router: Router) -> Self {
        Self {
            store,
            router: Arc::new(router),
        }
    }
}

pub fn build_router(state: AppState) -> axum::Router {
    axum::Router::new()
        .route("/mcp/{project}", post(mcp_endpoint))
        .route("/health", get(health))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn mcp_endpoint(
    Path(slug): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let message: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(project = %slug, error = %e, "unparseable request body");
            return (StatusCode::OK, Json(parse_error_response(e))).into_response();
        }
    };
    let agent = headers
        .get(AGENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from);

    let project_slug = slug.clone();
    let handled = tokio::task::spawn_blocking(move || -> Result<Option<Handled>, projects::ProjectError> {
        let Some(project) = projects::resolve(&state.store, &project_slug)? else {
            return Ok(None);
        };
        let ctx = CallContext::new(state.store.clone(), project, agent);
        Ok(Some(state.router.handle(&message, &ctx)))
    })
    .await;

    match handled {
        Ok(Ok(Some(handled))) => match handled.into_response() {
            Some(response) => (StatusCode::OK, Json(response)).into_response(),
            None => StatusCode::ACCEPTED.into_response(),
        },
        Ok(Ok(None)) => {
            tracing::debug!(project = %slug, "request for unknown project");
            (StatusCode::NOT_FOUND, format!("unknown project: {slug}")).into_response()
        }
        Ok(Err(e)) => {
            tracing::error!(project = %slug, error = %e, "project lookup failed");
            internal_error(e)
        }
        Err(e) => {
            tracing::error!(project = %slug, error = %e, "request task failed");
            internal_error(e)
        }
    }
}

fn internal_error(cause: impl std::fmt::Display) -> Response {
    let body = error_response(Value::Null, &RpcError::internal(cause.to_string()));
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}

/// Open the store, build the registry and start the telemetry drain.
fn setup(config: &TesseraConfig) -> Result<(Store, Router, JoinHandle<()>)> {
    let db_path = config.resolved_db_path();
    let store = Store::open(&db_path)?;
    tracing::info!(db = %db_path.display(), "database ready");

    let days = config.storage.request_log_days;
    if days > 0 {
        let pruned = telemetry::prune_request_log(&store, days)
            .context("failed to prune request log")?;
        tracing::info!(pruned, days, "request log pruned");
    }

    let registry = Registry::builtin().context("invalid tool registry")?;
    tracing::info!(tools = registry.tools().len(), "tool registry ready");

    let (sink, drain) = start_telemetry(&store);
    let router = Router::new(Arc::new(registry), sink)
        .with_protocol_version(config.protocol.version.clone());
    Ok((store, router, drain))
}

fn start_telemetry(store: &Store) -> (Arc<dyn EventSink>, JoinHandle<()>) {
    let (sink, rx) = ChannelSink::new();
    let drain = tokio::spawn(telemetry::drain_to_store(rx, store.clone()));
    (Arc::new(sink), drain)
}

/// Wait for the drain to persist what is queued. Every sink clone must be dropped first.
async fn flush_telemetry(drain: JoinHandle<()>) {
    match tokio::time::timeout(DRAIN_GRACE, drain).await {
        Ok(Ok(())) => tracing::debug!("request log flushed"),
        Ok(Err(e)) => tracing::warn!(error = %e, "telemetry drain failed"),
        Err(_) => tracing::warn!("telemetry drain still busy at shutdown; queued events dropped"),
    }
}

/// Serve `POST /mcp/{project}` until ctrl-c.
pub async fn serve_http(config: TesseraConfig) -> Result<()> {
    let bind_addr = config.bind_addr();
    let (store, router, drain) = setup(&config)?;
    let app = build_router(AppState::new(store, router));

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    tracing::info!(addr = %bind_addr, "listening at http://{bind_addr}/mcp/{{project}}");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            tracing::info!("shutting down HTTP server");
        })
        .await;

    flush_telemetry(drain).await;
    served?;
    Ok(())
}

/// Serve newline-delimited JSON-RPC on stdin/stdout for one project.
pub async fn serve_stdio(config: TesseraConfig, slug: &str) -> Result<()> {
    let (store, router, drain) = setup(&config)?;
    let project = projects::resolve(&store, slug)?
        .with_context(|| format!("unknown project: {slug} (create it with `tessera project add`)"))?;
    tracing::info!(project = %project.slug, "serving JSON-RPC on stdio");

    let ctx = CallContext::new(store, project, None);
    let served = stdio_loop(
        Arc::new(router),
        ctx,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    )
    .await;

    flush_telemetry(drain).await;
    served
}

async fn stdio_loop<R, W>(router: Arc<Router>, ctx: CallContext, input: R, mut output: W) -> Result<()>
where
    R: tokio::io::AsyncBufRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Value>(&line) {
            Ok(message) => {
                let (router, ctx) = (router.clone(), ctx.clone());
                tokio::task::spawn_blocking(move || router.handle(&message, &ctx))
                    .await
                    .context("request task failed")?
                    .into_response()
            }
            Err(e) => Some(parse_error_response(e)),
        };
        if let Some(response) = response {
            let mut out = serde_json::to_vec(&response)?;
            out.push(b'\n');
            output.write_all(&out).await?;
            output.flush().await?;
        }
    }

    tracing::info!("stdin closed; shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::MemorySink;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::json;
    use tower::ServiceExt;

    fn app() -> (axum::Router, MemorySink) {
        let store = Store::in_memory().unwrap();
        projects::create(&store, "demo", "Demo").unwrap();
        let sink = MemorySink::default();
        let router = Router::new(
            Arc::new(Registry::builtin().unwrap()),
            Arc::new(sink.clone()),
        );
        (build_router(AppState::new(store, router)), sink)
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn ping_round_trip() {
        let (app, sink) = app();
        let response = app
            .oneshot(post_json("/mcp/demo", r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"jsonrpc": "2.0", "id": 1, "result": {}}));
        assert_eq!(sink.events()[0].method, "ping");
    }

    #[tokio::test]
    async fn notification_is_accepted_without_body() {
        let (app, _) = app();
        let response = app
            .oneshot(post_json("/mcp/demo", r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn unknown_project_is_404() {
        let (app, sink) = app();
        let response = app
            .oneshot(post_json("/mcp/nope", r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn malformed_body_is_parse_error() {
        let (app, _) = app();
        let response = app.oneshot(post_json("/mcp/demo", "{not json")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], -32700);
        assert_eq!(body["id"], Value::Null);
    }

    #[tokio::test]
    async fn agent_header_becomes_created_by() {
        let (app, _) = app();
        let request = Request::builder()
            .method("POST")
            .uri("/mcp/demo")
            .header(AGENT_HEADER, "agent-7")
            .body(Body::from(
                json!({
                    "jsonrpc": "2.0",
                    "id": "r1",
                    "method": "tools/call",
                    "params": {"name": "record_insight", "arguments": {"content": "hello"}}
                })
                .to_string(),
            ))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let body = body_json(response).await;
        assert_eq!(body["id"], "r1");
        assert_eq!(body["result"]["created_by"], "agent-7");
    }

    #[tokio::test]
    async fn stdio_events_are_persisted_before_shutdown() {
        let store = Store::in_memory().unwrap();
        let project = projects::create(&store, "demo", "Demo").unwrap();
        let (sink, drain) = start_telemetry(&store);
        let router = Arc::new(Router::new(Arc::new(Registry::builtin().unwrap()), sink));
        let ctx = CallContext::new(store.clone(), project, None);

        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#,
            "\n\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n",
            "{oops\n",
        );
        let mut output = Vec::new();
        stdio_loop(router, ctx, input.as_bytes(), &mut output).await.unwrap();
        flush_telemetry(drain).await;

        let lines: Vec<Value> = output
            .split(|b| *b == b'\n')
            .filter(|l| !l.is_empty())
            .map(|l| serde_json::from_slice(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["result"], json!({}));
        assert_eq!(lines[1]["error"]["code"], -32700);

        let logged: i64 = store
            .conn()
            .query_row("SELECT COUNT(*) FROM request_log", [], |row| row.get(0))
            .unwrap();
        assert_eq!(logged, 2);
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (app, _) = app();
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
