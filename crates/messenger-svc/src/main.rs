//! Messenger Service
//!
//! HTTP service through which DKG operators share session topics, register
//! their nodes, exchange protocol messages and report ceremony results.

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use messenger::{MessengerStore, StoreError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, Level};

/// Messenger service CLI arguments
#[derive(Parser, Debug)]
#[command(name = "messenger-svc")]
#[command(about = "Messenger service for DKG operator coordination")]
struct Args {
    /// Listen address
    #[arg(short, long, env = "MESSENGER_LISTEN", default_value = "0.0.0.0:3000")]
    listen: String,

    /// Message TTL in seconds
    #[arg(long, default_value = "3600")]
    ttl: i64,
}

/// Application state
struct AppState {
    store: MessengerStore,
}

/// Topic creation request and lookup response
#[derive(Debug, Serialize, Deserialize)]
struct TopicJson {
    topic_name: String,
    subscribers: Vec<String>,
}

/// Node registration request
#[derive(Debug, Serialize, Deserialize)]
struct RegisterRequest {
    name: String,
    address: String,
}

#[derive(Debug, Deserialize)]
struct RegisterParams {
    subscribes_to: String,
}

#[derive(Debug, Deserialize)]
struct PublishParams {
    topic_name: String,
}

#[derive(Debug, Deserialize)]
struct StreamParams {
    request_id: String,
}

/// Published message as returned to pollers
#[derive(Debug, Serialize, Deserialize)]
struct MessageJson {
    hash: String,
    payload: String, // base64 encoded
    created_at: String,
}

const STREAM_KINDS: [&str; 2] = ["dkgoutput", "dkgblame"];

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    info!(listen = %args.listen, ttl = args.ttl, "Starting messenger service");

    let state = Arc::new(AppState {
        store: MessengerStore::new(args.ttl),
    });

    // Spawn cleanup task
    let cleanup_store = state.store.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            cleanup_store.cleanup();
        }
    });

    let app = router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    info!(address = %args.listen, "Listening");

    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/topics", post(create_topic))
        .route("/topics/:name", get(get_topic))
        .route("/topics/:name/messages", get(topic_messages))
        .route("/register_node", post(register_node))
        .route("/publish", post(publish))
        .route("/stream/:kind", post(put_stream))
        .route("/stream/:kind/:request_id", get(get_stream))
        .with_state(state)
}

fn error_response(e: StoreError) -> Response {
    let status = match e {
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
    };
    (status, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
}

/// Health check endpoint
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "messenger-svc",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Create a session topic
async fn create_topic(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TopicJson>,
) -> Response {
    match state.store.create_topic(&req.topic_name, req.subscribers) {
        Ok(topic) => {
            info!(topic = %topic.name, subscribers = ?topic.subscribers, "Topic created");
            Json(TopicJson {
                topic_name: topic.name,
                subscribers: topic.subscribers,
            })
            .into_response()
        }
        Err(e) => error_response(e),
    }
}

/// Look up a topic
async fn get_topic(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> Response {
    match state.store.get_topic(&name) {
        Ok(topic) => Json(TopicJson {
            topic_name: topic.name,
            subscribers: topic.subscribers,
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}

/// Messages published on a topic
async fn topic_messages(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Response {
    if let Err(e) = state.store.get_topic(&name) {
        return error_response(e);
    }

    let messages: Vec<MessageJson> = state
        .store
        .topic_messages(&name)
        .into_iter()
        .map(|m| MessageJson {
            hash: m.hash,
            payload: b64::encode(&m.payload),
            created_at: m.created_at.to_rfc3339(),
        })
        .collect();
    Json(messages).into_response()
}

/// Register an operator node
async fn register_node(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RegisterParams>,
    Json(req): Json<RegisterRequest>,
) -> Response {
    match state
        .store
        .register_node(&req.name, &req.address, &params.subscribes_to)
    {
        Ok(node) => {
            info!(name = %node.name, address = %node.address, topic = %params.subscribes_to, "Node registered");
            (StatusCode::OK, Json(serde_json::json!({ "name": node.name }))).into_response()
        }
        Err(e) => error_response(e),
    }
}

/// Publish a message on a topic
async fn publish(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PublishParams>,
    body: Bytes,
) -> Response {
    match state.store.publish(&params.topic_name, body.to_vec()) {
        Ok(hash) => (StatusCode::OK, Json(serde_json::json!({ "hash": hash }))).into_response(),
        Err(e) => error_response(e),
    }
}

/// Receive a ceremony result
async fn put_stream(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
    Query(params): Query<StreamParams>,
    body: Bytes,
) -> Response {
    if !STREAM_KINDS.contains(&kind.as_str()) {
        return error_response(StoreError::InvalidRequest(format!("unknown stream {}", kind)));
    }

    match state.store.put_stream(&kind, &params.request_id, body.to_vec()) {
        Ok(()) => {
            info!(kind = %kind, request_id = %params.request_id, "Stream received");
            StatusCode::OK.into_response()
        }
        Err(e) => error_response(e),
    }
}

/// Fetch a ceremony result
async fn get_stream(
    State(state): State<Arc<AppState>>,
    Path((kind, request_id)): Path<(String, String)>,
) -> Response {
    match state.store.get_stream(&kind, &request_id) {
        Ok(record) => (StatusCode::OK, record.payload).into_response(),
        Err(e) => error_response(e),
    }
}

mod b64 {
    use base64::{engine::general_purpose::STANDARD, Engine};

    pub fn encode(data: &[u8]) -> String {
        STANDARD.encode(data)
    }
}
