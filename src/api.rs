//! Read-only HTTP status surface for a running ingestion.
//!
//! - `GET /health` – Liveness check.
//! - `GET /stats` – Live snapshot of the run counters and identifier lists.
//! - `GET /commands` – Machine-readable catalog of the endpoints above.

use crate::stats::{PipelineStats, StatsAggregator};
use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;

/// Build the status router over the live statistics of one pipeline.
pub fn create_router(stats: Arc<StatsAggregator>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(get_stats))
        .route("/commands", get(get_commands))
        .with_state(stats)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn get_stats(State(stats): State<Arc<StatsAggregator>>) -> Json<PipelineStats> {
    Json(stats.snapshot())
}

#[derive(Serialize)]
struct CommandsResponse {
    commands: Vec<CommandInfo>,
}

#[derive(Serialize)]
struct CommandInfo {
    name: &'static str,
    method: &'static str,
    path: &'static str,
    description: &'static str,
}

async fn get_commands() -> Json<CommandsResponse> {
    Json(CommandsResponse {
        commands: vec![
            CommandInfo {
                name: "health",
                method: "GET",
                path: "/health",
                description: "Liveness check; always returns {\"status\":\"ok\"}.",
            },
            CommandInfo {
                name: "stats",
                method: "GET",
                path: "/stats",
                description: "Counters and identifier lists of the current run.",
            },
            CommandInfo {
                name: "commands",
                method: "GET",
                path: "/commands",
                description: "This catalog.",
            },
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::{create_router, get_commands};
    use crate::stats::{Counter, StatsAggregator};
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode},
    };
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn get_json(stats: Arc<StatsAggregator>, uri: &str) -> (StatusCode, Value) {
        let response = create_router(stats)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (status, body) = get_json(Arc::new(StatsAggregator::new()), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn stats_reflect_live_counters() {
        let stats = Arc::new(StatsAggregator::new());
        stats.increment(Counter::Crawled, 10);
        stats.increment(Counter::Processed, 4);
        stats.record_batch(vec!["a".into(), "b".into()]);
        stats.record_failure("c");

        let (status, body) = get_json(Arc::clone(&stats), "/stats").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["crawled"], 10);
        assert_eq!(body["processed"], 4);
        assert_eq!(body["inserted"], 2);
        assert_eq!(body["batches"], 1);
        assert_eq!(body["failed_ids"], serde_json::json!(["c"]));
    }

    #[tokio::test]
    async fn commands_catalog_lists_every_route() {
        let commands = get_commands().await.0.commands;
        let paths: Vec<&str> = commands.iter().map(|cmd| cmd.path).collect();
        assert_eq!(paths, vec!["/health", "/stats", "/commands"]);
        assert!(commands.iter().all(|cmd| cmd.method == "GET"));
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let response = create_router(Arc::new(StatsAggregator::new()))
            .oneshot(
                Request::builder()
                    .uri("/index")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
