//! HTTP endpoint の handler

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{error, info, warn};

use tether_core::app::{App, InspectedMessage};
use tether_core::domain::{CycleFault, RecordId};

use crate::error::ApiError;

const MISSING_MESSAGE: &str = "Missing 'message'";
const INGEST_FAILED: &str = "Failed to ingest messages";
const FETCH_NOT_CONFIGURED: &str = "Missing environment variables for Pub/Sub";

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub inserted_ids: Vec<RecordId>,
}

#[derive(Debug, Serialize)]
pub struct FetchResponse {
    pub messages: Vec<InspectedMessage>,
}

/// `GET /health`: データベースに届くかだけを見る
pub async fn health_handler(State(app): State<App>) -> Response {
    if app.healthy().await {
        (StatusCode::OK, Json(json!({"status": "ok"}))).into_response()
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"status": "db unreachable"})),
        )
            .into_response()
    }
}

/// `POST /publish` with `{"message": "..."}`.
///
/// どんな壊れた body でも同じ 400 になるよう、body は手で parse する
pub async fn publish_handler(State(app): State<App>, body: Bytes) -> Response {
    let Some(text) = message_field(&body) else {
        return ApiError::BadRequest(MISSING_MESSAGE.to_string()).into_response();
    };

    match app.publish(&text).await {
        // 配送の失敗は gateway がログに残す。呼び出し側には成功を返す
        Ok(_) => Json(json!({"status": "message published"})).into_response(),
        Err(err) => {
            warn!(error = %err, "publish is not configured");
            ApiError::BadRequest(err.to_string()).into_response()
        }
    }
}

fn message_field(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    value
        .get("message")
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

/// `POST /ingest`: pull cycle を 1 回
///
/// cycle は別 task で回す。呼び出し側が切断しても途中で止まらない
pub async fn ingest_handler(State(app): State<App>) -> Response {
    let cycle = tokio::spawn(async move { app.ingest().await });
    let result = match cycle.await {
        Ok(result) => result,
        Err(join_error) => Err(CycleFault::Aborted(join_error.to_string())),
    };

    match result {
        Ok(report) => {
            info!(
                cycle_id = %report.cycle_id,
                stored = report.stored_count(),
                dropped = report.dropped_count(),
                "ingest finished"
            );
            Json(IngestResponse {
                inserted_ids: report.record_ids(),
            })
            .into_response()
        }
        Err(CycleFault::Config(err)) => {
            warn!(error = %err, "ingest is not configured");
            ApiError::BadRequest(err.to_string()).into_response()
        }
        Err(err) => {
            error!(error = %err, "ingest failed");
            ApiError::Internal(INGEST_FAILED.to_string()).into_response()
        }
    }
}

/// `GET /fetch`: pull したメッセージを保存せずに見せる
pub async fn fetch_handler(State(app): State<App>) -> Response {
    match app.inspect().await {
        Ok(messages) => Json(FetchResponse { messages }).into_response(),
        Err(err) => {
            warn!(error = %err, mode = ?app.fetch_mode(), "fetch is not configured");
            ApiError::BadRequest(FETCH_NOT_CONFIGURED.to_string()).into_response()
        }
    }
}

pub async fn not_found() -> Response {
    ApiError::NotFound("Not found".to_string()).into_response()
}
