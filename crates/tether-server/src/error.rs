use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use tether_core::app::BuildError;

/// ApiError は HTTP の呼び出し側に返すエラー。message がそのまま body になるので、
/// 内部の詳細は入れない
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Internal(String),
    #[error("{0}")]
    NotFound(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status_code = match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        };

        let response = Json(ErrorResponse {
            error: self.to_string(),
        });

        (status_code, response).into_response()
    }
}

/// サーバプロセスを止めるエラー
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to bind to address: {address}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error("failed to create HTTP client: {0}")]
    HttpClient(String),
}
