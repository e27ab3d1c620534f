//! 推論APIの失敗種別
//!
//! 既存クライアント互換のため、失敗はすべて HTTP 200 の JSON `error` フィールドで返す。
//! `error_kind` で種別を区別できる。

use axum::{
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum PredictError {
    #[error("Model not loaded. Please train the model first.")]
    ModelNotLoaded,

    #[error("No file uploaded")]
    NoFileUploaded,

    #[error("No file selected")]
    NoFileSelected,

    #[error("Prediction failed: {0}")]
    Upload(String),

    #[error("Prediction failed: {0}")]
    Decode(String),

    #[error("Prediction failed: {0}")]
    Inference(String),
}

impl PredictError {
    pub fn kind(&self) -> &'static str {
        match self {
            PredictError::ModelNotLoaded => "model_not_loaded",
            PredictError::NoFileUploaded | PredictError::NoFileSelected => "missing_input",
            PredictError::Upload(_) => "upload_error",
            PredictError::Decode(_) => "decode_error",
            PredictError::Inference(_) => "inference_error",
        }
    }
}

/// 失敗時のレスポンスボディ
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub error_kind: &'static str,
}

impl From<&PredictError> for ErrorBody {
    fn from(err: &PredictError) -> Self {
        Self {
            error: err.to_string(),
            error_kind: err.kind(),
        }
    }
}

impl IntoResponse for PredictError {
    fn into_response(self) -> Response {
        Json(ErrorBody::from(&self)).into_response()
    }
}
