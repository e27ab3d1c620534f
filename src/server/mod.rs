//! 推論HTTPサーバー

pub mod error;
pub mod handlers;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::path::PathBuf;
use std::sync::Arc;

use crate::ml::Classifier;

pub use error::{ErrorBody, PredictError};
pub use handlers::PredictionResponse;

/// サーバーの共有状態
///
/// 起動時に一度だけ構築し、以後は変更しない。
#[derive(Clone)]
pub struct AppState {
    /// 読み込み済みの分類器（未学習の場合は None）
    pub classifier: Option<Arc<dyn Classifier>>,
    /// アップロード画像の一時保存先
    pub upload_dir: PathBuf,
}

impl AppState {
    pub fn new(classifier: Option<Arc<dyn Classifier>>, upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            classifier,
            upload_dir: upload_dir.into(),
        }
    }
}

/// ルーターを構築
pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/static/script.js", get(handlers::script))
        .route("/predict", post(handlers::predict))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}
