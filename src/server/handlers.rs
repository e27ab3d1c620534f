//! HTTP handlers
//!
//! `POST /predict` はアップロード画像を一意な名前で保存し、前処理・推論を行って
//! 結果をJSONで返す。保存したファイルは成否にかかわらず削除する。

use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    http::header,
    response::{Html, IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::ml::{argmax, preprocess_image, Classifier};
use crate::model::{tumor_info, TumorInfo};
use crate::server::{AppState, PredictError};

const INDEX_HTML: &str = include_str!("../../static/index.html");
const SCRIPT_JS: &str = include_str!("../../static/script.js");

/// 推論成功時のレスポンス
#[derive(Debug, Serialize)]
pub struct PredictionResponse {
    pub prediction: String,
    /// 予測クラスの確率（%）
    pub confidence: f64,
    pub tumor_info: TumorInfoField,
    /// 全クラスの確率（%）
    pub all_probabilities: BTreeMap<String, f64>,
}

/// 説明情報（未知のラベルは空オブジェクト）
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum TumorInfoField {
    Known(&'static TumorInfo),
    Unknown(EmptyObject),
}

#[derive(Debug, Serialize)]
pub struct EmptyObject {}

impl PredictionResponse {
    /// 確率ベクトルとクラスラベルからレスポンスを組み立てる
    pub fn from_probabilities(labels: &[String], probabilities: &[f32]) -> Result<Self, PredictError> {
        if probabilities.len() != labels.len() {
            return Err(PredictError::Inference(format!(
                "model returned {} probabilities for {} classes",
                probabilities.len(),
                labels.len()
            )));
        }

        let index = argmax(probabilities)
            .ok_or_else(|| PredictError::Inference("model returned no probabilities".to_string()))?;
        let prediction = labels[index].clone();

        let tumor_info = match tumor_info(&prediction) {
            Some(info) => TumorInfoField::Known(info),
            None => TumorInfoField::Unknown(EmptyObject {}),
        };

        let all_probabilities = labels
            .iter()
            .zip(probabilities)
            .map(|(label, &p)| (label.clone(), p as f64 * 100.0))
            .collect();

        Ok(Self {
            confidence: probabilities[index] as f64 * 100.0,
            prediction,
            tumor_info,
            all_probabilities,
        })
    }
}

/// アップロード画面
pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub async fn script() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/javascript")], SCRIPT_JS)
}

/// 画像を受け取り腫瘍の種類を予測
pub async fn predict(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    match run_prediction(&state, multipart).await {
        Ok(response) => {
            tracing::info!(
                "予測: {} ({:.1}%)",
                response.prediction,
                response.confidence
            );
            Json(response).into_response()
        }
        Err(err) => {
            tracing::warn!("予測失敗 [{}]: {}", err.kind(), err);
            err.into_response()
        }
    }
}

async fn run_prediction(
    state: &AppState,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<PredictionResponse, PredictError> {
    let classifier = state.classifier.clone().ok_or(PredictError::ModelNotLoaded)?;

    let (file_name, bytes) = read_file_field(multipart).await?;

    let upload_path = state.upload_dir.join(unique_upload_name(&file_name));
    tokio::fs::write(&upload_path, &bytes)
        .await
        .map_err(|e| PredictError::Upload(e.to_string()))?;
    tracing::debug!("アップロード保存: {} -> {}", file_name, upload_path.display());

    let probabilities = classify_upload(Arc::clone(&classifier), upload_path.clone()).await;

    if let Err(e) = tokio::fs::remove_file(&upload_path).await {
        tracing::warn!("アップロードファイルの削除に失敗: {}: {}", upload_path.display(), e);
    }

    PredictionResponse::from_probabilities(classifier.class_labels(), &probabilities?)
}

/// multipartから `file` フィールドを探して (ファイル名, 内容) を返す
async fn read_file_field(
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(String, Vec<u8>), PredictError> {
    let mut multipart = multipart.map_err(|_| PredictError::NoFileUploaded)?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| PredictError::Upload(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        // ファイル名の無いフィールドはファイルとして扱わない
        let Some(file_name) = field.file_name().map(str::to_owned) else {
            continue;
        };
        if file_name.is_empty() {
            return Err(PredictError::NoFileSelected);
        }

        let bytes = field
            .bytes()
            .await
            .map_err(|e| PredictError::Upload(e.to_string()))?;
        return Ok((file_name, bytes.to_vec()));
    }

    Err(PredictError::NoFileUploaded)
}

/// クライアント指定のファイル名は使わず、拡張子のみ引き継いだ一意な名前を生成
fn unique_upload_name(client_name: &str) -> String {
    let extension = Path::new(client_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default();

    format!("{}{}", uuid::Uuid::new_v4(), extension)
}

/// 前処理と推論をブロッキングスレッドで実行
async fn classify_upload(classifier: Arc<dyn Classifier>, path: PathBuf) -> Result<Vec<f32>, PredictError> {
    tokio::task::spawn_blocking(move || {
        let image = preprocess_image(&path, classifier.image_size())
            .map_err(|e| PredictError::Decode(e.to_string()))?;
        classifier
            .predict(&image)
            .map_err(|e| PredictError::Inference(format!("{:#}", e)))
    })
    .await
    .map_err(|e| PredictError::Inference(e.to_string()))?
}
