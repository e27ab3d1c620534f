//! モデルメタデータの定義
//!
//! モデルバンドル（tar.gz）に重みと一緒に保存される情報です。
//! クラスラベルの並び順はここにだけ記録され、推論側はこれを唯一の正とします。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// 現在のメタデータ形式バージョン
pub const METADATA_FORMAT_VERSION: u32 = 1;

/// モデルメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelMetadata {
    /// メタデータ形式バージョン
    pub format_version: u32,

    /// クラスラベル（インデックス順）
    /// 例: ["glioma", "meningioma", "no_tumor", "pituitary"]
    pub class_labels: Vec<String>,

    /// モデル入力サイズ（正方形）
    pub image_size: usize,

    /// 学習時のドロップアウト率
    pub dropout: f64,

    /// 学習エポック数
    pub num_epochs: usize,

    /// 学習・検証サンプル数
    pub num_train_samples: usize,
    pub num_valid_samples: usize,

    /// モデルの学習時刻（ISO8601形式）
    pub trained_at: String,
}

impl ModelMetadata {
    /// 新しいメタデータを作成
    pub fn new(
        class_labels: Vec<String>,
        image_size: usize,
        dropout: f64,
        num_epochs: usize,
        num_train_samples: usize,
        num_valid_samples: usize,
    ) -> Self {
        Self {
            format_version: METADATA_FORMAT_VERSION,
            class_labels,
            image_size,
            dropout,
            num_epochs,
            num_train_samples,
            num_valid_samples,
            trained_at: chrono::Local::now().to_rfc3339(),
        }
    }

    pub fn num_classes(&self) -> usize {
        self.class_labels.len()
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize metadata from JSON")
    }
}
