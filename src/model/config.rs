//! アプリケーション設定管理モジュール
//!
//! 計算デバイス、モデル、学習、サーバーの設定をJSON形式で保存・読み込みします。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::ml::augmentation::AugmentationSettings;

/// 計算デバイスの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    Wgpu,
    /// NdArray (CPU) バックエンド
    Cpu,
}

impl Default for DeviceType {
    fn default() -> Self {
        DeviceType::Wgpu
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// モデル設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// モデルバンドル（tar.gz）のパス
    pub model_path: String,
    /// 入力画像サイズ（正方形）
    pub image_size: usize,
    /// ドロップアウト率
    pub dropout: f64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model_path: "brain_tumor_model.tar.gz".to_string(),
            image_size: 224,
            dropout: 0.5,
        }
    }
}

/// トレーニング設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSettings {
    /// 学習用データ（クラスごとのサブディレクトリ）
    pub train_dir: String,
    /// 評価用データ（クラスごとのサブディレクトリ）
    pub test_dir: String,
    /// エポック数
    pub num_epochs: usize,
    /// バッチサイズ
    pub batch_size: usize,
    /// ワーカー数
    pub num_workers: usize,
    /// 学習率
    pub learning_rate: f64,
    /// ランダムシード
    pub seed: u64,
    /// 学習データの拡張設定
    #[serde(default)]
    pub augmentation: AugmentationSettings,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            train_dir: "./dataset/Training".to_string(),
            test_dir: "./dataset/Testing".to_string(),
            num_epochs: 10,
            batch_size: 32,
            num_workers: 1,
            learning_rate: 1e-3,
            seed: 42,
            augmentation: AugmentationSettings::default(),
        }
    }
}

/// HTTPサーバー設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// アップロード画像の一時保存先
    pub upload_dir: String,
    /// リクエストボディの上限（バイト）
    pub max_upload_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5001,
            upload_dir: "uploads".to_string(),
            max_upload_bytes: 16 * 1024 * 1024,
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 計算デバイスの種類
    #[serde(default)]
    pub device_type: DeviceType,
    /// モデル設定
    #[serde(default)]
    pub model: ModelSettings,
    /// トレーニング設定
    #[serde(default)]
    pub training: TrainingSettings,
    /// サーバー設定
    #[serde(default)]
    pub server: ServerSettings,
}

impl AppConfig {
    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// 指定パスから設定を読み込む、存在しない・壊れている場合はデフォルト設定を返す
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("設定ファイルが存在しません。デフォルト設定を使用します");
            return Self::default();
        }

        match Self::load(path) {
            Ok(config) => {
                tracing::info!("設定ファイルを読み込みました: {}", path.display());
                config
            }
            Err(e) => {
                tracing::warn!(
                    "設定ファイルの読み込みに失敗しました ({}): {}。デフォルト設定を使用します",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 設定情報をログに出力
    pub fn log_summary(&self) {
        tracing::info!("計算デバイス: {}", self.device_type);
        tracing::info!(
            "モデル: {} (入力 {}x{}, dropout={})",
            self.model.model_path,
            self.model.image_size,
            self.model.image_size,
            self.model.dropout
        );
        tracing::info!(
            "学習: epochs={}, batch={}, lr={}, seed={}",
            self.training.num_epochs,
            self.training.batch_size,
            self.training.learning_rate,
            self.training.seed
        );
        tracing::info!(
            "サーバー: {}:{} (uploads: {})",
            self.server.host,
            self.server.port,
            self.server.upload_dir
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.device_type, DeviceType::Wgpu);
        assert_eq!(config.model.image_size, 224);
        assert_eq!(config.model.model_path, "brain_tumor_model.tar.gz");
        assert_eq!(config.training.num_epochs, 10);
        assert_eq!(config.training.batch_size, 32);
        assert_eq!(config.server.port, 5001);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "device_type": "Cpu", "server": { "host": "0.0.0.0", "port": 8080, "upload_dir": "tmp", "max_upload_bytes": 1024 } }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.device_type, DeviceType::Cpu);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.training.train_dir, "./dataset/Training");
        assert_eq!(config.model.dropout, 0.5);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = AppConfig::default();
        config.training.num_epochs = 3;
        config.save(&path).unwrap();

        let loaded = AppConfig::load_or_default(&path);
        assert_eq!(loaded.training.num_epochs, 3);
    }

    #[test]
    fn test_broken_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let loaded = AppConfig::load_or_default(&path);
        assert_eq!(loaded.training.num_epochs, 10);
    }

    #[test]
    fn test_device_type_display() {
        assert_eq!(format!("{}", DeviceType::Wgpu), "WGPU (GPU)");
        assert_eq!(format!("{}", DeviceType::Cpu), "CPU (NdArray)");
    }
}
