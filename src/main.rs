//! 推論HTTPサーバー

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use tumor_scan_lib::ml::Classifier;
use tumor_scan_lib::model::AppConfig;
use tumor_scan_lib::server::{router, AppState};

#[derive(Parser, Debug)]
#[command(author, version, about = "Brain MRI tumor classification server")]
struct Args {
    /// 設定ファイル（JSON）
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,
    /// 待ち受けポート（設定ファイルより優先）
    #[arg(short, long)]
    port: Option<u16>,
    /// モデルバンドルのパス（設定ファイルより優先）
    #[arg(short, long)]
    model: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tumor_scan_lib::init_tracing();
    let args = Args::parse();

    let mut config = AppConfig::load_or_default(&args.config);
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(model) = args.model {
        config.model.model_path = model;
    }
    config.log_summary();

    std::fs::create_dir_all(&config.server.upload_dir).with_context(|| {
        format!("アップロードディレクトリを作成できません: {}", config.server.upload_dir)
    })?;

    let state = AppState::new(load_model(&config), &config.server.upload_dir);
    let app = router(state, config.server.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind((config.server.host.as_str(), config.server.port))
        .await
        .with_context(|| format!("{}:{} で待ち受けできません", config.server.host, config.server.port))?;
    tracing::info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}

/// モデルを読み込む。失敗してもサーバーは起動し、/predict はエラーを返す
#[cfg(feature = "ml")]
fn load_model(config: &AppConfig) -> Option<Arc<dyn Classifier>> {
    let path = std::path::Path::new(&config.model.model_path);
    match tumor_scan_lib::ml::load_classifier(path, config.device_type) {
        Ok(classifier) => {
            tracing::info!("Model loaded successfully!");
            Some(classifier)
        }
        Err(e) => {
            tracing::warn!("Model not found ({:#}). Please run train_model first.", e);
            None
        }
    }
}

#[cfg(not(feature = "ml"))]
fn load_model(_config: &AppConfig) -> Option<Arc<dyn Classifier>> {
    tracing::warn!("ml フィーチャー無しでビルドされています。モデルは読み込まれません");
    None
}
