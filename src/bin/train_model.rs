//! モデル学習用バイナリ

use clap::Parser;
use std::path::PathBuf;

use tumor_scan_lib::ml::{train_model, TrainingOutcome};
use tumor_scan_lib::model::{AppConfig, DeviceType};

#[derive(Parser, Debug)]
#[command(author, version, about = "Train the brain MRI tumor classifier")]
struct Args {
    /// 設定ファイル（JSON）
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,
    /// エポック数（設定ファイルより優先）
    #[arg(long)]
    epochs: Option<usize>,
    /// CPU (NdArray) バックエンドで学習
    #[arg(long)]
    cpu: bool,
}

fn main() -> anyhow::Result<()> {
    tumor_scan_lib::init_tracing();
    let args = Args::parse();

    let mut config = AppConfig::load_or_default(&args.config);
    if let Some(epochs) = args.epochs {
        config.training.num_epochs = epochs;
    }
    if args.cpu {
        config.device_type = DeviceType::Cpu;
    }
    config.log_summary();

    match train_model(&config.training, &config.model, config.device_type)? {
        TrainingOutcome::MissingDirectory(path) => {
            tracing::warn!("学習を中止しました: {} がありません", path.display());
        }
        TrainingOutcome::Trained(report) => {
            tracing::info!(
                "学習完了: {} (学習 {} 枚 / 評価 {} 枚)",
                report.model_path.display(),
                report.num_train_samples,
                report.num_valid_samples
            );
        }
    }

    Ok(())
}
