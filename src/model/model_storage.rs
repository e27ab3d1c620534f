//! モデルとメタデータの永続化
//!
//! Tar.gz形式でモデルとメタデータを1ファイルに統合して保存・読み込みします。
//!
//! ファイル構成（tar.gz内部）:
//! - metadata.json   - メタデータ（クラスラベル順序、入力サイズなど）
//! - model.bin       - モデルの重み（バイナリ）

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::{Archive, Builder};

use crate::model::model_metadata::{ModelMetadata, METADATA_FORMAT_VERSION};

const METADATA_ENTRY: &str = "metadata.json";
const MODEL_ENTRY: &str = "model.bin";

/// バンドルの内容が不正な場合のエラー
#[derive(Debug, thiserror::Error)]
pub enum ModelBundleError {
    #[error("unsupported metadata format version {found} (supported: {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("model bundle has no class labels")]
    NoClassLabels,

    #[error("duplicate class label in model bundle: {0}")]
    DuplicateLabel(String),

    #[error("{0} not found in tar.gz archive")]
    MissingEntry(&'static str),
}

/// 設定されたモデルパスを.tar.gzに正規化
///
/// 保存・読み込みの両方でこの関数を通し、同じ設定値が同じファイルを指すようにする。
pub fn bundle_path(output_path: &Path) -> PathBuf {
    // output_pathがすでに.gzで終わっている場合はそのまま、そうでなければ拡張子を追加
    if output_path.extension().and_then(|s| s.to_str()) == Some("gz") {
        output_path.to_path_buf()
    } else {
        output_path.with_extension("tar.gz")
    }
}

/// 読み込んだメタデータを検証
pub fn validate_metadata(metadata: &ModelMetadata) -> Result<(), ModelBundleError> {
    if metadata.format_version != METADATA_FORMAT_VERSION {
        return Err(ModelBundleError::UnsupportedVersion {
            found: metadata.format_version,
            supported: METADATA_FORMAT_VERSION,
        });
    }
    if metadata.class_labels.is_empty() {
        return Err(ModelBundleError::NoClassLabels);
    }

    let mut seen = HashSet::new();
    for label in &metadata.class_labels {
        if !seen.insert(label.as_str()) {
            return Err(ModelBundleError::DuplicateLabel(label.clone()));
        }
    }
    Ok(())
}

/// メタデータと共にモデルをTar.gz形式で保存
///
/// 1つのtar.gzファイルに以下を含む：
/// - metadata.json : メタデータ
/// - model.bin : モデルの重み
///
/// 戻り値は実際に書き込んだパス
pub fn save_model_with_metadata(
    output_path: &Path,
    metadata: &ModelMetadata,
    model_binary: &[u8],
) -> Result<PathBuf> {
    let tar_gz_path = bundle_path(output_path);

    // 親ディレクトリが存在しない場合は作成
    if let Some(parent) = tar_gz_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create parent directory: {:?}", parent))?;
    }

    let tar_gz_file = File::create(&tar_gz_path)
        .with_context(|| format!("Failed to create tar.gz file: {:?}", tar_gz_path))?;

    let encoder = GzEncoder::new(tar_gz_file, Compression::default());
    let mut tar_builder = Builder::new(encoder);

    let json_str = metadata.to_json_string()?;
    append_entry(&mut tar_builder, METADATA_ENTRY, json_str.as_bytes())?;
    append_entry(&mut tar_builder, MODEL_ENTRY, model_binary)?;

    // tarアーカイブとgzipストリームを完成させる
    tar_builder
        .into_inner()
        .context("Failed to finalize tar archive")?
        .finish()
        .context("Failed to finalize gzip stream")?;

    Ok(tar_gz_path)
}

fn append_entry<W: std::io::Write>(builder: &mut Builder<W>, name: &str, data: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name)?;
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append(&header, data)
        .with_context(|| format!("Failed to add {} to tar", name))
}

/// Tar.gzからモデルメタデータのみを読み込む
pub fn load_metadata(model_path: &Path) -> Result<ModelMetadata> {
    let tar_gz_path = bundle_path(model_path);
    let tar_gz_file = File::open(&tar_gz_path)
        .with_context(|| format!("Failed to open tar.gz file: {:?}", tar_gz_path))?;

    let mut archive = Archive::new(GzDecoder::new(tar_gz_file));

    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.path()?.to_str() == Some(METADATA_ENTRY) {
            let mut json_str = String::new();
            entry.read_to_string(&mut json_str)?;
            let metadata = ModelMetadata::from_json_string(&json_str)?;
            validate_metadata(&metadata)?;
            return Ok(metadata);
        }
    }

    Err(ModelBundleError::MissingEntry(METADATA_ENTRY).into())
}

/// メタデータとモデルバイナリを同じアーカイブから読み込む
pub fn load_model_with_metadata(model_path: &Path) -> Result<(ModelMetadata, Vec<u8>)> {
    let tar_gz_path = bundle_path(model_path);
    let tar_gz_file = File::open(&tar_gz_path)
        .with_context(|| format!("Failed to open tar.gz file: {:?}", tar_gz_path))?;

    let mut archive = Archive::new(GzDecoder::new(tar_gz_file));

    let mut metadata_opt: Option<ModelMetadata> = None;
    let mut model_binary_opt: Option<Vec<u8>> = None;

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?;

        match path.to_str() {
            Some(METADATA_ENTRY) => {
                let mut json_str = String::new();
                entry.read_to_string(&mut json_str)?;
                metadata_opt = Some(ModelMetadata::from_json_string(&json_str)?);
            }
            Some(MODEL_ENTRY) => {
                let mut buffer = Vec::new();
                entry.read_to_end(&mut buffer)?;
                model_binary_opt = Some(buffer);
            }
            _ => {}
        }
    }

    match (metadata_opt, model_binary_opt) {
        (Some(metadata), Some(binary)) => {
            validate_metadata(&metadata)?;
            Ok((metadata, binary))
        }
        (None, _) => Err(ModelBundleError::MissingEntry(METADATA_ENTRY).into()),
        (_, None) => Err(ModelBundleError::MissingEntry(MODEL_ENTRY).into()),
    }
}

/// メタデータをログに出力
pub fn log_metadata_info(metadata: &ModelMetadata) {
    tracing::info!("モデル形式バージョン: {}", metadata.format_version);
    for (index, label) in metadata.class_labels.iter().enumerate() {
        tracing::info!("  クラス {}: {}", index, label);
    }
    tracing::info!("モデル入力サイズ: {}x{}", metadata.image_size, metadata.image_size);
    tracing::info!(
        "学習: {} エポック (学習 {} 枚 / 検証 {} 枚), {}",
        metadata.num_epochs,
        metadata.num_train_samples,
        metadata.num_valid_samples,
        metadata.trained_at
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metadata() -> ModelMetadata {
        ModelMetadata::new(
            crate::model::CLASS_NAMES.iter().map(|s| s.to_string()).collect(),
            224,
            0.5,
            10,
            120,
            40,
        )
    }

    #[test]
    fn test_bundle_path_extension() {
        assert_eq!(
            bundle_path(Path::new("brain_tumor_model.tar.gz")),
            PathBuf::from("brain_tumor_model.tar.gz")
        );
        assert_eq!(
            bundle_path(Path::new("models/classifier")),
            PathBuf::from("models/classifier.tar.gz")
        );
    }

    #[test]
    fn test_save_and_load_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let metadata = sample_metadata();
        let weights = vec![1u8, 2, 3, 4, 5];

        let written =
            save_model_with_metadata(&dir.path().join("nested/model"), &metadata, &weights).unwrap();
        assert!(written.ends_with("nested/model.tar.gz"));

        let (loaded, binary) = load_model_with_metadata(&written).unwrap();
        assert_eq!(loaded, metadata);
        assert_eq!(binary, weights);
        assert_eq!(load_metadata(&written).unwrap().class_labels, metadata.class_labels);
    }

    #[test]
    fn test_configured_path_without_gz_resolves_to_same_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let configured = dir.path().join("models/brain_tumor_model.bin");
        let metadata = sample_metadata();

        let written = save_model_with_metadata(&configured, &metadata, &[7u8, 8]).unwrap();
        assert_eq!(written, dir.path().join("models/brain_tumor_model.tar.gz"));

        // 保存時と同じ設定値で読み込める
        let (loaded, binary) = load_model_with_metadata(&configured).unwrap();
        assert_eq!(loaded.class_labels, metadata.class_labels);
        assert_eq!(binary, vec![7u8, 8]);
        assert_eq!(load_metadata(&configured).unwrap(), loaded);
    }

    #[test]
    fn test_unsupported_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut metadata = sample_metadata();
        metadata.format_version = METADATA_FORMAT_VERSION + 1;

        let written =
            save_model_with_metadata(&dir.path().join("model.tar.gz"), &metadata, &[0u8]).unwrap();
        let err = load_model_with_metadata(&written).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ModelBundleError>(),
            Some(ModelBundleError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn test_duplicate_labels_are_rejected() {
        let mut metadata = sample_metadata();
        metadata.class_labels = vec!["glioma".into(), "glioma".into()];
        assert!(matches!(
            validate_metadata(&metadata),
            Err(ModelBundleError::DuplicateLabel(label)) if label == "glioma"
        ));

        metadata.class_labels.clear();
        assert!(matches!(validate_metadata(&metadata), Err(ModelBundleError::NoClassLabels)));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_model_with_metadata(&dir.path().join("absent.tar.gz")).is_err());
    }
}
