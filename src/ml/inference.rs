//! モデル推論機能

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::{Arc, Mutex};

use burn::{
    backend::Wgpu,
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{backend::Backend, Tensor},
};
use burn_ndarray::{NdArray, NdArrayDevice};
use burn_wgpu::WgpuDevice;

use crate::ml::classifier::Classifier;
use crate::ml::preprocess::PreprocessedImage;
use crate::ml::{ModelConfig, TumorClassifier};
use crate::model::{load_model_with_metadata, log_metadata_info, DeviceType, ModelMetadata};

/// 推論エンジン
///
/// モデルバンドルから重みとクラスラベル順序を同時に読み込む。
pub struct InferenceEngine<B: Backend> {
    model: Mutex<TumorClassifier<B>>,
    metadata: ModelMetadata,
    device: B::Device,
}

impl<B: Backend> InferenceEngine<B> {
    /// モデルバンドルを読み込んで推論エンジンを初期化
    pub fn load<P: AsRef<Path>>(model_path: P, device: B::Device) -> Result<Self> {
        let model_path = model_path.as_ref();
        let (metadata, model_binary) = load_model_with_metadata(model_path)
            .with_context(|| format!("モデルバンドルの読み込みエラー: {}", model_path.display()))?;

        // 推論時はドロップアウトなし
        let model_config = ModelConfig::new(metadata.num_classes())
            .with_dropout(0.0)
            .with_image_size(metadata.image_size);
        model_config.validate()?;

        let model = model_config.init::<B>(&device);

        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let record = recorder
            .load(model_binary, &device)
            .map_err(|e| anyhow::anyhow!("モデル重みの読み込みエラー: {:?}", e))?;
        let model = model.load_record(record);

        log_metadata_info(&metadata);

        Ok(Self {
            model: Mutex::new(model),
            metadata,
            device,
        })
    }
}

impl<B: Backend> Classifier for InferenceEngine<B> {
    fn class_labels(&self) -> &[String] {
        &self.metadata.class_labels
    }

    fn image_size(&self) -> usize {
        self.metadata.image_size
    }

    fn predict(&self, image: &PreprocessedImage) -> Result<Vec<f32>> {
        if image.size != self.metadata.image_size {
            anyhow::bail!(
                "入力サイズが不正です: {}x{} (期待: {}x{})",
                image.size,
                image.size,
                self.metadata.image_size,
                self.metadata.image_size
            );
        }

        let tensor = Tensor::<B, 1>::from_floats(image.data.as_slice(), &self.device)
            .reshape(image.shape());

        let model = self
            .model
            .lock()
            .map_err(|_| anyhow::anyhow!("モデルのロックが破損しています"))?;
        let probabilities = model
            .probabilities(tensor)
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| anyhow::anyhow!("推論結果の取得エラー: {:?}", e))?;

        if probabilities.len() != self.metadata.num_classes() {
            anyhow::bail!(
                "出力クラス数が一致しません: {} (期待: {})",
                probabilities.len(),
                self.metadata.num_classes()
            );
        }

        Ok(probabilities)
    }
}

/// 設定されたデバイスで推論エンジンを読み込む
pub fn load_classifier(model_path: &Path, device_type: DeviceType) -> Result<Arc<dyn Classifier>> {
    tracing::info!("推論デバイス: {}", device_type);
    let classifier: Arc<dyn Classifier> = match device_type {
        DeviceType::Wgpu => Arc::new(InferenceEngine::<Wgpu>::load(model_path, WgpuDevice::default())?),
        DeviceType::Cpu => Arc::new(InferenceEngine::<NdArray>::load(model_path, NdArrayDevice::Cpu)?),
    };
    Ok(classifier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{save_model_with_metadata, CLASS_NAMES};

    type TestBackend = NdArray<f32>;

    /// ランダム初期化のモデルをバンドルとして保存
    fn write_bundle(path: &Path, image_size: usize) -> ModelMetadata {
        let device = NdArrayDevice::Cpu;
        let model = ModelConfig::new(4)
            .with_image_size(image_size)
            .init::<TestBackend>(&device);
        let bytes = <BinBytesRecorder<FullPrecisionSettings> as Recorder<TestBackend>>::record(
            &BinBytesRecorder::<FullPrecisionSettings>::default(),
            model.into_record(),
            (),
        )
        .unwrap();

        let metadata = ModelMetadata::new(
            CLASS_NAMES.iter().map(|s| s.to_string()).collect(),
            image_size,
            0.5,
            1,
            8,
            4,
        );
        save_model_with_metadata(path, &metadata, &bytes).unwrap();
        metadata
    }

    #[test]
    fn test_load_and_predict() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.tar.gz");
        let metadata = write_bundle(&path, 48);

        let engine = InferenceEngine::<TestBackend>::load(&path, NdArrayDevice::Cpu).unwrap();
        assert_eq!(engine.class_labels(), metadata.class_labels.as_slice());
        assert_eq!(engine.image_size(), 48);

        let image = PreprocessedImage {
            data: vec![0.0; 3 * 48 * 48],
            size: 48,
        };
        let probabilities = engine.predict(&image).unwrap();
        assert_eq!(probabilities.len(), 4);
        assert!((probabilities.iter().sum::<f32>() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_wrong_input_size_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.tar.gz");
        write_bundle(&path, 48);

        let engine = InferenceEngine::<TestBackend>::load(&path, NdArrayDevice::Cpu).unwrap();
        let image = PreprocessedImage {
            data: vec![0.0; 3 * 64 * 64],
            size: 64,
        };
        assert!(engine.predict(&image).is_err());
    }

    #[test]
    fn test_load_classifier_from_configured_path() {
        let dir = tempfile::tempdir().unwrap();
        let configured = dir.path().join("brain_tumor_model.bin");
        write_bundle(&configured, 48);

        let classifier = load_classifier(&configured, DeviceType::Cpu).unwrap();
        assert_eq!(classifier.class_labels().len(), 4);
        assert_eq!(classifier.image_size(), 48);
    }

    #[test]
    fn test_missing_bundle() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_classifier(&dir.path().join("absent.tar.gz"), DeviceType::Cpu).is_err());
    }
}
