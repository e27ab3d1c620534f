//! モデル学習機能

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use burn::{
    backend::{Autodiff, Wgpu},
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{
        backend::{AutodiffBackend, Backend},
        Int, Tensor,
    },
    train::{ClassificationOutput, TrainOutput, TrainStep, ValidStep},
};
use burn_ndarray::{NdArray, NdArrayDevice};
use burn_wgpu::WgpuDevice;

use crate::ml::augmentation::AugmentationSettings;
use crate::ml::preprocess::{image_to_chw, load_rgb_resized};
use crate::ml::{ModelConfig, TumorClassifier};
use crate::model::{save_model_with_metadata, DeviceType, ModelMetadata, ModelSettings, TrainingSettings};

/// 学習対象とする画像拡張子
const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

fn is_image_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .map(|ext| {
                let ext = ext.to_string_lossy().to_lowercase();
                IMAGE_EXTENSIONS.contains(&ext.as_str())
            })
            .unwrap_or(false)
}

/// データディレクトリ直下のサブディレクトリ名をクラス名としてアルファベット順に返す
pub fn discover_class_names(data_dir: &Path) -> Result<Vec<String>> {
    let mut class_names = Vec::new();

    for entry in std::fs::read_dir(data_dir)
        .with_context(|| format!("ディレクトリを読み込めません: {}", data_dir.display()))?
    {
        let path = entry?.path();
        if path.is_dir() {
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| anyhow::anyhow!("Invalid directory name: {}", path.display()))?;
            class_names.push(name.to_string());
        }
    }

    class_names.sort();
    Ok(class_names)
}

/// 学習データセット（パスのリストのみ保持）
pub struct ScanDataset {
    samples: Vec<(PathBuf, usize)>, // (画像パス, クラスID)
    class_names: Vec<String>,
}

impl ScanDataset {
    /// 指定された順序でディレクトリから画像一覧を読み込む
    pub fn from_directory_with_order(data_dir: &Path, class_order: &[String]) -> Result<Self> {
        let mut samples = Vec::new();

        for (class_id, class_name) in class_order.iter().enumerate() {
            let class_dir = data_dir.join(class_name);
            if !class_dir.is_dir() {
                tracing::warn!(
                    "クラスディレクトリが存在しません: {}",
                    class_dir.display()
                );
                continue;
            }

            let mut paths: Vec<PathBuf> = std::fs::read_dir(&class_dir)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| is_image_file(path))
                .collect();
            paths.sort();

            tracing::info!("  クラス {} '{}': {} 枚", class_id, class_name, paths.len());
            samples.extend(paths.into_iter().map(|path| (path, class_id)));
        }

        Ok(Self {
            samples,
            class_names: class_order.to_vec(),
        })
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }
}

/// データセットアイテム（画像パスのみ保持）
#[derive(Clone, Debug)]
pub struct ScanItem {
    pub path: PathBuf,
    pub label: usize,
}

impl Dataset<ScanItem> for ScanDataset {
    fn get(&self, index: usize) -> Option<ScanItem> {
        let (path, label) = self.samples.get(index)?;
        Some(ScanItem {
            path: path.clone(),
            label: *label,
        })
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// バッチャー
///
/// `augmentation` が Some の場合は学習用としてランダム拡張を行う。評価用は None。
#[derive(Clone, Debug)]
pub struct ScanBatcher {
    image_size: usize,
    augmentation: Option<AugmentationSettings>,
}

impl ScanBatcher {
    pub fn training(image_size: usize, augmentation: AugmentationSettings) -> Self {
        Self {
            image_size,
            augmentation: Some(augmentation),
        }
    }

    pub fn evaluation(image_size: usize) -> Self {
        Self {
            image_size,
            augmentation: None,
        }
    }
}

/// バッチデータ
#[derive(Clone, Debug)]
pub struct ScanBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> Batcher<B, ScanItem, ScanBatch<B>> for ScanBatcher {
    fn batch(&self, items: Vec<ScanItem>, device: &B::Device) -> ScanBatch<B> {
        let batch_size = items.len();
        let size = self.image_size;
        let mut rng = rand::thread_rng();
        let mut all_pixels = Vec::with_capacity(batch_size * 3 * size * size);
        let mut targets_vec = Vec::with_capacity(batch_size);

        for item in items {
            match load_rgb_resized(&item.path, size as u32) {
                Ok(img) => {
                    let img = match &self.augmentation {
                        Some(settings) => settings.augment(&img, &mut rng),
                        None => img,
                    };
                    all_pixels.extend(image_to_chw(&img));
                }
                Err(e) => {
                    // 読み込めない画像はゼロで埋めて学習を継続
                    tracing::warn!("画像読み込み失敗 {}: {}", item.path.display(), e);
                    all_pixels.extend(std::iter::repeat(0.0f32).take(3 * size * size));
                }
            }
            targets_vec.push(item.label as i64);
        }

        let images = Tensor::<B, 1>::from_floats(all_pixels.as_slice(), device)
            .reshape([batch_size, 3, size, size]);
        let targets = Tensor::<B, 1, Int>::from_ints(targets_vec.as_slice(), device);

        ScanBatch { images, targets }
    }
}

/// TrainStep実装 (学習時の順伝播 + 逆伝播)
impl<B: AutodiffBackend> TrainStep<ScanBatch<B>, ClassificationOutput<B>> for TumorClassifier<B> {
    fn step(&self, batch: ScanBatch<B>) -> TrainOutput<ClassificationOutput<B>> {
        let item = self.forward_classification(batch.images, batch.targets);
        let grads = item.loss.backward();
        TrainOutput::new(self, grads, item)
    }
}

/// ValidStep実装 (検証時の順伝播のみ)
impl<B: Backend> ValidStep<ScanBatch<B>, ClassificationOutput<B>> for TumorClassifier<B> {
    fn step(&self, batch: ScanBatch<B>) -> ClassificationOutput<B> {
        self.forward_classification(batch.images, batch.targets)
    }
}

/// 学習結果
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub model_path: PathBuf,
    pub class_labels: Vec<String>,
    pub num_train_samples: usize,
    pub num_valid_samples: usize,
}

/// 学習処理の結果
#[derive(Debug)]
pub enum TrainingOutcome {
    /// 学習・評価ディレクトリが見つからず、学習を行わなかった
    MissingDirectory(PathBuf),
    Trained(TrainingReport),
}

/// モデル学習を実行
///
/// 学習用・評価用ディレクトリのどちらかが無い場合は何も書き込まずに
/// `TrainingOutcome::MissingDirectory` を返す。
pub fn train_model(
    training: &TrainingSettings,
    model_settings: &ModelSettings,
    device_type: DeviceType,
) -> Result<TrainingOutcome> {
    let train_dir = PathBuf::from(&training.train_dir);
    let test_dir = PathBuf::from(&training.test_dir);

    if !train_dir.exists() {
        tracing::error!("Training directory '{}' not found!", train_dir.display());
        return Ok(TrainingOutcome::MissingDirectory(train_dir));
    }
    if !test_dir.exists() {
        tracing::error!("Testing directory '{}' not found!", test_dir.display());
        return Ok(TrainingOutcome::MissingDirectory(test_dir));
    }

    let class_names = discover_class_names(&train_dir)?;
    if class_names.is_empty() {
        anyhow::bail!("クラスディレクトリがありません: {}", train_dir.display());
    }

    let test_classes = discover_class_names(&test_dir)?;
    for extra in test_classes.iter().filter(|c| !class_names.contains(c)) {
        tracing::warn!("評価データのクラス '{}' は学習データに無いため無視します", extra);
    }

    tracing::info!("学習データ: {}", train_dir.display());
    let dataset_train = ScanDataset::from_directory_with_order(&train_dir, &class_names)?;
    tracing::info!("評価データ: {}", test_dir.display());
    let dataset_valid = ScanDataset::from_directory_with_order(&test_dir, &class_names)?;

    if dataset_train.len() == 0 {
        anyhow::bail!("学習データが見つかりません: {}", train_dir.display());
    }
    if dataset_valid.len() == 0 {
        anyhow::bail!("評価データが見つかりません: {}", test_dir.display());
    }

    let model_config = ModelConfig::new(dataset_train.num_classes())
        .with_dropout(model_settings.dropout)
        .with_image_size(model_settings.image_size);
    model_config.validate()?;

    tracing::info!("学習デバイス: {}", device_type);
    let report = match device_type {
        DeviceType::Wgpu => fit::<Autodiff<Wgpu>>(
            WgpuDevice::default(),
            dataset_train,
            dataset_valid,
            &model_config,
            training,
            model_settings,
        )?,
        DeviceType::Cpu => fit::<Autodiff<NdArray>>(
            NdArrayDevice::Cpu,
            dataset_train,
            dataset_valid,
            &model_config,
            training,
            model_settings,
        )?,
    };

    tracing::info!("Model trained and saved as '{}'.", report.model_path.display());
    let class_indices = report
        .class_labels
        .iter()
        .enumerate()
        .map(|(index, label)| format!("'{}': {}", label, index))
        .collect::<Vec<_>>()
        .join(", ");
    tracing::info!("Class indices: {{{}}}", class_indices);

    Ok(TrainingOutcome::Trained(report))
}

fn fit<B: AutodiffBackend>(
    device: B::Device,
    dataset_train: ScanDataset,
    dataset_valid: ScanDataset,
    model_config: &ModelConfig,
    training: &TrainingSettings,
    model_settings: &ModelSettings,
) -> Result<TrainingReport> {
    use burn::{
        data::dataloader::DataLoaderBuilder,
        optim::AdamConfig,
        train::{
            metric::{AccuracyMetric, LossMetric},
            LearnerBuilder, LearningStrategy,
        },
    };

    let class_labels = dataset_train.class_names().to_vec();
    let num_train_samples = dataset_train.len();
    let num_valid_samples = dataset_valid.len();
    let image_size = model_config.image_size;

    let batcher_train = ScanBatcher::training(image_size, training.augmentation.clone());
    let batcher_valid = ScanBatcher::evaluation(image_size);

    let dataloader_train = DataLoaderBuilder::new(batcher_train)
        .batch_size(training.batch_size)
        .shuffle(training.seed)
        .num_workers(training.num_workers)
        .build(dataset_train);

    let dataloader_valid = DataLoaderBuilder::new(batcher_valid)
        .batch_size(training.batch_size)
        .shuffle(training.seed)
        .num_workers(training.num_workers)
        .build(dataset_valid);

    let model = model_config.init::<B>(&device);

    // アーティファクトディレクトリ（学習後に削除）
    let artifact_dir = std::env::temp_dir().join(format!("tumor_scan_training_{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&artifact_dir)?;
    let artifact_dir_str = artifact_dir.to_string_lossy().to_string();

    tracing::info!("Training the model...");
    tracing::info!(
        "エポック数: {}, バッチサイズ: {}, 学習率: {}, 学習 {} 枚 / 評価 {} 枚",
        training.num_epochs,
        training.batch_size,
        training.learning_rate,
        num_train_samples,
        num_valid_samples
    );

    let learner = LearnerBuilder::new(&artifact_dir_str)
        .metric_train_numeric(AccuracyMetric::new())
        .metric_valid_numeric(AccuracyMetric::new())
        .metric_train_numeric(LossMetric::new())
        .metric_valid_numeric(LossMetric::new())
        .learning_strategy(LearningStrategy::SingleDevice(device.clone()))
        .num_epochs(training.num_epochs)
        .summary()
        .build(model, AdamConfig::new().init(), training.learning_rate);

    let model_trained = learner.fit(dataloader_train, dataloader_valid);
    let trained_model = model_trained.model;

    tracing::info!("学習済みモデルの総パラメータ数: {}", trained_model.num_params());

    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    let model_binary =
        <BinBytesRecorder<FullPrecisionSettings> as Recorder<B::InnerBackend>>::record(
            &recorder,
            trained_model.into_record(),
            (),
        )
        .map_err(|e| anyhow::anyhow!("モデル重みのシリアライズエラー: {:?}", e))?;

    let metadata = ModelMetadata::new(
        class_labels.clone(),
        image_size,
        model_config.dropout,
        training.num_epochs,
        num_train_samples,
        num_valid_samples,
    );
    let model_path = save_model_with_metadata(Path::new(&model_settings.model_path), &metadata, &model_binary)?;

    std::fs::remove_dir_all(&artifact_dir).ok();

    Ok(TrainingReport {
        model_path,
        class_labels,
        num_train_samples,
        num_valid_samples,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    type TestBackend = NdArray<f32>;

    /// クラスごとに単色画像を置いたデータディレクトリを作成
    fn create_split(root: &Path, classes: &[&str], per_class: usize, size: u32) {
        for (i, class) in classes.iter().enumerate() {
            let dir = root.join(class);
            std::fs::create_dir_all(&dir).unwrap();
            for n in 0..per_class {
                let shade = (i * 60) as u8;
                RgbImage::from_pixel(size, size, Rgb([shade, shade, shade]))
                    .save(dir.join(format!("img_{}.png", n)))
                    .unwrap();
            }
        }
    }

    fn settings_for(root: &Path) -> (TrainingSettings, ModelSettings) {
        let training = TrainingSettings {
            train_dir: root.join("Training").to_string_lossy().to_string(),
            test_dir: root.join("Testing").to_string_lossy().to_string(),
            num_epochs: 1,
            batch_size: 4,
            num_workers: 1,
            ..TrainingSettings::default()
        };
        let model = ModelSettings {
            model_path: root.join("brain_tumor_model.tar.gz").to_string_lossy().to_string(),
            image_size: 48,
            dropout: 0.5,
        };
        (training, model)
    }

    #[test]
    fn test_class_names_are_sorted_directory_names() {
        let dir = tempfile::tempdir().unwrap();
        create_split(dir.path(), &["pituitary", "glioma", "no_tumor", "meningioma"], 0, 8);
        std::fs::write(dir.path().join("README.txt"), "not a class").unwrap();

        let names = discover_class_names(dir.path()).unwrap();
        assert_eq!(names, vec!["glioma", "meningioma", "no_tumor", "pituitary"]);
    }

    #[test]
    fn test_dataset_uses_given_order_and_filters_files() {
        let dir = tempfile::tempdir().unwrap();
        create_split(dir.path(), &["a", "b"], 2, 8);
        std::fs::write(dir.path().join("a").join("notes.txt"), "skip").unwrap();

        let order = vec!["b".to_string(), "a".to_string(), "c".to_string()];
        let dataset = ScanDataset::from_directory_with_order(dir.path(), &order).unwrap();

        assert_eq!(dataset.len(), 4);
        assert_eq!(dataset.num_classes(), 3);
        assert_eq!(dataset.get(0).unwrap().label, 0);
        assert!(dataset.get(0).unwrap().path.starts_with(dir.path().join("b")));
        assert_eq!(dataset.get(3).unwrap().label, 1);
        assert!(dataset.get(4).is_none());
    }

    #[test]
    fn test_batcher_shapes_and_targets() {
        let dir = tempfile::tempdir().unwrap();
        create_split(dir.path(), &["a", "b"], 1, 20);
        let order = vec!["a".to_string(), "b".to_string()];
        let dataset = ScanDataset::from_directory_with_order(dir.path(), &order).unwrap();

        let mut items: Vec<ScanItem> = (0..dataset.len()).filter_map(|i| dataset.get(i)).collect();
        items.push(ScanItem {
            path: dir.path().join("missing.png"),
            label: 1,
        });

        let device = NdArrayDevice::Cpu;
        let batch: ScanBatch<TestBackend> = ScanBatcher::evaluation(16).batch(items, &device);
        assert_eq!(batch.images.dims(), [3, 3, 16, 16]);
        assert_eq!(
            batch.targets.into_data().to_vec::<i64>().unwrap(),
            vec![0, 1, 1]
        );

        // クラスaの単色画像(0)と読み込み失敗分(0)、クラスbは60/255
        let pixels = batch.images.into_data().to_vec::<f32>().unwrap();
        let per_image = 3 * 16 * 16;
        assert!(pixels[..per_image].iter().all(|&v| v == 0.0));
        assert!(pixels[per_image..2 * per_image]
            .iter()
            .all(|&v| (v - 60.0 / 255.0).abs() < 1e-6));
        assert!(pixels[2 * per_image..].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_missing_training_directory_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (training, model) = settings_for(dir.path());

        let outcome = train_model(&training, &model, DeviceType::Cpu).unwrap();
        assert!(matches!(outcome, TrainingOutcome::MissingDirectory(path) if path.ends_with("Training")));
        assert!(!Path::new(&model.model_path).exists());
    }

    #[test]
    fn test_missing_testing_directory_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        create_split(&dir.path().join("Training"), &["glioma"], 1, 8);
        let (training, model) = settings_for(dir.path());

        let outcome = train_model(&training, &model, DeviceType::Cpu).unwrap();
        assert!(matches!(outcome, TrainingOutcome::MissingDirectory(path) if path.ends_with("Testing")));
        assert!(!Path::new(&model.model_path).exists());
    }

    #[test]
    fn test_empty_training_split_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        create_split(&dir.path().join("Training"), &["glioma", "meningioma"], 0, 8);
        create_split(&dir.path().join("Testing"), &["glioma", "meningioma"], 1, 8);
        let (training, model) = settings_for(dir.path());

        assert!(train_model(&training, &model, DeviceType::Cpu).is_err());
        assert!(!Path::new(&model.model_path).exists());
    }

    #[test]
    fn test_training_writes_loadable_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let classes = ["glioma", "no_tumor"];
        create_split(&dir.path().join("Training"), &classes, 1, 46);
        create_split(&dir.path().join("Testing"), &classes, 1, 46);
        let (training, mut model) = settings_for(dir.path());
        model.image_size = 46;
        // 拡張子が.gzでない設定値でもサーバー側と同じバンドルを指す
        model.model_path = dir.path().join("brain_tumor_model.bin").to_string_lossy().to_string();

        let report = match train_model(&training, &model, DeviceType::Cpu).unwrap() {
            TrainingOutcome::Trained(report) => report,
            other => panic!("unexpected outcome: {:?}", other),
        };
        assert_eq!(report.class_labels, classes);
        assert_eq!(report.num_train_samples, 2);
        assert_eq!(report.num_valid_samples, 2);
        assert!(report.model_path.exists());

        let classifier = crate::ml::load_classifier(Path::new(&model.model_path), DeviceType::Cpu).unwrap();
        assert_eq!(classifier.class_labels(), classes.map(String::from).as_slice());
        assert_eq!(classifier.image_size(), 46);
    }
}
