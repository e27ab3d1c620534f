//! 機械学習モデルの共通定義
//!
//! 脳MRI画像を4クラスに分類するCNNモデルと関連する設定を提供します。

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        loss::CrossEntropyLossConfig,
        pool::{MaxPool2d, MaxPool2dConfig},
        Dropout, DropoutConfig, Linear, LinearConfig, Relu,
    },
    tensor::{activation::softmax, backend::Backend, Int, Tensor},
    train::ClassificationOutput,
};

/// 畳み込みステージのチャネル数
const STAGE_CHANNELS: [usize; 4] = [32, 64, 128, 128];

/// 全結合隠れ層のユニット数
const HIDDEN_UNITS: usize = 512;

/// モデル設定
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 分類クラス数
    pub num_classes: usize,
    /// ドロップアウト率
    #[config(default = 0.5)]
    pub dropout: f64,
    /// 入力画像サイズ（正方形）
    #[config(default = 224)]
    pub image_size: usize,
}

impl ModelConfig {
    /// 最終プーリング後の特徴マップサイズ
    ///
    /// 各ステージ: Conv 3x3 (no padding) で -2、MaxPool 2x2 で /2（切り捨て）。
    /// 入力が小さすぎて途中で0になる場合は None。
    pub fn feature_map_size(&self) -> Option<usize> {
        let mut size = self.image_size;
        for _ in STAGE_CHANNELS {
            size = size.checked_sub(2)? / 2;
            if size == 0 {
                return None;
            }
        }
        Some(size)
    }

    /// Flatten後の特徴次元
    pub fn flattened_features(&self) -> Option<usize> {
        self.feature_map_size()
            .map(|size| STAGE_CHANNELS[STAGE_CHANNELS.len() - 1] * size * size)
    }

    /// 設定値を検証
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.num_classes < 2 {
            anyhow::bail!("分類クラス数は2以上が必要です: {}", self.num_classes);
        }
        if !(0.0..1.0).contains(&self.dropout) {
            anyhow::bail!("ドロップアウト率が範囲外です: {}", self.dropout);
        }
        if self.feature_map_size().is_none() {
            anyhow::bail!("入力サイズが小さすぎます: {} (最小46x46が必要)", self.image_size);
        }
        Ok(())
    }

    /// モデルを初期化
    ///
    /// 呼び出し前に [`ModelConfig::validate`] で検証しておくこと。
    pub fn init<B: Backend>(&self, device: &B::Device) -> TumorClassifier<B> {
        let d = match self.flattened_features() {
            Some(d) => d,
            None => panic!("入力サイズが小さすぎます: {}", self.image_size),
        };

        tracing::debug!(
            "[Model] 入力 {}x{}, Flatten後の特徴次元 d: {}, FC1: {} -> {}, FC2: {} -> {}",
            self.image_size,
            self.image_size,
            d,
            d,
            HIDDEN_UNITS,
            HIDDEN_UNITS,
            self.num_classes
        );

        let [c1, c2, c3, c4] = STAGE_CHANNELS;

        TumorClassifier {
            conv1: Conv2dConfig::new([3, c1], [3, 3]).init(device),
            conv2: Conv2dConfig::new([c1, c2], [3, 3]).init(device),
            conv3: Conv2dConfig::new([c2, c3], [3, 3]).init(device),
            conv4: Conv2dConfig::new([c3, c4], [3, 3]).init(device),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            dropout: DropoutConfig::new(self.dropout).init(),
            fc1: LinearConfig::new(d, HIDDEN_UNITS).init(device),
            fc2: LinearConfig::new(HIDDEN_UNITS, self.num_classes).init(device),
            activation: Relu::new(),
        }
    }
}

/// 腫瘍分類用CNNモデル
///
/// # アーキテクチャ
/// - {Conv 3x3 (no padding) + ReLU + MaxPool 2x2} x 4 (32, 64, 128, 128ch)
/// - Flatten
/// - Dropout
/// - FC: d -> 512 + ReLU
/// - FC: 512 -> num_classes
/// - Softmax (分類時)
#[derive(Module, Debug)]
pub struct TumorClassifier<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    conv3: Conv2d<B>,
    conv4: Conv2d<B>,
    pool: MaxPool2d,
    dropout: Dropout,
    fc1: Linear<B>,
    fc2: Linear<B>,
    activation: Relu,
}

impl<B: Backend> TumorClassifier<B> {
    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 3, size, size]
    ///
    /// # 戻り値
    /// - クラスごとのロジット [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();

        let x = self.stage(&self.conv1, images);
        let x = self.stage(&self.conv2, x);
        let x = self.stage(&self.conv3, x);
        let x = self.stage(&self.conv4, x);

        let [_, c, h, w] = x.dims();
        let x = x.reshape([batch_size, c * h * w]);

        let x = self.dropout.forward(x);
        let x = self.fc1.forward(x);
        let x = self.activation.forward(x);

        self.fc2.forward(x)
    }

    fn stage(&self, conv: &Conv2d<B>, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = conv.forward(x);
        let x = self.activation.forward(x);
        self.pool.forward(x)
    }

    /// クラスごとの確率 [batch_size, num_classes]
    pub fn probabilities(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }

    /// 順伝播と損失計算（学習用）
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 3, size, size]
    /// - `targets`: ターゲットラベル [batch_size]
    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }
}
