//! 推論サーバーから見た分類器の抽象

use crate::ml::preprocess::PreprocessedImage;

/// 前処理済み画像からクラス確率を返す分類器
///
/// 起動時に一度だけ構築され、以後は読み取り専用で共有される。
pub trait Classifier: Send + Sync {
    /// インデックス順のクラスラベル
    fn class_labels(&self) -> &[String];

    /// モデルが期待する入力サイズ（正方形）
    fn image_size(&self) -> usize;

    /// クラスごとの確率（合計1、長さは `class_labels().len()`）
    fn predict(&self, image: &PreprocessedImage) -> anyhow::Result<Vec<f32>>;
}

/// 確率が最大のインデックス
pub fn argmax(probabilities: &[f32]) -> Option<usize> {
    probabilities
        .iter()
        .enumerate()
        .filter(|(_, p)| !p.is_nan())
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(index, _)| index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argmax() {
        assert_eq!(argmax(&[0.1, 0.7, 0.15, 0.05]), Some(1));
        assert_eq!(argmax(&[0.9, 0.1]), Some(0));
        assert_eq!(argmax(&[f32::NAN, 0.2, 0.3]), Some(2));
        assert_eq!(argmax(&[]), None);
    }
}
