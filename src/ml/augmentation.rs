//! 学習データの拡張（回転・平行移動・左右反転）
//!
//! 逆写像 + 最近傍サンプリングで変換し、画像外の画素は最も近い端の画素で埋める。

use image::{imageops, RgbImage};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// 拡張設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AugmentationSettings {
    /// 最大回転角（度）
    pub rotation_range: f32,
    /// 横方向の最大シフト（幅に対する割合）
    pub width_shift_range: f32,
    /// 縦方向の最大シフト（高さに対する割合）
    pub height_shift_range: f32,
    /// ランダムな左右反転
    pub horizontal_flip: bool,
}

impl Default for AugmentationSettings {
    fn default() -> Self {
        Self {
            rotation_range: 20.0,
            width_shift_range: 0.2,
            height_shift_range: 0.2,
            horizontal_flip: true,
        }
    }
}

/// 1枚分の変換パラメータ
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AugmentParams {
    /// 回転角（度）
    pub rotation_deg: f32,
    /// 平行移動量（ピクセル）
    pub shift_x: f32,
    pub shift_y: f32,
    pub flip: bool,
}

impl AugmentationSettings {
    /// width x height の画像に対するランダムなパラメータを生成
    pub fn random_params<R: Rng>(&self, rng: &mut R, width: u32, height: u32) -> AugmentParams {
        AugmentParams {
            rotation_deg: symmetric(rng, self.rotation_range),
            shift_x: symmetric(rng, self.width_shift_range) * width as f32,
            shift_y: symmetric(rng, self.height_shift_range) * height as f32,
            flip: self.horizontal_flip && rng.gen_bool(0.5),
        }
    }

    /// ランダムに拡張した画像を返す
    pub fn augment<R: Rng>(&self, img: &RgbImage, rng: &mut R) -> RgbImage {
        let params = self.random_params(rng, img.width(), img.height());
        apply(img, &params)
    }
}

fn symmetric<R: Rng>(rng: &mut R, range: f32) -> f32 {
    if range > 0.0 {
        rng.gen_range(-range..=range)
    } else {
        0.0
    }
}

/// 変換を適用（出力サイズは入力と同じ）
pub fn apply(img: &RgbImage, params: &AugmentParams) -> RgbImage {
    let (width, height) = img.dimensions();

    let transformed = if params.rotation_deg == 0.0 && params.shift_x == 0.0 && params.shift_y == 0.0 {
        img.clone()
    } else {
        let (sin, cos) = params.rotation_deg.to_radians().sin_cos();
        let cx = (width as f32 - 1.0) / 2.0;
        let cy = (height as f32 - 1.0) / 2.0;
        let max_x = width as f32 - 1.0;
        let max_y = height as f32 - 1.0;

        RgbImage::from_fn(width, height, |x, y| {
            // 出力座標 -> 入力座標（平行移動を戻してから逆回転）
            let dx = x as f32 - params.shift_x - cx;
            let dy = y as f32 - params.shift_y - cy;
            let sx = (cos * dx + sin * dy + cx).round().clamp(0.0, max_x);
            let sy = (-sin * dx + cos * dy + cy).round().clamp(0.0, max_y);
            *img.get_pixel(sx as u32, sy as u32)
        })
    };

    if params.flip {
        imageops::flip_horizontal(&transformed)
    } else {
        transformed
    }
}
