//! 推論用の画像前処理
//!
//! 画像を読み込み、正方形にリサイズして [0, 1] にスケーリングし、
//! バッチ次元付きの (1, C, H, W) 配置で平坦化します。

use image::imageops::FilterType;
use image::{ImageReader, RgbImage};
use std::path::Path;

/// 前処理済み画像（形状 [1, 3, size, size]）
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessedImage {
    pub data: Vec<f32>,
    pub size: usize,
}

impl PreprocessedImage {
    pub fn shape(&self) -> [usize; 4] {
        [1, 3, self.size, self.size]
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PreprocessError {
    #[error("failed to open image {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to decode image {path}: {source}")]
    Decode {
        path: String,
        source: image::ImageError,
    },
}

/// RGB画像を [0, 1] にスケーリングした CHW 配列へ変換
pub fn image_to_chw(img: &RgbImage) -> Vec<f32> {
    let (width, height) = img.dimensions();
    let hw = (width * height) as usize;
    let mut data = vec![0f32; 3 * hw];

    for (i, pixel) in img.pixels().enumerate() {
        data[i] = pixel[0] as f32 / 255.0;
        data[hw + i] = pixel[1] as f32 / 255.0;
        data[2 * hw + i] = pixel[2] as f32 / 255.0;
    }

    data
}

/// 画像ファイルを読み込んでRGBに変換し、size x size にリサイズ
///
/// 形式は拡張子ではなく内容から判定する。グレースケールやRGBAは3チャネルに変換される。
pub fn load_rgb_resized(path: &Path, size: u32) -> Result<RgbImage, PreprocessError> {
    let img = ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|source| PreprocessError::Open {
            path: path.display().to_string(),
            source,
        })?
        .decode()
        .map_err(|source| PreprocessError::Decode {
            path: path.display().to_string(),
            source,
        })?;

    Ok(img.resize_exact(size, size, FilterType::Triangle).to_rgb8())
}

/// 推論用に画像を前処理
pub fn preprocess_image(path: &Path, size: usize) -> Result<PreprocessedImage, PreprocessError> {
    let img = load_rgb_resized(path, size as u32)?;
    Ok(PreprocessedImage {
        data: image_to_chw(&img),
        size,
    })
}
