//! 预览位图：统一为 RGB，透明通道压到白底上。

use std::io::Cursor;
use std::path::Path;

use cadpreview_core::FailureReason;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageReader, Rgb, RgbImage, Rgba};
use tracing::debug;

pub const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

/// 归一化后的 RGB 预览图。
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewImage(RgbImage);

impl PreviewImage {
    pub fn from_rgb(image: RgbImage) -> Self {
        Self(image)
    }

    /// 调色板、灰度与带透明度的图像都转换为 RGB。
    pub fn from_dynamic(image: DynamicImage) -> Self {
        if !image.color().has_alpha() {
            return Self(image.to_rgb8());
        }
        Self(flatten_onto_white(&image.to_rgba8()))
    }

    /// 按内容识别格式并解码。
    pub fn decode(bytes: &[u8]) -> Result<Self, FailureReason> {
        let reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|_| FailureReason::DecodeError)?;
        let image = reader.decode().map_err(|err| {
            debug!(error = %err, "图像解码失败");
            FailureReason::DecodeError
        })?;
        Ok(Self::from_dynamic(image))
    }

    /// 读取并解码文件；格式依据内容而非扩展名判断。
    pub fn open(path: &Path) -> Result<Self, FailureReason> {
        let bytes = cadpreview_io::read_source(path)?;
        Self::decode(&bytes)
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.0.width()
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.0.height()
    }

    pub fn as_rgb(&self) -> &RgbImage {
        &self.0
    }

    pub fn into_rgb(self) -> RgbImage {
        self.0
    }

    /// 等比缩小到 `max` 框内，只缩不放。
    pub fn thumbnail(&self, max: (u32, u32)) -> PreviewImage {
        let (width, height) = thumbnail_dimensions((self.width(), self.height()), max);
        if (width, height) == (self.width(), self.height()) {
            return self.clone();
        }
        Self(imageops::resize(&self.0, width, height, FilterType::Lanczos3))
    }
}

/// 在 `max` 框内保持宽高比的目标尺寸；原图已在框内时保持不变。
pub fn thumbnail_dimensions(source: (u32, u32), max: (u32, u32)) -> (u32, u32) {
    let (width, height) = source;
    let (max_width, max_height) = (max.0.max(1), max.1.max(1));
    if width == 0 || height == 0 || (width <= max_width && height <= max_height) {
        return source;
    }
    let scale = f64::min(
        max_width as f64 / width as f64,
        max_height as f64 / height as f64,
    );
    let fit = |value: u32, limit: u32| ((value as f64 * scale).round() as u32).clamp(1, limit);
    (fit(width, max_width), fit(height, max_height))
}

fn flatten_onto_white(rgba: &image::RgbaImage) -> RgbImage {
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let Rgba([r, g, b, a]) = *rgba.get_pixel(x, y);
        let alpha = a as u32;
        let blend = |channel: u8| ((channel as u32 * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        Rgb([blend(r), blend(g), blend(b)])
    })
}
