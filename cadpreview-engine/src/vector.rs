//! 二维矢量文档的光栅化。

use cadpreview_core::FailureReason;
use cadpreview_core::drawing::{StrokePath, VectorDocument, paths_bounds};
use glam::DVec2;
use image::{Rgb, RgbImage};
use tracing::debug;

use crate::preview::WHITE;
use crate::raster::{disc, hex, stroke};

pub const LONG_SIDE_INCHES: f64 = 6.4;
pub const PADDING_INCHES: f64 = 0.1;

/// 白底上绘制为深色的 ACI 7 及未知颜色。
const FOREGROUND: Rgb<u8> = hex(0x141414);

/// 矢量文档渲染能力：输出等比例、自动缩放的位图。
pub trait VectorRenderer {
    fn render(&self, document: &VectorDocument, dpi: u32) -> Result<RgbImage, FailureReason>;
}

/// 基于 `imageproc` 的内置渲染器。
#[derive(Debug, Clone, Copy, Default)]
pub struct RasterVectorRenderer;

impl RasterVectorRenderer {
    pub fn new() -> Self {
        Self
    }
}

impl VectorRenderer for RasterVectorRenderer {
    fn render(&self, document: &VectorDocument, dpi: u32) -> Result<RgbImage, FailureReason> {
        let paths = document.flatten();
        let bounds = paths_bounds(&paths).ok_or(FailureReason::NoEntities)?;

        let dpi = dpi.max(1) as f64;
        let long_side = (LONG_SIDE_INCHES * dpi).round().max(1.0);
        let padding = (PADDING_INCHES * dpi).round();
        let inner = (long_side - 2.0 * padding).max(1.0);

        let extent = bounds.width().max(bounds.height());
        let scale = if extent > f64::EPSILON { inner / extent } else { 1.0 };
        let width = (bounds.width() * scale + 2.0 * padding).round().max(1.0) as u32;
        let height = (bounds.height() * scale + 2.0 * padding).round().max(1.0) as u32;

        let min = bounds.min().as_vec2();
        let max_y = bounds.max().y();
        let to_pixel =
            |point: DVec2| DVec2::new((point.x - min.x) * scale + padding, (max_y - point.y) * scale + padding);

        let mut image = RgbImage::from_pixel(width, height, WHITE);
        for path in &paths {
            draw_path(&mut image, path, &to_pixel);
        }
        debug!(width, height, paths = paths.len(), "矢量文档已渲染");
        Ok(image)
    }
}

fn draw_path(image: &mut RgbImage, path: &StrokePath, to_pixel: &impl Fn(DVec2) -> DVec2) {
    let color = aci_color(path.color);
    match path.points.as_slice() {
        [] => {}
        [single] => disc(image, to_pixel(single.as_vec2()), 1, color),
        points => {
            for pair in points.windows(2) {
                stroke(
                    image,
                    to_pixel(pair[0].as_vec2()),
                    to_pixel(pair[1].as_vec2()),
                    color,
                    1.0,
                );
            }
        }
    }
}

/// ACI 1–9 的标准色；7 与其余编号在白底上绘制为近黑色。
pub fn aci_color(index: u8) -> Rgb<u8> {
    match index {
        1 => hex(0xFF0000),
        2 => hex(0xFFFF00),
        3 => hex(0x00FF00),
        4 => hex(0x00FFFF),
        5 => hex(0x0000FF),
        6 => hex(0xFF00FF),
        8 => hex(0x808080),
        9 => hex(0xC0C0C0),
        _ => FOREGROUND,
    }
}
