//! 画布上的基础绘制操作，坐标为像素、Y 轴向下。

use glam::DVec2;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_antialiased_line_segment_mut, draw_filled_circle_mut};
use imageproc::pixelops::interpolate;

/// 坐标与画布距离超过该像素数时截断，防止整型溢出。
const COORD_LIMIT: f64 = 1.0e6;

#[inline]
pub const fn hex(rgb: u32) -> Rgb<u8> {
    Rgb([(rgb >> 16) as u8, (rgb >> 8) as u8, rgb as u8])
}

#[inline]
fn pixel(point: DVec2) -> (i32, i32) {
    let clamp = |value: f64| value.round().clamp(-COORD_LIMIT, COORD_LIMIT) as i32;
    (clamp(point.x), clamp(point.y))
}

/// 抗锯齿线段；`opacity` 为 1 时与背景按覆盖率混合。
pub fn stroke(image: &mut RgbImage, from: DVec2, to: DVec2, color: Rgb<u8>, opacity: f32) {
    if !from.is_finite() || !to.is_finite() {
        return;
    }
    let opacity = opacity.clamp(0.0, 1.0);
    draw_antialiased_line_segment_mut(image, pixel(from), pixel(to), color, |line, original, weight| {
        interpolate(line, original, weight * opacity)
    });
}

/// 虚线：按 `dash` 像素实线、`gap` 像素空白交替。
pub fn dashed(image: &mut RgbImage, from: DVec2, to: DVec2, color: Rgb<u8>, dash: f64, gap: f64) {
    let length = from.distance(to);
    if !length.is_finite() || length < f64::EPSILON || dash <= 0.0 {
        return;
    }
    let direction = (to - from) / length;
    let period = dash + gap.max(0.0);
    let mut offset = 0.0;
    while offset < length {
        let end = (offset + dash).min(length);
        stroke(image, from + direction * offset, from + direction * end, color, 1.0);
        offset += period;
    }
}

/// 实心圆点。
pub fn disc(image: &mut RgbImage, center: DVec2, radius: i32, color: Rgb<u8>) {
    if !center.is_finite() {
        return;
    }
    draw_filled_circle_mut(image, pixel(center), radius.max(0), color);
}
