//! IGES 线框的三维正交投影渲染。
//!
//! 三个坐标轴共用以包围盒中心为原点的立方体范围，保证比例不失真；
//! 立方体三个背面绘制虚线网格与边框，线段半透明叠加，孤立点绘制为圆点。

use cadpreview_core::FailureReason;
use cadpreview_core::wireframe::WireframeModel;
use glam::{DVec2, DVec3};
use image::{Rgb, RgbImage};
use tracing::debug;

use crate::preview::WHITE;
use crate::raster::{dashed, disc, hex, stroke};

/// 渲染参数；默认值对应目录缩略图的固定版式。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WireframeStyle {
    pub elevation_deg: f64,
    pub azimuth_deg: f64,
    pub width_inches: f64,
    pub height_inches: f64,
    pub dpi: u32,
    /// 立方体半宽相对最大跨度的比例。
    pub range_factor: f64,
    pub axes_background: Rgb<u8>,
    pub grid: Rgb<u8>,
    pub pane_edge: Rgb<u8>,
    pub segment: Rgb<u8>,
    pub segment_opacity: f32,
    pub point: Rgb<u8>,
    pub point_radius: i32,
    pub grid_divisions: usize,
}

impl Default for WireframeStyle {
    fn default() -> Self {
        Self {
            elevation_deg: 25.0,
            azimuth_deg: 135.0,
            width_inches: 10.0,
            height_inches: 8.0,
            dpi: 180,
            range_factor: 0.55,
            axes_background: hex(0xFAFAFA),
            grid: hex(0xE2E2E2),
            pane_edge: hex(0xDDDDDD),
            segment: hex(0x2B5C8A),
            segment_opacity: 0.85,
            point: hex(0xE07070),
            point_radius: 3,
            grid_divisions: 5,
        }
    }
}

/// 最小立方体半宽，单点模型也能得到有限的缩放。
pub const MIN_HALF_RANGE: f64 = 1e-6;

/// 绘图区在画布中的相对位置（左、右、下、上）。
const AXES_RECT: [f64; 4] = [0.125, 0.9, 0.11, 0.88];

/// 固定视角下的正交投影。
#[derive(Debug, Clone, Copy)]
struct ViewProjection {
    right: DVec3,
    up: DVec3,
    toward_viewer: DVec3,
}

impl ViewProjection {
    fn new(elevation_deg: f64, azimuth_deg: f64) -> Self {
        let (el, az) = (elevation_deg.to_radians(), azimuth_deg.to_radians());
        let toward_viewer = DVec3::new(el.cos() * az.cos(), el.cos() * az.sin(), el.sin());
        let right = DVec3::new(-az.sin(), az.cos(), 0.0);
        let up = toward_viewer.cross(right);
        Self {
            right,
            up,
            toward_viewer,
        }
    }

    #[inline]
    fn project(&self, point: DVec3) -> DVec2 {
        DVec2::new(point.dot(self.right), point.dot(self.up))
    }
}

/// 归一化立方体 `[-1, 1]^3` 到像素坐标的映射。
struct CubeViewport {
    projection: ViewProjection,
    center: DVec3,
    half_range: f64,
    scale: f64,
    origin: DVec2,
}

impl CubeViewport {
    fn new(model: &WireframeModel, style: &WireframeStyle, canvas: (u32, u32)) -> Result<Self, FailureReason> {
        let bounds = model.bounds().ok_or(FailureReason::NoEntities)?;
        let half_range = (style.range_factor * bounds.max_extent()).max(MIN_HALF_RANGE);
        let projection = ViewProjection::new(style.elevation_deg, style.azimuth_deg);

        let mut low = DVec2::splat(f64::INFINITY);
        let mut high = DVec2::splat(f64::NEG_INFINITY);
        for corner in cube_corners() {
            let projected = projection.project(corner);
            low = low.min(projected);
            high = high.max(projected);
        }

        let (width, height) = (canvas.0 as f64, canvas.1 as f64);
        let [left, right, bottom, top] = AXES_RECT;
        let axes_size = DVec2::new((right - left) * width, (top - bottom) * height);
        let span = (high - low).max(DVec2::splat(f64::EPSILON));
        let scale = (axes_size.x / span.x).min(axes_size.y / span.y);
        let axes_center = DVec2::new((left + right) * 0.5 * width, (1.0 - (bottom + top) * 0.5) * height);
        let origin = axes_center - DVec2::new((low.x + high.x) * 0.5, -(low.y + high.y) * 0.5) * scale;

        Ok(Self {
            projection,
            center: bounds.center().as_vec3(),
            half_range,
            scale,
            origin,
        })
    }

    /// 归一化立方体坐标 → 像素（Y 向下）。
    fn cube_to_pixel(&self, cube: DVec3) -> DVec2 {
        let projected = self.projection.project(cube);
        self.origin + DVec2::new(projected.x, -projected.y) * self.scale
    }

    fn world_to_pixel(&self, world: DVec3) -> DVec2 {
        self.cube_to_pixel((world - self.center) / self.half_range)
    }
}

fn cube_corners() -> impl Iterator<Item = DVec3> {
    (0..8).map(|bits| {
        let sign = |bit: i32| if bits & bit != 0 { 1.0 } else { -1.0 };
        DVec3::new(sign(1), sign(2), sign(4))
    })
}

/// 渲染线框模型；空模型返回 `NoEntities`。
pub fn render_wireframe(model: &WireframeModel, style: &WireframeStyle) -> Result<RgbImage, FailureReason> {
    if model.is_empty() {
        return Err(FailureReason::NoEntities);
    }
    let dpi = style.dpi.max(1) as f64;
    let width = (style.width_inches * dpi).round().max(1.0) as u32;
    let height = (style.height_inches * dpi).round().max(1.0) as u32;
    let viewport = CubeViewport::new(model, style, (width, height))?;

    let mut image = RgbImage::from_pixel(width, height, WHITE);
    fill_axes(&mut image, style);
    draw_back_panes(&mut image, &viewport, style);

    for segment in &model.segments {
        stroke(
            &mut image,
            viewport.world_to_pixel(segment.start.as_vec3()),
            viewport.world_to_pixel(segment.end.as_vec3()),
            style.segment,
            style.segment_opacity,
        );
    }
    for point in &model.points {
        disc(&mut image, viewport.world_to_pixel(point.as_vec3()), style.point_radius, style.point);
    }

    debug!(
        width,
        height,
        segments = model.segments.len(),
        points = model.points.len(),
        "线框已渲染"
    );
    Ok(image)
}

fn fill_axes(image: &mut RgbImage, style: &WireframeStyle) {
    let (width, height) = (image.width() as f64, image.height() as f64);
    let [left, right, bottom, top] = AXES_RECT;
    let x0 = (left * width).round() as u32;
    let x1 = ((right * width).round() as u32).min(image.width());
    let y0 = ((1.0 - top) * height).round() as u32;
    let y1 = (((1.0 - bottom) * height).round() as u32).min(image.height());
    for y in y0..y1 {
        for x in x0..x1 {
            image.put_pixel(x, y, style.axes_background);
        }
    }
}

/// 背对观察者的三个立方体面：网格虚线与四条边。
fn draw_back_panes(image: &mut RgbImage, viewport: &CubeViewport, style: &WireframeStyle) {
    let view = viewport.projection.toward_viewer;
    let divisions = style.grid_divisions.max(1);
    for axis in 0..3 {
        // 法向朝外且背离观察者的那一面。
        let fixed = if view[axis] > 0.0 { -1.0 } else { 1.0 };
        let (u, v) = ((axis + 1) % 3, (axis + 2) % 3);
        let corner = |a: f64, b: f64| {
            let mut cube = DVec3::ZERO;
            cube[axis] = fixed;
            cube[u] = a;
            cube[v] = b;
            viewport.cube_to_pixel(cube)
        };

        for step in 1..divisions {
            let t = -1.0 + 2.0 * step as f64 / divisions as f64;
            dashed(image, corner(t, -1.0), corner(t, 1.0), style.grid, 6.0, 4.0);
            dashed(image, corner(-1.0, t), corner(1.0, t), style.grid, 6.0, 4.0);
        }

        let edges = [
            (corner(-1.0, -1.0), corner(1.0, -1.0)),
            (corner(1.0, -1.0), corner(1.0, 1.0)),
            (corner(1.0, 1.0), corner(-1.0, 1.0)),
            (corner(-1.0, 1.0), corner(-1.0, -1.0)),
        ];
        for (from, to) in edges {
            stroke(image, from, to, style.pane_edge, 1.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use cadpreview_core::geometry::Point3;
    use cadpreview_core::wireframe::{GeometryEntity, WireframeModel};

    use super::*;

    fn small_style() -> WireframeStyle {
        WireframeStyle {
            width_inches: 2.0,
            height_inches: 1.6,
            dpi: 100,
            ..WireframeStyle::default()
        }
    }

    #[test]
    fn canvas_has_fixed_figure_size() {
        let model = WireframeModel::from_entities(&[GeometryEntity::Line {
            p1: Point3::new(0.0, 0.0, 0.0),
            p2: Point3::new(1.0, 1.0, 1.0),
        }]);
        let image = render_wireframe(&model, &WireframeStyle::default()).expect("渲染成功");
        assert_eq!((image.width(), image.height()), (1800, 1440));
        assert_eq!(*image.get_pixel(0, 0), WHITE);
    }

    #[test]
    fn single_point_draws_disc_at_center() {
        let model = WireframeModel::from_entities(&[GeometryEntity::Point {
            xyz: Point3::new(5.0, -3.0, 2.0),
        }]);
        let style = small_style();
        let image = render_wireframe(&model, &style).expect("单点可渲染");
        let viewport = CubeViewport::new(&model, &style, (image.width(), image.height())).unwrap();
        let center = viewport.world_to_pixel(DVec3::new(5.0, -3.0, 2.0));
        let pixel = image.get_pixel(center.x.round() as u32, center.y.round() as u32);
        assert_eq!(*pixel, style.point);
    }

    #[test]
    fn cube_fits_inside_axes_area() {
        let model = WireframeModel::from_entities(&[GeometryEntity::Line {
            p1: Point3::new(-10.0, 0.0, 0.0),
            p2: Point3::new(10.0, 4.0, 1.0),
        }]);
        let style = small_style();
        let viewport = CubeViewport::new(&model, &style, (200, 160)).unwrap();
        for corner in cube_corners() {
            let pixel = viewport.cube_to_pixel(corner);
            assert!(pixel.x >= 200.0 * 0.125 - 1e-6 && pixel.x <= 200.0 * 0.9 + 1e-6);
            assert!(pixel.y >= 160.0 * 0.12 - 1e-6 && pixel.y <= 160.0 * 0.89 + 1e-6);
        }
    }

    #[test]
    fn back_panes_face_away_from_viewer() {
        let projection = ViewProjection::new(25.0, 135.0);
        // 方位角 135° 时观察者位于 -X、+Y、+Z 一侧。
        assert!(projection.toward_viewer.x < 0.0);
        assert!(projection.toward_viewer.y > 0.0);
        assert!(projection.toward_viewer.z > 0.0);
        assert!((projection.up.length() - 1.0).abs() < 1e-12);
        assert!(projection.up.z > 0.0);
    }

    #[test]
    fn empty_model_is_rejected() {
        assert_eq!(
            render_wireframe(&WireframeModel::default(), &small_style()).unwrap_err(),
            FailureReason::NoEntities
        );
    }
}
