//! IGES 线框几何：少量实体变体及其离散化结果。

use std::f64::consts::TAU;

use serde::{Deserialize, Serialize};

use crate::geometry::{Bounds3D, Point2, Point3, arc_segment_count};

/// 半径小于该值的圆弧视为退化。
pub const DEGENERATE_RADIUS: f64 = 1e-10;

/// 曲面内部网格在每个方向上的目标采样数。
const INTERIOR_SAMPLES: usize = 5;

/// 三维线段。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment3 {
    pub start: Point3,
    pub end: Point3,
}

impl Segment3 {
    #[inline]
    pub fn new(start: Point3, end: Point3) -> Self {
        Self { start, end }
    }
}

/// 从 IGES 重建出的几何实体。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GeometryEntity {
    Line {
        p1: Point3,
        p2: Point3,
    },
    /// 位于 `z = plane_z` 平面内、从 `start` 逆时针到 `end` 的圆弧。
    Arc {
        center: Point2,
        start: Point2,
        end: Point2,
        plane_z: f64,
    },
    Point {
        xyz: Point3,
    },
    /// 以控制多边形近似的样条曲线。
    Curve {
        control_points: Vec<Point3>,
    },
    /// 曲面控制网格的边界与稀疏内部网格线。
    SurfaceEdges {
        boundary_rows: Vec<Vec<Point3>>,
        boundary_cols: Vec<Vec<Point3>>,
        sparse_interior: Vec<Vec<Point3>>,
    },
}

impl GeometryEntity {
    /// 简短的类型名，便于日志输出。
    pub fn kind(&self) -> &'static str {
        match self {
            GeometryEntity::Line { .. } => "line",
            GeometryEntity::Arc { .. } => "arc",
            GeometryEntity::Point { .. } => "point",
            GeometryEntity::Curve { .. } => "curve",
            GeometryEntity::SurfaceEdges { .. } => "surface",
        }
    }

    /// 由行优先的控制点网格构造曲面边线。空网格返回 `None`。
    pub fn surface_from_grid(grid: Vec<Vec<Point3>>) -> Option<Self> {
        let grid: Vec<Vec<Point3>> = grid.into_iter().filter(|row| !row.is_empty()).collect();
        let (first, last) = match (grid.first(), grid.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return None,
        };

        let mut boundary_rows = vec![first.clone()];
        if grid.len() > 1 {
            boundary_rows.push(last.clone());
        }

        let first_col: Vec<Point3> = grid.iter().map(|row| row[0]).collect();
        let last_col: Vec<Point3> = grid.iter().map(|row| row[row.len() - 1]).collect();
        let mut boundary_cols = vec![first_col];
        if first.len() > 1 {
            boundary_cols.push(last_col);
        }

        let mut sparse_interior = Vec::new();
        let row_step = (grid.len() / INTERIOR_SAMPLES).max(1);
        for index in (row_step..grid.len().saturating_sub(1)).step_by(row_step) {
            sparse_interior.push(grid[index].clone());
        }

        let cols = first.len();
        let col_step = (cols / INTERIOR_SAMPLES).max(1);
        for col in (col_step..cols.saturating_sub(1)).step_by(col_step) {
            let column: Vec<Point3> = grid.iter().filter_map(|row| row.get(col).copied()).collect();
            if column.len() > 1 {
                sparse_interior.push(column);
            }
        }

        Some(GeometryEntity::SurfaceEdges {
            boundary_rows,
            boundary_cols,
            sparse_interior,
        })
    }

    /// 离散化后的线段；点实体返回空集合。
    pub fn segments(&self) -> Vec<Segment3> {
        match self {
            GeometryEntity::Line { p1, p2 } => vec![Segment3::new(*p1, *p2)],
            GeometryEntity::Arc {
                center,
                start,
                end,
                plane_z,
            } => tessellate_arc(*center, *start, *end, *plane_z),
            GeometryEntity::Point { .. } => Vec::new(),
            GeometryEntity::Curve { control_points } => polyline_segments(control_points),
            GeometryEntity::SurfaceEdges {
                boundary_rows,
                boundary_cols,
                sparse_interior,
            } => boundary_rows
                .iter()
                .chain(boundary_cols)
                .chain(sparse_interior)
                .flat_map(|polyline| polyline_segments(polyline))
                .collect(),
        }
    }
}

/// 将折线拆成相邻点对。
pub fn polyline_segments(points: &[Point3]) -> Vec<Segment3> {
    points
        .windows(2)
        .map(|pair| Segment3::new(pair[0], pair[1]))
        .collect()
}

/// 离散化圆弧。半径取圆心到起点的距离；退化圆弧返回空集合。
pub fn tessellate_arc(center: Point2, start: Point2, end: Point2, plane_z: f64) -> Vec<Segment3> {
    let radius = center.distance(start);
    if !radius.is_finite() || radius < DEGENERATE_RADIUS {
        return Vec::new();
    }

    let start_angle = (start.y() - center.y()).atan2(start.x() - center.x());
    let mut end_angle = (end.y() - center.y()).atan2(end.x() - center.x());
    if end_angle <= start_angle {
        end_angle += TAU;
    }
    let span = end_angle - start_angle;
    let count = arc_segment_count(span);

    let point_at = |step: usize| {
        let angle = start_angle + span * step as f64 / count as f64;
        Point3::new(
            center.x() + radius * angle.cos(),
            center.y() + radius * angle.sin(),
            plane_z,
        )
    };

    (0..count)
        .map(|step| Segment3::new(point_at(step), point_at(step + 1)))
        .collect()
}

/// 所有实体离散化后的线段与点的聚合。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WireframeModel {
    pub segments: Vec<Segment3>,
    pub points: Vec<Point3>,
}

impl WireframeModel {
    pub fn from_entities(entities: &[GeometryEntity]) -> Self {
        let mut model = Self::default();
        for entity in entities {
            match entity {
                GeometryEntity::Point { xyz } => model.points.push(*xyz),
                other => model.segments.extend(other.segments()),
            }
        }
        model
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty() && self.points.is_empty()
    }

    /// 线段端点与孤立点共同构成的范围。
    pub fn bounds(&self) -> Option<Bounds3D> {
        let mut bounds = Bounds3D::empty();
        for segment in &self.segments {
            bounds.include_point(segment.start);
            bounds.include_point(segment.end);
        }
        for point in &self.points {
            bounds.include_point(*point);
        }
        if bounds.is_empty() { None } else { Some(bounds) }
    }
}

#[cfg(test)]
mod tests {
    use std::f64::consts::{FRAC_PI_2, PI};

    use super::*;

    #[test]
    fn entity_kinds_have_log_names() {
        let point = GeometryEntity::Point {
            xyz: Point3::new(0.0, 0.0, 0.0),
        };
        let curve = GeometryEntity::Curve {
            control_points: Vec::new(),
        };
        assert_eq!(point.kind(), "point");
        assert_eq!(curve.kind(), "curve");
    }

    #[test]
    fn quarter_arc_uses_minimum_segments() {
        let segments = tessellate_arc(
            Point2::new(0.0, 0.0),
            Point2::new(2.0, 0.0),
            Point2::new(0.0, 2.0),
            1.5,
        );
        assert_eq!(segments.len(), arc_segment_count(FRAC_PI_2));
        assert_eq!(segments.len(), 16);
        for segment in &segments {
            for point in [segment.start, segment.end] {
                let r = (point.x().powi(2) + point.y().powi(2)).sqrt();
                assert!((r - 2.0).abs() < 1e-9);
                assert!((point.z() - 1.5).abs() < 1e-12);
            }
        }
        let last = segments.last().unwrap().end;
        assert!(last.x().abs() < 1e-9);
        assert!((last.y() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn reversed_end_wraps_around() {
        // 起点在 90°，终点在 0°，逆时针应走 270°。
        let segments = tessellate_arc(
            Point2::new(1.0, 1.0),
            Point2::new(1.0, 2.0),
            Point2::new(2.0, 1.0),
            0.0,
        );
        assert_eq!(segments.len(), arc_segment_count(PI * 1.5));
        assert_eq!(segments.len(), 36);
    }

    #[test]
    fn coincident_start_and_end_is_full_circle() {
        let segments = tessellate_arc(
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(1.0, 0.0),
            0.0,
        );
        assert_eq!(segments.len(), 48);
    }

    #[test]
    fn degenerate_arc_yields_nothing() {
        let segments = tessellate_arc(
            Point2::new(3.0, 3.0),
            Point2::new(3.0, 3.0 + 1e-12),
            Point2::new(4.0, 3.0),
            0.0,
        );
        assert!(segments.is_empty());
    }

    #[test]
    fn surface_edges_cover_boundary_and_samples() {
        let grid: Vec<Vec<Point3>> = (0..12)
            .map(|row| {
                (0..12)
                    .map(|col| Point3::new(col as f64, row as f64, 0.0))
                    .collect()
            })
            .collect();
        let surface = GeometryEntity::surface_from_grid(grid).expect("grid is not empty");
        match &surface {
            GeometryEntity::SurfaceEdges {
                boundary_rows,
                boundary_cols,
                sparse_interior,
            } => {
                assert_eq!(boundary_rows.len(), 2);
                assert_eq!(boundary_cols.len(), 2);
                assert!((boundary_rows[1][0].y() - 11.0).abs() < 1e-12);
                assert!((boundary_cols[1][0].x() - 11.0).abs() < 1e-12);
                // 步长 2：内部行 2,4,6,8,10 与内部列 2,4,6,8,10。
                assert_eq!(sparse_interior.len(), 10);
            }
            other => panic!("unexpected entity {other:?}"),
        }
        assert_eq!(surface.segments().len(), 14 * 11);
    }

    #[test]
    fn empty_grid_is_rejected() {
        assert!(GeometryEntity::surface_from_grid(vec![Vec::new()]).is_none());
    }

    #[test]
    fn model_separates_points_from_segments() {
        let entities = vec![
            GeometryEntity::Point {
                xyz: Point3::new(1.0, 2.0, 3.0),
            },
            GeometryEntity::Line {
                p1: Point3::new(0.0, 0.0, 0.0),
                p2: Point3::new(1.0, 0.0, 0.0),
            },
        ];
        let model = WireframeModel::from_entities(&entities);
        assert_eq!(model.points.len(), 1);
        assert_eq!(model.segments.len(), 1);
        let bounds = model.bounds().unwrap();
        assert!((bounds.max().z() - 3.0).abs() < 1e-12);
        assert!(!model.is_empty());
        assert!(WireframeModel::default().is_empty());
    }
}
