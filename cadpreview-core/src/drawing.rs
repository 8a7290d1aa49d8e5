//! 二维矢量图纸模型（DXF 来源），只保留预览所需的几何与颜色信息。

use std::collections::HashMap;
use std::f64::consts::TAU;

use glam::{DAffine2, DVec2};
use serde::{Deserialize, Serialize};

use crate::geometry::{Bounds2D, Point2, Vector2, arc_segment_count};

/// 块参照最多展开的嵌套层数，防止自引用块无限递归。
pub const MAX_INSERT_DEPTH: usize = 8;

/// AutoCAD 颜色索引中“白/黑”的编号，在白底上绘制为深色。
pub const ACI_FOREGROUND: u8 = 7;

/// 实体颜色设置（组码 62）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorIndex {
    ByBlock,
    ByLayer,
    Index(u8),
}

impl ColorIndex {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => ColorIndex::ByBlock,
            1..=255 => ColorIndex::Index(code as u8),
            _ => ColorIndex::ByLayer,
        }
    }
}

impl Default for ColorIndex {
    fn default() -> Self {
        ColorIndex::ByLayer
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layer {
    pub name: String,
    pub color: u8,
    pub is_visible: bool,
}

impl Layer {
    /// 按 LAYER 表记录构造；负颜色号表示图层关闭。
    pub fn from_table(name: impl Into<String>, color_code: i32) -> Self {
        let magnitude = color_code.unsigned_abs().clamp(1, 255) as u8;
        Self {
            name: name.into(),
            color: magnitude,
            is_visible: color_code >= 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolylineVertex {
    pub position: Point2,
    /// 到下一顶点的凸度，`tan(θ/4)`。
    pub bulge: f64,
}

impl PolylineVertex {
    #[inline]
    pub fn new(position: Point2) -> Self {
        Self {
            position,
            bulge: 0.0,
        }
    }

    #[inline]
    pub fn with_bulge(position: Point2, bulge: f64) -> Self {
        Self { position, bulge }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntityKind {
    Line {
        start: Point2,
        end: Point2,
    },
    Circle {
        center: Point2,
        radius: f64,
    },
    /// 角度为弧度，逆时针。
    Arc {
        center: Point2,
        radius: f64,
        start_angle: f64,
        end_angle: f64,
    },
    Ellipse {
        center: Point2,
        major_axis: Vector2,
        ratio: f64,
        start_parameter: f64,
        end_parameter: f64,
    },
    Polyline {
        vertices: Vec<PolylineVertex>,
        is_closed: bool,
    },
    Spline {
        control_points: Vec<Point2>,
        fit_points: Vec<Point2>,
    },
    Point {
        position: Point2,
    },
    Face3D {
        vertices: Vec<Point2>,
    },
    Insert {
        block: String,
        insert: Point2,
        scale: Vector2,
        rotation: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorEntity {
    pub kind: EntityKind,
    pub layer: String,
    pub color: ColorIndex,
}

impl VectorEntity {
    pub fn new(kind: EntityKind, layer: impl Into<String>) -> Self {
        Self {
            kind,
            layer: layer.into(),
            color: ColorIndex::ByLayer,
        }
    }

    pub fn with_color(mut self, color: ColorIndex) -> Self {
        self.color = color;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockDefinition {
    pub name: String,
    pub base_point: Point2,
    pub entities: Vec<VectorEntity>,
}

/// 绘制用的折线：单点折线表示点实体。
#[derive(Debug, Clone, PartialEq)]
pub struct StrokePath {
    pub points: Vec<Point2>,
    pub color: u8,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VectorDocument {
    layers: HashMap<String, Layer>,
    blocks: HashMap<String, BlockDefinition>,
    entities: Vec<VectorEntity>,
}

impl VectorDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_layer(&mut self, layer: Layer) {
        self.layers.insert(layer.name.clone(), layer);
    }

    pub fn layer(&self, name: &str) -> Option<&Layer> {
        self.layers.get(name)
    }

    pub fn add_block(&mut self, block: BlockDefinition) {
        self.blocks.insert(block.name.clone(), block);
    }

    pub fn block(&self, name: &str) -> Option<&BlockDefinition> {
        self.blocks.get(name)
    }

    pub fn add_entity(&mut self, entity: VectorEntity) {
        self.entities.push(entity);
    }

    pub fn entities(&self) -> impl Iterator<Item = &VectorEntity> {
        self.entities.iter()
    }

    #[inline]
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// 展开块参照并离散化全部可见实体。
    pub fn flatten(&self) -> Vec<StrokePath> {
        let mut paths = Vec::new();
        let mut active = Vec::new();
        for entity in &self.entities {
            self.flatten_entity(entity, DAffine2::IDENTITY, ACI_FOREGROUND, &mut active, &mut paths);
        }
        paths
    }

    /// 展开后所有点的范围。
    pub fn bounds(&self) -> Option<Bounds2D> {
        paths_bounds(&self.flatten())
    }

    /// `active` 为正在展开的块名栈，已在栈中的块不再进入。
    fn flatten_entity<'a>(
        &'a self,
        entity: &'a VectorEntity,
        transform: DAffine2,
        block_color: u8,
        active: &mut Vec<&'a str>,
        out: &mut Vec<StrokePath>,
    ) {
        let layer = self.layer(&entity.layer);
        if layer.is_some_and(|layer| !layer.is_visible) {
            return;
        }
        let color = match entity.color {
            ColorIndex::Index(index) => index,
            ColorIndex::ByBlock => block_color,
            ColorIndex::ByLayer => layer.map(|layer| layer.color).unwrap_or(ACI_FOREGROUND),
        };

        if let EntityKind::Insert {
            block,
            insert,
            scale,
            rotation,
        } = &entity.kind
        {
            if active.len() >= MAX_INSERT_DEPTH || active.contains(&block.as_str()) {
                return;
            }
            let Some(definition) = self.block(block) else {
                return;
            };
            let local = DAffine2::from_scale_angle_translation(
                scale.as_vec2(),
                *rotation,
                insert.as_vec2(),
            ) * DAffine2::from_translation(-definition.base_point.as_vec2());
            active.push(block.as_str());
            for child in &definition.entities {
                self.flatten_entity(child, transform * local, color, active, out);
            }
            active.pop();
            return;
        }

        for polyline in entity.kind.tessellate() {
            let points: Vec<Point2> = polyline
                .into_iter()
                .map(|point| Point2(transform.transform_point2(point)))
                .collect();
            if !points.is_empty() {
                out.push(StrokePath { points, color });
            }
        }
    }
}

/// 一组折线的点范围；没有任何点时返回 `None`。
pub fn paths_bounds(paths: &[StrokePath]) -> Option<Bounds2D> {
    let mut bounds = Bounds2D::empty();
    for point in paths.iter().flat_map(|path| path.points.iter()) {
        bounds.include_point(*point);
    }
    if bounds.is_empty() { None } else { Some(bounds) }
}

impl EntityKind {
    /// 局部坐标下的折线集合；块参照由文档展开，这里返回空。
    pub fn tessellate(&self) -> Vec<Vec<DVec2>> {
        match self {
            EntityKind::Line { start, end } => vec![vec![start.as_vec2(), end.as_vec2()]],
            EntityKind::Circle { center, radius } => {
                if *radius <= 0.0 {
                    return Vec::new();
                }
                vec![arc_points(center.as_vec2(), *radius, 0.0, TAU)]
            }
            EntityKind::Arc {
                center,
                radius,
                start_angle,
                end_angle,
            } => {
                if *radius <= 0.0 {
                    return Vec::new();
                }
                let mut span = end_angle - start_angle;
                if span <= 0.0 {
                    span += TAU;
                }
                vec![arc_points(center.as_vec2(), *radius, *start_angle, span)]
            }
            EntityKind::Ellipse {
                center,
                major_axis,
                ratio,
                start_parameter,
                end_parameter,
            } => {
                let mut span = end_parameter - start_parameter;
                if span <= 0.0 {
                    span += TAU;
                }
                let major = major_axis.as_vec2();
                let minor = major_axis.perp().as_vec2() * *ratio;
                let count = arc_segment_count(span);
                let points = (0..=count)
                    .map(|step| {
                        let t = start_parameter + span * step as f64 / count as f64;
                        center.as_vec2() + major * t.cos() + minor * t.sin()
                    })
                    .collect();
                vec![points]
            }
            EntityKind::Polyline {
                vertices,
                is_closed,
            } => vec![polyline_points(vertices, *is_closed)],
            EntityKind::Spline {
                control_points,
                fit_points,
            } => {
                let source = if control_points.len() >= 2 {
                    control_points
                } else {
                    fit_points
                };
                vec![source.iter().map(|point| point.as_vec2()).collect()]
            }
            EntityKind::Point { position } => vec![vec![position.as_vec2()]],
            EntityKind::Face3D { vertices } => {
                let mut points: Vec<DVec2> = vertices.iter().map(|point| point.as_vec2()).collect();
                if let Some(first) = points.first().copied() {
                    points.push(first);
                }
                vec![points]
            }
            EntityKind::Insert { .. } => Vec::new(),
        }
    }
}

fn arc_points(center: DVec2, radius: f64, start: f64, span: f64) -> Vec<DVec2> {
    let count = arc_segment_count(span);
    (0..=count)
        .map(|step| {
            let angle = start + span * step as f64 / count as f64;
            center + DVec2::new(angle.cos(), angle.sin()) * radius
        })
        .collect()
}

fn polyline_points(vertices: &[PolylineVertex], is_closed: bool) -> Vec<DVec2> {
    let mut points = Vec::new();
    let Some(first) = vertices.first() else {
        return points;
    };
    points.push(first.position.as_vec2());

    let edge_count = if is_closed && vertices.len() > 1 {
        vertices.len()
    } else {
        vertices.len().saturating_sub(1)
    };
    for index in 0..edge_count {
        let from = &vertices[index];
        let to = &vertices[(index + 1) % vertices.len()];
        append_bulge_edge(&mut points, from.position.as_vec2(), to.position.as_vec2(), from.bulge);
    }
    points
}

/// 追加一条边（不含起点）；凸度非零时按圆弧离散。
fn append_bulge_edge(points: &mut Vec<DVec2>, from: DVec2, to: DVec2, bulge: f64) {
    let chord = to - from;
    let length = chord.length();
    if bulge.abs() < 1e-9 || length < 1e-12 {
        points.push(to);
        return;
    }
    let sweep = 4.0 * bulge.atan();
    let normal = chord.perp() / length;
    let center = from + chord * 0.5 + normal * (length * 0.5) * ((1.0 - bulge * bulge) / (2.0 * bulge));
    let radius = center.distance(from);
    let start = (from.y - center.y).atan2(from.x - center.x);
    let count = arc_segment_count(sweep);
    for step in 1..=count {
        let angle = start + sweep * step as f64 / count as f64;
        points.push(center + DVec2::new(angle.cos(), angle.sin()) * radius);
    }
}
