//! IGES 固定列文本解析与线框重建。
//!
//! 每条记录 80 列，第 73 列（下标 72）为段标识。只处理
//! Directory（`D`）与 Parameter（`P`）两段，其余段忽略。

use std::collections::BTreeMap;
use std::path::Path;

use cadpreview_core::FailureReason;
use cadpreview_core::geometry::{Point2, Point3};
use cadpreview_core::wireframe::{GeometryEntity, WireframeModel};
use tracing::{debug, trace};

use crate::read_source;

pub const SECTION_COLUMN: usize = 72;
pub const PARAMETER_DATA_COLUMNS: usize = 64;
const SEQUENCE_COLUMNS: std::ops::Range<usize> = 73..80;

pub const LINE: i32 = 110;
pub const CIRCULAR_ARC: i32 = 100;
pub const POINT: i32 = 116;
pub const BSPLINE_CURVE: i32 = 126;
pub const BSPLINE_SURFACE: i32 = 128;

/// 一条目录项（两行一组）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub entity_type: i32,
    pub parameter_pointer: usize,
    pub parameter_count: usize,
}

/// 解析后的 D/P 段内容。
#[derive(Debug, Clone, Default)]
pub struct IgesFile {
    directory: Vec<DirectoryEntry>,
    parameters: BTreeMap<usize, String>,
}

impl IgesFile {
    pub fn parse(source: &[u8]) -> Self {
        let mut directory_lines: Vec<&[u8]> = Vec::new();
        let mut parameter_lines: Vec<&[u8]> = Vec::new();
        for raw in source.split(|byte| *byte == b'\n') {
            let line = raw.strip_suffix(b"\r").unwrap_or(raw);
            match line.get(SECTION_COLUMN) {
                Some(b'D') => directory_lines.push(line),
                Some(b'P') => parameter_lines.push(line),
                _ => {}
            }
        }

        let directory = directory_lines
            .chunks_exact(2)
            .filter_map(|pair| parse_directory_pair(pair[0], pair[1]))
            .collect();

        let mut parameters: BTreeMap<usize, String> = BTreeMap::new();
        for line in parameter_lines {
            let Some(sequence) = column(line, SEQUENCE_COLUMNS).and_then(parse_usize) else {
                continue;
            };
            let data = lossy_column(line, 0..PARAMETER_DATA_COLUMNS);
            parameters.entry(sequence).or_default().push_str(data.trim());
        }

        Self {
            directory,
            parameters,
        }
    }

    pub fn directory(&self) -> &[DirectoryEntry] {
        &self.directory
    }

    /// 目录项对应的参数列表：拼接 `ptr..ptr+count` 的记录，只取第一个
    /// `;` 之前的部分并按 `,` 切分，丢弃空项。下标 0 为实体类型号。
    pub fn parameters(&self, entry: &DirectoryEntry) -> Vec<String> {
        let mut raw = String::new();
        for offset in 0..entry.parameter_count {
            if let Some(data) = self.parameters.get(&(entry.parameter_pointer + offset)) {
                raw.push_str(data);
            }
        }
        let group = raw.split(';').next().unwrap_or_default();
        group
            .split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// 逐条解释目录项；任何单个实体的失败只跳过该实体。
    pub fn entities(&self) -> Vec<GeometryEntity> {
        let mut entities = Vec::new();
        for entry in &self.directory {
            let tokens = self.parameters(entry);
            match interpret(entry.entity_type, &tokens) {
                Some(entity) => {
                    trace!(kind = entity.kind(), pointer = entry.parameter_pointer, "解析到 IGES 实体");
                    entities.push(entity);
                }
                None => trace!(
                    entity_type = entry.entity_type,
                    pointer = entry.parameter_pointer,
                    "跳过 IGES 实体"
                ),
            }
        }
        entities
    }
}

/// 读取 IGES 文件并返回几何实体列表。
pub fn read_entities(path: &Path) -> Result<Vec<GeometryEntity>, FailureReason> {
    let source = read_source(path)?;
    let file = IgesFile::parse(&source);
    let entities = file.entities();
    debug!(
        path = %path.display(),
        directory = file.directory().len(),
        entities = entities.len(),
        "已解析 IGES"
    );
    Ok(entities)
}

/// 读取并聚合为线框；聚合为空视为失败。
pub fn read_wireframe(path: &Path) -> Result<WireframeModel, FailureReason> {
    let entities = read_entities(path)?;
    let model = WireframeModel::from_entities(&entities);
    if model.is_empty() {
        return Err(FailureReason::NoEntities);
    }
    Ok(model)
}

fn parse_directory_pair(first: &[u8], second: &[u8]) -> Option<DirectoryEntry> {
    let entity_type = column(first, 0..8).and_then(parse_i32)?;
    let parameter_pointer = column(first, 8..16).and_then(parse_usize)?;
    let parameter_count = column(second, 24..32)
        .and_then(parse_usize)
        .unwrap_or(1);
    Some(DirectoryEntry {
        entity_type,
        parameter_pointer,
        parameter_count,
    })
}

/// 取固定列区间；行尾不足时截断到行长。
fn column(line: &[u8], range: std::ops::Range<usize>) -> Option<&str> {
    let end = range.end.min(line.len());
    let bytes = line.get(range.start..end)?;
    std::str::from_utf8(bytes).ok()
}

/// 数据列按字节宽松解码，丢弃无法解码的字节而保留其余字符。
fn lossy_column(line: &[u8], range: std::ops::Range<usize>) -> String {
    let end = range.end.min(line.len());
    let bytes = line.get(range.start..end).unwrap_or_default();
    String::from_utf8_lossy(bytes)
        .chars()
        .filter(|c| *c != char::REPLACEMENT_CHARACTER)
        .collect()
}

fn parse_i32(raw: &str) -> Option<i32> {
    raw.trim().parse().ok()
}

fn parse_usize(raw: &str) -> Option<usize> {
    raw.trim().parse().ok()
}

/// IGES 允许 Fortran 风格的 `D` 指数。
fn real(tokens: &[String], index: usize) -> Option<f64> {
    let token = tokens.get(index)?;
    let normalized = token.replace(['D', 'd'], "E");
    normalized.parse::<f64>().ok().filter(|value| value.is_finite())
}

fn integer(tokens: &[String], index: usize) -> Option<usize> {
    tokens.get(index)?.parse().ok()
}

fn point3(tokens: &[String], index: usize) -> Option<Point3> {
    Some(Point3::new(
        real(tokens, index)?,
        real(tokens, index + 1)?,
        real(tokens, index + 2)?,
    ))
}

fn interpret(entity_type: i32, tokens: &[String]) -> Option<GeometryEntity> {
    match entity_type {
        LINE if tokens.len() >= 7 => Some(GeometryEntity::Line {
            p1: point3(tokens, 1)?,
            p2: point3(tokens, 4)?,
        }),
        CIRCULAR_ARC if tokens.len() >= 7 => {
            let plane_z = real(tokens, 1)?;
            let center = Point2::new(real(tokens, 2)?, real(tokens, 3)?);
            let start = Point2::new(real(tokens, 4)?, real(tokens, 5)?);
            let end_y = if tokens.len() > 7 {
                real(tokens, 7)?
            } else {
                start.y()
            };
            let end = Point2::new(real(tokens, 6)?, end_y);
            Some(GeometryEntity::Arc {
                center,
                start,
                end,
                plane_z,
            })
        }
        POINT if tokens.len() >= 4 => Some(GeometryEntity::Point {
            xyz: point3(tokens, 1)?,
        }),
        BSPLINE_CURVE if tokens.len() > 10 => bspline_curve(tokens),
        BSPLINE_SURFACE if tokens.len() > 15 => bspline_surface(tokens),
        _ => None,
    }
}

/// 类型 126：K, M 之后跳过两个标志位，随后为节点 T(A)、权重 W(N)、控制点 X/Y/Z(N)。
fn bspline_curve(tokens: &[String]) -> Option<GeometryEntity> {
    let upper = integer(tokens, 1)?;
    let degree = integer(tokens, 2)?;
    let count = upper.checked_add(1)?;
    let knots = count.checked_add(degree)?.checked_add(1)?;
    let first = 1usize.checked_add(4)?.checked_add(knots)?.checked_add(count)?;

    let control_points = read_points(tokens, first, count);
    if control_points.is_empty() {
        return None;
    }
    Some(GeometryEntity::Curve { control_points })
}

/// 类型 128：K1, K2, M1, M2, PROP1..5, 节点 S(A1), T(A2), 权重 W(N1·N2)，
/// 控制点按行优先排列为 N2 行 × N1 列。
fn bspline_surface(tokens: &[String]) -> Option<GeometryEntity> {
    let columns = integer(tokens, 1)?.checked_add(1)?;
    let rows = integer(tokens, 2)?.checked_add(1)?;
    let knots_u = columns.checked_add(integer(tokens, 3)?)?.checked_add(1)?;
    let knots_v = rows.checked_add(integer(tokens, 4)?)?.checked_add(1)?;
    let weights = columns.checked_mul(rows)?;
    let first = 1usize
        .checked_add(9)?
        .checked_add(knots_u)?
        .checked_add(knots_v)?
        .checked_add(weights)?;

    let mut grid = Vec::new();
    for row in 0..rows {
        let offset = first.checked_add(row.checked_mul(columns)?.checked_mul(3)?)?;
        if offset >= tokens.len() {
            break;
        }
        grid.push(read_points(tokens, offset, columns));
    }
    GeometryEntity::surface_from_grid(grid)
}

/// 从 `first` 起读取至多 `count` 个三维点，遇到缺失或非法数值即停止。
fn read_points(tokens: &[String], first: usize, count: usize) -> Vec<Point3> {
    let mut points = Vec::new();
    for index in 0..count {
        let Some(offset) = index.checked_mul(3).and_then(|delta| first.checked_add(delta)) else {
            break;
        };
        match point3(tokens, offset) {
            Some(point) => points.push(point),
            None => break,
        }
    }
    points
}
