//! ASCII DXF 读取器：只提取生成预览所需的图层、块与模型空间实体。
//!
//! 读取以“记录”为单位进行：组码 0 开始一条记录，之后直到下一个组码 0
//! 之前的组码对都属于它。无法识别或字段残缺的实体只会被跳过；
//! 只有组码流本身损坏才视为整个文件解码失败。

use std::f64::consts::{PI, TAU};
use std::path::Path;

use cadpreview_core::FailureReason;
use cadpreview_core::drawing::{
    BlockDefinition, ColorIndex, EntityKind, Layer, PolylineVertex, VectorDocument, VectorEntity,
};
use cadpreview_core::geometry::{Point2, Vector2};
use tracing::{debug, trace, warn};

use crate::read_source;

const BINARY_SENTINEL: &[u8] = b"AutoCAD Binary DXF";
const DEFAULT_LAYER: &str = "0";

/// 读取 DXF 文件并构建矢量文档。
pub fn read_document(path: &Path) -> Result<VectorDocument, FailureReason> {
    let bytes = read_source(path)?;
    if bytes.starts_with(BINARY_SENTINEL) {
        debug!(path = %path.display(), "不支持二进制 DXF");
        return Err(FailureReason::DecodeError);
    }
    // 老版本 DXF 常以本地代码页保存，非 UTF-8 字节替换后不影响几何。
    let source = String::from_utf8_lossy(&bytes);
    let document = parse_document(&source)?;
    debug!(
        path = %path.display(),
        entities = document.entity_count(),
        "已解析 DXF"
    );
    Ok(document)
}

/// 从 DXF 文本构建矢量文档。
pub fn parse_document(source: &str) -> Result<VectorDocument, FailureReason> {
    DxfParser::new(source).parse().map_err(|err| {
        warn!(error = %err.message(), "DXF 组码流损坏");
        FailureReason::DecodeError
    })
}

#[derive(Debug)]
enum DxfError {
    Unsupported { feature: String },
    Invalid { message: String },
}

impl DxfError {
    fn unsupported(feature: impl Into<String>) -> Self {
        Self::Unsupported {
            feature: feature.into(),
        }
    }

    fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    fn message(&self) -> &str {
        match self {
            DxfError::Unsupported { feature } => feature,
            DxfError::Invalid { message } => message,
        }
    }
}

/// 一条以组码 0 起始的记录。
#[derive(Debug, Clone)]
struct Record {
    kind: String,
    pairs: Vec<(i32, String)>,
}

impl Record {
    fn value(&self, code: i32) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(candidate, _)| *candidate == code)
            .map(|(_, value)| value.trim())
    }

    fn real(&self, code: i32, context: &str) -> Result<Option<f64>, DxfError> {
        self.value(code)
            .map(|raw| parse_f64(raw, context))
            .transpose()
    }

    fn require(&self, code: i32, context: &str) -> Result<f64, DxfError> {
        self.real(code, context)?
            .ok_or_else(|| DxfError::invalid(format!("{} 缺少 {context}（组码 {code}）", self.kind)))
    }

    fn int(&self, code: i32) -> Option<i32> {
        self.value(code).and_then(|raw| parse_i32(raw, "").ok())
    }

    fn point(&self, x_code: i32, context: &str) -> Result<Point2, DxfError> {
        Ok(Point2::new(
            self.require(x_code, context)?,
            self.require(x_code + 10, context)?,
        ))
    }

    fn layer(&self) -> String {
        self.value(8)
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_LAYER)
            .to_string()
    }

    fn color(&self) -> ColorIndex {
        self.int(62).map(ColorIndex::from_code).unwrap_or_default()
    }

    fn is_paper_space(&self) -> bool {
        self.int(67) == Some(1)
    }

    /// 拉伸方向 Z 为负时，OCS 相对 WCS 沿 X 轴镜像。
    fn is_mirrored(&self) -> bool {
        self.real(230, "拉伸方向 Z")
            .ok()
            .flatten()
            .is_some_and(|z| z < 0.0)
    }

    fn flags(&self) -> i32 {
        self.int(70).unwrap_or(0)
    }
}

struct DxfParser<'a> {
    reader: DxfReader<'a>,
}

impl<'a> DxfParser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            reader: DxfReader::new(source),
        }
    }

    fn parse(mut self) -> Result<VectorDocument, DxfError> {
        let mut document = VectorDocument::new();
        while let Some((code, value)) = self.reader.next_pair()? {
            if code != 0 {
                continue;
            }
            match value.trim() {
                "SECTION" => {
                    let name = match self.reader.next_pair()? {
                        Some((2, name)) => name.trim().to_string(),
                        Some(other) => {
                            self.reader.put_back(other);
                            String::new()
                        }
                        None => break,
                    };
                    let records = self.read_section()?;
                    match name.as_str() {
                        "TABLES" => read_layers(&records, &mut document),
                        "BLOCKS" => read_blocks(&records, &mut document),
                        "ENTITIES" => {
                            for entity in build_entities(&records) {
                                document.add_entity(entity);
                            }
                        }
                        _ => trace!(section = %name, records = records.len(), "跳过 DXF 段"),
                    }
                }
                "EOF" => break,
                other => trace!(marker = other, "忽略段外记录"),
            }
        }
        Ok(document)
    }

    /// 读取到 ENDSEC 为止的全部记录；首个组码 0 之前的组码对（如 HEADER 变量）丢弃。
    fn read_section(&mut self) -> Result<Vec<Record>, DxfError> {
        let mut records: Vec<Record> = Vec::new();
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    let kind = value.trim();
                    if kind == "ENDSEC" {
                        break;
                    }
                    if kind == "EOF" {
                        self.reader.put_back((0, value));
                        warn!("DXF 段缺少 ENDSEC");
                        break;
                    }
                    records.push(Record {
                        kind: kind.to_string(),
                        pairs: Vec::new(),
                    });
                }
                Some(pair) => {
                    if let Some(record) = records.last_mut() {
                        record.pairs.push(pair);
                    }
                }
                None => {
                    warn!("DXF 段缺少 ENDSEC");
                    break;
                }
            }
        }
        Ok(records)
    }
}

fn read_layers(records: &[Record], document: &mut VectorDocument) {
    for record in records.iter().filter(|record| record.kind == "LAYER") {
        let Some(name) = record.value(2) else {
            continue;
        };
        let mut layer = Layer::from_table(name, record.int(62).unwrap_or(7));
        if record.flags() & 0x01 != 0 {
            layer.is_visible = false;
        }
        document.add_layer(layer);
    }
}

fn read_blocks(records: &[Record], document: &mut VectorDocument) {
    let mut current: Option<(&Record, Vec<Record>)> = None;
    for record in records {
        match record.kind.as_str() {
            "BLOCK" => current = Some((record, Vec::new())),
            "ENDBLK" => {
                if let Some((header, body)) = current.take() {
                    if let Some(block) = build_block(header, &body) {
                        document.add_block(block);
                    }
                }
            }
            _ => {
                if let Some((_, body)) = current.as_mut() {
                    body.push(record.clone());
                }
            }
        }
    }
}

fn build_block(header: &Record, body: &[Record]) -> Option<BlockDefinition> {
    let name = header.value(2)?.to_string();
    let upper = name.to_ascii_uppercase();
    if upper.starts_with("*MODEL_SPACE") || upper.starts_with("*PAPER_SPACE") {
        return None;
    }
    let base_point = Point2::new(
        header.real(10, "块基点 X").ok().flatten().unwrap_or(0.0),
        header.real(20, "块基点 Y").ok().flatten().unwrap_or(0.0),
    );
    Some(BlockDefinition {
        name,
        base_point,
        entities: build_entities(body),
    })
}

/// 把记录序列转为实体；POLYLINE 会吞掉其后的 VERTEX/SEQEND。
fn build_entities(records: &[Record]) -> Vec<VectorEntity> {
    let mut entities = Vec::new();
    let mut index = 0;
    while index < records.len() {
        let record = &records[index];
        index += 1;

        if record.kind == "POLYLINE" {
            let start = index;
            while index < records.len() && records[index].kind == "VERTEX" {
                index += 1;
            }
            let vertices = &records[start..index];
            if index < records.len() && records[index].kind == "SEQEND" {
                index += 1;
            }
            if record.is_paper_space() {
                continue;
            }
            match polyline_entities(record, vertices) {
                Ok(parsed) => entities.extend(parsed),
                Err(err) => debug!(kind = %record.kind, error = %err.message(), "跳过 DXF 实体"),
            }
            continue;
        }

        if record.is_paper_space() {
            continue;
        }
        match parse_entity(record) {
            Ok(kind) => entities.push(
                VectorEntity::new(kind, record.layer()).with_color(record.color()),
            ),
            Err(DxfError::Unsupported { feature }) => {
                trace!(kind = %record.kind, feature = %feature, "跳过 DXF 实体")
            }
            Err(err) => debug!(kind = %record.kind, error = %err.message(), "跳过 DXF 实体"),
        }
    }
    entities
}

fn parse_entity(record: &Record) -> Result<EntityKind, DxfError> {
    match record.kind.as_str() {
        "LINE" => Ok(EntityKind::Line {
            start: record.point(10, "LINE 起点")?,
            end: record.point(11, "LINE 终点")?,
        }),
        "CIRCLE" => parse_circle(record),
        "ARC" => parse_arc(record),
        "ELLIPSE" => parse_ellipse(record),
        "LWPOLYLINE" => parse_lwpolyline(record),
        "SPLINE" => parse_spline(record),
        "POINT" => Ok(EntityKind::Point {
            position: record.point(10, "POINT 位置")?,
        }),
        "3DFACE" => parse_face(record, [0, 1, 2, 3]),
        // SOLID/TRACE 的第三、四个角点按 Z 字形排列。
        "SOLID" | "TRACE" => parse_face(record, [0, 1, 3, 2]),
        "INSERT" => parse_insert(record),
        "DIMENSION" => {
            let block = record
                .value(2)
                .filter(|name| !name.is_empty())
                .ok_or_else(|| DxfError::invalid("DIMENSION 缺少几何块名（组码 2）"))?;
            Ok(EntityKind::Insert {
                block: block.to_string(),
                insert: Point2::new(0.0, 0.0),
                scale: Vector2::new(1.0, 1.0),
                rotation: 0.0,
            })
        }
        other => Err(DxfError::unsupported(format!("暂不支持的实体类型 {other}"))),
    }
}

fn mirror_point(point: Point2, mirrored: bool) -> Point2 {
    if mirrored {
        Point2::new(-point.x(), point.y())
    } else {
        point
    }
}

fn parse_circle(record: &Record) -> Result<EntityKind, DxfError> {
    let center = mirror_point(record.point(10, "CIRCLE 圆心")?, record.is_mirrored());
    let radius = record.require(40, "CIRCLE 半径")?;
    if radius <= 0.0 {
        return Err(DxfError::invalid("CIRCLE 半径必须为正"));
    }
    Ok(EntityKind::Circle { center, radius })
}

fn parse_arc(record: &Record) -> Result<EntityKind, DxfError> {
    let mirrored = record.is_mirrored();
    let center = mirror_point(record.point(10, "ARC 圆心")?, mirrored);
    let radius = record.require(40, "ARC 半径")?;
    if radius <= 0.0 {
        return Err(DxfError::invalid("ARC 半径必须为正"));
    }
    let start = record.require(50, "ARC 起始角")?.to_radians();
    let end = record.require(51, "ARC 终止角")?.to_radians();
    let (start_angle, end_angle) = if mirrored {
        (PI - end, PI - start)
    } else {
        (start, end)
    };
    Ok(EntityKind::Arc {
        center,
        radius,
        start_angle,
        end_angle,
    })
}

fn parse_ellipse(record: &Record) -> Result<EntityKind, DxfError> {
    let center = record.point(10, "ELLIPSE 中心")?;
    let major = record.point(11, "ELLIPSE 长轴端点")?;
    let ratio = record.require(40, "ELLIPSE 短长轴比")?;
    if ratio <= 0.0 {
        return Err(DxfError::invalid("ELLIPSE 短长轴比必须为正"));
    }
    let start = record.real(41, "ELLIPSE 起始参数")?.unwrap_or(0.0);
    let end = record.real(42, "ELLIPSE 终止参数")?.unwrap_or(TAU);
    // 负法向时参数方向取反：t → -t。
    let (start_parameter, end_parameter) = if record.is_mirrored() {
        (-end, -start)
    } else {
        (start, end)
    };
    Ok(EntityKind::Ellipse {
        center,
        major_axis: Vector2::new(major.x(), major.y()),
        ratio,
        start_parameter,
        end_parameter,
    })
}

fn parse_lwpolyline(record: &Record) -> Result<EntityKind, DxfError> {
    let mirrored = record.is_mirrored();
    let mut vertices: Vec<PolylineVertex> = Vec::new();
    let mut pending_x: Option<f64> = None;
    for (code, value) in &record.pairs {
        match code {
            10 => {
                if pending_x.replace(parse_f64(value, "LWPOLYLINE 顶点 X")?).is_some() {
                    return Err(DxfError::invalid("LWPOLYLINE 顶点缺少对应的 Y（组码 20）"));
                }
            }
            20 => {
                let y = parse_f64(value, "LWPOLYLINE 顶点 Y")?;
                let x = pending_x
                    .take()
                    .ok_or_else(|| DxfError::invalid("LWPOLYLINE 顶点缺少对应的 X（组码 10）"))?;
                vertices.push(PolylineVertex::new(mirror_point(Point2::new(x, y), mirrored)));
            }
            42 => {
                let bulge = parse_f64(value, "LWPOLYLINE 顶点 bulge")?;
                let vertex = vertices.last_mut().ok_or_else(|| {
                    DxfError::invalid("LWPOLYLINE 在定义首个顶点前遇到 bulge（组码 42）")
                })?;
                vertex.bulge = if mirrored { -bulge } else { bulge };
            }
            _ => {}
        }
    }
    if vertices.len() < 2 {
        return Err(DxfError::invalid("LWPOLYLINE 顶点不足"));
    }
    Ok(EntityKind::Polyline {
        vertices,
        is_closed: record.flags() & 0x01 != 0,
    })
}

fn parse_spline(record: &Record) -> Result<EntityKind, DxfError> {
    let control_points = paired_points(record, 10, "SPLINE 控制点")?;
    let fit_points = paired_points(record, 11, "SPLINE 拟合点")?;
    if control_points.len() < 2 && fit_points.len() < 2 {
        return Err(DxfError::invalid("SPLINE 既无控制点也无拟合点"));
    }
    Ok(EntityKind::Spline {
        control_points,
        fit_points,
    })
}

/// 按出现顺序把 `x_code`/`x_code + 10` 组合成点列。
fn paired_points(record: &Record, x_code: i32, context: &str) -> Result<Vec<Point2>, DxfError> {
    let mut points = Vec::new();
    let mut pending_x: Option<f64> = None;
    for (code, value) in &record.pairs {
        if *code == x_code {
            pending_x = Some(parse_f64(value, context)?);
        } else if *code == x_code + 10 {
            if let Some(x) = pending_x.take() {
                points.push(Point2::new(x, parse_f64(value, context)?));
            }
        }
    }
    Ok(points)
}

fn parse_face(record: &Record, order: [i32; 4]) -> Result<EntityKind, DxfError> {
    let mut corners = Vec::with_capacity(4);
    for slot in order {
        let x = record.real(10 + slot, "面角点 X")?;
        let y = record.real(20 + slot, "面角点 Y")?;
        if let (Some(x), Some(y)) = (x, y) {
            corners.push(Point2::new(x, y));
        }
    }
    // 三角面通常把第四点写成与第三点重合。
    corners.dedup();
    if corners.len() < 3 {
        return Err(DxfError::invalid(format!("{} 角点不足", record.kind)));
    }
    Ok(EntityKind::Face3D { vertices: corners })
}

fn parse_insert(record: &Record) -> Result<EntityKind, DxfError> {
    let block = record
        .value(2)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| DxfError::invalid("INSERT 缺少块名（组码 2）"))?
        .to_string();
    let insert = record.point(10, "INSERT 插入点")?;
    let sx = record.real(41, "INSERT 缩放 X")?.unwrap_or(1.0);
    let sy = record.real(42, "INSERT 缩放 Y")?.unwrap_or(1.0);
    let rotation = record.real(50, "INSERT 旋转角")?.unwrap_or(0.0).to_radians();

    if record.is_mirrored() {
        return Ok(EntityKind::Insert {
            block,
            insert: mirror_point(insert, true),
            scale: Vector2::new(-sx, sy),
            rotation: -rotation,
        });
    }
    Ok(EntityKind::Insert {
        block,
        insert,
        scale: Vector2::new(sx, sy),
        rotation,
    })
}

/// POLYLINE 头加 VERTEX 序列：多面网格、多边形网格或普通二维/三维多段线。
fn polyline_entities(header: &Record, vertices: &[Record]) -> Result<Vec<VectorEntity>, DxfError> {
    let flags = header.flags();
    let layer = header.layer();
    let color = header.color();
    let wrap = |kind: EntityKind| VectorEntity::new(kind, layer.clone()).with_color(color);

    if flags & 0x40 != 0 {
        return polyface_faces(vertices).map(|faces| faces.into_iter().map(wrap).collect());
    }
    if flags & 0x10 != 0 {
        let rows = header.int(71).unwrap_or(0).max(0) as usize;
        let cols = header.int(72).unwrap_or(0).max(0) as usize;
        return mesh_lines(vertices, rows, cols, flags)
            .map(|lines| lines.into_iter().map(wrap).collect());
    }

    let mirrored = header.is_mirrored();
    let mut points = Vec::with_capacity(vertices.len());
    for vertex in vertices {
        // 样条框架控制点不属于显示几何。
        if vertex.flags() & 0x10 != 0 {
            continue;
        }
        let position = mirror_point(vertex.point(10, "VERTEX 位置")?, mirrored);
        let bulge = vertex.real(42, "VERTEX bulge")?.unwrap_or(0.0);
        let bulge = if mirrored { -bulge } else { bulge };
        points.push(PolylineVertex::with_bulge(position, bulge));
    }
    if points.len() < 2 {
        return Err(DxfError::invalid("POLYLINE 顶点不足"));
    }
    Ok(vec![wrap(EntityKind::Polyline {
        vertices: points,
        is_closed: flags & 0x01 != 0,
    })])
}

fn polyface_faces(vertices: &[Record]) -> Result<Vec<EntityKind>, DxfError> {
    let mut coordinates: Vec<Point2> = Vec::new();
    let mut faces = Vec::new();
    for vertex in vertices {
        let flags = vertex.flags();
        if flags & 0x80 != 0 && flags & 0x40 != 0 {
            coordinates.push(vertex.point(10, "POLYFACE 顶点")?);
        } else if flags & 0x80 != 0 {
            let corners: Vec<Point2> = (71..=74)
                .filter_map(|code| vertex.int(code))
                .filter(|index| *index != 0)
                .filter_map(|index| coordinates.get(index.unsigned_abs() as usize - 1).copied())
                .collect();
            if corners.len() >= 3 {
                faces.push(EntityKind::Face3D { vertices: corners });
            }
        }
    }
    if faces.is_empty() {
        return Err(DxfError::invalid("POLYFACE 未解析到任何面"));
    }
    Ok(faces)
}

/// 多边形网格以行、列折线表示。
fn mesh_lines(
    vertices: &[Record],
    rows: usize,
    cols: usize,
    flags: i32,
) -> Result<Vec<EntityKind>, DxfError> {
    let expected = rows
        .checked_mul(cols)
        .filter(|count| *count >= 4 && rows >= 2 && cols >= 2)
        .ok_or_else(|| DxfError::invalid("POLYLINE 网格至少需要 2x2 个顶点"))?;
    let grid: Vec<Point2> = vertices
        .iter()
        .filter(|vertex| vertex.flags() & 0x80 == 0)
        .map(|vertex| vertex.point(10, "网格顶点"))
        .collect::<Result<_, _>>()?;
    if grid.len() < expected {
        return Err(DxfError::invalid(format!(
            "POLYLINE 网格顶点不足：期望 {expected} 个，实际为 {}",
            grid.len()
        )));
    }

    let polyline = |points: Vec<Point2>, is_closed: bool| EntityKind::Polyline {
        vertices: points.into_iter().map(PolylineVertex::new).collect(),
        is_closed,
    };
    let closed_m = flags & 0x01 != 0;
    let closed_n = flags & 0x20 != 0;
    let mut lines = Vec::with_capacity(rows + cols);
    for row in 0..rows {
        lines.push(polyline(grid[row * cols..(row + 1) * cols].to_vec(), closed_n));
    }
    for col in 0..cols {
        lines.push(polyline(
            (0..rows).map(|row| grid[row * cols + col]).collect(),
            closed_m,
        ));
    }
    Ok(lines)
}

struct DxfReader<'a> {
    lines: std::str::Lines<'a>,
    buffer: Option<(i32, String)>,
    line_number: usize,
}

impl<'a> DxfReader<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            lines: source.lines(),
            buffer: None,
            line_number: 0,
        }
    }

    fn next_pair(&mut self) -> Result<Option<(i32, String)>, DxfError> {
        if let Some(pair) = self.buffer.take() {
            return Ok(Some(pair));
        }

        let code_line = loop {
            match self.lines.next() {
                Some(line) => {
                    self.line_number += 1;
                    // 文件末尾常见多余空行。
                    if !line.trim().is_empty() {
                        break line;
                    }
                }
                None => return Ok(None),
            }
        };

        let value_line = match self.lines.next() {
            Some(line) => {
                self.line_number += 1;
                line
            }
            None => {
                return Err(DxfError::invalid(format!(
                    "文件在第 {} 行结束，缺少与组码对应的值行",
                    self.line_number
                )));
            }
        };

        let code = code_line.trim().parse::<i32>().map_err(|_| {
            DxfError::invalid(format!(
                "第 {} 行的组码 \"{}\" 无法解析为整数",
                self.line_number - 1,
                code_line.trim()
            ))
        })?;
        Ok(Some((code, value_line.to_string())))
    }

    fn put_back(&mut self, pair: (i32, String)) {
        debug_assert!(self.buffer.is_none(), "DXF 组码对只能回退一次");
        self.buffer = Some(pair);
    }
}

fn parse_f64(raw: &str, context: &str) -> Result<f64, DxfError> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| DxfError::invalid(format!("{context} 解析失败（值：\"{raw}\"）")))
}

fn parse_i32(raw: &str, context: &str) -> Result<i32, DxfError> {
    raw.trim()
        .parse::<i32>()
        .map_err(|_| DxfError::invalid(format!("{context} 解析失败（值：\"{raw}\"）")))
}
