use std::fs;
use std::path::PathBuf;

use cadpreview_core::FailureReason;
use cadpreview_core::geometry::Point3;
use cadpreview_core::wireframe::GeometryEntity;
use cadpreview_io::iges::{self, IgesFile};

/// 组装一个只含一个实体的 IGES 文本：参数按 64 列折行。
fn single_entity_iges(entity_type: i32, parameters: &str) -> String {
    let mut data_lines: Vec<String> = Vec::new();
    let mut current = String::new();
    for token in parameters.split_inclusive(|c: char| c == ',' || c == ';') {
        if current.len() + token.len() > 64 {
            data_lines.push(std::mem::take(&mut current));
        }
        current.push_str(token);
    }
    if !current.is_empty() {
        data_lines.push(current);
    }

    let mut text = String::new();
    text.push_str(&format!("{:<72}S{:>7}\n", "cadpreview test", 1));
    text.push_str(&format!("{:<72}G{:>7}\n", "1H,,1H;;", 1));
    text.push_str(&format!(
        "{:>8}{:>8}{:>8}{:>8}{:>8}{:>8}{:>8}{:>8}{:>8}D{:>7}\n",
        entity_type, 1, 0, 1, 0, 0, 0, 0, "00000000", 1
    ));
    text.push_str(&format!(
        "{:>8}{:>8}{:>8}{:>8}{:>8}{:>8}{:>8}{:>8}{:>8}D{:>7}\n",
        entity_type,
        0,
        0,
        data_lines.len(),
        0,
        "",
        "",
        "",
        0,
        2
    ));
    for (index, line) in data_lines.iter().enumerate() {
        text.push_str(&format!("{:<64}{:>8}P{:>7}\n", line, 1, index + 1));
    }
    text.push_str(&format!(
        "{:<72}T{:>7}\n",
        format!("S{:>7}G{:>7}D{:>7}P{:>7}", 1, 1, 2, data_lines.len()),
        1
    ));
    text
}

fn write_fixture(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).expect("写入 IGES 夹具");
    path
}

fn only_entity(text: &str) -> GeometryEntity {
    let mut entities = IgesFile::parse(text.as_bytes()).entities();
    assert_eq!(entities.len(), 1, "应当恰好解析出一个实体");
    entities.remove(0)
}

fn assert_point(actual: Point3, x: f64, y: f64, z: f64) {
    assert!((actual.x() - x).abs() < 1e-9, "x: {actual:?}");
    assert!((actual.y() - y).abs() < 1e-9, "y: {actual:?}");
    assert!((actual.z() - z).abs() < 1e-9, "z: {actual:?}");
}

#[test]
fn line_entity_keeps_endpoints() {
    let text = single_entity_iges(110, "110,1.0,2.0,3.0,4.0,5.0,6.0;");
    match only_entity(&text) {
        GeometryEntity::Line { p1, p2 } => {
            assert_point(p1, 1.0, 2.0, 3.0);
            assert_point(p2, 4.0, 5.0, 6.0);
        }
        other => panic!("期望直线，得到 {other:?}"),
    }
}

#[test]
fn arc_entity_tessellates_on_plane() {
    let text = single_entity_iges(100, "100,2.5,0.0,0.0,1.0,0.0,0.0,1.0;");
    let entity = only_entity(&text);
    let segments = entity.segments();
    assert_eq!(segments.len(), 16);
    for segment in segments {
        assert!((segment.start.z() - 2.5).abs() < 1e-12);
        let radius = (segment.end.x().powi(2) + segment.end.y().powi(2)).sqrt();
        assert!((radius - 1.0).abs() < 1e-9);
    }
}

#[test]
fn point_entity_is_isolated() {
    let text = single_entity_iges(116, "116,7.0,8.0,9.0,0;");
    match only_entity(&text) {
        GeometryEntity::Point { xyz } => assert_point(xyz, 7.0, 8.0, 9.0),
        other => panic!("期望点，得到 {other:?}"),
    }
}

#[test]
fn bspline_curve_entity_uses_control_polygon() {
    // K=3, M=3 → 4 个控制点、8 个节点。
    let text = single_entity_iges(
        126,
        "126,3,3,0,0,0.0,0.0,0.0,0.0,1.0,1.0,1.0,1.0,1.0,1.0,1.0,1.0,\
         0.0,0.0,0.0,1.0,1.0,0.0,2.0,1.0,0.0,3.0,0.0,0.0,0.0,1.0,0.0,0.0,1.0;",
    );
    match only_entity(&text) {
        GeometryEntity::Curve { control_points } => {
            assert_eq!(control_points.len(), 4);
            assert_point(control_points[0], 0.0, 0.0, 0.0);
            assert_point(control_points[1], 1.0, 1.0, 0.0);
            assert_point(control_points[3], 3.0, 0.0, 0.0);
        }
        other => panic!("期望样条曲线，得到 {other:?}"),
    }
}

#[test]
fn bspline_surface_entity_yields_boundary_edges() {
    // K1=K2=1, M1=M2=1 → 2×2 网格，各 4 个节点，4 个权重。
    let text = single_entity_iges(
        128,
        "128,1,1,1,1,0,0,1,0,0,0.0,0.0,1.0,1.0,0.0,0.0,1.0,1.0,1.0,1.0,1.0,1.0,\
         0.0,0.0,0.0,1.0,0.0,0.0,0.0,1.0,0.5,1.0,1.0,0.5,0.0,1.0,0.0,1.0;",
    );
    match only_entity(&text) {
        GeometryEntity::SurfaceEdges {
            boundary_rows,
            boundary_cols,
            sparse_interior,
        } => {
            assert_eq!(boundary_rows.len(), 2);
            assert_eq!(boundary_cols.len(), 2);
            assert!(sparse_interior.is_empty());
            assert_point(boundary_rows[1][1], 1.0, 1.0, 0.5);
            assert_point(boundary_cols[0][1], 0.0, 1.0, 0.5);
        }
        other => panic!("期望曲面边线，得到 {other:?}"),
    }
}

#[test]
fn wireframe_of_single_point_is_not_empty() {
    let dir = tempfile::tempdir().expect("临时目录");
    let path = write_fixture(&dir, "point.igs", &single_entity_iges(116, "116,1.0,1.0,1.0;"));
    let model = iges::read_wireframe(&path).expect("单点线框");
    assert_eq!(model.points.len(), 1);
    assert!(model.segments.is_empty());
}

#[test]
fn unsupported_only_file_has_no_entities() {
    let dir = tempfile::tempdir().expect("临时目录");
    let path = write_fixture(&dir, "text.igs", &single_entity_iges(212, "212,1,4,1.0,1.0;"));
    assert!(iges::read_entities(&path).expect("读取成功").is_empty());
    assert_eq!(
        iges::read_wireframe(&path).unwrap_err(),
        FailureReason::NoEntities
    );
}

#[test]
fn missing_file_is_reported() {
    let dir = tempfile::tempdir().expect("临时目录");
    assert_eq!(
        iges::read_wireframe(&dir.path().join("absent.iges")).unwrap_err(),
        FailureReason::MissingInput
    );
}

#[test]
fn crlf_line_endings_are_accepted() {
    let text = single_entity_iges(110, "110,0.0,0.0,0.0,1.0,0.0,0.0;").replace('\n', "\r\n");
    assert_eq!(IgesFile::parse(text.as_bytes()).entities().len(), 1);
}
