use std::fmt;
use std::path::Path;

/// 按扩展名（不区分大小写）识别的源文件格式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceFormat {
    Pdf,
    Dwg,
    Dxf,
    Iges,
    Raster,
}

impl SourceFormat {
    pub fn from_path(path: &Path) -> Self {
        let extension = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "pdf" => SourceFormat::Pdf,
            "dwg" => SourceFormat::Dwg,
            "dxf" => SourceFormat::Dxf,
            "igs" | "iges" => SourceFormat::Iges,
            _ => SourceFormat::Raster,
        }
    }

    /// 依次尝试的策略；前一个失败才尝试下一个。
    pub fn strategies(self) -> &'static [Strategy] {
        match self {
            SourceFormat::Dwg => &[
                Strategy::ConvertedVector,
                Strategy::EmbeddedPreview,
                Strategy::DocumentRaster,
            ],
            SourceFormat::Dxf => &[Strategy::VectorRender, Strategy::DocumentRaster],
            SourceFormat::Pdf => &[Strategy::DocumentRaster],
            SourceFormat::Iges => &[Strategy::Wireframe],
            SourceFormat::Raster => &[Strategy::DirectDecode],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SourceFormat::Pdf => "pdf",
            SourceFormat::Dwg => "dwg",
            SourceFormat::Dxf => "dxf",
            SourceFormat::Iges => "iges",
            SourceFormat::Raster => "raster",
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 单个预览提取策略。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// 外部工具转为 DXF 后按矢量渲染。
    ConvertedVector,
    VectorRender,
    /// DWG 文件头中内嵌的 PNG/BMP 预览。
    EmbeddedPreview,
    DocumentRaster,
    Wireframe,
    DirectDecode,
}

impl Strategy {
    pub fn name(self) -> &'static str {
        match self {
            Strategy::ConvertedVector => "converted-vector",
            Strategy::VectorRender => "vector-render",
            Strategy::EmbeddedPreview => "embedded-preview",
            Strategy::DocumentRaster => "document-raster",
            Strategy::Wireframe => "wireframe",
            Strategy::DirectDecode => "direct-decode",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_is_case_insensitive() {
        assert_eq!(SourceFormat::from_path(Path::new("a/B.DWG")), SourceFormat::Dwg);
        assert_eq!(SourceFormat::from_path(Path::new("part.IgS")), SourceFormat::Iges);
        assert_eq!(SourceFormat::from_path(Path::new("part.iges")), SourceFormat::Iges);
        assert_eq!(SourceFormat::from_path(Path::new("sheet.Pdf")), SourceFormat::Pdf);
        assert_eq!(SourceFormat::from_path(Path::new("plan.dxf")), SourceFormat::Dxf);
        assert_eq!(SourceFormat::from_path(Path::new("photo.jpeg")), SourceFormat::Raster);
        assert_eq!(SourceFormat::from_path(Path::new("no_extension")), SourceFormat::Raster);
    }

    #[test]
    fn dwg_tries_three_strategies_in_order() {
        assert_eq!(
            SourceFormat::Dwg.strategies(),
            &[
                Strategy::ConvertedVector,
                Strategy::EmbeddedPreview,
                Strategy::DocumentRaster
            ]
        );
        assert_eq!(SourceFormat::Iges.strategies(), &[Strategy::Wireframe]);
    }
}
