//! 按格式依次尝试各策略，第一个成功的结果归一化后写入存储。

use std::path::Path;
use std::time::Duration;

use cadpreview_config::AppConfig;
use cadpreview_core::FailureReason;
use cadpreview_core::drawing::VectorDocument;
use cadpreview_io::convert::{DEFAULT_CAD_VERSION, DEFAULT_TIMEOUT};
use cadpreview_io::{ConversionBridge, ToolLocator, dwg, dxf, iges};
use tracing::{debug, info, warn};

use crate::dispatch::{SourceFormat, Strategy};
use crate::document::{DocumentRasterizer, PopplerRasterizer};
use crate::errors::{ExtractionFailure, PreviewError};
use crate::preview::PreviewImage;
use crate::store::{StoredPreview, ThumbnailStore};
use crate::vector::{RasterVectorRenderer, VectorRenderer};
use crate::wireframe::{WireframeStyle, render_wireframe};

pub const DEFAULT_DPI: u32 = 200;

/// DWG → DXF 转换的设置；`locator` 为空表示禁用转换。
#[derive(Debug, Clone)]
pub struct ConverterSettings {
    pub locator: Option<ToolLocator>,
    pub cad_version: String,
    pub timeout: Duration,
}

impl Default for ConverterSettings {
    fn default() -> Self {
        Self {
            locator: Some(ToolLocator::oda_converter()),
            cad_version: DEFAULT_CAD_VERSION.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// 预览生成编排器。构造后不再修改，可重复用于多个文件。
pub struct PreviewPipeline {
    converter: ConverterSettings,
    vector: Box<dyn VectorRenderer>,
    rasterizer: Box<dyn DocumentRasterizer>,
    wireframe: WireframeStyle,
    vector_dpi: u32,
    document_dpi: u32,
}

impl Default for PreviewPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl PreviewPipeline {
    pub fn new() -> Self {
        Self {
            converter: ConverterSettings::default(),
            vector: Box::new(RasterVectorRenderer::new()),
            rasterizer: Box::new(PopplerRasterizer::default()),
            wireframe: WireframeStyle::default(),
            vector_dpi: DEFAULT_DPI,
            document_dpi: DEFAULT_DPI,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let converter = &config.converter;
        let locator = converter.enabled.then(|| {
            ToolLocator::oda_converter()
                .with_executable(converter.executable.clone())
                .with_vendor_roots(converter.search_roots.iter().cloned())
        });
        let rasterizer = &config.rasterizer;
        let poppler = ToolLocator::poppler().with_executable(rasterizer.executable.clone());

        Self::new()
            .with_converter(ConverterSettings {
                locator,
                cad_version: converter.cad_version.clone(),
                timeout: converter.timeout(),
            })
            .with_rasterizer(PopplerRasterizer::new(poppler).with_timeout(rasterizer.timeout()))
            .with_vector_dpi(config.render.vector_dpi)
            .with_document_dpi(rasterizer.dpi)
    }

    pub fn with_converter(mut self, converter: ConverterSettings) -> Self {
        self.converter = converter;
        self
    }

    pub fn with_vector_renderer(mut self, renderer: impl VectorRenderer + 'static) -> Self {
        self.vector = Box::new(renderer);
        self
    }

    pub fn with_rasterizer(mut self, rasterizer: impl DocumentRasterizer + 'static) -> Self {
        self.rasterizer = Box::new(rasterizer);
        self
    }

    pub fn with_wireframe_style(mut self, style: WireframeStyle) -> Self {
        self.wireframe = style;
        self
    }

    pub fn with_vector_dpi(mut self, dpi: u32) -> Self {
        self.vector_dpi = dpi.max(1);
        self
    }

    pub fn with_document_dpi(mut self, dpi: u32) -> Self {
        self.document_dpi = dpi.max(1);
        self
    }

    /// 当前配置下能否找到 DWG 转换工具。
    pub fn converter_available(&self) -> bool {
        self.converter
            .locator
            .as_ref()
            .and_then(ToolLocator::locate)
            .is_some()
    }

    /// 依次尝试该格式的全部策略；全部失败时返回每次尝试的原因。
    pub fn extract(&self, path: &Path) -> Result<PreviewImage, ExtractionFailure> {
        let format = SourceFormat::from_path(path);
        let mut failure = ExtractionFailure::new(path, format);
        for &strategy in format.strategies() {
            match self.run_strategy(strategy, path) {
                Ok(image) => {
                    debug!(
                        path = %path.display(),
                        %strategy,
                        width = image.width(),
                        height = image.height(),
                        "预览提取成功"
                    );
                    return Ok(image);
                }
                Err(reason) => {
                    debug!(path = %path.display(), %strategy, %reason, "预览策略失败");
                    failure.record(strategy, reason);
                    if reason == FailureReason::MissingInput {
                        break;
                    }
                }
            }
        }
        Err(failure)
    }

    /// 提取并写入 `<id>.png` 与 `<id>_full.png`。
    pub fn generate(
        &self,
        path: &Path,
        id: &str,
        store: &ThumbnailStore,
    ) -> Result<StoredPreview, PreviewError> {
        ThumbnailStore::validate_id(id)?;
        if !path.is_file() {
            return Err(PreviewError::MissingInput(path.to_path_buf()));
        }
        let image = self.extract(path).map_err(|failure| {
            warn!(path = %path.display(), attempts = %failure.summary(), "无法生成预览");
            PreviewError::from(failure)
        })?;
        let stored = store.save(id, &image)?;
        info!(
            path = %path.display(),
            id,
            thumbnail = %stored.thumbnail.display(),
            "预览已生成"
        );
        Ok(stored)
    }

    fn run_strategy(&self, strategy: Strategy, path: &Path) -> Result<PreviewImage, FailureReason> {
        match strategy {
            Strategy::ConvertedVector => self.converted_vector(path),
            Strategy::VectorRender => {
                let document = dxf::read_document(path)?;
                self.render_vector(&document)
            }
            Strategy::EmbeddedPreview => {
                let preview = dwg::read_embedded_preview(path)?;
                debug!(format = preview.format_name(), bytes = preview.bytes().len(), "找到内嵌预览");
                PreviewImage::decode(preview.bytes())
            }
            Strategy::DocumentRaster => self
                .rasterizer
                .rasterize(path, self.document_dpi)
                .map(PreviewImage::from_rgb),
            Strategy::Wireframe => {
                let model = iges::read_wireframe(path)?;
                render_wireframe(&model, &self.wireframe).map(PreviewImage::from_rgb)
            }
            Strategy::DirectDecode => PreviewImage::open(path),
        }
    }

    fn converted_vector(&self, path: &Path) -> Result<PreviewImage, FailureReason> {
        if !path.is_file() {
            return Err(FailureReason::MissingInput);
        }
        let locator = self
            .converter
            .locator
            .as_ref()
            .ok_or(FailureReason::ToolUnavailable)?;
        let bridge = ConversionBridge::locate(locator)?
            .with_cad_version(self.converter.cad_version.clone())
            .with_timeout(self.converter.timeout);
        debug!(tool = %bridge.tool().display(), path = %path.display(), "尝试转换后矢量渲染");
        // `converted` 持有临时目录，渲染结束后随之删除。
        let converted = bridge.convert(path)?;
        let document = dxf::read_document(converted.path())?;
        self.render_vector(&document)
    }

    fn render_vector(&self, document: &VectorDocument) -> Result<PreviewImage, FailureReason> {
        if document.entity_count() == 0 {
            return Err(FailureReason::NoEntities);
        }
        self.vector
            .render(document, self.vector_dpi)
            .map(PreviewImage::from_rgb)
    }
}
