//! 通用文档光栅化：渲染文档首页。

use std::path::Path;
use std::time::Duration;

use cadpreview_core::FailureReason;
use cadpreview_io::{PageRasterTool, ToolLocator};
use image::RgbImage;

use crate::preview::PreviewImage;

pub trait DocumentRasterizer {
    fn rasterize(&self, path: &Path, dpi: u32) -> Result<RgbImage, FailureReason>;
}

/// 通过 poppler 的 `pdftoppm` 渲染首页；工具缺失时返回 `ToolUnavailable`。
#[derive(Debug, Clone)]
pub struct PopplerRasterizer {
    locator: ToolLocator,
    timeout: Duration,
}

impl PopplerRasterizer {
    pub fn new(locator: ToolLocator) -> Self {
        Self {
            locator,
            timeout: cadpreview_io::convert::DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for PopplerRasterizer {
    fn default() -> Self {
        Self::new(ToolLocator::poppler())
    }
}

impl DocumentRasterizer for PopplerRasterizer {
    fn rasterize(&self, path: &Path, dpi: u32) -> Result<RgbImage, FailureReason> {
        let tool = PageRasterTool::locate(&self.locator)?
            .with_dpi(dpi)
            .with_timeout(self.timeout);
        let output = tool.rasterize_first_page(path)?;
        // 解码完成后临时目录才随 `output` 一起释放。
        let image = PreviewImage::open(output.path())?;
        Ok(image.into_rgb())
    }
}
