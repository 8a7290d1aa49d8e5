//! 图纸文件的字节/列级解析与外部工具桥接。
//!
//! 所有解析入口都返回 `Result<_, FailureReason>`，不会因输入损坏而 panic；
//! 是否升级为最终错误由引擎层的编排器决定。

pub mod convert;
pub mod dwg;
pub mod dxf;
pub mod iges;
pub mod process;

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use cadpreview_core::FailureReason;
use tracing::debug;

pub use convert::{ConversionBridge, PageRasterTool, ScopedOutput, ToolLocator};
pub use dwg::{EmbeddedPreview, ImageCode, ImageDirectoryEntry};
pub use iges::{DirectoryEntry, IgesFile};

/// 读取整个源文件；文件不存在映射为 `MissingInput`。
pub fn read_source(path: &Path) -> Result<Vec<u8>, FailureReason> {
    fs::read(path).map_err(|err| {
        debug!(path = %path.display(), error = %err, "读取源文件失败");
        match err.kind() {
            ErrorKind::NotFound => FailureReason::MissingInput,
            _ => FailureReason::Io,
        }
    })
}
