pub mod dispatch;
pub mod document;
pub mod pipeline;
pub mod preview;
pub mod raster;
pub mod store;
pub mod vector;
pub mod wireframe;

pub mod errors {
    use std::path::{Path, PathBuf};

    use cadpreview_core::FailureReason;
    use thiserror::Error;

    use crate::dispatch::{SourceFormat, Strategy};

    /// 某个文件的全部策略都失败，按尝试顺序记录每一次的原因。
    #[derive(Debug, Clone, PartialEq, Eq, Error)]
    #[error("无法为 {} 生成预览（{format}，尝试 {} 次）", .path.display(), .attempts.len())]
    pub struct ExtractionFailure {
        pub path: PathBuf,
        pub format: SourceFormat,
        pub attempts: Vec<(Strategy, FailureReason)>,
    }

    impl ExtractionFailure {
        pub fn new(path: &Path, format: SourceFormat) -> Self {
            Self {
                path: path.to_path_buf(),
                format,
                attempts: Vec::new(),
            }
        }

        pub fn record(&mut self, strategy: Strategy, reason: FailureReason) {
            self.attempts.push((strategy, reason));
        }

        /// `策略: 原因` 以分号连接，用于日志。
        pub fn summary(&self) -> String {
            self.attempts
                .iter()
                .map(|(strategy, reason)| format!("{strategy}: {reason}"))
                .collect::<Vec<_>>()
                .join("; ")
        }
    }

    #[derive(Debug, Error)]
    pub enum PreviewError {
        #[error("输入文件不存在: {}", .0.display())]
        MissingInput(PathBuf),
        #[error("非法的图纸 id: {0:?}")]
        InvalidDrawingId(String),
        #[error(transparent)]
        Exhausted(#[from] ExtractionFailure),
        #[error("无法写入预览图 {}", .path.display())]
        Persist {
            path: PathBuf,
            #[source]
            source: image::ImageError,
        },
        #[error("无法访问 {}", .path.display())]
        Io {
            path: PathBuf,
            #[source]
            source: std::io::Error,
        },
    }
}

pub use dispatch::{SourceFormat, Strategy};
pub use document::{DocumentRasterizer, PopplerRasterizer};
pub use errors::{ExtractionFailure, PreviewError};
pub use pipeline::{ConverterSettings, PreviewPipeline};
pub use preview::PreviewImage;
pub use store::{StoredPreview, ThumbnailStore};
pub use vector::{RasterVectorRenderer, VectorRenderer};
pub use wireframe::{WireframeStyle, render_wireframe};
