//! 预览图持久化：每个图纸 id 对应 `<id>.png` 缩略图与 `<id>_full.png` 原尺寸图。

use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use cadpreview_config::StorageConfig;
use image::ImageFormat;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::errors::PreviewError;
use crate::preview::PreviewImage;

const FULL_SUFFIX: &str = "_full";

/// 一次写入的两份输出。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPreview {
    pub thumbnail: PathBuf,
    pub full: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ThumbnailStore {
    root: PathBuf,
    max_size: (u32, u32),
}

impl ThumbnailStore {
    pub fn new(root: impl Into<PathBuf>, max_size: (u32, u32)) -> Self {
        Self {
            root: root.into(),
            max_size,
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(config.thumbnail_dir.clone(), config.thumbnail_max_size)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// id 只能是单一文件名分量。
    pub fn validate_id(id: &str) -> Result<(), PreviewError> {
        let invalid = id.is_empty()
            || id.contains(['/', '\\', '\0'])
            || id.contains("..")
            || id.trim() != id;
        if invalid {
            return Err(PreviewError::InvalidDrawingId(id.to_string()));
        }
        Ok(())
    }

    pub fn thumbnail_path(&self, id: &str) -> Result<PathBuf, PreviewError> {
        Self::validate_id(id)?;
        Ok(self.root.join(format!("{id}.png")))
    }

    pub fn full_path(&self, id: &str) -> Result<PathBuf, PreviewError> {
        Self::validate_id(id)?;
        Ok(self.root.join(format!("{id}{FULL_SUFFIX}.png")))
    }

    /// 写入原尺寸图与缩略图，存在同名文件时覆盖。两份 PNG 先编码并写入
    /// 同目录临时文件，全部就绪后才替换到最终路径；缩略图替换失败时
    /// 删除刚写入的原尺寸图，不留下半套输出。
    pub fn save(&self, id: &str, image: &PreviewImage) -> Result<StoredPreview, PreviewError> {
        let full = self.full_path(id)?;
        let thumbnail = self.thumbnail_path(id)?;
        let full_png = encode_png(image, &full)?;
        let thumbnail_png = encode_png(&image.thumbnail(self.max_size), &thumbnail)?;

        fs::create_dir_all(&self.root).map_err(|source| PreviewError::Io {
            path: self.root.clone(),
            source,
        })?;
        let staged_full = self.stage(&full_png)?;
        let staged_thumbnail = self.stage(&thumbnail_png)?;

        persist(staged_full, &full)?;
        if let Err(err) = persist(staged_thumbnail, &thumbnail) {
            if let Err(cleanup) = fs::remove_file(&full) {
                warn!(path = %full.display(), error = %cleanup, "无法清理已写入的原尺寸图");
            }
            return Err(err);
        }
        debug!(
            id,
            full = %full.display(),
            thumbnail = %thumbnail.display(),
            "预览图已写入"
        );
        Ok(StoredPreview { thumbnail, full })
    }

    fn stage(&self, bytes: &[u8]) -> Result<NamedTempFile, PreviewError> {
        let io_error = |source| PreviewError::Io {
            path: self.root.clone(),
            source,
        };
        let mut file = NamedTempFile::new_in(&self.root).map_err(io_error)?;
        file.write_all(bytes).map_err(io_error)?;
        file.as_file().sync_all().map_err(io_error)?;
        Ok(file)
    }

    /// 读取原尺寸图；缺失时退回缩略图，两者都没有返回 `None`。
    pub fn load_full(&self, id: &str) -> Result<Option<PreviewImage>, PreviewError> {
        for path in [self.full_path(id)?, self.thumbnail_path(id)?] {
            if !path.is_file() {
                continue;
            }
            match PreviewImage::open(&path) {
                Ok(image) => return Ok(Some(image)),
                Err(reason) => warn!(path = %path.display(), %reason, "无法读取已保存的预览图"),
            }
        }
        Ok(None)
    }
}

fn encode_png(image: &PreviewImage, path: &Path) -> Result<Vec<u8>, PreviewError> {
    let mut buffer = Cursor::new(Vec::new());
    image
        .as_rgb()
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(|source| PreviewError::Persist {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(buffer.into_inner())
}

fn persist(file: NamedTempFile, path: &Path) -> Result<(), PreviewError> {
    file.persist(path)
        .map(|_| ())
        .map_err(|err| PreviewError::Io {
            path: path.to_path_buf(),
            source: err.error,
        })
}
