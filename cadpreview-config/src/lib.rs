use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub const CONFIG_ENV: &str = "CADPREVIEW_CONFIG";

/// 应用配置的根结构。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub converter: ConverterConfig,
    #[serde(default)]
    pub rasterizer: RasterizerConfig,
    #[serde(default)]
    pub render: RenderConfig,
}

impl AppConfig {
    /// 从显式路径加载配置。
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// 自动发现配置文件：优先读取环境变量 `CADPREVIEW_CONFIG`，否则寻找 `./config/default.toml`。
    /// 若文件缺失，则返回默认配置。
    pub fn discover() -> Result<Self, ConfigError> {
        if let Some(path) = env::var_os(CONFIG_ENV) {
            return Self::from_file(PathBuf::from(path));
        }

        let default_path = env::current_dir()
            .map(|dir| dir.join("config").join("default.toml"))
            .map_err(|source| ConfigError::Context {
                message: "获取当前工作目录失败".to_string(),
                source,
            })?;

        if default_path.exists() {
            Self::from_file(default_path)
        } else {
            Ok(Self::default())
        }
    }
}

/// 日志配置，支持设置默认等级。
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

/// 预览图输出目录与缩略图尺寸上限（宽, 高）。
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "StorageConfig::default_thumbnail_dir")]
    pub thumbnail_dir: PathBuf,
    #[serde(default = "StorageConfig::default_thumbnail_max_size")]
    pub thumbnail_max_size: (u32, u32),
}

impl StorageConfig {
    fn default_thumbnail_dir() -> PathBuf {
        PathBuf::from("storage").join("thumbnails")
    }

    fn default_thumbnail_max_size() -> (u32, u32) {
        (400, 300)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            thumbnail_dir: Self::default_thumbnail_dir(),
            thumbnail_max_size: Self::default_thumbnail_max_size(),
        }
    }
}

/// DWG → DXF 转换工具设置。
#[derive(Debug, Clone, Deserialize)]
pub struct ConverterConfig {
    #[serde(default)]
    pub executable: Option<PathBuf>,
    /// 额外的厂商根目录，会在其下查找 `ODA/<版本>/ODAFileConverter`。
    #[serde(default)]
    pub search_roots: Vec<PathBuf>,
    #[serde(default = "ConverterConfig::default_cad_version")]
    pub cad_version: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "ConverterConfig::default_enabled")]
    pub enabled: bool,
}

impl ConverterConfig {
    fn default_cad_version() -> String {
        "ACAD2018".to_string()
    }

    fn default_enabled() -> bool {
        true
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            executable: None,
            search_roots: Vec::new(),
            cad_version: Self::default_cad_version(),
            timeout_secs: default_timeout_secs(),
            enabled: true,
        }
    }
}

/// PDF 首页渲染工具设置；未指定时在 `PATH` 中查找 `pdftoppm`。
#[derive(Debug, Clone, Deserialize)]
pub struct RasterizerConfig {
    #[serde(default)]
    pub executable: Option<PathBuf>,
    #[serde(default = "default_dpi")]
    pub dpi: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl RasterizerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for RasterizerConfig {
    fn default() -> Self {
        Self {
            executable: None,
            dpi: default_dpi(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenderConfig {
    #[serde(default = "default_dpi")]
    pub vector_dpi: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            vector_dpi: default_dpi(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_dpi() -> u32 {
    200
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("读取配置文件 {path:?} 失败: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("解析配置文件 {path:?} 失败: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{message}")]
    Context {
        message: String,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_returned_when_file_missing() {
        let cfg = AppConfig::discover().expect("discover should succeed");
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.storage.thumbnail_dir, PathBuf::from("storage/thumbnails"));
        assert_eq!(cfg.storage.thumbnail_max_size, (400, 300));
        assert!(cfg.converter.executable.is_none());
        assert!(cfg.converter.enabled);
        assert_eq!(cfg.converter.cad_version, "ACAD2018");
        assert_eq!(cfg.converter.timeout(), Duration::from_secs(30));
        assert_eq!(cfg.rasterizer.dpi, 200);
        assert_eq!(cfg.render.vector_dpi, 200);
    }

    #[test]
    fn load_from_temp_file() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        writeln!(
            file,
            r#"
            [logging]
            level = "debug"

            [storage]
            thumbnail_dir = "/srv/previews"
            thumbnail_max_size = [200, 150]

            [converter]
            executable = "/opt/oda/ODAFileConverter"
            search_roots = ["/opt/vendor"]
            timeout_secs = 5
            enabled = false

            [rasterizer]
            dpi = 96
            "#
        )
        .unwrap();

        let cfg = AppConfig::from_file(file.path()).expect("load config");
        assert_eq!(cfg.logging.level, "debug");
        assert_eq!(cfg.storage.thumbnail_dir, PathBuf::from("/srv/previews"));
        assert_eq!(cfg.storage.thumbnail_max_size, (200, 150));
        assert_eq!(
            cfg.converter.executable.as_deref(),
            Some(Path::new("/opt/oda/ODAFileConverter"))
        );
        assert_eq!(cfg.converter.search_roots.len(), 1);
        assert_eq!(cfg.converter.timeout(), Duration::from_secs(5));
        assert!(!cfg.converter.enabled);
        assert_eq!(cfg.converter.cad_version, "ACAD2018");
        assert_eq!(cfg.rasterizer.dpi, 96);
        assert_eq!(cfg.rasterizer.timeout_secs, 30);
        assert_eq!(cfg.render.vector_dpi, 200);
    }

    #[test]
    fn malformed_file_reports_parse_error() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        writeln!(file, "[storage]\nthumbnail_max_size = \"big\"").unwrap();
        let err = AppConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
