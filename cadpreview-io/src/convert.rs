//! 外部转换工具的定位与调用：DWG → DXF（ODA File Converter）、PDF 首页 → PNG（pdftoppm）。
//!
//! 每次调用都在独立的临时目录中进行，返回的 [`ScopedOutput`] 持有该目录，
//! 析构时目录随之删除。

use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use cadpreview_core::FailureReason;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::process::run_with_timeout;

pub const ODA_PROGRAM: &str = "ODAFileConverter";
pub const POPPLER_PROGRAM: &str = "pdftoppm";
pub const DEFAULT_CAD_VERSION: &str = "ACAD2018";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_RASTER_DPI: u32 = 200;

const CONVERSION_PREFIX: &str = "dwg2dxf_";
const RASTER_PREFIX: &str = "pdfpage_";
const RASTER_STEM: &str = "page";

/// 按固定顺序探测外部工具：显式配置 → 已知安装路径 → 厂商目录下的版本子目录 → `PATH`。
#[derive(Debug, Clone)]
pub struct ToolLocator {
    program: String,
    executable: Option<PathBuf>,
    known_paths: Vec<PathBuf>,
    vendor_dir: Option<String>,
    vendor_roots: Vec<PathBuf>,
    search_path: Option<OsString>,
}

impl ToolLocator {
    /// 只在 `PATH` 中查找 `program`。
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            executable: None,
            known_paths: Vec::new(),
            vendor_dir: None,
            vendor_roots: Vec::new(),
            search_path: None,
        }
    }

    pub fn oda_converter() -> Self {
        let mut locator = Self::new(ODA_PROGRAM);
        locator.known_paths = vec![
            PathBuf::from(r"C:\Program Files\ODA\ODAFileConverter\ODAFileConverter.exe"),
            PathBuf::from(r"C:\Program Files (x86)\ODA\ODAFileConverter\ODAFileConverter.exe"),
            PathBuf::from("/usr/bin/ODAFileConverter"),
            PathBuf::from("/opt/ODAFileConverter/ODAFileConverter"),
        ];
        locator.vendor_dir = Some("ODA".to_string());
        locator.vendor_roots = vec![
            PathBuf::from(r"C:\Program Files"),
            PathBuf::from(r"C:\Program Files (x86)"),
            PathBuf::from("/opt"),
        ];
        locator
    }

    pub fn poppler() -> Self {
        Self::new(POPPLER_PROGRAM)
    }

    /// 不访问任何系统位置的定位器，`PATH` 视为空。
    pub fn isolated(program: impl Into<String>) -> Self {
        let mut locator = Self::new(program);
        locator.search_path = Some(OsString::new());
        locator
    }

    pub fn with_executable(mut self, executable: Option<PathBuf>) -> Self {
        self.executable = executable;
        self
    }

    pub fn with_vendor_dir(mut self, vendor_dir: impl Into<String>) -> Self {
        self.vendor_dir = Some(vendor_dir.into());
        self
    }

    /// 追加厂商根目录，置于内置根目录之前。
    pub fn with_vendor_roots(mut self, roots: impl IntoIterator<Item = PathBuf>) -> Self {
        let mut combined: Vec<PathBuf> = roots.into_iter().collect();
        combined.append(&mut self.vendor_roots);
        self.vendor_roots = combined;
        self
    }

    pub fn with_search_path(mut self, search_path: impl Into<OsString>) -> Self {
        self.search_path = Some(search_path.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn locate(&self) -> Option<PathBuf> {
        if let Some(explicit) = &self.executable {
            if is_executable(explicit) {
                return Some(explicit.clone());
            }
            if let Some(found) = self.search_path_for(explicit.as_os_str()) {
                return Some(found);
            }
            warn!(path = %explicit.display(), "配置的外部工具不存在，继续自动探测");
        }

        if let Some(found) = self.known_paths.iter().find(|path| is_executable(path)) {
            return Some(found.clone());
        }

        if let Some(found) = self.scan_vendor_roots() {
            return Some(found);
        }

        self.search_path_for(self.program.as_ref())
    }

    /// `<root>/<vendor>/<任意版本目录>/<program>[.exe]`，版本目录按名称降序。
    fn scan_vendor_roots(&self) -> Option<PathBuf> {
        let vendor = self.vendor_dir.as_deref()?;
        for root in &self.vendor_roots {
            let Ok(entries) = fs::read_dir(root.join(vendor)) else {
                continue;
            };
            let mut versions: Vec<PathBuf> = entries
                .filter_map(Result::ok)
                .map(|entry| entry.path())
                .filter(|path| path.is_dir())
                .collect();
            versions.sort();
            versions.reverse();
            for version in versions {
                if let Some(found) = executable_in(&version, &self.program) {
                    return Some(found);
                }
            }
        }
        None
    }

    fn search_path_for(&self, name: &std::ffi::OsStr) -> Option<PathBuf> {
        // 含目录分量的名字不在 PATH 中查找。
        if Path::new(name).components().count() != 1 {
            return None;
        }
        let search_path = match &self.search_path {
            Some(path) => path.clone(),
            None => env::var_os("PATH")?,
        };
        let name = name.to_string_lossy();
        env::split_paths(&search_path).find_map(|dir| executable_in(&dir, &name))
    }
}

fn executable_in(dir: &Path, program: &str) -> Option<PathBuf> {
    let plain = dir.join(program);
    if is_executable(&plain) {
        return Some(plain);
    }
    let suffixed = dir.join(format!("{program}.exe"));
    is_executable(&suffixed).then_some(suffixed)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// 外部工具的一次性输出文件及其所在的临时目录。
#[derive(Debug)]
pub struct ScopedOutput {
    path: PathBuf,
    workspace: TempDir,
}

/// DWG 转换的产物。
pub type ConvertedDxf = ScopedOutput;

impl ScopedOutput {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn workspace_dir(&self) -> &Path {
        self.workspace.path()
    }
}

fn scoped_workspace(prefix: &str) -> Result<TempDir, FailureReason> {
    tempfile::Builder::new()
        .prefix(prefix)
        .tempdir()
        .map_err(|err| {
            warn!(error = %err, "无法创建临时目录");
            FailureReason::Io
        })
}

/// 调用 ODA File Converter 将单个 DWG 转为 DXF。
#[derive(Debug, Clone)]
pub struct ConversionBridge {
    tool: PathBuf,
    cad_version: String,
    timeout: Duration,
}

impl ConversionBridge {
    pub fn new(tool: impl Into<PathBuf>) -> Self {
        Self {
            tool: tool.into(),
            cad_version: DEFAULT_CAD_VERSION.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// 找不到工具返回 `ToolUnavailable`。
    pub fn locate(locator: &ToolLocator) -> Result<Self, FailureReason> {
        locator.locate().map(Self::new).ok_or_else(|| {
            debug!(program = locator.program(), "未找到外部工具");
            FailureReason::ToolUnavailable
        })
    }

    pub fn with_cad_version(mut self, cad_version: impl Into<String>) -> Self {
        self.cad_version = cad_version.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn tool(&self) -> &Path {
        &self.tool
    }

    pub fn convert(&self, dwg: &Path) -> Result<ConvertedDxf, FailureReason> {
        if !dwg.is_file() {
            return Err(FailureReason::MissingInput);
        }
        let file_name = dwg.file_name().ok_or(FailureReason::MissingInput)?;
        let source_dir = match dwg.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let workspace = scoped_workspace(CONVERSION_PREFIX)?;
        let mut command = Command::new(&self.tool);
        command
            .arg(&source_dir)
            .arg(workspace.path())
            .arg(&self.cad_version)
            .args(["DXF", "0", "1"])
            .arg(file_name);

        info!(
            tool = %self.tool.display(),
            source = %dwg.display(),
            version = %self.cad_version,
            "调用 DWG 转换工具"
        );
        let status = run_with_timeout(&mut command, self.timeout)?;
        if !status.success() {
            warn!(tool = %self.tool.display(), %status, "DWG 转换工具返回失败");
            return Err(FailureReason::ToolFailed);
        }

        let path = find_dxf_output(workspace.path(), dwg)?;
        debug!(output = %path.display(), "DWG 转换完成");
        Ok(ScopedOutput { path, workspace })
    }
}

/// 优先 `<stem>.dxf`，否则取按文件名排序后的第一个 `*.dxf`（不区分大小写）。
fn find_dxf_output(dir: &Path, source: &Path) -> Result<PathBuf, FailureReason> {
    if let Some(stem) = source.file_stem() {
        let mut expected = stem.to_os_string();
        expected.push(".dxf");
        let candidate = dir.join(expected);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }

    let entries = fs::read_dir(dir).map_err(|_| FailureReason::NoOutput)?;
    let mut outputs: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("dxf"))
        })
        .collect();
    outputs.sort();
    outputs.into_iter().next().ok_or(FailureReason::NoOutput)
}

/// 调用 `pdftoppm` 渲染文档首页。
#[derive(Debug, Clone)]
pub struct PageRasterTool {
    tool: PathBuf,
    dpi: u32,
    timeout: Duration,
}

impl PageRasterTool {
    pub fn new(tool: impl Into<PathBuf>) -> Self {
        Self {
            tool: tool.into(),
            dpi: DEFAULT_RASTER_DPI,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn locate(locator: &ToolLocator) -> Result<Self, FailureReason> {
        locator.locate().map(Self::new).ok_or_else(|| {
            debug!(program = locator.program(), "未找到外部工具");
            FailureReason::ToolUnavailable
        })
    }

    pub fn with_dpi(mut self, dpi: u32) -> Self {
        self.dpi = dpi.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn rasterize_first_page(&self, document: &Path) -> Result<ScopedOutput, FailureReason> {
        if !document.is_file() {
            return Err(FailureReason::MissingInput);
        }
        let workspace = scoped_workspace(RASTER_PREFIX)?;
        let prefix = workspace.path().join(RASTER_STEM);

        let mut command = Command::new(&self.tool);
        command
            .args(["-f", "1", "-l", "1", "-r"])
            .arg(self.dpi.to_string())
            .args(["-png", "-singlefile"])
            .arg(document)
            .arg(&prefix);

        debug!(tool = %self.tool.display(), source = %document.display(), dpi = self.dpi, "渲染文档首页");
        let status = run_with_timeout(&mut command, self.timeout)?;
        if !status.success() {
            warn!(tool = %self.tool.display(), %status, "文档渲染工具返回失败");
            return Err(FailureReason::ToolFailed);
        }

        let path = prefix.with_extension("png");
        if !path.is_file() {
            return Err(FailureReason::NoOutput);
        }
        Ok(ScopedOutput { path, workspace })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("写入脚本");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("设置权限");
        path
    }

    fn sample_dwg(dir: &Path) -> PathBuf {
        let path = dir.join("part.dwg");
        fs::write(&path, b"AC1032").expect("写入 DWG");
        path
    }

    #[test]
    fn locator_prefers_explicit_executable() {
        let dir = tempfile::tempdir().expect("临时目录");
        let tool = write_script(dir.path(), "custom-tool", "exit 0");
        let locator = ToolLocator::isolated(ODA_PROGRAM).with_executable(Some(tool.clone()));
        assert_eq!(locator.program(), ODA_PROGRAM);
        assert_eq!(locator.locate(), Some(tool.clone()));
        let bridge = ConversionBridge::locate(&locator).expect("找到工具");
        assert_eq!(bridge.tool(), tool.as_path());
    }

    #[test]
    fn locator_finds_version_suffixed_install() {
        let root = tempfile::tempdir().expect("临时目录");
        let version_dir = root.path().join("ODA").join("ODAFileConverter 25.12");
        fs::create_dir_all(&version_dir).expect("创建版本目录");
        let tool = write_script(&version_dir, ODA_PROGRAM, "exit 0");

        let locator = ToolLocator::isolated(ODA_PROGRAM)
            .with_vendor_dir("ODA")
            .with_vendor_roots([root.path().to_path_buf()]);
        assert_eq!(locator.locate(), Some(tool));
    }

    #[test]
    fn locator_searches_given_path() {
        let dir = tempfile::tempdir().expect("临时目录");
        let tool = write_script(dir.path(), "pdftoppm", "exit 0");
        let locator = ToolLocator::isolated("pdftoppm").with_search_path(dir.path().as_os_str());
        assert_eq!(locator.locate(), Some(tool));
        assert_eq!(ToolLocator::isolated("pdftoppm").locate(), None);
    }

    #[test]
    fn missing_tool_is_unavailable() {
        let locator = ToolLocator::isolated(ODA_PROGRAM);
        assert_eq!(
            ConversionBridge::locate(&locator).unwrap_err(),
            FailureReason::ToolUnavailable
        );
    }

    #[test]
    fn conversion_returns_stem_output_and_cleans_up() {
        let dir = tempfile::tempdir().expect("临时目录");
        let dwg = sample_dwg(dir.path());
        let tool = write_script(
            dir.path(),
            "fake-oda",
            r#"[ "$3" = "ACAD2018" ] || exit 9
[ "$4" = "DXF" ] || exit 9
stem=$(basename "$7" .dwg)
printf '  0\nEOF\n' > "$2/$stem.dxf"
printf 'x' > "$2/aaa.dxf""#,
        );

        let bridge = ConversionBridge::new(tool);
        let output = bridge.convert(&dwg).expect("转换成功");
        assert_eq!(output.path().file_name().unwrap(), "part.dxf");
        let workspace = output.workspace_dir().to_path_buf();
        assert!(
            workspace
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("dwg2dxf_")
        );
        drop(output);
        assert!(!workspace.exists());
    }

    #[test]
    fn conversion_falls_back_to_first_dxf() {
        let dir = tempfile::tempdir().expect("临时目录");
        let dwg = sample_dwg(dir.path());
        let tool = write_script(
            dir.path(),
            "fake-oda",
            r#"printf 'x' > "$2/zeta.dxf"
printf 'x' > "$2/alpha.DXF""#,
        );
        let output = ConversionBridge::new(tool).convert(&dwg).expect("转换成功");
        assert_eq!(output.path().file_name().unwrap(), "alpha.DXF");
    }

    #[test]
    fn conversion_reports_failure_modes() {
        let dir = tempfile::tempdir().expect("临时目录");
        let dwg = sample_dwg(dir.path());

        let failing = write_script(dir.path(), "fails", "exit 2");
        assert_eq!(
            ConversionBridge::new(failing).convert(&dwg).unwrap_err(),
            FailureReason::ToolFailed
        );

        let silent = write_script(dir.path(), "silent", "exit 0");
        assert_eq!(
            ConversionBridge::new(silent).convert(&dwg).unwrap_err(),
            FailureReason::NoOutput
        );

        let slow = write_script(dir.path(), "slow", "sleep 5");
        assert_eq!(
            ConversionBridge::new(slow)
                .with_timeout(Duration::from_millis(200))
                .convert(&dwg)
                .unwrap_err(),
            FailureReason::Timeout
        );

        let silent = dir.path().join("silent");
        assert_eq!(
            ConversionBridge::new(silent)
                .convert(&dir.path().join("missing.dwg"))
                .unwrap_err(),
            FailureReason::MissingInput
        );
    }

    #[test]
    fn page_raster_passes_poppler_arguments() {
        let dir = tempfile::tempdir().expect("临时目录");
        let pdf = dir.path().join("doc.pdf");
        fs::write(&pdf, b"%PDF-1.4").expect("写入 PDF");
        let tool = write_script(
            dir.path(),
            "fake-pdftoppm",
            r#"[ "$1 $2 $3 $4 $5 $6" = "-f 1 -l 1 -r 150" ] || exit 9
[ "$7 $8" = "-png -singlefile" ] || exit 9
printf 'png' > "${10}.png""#,
        );
        let output = PageRasterTool::new(tool)
            .with_dpi(150)
            .rasterize_first_page(&pdf)
            .expect("渲染成功");
        assert_eq!(output.path().file_name().unwrap(), "page.png");
    }
}
