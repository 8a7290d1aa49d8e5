//! 带硬超时的外部进程执行。

use std::io::ErrorKind;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use cadpreview_core::FailureReason;
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// 启动子进程并等待至多 `timeout`；超时后杀掉子进程并回收。
///
/// 标准输入输出全部重定向到空设备。可执行文件不存在映射为
/// `ToolUnavailable`，超时映射为 `Timeout`。退出码由调用方解释。
pub fn run_with_timeout(command: &mut Command, timeout: Duration) -> Result<ExitStatus, FailureReason> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    let program = command.get_program().to_string_lossy().into_owned();
    let mut child = command.spawn().map_err(|err| {
        debug!(program = %program, error = %err, "无法启动外部工具");
        match err.kind() {
            ErrorKind::NotFound | ErrorKind::PermissionDenied => FailureReason::ToolUnavailable,
            _ => FailureReason::Io,
        }
    })?;

    let started = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!(program = %program, %status, elapsed_ms = started.elapsed().as_millis() as u64, "外部工具已退出");
                return Ok(status);
            }
            Ok(None) => {
                if started.elapsed() >= timeout {
                    warn!(program = %program, timeout_secs = timeout.as_secs_f64(), "外部工具超时，终止进程");
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(FailureReason::Timeout);
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(err) => {
                warn!(program = %program, error = %err, "等待外部工具失败");
                let _ = child.kill();
                let _ = child.wait();
                return Err(FailureReason::Io);
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn missing_program_is_unavailable() {
        let mut command = Command::new("/definitely/not/a/real/tool");
        assert_eq!(
            run_with_timeout(&mut command, Duration::from_secs(1)).unwrap_err(),
            FailureReason::ToolUnavailable
        );
    }

    #[test]
    fn exit_status_is_returned() {
        let mut command = Command::new("sh");
        command.args(["-c", "exit 3"]);
        let status = run_with_timeout(&mut command, Duration::from_secs(5)).expect("sh 可用");
        assert_eq!(status.code(), Some(3));
    }

    #[test]
    fn slow_program_is_killed() {
        let mut command = Command::new("sh");
        command.args(["-c", "sleep 5"]);
        let started = Instant::now();
        assert_eq!(
            run_with_timeout(&mut command, Duration::from_millis(200)).unwrap_err(),
            FailureReason::Timeout
        );
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
