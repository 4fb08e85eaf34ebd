//! Captured output streams.
//!
//! Engine-visible stdout/stderr substitute: everything a command prints goes
//! through here so tests can inspect it, and error output can optionally be
//! redirected to an `errors.log` file. Writing through a symlink is refused.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::OnceLock;

use parking_lot::Mutex;
use tracing::{debug, error};

struct CaptureState {
    out_lines: Vec<String>,
    err_lines: Vec<String>,
    error_log: Option<File>,
}

fn state() -> &'static Mutex<CaptureState> {
    static STATE: OnceLock<Mutex<CaptureState>> = OnceLock::new();
    STATE.get_or_init(|| {
        Mutex::new(CaptureState {
            out_lines: Vec::new(),
            err_lines: Vec::new(),
            error_log: None,
        })
    })
}

/// Prints a line of user-facing output and records it for inspection.
pub fn out(line: impl AsRef<str>) {
    let line = line.as_ref();
    println!("{line}");
    debug!(target: "capture", line, "stdout");
    state().lock().out_lines.push(line.to_string());
}

/// Prints a line of error output, records it, and mirrors it into the error
/// log when one is enabled.
pub fn err(line: impl AsRef<str>) {
    let line = line.as_ref();
    eprintln!("{line}");
    error!(target: "capture", line, "stderr");
    let mut guard = state().lock();
    if let Some(file) = guard.error_log.as_mut()
        && let Err(io_err) = writeln!(file, "{line}")
    {
        error!(target: "capture", %io_err, "failed to append to error log");
    }
    guard.err_lines.push(line.to_string());
}

/// Drains the captured stdout lines.
pub fn take_out() -> Vec<String> {
    std::mem::take(&mut state().lock().out_lines)
}

/// Drains the captured stderr lines.
pub fn take_err() -> Vec<String> {
    std::mem::take(&mut state().lock().err_lines)
}

/// Enables mirroring of error output into `path`. Refuses symlinks.
pub fn enable_error_log(path: &Path) -> std::io::Result<()> {
    if path.is_symlink() {
        return Err(std::io::Error::other(format!(
            "refusing to write error log through symlink: {}",
            path.display()
        )));
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    state().lock().error_log = Some(file);
    Ok(())
}

/// Closes the error log file, flushing pending writes.
pub fn disable_error_log() -> std::io::Result<()> {
    let mut guard = state().lock();
    if let Some(mut file) = guard.error_log.take() {
        file.flush()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_output_lines() {
        take_out();
        out("hello");
        out("world");
        let lines = take_out();
        assert!(lines.contains(&"hello".to_string()));
        assert!(lines.contains(&"world".to_string()));
    }

    #[test]
    fn error_log_refuses_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("real.log");
        std::fs::write(&target, "").unwrap();
        let link = dir.path().join("link.log");
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(&target, &link).unwrap();
            assert!(enable_error_log(&link).is_err());
        }
        assert!(enable_error_log(&target).is_ok());
        disable_error_log().unwrap();
    }
}
