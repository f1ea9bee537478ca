// src/logging.rs
//
// Timestamped stderr logging with an optional log file.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Global log file handle. When `Some`, `tlog!` writes to both stderr and this file.
pub(crate) static LOG_FILE: Mutex<Option<std::fs::File>> = Mutex::new(None);

/// Name of the symlink pointing at the most recent log file.
const LATEST_LOG_NAME: &str = "serial-bridge.log";

/// Bytes shown at each end of a truncated hex dump.
const DUMP_EDGE: usize = 16;

/// Initialise file logging to the given reports directory.
/// Creates a timestamped log file and a `serial-bridge.log` symlink (Unix only).
/// Returns the path of the new log file.
pub fn init_file_logging(reports_dir: &Path) -> Result<PathBuf, String> {
    std::fs::create_dir_all(reports_dir)
        .map_err(|e| format!("Failed to create reports dir: {}", e))?;

    let filename = chrono::Local::now()
        .format("%Y%m%d-%H%M%S-serial-bridge.log")
        .to_string();
    let log_path = reports_dir.join(&filename);

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|e| format!("Failed to create log file: {}", e))?;

    // Windows symlinks require elevated privileges
    #[cfg(unix)]
    {
        let symlink_path = reports_dir.join(LATEST_LOG_NAME);
        let _ = std::fs::remove_file(&symlink_path);
        if let Err(e) = std::os::unix::fs::symlink(&filename, &symlink_path) {
            eprintln!(
                "{} [logging] Failed to create {} symlink: {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                LATEST_LOG_NAME,
                e
            );
        }
    }

    if let Ok(mut guard) = LOG_FILE.lock() {
        *guard = Some(file);
    }

    // tlog! would lock LOG_FILE again, so write the banner directly
    eprintln!(
        "{} [logging] File logging started: {}",
        chrono::Local::now().format("%H:%M:%S%.3f"),
        log_path.display()
    );

    Ok(log_path)
}

/// Stop file logging and close the log file.
pub fn stop_file_logging() {
    if let Ok(mut guard) = LOG_FILE.lock() {
        if guard.is_some() {
            *guard = None;
            eprintln!(
                "{} [logging] File logging stopped",
                chrono::Local::now().format("%H:%M:%S%.3f")
            );
        }
    }
}

/// Render bytes as space separated hex for log lines.
/// Buffers longer than 32 bytes show the first and last 16 bytes around `...`.
pub fn hex_dump(bytes: &[u8]) -> String {
    fn spaced(bytes: &[u8]) -> String {
        bytes
            .iter()
            .map(|b| hex::encode_upper([*b]))
            .collect::<Vec<_>>()
            .join(" ")
    }

    if bytes.len() <= DUMP_EDGE * 2 {
        spaced(bytes)
    } else {
        format!(
            "{} ... {}",
            spaced(&bytes[..DUMP_EDGE]),
            spaced(&bytes[bytes.len() - DUMP_EDGE..])
        )
    }
}

/// Timestamped logging macro.
/// Prepends `HH:MM:SS.mmm` local time to every message written to stderr.
/// Also writes to the log file when file logging is enabled.
macro_rules! tlog {
    ($($arg:tt)*) => {{
        use std::io::Write as _;
        let msg = format!("{} {}", chrono::Local::now().format("%H:%M:%S%.3f"), format_args!($($arg)*));
        eprintln!("{}", msg);
        if let Ok(mut guard) = $crate::logging::LOG_FILE.lock() {
            if let Some(ref mut f) = *guard {
                let _ = writeln!(f, "{}", msg);
            }
        }
    }};
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_dump_short() {
        assert_eq!(hex_dump(&[0x41, 0x42, 0x0a]), "41 42 0A");
        assert_eq!(hex_dump(&[]), "");
    }

    #[test]
    fn test_hex_dump_truncates_long_buffers() {
        let bytes: Vec<u8> = (0..40).collect();
        let dump = hex_dump(&bytes);
        assert!(dump.starts_with("00 01 02"));
        assert!(dump.contains(" ... "));
        assert!(dump.ends_with("25 26 27"));
        // 16 + 16 bytes survive, the middle 8 are elided
        assert!(!dump.contains("14 15"));
    }

    #[test]
    fn test_file_logging_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = init_file_logging(dir.path()).unwrap();
        tlog!("[test] hello from the log test");
        stop_file_logging();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("hello from the log test"));
        #[cfg(unix)]
        assert!(dir.path().join(LATEST_LOG_NAME).exists());
    }
}
