use std::fs;
use std::path::Path;
use std::sync::Mutex;

fn level_or_default(level: &str) -> &'static str {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "warn" | "warning" => "warn",
        "error" => "error",
        _ => "info",
    }
}

fn make_filter(level: &str) -> tracing_subscriber::EnvFilter {
    let fallback = level_or_default(level);
    tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}

fn open_log_file(path: &Path) -> Option<fs::File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && fs::create_dir_all(parent).is_err() {
            return None;
        }
    }
    fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .ok()
}

/// Installs the process-wide subscriber. `RUST_LOG` wins over `level`; a log
/// file, when given and openable, replaces stderr. Repeated calls are no-ops.
pub fn init_tracing(level: &str, log_file: Option<&Path>) {
    match log_file.and_then(open_log_file) {
        Some(file) => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(make_filter(level))
                .with_target(true)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init();
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(make_filter(level))
                .with_target(true)
                .with_writer(std::io::stderr)
                .try_init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_levels_fall_back_to_info() {
        assert_eq!(level_or_default("WARNING"), "warn");
        assert_eq!(level_or_default("loud"), "info");
    }
}
