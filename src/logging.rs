use std::{
    io::{self, IsTerminal, Write},
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    fmt::{self, time::UtcTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::{cli::ColorChoice, config::CONFIG_FILE_NAME};

const SECONDS_PER_DAY: u64 = 86400;

/// Compressed logs older than this are deleted.
const KEEP_COMPRESSED_DAYS: u64 = 7;

/// Keeps the file writer alive. Dropping it flushes buffered log lines.
pub struct LogGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Installs the global subscriber: a console layer on stderr and, when
/// `data_dir` and `file_log_level` are both set, a daily rolling file under
/// `<data_dir>/logs`.
///
/// `log` records are bridged into tracing by the subscriber's `init`.
pub fn init_logging(
    verbosity: u8,
    color: ColorChoice,
    data_dir: Option<&Path>,
    file_log_level: Option<LevelFilter>,
    command_name: &str,
) -> LogGuard {
    let console_filter = match verbosity {
        0 => "warn,libnamelock=info,namelock=info",
        1 => "warn,libnamelock=debug,namelock=debug",
        2 => "info,libnamelock=trace,namelock=trace",
        _ => "trace",
    };

    let console_env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(console_filter));

    let use_ansi = match color {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => io::stderr().is_terminal(),
    };

    let console_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(use_ansi)
        .with_target(false)
        .with_level(true)
        .with_filter(console_env_filter);

    let mut file_guard = None;

    let file_layer = match (data_dir, file_log_level) {
        (Some(dir), Some(level)) => {
            let log_dir = dir.join("logs");

            match open_log_file(&log_dir, command_name) {
                Ok(appender) => {
                    let (non_blocking, guard) = tracing_appender::non_blocking(appender);
                    file_guard = Some(guard);

                    Some(
                        fmt::layer()
                            .with_writer(non_blocking)
                            .with_ansi(false)
                            .with_timer(UtcTime::rfc_3339())
                            .with_target(true)
                            .with_thread_names(true)
                            .with_level(true)
                            .with_filter(EnvFilter::new(level.to_string())),
                    )
                }
                Err(err) => {
                    eprintln!(
                        "Warning: could not open log directory {}: {err}",
                        log_dir.display()
                    );
                    None
                }
            }
        }
        _ => None,
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .init();

    LogGuard {
        _file_guard: file_guard,
    }
}

fn open_log_file(
    log_dir: &Path,
    command_name: &str,
) -> io::Result<tracing_appender::rolling::RollingFileAppender> {
    fs_err::create_dir_all(log_dir)?;
    compress_old_logs(log_dir, command_name);

    tracing_appender::rolling::Builder::new()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix(command_name)
        .filename_suffix("log")
        .build(log_dir)
        .map_err(io::Error::other)
}

fn days_since_epoch(time: SystemTime) -> Option<u64> {
    time.duration_since(UNIX_EPOCH)
        .ok()
        .map(|since| since.as_secs() / SECONDS_PER_DAY)
}

/// Gzips this command's logs from previous days and deletes compressed logs
/// past their retention. Failures are skipped; a stray log file is harmless.
fn compress_old_logs(log_dir: &Path, command_name: &str) {
    let Some(today) = days_since_epoch(SystemTime::now()) else {
        return;
    };

    let Ok(entries) = std::fs::read_dir(log_dir) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        let modified_day = entry
            .metadata()
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(days_since_epoch);

        if file_name.ends_with(".log.gz") {
            if modified_day.is_some_and(|day| today.saturating_sub(day) > KEEP_COMPRESSED_DAYS) {
                let _ = fs_err::remove_file(&path);
            }
            continue;
        }

        if !file_name.ends_with(".log") || !file_name.starts_with(command_name) {
            continue;
        }
        if modified_day.map_or(true, |day| day >= today) {
            continue;
        }

        let gz_path = path.with_extension("log.gz");
        if let Err(err) = gzip_file(&path, &gz_path) {
            log::debug!("Could not compress {}: {err}", path.display());
            let _ = fs_err::remove_file(&gz_path);
        } else {
            let _ = fs_err::remove_file(&path);
        }
    }
}

fn gzip_file(source: &Path, destination: &Path) -> io::Result<()> {
    let input = fs_err::read(source)?;
    let output = fs_err::File::create(destination)?;

    let mut encoder = flate2::write::GzEncoder::new(output, flate2::Compression::default());
    encoder.write_all(&input)?;
    encoder.finish()?;
    Ok(())
}

/// Reads `fileLogLevel` out of the data directory's config file before
/// logging is up, so the file layer can be configured from it.
///
/// Returns `None` when there is no config file or it doesn't set the field
/// (the caller picks the default). Returns `Some(None)` when file logging is
/// turned off with `"none"` or `"off"`.
pub fn quick_read_file_log_level(data_dir: &Path) -> Option<Option<LevelFilter>> {
    let contents = std::fs::read_to_string(data_dir.join(CONFIG_FILE_NAME)).ok()?;
    let value: serde_json::Value = json5::from_str(&contents).ok()?;
    let level = value.get("fileLogLevel")?.as_str()?;

    Some(match level.to_lowercase().as_str() {
        "none" | "off" => None,
        "error" => Some(LevelFilter::ERROR),
        "warn" => Some(LevelFilter::WARN),
        "info" => Some(LevelFilter::INFO),
        "debug" => Some(LevelFilter::DEBUG),
        _ => Some(LevelFilter::TRACE),
    })
}
