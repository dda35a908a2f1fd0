use chrono::Local;
use fern::Dispatch;
use log::LevelFilter;
use std::fs;
use std::path::Path;

const LOG_FILE: &str = "engine.log";

fn level_from_env() -> LevelFilter {
    // RUST_LOG=debug or RUST_LOG=warn, defaults to info
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    log_level.parse::<LevelFilter>().unwrap_or(LevelFilter::Info)
}

fn console_config() -> Dispatch {
    Dispatch::new()
        .format(|out, message, record| {
            let colors = fern::colors::ColoredLevelConfig::new()
                .error(fern::colors::Color::Red)
                .warn(fern::colors::Color::Yellow)
                .info(fern::colors::Color::Green)
                .debug(fern::colors::Color::Blue)
                .trace(fern::colors::Color::BrightBlack);

            out.finish(format_args!(
                "[{} {} {}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                colors.color(record.level()),
                record.target(),
                message
            ))
        })
        .chain(std::io::stderr())
}

fn base_config() -> Dispatch {
    Dispatch::new().level(level_from_env()).level_for("serde", LevelFilter::Warn).level_for("uuid", LevelFilter::Warn)
}

/// Initializes the global logger for a long running worker.
///
/// Log level is controlled by the `RUST_LOG` environment variable and defaults to `info`.
/// Logs are written to the console and to `<log_dir>/engine.log`. Calling this more than
/// once keeps the first configuration.
pub fn init(log_dir: &Path) {
    if let Err(e) = fs::create_dir_all(log_dir) {
        eprintln!("Failed to create log directory at '{}': {}", log_dir.display(), e);
    }

    let log_file_path = log_dir.join(LOG_FILE);

    let mut dispatch = base_config().chain(console_config());
    match fern::log_file(&log_file_path) {
        Ok(file) => {
            let file_config = Dispatch::new()
                .format(|out, message, record| {
                    out.finish(format_args!("[{} {} {}] {}", Local::now().format("%Y-%m-%d %H:%M:%S"), record.level(), record.target(), message))
                })
                .chain(file);
            dispatch = dispatch.chain(file_config);
        }
        Err(e) => eprintln!("Failed to open log file '{}': {}", log_file_path.display(), e),
    }

    if let Err(e) = dispatch.apply() {
        eprintln!("Failed to apply logger configuration: {}", e);
        return;
    }

    log::info!("Logger initialized. Logging to console and '{}'.", log_file_path.display());
}

/// Console-only logger, used by short lived commands such as `exec-job`.
pub fn init_console() {
    if let Err(e) = base_config().chain(console_config()).apply() {
        eprintln!("Failed to apply logger configuration: {}", e);
    }
}
