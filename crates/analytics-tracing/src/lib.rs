use std::{fs::File, path::Path, sync::Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info,tower_http=debug";
const LOG_FILE_NAME: &str = "app.log";

fn init_env_layer() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into())
}

pub fn init_tracing_to_stdout() {
    let env_layer = init_env_layer();

    let stdout_layer = tracing_subscriber::fmt::layer().with_ansi(true);

    tracing_subscriber::registry()
        .with(env_layer)
        .with(stdout_layer)
        .init();
}

pub fn init_tracing_to_file(log_dir: &Path) {
    let file = match open_log_file(log_dir) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Failed to create log file in {}: {}", log_dir.display(), e);
            init_tracing_to_stdout(); // fallback to stdout tracing
            return;
        }
    };

    let env_layer = init_env_layer();

    let file_log_layer = tracing_subscriber::fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_layer)
        .with(file_log_layer)
        .init();
}

fn open_log_file(log_dir: &Path) -> std::io::Result<File> {
    std::fs::create_dir_all(log_dir)?;
    File::options()
        .create(true)
        .append(true)
        .open(log_dir.join(LOG_FILE_NAME))
}
