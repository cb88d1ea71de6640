use std::io::Write;

/// Initialise `env_logger` for the pipeline.
///
/// `RUST_LOG` wins when set; otherwise `debug` selects the debug level.
/// Calling it again after a logger is installed is a no-op.
pub fn init_logging(debug: bool) {
    let filter = if debug { "debug" } else { "info" };

    let result = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {} [{}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .try_init();

    if result.is_err() {
        log::debug!("Logger already initialised");
    }
}
