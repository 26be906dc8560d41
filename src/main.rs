mod app;

use resource_gatherer::config;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install logger immediately, then set runtime max level from config after loading it.
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Trace)
        .try_init();
    // Startup default when config is missing or malformed.
    log::set_max_level(log::LevelFilter::Warn);

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| config::CONFIG_PATH.to_string());
    let cfg = config::load(&path);
    log::set_max_level(cfg.log_level.as_level_filter());
    app::run(cfg)
}
