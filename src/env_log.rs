use env_logger::Env;

/// Initializes `env_logger`, falling back to `info` when `RUST_LOG` is not set.
pub fn init_with_default_level() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init()
}
