use env_logger::{Builder, Env};
use log::{info, LevelFilter};
use std::io::Write;

/// Install the global logger. `RUST_LOG` overrides `level`.
pub fn init(level: LevelFilter) {
    let mut builder = Builder::new();

    builder.filter_level(level);
    builder.parse_env(Env::default());
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} [{}] {} - {}",
            buf.timestamp_seconds(),
            record.level(),
            record.target(),
            record.args()
        )
    });

    // a second call (tests) keeps the first logger
    if builder.try_init().is_ok() {
        info!("Logging initialised at {}", log::max_level());
    }
}
