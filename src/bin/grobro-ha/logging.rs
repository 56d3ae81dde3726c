use std::io::Write;

use chrono::Local;
use env_logger::{Builder, Env};

/// Log to stderr, filtered by `RUST_LOG` (default `info`).
pub fn init_logger() {
    Builder::from_env(Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {} - {}",
                Local::now().format("%Y-%m-%dT%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
