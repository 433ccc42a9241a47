use std::io::Write;

/// Installs the process-wide `env_logger` subscriber.
///
/// `verbosity` stacks on top of whatever `RUST_LOG` already selects: each
/// repetition of `-v` on the command line raises the default filter one
/// level, matching the `-v`/`--verbose` convention used elsewhere in this
/// codebase's CLIs.
pub fn init(verbosity: u8) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format(|buf, record| {
            writeln!(buf, "[{:<5}] {}", record.level(), record.args())
        })
        .init();
}
