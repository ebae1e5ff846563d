//! Logging setup. Everything goes to stderr so stdout stays clean for
//! pipeable output (headless mode depends on this). Secrets never reach
//! the log macros: the sudo cache and API keys live in types that do not
//! expose their contents.

use tracing_subscriber::EnvFilter;

pub fn setup(verbose_level: u8) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let directives = match verbose_level {
            0 => "warn,natshell=info,llm=info,command_executor=info",
            1 => "info,natshell=debug,llm=debug,command_executor=debug",
            _ => "debug,natshell=trace,llm=trace,command_executor=trace",
        };
        EnvFilter::new(directives)
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
