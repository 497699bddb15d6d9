use simplelog::{Config, LevelFilter, SimpleLogger};

pub mod fake_recaptcha;
pub mod fake_smtp;

/// Routes `log` records (and `tracing` events, via its `log` feature) to stderr.
///
/// Safe to call from every test; only the first call installs the logger.
pub fn setup_logging() {
    let _ = SimpleLogger::init(LevelFilter::Debug, Config::default());
}
