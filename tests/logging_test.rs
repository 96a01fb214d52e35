//! Subscriber installation runs in its own test binary: it sets process-wide state.

use glaze::logging::{self, LogFormat, LoggingConfig};
use tracing::Level;

#[test]
fn test_init_is_idempotent() {
    logging::init(LoggingConfig::new(Level::INFO).with_format(LogFormat::Compact)).unwrap();
    logging::init(LoggingConfig::default()).unwrap();
    tracing::info!("still logging after a second init");
}
