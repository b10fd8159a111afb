// Shared setup for the integration tests
use std::sync::Once;

static INIT: Once = Once::new();

/// Route engine logs through the test harness so failing runs show them
pub fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init()
            .ok();
    });
}
