//! Installs the global tracing subscriber, so it runs in its own test binary
//! to avoid clashing with `tracing_test::traced_test` in the unit tests.

use resistes_daq::logging::{init, TracingConfig};
use tracing::Level;

#[test]
fn test_init_is_idempotent() {
    assert!(init(TracingConfig::default()).is_ok());
    assert!(init(TracingConfig::new(Level::DEBUG)).is_ok());
}
