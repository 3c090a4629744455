use std::sync::Once;

use nrtdir_tracing::{TracingConsumer, tracing_init};

pub use nrtdir_test_macro::test;

// this function is automatically run before each test by the macro nrtdir_test_macro::test
pub fn setup_test() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        tracing_init(TracingConsumer::Test, None);
    });
}
