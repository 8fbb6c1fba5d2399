//! Helpers shared by the inline test modules.

/// Route `tracing` output through the test harness' captured writer.
///
/// `init_test_tracing!()` logs at DEBUG; `init_test_tracing!(TRACE)` picks the level.
#[macro_export]
macro_rules! init_test_tracing {
    () => {
        $crate::init_test_tracing!(DEBUG);
    };
    ($level:ident) => {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::$level)
            .with_target(false)
            .with_test_writer()
            .try_init();
    };
}
