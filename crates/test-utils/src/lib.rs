//! Shared fixtures for `taskgrid` tests.

pub mod builders;
pub mod fixture;

pub use builders::TaskBuilder;
pub use fixture::TeamFixture;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use taskgrid::logging::LOG_ENV;
use tracing_subscriber::{EnvFilter, fmt};

static TRACING: Once = Once::new();

/// Install a test-captured subscriber once per test binary.
///
/// Output only shows for failing tests unless run with `--nocapture`.
/// Filter with the same variable as the binary, e.g.
/// `TASKGRID_LOG=taskgrid::lock=debug cargo test`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .try_init();
    });
}

/// Fail the test if `f` takes longer than five seconds.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    tokio::time::timeout(Duration::from_secs(5), f)
        .await
        .expect("test timed out after 5 seconds")
}
