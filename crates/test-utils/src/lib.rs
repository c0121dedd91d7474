//! Shared fixtures for taskherd's integration tests: plan and task builders,
//! a scripted worker backend and recording collaborators.

pub mod builders;
pub mod fake_spawner;
pub mod recorders;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use taskherd::logging::{log_filter, LOG_ENV};
use tracing_subscriber::fmt;

/// Upper bound for a single cluster run in tests. Fake workers answer
/// immediately, so hitting it means the master stopped making progress.
pub const RUN_TIMEOUT: Duration = Duration::from_secs(5);

static INIT: Once = Once::new();

/// Install a test-writer subscriber filtered the way the binary filters,
/// e.g. `TASKHERD_LOG=taskherd::engine=debug cargo test`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let env = std::env::var(LOG_ENV).ok();
        fmt()
            .with_env_filter(log_filter(None, env.as_deref()))
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Await `f`, failing the test if it outlives [`RUN_TIMEOUT`].
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(RUN_TIMEOUT, f).await {
        Ok(value) => value,
        Err(_) => panic!("run did not finish within {RUN_TIMEOUT:?}; the master likely stalled"),
    }
}
