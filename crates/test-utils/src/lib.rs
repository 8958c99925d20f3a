//! Shared helpers for the `stepdag` integration tests.

pub mod builders;
pub mod fake_backend;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

const TEST_DEADLINE: Duration = Duration::from_secs(10);

/// Route `tracing` output through the test harness writer, once per binary.
/// Captured output only shows for failing tests; `STEPDAG_LOG=debug` widens it.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = std::env::var("STEPDAG_LOG")
            .ok()
            .and_then(|v| EnvFilter::try_new(v).ok())
            .unwrap_or_else(|| EnvFilter::new("warn,stepdag=info"));

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Await `fut`, panicking if it has not finished within ten seconds.
pub async fn with_timeout<F: Future>(fut: F) -> F::Output {
    match tokio::time::timeout(TEST_DEADLINE, fut).await {
        Ok(out) => out,
        Err(_) => panic!("test did not finish within {TEST_DEADLINE:?}"),
    }
}
