use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bqsink_config::shared::TimeoutConfig;

use crate::bigquery::{AuthStrategy, BigQueryApi, BigQueryConnector};
use crate::error::{ErrorKind, SinkResult};
use crate::test_utils::fake_api::FakeBigQuery;
use crate::bail;

/// Connector handing out the same [`FakeBigQuery`] on every connect.
#[derive(Clone)]
pub struct CountingConnector {
    api: Arc<FakeBigQuery>,
    connects: Arc<AtomicUsize>,
    failures: Arc<Mutex<usize>>,
    strategies: Arc<Mutex<Vec<String>>>,
}

impl CountingConnector {
    pub fn new(api: Arc<FakeBigQuery>) -> Self {
        Self {
            api,
            connects: Arc::new(AtomicUsize::new(0)),
            failures: Arc::new(Mutex::new(0)),
            strategies: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Makes the next `count` connects fail with an authentication error.
    pub fn fail_next_connects(&self, count: usize) {
        *self.failures.lock().unwrap_or_else(|e| e.into_inner()) = count;
    }

    /// Number of successful connects so far.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Names of the auth strategies passed to every connect attempt.
    pub fn strategies(&self) -> Vec<String> {
        self.strategies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl BigQueryConnector for CountingConnector {
    async fn connect(
        &self,
        auth: &AuthStrategy,
        _timeouts: &TimeoutConfig,
    ) -> SinkResult<Arc<dyn BigQueryApi>> {
        self.strategies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(auth.name().to_owned());

        {
            let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
            if *failures > 0 {
                *failures -= 1;
                bail!(
                    ErrorKind::AuthenticationError,
                    "Credential resolution failed",
                    detail = "scripted connect failure"
                );
            }
        }

        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(self.api.clone())
    }
}
