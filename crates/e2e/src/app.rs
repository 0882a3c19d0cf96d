//! Readiness of the application under test
//!
//! The harness does not start the application; it only waits for an
//! already running stack to answer its health endpoint.

use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::api::{ApiClient, HEALTH_PATH};
use crate::config::join_url;
use crate::error::{HarnessError, HarnessResult};

pub struct AppProbe {
    client: ApiClient,
    poll_interval: Duration,
}

impl AppProbe {
    pub fn new(api_url: &str, poll_interval: Duration) -> HarnessResult<Self> {
        Ok(Self {
            client: ApiClient::new(api_url, Duration::from_secs(2))?,
            poll_interval,
        })
    }

    pub fn health_url(&self) -> String {
        join_url(self.client.base_url(), HEALTH_PATH)
    }

    /// Poll the health endpoint until it answers 2xx
    pub async fn wait_until_ready(&self, timeout: Duration) -> HarnessResult<usize> {
        let start = Instant::now();
        let mut attempts = 0;

        while start.elapsed() < timeout {
            attempts += 1;

            match self.client.health().await {
                Ok(status) if status.is_success() => {
                    info!("Application healthy at {} after {} attempt(s)", self.health_url(), attempts);
                    return Ok(attempts);
                }
                Ok(status) => {
                    warn!("Health check returned {}", status);
                }
                Err(e) => {
                    if attempts == 1 {
                        info!("Waiting for application at {}...", self.health_url());
                    }
                    // Connection refused is expected while the stack starts
                    if !matches!(&e, HarnessError::Http(he) if he.is_connect()) {
                        warn!("Health check error: {}", e);
                    }
                }
            }

            sleep(self.poll_interval).await;
        }

        Err(HarnessError::AppNotReady(attempts))
    }
}
