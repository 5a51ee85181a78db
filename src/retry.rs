use crate::ports;
use crate::ports::gateway::GatewayError;

use std::time::Duration;

/// Bounded in-tick retry for gateway calls. Each attempt gets its own timeout;
/// a timed-out attempt counts as an upstream outage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub delay: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            delay: Duration::from_secs(2),
            timeout: Duration::from_secs(20),
        }
    }
}

pub(crate) async fn with_retry<T, R, F, Fut>(
    time: &T,
    policy: &RetryPolicy,
    mut attempt: F,
) -> Result<R, GatewayError>
where
    T: ports::TimeProvider,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<R, GatewayError>>,
{
    let mut retried = 0u32;
    loop {
        let result = match tokio::time::timeout(policy.timeout, attempt()).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::UpstreamUnavailable(format!(
                "timed out after {}ms",
                policy.timeout.as_millis()
            ))),
        };
        match result {
            Err(err) if err.is_transient() && retried < policy.retries => {
                retried += 1;
                tracing::debug!(attempt = retried, error = %err, "retrying gateway call");
                time.sleep(policy.delay).await;
            }
            other => return other,
        }
    }
}
