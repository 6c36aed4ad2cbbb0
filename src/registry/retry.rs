use crate::errors::GraphError;
use rand::Rng;
use std::{future::Future, time::Duration};

/// Bounded exponential backoff for upstream calls
///
/// Rate limits, server errors, and connection failures are retried. Anything
/// else, including authentication and not-found answers, is returned as-is.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    pub factor: u32,
    /// Fraction of each delay to randomize by, in either direction
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(200),
            factor: 2,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Policy that makes exactly one attempt
    pub fn none() -> Self {
        RetryPolicy {
            attempts: 1,
            ..Default::default()
        }
    }

    /// Delay before the given retry, counting the first retry as 1
    pub fn delay(&self, retry: u32) -> Duration {
        let scale = self.factor.saturating_pow(retry.saturating_sub(1));
        let nominal = self.base_delay.saturating_mul(scale);
        if self.jitter <= 0.0 {
            return nominal;
        }
        let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        nominal.mul_f64(1.0 + spread)
    }

    /// Run `op` until it succeeds, fails permanently, or runs out of attempts
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, GraphError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GraphError>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Err(err) if is_retryable(&err) => {
                    if attempt >= attempts {
                        log::warn!("{} failed after {} attempts, {}", what, attempt, err);
                        return Err(GraphError::Transient {
                            attempts: attempt,
                            message: err.to_string(),
                        });
                    }
                    let delay = self.delay(attempt);
                    log::info!("{} failed ({}), retrying in {:?}", what, err, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

fn is_retryable(err: &GraphError) -> bool {
    match err {
        GraphError::Transient { .. } => true,
        GraphError::Network(err) => err.is_connect() || err.is_timeout(),
        _ => false,
    }
}

/// Map an HTTP status to the error it stands for, if it is not a success
pub(crate) fn status_error(status: reqwest::StatusCode, url: &str) -> Option<GraphError> {
    use reqwest::StatusCode;
    if status.is_success() {
        return None;
    }
    Some(match status {
        StatusCode::UNAUTHORIZED => GraphError::Unauthenticated,
        StatusCode::FORBIDDEN => GraphError::Forbidden(url.to_owned()),
        StatusCode::NOT_FOUND => GraphError::NotFound(url.to_owned()),
        StatusCode::TOO_MANY_REQUESTS => GraphError::Transient {
            attempts: 1,
            message: format!("rate limited by {}", url),
        },
        status if status.is_server_error() => GraphError::Transient {
            attempts: 1,
            message: format!("{} from {}", status, url),
        },
        status => GraphError::UnexpectedStatus {
            status: status.as_u16(),
            url: url.to_owned(),
        },
    })
}
