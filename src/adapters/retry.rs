use tracing::warn;

use crate::domain::config::RetryPolicy;
use crate::domain::{DeployError, DomainError, ScanError};
use crate::ports::{HttpClient, HttpRequest, HttpResponse};

/// Why a request gave up.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestFailure {
    /// Connect or timeout errors on every attempt.
    Transport(String),
    /// Still a 5xx or 429 after the last attempt.
    Status(HttpResponse),
    /// The client refused to contact the host; not retried.
    Blocked(String),
}

impl RequestFailure {
    pub fn describe(&self) -> String {
        match self {
            RequestFailure::Transport(reason) | RequestFailure::Blocked(reason) => reason.clone(),
            RequestFailure::Status(response) => response.message(),
        }
    }

    pub fn into_scan_error(self, target: &str) -> ScanError {
        ScanError {
            target: target.to_string(),
            reason: self.describe(),
        }
    }
}

impl From<RequestFailure> for DeployError {
    fn from(failure: RequestFailure) -> Self {
        match failure {
            RequestFailure::Transport(reason) => DeployError::PlatformUnreachable(reason),
            RequestFailure::Status(response) if response.status == 429 => {
                DeployError::QuotaExceeded(response.message())
            }
            RequestFailure::Status(response) => DeployError::PlatformUnreachable(format!(
                "HTTP {}: {}",
                response.status,
                response.message()
            )),
            RequestFailure::Blocked(reason) => DeployError::Rejected(reason),
        }
    }
}

/// Send a request, retrying transient failures with bounded exponential backoff.
///
/// Non-transient responses (2xx, 3xx, 4xx other than 429) are returned as-is
/// for the caller to interpret.
pub async fn send_with_retry(
    client: &dyn HttpClient,
    policy: &RetryPolicy,
    request: HttpRequest,
) -> Result<HttpResponse, RequestFailure> {
    let mut attempt = 0;
    loop {
        let failure = match client.send(request.clone()).await {
            Ok(response) if !response.is_transient() => return Ok(response),
            Ok(response) => RequestFailure::Status(response),
            Err(DomainError::NetworkBlocked { reason }) => {
                return Err(RequestFailure::Blocked(reason))
            }
            Err(e) => RequestFailure::Transport(e.to_string()),
        };

        attempt += 1;
        if attempt > policy.max_retries {
            warn!(url = %request.url, attempts = attempt, error = %failure.describe(), "Giving up on control-plane request");
            return Err(failure);
        }

        let delay = policy.backoff(attempt);
        warn!(
            url = %request.url,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %failure.describe(),
            "Transient control-plane error, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}
