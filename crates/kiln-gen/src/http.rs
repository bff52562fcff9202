//! Shared ureq plumbing for the HTTP-backed services

use kiln_core::KilnError;
use std::time::Duration;

use crate::service::BinaryFetcher;

const MAX_RETRIES: usize = 3;
const RETRY_BASE_DELAY_MS: u64 = 500;

pub(crate) fn build_agent(timeout: Duration) -> ureq::Agent {
    let config = ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build();
    config.into()
}

/// Connection-level failures that say nothing about the request itself
pub(crate) fn is_transport_error(e: &ureq::Error) -> bool {
    matches!(
        e,
        ureq::Error::Timeout(_)
            | ureq::Error::Io(_)
            | ureq::Error::ConnectionFailed
            | ureq::Error::HostNotFound
    )
}

fn is_retryable_error(e: &ureq::Error) -> bool {
    match e {
        ureq::Error::StatusCode(code) => matches!(code, 429 | 500 | 502 | 503 | 504),
        other => is_transport_error(other),
    }
}

fn sleep_backoff(attempt: usize) {
    let delay_ms = RETRY_BASE_DELAY_MS.saturating_mul(1u64 << attempt);
    std::thread::sleep(Duration::from_millis(delay_ms));
}

/// Map a ureq failure from a create/poll call onto the error taxonomy
pub(crate) fn service_error(context: &str, e: ureq::Error) -> KilnError {
    if is_transport_error(&e) {
        return KilnError::TransportError(format!("{}: {}", context, e));
    }
    match e {
        ureq::Error::StatusCode(code) => KilnError::ServiceError {
            status: Some(code),
            message: context.to_string(),
        },
        other => KilnError::ServiceError {
            status: None,
            message: format!("{}: {}", context, other),
        },
    }
}

/// Plain GET downloader for artifact URLs.
///
/// Retries transient failures with exponential backoff; any final
/// non-success becomes a `FetchError` carrying the remote status.
pub struct HttpFetcher {
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl BinaryFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> kiln_core::Result<Vec<u8>> {
        let agent = build_agent(self.timeout);
        let mut attempt = 0;
        loop {
            match agent.get(url).call() {
                Ok(response) => {
                    let mut reader = response.into_body().into_reader();
                    let mut bytes = Vec::new();
                    std::io::Read::read_to_end(&mut reader, &mut bytes).map_err(|e| {
                        KilnError::FetchError {
                            status: None,
                            message: format!("Failed to read {}: {}", url, e),
                        }
                    })?;
                    return Ok(bytes);
                }
                Err(e) => {
                    if attempt + 1 < MAX_RETRIES && is_retryable_error(&e) {
                        tracing::debug!(%url, attempt, "retrying download: {}", e);
                        sleep_backoff(attempt);
                        attempt += 1;
                        continue;
                    }
                    let status = match e {
                        ureq::Error::StatusCode(code) => Some(code),
                        _ => None,
                    };
                    return Err(KilnError::FetchError {
                        status,
                        message: format!("Failed to download {}: {}", url, e),
                    });
                }
            }
        }
    }
}
