//! Post-deploy health verification.
//!
//! [`HealthVerifier::verify`] polls a URL until a success predicate matches
//! or the retry budget runs out. The loop is an explicit state machine:
//!
//! ```text
//! Attempting ──match──────────────▶ Success    (terminal, pass)
//!     │
//!     └─miss/transport error─▶ Retrying ──sleep(delay)──▶ Attempting
//!                          └─▶ Exhausted  (terminal, fail; after retries + 1 attempts)
//! ```
//!
//! Total attempts are `retries + 1`. Sleeping goes through the injected
//! [`Clock`], so a never-matching check returns after exactly
//! `retries × delay` of sleep.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::error::{DeployError, Result};

// ---------------------------------------------------------------------------
// Predicate / TlsPolicy
// ---------------------------------------------------------------------------

/// Success predicate over `(status, body)`.
pub type Predicate = Arc<dyn Fn(u16, &str) -> bool + Send + Sync>;

pub fn status_is(code: u16) -> Predicate {
    Arc::new(move |status, _| status == code)
}

pub fn status_and_body_contains(code: u16, needle: impl Into<String>) -> Predicate {
    let needle = needle.into();
    Arc::new(move |status, body| status == code && body.contains(&needle))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsPolicy {
    /// Verify the server certificate chain.
    #[default]
    Verify,
    /// Accept any certificate. For freshly provisioned endpoints whose
    /// managed certificate has not finished issuing.
    Insecure,
}

// ---------------------------------------------------------------------------
// HealthCheckSpec
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct HealthCheckSpec {
    pub url: String,
    pub tls: TlsPolicy,
    /// Per-attempt request timeout.
    pub timeout: Duration,
    /// Re-attempts after the first one.
    pub retries: u32,
    pub delay: Duration,
    pub predicate: Predicate,
}

impl HealthCheckSpec {
    /// Defaults: verified TLS, 10 s timeout, 60 retries, 30 s apart, HTTP 200.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            tls: TlsPolicy::Verify,
            timeout: Duration::from_secs(10),
            retries: 60,
            delay: Duration::from_secs(30),
            predicate: status_is(200),
        }
    }

    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = predicate;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Total time spent sleeping when no attempt ever matches.
    pub fn max_sleep(&self) -> Duration {
        self.delay.saturating_mul(self.retries)
    }

    /// Upper bound on how long `verify` can block.
    pub fn max_wait(&self) -> Duration {
        self.max_sleep()
            .saturating_add(self.timeout.saturating_mul(self.max_attempts()))
    }
}

impl std::fmt::Debug for HealthCheckSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthCheckSpec")
            .field("url", &self.url)
            .field("tls", &self.tls)
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// HttpProbe
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status: u16,
    pub body: String,
}

/// One GET request. `Err` means a transport-level failure (connect, TLS,
/// timeout); any HTTP status is an `Ok` response.
pub trait HttpProbe {
    fn get(&self, url: &str, tls: TlsPolicy, timeout: Duration) -> Result<ProbeResponse>;
}

/// Blocking reqwest client with rustls.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReqwestProbe;

impl HttpProbe for ReqwestProbe {
    fn get(&self, url: &str, tls: TlsPolicy, timeout: Duration) -> Result<ProbeResponse> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(tls == TlsPolicy::Insecure)
            .build()
            .map_err(|e| DeployError::Http(e.to_string()))?;
        let resp = client
            .get(url)
            .send()
            .map_err(|e| DeployError::Http(e.to_string()))?;
        let status = resp.status().as_u16();
        let body = resp.text().map_err(|e| DeployError::Http(e.to_string()))?;
        Ok(ProbeResponse { status, body })
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    Attempting { attempt: u32 },
    Retrying { attempt: u32 },
    Success { attempt: u32 },
    Exhausted { attempts: u32 },
}

/// Terminal result of a verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub passed: bool,
    pub attempts: u32,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

pub struct HealthVerifier {
    probe: Box<dyn HttpProbe>,
    clock: Box<dyn Clock>,
}

impl HealthVerifier {
    pub fn new(probe: Box<dyn HttpProbe>, clock: Box<dyn Clock>) -> Self {
        Self { probe, clock }
    }

    pub fn verify(&self, spec: &HealthCheckSpec) -> Verdict {
        let started = self.clock.elapsed();
        let max_attempts = spec.max_attempts();
        let mut last_status = None;
        let mut last_error = None;
        let mut state = ProbeState::Attempting { attempt: 1 };

        tracing::info!(
            url = %spec.url,
            max_attempts,
            delay_secs = spec.delay.as_secs(),
            "verifying deployment health"
        );

        loop {
            state = match state {
                ProbeState::Attempting { attempt } => {
                    let matched = match self.probe.get(&spec.url, spec.tls, spec.timeout) {
                        Ok(resp) => {
                            last_status = Some(resp.status);
                            last_error = None;
                            (spec.predicate)(resp.status, &resp.body)
                        }
                        Err(e) => {
                            last_error = Some(e.to_string());
                            false
                        }
                    };
                    if matched {
                        ProbeState::Success { attempt }
                    } else if attempt >= max_attempts {
                        ProbeState::Exhausted { attempts: attempt }
                    } else {
                        tracing::debug!(
                            attempt,
                            status = ?last_status,
                            error = ?last_error,
                            "health check did not pass"
                        );
                        ProbeState::Retrying { attempt }
                    }
                }
                ProbeState::Retrying { attempt } => {
                    self.clock.sleep(spec.delay);
                    ProbeState::Attempting {
                        attempt: attempt + 1,
                    }
                }
                ProbeState::Success { attempt } => {
                    let elapsed = self.clock.elapsed().saturating_sub(started);
                    tracing::info!(attempt, elapsed_ms = elapsed.as_millis() as u64, "health check passed");
                    return Verdict {
                        passed: true,
                        attempts: attempt,
                        elapsed_ms: elapsed.as_millis() as u64,
                        last_status,
                        last_error,
                    };
                }
                ProbeState::Exhausted { attempts } => {
                    let elapsed = self.clock.elapsed().saturating_sub(started);
                    tracing::warn!(
                        attempts,
                        status = ?last_status,
                        error = ?last_error,
                        "health check retries exhausted"
                    );
                    return Verdict {
                        passed: false,
                        attempts,
                        elapsed_ms: elapsed.as_millis() as u64,
                        last_status,
                        last_error,
                    };
                }
            };
        }
    }
}

// ---------------------------------------------------------------------------
// Test double
// ---------------------------------------------------------------------------

/// Replays a fixed sequence of responses; repeats the last one when drained.
#[cfg(test)]
#[derive(Clone)]
pub(crate) struct ScriptedProbe {
    responses: Arc<std::sync::Mutex<std::collections::VecDeque<std::result::Result<u16, String>>>>,
    hits: Arc<std::sync::atomic::AtomicU32>,
}

#[cfg(test)]
impl ScriptedProbe {
    pub(crate) fn new(responses: Vec<std::result::Result<u16, String>>) -> Self {
        Self {
            responses: Arc::new(std::sync::Mutex::new(responses.into())),
            hits: Default::default(),
        }
    }

    pub(crate) fn hits(&self) -> u32 {
        self.hits.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
impl HttpProbe for ScriptedProbe {
    fn get(&self, _url: &str, _tls: TlsPolicy, _timeout: Duration) -> Result<ProbeResponse> {
        self.hits.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let mut q = self.responses.lock().unwrap();
        let next = if q.len() > 1 {
            q.pop_front()
        } else {
            q.front().cloned()
        };
        match next {
            Some(Ok(status)) => Ok(ProbeResponse {
                status,
                body: String::new(),
            }),
            Some(Err(e)) => Err(DeployError::Http(e)),
            None => Err(DeployError::Http("no scripted response".into())),
        }
    }
}
