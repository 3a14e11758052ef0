//! Request-scoped context
//!
//! Carries the correlation id, client identity, and deadline through every
//! downstream call. Passed explicitly; adapters never read ambient state.

use std::time::{Duration, Instant};
use uuid::Uuid;

/// Context threaded through all request-scoped calls
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Correlation id attached to every log line of the request
    pub correlation_id: String,

    /// Client identity: API key when present, source IP otherwise
    pub client_id: String,

    /// Absolute deadline for the whole request
    deadline: Instant,
}

impl RequestContext {
    /// Create a context with a fresh correlation id
    pub fn new(client_id: impl Into<String>, timeout: Duration) -> Self {
        Self {
            correlation_id: Uuid::new_v4().to_string(),
            client_id: client_id.into(),
            deadline: Instant::now() + timeout,
        }
    }

    /// Create a context with an externally supplied correlation id
    pub fn with_correlation_id(
        correlation_id: impl Into<String>,
        client_id: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            client_id: client_id.into(),
            deadline: Instant::now() + timeout,
        }
    }

    /// Derive a child context for a background item with its own deadline.
    /// The correlation id is preserved so worker logs stay traceable.
    pub fn child(&self, timeout: Duration) -> Self {
        Self {
            correlation_id: self.correlation_id.clone(),
            client_id: self.client_id.clone(),
            deadline: Instant::now() + timeout,
        }
    }

    /// Time left until the deadline; zero when already expired
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Whether the deadline has passed
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new("anonymous", Duration::from_secs(30))
    }
}
