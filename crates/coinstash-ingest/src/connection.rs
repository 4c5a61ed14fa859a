//! Connection acquisition with bounded retry

use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::store::Connect;

/// Default number of connection attempts
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 5;

/// Default fixed delay between connection attempts (in seconds)
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 2;

/// Fixed-delay retry policy for establishing store connections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one, at least 1
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_CONNECT_ATTEMPTS,
            delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConnectError {
    /// Not worth retrying, for example bad credentials
    #[error("Store rejected the connection: {source}")]
    Terminal {
        #[source]
        source: sqlx::Error,
    },

    #[error("Could not connect to store after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: sqlx::Error,
    },
}

/// Whether a connection failure may succeed on a later attempt
///
/// Network and pool errors are transient, as are the SQLSTATE classes for connection
/// exceptions (`08`), `cannot_connect_now` (`57P03`) and `too_many_connections`
/// (`53300`). Everything else, including authentication and configuration
/// failures, is terminal.
pub fn is_transient(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => db
            .code()
            .is_some_and(|code| code.starts_with("08") || code == "57P03" || code == "53300"),
        _ => false,
    }
}

/// Hands out fresh connections, retrying transient failures per [`RetryPolicy`]
pub struct ConnectionProvider<C> {
    connector: C,
    policy: RetryPolicy,
}

impl<C: Connect> ConnectionProvider<C> {
    pub fn new(connector: C, policy: RetryPolicy) -> Self {
        Self { connector, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Open a connection, sleeping `policy.delay` between failed attempts
    ///
    /// Each attempt is logged at warn level with its attempt number. The last
    /// underlying error is kept as the source of [`ConnectError::Exhausted`].
    pub async fn acquire(&self) -> Result<C::Session, ConnectError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.connector.connect().await {
                Ok(session) => {
                    debug!(attempt, "Store connection established");
                    return Ok(session);
                },
                Err(e) if !is_transient(&e) => {
                    warn!(attempt, error = %e, "Store connection failed with a terminal error");
                    return Err(ConnectError::Terminal { source: e });
                },
                Err(e) => {
                    warn!(
                        "Connection attempt {}/{} failed: {}",
                        attempt, max_attempts, e
                    );
                    if attempt >= max_attempts {
                        return Err(ConnectError::Exhausted {
                            attempts: attempt,
                            source: e,
                        });
                    }
                    tokio::time::sleep(self.policy.delay).await;
                    attempt += 1;
                },
            }
        }
    }
}
