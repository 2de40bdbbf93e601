//! # Connection
//!
//! A lazily dialed transport session bound to `(address, generation)`.
//!
//! ```text
//! Unconnected --ensure--> Connected{address, generation}
//!      ^                         |
//!      +---- close / ensure with a different address or generation
//! ```
//!
//! Calling [`Connection::ensure`] with the pair the live channel is bound to is a no-op. Any
//! other pair tears the live channel down first, then dials again within the connect timeout.
//! A failed dial leaves the connection `Unconnected`.
use crate::schema::Generation;
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};

/// Errors that can occur when connecting to a gRPC server.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("Invalid URL '{0}': {1}")]
    InvalidUrl(String, #[source] tonic::transport::Error),
    #[error("Failed to connect to '{0}': {1}")]
    ConnectUnreachable(String, #[source] tonic::transport::Error),
    #[error("Timed out after {1:?} connecting to '{0}'")]
    TimedOut(String, Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Unconnected,
    Connected {
        address: String,
        generation: Generation,
    },
}

#[derive(Debug)]
struct LiveChannel {
    address: String,
    generation: Generation,
    channel: Channel,
}

#[derive(Debug, Default)]
pub struct Connection {
    live: Option<LiveChannel>,
    sessions: u64,
}

impl Connection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a channel bound to `address` and `generation`, dialing only when needed.
    pub async fn ensure(
        &mut self,
        address: &str,
        generation: Generation,
        timeout: Duration,
    ) -> Result<Channel, ConnectError> {
        if let Some(live) = &self.live
            && live.address == address
            && live.generation == generation
        {
            return Ok(live.channel.clone());
        }

        self.close();

        let channel = dial(address, timeout).await?;
        self.sessions += 1;

        tracing::debug!(
            address,
            generation = generation.get(),
            sessions = self.sessions,
            "connected"
        );

        self.live = Some(LiveChannel {
            address: address.to_string(),
            generation,
            channel: channel.clone(),
        });

        Ok(channel)
    }

    /// Drops the live channel, if any. Idempotent.
    pub fn close(&mut self) {
        if let Some(live) = self.live.take() {
            tracing::debug!(address = %live.address, "closing connection");
            drop(live.channel);
        }
    }

    pub fn state(&self) -> ConnectionState {
        match &self.live {
            Some(live) => ConnectionState::Connected {
                address: live.address.clone(),
                generation: live.generation,
            },
            None => ConnectionState::Unconnected,
        }
    }

    /// Number of successful dials so far.
    pub fn sessions(&self) -> u64 {
        self.sessions
    }
}

/// Dials `address` eagerly. Addresses without a scheme are treated as plaintext `http://`.
pub async fn dial(address: &str, timeout: Duration) -> Result<Channel, ConnectError> {
    let uri = with_scheme(address);

    let endpoint = Endpoint::new(uri)
        .map_err(|e| ConnectError::InvalidUrl(address.to_string(), e))?
        .connect_timeout(timeout);

    match tokio::time::timeout(timeout, endpoint.connect()).await {
        Ok(Ok(channel)) => Ok(channel),
        Ok(Err(e)) => Err(ConnectError::ConnectUnreachable(address.to_string(), e)),
        Err(_) => Err(ConnectError::TimedOut(address.to_string(), timeout)),
    }
}

fn with_scheme(address: &str) -> String {
    if address.contains("://") {
        address.to_string()
    } else {
        format!("http://{address}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_addresses_get_a_plaintext_scheme() {
        assert_eq!(with_scheme("localhost:50051"), "http://localhost:50051");
        assert_eq!(with_scheme("https://api:443"), "https://api:443");
    }

    #[test]
    fn close_is_idempotent() {
        let mut connection = Connection::new();
        connection.close();
        connection.close();
        assert_eq!(connection.state(), ConnectionState::Unconnected);
    }

    #[tokio::test]
    async fn failed_dial_stays_unconnected() {
        let mut connection = Connection::new();

        // Port 1 on localhost refuses connections.
        let result = connection
            .ensure("127.0.0.1:1", Generation::next(), Duration::from_millis(500))
            .await;

        assert!(result.is_err());
        assert_eq!(connection.state(), ConnectionState::Unconnected);
        assert_eq!(connection.sessions(), 0);
    }
}
