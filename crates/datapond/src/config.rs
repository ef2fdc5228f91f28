// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Store and TCP client configuration.

use std::net::SocketAddr;
use std::time::Duration;

/// Configuration for a [`DataPool`](crate::DataPool).
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Deadline for one remote round trip.
    pub reply_timeout: Duration,
    /// Upper bound on one encoded message body.
    pub max_message_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            reply_timeout: Duration::from_secs(1),
            max_message_size: 16 * 1024 * 1024,
        }
    }
}

impl PoolConfig {
    /// Builder: set the remote round-trip deadline.
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Builder: set the maximum message size.
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.reply_timeout.is_zero() {
            return Err("reply_timeout must be > 0");
        }
        if self.max_message_size == 0 {
            return Err("max_message_size must be > 0");
        }
        Ok(())
    }
}

/// Configuration for connecting a TCP client transport to a broker.
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Broker address (host:port).
    pub broker_address: SocketAddr,
    /// Identity announced in the Hello handshake.
    pub identity: String,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Upper bound on one incoming frame.
    pub max_message_size: usize,
}

impl TcpConfig {
    /// Create a configuration with defaults for everything but the address
    /// and identity.
    pub fn new(broker_address: SocketAddr, identity: impl Into<String>) -> Self {
        Self {
            broker_address,
            identity: identity.into(),
            connect_timeout: Duration::from_secs(5),
            max_message_size: 16 * 1024 * 1024,
        }
    }

    /// Builder: set the connection timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Builder: set the maximum message size.
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.identity.is_empty() {
            return Err("identity must not be empty");
        }
        if self.connect_timeout.is_zero() {
            return Err("connect_timeout must be > 0");
        }
        if self.max_message_size == 0 {
            return Err("max_message_size must be > 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pool_config() {
        let config = PoolConfig::default();
        assert_eq!(config.reply_timeout, Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pool_builder_methods() {
        let config = PoolConfig::default()
            .with_reply_timeout(Duration::from_millis(250))
            .with_max_message_size(4096);
        assert_eq!(config.reply_timeout, Duration::from_millis(250));
        assert_eq!(config.max_message_size, 4096);
    }

    #[test]
    fn test_pool_validation_errors() {
        let config = PoolConfig::default().with_reply_timeout(Duration::ZERO);
        assert!(config.validate().is_err());

        let config = PoolConfig::default().with_max_message_size(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tcp_config() {
        let addr: SocketAddr = "127.0.0.1:9310".parse().unwrap();
        let config = TcpConfig::new(addr, "fusion-service")
            .with_connect_timeout(Duration::from_secs(10));
        assert_eq!(config.broker_address, addr);
        assert_eq!(config.identity, "fusion-service");
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_tcp_validation_errors() {
        let addr: SocketAddr = "127.0.0.1:9310".parse().unwrap();
        let config = TcpConfig::new(addr, "");
        assert!(config.validate().is_err());

        let config = TcpConfig::new(addr, "x").with_connect_timeout(Duration::ZERO);
        assert!(config.validate().is_err());
    }
}
