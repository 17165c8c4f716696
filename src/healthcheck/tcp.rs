use super::HealthChecker;
use crate::error::Result;
use async_trait::async_trait;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpStream;

/// Passes once something accepts TCP connections on the address.
pub struct TcpChecker {
    addr: SocketAddr,
    timeout: Duration,
}

impl TcpChecker {
    pub fn new(addr: SocketAddr, timeout: Duration) -> Self {
        Self { addr, timeout }
    }

    /// Probe `127.0.0.1:port`.
    pub fn localhost(port: u16, timeout: Duration) -> Self {
        Self::new(SocketAddr::from((Ipv4Addr::LOCALHOST, port)), timeout)
    }
}

#[async_trait]
impl HealthChecker for TcpChecker {
    async fn check(&self) -> Result<bool> {
        match tokio::time::timeout(self.timeout, TcpStream::connect(self.addr)).await {
            Ok(Ok(_stream)) => Ok(true),
            Ok(Err(e)) => {
                tracing::trace!("Readiness probe for {} failed: {}", self.addr, e);
                Ok(false)
            }
            Err(_) => Ok(false),
        }
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_listening_port_passes() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let checker = TcpChecker::localhost(port, Duration::from_secs(1));
        assert!(checker.check().await.unwrap());
    }

    #[tokio::test]
    async fn test_closed_port_fails() {
        // Bind then drop to get a port nothing listens on
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let checker = TcpChecker::localhost(port, Duration::from_millis(200));
        assert!(!checker.check().await.unwrap());
    }
}
