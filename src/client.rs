//! Client for a running daemon's loopback API

use crate::error::{Error, Result};
use crate::server::Health;
use crate::session::Session;
use serde::de::DeserializeOwned;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct DaemonClient {
    base_url: String,
    client: reqwest::Client,
}

impl DaemonClient {
    pub fn new(port: u16) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: format!("http://127.0.0.1:{port}"),
            client,
        }
    }

    pub async fn health(&self) -> Result<Health> {
        self.get("/health").await
    }

    pub async fn sessions(&self) -> Result<Vec<Session>> {
        self.get("/sessions").await
    }

    /// GET `path`; anything but 200 is an error
    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .client
            .get(format!("{}{path}", self.base_url))
            .send()
            .await?;
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(Error::Status(status.as_u16()));
        }
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::liveness::FakeProbe;
    use crate::registry::SessionRegistry;
    use crate::server::{self, ServerState};
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::get;
    use std::sync::atomic::AtomicBool;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn reads_health_and_sessions() {
        let registry = SessionRegistry::with_env(
            Arc::new(ManualClock::new(1_000)),
            Arc::new(FakeProbe::with_alive([5])),
        );
        let state = ServerState::new(
            Arc::new(Mutex::new(registry)),
            Arc::new(AtomicBool::new(false)),
        );
        let listener = server::bind(0).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(server::serve(listener, state, std::future::pending()));

        let client = DaemonClient::new(port);
        let health = client.health().await.unwrap();
        assert!(!health.connected);
        assert_eq!(health.sessions, 0);
        assert!(client.sessions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn non_ok_status_is_an_error() {
        // something else owns the port and answers 500
        let app = Router::new().route("/health", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move { axum::serve(listener, app).await });

        let err = DaemonClient::new(port).health().await.unwrap_err();
        assert!(matches!(err, Error::Status(500)));
    }

    #[tokio::test]
    async fn refused_connection_is_a_request_error() {
        let port = {
            let spare = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            spare.local_addr().unwrap().port()
        };
        let err = DaemonClient::new(port).health().await.unwrap_err();
        assert!(matches!(err, Error::Request(ref e) if e.is_connect()));
    }
}
