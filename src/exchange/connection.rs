//! Pooled HTTP/WebSocket channel to one exchange.
//!
//! The HTTP client is built on first use and shared by every caller. Requests
//! are retried with exponential backoff on transport failures only; protocol
//! and domain failures are returned immediately.

use futures_util::{SinkExt, StreamExt};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, instrument, warn};

use super::error::ExchangeError;
use super::types::SubscribeRequest;
use crate::config::ApiConfig;

/// Exponential backoff schedule for request retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles afterwards
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay to wait after the zero-based `attempt` failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(16))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// Network settings for a [`ConnectionManager`].
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub base_url: String,
    pub ws_url: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub heartbeat: Duration,
    pub shutdown_grace: Duration,
    pub retry: RetryPolicy,
}

impl From<&ApiConfig> for ConnectionSettings {
    fn from(config: &ApiConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            ws_url: config.ws_url.clone(),
            connect_timeout: config.connect_timeout(),
            request_timeout: config.request_timeout(),
            heartbeat: config.ws_heartbeat(),
            shutdown_grace: config.shutdown_grace(),
            retry: RetryPolicy {
                max_attempts: config.max_retries.max(1),
                base_delay: config.retry_base_delay(),
            },
        }
    }
}

/// Owns the pooled client for one base URL.
pub struct ConnectionManager {
    settings: ConnectionSettings,
    client: Mutex<Option<Client>>,
    closed: AtomicBool,
}

impl ConnectionManager {
    /// Create a manager; no socket is opened until the first request.
    pub fn new(settings: ConnectionSettings) -> Self {
        Self {
            settings,
            client: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &ApiConfig) -> Self {
        Self::new(ConnectionSettings::from(config))
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Get the shared client, building it on first use.
    fn http(&self) -> Result<Client, ExchangeError> {
        if self.is_closed() {
            return Err(ExchangeError::Closed);
        }

        let mut guard = self
            .client
            .lock()
            .map_err(|_| ExchangeError::Configuration("client handle poisoned".into()))?;

        if let Some(client) = guard.as_ref() {
            return Ok(client.clone());
        }

        let client = Client::builder()
            .connect_timeout(self.settings.connect_timeout)
            .timeout(self.settings.request_timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(30))
            .build()
            .map_err(|e| ExchangeError::Configuration(format!("failed to build HTTP client: {e}")))?;

        debug!(base_url = %self.settings.base_url, "HTTP client opened");
        *guard = Some(client.clone());
        Ok(client)
    }

    /// POST `payload` as JSON to `endpoint` and return the decoded body.
    ///
    /// Transport failures are retried up to the policy's attempt budget with
    /// exponential backoff; everything else is returned on first occurrence.
    /// An empty successful body yields `Value::Null`.
    #[instrument(skip(self, payload), name = "exchange_request")]
    pub async fn request<P>(&self, endpoint: &str, payload: &P) -> Result<Value, ExchangeError>
    where
        P: Serialize + ?Sized,
    {
        let url = format!("{}{}", self.settings.base_url, endpoint);
        let policy = self.settings.retry;
        let mut last_error = String::from("no attempt made");

        for attempt in 0..policy.max_attempts {
            let client = self.http()?;

            match Self::send_once(&client, &url, payload).await {
                Ok(value) => return Ok(value),
                Err(ExchangeError::Transport { message, .. }) => {
                    warn!(
                        endpoint = %endpoint,
                        attempt = attempt + 1,
                        max_attempts = policy.max_attempts,
                        error = %message,
                        "Request attempt failed"
                    );
                    last_error = message;
                }
                Err(other) => return Err(other),
            }

            if attempt + 1 < policy.max_attempts {
                tokio::time::sleep(policy.delay_for(attempt)).await;
            }
        }

        Err(ExchangeError::Transport {
            attempts: policy.max_attempts,
            message: last_error,
        })
    }

    async fn send_once<P>(client: &Client, url: &str, payload: &P) -> Result<Value, ExchangeError>
    where
        P: Serialize + ?Sized,
    {
        let response = client.post(url).json(payload).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("HTTP {status}: {}", truncate(&body, 200));
            return if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                Err(ExchangeError::transport(message))
            } else {
                Err(ExchangeError::Protocol(message))
            };
        }

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&body)
            .map_err(|e| ExchangeError::Protocol(format!("response is not JSON: {e}")))
    }

    /// Open one long-lived WebSocket and send `subscriptions` on it.
    ///
    /// Reconnecting is the caller's job.
    #[instrument(skip(self, subscriptions), fields(count = subscriptions.len()))]
    pub async fn subscribe(
        &self,
        subscriptions: &[SubscribeRequest],
    ) -> Result<TradeFeed, ExchangeError> {
        if self.is_closed() {
            return Err(ExchangeError::Closed);
        }

        let (mut stream, _) = tokio::time::timeout(
            self.settings.connect_timeout,
            connect_async(self.settings.ws_url.as_str()),
        )
        .await
        .map_err(|_| ExchangeError::transport("WebSocket connect timed out"))??;

        for subscription in subscriptions {
            let text = serde_json::to_string(subscription)
                .map_err(|e| ExchangeError::Protocol(e.to_string()))?;
            stream.send(Message::Text(text.into())).await?;
        }

        info!(url = %self.settings.ws_url, "WebSocket connected and subscribed");

        Ok(TradeFeed {
            stream,
            heartbeat: self.settings.heartbeat,
            awaiting_pong: false,
        })
    }

    /// Release the pooled client. No request is issued after this returns.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let dropped = self
            .client
            .lock()
            .map(|mut guard| guard.take().is_some())
            .unwrap_or(false);

        if dropped {
            // Let pooled sockets finish their shutdown before the runtime exits.
            tokio::time::sleep(self.settings.shutdown_grace).await;
        }

        info!("Connection manager closed");
    }
}

/// A subscribed WebSocket yielding raw text messages.
pub struct TradeFeed {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    heartbeat: Duration,
    awaiting_pong: bool,
}

impl TradeFeed {
    /// Next text payload. `None` means the server closed the socket.
    ///
    /// Idle periods trigger a ping; a second idle period without any frame is
    /// reported as a transport error.
    pub async fn next_message(&mut self) -> Option<Result<String, ExchangeError>> {
        loop {
            let frame = match tokio::time::timeout(self.heartbeat, self.stream.next()).await {
                Ok(frame) => frame,
                Err(_) => {
                    if self.awaiting_pong {
                        return Some(Err(ExchangeError::transport("heartbeat timed out")));
                    }
                    self.awaiting_pong = true;
                    if let Err(e) = self.stream.send(Message::Ping(Vec::new().into())).await {
                        return Some(Err(e.into()));
                    }
                    continue;
                }
            };

            self.awaiting_pong = false;

            match frame? {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => debug!("Dropping non-UTF-8 binary frame"),
                },
                Ok(Message::Ping(payload)) => {
                    if let Err(e) = self.stream.send(Message::Pong(payload)).await {
                        return Some(Err(e.into()));
                    }
                }
                Ok(Message::Close(_)) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    /// Send a close frame; errors are irrelevant at this point.
    pub async fn close(mut self) {
        let _ = self.stream.close(None).await;
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(base_url: &str) -> ConnectionSettings {
        ConnectionSettings {
            base_url: base_url.to_string(),
            ws_url: "ws://127.0.0.1:1/ws".to_string(),
            connect_timeout: Duration::from_millis(100),
            request_timeout: Duration::from_millis(100),
            heartbeat: Duration::from_secs(20),
            shutdown_grace: Duration::from_millis(1),
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(10),
            },
        }
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
    }

    #[test]
    fn test_settings_from_config() {
        let settings = ConnectionSettings::from(&ApiConfig::default());
        assert_eq!(settings.retry, RetryPolicy::default());
        assert_eq!(settings.connect_timeout, Duration::from_secs(10));
        assert!(!settings.base_url.ends_with('/'));
    }

    #[tokio::test]
    async fn test_successful_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/info"))
            .and(body_json(json!({"type": "meta"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"universe": []})))
            .expect(1)
            .mount(&server)
            .await;

        let manager = ConnectionManager::new(settings(&server.uri()));
        let value = manager
            .request("/info", &json!({"type": "meta"}))
            .await
            .unwrap();
        assert_eq!(value, json!({"universe": []}));
    }

    #[tokio::test]
    async fn test_timeouts_exhaust_retry_budget() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let settings = settings(&server.uri());
        let base = settings.retry.base_delay;
        let floor = settings.request_timeout * 3 + base + base * 2;
        let manager = ConnectionManager::new(settings);

        let started = std::time::Instant::now();
        let err = manager
            .request("/info", &json!({"type": "allMids"}))
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, ExchangeError::Transport { attempts: 3, .. }));
        // Three timed-out attempts plus the 10ms and 20ms backoff sleeps
        assert!(elapsed >= floor, "retries finished after {elapsed:?}, expected at least {floor:?}");
        let received = server.received_requests().await.unwrap();
        assert_eq!(received.len(), 3);
    }

    #[tokio::test]
    async fn test_server_error_then_success_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"BTC": "1"})))
            .with_priority(2)
            .mount(&server)
            .await;

        let manager = ConnectionManager::new(settings(&server.uri()));
        let value = manager
            .request("/info", &json!({"type": "allMids"}))
            .await
            .unwrap();
        assert_eq!(value["BTC"], "1");
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422).set_body_string("bad coin"))
            .mount(&server)
            .await;

        let manager = ConnectionManager::new(settings(&server.uri()));
        let err = manager
            .request("/info", &json!({"type": "l2Book", "coin": "NOPE"}))
            .await
            .unwrap_err();

        assert!(matches!(err, ExchangeError::Protocol(_)));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_non_json_body_is_protocol_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let manager = ConnectionManager::new(settings(&server.uri()));
        let err = manager.request("/info", &json!({})).await.unwrap_err();
        assert!(matches!(err, ExchangeError::Protocol(_)));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_body_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let manager = ConnectionManager::new(settings(&server.uri()));
        let value = manager.request("/info", &json!({})).await.unwrap();
        assert_eq!(value, Value::Null);
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_no_io_after_close() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let manager = ConnectionManager::new(settings(&server.uri()));
        manager.request("/info", &json!({})).await.unwrap();
        manager.close().await;

        assert!(manager.is_closed());
        let err = manager.request("/info", &json!({})).await.unwrap_err();
        assert!(matches!(err, ExchangeError::Closed));
        assert!(matches!(
            manager.subscribe(&[]).await,
            Err(ExchangeError::Closed)
        ));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }
}
