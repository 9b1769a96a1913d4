//! Clients for the face recognition service.
//!
//! The service exposes `GET /health`, `POST /identify` (JPEG body) and
//! `GET /visitors`. `/identify` answers `200 {"identity": "name"}` for an
//! enrolled visitor, `200 {"identity": null}` for a stranger and
//! `422 {"error": "no_face"}` when no face was found.

use super::traits::{CapturedImage, Identity, Recognizer, WhitelistStore};
use crate::config::RecognitionConfig;
use crate::error::RecognitionError;
use crate::recovery::{retry_with_backoff, RecoveryAction, RecoveryConfig, RecoveryManager};
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{header, StatusCode};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
struct IdentifyResponse {
    #[serde(default)]
    identity: Option<String>,
    #[serde(default)]
    identities: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VisitorList {
    visitors: Vec<String>,
}

fn build_client(config: &RecognitionConfig) -> Result<reqwest::Client, RecognitionError> {
    reqwest::Client::builder()
        .timeout(config.timeout())
        .build()
        .map_err(|e| RecognitionError::Other(format!("HTTP client: {}", e)))
}

fn transport_error(e: reqwest::Error) -> RecognitionError {
    RecognitionError::Other(e.to_string())
}

/// Map an `/identify` response onto the cycle's branches
pub(crate) fn interpret_identify(
    status: StatusCode,
    body: &str,
) -> Result<Identity, RecognitionError> {
    if status.is_success() {
        let response: IdentifyResponse = serde_json::from_str(body)
            .map_err(|e| RecognitionError::Other(format!("malformed response: {}", e)))?;
        return response
            .identity
            .or_else(|| response.identities.into_iter().next())
            .map(Identity::new)
            .ok_or(RecognitionError::NotWhitelisted);
    }

    let parsed = serde_json::from_str::<ErrorResponse>(body).ok();
    match parsed {
        Some(error) if status == StatusCode::UNPROCESSABLE_ENTITY && error.error == "no_face" => {
            Err(RecognitionError::NoFaceDetected)
        }
        Some(error) => Err(RecognitionError::Service(
            error.message.unwrap_or(error.error),
        )),
        None if body.trim().is_empty() => Err(RecognitionError::Service(status.to_string())),
        None => Err(RecognitionError::Service(format!(
            "{}: {}",
            status,
            body.trim()
        ))),
    }
}

pub struct HttpRecognizer {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    ready: AtomicBool,
}

impl HttpRecognizer {
    pub fn new(config: &RecognitionConfig) -> Result<Self, RecognitionError> {
        Ok(Self::with_client(
            build_client(config)?,
            &config.service_url,
            config.api_key.clone(),
        ))
    }

    pub fn with_client(client: reqwest::Client, base_url: &str, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            ready: AtomicBool::new(false),
        }
    }

    /// Wait for the service to answer its health check, backing off between
    /// attempts. The recognizer reports ready once this succeeds.
    pub async fn initialize(&self, recovery: RecoveryConfig) -> Result<(), RecognitionError> {
        info!("Waiting for recognition service at {}", self.base_url);
        retry_with_backoff("recognizer", recovery, || self.probe_health()).await?;
        self.ready.store(true, Ordering::SeqCst);
        info!("Recognition service ready");
        Ok(())
    }

    async fn probe_health(&self) -> Result<(), RecognitionError> {
        let response = self
            .authorized(self.client.get(format!("{}/health", self.base_url)))
            .send()
            .await
            .map_err(transport_error)?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(RecognitionError::Service(format!(
                "health check returned {}",
                response.status()
            )))
        }
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

#[async_trait]
impl Recognizer for HttpRecognizer {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn identify(&self, image: &CapturedImage) -> Result<Identity, RecognitionError> {
        let response = self
            .authorized(self.client.post(format!("{}/identify", self.base_url)))
            .header(header::CONTENT_TYPE, image.content_type)
            .body(image.data.clone())
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        debug!("Identify answered {}", status);
        interpret_identify(status, &body)
    }
}

/// Clears the refreshing flag however the refresh ends
struct RefreshingFlag<'a>(&'a AtomicBool);

impl<'a> RefreshingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for RefreshingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Enrolled visitor list, mirrored from the recognition service
pub struct ServiceWhitelist {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    ready: AtomicBool,
    refreshing: AtomicBool,
    visitors: RwLock<Vec<String>>,
}

impl ServiceWhitelist {
    pub fn new(config: &RecognitionConfig) -> Result<Self, RecognitionError> {
        Ok(Self::with_client(
            build_client(config)?,
            &config.service_url,
            config.api_key.clone(),
        ))
    }

    pub fn with_client(client: reqwest::Client, base_url: &str, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            ready: AtomicBool::new(false),
            refreshing: AtomicBool::new(false),
            visitors: RwLock::new(Vec::new()),
        }
    }

    pub fn visitors(&self) -> Vec<String> {
        self.visitors.read().clone()
    }

    /// Fetch the visitor list once. Cycles are suppressed while this runs.
    pub async fn refresh(&self) -> Result<usize, RecognitionError> {
        let _flag = RefreshingFlag::raise(&self.refreshing);

        let mut request = self.client.get(format!("{}/visitors", self.base_url));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(RecognitionError::Service(format!(
                "visitor list returned {}",
                status
            )));
        }

        let list: VisitorList = response
            .json()
            .await
            .map_err(|e| RecognitionError::Other(format!("malformed visitor list: {}", e)))?;

        let count = list.visitors.len();
        *self.visitors.write() = list.visitors;
        self.ready.store(true, Ordering::SeqCst);
        info!("Whitelist refreshed, {} visitors enrolled", count);
        Ok(count)
    }

    /// Refresh immediately and then every `interval` until cancelled.
    /// A failed refresh is retried on the backoff schedule of `recovery`
    /// before falling back to the regular interval.
    pub async fn run_refresh_loop(
        self: Arc<Self>,
        interval: Duration,
        recovery: RecoveryConfig,
        cancel: CancellationToken,
    ) {
        let mut recovery = RecoveryManager::with_config(recovery);
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Whitelist refresh loop stopped");
                    break;
                }
                _ = ticker.tick() => match self.refresh().await {
                    Ok(_) => recovery.reset_retry_count("whitelist"),
                    Err(e) => {
                        warn!("Whitelist refresh failed: {}", e);
                        if let RecoveryAction::RetryAfterDelay(delay) =
                            recovery.handle_error("whitelist", &e)
                        {
                            ticker.reset_after(delay);
                        }
                    }
                },
            }
        }
    }
}

impl WhitelistStore for ServiceWhitelist {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response per accepted connection
    async fn canned_server(responses: Vec<(u16, &'static str)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = vec![0u8; 16 * 1024];
                let _ = socket.read(&mut buf).await;
                let reply = format!(
                    "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
                let _ = socket.shutdown().await;
            }
        });

        format!("http://{}", addr)
    }

    fn local_client() -> reqwest::Client {
        reqwest::Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap()
    }

    fn quick_recovery() -> RecoveryConfig {
        RecoveryConfig {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            exponential_backoff: true,
        }
    }

    #[test]
    fn test_interpret_identity() {
        let identity = interpret_identify(StatusCode::OK, r#"{"identity":"alice"}"#).unwrap();
        assert_eq!(identity, Identity::new("alice"));

        let identity =
            interpret_identify(StatusCode::OK, r#"{"identities":["bob","carol"]}"#).unwrap();
        assert_eq!(identity, Identity::new("bob"));
    }

    #[test]
    fn test_interpret_stranger() {
        assert_eq!(
            interpret_identify(StatusCode::OK, r#"{"identity":null}"#),
            Err(RecognitionError::NotWhitelisted)
        );
    }

    #[test]
    fn test_interpret_no_face() {
        assert_eq!(
            interpret_identify(StatusCode::UNPROCESSABLE_ENTITY, r#"{"error":"no_face"}"#),
            Err(RecognitionError::NoFaceDetected)
        );
    }

    #[test]
    fn test_interpret_service_errors() {
        assert_eq!(
            interpret_identify(
                StatusCode::INTERNAL_SERVER_ERROR,
                r#"{"error":"quota","message":"rate limited"}"#
            ),
            Err(RecognitionError::Service("rate limited".to_string()))
        );
        assert_eq!(
            interpret_identify(StatusCode::BAD_GATEWAY, "upstream down"),
            Err(RecognitionError::Service("502 Bad Gateway: upstream down".to_string()))
        );
        assert!(matches!(
            interpret_identify(StatusCode::OK, "not json"),
            Err(RecognitionError::Other(_))
        ));
    }

    #[tokio::test]
    async fn test_initialize_retries_health_check() {
        let url = canned_server(vec![(503, ""), (200, "{}")]).await;
        let recognizer = HttpRecognizer::with_client(local_client(), &url, None);
        assert!(!recognizer.is_ready());

        recognizer.initialize(quick_recovery()).await.unwrap();
        assert!(recognizer.is_ready());
    }

    #[tokio::test]
    async fn test_identify_over_http() {
        let url = canned_server(vec![(200, r#"{"identity":"alice"}"#)]).await;
        let recognizer = HttpRecognizer::with_client(local_client(), &url, Some("k".into()));

        let identity = recognizer
            .identify(&CapturedImage::jpeg(vec![0xff, 0xd8]))
            .await
            .unwrap();
        assert_eq!(identity.name, "alice");
    }

    #[tokio::test]
    async fn test_unreachable_service_is_other_failure() {
        let recognizer = HttpRecognizer::with_client(local_client(), "http://127.0.0.1:1", None);
        let result = recognizer.identify(&CapturedImage::jpeg(vec![1])).await;
        assert!(matches!(result, Err(RecognitionError::Other(_))));
    }

    #[tokio::test]
    async fn test_whitelist_refresh() {
        let url = canned_server(vec![(200, r#"{"visitors":["alice","bob"]}"#)]).await;
        let whitelist = ServiceWhitelist::with_client(local_client(), &url, None);
        assert!(!whitelist.accepts_cycles());

        assert_eq!(whitelist.refresh().await.unwrap(), 2);
        assert!(whitelist.is_ready());
        assert!(!whitelist.is_refreshing());
        assert_eq!(whitelist.visitors(), vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn test_refresh_loop_retries_before_next_interval() {
        let url = canned_server(vec![(500, ""), (200, r#"{"visitors":["alice"]}"#)]).await;
        let whitelist = Arc::new(ServiceWhitelist::with_client(local_client(), &url, None));
        let cancel = CancellationToken::new();

        let refresh = tokio::spawn(Arc::clone(&whitelist).run_refresh_loop(
            Duration::from_secs(3600),
            quick_recovery(),
            cancel.clone(),
        ));

        for _ in 0..100 {
            if whitelist.is_ready() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(whitelist.is_ready());
        assert_eq!(whitelist.visitors(), vec!["alice"]);

        cancel.cancel();
        refresh.await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_refresh_clears_flag() {
        let url = canned_server(vec![(500, "")]).await;
        let whitelist = ServiceWhitelist::with_client(local_client(), &url, None);

        assert!(whitelist.refresh().await.is_err());
        assert!(!whitelist.is_refreshing());
        assert!(!whitelist.is_ready());
    }
}
