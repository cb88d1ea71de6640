//! Online/offline detection gating queue drains.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chat_core::PipelineConfig;

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_online(&self) -> bool;
}

/// Reachability check: any HTTP response from the probe URL counts as online.
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>) -> reqwest::Result<Self> {
        Self::with_timeout(url, PROBE_TIMEOUT)
    }

    /// Probe that gives up on the URL after `timeout`.
    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn from_config(config: &PipelineConfig) -> reqwest::Result<Self> {
        Self::new(config.connectivity_url.clone())
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn is_online(&self) -> bool {
        match self.client.head(&self.url).send().await {
            Ok(response) => {
                log::debug!("Connectivity probe answered {}", response.status());
                true
            }
            Err(e) => {
                log::debug!("Connectivity probe failed: {}", e);
                false
            }
        }
    }
}

/// Fixed answer, switchable at runtime. Useful for embedding and tests.
#[derive(Debug)]
pub struct StaticProbe {
    online: AtomicBool,
}

impl StaticProbe {
    pub fn online() -> Self {
        Self {
            online: AtomicBool::new(true),
        }
    }

    pub fn offline() -> Self {
        Self {
            online: AtomicBool::new(false),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConnectivityProbe for StaticProbe {
    async fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_http_probe_online() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let probe = HttpProbe::new(format!("{}/generate_204", server.uri())).unwrap();
        assert!(probe.is_online().await);
    }

    #[tokio::test]
    async fn test_http_probe_error_status_still_online() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let probe = HttpProbe::new(server.uri()).unwrap();
        assert!(probe.is_online().await);
    }

    #[tokio::test]
    async fn test_http_probe_unreachable() {
        // Bind then release a port so nothing is listening on it
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();

        let probe = HttpProbe::new(format!("http://127.0.0.1:{}", port)).unwrap();
        assert!(!probe.is_online().await);
    }

    #[tokio::test]
    async fn test_http_probe_slow_answer_is_offline() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(204).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let probe = HttpProbe::with_timeout(server.uri(), Duration::from_millis(100)).unwrap();
        assert!(!probe.is_online().await);
    }

    #[tokio::test]
    async fn test_static_probe_toggles() {
        let probe = StaticProbe::offline();
        assert!(!probe.is_online().await);
        probe.set_online(true);
        assert!(probe.is_online().await);
    }
}
