//! The push subscription backend seam.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use tracing::debug;

use crate::error::{NotificationError, NotificationResult};
use crate::models::{PlatformSubscription, PublicKeyResponse, UnsubscribeRequest};

pub const PUBLIC_KEY_PATH: &str = "/api/vapidPublicKey";
pub const SUBSCRIBE_PATH: &str = "/api/subscribe";
pub const UNSUBSCRIBE_PATH: &str = "/api/unsubscribe";

/// Server side of the push subscription lifecycle.
#[async_trait]
pub trait SubscriptionBackend: Send + Sync + fmt::Debug + 'static {
    /// Fetch the base64url application server public key.
    async fn fetch_public_key(&self) -> NotificationResult<String>;

    /// Register a subscription so the backend can push to it.
    async fn register(&self, subscription: &PlatformSubscription) -> NotificationResult<()>;

    /// Forget the subscription for `endpoint`.
    async fn unregister(&self, endpoint: &str) -> NotificationResult<()>;
}

/// HTTP implementation of [`SubscriptionBackend`].
#[derive(Clone)]
pub struct HttpSubscriptionBackend {
    client: Client,
    public_key_url: Url,
    subscribe_url: Url,
    unsubscribe_url: Url,
}

impl HttpSubscriptionBackend {
    pub fn new(base_url: &str, request_timeout: Duration) -> NotificationResult<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| NotificationError::Backend(format!("failed to build http client: {e}")))?;
        Self::with_client(client, base_url)
    }

    pub fn with_client(client: Client, base_url: &str) -> NotificationResult<Self> {
        let base = base_url.trim_end_matches('/');
        let url = |path: &str| {
            Url::parse(&format!("{base}{path}"))
                .map_err(|e| NotificationError::Backend(format!("invalid url '{base}{path}': {e}")))
        };
        Ok(Self {
            client,
            public_key_url: url(PUBLIC_KEY_PATH)?,
            subscribe_url: url(SUBSCRIBE_PATH)?,
            unsubscribe_url: url(UNSUBSCRIBE_PATH)?,
        })
    }
}

fn check_status(status: StatusCode, url: &Url) -> NotificationResult<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(NotificationError::Status {
            status: status.as_u16(),
            path: url.path().to_string(),
        })
    }
}

#[async_trait]
impl SubscriptionBackend for HttpSubscriptionBackend {
    async fn fetch_public_key(&self) -> NotificationResult<String> {
        let resp = self.client.get(self.public_key_url.clone()).send().await?;
        check_status(resp.status(), &self.public_key_url)?;
        let body: PublicKeyResponse = resp.json().await?;
        Ok(body.public_key)
    }

    async fn register(&self, subscription: &PlatformSubscription) -> NotificationResult<()> {
        debug!(endpoint = %subscription.endpoint, "registering push subscription");
        let resp = self
            .client
            .post(self.subscribe_url.clone())
            .json(subscription)
            .send()
            .await?;
        check_status(resp.status(), &self.subscribe_url)
    }

    async fn unregister(&self, endpoint: &str) -> NotificationResult<()> {
        debug!(%endpoint, "unregistering push subscription");
        let resp = self
            .client
            .delete(self.unsubscribe_url.clone())
            .json(&UnsubscribeRequest { endpoint })
            .send()
            .await?;
        check_status(resp.status(), &self.unsubscribe_url)
    }
}

impl fmt::Debug for HttpSubscriptionBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpSubscriptionBackend")
            .field("subscribe_url", &self.subscribe_url.as_str())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls_keep_base_path() {
        let backend =
            HttpSubscriptionBackend::new("https://garden.example/prefix/", Duration::from_secs(1))
                .unwrap();
        assert_eq!(
            backend.public_key_url.as_str(),
            "https://garden.example/prefix/api/vapidPublicKey"
        );
        assert_eq!(
            backend.unsubscribe_url.as_str(),
            "https://garden.example/prefix/api/unsubscribe"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(HttpSubscriptionBackend::new("not a url", Duration::from_secs(1)).is_err());
    }
}
