//! The platform push service seam.

use std::fmt;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{NotificationError, NotificationResult};
use crate::models::{PlatformSubscription, SubscriptionKeys};

/// Outcome of a permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Granted,
    Denied,
}

/// Platform push subscription management.
#[async_trait]
pub trait PushPlatform: Send + Sync + fmt::Debug + 'static {
    /// Ask for permission to show notifications.
    async fn request_permission(&self) -> NotificationResult<Permission>;

    /// Create a subscription bound to `application_server_key`.
    async fn subscribe(&self, application_server_key: &[u8])
    -> NotificationResult<PlatformSubscription>;

    /// The existing subscription, if any.
    async fn current_subscription(&self) -> NotificationResult<Option<PlatformSubscription>>;

    /// Remove `subscription` from the platform.
    async fn unsubscribe(&self, subscription: &PlatformSubscription) -> NotificationResult<()>;
}

/// Platform backed by a push endpoint and keys supplied in configuration.
///
/// Permission is granted only when an endpoint is configured.
pub struct ConfiguredPlatform {
    endpoint: Option<String>,
    keys: SubscriptionKeys,
    current: Mutex<Option<PlatformSubscription>>,
}

impl ConfiguredPlatform {
    pub fn new(endpoint: Option<String>, keys: SubscriptionKeys) -> Self {
        Self {
            endpoint: endpoint.filter(|e| !e.is_empty()),
            keys,
            current: Mutex::new(None),
        }
    }

    /// Platform that always refuses permission.
    pub fn disabled() -> Self {
        Self::new(
            None,
            SubscriptionKeys {
                p256dh: String::new(),
                auth: String::new(),
            },
        )
    }

    /// Treat `subscription` as already present, e.g. after a restart with
    /// notifications enabled.
    pub fn adopt(&self, subscription: PlatformSubscription) {
        *self.current.lock() = Some(subscription);
    }
}

#[async_trait]
impl PushPlatform for ConfiguredPlatform {
    async fn request_permission(&self) -> NotificationResult<Permission> {
        Ok(match self.endpoint {
            Some(_) => Permission::Granted,
            None => Permission::Denied,
        })
    }

    async fn subscribe(
        &self,
        application_server_key: &[u8],
    ) -> NotificationResult<PlatformSubscription> {
        let endpoint = self
            .endpoint
            .clone()
            .ok_or_else(|| NotificationError::Platform("no push endpoint configured".into()))?;
        debug!(
            %endpoint,
            key_len = application_server_key.len(),
            "creating push subscription"
        );
        let subscription = PlatformSubscription {
            endpoint,
            expiration_time: None,
            keys: self.keys.clone(),
        };
        *self.current.lock() = Some(subscription.clone());
        Ok(subscription)
    }

    async fn current_subscription(&self) -> NotificationResult<Option<PlatformSubscription>> {
        Ok(self.current.lock().clone())
    }

    async fn unsubscribe(&self, subscription: &PlatformSubscription) -> NotificationResult<()> {
        let mut current = self.current.lock();
        if current
            .as_ref()
            .is_some_and(|c| c.endpoint == subscription.endpoint)
        {
            *current = None;
        }
        Ok(())
    }
}

impl fmt::Debug for ConfiguredPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfiguredPlatform")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> SubscriptionKeys {
        SubscriptionKeys {
            p256dh: "BPk".into(),
            auth: "xyz".into(),
        }
    }

    #[tokio::test]
    async fn test_permission_follows_endpoint() {
        let platform = ConfiguredPlatform::new(Some("https://push.example/1".into()), keys());
        assert_eq!(platform.request_permission().await.unwrap(), Permission::Granted);
        let platform = ConfiguredPlatform::new(Some(String::new()), keys());
        assert_eq!(platform.request_permission().await.unwrap(), Permission::Denied);
        assert_eq!(
            ConfiguredPlatform::disabled().request_permission().await.unwrap(),
            Permission::Denied
        );
    }

    #[tokio::test]
    async fn test_subscribe_and_unsubscribe() {
        let platform = ConfiguredPlatform::new(Some("https://push.example/1".into()), keys());
        assert_eq!(platform.current_subscription().await.unwrap(), None);
        let sub = platform.subscribe(&[4, 1, 2]).await.unwrap();
        assert_eq!(sub.endpoint, "https://push.example/1");
        assert_eq!(platform.current_subscription().await.unwrap(), Some(sub.clone()));
        platform.unsubscribe(&sub).await.unwrap();
        assert_eq!(platform.current_subscription().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_disabled_cannot_subscribe() {
        assert!(ConfiguredPlatform::disabled().subscribe(&[4]).await.is_err());
    }
}
