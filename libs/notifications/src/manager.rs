//! Opt-in/opt-out lifecycle of the push side channel.
//!
//! Independent of reservation state. The enabled flag is persisted in the
//! client state and only changes once a whole enable or disable sequence has
//! run.

use std::sync::Arc;

use client_state::ClientStateStore;
use tracing::{debug, info, warn};

use crate::backend::SubscriptionBackend;
use crate::error::NotificationResult;
use crate::metrics::SUBSCRIPTION_CHANGES;
use crate::models::decode_public_key;
use crate::platform::{Permission, PushPlatform};

#[derive(Debug, Clone)]
pub struct NotificationSubscriptionManager {
    platform: Arc<dyn PushPlatform>,
    backend: Arc<dyn SubscriptionBackend>,
    state: ClientStateStore,
}

impl NotificationSubscriptionManager {
    pub fn new(
        platform: Arc<dyn PushPlatform>,
        backend: Arc<dyn SubscriptionBackend>,
        state: ClientStateStore,
    ) -> Self {
        Self {
            platform,
            backend,
            state,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.state.notifications_enabled()
    }

    /// Restore the persisted flag at session start. The backend is not
    /// consulted.
    pub fn restore(&self) -> bool {
        let enabled = self.state.notifications_enabled();
        debug!(enabled, "restored notification preference");
        enabled
    }

    /// Subscribe and register with the backend. Returns `Ok(false)` if
    /// permission was denied; nothing changes in that case.
    pub async fn enable(&self) -> NotificationResult<bool> {
        let result = self.try_enable().await;
        let label = match &result {
            Ok(true) => "ok",
            Ok(false) => "denied",
            Err(_) => "error",
        };
        SUBSCRIPTION_CHANGES.with_label_values(&["enable", label]).inc();
        result
    }

    async fn try_enable(&self) -> NotificationResult<bool> {
        if self.platform.request_permission().await? == Permission::Denied {
            info!("notification permission denied");
            return Ok(false);
        }
        let public_key = self.backend.fetch_public_key().await?;
        let key = decode_public_key(&public_key)?;

        let existing = self.platform.current_subscription().await?;
        let fresh = existing.is_none();
        let subscription = match existing {
            Some(subscription) => subscription,
            None => self.platform.subscribe(&key).await?,
        };

        if let Err(err) = self.backend.register(&subscription).await {
            if fresh {
                if let Err(rollback) = self.platform.unsubscribe(&subscription).await {
                    warn!(?rollback, "failed to roll back push subscription");
                }
            }
            return Err(err);
        }

        self.state.set_notifications_enabled(true)?;
        info!(endpoint = %subscription.endpoint, "notifications enabled");
        Ok(true)
    }

    /// Unregister and unsubscribe. Backend failures are logged; the flag is
    /// cleared regardless.
    pub async fn disable(&self) -> NotificationResult<()> {
        let result = self.try_disable().await;
        let label = if result.is_ok() { "ok" } else { "error" };
        SUBSCRIPTION_CHANGES.with_label_values(&["disable", label]).inc();
        result
    }

    async fn try_disable(&self) -> NotificationResult<()> {
        let outcome = self.unsubscribe_current().await;
        self.state.set_notifications_enabled(false)?;
        info!("notifications disabled");
        outcome
    }

    async fn unsubscribe_current(&self) -> NotificationResult<()> {
        let Some(subscription) = self.platform.current_subscription().await? else {
            debug!("no push subscription to remove");
            return Ok(());
        };
        if let Err(err) = self.backend.unregister(&subscription.endpoint).await {
            warn!(?err, endpoint = %subscription.endpoint, "failed to unregister push subscription");
        }
        self.platform.unsubscribe(&subscription).await
    }

    /// Flip the current preference. Returns the new flag.
    pub async fn toggle(&self) -> NotificationResult<bool> {
        if self.is_enabled() {
            self.disable().await?;
            Ok(false)
        } else {
            self.enable().await
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use parking_lot::Mutex;
    use tracing_test::traced_test;

    use super::*;
    use crate::error::NotificationError;
    use crate::models::{PlatformSubscription, SubscriptionKeys};

    #[derive(Debug, Default)]
    struct FakePlatform {
        deny: bool,
        current: Mutex<Option<PlatformSubscription>>,
        subscribes: Mutex<u32>,
    }

    #[async_trait]
    impl PushPlatform for FakePlatform {
        async fn request_permission(&self) -> NotificationResult<Permission> {
            Ok(if self.deny {
                Permission::Denied
            } else {
                Permission::Granted
            })
        }

        async fn subscribe(&self, key: &[u8]) -> NotificationResult<PlatformSubscription> {
            assert_eq!(key[0], 4);
            *self.subscribes.lock() += 1;
            let sub = PlatformSubscription {
                endpoint: "https://push.example/raya".into(),
                expiration_time: None,
                keys: SubscriptionKeys {
                    p256dh: "BPk".into(),
                    auth: "xyz".into(),
                },
            };
            *self.current.lock() = Some(sub.clone());
            Ok(sub)
        }

        async fn current_subscription(&self) -> NotificationResult<Option<PlatformSubscription>> {
            Ok(self.current.lock().clone())
        }

        async fn unsubscribe(&self, _: &PlatformSubscription) -> NotificationResult<()> {
            *self.current.lock() = None;
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct FakeBackend {
        bad_key: bool,
        fail_register: bool,
        fail_unregister: bool,
        registered: Mutex<Vec<String>>,
        unregistered: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SubscriptionBackend for FakeBackend {
        async fn fetch_public_key(&self) -> NotificationResult<String> {
            if self.bad_key {
                return Ok("***".into());
            }
            let raw: Vec<u8> = std::iter::once(4u8).chain(1..=64).collect();
            Ok(URL_SAFE_NO_PAD.encode(raw))
        }

        async fn register(&self, sub: &PlatformSubscription) -> NotificationResult<()> {
            if self.fail_register {
                return Err(NotificationError::Status {
                    status: 500,
                    path: "/api/subscribe".into(),
                });
            }
            self.registered.lock().push(sub.endpoint.clone());
            Ok(())
        }

        async fn unregister(&self, endpoint: &str) -> NotificationResult<()> {
            if self.fail_unregister {
                return Err(NotificationError::Backend("connection refused".into()));
            }
            self.unregistered.lock().push(endpoint.to_owned());
            Ok(())
        }
    }

    fn manager(
        platform: FakePlatform,
        backend: FakeBackend,
    ) -> (NotificationSubscriptionManager, Arc<FakePlatform>, Arc<FakeBackend>) {
        let platform = Arc::new(platform);
        let backend = Arc::new(backend);
        let manager = NotificationSubscriptionManager::new(
            platform.clone(),
            backend.clone(),
            ClientStateStore::in_memory(),
        );
        (manager, platform, backend)
    }

    #[tokio::test]
    async fn test_enable_then_disable() {
        let (manager, platform, backend) = manager(FakePlatform::default(), FakeBackend::default());
        assert!(!manager.restore());

        assert!(manager.enable().await.unwrap());
        assert!(manager.is_enabled());
        assert_eq!(backend.registered.lock().len(), 1);
        assert!(platform.current.lock().is_some());

        manager.disable().await.unwrap();
        assert!(!manager.is_enabled());
        assert_eq!(
            *backend.unregistered.lock(),
            vec!["https://push.example/raya".to_string()]
        );
        assert!(platform.current.lock().is_none());
    }

    #[tokio::test]
    async fn test_permission_denied_changes_nothing() {
        let platform = FakePlatform {
            deny: true,
            ..Default::default()
        };
        let (manager, platform, backend) = manager(platform, FakeBackend::default());
        assert!(!manager.enable().await.unwrap());
        assert!(!manager.is_enabled());
        assert_eq!(*platform.subscribes.lock(), 0);
        assert!(backend.registered.lock().is_empty());
    }

    #[tokio::test]
    async fn test_bad_key_aborts_enable() {
        let backend = FakeBackend {
            bad_key: true,
            ..Default::default()
        };
        let (manager, platform, _backend) = manager(FakePlatform::default(), backend);
        assert!(matches!(
            manager.enable().await,
            Err(NotificationError::KeyDecode(_))
        ));
        assert!(!manager.is_enabled());
        assert_eq!(*platform.subscribes.lock(), 0);
    }

    #[tokio::test]
    async fn test_failed_registration_rolls_back_subscription() {
        let backend = FakeBackend {
            fail_register: true,
            ..Default::default()
        };
        let (manager, platform, _backend) = manager(FakePlatform::default(), backend);
        let err = manager.enable().await.unwrap_err();
        assert!(err.is_remote());
        assert!(!manager.is_enabled());
        assert_eq!(*platform.subscribes.lock(), 1);
        assert!(platform.current.lock().is_none());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_disable_survives_backend_failure() {
        let backend = FakeBackend {
            fail_unregister: true,
            ..Default::default()
        };
        let (manager, platform, _backend) = manager(FakePlatform::default(), backend);
        manager.enable().await.unwrap();
        manager.disable().await.unwrap();
        assert!(!manager.is_enabled());
        assert!(platform.current.lock().is_none());
        assert!(logs_contain("failed to unregister push subscription"));
    }

    #[tokio::test]
    async fn test_toggle_flips_flag() {
        let (manager, _platform, _backend) = manager(FakePlatform::default(), FakeBackend::default());
        assert!(manager.toggle().await.unwrap());
        assert!(!manager.toggle().await.unwrap());
        assert!(!manager.is_enabled());
    }

    #[tokio::test]
    async fn test_existing_subscription_is_reused() {
        let (manager, platform, backend) = manager(FakePlatform::default(), FakeBackend::default());
        manager.enable().await.unwrap();
        manager.state.set_notifications_enabled(false).unwrap();
        manager.enable().await.unwrap();
        assert_eq!(*platform.subscribes.lock(), 1);
        assert_eq!(backend.registered.lock().len(), 2);
    }
}
