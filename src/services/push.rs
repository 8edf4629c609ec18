//! Web Push delivery: VAPID configuration, the provider adapter and the
//! concurrent dispatcher used by the reminder triggers.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::config::PushConfig;
use crate::error::{AppError, AppResult};

/// How long the push service should keep an undelivered reminder around.
const PUSH_TTL_SECONDS: u32 = 12 * 60 * 60;

/// Length of an uncompressed P-256 public key (0x04 || X || Y).
const UNCOMPRESSED_P256_LEN: usize = 65;

// ============================================================================
// VAPID configuration
// ============================================================================

/// Validated VAPID credentials. Only constructed through `from_settings`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VapidConfig {
    pub public_key: String,
    private_key: String,
    pub subject: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum VapidError {
    #[error("incomplete VAPID configuration: {0} is missing")]
    Incomplete(&'static str),

    #[error("VAPID public key is not a base64url encoded P-256 point")]
    InvalidPublicKey,

    #[error("VAPID private key is invalid: {0}")]
    InvalidPrivateKey(String),

    #[error("VAPID private key does not match the public key")]
    KeyMismatch,

    #[error("VAPID subject must be a mailto: or https: URI")]
    InvalidSubject,
}

impl VapidConfig {
    /// Validate raw settings once at startup. `Ok(None)` means push is simply
    /// not configured.
    pub fn from_settings(settings: &PushConfig) -> Result<Option<Self>, VapidError> {
        let (public_key, private_key, subject) = match (
            settings.vapid_public_key.as_deref(),
            settings.vapid_private_key.as_deref(),
            settings.vapid_subject.as_deref(),
        ) {
            (None, None, None) => return Ok(None),
            (Some(public), Some(private), Some(subject)) => (public, private, subject),
            (None, _, _) => return Err(VapidError::Incomplete("VAPID_PUBLIC_KEY")),
            (_, None, _) => return Err(VapidError::Incomplete("VAPID_PRIVATE_KEY")),
            (_, _, None) => return Err(VapidError::Incomplete("VAPID_SUBJECT")),
        };

        if !(subject.starts_with("mailto:") || subject.starts_with("https:")) {
            return Err(VapidError::InvalidSubject);
        }

        let public_bytes = decode_base64url(public_key).ok_or(VapidError::InvalidPublicKey)?;
        if public_bytes.len() != UNCOMPRESSED_P256_LEN || public_bytes[0] != 0x04 {
            return Err(VapidError::InvalidPublicKey);
        }

        let derived =
            web_push::VapidSignatureBuilder::from_base64_no_sub(private_key, web_push::URL_SAFE_NO_PAD)
                .map_err(|e| VapidError::InvalidPrivateKey(e.to_string()))?
                .get_public_key();
        if derived != public_bytes {
            return Err(VapidError::KeyMismatch);
        }

        Ok(Some(Self {
            public_key: public_key.to_string(),
            private_key: private_key.to_string(),
            subject: subject.to_string(),
        }))
    }
}

/// Browsers hand out unpadded base64url keys, but copy/pasted values sometimes
/// carry padding.
fn decode_base64url(value: &str) -> Option<Vec<u8>> {
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(value.trim().trim_end_matches('='))
        .ok()
}

// ============================================================================
// Wire types
// ============================================================================

/// Keys of a browser push subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushKeys {
    pub p256dh: String,
    pub auth: String,
}

/// One delivery destination in the `{endpoint, keys:{p256dh, auth}}` shape
/// browsers produce with `PushSubscription.toJSON()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushTarget {
    pub endpoint: String,
    pub keys: PushKeys,
    /// Owner of the subscription, kept for logging only.
    #[serde(skip)]
    pub user_id: String,
}

/// Message rendered by the service worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub url: String,
    pub tag: String,
    pub require_interaction: bool,
    pub data: serde_json::Value,
}

// ============================================================================
// Provider port and adapter
// ============================================================================

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum PushSendError {
    /// The push service answered 410 Gone: the subscription will never work again.
    #[error("push subscription is gone")]
    Gone,

    #[error("push delivery failed: {0}")]
    Transient(String),
}

#[async_trait]
pub trait PushSender: Send + Sync + 'static {
    async fn send(&self, target: &PushTarget, payload: &[u8]) -> Result<(), PushSendError>;
}

/// `PushSender` backed by the `web-push` crate (aes128gcm + VAPID).
pub struct WebPushSender {
    vapid: VapidConfig,
    client: web_push::WebPushClient,
}

impl WebPushSender {
    pub fn new(vapid: VapidConfig) -> Result<Self, web_push::WebPushError> {
        let client = web_push::WebPushClient::new()?;
        Ok(Self { vapid, client })
    }

    async fn try_send(
        &self,
        target: &PushTarget,
        payload: &[u8],
    ) -> Result<(), web_push::WebPushError> {
        let subscription_info = web_push::SubscriptionInfo::new(
            target.endpoint.clone(),
            target.keys.p256dh.clone(),
            target.keys.auth.clone(),
        );
        let mut builder = web_push::WebPushMessageBuilder::new(&subscription_info)?;
        builder.set_payload(web_push::ContentEncoding::Aes128Gcm, payload);
        builder.set_ttl(PUSH_TTL_SECONDS);
        let mut signature_builder = web_push::VapidSignatureBuilder::from_base64(
            &self.vapid.private_key,
            web_push::URL_SAFE_NO_PAD,
            &subscription_info,
        )?;
        signature_builder.add_claim("sub", self.vapid.subject.as_str());
        builder.set_vapid_signature(signature_builder.build()?);
        self.client.send(builder.build()?).await
    }
}

#[async_trait]
impl PushSender for WebPushSender {
    async fn send(&self, target: &PushTarget, payload: &[u8]) -> Result<(), PushSendError> {
        self.try_send(target, payload).await.map_err(|err| match err {
            // web-push maps HTTP 410 to EndpointNotValid
            web_push::WebPushError::EndpointNotValid { .. } => PushSendError::Gone,
            other => PushSendError::Transient(other.to_string()),
        })
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Aggregate of one fan-out. Every expired endpoint is also counted in `failed`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchResult {
    pub successful: usize,
    pub failed: usize,
    pub expired: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum DeliveryOutcome {
    Delivered,
    Expired,
    Failed,
}

#[derive(Clone)]
pub struct PushDispatcher {
    sender: Arc<dyn PushSender>,
}

impl PushDispatcher {
    pub fn new(sender: Arc<dyn PushSender>) -> Self {
        Self { sender }
    }

    /// Send `payload` to every target concurrently and wait for all of them.
    /// Individual failures are folded into the result, never returned as errors.
    pub async fn dispatch(
        &self,
        targets: &[PushTarget],
        payload: &NotificationPayload,
    ) -> AppResult<DispatchResult> {
        let body = serde_json::to_vec(payload).map_err(|e| AppError::Internal(e.into()))?;

        let outcomes = join_all(targets.iter().map(|target| self.deliver(target, &body))).await;

        let mut result = DispatchResult::default();
        for (target, outcome) in targets.iter().zip(outcomes) {
            match outcome {
                DeliveryOutcome::Delivered => result.successful += 1,
                DeliveryOutcome::Expired => {
                    result.failed += 1;
                    result.expired.push(target.endpoint.clone());
                }
                DeliveryOutcome::Failed => result.failed += 1,
            }
        }

        tracing::info!(
            targets = targets.len(),
            successful = result.successful,
            failed = result.failed,
            expired = result.expired.len(),
            "Push dispatch finished"
        );

        Ok(result)
    }

    async fn deliver(&self, target: &PushTarget, body: &[u8]) -> DeliveryOutcome {
        match self.sender.send(target, body).await {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(PushSendError::Gone) => {
                tracing::info!(
                    user_id = %target.user_id,
                    "Push endpoint expired, scheduling removal: {}",
                    target.endpoint
                );
                DeliveryOutcome::Expired
            }
            Err(PushSendError::Transient(e)) => {
                tracing::warn!(
                    user_id = %target.user_id,
                    "Push delivery to {} failed: {}",
                    target.endpoint,
                    e
                );
                DeliveryOutcome::Failed
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{target, FakeSender};
    use super::*;

    // Matching key pair generated with the web-push toolchain.
    const PRIVATE_KEY: &str = "9pKJeIXAyyCj5M0QagsVvDYHlPF-cymJCbB5iHPsdEE";
    const PUBLIC_KEY: &str =
        "BCRweRf_U5iQM4pKNucGRzM6OuLp8Hisa8yX0N2ePIf1oxKitvFT6qvuGgYoTxlMatMDaytXbZR3rVClc2w_p6U";

    fn settings(public: Option<&str>, private: Option<&str>, subject: Option<&str>) -> PushConfig {
        PushConfig {
            vapid_public_key: public.map(str::to_string),
            vapid_private_key: private.map(str::to_string),
            vapid_subject: subject.map(str::to_string),
        }
    }

    fn payload() -> NotificationPayload {
        NotificationPayload {
            title: "t".to_string(),
            body: "b".to_string(),
            icon: "/i.png".to_string(),
            badge: "/b.png".to_string(),
            url: "/".to_string(),
            tag: "tag".to_string(),
            require_interaction: true,
            data: serde_json::json!({}),
        }
    }

    #[test]
    fn vapid_missing_everything_disables_push() {
        assert_eq!(VapidConfig::from_settings(&settings(None, None, None)), Ok(None));
    }

    #[test]
    fn vapid_partial_configuration_is_rejected() {
        let err = VapidConfig::from_settings(&settings(Some(PUBLIC_KEY), None, None)).unwrap_err();
        assert_eq!(err, VapidError::Incomplete("VAPID_PRIVATE_KEY"));
    }

    #[test]
    fn vapid_accepts_matching_key_pair() {
        let config = VapidConfig::from_settings(&settings(
            Some(PUBLIC_KEY),
            Some(PRIVATE_KEY),
            Some("mailto:soporte@enfocar.co"),
        ))
        .unwrap()
        .unwrap();
        assert_eq!(config.public_key, PUBLIC_KEY);
    }

    #[test]
    fn vapid_rejects_bad_subject() {
        let err = VapidConfig::from_settings(&settings(
            Some(PUBLIC_KEY),
            Some(PRIVATE_KEY),
            Some("soporte@enfocar.co"),
        ))
        .unwrap_err();
        assert_eq!(err, VapidError::InvalidSubject);
    }

    #[test]
    fn vapid_rejects_garbage_public_key() {
        let err = VapidConfig::from_settings(&settings(
            Some("not-a-key"),
            Some(PRIVATE_KEY),
            Some("mailto:a@b.co"),
        ))
        .unwrap_err();
        assert_eq!(err, VapidError::InvalidPublicKey);
    }

    #[test]
    fn vapid_rejects_mismatched_pair() {
        // A well-formed point that is not derived from PRIVATE_KEY.
        let mut other = decode_base64url(PUBLIC_KEY).unwrap();
        other[64] ^= 0x01;
        let other = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(other);

        let err = VapidConfig::from_settings(&settings(
            Some(&other),
            Some(PRIVATE_KEY),
            Some("mailto:a@b.co"),
        ))
        .unwrap_err();
        assert_eq!(err, VapidError::KeyMismatch);
    }

    #[test]
    fn payload_serializes_camel_case() {
        let json = serde_json::to_value(payload()).unwrap();
        assert_eq!(json["requireInteraction"], true);
        assert!(json.get("require_interaction").is_none());
    }

    #[test]
    fn push_target_wire_shape_omits_owner() {
        let json = serde_json::to_value(target("https://push.example/1")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "endpoint": "https://push.example/1",
                "keys": { "p256dh": "p256dh", "auth": "auth" }
            })
        );
    }

    #[tokio::test]
    async fn dispatch_counts_every_target_once() {
        let sender = FakeSender::new();
        sender.fail("https://push.example/2", PushSendError::Transient("503".to_string()));
        sender.fail("https://push.example/4", PushSendError::Gone);
        let dispatcher = PushDispatcher::new(sender.clone());

        for n in 0..6 {
            let targets: Vec<PushTarget> = (0..n)
                .map(|i| target(&format!("https://push.example/{i}")))
                .collect();
            let result = dispatcher.dispatch(&targets, &payload()).await.unwrap();
            assert_eq!(result.successful + result.failed, n);
        }
    }

    #[tokio::test]
    async fn dispatch_classifies_outcomes() {
        let sender = FakeSender::new();
        sender.fail("https://push.example/gone", PushSendError::Gone);
        sender.fail(
            "https://push.example/flaky",
            PushSendError::Transient("connection reset".to_string()),
        );
        let dispatcher = PushDispatcher::new(sender.clone());
        let targets = vec![
            target("https://push.example/ok"),
            target("https://push.example/gone"),
            target("https://push.example/flaky"),
        ];

        let result = dispatcher.dispatch(&targets, &payload()).await.unwrap();

        assert_eq!(result.successful, 1);
        assert_eq!(result.failed, 2);
        assert_eq!(result.expired, vec!["https://push.example/gone".to_string()]);
        assert_eq!(sender.calls(), 3);
    }

    #[tokio::test]
    async fn dispatch_with_no_targets_sends_nothing() {
        let sender = FakeSender::new();
        let dispatcher = PushDispatcher::new(sender.clone());

        let result = dispatcher.dispatch(&[], &payload()).await.unwrap();

        assert_eq!(result, DispatchResult::default());
        assert_eq!(sender.calls(), 0);
    }

    #[tokio::test]
    async fn dispatch_sends_serialized_payload() {
        let sender = FakeSender::new();
        let dispatcher = PushDispatcher::new(sender.clone());

        dispatcher
            .dispatch(&[target("https://push.example/1")], &payload())
            .await
            .unwrap();

        assert_eq!(sender.last_payload(), Some(payload()));
    }
    /// Each send parks on a shared barrier; it only opens once every
    /// delivery is in flight at the same time.
    struct BarrierSender {
        barrier: tokio::sync::Barrier,
    }

    #[async_trait]
    impl PushSender for BarrierSender {
        async fn send(&self, _target: &PushTarget, _payload: &[u8]) -> Result<(), PushSendError> {
            self.barrier.wait().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn dispatch_runs_deliveries_concurrently() {
        let sender = Arc::new(BarrierSender {
            barrier: tokio::sync::Barrier::new(3),
        });
        let dispatcher = PushDispatcher::new(sender);
        let targets: Vec<PushTarget> = (0..3)
            .map(|i| target(&format!("https://push.example/{i}")))
            .collect();

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            dispatcher.dispatch(&targets, &payload()),
        )
        .await
        .expect("deliveries did not overlap")
        .unwrap();

        assert_eq!(result.successful, 3);
    }

    /// `slow` stays pending until every other endpoint has been delivered.
    struct SlowFirstSender {
        slow: String,
        others: usize,
        delivered: std::sync::atomic::AtomicUsize,
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl PushSender for SlowFirstSender {
        async fn send(&self, target: &PushTarget, _payload: &[u8]) -> Result<(), PushSendError> {
            use std::sync::atomic::Ordering;

            if target.endpoint == self.slow {
                self.release.notified().await;
                return Err(PushSendError::Transient("timed out".to_string()));
            }
            if self.delivered.fetch_add(1, Ordering::SeqCst) + 1 == self.others {
                self.release.notify_one();
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn hung_delivery_does_not_hold_back_siblings() {
        let sender = Arc::new(SlowFirstSender {
            slow: "https://push.example/slow".to_string(),
            others: 2,
            delivered: Default::default(),
            release: tokio::sync::Notify::new(),
        });
        let dispatcher = PushDispatcher::new(sender.clone());
        let targets = vec![
            target("https://push.example/slow"),
            target("https://push.example/a"),
            target("https://push.example/b"),
        ];

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            dispatcher.dispatch(&targets, &payload()),
        )
        .await
        .expect("siblings waited on the hung delivery")
        .unwrap();

        assert_eq!(result.successful, 2);
        assert_eq!(result.failed, 1);
        assert!(result.expired.is_empty());
    }
}
