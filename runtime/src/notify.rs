//! Post-commit notifications.
//!
//! Notices are handed to a [`Notifier`] only after the transaction that
//! produced them committed, on a detached task. Delivery failures are logged
//! and counted; they never affect the operation's result.

use crate::metrics::NotificationMetrics;
use crate::retry::{RetryPolicy, retry_with_predicate};
use fidelidad_core::model::{MemberId, MovementKind};
use fidelidad_core::tier::DiscountTier;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Something worth telling a member about.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Notice {
    /// A coupon was claimed.
    CouponRedeemed {
        /// Member id.
        member_id: MemberId,
        /// Member email.
        email: String,
        /// Claimed tier.
        tier: DiscountTier,
        /// Coupon code.
        code: String,
        /// Points debited.
        cost: u64,
        /// Balance after.
        new_points: u64,
    },
    /// An administrator changed the balance.
    PointsAdjusted {
        /// Member id.
        member_id: MemberId,
        /// Member email.
        email: String,
        /// Movement kind.
        movement: MovementKind,
        /// Balance before.
        previous_points: u64,
        /// Balance after.
        new_points: u64,
        /// Reason given.
        reason: String,
    },
    /// A member joined.
    MemberRegistered {
        /// Member id.
        member_id: MemberId,
        /// Member email.
        email: String,
        /// Given name.
        nombre: String,
        /// Registration number.
        numero: u64,
    },
}

impl Notice {
    /// Stable kind label.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::CouponRedeemed { .. } => "coupon_redeemed",
            Self::PointsAdjusted { .. } => "points_adjusted",
            Self::MemberRegistered { .. } => "member_registered",
        }
    }

    /// Recipient email.
    #[must_use]
    pub fn email(&self) -> &str {
        match self {
            Self::CouponRedeemed { email, .. }
            | Self::PointsAdjusted { email, .. }
            | Self::MemberRegistered { email, .. } => email,
        }
    }
}

/// Delivery failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// The sink could not be reached.
    #[error("Notification transport error: {0}")]
    Transport(String),

    /// The sink answered with a non-success status.
    #[error("Notification rejected with status {status}")]
    Rejected {
        /// HTTP status code.
        status: u16,
    },
}

impl NotifyError {
    /// Whether a later delivery attempt may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Rejected { status } => *status >= 500 || *status == 429,
        }
    }
}

/// Notification sink.
///
/// Used as `Arc<dyn Notifier>`, hence the boxed future.
pub trait Notifier: Send + Sync {
    /// Deliver one notice.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] if delivery failed.
    fn notify(&self, notice: Notice) -> BoxFuture<'_, Result<(), NotifyError>>;
}

/// Hand `notice` to `notifier` on a detached task.
///
/// Must be called from within a Tokio runtime.
pub fn dispatch(notifier: &Arc<dyn Notifier>, notice: Notice) {
    let notifier = Arc::clone(notifier);
    tokio::spawn(async move {
        let kind = notice.kind();
        match notifier.notify(notice).await {
            Ok(()) => NotificationMetrics::record_sent(kind),
            Err(error) => {
                NotificationMetrics::record_failure(kind);
                tracing::warn!(kind, error = %error, "Notification delivery failed");
            }
        }
    });
}

/// Notifier that logs notices.
///
/// Default sink for development; real delivery is an external concern.
#[derive(Clone, Debug, Default)]
pub struct ConsoleNotifier;

impl ConsoleNotifier {
    /// Create a new console notifier.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Notifier for ConsoleNotifier {
    fn notify(&self, notice: Notice) -> BoxFuture<'_, Result<(), NotifyError>> {
        Box::pin(async move {
            match &notice {
                Notice::CouponRedeemed {
                    member_id,
                    tier,
                    code,
                    new_points,
                    ..
                } => tracing::info!(
                    member_id = %member_id,
                    tier = %tier,
                    code = %code,
                    new_points,
                    "📧 Coupon redeemed notice (console)"
                ),
                Notice::PointsAdjusted {
                    member_id,
                    movement,
                    new_points,
                    ..
                } => tracing::info!(
                    member_id = %member_id,
                    movement = movement.as_str(),
                    new_points,
                    "📧 Points adjusted notice (console)"
                ),
                Notice::MemberRegistered {
                    member_id, numero, ..
                } => tracing::info!(
                    member_id = %member_id,
                    numero,
                    "📧 Welcome notice (console)"
                ),
            }
            Ok(())
        })
    }
}

/// Notifier that POSTs each notice as JSON to a webhook.
#[derive(Clone, Debug)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    policy: RetryPolicy,
}

impl WebhookNotifier {
    /// Create a webhook notifier.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Transport`] if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration, policy: RetryPolicy) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
            policy,
        })
    }

    /// Target URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn post_once(&self, notice: &Notice) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(notice)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(NotifyError::Rejected {
                status: status.as_u16(),
            })
        }
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, notice: Notice) -> BoxFuture<'_, Result<(), NotifyError>> {
        Box::pin(async move {
            retry_with_predicate(
                self.policy.clone(),
                || self.post_once(&notice),
                NotifyError::is_transient,
            )
            .await
        })
    }
}
