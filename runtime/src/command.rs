//! Command surface.
//!
//! Every operation a caller can request is one variant of
//! [`LoyaltyCommand`]; [`crate::service::LoyaltyService::execute`] handles
//! them with a single `match`.

use crate::adjustment::{AdjustOutcome, AdjustmentKind};
use crate::coupons::CreateCouponsOutcome;
use crate::outcome::ClaimResponse;
use crate::registration::RegistrationOutcome;
use fidelidad_core::model::{MemberId, PricingConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Caller privileges.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// A club member acting on their own account.
    #[default]
    Member,
    /// Back-office staff.
    Admin,
}

/// An authenticated caller, as established by the identity service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Caller {
    /// Caller id; a member id for members.
    pub id: String,
    /// Caller role.
    pub role: Role,
}

impl Caller {
    /// A member caller.
    #[must_use]
    pub fn member(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::Member,
        }
    }

    /// An admin caller.
    #[must_use]
    pub fn admin(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::Admin,
        }
    }

    /// Whether the caller has the admin role.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// The caller's id as a member id.
    #[must_use]
    pub fn member_id(&self) -> MemberId {
        MemberId::new(self.id.as_str())
    }
}

/// A request to the loyalty service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum LoyaltyCommand {
    /// Redeem points for a coupon of `tier` on the caller's account.
    Redeem {
        /// Tier as typed by the caller.
        tier: String,
    },
    /// Change a member's balance. Admin only.
    AdjustPoints {
        /// Member to adjust.
        member_id: MemberId,
        /// Operation.
        kind: AdjustmentKind,
        /// Points.
        amount: u64,
        /// Reason.
        reason: String,
    },
    /// Create a member. Admin only.
    RegisterMember {
        /// Given name.
        nombre: String,
        /// Family name.
        apellido: String,
        /// Email.
        email: String,
        /// Credential hash.
        password_hash: String,
        /// Welcome balance.
        #[serde(default)]
        initial_points: u64,
    },
    /// Add coupon stock. Admin only.
    CreateCoupons {
        /// Tier as typed by the caller.
        tier: String,
        /// Codes to issue.
        codes: Vec<String>,
    },
    /// Change tier costs. Admin only.
    SetPricing {
        /// Tier input to cost.
        costs: BTreeMap<String, u64>,
    },
}

impl LoyaltyCommand {
    /// Stable command name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Redeem { .. } => "redeem",
            Self::AdjustPoints { .. } => "adjust_points",
            Self::RegisterMember { .. } => "register_member",
            Self::CreateCoupons { .. } => "create_coupons",
            Self::SetPricing { .. } => "set_pricing",
        }
    }

    /// Whether only admins may run the command.
    #[must_use]
    pub const fn requires_admin(&self) -> bool {
        !matches!(self, Self::Redeem { .. })
    }
}

/// Result of a command, tagged with the command name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", content = "result", rename_all = "snake_case")]
pub enum CommandResult {
    /// Redemption result.
    Redeem(ClaimResponse),
    /// Adjustment result.
    AdjustPoints(AdjustOutcome),
    /// Registration result.
    RegisterMember(RegistrationOutcome),
    /// Coupon creation result.
    CreateCoupons(CreateCouponsOutcome),
    /// Pricing after the change.
    SetPricing(PricingConfig),
}
