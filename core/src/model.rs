//! Persisted document models.
//!
//! Field names are the stored contract (camelCase, Spanish) and must not be
//! renamed. Member and coupon documents keep unknown fields in `extra` so a
//! rewrite never drops data another tool put there.

use crate::tier::DiscountTier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Identifier of a member document, e.g. `"VG123"`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(String);

impl MemberId {
    /// Prefix of ids assigned at registration.
    pub const PREFIX: &'static str = "VG";

    /// Wrap an existing id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id a member with sequence number `numero` receives.
    #[must_use]
    pub fn from_numero(numero: u64) -> Self {
        Self(format!("{}{numero}", Self::PREFIX))
    }

    /// Borrow the raw id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MemberId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A loyalty club member (`members/{id}`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    /// Sequential registration number.
    #[serde(default)]
    pub numero: u64,
    /// Given name.
    #[serde(default)]
    pub nombre: String,
    /// Family name.
    #[serde(default)]
    pub apellido: String,
    /// Lowercase, unique.
    pub email: String,
    /// Current balance.
    #[serde(default)]
    pub puntos: u64,
    /// Opaque credential hash owned by the identity service.
    #[serde(default)]
    pub password_hash: String,
    /// Registration time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fecha_registro: Option<DateTime<Utc>>,
    /// Time of the last balance change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ultima_actualizacion: Option<DateTime<Utc>>,
    /// Reason of the last balance change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ultimo_motivo: Option<String>,
    /// Fields this crate does not model.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Member {
    /// Display name, `"nombre apellido"` trimmed.
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{} {}", self.nombre, self.apellido).trim().to_string()
    }

    /// Record a balance change on the member document.
    pub fn apply_balance(&mut self, puntos: u64, reason: &str, at: DateTime<Utc>) {
        self.puntos = puntos;
        self.ultima_actualizacion = Some(at);
        self.ultimo_motivo = Some(reason.to_string());
    }
}

/// A single-use coupon (`coupons/{id}`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coupon {
    /// Tier this coupon belongs to.
    pub descuento: DiscountTier,
    /// The code handed to the member.
    pub codigo: String,
    /// `true` until claimed; never reverts.
    pub disponible: bool,
    /// Member that claimed it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usado_por: Option<MemberId>,
    /// Email of the claiming member at claim time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usado_email: Option<String>,
    /// Claim time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usado_at: Option<DateTime<Utc>>,
    /// Creation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creado_at: Option<DateTime<Utc>>,
    /// Fields this crate does not model.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Coupon {
    /// A fresh, available coupon.
    #[must_use]
    pub fn new(descuento: DiscountTier, codigo: impl Into<String>, creado_at: DateTime<Utc>) -> Self {
        Self {
            descuento,
            codigo: codigo.into(),
            disponible: true,
            usado_por: None,
            usado_email: None,
            usado_at: None,
            creado_at: Some(creado_at),
            extra: Map::new(),
        }
    }

    /// Mark the coupon consumed by `member`.
    pub fn consume(&mut self, member: &MemberId, email: &str, at: DateTime<Utc>) {
        self.disponible = false;
        self.usado_por = Some(member.clone());
        self.usado_email = Some(email.to_string());
        self.usado_at = Some(at);
    }
}

/// Tier pricing singleton (`pricing/current`).
///
/// Costs are stored as top-level `"<tier>": <points>` pairs next to the
/// audit fields.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingConfig {
    /// Last change time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Last change author.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
    /// Cost per canonical tier key.
    #[serde(flatten)]
    pub costs: BTreeMap<String, u64>,
}

impl PricingConfig {
    /// Id of the singleton document.
    pub const DOCUMENT_ID: &'static str = "current";

    /// Cost of `tier`; a tier missing from the map costs nothing.
    #[must_use]
    pub fn cost_of(&self, tier: DiscountTier) -> u64 {
        self.costs.get(tier.as_str()).copied().unwrap_or(0)
    }

    /// Costs for every tier, missing ones as zero.
    #[must_use]
    pub fn all_costs(&self) -> BTreeMap<DiscountTier, u64> {
        DiscountTier::ALL
            .into_iter()
            .map(|tier| (tier, self.cost_of(tier)))
            .collect()
    }
}

/// Kind of balance movement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    /// Points credited.
    PointsAdd,
    /// Points debited (redemptions included).
    PointsSubtract,
    /// Balance overwritten by an administrator.
    PointsSet,
}

impl MovementKind {
    /// Persisted name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PointsAdd => "points_add",
            Self::PointsSubtract => "points_subtract",
            Self::PointsSet => "points_set",
        }
    }
}

/// One immutable balance movement (`ledger/{id}`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    /// Member whose balance changed.
    pub member_id: MemberId,
    /// Member email at the time of the movement.
    pub email: String,
    /// Movement kind.
    #[serde(rename = "type")]
    pub kind: MovementKind,
    /// `new_points - previous_points`.
    pub delta: i64,
    /// Balance before.
    pub previous_points: u64,
    /// Balance after.
    pub new_points: u64,
    /// Human readable reason.
    pub reason: String,
    /// Movement time.
    pub created_at: DateTime<Utc>,
    /// Who caused it (member id for redemptions, admin id otherwise).
    pub autor_uid: String,
}

/// Sequence counter (`counters/{name}`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    /// Last value handed out.
    pub last: u64,
}

impl Counter {
    /// Id of the member number counter.
    pub const MEMBERS: &'static str = "members";
}

/// Email uniqueness index entry (`member_emails/{email}`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberEmailIndex {
    /// Owner of the email.
    pub member_id: MemberId,
}

/// Coupon code uniqueness index entry (`coupon_codes/{codigo}`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponCodeIndex {
    /// Coupon carrying the code.
    pub coupon_id: String,
    /// Tier of that coupon.
    pub descuento: DiscountTier,
}
