//! Member registration.
//!
//! Member numbers come from `counters/members`, and email uniqueness from
//! the `member_emails/{email}` index. Both are read and written in the same
//! transaction as the member, so two concurrent registrations either get
//! distinct numbers or one of them re-runs and sees the other's email.

use crate::error::LoyaltyError;
use crate::ledger::{self, Movement};
use fidelidad_core::environment::Clock;
use fidelidad_core::error::StoreError;
use fidelidad_core::model::{Counter, Member, MemberEmailIndex, MemberId, MovementKind};
use fidelidad_core::store::{Collection, DocumentKey, DocumentStore, Transaction, TransactionExt};
use serde::{Deserialize, Serialize};
use serde_json::Map;
use std::sync::Arc;

/// Ledger reason for initial points.
pub const WELCOME_REASON: &str = "Puntos de bienvenida";

/// Largest welcome balance.
pub const MAX_INITIAL_POINTS: u64 = 100_000;

/// Registration request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterMember {
    /// Given name.
    pub nombre: String,
    /// Family name.
    pub apellido: String,
    /// Email, normalized to lowercase.
    pub email: String,
    /// Credential hash from the identity service.
    pub password_hash: String,
    /// Welcome balance.
    #[serde(default)]
    pub initial_points: u64,
}

impl RegisterMember {
    /// Validate and normalize the request.
    ///
    /// # Errors
    ///
    /// Returns [`LoyaltyError::InvalidArgument`] for a missing name, a
    /// malformed email, an empty password hash, or excessive initial points.
    pub fn normalized(mut self) -> Result<Self, LoyaltyError> {
        self.nombre = self.nombre.trim().to_string();
        self.apellido = self.apellido.trim().to_string();
        self.email = normalize_email(&self.email)?;

        if self.nombre.is_empty() {
            return Err(LoyaltyError::invalid("nombre is required"));
        }
        if self.apellido.is_empty() {
            return Err(LoyaltyError::invalid("apellido is required"));
        }
        if self.password_hash.is_empty() {
            return Err(LoyaltyError::invalid("passwordHash is required"));
        }
        if self.initial_points > MAX_INITIAL_POINTS {
            return Err(LoyaltyError::invalid(format!(
                "initialPoints must not exceed {MAX_INITIAL_POINTS}"
            )));
        }
        Ok(self)
    }
}

/// Trim and lowercase an email, rejecting obviously malformed ones.
///
/// # Errors
///
/// Returns [`LoyaltyError::InvalidArgument`] if the address has no single
/// `@` between a non-empty local part and a dotted domain, or contains
/// whitespace or `/`.
pub fn normalize_email(raw: &str) -> Result<String, LoyaltyError> {
    let email = raw.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(|c| c.is_whitespace() || c == '/')
        }
        None => false,
    };

    if valid {
        Ok(email)
    } else {
        Err(LoyaltyError::invalid(format!("invalid email: {raw:?}")))
    }
}

/// Result of a registration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum RegistrationOutcome {
    /// Member created.
    Registered {
        /// Assigned id.
        member_id: MemberId,
        /// Assigned sequence number.
        numero: u64,
        /// Normalized email.
        email: String,
        /// Display name.
        nombre: String,
    },
    /// Another member already uses the email.
    EmailTaken {
        /// The normalized email.
        email: String,
    },
}

/// Register a validated member in one transaction.
///
/// # Errors
///
/// Returns the store error when the transaction cannot commit, or
/// [`StoreError::Database`] if the counter points at an existing member.
pub async fn register_member<S: DocumentStore>(
    store: &S,
    clock: Arc<dyn Clock>,
    request: RegisterMember,
    actor: &str,
) -> Result<RegistrationOutcome, StoreError> {
    let actor = actor.to_string();

    store
        .run_transaction(move |tx| {
            let request = request.clone();
            let actor = actor.clone();
            let clock = Arc::clone(&clock);
            Box::pin(async move {
                let counter_key = DocumentKey::new(Collection::Counters, Counter::MEMBERS);
                let email_key = DocumentKey::new(Collection::MemberEmails, request.email.as_str());

                if tx.get(email_key.clone()).await?.is_some() {
                    return Ok(RegistrationOutcome::EmailTaken {
                        email: request.email,
                    });
                }

                let counter: Counter = tx.get_as(counter_key.clone()).await?.unwrap_or_default();
                let numero = counter
                    .last
                    .checked_add(1)
                    .ok_or_else(|| StoreError::Database("member counter overflow".into()))?;
                let member_id = MemberId::from_numero(numero);
                let member_key = DocumentKey::new(Collection::Members, member_id.as_str());

                if tx.get(member_key.clone()).await?.is_some() {
                    return Err(StoreError::Database(format!(
                        "{member_key} already exists; member counter is behind"
                    )));
                }

                let now = clock.now();
                let member = Member {
                    numero,
                    nombre: request.nombre.clone(),
                    apellido: request.apellido,
                    email: request.email.clone(),
                    puntos: request.initial_points,
                    password_hash: request.password_hash,
                    fecha_registro: Some(now),
                    ultima_actualizacion: (request.initial_points > 0).then_some(now),
                    ultimo_motivo: (request.initial_points > 0).then(|| WELCOME_REASON.to_string()),
                    extra: Map::new(),
                };

                tx.set_as(counter_key, &Counter { last: numero })?;
                tx.set_as(member_key, &member)?;
                tx.set_as(
                    email_key,
                    &MemberEmailIndex {
                        member_id: member_id.clone(),
                    },
                )?;

                if request.initial_points > 0 {
                    ledger::stage(
                        tx,
                        &Movement {
                            member_id: &member_id,
                            email: &member.email,
                            kind: MovementKind::PointsAdd,
                            previous_points: 0,
                            new_points: request.initial_points,
                            reason: WELCOME_REASON,
                            actor: &actor,
                            at: now,
                        },
                    )?;
                }

                Ok(RegistrationOutcome::Registered {
                    member_id,
                    numero,
                    email: request.email,
                    nombre: request.nombre,
                })
            })
        })
        .await
}
