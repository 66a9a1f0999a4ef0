//! Audit ledger.
//!
//! Every balance change writes exactly one movement in the same transaction
//! as the member document, so the ledger can never disagree with balances.

use fidelidad_core::error::StoreError;
use fidelidad_core::model::{LedgerEntry, MemberId, MovementKind};
use fidelidad_core::store::{Collection, DocumentKey, DocumentStore, Query, Transaction, TransactionExt};
use fidelidad_core::{DateTime, Utc};

/// Largest page of movements returned to callers.
pub const MAX_MOVEMENTS: usize = 200;

/// Balance change to record.
#[derive(Clone, Debug)]
pub struct Movement<'a> {
    /// Member whose balance changed.
    pub member_id: &'a MemberId,
    /// Member email at the time of the change.
    pub email: &'a str,
    /// Movement kind.
    pub kind: MovementKind,
    /// Balance before.
    pub previous_points: u64,
    /// Balance after.
    pub new_points: u64,
    /// Human readable reason.
    pub reason: &'a str,
    /// Who caused the change.
    pub actor: &'a str,
    /// When it happened.
    pub at: DateTime<Utc>,
}

impl Movement<'_> {
    /// Build the ledger entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] if the delta does not fit in an `i64`.
    pub fn to_entry(&self) -> Result<LedgerEntry, StoreError> {
        let delta = i128::from(self.new_points) - i128::from(self.previous_points);
        let delta = i64::try_from(delta)
            .map_err(|_| StoreError::Serialization(format!("ledger delta {delta} out of range")))?;

        Ok(LedgerEntry {
            member_id: self.member_id.clone(),
            email: self.email.to_string(),
            kind: self.kind,
            delta,
            previous_points: self.previous_points,
            new_points: self.new_points,
            reason: self.reason.to_string(),
            created_at: self.at,
            autor_uid: self.actor.to_string(),
        })
    }
}

/// Buffer one ledger entry under a fresh key in the active transaction.
///
/// # Errors
///
/// Returns [`StoreError::Serialization`] if the entry cannot be built or encoded.
pub fn stage<Tx>(tx: &mut Tx, movement: &Movement<'_>) -> Result<DocumentKey, StoreError>
where
    Tx: Transaction + ?Sized,
{
    let key = DocumentKey::generated(Collection::Ledger);
    tx.set_as(key.clone(), &movement.to_entry()?)?;
    Ok(key)
}

/// Movements of one member, newest first.
///
/// # Errors
///
/// Returns the store error from the query or decode.
pub async fn movements<S: DocumentStore>(
    store: &S,
    member_id: &MemberId,
    limit: usize,
) -> Result<Vec<LedgerEntry>, StoreError> {
    let documents = store
        .query(Query::new(Collection::Ledger).where_eq("memberId", member_id.as_str()))
        .await?;

    let mut entries = documents
        .iter()
        .map(|doc| doc.decode::<LedgerEntry>())
        .collect::<Result<Vec<_>, _>>()?;

    entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    entries.truncate(limit.min(MAX_MOVEMENTS));
    Ok(entries)
}
