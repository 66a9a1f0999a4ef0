//! Read-only member views.

use fidelidad_core::error::StoreError;
use fidelidad_core::model::{Member, MemberId};
use fidelidad_core::store::{Collection, DocumentKey, DocumentStore};
use fidelidad_core::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a member sees about themselves.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberSummary {
    /// Member id.
    pub member_id: MemberId,
    /// Registration number.
    pub numero: u64,
    /// Given name.
    pub nombre: String,
    /// Family name.
    pub apellido: String,
    /// Email.
    pub email: String,
    /// Current balance.
    pub puntos: u64,
    /// Last balance change.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ultima_actualizacion: Option<DateTime<Utc>>,
    /// Reason of the last balance change.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ultimo_motivo: Option<String>,
}

impl MemberSummary {
    /// Project a member document; the password hash is left out.
    #[must_use]
    pub fn new(member_id: MemberId, member: Member) -> Self {
        Self {
            member_id,
            numero: member.numero,
            nombre: member.nombre,
            apellido: member.apellido,
            email: member.email,
            puntos: member.puntos,
            ultima_actualizacion: member.ultima_actualizacion,
            ultimo_motivo: member.ultimo_motivo,
        }
    }
}

/// Summary of `member_id`, `None` if there is no such member.
///
/// # Errors
///
/// Returns the store error from the read or decode.
pub async fn member_summary<S: DocumentStore>(
    store: &S,
    member_id: &MemberId,
) -> Result<Option<MemberSummary>, StoreError> {
    let key = DocumentKey::new(Collection::Members, member_id.as_str());
    match store.get(key).await? {
        Some(document) => {
            let member: Member = serde_json::from_value(document)?;
            Ok(Some(MemberSummary::new(member_id.clone(), member)))
        }
        None => Ok(None),
    }
}
