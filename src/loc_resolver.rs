//! Finds the closed collection LOC an item may be appended to
//!
//! Resolution is two-step: the record is fetched by id to learn its
//! parties, then re-validated against the ledger's state-filtered view of
//! closed collection LOCs. Only a record present in that view is usable.

use crate::errors::{GatewayError, GatewayResult};
use crate::identifiers::{AccountId, ItemId, LocId};
use crate::ledger::{ItemFile, LedgerCall, LedgerConnection, LocFilter, TermsAndConditionsElement};
use tracing::{debug, info};

pub const COLLECTION_LOC: &str = "Collection LOC";
pub const LOC_NOT_CLOSED_COLLECTION: &str = "LOC is not a closed collection";

/// A LOC verified to be a closed collection for the signing requester
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedLocHandle {
    loc_id: LocId,
    owner: AccountId,
}

impl ClosedLocHandle {
    pub fn loc_id(&self) -> LocId {
        self.loc_id
    }

    pub fn owner(&self) -> &AccountId {
        &self.owner
    }

    /// Item creation call bound to this LOC
    pub fn add_item_call(&self, item_id: ItemId, description: impl Into<String>) -> LedgerCall {
        self.add_item_call_with(item_id, description, Vec::new(), false, Vec::new())
    }

    pub fn add_item_call_with(
        &self,
        item_id: ItemId,
        description: impl Into<String>,
        files: Vec<ItemFile>,
        restricted_delivery: bool,
        terms_and_conditions: Vec<TermsAndConditionsElement>,
    ) -> LedgerCall {
        LedgerCall::AddCollectionItem {
            loc_id: self.loc_id,
            item_id,
            description: description.into(),
            files,
            restricted_delivery,
            terms_and_conditions,
        }
    }
}

/// Resolve `loc_id` to a closed collection LOC requested by `expected_requester`.
///
/// A missing record is `NotFound`. A record that exists but has no
/// requester, or is absent from the closed-collection view for its owner and
/// `expected_requester`, is `InvalidState`.
pub async fn resolve_closed_collection_loc(
    connection: &dyn LedgerConnection,
    loc_id: LocId,
    expected_requester: &AccountId,
) -> GatewayResult<ClosedLocHandle> {
    let record = connection
        .query_loc_record(loc_id)
        .await?
        .ok_or_else(|| GatewayError::not_found(COLLECTION_LOC, loc_id.to_string()))?;

    let Some(requester) = record.requester else {
        info!(%loc_id, "LOC has no requester");
        return Err(GatewayError::invalid_state(LOC_NOT_CLOSED_COLLECTION));
    };
    let owner = record.owner;
    debug!(%loc_id, %owner, %requester, state = ?record.state, kind = ?record.kind, "LOC fetched");

    let filter = LocFilter::closed_collection(owner, *expected_requester);
    let candidates = connection.query_loc_records(&filter).await?;
    let found = candidates
        .iter()
        .find(|candidate| candidate.id == loc_id && filter.matches(candidate));

    match found {
        Some(_) => Ok(ClosedLocHandle {
            loc_id,
            owner,
        }),
        None => {
            info!(
                %loc_id,
                %requester,
                expected = %expected_requester,
                "LOC absent from closed collection view"
            );
            Err(GatewayError::invalid_state(LOC_NOT_CLOSED_COLLECTION))
        }
    }
}
