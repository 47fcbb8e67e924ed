//! Collection gateway: add and read collection items on a ledger node
//!
//! Each operation validates its inputs before touching the network, opens
//! its own connection and releases it on every exit path.

use crate::error_classifier::classify;
use crate::errors::{GatewayError, GatewayResult, SafeLock};
use crate::identifiers::{AccountId, ItemId, LocId};
use crate::ledger::{AuthorizedCall, LedgerConnection, LedgerConnector, LedgerEndpoint};
use crate::loc_resolver::resolve_closed_collection_loc;
use crate::signer::{AccountSigner, SigningMaterialResolver};
use crate::tx_tracker::{submit_tracked, TxOutcome};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

pub const DEFAULT_SUBMISSION_TIMEOUT: Duration = Duration::from_secs(60);

/// Raw parameters of an item creation, as received from the caller
#[derive(Debug, Clone, Default)]
pub struct AddItemRequest {
    pub collection_loc_id: String,
    pub web_socket_url: String,
    pub directory_url: Option<String>,
    pub suri: String,
    pub item_id: String,
    pub item_description: String,
}

#[derive(Debug, Clone, Default)]
pub struct GetItemRequest {
    pub collection_loc_id: String,
    pub item_id: String,
    pub web_socket_url: String,
    pub directory_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionItemView {
    pub collection_loc_id: String,
    pub item_id: String,
    pub item_description: String,
}

struct ValidatedAdd {
    loc_id: LocId,
    item_id: ItemId,
    description: String,
    endpoint: LedgerEndpoint,
    signer: Arc<dyn AccountSigner>,
}

/// Owns a connection until it is released.
///
/// `release` disconnects on the normal paths. If the owning future is
/// dropped first, `Drop` hands the disconnect to the runtime.
pub struct ConnectionGuard {
    connection: Arc<dyn LedgerConnection>,
    released: bool,
}

impl ConnectionGuard {
    pub async fn open(
        connector: &dyn LedgerConnector,
        endpoint: &LedgerEndpoint,
    ) -> GatewayResult<Self> {
        let connection = connector.connect(endpoint).await?;
        debug!(
            endpoint = %endpoint.web_socket_url,
            spec_version = connection.metadata().spec_version(),
            "ledger connection established"
        );
        Ok(Self {
            connection,
            released: false,
        })
    }

    pub fn connection(&self) -> &dyn LedgerConnection {
        self.connection.as_ref()
    }

    /// Disconnect and wait for it. If this future is dropped mid-disconnect,
    /// `Drop` still schedules one.
    pub async fn release(mut self) {
        self.connection.disconnect().await;
        self.released = true;
        debug!(endpoint = %self.connection.endpoint().web_socket_url, "ledger connection released");
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let connection = self.connection.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("operation cancelled, scheduling disconnect");
                handle.spawn(async move { connection.disconnect().await });
            }
            Err(_) => warn!("connection dropped outside a runtime; disconnect skipped"),
        }
    }
}

/// Per-account turns for nonce assignment.
///
/// A turn is held from the nonce read until the pool has answered the
/// submission, so concurrent requests from one signer get consecutive nonces.
#[derive(Default)]
struct NonceTurns {
    turns: Mutex<HashMap<AccountId, Arc<tokio::sync::Mutex<()>>>>,
}

impl NonceTurns {
    async fn acquire(&self, account: AccountId) -> GatewayResult<OwnedMutexGuard<()>> {
        let turn = self.turns.safe_lock()?.entry(account).or_default().clone();
        Ok(turn.lock_owned().await)
    }
}

pub struct CollectionGateway {
    connector: Arc<dyn LedgerConnector>,
    signers: Arc<dyn SigningMaterialResolver>,
    submission_timeout: Duration,
    nonce_turns: NonceTurns,
}

impl CollectionGateway {
    pub fn new(
        connector: Arc<dyn LedgerConnector>,
        signers: Arc<dyn SigningMaterialResolver>,
    ) -> Self {
        Self {
            connector,
            signers,
            submission_timeout: DEFAULT_SUBMISSION_TIMEOUT,
            nonce_turns: NonceTurns::default(),
        }
    }

    pub fn with_submission_timeout(mut self, timeout: Duration) -> Self {
        self.submission_timeout = timeout;
        self
    }

    fn validate_add(&self, request: &AddItemRequest) -> GatewayResult<ValidatedAdd> {
        let loc_id = request.collection_loc_id.parse()?;
        let item_id = request.item_id.parse()?;
        let description = request.item_description.trim();
        if description.is_empty() {
            return Err(GatewayError::validation("itemDescription", "must not be empty"));
        }
        let endpoint =
            LedgerEndpoint::parse(&request.web_socket_url, request.directory_url.as_deref())?;
        let signer = self.signers.resolve(&request.suri)?;
        Ok(ValidatedAdd {
            loc_id,
            item_id,
            description: request.item_description.clone(),
            endpoint,
            signer,
        })
    }

    /// Append an item to a closed collection LOC, signed by the requester
    pub async fn add_collection_item(&self, request: AddItemRequest) -> GatewayResult<()> {
        let params = self.validate_add(&request)?;
        let guard = ConnectionGuard::open(self.connector.as_ref(), &params.endpoint).await?;
        let result = self.submit_item(guard.connection(), &params).await;
        guard.release().await;
        result
    }

    async fn submit_item(
        &self,
        connection: &dyn LedgerConnection,
        params: &ValidatedAdd,
    ) -> GatewayResult<()> {
        let account = params.signer.account();
        let loc = resolve_closed_collection_loc(connection, params.loc_id, &account).await?;
        debug!(loc_id = %loc.loc_id(), owner = %loc.owner(), "closed collection resolved");
        let call = loc.add_item_call(params.item_id, params.description.clone());

        let submission = {
            let _turn = self.nonce_turns.acquire(account).await?;
            let nonce = connection.account_nonce(&account).await?;
            debug!(%account, nonce, "nonce assigned");
            let authorized = AuthorizedCall::new(params.signer.clone(), call, nonce);
            submit_tracked(connection, authorized, self.submission_timeout).await
        };

        match submission.outcome().await {
            TxOutcome::Confirmed(block) => {
                info!(
                    loc_id = %params.loc_id,
                    item_id = %params.item_id,
                    block = block.number,
                    "collection item added"
                );
                Ok(())
            }
            TxOutcome::DispatchFailed(error) => {
                let metadata = classify(connection, &error);
                warn!(loc_id = %params.loc_id, item_id = %params.item_id, %metadata, "item creation failed");
                Err(GatewayError::dispatch(metadata))
            }
            TxOutcome::PreDispatchFailed(reason) => {
                Err(GatewayError::connectivity("submit", format!("transaction rejected: {reason}")))
            }
            TxOutcome::Abandoned(reason) => {
                Err(GatewayError::connectivity("submit", format!("submission abandoned: {reason}")))
            }
        }
    }

    /// Read an item from the public ledger state
    pub async fn get_collection_item(
        &self,
        request: GetItemRequest,
    ) -> GatewayResult<CollectionItemView> {
        let loc_id: LocId = request.collection_loc_id.parse()?;
        let item_id: ItemId = request.item_id.parse()?;
        let endpoint =
            LedgerEndpoint::parse(&request.web_socket_url, request.directory_url.as_deref())?;

        let guard = ConnectionGuard::open(self.connector.as_ref(), &endpoint).await?;
        let result = guard
            .connection()
            .query_public_collection_item(loc_id, item_id)
            .await;
        guard.release().await;

        match result? {
            Some(item) => Ok(CollectionItemView {
                collection_loc_id: request.collection_loc_id,
                item_id: item.item_id.to_string(),
                item_description: item.description,
            }),
            None => {
                debug!(%loc_id, %item_id, "collection item not found");
                Err(GatewayError::not_found("Collection item", item_id.to_string()))
            }
        }
    }
}
