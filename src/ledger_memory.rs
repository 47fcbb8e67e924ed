//! In-process ledger double
//!
//! Implements the connection capability traits over shared in-memory
//! state, for tests and for `serve` when `dev_ledger.enabled` is set.
//! Transactions go through the same lifecycle a real node reports
//! (ready, broadcast, in block, finalized) on a background task, and
//! `logionLoc.addCollectionItem` is executed with the pallet's rules.
//! Signatures are not checked; the account nonce is. Faults can be
//! injected to exercise stalled, dropped and rejected submissions.

use crate::errors::{GatewayError, GatewayResult, SafeLock, SafeReadLock, SafeWriteLock};
use crate::identifiers::{AccountId, ItemId, LocId};
use crate::ledger::{
    AuthorizedCall, BlockRef, CollectionItem, DispatchError, LedgerCall, LedgerConnection, LedgerConnector,
    LedgerEndpoint, LocFilter, LocKind, LocRecord, LocState, SubmitError, Subscription, TxStatus,
    TxStatusEvent, Unsubscribe,
};
use crate::runtime_metadata::{ErrorVariant, MetadataRegistry, PalletMetadata};
use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

pub const SYSTEM_PALLET: &str = "system";
pub const SYSTEM_PALLET_INDEX: u8 = 0;
pub const LOC_PALLET: &str = "logionLoc";
pub const LOC_PALLET_INDEX: u8 = 9;
pub const RUNTIME_SPEC_VERSION: u32 = 126;

/// Runtime metadata served by every in-process node
pub fn runtime_metadata() -> MetadataRegistry {
    MetadataRegistry::new(RUNTIME_SPEC_VERSION)
        .with_pallet(PalletMetadata {
            name: SYSTEM_PALLET.into(),
            index: SYSTEM_PALLET_INDEX,
            errors: vec![
                ErrorVariant::new("InvalidSpecName", &["The name of specification does not match between the current runtime", "and the new runtime."]),
                ErrorVariant::new("NonDefaultComposite", &["Suicide called when the account has non-default composite data."]),
                ErrorVariant::new("CallFiltered", &["The origin filter prevent the call to be dispatched."]),
            ],
        })
        .with_pallet(PalletMetadata {
            name: LOC_PALLET.into(),
            index: LOC_PALLET_INDEX,
            errors: vec![
                ErrorVariant::new("AlreadyExists", &["The LOC ID has already been used."]),
                ErrorVariant::new("NotFound", &["Target LOC does not exist"]),
                ErrorVariant::new("Unauthorized", &["Unauthorized LOC operation"]),
                ErrorVariant::new("CannotMutate", &["Occurs when trying to mutate a LOC that is not open"]),
                ErrorVariant::new("WrongCollectionLoc", &["Occurs when trying to add an item to a LOC that is not a collection"]),
                ErrorVariant::new("CollectionNotClosed", &["Occurs when trying to add an item to a collection that is not closed"]),
                ErrorVariant::new("CollectionItemAlreadyExists", &["Occurs when trying to add an item with an ID already used in the collection"]),
            ],
        })
}

/// Injected misbehaviour for subsequent submissions or connects
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Fault {
    #[default]
    None,
    /// Report pool statuses but never include the transaction
    StallBeforeInclusion,
    /// Close the status stream before inclusion
    DropConnection,
    /// Report `Invalid` from the pool
    RejectInPool(String),
    RefuseConnections,
}

#[derive(Debug, Default)]
struct LedgerState {
    locs: BTreeMap<LocId, LocRecord>,
    items: HashMap<(LocId, ItemId), CollectionItem>,
    nonces: HashMap<AccountId, u64>,
    best_block: u64,
}

/// Shared state of one node
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
    fault: Mutex<Fault>,
    metadata: MetadataRegistry,
    open_connections: AtomicUsize,
    connects: AtomicUsize,
    redundant_disconnects: AtomicUsize,
    active_subscriptions: Arc<AtomicUsize>,
}

impl MemoryLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(LedgerState::default()),
            fault: Mutex::new(Fault::None),
            metadata: runtime_metadata(),
            open_connections: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
            redundant_disconnects: AtomicUsize::new(0),
            active_subscriptions: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Create or replace a LOC
    pub fn insert_loc(&self, record: LocRecord) -> GatewayResult<()> {
        self.state.safe_lock()?.locs.insert(record.id, record);
        Ok(())
    }

    pub fn set_loc_state(&self, loc_id: LocId, state: LocState) -> GatewayResult<()> {
        let mut guard = self.state.safe_lock()?;
        let record = guard
            .locs
            .get_mut(&loc_id)
            .ok_or_else(|| GatewayError::not_found("LOC", loc_id.to_string()))?;
        record.state = state;
        Ok(())
    }

    pub fn collection_item(&self, loc_id: LocId, item_id: ItemId) -> Option<CollectionItem> {
        self.state
            .safe_lock()
            .ok()
            .and_then(|s| s.items.get(&(loc_id, item_id)).cloned())
    }

    pub fn item_count(&self) -> usize {
        self.state.safe_lock().map(|s| s.items.len()).unwrap_or(0)
    }

    pub fn best_block(&self) -> u64 {
        self.state.safe_lock().map(|s| s.best_block).unwrap_or(0)
    }

    pub fn set_fault(&self, fault: Fault) -> GatewayResult<()> {
        *self.fault.safe_lock()? = fault;
        Ok(())
    }

    fn current_fault(&self) -> Fault {
        self.fault.safe_lock().map(|f| f.clone()).unwrap_or_default()
    }

    pub fn open_connections(&self) -> usize {
        self.open_connections.load(Ordering::SeqCst)
    }

    /// Total successful connects since creation
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Disconnects issued on an already closed connection
    pub fn redundant_disconnects(&self) -> usize {
        self.redundant_disconnects.load(Ordering::SeqCst)
    }

    /// Status listeners not yet released
    pub fn active_subscriptions(&self) -> usize {
        self.active_subscriptions.load(Ordering::SeqCst)
    }

    /// Open a connection to this node
    pub fn open_connection(self: &Arc<Self>) -> Arc<MemoryConnection> {
        self.open_connection_at(LedgerEndpoint {
            web_socket_url: "ws://in-process".into(),
            directory_url: None,
        })
    }

    fn open_connection_at(self: &Arc<Self>, endpoint: LedgerEndpoint) -> Arc<MemoryConnection> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.open_connections.fetch_add(1, Ordering::SeqCst);
        let (closed, _) = watch::channel(false);
        debug!(endpoint = %endpoint.web_socket_url, "connection opened");
        Arc::new(MemoryConnection {
            ledger: self.clone(),
            metadata: self.metadata.clone(),
            endpoint,
            closed,
            disconnected: AtomicBool::new(false),
        })
    }

    fn module_error(&self, name: &str) -> DispatchError {
        match self.metadata.module_error(LOC_PALLET, name) {
            Some((index, error)) => DispatchError::Module { index, error },
            None => DispatchError::Other(name.to_string()),
        }
    }

    /// Admit a call into the pool if its nonce is the next one expected
    fn admit(&self, call: &AuthorizedCall) -> Result<(), SubmitError> {
        let signer = call.account();
        let mut state = self
            .state
            .safe_lock()
            .map_err(|e| SubmitError::Transport(e.to_string()))?;
        let expected = state.nonces.get(&signer).copied().unwrap_or(0);
        if call.nonce != expected {
            return Err(SubmitError::Rejected(format!(
                "stale nonce {} (expected {expected})",
                call.nonce
            )));
        }
        state.nonces.insert(signer, expected + 1);
        Ok(())
    }

    /// Execute an admitted call in a new block
    fn execute(&self, authorized: &AuthorizedCall) -> GatewayResult<(BlockRef, Option<DispatchError>)> {
        let signer = authorized.account();
        let mut state = self.state.safe_lock()?;
        state.best_block += 1;
        let number = state.best_block;
        let hash = Sha256::digest(
            [
                number.to_be_bytes().as_slice(),
                signer.as_bytes().as_slice(),
                authorized.nonce.to_be_bytes().as_slice(),
            ]
            .concat(),
        );
        let block = BlockRef {
            number,
            hash: format!("0x{}", hex::encode(hash)),
            included_at: Utc::now(),
        };

        let result = match &authorized.call {
            LedgerCall::AddCollectionItem {
                loc_id,
                item_id,
                description,
                files,
                restricted_delivery,
                terms_and_conditions,
            } => {
                let check = match state.locs.get(loc_id) {
                    None => Err("NotFound"),
                    Some(loc) if loc.requester != Some(signer) => Err("Unauthorized"),
                    Some(loc) if loc.kind != LocKind::Collection => {
                        Err("WrongCollectionLoc")
                    }
                    Some(loc) if loc.state != LocState::Closed => Err("CollectionNotClosed"),
                    Some(_) if state.items.contains_key(&(*loc_id, *item_id)) => {
                        Err("CollectionItemAlreadyExists")
                    }
                    Some(_) => Ok(()),
                };
                match check {
                    Ok(()) => {
                        state.items.insert(
                            (*loc_id, *item_id),
                            CollectionItem {
                                loc_id: *loc_id,
                                item_id: *item_id,
                                description: description.clone(),
                                files: files.clone(),
                                restricted_delivery: *restricted_delivery,
                                terms_and_conditions: terms_and_conditions.clone(),
                            },
                        );
                        info!(%loc_id, %item_id, block = number, "collection item added");
                        None
                    }
                    Err(name) => {
                        debug!(%loc_id, %item_id, error = name, "addCollectionItem failed");
                        Some(self.module_error(name))
                    }
                }
            }
        };
        Ok((block, result))
    }
}

/// One client connection to a [`MemoryLedger`]
pub struct MemoryConnection {
    ledger: Arc<MemoryLedger>,
    metadata: MetadataRegistry,
    endpoint: LedgerEndpoint,
    closed: watch::Sender<bool>,
    disconnected: AtomicBool,
}

impl MemoryConnection {
    fn ensure_open(&self, operation: &str) -> GatewayResult<()> {
        if *self.closed.borrow() {
            return Err(GatewayError::connectivity(operation, "connection closed"));
        }
        Ok(())
    }
}

async fn drive_submission(
    ledger: Arc<MemoryLedger>,
    call: AuthorizedCall,
    fault: Fault,
    events: mpsc::UnboundedSender<TxStatusEvent>,
    mut unsubscribed: oneshot::Receiver<()>,
    mut closed: watch::Receiver<bool>,
) {
    let _ = events.send(TxStatusEvent::new(TxStatus::Ready));
    tokio::task::yield_now().await;
    let _ = events.send(TxStatusEvent::new(TxStatus::Broadcast));

    match fault {
        Fault::StallBeforeInclusion => {
            tokio::select! {
                _ = &mut unsubscribed => {}
                _ = closed.wait_for(|c| *c) => {}
            }
            return;
        }
        Fault::DropConnection => return,
        Fault::RejectInPool(reason) => {
            let _ = events.send(TxStatusEvent::new(TxStatus::Invalid(reason)));
            return;
        }
        Fault::None | Fault::RefuseConnections => {}
    }

    tokio::task::yield_now().await;
    let (block, dispatch_error) = match ledger.execute(&call) {
        Ok(result) => result,
        Err(e) => {
            warn!("block execution failed: {e}");
            return;
        }
    };
    let status_event = |status| {
        let event = TxStatusEvent::new(status);
        match &dispatch_error {
            Some(error) => event.with_dispatch_error(error.clone()),
            None => event,
        }
    };
    // Inclusion is announced twice, as nodes do on re-broadcast
    let _ = events.send(status_event(TxStatus::InBlock(block.clone())));
    let _ = events.send(status_event(TxStatus::InBlock(block.clone())));
    let _ = events.send(status_event(TxStatus::Finalized(block)));
}

#[async_trait]
impl LedgerConnection for MemoryConnection {
    fn endpoint(&self) -> &LedgerEndpoint {
        &self.endpoint
    }

    fn metadata(&self) -> &MetadataRegistry {
        &self.metadata
    }

    async fn account_nonce(&self, account: &AccountId) -> GatewayResult<u64> {
        self.ensure_open("account_nonce")?;
        let state = self.ledger.state.safe_lock()?;
        Ok(state.nonces.get(account).copied().unwrap_or(0))
    }

    async fn submit_transaction(&self, call: AuthorizedCall) -> Result<Subscription, SubmitError> {
        if *self.closed.borrow() {
            return Err(SubmitError::Transport("connection closed".into()));
        }
        self.ledger.admit(&call)?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (unsub_tx, unsub_rx) = oneshot::channel();
        let active = self.ledger.active_subscriptions.clone();
        active.fetch_add(1, Ordering::SeqCst);
        let unsubscribe = Unsubscribe::new(move || {
            active.fetch_sub(1, Ordering::SeqCst);
            let _ = unsub_tx.send(());
        });

        debug!(call = call.call.name(), nonce = call.nonce, "transaction entered pool");
        tokio::spawn(drive_submission(
            self.ledger.clone(),
            call,
            self.ledger.current_fault(),
            events_tx,
            unsub_rx,
            self.closed.subscribe(),
        ));

        Ok(Subscription {
            events: events_rx,
            unsubscribe,
        })
    }

    async fn query_loc_record(&self, loc_id: LocId) -> GatewayResult<Option<LocRecord>> {
        self.ensure_open("query_loc_record")?;
        let state = self.ledger.state.safe_lock()?;
        Ok(state.locs.get(&loc_id).cloned())
    }

    async fn query_loc_records(&self, filter: &LocFilter) -> GatewayResult<Vec<LocRecord>> {
        self.ensure_open("query_loc_records")?;
        let state = self.ledger.state.safe_lock()?;
        Ok(state
            .locs
            .values()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect())
    }

    async fn query_public_collection_item(
        &self,
        loc_id: LocId,
        item_id: ItemId,
    ) -> GatewayResult<Option<CollectionItem>> {
        self.ensure_open("query_public_collection_item")?;
        let state = self.ledger.state.safe_lock()?;
        Ok(state.items.get(&(loc_id, item_id)).cloned())
    }

    async fn disconnect(&self) {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            self.ledger.redundant_disconnects.fetch_add(1, Ordering::SeqCst);
            warn!(endpoint = %self.endpoint.web_socket_url, "disconnect on closed connection");
            return;
        }
        self.closed.send_replace(true);
        self.ledger.open_connections.fetch_sub(1, Ordering::SeqCst);
        debug!(endpoint = %self.endpoint.web_socket_url, "connection closed");
    }
}

/// Set of in-process nodes addressed by websocket URL
#[derive(Default)]
pub struct MemoryNetwork {
    nodes: RwLock<HashMap<String, Arc<MemoryLedger>>>,
    connect_attempts: AtomicUsize,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve a fresh node at `url`, or return the one already there
    pub fn add_node(&self, url: &str) -> GatewayResult<Arc<MemoryLedger>> {
        let mut nodes = self.nodes.safe_write()?;
        Ok(nodes.entry(url.to_string()).or_insert_with(MemoryLedger::new).clone())
    }

    /// Serve an existing node at an additional `url`
    pub fn add_alias(&self, url: &str, ledger: Arc<MemoryLedger>) -> GatewayResult<()> {
        self.nodes.safe_write()?.insert(url.to_string(), ledger);
        Ok(())
    }

    pub fn node(&self, url: &str) -> Option<Arc<MemoryLedger>> {
        self.nodes.safe_read().ok()?.get(url).cloned()
    }

    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerConnector for MemoryNetwork {
    async fn connect(&self, endpoint: &LedgerEndpoint) -> GatewayResult<Arc<dyn LedgerConnection>> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        let ledger = self.node(&endpoint.web_socket_url).ok_or_else(|| {
            GatewayError::connectivity(
                "connect",
                format!("unreachable endpoint {}", endpoint.web_socket_url),
            )
        })?;
        if ledger.current_fault() == Fault::RefuseConnections {
            return Err(GatewayError::connectivity(
                "connect",
                format!("connection refused by {}", endpoint.web_socket_url),
            ));
        }
        let connection: Arc<dyn LedgerConnection> = ledger.open_connection_at(endpoint.clone());
        Ok(connection)
    }
}
