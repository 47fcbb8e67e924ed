//! Ledger data model and the capability interface a node binding provides
//!
//! The gateway never talks to a concrete SDK directly. Any binding that
//! implements [`LedgerConnector`] and [`LedgerConnection`] can back it:
//! `ledger_node` speaks to a real node over websocket RPC, `ledger_memory`
//! is the in-process double used by tests and the dev ledger.

use crate::errors::{GatewayError, GatewayResult};
use crate::identifiers::{AccountId, ItemId, LocId};
use crate::runtime_metadata::MetadataRegistry;
use crate::signer::AccountSigner;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Lifecycle of a LOC, mutated only by the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LocState {
    Draft,
    ReviewPending,
    Open,
    Closed,
    Void,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LocKind {
    Identity,
    Transaction,
    Collection,
}

/// Legal Officer Case as observed through ledger queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocRecord {
    pub id: LocId,
    pub owner: AccountId,
    pub requester: Option<AccountId>,
    pub kind: LocKind,
    pub state: LocState,
}

/// State-filtered view used to re-validate a LOC
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocFilter {
    pub kind: LocKind,
    pub state: LocState,
    pub owner: AccountId,
    pub requester: AccountId,
}

impl LocFilter {
    pub fn closed_collection(owner: AccountId, requester: AccountId) -> Self {
        Self {
            kind: LocKind::Collection,
            state: LocState::Closed,
            owner,
            requester,
        }
    }

    pub fn matches(&self, record: &LocRecord) -> bool {
        record.kind == self.kind
            && record.state == self.state
            && record.owner == self.owner
            && record.requester == Some(self.requester)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFile {
    pub name: String,
    pub content_type: String,
    pub hash: ItemId,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermsAndConditionsElement {
    pub tc_type: String,
    pub tc_loc: LocId,
    pub details: String,
}

/// An item appended to a closed collection LOC. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionItem {
    pub loc_id: LocId,
    pub item_id: ItemId,
    pub description: String,
    pub files: Vec<ItemFile>,
    pub restricted_delivery: bool,
    pub terms_and_conditions: Vec<TermsAndConditionsElement>,
}

/// Mutating calls the gateway knows how to submit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerCall {
    AddCollectionItem {
        loc_id: LocId,
        item_id: ItemId,
        description: String,
        files: Vec<ItemFile>,
        restricted_delivery: bool,
        terms_and_conditions: Vec<TermsAndConditionsElement>,
    },
}

impl LedgerCall {
    pub fn name(&self) -> &'static str {
        match self {
            LedgerCall::AddCollectionItem { .. } => "logionLoc.addCollectionItem",
        }
    }
}

/// A call to be signed by `signer` at `nonce` when the binding encodes it
#[derive(Clone)]
pub struct AuthorizedCall {
    pub signer: Arc<dyn AccountSigner>,
    pub nonce: u64,
    pub call: LedgerCall,
}

impl AuthorizedCall {
    pub fn new(signer: Arc<dyn AccountSigner>, call: LedgerCall, nonce: u64) -> Self {
        Self {
            signer,
            nonce,
            call,
        }
    }

    pub fn account(&self) -> AccountId {
        self.signer.account()
    }
}

impl fmt::Debug for AuthorizedCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizedCall")
            .field("signer", &self.account())
            .field("nonce", &self.nonce)
            .field("call", &self.call)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    pub number: u64,
    pub hash: String,
    pub included_at: DateTime<Utc>,
}

/// Failure reported by the ledger for an included transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchError {
    /// Error raised by a runtime module: pallet index and encoded error
    Module { index: u8, error: [u8; 4] },
    BadOrigin,
    CannotLookup,
    Other(String),
    Token(String),
    Arithmetic(String),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::Module { index, error } => {
                write!(f, "Module {{ index: {index}, error: 0x{} }}", hex::encode(error))
            }
            DispatchError::BadOrigin => write!(f, "BadOrigin"),
            DispatchError::CannotLookup => write!(f, "CannotLookup"),
            DispatchError::Other(s) => write!(f, "Other({s})"),
            DispatchError::Token(s) => write!(f, "Token({s})"),
            DispatchError::Arithmetic(s) => write!(f, "Arithmetic({s})"),
        }
    }
}

/// Transaction pool / block status reported for one submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    Future,
    Ready,
    Broadcast,
    InBlock(BlockRef),
    Retracted,
    FinalityTimeout,
    Finalized(BlockRef),
    Usurped,
    Dropped,
    Invalid(String),
}

impl TxStatus {
    pub fn label(&self) -> &'static str {
        match self {
            TxStatus::Future => "future",
            TxStatus::Ready => "ready",
            TxStatus::Broadcast => "broadcast",
            TxStatus::InBlock(_) => "in_block",
            TxStatus::Retracted => "retracted",
            TxStatus::FinalityTimeout => "finality_timeout",
            TxStatus::Finalized(_) => "finalized",
            TxStatus::Usurped => "usurped",
            TxStatus::Dropped => "dropped",
            TxStatus::Invalid(_) => "invalid",
        }
    }
}

/// Status change plus the dispatch result known at that point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxStatusEvent {
    pub status: TxStatus,
    pub dispatch_error: Option<DispatchError>,
}

impl TxStatusEvent {
    pub fn new(status: TxStatus) -> Self {
        Self {
            status,
            dispatch_error: None,
        }
    }

    pub fn with_dispatch_error(mut self, error: DispatchError) -> Self {
        self.dispatch_error = Some(error);
        self
    }
}

type UnsubscribeFn = Box<dyn FnOnce() + Send>;

/// Idempotent handle releasing a status listener.
///
/// Clones share state: the wrapped action runs on the first `call` only,
/// whichever clone makes it.
#[derive(Clone)]
pub struct Unsubscribe {
    fired: Arc<AtomicBool>,
    action: Arc<Mutex<Option<UnsubscribeFn>>>,
}

impl Unsubscribe {
    pub fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            fired: Arc::new(AtomicBool::new(false)),
            action: Arc::new(Mutex::new(Some(Box::new(action)))),
        }
    }

    pub fn noop() -> Self {
        Self::new(|| {})
    }

    /// Returns true if this call performed the release
    pub fn call(&self) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        let action = match self.action.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(action) = action {
            action();
        }
        true
    }

    pub fn is_released(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("released", &self.is_released())
            .finish()
    }
}

/// Live status listener for one submitted transaction
#[derive(Debug)]
pub struct Subscription {
    pub events: mpsc::UnboundedReceiver<TxStatusEvent>,
    pub unsubscribe: Unsubscribe,
}

/// Why `submit_transaction` produced no subscription
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// The call could not enter the pool (bad signature or stale nonce)
    #[error("transaction rejected before dispatch: {0}")]
    Rejected(String),
    #[error("transport failure: {0}")]
    Transport(String),
}

/// Where to reach a node
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LedgerEndpoint {
    pub web_socket_url: String,
    pub directory_url: Option<String>,
}

impl LedgerEndpoint {
    pub fn parse(web_socket_url: &str, directory_url: Option<&str>) -> GatewayResult<Self> {
        let web_socket_url = web_socket_url.trim();
        if web_socket_url.is_empty() {
            return Err(GatewayError::validation("webSocketUrl", "must not be empty"));
        }
        if !(web_socket_url.starts_with("ws://") || web_socket_url.starts_with("wss://")) {
            return Err(GatewayError::validation(
                "webSocketUrl",
                "expected a ws:// or wss:// URL",
            ));
        }
        let directory_url = match directory_url.map(str::trim).filter(|d| !d.is_empty()) {
            Some(d) if d.starts_with("http://") || d.starts_with("https://") => Some(d.to_string()),
            Some(_) => {
                return Err(GatewayError::validation(
                    "directoryUrl",
                    "expected an http:// or https:// URL",
                ))
            }
            None => None,
        };
        Ok(Self {
            web_socket_url: web_socket_url.to_string(),
            directory_url,
        })
    }
}

/// Live connection to one ledger node
#[async_trait]
pub trait LedgerConnection: Send + Sync {
    fn endpoint(&self) -> &LedgerEndpoint;

    /// Runtime metadata of the connected node, read-only for the connection's lifetime
    fn metadata(&self) -> &MetadataRegistry;

    /// Next nonce the ledger expects from `account`
    async fn account_nonce(&self, account: &AccountId) -> GatewayResult<u64>;

    async fn submit_transaction(&self, call: AuthorizedCall) -> Result<Subscription, SubmitError>;

    async fn query_loc_record(&self, loc_id: LocId) -> GatewayResult<Option<LocRecord>>;

    async fn query_loc_records(&self, filter: &LocFilter) -> GatewayResult<Vec<LocRecord>>;

    async fn query_public_collection_item(
        &self,
        loc_id: LocId,
        item_id: ItemId,
    ) -> GatewayResult<Option<CollectionItem>>;

    /// Must be called exactly once per successful connect
    async fn disconnect(&self);
}

/// Opens connections; one per request
#[async_trait]
pub trait LedgerConnector: Send + Sync {
    async fn connect(&self, endpoint: &LedgerEndpoint) -> GatewayResult<Arc<dyn LedgerConnection>>;
}
