//! Ledger binding for a live node, over the node's websocket JSON-RPC
//!
//! Calls are encoded against the runtime metadata the node serves at
//! connect time and signed with the caller's sr25519 key. Storage of the
//! `LogionLoc` pallet is read through dynamic queries and decoded into the
//! crate's ledger model.

use crate::errors::{GatewayError, GatewayResult, SafeLock};
use crate::identifiers::{AccountId, ItemId, LocId};
use crate::ledger::{
    AuthorizedCall, BlockRef, CollectionItem, DispatchError, ItemFile, LedgerCall,
    LedgerConnection, LedgerConnector, LedgerEndpoint, LocFilter, LocKind, LocRecord, LocState,
    SubmitError, Subscription, TermsAndConditionsElement, TxStatus, TxStatusEvent, Unsubscribe,
};
use crate::runtime_metadata::{ErrorVariant, MetadataRegistry, PalletMetadata};
use crate::signer::AccountSigner;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use subxt::backend::legacy::LegacyRpcMethods;
use subxt::backend::rpc::RpcClient;
use subxt::config::{Config, DefaultExtrinsicParamsBuilder};
use subxt::dynamic::Value;
use subxt::error::DispatchError as NodeDispatchError;
use subxt::ext::scale_value::{self, Composite, Primitive, ValueDef};
use subxt::tx::{Signer, TxInBlock, TxProgress, TxStatus as NodeTxStatus};
use subxt::utils::{AccountId32, MultiSignature, H256};
use subxt::{OnlineClient, PolkadotConfig};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const LOC_PALLET: &str = "LogionLoc";
const LOC_MAP: &str = "LocMap";
const ACCOUNT_LOCS_MAP: &str = "AccountLocsMap";
const COLLECTION_ITEMS_MAP: &str = "CollectionItemsMap";

/// JSON-RPC error messages of transactions the pool refused to admit
const POOL_REJECTIONS: &[&str] = &[
    "Invalid Transaction",
    "Unknown Transaction Validity",
    "Transaction is temporarily banned",
    "Transaction Already Imported",
    "Priority is too low",
    "Immediately Dropped",
];

type NodeClient = OnlineClient<PolkadotConfig>;
type NodeHash = <PolkadotConfig as Config>::Hash;

/// Opens websocket connections to ledger nodes
#[derive(Debug, Clone)]
pub struct NodeConnector {
    connect_timeout: Duration,
}

impl Default for NodeConnector {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl NodeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    async fn open(endpoint: &LedgerEndpoint) -> Result<NodeSession, subxt::Error> {
        let url = endpoint.web_socket_url.as_str();
        let rpc = if url.starts_with("wss://") {
            RpcClient::from_url(url).await?
        } else {
            RpcClient::from_insecure_url(url).await?
        };
        let api = NodeClient::from_rpc_client(rpc.clone()).await?;
        Ok(NodeSession {
            api,
            rpc: LegacyRpcMethods::new(rpc),
        })
    }
}

#[async_trait]
impl LedgerConnector for NodeConnector {
    async fn connect(&self, endpoint: &LedgerEndpoint) -> GatewayResult<Arc<dyn LedgerConnection>> {
        let session = match tokio::time::timeout(self.connect_timeout, Self::open(endpoint)).await {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                warn!(endpoint = %endpoint.web_socket_url, "ledger node unreachable: {e}");
                return Err(GatewayError::connectivity("connect", e.to_string()));
            }
            Err(_) => {
                warn!(endpoint = %endpoint.web_socket_url, "ledger node did not answer in time");
                return Err(GatewayError::connectivity(
                    "connect",
                    format!("no answer within {} ms", self.connect_timeout.as_millis()),
                ));
            }
        };

        let spec_version = session.api.runtime_version().spec_version;
        let metadata = registry_from(&session.api.metadata(), spec_version);
        info!(
            endpoint = %endpoint.web_socket_url,
            spec_version = metadata.spec_version(),
            "connected to ledger node"
        );
        let connection: Arc<dyn LedgerConnection> = Arc::new(NodeConnection {
            endpoint: endpoint.clone(),
            metadata,
            session: Mutex::new(Some(session)),
            closed: watch::channel(false).0,
        });
        Ok(connection)
    }
}

#[derive(Clone)]
struct NodeSession {
    api: NodeClient,
    rpc: LegacyRpcMethods<PolkadotConfig>,
}

/// One websocket connection to a node
pub struct NodeConnection {
    endpoint: LedgerEndpoint,
    metadata: MetadataRegistry,
    session: Mutex<Option<NodeSession>>,
    closed: watch::Sender<bool>,
}

impl NodeConnection {
    fn session(&self, operation: &str) -> GatewayResult<NodeSession> {
        self.session
            .safe_lock()?
            .clone()
            .ok_or_else(|| GatewayError::connectivity(operation, "connection closed"))
    }

    async fn fetch(
        &self,
        operation: &str,
        entry: &str,
        keys: Vec<Value>,
    ) -> GatewayResult<Option<scale_value::Value<u32>>> {
        let session = self.session(operation)?;
        let address = subxt::dynamic::storage(LOC_PALLET, entry, keys);
        let storage = session
            .api
            .storage()
            .at_latest()
            .await
            .map_err(|e| GatewayError::connectivity(operation, e.to_string()))?;
        let Some(thunk) = storage
            .fetch(&address)
            .await
            .map_err(|e| GatewayError::connectivity(operation, e.to_string()))?
        else {
            return Ok(None);
        };
        thunk
            .to_value()
            .map(Some)
            .map_err(|e| GatewayError::internal(format!("cannot decode {LOC_PALLET}.{entry}: {e}")))
    }
}

#[async_trait]
impl LedgerConnection for NodeConnection {
    fn endpoint(&self) -> &LedgerEndpoint {
        &self.endpoint
    }

    fn metadata(&self) -> &MetadataRegistry {
        &self.metadata
    }

    async fn account_nonce(&self, account: &AccountId) -> GatewayResult<u64> {
        let session = self.session("account_nonce")?;
        session
            .rpc
            .system_account_next_index(&AccountId32(*account.as_bytes()))
            .await
            .map_err(|e| GatewayError::connectivity("account_nonce", e.to_string()))
    }

    async fn submit_transaction(&self, call: AuthorizedCall) -> Result<Subscription, SubmitError> {
        let session = self
            .session("submit")
            .map_err(|e| SubmitError::Transport(e.to_string()))?;
        let (call_name, fields) = call_fields(&call.call);
        let payload = subxt::dynamic::tx(LOC_PALLET, call_name, fields);
        let signer = NodeSigner(call.signer.clone());
        let params = DefaultExtrinsicParamsBuilder::<PolkadotConfig>::new()
            .nonce(call.nonce)
            .build();
        let extrinsic = session
            .api
            .tx()
            .create_signed_offline(&payload, &signer, params)
            .map_err(|e| SubmitError::Rejected(format!("cannot encode {}: {e}", call.call.name())))?;
        let progress = extrinsic.submit_and_watch().await.map_err(submit_error)?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (unsub_tx, unsub_rx) = oneshot::channel();
        let unsubscribe = Unsubscribe::new(move || {
            let _ = unsub_tx.send(());
        });
        debug!(call = call.call.name(), nonce = call.nonce, "transaction submitted to node");
        tokio::spawn(drive_progress(
            session.api,
            progress,
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
        let value = self
            .fetch("query_loc_record", LOC_MAP, vec![Value::u128(loc_id.as_u128())])
            .await?;
        value.map(|v| loc_record_from_value(loc_id, &v)).transpose()
    }

    async fn query_loc_records(&self, filter: &LocFilter) -> GatewayResult<Vec<LocRecord>> {
        let ids = self
            .fetch(
                "query_loc_records",
                ACCOUNT_LOCS_MAP,
                vec![Value::from_bytes(filter.requester.as_bytes())],
            )
            .await?
            .map(|v| loc_ids_of(&v))
            .unwrap_or_default();

        let mut records = Vec::new();
        for id in ids {
            if let Some(record) = self.query_loc_record(id).await? {
                if filter.matches(&record) {
                    records.push(record);
                }
            }
        }
        Ok(records)
    }

    async fn query_public_collection_item(
        &self,
        loc_id: LocId,
        item_id: ItemId,
    ) -> GatewayResult<Option<CollectionItem>> {
        let value = self
            .fetch(
                "query_public_collection_item",
                COLLECTION_ITEMS_MAP,
                vec![Value::u128(loc_id.as_u128()), Value::from_bytes(item_id.as_bytes())],
            )
            .await?;
        value
            .map(|v| collection_item_from_value(loc_id, item_id, &v))
            .transpose()
    }

    async fn disconnect(&self) {
        let session = match self.session.safe_lock() {
            Ok(mut guard) => guard.take(),
            Err(e) => {
                warn!(endpoint = %self.endpoint.web_socket_url, "cannot close connection: {e}");
                None
            }
        };
        match session {
            Some(session) => {
                self.closed.send_replace(true);
                drop(session);
                debug!(endpoint = %self.endpoint.web_socket_url, "connection closed");
            }
            None => debug!(endpoint = %self.endpoint.web_socket_url, "connection already closed"),
        }
    }
}

/// Signs extrinsic payloads with the caller's key
struct NodeSigner(Arc<dyn AccountSigner>);

impl Signer<PolkadotConfig> for NodeSigner {
    fn account_id(&self) -> <PolkadotConfig as Config>::AccountId {
        AccountId32(*self.0.account().as_bytes())
    }

    fn address(&self) -> <PolkadotConfig as Config>::Address {
        self.account_id().into()
    }

    fn sign(&self, signer_payload: &[u8]) -> <PolkadotConfig as Config>::Signature {
        MultiSignature::Sr25519(self.0.sign(signer_payload))
    }
}

/// Forwards node statuses until a terminal one, the listener is released or
/// the connection closes
async fn drive_progress(
    api: NodeClient,
    mut progress: TxProgress<PolkadotConfig, NodeClient>,
    events: mpsc::UnboundedSender<TxStatusEvent>,
    mut unsubscribed: oneshot::Receiver<()>,
    mut closed: watch::Receiver<bool>,
) {
    loop {
        let next = tokio::select! {
            _ = &mut unsubscribed => return,
            _ = closed.wait_for(|c| *c) => return,
            next = progress.next() => next,
        };
        let status = match next {
            Some(Ok(status)) => status,
            Some(Err(e)) => {
                warn!("transaction status stream failed: {e}");
                return;
            }
            None => return,
        };
        let event = match status {
            NodeTxStatus::Validated => TxStatusEvent::new(TxStatus::Ready),
            NodeTxStatus::Broadcasted { .. } => TxStatusEvent::new(TxStatus::Broadcast),
            NodeTxStatus::NoLongerInBestBlock => TxStatusEvent::new(TxStatus::Retracted),
            NodeTxStatus::InBestBlock(tx) => inclusion_event(&api, tx, TxStatus::InBlock).await,
            NodeTxStatus::InFinalizedBlock(tx) => {
                inclusion_event(&api, tx, TxStatus::Finalized).await
            }
            NodeTxStatus::Invalid { message } => TxStatusEvent::new(TxStatus::Invalid(message)),
            NodeTxStatus::Dropped { message } => {
                debug!(%message, "transaction dropped by node");
                TxStatusEvent::new(TxStatus::Dropped)
            }
            NodeTxStatus::Error { message } => {
                warn!(%message, "node reported a transaction status error");
                return;
            }
        };
        if events.send(event).is_err() {
            return;
        }
    }
}

async fn inclusion_event(
    api: &NodeClient,
    tx: TxInBlock<PolkadotConfig, NodeClient>,
    status: fn(BlockRef) -> TxStatus,
) -> TxStatusEvent {
    let block = block_ref(api, tx.block_hash()).await;
    let event = TxStatusEvent::new(status(block));
    match tx.wait_for_success().await {
        Ok(_) => event,
        Err(subxt::Error::Runtime(error)) => event.with_dispatch_error(dispatch_error(error)),
        Err(e) => event.with_dispatch_error(DispatchError::Other(e.to_string())),
    }
}

async fn block_ref(api: &NodeClient, hash: NodeHash) -> BlockRef {
    let number = match api.blocks().at(hash).await {
        Ok(block) => block.number().into(),
        Err(e) => {
            debug!("block header unavailable: {e}");
            0
        }
    };
    BlockRef {
        number,
        hash: hash_hex(&hash),
        included_at: Utc::now(),
    }
}

fn hash_hex(hash: &H256) -> String {
    format!("0x{}", hex::encode(hash.as_bytes()))
}

fn dispatch_error(error: NodeDispatchError) -> DispatchError {
    match error {
        NodeDispatchError::Module(module) => {
            let bytes = module.bytes();
            DispatchError::Module {
                index: bytes[0],
                error: [bytes[1], bytes[2], bytes[3], bytes[4]],
            }
        }
        NodeDispatchError::BadOrigin => DispatchError::BadOrigin,
        NodeDispatchError::CannotLookup => DispatchError::CannotLookup,
        NodeDispatchError::Token(token) => DispatchError::Token(format!("{token:?}")),
        NodeDispatchError::Arithmetic(arithmetic) => {
            DispatchError::Arithmetic(format!("{arithmetic:?}"))
        }
        other => DispatchError::Other(other.to_string()),
    }
}

fn submit_error(error: subxt::Error) -> SubmitError {
    let message = error.to_string();
    if is_pool_rejection(&message) {
        SubmitError::Rejected(message)
    } else {
        SubmitError::Transport(message)
    }
}

fn is_pool_rejection(message: &str) -> bool {
    POOL_REJECTIONS.iter().any(|m| message.contains(m))
}

/// Registry of module errors, pallets named the way dispatch errors are reported
fn registry_from(metadata: &subxt::Metadata, spec_version: u32) -> MetadataRegistry {
    metadata
        .pallets()
        .fold(MetadataRegistry::new(spec_version), |registry, pallet| {
            let errors = pallet
                .error_variants()
                .unwrap_or(&[])
                .iter()
                .map(|variant| ErrorVariant {
                    name: variant.name.clone(),
                    docs: variant.docs.clone(),
                })
                .collect();
            registry.with_pallet(PalletMetadata {
                name: section_name(pallet.name()),
                index: pallet.index(),
                errors,
            })
        })
}

/// `LogionLoc` -> `logionLoc`
fn section_name(pallet: &str) -> String {
    let mut chars = pallet.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn call_fields(call: &LedgerCall) -> (&'static str, Vec<Value>) {
    match call {
        LedgerCall::AddCollectionItem {
            loc_id,
            item_id,
            description,
            files,
            restricted_delivery,
            terms_and_conditions,
        } => (
            "add_collection_item",
            vec![
                Value::u128(loc_id.as_u128()),
                Value::from_bytes(item_id.as_bytes()),
                Value::from_bytes(description.as_bytes()),
                Value::unnamed_composite(files.iter().map(file_value)),
                // item token
                Value::unnamed_variant("None", []),
                Value::bool(*restricted_delivery),
                Value::unnamed_composite(terms_and_conditions.iter().map(terms_value)),
            ],
        ),
    }
}

fn file_value(file: &ItemFile) -> Value {
    Value::named_composite([
        ("name", Value::from_bytes(file.name.as_bytes())),
        ("content_type", Value::from_bytes(file.content_type.as_bytes())),
        ("hash", Value::from_bytes(file.hash.as_bytes())),
        ("size", Value::u128(u128::from(file.size))),
    ])
}

fn terms_value(terms: &TermsAndConditionsElement) -> Value {
    Value::named_composite([
        ("tc_type", Value::from_bytes(terms.tc_type.as_bytes())),
        ("tc_loc", Value::u128(terms.tc_loc.as_u128())),
        ("details", Value::from_bytes(terms.details.as_bytes())),
    ])
}

fn field<'a, T>(value: &'a scale_value::Value<T>, name: &str) -> Option<&'a scale_value::Value<T>> {
    match &value.value {
        ValueDef::Composite(Composite::Named(fields)) => {
            fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
        }
        _ => None,
    }
}

fn variant_of<T>(value: &scale_value::Value<T>) -> Option<(&str, &Composite<T>)> {
    match &value.value {
        ValueDef::Variant(variant) => Some((variant.name.as_str(), &variant.values)),
        _ => None,
    }
}

fn collect_bytes<T>(value: &scale_value::Value<T>, out: &mut Vec<u8>) -> bool {
    match &value.value {
        ValueDef::Primitive(Primitive::U128(n)) => match u8::try_from(*n) {
            Ok(byte) => {
                out.push(byte);
                true
            }
            Err(_) => false,
        },
        ValueDef::Composite(composite) => composite.values().all(|v| collect_bytes(v, out)),
        _ => false,
    }
}

fn bytes_of<T>(value: &scale_value::Value<T>) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    collect_bytes(value, &mut out).then_some(out)
}

fn bytes32_of<T>(value: &scale_value::Value<T>) -> Option<[u8; 32]> {
    bytes_of(value)?.try_into().ok()
}

fn text_of<T>(value: &scale_value::Value<T>) -> Option<String> {
    bytes_of(value).map(|bytes| {
        String::from_utf8(bytes).unwrap_or_else(|e| format!("0x{}", hex::encode(e.into_bytes())))
    })
}

/// `Account(id)`, possibly wrapped in `Some`, is the only requester the gateway acts for
fn requester_of<T>(value: &scale_value::Value<T>) -> Option<AccountId> {
    let (name, values) = variant_of(value)?;
    let inner = values.values().next()?;
    match name {
        "Account" => bytes32_of(inner).map(AccountId::new),
        "Some" => bytes32_of(inner).map(AccountId::new).or_else(|| requester_of(inner)),
        _ => None,
    }
}

fn undecodable(loc_id: LocId, what: &str) -> GatewayError {
    GatewayError::internal(format!("LOC {loc_id}: undecodable {what}"))
}

fn loc_record_from_value<T>(id: LocId, value: &scale_value::Value<T>) -> GatewayResult<LocRecord> {
    let owner = field(value, "owner")
        .and_then(bytes32_of)
        .map(AccountId::new)
        .ok_or_else(|| undecodable(id, "owner"))?;
    let requester = field(value, "requester").and_then(requester_of);
    let kind = match field(value, "loc_type").and_then(variant_of).map(|(name, _)| name) {
        Some("Transaction") => LocKind::Transaction,
        Some("Identity") => LocKind::Identity,
        Some("Collection") => LocKind::Collection,
        _ => return Err(undecodable(id, "loc_type")),
    };
    let closed = field(value, "closed").and_then(|v| v.as_bool()).unwrap_or(false);
    let voided = matches!(field(value, "void_info").and_then(variant_of), Some(("Some", _)));
    let state = if voided {
        LocState::Void
    } else if closed {
        LocState::Closed
    } else {
        LocState::Open
    };
    Ok(LocRecord {
        id,
        owner,
        requester,
        kind,
        state,
    })
}

fn loc_ids_of<T>(value: &scale_value::Value<T>) -> Vec<LocId> {
    match &value.value {
        ValueDef::Composite(ids) => ids.values().filter_map(|v| v.as_u128()).map(LocId::new).collect(),
        _ => Vec::new(),
    }
}

fn file_of<T>(value: &scale_value::Value<T>) -> Option<ItemFile> {
    Some(ItemFile {
        name: field(value, "name").and_then(text_of)?,
        content_type: field(value, "content_type").and_then(text_of)?,
        hash: ItemId::new(field(value, "hash").and_then(bytes32_of)?),
        size: u64::try_from(field(value, "size")?.as_u128()?).ok()?,
    })
}

fn terms_of<T>(value: &scale_value::Value<T>) -> Option<TermsAndConditionsElement> {
    Some(TermsAndConditionsElement {
        tc_type: field(value, "tc_type").and_then(text_of)?,
        tc_loc: LocId::new(field(value, "tc_loc")?.as_u128()?),
        details: field(value, "details").and_then(text_of)?,
    })
}

fn list_of<T, U>(
    value: Option<&scale_value::Value<T>>,
    decode: impl Fn(&scale_value::Value<T>) -> Option<U>,
) -> Vec<U> {
    match value.map(|v| &v.value) {
        Some(ValueDef::Composite(list)) => list.values().filter_map(decode).collect(),
        _ => Vec::new(),
    }
}

fn collection_item_from_value<T>(
    loc_id: LocId,
    item_id: ItemId,
    value: &scale_value::Value<T>,
) -> GatewayResult<CollectionItem> {
    let description = field(value, "description")
        .and_then(text_of)
        .ok_or_else(|| undecodable(loc_id, "collection item description"))?;
    Ok(CollectionItem {
        loc_id,
        item_id,
        description,
        files: list_of(field(value, "files"), file_of),
        restricted_delivery: field(value, "restricted_delivery")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
        terms_and_conditions: list_of(field(value, "terms_and_conditions"), terms_of),
    })
}
