// Shared fixtures for gateway scenario tests

use std::sync::Arc;
use std::time::Duration;

use crate::gateway::{AddItemRequest, CollectionGateway, GetItemRequest};
use crate::identifiers::{AccountId, LocId};
use crate::ledger::{LocKind, LocRecord, LocState};
use crate::ledger_memory::{MemoryLedger, MemoryNetwork};
use crate::signer::{AccountSigner, SuriResolver, Sr25519Signer};

pub const NODE_URL: &str = "ws://localhost:9944";
pub const DIRECTORY_URL: &str = "http://localhost:8090";
pub const COLLECTION_LOC_ID: &str = "d61e2e12-6c06-4425-aeee-2a0e969ac14e";
pub const OWNER_SEED: [u8; 32] = [7; 32];
pub const REQUESTER_SEED: [u8; 32] = [11; 32];

pub fn suri_for(seed: [u8; 32]) -> String {
    format!("0x{}", hex::encode(seed))
}

pub fn account_for(seed: [u8; 32]) -> AccountId {
    Sr25519Signer::from_seed(seed).unwrap().account()
}

pub fn item_id(byte: u8) -> String {
    format!("0x{}", hex::encode([byte; 32]))
}

/// One node, one closed collection LOC owned by `owner` and requested by `requester`
pub struct Fixture {
    pub network: Arc<MemoryNetwork>,
    pub ledger: Arc<MemoryLedger>,
    pub gateway: CollectionGateway,
    pub owner: AccountId,
    pub requester: AccountId,
    pub loc_id: LocId,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(5))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let network = Arc::new(MemoryNetwork::new());
        let ledger = network.add_node(NODE_URL).unwrap();
        let owner = account_for(OWNER_SEED);
        let requester = account_for(REQUESTER_SEED);
        let loc_id: LocId = COLLECTION_LOC_ID.parse().unwrap();
        ledger
            .insert_loc(LocRecord {
                id: loc_id,
                owner,
                requester: Some(requester),
                kind: LocKind::Collection,
                state: LocState::Closed,
            })
            .unwrap();
        let gateway = CollectionGateway::new(network.clone(), Arc::new(SuriResolver))
            .with_submission_timeout(timeout);
        Self {
            network,
            ledger,
            gateway,
            owner,
            requester,
            loc_id,
        }
    }

    pub fn add_request(&self, item: u8, description: &str) -> AddItemRequest {
        AddItemRequest {
            collection_loc_id: COLLECTION_LOC_ID.to_string(),
            web_socket_url: NODE_URL.to_string(),
            directory_url: Some(DIRECTORY_URL.to_string()),
            suri: suri_for(REQUESTER_SEED),
            item_id: item_id(item),
            item_description: description.to_string(),
        }
    }

    pub fn get_request(&self, item: u8) -> GetItemRequest {
        GetItemRequest {
            collection_loc_id: COLLECTION_LOC_ID.to_string(),
            item_id: item_id(item),
            web_socket_url: NODE_URL.to_string(),
            directory_url: Some(DIRECTORY_URL.to_string()),
        }
    }

    /// No connection, subscription or double disconnect left behind
    pub fn assert_no_leaks(&self) {
        assert_eq!(self.ledger.open_connections(), 0, "open connections");
        assert_eq!(self.ledger.active_subscriptions(), 0, "active subscriptions");
        assert_eq!(self.ledger.redundant_disconnects(), 0, "redundant disconnects");
    }
}
