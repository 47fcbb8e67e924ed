//! End-to-end gateway operations against the in-process ledger

use std::sync::Arc;
use std::time::Duration;

use crate::errors::GatewayError;
use crate::ledger::{LocKind, LocRecord, LocState};
use crate::ledger_memory::{Fault, LOC_PALLET};
use crate::tests::test_utils::{
    account_for, item_id, suri_for, Fixture, COLLECTION_LOC_ID, NODE_URL,
};

#[tokio::test]
async fn added_item_can_be_read_back() {
    let fx = Fixture::new();

    fx.gateway
        .add_collection_item(fx.add_request(1, "Some description"))
        .await
        .expect("item should be added");

    let view = fx
        .gateway
        .get_collection_item(fx.get_request(1))
        .await
        .expect("item should be readable");
    assert_eq!(view.collection_loc_id, COLLECTION_LOC_ID);
    assert_eq!(view.item_id, item_id(1));
    assert_eq!(view.item_description, "Some description");

    assert_eq!(fx.ledger.item_count(), 1);
    assert_eq!(fx.ledger.connects(), 2);
    fx.assert_no_leaks();
}

#[tokio::test]
async fn decimal_loc_id_addresses_the_same_collection() {
    let fx = Fixture::new();
    let decimal = fx.loc_id.to_decimal_string();

    let mut add = fx.add_request(2, "decimal");
    add.collection_loc_id = decimal.clone();
    fx.gateway.add_collection_item(add).await.unwrap();

    // Both forms read the same item; the response echoes the caller's form
    let mut get = fx.get_request(2);
    get.collection_loc_id = decimal.clone();
    let view = fx.gateway.get_collection_item(get).await.unwrap();
    assert_eq!(view.collection_loc_id, decimal);

    let view = fx.gateway.get_collection_item(fx.get_request(2)).await.unwrap();
    assert_eq!(view.collection_loc_id, COLLECTION_LOC_ID);
}

#[tokio::test]
async fn uppercase_item_id_is_normalized() {
    let fx = Fixture::new();
    let mut add = fx.add_request(0xab, "upper");
    add.item_id = format!("0x{}", "AB".repeat(32));
    fx.gateway.add_collection_item(add).await.unwrap();

    let view = fx.gateway.get_collection_item(fx.get_request(0xab)).await.unwrap();
    assert_eq!(view.item_id, format!("0x{}", "ab".repeat(32)));
}

#[tokio::test]
async fn duplicate_item_reports_decoded_module_error() {
    let fx = Fixture::new();
    fx.gateway
        .add_collection_item(fx.add_request(3, "first"))
        .await
        .unwrap();

    let err = fx
        .gateway
        .add_collection_item(fx.add_request(3, "second"))
        .await
        .unwrap_err();
    match err {
        GatewayError::Dispatch { metadata } => {
            assert_eq!(metadata.pallet, LOC_PALLET);
            assert_eq!(metadata.error, "CollectionItemAlreadyExists");
            assert!(!metadata.details.is_empty());
        }
        other => panic!("expected dispatch error, got {other:?}"),
    }

    let stored = fx
        .gateway
        .get_collection_item(fx.get_request(3))
        .await
        .unwrap();
    assert_eq!(stored.item_description, "first");
    fx.assert_no_leaks();
}

#[tokio::test]
async fn open_loc_is_rejected_before_submission() {
    let fx = Fixture::new();
    fx.ledger.set_loc_state(fx.loc_id, LocState::Open).unwrap();

    let err = fx
        .gateway
        .add_collection_item(fx.add_request(4, "too early"))
        .await
        .unwrap_err();
    assert!(err.is_invalid_state(), "{err:?}");
    assert_eq!(fx.ledger.best_block(), 0);
    fx.assert_no_leaks();
}

#[tokio::test]
async fn non_collection_loc_is_rejected() {
    let fx = Fixture::new();
    fx.ledger
        .insert_loc(LocRecord {
            id: fx.loc_id,
            owner: fx.owner,
            requester: Some(fx.requester),
            kind: LocKind::Transaction,
            state: LocState::Closed,
        })
        .unwrap();

    let err = fx
        .gateway
        .add_collection_item(fx.add_request(5, "wrong kind"))
        .await
        .unwrap_err();
    assert!(err.is_invalid_state(), "{err:?}");
}

#[tokio::test]
async fn loc_without_requester_is_invalid() {
    let fx = Fixture::new();
    fx.ledger
        .insert_loc(LocRecord {
            id: fx.loc_id,
            owner: fx.owner,
            requester: None,
            kind: LocKind::Collection,
            state: LocState::Closed,
        })
        .unwrap();

    let err = fx
        .gateway
        .add_collection_item(fx.add_request(6, "orphan"))
        .await
        .unwrap_err();
    assert!(err.is_invalid_state(), "{err:?}");
}

#[tokio::test]
async fn missing_loc_is_not_found() {
    let fx = Fixture::new();
    let mut add = fx.add_request(7, "nowhere");
    add.collection_loc_id = "00000000-0000-4000-8000-000000000001".into();

    let err = fx.gateway.add_collection_item(add).await.unwrap_err();
    assert!(err.is_not_found(), "{err:?}");
    fx.assert_no_leaks();
}

#[tokio::test]
async fn signer_other_than_requester_is_refused() {
    let fx = Fixture::new();
    let stranger = [99u8; 32];
    assert_ne!(account_for(stranger), fx.requester);

    let mut add = fx.add_request(8, "intruder");
    add.suri = suri_for(stranger);
    let err = fx.gateway.add_collection_item(add).await.unwrap_err();
    assert!(err.is_invalid_state(), "{err:?}");
    assert_eq!(fx.ledger.item_count(), 0);
}

#[tokio::test]
async fn malformed_input_never_reaches_the_network() {
    let fx = Fixture::new();
    let cases = [
        ("collectionLocId", {
            let mut r = fx.add_request(9, "x");
            r.collection_loc_id = "not-a-loc".into();
            r
        }),
        ("itemId", {
            let mut r = fx.add_request(9, "x");
            r.item_id = "0x1234".into();
            r
        }),
        ("itemDescription", fx.add_request(9, "   ")),
        ("webSocketUrl", {
            let mut r = fx.add_request(9, "x");
            r.web_socket_url = "http://localhost:9944".into();
            r
        }),
        ("suri", {
            let mut r = fx.add_request(9, "x");
            r.suri = String::new();
            r
        }),
    ];

    for (field, request) in cases {
        let err = fx.gateway.add_collection_item(request).await.unwrap_err();
        match err {
            GatewayError::Validation { field: got, .. } => assert_eq!(got, field),
            other => panic!("{field}: expected validation error, got {other:?}"),
        }
    }

    let mut get = fx.get_request(9);
    get.item_id = "zz".into();
    assert!(fx.gateway.get_collection_item(get).await.unwrap_err().is_validation());

    assert_eq!(fx.network.connect_attempts(), 0);
}

#[tokio::test]
async fn unknown_endpoint_is_a_connectivity_failure() {
    let fx = Fixture::new();
    let mut add = fx.add_request(10, "x");
    add.web_socket_url = "ws://localhost:1".into();

    let err = fx.gateway.add_collection_item(add).await.unwrap_err();
    assert!(err.is_connectivity(), "{err:?}");
    assert_eq!(fx.network.connect_attempts(), 1);
    assert_eq!(fx.ledger.connects(), 0);
}

#[tokio::test]
async fn refused_connection_is_a_connectivity_failure() {
    let fx = Fixture::new();
    fx.ledger.set_fault(Fault::RefuseConnections).unwrap();

    let err = fx
        .gateway
        .get_collection_item(fx.get_request(1))
        .await
        .unwrap_err();
    assert!(err.is_connectivity(), "{err:?}");
}

#[tokio::test]
async fn stalled_submission_times_out_and_cleans_up() {
    let fx = Fixture::with_timeout(Duration::from_millis(50));
    fx.ledger.set_fault(Fault::StallBeforeInclusion).unwrap();

    let err = fx
        .gateway
        .add_collection_item(fx.add_request(11, "stalled"))
        .await
        .unwrap_err();
    assert!(err.is_connectivity(), "{err:?}");
    assert_eq!(fx.ledger.item_count(), 0);
    fx.assert_no_leaks();
}

#[tokio::test]
async fn dropped_status_stream_is_a_connectivity_failure() {
    let fx = Fixture::new();
    fx.ledger.set_fault(Fault::DropConnection).unwrap();

    let err = fx
        .gateway
        .add_collection_item(fx.add_request(12, "dropped"))
        .await
        .unwrap_err();
    assert!(err.is_connectivity(), "{err:?}");
    fx.assert_no_leaks();
}

#[tokio::test]
async fn pool_rejection_is_a_connectivity_failure() {
    let fx = Fixture::new();
    fx.ledger
        .set_fault(Fault::RejectInPool("priority too low".into()))
        .unwrap();

    let err = fx
        .gateway
        .add_collection_item(fx.add_request(13, "rejected"))
        .await
        .unwrap_err();
    assert!(err.is_connectivity(), "{err:?}");
    assert_eq!(fx.ledger.best_block(), 0);
    fx.assert_no_leaks();
}

#[tokio::test]
async fn cancelled_request_releases_its_connection() {
    let fx = Fixture::new();
    fx.ledger.set_fault(Fault::StallBeforeInclusion).unwrap();

    let pending = fx.gateway.add_collection_item(fx.add_request(14, "abandoned"));
    let cancelled = tokio::time::timeout(Duration::from_millis(50), pending).await;
    assert!(cancelled.is_err());

    // The disconnect runs on a spawned task
    for _ in 0..20 {
        if fx.ledger.open_connections() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    fx.assert_no_leaks();
}

#[tokio::test]
async fn unknown_item_is_not_found() {
    let fx = Fixture::new();
    let err = fx
        .gateway
        .get_collection_item(fx.get_request(0xee))
        .await
        .unwrap_err();
    assert!(err.is_not_found(), "{err:?}");
    assert!(err.to_string().contains(&item_id(0xee)));
    fx.assert_no_leaks();
}

#[tokio::test]
async fn aliased_endpoints_share_ledger_state() {
    let fx = Fixture::new();
    fx.network.add_alias("wss://node.example", fx.ledger.clone()).unwrap();

    let mut add = fx.add_request(15, "via alias");
    add.web_socket_url = "wss://node.example".into();
    fx.gateway.add_collection_item(add).await.unwrap();

    let mut get = fx.get_request(15);
    get.web_socket_url = NODE_URL.to_string();
    get.directory_url = None;
    assert!(fx.gateway.get_collection_item(get).await.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_adds_from_one_signer_get_consecutive_nonces() {
    let fx = Arc::new(Fixture::new());

    let tasks: Vec<_> = (0..16u8)
        .map(|n| {
            let fx = fx.clone();
            tokio::spawn(async move {
                fx.gateway
                    .add_collection_item(fx.add_request(0x80 + n, "concurrent"))
                    .await
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap().expect("every concurrent add should succeed");
    }
    assert_eq!(fx.ledger.item_count(), 16);
    fx.assert_no_leaks();
}
