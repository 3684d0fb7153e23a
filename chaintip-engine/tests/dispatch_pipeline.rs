// Dispatch semantics on the UTXO and ledger platforms: one transaction per
// batch, shared hashes, failure reporting, and the audit trail.

use chaintip_engine::events::{EventBus, TransferEvent};
use chaintip_engine::mocks::{
    test_registry, MemoryDatabase, MockLedgerNode, MockUtxoNode, RecordingSubscriber,
};
use chaintip_engine::node::Utxo;
use chaintip_engine::orchestrator::TransferOrchestrator;
use chaintip_engine::platform::ledger::LedgerAdapter;
use chaintip_engine::platform::utxo::UtxoAdapter;
use chaintip_engine::platform::PlatformAdapter;
use chaintip_engine::types::{
    DestinationItem, RoutingContext, SourceWallet, TransferIntent, TransferPurpose,
};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;

fn context() -> RoutingContext {
    RoutingContext {
        chat_id: 5,
        message_id: 6,
    }
}

fn success_hashes(events: &[TransferEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            TransferEvent::Success { tx_hash, .. } => Some(tx_hash.clone()),
            _ => None,
        })
        .collect()
}

mod utxo {
    use super::*;

    pub struct Setup {
        pub orchestrator: TransferOrchestrator,
        pub adapter: Arc<UtxoAdapter>,
        pub node: Arc<MockUtxoNode>,
        pub db: Arc<MemoryDatabase>,
        pub subscriber: Arc<RecordingSubscriber>,
    }

    pub fn setup(node: Arc<MockUtxoNode>) -> Setup {
        let registry = Arc::new(test_registry());
        let bus = Arc::new(EventBus::new());
        let subscriber = Arc::new(RecordingSubscriber::new("recorder"));
        bus.subscribe(subscriber.clone());
        let db = Arc::new(MemoryDatabase::new());
        let adapter = Arc::new(UtxoAdapter::new(
            "bitcoin",
            bitcoin::Network::Bitcoin,
            registry.clone(),
            node.clone(),
            bus.clone(),
            db.clone(),
        ));
        let mut orchestrator = TransferOrchestrator::new(registry, bus);
        orchestrator.register_adapter(adapter.clone());
        Setup {
            orchestrator,
            adapter,
            node,
            db,
            subscriber,
        }
    }

    pub fn utxo(byte: u8, value: u64) -> Utxo {
        Utxo {
            txid: format!("{:02x}", byte).repeat(32),
            vout: 0,
            value,
        }
    }
}

#[tokio::test]
async fn utxo_batch_is_one_transaction_with_a_shared_hash() {
    let node = Arc::new(MockUtxoNode::new(vec![utxo::utxo(1, 50_000_000)], 2));
    let s = utxo::setup(node);

    let wallet = s.adapter.generate_wallet().unwrap();
    let source = SourceWallet {
        label: "funder".into(),
        mention: "@funder".into(),
        address: wallet.address.clone(),
        key: wallet.key,
        owner: Some(1),
    };
    let destinations: Vec<_> = (0..3)
        .map(|n| {
            let w = s.adapter.generate_wallet().unwrap();
            DestinationItem {
                label: format!("user{}", n),
                mention: format!("@user{}", n),
                address: w.address,
                owner: Some(n as i64),
                value: Decimal::from_str("0.001").unwrap(),
                purpose: TransferPurpose::Rain,
                aux_ref: None,
            }
        })
        .collect();

    let intent = TransferIntent {
        source,
        destinations,
        coin: "BTC".into(),
        fee: Some(Decimal::from_str("0.0001").unwrap()),
    };
    s.orchestrator.submit(intent, context()).unwrap();
    s.adapter.dispatch_once().await;

    // One broadcast carrying all four legs (three rains plus the fee).
    assert_eq!(s.node.broadcasts().len(), 1);
    let events = s.subscriber.events();
    let hashes = success_hashes(&events);
    assert_eq!(hashes.len(), 4);
    assert!(hashes.iter().all(|h| h == &hashes[0]));

    match events.last().unwrap() {
        TransferEvent::Success { purpose, .. } => assert_eq!(*purpose, TransferPurpose::Fee),
        other => panic!("unexpected event: {:?}", other),
    }

    // One audit row per leg, all on the same transaction.
    let ops = s.db.operations();
    assert_eq!(ops.len(), 4);
    assert!(ops.iter().all(|op| op.tx_hash == hashes[0]));
    assert!(ops.iter().all(|op| op.chat_id == 5));
}

#[tokio::test]
async fn utxo_broadcast_failure_reports_once_and_drops_the_batch() {
    let node = Arc::new(MockUtxoNode::new(vec![utxo::utxo(1, 50_000_000)], 2));
    node.set_fail(true);
    let s = utxo::setup(node);

    let wallet = s.adapter.generate_wallet().unwrap();
    let dest_wallet = s.adapter.generate_wallet().unwrap();
    let intent = TransferIntent {
        source: SourceWallet {
            label: "funder".into(),
            mention: "@funder".into(),
            address: wallet.address.clone(),
            key: wallet.key,
            owner: Some(1),
        },
        destinations: vec![DestinationItem {
            label: "user".into(),
            mention: "@user".into(),
            address: dest_wallet.address,
            owner: Some(2),
            value: Decimal::from_str("0.001").unwrap(),
            purpose: TransferPurpose::Withdraw,
            aux_ref: None,
        }],
        coin: "BTC".into(),
        fee: None,
    };
    s.orchestrator.submit(intent, context()).unwrap();
    s.adapter.dispatch_once().await;

    let events = s.subscriber.events();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0],
        TransferEvent::Error {
            purpose: TransferPurpose::Withdraw,
            ..
        }
    ));
    assert!(s.db.operations().is_empty());

    // The queue is empty; a recovered node gets no resubmission.
    s.node.set_fail(false);
    s.adapter.dispatch_once().await;
    assert!(s.node.broadcasts().is_empty());
    assert_eq!(s.subscriber.events().len(), 1);
}

#[tokio::test]
async fn audit_failure_never_blocks_dispatch() {
    let node = Arc::new(MockUtxoNode::new(vec![utxo::utxo(1, 50_000_000)], 2));
    let s = utxo::setup(node);
    s.db.set_fail(true);

    let wallet = s.adapter.generate_wallet().unwrap();
    let dest_wallet = s.adapter.generate_wallet().unwrap();
    let intent = TransferIntent {
        source: SourceWallet {
            label: "funder".into(),
            mention: "@funder".into(),
            address: wallet.address.clone(),
            key: wallet.key,
            owner: Some(1),
        },
        destinations: vec![DestinationItem {
            label: "user".into(),
            mention: "@user".into(),
            address: dest_wallet.address,
            owner: Some(2),
            value: Decimal::from_str("0.002").unwrap(),
            purpose: TransferPurpose::Tip,
            aux_ref: None,
        }],
        coin: "BTC".into(),
        fee: None,
    };
    s.orchestrator.submit(intent, context()).unwrap();
    s.adapter.dispatch_once().await;

    // The leg still succeeds and is broadcast to subscribers.
    assert_eq!(success_hashes(&s.subscriber.events()).len(), 1);
    assert_eq!(s.node.broadcasts().len(), 1);
}

mod ledger {
    use super::*;

    pub struct Setup {
        pub orchestrator: TransferOrchestrator,
        pub adapter: Arc<LedgerAdapter>,
        pub node: Arc<MockLedgerNode>,
        pub subscriber: Arc<RecordingSubscriber>,
    }

    pub fn setup(multi: bool) -> Setup {
        let registry = Arc::new(test_registry());
        let bus = Arc::new(EventBus::new());
        let subscriber = Arc::new(RecordingSubscriber::new("recorder"));
        bus.subscribe(subscriber.clone());
        let node = Arc::new(MockLedgerNode::new(multi));
        let adapter = Arc::new(
            LedgerAdapter::new(
                "ledger",
                "tip",
                registry.clone(),
                node.clone(),
                bus.clone(),
                Arc::new(MemoryDatabase::new()),
            )
            .unwrap(),
        );
        let mut orchestrator = TransferOrchestrator::new(registry, bus);
        orchestrator.register_adapter(adapter.clone());
        Setup {
            orchestrator,
            adapter,
            node,
            subscriber,
        }
    }

    pub fn intent(adapter: &LedgerAdapter, n_dests: usize) -> TransferIntent {
        let source = adapter.generate_wallet().unwrap();
        TransferIntent {
            source: SourceWallet {
                label: "funder".into(),
                mention: "@funder".into(),
                address: source.address,
                key: source.key,
                owner: Some(1),
            },
            destinations: (0..n_dests)
                .map(|n| {
                    let w = adapter.generate_wallet().unwrap();
                    DestinationItem {
                        label: format!("user{}", n),
                        mention: format!("@user{}", n),
                        address: w.address,
                        owner: Some(n as i64),
                        value: Decimal::from_str("1.5").unwrap(),
                        purpose: TransferPurpose::Rain,
                        aux_ref: None,
                    }
                })
                .collect(),
            coin: "LDG".into(),
            fee: None,
        }
    }
}

#[tokio::test]
async fn multi_send_fans_out_in_one_transaction() {
    let s = ledger::setup(true);
    let intent = ledger::intent(&s.adapter, 3);
    s.orchestrator.submit(intent, context()).unwrap();
    s.adapter.dispatch_once().await;

    let sent = s.node.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1.len(), 3);
    // 1.5 LDG at 6 decimals.
    assert!(sent[0].1.iter().all(|o| o.amount == 1_500_000));
    assert!(sent[0].1.iter().all(|o| o.denom == "LDG"));

    let hashes = success_hashes(&s.subscriber.events());
    assert_eq!(hashes.len(), 3);
    assert!(hashes.iter().all(|h| h == &hashes[0]));
}

#[tokio::test]
async fn without_multi_send_each_leg_is_its_own_transfer() {
    let s = ledger::setup(false);
    let intent = ledger::intent(&s.adapter, 3);
    s.orchestrator.submit(intent, context()).unwrap();
    s.adapter.dispatch_once().await;

    let sent = s.node.sent();
    assert_eq!(sent.len(), 3);
    assert!(sent.iter().all(|(_, outputs)| outputs.len() == 1));

    let hashes = success_hashes(&s.subscriber.events());
    assert_eq!(hashes.len(), 3);
    assert_eq!(hashes.iter().collect::<std::collections::HashSet<_>>().len(), 3);
}

#[tokio::test]
async fn ledger_failure_reports_once() {
    let s = ledger::setup(true);
    s.node.set_fail(true);
    let intent = ledger::intent(&s.adapter, 2);
    s.orchestrator.submit(intent, context()).unwrap();
    s.adapter.dispatch_once().await;

    let events = s.subscriber.events();
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], TransferEvent::Error { .. }));
    s.adapter.dispatch_once().await;
    assert_eq!(s.subscriber.events().len(), 1);
}

#[tokio::test]
async fn wallets_are_platform_shaped() {
    let s = ledger::setup(true);
    let ledger_wallet = s.orchestrator.generate_wallet("ledger").unwrap();
    assert!(s.orchestrator.check_address("LDG", &ledger_wallet.address).unwrap());
    assert!(!s.orchestrator
        .check_address("LDG", "0x00000000000000000000000000000000000000aa")
        .unwrap());
}
