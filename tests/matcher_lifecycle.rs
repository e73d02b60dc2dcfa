//! End-to-end tests driving the matcher through its public surface: submit
//! orders onto a `LocalEventQueue`, let the matcher's consumer apply them,
//! and assert on order status, balances, and the pair's resting book.
//!
//! These exercise the same scenarios as `book::tests` (simple cross,
//! tick-size aggregation, partial-fill-then-cancel) but through the full
//! submit -> queue -> consumer -> book -> address-actor path, plus the
//! recovery path (restart and replay) that unit tests below the actor
//! layer can't reach.

use dex_matcher::actors::MatcherActor;
use dex_matcher::book::rules::{MatchingRules, TickSize};
use dex_matcher::chain::{BlockchainContext, MockChain};
use dex_matcher::domain::{AssetId, AssetPair, Order, OrderId, OrderStatus, OrderVersion, Side};
use dex_matcher::queue::local::LocalEventQueue;
use dex_matcher::queue::EventQueue;
use dex_matcher::store::{AssetPairRegistry, KvStore, OrderDb};
use secp256k1::ecdsa::Signature;
use secp256k1::{Message, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

fn signed_order(sk: &SecretKey, pair: AssetPair, side: Side, price: u64, amount: u64, fee: u64, ts: u64) -> Order {
    let secp = Secp256k1::new();
    let owner = secp256k1::PublicKey::from_secret_key(&secp, sk);
    let mut order = Order {
        id: OrderId([0u8; 32]),
        owner,
        pair,
        side,
        amount,
        price,
        matcher_fee: fee,
        fee_asset: AssetId::Native,
        timestamp: ts,
        expiration: ts + 1_000_000,
        version: OrderVersion(3),
        signature: Signature::from_compact(&[0u8; 64]).unwrap(),
    };
    let mut hasher = Sha256::new();
    hasher.update(order.canonical_bytes());
    let digest: [u8; 32] = hasher.finalize().into();
    let message = Message::from_digest(digest);
    order.signature = secp.sign_ecdsa(&message, sk);
    order.id = order.derive_id();
    order
}

fn default_pair() -> AssetPair {
    AssetPair::new(AssetId::issued_from_bytes(b"BTC"), AssetId::Native)
}

async fn open_harness(
    dir: &std::path::Path,
    pair: AssetPair,
    rules: MatchingRules,
) -> (Arc<MatcherActor>, Arc<LocalEventQueue>, Arc<MockChain>) {
    let kv = KvStore::open(dir.join("db")).unwrap();
    let pairs = Arc::new(AssetPairRegistry::new(kv.clone()).unwrap());
    pairs.register(pair, rules).unwrap();

    let order_db = Arc::new(OrderDb::new(kv.clone()));
    order_db.rebuild_index().unwrap();

    let chain = Arc::new(MockChain::new());
    chain.register_asset(pair.amount_asset, 8);

    let matcher = MatcherActor::new(pairs, chain.clone() as Arc<dyn BlockchainContext>, order_db, kv, 1);
    let queue = Arc::new(LocalEventQueue::open(dir.join("events.log")).unwrap());

    let consumer_matcher = matcher.clone();
    let consumer_queue: Arc<dyn EventQueue> = queue.clone();
    tokio::spawn(async move {
        consumer_matcher.run_consumer(consumer_queue).await;
    });

    (matcher, queue, chain)
}

async fn wait_until<F: Fn() -> bool>(f: F) {
    for _ in 0..500 {
        if f() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition did not become true in time");
}

async fn status_of(matcher: &MatcherActor, id: OrderId) -> Option<OrderStatus> {
    matcher.order_status(id).await.unwrap()
}

#[tokio::test]
async fn simple_cross_fills_both_sides_and_tracks_balances() {
    let dir = tempfile::tempdir().unwrap();
    let pair = default_pair();
    let (matcher, queue, chain) = open_harness(dir.path(), pair, MatchingRules::disabled()).await;

    let maker_sk = SecretKey::from_slice(&[1u8; 32]).unwrap();
    let taker_sk = SecretKey::from_slice(&[2u8; 32]).unwrap();

    let maker = signed_order(&maker_sk, pair, Side::Sell, 100, 10, 0, 1);
    let maker_id = maker.id;
    chain.set_balance(maker.owner_address(), pair.amount_asset, 1_000);
    matcher.submit_order(maker, queue.as_ref(), 1).await.unwrap();

    let taker = signed_order(&taker_sk, pair, Side::Buy, 100, 10, 0, 2);
    let taker_id = taker.id;
    chain.set_balance(taker.owner_address(), pair.price_asset, 1_000);
    matcher.submit_order(taker, queue.as_ref(), 2).await.unwrap();

    loop {
        if matches!(status_of(&matcher, maker_id).await, Some(OrderStatus::Filled { .. })) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let maker_status = status_of(&matcher, maker_id).await.unwrap();
    let taker_status = status_of(&matcher, taker_id).await.unwrap();
    assert!(matches!(maker_status, OrderStatus::Filled { filled: 10, .. }));
    assert!(matches!(taker_status, OrderStatus::Filled { filled: 10, .. }));

    // Both orders are terminal, so neither should still be holding a
    // reservation (spec.md §4.5).
    assert_eq!(matcher.balance_for(maker.owner_address(), pair.amount_asset).await.unwrap(), 0);
    assert_eq!(matcher.balance_for(taker.owner_address(), pair.price_asset).await.unwrap(), 0);

    queue.close().await.unwrap();
}

#[tokio::test]
async fn partial_fill_then_cancel_releases_remaining_reservation() {
    let dir = tempfile::tempdir().unwrap();
    let pair = default_pair();
    let (matcher, queue, chain) = open_harness(dir.path(), pair, MatchingRules::disabled()).await;

    let maker_sk = SecretKey::from_slice(&[3u8; 32]).unwrap();
    let taker_sk = SecretKey::from_slice(&[4u8; 32]).unwrap();

    let maker = signed_order(&maker_sk, pair, Side::Buy, 100, 10, 0, 1);
    let maker_id = maker.id;
    chain.set_balance(maker.owner_address(), pair.price_asset, 1_000);
    matcher.submit_order(maker, queue.as_ref(), 1).await.unwrap();

    let taker = signed_order(&taker_sk, pair, Side::Sell, 100, 4, 0, 2);
    chain.set_balance(taker.owner_address(), pair.amount_asset, 1_000);
    matcher.submit_order(taker, queue.as_ref(), 2).await.unwrap();

    loop {
        if matches!(status_of(&matcher, maker_id).await, Some(OrderStatus::PartiallyFilled { filled: 4, .. })) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // Reservation should have shrunk to the remaining 6 units, not stayed
    // at the original 10 (spec.md §4.5's proportional shrink on fill).
    assert_eq!(matcher.balance_for(maker.owner_address(), pair.price_asset).await.unwrap(), 6);

    matcher
        .submit_cancel(maker_id, maker.owner_address(), queue.as_ref(), 3)
        .await
        .unwrap();

    loop {
        if matches!(status_of(&matcher, maker_id).await, Some(OrderStatus::Cancelled { .. })) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(matcher.balance_for(maker.owner_address(), pair.price_asset).await.unwrap(), 0);

    queue.close().await.unwrap();
}

#[tokio::test]
async fn tick_size_aggregation_crosses_multiple_makers_by_bucket() {
    let dir = tempfile::tempdir().unwrap();
    let pair = default_pair();
    let rules = MatchingRules::new(vec![(0, TickSize::Enabled(100))]);
    let (matcher, queue, chain) = open_harness(dir.path(), pair, rules).await;

    let maker1_sk = SecretKey::from_slice(&[5u8; 32]).unwrap();
    let maker2_sk = SecretKey::from_slice(&[6u8; 32]).unwrap();
    let taker_sk = SecretKey::from_slice(&[7u8; 32]).unwrap();

    let maker1 = signed_order(&maker1_sk, pair, Side::Sell, 205, 10, 0, 1);
    chain.set_balance(maker1.owner_address(), pair.amount_asset, 100);
    matcher.submit_order(maker1, queue.as_ref(), 1).await.unwrap();

    let maker2 = signed_order(&maker2_sk, pair, Side::Sell, 250, 10, 0, 2);
    chain.set_balance(maker2.owner_address(), pair.amount_asset, 100);
    matcher.submit_order(maker2, queue.as_ref(), 2).await.unwrap();

    let taker = signed_order(&taker_sk, pair, Side::Buy, 300, 15, 0, 3);
    let taker_id = taker.id;
    chain.set_balance(taker.owner_address(), pair.price_asset, 1_000_000);
    matcher.submit_order(taker, queue.as_ref(), 3).await.unwrap();

    loop {
        if matches!(status_of(&matcher, taker_id).await, Some(OrderStatus::Filled { .. })) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let book = matcher.order_book(&pair).await.unwrap();
    assert!(book.asks.is_empty());
    assert!(book.bids.is_empty());

    queue.close().await.unwrap();
}

#[tokio::test]
async fn restart_and_replay_reconstructs_book_state() {
    let dir = tempfile::tempdir().unwrap();
    let pair = default_pair();

    let maker_sk = SecretKey::from_slice(&[8u8; 32]).unwrap();
    let maker_id;
    {
        let (matcher, queue, chain) = open_harness(dir.path(), pair, MatchingRules::disabled()).await;
        let maker = signed_order(&maker_sk, pair, Side::Sell, 100, 10, 0, 1);
        maker_id = maker.id;
        chain.set_balance(maker.owner_address(), pair.amount_asset, 1_000);
        matcher.submit_order(maker, queue.as_ref(), 1).await.unwrap();

        wait_until(|| matches!(matcher.status(), dex_matcher::actors::matcher_actor::MatcherStatus::Working)).await;
        loop {
            if status_of(&matcher, maker_id).await.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        queue.close().await.unwrap();
    }

    // Reopen against the same data directory: the order book and order
    // index must be rebuilt entirely from the durable log and KV store,
    // with no in-memory state carried over (spec.md §6).
    let kv = KvStore::open(dir.path().join("db")).unwrap();
    let pairs = Arc::new(AssetPairRegistry::new(kv.clone()).unwrap());
    assert!(pairs.is_registered(&pair));
    let order_db = Arc::new(OrderDb::new(kv.clone()));
    order_db.rebuild_index().unwrap();
    let chain = Arc::new(MockChain::new());
    chain.register_asset(pair.amount_asset, 8);
    let matcher = MatcherActor::new(pairs, chain.clone() as Arc<dyn BlockchainContext>, order_db, kv, 1);
    let queue: Arc<dyn EventQueue> = Arc::new(LocalEventQueue::open(dir.path().join("events.log")).unwrap());

    let consumer_matcher = matcher.clone();
    let consumer_queue = queue.clone();
    tokio::spawn(async move {
        consumer_matcher.run_consumer(consumer_queue).await;
    });

    wait_until(|| matches!(matcher.status(), dex_matcher::actors::matcher_actor::MatcherStatus::Working)).await;
    let book = matcher.order_book(&pair).await.unwrap();
    assert_eq!(book.asks.len(), 1);
    assert_eq!(book.asks[0].order.id, maker_id);

    queue.close().await.unwrap();
}

#[tokio::test]
async fn place_refused_when_reservation_exceeds_spendable_balance() {
    let dir = tempfile::tempdir().unwrap();
    let pair = default_pair();
    let (matcher, queue, chain) = open_harness(dir.path(), pair, MatchingRules::disabled()).await;

    let sk = SecretKey::from_slice(&[9u8; 32]).unwrap();
    let order = signed_order(&sk, pair, Side::Sell, 100, 10, 0, 1);
    // Balance set below what the order requires.
    chain.set_balance(order.owner_address(), pair.amount_asset, 5);

    let err = matcher.submit_order(order, queue.as_ref(), 1).await.unwrap_err();
    assert!(matches!(err, dex_matcher::error::MatcherError::InsufficientBalance { .. }));

    queue.close().await.unwrap();
}
