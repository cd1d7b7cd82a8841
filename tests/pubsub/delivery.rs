//! Delivery and settlement.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use peril::bus::{
    publish_binary, publish_json, subscribe_binary, subscribe_json, AckDecision, Binding,
    QueueDurability, SubscribeOptions,
};
use peril::routing::PlayingState;

use crate::support::{eventually, publish_channel, setup, OrderPlaced, EXCHANGE, TIMEOUT};

#[test]
fn json_message_reaches_handler_and_is_acked() {
    let (broker, connection) = setup();
    let (tx, rx) = mpsc::channel();

    let binding = Binding::new(EXCHANGE, "orders.json", "placed", QueueDurability::Durable);
    let subscription = subscribe_json(&connection, binding, SubscribeOptions::default(), move |order: OrderPlaced| {
        tx.send(order).unwrap();
        AckDecision::Ack
    })
    .unwrap();

    let channel = publish_channel(&connection);
    publish_json(channel.as_ref(), EXCHANGE, "placed", &OrderPlaced::new(1, "map")).unwrap();

    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), OrderPlaced::new(1, "map"));
    assert!(broker.wait_until_drained("orders.json", TIMEOUT));
    assert!(eventually(|| subscription.stats().acked == 1));
    assert_eq!(subscription.stats().delivered, 1);
}

#[test]
fn binary_message_reaches_handler() {
    let (broker, connection) = setup();
    let (tx, rx) = mpsc::channel();

    let binding = Binding::new(EXCHANGE, "orders.bin", "placed", QueueDurability::Durable);
    let _subscription = subscribe_binary(&connection, binding, SubscribeOptions::default(), move |order: OrderPlaced| {
        tx.send(order).unwrap();
        AckDecision::Ack
    })
    .unwrap();

    let channel = publish_channel(&connection);
    publish_binary(channel.as_ref(), EXCHANGE, "placed", &OrderPlaced::new(7, "dice")).unwrap();

    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), OrderPlaced::new(7, "dice"));
    assert!(broker.wait_until_drained("orders.bin", TIMEOUT));
}

#[test]
fn pause_round_trip_over_transient_queue() {
    let (broker, connection) = setup();
    let (tx, rx) = mpsc::channel();

    let binding = Binding::new(EXCHANGE, "pause.alice", "pause", QueueDurability::Transient);
    let _subscription = subscribe_json(&connection, binding, SubscribeOptions::default(), move |state: PlayingState| {
        tx.send(state.is_paused).unwrap();
        AckDecision::Ack
    })
    .unwrap();

    let channel = publish_channel(&connection);
    publish_json(channel.as_ref(), EXCHANGE, "pause", &PlayingState { is_paused: true }).unwrap();
    publish_json(channel.as_ref(), EXCHANGE, "pause", &PlayingState { is_paused: false }).unwrap();

    assert!(rx.recv_timeout(TIMEOUT).unwrap());
    assert!(!rx.recv_timeout(TIMEOUT).unwrap());
    assert!(broker.wait_until_drained("pause.alice", TIMEOUT));
}

#[test]
fn requeued_message_is_delivered_again() {
    let (broker, connection) = setup();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);

    let binding = Binding::new(EXCHANGE, "orders.retry", "placed", QueueDurability::Durable);
    let subscription = subscribe_json(&connection, binding, SubscribeOptions::default(), move |order: OrderPlaced| {
        let mut log = log.lock().unwrap();
        log.push(order.id);
        if log.len() == 1 {
            AckDecision::NackRequeue
        } else {
            AckDecision::Ack
        }
    })
    .unwrap();

    let channel = publish_channel(&connection);
    publish_json(channel.as_ref(), EXCHANGE, "placed", &OrderPlaced::new(3, "rulebook")).unwrap();

    assert!(eventually(|| subscription.stats().acked == 1));
    assert_eq!(*seen.lock().unwrap(), vec![3, 3]);
    let stats = subscription.stats();
    assert_eq!(stats.delivered, 2);
    assert_eq!(stats.requeued, 1);
    assert!(broker.wait_until_drained("orders.retry", TIMEOUT));
}

#[test]
fn discarded_message_goes_to_dead_letter_queue() {
    let (broker, connection) = setup();
    broker
        .declare_exchange("orders_dlx", peril::bus::ExchangeKind::Fanout)
        .unwrap();
    let dlq = Binding::new("orders_dlx", "orders.dead", "", QueueDurability::Durable);
    let (channel, _) = peril::bus::declare_and_bind(&connection, &dlq).unwrap();
    drop(channel);

    let binding = Binding::new(EXCHANGE, "orders.strict", "placed", QueueDurability::Durable)
        .with_dead_letter_exchange("orders_dlx");
    let subscription = subscribe_json(&connection, binding, SubscribeOptions::default(), |_: OrderPlaced| {
        AckDecision::NackDiscard
    })
    .unwrap();

    let channel = publish_channel(&connection);
    publish_json(channel.as_ref(), EXCHANGE, "placed", &OrderPlaced::new(9, "counterfeit")).unwrap();

    assert!(eventually(|| subscription.stats().discarded == 1));
    assert!(broker.wait_until_drained("orders.strict", TIMEOUT));
    assert_eq!(broker.ready_count("orders.dead"), Some(1));
}

#[test]
fn every_message_is_settled_exactly_once() {
    let (broker, connection) = setup();

    let binding = Binding::new(EXCHANGE, "orders.mixed", "placed", QueueDurability::Durable);
    let subscription = subscribe_json(&connection, binding, SubscribeOptions::default().with_prefetch(3), |order: OrderPlaced| {
        if order.id % 2 == 0 {
            AckDecision::Ack
        } else {
            AckDecision::NackDiscard
        }
    })
    .unwrap();

    let channel = publish_channel(&connection);
    for id in 0..20 {
        publish_json(channel.as_ref(), EXCHANGE, "placed", &OrderPlaced::new(id, "token")).unwrap();
    }

    assert!(broker.wait_until_drained("orders.mixed", TIMEOUT));
    assert!(eventually(|| subscription.stats().acked + subscription.stats().discarded == 20));
    let stats = subscription.stats();
    assert_eq!(stats.delivered, 20);
    assert_eq!(stats.acked, 10);
    assert_eq!(stats.discarded, 10);
    assert_eq!(stats.requeued, 0);
}

#[test]
fn shared_queue_spreads_work_across_subscribers() {
    let (broker, connection) = setup();
    let (tx, rx) = mpsc::channel();

    let mut subscriptions = Vec::new();
    for name in ["first", "second"] {
        let tx = tx.clone();
        let binding = Binding::new(EXCHANGE, "orders.shared", "placed", QueueDurability::Durable);
        subscriptions.push(
            subscribe_json(&connection, binding, SubscribeOptions::default().with_prefetch(1), move |order: OrderPlaced| {
                tx.send((name, order.id)).unwrap();
                AckDecision::Ack
            })
            .unwrap(),
        );
    }
    assert_eq!(broker.consumer_count("orders.shared"), 2);

    let channel = publish_channel(&connection);
    for id in 0..10 {
        publish_json(channel.as_ref(), EXCHANGE, "placed", &OrderPlaced::new(id, "card")).unwrap();
    }

    let mut ids: Vec<u32> = (0..10).map(|_| rx.recv_timeout(TIMEOUT).unwrap().1).collect();
    ids.sort_unstable();
    assert_eq!(ids, (0..10).collect::<Vec<_>>());
    assert!(broker.wait_until_drained("orders.shared", TIMEOUT));
}
