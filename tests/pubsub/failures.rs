//! Bad payloads, panicking handlers and setup errors.

use std::sync::mpsc;
use std::time::Duration;

use peril::bus::{
    publish_binary, publish_json, subscribe_json, AckDecision, Binding, BrokerError, Channel,
    Envelope, QueueDurability, SetupStage, SubscribeOptions, SubscriptionState,
};

use crate::support::{eventually, publish_channel, setup, OrderPlaced, EXCHANGE, TIMEOUT};

#[test]
fn malformed_payload_is_discarded_and_loop_continues() {
    let (broker, connection) = setup();
    let (tx, rx) = mpsc::channel();

    let binding = Binding::new(EXCHANGE, "orders.malformed", "placed", QueueDurability::Durable);
    let subscription = subscribe_json(&connection, binding, SubscribeOptions::default(), move |order: OrderPlaced| {
        tx.send(order.id).unwrap();
        AckDecision::Ack
    })
    .unwrap();

    let channel = publish_channel(&connection);
    channel
        .publish(
            EXCHANGE,
            "placed",
            Envelope::new("application/json", b"{\"id\": \"not a number\"".to_vec()),
        )
        .unwrap();
    publish_json(channel.as_ref(), EXCHANGE, "placed", &OrderPlaced::new(2, "meeple")).unwrap();

    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), 2);
    assert!(broker.wait_until_drained("orders.malformed", TIMEOUT));
    assert!(eventually(|| subscription.stats().acked == 1));
    let stats = subscription.stats();
    assert_eq!(stats.delivered, 2);
    assert_eq!(stats.decode_failures, 1);
    assert_eq!(stats.discarded, 1);
    assert_eq!(subscription.state(), SubscriptionState::Running);
}

#[test]
fn wrong_content_type_is_a_decode_failure() {
    let (broker, connection) = setup();
    let (tx, rx) = mpsc::channel::<OrderPlaced>();

    let binding = Binding::new(EXCHANGE, "orders.typed", "placed", QueueDurability::Durable);
    let subscription = subscribe_json(&connection, binding, SubscribeOptions::default(), move |order: OrderPlaced| {
        tx.send(order).unwrap();
        AckDecision::Ack
    })
    .unwrap();

    let channel = publish_channel(&connection);
    publish_binary(channel.as_ref(), EXCHANGE, "placed", &OrderPlaced::new(4, "board")).unwrap();

    assert!(broker.wait_until_drained("orders.typed", TIMEOUT));
    assert!(eventually(|| subscription.stats().decode_failures == 1));
    assert!(rx.try_recv().is_err());
}

#[test]
fn panicking_handler_discards_message_and_keeps_running() {
    let (broker, connection) = setup();
    let (tx, rx) = mpsc::channel();

    let binding = Binding::new(EXCHANGE, "orders.panic", "placed", QueueDurability::Durable);
    let subscription = subscribe_json(&connection, binding, SubscribeOptions::default(), move |order: OrderPlaced| {
        if order.id == 0 {
            panic!("refusing order zero");
        }
        tx.send(order.id).unwrap();
        AckDecision::Ack
    })
    .unwrap();

    let channel = publish_channel(&connection);
    publish_json(channel.as_ref(), EXCHANGE, "placed", &OrderPlaced::new(0, "trap")).unwrap();
    publish_json(channel.as_ref(), EXCHANGE, "placed", &OrderPlaced::new(1, "fine")).unwrap();

    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), 1);
    assert!(broker.wait_until_drained("orders.panic", TIMEOUT));
    assert!(eventually(|| subscription.stats().acked == 1));
    let stats = subscription.stats();
    assert_eq!(stats.handler_panics, 1);
    assert_eq!(stats.discarded, 1);
    assert!(!subscription.is_closed());
}

#[test]
fn slow_handler_still_settles() {
    let (broker, connection) = setup();

    let binding = Binding::new(EXCHANGE, "orders.slow", "placed", QueueDurability::Durable);
    let options = SubscribeOptions::default().with_handler_budget(Duration::from_millis(1));
    let subscription = subscribe_json(&connection, binding, options, |_: OrderPlaced| {
        std::thread::sleep(Duration::from_millis(20));
        AckDecision::Ack
    })
    .unwrap();

    let channel = publish_channel(&connection);
    publish_json(channel.as_ref(), EXCHANGE, "placed", &OrderPlaced::new(5, "hourglass")).unwrap();

    assert!(broker.wait_until_drained("orders.slow", TIMEOUT));
    assert!(eventually(|| subscription.stats().acked == 1));
}

#[test]
fn missing_exchange_fails_at_bind() {
    let (broker, connection) = setup();

    let binding = Binding::new("nowhere", "orders.lost", "placed", QueueDurability::Durable);
    let err = subscribe_json(&connection, binding, SubscribeOptions::default(), |_: OrderPlaced| {
        AckDecision::Ack
    })
    .err()
    .unwrap();

    assert_eq!(err.stage, SetupStage::BindQueue);
    assert!(matches!(err.source, BrokerError::NotFound(_)));
    assert_eq!(broker.consumer_count("orders.lost"), 0);
}

#[test]
fn redeclaring_with_other_durability_fails_at_declare() {
    let (_broker, connection) = setup();

    let durable = Binding::new(EXCHANGE, "orders.fixed", "placed", QueueDurability::Durable);
    let _first = subscribe_json(&connection, durable, SubscribeOptions::default(), |_: OrderPlaced| {
        AckDecision::Ack
    })
    .unwrap();

    let transient = Binding::new(EXCHANGE, "orders.fixed", "placed", QueueDurability::Transient);
    let err = subscribe_json(&connection, transient, SubscribeOptions::default(), |_: OrderPlaced| {
        AckDecision::Ack
    })
    .err()
    .unwrap();

    assert_eq!(err.stage, SetupStage::DeclareQueue);
    assert!(matches!(err.source, BrokerError::PreconditionFailed(_)));
}

#[test]
fn transient_queue_is_private_to_its_connection() {
    let (broker, connection) = setup();

    let binding = Binding::new(EXCHANGE, "pause.bob", "pause", QueueDurability::Transient);
    let _owner = subscribe_json(&connection, binding.clone(), SubscribeOptions::default(), |_: OrderPlaced| {
        AckDecision::Ack
    })
    .unwrap();

    let intruder = broker.connect();
    let err = subscribe_json(&intruder, binding, SubscribeOptions::default(), |_: OrderPlaced| {
        AckDecision::Ack
    })
    .err()
    .unwrap();

    assert_eq!(err.stage, SetupStage::DeclareQueue);
    assert!(matches!(err.source, BrokerError::ResourceLocked(_)));
}
