//! Fighting over the shared `war` queue.

use peril::bus::{subscribe_json, SubscribeOptions, Subscription};
use peril::game::{self, handler_war, lock_state, GameState, Location, RecognitionOfWar, UnitRank};
use peril::routing::{self, GameLog, EXCHANGE_PERIL_DLX, EXCHANGE_PERIL_TOPIC, GAME_LOG_SLUG, WAR_RECOGNITIONS_PREFIX};

use crate::support::{eventually, player_state, snapshot, table, Client, TIMEOUT};

fn subscribe_war(client: &Client) -> Subscription {
    let [_, _, war] = game::client_bindings(&client.username(), EXCHANGE_PERIL_DLX);
    subscribe_json(
        &client.connection,
        war,
        SubscribeOptions::default(),
        handler_war(client.state.clone(), client.publisher.clone()),
    )
    .unwrap()
}

fn declare_war(client: &Client, war: &RecognitionOfWar) {
    let key = routing::player_key(WAR_RECOGNITIONS_PREFIX, &war.defender.username);
    client
        .publisher
        .publish_json(EXCHANGE_PERIL_TOPIC, &key, war)
        .unwrap();
}

/// Binary game logs published under `game_logs.*`, collected on a private queue.
fn collect_logs(client: &Client) -> (Subscription, std::sync::mpsc::Receiver<GameLog>) {
    let (tx, rx) = std::sync::mpsc::channel();
    let binding = peril::bus::Binding::new(
        EXCHANGE_PERIL_TOPIC,
        "observe.game_logs",
        routing::wildcard_key(GAME_LOG_SLUG),
        peril::bus::QueueDurability::Durable,
    );
    let subscription = peril::bus::subscribe_binary(
        &client.connection,
        binding,
        SubscribeOptions::default(),
        move |log: GameLog| {
            let _ = tx.send(log);
            peril::bus::AckDecision::Ack
        },
    )
    .unwrap();
    (subscription, rx)
}

#[test]
fn war_without_shared_units_is_discarded() {
    let broker = table();
    let alice = Client::connect(&broker, player_state("alice", &[(UnitRank::Infantry, Location::Asia)]));
    let subscription = subscribe_war(&alice);

    let war = RecognitionOfWar {
        attacker: lock_state(&alice.state).snapshot(),
        defender: snapshot("bob", &[(UnitRank::Infantry, Location::Europe)]),
    };
    declare_war(&alice, &war);

    assert!(broker.wait_until_drained("war", TIMEOUT));
    assert!(eventually(|| subscription.stats().discarded == 1));
    let stats = subscription.stats();
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.requeued, 0);
    assert_eq!(broker.ready_count("peril_dlq"), Some(1));
}

#[test]
fn bystander_requeues_until_the_attacker_fights() {
    let broker = table();
    let carol = Client::connect(&broker, player_state("carol", &[(UnitRank::Artillery, Location::Europe)]));
    let alice = Client::connect(&broker, player_state("alice", &[(UnitRank::Artillery, Location::Europe)]));
    let (_logs, logs) = collect_logs(&carol);

    let bystander = subscribe_war(&carol);
    let war = RecognitionOfWar {
        attacker: lock_state(&alice.state).snapshot(),
        defender: snapshot("bob", &[(UnitRank::Infantry, Location::Europe)]),
    };
    declare_war(&alice, &war);

    // Only carol consumes `war` so far; she keeps handing the message back.
    assert!(eventually(|| bystander.stats().requeued >= 1));
    assert_eq!(bystander.stats().acked, 0);

    let attacker = subscribe_war(&alice);
    assert!(broker.wait_until_drained("war", TIMEOUT));
    assert!(eventually(|| attacker.stats().acked == 1));
    assert_eq!(bystander.stats().acked, 0);

    let log = logs.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(log.username, "alice");
    assert_eq!(log.message, "alice won a war against bob");
    assert_eq!(lock_state(&alice.state).player.units.len(), 1);
    assert_eq!(lock_state(&carol.state).player.units.len(), 1);
}

#[test]
fn losing_attacker_loses_units_at_the_front() {
    let broker = table();
    let alice = Client::connect(
        &broker,
        player_state(
            "alice",
            &[
                (UnitRank::Infantry, Location::Europe),
                (UnitRank::Cavalry, Location::Asia),
            ],
        ),
    );
    let (_logs, logs) = collect_logs(&alice);
    let subscription = subscribe_war(&alice);

    let war = RecognitionOfWar {
        attacker: lock_state(&alice.state).snapshot(),
        defender: snapshot("bob", &[(UnitRank::Cavalry, Location::Europe)]),
    };
    declare_war(&alice, &war);

    let log = logs.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(log.message, "bob won a war against alice");
    assert!(eventually(|| subscription.stats().acked == 1));

    let state: GameState = lock_state(&alice.state).clone();
    assert_eq!(state.player.units_at(Location::Europe).count(), 0);
    assert_eq!(state.player.units_at(Location::Asia).count(), 1);
}

#[test]
fn draw_is_logged_and_costs_the_attacker() {
    let broker = table();
    let alice = Client::connect(&broker, player_state("alice", &[(UnitRank::Cavalry, Location::Africa)]));
    let (_logs, logs) = collect_logs(&alice);
    let _subscription = subscribe_war(&alice);

    let war = RecognitionOfWar {
        attacker: lock_state(&alice.state).snapshot(),
        defender: snapshot(
            "bob",
            &[
                (UnitRank::Infantry, Location::Africa),
                (UnitRank::Infantry, Location::Africa),
                (UnitRank::Infantry, Location::Africa),
                (UnitRank::Infantry, Location::Africa),
                (UnitRank::Infantry, Location::Africa),
            ],
        ),
    };
    declare_war(&alice, &war);

    let log = logs.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(log.message, "A war between alice and bob resulted in a draw");
    assert!(eventually(|| lock_state(&alice.state).player.units.is_empty()));
}
