//! A game table: the broker with Peril's topology, and players joining it.

use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use peril::bus::{
    subscribe_json, AckDecision, Binding, InMemoryBroker, InMemoryConnection, Publisher,
    QueueDurability, SubscribeOptions, Subscription,
};
use peril::game::{self, GameState, Location, Player, SharedGameState, UnitRank};
use peril::routing::{EXCHANGE_PERIL_DLX, EXCHANGE_PERIL_TOPIC};
use serde::de::DeserializeOwned;
use tempfile::TempDir;

pub const TIMEOUT: Duration = Duration::from_secs(2);

/// Broker with the game's exchanges and dead-letter queue declared.
pub fn table() -> InMemoryBroker {
    let broker = InMemoryBroker::new();
    let connection = broker.connect();
    game::declare_topology(&connection, EXCHANGE_PERIL_DLX).unwrap();
    broker
}

/// A player's local state with some units already placed.
pub fn player_state(name: &str, units: &[(UnitRank, Location)]) -> GameState {
    let mut state = GameState::new(name);
    for &(rank, location) in units {
        state.add_unit(rank, location);
    }
    state
}

pub fn snapshot(name: &str, units: &[(UnitRank, Location)]) -> Player {
    player_state(name, units).snapshot()
}

/// One connected player with a publisher on their own connection.
pub struct Client {
    pub state: SharedGameState,
    pub publisher: Publisher,
    pub connection: InMemoryConnection,
}

impl Client {
    pub fn connect(broker: &InMemoryBroker, state: GameState) -> Self {
        let connection = broker.connect();
        let publisher = Publisher::open(&connection).unwrap();
        Self {
            state: state.shared(),
            publisher,
            connection,
        }
    }

    /// Subscribe to every client queue, as the client binary does.
    pub fn subscribe_all(&self) -> Vec<Subscription> {
        game::subscribe_client(
            &self.connection,
            &self.state,
            &self.publisher,
            EXCHANGE_PERIL_DLX,
            &SubscribeOptions::default(),
        )
        .unwrap()
    }

    pub fn username(&self) -> String {
        game::lock_state(&self.state).username().to_string()
    }
}

/// Copy every message published on `peril_topic` under `pattern` to a
/// private queue, and hand the decoded values to the test.
pub fn observe<T>(connection: &InMemoryConnection, queue: &str, pattern: &str) -> (Subscription, Receiver<T>)
where
    T: DeserializeOwned + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let binding = Binding::new(EXCHANGE_PERIL_TOPIC, queue, pattern, QueueDurability::Durable);
    let subscription = subscribe_json(connection, binding, SubscribeOptions::default(), move |value: T| {
        let _ = tx.send(value);
        AckDecision::Ack
    })
    .unwrap();
    (subscription, rx)
}

/// A log path inside a fresh temporary directory, removed when the
/// returned `TempDir` is dropped.
pub fn temp_log(name: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(format!("{}.log", name));
    (dir, path)
}

/// Poll `check` until it holds or the timeout passes.
pub fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    check()
}
