//! Peril — a small war game played over the bus.
//!
//! Each client keeps its own [`GameState`] and learns about other players only
//! through events:
//!
//! ```text
//!   server ── PlayingState ──► peril_direct / pause ──────────► pause.<user>       (transient)
//!   client ── ArmyMove ──────► peril_topic / army_moves.<user> ► army_moves.<user> (transient)
//!   client ── RecognitionOfWar ► peril_topic / war.<user> ─────► war               (durable, shared)
//!   client ── GameLog ───────► peril_topic / game_logs.<user> ─► game_logs         (durable, server)
//! ```
//!
//! The `war` queue is shared by every client: a recognition lands on one
//! client at a time and is requeued until the attacker picks it up.

mod commands;
mod error;
mod events;
mod handlers;
mod log;
mod state;

pub use error::GameError;
pub use events::{ArmyMove, MoveOutcome, RecognitionOfWar, WarOutcome};
pub use handlers::{handler_logs, handler_move, handler_pause, handler_war};
pub use log::GameLogWriter;
pub use state::{lock_state, GameState, Location, Player, SharedGameState, Unit, UnitRank};

use rand::seq::SliceRandom;

use crate::bus::{
    declare_and_bind, declare_exchange, subscribe_binary, subscribe_json, Binding, Connection,
    ExchangeKind, Publisher, QueueDurability, SetupError, SubscribeOptions, Subscription,
};
use crate::routing::{
    self, DEAD_LETTER_QUEUE, EXCHANGE_PERIL_DIRECT, EXCHANGE_PERIL_TOPIC, GAME_LOG_SLUG,
    ARMY_MOVES_PREFIX, PAUSE_KEY, WAR_RECOGNITIONS_PREFIX,
};

/// Declare the game's exchanges and the dead-letter queue.
pub fn declare_topology(
    connection: &dyn Connection,
    dead_letter_exchange: &str,
) -> Result<(), SetupError> {
    declare_exchange(connection, EXCHANGE_PERIL_DIRECT, ExchangeKind::Direct)?;
    declare_exchange(connection, EXCHANGE_PERIL_TOPIC, ExchangeKind::Topic)?;
    declare_exchange(connection, dead_letter_exchange, ExchangeKind::Fanout)?;

    let dlq = Binding::new(
        dead_letter_exchange,
        DEAD_LETTER_QUEUE,
        "",
        QueueDurability::Durable,
    );
    let (channel, _) = declare_and_bind(connection, &dlq)?;
    let _ = channel.close();
    Ok(())
}

/// Bindings a client subscribes with.
pub fn client_bindings(username: &str, dead_letter_exchange: &str) -> [Binding; 3] {
    [
        Binding::new(
            EXCHANGE_PERIL_DIRECT,
            routing::player_key(PAUSE_KEY, username),
            PAUSE_KEY,
            QueueDurability::Transient,
        ),
        Binding::new(
            EXCHANGE_PERIL_TOPIC,
            routing::player_key(ARMY_MOVES_PREFIX, username),
            routing::wildcard_key(ARMY_MOVES_PREFIX),
            QueueDurability::Transient,
        ),
        Binding::new(
            EXCHANGE_PERIL_TOPIC,
            WAR_RECOGNITIONS_PREFIX,
            routing::wildcard_key(WAR_RECOGNITIONS_PREFIX),
            QueueDurability::Durable,
        )
        .with_dead_letter_exchange(dead_letter_exchange),
    ]
}

/// The server's game-log binding.
pub fn server_binding(dead_letter_exchange: &str) -> Binding {
    Binding::new(
        EXCHANGE_PERIL_TOPIC,
        GAME_LOG_SLUG,
        routing::wildcard_key(GAME_LOG_SLUG),
        QueueDurability::Durable,
    )
    .with_dead_letter_exchange(dead_letter_exchange)
}

/// Start the pause, move and war subscriptions for one client.
pub fn subscribe_client(
    connection: &dyn Connection,
    state: &SharedGameState,
    publisher: &Publisher,
    dead_letter_exchange: &str,
    options: &SubscribeOptions,
) -> Result<Vec<Subscription>, SetupError> {
    let username = lock_state(state).username().to_string();
    let [pause, moves, war] = client_bindings(&username, dead_letter_exchange);

    Ok(vec![
        subscribe_json(
            connection,
            pause,
            options.clone(),
            handler_pause(state.clone()),
        )?,
        subscribe_json(
            connection,
            moves,
            options.clone(),
            handler_move(state.clone(), publisher.clone()),
        )?,
        subscribe_json(
            connection,
            war,
            options.clone(),
            handler_war(state.clone(), publisher.clone()),
        )?,
    ])
}

/// Start the server's game-log subscription.
pub fn subscribe_server(
    connection: &dyn Connection,
    writer: GameLogWriter,
    dead_letter_exchange: &str,
    options: &SubscribeOptions,
) -> Result<Subscription, SetupError> {
    subscribe_binary(
        connection,
        server_binding(dead_letter_exchange),
        options.clone(),
        handler_logs(writer),
    )
}

const MALICIOUS_LOGS: &[&str] = &[
    "Never interrupt your enemy when he is making a mistake.",
    "The hardest thing of all for a soldier is to retreat.",
    "A soldier will fight long and hard for a bit of colored ribbon.",
    "It should be the duty of every soldier to reread the rules.",
    "Nothing is more dangerous than an idea when it is the only one you have.",
];

/// A junk log line for the `spam` command.
pub fn malicious_log() -> &'static str {
    MALICIOUS_LOGS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or("spam")
}
