//! Exchange names, routing keys and the messages exchanged on them.
//!
//! | message            | exchange       | routing key            | codec  |
//! |--------------------|----------------|------------------------|--------|
//! | `PlayingState`     | `peril_direct` | `pause`                | json   |
//! | `ArmyMove`         | `peril_topic`  | `army_moves.<user>`    | json   |
//! | `RecognitionOfWar` | `peril_topic`  | `war.<user>`           | json   |
//! | `GameLog`          | `peril_topic`  | `game_logs.<user>`     | binary |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const EXCHANGE_PERIL_DIRECT: &str = "peril_direct";
pub const EXCHANGE_PERIL_TOPIC: &str = "peril_topic";
pub const EXCHANGE_PERIL_DLX: &str = "peril_dlx";

pub const PAUSE_KEY: &str = "pause";
pub const ARMY_MOVES_PREFIX: &str = "army_moves";
pub const WAR_RECOGNITIONS_PREFIX: &str = "war";
pub const GAME_LOG_SLUG: &str = "game_logs";

/// Queue that collects everything dead-lettered through `peril_dlx`.
pub const DEAD_LETTER_QUEUE: &str = "peril_dlq";

/// `<prefix>.<username>`, the key for per-player events.
pub fn player_key(prefix: &str, username: &str) -> String {
    format!("{}.{}", prefix, username)
}

/// `<prefix>.*`, matching every player's events.
pub fn wildcard_key(prefix: &str) -> String {
    format!("{}.*", prefix)
}

/// Broadcast by the server to pause or resume every client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayingState {
    pub is_paused: bool,
}

/// A line for the server's game log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameLog {
    pub current_time: DateTime<Utc>,
    pub message: String,
    pub username: String,
}

impl GameLog {
    pub fn now(username: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            current_time: Utc::now(),
            message: message.into(),
            username: username.into(),
        }
    }
}
