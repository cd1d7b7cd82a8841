//! Subscription handlers: decode → update local state → settle.
//!
//! Each constructor takes the state and publishing handles it needs and
//! returns the closure registered with [`subscribe`](crate::bus::subscribe).

use crate::bus::{AckDecision, Publisher};
use crate::routing::{
    self, GameLog, PlayingState, EXCHANGE_PERIL_TOPIC, GAME_LOG_SLUG, WAR_RECOGNITIONS_PREFIX,
};

use super::events::{ArmyMove, MoveOutcome, RecognitionOfWar, WarOutcome};
use super::log::GameLogWriter;
use super::state::{lock_state, SharedGameState};

pub fn handler_pause(state: SharedGameState) -> impl FnMut(PlayingState) -> AckDecision + Send + 'static {
    move |playing_state| {
        let mut state = lock_state(&state);
        state.handle_pause(playing_state);
        if playing_state.is_paused {
            tracing::info!("==== Pause Detected ====");
        } else {
            tracing::info!("==== Resume Detected ====");
        }
        AckDecision::Ack
    }
}

/// React to another player's move, recognizing war when armies meet.
pub fn handler_move(
    state: SharedGameState,
    publisher: Publisher,
) -> impl FnMut(ArmyMove) -> AckDecision + Send + 'static {
    move |army_move| {
        // Snapshot under the lock; publish without holding it.
        let (outcome, local) = {
            let state = lock_state(&state);
            (state.handle_move(&army_move), state.snapshot())
        };

        match outcome {
            MoveOutcome::SamePlayer => AckDecision::Ack,
            MoveOutcome::Safe => {
                tracing::info!(
                    player = %army_move.player.username,
                    to = %army_move.to_location,
                    units = army_move.units.len(),
                    "enemy moved, you are safe"
                );
                AckDecision::Ack
            }
            MoveOutcome::MakeWar => {
                tracing::info!(
                    player = %army_move.player.username,
                    to = %army_move.to_location,
                    "enemy moved into your territory, declaring war"
                );
                let key = routing::player_key(WAR_RECOGNITIONS_PREFIX, &local.username);
                let war = RecognitionOfWar {
                    attacker: army_move.player,
                    defender: local,
                };
                match publisher.publish_json(EXCHANGE_PERIL_TOPIC, &key, &war) {
                    Ok(()) => AckDecision::Ack,
                    Err(e) => {
                        tracing::error!(error = %e, "could not publish war recognition");
                        AckDecision::NackRequeue
                    }
                }
            }
        }
    }
}

/// Fight wars we started; pass on the rest.
pub fn handler_war(
    state: SharedGameState,
    publisher: Publisher,
) -> impl FnMut(RecognitionOfWar) -> AckDecision + Send + 'static {
    move |war| {
        let (outcome, username) = {
            let mut state = lock_state(&state);
            (state.handle_war(&war), state.username().to_string())
        };

        match &outcome {
            WarOutcome::NotInvolved => AckDecision::NackRequeue,
            WarOutcome::NoUnits => {
                tracing::warn!(
                    attacker = %war.attacker.username,
                    defender = %war.defender.username,
                    "{}", outcome
                );
                AckDecision::NackDiscard
            }
            fought => {
                tracing::info!("==== War: {} ====", fought);
                let message = fought.log_message().unwrap_or_default();
                let log = GameLog::now(username.clone(), message);
                let key = routing::player_key(GAME_LOG_SLUG, &username);
                match publisher.publish_binary(EXCHANGE_PERIL_TOPIC, &key, &log) {
                    Ok(()) => AckDecision::Ack,
                    Err(e) => {
                        tracing::error!(error = %e, "could not publish game log");
                        AckDecision::NackRequeue
                    }
                }
            }
        }
    }
}

/// Server side: append every game log to the log file.
pub fn handler_logs(writer: GameLogWriter) -> impl FnMut(GameLog) -> AckDecision + Send + 'static {
    move |log| match writer.write_log(&log) {
        Ok(()) => AckDecision::Ack,
        Err(e) => {
            tracing::error!(error = %e, path = %writer.path().display(), "could not write game log");
            AckDecision::NackRequeue
        }
    }
}
