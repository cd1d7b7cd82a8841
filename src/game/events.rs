//! Events received from other players and what they mean locally.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::state::{GameState, Location, Player, Unit};
use crate::routing::PlayingState;

/// Broadcast by a player after moving units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmyMove {
    pub player: Player,
    pub units: Vec<Unit>,
    pub to_location: Location,
}

/// Published by a player who saw an enemy move into one of their locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognitionOfWar {
    pub attacker: Player,
    pub defender: Player,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Our own move echoed back.
    SamePlayer,
    /// No shared location; nothing happens.
    Safe,
    /// The mover now shares a location with us.
    MakeWar,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarOutcome {
    /// The war is resolved by the attacker; anyone else passes it on.
    NotInvolved,
    /// No defending units at any shared location; the war can never be fought.
    NoUnits,
    YouWon { winner: String, loser: String },
    OpponentWon { winner: String, loser: String },
    Draw { attacker: String, defender: String },
}

impl WarOutcome {
    /// Line for the game log, for outcomes that were actually fought.
    pub fn log_message(&self) -> Option<String> {
        match self {
            WarOutcome::YouWon { winner, loser } | WarOutcome::OpponentWon { winner, loser } => {
                Some(format!("{} won a war against {}", winner, loser))
            }
            WarOutcome::Draw { attacker, defender } => Some(format!(
                "A war between {} and {} resulted in a draw",
                attacker, defender
            )),
            WarOutcome::NotInvolved | WarOutcome::NoUnits => None,
        }
    }
}

impl fmt::Display for WarOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.log_message() {
            Some(message) => f.write_str(&message),
            None if *self == WarOutcome::NotInvolved => f.write_str("not involved in this war"),
            None => f.write_str("no units in the same location, no war will be fought"),
        }
    }
}

impl GameState {
    pub fn handle_pause(&mut self, playing_state: PlayingState) {
        self.paused = playing_state.is_paused;
    }

    pub fn handle_move(&self, army_move: &ArmyMove) -> MoveOutcome {
        if army_move.player.username == self.username() {
            return MoveOutcome::SamePlayer;
        }
        match self.player.overlapping_location(&army_move.player) {
            Some(_) => MoveOutcome::MakeWar,
            None => MoveOutcome::Safe,
        }
    }

    /// Fight a war from the attacker's side and apply local losses.
    ///
    /// Strength is compared at the first location both snapshots share. The
    /// loser (both sides on a draw) loses every unit there; only the local
    /// player's losses are applied here.
    pub fn handle_war(&mut self, war: &RecognitionOfWar) -> WarOutcome {
        if war.attacker.username != self.username() {
            return WarOutcome::NotInvolved;
        }
        let Some(location) = war.attacker.overlapping_location(&war.defender) else {
            return WarOutcome::NoUnits;
        };

        let attacker_power = war.attacker.power_at(location);
        let defender_power = war.defender.power_at(location);
        let attacker = war.attacker.username.clone();
        let defender = war.defender.username.clone();

        if attacker_power > defender_power {
            WarOutcome::YouWon {
                winner: attacker,
                loser: defender,
            }
        } else if defender_power > attacker_power {
            self.remove_units_at(location);
            WarOutcome::OpponentWon {
                winner: defender,
                loser: attacker,
            }
        } else {
            self.remove_units_at(location);
            WarOutcome::Draw { attacker, defender }
        }
    }
}
