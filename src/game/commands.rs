//! REPL commands that change local state.
//!
//! Each takes the words of one input line, command name first.

use std::fmt::Write as _;

use super::error::GameError;
use super::events::ArmyMove;
use super::state::{GameState, Location, Unit, UnitRank};

const SPAWN_USAGE: &str = "spawn <location> <rank>";
const MOVE_USAGE: &str = "move <location> <unit id> [unit id...]";

impl GameState {
    /// `spawn <location> <rank>`
    pub fn command_spawn<S: AsRef<str>>(&mut self, words: &[S]) -> Result<Unit, GameError> {
        let [_, location, rank, ..] = words else {
            return Err(GameError::Usage(SPAWN_USAGE));
        };
        let location: Location = location.as_ref().parse()?;
        let rank: UnitRank = rank.as_ref().parse()?;
        Ok(self.add_unit(rank, location))
    }

    /// `move <location> <unit id>...`
    ///
    /// Moves every listed unit and returns the move to broadcast. Nothing
    /// moves if any id is unknown.
    pub fn command_move<S: AsRef<str>>(&mut self, words: &[S]) -> Result<ArmyMove, GameError> {
        if self.paused {
            return Err(GameError::Paused);
        }
        let [_, location, ids @ ..] = words else {
            return Err(GameError::Usage(MOVE_USAGE));
        };
        if ids.is_empty() {
            return Err(GameError::Usage(MOVE_USAGE));
        }
        let to_location: Location = location.as_ref().parse()?;

        let mut unit_ids = Vec::with_capacity(ids.len());
        for raw in ids {
            let raw = raw.as_ref();
            let id: u32 = raw
                .parse()
                .map_err(|_| GameError::InvalidUnitId(raw.to_string()))?;
            if !self.player.units.contains_key(&id) {
                return Err(GameError::UnitNotFound(id));
            }
            unit_ids.push(id);
        }

        let mut units = Vec::with_capacity(unit_ids.len());
        for id in unit_ids {
            if let Some(unit) = self.player.units.get_mut(&id) {
                unit.location = to_location;
                units.push(unit.clone());
            }
        }

        Ok(ArmyMove {
            player: self.snapshot(),
            units,
            to_location,
        })
    }

    /// Human readable summary for `status`.
    pub fn command_status(&self) -> String {
        let mut out = String::new();
        let _ = write!(out, "{}", self.username());
        if self.paused {
            out.push_str(" (paused)");
        }
        let _ = writeln!(out, ": {} unit(s)", self.player.units.len());
        for unit in self.player.units.values() {
            let _ = writeln!(out, "  * {}: {}, {}", unit.id, unit.location, unit.rank);
        }
        out
    }
}
