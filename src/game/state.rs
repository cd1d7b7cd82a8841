//! Local player state.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use super::error::GameError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Location {
    Americas,
    Europe,
    Africa,
    Asia,
    Antarctica,
    Australia,
}

impl Location {
    pub const ALL: [Location; 6] = [
        Location::Americas,
        Location::Europe,
        Location::Africa,
        Location::Asia,
        Location::Antarctica,
        Location::Australia,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Location::Americas => "americas",
            Location::Europe => "europe",
            Location::Africa => "africa",
            Location::Asia => "asia",
            Location::Antarctica => "antarctica",
            Location::Australia => "australia",
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Location {
    type Err = GameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Location::ALL
            .into_iter()
            .find(|loc| loc.as_str() == s)
            .ok_or_else(|| GameError::UnknownLocation(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitRank {
    Infantry,
    Cavalry,
    Artillery,
}

impl UnitRank {
    pub const ALL: [UnitRank; 3] = [UnitRank::Infantry, UnitRank::Cavalry, UnitRank::Artillery];

    pub fn as_str(self) -> &'static str {
        match self {
            UnitRank::Infantry => "infantry",
            UnitRank::Cavalry => "cavalry",
            UnitRank::Artillery => "artillery",
        }
    }

    /// Fighting strength of one unit of this rank.
    pub fn power(self) -> u32 {
        match self {
            UnitRank::Infantry => 1,
            UnitRank::Cavalry => 5,
            UnitRank::Artillery => 10,
        }
    }
}

impl fmt::Display for UnitRank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitRank {
    type Err = GameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UnitRank::ALL
            .into_iter()
            .find(|rank| rank.as_str() == s)
            .ok_or_else(|| GameError::UnknownRank(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub id: u32,
    pub rank: UnitRank,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub username: String,
    pub units: BTreeMap<u32, Unit>,
}

impl Player {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            units: BTreeMap::new(),
        }
    }

    pub fn units_at(&self, location: Location) -> impl Iterator<Item = &Unit> {
        self.units.values().filter(move |u| u.location == location)
    }

    pub fn power_at(&self, location: Location) -> u32 {
        self.units_at(location).map(|u| u.rank.power()).sum()
    }

    /// First location (in map order) where both players have units.
    pub fn overlapping_location(&self, other: &Player) -> Option<Location> {
        Location::ALL.into_iter().find(|&loc| {
            self.units_at(loc).next().is_some() && other.units_at(loc).next().is_some()
        })
    }
}

/// Everything one client knows about the game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameState {
    pub player: Player,
    pub paused: bool,
}

/// Game state shared between the REPL and the subscription threads.
pub type SharedGameState = Arc<Mutex<GameState>>;

impl GameState {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            player: Player::new(username),
            paused: false,
        }
    }

    pub fn shared(self) -> SharedGameState {
        Arc::new(Mutex::new(self))
    }

    pub fn username(&self) -> &str {
        &self.player.username
    }

    pub fn snapshot(&self) -> Player {
        self.player.clone()
    }

    pub fn add_unit(&mut self, rank: UnitRank, location: Location) -> Unit {
        let id = self.player.units.keys().next_back().map_or(1, |max| max + 1);
        let unit = Unit { id, rank, location };
        self.player.units.insert(id, unit.clone());
        unit
    }

    /// Remove every local unit at `location`, returning how many were lost.
    pub fn remove_units_at(&mut self, location: Location) -> usize {
        let before = self.player.units.len();
        self.player.units.retain(|_, u| u.location != location);
        before - self.player.units.len()
    }
}

/// Lock shared state, recovering it if a handler panicked while holding it.
pub fn lock_state(state: &SharedGameState) -> MutexGuard<'_, GameState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
