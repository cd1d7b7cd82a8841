use std::fmt;

/// A REPL command could not be carried out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameError {
    Usage(&'static str),
    UnknownLocation(String),
    UnknownRank(String),
    InvalidUnitId(String),
    UnitNotFound(u32),
    Paused,
}

impl fmt::Display for GameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameError::Usage(usage) => write!(f, "usage: {}", usage),
            GameError::UnknownLocation(name) => write!(f, "unknown location {:?}", name),
            GameError::UnknownRank(name) => write!(f, "unknown rank {:?}", name),
            GameError::InvalidUnitId(raw) => write!(f, "{:?} is not a unit id", raw),
            GameError::UnitNotFound(id) => write!(f, "unit {} not found", id),
            GameError::Paused => write!(f, "the game is paused, you can not move units"),
        }
    }
}

impl std::error::Error for GameError {}
