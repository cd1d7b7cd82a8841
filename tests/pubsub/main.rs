//! Pub/sub integration tests against the in-memory broker.

mod delivery;
mod failures;
