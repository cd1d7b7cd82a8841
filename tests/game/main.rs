//! Peril game flows over the in-memory broker.

mod support;
mod wars;
