//! Graph module for the relationship indexer.
//!
//! Holds the in-memory relationship graph and applies events to it.

mod engine;
mod node;

pub use engine::{GraphEngine, DEFAULT_REFERRAL_POINT_DEPTH};
pub use node::UserNode;
