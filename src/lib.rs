//! panal: deception honeypot engine.
//!
//! Mirrors a target website, serves the instrumented copy, gates abusive
//! clients with a sliding-window rate limit backed by a persisted blocklist,
//! records every interaction as a structured event, and aggregates the event
//! log into attacker-behavior analytics.

pub mod analysis;
pub mod blocklist;
pub mod cloner;
pub mod config;
pub mod error;
pub mod events;
pub mod gate;
pub mod server;
