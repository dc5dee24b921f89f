//! LAN radio engine: streams one shared playback of a local music folder to
//! any number of HTTP listeners.

pub mod api;
pub mod config;
pub mod error;
pub mod library;
pub mod station;

pub use error::{Result, StationError};
