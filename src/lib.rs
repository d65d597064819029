// Sentinel: media authenticity checks for social mentions
//
// This is the library root. Each module corresponds to a major subsystem
// of the mention → analysis → reply loop.

pub mod analysis;
pub mod config;
pub mod cursor;
pub mod platform;
pub mod poller;
pub mod reply;
pub mod resolver;
pub mod status;

#[cfg(feature = "web")]
pub mod web;
