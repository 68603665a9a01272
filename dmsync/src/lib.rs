//! `dmsync` — client-side direct-message synchronization engine.

pub mod chat;
pub mod config;
pub mod gateway;
pub mod presence;
pub mod replay;
pub mod transport;
