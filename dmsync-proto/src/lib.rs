//! Shared data model and wire events for the `dmsync` messaging engine.

pub mod codec;
pub mod event;
pub mod message;
pub mod reaction;
pub mod status;
