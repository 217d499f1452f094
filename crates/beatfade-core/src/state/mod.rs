//! Session state for beatfade.
//!
//! All automation state lives in one owned [`Session`]; there are no globals.
//! The plugin talks to it through a [`SessionHandle`].
//!
//! # Architecture
//!
//! - [`Session`] - Registry, engines, transport and configuration
//! - [`SessionHandle`] - Shared, re-entry-safe access plus event subscribers

mod manager;
mod session;

pub use manager::SessionHandle;
pub use session::Session;
