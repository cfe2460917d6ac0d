//! Real-time direct-messaging core for an alumni network.
//!
//! The crate reproduces the messaging slice of the product as a standalone
//! component: hosted-backend collaborators (message store, conversation
//! directory, profile directory), per-conversation delivery and presence
//! broadcast channels, and the [`session::ClientSession`] view model that
//! reconciles optimistic local state against authoritative broadcasts.

pub mod backend;
pub mod config;
pub mod error;
pub mod identity;
pub mod realtime;
pub mod session;
