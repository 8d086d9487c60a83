//! Attach protocol: discovery, handshake framing, sessions, and history.
//!
//! A host publishes a [`discovery::DiscoveryRecord`] naming a loopback port
//! and a one-time secret. A client connects, sends one JSON header line, and
//! the rest of the connection becomes the session's byte stream.

pub mod codec;
pub mod discovery;
pub mod handshake;
pub mod history;
pub mod listener;
pub mod output;
pub mod render;
pub mod session;
