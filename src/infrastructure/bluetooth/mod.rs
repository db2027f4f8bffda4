//! Bluetooth Module
//!
//! Owns the trainer connection and turns its notifications into a stream of
//! metrics for one consumer.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    StreamingSession                       │
//! │  (binds one consumer, forwards frames, runs teardown)     │
//! └─────────────────────┬────────────────────────────────────┘
//!                       │
//!         ┌─────────────┼──────────────┐
//!         │             │              │
//!         ▼             ▼              ▼
//! ┌──────────────┐ ┌────────────┐ ┌──────────┐
//! │SessionManager│ │ Negotiator │ │ Protocol │
//! │              │ │            │ │          │
//! │ - connect    │ │ - ordered  │ │ - UUIDs  │
//! │ - disconnect │ │   fallback │ │ - frame  │
//! │ - state      │ │            │ │   decode │
//! └──────┬───────┘ └────────────┘ └──────────┘
//!        │
//!        ▼
//! ┌──────────────┐
//! │  Transport   │  (btleplug on the host, scripted in tests)
//! └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Candidate characteristics and frame decoding
//! - [`transport`] - Transport adapter traits
//! - [`platform`] - btleplug implementation of the transport
//! - [`session`] - Single-session lifecycle
//! - [`negotiator`] - Characteristic negotiation
//! - [`stream`] - Consumer binding and teardown

pub mod negotiator;
pub mod platform;
pub mod protocol;
pub mod session;
pub mod stream;
pub mod transport;

#[cfg(test)]
pub(crate) mod mock;

pub use session::SessionManager;
pub use stream::StreamingSession;
