//! # preamp-core
//!
//! Channel state model for the preamp control client.
//!
//! This crate provides:
//!
//! - **Store** - last-known configuration of all eight channels
//! - **Patch** - partial updates that never reset untouched fields
//! - **Change** - broadcast notifications of effective changes
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  set(patch)   ┌─────────────┐  encode  ┌─────────────┐
//! │   Caller    │──────────────▶│    Store    │─────────▶│    Codec    │
//! └─────────────┘               └─────────────┘          └─────────────┘
//!                                  ▲       │
//!                   apply(event)   │       ▼ subscribe()
//!                               ┌──┴───────────┐
//!                               │ Receive loop │  StateChange
//!                               └──────────────┘
//! ```

pub mod change;
pub mod patch;
pub mod store;

pub use change::{ChangeSource, StateChange};
pub use patch::ChannelPatch;
pub use store::{ApplyResult, ChannelStateStore, SharedStore, StoreError};
