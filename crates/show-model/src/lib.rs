//! Data model for the slideshow animation engine.
//!
//! This crate defines the serde-facing types shared between the host client
//! and the timing engine:
//! - `NodeInfo`: Animation-tree descriptors (par/seq containers, animate/set leaves)
//! - `Timing` / `Duration`: SMIL-style begin/end/dur attribute parsing
//! - `PropertyValue` / `PropertyKind`: Animatable property values and their kind tags
//! - `FillMode` / `RestartMode` / `CalcMode` and friends: Timing attribute enums
//!
//! The engine crate consumes these types; nothing here schedules or mutates
//! anything at runtime.

pub mod error;
pub mod schema;
pub mod types;

pub use error::ModelError;
pub use schema::{Duration, NodeInfo, NodeName, Timing, Trigger};
pub use types::{
    AccumulateMode, AdditiveMode, CalcMode, FillMode, NodeId, PropertyKind, PropertyValue,
    RestartMode, RgbColor, SequenceKind,
};
