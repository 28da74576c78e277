//! Facade crate for the slideshow animation engine workspace.
//!
//! Hosts embed the engine through [`show_engine`]; this crate only re-exports
//! the public surface so downstream code can depend on a single package.

pub use show_engine::*;
