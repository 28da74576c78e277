//! Core animation model types.
//!
//! This module defines the fundamental types for the timing engine:
//! - `NodeId`: Unique identifier for animation nodes
//! - `FillMode` / `RestartMode`: SMIL timing attributes driving the node state machine
//! - `SequenceKind`: The presentation-level role of a container node
//! - `CalcMode` / `AdditiveMode` / `AccumulateMode`: Leaf animation attributes
//! - `PropertyValue` / `PropertyKind`: Tagged animatable values and their kind tags
//! - `RgbColor`: Color channel algebra for color animations

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for an animation node instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Timing attributes
// ============================================================================

/// SMIL fill behavior: what happens to the animated state after a node's
/// active duration ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FillMode {
    /// Not specified on the node; resolved from the parent (or `Auto` at the root).
    #[serde(alias = "inherit")]
    Default,
    /// Discard the effect when the node ends.
    Remove,
    /// Keep the final animated state.
    Freeze,
    /// Keep the state until the parent container ends.
    Hold,
    /// Like `Hold`, used by transition effects.
    Transition,
    /// Resolved per the SMIL rules at parse time.
    Auto,
}

impl Default for FillMode {
    fn default() -> Self {
        Self::Default
    }
}

/// SMIL restart behavior: whether a node may run again after it finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RestartMode {
    /// Not specified on the node; resolved from the parent (or `Always` at the root).
    #[serde(alias = "inherit")]
    Default,
    Always,
    WhenNotActive,
    Never,
}

impl Default for RestartMode {
    fn default() -> Self {
        Self::Default
    }
}

/// Presentation-level role of a node, carried by the `nodeType` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SequenceKind {
    Default,
    OnClick,
    WithPrevious,
    AfterPrevious,
    MainSequence,
    TimingRoot,
    InteractiveSequence,
}

impl Default for SequenceKind {
    fn default() -> Self {
        Self::Default
    }
}

/// Interpolation calc mode for leaf animations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CalcMode {
    Discrete,
    Linear,
    Paced,
    Spline,
}

impl Default for CalcMode {
    fn default() -> Self {
        Self::Linear
    }
}

/// How an animated value combines with the element's underlying value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AdditiveMode {
    Unknown,
    Base,
    Sum,
    Replace,
    Multiply,
    None,
}

impl Default for AdditiveMode {
    fn default() -> Self {
        Self::Replace
    }
}

/// Whether repeat iterations accumulate onto the previous iteration's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AccumulateMode {
    None,
    Sum,
}

impl Default for AccumulateMode {
    fn default() -> Self {
        Self::None
    }
}

// ============================================================================
// Property values
// ============================================================================

/// Kind tag selecting the algebra (equal/add/scale) and the interpolator set
/// for an animated property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    Number,
    Enum,
    Color,
    String,
    Bool,
    TupleNumber,
}

/// An RGB color with floating point channels in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RgbColor {
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

impl RgbColor {
    pub fn new(r: f64, g: f64, b: f64) -> Self {
        Self { r, g, b }
    }

    /// Componentwise sum. Channels are not clamped here; clamping happens
    /// when the color is handed to the renderer.
    pub fn add(&self, other: &RgbColor) -> RgbColor {
        RgbColor::new(self.r + other.r, self.g + other.g, self.b + other.b)
    }

    /// Componentwise scale by a factor.
    pub fn scaled(&self, factor: f64) -> RgbColor {
        RgbColor::new(self.r * factor, self.g * factor, self.b * factor)
    }

    /// Clamp every channel into [0, 1].
    pub fn clamped(&self) -> RgbColor {
        RgbColor::new(
            self.r.clamp(0.0, 1.0),
            self.g.clamp(0.0, 1.0),
            self.b.clamp(0.0, 1.0),
        )
    }
}

/// A value that can be animated on an element.
///
/// The engine never guesses: each variant carries its `PropertyKind` tag via
/// [`PropertyValue::kind`], and the operator/interpolator lookups key on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Number(f64),
    Enum(i32),
    Color(RgbColor),
    Str(String),
    Bool(bool),
    TupleNumber(Vec<f64>),
}

impl PropertyValue {
    /// The kind tag of this value.
    pub fn kind(&self) -> PropertyKind {
        match self {
            PropertyValue::Number(_) => PropertyKind::Number,
            PropertyValue::Enum(_) => PropertyKind::Enum,
            PropertyValue::Color(_) => PropertyKind::Color,
            PropertyValue::Str(_) => PropertyKind::String,
            PropertyValue::Bool(_) => PropertyKind::Bool,
            PropertyValue::TupleNumber(_) => PropertyKind::TupleNumber,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_color(&self) -> Option<RgbColor> {
        match self {
            PropertyValue::Color(c) => Some(*c),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&[f64]> {
        match self {
            PropertyValue::TupleNumber(t) => Some(t),
            _ => None,
        }
    }
}

impl From<f64> for PropertyValue {
    fn from(n: f64) -> Self {
        PropertyValue::Number(n)
    }
}

impl From<RgbColor> for PropertyValue {
    fn from(c: RgbColor) -> Self {
        PropertyValue::Color(c)
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        PropertyValue::Bool(b)
    }
}

impl From<Vec<f64>> for PropertyValue {
    fn from(t: Vec<f64>) -> Self {
        PropertyValue::TupleNumber(t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(PropertyValue: Clone, Send, Sync);
    assert_impl_all!(NodeId: Copy, Send, Sync);

    #[test]
    fn test_node_id_uniqueness() {
        let a = NodeId::new();
        let b = NodeId::new();
        assert_ne!(a, b);
        assert!(b.0 > a.0);
    }

    #[test]
    fn test_property_value_kinds() {
        assert_eq!(PropertyValue::Number(1.0).kind(), PropertyKind::Number);
        assert_eq!(
            PropertyValue::Color(RgbColor::new(1.0, 0.0, 0.0)).kind(),
            PropertyKind::Color
        );
        assert_eq!(
            PropertyValue::TupleNumber(vec![1.0, 2.0]).kind(),
            PropertyKind::TupleNumber
        );
        assert_eq!(PropertyValue::Bool(true).kind(), PropertyKind::Bool);
    }

    #[test]
    fn test_color_algebra() {
        let a = RgbColor::new(0.5, 0.25, 1.0);
        let b = RgbColor::new(0.5, 0.25, 0.5);
        assert_eq!(a.add(&b), RgbColor::new(1.0, 0.5, 1.5));
        assert_eq!(a.scaled(2.0), RgbColor::new(1.0, 0.5, 2.0));
        assert_eq!(a.add(&b).clamped(), RgbColor::new(1.0, 0.5, 1.0));
    }

    #[test]
    fn test_fill_mode_deserializes_wire_names() {
        let fill: FillMode = serde_json::from_str("\"freeze\"").unwrap();
        assert_eq!(fill, FillMode::Freeze);
        let fill: FillMode = serde_json::from_str("\"inherit\"").unwrap();
        assert_eq!(fill, FillMode::Default);
    }
}
