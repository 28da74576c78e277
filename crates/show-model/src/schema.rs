//! Animation-tree descriptors and SMIL timing attribute parsing.
//!
//! The host client hands the engine one JSON descriptor per slide describing
//! the animation timing tree. This module defines that schema (`NodeInfo`)
//! and the parsers for the stringly-typed `begin`/`end`/`dur` attributes
//! (`Timing`, `Duration`).

use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::types::{AccumulateMode, AdditiveMode, CalcMode, FillMode, RestartMode, SequenceKind};

// ============================================================================
// Node descriptors
// ============================================================================

/// The kind of an animation node, carried by the descriptor's `nodeName`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeName {
    /// Parallel time container.
    Par,
    /// Sequential time container.
    Seq,
    /// Per-paragraph iteration container (not supported by this engine).
    Iterate,
    /// Continuous from/to/by property animation leaf.
    Animate,
    /// Discrete property assignment leaf.
    Set,
    AnimateMotion,
    AnimateColor,
    AnimateTransform,
    TransitionFilter,
    Audio,
    Command,
}

/// One node of a slide's animation timing tree, as parsed from the wire.
///
/// Unknown or absent attributes keep their defaults; attribute resolution
/// (SMIL fill/restart inheritance, auto fill) happens in the engine when the
/// tree is built, not here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeInfo {
    pub node_name: Option<NodeName>,
    /// Wire-level node id referenced by interactive triggers.
    pub id: Option<String>,
    pub begin: Option<String>,
    pub end: Option<String>,
    pub dur: Option<String>,
    pub fill: Option<FillMode>,
    pub restart: Option<RestartMode>,
    pub repeat_count: Option<String>,
    pub accelerate: Option<String>,
    pub decelerate: Option<String>,
    pub autoreverse: Option<String>,
    pub node_type: Option<SequenceKind>,
    /// Effect preset identifier; its presence marks a container as a shape effect.
    pub preset_id: Option<String>,
    pub preset_sub_type: Option<String>,
    pub children: Vec<NodeInfo>,

    // Leaf-only attributes.
    pub target_element: Option<String>,
    pub attribute_name: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub by: Option<String>,
    pub calc_mode: Option<CalcMode>,
    pub additive: Option<AdditiveMode>,
    pub accumulate: Option<AccumulateMode>,
}

impl NodeInfo {
    /// Parse a descriptor from raw JSON text.
    pub fn from_json(text: &str) -> Result<NodeInfo, ModelError> {
        Ok(serde_json::from_str(text)?)
    }
}

// ============================================================================
// Timing attributes
// ============================================================================

/// Event kind an event-based begin timing waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Trigger {
    /// The presenter advanced to the next effect (main sequence).
    OnNext,
    /// A specific element was clicked (interactive sequence).
    OnClick,
    /// Another node entered its active interval.
    BeginEvent,
    /// Another node left its active interval.
    EndEvent,
}

/// A parsed `begin`/`end` timing attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum Timing {
    /// Fixed offset in seconds from the parent interval start.
    Offset(f64),
    /// Never resolves on its own.
    Indefinite,
    /// Resolves when an event fires, plus an optional extra offset.
    Event {
        /// Element or node id the trigger is scoped to, when present.
        base_id: Option<String>,
        trigger: Trigger,
        offset: f64,
    },
}

impl Timing {
    /// Parse a timing attribute string.
    ///
    /// Accepted forms: `indefinite`, a bare or `s`-suffixed number
    /// (`"1.5"`, `"1.5s"`), an event spec with optional element prefix and
    /// optional offset (`"onNext"`, `"id.click"`, `"id.click+0.5s"`).
    pub fn parse(text: &str) -> Result<Timing, ModelError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Timing::Offset(0.0));
        }
        if text.eq_ignore_ascii_case("indefinite") {
            return Ok(Timing::Indefinite);
        }
        if let Some(seconds) = parse_seconds(text) {
            return Ok(Timing::Offset(seconds));
        }

        // Event form: [base_id.]event[+offset]
        let (event_part, offset) = match text.split_once('+') {
            Some((event, offset)) => {
                let seconds = parse_seconds(offset.trim())
                    .ok_or_else(|| ModelError::InvalidTiming(text.to_string()))?;
                (event.trim(), seconds)
            }
            None => (text, 0.0),
        };
        let (base_id, event_name) = match event_part.rsplit_once('.') {
            Some((id, event)) => (Some(id.to_string()), event),
            None => (None, event_part),
        };
        let trigger = match event_name {
            "onNext" | "next" => Trigger::OnNext,
            "onClick" | "click" => Trigger::OnClick,
            "begin" | "beginEvent" => Trigger::BeginEvent,
            "end" | "endEvent" => Trigger::EndEvent,
            _ => return Err(ModelError::InvalidTiming(text.to_string())),
        };
        Ok(Timing::Event {
            base_id,
            trigger,
            offset,
        })
    }

    /// The fixed offset in seconds contributed by this timing (0 for
    /// indefinite, the trailing `+offset` for event timings).
    pub fn offset(&self) -> f64 {
        match self {
            Timing::Offset(seconds) => *seconds,
            Timing::Indefinite => 0.0,
            Timing::Event { offset, .. } => *offset,
        }
    }

    /// The event trigger, when this is an event-based timing.
    pub fn trigger(&self) -> Option<Trigger> {
        match self {
            Timing::Event { trigger, .. } => Some(*trigger),
            _ => None,
        }
    }

    /// The id of the element/node the trigger is scoped to.
    pub fn base_id(&self) -> Option<&str> {
        match self {
            Timing::Event { base_id, .. } => base_id.as_deref(),
            _ => None,
        }
    }

    pub fn is_offset(&self) -> bool {
        matches!(self, Timing::Offset(_))
    }

    pub fn is_event(&self) -> bool {
        matches!(self, Timing::Event { .. })
    }
}

/// A parsed `dur` attribute.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Duration {
    /// Simple duration in seconds.
    Value(f64),
    Indefinite,
    /// Intrinsic media duration; carried through but never scheduled.
    Media,
}

impl Duration {
    /// Parse a duration attribute string.
    pub fn parse(text: &str) -> Result<Duration, ModelError> {
        let text = text.trim();
        if text.eq_ignore_ascii_case("indefinite") {
            return Ok(Duration::Indefinite);
        }
        if text.eq_ignore_ascii_case("media") {
            return Ok(Duration::Media);
        }
        parse_seconds(text)
            .map(Duration::Value)
            .ok_or_else(|| ModelError::InvalidDuration(text.to_string()))
    }

    pub fn is_value(&self) -> bool {
        matches!(self, Duration::Value(_))
    }

    pub fn is_indefinite(&self) -> bool {
        matches!(self, Duration::Indefinite)
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Duration::Value(seconds) => Some(*seconds),
            _ => None,
        }
    }
}

/// Parse `"1.5"`, `"1.5s"`, or `"1500ms"` into seconds.
fn parse_seconds(text: &str) -> Option<f64> {
    let text = text.trim();
    let (number, scale) = if let Some(stripped) = text.strip_suffix("ms") {
        (stripped, 0.001)
    } else if let Some(stripped) = text.strip_suffix('s') {
        (stripped, 1.0)
    } else {
        (text, 1.0)
    };
    let value: f64 = number.trim().parse().ok()?;
    value.is_finite().then_some(value * scale)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timing_offset_forms() {
        assert_eq!(Timing::parse("2").unwrap(), Timing::Offset(2.0));
        assert_eq!(Timing::parse("2.5s").unwrap(), Timing::Offset(2.5));
        assert_eq!(Timing::parse("1500ms").unwrap(), Timing::Offset(1.5));
        assert_eq!(Timing::parse("").unwrap(), Timing::Offset(0.0));
    }

    #[test]
    fn test_timing_indefinite() {
        assert_eq!(Timing::parse("indefinite").unwrap(), Timing::Indefinite);
        assert_eq!(Timing::parse("indefinite").unwrap().offset(), 0.0);
    }

    #[test]
    fn test_timing_event_forms() {
        let t = Timing::parse("onNext").unwrap();
        assert_eq!(t.trigger(), Some(Trigger::OnNext));
        assert_eq!(t.base_id(), None);

        let t = Timing::parse("shape5.click+0.5s").unwrap();
        assert_eq!(t.trigger(), Some(Trigger::OnClick));
        assert_eq!(t.base_id(), Some("shape5"));
        assert_eq!(t.offset(), 0.5);
    }

    #[test]
    fn test_timing_rejects_garbage() {
        assert!(Timing::parse("whenever").is_err());
        assert!(Timing::parse("x.click+later").is_err());
    }

    #[test]
    fn test_duration_forms() {
        assert_eq!(Duration::parse("3s").unwrap(), Duration::Value(3.0));
        assert_eq!(Duration::parse("indefinite").unwrap(), Duration::Indefinite);
        assert_eq!(Duration::parse("media").unwrap(), Duration::Media);
        assert!(Duration::parse("soon").is_err());
    }

    #[test]
    fn test_node_info_from_json() {
        let json = r#"{
            "nodeName": "par",
            "begin": "0s",
            "fill": "freeze",
            "nodeType": "mainSequence",
            "children": [
                { "nodeName": "set", "targetElement": "shape1",
                  "attributeName": "visibility", "to": "visible", "dur": "0.001s" }
            ]
        }"#;
        let info = NodeInfo::from_json(json).unwrap();
        assert_eq!(info.node_name, Some(NodeName::Par));
        assert_eq!(info.fill, Some(FillMode::Freeze));
        assert_eq!(info.node_type, Some(SequenceKind::MainSequence));
        assert_eq!(info.children.len(), 1);
        assert_eq!(info.children[0].node_name, Some(NodeName::Set));
        assert_eq!(info.children[0].target_element.as_deref(), Some("shape1"));
    }
}
