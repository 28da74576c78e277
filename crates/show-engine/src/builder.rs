//! Builds the runtime animation tree from a parsed timing descriptor.
//!
//! Attribute resolution happens here: fill and restart inherit down the
//! tree, `auto` fill picks remove or freeze from the other timing
//! attributes, and leaf value strings are parsed against the animated
//! property's value class. Node kinds the engine does not support are
//! skipped with a log line so the rest of the tree still builds.

use std::rc::Rc;

use show_model::{
    AccumulateMode, AdditiveMode, CalcMode, Duration, FillMode, NodeInfo, NodeName, PropertyKind,
    PropertyValue, RestartMode, RgbColor, SequenceKind, Timing, Trigger,
};

use crate::context::ContextRef;
use crate::element::{AnimatedElement, AnimatedProperty, Rect};
use crate::nodes::{
    append_child, AnimationNode, ContainerData, LeafData, NodeBody, NodeParams, NodeRef,
    SequentialData,
};

/// Attributes a node inherits from its parent when its own are unset.
#[derive(Clone, Copy)]
struct Inherited {
    fill: FillMode,
    restart: RestartMode,
    parent_is_main_sequence: bool,
}

impl Default for Inherited {
    fn default() -> Self {
        Self {
            fill: FillMode::Auto,
            restart: RestartMode::Always,
            parent_is_main_sequence: false,
        }
    }
}

/// Build the runtime tree for a slide's timing root descriptor.
///
/// Returns `None` when the root itself is unusable; unsupported or broken
/// descendants are dropped individually.
pub fn build_tree(context: &ContextRef, info: &NodeInfo) -> Option<NodeRef> {
    build_node(context, info, Inherited::default())
}

fn build_node(context: &ContextRef, info: &NodeInfo, inherited: Inherited) -> Option<NodeRef> {
    let Some(name) = info.node_name else {
        log::warn!("build_node: descriptor without a node name, skipping");
        return None;
    };
    match name {
        NodeName::Par | NodeName::Seq => build_container(context, info, name, inherited),
        NodeName::Animate | NodeName::Set => build_leaf(context, info, name, inherited),
        NodeName::Iterate
        | NodeName::AnimateMotion
        | NodeName::AnimateColor
        | NodeName::AnimateTransform
        | NodeName::TransitionFilter
        | NodeName::Audio
        | NodeName::Command => {
            log::info!("build_node: {name:?} nodes are not implemented, skipping");
            None
        }
    }
}

fn build_container(
    context: &ContextRef,
    info: &NodeInfo,
    name: NodeName,
    inherited: Inherited,
) -> Option<NodeRef> {
    let params = resolve_params(info, inherited, true);
    let is_main_sequence = params.sequence_kind == SequenceKind::MainSequence;
    let child_inherited = Inherited {
        fill: params.fill,
        restart: params.restart,
        parent_is_main_sequence: is_main_sequence,
    };

    let body = match name {
        NodeName::Par => NodeBody::Parallel(ContainerData::default()),
        _ => NodeBody::Sequential(SequentialData::default()),
    };
    let node = AnimationNode::new(Rc::clone(context), params, body);
    for child_info in &info.children {
        if let Some(child) = build_node(context, child_info, child_inherited) {
            append_child(&node, child);
        }
    }
    Some(node)
}

fn build_leaf(
    context: &ContextRef,
    info: &NodeInfo,
    name: NodeName,
    inherited: Inherited,
) -> Option<NodeRef> {
    let params = resolve_params(info, inherited, false);

    let target = info.target_element.as_deref().map(|id| {
        context.element(id, || {
            log::debug!("build_leaf: element '{id}' was not registered, using an empty box");
            AnimatedElement::new(id, Rect::new(0.0, 0.0, 0.0, 0.0))
        })
    });
    let property = info
        .attribute_name
        .as_deref()
        .and_then(AnimatedProperty::parse);
    let valid = match (&info.target_element, &info.attribute_name) {
        (None, _) | (_, None) => {
            log::warn!("build_leaf: missing target element or attribute name");
            false
        }
        (_, Some(attribute)) if property.is_none() => {
            log::warn!("build_leaf: unknown attribute '{attribute}'");
            false
        }
        _ => true,
    };

    let kind = property.map(|p| p.kind());
    let parse = |text: &Option<String>| {
        let text = text.as_deref()?;
        let kind = kind?;
        let value = parse_value(kind, text);
        if value.is_none() {
            log::warn!("build_leaf: cannot parse '{text}' as a {kind:?} value");
        }
        value
    };
    let leaf = LeafData::new(
        target,
        property,
        parse(&info.from),
        parse(&info.to),
        parse(&info.by),
        info.calc_mode.unwrap_or(CalcMode::Linear),
        info.additive.unwrap_or(AdditiveMode::Replace),
        info.accumulate.unwrap_or(AccumulateMode::None),
    );
    let body = match name {
        NodeName::Set => NodeBody::Set(leaf),
        _ => NodeBody::Animate(leaf),
    };
    let node = AnimationNode::new(Rc::clone(context), params, body);
    if !valid {
        node.invalidate();
    }
    Some(node)
}

// ============================================================================
// Attribute resolution
// ============================================================================

fn resolve_params(info: &NodeInfo, inherited: Inherited, is_container: bool) -> NodeParams {
    let begin = parse_timing(info.begin.as_deref()).unwrap_or_else(|| Timing::Offset(0.0));
    let end = info.end.as_deref().and_then(|text| parse_timing(Some(text)));
    let dur = parse_duration(info.dur.as_deref(), is_container);
    let repeat_count = parse_repeat_count(info.repeat_count.as_deref());

    let (accelerate, decelerate) = {
        let a = parse_fraction(info.accelerate.as_deref());
        let d = parse_fraction(info.decelerate.as_deref());
        if a + d > 1.0 {
            log::debug!("resolve_params: accelerate + decelerate exceed the interval, ignoring both");
            (0.0, 0.0)
        } else {
            (a, d)
        }
    };

    let mut fill = info.fill.unwrap_or(FillMode::Default);
    if fill == FillMode::Default {
        fill = inherited.fill;
    }
    if fill == FillMode::Auto {
        let definite_dur = dur.is_some_and(|d| d.is_value());
        fill = if end.is_some() || repeat_count != 1.0 || definite_dur {
            FillMode::Remove
        } else {
            FillMode::Freeze
        };
    }

    let mut restart = info.restart.unwrap_or(RestartMode::Default);
    if restart == RestartMode::Default {
        restart = inherited.restart;
    }

    let sequence_kind = info.node_type.unwrap_or(SequenceKind::Default);
    // An effect in the main sequence that does not wait for the presenter
    // plays automatically with the previous one.
    let is_first_auto_effect =
        inherited.parent_is_main_sequence && begin.trigger() != Some(Trigger::OnNext);

    NodeParams {
        wire_id: info.id.clone(),
        begin,
        end,
        dur,
        fill,
        restart,
        repeat_count,
        accelerate,
        decelerate,
        auto_reverse: info.autoreverse.as_deref() == Some("true"),
        sequence_kind,
        is_first_auto_effect,
        start_delay: 0.0,
    }
}

fn parse_timing(text: Option<&str>) -> Option<Timing> {
    let text = text?;
    match Timing::parse(text) {
        Ok(timing) => Some(timing),
        Err(err) => {
            log::warn!("parse_timing: {err}");
            None
        }
    }
}

fn parse_duration(text: Option<&str>, is_container: bool) -> Option<Duration> {
    match text {
        Some(text) => match Duration::parse(text) {
            Ok(dur) => Some(dur),
            Err(err) => {
                log::warn!("parse_duration: {err}");
                (!is_container).then_some(Duration::Indefinite)
            }
        },
        // A container's duration derives from its children; a leaf without
        // one never ends on its own.
        None => (!is_container).then_some(Duration::Indefinite),
    }
}

fn parse_repeat_count(text: Option<&str>) -> f64 {
    match text {
        None => 1.0,
        Some(text) if text.eq_ignore_ascii_case("indefinite") => f64::INFINITY,
        Some(text) => match text.trim().parse::<f64>() {
            Ok(count) if count.is_finite() && count > 0.0 => count,
            _ => {
                log::warn!("parse_repeat_count: invalid value '{text}'");
                1.0
            }
        },
    }
}

fn parse_fraction(text: Option<&str>) -> f64 {
    text.and_then(|t| t.trim().parse::<f64>().ok())
        .map_or(0.0, |v| v.clamp(0.0, 1.0))
}

/// Parse a from/to/by attribute string against the property's value class.
pub fn parse_value(kind: PropertyKind, text: &str) -> Option<PropertyValue> {
    let text = text.trim();
    match kind {
        PropertyKind::Number => text.parse::<f64>().ok().map(PropertyValue::Number),
        PropertyKind::Enum => text.parse::<i32>().ok().map(PropertyValue::Enum),
        PropertyKind::Bool => match text {
            "true" | "visible" => Some(PropertyValue::Bool(true)),
            "false" | "hidden" => Some(PropertyValue::Bool(false)),
            _ => None,
        },
        PropertyKind::Color => parse_color(text).map(PropertyValue::Color),
        PropertyKind::String => Some(PropertyValue::Str(text.to_string())),
        PropertyKind::TupleNumber => {
            let parts: Result<Vec<f64>, _> = text
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|part| !part.is_empty())
                .map(str::parse::<f64>)
                .collect();
            match parts {
                Ok(values) if !values.is_empty() => Some(PropertyValue::TupleNumber(values)),
                _ => None,
            }
        }
    }
}

/// `#rrggbb` hex notation with channels normalized into [0, 1].
fn parse_color(text: &str) -> Option<RgbColor> {
    let hex = text.strip_prefix('#')?;
    if hex.len() != 6 {
        return None;
    }
    let channel = |range: std::ops::Range<usize>| {
        u8::from_str_radix(&hex[range], 16)
            .ok()
            .map(|v| f64::from(v) / 255.0)
    };
    Some(RgbColor::new(channel(0..2)?, channel(2..4)?, channel(4..6)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SlideShowContext;
    use crate::nodes::{self, NodeState};
    use crate::timing::{ElapsedTime, ManualTimeSource};

    fn context() -> ContextRef {
        let source = Rc::new(ManualTimeSource::new());
        SlideShowContext::new(Rc::new(ElapsedTime::new(source)))
    }

    fn build(json: &str) -> Option<NodeRef> {
        let info = NodeInfo::from_json(json).unwrap();
        build_tree(&context(), &info)
    }

    #[test]
    fn test_builds_main_sequence_tree() {
        let ctx = context();
        let info = NodeInfo::from_json(
            r#"{
                "nodeName": "seq",
                "nodeType": "mainSequence",
                "children": [
                    {
                        "nodeName": "par",
                        "begin": "onNext",
                        "children": [
                            {
                                "nodeName": "set",
                                "targetElement": "shape1",
                                "attributeName": "visibility",
                                "to": "visible"
                            }
                        ]
                    }
                ]
            }"#,
        )
        .unwrap();
        let root = build_tree(&ctx, &info).unwrap();
        assert!(root.is_main_sequence_root());
        let effects = root.children();
        assert_eq!(effects.len(), 1);
        assert_eq!(effects[0].children().len(), 1);
        assert!(ctx.lookup_element("shape1").is_some());
        // `onNext` effects wait for the presenter.
        assert!(!effects[0].params().is_first_auto_effect);
    }

    #[test]
    fn test_after_previous_effect_is_first_auto() {
        let info = NodeInfo::from_json(
            r#"{
                "nodeName": "seq",
                "nodeType": "mainSequence",
                "children": [
                    {"nodeName": "par", "begin": "0.5"},
                    {"nodeName": "par", "begin": "onNext"}
                ]
            }"#,
        )
        .unwrap();
        let root = build_tree(&context(), &info).unwrap();
        let effects = root.children();
        assert!(effects[0].params().is_first_auto_effect);
        assert!(!effects[1].params().is_first_auto_effect);
    }

    #[test]
    fn test_auto_fill_resolution() {
        // No end, single iteration, no definite duration: freeze.
        let node = build(r#"{"nodeName": "par"}"#).unwrap();
        assert_eq!(node.params().fill, FillMode::Freeze);
        // A repeat count switches auto fill to remove.
        let node = build(r#"{"nodeName": "par", "repeatCount": "2"}"#).unwrap();
        assert_eq!(node.params().fill, FillMode::Remove);
        // A definite duration does too.
        let node = build(r#"{"nodeName": "par", "dur": "2s"}"#).unwrap();
        assert_eq!(node.params().fill, FillMode::Remove);
    }

    #[test]
    fn test_fill_and_restart_inherit() {
        let info = NodeInfo::from_json(
            r#"{
                "nodeName": "par",
                "fill": "remove",
                "restart": "never",
                "children": [
                    {"nodeName": "par"},
                    {"nodeName": "par", "restart": "always"}
                ]
            }"#,
        )
        .unwrap();
        let root = build_tree(&context(), &info).unwrap();
        let children = root.children();
        assert_eq!(children[0].params().fill, FillMode::Remove);
        assert_eq!(children[0].params().restart, RestartMode::Never);
        assert_eq!(children[1].params().restart, RestartMode::Always);
    }

    #[test]
    fn test_leaf_without_target_is_invalid() {
        let node = build(
            r#"{"nodeName": "set", "attributeName": "visibility", "to": "visible"}"#,
        )
        .unwrap();
        assert_eq!(node.state(), NodeState::INVALID);
        assert!(!nodes::init(&node));
    }

    #[test]
    fn test_unsupported_children_are_skipped() {
        let node = build(
            r#"{
                "nodeName": "par",
                "children": [
                    {"nodeName": "audio"},
                    {"nodeName": "command"},
                    {"nodeName": "par"}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(node.children().len(), 1);
    }

    #[test]
    fn test_wire_id_registration() {
        let ctx = context();
        let info = NodeInfo::from_json(r#"{"nodeName": "par", "id": "n7"}"#).unwrap();
        let node = build_tree(&ctx, &info).unwrap();
        assert_eq!(ctx.lookup_node_id("n7"), Some(node.id()));
    }

    #[test]
    fn test_accel_decel_exceeding_interval_are_dropped() {
        let node = build(
            r#"{"nodeName": "par", "accelerate": "0.7", "decelerate": "0.6"}"#,
        )
        .unwrap();
        assert_eq!(node.params().accelerate, 0.0);
        assert_eq!(node.params().decelerate, 0.0);
    }

    #[test]
    fn test_value_parsing() {
        assert_eq!(
            parse_value(PropertyKind::Number, "1.5"),
            Some(PropertyValue::Number(1.5))
        );
        assert_eq!(
            parse_value(PropertyKind::Bool, "hidden"),
            Some(PropertyValue::Bool(false))
        );
        assert_eq!(
            parse_value(PropertyKind::Color, "#ff0000"),
            Some(PropertyValue::Color(RgbColor::new(1.0, 0.0, 0.0)))
        );
        assert_eq!(
            parse_value(PropertyKind::TupleNumber, "0.5, 0.25"),
            Some(PropertyValue::TupleNumber(vec![0.5, 0.25]))
        );
        assert_eq!(parse_value(PropertyKind::Number, "wide"), None);
    }
}
