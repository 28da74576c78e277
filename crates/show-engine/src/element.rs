//! Per-element animated state: the leaves actually mutated by running
//! activities.
//!
//! An `AnimatedElement` tracks the live transform/opacity/visibility/color
//! state of one slide element. The renderer polls the getters each frame;
//! this module never draws anything itself.
//!
//! Rewind correctness rests on the snapshot store: any animation node may
//! `save_state(node_id)` before mutating the element and later
//! `restore_state(node_id)`, recovering exactly what existed at that node's
//! activation point.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use show_model::{NodeId, PropertyKind, PropertyValue, RgbColor};

use crate::transform::Transform2D;

/// Scale factors are never clamped all the way to zero so the transform
/// matrix stays invertible.
pub const MIN_SCALE_FACTOR: f64 = 1e-5;

/// Axis-aligned bounding box in slide coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// Snapshot of every animatable channel of an element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementState {
    pub center_x: f64,
    pub center_y: f64,
    pub scale_x: f64,
    pub scale_y: f64,
    /// Rotation in degrees.
    pub rotation_angle: f64,
    pub skew_x: f64,
    pub skew_y: f64,
    pub matrix: Transform2D,
    pub opacity: f64,
    pub visible: bool,
    pub fill_color: RgbColor,
    pub line_color: RgbColor,
}

/// Live animated state of one slide element.
pub struct AnimatedElement {
    id: String,
    base_bbox: Rect,
    base_center_x: f64,
    base_center_y: f64,
    base_fill_color: RgbColor,
    base_line_color: RgbColor,
    init_visible: bool,

    state: RefCell<ElementState>,
    /// Snapshots keyed by the saving animation node's id.
    saved_states: RefCell<HashMap<NodeId, ElementState>>,
    /// Which nodes are animating within each effect (by effect index), and
    /// the element state captured when that effect's first node saved.
    active_nodes_per_effect: RefCell<HashMap<i64, HashSet<NodeId>>>,
    state_on_effect_start: RefCell<HashMap<i64, ElementState>>,
    current_effect: Cell<i64>,
    running_animations: Cell<u32>,
}

impl AnimatedElement {
    pub fn new(id: impl Into<String>, base_bbox: Rect) -> Self {
        let (base_center_x, base_center_y) = base_bbox.center();
        let element = Self {
            id: id.into(),
            base_bbox,
            base_center_x,
            base_center_y,
            base_fill_color: RgbColor::default(),
            base_line_color: RgbColor::default(),
            init_visible: true,
            state: RefCell::new(ElementState {
                center_x: base_center_x,
                center_y: base_center_y,
                scale_x: 1.0,
                scale_y: 1.0,
                rotation_angle: 0.0,
                skew_x: 0.0,
                skew_y: 0.0,
                matrix: Transform2D::identity(),
                opacity: 1.0,
                visible: true,
                fill_color: RgbColor::default(),
                line_color: RgbColor::default(),
            }),
            saved_states: RefCell::new(HashMap::new()),
            active_nodes_per_effect: RefCell::new(HashMap::new()),
            state_on_effect_start: RefCell::new(HashMap::new()),
            current_effect: Cell::new(-1),
            running_animations: Cell::new(0),
        };
        element.reset();
        element
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn base_bbox(&self) -> Rect {
        self.base_bbox
    }

    /// Reset every channel to its base value and clear bookkeeping.
    pub fn reset(&self) {
        *self.state.borrow_mut() = ElementState {
            center_x: self.base_center_x,
            center_y: self.base_center_y,
            scale_x: 1.0,
            scale_y: 1.0,
            rotation_angle: 0.0,
            skew_x: 0.0,
            skew_y: 0.0,
            matrix: Transform2D::identity(),
            opacity: 1.0,
            visible: self.init_visible,
            fill_color: self.base_fill_color,
            line_color: self.base_line_color,
        };
    }

    /// Called when the owning slide is (re-)entered: live state and the
    /// snapshot store start over.
    pub fn notify_slide_start(&self) {
        self.reset();
        self.saved_states.borrow_mut().clear();
        self.active_nodes_per_effect.borrow_mut().clear();
        self.state_on_effect_start.borrow_mut().clear();
        self.running_animations.set(0);
    }

    /// The handler reports which effect (by index in the started-effect
    /// history) is currently playing; saves are attributed to it.
    pub fn set_current_effect(&self, effect_index: i64) {
        self.current_effect.set(effect_index);
        self.active_nodes_per_effect
            .borrow_mut()
            .entry(effect_index)
            .or_default();
    }

    pub fn notify_animation_start(&self) {
        self.running_animations.set(self.running_animations.get() + 1);
    }

    pub fn notify_animation_end(&self) {
        let running = self.running_animations.get();
        if running == 0 {
            log::warn!("AnimatedElement({}): animation end without start", self.id);
            return;
        }
        self.running_animations.set(running - 1);
    }

    pub fn is_animating(&self) -> bool {
        self.running_animations.get() > 0
    }

    // ---- snapshots --------------------------------------------------------

    /// Snapshot the current state under `node_id`. The first save within the
    /// current effect also records the effect-boundary state.
    pub fn save_state(&self, node_id: NodeId) {
        let state = self.state.borrow().clone();
        self.saved_states.borrow_mut().insert(node_id, state.clone());

        let effect = self.current_effect.get();
        let mut per_effect = self.active_nodes_per_effect.borrow_mut();
        match per_effect.get_mut(&effect) {
            Some(nodes) => {
                nodes.insert(node_id);
                if nodes.len() == 1 {
                    self.state_on_effect_start.borrow_mut().insert(effect, state);
                }
            }
            None => {
                log::debug!(
                    "AnimatedElement({}).save_state({node_id}): no current effect {effect}",
                    self.id
                );
            }
        }
    }

    /// Restore the state saved under `node_id`. When that node was the last
    /// one animating its effect, the effect-boundary state wins so the whole
    /// effect unwinds cleanly. Returns false (logged) if no snapshot exists.
    pub fn restore_state(&self, node_id: NodeId) -> bool {
        let Some(mut state) = self.saved_states.borrow().get(&node_id).cloned() else {
            log::warn!(
                "AnimatedElement({}).restore_state: no state saved for node {node_id}",
                self.id
            );
            return false;
        };

        let mut per_effect = self.active_nodes_per_effect.borrow_mut();
        let owning_effect = per_effect.iter_mut().find_map(|(effect, nodes)| {
            nodes.remove(&node_id).then_some((*effect, nodes.is_empty()))
        });
        if let Some((effect, emptied)) = owning_effect {
            if emptied {
                per_effect.remove(&effect);
                if let Some(boundary) = self.state_on_effect_start.borrow_mut().remove(&effect) {
                    state = boundary;
                }
            }
        }
        drop(per_effect);

        *self.state.borrow_mut() = state;
        true
    }

    // ---- transform channels -----------------------------------------------

    /// Rebuild the full matrix from scratch on every change; incremental
    /// updates would accumulate floating point drift.
    fn update_transformation_matrix(&self) {
        let mut state = self.state.borrow_mut();
        let matrix = Transform2D::translate(state.center_x, state.center_y)
            .multiply(&Transform2D::rotate(state.rotation_angle.to_radians()))
            .multiply(&Transform2D::scale(state.scale_x, state.scale_y))
            .multiply(&Transform2D::skew_x(state.skew_x.atan()))
            .multiply(&Transform2D::skew_y(state.skew_y.atan()))
            .multiply(&Transform2D::translate(-self.base_center_x, -self.base_center_y));
        state.matrix = matrix;
    }

    pub fn x(&self) -> f64 {
        self.state.borrow().center_x
    }

    pub fn y(&self) -> f64 {
        self.state.borrow().center_y
    }

    pub fn pos(&self) -> (f64, f64) {
        (self.x(), self.y())
    }

    pub fn width(&self) -> f64 {
        self.state.borrow().scale_x * self.base_bbox.width
    }

    pub fn height(&self) -> f64 {
        self.state.borrow().scale_y * self.base_bbox.height
    }

    pub fn size(&self) -> (f64, f64) {
        (self.width(), self.height())
    }

    pub fn scale_factors(&self) -> (f64, f64) {
        let state = self.state.borrow();
        (state.scale_x, state.scale_y)
    }

    pub fn matrix(&self) -> Transform2D {
        self.state.borrow().matrix
    }

    pub fn set_x(&self, center_x: f64) {
        if self.state.borrow().center_x == center_x {
            return;
        }
        self.state.borrow_mut().center_x = center_x;
        self.update_transformation_matrix();
    }

    pub fn set_y(&self, center_y: f64) {
        if self.state.borrow().center_y == center_y {
            return;
        }
        self.state.borrow_mut().center_y = center_y;
        self.update_transformation_matrix();
    }

    pub fn set_pos(&self, pos: (f64, f64)) {
        {
            let mut state = self.state.borrow_mut();
            if state.center_x == pos.0 && state.center_y == pos.1 {
                return;
            }
            state.center_x = pos.0;
            state.center_y = pos.1;
        }
        self.update_transformation_matrix();
    }

    pub fn set_width(&self, width: f64) {
        let scale_x = clamp_scale(width / self.base_bbox.width);
        if self.state.borrow().scale_x == scale_x {
            return;
        }
        self.state.borrow_mut().scale_x = scale_x;
        self.update_transformation_matrix();
    }

    pub fn set_height(&self, height: f64) {
        let scale_y = clamp_scale(height / self.base_bbox.height);
        if self.state.borrow().scale_y == scale_y {
            return;
        }
        self.state.borrow_mut().scale_y = scale_y;
        self.update_transformation_matrix();
    }

    pub fn set_size(&self, size: (f64, f64)) {
        let scale_x = clamp_scale(size.0 / self.base_bbox.width);
        let scale_y = clamp_scale(size.1 / self.base_bbox.height);
        {
            let mut state = self.state.borrow_mut();
            if state.scale_x == scale_x && state.scale_y == scale_y {
                return;
            }
            state.scale_x = scale_x;
            state.scale_y = scale_y;
        }
        self.update_transformation_matrix();
    }

    pub fn rotation_angle(&self) -> f64 {
        self.state.borrow().rotation_angle
    }

    pub fn set_rotation_angle(&self, degrees: f64) {
        self.state.borrow_mut().rotation_angle = degrees;
        self.update_transformation_matrix();
    }

    pub fn skew_x(&self) -> f64 {
        self.state.borrow().skew_x
    }

    pub fn set_skew_x(&self, skew: f64) {
        self.state.borrow_mut().skew_x = skew;
        self.update_transformation_matrix();
    }

    pub fn skew_y(&self) -> f64 {
        self.state.borrow().skew_y
    }

    pub fn set_skew_y(&self, skew: f64) {
        self.state.borrow_mut().skew_y = skew;
        self.update_transformation_matrix();
    }

    // ---- scalar channels --------------------------------------------------

    pub fn opacity(&self) -> f64 {
        self.state.borrow().opacity
    }

    /// Out-of-range input is a normal, silently corrected case.
    pub fn set_opacity(&self, opacity: f64) {
        self.state.borrow_mut().opacity = opacity.clamp(0.0, 1.0);
    }

    pub fn is_visible(&self) -> bool {
        self.state.borrow().visible
    }

    pub fn set_visibility(&self, visible: bool) {
        self.state.borrow_mut().visible = visible;
    }

    pub fn fill_color(&self) -> RgbColor {
        self.state.borrow().fill_color
    }

    pub fn set_fill_color(&self, color: RgbColor) {
        self.state.borrow_mut().fill_color = color;
    }

    pub fn line_color(&self) -> RgbColor {
        self.state.borrow().line_color
    }

    pub fn set_line_color(&self, color: RgbColor) {
        self.state.borrow_mut().line_color = color;
    }
}

/// Animatable properties addressable by leaf animation nodes, bridging
/// attribute names from the wire to element getters/setters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnimatedProperty {
    X,
    Y,
    Pos,
    Width,
    Height,
    Size,
    Opacity,
    RotationAngle,
    SkewX,
    SkewY,
    Visibility,
    FillColor,
    LineColor,
}

impl AnimatedProperty {
    /// Parse a wire attribute name. Unknown names are the caller's problem
    /// to log and skip.
    pub fn parse(name: &str) -> Option<AnimatedProperty> {
        Some(match name {
            "x" => AnimatedProperty::X,
            "y" => AnimatedProperty::Y,
            "pos" => AnimatedProperty::Pos,
            "width" => AnimatedProperty::Width,
            "height" => AnimatedProperty::Height,
            "size" => AnimatedProperty::Size,
            "opacity" => AnimatedProperty::Opacity,
            "rotate" | "rotationAngle" => AnimatedProperty::RotationAngle,
            "skewX" | "skewx" => AnimatedProperty::SkewX,
            "skewY" | "skewy" => AnimatedProperty::SkewY,
            "visibility" => AnimatedProperty::Visibility,
            "fillColor" | "fill-color" => AnimatedProperty::FillColor,
            "lineColor" | "stroke-color" => AnimatedProperty::LineColor,
            _ => return None,
        })
    }

    /// The value kind this property animates with, selecting the operator
    /// set and interpolator.
    pub fn kind(&self) -> PropertyKind {
        match self {
            AnimatedProperty::X
            | AnimatedProperty::Y
            | AnimatedProperty::Width
            | AnimatedProperty::Height
            | AnimatedProperty::Opacity
            | AnimatedProperty::RotationAngle
            | AnimatedProperty::SkewX
            | AnimatedProperty::SkewY => PropertyKind::Number,
            AnimatedProperty::Pos | AnimatedProperty::Size => PropertyKind::TupleNumber,
            AnimatedProperty::Visibility => PropertyKind::Bool,
            AnimatedProperty::FillColor | AnimatedProperty::LineColor => PropertyKind::Color,
        }
    }

    pub fn get(&self, element: &AnimatedElement) -> PropertyValue {
        match self {
            AnimatedProperty::X => PropertyValue::Number(element.x()),
            AnimatedProperty::Y => PropertyValue::Number(element.y()),
            AnimatedProperty::Pos => {
                let (x, y) = element.pos();
                PropertyValue::TupleNumber(vec![x, y])
            }
            AnimatedProperty::Width => PropertyValue::Number(element.width()),
            AnimatedProperty::Height => PropertyValue::Number(element.height()),
            AnimatedProperty::Size => {
                let (w, h) = element.size();
                PropertyValue::TupleNumber(vec![w, h])
            }
            AnimatedProperty::Opacity => PropertyValue::Number(element.opacity()),
            AnimatedProperty::RotationAngle => PropertyValue::Number(element.rotation_angle()),
            AnimatedProperty::SkewX => PropertyValue::Number(element.skew_x()),
            AnimatedProperty::SkewY => PropertyValue::Number(element.skew_y()),
            AnimatedProperty::Visibility => PropertyValue::Bool(element.is_visible()),
            AnimatedProperty::FillColor => PropertyValue::Color(element.fill_color()),
            AnimatedProperty::LineColor => PropertyValue::Color(element.line_color()),
        }
    }

    /// Apply a value; kind mismatches are logged and dropped rather than
    /// panicking mid-show.
    pub fn set(&self, element: &AnimatedElement, value: &PropertyValue) {
        match (self, value) {
            (AnimatedProperty::X, PropertyValue::Number(v)) => element.set_x(*v),
            (AnimatedProperty::Y, PropertyValue::Number(v)) => element.set_y(*v),
            (AnimatedProperty::Pos, PropertyValue::TupleNumber(v)) if v.len() == 2 => {
                element.set_pos((v[0], v[1]))
            }
            (AnimatedProperty::Width, PropertyValue::Number(v)) => element.set_width(*v),
            (AnimatedProperty::Height, PropertyValue::Number(v)) => element.set_height(*v),
            (AnimatedProperty::Size, PropertyValue::TupleNumber(v)) if v.len() == 2 => {
                element.set_size((v[0], v[1]))
            }
            (AnimatedProperty::Opacity, PropertyValue::Number(v)) => element.set_opacity(*v),
            (AnimatedProperty::RotationAngle, PropertyValue::Number(v)) => {
                element.set_rotation_angle(*v)
            }
            (AnimatedProperty::SkewX, PropertyValue::Number(v)) => element.set_skew_x(*v),
            (AnimatedProperty::SkewY, PropertyValue::Number(v)) => element.set_skew_y(*v),
            (AnimatedProperty::Visibility, PropertyValue::Bool(v)) => element.set_visibility(*v),
            (AnimatedProperty::FillColor, PropertyValue::Color(c)) => element.set_fill_color(*c),
            (AnimatedProperty::LineColor, PropertyValue::Color(c)) => element.set_line_color(*c),
            _ => {
                log::warn!(
                    "AnimatedProperty::set: value {value:?} does not fit property {self:?}"
                );
            }
        }
    }
}

/// Clamp a scale factor away from zero, keeping its sign. An exact zero
/// clamps to the positive epsilon.
fn clamp_scale(scale: f64) -> f64 {
    if scale.abs() < MIN_SCALE_FACTOR {
        if scale < 0.0 { -MIN_SCALE_FACTOR } else { MIN_SCALE_FACTOR }
    } else {
        scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element() -> AnimatedElement {
        AnimatedElement::new("shape1", Rect::new(0.0, 0.0, 100.0, 50.0))
    }

    #[test]
    fn test_set_size_scale_factors() {
        // Base bbox is 100x50: doubling both dimensions means 2x scale each.
        let el = element();
        el.set_size((200.0, 100.0));
        assert_eq!(el.scale_factors(), (2.0, 2.0));
        assert_eq!(el.size(), (200.0, 100.0));
    }

    #[test]
    fn test_zero_width_clamps_scale() {
        let el = element();
        el.set_size((0.0, 50.0));
        let (scale_x, scale_y) = el.scale_factors();
        assert_eq!(scale_x, MIN_SCALE_FACTOR);
        assert_eq!(scale_y, 1.0);
    }

    #[test]
    fn test_negative_scale_keeps_sign() {
        let el = element();
        el.set_width(-0.0001);
        assert_eq!(el.scale_factors().0, -MIN_SCALE_FACTOR);
    }

    #[test]
    fn test_opacity_always_clamped() {
        let el = element();
        for (input, expected) in [(1.7, 1.0), (-3.0, 0.0), (0.25, 0.25), (f64::MAX, 1.0)] {
            el.set_opacity(input);
            assert_eq!(el.opacity(), expected);
        }
    }

    #[test]
    fn test_save_restore_round_trip() {
        // Every tracked field returns to its pre-mutation value.
        let el = element();
        el.set_current_effect(0);
        let node = NodeId::new();

        el.set_pos((42.0, 24.0));
        el.set_rotation_angle(30.0);
        el.save_state(node);
        let before = el.state.borrow().clone();

        el.set_size((300.0, 10.0));
        el.set_rotation_angle(90.0);
        el.set_skew_x(0.5);
        el.set_opacity(0.1);
        el.set_visibility(false);
        el.set_fill_color(RgbColor::new(1.0, 0.0, 0.0));

        assert!(el.restore_state(node));
        assert_eq!(*el.state.borrow(), before);
    }

    #[test]
    fn test_restore_without_snapshot_is_recoverable() {
        let el = element();
        assert!(!el.restore_state(NodeId::new()));
    }

    #[test]
    fn test_effect_boundary_state_wins_when_effect_unwinds() {
        let el = element();
        el.set_current_effect(0);

        let first = NodeId::new();
        el.save_state(first);
        el.set_opacity(0.5);

        let second = NodeId::new();
        el.save_state(second);
        el.set_opacity(0.2);

        // Removing the last active node of the effect restores the state
        // captured when the effect started, not the later snapshot.
        assert!(el.restore_state(second));
        assert!(el.restore_state(first));
        assert_eq!(el.opacity(), 1.0);
    }

    #[test]
    fn test_matrix_rebuilds_from_scratch() {
        let el = element();
        el.set_rotation_angle(45.0);
        el.set_rotation_angle(0.0);
        el.set_pos((50.0, 25.0));
        // Center equals the base center: the matrix must be exactly identity
        // again, not an accumulation of tiny increments.
        assert_eq!(el.matrix(), Transform2D::identity());
    }

    #[test]
    fn test_animation_bookkeeping() {
        let el = element();
        el.notify_animation_start();
        el.notify_animation_start();
        assert!(el.is_animating());
        el.notify_animation_end();
        el.notify_animation_end();
        assert!(!el.is_animating());
        // Unbalanced end is tolerated.
        el.notify_animation_end();
        assert!(!el.is_animating());
    }
}
