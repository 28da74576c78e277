//! Animation tree nodes: the SMIL state machine, time containers and
//! animation leaves.
//!
//! Every node runs the same five-state lifecycle (unresolved, resolved,
//! active, frozen, ended) guarded by a transition table chosen from its
//! restart and fill modes. Containers drive their children through it;
//! leaves run an activity on the shared queue while active.
//!
//! Nodes are `Rc`-shared with interior mutability and the lifecycle steps
//! are free functions over [`NodeRef`], so event callbacks can re-enter the
//! lifecycle without aliasing a long-lived borrow.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use show_model::{
    AccumulateMode, AdditiveMode, CalcMode, Duration, FillMode, NodeId, RestartMode, SequenceKind,
    Timing, Trigger,
};

use crate::activity::{ActivityParams, ActivityRef, FromToByActivity, SetActivity};
use crate::context::ContextRef;
use crate::element::{AnimatedElement, AnimatedProperty};
use crate::events::{make_delay, make_event, EventRef, ListenerHandle, NotifierId};
use crate::properties::{interpolator, operator_set};

// ============================================================================
// Node state and transition tables
// ============================================================================

/// Lifecycle state of an animation node. The values are single bits so
/// transition tables and state masks can be expressed as bit sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeState(u8);

impl NodeState {
    pub const INVALID: NodeState = NodeState(0);
    pub const UNRESOLVED: NodeState = NodeState(1);
    pub const RESOLVED: NodeState = NodeState(2);
    pub const ACTIVE: NodeState = NodeState(4);
    pub const FROZEN: NodeState = NodeState(8);
    pub const ENDED: NodeState = NodeState(16);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn intersects(self, mask: u8) -> bool {
        self.0 & mask != 0
    }

    pub fn name(self) -> &'static str {
        match self {
            NodeState::INVALID => "invalid",
            NodeState::UNRESOLVED => "unresolved",
            NodeState::RESOLVED => "resolved",
            NodeState::ACTIVE => "active",
            NodeState::FROZEN => "frozen",
            NodeState::ENDED => "ended",
            _ => "unknown",
        }
    }
}

type TransitionTable = fn(NodeState) -> u8;

const R: u8 = NodeState::RESOLVED.0;
const A: u8 = NodeState::ACTIVE.0;
const F: u8 = NodeState::FROZEN.0;
const E: u8 = NodeState::ENDED.0;

fn table_never_remove(from: NodeState) -> u8 {
    match from {
        NodeState::UNRESOLVED => R | E,
        NodeState::RESOLVED => A | E,
        NodeState::ACTIVE => E,
        NodeState::ENDED => E,
        _ => 0,
    }
}

fn table_never_freeze(from: NodeState) -> u8 {
    match from {
        NodeState::UNRESOLVED => R | E,
        NodeState::RESOLVED => A | E,
        NodeState::ACTIVE => F | E,
        NodeState::FROZEN => E,
        NodeState::ENDED => E,
        _ => 0,
    }
}

fn table_not_active_remove(from: NodeState) -> u8 {
    match from {
        NodeState::UNRESOLVED => R | E,
        NodeState::RESOLVED => A | E,
        NodeState::ACTIVE => E,
        NodeState::ENDED => R | A | E,
        _ => 0,
    }
}

fn table_not_active_freeze(from: NodeState) -> u8 {
    match from {
        NodeState::UNRESOLVED => R | E,
        NodeState::RESOLVED => A | E,
        NodeState::ACTIVE => F | E,
        NodeState::FROZEN => R | A | E,
        NodeState::ENDED => R | A | E,
        _ => 0,
    }
}

fn table_always_remove(from: NodeState) -> u8 {
    match from {
        NodeState::UNRESOLVED => R | E,
        NodeState::RESOLVED => A | E,
        NodeState::ACTIVE => R | A | E,
        NodeState::ENDED => R | A | E,
        _ => 0,
    }
}

fn table_always_freeze(from: NodeState) -> u8 {
    match from {
        NodeState::UNRESOLVED => R | E,
        NodeState::RESOLVED => A | E,
        NodeState::ACTIVE => R | A | F | E,
        NodeState::FROZEN => R | A | E,
        NodeState::ENDED => R | A | E,
        _ => 0,
    }
}

/// Pick the transition table for a (restart, fill) pair. Unresolved
/// `Default`/`Auto` values fall back to the most restrictive table.
pub fn transition_table(restart: RestartMode, fill: FillMode) -> TransitionTable {
    let restart = match restart {
        RestartMode::Default => {
            log::warn!("transition_table: unresolved restart mode, treating as never");
            RestartMode::Never
        }
        other => other,
    };
    let removes = matches!(fill, FillMode::Remove | FillMode::Default | FillMode::Auto);
    match (restart, removes) {
        (RestartMode::Never, true) => table_never_remove,
        (RestartMode::Never, false) => table_never_freeze,
        (RestartMode::WhenNotActive, true) => table_not_active_remove,
        (RestartMode::WhenNotActive, false) => table_not_active_freeze,
        (RestartMode::Always, true) => table_always_remove,
        (RestartMode::Always, false) => table_always_freeze,
        (RestartMode::Default, _) => unreachable!(),
    }
}

/// Scoped state transition: marks the target state as in progress so a
/// reentrant attempt to enter the same state is rejected, then either
/// commits or rolls back on drop.
struct StateTransition<'a> {
    node: &'a AnimationNode,
    pending: Option<NodeState>,
}

impl<'a> StateTransition<'a> {
    fn new(node: &'a AnimationNode) -> Self {
        Self {
            node,
            pending: None,
        }
    }

    fn enter(&mut self, to: NodeState, force: bool) -> bool {
        if self.pending.is_some() {
            return false;
        }
        if !force && !self.node.is_transition(self.node.state(), to) {
            return false;
        }
        if self.node.in_transition.get() & to.bits() != 0 {
            return false;
        }
        self.node
            .in_transition
            .set(self.node.in_transition.get() | to.bits());
        self.pending = Some(to);
        true
    }

    fn commit(&mut self) {
        if let Some(to) = self.pending.take() {
            self.node.state.set(to);
            self.node
                .in_transition
                .set(self.node.in_transition.get() & !to.bits());
        }
    }
}

impl Drop for StateTransition<'_> {
    fn drop(&mut self) {
        if let Some(to) = self.pending.take() {
            self.node
                .in_transition
                .set(self.node.in_transition.get() & !to.bits());
        }
    }
}

// ============================================================================
// Node data
// ============================================================================

/// Resolved timing attributes of a node, produced by the tree builder.
#[derive(Debug, Clone)]
pub struct NodeParams {
    pub wire_id: Option<String>,
    pub begin: Timing,
    pub end: Option<Timing>,
    /// `None` for containers whose duration derives from their children.
    pub dur: Option<Duration>,
    pub fill: FillMode,
    pub restart: RestartMode,
    pub repeat_count: f64,
    pub accelerate: f64,
    pub decelerate: f64,
    pub auto_reverse: bool,
    pub sequence_kind: SequenceKind,
    pub is_first_auto_effect: bool,
    /// Extra delay added to the begin offset, e.g. a slide transition tail.
    pub start_delay: f64,
}

impl Default for NodeParams {
    fn default() -> Self {
        Self {
            wire_id: None,
            begin: Timing::Offset(0.0),
            end: None,
            dur: None,
            fill: FillMode::Freeze,
            restart: RestartMode::Never,
            repeat_count: 1.0,
            accelerate: 0.0,
            decelerate: 0.0,
            auto_reverse: false,
            sequence_kind: SequenceKind::Default,
            is_first_auto_effect: false,
            start_delay: 0.0,
        }
    }
}

#[derive(Default)]
pub struct ContainerData {
    children: RefCell<Vec<NodeRef>>,
    finished_children: Cell<usize>,
    left_iterations: Cell<f64>,
}

#[derive(Default)]
pub struct SequentialData {
    container: ContainerData,
    is_rewinding: Cell<bool>,
    skip_handle: RefCell<Option<ListenerHandle>>,
    rewind_current_handle: RefCell<Option<ListenerHandle>>,
    rewind_last_handle: RefCell<Option<ListenerHandle>>,
}

pub struct LeafData {
    pub target: Option<Rc<AnimatedElement>>,
    pub property: Option<AnimatedProperty>,
    pub from: Option<show_model::PropertyValue>,
    pub to: Option<show_model::PropertyValue>,
    pub by: Option<show_model::PropertyValue>,
    pub calc_mode: CalcMode,
    pub additive: AdditiveMode,
    pub accumulate: AccumulateMode,
    activity: RefCell<Option<ActivityRef>>,
}

impl LeafData {
    pub fn new(
        target: Option<Rc<AnimatedElement>>,
        property: Option<AnimatedProperty>,
        from: Option<show_model::PropertyValue>,
        to: Option<show_model::PropertyValue>,
        by: Option<show_model::PropertyValue>,
        calc_mode: CalcMode,
        additive: AdditiveMode,
        accumulate: AccumulateMode,
    ) -> Self {
        Self {
            target,
            property,
            from,
            to,
            by,
            calc_mode,
            additive,
            accumulate,
            activity: RefCell::new(None),
        }
    }
}

pub enum NodeBody {
    Parallel(ContainerData),
    Sequential(SequentialData),
    Animate(LeafData),
    Set(LeafData),
}

pub type NodeRef = Rc<AnimationNode>;

/// One node of the runtime animation tree.
pub struct AnimationNode {
    id: NodeId,
    context: ContextRef,
    params: NodeParams,
    state: Cell<NodeState>,
    in_transition: Cell<u8>,
    table: TransitionTable,
    duration_indefinite: bool,
    event_timing_registered: Cell<bool>,
    parent: RefCell<Weak<AnimationNode>>,
    activation_event: RefCell<Option<EventRef>>,
    deactivation_event: RefCell<Option<EventRef>>,
    body: NodeBody,
}

impl AnimationNode {
    pub fn new(context: ContextRef, params: NodeParams, body: NodeBody) -> NodeRef {
        let table = transition_table(params.restart, params.fill);
        // A container's duration counts as indefinite unless it carries a
        // definite dur or an offset end timing.
        let duration_indefinite = params.dur.map_or(true, |d| !d.is_value())
            && !params.end.as_ref().is_some_and(|end| end.is_offset());
        let id = NodeId::new();
        let node = Rc::new(Self {
            id,
            context: Rc::clone(&context),
            params,
            state: Cell::new(NodeState::UNRESOLVED),
            in_transition: Cell::new(0),
            table,
            duration_indefinite,
            event_timing_registered: Cell::new(false),
            parent: RefCell::new(Weak::new()),
            activation_event: RefCell::new(None),
            deactivation_event: RefCell::new(None),
            body,
        });
        if let Some(wire_id) = &node.params.wire_id {
            context.register_node_id(wire_id, id);
        }
        node
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn state(&self) -> NodeState {
        self.state.get()
    }

    pub fn params(&self) -> &NodeParams {
        &self.params
    }

    pub fn wire_id(&self) -> Option<&str> {
        self.params.wire_id.as_deref()
    }

    pub fn context(&self) -> &ContextRef {
        &self.context
    }

    pub fn body(&self) -> &NodeBody {
        &self.body
    }

    pub fn is_container(&self) -> bool {
        matches!(self.body, NodeBody::Parallel(_) | NodeBody::Sequential(_))
    }

    pub fn is_main_sequence_root(&self) -> bool {
        self.params.sequence_kind == SequenceKind::MainSequence
    }

    pub fn is_interactive_sequence_root(&self) -> bool {
        self.params.sequence_kind == SequenceKind::InteractiveSequence
    }

    pub fn is_duration_indefinite(&self) -> bool {
        self.duration_indefinite
    }

    /// Children in document order; empty for leaves.
    pub fn children(&self) -> Vec<NodeRef> {
        match self.container() {
            Some(container) => container.children.borrow().clone(),
            None => Vec::new(),
        }
    }

    pub fn target_element(&self) -> Option<Rc<AnimatedElement>> {
        match &self.body {
            NodeBody::Animate(leaf) | NodeBody::Set(leaf) => leaf.target.clone(),
            _ => None,
        }
    }

    /// Mark the node unusable; every lifecycle call on it becomes a no-op.
    pub fn invalidate(&self) {
        self.state.set(NodeState::INVALID);
    }

    pub fn is_transition(&self, from: NodeState, to: NodeState) -> bool {
        (self.table)(from) & to.bits() != 0
    }

    pub fn in_state_or_transition(&self, mask: u8) -> bool {
        self.state.get().intersects(mask) || self.in_transition.get() & mask != 0
    }

    fn check_valid(&self) -> bool {
        self.state.get() != NodeState::INVALID
    }

    fn container(&self) -> Option<&ContainerData> {
        match &self.body {
            NodeBody::Parallel(container) => Some(container),
            NodeBody::Sequential(sequential) => Some(&sequential.container),
            _ => None,
        }
    }

    fn leaf(&self) -> Option<&LeafData> {
        match &self.body {
            NodeBody::Animate(leaf) | NodeBody::Set(leaf) => Some(leaf),
            _ => None,
        }
    }

    fn dispose_events(&self) {
        // An offset activation sits in the timer queue and must not fire
        // after the node left its interval. Event-based activations stay
        // registered with the multiplexer across init cycles; they are
        // merely uncharged here and re-charged by the next resolve.
        if self.params.begin.is_offset() {
            if let Some(event) = self.activation_event.borrow_mut().take() {
                event.dispose();
            }
        }
        if let Some(event) = self.deactivation_event.borrow_mut().take() {
            event.dispose();
        }
    }
}

/// Attach `child` to a container node. The parent becomes the child's
/// deactivating listener.
pub fn append_child(parent: &NodeRef, child: NodeRef) {
    if !parent.check_valid() {
        return;
    }
    match parent.container() {
        Some(container) => {
            *child.parent.borrow_mut() = Rc::downgrade(parent);
            container.children.borrow_mut().push(child);
        }
        None => log::warn!(
            "append_child: node {} is not a container",
            parent.id()
        ),
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

/// A zero-arg lifecycle callback bound to a node through a weak reference.
fn node_event(node: &NodeRef, delay: f64, step: fn(&NodeRef)) -> EventRef {
    let weak = Rc::downgrade(node);
    make_delay(
        move || {
            if let Some(node) = weak.upgrade() {
                step(&node);
            }
        },
        delay,
    )
}

/// Reset the node (and its subtree) to the unresolved state.
pub fn init(node: &NodeRef) -> bool {
    if !node.check_valid() {
        return false;
    }
    node.dispose_events();
    node.state.set(NodeState::UNRESOLVED);
    node.in_transition.set(0);

    match &node.body {
        NodeBody::Parallel(container) => init_container(node, container),
        NodeBody::Sequential(sequential) => init_container(node, &sequential.container),
        NodeBody::Animate(leaf) | NodeBody::Set(leaf) => {
            if let Some(activity) = leaf.activity.borrow_mut().take() {
                activity.dispose();
            }
            true
        }
    }
}

fn init_container(node: &NodeRef, container: &ContainerData) -> bool {
    container.left_iterations.set(node.params.repeat_count);
    init_children(container)
}

fn init_children(container: &ContainerData) -> bool {
    container.finished_children.set(0);
    let children = container.children.borrow().clone();
    let mut all = true;
    for child in &children {
        if !init(child) {
            all = false;
        }
    }
    all
}

/// Move the node to the resolved state and arm its activation event
/// according to its begin timing.
pub fn resolve(node: &NodeRef) -> bool {
    if !node.check_valid() {
        return false;
    }
    if node.state() == NodeState::RESOLVED {
        log::debug!("resolve: node {} is already resolved", node.id());
    }

    let mut transition = StateTransition::new(node);
    if transition.enter(NodeState::RESOLVED, false)
        && node.is_transition(NodeState::RESOLVED, NodeState::ACTIVE)
        && resolve_st(node)
    {
        transition.commit();

        let event = {
            let mut slot = node.activation_event.borrow_mut();
            let rearmed = slot.as_ref().and_then(|event| {
                event.charge();
                event.is_charged().then(|| Rc::clone(event))
            });
            match rearmed {
                Some(event) => event,
                None => {
                    let delay = node.params.begin.offset() + node.params.start_delay;
                    let event = node_event(node, delay, activate_step);
                    *slot = Some(Rc::clone(&event));
                    event
                }
            }
        };
        register_begin_event(node, &event);
        return true;
    }
    false
}

fn activate_step(node: &NodeRef) {
    activate(node);
}

fn deactivate_step(node: &NodeRef) {
    deactivate(node);
}

fn resolve_st(node: &NodeRef) -> bool {
    match &node.body {
        NodeBody::Animate(leaf) => {
            *leaf.activity.borrow_mut() = build_animate_activity(node, leaf);
            true
        }
        NodeBody::Set(leaf) => {
            *leaf.activity.borrow_mut() = build_set_activity(node, leaf);
            true
        }
        _ => true,
    }
}

/// Queue or register the activation event according to the begin timing.
/// Event-based timings register with the multiplexer only once; the same
/// event is re-charged on later resolves.
fn register_begin_event(node: &NodeRef, event: &EventRef) {
    let context = node.context();
    match &node.params.begin {
        Timing::Offset(_) => {
            context.timer_event_queue.add_event(event);
        }
        Timing::Indefinite => {
            log::debug!("node {}: indefinite begin, waiting for external activation", node.id());
        }
        Timing::Event {
            base_id, trigger, ..
        } => {
            if node.event_timing_registered.replace(true) {
                return;
            }
            let multiplexer = &context.event_multiplexer;
            match (base_id.as_deref(), trigger) {
                (None, Trigger::OnNext) => {
                    context.next_effect_events.borrow_mut().append(Rc::clone(event));
                }
                (Some(base), Trigger::OnClick) => {
                    multiplexer.register_event(
                        Trigger::OnClick,
                        NotifierId::from(base),
                        Rc::clone(event),
                    );
                    let rearm = Rc::clone(event);
                    multiplexer.register_rewinded_effect_handler(
                        NotifierId::from(base),
                        make_event(move || rearm.charge()),
                    );
                }
                (Some(base), trigger @ (Trigger::BeginEvent | Trigger::EndEvent)) => {
                    let notifier = match context.lookup_node_id(base) {
                        Some(id) => NotifierId::Node(id),
                        None => {
                            log::warn!(
                                "node {}: begin references unknown node '{base}'",
                                node.id()
                            );
                            NotifierId::from(base)
                        }
                    };
                    multiplexer.register_event(*trigger, notifier.clone(), Rc::clone(event));
                    let rearm = Rc::clone(event);
                    multiplexer
                        .register_rewinded_effect_handler(notifier, make_event(move || rearm.charge()));
                }
                (base, trigger) => {
                    log::warn!(
                        "node {}: unsupported begin trigger {trigger:?} (base: {base:?})",
                        node.id()
                    );
                }
            }
        }
    }
}

/// Move the node to the active state and start its effect.
pub fn activate(node: &NodeRef) -> bool {
    if !node.check_valid() {
        return false;
    }
    if node.state() == NodeState::ACTIVE {
        log::debug!("activate: node {} is already active", node.id());
    }

    let mut transition = StateTransition::new(node);
    if transition.enter(NodeState::ACTIVE, false) {
        activate_st(node);
        transition.commit();

        if node.params.is_first_auto_effect {
            node.context().notify_first_auto_effect_started();
        }
        node.context()
            .event_multiplexer
            .notify_event(Trigger::BeginEvent, NotifierId::Node(node.id()));
        return true;
    }
    false
}

fn activate_st(node: &NodeRef) {
    match &node.body {
        NodeBody::Parallel(container) => {
            let children = container.children.borrow().clone();
            let resolved = children.iter().filter(|child| resolve(child)).count();
            if resolved != children.len() {
                log::warn!(
                    "parallel container {}: resolving all children failed",
                    node.id()
                );
                return;
            }
            if node.duration_indefinite && children.is_empty() {
                let event = make_deactivation_event(node, 0.0);
                schedule_deactivation_event(node, event);
            } else {
                schedule_deactivation_event(node, None);
            }
        }
        NodeBody::Sequential(sequential) => {
            let container = &sequential.container;
            let children = container.children.borrow().clone();
            while container.finished_children.get() < children.len() {
                let index = container.finished_children.get();
                if resolve_child(node, &children[index]) {
                    break;
                }
                log::warn!(
                    "sequential container {}: resolving child {index} failed",
                    node.id()
                );
                container.finished_children.set(index + 1);
            }
            if node.duration_indefinite
                && (children.is_empty() || container.finished_children.get() >= children.len())
            {
                let event = make_deactivation_event(node, 0.0);
                schedule_deactivation_event(node, event);
            } else {
                schedule_deactivation_event(node, None);
            }
        }
        NodeBody::Animate(leaf) | NodeBody::Set(leaf) => {
            let activity = leaf.activity.borrow().clone();
            match activity {
                Some(activity) => {
                    if let Some(target) = &leaf.target {
                        target.save_state(node.id());
                    }
                    if node.context().is_skipping.get() {
                        // Jump straight to the final state; the end event
                        // still goes through the timer queue.
                        activity.end();
                    } else {
                        node.context().activity_queue.add_activity(activity);
                    }
                }
                None => schedule_deactivation_event(node, None),
            }
        }
    }
}

/// Charge the existing deactivation event or make a fresh one with the
/// given delay.
fn make_deactivation_event(node: &NodeRef, delay: f64) -> Option<EventRef> {
    let mut slot = node.deactivation_event.borrow_mut();
    if let Some(event) = slot.as_ref() {
        event.charge();
        if event.is_charged() {
            return Some(Rc::clone(event));
        }
    }
    let event = node_event(node, delay, deactivate_step);
    *slot = Some(Rc::clone(&event));
    Some(event)
}

fn schedule_deactivation_event(node: &NodeRef, event: Option<EventRef>) {
    let event = event.or_else(|| {
        node.params
            .dur
            .and_then(|dur| dur.value())
            .and_then(|seconds| make_deactivation_event(node, seconds))
    });
    if let Some(event) = event {
        node.context().timer_event_queue.add_event(&event);
    }
}

/// Leave the active interval: freeze when the transition table allows it,
/// end otherwise.
pub fn deactivate(node: &NodeRef) {
    if node.in_state_or_transition(NodeState::ENDED.bits() | NodeState::FROZEN.bits())
        || !node.check_valid()
    {
        return;
    }

    if node.is_transition(node.state(), NodeState::FROZEN) {
        let mut transition = StateTransition::new(node);
        if transition.enter(NodeState::FROZEN, true) {
            deactivate_st(node, NodeState::FROZEN);
            transition.commit();

            notify_end_listeners(node);
            if node.params.is_first_auto_effect {
                node.context().notify_first_auto_effect_ended();
            }
            node.dispose_events();
        }
    } else {
        end(node);
    }
}

/// Force the node to the ended state.
pub fn end(node: &NodeRef) {
    let was_frozen = node.in_state_or_transition(NodeState::FROZEN.bits());
    if node.in_state_or_transition(NodeState::ENDED.bits()) || !node.check_valid() {
        return;
    }
    if !node.is_transition(node.state(), NodeState::ENDED) {
        log::debug!(
            "end: node {} cannot reach ended from {}",
            node.id(),
            node.state().name()
        );
    }

    let mut transition = StateTransition::new(node);
    if transition.enter(NodeState::ENDED, true) {
        deactivate_st(node, NodeState::ENDED);
        transition.commit();

        // A frozen node already notified its listeners on freeze.
        if !was_frozen {
            notify_end_listeners(node);
        }
        if node.params.is_first_auto_effect {
            node.context().notify_first_auto_effect_ended();
        }
        node.dispose_events();
    }
}

fn deactivate_st(node: &NodeRef, dest: NodeState) {
    match &node.body {
        NodeBody::Parallel(container) => deactivate_container(node, container, dest),
        NodeBody::Sequential(sequential) => {
            deactivate_container(node, &sequential.container, dest)
        }
        NodeBody::Animate(leaf) | NodeBody::Set(leaf) => {
            if dest == NodeState::FROZEN {
                if let Some(activity) = leaf.activity.borrow().clone() {
                    activity.end();
                }
            }
            if dest == NodeState::ENDED {
                if let Some(activity) = leaf.activity.borrow_mut().take() {
                    activity.dispose();
                }
                if node.params.fill == FillMode::Remove && leaf.target.is_some() {
                    remove_effect(node);
                }
            }
        }
    }
}

fn deactivate_container(node: &NodeRef, container: &ContainerData, dest: NodeState) {
    container.left_iterations.set(0.0);
    let children = container.children.borrow().clone();
    if dest == NodeState::FROZEN {
        for child in &children {
            if !child.state().intersects(F | E) {
                deactivate(child);
            }
        }
    } else {
        for child in &children {
            if !child.state().intersects(E) {
                end(child);
            }
        }
        if node.params.fill == FillMode::Remove {
            remove_effect(node);
        }
    }
}

/// Undo the node's visible effect: containers recurse over settled children
/// in reverse order, leaves restore the element state saved on activation.
pub fn remove_effect(node: &NodeRef) {
    match &node.body {
        NodeBody::Parallel(_) | NodeBody::Sequential(_) => {
            let children = node.children();
            for child in children.iter().rev() {
                if !child.state().intersects(F | E) {
                    log::debug!(
                        "remove_effect: child {} is neither frozen nor ended ({})",
                        child.id(),
                        child.state().name()
                    );
                    continue;
                }
                remove_effect(child);
            }
        }
        NodeBody::Animate(leaf) | NodeBody::Set(leaf) => {
            if let Some(target) = &leaf.target {
                target.restore_state(node.id());
            }
        }
    }
}

/// Whether this subtree contains any animation leaf.
pub fn has_pending_animation(node: &NodeRef) -> bool {
    match &node.body {
        NodeBody::Animate(_) | NodeBody::Set(_) => true,
        _ => node.children().iter().any(has_pending_animation),
    }
}

/// Drop events, listener slots and activities for the whole subtree.
pub fn dispose(node: &NodeRef) {
    if let Some(event) = node.activation_event.borrow_mut().take() {
        event.dispose();
    }
    node.dispose_events();
    match &node.body {
        NodeBody::Sequential(sequential) => {
            *sequential.skip_handle.borrow_mut() = None;
            *sequential.rewind_current_handle.borrow_mut() = None;
            *sequential.rewind_last_handle.borrow_mut() = None;
            for child in node.children() {
                dispose(&child);
            }
        }
        NodeBody::Parallel(_) => {
            for child in node.children() {
                dispose(&child);
            }
        }
        NodeBody::Animate(leaf) | NodeBody::Set(leaf) => {
            if let Some(activity) = leaf.activity.borrow_mut().take() {
                activity.dispose();
            }
        }
    }
}

fn notify_end_listeners(node: &NodeRef) {
    if let Some(parent) = node.parent.borrow().upgrade() {
        notify_deactivating(&parent, node);
    }
    let multiplexer = &node.context().event_multiplexer;
    multiplexer.notify_event(Trigger::EndEvent, NotifierId::Node(node.id()));

    let parent_is_main_sequence = node
        .parent
        .borrow()
        .upgrade()
        .is_some_and(|parent| parent.is_main_sequence_root());
    if parent_is_main_sequence {
        multiplexer.notify_next_effect_end_event();
    }
    if node.is_main_sequence_root() {
        multiplexer.notify_animations_end_event();
    }
}

// ============================================================================
// Container child management
// ============================================================================

fn is_child(container: &ContainerData, child: &NodeRef) -> bool {
    container
        .children
        .borrow()
        .iter()
        .any(|candidate| candidate.id() == child.id())
}

fn notify_deactivating(parent: &NodeRef, child: &NodeRef) {
    match &parent.body {
        NodeBody::Parallel(container) => {
            notify_deactivated_child(parent, container, child);
        }
        NodeBody::Sequential(sequential) => {
            // A rewind tears children down itself; the counter must not move.
            if sequential.is_rewinding.get() {
                return;
            }
            if notify_deactivated_child(parent, &sequential.container, child) {
                return;
            }
            let next = {
                let children = sequential.container.children.borrow();
                children
                    .get(sequential.container.finished_children.get())
                    .cloned()
            };
            match next {
                Some(next) => {
                    debug_assert_eq!(next.state(), NodeState::UNRESOLVED);
                    if !resolve_child(parent, &next) {
                        // A stalled chain of events is worse than cutting the
                        // sequence short.
                        deactivate(parent);
                    }
                }
                None => log::warn!(
                    "sequential container {}: no next child to resolve",
                    parent.id()
                ),
            }
        }
        _ => debug_assert!(false, "leaf registered as deactivating listener"),
    }
}

/// Count a settled child; returns whether the container finished this
/// iteration. An indefinite-duration container then either repeats or
/// deactivates.
fn notify_deactivated_child(parent: &NodeRef, container: &ContainerData, child: &NodeRef) -> bool {
    let child_state = child.state();
    if !child_state.intersects(F | E) {
        log::warn!(
            "container {}: deactivated child {} is neither frozen nor ended ({})",
            parent.id(),
            child.id(),
            child_state.name()
        );
    }
    if !is_child(container, child) {
        log::warn!("container {}: unknown child notifier {}", parent.id(), child.id());
        return false;
    }
    let count = container.children.borrow().len();
    if container.finished_children.get() >= count {
        log::warn!("container {}: finished-children overflow", parent.id());
        return true;
    }
    container
        .finished_children
        .set(container.finished_children.get() + 1);
    let mut finished = container.finished_children.get() >= count;

    if finished && parent.is_duration_indefinite() {
        if container.left_iterations.get() >= 1.0 {
            container
                .left_iterations
                .set(container.left_iterations.get() - 1.0);
        }
        if container.left_iterations.get() >= 1.0 {
            finished = false;
            let event = node_event(parent, 0.0, repeat_step);
            parent.context().timer_event_queue.add_event(&event);
        } else {
            deactivate(parent);
        }
    }
    finished
}

fn repeat_step(node: &NodeRef) {
    repeat(node);
}

/// Start the next iteration of an indefinite-duration container.
pub fn repeat(node: &NodeRef) -> bool {
    let Some(container) = node.container() else {
        return false;
    };
    for child in node.children() {
        if !child.state().intersects(E) {
            end(&child);
        }
    }
    remove_effect(node);
    let initialized = init_children(container);
    if initialized {
        activate_st(node);
    } else {
        log::warn!("repeat: container {} failed to re-init children", node.id());
    }
    initialized
}

// ============================================================================
// Sequential skip and rewind
// ============================================================================

/// Resolve the next child of a sequence. For main and interactive sequence
/// roots this also (re)registers the skip/rewind events for that child,
/// disposing the previous child's registrations.
pub fn resolve_child(parent: &NodeRef, child: &NodeRef) -> bool {
    let resolved = resolve(child);

    if resolved && (parent.is_main_sequence_root() || parent.is_interactive_sequence_root()) {
        let NodeBody::Sequential(sequential) = &parent.body else {
            return resolved;
        };
        let skip = sequence_event(parent, child, skip_effect);
        let rewind_current = sequence_event(parent, child, rewind_current_effect);
        let rewind_last = sequence_event(parent, child, rewind_last_effect);

        let multiplexer = &parent.context().event_multiplexer;
        if parent.is_main_sequence_root() {
            *sequential.skip_handle.borrow_mut() =
                Some(multiplexer.register_skip_effect_event(skip));
            *sequential.rewind_current_handle.borrow_mut() =
                Some(multiplexer.register_rewind_current_effect_event(rewind_current));
            *sequential.rewind_last_handle.borrow_mut() =
                Some(multiplexer.register_rewind_last_effect_event(rewind_last));
        } else {
            *sequential.skip_handle.borrow_mut() =
                Some(multiplexer.register_skip_interactive_effect_event(child.id(), skip));
            *sequential.rewind_current_handle.borrow_mut() = Some(
                multiplexer
                    .register_rewind_running_interactive_effect_event(child.id(), rewind_current),
            );
            *sequential.rewind_last_handle.borrow_mut() = Some(
                multiplexer.register_rewind_ended_interactive_effect_event(child.id(), rewind_last),
            );
        }
    }
    resolved
}

fn sequence_event(parent: &NodeRef, child: &NodeRef, step: fn(&NodeRef, &NodeRef)) -> EventRef {
    let parent = Rc::downgrade(parent);
    let child = Rc::downgrade(child);
    make_event(move || {
        if let (Some(parent), Some(child)) = (parent.upgrade(), child.upgrade()) {
            step(&parent, &child);
        }
    })
}

/// Jump the currently playing effect to its final state.
///
/// All running activities are force-completed, then every queued event fires
/// immediately in queue order so the timeline collapses without reordering.
pub fn skip_effect(parent: &NodeRef, child: &NodeRef) {
    let Some(container) = parent.container() else {
        return;
    };
    if !is_child(container, child) {
        log::warn!("skip_effect: unknown child {}", child.id());
        return;
    }
    let context = parent.context();
    context.activity_queue.end_all();
    context.is_skipping.set(true);
    context.timer_event_queue.force_empty();
    context.is_skipping.set(false);
    let event = node_event(child, 0.0, deactivate_step);
    context.timer_event_queue.add_event(&event);
}

/// Undo the currently playing effect and re-arm it.
pub fn rewind_current_effect(parent: &NodeRef, child: &NodeRef) {
    let NodeBody::Sequential(sequential) = &parent.body else {
        return;
    };
    if !is_child(&sequential.container, child) {
        log::warn!("rewind_current_effect: unknown child {}", child.id());
        return;
    }
    debug_assert!(!sequential.is_rewinding.get());

    sequential.is_rewinding.set(true);
    let context = parent.context();
    context.activity_queue.end_all();
    context.is_skipping.set(true);
    context.timer_event_queue.force_empty();
    context.is_skipping.set(false);
    // Events fired above may have queued fresh activities.
    context.activity_queue.end_all();

    end(child);
    remove_effect(child);
    init(child);
    resolve_child(parent, child);
    notify_rewinded(parent, child);
    sequential.is_rewinding.set(false);
}

/// Undo the last settled effect and make it the pending one again.
pub fn rewind_last_effect(parent: &NodeRef, child: &NodeRef) {
    let NodeBody::Sequential(sequential) = &parent.body else {
        return;
    };
    if !is_child(&sequential.container, child) {
        log::warn!("rewind_last_effect: unknown child {}", child.id());
        return;
    }
    debug_assert!(!sequential.is_rewinding.get());

    sequential.is_rewinding.set(true);
    let context = parent.context();
    context.timer_event_queue.force_empty();
    context.activity_queue.clear();
    // The pending child never started, so ending it changes nothing visible
    // and no effect removal is needed for it.
    end(child);

    let index = sequential.container.finished_children.get();
    if index == 0 {
        log::warn!("rewind_last_effect: container {} has no settled effect", parent.id());
        sequential.is_rewinding.set(false);
        return;
    }
    sequential.container.finished_children.set(index - 1);
    let previous = {
        let children = sequential.container.children.borrow();
        children[index - 1].clone()
    };
    remove_effect(&previous);
    init(&previous);
    // The old pending child is ended now; without a re-init it could never
    // resolve again.
    init(child);
    resolve_child(parent, &previous);
    notify_rewinded(parent, child);
    sequential.is_rewinding.set(false);
}

fn notify_rewinded(parent: &NodeRef, child: &NodeRef) {
    if parent.is_interactive_sequence_root() {
        let multiplexer = &parent.context().event_multiplexer;
        multiplexer.notify_rewinded_effect_event(NotifierId::Node(child.id()));
        if let Some(base) = child.params.begin.base_id() {
            multiplexer.notify_rewinded_effect_event(NotifierId::from(base));
        }
    }
}

// ============================================================================
// Leaf activities
// ============================================================================

fn leaf_activity_params(node: &NodeRef) -> ActivityParams {
    let duration = match node.params.dur.and_then(|dur| dur.value()) {
        Some(seconds) if seconds > 0.0 => seconds,
        _ => {
            log::debug!("node {}: duration is not a positive number", node.id());
            0.001
        }
    };
    ActivityParams {
        duration,
        repeats: node.params.repeat_count,
        accelerate: node.params.accelerate,
        decelerate: node.params.decelerate,
        auto_reverse: node.params.auto_reverse,
        accumulate: AccumulateMode::None,
        additive: AdditiveMode::Replace,
        end_event: Some(node_event(node, 0.0, deactivate_step)),
        timer_event_queue: Rc::clone(&node.context().timer_event_queue),
        timer: Rc::clone(&node.context().timer),
    }
}

fn build_animate_activity(node: &NodeRef, leaf: &LeafData) -> Option<ActivityRef> {
    let target = leaf.target.clone()?;
    let Some(property) = leaf.property else {
        log::debug!("node {}: no animatable attribute", node.id());
        return None;
    };
    if leaf.to.is_none() && leaf.by.is_none() {
        log::debug!("node {}: neither to nor by value set", node.id());
        return None;
    }

    let mut params = leaf_activity_params(node);
    params.accumulate = leaf.accumulate;
    params.additive = leaf.additive;

    let kind = property.kind();
    match interpolator(leaf.calc_mode, kind) {
        Some(interpolate) => Some(Rc::new(FromToByActivity::new(
            target,
            property,
            leaf.from.clone(),
            leaf.to.clone(),
            leaf.by.clone(),
            operator_set(kind),
            interpolate,
            params,
        ))),
        None => {
            // Discrete value classes get the final value applied in one step.
            let to = leaf.to.clone()?;
            Some(Rc::new(SetActivity::new(
                target,
                property,
                to,
                params.timer_event_queue,
                params.end_event,
            )))
        }
    }
}

fn build_set_activity(node: &NodeRef, leaf: &LeafData) -> Option<ActivityRef> {
    let target = leaf.target.clone()?;
    let Some(property) = leaf.property else {
        log::debug!("node {}: no animatable attribute", node.id());
        return None;
    };
    let Some(to) = leaf.to.clone() else {
        log::debug!("node {}: set without a to value", node.id());
        return None;
    };
    let end_event = node_event(node, 0.0, deactivate_step);
    Some(Rc::new(SetActivity::new(
        target,
        property,
        to,
        Rc::clone(&node.context().timer_event_queue),
        Some(end_event),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SlideShowContext;
    use crate::element::Rect;
    use crate::timing::{ElapsedTime, ManualTimeSource};
    use show_model::PropertyValue;

    struct Fixture {
        source: Rc<ManualTimeSource>,
        context: ContextRef,
    }

    fn fixture() -> Fixture {
        let source = Rc::new(ManualTimeSource::new());
        let context = SlideShowContext::new(Rc::new(ElapsedTime::new(source.clone())));
        Fixture { source, context }
    }

    impl Fixture {
        /// One scheduler tick: due events, then activities, then retirement.
        fn pump(&self) {
            self.context.timer_event_queue.process();
            self.context.activity_queue.process();
            self.context.activity_queue.process_dequeued();
        }

        fn pump_for(&self, seconds: f64, step: f64) {
            let mut elapsed = 0.0;
            while elapsed < seconds {
                self.source.advance(step);
                elapsed += step;
                self.pump();
            }
        }

        fn element(&self, id: &str) -> Rc<AnimatedElement> {
            self.context
                .element(id, || AnimatedElement::new(id, Rect::new(0.0, 0.0, 100.0, 50.0)))
        }

        fn set_leaf(&self, target: &Rc<AnimatedElement>, visible: bool, fill: FillMode) -> NodeRef {
            AnimationNode::new(
                self.context.clone(),
                NodeParams {
                    dur: Some(Duration::Value(0.001)),
                    fill,
                    ..NodeParams::default()
                },
                NodeBody::Set(LeafData::new(
                    Some(target.clone()),
                    Some(AnimatedProperty::Visibility),
                    None,
                    Some(PropertyValue::Bool(visible)),
                    None,
                    CalcMode::Discrete,
                    AdditiveMode::Replace,
                    AccumulateMode::None,
                )),
            )
        }

        fn animate_leaf(
            &self,
            target: &Rc<AnimatedElement>,
            property: AnimatedProperty,
            to: f64,
            duration: f64,
        ) -> NodeRef {
            AnimationNode::new(
                self.context.clone(),
                NodeParams {
                    dur: Some(Duration::Value(duration)),
                    ..NodeParams::default()
                },
                NodeBody::Animate(LeafData::new(
                    Some(target.clone()),
                    Some(property),
                    None,
                    Some(PropertyValue::Number(to)),
                    None,
                    CalcMode::Linear,
                    AdditiveMode::Replace,
                    AccumulateMode::None,
                )),
            )
        }

        fn parallel(&self, params: NodeParams) -> NodeRef {
            AnimationNode::new(
                self.context.clone(),
                params,
                NodeBody::Parallel(ContainerData::default()),
            )
        }

        fn sequential(&self, params: NodeParams) -> NodeRef {
            AnimationNode::new(
                self.context.clone(),
                params,
                NodeBody::Sequential(SequentialData::default()),
            )
        }

        fn effect(&self, target: &Rc<AnimatedElement>, begin: Timing) -> NodeRef {
            let effect = self.parallel(NodeParams {
                begin,
                fill: FillMode::Remove,
                ..NodeParams::default()
            });
            append_child(&effect, self.set_leaf(target, false, FillMode::Freeze));
            effect
        }
    }

    #[test]
    fn test_transition_table_selection() {
        let table = transition_table(RestartMode::Never, FillMode::Remove);
        assert_eq!(table(NodeState::ACTIVE), E);
        let table = transition_table(RestartMode::Never, FillMode::Freeze);
        assert_eq!(table(NodeState::ACTIVE), F | E);
        let table = transition_table(RestartMode::Always, FillMode::Freeze);
        assert_eq!(table(NodeState::ACTIVE), R | A | F | E);
        // Unresolved fill behaves like remove.
        let table = transition_table(RestartMode::WhenNotActive, FillMode::Auto);
        assert_eq!(table(NodeState::ENDED), R | A | E);
    }

    #[test]
    fn test_leaf_lifecycle_freeze() {
        let fx = fixture();
        let shape = fx.element("shape1");
        let leaf = fx.set_leaf(&shape, false, FillMode::Freeze);

        assert!(init(&leaf));
        assert!(resolve(&leaf));
        assert_eq!(leaf.state(), NodeState::RESOLVED);

        // Offset-0 begin: activation sits in the timer queue.
        fx.pump();
        assert_eq!(leaf.state(), NodeState::ACTIVE);
        fx.pump();
        // The set applied and queued its deactivation.
        assert!(!shape.is_visible());
        fx.pump();
        assert_eq!(leaf.state(), NodeState::FROZEN);
    }

    #[test]
    fn test_restart_never_rejects_second_resolve() {
        let fx = fixture();
        let shape = fx.element("shape1");
        let leaf = fx.set_leaf(&shape, false, FillMode::Freeze);
        init(&leaf);
        resolve(&leaf);
        fx.pump();
        fx.pump();
        fx.pump();
        assert_eq!(leaf.state(), NodeState::FROZEN);
        // Never-restart: a frozen node only transitions to ended.
        assert!(!resolve(&leaf));
        end(&leaf);
        assert_eq!(leaf.state(), NodeState::ENDED);
    }

    #[test]
    fn test_parallel_container_settles_after_children() {
        let fx = fixture();
        let shape = fx.element("shape1");
        let root = fx.parallel(NodeParams::default());
        append_child(&root, fx.set_leaf(&shape, false, FillMode::Freeze));
        append_child(&root, fx.set_leaf(&shape, true, FillMode::Freeze));

        init(&root);
        assert!(activate(&root));
        // Children resolved with offset-0 begins; run the tick loop.
        fx.pump_for(0.1, 0.01);

        assert!(root.state().intersects(F | E));
        for child in root.children() {
            assert!(child.state().intersects(F | E));
        }
        // The second set wins.
        assert!(shape.is_visible());
    }

    #[test]
    fn test_animate_leaf_runs_activity_and_freezes() {
        let fx = fixture();
        let shape = fx.element("shape1");
        let leaf = fx.animate_leaf(&shape, AnimatedProperty::Opacity, 0.0, 1.0);
        init(&leaf);
        resolve(&leaf);
        fx.pump();
        assert_eq!(leaf.state(), NodeState::ACTIVE);

        fx.pump_for(0.5, 0.1);
        assert!(shape.opacity() < 1.0);
        fx.pump_for(0.7, 0.1);
        assert_eq!(shape.opacity(), 0.0);
        assert_eq!(leaf.state(), NodeState::FROZEN);
    }

    #[test]
    fn test_fill_remove_restores_saved_state() {
        let fx = fixture();
        let shape = fx.element("shape1");
        let effect = fx.effect(&shape, Timing::Offset(0.0));

        init(&effect);
        activate(&effect);
        fx.pump_for(0.1, 0.01);
        assert!(effect.state().intersects(E));
        // fill=remove on the container unwound the child's visibility set.
        assert!(shape.is_visible());
    }

    #[test]
    fn test_main_sequence_resolves_children_one_at_a_time() {
        let fx = fixture();
        let shape = fx.element("shape1");
        let root = fx.sequential(NodeParams {
            sequence_kind: SequenceKind::MainSequence,
            ..NodeParams::default()
        });
        let first = fx.effect(&shape, Timing::parse("onNext").unwrap());
        let second = fx.effect(&shape, Timing::parse("onNext").unwrap());
        append_child(&root, first.clone());
        append_child(&root, second.clone());

        init(&root);
        activate(&root);
        assert_eq!(first.state(), NodeState::RESOLVED);
        assert_eq!(second.state(), NodeState::UNRESOLVED);
        assert_eq!(fx.context.next_effect_events.borrow().size(), 1);

        // Fire the first trigger and let the effect play out.
        fx.context
            .next_effect_events
            .borrow()
            .at(0)
            .unwrap()
            .fire();
        fx.pump_for(0.1, 0.01);
        assert!(first.state().intersects(F | E));
        // The sequence resolved the follow-up effect on its own.
        assert_eq!(second.state(), NodeState::RESOLVED);
        assert_eq!(fx.context.next_effect_events.borrow().size(), 2);
    }

    #[test]
    fn test_skip_effect_settles_playing_effect_immediately() {
        let fx = fixture();
        let shape = fx.element("shape1");
        let root = fx.sequential(NodeParams {
            sequence_kind: SequenceKind::MainSequence,
            ..NodeParams::default()
        });
        let effect = fx.parallel(NodeParams {
            begin: Timing::parse("onNext").unwrap(),
            fill: FillMode::Freeze,
            ..NodeParams::default()
        });
        append_child(
            &effect,
            fx.animate_leaf(&shape, AnimatedProperty::Opacity, 0.2, 5.0),
        );
        append_child(&root, effect.clone());

        init(&root);
        activate(&root);
        fx.context
            .next_effect_events
            .borrow()
            .at(0)
            .unwrap()
            .fire();
        fx.pump();
        assert_eq!(effect.state(), NodeState::ACTIVE);

        // Skip with no wall-clock advance: the animation jumps to its end.
        fx.context.event_multiplexer.notify_skip_effect_event();
        fx.pump();
        assert_eq!(shape.opacity(), 0.2);
        assert!(effect.state().intersects(F | E));
    }

    #[test]
    fn test_rewind_current_effect_restores_and_rearms() {
        let fx = fixture();
        let shape = fx.element("shape1");
        let root = fx.sequential(NodeParams {
            sequence_kind: SequenceKind::MainSequence,
            ..NodeParams::default()
        });
        let effect = fx.effect(&shape, Timing::parse("onNext").unwrap());
        append_child(&root, effect.clone());

        init(&root);
        activate(&root);
        fx.context
            .next_effect_events
            .borrow()
            .at(0)
            .unwrap()
            .fire();
        fx.pump();
        assert_eq!(effect.state(), NodeState::ACTIVE);

        fx.context.event_multiplexer.notify_rewind_current_effect_event();
        // Shape state rolled back and the effect is pending again.
        assert!(shape.is_visible());
        assert_eq!(effect.state(), NodeState::RESOLVED);
        // The sequence did not advance.
        let NodeBody::Sequential(sequential) = root.body() else {
            unreachable!()
        };
        assert_eq!(sequential.container.finished_children.get(), 0);
    }

    #[test]
    fn test_rewind_last_effect_steps_back() {
        let fx = fixture();
        let shape = fx.element("shape1");
        let root = fx.sequential(NodeParams {
            sequence_kind: SequenceKind::MainSequence,
            ..NodeParams::default()
        });
        let first = fx.effect(&shape, Timing::parse("onNext").unwrap());
        let second = fx.effect(&shape, Timing::parse("onNext").unwrap());
        append_child(&root, first.clone());
        append_child(&root, second.clone());

        init(&root);
        activate(&root);
        fx.context
            .next_effect_events
            .borrow()
            .at(0)
            .unwrap()
            .fire();
        fx.pump_for(0.1, 0.01);
        assert!(first.state().intersects(F | E));
        assert_eq!(second.state(), NodeState::RESOLVED);

        fx.context.event_multiplexer.notify_rewind_last_effect_event();
        // The first effect is pending again, its visible change undone.
        assert_eq!(first.state(), NodeState::RESOLVED);
        assert_eq!(second.state(), NodeState::UNRESOLVED);
        assert!(shape.is_visible());
    }

    #[test]
    fn test_indefinite_container_repeats() {
        let fx = fixture();
        let shape = fx.element("shape1");
        let root = fx.parallel(NodeParams {
            repeat_count: 2.0,
            fill: FillMode::Freeze,
            ..NodeParams::default()
        });
        let starts = Rc::new(Cell::new(0u32));
        append_child(&root, fx.set_leaf(&shape, false, FillMode::Freeze));
        // Count activations through the begin notification.
        let child_id = root.children()[0].id();
        let counter = starts.clone();
        // Self-recharging listener so it survives the second iteration.
        let slot: Rc<RefCell<Option<EventRef>>> = Rc::new(RefCell::new(None));
        let slot_in_event = slot.clone();
        let event = make_event(move || {
            counter.set(counter.get() + 1);
            if let Some(event) = slot_in_event.borrow().as_ref() {
                event.charge();
            }
        });
        *slot.borrow_mut() = Some(event.clone());
        fx.context
            .event_multiplexer
            .register_event(Trigger::BeginEvent, NotifierId::Node(child_id), event);

        init(&root);
        activate(&root);
        fx.pump_for(0.2, 0.01);
        assert!(root.state().intersects(F | E));
        assert_eq!(starts.get(), 2);
    }

    #[test]
    fn test_begin_event_timing_registers_once() {
        let fx = fixture();
        let shape = fx.element("shape1");
        let trigger_leaf = AnimationNode::new(
            fx.context.clone(),
            NodeParams {
                wire_id: Some("n1".into()),
                dur: Some(Duration::Value(0.001)),
                ..NodeParams::default()
            },
            NodeBody::Set(LeafData::new(
                Some(shape.clone()),
                Some(AnimatedProperty::Visibility),
                None,
                Some(PropertyValue::Bool(true)),
                None,
                CalcMode::Discrete,
                AdditiveMode::Replace,
                AccumulateMode::None,
            )),
        );
        let follower = fx.set_leaf(&shape, false, FillMode::Freeze);
        let follower = AnimationNode::new(
            fx.context.clone(),
            NodeParams {
                begin: Timing::parse("n1.endEvent").unwrap(),
                ..follower.params().clone()
            },
            NodeBody::Set(LeafData::new(
                Some(shape.clone()),
                Some(AnimatedProperty::Visibility),
                None,
                Some(PropertyValue::Bool(false)),
                None,
                CalcMode::Discrete,
                AdditiveMode::Replace,
                AccumulateMode::None,
            )),
        );

        init(&follower);
        resolve(&follower);
        init(&trigger_leaf);
        resolve(&trigger_leaf);
        // Run the trigger leaf to its end; its end event activates the follower.
        fx.pump_for(0.1, 0.01);
        assert!(follower.state().intersects(A | F | E));
        assert!(!shape.is_visible());
    }

    #[test]
    fn test_click_trigger_activates_interactive_root() {
        let fx = fixture();
        let shape = fx.element("shape1");
        let root = fx.sequential(NodeParams {
            begin: Timing::parse("shape1.click").unwrap(),
            sequence_kind: SequenceKind::InteractiveSequence,
            ..NodeParams::default()
        });
        append_child(&root, fx.effect(&shape, Timing::Offset(0.0)));

        init(&root);
        resolve(&root);
        assert_eq!(root.state(), NodeState::RESOLVED);

        fx.context
            .event_multiplexer
            .notify_event(Trigger::OnClick, NotifierId::from("shape1"));
        fx.pump_for(0.1, 0.01);
        assert!(root.state().intersects(A | F | E));
    }

    #[test]
    fn test_has_pending_animation() {
        let fx = fixture();
        let shape = fx.element("shape1");
        let empty = fx.parallel(NodeParams::default());
        assert!(!has_pending_animation(&empty));
        let root = fx.parallel(NodeParams::default());
        append_child(&root, fx.set_leaf(&shape, true, FillMode::Freeze));
        assert!(has_pending_animation(&root));
    }
}
