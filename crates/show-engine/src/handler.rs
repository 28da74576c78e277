//! Top-level slideshow orchestration.
//!
//! `SlideShowHandler` owns the shared context, drives the cooperative
//! `update()` tick, and exposes the effect-navigation surface the presenter
//! UI calls: next effect, the skip family, the rewind family, and slide
//! display with optional transitions.
//!
//! The handler is `Rc`-shared so multiplexer callbacks (next-effect-end,
//! animations-end, interactive sequence start/end) can reach back into it
//! through weak references; everything stays on one thread.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};
use show_model::{NodeId, NodeInfo, Trigger};

use crate::activity::TransitionActivity;
use crate::builder::build_tree;
use crate::context::{ContextRef, SlideShowContext};
use crate::element::{AnimatedElement, Rect};
use crate::events::{make_delay, make_event, EventRef, NotifierId};
use crate::nodes::{self, NodeRef};
use crate::timing::{ElapsedTime, FrameSynchronization, TimeSource};

/// Shortest re-arm delay of the scheduler tick, targeting ~60 updates per
/// second while effects play.
pub const MINIMUM_TIMEOUT: f64 = 1.0 / 60.0;
/// Longest the scheduler sleeps between ticks even when the next event is
/// further out.
pub const MAXIMUM_TIMEOUT: f64 = 4.0;
pub const PREFERRED_FRAMES_PER_SECONDS: f64 = 50.0;
pub const PREFERRED_FRAME_RATE: f64 = 1.0 / PREFERRED_FRAMES_PER_SECONDS;

// ============================================================================
// Slide model
// ============================================================================

/// Everything the handler needs to know about one slide.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SlideDescriptor {
    /// Root of the slide's animation timing tree, if it has one.
    pub timing: Option<NodeInfo>,
    /// Entry transition length in seconds; `None` shows the slide at once.
    pub transition_duration: Option<f64>,
    /// Seconds to wait after the last animation before advancing on its own.
    pub auto_advance_after: Option<f64>,
    /// Animated shapes with their rendered bounding boxes.
    pub elements: Vec<(String, Rect)>,
}

// ============================================================================
// Effect bookkeeping
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EffectState {
    NotStarted,
    Playing,
    Ended,
}

/// One entry of the started-effect history. Main-sequence effects carry no
/// node id; interactive ones are keyed by their sequence root.
struct Effect {
    node_id: Option<NodeId>,
    state: Cell<EffectState>,
}

impl Effect {
    fn new(node_id: Option<NodeId>) -> Rc<Self> {
        Rc::new(Self {
            node_id,
            state: Cell::new(EffectState::NotStarted),
        })
    }

    fn start(&self) {
        self.state.set(EffectState::Playing);
    }

    fn end(&self) {
        self.state.set(EffectState::Ended);
    }

    fn is_playing(&self) -> bool {
        self.state.get() == EffectState::Playing
    }
}

/// Pending automatic slide advance.
///
/// A rewind does not simply remove the timeout: it leaves a sentinel behind
/// so a completion callback that races the rewind can see what happened and
/// back off instead of advancing a slide the presenter just rewound.
enum AutoAdvance {
    None,
    Pending(EventRef),
    Rewound,
}

// ============================================================================
// Interactive sequences
// ============================================================================

/// Tracks one click-triggered animation sequence on the current slide.
///
/// The start/end events are registered on the sequence root's begin and end
/// notifications and re-charge themselves after firing, so a sequence that
/// restarts keeps reporting into the handler's effect history.
pub struct InteractiveAnimationSequence {
    node_id: NodeId,
    start_event: EventRef,
    end_event: EventRef,
}

impl InteractiveAnimationSequence {
    fn new(node_id: NodeId, handler: Weak<SlideShowHandler>) -> Rc<Self> {
        let start_handler = handler.clone();
        let start_event = recharging_event(move || {
            if let Some(handler) = start_handler.upgrade() {
                handler.notify_interactive_sequence_start(node_id);
            }
        });
        let end_event = recharging_event(move || {
            if let Some(handler) = handler.upgrade() {
                handler.notify_interactive_sequence_end(node_id);
            }
        });
        Rc::new(Self {
            node_id,
            start_event,
            end_event,
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn start_event(&self) -> EventRef {
        Rc::clone(&self.start_event)
    }

    pub fn end_event(&self) -> EventRef {
        Rc::clone(&self.end_event)
    }

    pub fn dispose(&self) {
        self.start_event.dispose();
        self.end_event.dispose();
    }
}

impl Drop for InteractiveAnimationSequence {
    fn drop(&mut self) {
        // The self-recharging events hold reference cycles until disposed.
        self.dispose();
    }
}

/// An event that re-arms itself after every fire.
fn recharging_event(callback: impl Fn() + 'static) -> EventRef {
    let slot: Rc<RefCell<Option<EventRef>>> = Rc::new(RefCell::new(None));
    let inner = Rc::clone(&slot);
    let event = make_event(move || {
        callback();
        if let Some(event) = inner.borrow().as_ref() {
            event.charge();
        }
    });
    *slot.borrow_mut() = Some(Rc::clone(&event));
    event
}

// ============================================================================
// SlideShowHandler
// ============================================================================

pub struct SlideShowHandler {
    weak: Weak<SlideShowHandler>,
    context: ContextRef,
    frame_sync: FrameSynchronization,
    slides: RefCell<Vec<SlideDescriptor>>,

    current_slide: Cell<Option<usize>>,
    root_node: RefCell<Option<NodeRef>>,

    /// Index of the next main-sequence effect to fire.
    current_effect: Cell<usize>,
    started_effects: RefCell<Vec<Rc<Effect>>>,
    interactive_index: RefCell<HashMap<NodeId, usize>>,
    interactive_sequences: RefCell<Vec<Rc<InteractiveAnimationSequence>>>,
    total_interactive_playing: Cell<usize>,

    is_transition_running: Cell<bool>,
    transition_progress: Cell<f64>,

    auto_advance: RefCell<AutoAdvance>,

    // Reentrancy guards for the skip/rewind families and the tick itself.
    is_skipping: Cell<bool>,
    is_skipping_all: Cell<bool>,
    is_rewinding: Cell<bool>,
    is_updating: Cell<bool>,

    exit_hook: RefCell<Option<Box<dyn Fn()>>>,
}

impl SlideShowHandler {
    pub fn new(slides: Vec<SlideDescriptor>, source: Rc<dyn TimeSource>) -> Rc<Self> {
        let timer = Rc::new(ElapsedTime::new(Rc::clone(&source)));
        let context = SlideShowContext::new(timer);
        let frame_sync = FrameSynchronization::new(source, PREFERRED_FRAME_RATE);
        let handler = Rc::new_cyclic(|weak: &Weak<SlideShowHandler>| Self {
            weak: weak.clone(),
            context,
            frame_sync,
            slides: RefCell::new(slides),
            current_slide: Cell::new(None),
            root_node: RefCell::new(None),
            current_effect: Cell::new(0),
            started_effects: RefCell::new(Vec::new()),
            interactive_index: RefCell::new(HashMap::new()),
            interactive_sequences: RefCell::new(Vec::new()),
            total_interactive_playing: Cell::new(0),
            is_transition_running: Cell::new(false),
            transition_progress: Cell::new(0.0),
            auto_advance: RefCell::new(AutoAdvance::None),
            is_skipping: Cell::new(false),
            is_skipping_all: Cell::new(false),
            is_rewinding: Cell::new(false),
            is_updating: Cell::new(false),
            exit_hook: RefCell::new(None),
        });
        handler.install_context_hooks();
        handler
    }

    pub fn context(&self) -> &ContextRef {
        &self.context
    }

    pub fn current_slide(&self) -> Option<usize> {
        self.current_slide.get()
    }

    pub fn current_effect(&self) -> usize {
        self.current_effect.get()
    }

    pub fn root_node(&self) -> Option<NodeRef> {
        self.root_node.borrow().clone()
    }

    /// Slide-transition completion in [0, 1], polled by the renderer.
    pub fn transition_progress(&self) -> f64 {
        self.transition_progress.get()
    }

    /// Called when `display_slide` runs past the last slide.
    pub fn set_exit_hook(&self, hook: impl Fn() + 'static) {
        *self.exit_hook.borrow_mut() = Some(Box::new(hook));
    }

    pub fn has_any_effect_started(&self) -> bool {
        !self.started_effects.borrow().is_empty()
    }

    pub fn is_any_effect_playing(&self) -> bool {
        self.started_effects
            .borrow()
            .iter()
            .any(|effect| effect.is_playing())
    }

    pub fn is_main_effect_playing(&self) -> bool {
        self.started_effects
            .borrow()
            .iter()
            .any(|effect| effect.node_id.is_none() && effect.is_playing())
    }

    pub fn is_interactive_effect_playing(&self) -> bool {
        self.total_interactive_playing.get() > 0
    }

    fn install_context_hooks(&self) {
        // An effect that starts on its own still belongs in the started
        // history, or rewind could not walk back over it.
        let started = self.weak.clone();
        let ended = self.weak.clone();
        self.context.set_first_auto_effect_hooks(
            move || {
                if let Some(handler) = started.upgrade() {
                    handler.notify_next_effect_start();
                }
            },
            move || {
                if let Some(handler) = ended.upgrade() {
                    log::debug!(
                        "first auto effect of slide {:?} ended",
                        handler.current_slide.get()
                    );
                }
            },
        );
    }

    // ------------------------------------------------------------------
    // Slide display
    // ------------------------------------------------------------------

    /// Wire the per-slide event lists and reset the effect cursor. Normally
    /// `display_slide` does this itself; hosts that resolve events elsewhere
    /// can inject them here.
    pub fn set_slide_events(
        &self,
        next_effects: crate::events::NextEffectEventArray,
        interactive: Vec<Rc<InteractiveAnimationSequence>>,
    ) {
        if next_effects.size() == 0 && interactive.is_empty() {
            log::debug!("set_slide_events: slide has no effect events");
        }
        *self.context.next_effect_events.borrow_mut() = next_effects;
        *self.interactive_sequences.borrow_mut() = interactive;
        self.current_effect.set(0);
    }

    /// Switch to `new_slide`, tearing down the outgoing slide first. Without
    /// a transition (or when skipped, or when stepping backwards) the new
    /// slide's animations start synchronously.
    pub fn display_slide(&self, new_slide: usize, skip_slide_transition: bool) {
        if self.is_transition_running.get() {
            self.skip_transition();
        }
        let old_slide = self.current_slide.get();
        if old_slide.is_some() {
            self.clean_leaving_slide_status();
        }
        if new_slide >= self.slides.borrow().len() {
            self.exit_slide_show();
            return;
        }
        self.current_slide.set(Some(new_slide));
        self.current_effect.set(0);

        let descriptor = self.slides.borrow()[new_slide].clone();
        for (id, bbox) in &descriptor.elements {
            let bbox = *bbox;
            self.context
                .element(id, || AnimatedElement::new(id.as_str(), bbox));
        }
        if let Some(info) = &descriptor.timing {
            if let Some(root) = build_tree(&self.context, info) {
                self.setup_interactive_sequences(&root);
                self.register_animations_end_handler();
                *self.root_node.borrow_mut() = Some(root);
            }
        }
        self.notify_slide_start();

        let moving_forward = old_slide.is_none_or(|old| new_slide > old);
        match descriptor.transition_duration {
            Some(duration) if duration > 0.0 && moving_forward && !skip_slide_transition => {
                self.start_transition(new_slide, duration);
            }
            _ => self.notify_transition_end(new_slide),
        }
    }

    /// End the outgoing slide: force fill-mode resolution on its tree, then
    /// drop every per-slide registration.
    pub fn clean_leaving_slide_status(&self) {
        if let Some(root) = self.root_node.borrow_mut().take() {
            nodes::end(&root);
            nodes::dispose(&root);
        }
        self.cancel_auto_advance();
        self.is_transition_running.set(false);
        self.transition_progress.set(0.0);
        self.started_effects.borrow_mut().clear();
        self.interactive_index.borrow_mut().clear();
        self.interactive_sequences.borrow_mut().clear();
        self.total_interactive_playing.set(0);
        self.current_effect.set(0);
        self.context.dispose();
        self.install_context_hooks();
    }

    pub fn dispose(&self) {
        self.clean_leaving_slide_status();
        self.context.dispose();
        self.current_slide.set(None);
        *self.exit_hook.borrow_mut() = None;
    }

    fn exit_slide_show(&self) {
        log::info!("slide show finished");
        self.current_slide.set(None);
        if let Some(hook) = self.exit_hook.borrow().as_ref() {
            hook();
        }
    }

    fn notify_slide_start(&self) {
        for element in self.context.elements() {
            element.notify_slide_start();
        }
    }

    fn setup_interactive_sequences(&self, root: &NodeRef) {
        let mut ids = Vec::new();
        collect_interactive_roots(root, &mut ids);
        let multiplexer = &self.context.event_multiplexer;
        let mut sequences = Vec::with_capacity(ids.len());
        for id in ids {
            let sequence = InteractiveAnimationSequence::new(id, self.weak.clone());
            multiplexer.register_event(
                Trigger::BeginEvent,
                NotifierId::Node(id),
                sequence.start_event(),
            );
            multiplexer.register_event(
                Trigger::EndEvent,
                NotifierId::Node(id),
                sequence.end_event(),
            );
            sequences.push(sequence);
        }
        *self.interactive_sequences.borrow_mut() = sequences;
    }

    fn register_animations_end_handler(&self) {
        let weak = self.weak.clone();
        self.context
            .event_multiplexer
            .register_animations_end_handler(make_event(move || {
                if let Some(handler) = weak.upgrade() {
                    handler.notify_animations_end();
                }
            }));
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    fn start_transition(&self, slide: usize, duration: f64) {
        self.is_transition_running.set(true);
        self.transition_progress.set(0.0);
        let weak = self.weak.clone();
        let end_event = make_event(move || {
            if let Some(handler) = weak.upgrade() {
                handler.notify_transition_end(slide);
            }
        });
        let weak = self.weak.clone();
        let activity = Rc::new(TransitionActivity::new(
            duration,
            move |progress| {
                if let Some(handler) = weak.upgrade() {
                    handler.transition_progress.set(progress);
                }
            },
            Rc::clone(&self.context.timer),
            Rc::clone(&self.context.timer_event_queue),
            end_event,
        ));
        self.context.activity_queue.add_activity(activity);
        self.update();
    }

    fn notify_transition_end(&self, slide: usize) {
        log::debug!("transition to slide {slide} finished");
        self.is_transition_running.set(false);
        self.transition_progress.set(1.0);

        if self.is_rewinding.get() {
            self.is_rewinding.set(false);
            self.rewind_to_previous_slide();
            return;
        }

        // The root's zero-delay begin event activates the whole tree inside
        // this update call. A slide without animations reports its (empty)
        // animation run as finished at once, so auto-advance still arms.
        let root = self.root_node.borrow().clone();
        match root {
            Some(root) => {
                if nodes::init(&root) {
                    nodes::resolve(&root);
                }
            }
            None => self.notify_animations_end(),
        }
        self.update();
    }

    /// Finish a running transition immediately.
    pub fn skip_transition(&self) {
        if self.is_skipping.get() || self.is_rewinding.get() {
            return;
        }
        self.is_skipping.set(true);
        // Ending the transition activity queues its end event; the second
        // end_all settles anything the fired events started.
        self.context.activity_queue.end_all();
        self.context.timer_event_queue.force_empty();
        self.context.activity_queue.end_all();
        self.update();
        self.is_skipping.set(false);
    }

    /// Abort a running transition and step back to the previous slide.
    pub fn rewind_transition(&self) {
        if self.is_skipping.get() || self.is_rewinding.get() {
            return;
        }
        self.is_rewinding.set(true);
        self.context.activity_queue.end_all();
        self.update();
        self.is_rewinding.set(false);
    }

    // ------------------------------------------------------------------
    // Effect navigation: forward
    // ------------------------------------------------------------------

    /// Advance the presentation one step. Returns `false` only when nothing
    /// is playing and the main sequence is exhausted.
    pub fn next_effect(&self) -> bool {
        if self.is_transition_running.get() {
            self.skip_transition();
            return true;
        }
        if self.is_any_effect_playing() {
            self.skip_all_playing_effects();
            return true;
        }
        self.start_next_effect()
    }

    fn start_next_effect(&self) -> bool {
        let event = {
            let events = self.context.next_effect_events.borrow();
            events.at(self.current_effect.get()).cloned()
        };
        let Some(event) = event else {
            return false;
        };
        self.notify_next_effect_start();
        event.fire();
        self.current_effect.set(self.current_effect.get() + 1);
        self.update();
        true
    }

    /// Settle every playing effect, whichever sequence it belongs to, in
    /// started order.
    pub fn skip_all_playing_effects(&self) -> bool {
        if self.is_skipping.get() || self.is_rewinding.get() {
            return true;
        }
        self.is_skipping.set(true);
        let history = self.started_effects.borrow().clone();
        let multiplexer = &self.context.event_multiplexer;
        for effect in &history {
            if effect.is_playing() {
                match effect.node_id {
                    None => multiplexer.notify_skip_effect_event(),
                    Some(id) => multiplexer.notify_skip_interactive_effect_event(id),
                }
            }
        }
        self.update();
        self.is_skipping.set(false);
        true
    }

    /// Start the next main-sequence effect already settled in its final
    /// state. Requires that no effect is playing.
    pub fn skip_next_effect(&self) -> bool {
        if self.is_skipping.get() || self.is_rewinding.get() {
            return true;
        }
        debug_assert!(!self.is_any_effect_playing());

        let event = {
            let events = self.context.next_effect_events.borrow();
            events.at(self.current_effect.get()).cloned()
        };
        let Some(event) = event else {
            return false;
        };
        self.notify_next_effect_start();
        self.is_skipping.set(true);
        event.fire();
        self.context.event_multiplexer.notify_skip_effect_event();
        self.current_effect.set(self.current_effect.get() + 1);
        self.update();
        self.is_skipping.set(false);
        true
    }

    pub fn skip_playing_or_next_effect(&self) -> bool {
        if self.is_transition_running.get() {
            self.skip_transition();
            return true;
        }
        if self.is_any_effect_playing() {
            self.skip_all_playing_effects()
        } else {
            self.skip_next_effect()
        }
    }

    /// Settle everything: a running transition, then the playing effects,
    /// then every remaining main-sequence effect. Returns `false` when
    /// there was nothing left to skip, `true` otherwise; a reentrant call
    /// returns `true` immediately.
    pub fn skip_all_effects(&self) -> bool {
        if self.is_skipping_all.get() {
            return true;
        }
        self.is_skipping_all.set(true);

        if self.is_transition_running.get() {
            self.skip_transition();
        }
        if self.is_any_effect_playing() {
            self.skip_all_playing_effects();
        } else if self
            .context
            .next_effect_events
            .borrow()
            .at(self.current_effect.get())
            .is_none()
        {
            self.is_skipping_all.set(false);
            return false;
        }
        // Skipping an effect resolves the next one, which appends its
        // trigger event, so the list keeps growing while this loop runs.
        while self.current_effect.get() < self.context.next_effect_events.borrow().size() {
            self.skip_next_effect();
        }
        self.is_skipping_all.set(false);
        true
    }

    // ------------------------------------------------------------------
    // Effect navigation: backward
    // ------------------------------------------------------------------

    /// Step the presentation back one unit: the playing effects and every
    /// effect started after them, or the last settled effect, or the
    /// previous slide when nothing started on this one.
    pub fn rewind_effect(&self) {
        if self.is_skipping.get() || self.is_rewinding.get() {
            return;
        }
        self.cancel_auto_advance_for_rewind();
        if !self.has_any_effect_started() {
            self.rewind_to_previous_slide();
            return;
        }
        self.is_rewinding.set(true);

        let history = self.started_effects.borrow().clone();
        let first_playing = history
            .iter()
            .position(|effect| effect.is_playing())
            .unwrap_or(history.len() - 1);

        // Notification pass, newest first. The rewound entries leave the
        // history only after the triggered events have been processed, so
        // notifications arriving during the update still find them.
        let multiplexer = &self.context.event_multiplexer;
        for effect in history[first_playing..].iter().rev() {
            match (effect.node_id, effect.is_playing()) {
                (None, true) => multiplexer.notify_rewind_current_effect_event(),
                (None, false) => multiplexer.notify_rewind_last_effect_event(),
                (Some(id), true) => {
                    multiplexer.notify_rewind_running_interactive_effect_event(id)
                }
                (Some(id), false) => multiplexer.notify_rewind_ended_interactive_effect_event(id),
            }
            if effect.node_id.is_none() {
                self.current_effect
                    .set(self.current_effect.get().saturating_sub(1));
            }
        }
        self.update();

        self.started_effects.borrow_mut().truncate(first_playing);
        self.rebuild_interactive_index();
        self.is_rewinding.set(false);
    }

    /// Undo every effect started on the slide, or step back a slide when
    /// none has.
    pub fn rewind_all_effects(&self) {
        if !self.has_any_effect_started() {
            self.rewind_to_previous_slide();
            return;
        }
        while self.has_any_effect_started() {
            self.rewind_effect();
        }
    }

    pub fn rewind_to_previous_slide(&self) {
        if self.is_transition_running.get() {
            self.rewind_transition();
            return;
        }
        if self.is_any_effect_playing() {
            return;
        }
        let Some(current) = self.current_slide.get() else {
            return;
        };
        if current == 0 {
            log::debug!("rewind_to_previous_slide: already on the first slide");
            return;
        }
        self.display_slide(current - 1, true);
        // Arriving backwards shows the slide with all effects played out.
        self.skip_all_effects();
    }

    fn rebuild_interactive_index(&self) {
        let mut index = self.interactive_index.borrow_mut();
        index.clear();
        for (position, effect) in self.started_effects.borrow().iter().enumerate() {
            if let Some(id) = effect.node_id {
                index.insert(id, position);
            }
        }
    }

    // ------------------------------------------------------------------
    // Automatic slide advance
    // ------------------------------------------------------------------

    fn notify_animations_end(&self) {
        let Some(current) = self.current_slide.get() else {
            return;
        };
        let delay = self
            .slides
            .borrow()
            .get(current)
            .and_then(|slide| slide.auto_advance_after);
        let Some(delay) = delay else {
            return;
        };
        let weak = self.weak.clone();
        let event = make_delay(
            move || {
                let Some(handler) = weak.upgrade() else {
                    return;
                };
                // A rewind may have replaced the pending advance with a
                // sentinel; in that case this completion must not act.
                if matches!(&*handler.auto_advance.borrow(), AutoAdvance::Rewound) {
                    *handler.auto_advance.borrow_mut() = AutoAdvance::None;
                    return;
                }
                *handler.auto_advance.borrow_mut() = AutoAdvance::None;
                handler.display_slide(current + 1, false);
            },
            delay,
        );
        self.context.timer_event_queue.add_event(&event);
        *self.auto_advance.borrow_mut() = AutoAdvance::Pending(event);
    }

    fn cancel_auto_advance(&self) {
        if let AutoAdvance::Pending(event) =
            std::mem::replace(&mut *self.auto_advance.borrow_mut(), AutoAdvance::None)
        {
            event.dispose();
        }
    }

    fn cancel_auto_advance_for_rewind(&self) {
        let mut auto_advance = self.auto_advance.borrow_mut();
        if let AutoAdvance::Pending(event) = &*auto_advance {
            event.dispose();
            *auto_advance = AutoAdvance::Rewound;
        }
    }

    // ------------------------------------------------------------------
    // Effect history callbacks
    // ------------------------------------------------------------------

    fn notify_next_effect_start(&self) {
        let effect = Effect::new(None);
        effect.start();
        self.started_effects.borrow_mut().push(effect);
        // Elements attribute state saves made from here on to this effect,
        // so rewinding it restores the effect-boundary snapshot.
        let effect_index = self.current_effect.get() as i64;
        for element in self.context.elements() {
            element.set_current_effect(effect_index);
        }
        let weak = self.weak.clone();
        self.context
            .event_multiplexer
            .register_next_effect_end_handler(make_event(move || {
                if let Some(handler) = weak.upgrade() {
                    handler.notify_next_effect_end();
                }
            }));
    }

    fn notify_next_effect_end(&self) {
        let effects = self.started_effects.borrow();
        if let Some(effect) = effects
            .iter()
            .rev()
            .find(|effect| effect.node_id.is_none() && effect.is_playing())
        {
            effect.end();
        }
    }

    fn notify_interactive_sequence_start(&self, id: NodeId) {
        let existing = self.interactive_index.borrow().get(&id).copied();
        match existing {
            Some(position) => {
                // Replay of a sequence that already ran once.
                let effects = self.started_effects.borrow();
                effects[position].start();
            }
            None => {
                let effect = Effect::new(Some(id));
                effect.start();
                let mut effects = self.started_effects.borrow_mut();
                self.interactive_index.borrow_mut().insert(id, effects.len());
                effects.push(effect);
            }
        }
        self.total_interactive_playing
            .set(self.total_interactive_playing.get() + 1);
    }

    fn notify_interactive_sequence_end(&self, id: NodeId) {
        debug_assert!(self.is_interactive_effect_playing());
        let position = self.interactive_index.borrow().get(&id).copied();
        match position {
            Some(position) => {
                self.started_effects.borrow()[position].end();
                self.total_interactive_playing
                    .set(self.total_interactive_playing.get().saturating_sub(1));
            }
            None => log::warn!("notify_interactive_sequence_end: unknown sequence {id}"),
        }
    }

    // ------------------------------------------------------------------
    // Scheduler
    // ------------------------------------------------------------------

    /// One cooperative scheduler tick.
    ///
    /// Time is held for the whole tick so every event and activity sees the
    /// same instant. Returns the delay until the next tick, or `None` when
    /// both queues are empty and the handler goes idle.
    pub fn update(&self) -> Option<f64> {
        let context = &self.context;
        // An event callback may call back into update; the outer tick is
        // still draining the queues, so the nested call only reports.
        if !self.is_updating.replace(true) {
            context.timer.hold();
            context.timer_event_queue.process();
            context.activity_queue.process();
            self.frame_sync.synchronize();
            context.activity_queue.process_dequeued();
            context.timer.release();
            self.is_updating.set(false);
        }

        if !context.activity_queue.is_empty() {
            Some(MINIMUM_TIMEOUT)
        } else {
            context
                .timer_event_queue
                .next_timeout()
                .map(|timeout| timeout.clamp(MINIMUM_TIMEOUT, MAXIMUM_TIMEOUT))
        }
    }

    /// Blocking tick loop for hosts without their own timer: frame-paced
    /// while activities run, sleeping on the next due event otherwise.
    /// Returns when the handler goes idle.
    pub fn run_loop(&self) {
        loop {
            if self.context.activity_queue.is_empty() {
                self.frame_sync.deactivate();
            } else {
                self.frame_sync.activate();
            }
            match self.update() {
                Some(timeout) => {
                    if self.context.activity_queue.is_empty() {
                        std::thread::sleep(std::time::Duration::from_secs_f64(timeout));
                    }
                }
                None => break,
            }
        }
        self.frame_sync.deactivate();
    }
}

fn collect_interactive_roots(node: &NodeRef, out: &mut Vec<NodeId>) {
    if node.is_interactive_sequence_root() {
        out.push(node.id());
    }
    for child in node.children() {
        collect_interactive_roots(&child, out);
    }
}
