//! Event primitives: one-shot delayed callbacks, the time-keyed event queue,
//! and the event multiplexer.
//!
//! - `DelayEvent`: A charged callback plus an activation delay
//! - `TimerEventQueue`: Fires events in (time, insertion) order;
//!   `force_empty` collapses wall-clock delay to zero while preserving the
//!   relative order that skip/rewind correctness rests on
//! - `EventMultiplexer`: Named trigger classes (skip, rewind, begin/end,
//!   click) that nodes and the handler register against
//! - `ListenerHandle`: Owned registration whose drop disposes the event, so
//!   replacing a sequence-root slot cannot leak a live handler

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use show_model::{NodeId, Trigger};

use crate::timing::ElapsedTime;

// ============================================================================
// DelayEvent
// ============================================================================

/// One-shot charged callback with an activation delay in seconds.
///
/// `fire` runs the callback at most once per charge; `charge` re-arms a
/// fired (not disposed) event; `dispose` discards the callback for good.
pub struct DelayEvent {
    id: u64,
    delay: f64,
    charged: Cell<bool>,
    disposed: Cell<bool>,
    callback: RefCell<Option<Box<dyn FnMut()>>>,
}

/// Shared handle to a [`DelayEvent`].
pub type EventRef = Rc<DelayEvent>;

/// Create a zero-delay event.
pub fn make_event(callback: impl FnMut() + 'static) -> EventRef {
    make_delay(callback, 0.0)
}

/// Create an event that activates `delay` seconds after it is queued.
pub fn make_delay(callback: impl FnMut() + 'static, delay: f64) -> EventRef {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    Rc::new(DelayEvent {
        id: COUNTER.fetch_add(1, Ordering::Relaxed),
        delay,
        charged: Cell::new(true),
        disposed: Cell::new(false),
        callback: RefCell::new(Some(Box::new(callback))),
    })
}

impl DelayEvent {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn delay(&self) -> f64 {
        self.delay
    }

    pub fn is_charged(&self) -> bool {
        self.charged.get() && !self.disposed.get()
    }

    /// Run the callback if charged. Returns whether it ran.
    ///
    /// The callback is taken out of the slot for the duration of the call so
    /// it may recursively charge or dispose this event without aliasing.
    pub fn fire(&self) -> bool {
        if !self.is_charged() {
            return false;
        }
        self.charged.set(false);
        let taken = self.callback.borrow_mut().take();
        if let Some(mut callback) = taken {
            callback();
            if !self.disposed.get() {
                *self.callback.borrow_mut() = Some(callback);
            }
        }
        true
    }

    /// Re-arm a fired event. No effect on a disposed event.
    pub fn charge(&self) {
        if !self.disposed.get() {
            self.charged.set(true);
        }
    }

    /// Discard the callback; the event can never fire again.
    pub fn dispose(&self) {
        self.disposed.set(true);
        self.charged.set(false);
        *self.callback.borrow_mut() = None;
    }
}

impl std::fmt::Debug for DelayEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelayEvent")
            .field("id", &self.id)
            .field("delay", &self.delay)
            .field("charged", &self.is_charged())
            .finish()
    }
}

// ============================================================================
// TimerEventQueue
// ============================================================================

struct QueueEntry {
    activation: f64,
    event: EventRef,
}

/// Time-keyed event queue over a shared [`ElapsedTime`].
///
/// Events fire in (activation time, insertion sequence) order, so two events
/// due at the same instant fire in the order they were queued.
pub struct TimerEventQueue {
    timer: Rc<ElapsedTime>,
    entries: RefCell<Vec<QueueEntry>>,
}

impl TimerEventQueue {
    pub fn new(timer: Rc<ElapsedTime>) -> Self {
        Self {
            timer,
            entries: RefCell::new(Vec::new()),
        }
    }

    /// Queue an event at `now + event.delay()`. Uncharged events are
    /// rejected with a log.
    pub fn add_event(&self, event: &EventRef) -> bool {
        if !event.is_charged() {
            log::warn!("TimerEventQueue::add_event: event {} not charged", event.id());
            return false;
        }
        let activation = self.timer.elapsed() + event.delay();
        let mut entries = self.entries.borrow_mut();
        // Insert after all entries with activation <= ours: equal-time
        // events keep insertion order.
        let position = entries.partition_point(|entry| entry.activation <= activation);
        entries.insert(
            position,
            QueueEntry {
                activation,
                event: Rc::clone(event),
            },
        );
        true
    }

    /// Fire every event whose activation time has passed. Callbacks may
    /// queue further events; ones already due fire within the same call.
    pub fn process(&self) {
        self.process_inner(false);
    }

    /// Fire every queued event regardless of activation time, in queue
    /// order, with zero wall-clock delay between them. Events queued by the
    /// fired callbacks are drained too.
    pub fn force_empty(&self) {
        self.process_inner(true);
    }

    fn process_inner(&self, force: bool) {
        loop {
            let next = {
                let mut entries = self.entries.borrow_mut();
                match entries.first() {
                    Some(entry) if force || entry.activation <= self.timer.elapsed() => {
                        Some(entries.remove(0).event)
                    }
                    _ => None,
                }
            };
            match next {
                Some(event) => {
                    event.fire();
                }
                None => break,
            }
        }
    }

    /// Discard all queued events without firing them.
    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Seconds until the earliest queued event is due, or `None` when empty.
    /// Already-due events yield zero, never a negative timeout.
    pub fn next_timeout(&self) -> Option<f64> {
        self.entries
            .borrow()
            .first()
            .map(|entry| (entry.activation - self.timer.elapsed()).max(0.0))
    }

    pub fn timer(&self) -> &Rc<ElapsedTime> {
        &self.timer
    }
}

// ============================================================================
// NextEffectEventArray
// ============================================================================

/// Ordered list of the main-sequence trigger events for the current slide.
///
/// `next_effect()` walks this list by index; a rewound effect re-charges its
/// event in place, so the cursor can step back over it.
#[derive(Default)]
pub struct NextEffectEventArray {
    events: Vec<EventRef>,
}

impl NextEffectEventArray {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, event: EventRef) {
        self.events.push(event);
    }

    pub fn size(&self) -> usize {
        self.events.len()
    }

    pub fn at(&self, index: usize) -> Option<&EventRef> {
        self.events.get(index)
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

// ============================================================================
// EventMultiplexer
// ============================================================================

/// Identifies who fired (or is listened on) for an event class; either a
/// runtime animation node or a wire-level element/node id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NotifierId {
    Node(NodeId),
    Name(String),
}

impl From<NodeId> for NotifierId {
    fn from(id: NodeId) -> Self {
        NotifierId::Node(id)
    }
}

impl From<&str> for NotifierId {
    fn from(id: &str) -> Self {
        NotifierId::Name(id.to_string())
    }
}

/// Owned registration for a sequence-root multiplexer slot.
///
/// Dropping the handle disposes the underlying event, so storing the new
/// handle over the previous one is the dispose-before-replace contract.
pub struct ListenerHandle {
    event: EventRef,
}

impl ListenerHandle {
    fn new(event: EventRef) -> Self {
        Self { event }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.event.dispose();
    }
}

/// Registration surface for named callback classes.
///
/// The engine only ever calls `register_*`/`notify_*`; no caller iterates
/// subscribers directly. All registered events are one-shot: an event that
/// is no longer charged after a notification pass is dropped.
#[derive(Default)]
pub struct EventMultiplexer {
    skip_effect: RefCell<Option<EventRef>>,
    rewind_current_effect: RefCell<Option<EventRef>>,
    rewind_last_effect: RefCell<Option<EventRef>>,
    skip_interactive: RefCell<HashMap<NodeId, EventRef>>,
    rewind_running_interactive: RefCell<HashMap<NodeId, EventRef>>,
    rewind_ended_interactive: RefCell<HashMap<NodeId, EventRef>>,
    rewinded_effect: RefCell<HashMap<NotifierId, Vec<EventRef>>>,
    next_effect_end_handlers: RefCell<Vec<EventRef>>,
    animations_end_handler: RefCell<Option<EventRef>>,
    registrations: RefCell<HashMap<(Trigger, NotifierId), Vec<EventRef>>>,
}

impl EventMultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- sequence-root one-shot slots -------------------------------------

    pub fn register_skip_effect_event(&self, event: EventRef) -> ListenerHandle {
        *self.skip_effect.borrow_mut() = Some(Rc::clone(&event));
        ListenerHandle::new(event)
    }

    pub fn notify_skip_effect_event(&self) {
        Self::fire_slot(&self.skip_effect);
    }

    pub fn register_rewind_current_effect_event(&self, event: EventRef) -> ListenerHandle {
        *self.rewind_current_effect.borrow_mut() = Some(Rc::clone(&event));
        ListenerHandle::new(event)
    }

    pub fn notify_rewind_current_effect_event(&self) {
        Self::fire_slot(&self.rewind_current_effect);
    }

    pub fn register_rewind_last_effect_event(&self, event: EventRef) -> ListenerHandle {
        *self.rewind_last_effect.borrow_mut() = Some(Rc::clone(&event));
        ListenerHandle::new(event)
    }

    pub fn notify_rewind_last_effect_event(&self) {
        Self::fire_slot(&self.rewind_last_effect);
    }

    // ---- interactive-sequence per-node slots ------------------------------

    pub fn register_skip_interactive_effect_event(
        &self,
        id: NodeId,
        event: EventRef,
    ) -> ListenerHandle {
        self.skip_interactive.borrow_mut().insert(id, Rc::clone(&event));
        ListenerHandle::new(event)
    }

    pub fn notify_skip_interactive_effect_event(&self, id: NodeId) {
        Self::fire_keyed(&self.skip_interactive, id);
    }

    pub fn register_rewind_running_interactive_effect_event(
        &self,
        id: NodeId,
        event: EventRef,
    ) -> ListenerHandle {
        self.rewind_running_interactive
            .borrow_mut()
            .insert(id, Rc::clone(&event));
        ListenerHandle::new(event)
    }

    pub fn notify_rewind_running_interactive_effect_event(&self, id: NodeId) {
        Self::fire_keyed(&self.rewind_running_interactive, id);
    }

    pub fn register_rewind_ended_interactive_effect_event(
        &self,
        id: NodeId,
        event: EventRef,
    ) -> ListenerHandle {
        self.rewind_ended_interactive
            .borrow_mut()
            .insert(id, Rc::clone(&event));
        ListenerHandle::new(event)
    }

    pub fn notify_rewind_ended_interactive_effect_event(&self, id: NodeId) {
        Self::fire_keyed(&self.rewind_ended_interactive, id);
    }

    // ---- rewound-effect notifications -------------------------------------

    pub fn register_rewinded_effect_handler(&self, id: NotifierId, event: EventRef) {
        self.rewinded_effect.borrow_mut().entry(id).or_default().push(event);
    }

    pub fn notify_rewinded_effect_event(&self, id: NotifierId) {
        let events = self.rewinded_effect.borrow_mut().remove(&id);
        let mut still_charged = Vec::new();
        for event in events.into_iter().flatten() {
            event.fire();
            if event.is_charged() {
                still_charged.push(event);
            }
        }
        if !still_charged.is_empty() {
            self.rewinded_effect.borrow_mut().insert(id, still_charged);
        }
    }

    // ---- handler fire-once registrations ----------------------------------

    pub fn register_next_effect_end_handler(&self, event: EventRef) {
        self.next_effect_end_handlers.borrow_mut().push(event);
    }

    /// Fires every registered next-effect-end handler once and clears the list.
    pub fn notify_next_effect_end_event(&self) {
        let handlers = std::mem::take(&mut *self.next_effect_end_handlers.borrow_mut());
        for handler in handlers {
            handler.fire();
        }
    }

    pub fn register_animations_end_handler(&self, event: EventRef) {
        *self.animations_end_handler.borrow_mut() = Some(event);
    }

    pub fn notify_animations_end_event(&self) {
        Self::fire_slot(&self.animations_end_handler);
    }

    // ---- generic trigger registrations (begin/end/click) ------------------

    /// Register an event for a (trigger, notifier) pair; used for event-based
    /// begin timings (element clicks, other nodes' begin/end).
    pub fn register_event(&self, trigger: Trigger, notifier: NotifierId, event: EventRef) {
        self.registrations
            .borrow_mut()
            .entry((trigger, notifier))
            .or_default()
            .push(event);
    }

    /// Fire every charged event registered for the pair. Events still
    /// charged afterwards (re-armed for restart) stay registered.
    pub fn notify_event(&self, trigger: Trigger, notifier: NotifierId) {
        let key = (trigger, notifier);
        let events = self.registrations.borrow_mut().remove(&key);
        let mut still_charged = Vec::new();
        for event in events.into_iter().flatten() {
            event.fire();
            if event.is_charged() {
                still_charged.push(event);
            }
        }
        if !still_charged.is_empty() {
            // A callback may have registered for the same key; keep those
            // events after the re-charged originals instead of clobbering
            // them.
            let mut registrations = self.registrations.borrow_mut();
            let slot = registrations.entry(key).or_default();
            still_charged.append(slot);
            *slot = still_charged;
        }
    }

    /// Drop every registration. Used when a slide is left.
    pub fn clear(&self) {
        *self.skip_effect.borrow_mut() = None;
        *self.rewind_current_effect.borrow_mut() = None;
        *self.rewind_last_effect.borrow_mut() = None;
        self.skip_interactive.borrow_mut().clear();
        self.rewind_running_interactive.borrow_mut().clear();
        self.rewind_ended_interactive.borrow_mut().clear();
        self.rewinded_effect.borrow_mut().clear();
        self.next_effect_end_handlers.borrow_mut().clear();
        *self.animations_end_handler.borrow_mut() = None;
        self.registrations.borrow_mut().clear();
    }

    fn fire_slot(slot: &RefCell<Option<EventRef>>) {
        let event = slot.borrow().clone();
        if let Some(event) = event {
            event.fire();
        }
    }

    fn fire_keyed(slot: &RefCell<HashMap<NodeId, EventRef>>, id: NodeId) {
        let event = slot.borrow().get(&id).cloned();
        match event {
            Some(event) => {
                event.fire();
            }
            None => log::debug!("EventMultiplexer: no event registered for node {id}"),
        }
    }
}
