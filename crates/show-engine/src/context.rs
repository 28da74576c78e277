//! Shared services threaded through the animation tree.
//!
//! Every node holds an `Rc<SlideShowContext>` giving it access to the
//! scheduler queues, the event multiplexer and the slide-global flags. The
//! handler owns the context and installs its notification hooks after
//! construction.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use crate::activity::ActivityQueue;
use crate::element::AnimatedElement;
use crate::events::{EventMultiplexer, NextEffectEventArray, TimerEventQueue};
use crate::timing::ElapsedTime;

pub type ContextRef = Rc<SlideShowContext>;

/// Per-slide animation services shared by the whole tree.
pub struct SlideShowContext {
    pub timer: Rc<ElapsedTime>,
    pub timer_event_queue: Rc<TimerEventQueue>,
    pub activity_queue: Rc<ActivityQueue>,
    pub event_multiplexer: Rc<EventMultiplexer>,
    /// Activation events of main-sequence effects, in effect order; consumed
    /// by skip-all.
    pub next_effect_events: RefCell<NextEffectEventArray>,
    /// Set while a skip operation drains queues so activities start in their
    /// final state instead of animating.
    pub is_skipping: Cell<bool>,
    /// Animated shapes on the current slide, by target element id.
    elements: RefCell<HashMap<String, Rc<AnimatedElement>>>,
    /// Wire-level animation node ids, filled while the tree is built; used
    /// to resolve `begin="id.beginEvent"` style timings.
    node_ids: RefCell<HashMap<String, show_model::NodeId>>,
    /// Installed by the handler; invoked when the first effect of the slide
    /// starts without user interaction, and again when it settles.
    on_first_auto_effect_started: RefCell<Option<Box<dyn Fn()>>>,
    on_first_auto_effect_ended: RefCell<Option<Box<dyn Fn()>>>,
}

impl SlideShowContext {
    pub fn new(timer: Rc<ElapsedTime>) -> ContextRef {
        let timer_event_queue = Rc::new(TimerEventQueue::new(timer.clone()));
        let activity_queue = Rc::new(ActivityQueue::new(timer.clone()));
        Rc::new(Self {
            timer,
            timer_event_queue,
            activity_queue,
            event_multiplexer: Rc::new(EventMultiplexer::new()),
            next_effect_events: RefCell::new(NextEffectEventArray::new()),
            is_skipping: Cell::new(false),
            elements: RefCell::new(HashMap::new()),
            node_ids: RefCell::new(HashMap::new()),
            on_first_auto_effect_started: RefCell::new(None),
            on_first_auto_effect_ended: RefCell::new(None),
        })
    }

    pub fn register_node_id(&self, wire_id: &str, id: show_model::NodeId) {
        self.node_ids.borrow_mut().insert(wire_id.to_string(), id);
    }

    pub fn lookup_node_id(&self, wire_id: &str) -> Option<show_model::NodeId> {
        self.node_ids.borrow().get(wire_id).copied()
    }

    /// Look up the animated wrapper for a target shape, creating it on first
    /// use so every node animating the same shape shares one state.
    pub fn element(&self, id: &str, make: impl FnOnce() -> AnimatedElement) -> Rc<AnimatedElement> {
        self.elements
            .borrow_mut()
            .entry(id.to_string())
            .or_insert_with(|| Rc::new(make()))
            .clone()
    }

    pub fn lookup_element(&self, id: &str) -> Option<Rc<AnimatedElement>> {
        self.elements.borrow().get(id).cloned()
    }

    pub fn elements(&self) -> Vec<Rc<AnimatedElement>> {
        self.elements.borrow().values().cloned().collect()
    }

    pub fn set_first_auto_effect_hooks(
        &self,
        started: impl Fn() + 'static,
        ended: impl Fn() + 'static,
    ) {
        *self.on_first_auto_effect_started.borrow_mut() = Some(Box::new(started));
        *self.on_first_auto_effect_ended.borrow_mut() = Some(Box::new(ended));
    }

    pub fn notify_first_auto_effect_started(&self) {
        if let Some(hook) = self.on_first_auto_effect_started.borrow().as_ref() {
            hook();
        }
    }

    pub fn notify_first_auto_effect_ended(&self) {
        if let Some(hook) = self.on_first_auto_effect_ended.borrow().as_ref() {
            hook();
        }
    }

    /// Drop per-slide state when leaving the slide.
    pub fn dispose(&self) {
        self.timer_event_queue.clear();
        self.activity_queue.clear();
        self.event_multiplexer.clear();
        self.next_effect_events.borrow_mut().clear();
        self.is_skipping.set(false);
        self.elements.borrow_mut().clear();
        self.node_ids.borrow_mut().clear();
        *self.on_first_auto_effect_started.borrow_mut() = None;
        *self.on_first_auto_effect_ended.borrow_mut() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::Rect;
    use crate::timing::ManualTimeSource;

    fn context() -> ContextRef {
        let source = Rc::new(ManualTimeSource::new());
        SlideShowContext::new(Rc::new(ElapsedTime::new(source)))
    }

    #[test]
    fn test_element_is_shared_per_target_id() {
        let ctx = context();
        let a = ctx.element("shape1", || {
            AnimatedElement::new("shape1", Rect::new(0.0, 0.0, 10.0, 10.0))
        });
        let b = ctx.element("shape1", || {
            AnimatedElement::new("shape1", Rect::new(5.0, 5.0, 20.0, 20.0))
        });
        assert!(Rc::ptr_eq(&a, &b));
        assert!(ctx.lookup_element("shape2").is_none());
    }

    #[test]
    fn test_first_auto_effect_hook() {
        let ctx = context();
        let fired = Rc::new(Cell::new(0u32));
        let count = fired.clone();
        ctx.set_first_auto_effect_hooks(move || count.set(count.get() + 1), || {});
        ctx.notify_first_auto_effect_started();
        ctx.notify_first_auto_effect_started();
        ctx.notify_first_auto_effect_ended();
        assert_eq!(fired.get(), 2);
    }

    #[test]
    fn test_dispose_clears_slide_state() {
        let ctx = context();
        ctx.element("shape1", || {
            AnimatedElement::new("shape1", Rect::new(0.0, 0.0, 10.0, 10.0))
        });
        ctx.is_skipping.set(true);
        ctx.dispose();
        assert!(ctx.lookup_element("shape1").is_none());
        assert!(ctx.timer_event_queue.is_empty());
        assert!(ctx.activity_queue.is_empty());
    }
}
