//! Activities: in-progress timed animations advanced once per scheduler tick.
//!
//! The `ActivityQueue` holds whatever is currently animating. Each tick the
//! handler calls `process()` (perform every activity, retiring finished
//! ones) and later `process_dequeued()` (final notifications outside the hot
//! loop). `end_all()` force-completes everything and is called before any
//! skip/rewind mutation so in-flight interpolations cannot race a forced
//! state jump.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use show_model::{AccumulateMode, AdditiveMode, PropertyValue};

use crate::element::{AnimatedElement, AnimatedProperty};
use crate::events::{EventRef, TimerEventQueue};
use crate::properties::{Interpolator, OperatorSet};
use crate::timing::ElapsedTime;

/// A timed animation advanced by the activity queue.
pub trait Activity {
    /// Advance one tick.
    fn perform(&self);
    fn is_active(&self) -> bool;
    /// Called once after the activity left the processing list.
    fn dequeued(&self);
    /// Force completion: jump to the final state and deactivate.
    fn end(&self);
    /// Discard without completing: deactivate in place, dropping the end
    /// event so no deactivation fires.
    fn dispose(&self);
}

pub type ActivityRef = Rc<dyn Activity>;

/// Queue of running activities.
pub struct ActivityQueue {
    timer: Rc<ElapsedTime>,
    current: RefCell<Vec<ActivityRef>>,
    dequeued: RefCell<Vec<ActivityRef>>,
}

impl ActivityQueue {
    pub fn new(timer: Rc<ElapsedTime>) -> Self {
        Self {
            timer,
            current: RefCell::new(Vec::new()),
            dequeued: RefCell::new(Vec::new()),
        }
    }

    pub fn add_activity(&self, activity: ActivityRef) {
        self.current.borrow_mut().push(activity);
    }

    /// Perform every current activity; ones that finished move to the
    /// dequeued list. Activities added while processing run next tick.
    pub fn process(&self) {
        let processing = std::mem::take(&mut *self.current.borrow_mut());
        let mut kept = Vec::with_capacity(processing.len());
        for activity in processing {
            activity.perform();
            if activity.is_active() {
                kept.push(activity);
            } else {
                self.dequeued.borrow_mut().push(activity);
            }
        }
        // Keep original order; anything queued during the loop goes after.
        let mut current = self.current.borrow_mut();
        kept.append(&mut current);
        *current = kept;
    }

    /// Run the retirement notifications collected by `process`.
    pub fn process_dequeued(&self) {
        let retired = std::mem::take(&mut *self.dequeued.borrow_mut());
        for activity in retired {
            activity.dequeued();
        }
    }

    /// Force-complete every running activity. The finished activities still
    /// get their `dequeued` pass on the next `process_dequeued`.
    pub fn end_all(&self) {
        let processing = std::mem::take(&mut *self.current.borrow_mut());
        for activity in &processing {
            activity.end();
        }
        self.dequeued.borrow_mut().extend(processing);
    }

    /// Discard everything without callbacks.
    pub fn clear(&self) {
        self.current.borrow_mut().clear();
        self.dequeued.borrow_mut().clear();
    }

    pub fn is_empty(&self) -> bool {
        self.current.borrow().is_empty() && self.dequeued.borrow().is_empty()
    }

    pub fn timer(&self) -> &Rc<ElapsedTime> {
        &self.timer
    }
}

// ============================================================================
// FromToByActivity
// ============================================================================

/// Construction parameters shared by the concrete activities.
pub struct ActivityParams {
    pub duration: f64,
    pub repeats: f64,
    pub accelerate: f64,
    pub decelerate: f64,
    pub auto_reverse: bool,
    pub accumulate: AccumulateMode,
    pub additive: AdditiveMode,
    /// Queued into the timer event queue when the activity deactivates;
    /// typically the owning node's deactivation.
    pub end_event: Option<EventRef>,
    pub timer_event_queue: Rc<TimerEventQueue>,
    /// The activity-queue timer the animation clock derives from.
    pub timer: Rc<ElapsedTime>,
}

/// Continuous from/to/by interpolation of one element property.
///
/// Start and end values resolve lazily at the first perform so `to`- and
/// `by`-only animations pick up the element's value as already modified by
/// preceding effects.
pub struct FromToByActivity {
    element: Rc<AnimatedElement>,
    property: AnimatedProperty,
    from: Option<PropertyValue>,
    to: Option<PropertyValue>,
    by: Option<PropertyValue>,
    ops: &'static OperatorSet,
    interpolate: Interpolator,

    duration: f64,
    repeats: f64,
    accelerate: f64,
    decelerate: f64,
    auto_reverse: bool,
    accumulate: bool,
    additive: bool,

    timer: Rc<ElapsedTime>,
    timer_event_queue: Rc<TimerEventQueue>,
    end_event: RefCell<Option<EventRef>>,

    active: Cell<bool>,
    start_time: Cell<Option<f64>>,
    /// Underlying value captured at the first perform, the base for
    /// additive application.
    base_value: RefCell<Option<PropertyValue>>,
    /// (start, end) resolved from from/to/by at the first perform.
    resolved: RefCell<Option<(PropertyValue, PropertyValue)>>,
    animation_ended: Cell<bool>,
}

impl FromToByActivity {
    pub fn new(
        element: Rc<AnimatedElement>,
        property: AnimatedProperty,
        from: Option<PropertyValue>,
        to: Option<PropertyValue>,
        by: Option<PropertyValue>,
        ops: &'static OperatorSet,
        interpolate: Interpolator,
        params: ActivityParams,
    ) -> Self {
        debug_assert!(params.duration > 0.0, "activity duration must be positive");
        debug_assert!(
            to.is_some() || by.is_some(),
            "a from/to/by activity needs a to or by value"
        );
        Self {
            element,
            property,
            from,
            to,
            by,
            ops,
            interpolate,
            duration: params.duration.max(f64::MIN_POSITIVE),
            repeats: if params.repeats >= 1.0 { params.repeats } else { 1.0 },
            accelerate: params.accelerate,
            decelerate: params.decelerate,
            auto_reverse: params.auto_reverse,
            accumulate: params.accumulate == AccumulateMode::Sum,
            additive: params.additive == AdditiveMode::Sum,
            timer: params.timer,
            timer_event_queue: params.timer_event_queue,
            end_event: RefCell::new(params.end_event),
            active: Cell::new(true),
            start_time: Cell::new(None),
            base_value: RefCell::new(None),
            resolved: RefCell::new(None),
            animation_ended: Cell::new(false),
        }
    }

    fn begin_if_needed(&self) -> f64 {
        match self.start_time.get() {
            Some(start) => start,
            None => {
                let start = self.timer.elapsed();
                self.start_time.set(Some(start));
                let base = self.property.get(&self.element);
                let start_value = self.from.clone().unwrap_or_else(|| base.clone());
                let end_value = match (&self.to, &self.by) {
                    (Some(to), _) => to.clone(),
                    (None, Some(by)) => (self.ops.add)(&start_value, by),
                    (None, None) => start_value.clone(),
                };
                *self.resolved.borrow_mut() = Some((start_value, end_value));
                *self.base_value.borrow_mut() = Some(base);
                self.element.notify_animation_start();
                start
            }
        }
    }

    /// Compute the animated value at total time parameter `t_total` (in
    /// units of simple durations) and apply it to the element.
    fn apply_at(&self, t_total: f64) {
        let completed = t_total.floor();
        let at_end = t_total >= self.repeats;
        let mut fraction = if at_end {
            let tail = self.repeats.fract();
            if tail == 0.0 { 1.0 } else { tail }
        } else {
            t_total - completed
        };
        let completed = if at_end {
            // The final iteration does not count towards accumulation.
            (self.repeats.ceil() - 1.0).max(0.0)
        } else {
            completed
        };

        if self.auto_reverse && (completed as u64) % 2 == 1 {
            fraction = 1.0 - fraction;
        }
        let warped = accelerated_time(fraction, self.accelerate, self.decelerate);

        let resolved = self.resolved.borrow();
        let Some((start, end)) = resolved.as_ref() else {
            return;
        };
        let mut value = (self.interpolate)(start, end, warped);
        if self.accumulate && completed > 0.0 {
            value = (self.ops.add)(&value, &(self.ops.scale)(completed, end));
        }
        if self.additive {
            let base = self.base_value.borrow();
            if let Some(base) = base.as_ref() {
                value = (self.ops.add)(base, &value);
            }
        }
        self.property.set(&self.element, &value);
    }

    fn finish(&self) {
        if !self.active.get() {
            return;
        }
        self.active.set(false);
        if let Some(event) = self.end_event.borrow_mut().take() {
            self.timer_event_queue.add_event(&event);
        }
    }

    /// Apply the final value directly. Unlike `apply_at` this carries no
    /// iteration math, so it stays well defined for indefinite repeats.
    fn apply_end(&self) {
        let resolved = self.resolved.borrow();
        let Some((start, end)) = resolved.as_ref() else {
            return;
        };
        // An auto-reversed animation comes to rest at its start value.
        let mut value = if self.auto_reverse { start.clone() } else { end.clone() };
        if self.additive {
            let base = self.base_value.borrow();
            if let Some(base) = base.as_ref() {
                value = (self.ops.add)(base, &value);
            }
        }
        self.property.set(&self.element, &value);
    }

    fn end_animation(&self) {
        if !self.animation_ended.get() {
            self.animation_ended.set(true);
            self.element.notify_animation_end();
        }
    }
}

impl Activity for FromToByActivity {
    fn perform(&self) {
        if !self.active.get() {
            return;
        }
        let start = self.begin_if_needed();
        let t_total = ((self.timer.elapsed() - start) / self.duration).min(self.repeats);
        self.apply_at(t_total);
        if t_total >= self.repeats {
            self.finish();
        }
    }

    fn is_active(&self) -> bool {
        self.active.get()
    }

    fn dequeued(&self) {
        if !self.active.get() {
            self.end_animation();
        }
    }

    fn end(&self) {
        if !self.active.get() {
            return;
        }
        self.begin_if_needed();
        self.apply_end();
        self.finish();
        self.end_animation();
    }

    fn dispose(&self) {
        self.active.set(false);
        self.end_event.borrow_mut().take();
        // Balance the start notification if the animation ever ran.
        if self.start_time.get().is_some() {
            self.end_animation();
        }
    }
}

// ============================================================================
// SetActivity
// ============================================================================

/// Discrete assignment: applies the `to` value once and finishes.
pub struct SetActivity {
    element: Rc<AnimatedElement>,
    property: AnimatedProperty,
    to: PropertyValue,
    timer_event_queue: Rc<TimerEventQueue>,
    end_event: RefCell<Option<EventRef>>,
    active: Cell<bool>,
}

impl SetActivity {
    pub fn new(
        element: Rc<AnimatedElement>,
        property: AnimatedProperty,
        to: PropertyValue,
        timer_event_queue: Rc<TimerEventQueue>,
        end_event: Option<EventRef>,
    ) -> Self {
        Self {
            element,
            property,
            to,
            timer_event_queue,
            end_event: RefCell::new(end_event),
            active: Cell::new(true),
        }
    }

    fn apply_and_finish(&self) {
        if !self.active.get() {
            return;
        }
        self.property.set(&self.element, &self.to);
        self.active.set(false);
        if let Some(event) = self.end_event.borrow_mut().take() {
            self.timer_event_queue.add_event(&event);
        }
    }
}

impl Activity for SetActivity {
    fn perform(&self) {
        self.apply_and_finish();
    }

    fn is_active(&self) -> bool {
        self.active.get()
    }

    fn dequeued(&self) {}

    fn end(&self) {
        self.apply_and_finish();
    }

    fn dispose(&self) {
        self.active.set(false);
        self.end_event.borrow_mut().take();
    }
}

// ============================================================================
// TransitionActivity
// ============================================================================

/// Fixed-duration slide transition: reports progress in [0, 1] to a callback
/// each tick and fires a completion event at the end.
pub struct TransitionActivity {
    duration: f64,
    on_progress: Box<dyn Fn(f64)>,
    timer: Rc<ElapsedTime>,
    timer_event_queue: Rc<TimerEventQueue>,
    end_event: RefCell<Option<EventRef>>,
    active: Cell<bool>,
    start_time: Cell<Option<f64>>,
}

impl TransitionActivity {
    pub fn new(
        duration: f64,
        on_progress: impl Fn(f64) + 'static,
        timer: Rc<ElapsedTime>,
        timer_event_queue: Rc<TimerEventQueue>,
        end_event: EventRef,
    ) -> Self {
        Self {
            duration: duration.max(f64::MIN_POSITIVE),
            on_progress: Box::new(on_progress),
            timer,
            timer_event_queue,
            end_event: RefCell::new(Some(end_event)),
            active: Cell::new(true),
            start_time: Cell::new(None),
        }
    }

    fn finish(&self) {
        if !self.active.get() {
            return;
        }
        self.active.set(false);
        if let Some(event) = self.end_event.borrow_mut().take() {
            self.timer_event_queue.add_event(&event);
        }
    }
}

impl Activity for TransitionActivity {
    fn perform(&self) {
        if !self.active.get() {
            return;
        }
        let start = match self.start_time.get() {
            Some(start) => start,
            None => {
                let start = self.timer.elapsed();
                self.start_time.set(Some(start));
                start
            }
        };
        let t = ((self.timer.elapsed() - start) / self.duration).clamp(0.0, 1.0);
        (self.on_progress)(t);
        if t >= 1.0 {
            self.finish();
        }
    }

    fn is_active(&self) -> bool {
        self.active.get()
    }

    fn dequeued(&self) {}

    fn end(&self) {
        if !self.active.get() {
            return;
        }
        (self.on_progress)(1.0);
        self.finish();
    }

    fn dispose(&self) {
        self.active.set(false);
        self.end_event.borrow_mut().take();
    }
}

/// SMIL accelerate/decelerate time warp. `accelerate` and `decelerate` are
/// fractions of the simple duration; their sum is at most 1 (enforced at
/// parse time).
fn accelerated_time(t: f64, accelerate: f64, decelerate: f64) -> f64 {
    if accelerate + decelerate <= 0.0 {
        return t;
    }
    let rate = 1.0 / (1.0 - accelerate / 2.0 - decelerate / 2.0);
    if t < accelerate {
        rate * t * t / (2.0 * accelerate)
    } else if t <= 1.0 - decelerate {
        rate * (accelerate / 2.0 + (t - accelerate))
    } else {
        let tail = 1.0 - t;
        1.0 - rate * tail * tail / (2.0 * decelerate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::Rect;
    use crate::events::make_event;
    use crate::timing::ManualTimeSource;
    use show_model::{CalcMode, PropertyKind};

    struct Fixture {
        source: Rc<ManualTimeSource>,
        timer: Rc<ElapsedTime>,
        queue: Rc<ActivityQueue>,
        event_queue: Rc<TimerEventQueue>,
        element: Rc<AnimatedElement>,
    }

    fn fixture() -> Fixture {
        let source = Rc::new(ManualTimeSource::new());
        let timer = Rc::new(ElapsedTime::new(source.clone()));
        Fixture {
            source,
            timer: timer.clone(),
            queue: Rc::new(ActivityQueue::new(timer.clone())),
            event_queue: Rc::new(TimerEventQueue::new(timer)),
            element: Rc::new(AnimatedElement::new("shape1", Rect::new(0.0, 0.0, 100.0, 50.0))),
        }
    }

    fn opacity_activity(fx: &Fixture, end_event: Option<EventRef>) -> Rc<FromToByActivity> {
        Rc::new(FromToByActivity::new(
            fx.element.clone(),
            AnimatedProperty::Opacity,
            Some(PropertyValue::Number(0.0)),
            Some(PropertyValue::Number(1.0)),
            None,
            crate::properties::operator_set(PropertyKind::Number),
            crate::properties::interpolator(CalcMode::Linear, PropertyKind::Number).unwrap(),
            ActivityParams {
                duration: 2.0,
                repeats: 1.0,
                accelerate: 0.0,
                decelerate: 0.0,
                auto_reverse: false,
                accumulate: AccumulateMode::None,
                additive: AdditiveMode::Replace,
                end_event,
                timer_event_queue: fx.event_queue.clone(),
                timer: fx.timer.clone(),
            },
        ))
    }

    #[test]
    fn test_from_to_interpolates_over_duration() {
        let fx = fixture();
        let activity = opacity_activity(&fx, None);
        fx.queue.add_activity(activity.clone());

        fx.queue.process();
        assert_eq!(fx.element.opacity(), 0.0);

        fx.source.advance(1.0);
        fx.queue.process();
        assert_eq!(fx.element.opacity(), 0.5);

        fx.source.advance(1.0);
        fx.queue.process();
        assert_eq!(fx.element.opacity(), 1.0);
        assert!(!activity.is_active());
        assert!(fx.queue.current.borrow().is_empty());
        fx.queue.process_dequeued();
        assert!(fx.queue.is_empty());
    }

    #[test]
    fn test_end_jumps_to_final_value_and_queues_end_event() {
        let fx = fixture();
        let fired = Rc::new(Cell::new(false));
        let flag = fired.clone();
        let activity = opacity_activity(&fx, Some(make_event(move || flag.set(true))));
        fx.queue.add_activity(activity.clone());
        fx.queue.process();

        fx.queue.end_all();
        assert_eq!(fx.element.opacity(), 1.0);
        assert!(!activity.is_active());
        // The end event goes through the timer queue, not directly.
        assert!(!fired.get());
        fx.event_queue.force_empty();
        assert!(fired.get());
    }

    #[test]
    fn test_end_applies_final_value_with_indefinite_repeats() {
        let fx = fixture();
        let activity = Rc::new(FromToByActivity::new(
            fx.element.clone(),
            AnimatedProperty::Opacity,
            Some(PropertyValue::Number(0.0)),
            Some(PropertyValue::Number(1.0)),
            None,
            crate::properties::operator_set(PropertyKind::Number),
            crate::properties::interpolator(CalcMode::Linear, PropertyKind::Number).unwrap(),
            ActivityParams {
                duration: 2.0,
                repeats: f64::INFINITY,
                accelerate: 0.0,
                decelerate: 0.0,
                auto_reverse: false,
                accumulate: AccumulateMode::None,
                additive: AdditiveMode::Replace,
                end_event: None,
                timer_event_queue: fx.event_queue.clone(),
                timer: fx.timer.clone(),
            },
        ));
        fx.queue.add_activity(activity.clone());
        fx.queue.process();
        fx.source.advance(3.0);
        fx.queue.process();
        assert!(activity.is_active());

        fx.queue.end_all();
        assert_eq!(fx.element.opacity(), 1.0);
        assert!(!activity.is_active());
    }

    #[test]
    fn test_dequeued_notifies_element_once() {
        let fx = fixture();
        let activity = opacity_activity(&fx, None);
        fx.queue.add_activity(activity.clone());
        fx.queue.process();
        assert!(fx.element.is_animating());

        fx.source.advance(5.0);
        fx.queue.process();
        fx.queue.process_dequeued();
        assert!(!fx.element.is_animating());
    }

    #[test]
    fn test_set_activity_applies_once() {
        let fx = fixture();
        let activity = Rc::new(SetActivity::new(
            fx.element.clone(),
            AnimatedProperty::Visibility,
            PropertyValue::Bool(false),
            fx.event_queue.clone(),
            None,
        ));
        fx.queue.add_activity(activity.clone());
        fx.queue.process();
        assert!(!fx.element.is_visible());
        assert!(!activity.is_active());
    }

    #[test]
    fn test_transition_activity_reports_progress() {
        let fx = fixture();
        let progress = Rc::new(Cell::new(-1.0));
        let seen = progress.clone();
        let done = Rc::new(Cell::new(false));
        let done_flag = done.clone();
        let activity = Rc::new(TransitionActivity::new(
            4.0,
            move |t| seen.set(t),
            fx.timer.clone(),
            fx.event_queue.clone(),
            make_event(move || done_flag.set(true)),
        ));
        fx.queue.add_activity(activity);

        fx.queue.process();
        assert_eq!(progress.get(), 0.0);
        fx.source.advance(2.0);
        fx.queue.process();
        assert_eq!(progress.get(), 0.5);
        fx.source.advance(2.0);
        fx.queue.process();
        assert_eq!(progress.get(), 1.0);
        fx.event_queue.force_empty();
        assert!(done.get());
    }

    #[test]
    fn test_accumulate_adds_completed_iterations() {
        let fx = fixture();
        let activity = Rc::new(FromToByActivity::new(
            fx.element.clone(),
            AnimatedProperty::RotationAngle,
            Some(PropertyValue::Number(0.0)),
            Some(PropertyValue::Number(90.0)),
            None,
            crate::properties::operator_set(PropertyKind::Number),
            crate::properties::interpolator(CalcMode::Linear, PropertyKind::Number).unwrap(),
            ActivityParams {
                duration: 1.0,
                repeats: 2.0,
                accelerate: 0.0,
                decelerate: 0.0,
                auto_reverse: false,
                accumulate: AccumulateMode::Sum,
                additive: AdditiveMode::Replace,
                end_event: None,
                timer_event_queue: fx.event_queue.clone(),
                timer: fx.timer.clone(),
            },
        ));
        fx.queue.add_activity(activity.clone());
        fx.queue.process();

        // Halfway into the second iteration: 90 * 0.5 + 1 * 90.
        fx.source.advance(1.5);
        fx.queue.process();
        assert_eq!(fx.element.rotation_angle(), 135.0);

        // At the very end both iterations resolve to 90 + 90.
        fx.source.advance(0.5);
        fx.queue.process();
        assert_eq!(fx.element.rotation_angle(), 180.0);
        assert!(!activity.is_active());
    }

    #[test]
    fn test_by_only_animation_starts_from_current_value() {
        let fx = fixture();
        fx.element.set_x(30.0);
        let activity = Rc::new(FromToByActivity::new(
            fx.element.clone(),
            AnimatedProperty::X,
            None,
            None,
            Some(PropertyValue::Number(20.0)),
            crate::properties::operator_set(PropertyKind::Number),
            crate::properties::interpolator(CalcMode::Linear, PropertyKind::Number).unwrap(),
            ActivityParams {
                duration: 1.0,
                repeats: 1.0,
                accelerate: 0.0,
                decelerate: 0.0,
                auto_reverse: false,
                accumulate: AccumulateMode::None,
                additive: AdditiveMode::Replace,
                end_event: None,
                timer_event_queue: fx.event_queue.clone(),
                timer: fx.timer.clone(),
            },
        ));
        fx.queue.add_activity(activity);
        fx.queue.process();
        fx.source.advance(1.0);
        fx.queue.process();
        assert_eq!(fx.element.x(), 50.0);
    }

    #[test]
    fn test_accelerated_time_warp_endpoints() {
        assert_eq!(accelerated_time(0.0, 0.3, 0.3), 0.0);
        assert!((accelerated_time(1.0, 0.3, 0.3) - 1.0).abs() < 1e-12);
        assert_eq!(accelerated_time(0.5, 0.0, 0.0), 0.5);
        // Acceleration makes the first half lag behind linear time.
        assert!(accelerated_time(0.25, 0.5, 0.0) < 0.25);
    }
}
