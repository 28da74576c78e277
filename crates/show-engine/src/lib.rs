//! Slideshow animation timing and scheduling engine.
//!
//! This crate implements the animation core of a presentation client: a
//! timed, hierarchical animation state machine with skip and rewind
//! semantics, driven by a cooperative single-threaded scheduler.
//!
//! - **Timing**: Monotonic clocks with hold/release, frame pacing
//! - **Events**: One-shot delayed callbacks, a time-keyed event queue, an
//!   event multiplexer for named trigger classes
//! - **Activities**: In-progress property interpolations advanced per tick
//! - **Nodes**: The parallel/sequential timing-container state machine
//! - **Handler**: The per-slide orchestrator exposing effect navigation
//!   (`next_effect`, skip, rewind, slide transitions)
//!
//! # Architecture
//!
//! ```text
//! SlideShowHandler
//!   ├── TimerEventQueue   (time-keyed one-shot callbacks)
//!   ├── ActivityQueue     (running property interpolations)
//!   ├── EventMultiplexer  (named trigger registration/notification)
//!   └── animation tree    (Par/Seq containers over Animate/Set leaves)
//!         └── AnimatedElement (transform/opacity/visibility state the
//!                              renderer polls each frame)
//! ```
//!
//! Everything is single-threaded: "waiting" is always an event queued for a
//! later `update()` tick, never a blocked thread.

pub mod activity;
pub mod builder;
pub mod context;
pub mod element;
pub mod events;
pub mod handler;
pub mod nodes;
pub mod properties;
pub mod timing;
pub mod transform;

pub use activity::{Activity, ActivityQueue};
pub use builder::build_tree;
pub use context::SlideShowContext;
pub use element::{AnimatedElement, Rect};
pub use events::{
    DelayEvent, EventMultiplexer, EventRef, ListenerHandle, NextEffectEventArray, NotifierId,
    TimerEventQueue, make_delay, make_event,
};
pub use handler::{InteractiveAnimationSequence, SlideDescriptor, SlideShowHandler};
pub use nodes::{AnimationNode, NodeRef, NodeState};
pub use properties::{interpolator, operator_set};
pub use timing::{ElapsedTime, FrameSynchronization, ManualTimeSource, SystemTimeSource, TimeSource};
pub use transform::Transform2D;
