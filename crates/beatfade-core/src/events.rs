//! Outbound automation events.
//!
//! Every observable effect of the engines is reported as an
//! [`AutomationEvent`]. Subscribers are registered explicitly on an
//! [`EventBus`] when the plugin is composed; there is no name-based fan-out.
//!
//! - [`AutomationEvent`] - Closed set of domain events
//! - [`Notification`] - Flat `(target, control, value)` view for remote surfaces
//! - [`EventBus`] - Ordered delivery to subscribers, safe against re-entry

use crate::steps::ProgramKind;
use crate::target::TargetKey;
use std::cell::RefCell;
use std::collections::VecDeque;

/// Direction of a fade, used to light the matching remote toggle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FadeDirection {
    Increase,
    Decrease,
}

impl FadeDirection {
    /// Direction implied by moving from `start` to `end`.
    pub fn between(start: f64, end: f64) -> Self {
        if end < start {
            FadeDirection::Decrease
        } else {
            FadeDirection::Increase
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            FadeDirection::Increase => FadeDirection::Decrease,
            FadeDirection::Decrease => FadeDirection::Increase,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FadeDirection::Increase => "incr",
            FadeDirection::Decrease => "decr",
        }
    }
}

/// Something the engines want the remote surface to know.
///
/// Every `value` except [`AutomationEvent::FadeArmed`]'s is the normalized
/// control value the remote fader shows, not the raw parameter value.
#[derive(Clone, Debug, PartialEq)]
pub enum AutomationEvent {
    /// A fade started; `value` is the end value it heads for.
    FadeArmed {
        target: TargetKey,
        direction: FadeDirection,
        value: f64,
    },
    /// Throttled progress of a running fade.
    FadeProgress { target: TargetKey, value: f64 },
    /// The fade reached its end value and was retired.
    FadeFinished { target: TargetKey, value: f64 },
    /// The fade was cancelled; `value` is where the parameter stood at that moment.
    FadeStopped { target: TargetKey, value: f64 },
    ProgramArmed { target: TargetKey, kind: ProgramKind },
    ProgramCancelled { target: TargetKey, kind: ProgramKind },
    ProgramStepFired {
        target: TargetKey,
        kind: ProgramKind,
        step: &'static str,
    },
    ProgramCompleted { target: TargetKey, kind: ProgramKind },
    /// A program step switched the device on or off.
    DeviceToggled { target: TargetKey, on: bool },
    /// Queued clips were launched and the queue cleared.
    QueuedClipsFired { count: usize },
    /// An operation referenced an unknown target; force its control off.
    ControlReset { target: TargetKey },
}

/// Remote control an event addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Control {
    /// The parameter fader itself.
    Parameter,
    /// The increase/decrease fade toggle.
    FadeToggle(FadeDirection),
    /// The program toggle of one kind.
    ProgramToggle(ProgramKind),
    DeviceToggle,
}

/// Flat `(target, control, value)` notification.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Notification {
    pub target: TargetKey,
    pub control: Control,
    pub value: f64,
}

impl AutomationEvent {
    pub fn target(&self) -> Option<TargetKey> {
        match self {
            AutomationEvent::FadeArmed { target, .. }
            | AutomationEvent::FadeProgress { target, .. }
            | AutomationEvent::FadeFinished { target, .. }
            | AutomationEvent::FadeStopped { target, .. }
            | AutomationEvent::ProgramArmed { target, .. }
            | AutomationEvent::ProgramCancelled { target, .. }
            | AutomationEvent::ProgramStepFired { target, .. }
            | AutomationEvent::ProgramCompleted { target, .. }
            | AutomationEvent::DeviceToggled { target, .. }
            | AutomationEvent::ControlReset { target } => Some(*target),
            AutomationEvent::QueuedClipsFired { .. } => None,
        }
    }

    /// Remote-surface notifications this event translates into.
    ///
    /// Fade endings switch both direction toggles off, mirroring how the
    /// remote shows "no fade running".
    pub fn notifications(&self) -> Vec<Notification> {
        let n = |target, control, value| Notification {
            target,
            control,
            value,
        };
        let both_toggles_off = |target: TargetKey| {
            vec![
                n(target, Control::FadeToggle(FadeDirection::Increase), 0.0),
                n(target, Control::FadeToggle(FadeDirection::Decrease), 0.0),
            ]
        };
        match *self {
            AutomationEvent::FadeArmed {
                target, direction, ..
            } => vec![
                n(target, Control::FadeToggle(direction), 1.0),
                n(target, Control::FadeToggle(direction.opposite()), 0.0),
            ],
            AutomationEvent::FadeProgress { target, value } => {
                vec![n(target, Control::Parameter, value)]
            }
            AutomationEvent::FadeFinished { target, value }
            | AutomationEvent::FadeStopped { target, value } => {
                let mut out = vec![n(target, Control::Parameter, value)];
                out.extend(both_toggles_off(target));
                out
            }
            AutomationEvent::ProgramArmed { target, kind } => {
                vec![n(target, Control::ProgramToggle(kind), 1.0)]
            }
            AutomationEvent::ProgramCancelled { target, kind }
            | AutomationEvent::ProgramCompleted { target, kind } => {
                vec![n(target, Control::ProgramToggle(kind), 0.0)]
            }
            AutomationEvent::DeviceToggled { target, on } => {
                vec![n(target, Control::DeviceToggle, if on { 1.0 } else { 0.0 })]
            }
            AutomationEvent::ControlReset { target } => {
                let mut out = vec![n(target, Control::Parameter, 0.0)];
                out.extend(both_toggles_off(target));
                out
            }
            AutomationEvent::ProgramStepFired { .. } | AutomationEvent::QueuedClipsFired { .. } => {
                Vec::new()
            }
        }
    }
}

type Subscriber = Box<dyn FnMut(&AutomationEvent)>;

/// Ordered event delivery to explicitly registered subscribers.
///
/// Events published while a dispatch is already running (a subscriber
/// publishing in turn) are queued and delivered by the outer loop, so
/// delivery order always matches publish order.
#[derive(Default)]
pub struct EventBus {
    subscribers: RefCell<Vec<Subscriber>>,
    pending: RefCell<VecDeque<AutomationEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, subscriber: impl FnMut(&AutomationEvent) + 'static) {
        match self.subscribers.try_borrow_mut() {
            Ok(mut subs) => subs.push(Box::new(subscriber)),
            Err(_) => log::warn!("[EVENTS] subscribe during dispatch ignored"),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.try_borrow().map(|s| s.len()).unwrap_or(0)
    }

    pub fn publish<I>(&self, events: I)
    where
        I: IntoIterator<Item = AutomationEvent>,
    {
        self.pending.borrow_mut().extend(events);

        let Ok(mut subscribers) = self.subscribers.try_borrow_mut() else {
            // Already dispatching further up the stack; it will drain the queue.
            return;
        };

        loop {
            let next = self.pending.borrow_mut().pop_front();
            let Some(event) = next else { break };
            for subscriber in subscribers.iter_mut() {
                subscriber(&event);
            }
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}
