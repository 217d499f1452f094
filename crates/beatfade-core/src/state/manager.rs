//! Shared handle to the session.
//!
//! The [`SessionHandle`] is what the plugin wires into host callbacks. The
//! host runs everything on one thread, but a parameter write can make it call
//! straight back into the plugin before the current call returns. The handle
//! borrows the session exclusively for each call; a call arriving while that
//! borrow is held is dropped and logged.

use std::cell::RefCell;
use std::rc::Rc;

use super::session::Session;
use crate::error::Result;
use crate::events::{AutomationEvent, EventBus, FadeDirection, Notification};
use crate::parameter::ParameterHandle;
use crate::registry::BoxedParameter;
use crate::scheduler::ArmOutcome;
use crate::steps::ProgramKind;
use crate::target::TargetKey;

/// Cloneable, single-threaded handle to a [`Session`] and its subscribers.
#[derive(Clone)]
pub struct SessionHandle {
    session: Rc<RefCell<Session>>,
    bus: Rc<EventBus>,
}

impl SessionHandle {
    pub fn new(session: Session) -> Self {
        Self {
            session: Rc::new(RefCell::new(session)),
            bus: Rc::new(EventBus::new()),
        }
    }

    /// Run `f` with exclusive access to the session, then dispatch the
    /// events it produced.
    ///
    /// Returns `None` when the session is already borrowed further up the
    /// stack. Subscribers run after the borrow is released, so they may call
    /// back into the handle.
    fn with_session<F, R>(&self, op: &str, f: F) -> Option<R>
    where
        F: FnOnce(&mut Session) -> R,
    {
        let (result, events) = {
            let Ok(mut session) = self.session.try_borrow_mut() else {
                log::trace!("[SESSION] Re-entrant {} ignored", op);
                return None;
            };
            let result = f(&mut session);
            (result, session.take_events())
        };
        if !events.is_empty() {
            self.bus.publish(events);
        }
        Some(result)
    }

    /// Read the session with a closure. `None` while a call is in progress.
    pub fn with_session_read<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&Session) -> R,
    {
        self.session.try_borrow().ok().map(|s| f(&s))
    }

    /// Subscribe to every domain event.
    pub fn subscribe(&self, subscriber: impl FnMut(&AutomationEvent) + 'static) {
        self.bus.subscribe(subscriber);
    }

    /// Subscribe to the flat remote-surface notifications.
    pub fn subscribe_notifications(&self, mut subscriber: impl FnMut(&Notification) + 'static) {
        self.bus.subscribe(move |event| {
            for note in event.notifications() {
                subscriber(&note);
            }
        });
    }

    pub fn register(&self, target: TargetKey, handle: impl ParameterHandle + 'static) {
        self.with_session("register", |s| s.register(target, Box::new(handle)));
    }

    pub fn unregister(&self, target: TargetKey) -> bool {
        self.with_session("unregister", |s| s.unregister(target))
            .unwrap_or(false)
    }

    pub fn rebuild_targets<I>(&self, entries: I) -> Vec<TargetKey>
    where
        I: IntoIterator<Item = (TargetKey, BoxedParameter)>,
    {
        self.with_session("rebuild_targets", |s| s.rebuild_targets(entries))
            .unwrap_or_default()
    }

    pub fn reset(&self) {
        self.with_session("reset", |s| s.reset());
    }

    pub fn start_fade(&self, target: TargetKey, duration_bars: f64, end_value: f64) -> Result<()> {
        self.with_session("start_fade", |s| s.start_fade(target, duration_bars, end_value))
            .unwrap_or(Ok(()))
    }

    pub fn start_fade_toward(&self, target: TargetKey, direction: FadeDirection) -> Result<()> {
        self.with_session("start_fade_toward", |s| s.start_fade_toward(target, direction))
            .unwrap_or(Ok(()))
    }

    pub fn cancel_fade(&self, target: TargetKey) -> bool {
        self.with_session("cancel_fade", |s| s.cancel_fade(target))
            .unwrap_or(false)
    }

    pub fn set_fade_bars(&self, target: TargetKey, bars: f64) -> Result<()> {
        self.with_session("set_fade_bars", |s| s.set_fade_bars(target, bars))
            .unwrap_or(Ok(()))
    }

    pub fn arm_or_toggle_program(&self, target: TargetKey, kind: ProgramKind) -> Option<ArmOutcome> {
        self.with_session("arm_or_toggle_program", |s| s.arm_or_toggle_program(target, kind))
    }

    pub fn disarm_program(&self, target: TargetKey) -> bool {
        self.with_session("disarm_program", |s| s.disarm_program(target))
            .unwrap_or(false)
    }

    pub fn on_tick(&self) {
        self.with_session("on_tick", |s| s.on_tick());
    }

    pub fn on_beat_changed(&self, song_time: f64, bar: i64, beat: u32) {
        self.with_session("on_beat_changed", |s| s.on_beat_changed(song_time, bar, beat));
    }

    pub fn on_song_time_changed(&self, song_time: f64) {
        self.with_session("on_song_time_changed", |s| s.on_song_time_changed(song_time));
    }

    pub fn on_tempo_changed(&self, bpm: f64) -> Result<()> {
        self.with_session("on_tempo_changed", |s| s.on_tempo_changed(bpm))
            .unwrap_or(Ok(()))
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AutomationConfig;
    use crate::events::Control;
    use crate::parameter::MemoryParameter;
    use crate::target::{DeviceKey, ParamRole};
    use crate::timing::ManualClock;

    fn handle() -> (SessionHandle, ManualClock) {
        let clock = ManualClock::new(0.0);
        let session = Session::new(AutomationConfig::default(), clock.clone());
        (SessionHandle::new(session), clock)
    }

    fn volume() -> TargetKey {
        DeviceKey::primary(0).target(ParamRole::TrackVolume)
    }

    #[test]
    fn test_reentrant_tick_is_a_no_op() {
        let (handle, clock) = handle();
        let param = MemoryParameter::new("Volume", 0.0, 1.0);
        handle.register(volume(), param.clone());

        let inner = handle.clone();
        param.on_write(move |_| inner.on_tick());

        handle.start_fade(volume(), 1.0, 1.0).unwrap();
        clock.set(0.5);
        handle.on_tick();
        assert_eq!(param.write_count(), 1);
        assert!((param.get() - 0.25).abs() < 1e-9);

        clock.set(1.0);
        handle.on_tick();
        assert_eq!(param.write_count(), 2);
        assert!((param.get() - 0.5).abs() < 1e-9);
        let active = handle
            .with_session_read(|s| s.fades().active_count())
            .unwrap();
        assert_eq!(active, 1);
    }

    #[test]
    fn test_subscriber_may_call_back() {
        let (handle, clock) = handle();
        let param = MemoryParameter::new("Volume", 0.0, 1.0);
        handle.register(volume(), param.clone());

        // Bounce: fade back down once the fade up finishes.
        let inner = handle.clone();
        handle.subscribe(move |event| {
            if let AutomationEvent::FadeFinished { target, value } = event {
                if *value > 0.5 {
                    inner.start_fade(*target, 1.0, 0.0).unwrap();
                }
            }
        });

        handle.start_fade(volume(), 1.0, 1.0).unwrap();
        clock.set(2.5);
        handle.on_tick();
        let fade = handle
            .with_session_read(|s| s.fades().get(volume()).cloned())
            .unwrap()
            .unwrap();
        assert!(fade.end_value.abs() < 1e-9);
        assert!((fade.start_value - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_notifications_track_fade_toggles() {
        let (handle, clock) = handle();
        handle.register(volume(), MemoryParameter::new("Volume", 0.0, 1.0));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        handle.subscribe_notifications(move |note| sink.borrow_mut().push(*note));

        handle.start_fade(volume(), 1.0, 1.0).unwrap();
        clock.set(0.5);
        handle.on_tick();
        handle.cancel_fade(volume());
        handle.cancel_fade(volume());

        let seen = seen.borrow();
        assert_eq!(seen[0].control, Control::FadeToggle(FadeDirection::Increase));
        assert!((seen[0].value - 1.0).abs() < 1e-9);
        let last = seen.iter().rev().find(|n| n.control == Control::Parameter).unwrap();
        assert!((last.value - 0.25).abs() < 1e-9);
        assert_eq!(seen.len(), 5);
    }

    #[test]
    fn test_program_toggle_through_handle() {
        let (handle, _clock) = handle();
        let on = DeviceKey::auxiliary(0).target(ParamRole::DeviceOn);
        handle.register(on, MemoryParameter::quantized("Device On", 0.0, 1.0));

        assert_eq!(
            handle.arm_or_toggle_program(on, ProgramKind::BuildUp),
            Some(ArmOutcome::Armed)
        );
        assert_eq!(
            handle.arm_or_toggle_program(on, ProgramKind::BuildUp),
            Some(ArmOutcome::Cancelled)
        );
        assert!(!handle.disarm_program(on));
    }
}
