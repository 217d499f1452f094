//! Linear fade engine.
//!
//! A fade moves one parameter linearly from its current value to an end value
//! over a whole number of bars. The engine keeps the active fades in a `Vec`
//! and advances all of them once per tick. Parameter writes happen on every
//! tick; outbound progress events are throttled to every Nth tick.

use crate::error::{AutomationError, Result};
use crate::events::{AutomationEvent, FadeDirection};
use crate::parameter::{constrain, write_constrained};
use crate::registry::TargetRegistry;
use crate::target::{DeviceKey, TargetKey};
use crate::timing::{Bars, TransportState, WallTime};

/// Runtime state for one active fade.
#[derive(Clone, Debug, PartialEq)]
pub struct FadeState {
    pub target: TargetKey,
    pub start_time: WallTime,
    pub end_time: WallTime,
    pub start_value: f64,
    pub end_value: f64,
    /// Value change per second: `(end - start) / (end_time - start_time)`.
    pub slope: f64,
    /// Engine tick on which progress was last reported.
    pub last_notify_tick: u64,
}

impl FadeState {
    fn new(
        target: TargetKey,
        now: WallTime,
        duration: f64,
        start_value: f64,
        end_value: f64,
        tick: u64,
    ) -> Self {
        Self {
            target,
            start_time: now,
            end_time: now + duration,
            start_value,
            end_value,
            slope: (end_value - start_value) / duration,
            last_notify_tick: tick,
        }
    }

    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    pub fn direction(&self) -> FadeDirection {
        FadeDirection::between(self.start_value, self.end_value)
    }

    /// Interpolated value at `now` and whether the fade is over.
    ///
    /// The fade is over once wall time passes `end_time` or the interpolated
    /// value crosses the end value in the direction of travel. The returned
    /// value never leaves the `[start, end]` span.
    pub fn sample(&self, now: WallTime) -> (f64, bool) {
        if self.start_value == self.end_value {
            return (self.end_value, true);
        }

        let candidate = self.start_value + self.slope * (now - self.start_time);
        let crossed = if self.slope < 0.0 {
            candidate < self.end_value
        } else {
            candidate > self.end_value
        };
        if now > self.end_time || crossed {
            return (self.end_value, true);
        }

        let lo = self.start_value.min(self.end_value);
        let hi = self.start_value.max(self.end_value);
        (candidate.clamp(lo, hi), false)
    }
}

/// Owns the active-fades set.
#[derive(Debug)]
pub struct FadeEngine {
    fades: Vec<FadeState>,
    tick: u64,
    progress_every_ticks: u64,
    min_duration: f64,
}

impl Default for FadeEngine {
    fn default() -> Self {
        Self::new(5, 0.05)
    }
}

impl FadeEngine {
    /// `progress_every_ticks` is clamped to at least 1 and `min_duration`
    /// to a small positive value so the slope is always defined.
    pub fn new(progress_every_ticks: u32, min_duration: f64) -> Self {
        Self {
            fades: Vec::new(),
            tick: 0,
            progress_every_ticks: progress_every_ticks.max(1) as u64,
            min_duration: if min_duration > 0.0 { min_duration } else { 1e-3 },
        }
    }

    /// Start (or restart) a fade on `target`.
    ///
    /// Returns `Ok(false)` when the target is unknown; a corrective
    /// [`AutomationEvent::ControlReset`] is emitted instead of failing.
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        &mut self,
        registry: &TargetRegistry,
        transport: &TransportState,
        events: &mut Vec<AutomationEvent>,
        target: TargetKey,
        duration_bars: f64,
        end_value: f64,
        now: WallTime,
    ) -> Result<bool> {
        if !duration_bars.is_finite() || duration_bars <= 0.0 {
            return Err(AutomationError::InvalidDuration {
                bars: duration_bars,
            });
        }

        let Some(handle) = registry.lookup(target) else {
            log::warn!("[FADE] Unknown target {}, resetting its controls", target);
            events.push(AutomationEvent::ControlReset { target });
            return Ok(false);
        };

        let start_value = handle.value();
        let end_value = constrain(handle, end_value);
        let duration = transport
            .bars_to_seconds(Bars(duration_bars))
            .max(self.min_duration);
        let fade = FadeState::new(target, now, duration, start_value, end_value, self.tick);

        log::info!(
            "[FADE] Starting fade on {} from {:.3} to {:.3} over {} bars ({:.2}s)",
            target,
            start_value,
            end_value,
            duration_bars,
            duration
        );
        events.push(AutomationEvent::FadeArmed {
            target,
            direction: fade.direction(),
            value: end_value,
        });

        self.fades.retain(|f| f.target != target);
        self.fades.push(fade);
        Ok(true)
    }

    /// Recompute an active fade from the parameter's current value with a
    /// new length, keeping its end value. Returns false if no fade is active.
    pub fn restart(
        &mut self,
        registry: &TargetRegistry,
        transport: &TransportState,
        target: TargetKey,
        duration_bars: f64,
        now: WallTime,
    ) -> Result<bool> {
        if !duration_bars.is_finite() || duration_bars <= 0.0 {
            return Err(AutomationError::InvalidDuration {
                bars: duration_bars,
            });
        }
        let Some(value) = registry.value(target) else {
            return Ok(false);
        };
        let duration = transport
            .bars_to_seconds(Bars(duration_bars))
            .max(self.min_duration);
        let tick = self.tick;
        let Some(fade) = self.fades.iter_mut().find(|f| f.target == target) else {
            return Ok(false);
        };
        *fade = FadeState::new(target, now, duration, value, fade.end_value, tick);
        log::debug!("[FADE] Re-timed fade on {} to {:.2}s", target, duration);
        Ok(true)
    }

    /// Cancel the fade on `target`, if any.
    ///
    /// Emits a stopped event carrying the parameter's value at this moment,
    /// normalized for the remote control. Cancelling a target without a
    /// fade is a no-op.
    pub fn cancel(
        &mut self,
        registry: &TargetRegistry,
        events: &mut Vec<AutomationEvent>,
        target: TargetKey,
    ) -> bool {
        let Some(pos) = self.fades.iter().position(|f| f.target == target) else {
            return false;
        };
        self.fades.remove(pos);
        let (raw, value) = match registry.lookup(target) {
            Some(handle) => (handle.value(), handle.to_normalized(handle.value())),
            None => (0.0, 0.0),
        };
        log::info!("[FADE] Stopped fade on {} at {:.3}", target, raw);
        events.push(AutomationEvent::FadeStopped { target, value });
        true
    }

    /// Cancel every fade on any parameter of `device`.
    pub fn cancel_device(
        &mut self,
        registry: &TargetRegistry,
        events: &mut Vec<AutomationEvent>,
        device: DeviceKey,
    ) -> usize {
        let targets: Vec<TargetKey> = self
            .fades
            .iter()
            .filter(|f| f.target.device == device)
            .map(|f| f.target)
            .collect();
        targets
            .into_iter()
            .filter(|t| self.cancel(registry, events, *t))
            .count()
    }

    /// Advance every active fade to `now`.
    ///
    /// A rejected write leaves the fade untouched so it is retried on the
    /// next tick.
    pub fn advance(
        &mut self,
        registry: &mut TargetRegistry,
        events: &mut Vec<AutomationEvent>,
        now: WallTime,
    ) {
        self.tick += 1;
        if self.fades.is_empty() {
            return;
        }

        let tick = self.tick;
        let every = self.progress_every_ticks;
        let mut retired: Vec<TargetKey> = Vec::new();

        for fade in &mut self.fades {
            let target = fade.target;
            let Some(handle) = registry.lookup_mut(target) else {
                log::warn!("[FADE] Target {} vanished mid-fade, dropping it", target);
                events.push(AutomationEvent::ControlReset { target });
                retired.push(target);
                continue;
            };

            let (value, done) = fade.sample(now);
            match write_constrained(target, handle, value) {
                Ok(written) if done => {
                    log::info!("[FADE] Fade on {} finished at {:.3}", target, written);
                    events.push(AutomationEvent::FadeFinished {
                        target,
                        value: handle.to_normalized(written),
                    });
                    retired.push(target);
                }
                Ok(written) => {
                    if tick - fade.last_notify_tick >= every {
                        fade.last_notify_tick = tick;
                        events.push(AutomationEvent::FadeProgress {
                            target,
                            value: handle.to_normalized(written),
                        });
                    }
                }
                Err(err) => {
                    log::warn!("[FADE] {}; retrying next tick", err);
                }
            }
        }

        if !retired.is_empty() {
            self.fades.retain(|f| !retired.contains(&f.target));
        }
    }

    pub fn get(&self, target: TargetKey) -> Option<&FadeState> {
        self.fades.iter().find(|f| f.target == target)
    }

    pub fn is_active(&self, target: TargetKey) -> bool {
        self.get(target).is_some()
    }

    pub fn active_count(&self) -> usize {
        self.fades.len()
    }

    pub fn is_idle(&self) -> bool {
        self.fades.is_empty()
    }

    pub fn targets(&self) -> Vec<TargetKey> {
        self.fades.iter().map(|f| f.target).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Control;
    use crate::parameter::MemoryParameter;
    use crate::target::ParamRole;

    fn setup(start: f64) -> (TargetRegistry, MemoryParameter, TargetKey) {
        let target = DeviceKey::primary(0).target(ParamRole::TrackVolume);
        let param = MemoryParameter::new("Volume", 0.0, 1.0).with_value(start);
        let mut registry = TargetRegistry::new();
        registry.register(target, Box::new(param.clone()));
        (registry, param, target)
    }

    #[test]
    fn test_one_bar_fade_at_120_bpm() {
        let (mut registry, param, target) = setup(0.0);
        let transport = TransportState::default();
        let mut engine = FadeEngine::default();
        let mut events = Vec::new();

        assert!(engine
            .start(&registry, &transport, &mut events, target, 1.0, 1.0, 0.0)
            .unwrap());
        let fade = engine.get(target).unwrap();
        assert!((fade.slope - 0.5).abs() < 1e-9);
        assert!((fade.duration() - 2.0).abs() < 1e-9);

        engine.advance(&mut registry, &mut events, 1.0);
        assert!((param.get() - 0.5).abs() < 1e-9);
        assert!(engine.is_active(target));

        engine.advance(&mut registry, &mut events, 2.1);
        assert!((param.get() - 1.0).abs() < 1e-9);
        assert!(!engine.is_active(target));
        assert!(engine.is_idle());
        assert!(matches!(
            events.last(),
            Some(AutomationEvent::FadeFinished { value, .. }) if (*value - 1.0).abs() < 1e-9
        ));
    }

    #[test]
    fn test_samples_are_monotonic_and_bounded() {
        for (a, b) in [(0.2, 0.9), (0.9, 0.1)] {
            let (mut registry, param, target) = setup(a);
            let transport = TransportState::default();
            let mut engine = FadeEngine::default();
            let mut events = Vec::new();
            engine
                .start(&registry, &transport, &mut events, target, 2.0, b, 10.0)
                .unwrap();

            let (lo, hi) = (f64::min(a, b), f64::max(a, b));
            let mut previous = a;
            // Jittery ticks, spanning past the 4 second fade.
            let mut now = 10.0;
            for step in 0..60 {
                now += if step % 3 == 0 { 0.13 } else { 0.08 };
                engine.advance(&mut registry, &mut events, now);
                let v = param.get();
                assert!(v >= lo - 1e-12 && v <= hi + 1e-12, "{v} outside [{lo}, {hi}]");
                if b > a {
                    assert!(v >= previous - 1e-12);
                } else {
                    assert!(v <= previous + 1e-12);
                }
                previous = v;
            }
            assert!((param.get() - b).abs() < 1e-12);
            assert!(engine.is_idle());
        }
    }

    #[test]
    fn test_equal_start_and_end_completes_on_first_tick() {
        let (mut registry, _param, target) = setup(0.4);
        let transport = TransportState::default();
        let mut engine = FadeEngine::default();
        let mut events = Vec::new();
        engine
            .start(&registry, &transport, &mut events, target, 8.0, 0.4, 0.0)
            .unwrap();
        engine.advance(&mut registry, &mut events, 0.1);
        assert!(engine.is_idle());
    }

    #[test]
    fn test_invalid_duration_is_rejected() {
        let (registry, _param, target) = setup(0.0);
        let transport = TransportState::default();
        let mut engine = FadeEngine::default();
        let mut events = Vec::new();
        for bars in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let err = engine
                .start(&registry, &transport, &mut events, target, bars, 1.0, 0.0)
                .unwrap_err();
            assert!(matches!(err, AutomationError::InvalidDuration { .. }));
        }
        assert!(engine.is_idle());
        assert!(events.is_empty());
    }

    #[test]
    fn test_unknown_target_resets_control() {
        let registry = TargetRegistry::new();
        let transport = TransportState::default();
        let mut engine = FadeEngine::default();
        let mut events = Vec::new();
        let target = DeviceKey::auxiliary(7).target(ParamRole::DryWet);
        assert!(!engine
            .start(&registry, &transport, &mut events, target, 1.0, 1.0, 0.0)
            .unwrap());
        assert_eq!(events, vec![AutomationEvent::ControlReset { target }]);
        assert!(engine.is_idle());
    }

    #[test]
    fn test_second_start_replaces_first() {
        let (registry, _param, target) = setup(0.0);
        let transport = TransportState::default();
        let mut engine = FadeEngine::default();
        let mut events = Vec::new();
        engine
            .start(&registry, &transport, &mut events, target, 1.0, 1.0, 0.0)
            .unwrap();
        engine
            .start(&registry, &transport, &mut events, target, 4.0, 0.5, 0.5)
            .unwrap();

        assert_eq!(engine.active_count(), 1);
        let fade = engine.get(target).unwrap();
        assert!((fade.end_value - 0.5).abs() < 1e-9);
        assert!((fade.start_time - 0.5).abs() < 1e-9);
        assert!((fade.duration() - 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_cancel_reports_live_value_and_is_idempotent() {
        let (mut registry, _param, target) = setup(0.0);
        let transport = TransportState::default();
        let mut engine = FadeEngine::default();
        let mut events = Vec::new();
        engine
            .start(&registry, &transport, &mut events, target, 1.0, 1.0, 0.0)
            .unwrap();
        engine.advance(&mut registry, &mut events, 0.5);
        events.clear();

        assert!(engine.cancel(&registry, &mut events, target));
        assert!(!engine.cancel(&registry, &mut events, target));
        assert_eq!(
            events,
            vec![AutomationEvent::FadeStopped {
                target,
                value: 0.25
            }]
        );
        assert!(engine.is_idle());
    }

    #[test]
    fn test_progress_is_throttled_but_writes_are_not() {
        let (mut registry, param, target) = setup(0.0);
        let transport = TransportState::default();
        let mut engine = FadeEngine::new(5, 0.05);
        let mut events = Vec::new();
        // 16 bars at 120 BPM: 32 seconds, plenty of ticks.
        engine
            .start(&registry, &transport, &mut events, target, 16.0, 1.0, 0.0)
            .unwrap();
        events.clear();

        for i in 1..=10 {
            engine.advance(&mut registry, &mut events, i as f64 * 0.1);
        }
        assert_eq!(param.write_count(), 10);
        let progress = events
            .iter()
            .filter(|e| matches!(e, AutomationEvent::FadeProgress { .. }))
            .count();
        assert_eq!(progress, 2);
    }

    #[test]
    fn test_rejected_write_is_retried() {
        let (mut registry, param, target) = setup(0.0);
        let transport = TransportState::default();
        let mut engine = FadeEngine::default();
        let mut events = Vec::new();
        engine
            .start(&registry, &transport, &mut events, target, 1.0, 1.0, 0.0)
            .unwrap();

        param.reject_writes(true);
        engine.advance(&mut registry, &mut events, 2.5);
        assert!(engine.is_active(target));
        assert!(param.get().abs() < 1e-9);

        param.reject_writes(false);
        engine.advance(&mut registry, &mut events, 2.6);
        assert!(engine.is_idle());
        assert!((param.get() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_parameter_values_are_normalized() {
        let target = DeviceKey::auxiliary(1).target(ParamRole::FilterWidth);
        let param = MemoryParameter::new("Width", 0.0, 10.0);
        let mut registry = TargetRegistry::new();
        registry.register(target, Box::new(param.clone()));
        let transport = TransportState::default();
        let mut engine = FadeEngine::default();
        let mut events = Vec::new();

        engine
            .start(&registry, &transport, &mut events, target, 1.0, 10.0, 0.0)
            .unwrap();
        for i in 1..=25 {
            engine.advance(&mut registry, &mut events, i as f64 * 0.1);
        }
        assert!((param.get() - 10.0).abs() < 1e-9);

        engine
            .start(&registry, &transport, &mut events, target, 1.0, 0.0, 3.0)
            .unwrap();
        engine.advance(&mut registry, &mut events, 3.5);
        engine.cancel(&registry, &mut events, target);
        assert!((param.get() - 7.5).abs() < 1e-9);

        let controls: Vec<f64> = events
            .iter()
            .flat_map(|e| e.notifications())
            .filter(|n| n.control == Control::Parameter)
            .map(|n| n.value)
            .collect();
        assert!(!controls.is_empty());
        assert!(controls.iter().all(|v| (0.0..=1.0).contains(v)), "{controls:?}");
        assert!(events.contains(&AutomationEvent::FadeFinished { target, value: 1.0 }));
        assert!(events.contains(&AutomationEvent::FadeStopped { target, value: 0.75 }));
    }

    #[test]
    fn test_restart_keeps_end_value() {
        let (mut registry, _param, target) = setup(0.0);
        let transport = TransportState::default();
        let mut engine = FadeEngine::default();
        let mut events = Vec::new();
        engine
            .start(&registry, &transport, &mut events, target, 1.0, 1.0, 0.0)
            .unwrap();
        engine.advance(&mut registry, &mut events, 1.0);

        assert!(engine.restart(&registry, &transport, target, 2.0, 1.0).unwrap());
        let fade = engine.get(target).unwrap();
        assert!((fade.start_value - 0.5).abs() < 1e-9);
        assert!((fade.end_value - 1.0).abs() < 1e-9);
        assert!((fade.duration() - 4.0).abs() < 1e-9);
    }
}
