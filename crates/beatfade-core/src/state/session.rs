//! The automation session.
//!
//! [`Session`] owns the target registry, both engines, the transport view and
//! the configuration. Every plugin-facing operation is a method taking
//! `&mut self`, so one sweep holds the registry exclusively and cannot be
//! re-entered. Events produced by an operation accumulate in an outbox
//! drained with [`Session::take_events`].

use std::collections::{HashMap, HashSet};

use crate::clips::{ClipLauncher, NoClips};
use crate::config::AutomationConfig;
use crate::error::{AutomationError, Result};
use crate::events::{AutomationEvent, FadeDirection};
use crate::fade::FadeEngine;
use crate::registry::{BoxedParameter, TargetRegistry};
use crate::scheduler::{ArmOutcome, ProgramScheduler};
use crate::steps::ProgramKind;
use crate::target::{ParamRole, TargetKey};
use crate::timing::{SongPosition, TransportState, WallClock, WallTime};

/// Owned automation context for one plugin instance.
pub struct Session {
    registry: TargetRegistry,
    fades: FadeEngine,
    programs: ProgramScheduler,
    transport: TransportState,
    clock: Box<dyn WallClock>,
    clips: Box<dyn ClipLauncher>,
    config: AutomationConfig,
    /// Per-target fade length in bars, set from the remote.
    fade_bars: HashMap<TargetKey, f64>,
    last_beat: Option<i64>,
    outbox: Vec<AutomationEvent>,
}

impl Session {
    pub fn new(config: AutomationConfig, clock: impl WallClock + 'static) -> Self {
        let transport = TransportState::new(config.initial_tempo, config.time_signature());
        Self {
            registry: TargetRegistry::new(),
            fades: FadeEngine::new(config.progress_every_ticks, config.min_fade_seconds),
            programs: ProgramScheduler::new(),
            transport,
            clock: Box::new(clock),
            clips: Box::new(NoClips),
            config,
            fade_bars: HashMap::new(),
            last_beat: None,
            outbox: Vec::new(),
        }
    }

    /// Use `launcher` for steps that fire queued clips.
    pub fn with_clip_launcher(mut self, launcher: impl ClipLauncher + 'static) -> Self {
        self.clips = Box::new(launcher);
        self
    }

    pub fn now(&self) -> WallTime {
        self.clock.now()
    }

    // ------------------------------------------------------------------
    // Registry
    // ------------------------------------------------------------------

    /// Register a parameter. Replacing a handle keeps any automation running.
    pub fn register(&mut self, target: TargetKey, handle: BoxedParameter) {
        self.registry.register(target, handle);
    }

    /// Remove a parameter, cancelling whatever automation it had first.
    pub fn unregister(&mut self, target: TargetKey) -> bool {
        self.cancel_all_on(target);
        self.fade_bars.remove(&target);
        self.registry.unregister(target).is_some()
    }

    /// Replace the registry after the host's device graph changed.
    ///
    /// Automation on targets that are gone is cancelled while their handles
    /// can still be read. Returns the removed keys.
    pub fn rebuild_targets<I>(&mut self, entries: I) -> Vec<TargetKey>
    where
        I: IntoIterator<Item = (TargetKey, BoxedParameter)>,
    {
        let entries: Vec<(TargetKey, BoxedParameter)> = entries.into_iter().collect();
        let keep: HashSet<TargetKey> = entries.iter().map(|(key, _)| *key).collect();

        let mut stale: Vec<TargetKey> = self
            .fades
            .targets()
            .into_iter()
            .chain(self.programs.targets())
            .filter(|key| !keep.contains(key))
            .collect();
        stale.sort();
        stale.dedup();
        for target in stale {
            self.cancel_all_on(target);
        }

        let removed = self.registry.rebuild(entries);
        for target in &removed {
            self.fade_bars.remove(target);
        }
        removed
    }

    /// Cancel every fade and program, e.g. when the remote disconnects.
    pub fn reset(&mut self) {
        let mut targets = self.fades.targets();
        targets.extend(self.programs.targets());
        for target in targets {
            self.cancel_all_on(target);
        }
        self.last_beat = None;
        log::info!("[SESSION] Reset");
    }

    /// Unknown targets get their remote controls forced off instead of
    /// an error. Returns true when `target` is unknown.
    fn reset_if_unknown(&mut self, target: TargetKey) -> bool {
        if self.registry.contains(target) {
            return false;
        }
        log::warn!("[SESSION] Unknown target {}, resetting its controls", target);
        self.outbox.push(AutomationEvent::ControlReset { target });
        true
    }

    fn cancel_all_on(&mut self, target: TargetKey) {
        self.fades.cancel(&self.registry, &mut self.outbox, target);
        self.programs.disarm(&mut self.outbox, target);
    }

    // ------------------------------------------------------------------
    // Fades
    // ------------------------------------------------------------------

    /// Start a fade on `target` toward `end_value` over `duration_bars`.
    ///
    /// A program running on the same device is cancelled first.
    pub fn start_fade(&mut self, target: TargetKey, duration_bars: f64, end_value: f64) -> Result<()> {
        if !duration_bars.is_finite() || duration_bars <= 0.0 {
            return Err(AutomationError::InvalidDuration {
                bars: duration_bars,
            });
        }
        if self.registry.contains(target) {
            if let Some(program) = self.programs.on_device(target.device).map(|p| p.target) {
                log::debug!("[SESSION] Fade on {} replaces program on {}", target, program);
                self.programs.disarm(&mut self.outbox, program);
            }
        }
        let now = self.clock.now();
        self.fades.start(
            &self.registry,
            &self.transport,
            &mut self.outbox,
            target,
            duration_bars,
            end_value,
            now,
        )?;
        Ok(())
    }

    /// Start a fade toward the bottom or top of the target's range, using
    /// the target's configured length.
    ///
    /// Increasing a track volume stops at the configured ceiling (0 dB)
    /// rather than the fader's maximum.
    pub fn start_fade_toward(&mut self, target: TargetKey, direction: FadeDirection) -> Result<()> {
        if self.reset_if_unknown(target) {
            return Ok(());
        }
        let Some(handle) = self.registry.lookup(target) else {
            return Ok(());
        };
        let end_value = match direction {
            FadeDirection::Decrease => handle.min(),
            FadeDirection::Increase if target.role == ParamRole::TrackVolume => {
                self.config.fade_up_ceiling.min(handle.max())
            }
            FadeDirection::Increase => handle.max(),
        };
        let bars = self.fade_bars(target);
        self.start_fade(target, bars, end_value)
    }

    pub fn cancel_fade(&mut self, target: TargetKey) -> bool {
        if self.reset_if_unknown(target) {
            return false;
        }
        self.fades.cancel(&self.registry, &mut self.outbox, target)
    }

    /// Fade length configured for `target`, in bars.
    pub fn fade_bars(&self, target: TargetKey) -> f64 {
        self.fade_bars
            .get(&target)
            .copied()
            .unwrap_or(self.config.default_fade_bars)
    }

    /// Set the fade length for `target`; a running fade is re-timed from
    /// the parameter's current value.
    pub fn set_fade_bars(&mut self, target: TargetKey, bars: f64) -> Result<()> {
        if !bars.is_finite() || bars <= 0.0 {
            return Err(AutomationError::InvalidDuration { bars });
        }
        if self.reset_if_unknown(target) {
            return Ok(());
        }
        self.fade_bars.insert(target, bars);
        let now = self.clock.now();
        self.fades
            .restart(&self.registry, &self.transport, target, bars, now)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Programs
    // ------------------------------------------------------------------

    /// Arm `kind` on `target`, or cancel it if it is already running.
    ///
    /// Arming cancels fades on every parameter of the same device.
    pub fn arm_or_toggle_program(&mut self, target: TargetKey, kind: ProgramKind) -> ArmOutcome {
        let toggling_off = self.programs.get(target).is_some_and(|p| p.kind == kind);
        if !toggling_off && self.registry.contains(target) {
            self.fades
                .cancel_device(&self.registry, &mut self.outbox, target.device);
        }
        let now = self.clock.now();
        self.programs.arm_or_toggle(
            &self.registry,
            &self.transport,
            &mut self.outbox,
            target,
            kind,
            now,
        )
    }

    pub fn disarm_program(&mut self, target: TargetKey) -> bool {
        if self.reset_if_unknown(target) {
            return false;
        }
        self.programs.disarm(&mut self.outbox, target)
    }

    // ------------------------------------------------------------------
    // Clock source
    // ------------------------------------------------------------------

    /// Periodic tick: fire due program steps, then advance fades.
    pub fn on_tick(&mut self) {
        let now = self.clock.now();
        self.programs
            .execute(&mut self.registry, self.clips.as_mut(), &mut self.outbox, now);
        self.fades.advance(&mut self.registry, &mut self.outbox, now);
    }

    /// Beat edge reported by the host: plan program steps. Nothing is
    /// written to parameters here.
    pub fn on_beat_changed(&mut self, song_time: f64, bar: i64, beat: u32) {
        let position = SongPosition::new(song_time, bar, beat);
        self.transport.set_position(position);
        self.last_beat = Some(position.whole_beat());
        let now = self.clock.now();
        self.programs.plan(&self.transport, position, now);
    }

    /// Song-time notification; forwards to [`Session::on_beat_changed`]
    /// only when the whole beat changed.
    pub fn on_song_time_changed(&mut self, song_time: f64) {
        let position = SongPosition::from_song_time(song_time, self.transport.time_signature());
        if self.last_beat == Some(position.whole_beat()) {
            return;
        }
        self.on_beat_changed(position.song_time, position.bar, position.beat);
    }

    /// Tempo change. Running fades keep their timing; only later
    /// computations use the new tempo.
    pub fn on_tempo_changed(&mut self, bpm: f64) -> Result<()> {
        if let Err(err) = self.transport.set_bpm(bpm) {
            log::warn!("[SESSION] {}; keeping {} BPM", err, self.transport.bpm());
            return Err(err);
        }
        log::debug!("[SESSION] Tempo {} BPM", bpm);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Drain the events produced since the last call.
    pub fn take_events(&mut self) -> Vec<AutomationEvent> {
        std::mem::take(&mut self.outbox)
    }

    pub fn registry(&self) -> &TargetRegistry {
        &self.registry
    }

    pub fn fades(&self) -> &FadeEngine {
        &self.fades
    }

    pub fn programs(&self) -> &ProgramScheduler {
        &self.programs
    }

    pub fn transport(&self) -> &TransportState {
        &self.transport
    }

    pub fn config(&self) -> &AutomationConfig {
        &self.config
    }

    pub fn is_idle(&self) -> bool {
        self.fades.is_idle() && self.programs.is_idle()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("registry", &self.registry)
            .field("fades", &self.fades.active_count())
            .field("programs", &self.programs.active_count())
            .field("bpm", &self.transport.bpm())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameter::MemoryParameter;
    use crate::target::DeviceKey;
    use crate::timing::ManualClock;

    fn session() -> (Session, ManualClock) {
        let clock = ManualClock::new(0.0);
        let session = Session::new(AutomationConfig::default(), clock.clone());
        (session, clock)
    }

    fn volume(index: u32) -> TargetKey {
        DeviceKey::primary(index).target(ParamRole::TrackVolume)
    }

    fn stopped_count(events: &[AutomationEvent], target: TargetKey) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, AutomationEvent::FadeStopped { target: t, .. } if *t == target))
            .count()
    }

    #[test]
    fn test_fade_at_120_bpm() {
        let (mut s, clock) = session();
        let param = MemoryParameter::new("Volume", 0.0, 1.0);
        s.register(volume(0), Box::new(param.clone()));

        s.start_fade(volume(0), 1.0, 1.0).unwrap();
        clock.set(1.0);
        s.on_tick();
        assert!((param.get() - 0.5).abs() < 1e-9);

        clock.set(2.1);
        s.on_tick();
        assert!((param.get() - 1.0).abs() < 1e-9);
        assert!(!s.fades().is_active(volume(0)));
    }

    #[test]
    fn test_unregister_mid_fade_stops_once() {
        let (mut s, clock) = session();
        let param = MemoryParameter::new("Volume", 0.0, 1.0);
        s.register(volume(1), Box::new(param.clone()));
        s.start_fade(volume(1), 1.0, 1.0).unwrap();
        clock.set(0.5);
        s.on_tick();
        s.take_events();

        assert!(s.unregister(volume(1)));
        assert!(!s.unregister(volume(1)));
        clock.set(1.0);
        s.on_tick();

        let events = s.take_events();
        assert_eq!(stopped_count(&events, volume(1)), 1);
        assert!(s.is_idle());
        assert!(s.registry().is_empty());
    }

    #[test]
    fn test_tempo_change_does_not_retime_running_fade() {
        let (mut s, clock) = session();
        let param = MemoryParameter::new("Volume", 0.0, 1.0);
        s.register(volume(0), Box::new(param.clone()));
        s.start_fade(volume(0), 1.0, 1.0).unwrap();

        s.on_tempo_changed(60.0).unwrap();
        clock.set(1.0);
        s.on_tick();
        assert!((param.get() - 0.5).abs() < 1e-9);

        assert!(s.on_tempo_changed(0.0).is_err());
        assert!((s.transport().bpm() - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_start_fade_toward_uses_ceiling_and_bars() {
        let (mut s, clock) = session();
        let vol = MemoryParameter::new("Volume", 0.0, 1.0);
        s.register(volume(0), Box::new(vol.clone()));

        s.set_fade_bars(volume(0), 2.0).unwrap();
        s.start_fade_toward(volume(0), FadeDirection::Increase).unwrap();
        let fade = s.fades().get(volume(0)).unwrap();
        assert!((fade.end_value - 0.85).abs() < 1e-9);
        assert!((fade.duration() - 4.0).abs() < 1e-9);

        clock.set(10.0);
        s.on_tick();
        assert!((vol.get() - 0.85).abs() < 1e-9);

        s.start_fade_toward(volume(0), FadeDirection::Decrease).unwrap();
        assert!(s.fades().get(volume(0)).unwrap().end_value.abs() < 1e-9);
        assert!(matches!(
            s.set_fade_bars(volume(0), 0.0),
            Err(AutomationError::InvalidDuration { .. })
        ));
    }

    #[test]
    fn test_set_fade_bars_retimes_active_fade() {
        let (mut s, clock) = session();
        let vol = MemoryParameter::new("Volume", 0.0, 1.0);
        s.register(volume(0), Box::new(vol.clone()));
        s.start_fade(volume(0), 1.0, 1.0).unwrap();
        clock.set(1.0);
        s.on_tick();

        s.set_fade_bars(volume(0), 2.0).unwrap();
        let fade = s.fades().get(volume(0)).unwrap();
        assert!((fade.start_value - 0.5).abs() < 1e-9);
        assert!((fade.end_time - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_target_is_not_an_error() {
        let (mut s, _clock) = session();
        s.start_fade(volume(7), 1.0, 1.0).unwrap();
        s.start_fade_toward(volume(7), FadeDirection::Increase).unwrap();
        assert_eq!(
            s.arm_or_toggle_program(volume(7), ProgramKind::Next4),
            ArmOutcome::UnknownTarget
        );
        assert!(!s.cancel_fade(volume(7)));
        assert!(!s.disarm_program(volume(7)));
        s.set_fade_bars(volume(7), 2.0).unwrap();
        let events = s.take_events();
        assert_eq!(events.len(), 6);
        assert!(events
            .iter()
            .all(|e| *e == AutomationEvent::ControlReset { target: volume(7) }));
        assert!((s.fade_bars(volume(7)) - s.config().default_fade_bars).abs() < 1e-9);
    }

    #[test]
    fn test_fade_and_program_exclude_each_other() {
        let (mut s, _clock) = session();
        let device = DeviceKey::auxiliary(0);
        let on = device.target(ParamRole::DeviceOn);
        let freq = device.target(ParamRole::FilterFreq);
        s.register(on, Box::new(MemoryParameter::quantized("Device On", 0.0, 1.0)));
        s.register(freq, Box::new(MemoryParameter::new("Freq", 0.0, 1.0)));

        s.start_fade(freq, 4.0, 1.0).unwrap();
        s.arm_or_toggle_program(on, ProgramKind::BuildUp);
        assert!(!s.fades().is_active(freq));
        assert!(s.programs().is_active(on));

        s.start_fade(freq, 4.0, 0.0).unwrap();
        assert!(s.fades().is_active(freq));
        assert!(s.programs().is_idle());

        let events = s.take_events();
        assert!(events.contains(&AutomationEvent::ProgramCancelled {
            target: on,
            kind: ProgramKind::BuildUp
        }));
        assert_eq!(stopped_count(&events, freq), 1);
    }

    #[test]
    fn test_song_time_dedupes_beats() {
        let (mut s, clock) = session();
        let device = DeviceKey::primary(3);
        let on = device.target(ParamRole::DeviceOn);
        let grid = MemoryParameter::quantized("Grid", 0.0, 15.0);
        s.register(on, Box::new(MemoryParameter::quantized("Device On", 0.0, 1.0)));
        s.register(device.target(ParamRole::Grid), Box::new(grid.clone()));

        s.on_song_time_changed(0.2);
        s.arm_or_toggle_program(on, ProgramKind::BuildUp);
        assert_eq!(s.programs().get(on).unwrap().arm_bar, 1);

        // Bar 2, beat 1 arrives many times within the same beat.
        for t in [4.0, 4.3, 4.6, 4.9] {
            clock.advance(0.1);
            s.on_song_time_changed(t);
        }
        assert_eq!(s.programs().get(on).unwrap().remaining_steps().len(), 1);
        let planned_at = s.programs().get(on).unwrap().remaining_steps()[0].deadline;
        assert!((planned_at - 0.1).abs() < 1e-9);

        s.on_tick();
        assert!((grid.get() - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_rebuild_cancels_vanished_targets() {
        let (mut s, _clock) = session();
        let kept = MemoryParameter::new("Volume", 0.0, 1.0);
        s.register(volume(0), Box::new(kept.clone()));
        s.register(volume(1), Box::new(MemoryParameter::new("Volume", 0.0, 1.0)));
        s.start_fade(volume(0), 1.0, 1.0).unwrap();
        s.start_fade(volume(1), 1.0, 1.0).unwrap();
        s.take_events();

        let removed = s.rebuild_targets(vec![(volume(0), Box::new(kept) as BoxedParameter)]);
        assert_eq!(removed, vec![volume(1)]);
        assert!(s.fades().is_active(volume(0)));
        assert!(!s.fades().is_active(volume(1)));
        assert_eq!(stopped_count(&s.take_events(), volume(1)), 1);
    }

    #[test]
    fn test_reset_cancels_everything() {
        let (mut s, _clock) = session();
        let on = DeviceKey::auxiliary(1).target(ParamRole::DeviceOn);
        s.register(volume(0), Box::new(MemoryParameter::new("Volume", 0.0, 1.0)));
        s.register(on, Box::new(MemoryParameter::quantized("Device On", 0.0, 1.0)));
        s.start_fade(volume(0), 1.0, 1.0).unwrap();
        s.arm_or_toggle_program(on, ProgramKind::Next8);

        s.reset();
        assert!(s.is_idle());
        s.reset();
        let events = s.take_events();
        assert_eq!(stopped_count(&events, volume(0)), 1);
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, AutomationEvent::ProgramCancelled { .. }))
                .count(),
            1
        );
    }
}
