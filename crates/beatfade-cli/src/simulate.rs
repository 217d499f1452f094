//! Simulated host session.
//!
//! Stands in for the live session: one track volume and one beat-repeat
//! device backed by in-memory parameters, a manual clock stepped by the
//! configured tick interval, and song-time notifications derived from the
//! tempo. Every outbound event is logged.

use crate::SimulateArgs;
use anyhow::{Context, Result};
use beatfade_core::{
    AutomationConfig, AutomationEvent, ClipQueue, DeviceKey, FadeDirection, ManualClock,
    MemoryParameter, ParamRole, Session, SessionHandle,
};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Outcome of a simulation run.
#[derive(Debug, Default, Clone)]
pub struct SimulationReport {
    /// Tempo the session actually runs at, after clamping.
    pub tempo: f64,
    pub ticks: u64,
    pub events: usize,
    pub steps_fired: Vec<&'static str>,
    pub fade_finished: bool,
    pub program_completed: bool,
    pub clips_fired: usize,
    pub final_volume: f64,
    pub final_grid: f64,
}

impl fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Simulation finished after {} ticks at {} BPM", self.ticks, self.tempo)?;
        writeln!(f, "  events:        {}", self.events)?;
        writeln!(f, "  fade finished: {}", self.fade_finished)?;
        writeln!(f, "  track volume:  {:.3}", self.final_volume)?;
        if !self.steps_fired.is_empty() {
            writeln!(f, "  steps fired:   {}", self.steps_fired.join(", "))?;
        }
        writeln!(f, "  program done:  {}", self.program_completed)?;
        writeln!(f, "  grid:          {:.0}", self.final_grid)?;
        write!(f, "  clips fired:   {}", self.clips_fired)
    }
}

/// Beat-repeat parameters: role, name, min, max, quantized.
const BEAT_REPEAT: &[(ParamRole, &str, f64, f64, bool)] = &[
    (ParamRole::DeviceOn, "Device On", 0.0, 1.0, true),
    (ParamRole::Repeat, "Repeat", 0.0, 1.0, true),
    (ParamRole::Grid, "Grid", 0.0, 15.0, true),
    (ParamRole::Variation, "Variation", 0.0, 10.0, false),
    (ParamRole::Pitch, "Pitch", 0.0, 48.0, true),
    (ParamRole::PitchDecay, "Pitch Decay", 0.0, 1.0, false),
    (ParamRole::Volume, "Volume", 0.0, 1.0, false),
    (ParamRole::Decay, "Decay", 0.0, 1.0, false),
    (ParamRole::FilterOn, "Filter On", 0.0, 1.0, true),
    (ParamRole::FilterFreq, "Filter Freq", 0.0, 1.0, false),
    (ParamRole::FilterWidth, "Filter Width", 0.5, 9.0, false),
    (ParamRole::MixType, "Mix Type", 0.0, 2.0, true),
];

/// Run a simulated session and report what happened.
pub fn run(args: &SimulateArgs, config: AutomationConfig) -> Result<SimulationReport> {
    if !(args.seconds.is_finite() && args.seconds > 0.0) {
        anyhow::bail!("--seconds must be positive, got {}", args.seconds);
    }

    let tick_seconds = config.tick_interval().as_secs_f64();
    let clock = ManualClock::new(0.0);

    let mut clips = ClipQueue::new(|slot| {
        log::info!("[HOST] Launch clip on track {} scene {}", slot.track, slot.scene);
    });
    clips.queue(0, 1);

    let handle = SessionHandle::new(Session::new(config, clock.clone()).with_clip_launcher(clips));
    handle
        .on_tempo_changed(args.tempo)
        .context("Invalid --tempo")?;

    let volume_target = DeviceKey::primary(0).target(ParamRole::TrackVolume);
    let volume = MemoryParameter::new("Track Volume", 0.0, 1.0);
    handle.register(volume_target, volume.clone());

    let repeat_device = DeviceKey::primary(1);
    let mut grid = None;
    for &(role, name, min, max, quantized) in BEAT_REPEAT {
        let param = if quantized {
            MemoryParameter::quantized(name, min, max)
        } else {
            MemoryParameter::new(name, min, max)
        };
        if role == ParamRole::Grid {
            grid = Some(param.clone());
        }
        handle.register(repeat_device.target(role), param);
    }

    let report = Rc::new(RefCell::new(SimulationReport::default()));
    let sink = Rc::clone(&report);
    handle.subscribe(move |event| {
        log::info!("[EVENT] {:?}", event);
        let mut report = sink.borrow_mut();
        report.events += 1;
        match event {
            AutomationEvent::FadeFinished { .. } => report.fade_finished = true,
            AutomationEvent::ProgramStepFired { step, .. } => report.steps_fired.push(*step),
            AutomationEvent::ProgramCompleted { .. } => report.program_completed = true,
            AutomationEvent::QueuedClipsFired { count } => report.clips_fired += *count,
            _ => {}
        }
    });

    handle.on_song_time_changed(0.0);
    if let Some(bars) = args.bars {
        handle
            .set_fade_bars(volume_target, bars)
            .context("Invalid --bars")?;
    }
    handle.start_fade_toward(volume_target, FadeDirection::Increase)?;
    if let Some(kind) = args.program {
        handle.arm_or_toggle_program(repeat_device.target(ParamRole::DeviceOn), kind);
    }

    let (tempo, seconds_per_beat) = handle
        .with_session_read(|s| (s.transport().bpm(), s.transport().seconds_per_beat()))
        .context("Session busy before the simulation started")?;
    let mut ticks = 0u64;
    loop {
        let now = clock.advance(tick_seconds);
        if now > args.seconds {
            break;
        }
        handle.on_song_time_changed(now / seconds_per_beat);
        handle.on_tick();
        ticks += 1;
    }

    let mut report = report.borrow().clone();
    report.tempo = tempo;
    report.ticks = ticks;
    report.final_volume = volume.get();
    report.final_grid = grid.map(|g| g.get()).unwrap_or_default();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use beatfade_core::ProgramKind;

    fn args(seconds: f64, bars: Option<f64>, program: Option<ProgramKind>) -> SimulateArgs {
        SimulateArgs {
            tempo: 120.0,
            seconds,
            bars,
            program,
            config: None,
        }
    }

    #[test]
    fn test_fade_reaches_ceiling() {
        let report = run(&args(3.0, Some(1.0), None), AutomationConfig::default()).unwrap();
        assert!(report.fade_finished);
        assert!((report.final_volume - 0.85).abs() < 1e-9);
        assert!(!report.program_completed);
    }

    #[test]
    fn test_next4_launches_queued_clip() {
        let report = run(
            &args(10.0, Some(1.0), Some(ProgramKind::Next4)),
            AutomationConfig::default(),
        )
        .unwrap();
        assert!(report.program_completed);
        assert_eq!(report.steps_fired, vec!["launch"]);
        assert_eq!(report.clips_fired, 1);
    }

    #[test]
    fn test_build_up_ends_on_quarter_beat_grid() {
        let report = run(
            &args(11.0, Some(1.0), Some(ProgramKind::BuildUp)),
            AutomationConfig::default(),
        )
        .unwrap();
        assert!(report.program_completed);
        assert_eq!(report.steps_fired.len(), 6);
        assert!((report.final_grid - 7.0).abs() < 1e-9);
        assert_eq!(report.clips_fired, 1);
    }

    #[test]
    fn test_song_time_follows_clamped_tempo() {
        // Short ticks so no beat edge is skipped at this tempo.
        let config = AutomationConfig {
            tick_interval_ms: 10,
            ..AutomationConfig::default()
        };
        let mut fast = args(1.2, Some(1.0), Some(ProgramKind::Next4));
        fast.tempo = 2000.0;
        let report = run(&fast, config.clone()).unwrap();
        assert!((report.tempo - 999.0).abs() < 1e-9);
        // Next 4 launches on song beat 17: about 1.02 s at 999 BPM, but
        // already at 0.51 s if song time ran at the requested 2000 BPM.
        assert!(report.program_completed);

        fast.seconds = 0.8;
        let report = run(&fast, config).unwrap();
        assert!(!report.program_completed);
    }

    #[test]
    fn test_rejects_bad_arguments() {
        assert!(run(&args(0.0, None, None), AutomationConfig::default()).is_err());
        assert!(run(&args(4.0, Some(-1.0), None), AutomationConfig::default()).is_err());
    }
}
