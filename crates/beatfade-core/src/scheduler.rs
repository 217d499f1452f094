//! Beat-quantized program scheduler.
//!
//! Programs are split into two halves driven by different host callbacks:
//!
//! - the **planner** ([`ProgramScheduler::plan`]) runs on every beat edge and
//!   only computes wall-clock deadlines for steps whose predicates matched;
//! - the **executor** ([`ProgramScheduler::execute`]) runs on every tick and
//!   applies steps whose deadline has passed.
//!
//! Hosts ignore or reject parameter writes made from inside their beat
//! callbacks, which is why nothing is written while planning.

use crate::clips::ClipLauncher;
use crate::events::AutomationEvent;
use crate::parameter::write_constrained;
use crate::registry::TargetRegistry;
use crate::steps::{plan_beat, ProgramKind, StepAction, StepDef};
use crate::target::{DeviceKey, ParamRole, TargetKey};
use crate::timing::{SongPosition, TransportState, WallTime};
use crate::error::Result;

/// A step with a computed deadline, waiting for the executor.
#[derive(Clone, Debug, PartialEq)]
pub struct ScheduledStep {
    pub name: &'static str,
    pub deadline: WallTime,
    pub step_index: u32,
}

/// Lifecycle of an active program.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProgramPhase {
    /// Waiting for its first step predicate to match.
    Armed,
    /// At least one step has been planned.
    Executing,
}

/// Runtime state for one armed program.
#[derive(Clone, Debug)]
pub struct ProgramState {
    pub target: TargetKey,
    pub kind: ProgramKind,
    pub arm_bar: i64,
    pub arm_beat: u32,
    pub arm_time: WallTime,
    pub phase: ProgramPhase,
    /// The kind's last step has been planned; the planner skips this program.
    pub planning_done: bool,
    /// Pending steps, ordered by deadline then step index.
    remaining_steps: Vec<ScheduledStep>,
}

impl ProgramState {
    fn new(target: TargetKey, kind: ProgramKind, position: SongPosition, now: WallTime) -> Self {
        Self {
            target,
            kind,
            arm_bar: position.bar,
            arm_beat: position.beat,
            arm_time: now,
            phase: ProgramPhase::Armed,
            planning_done: false,
            remaining_steps: Vec::new(),
        }
    }

    /// Schedule a step, replacing any pending step with the same name.
    pub fn schedule(&mut self, name: &'static str, deadline: WallTime, step_index: u32) {
        self.remaining_steps.retain(|s| s.name != name);
        self.remaining_steps.push(ScheduledStep {
            name,
            deadline,
            step_index,
        });
        self.remaining_steps.sort_by(|a, b| {
            a.deadline
                .total_cmp(&b.deadline)
                .then(a.step_index.cmp(&b.step_index))
        });
        self.phase = ProgramPhase::Executing;
    }

    pub fn remaining_steps(&self) -> &[ScheduledStep] {
        &self.remaining_steps
    }

    fn next_due(&self, now: WallTime) -> Option<&ScheduledStep> {
        self.remaining_steps.first().filter(|s| s.deadline <= now)
    }
}

/// What [`ProgramScheduler::arm_or_toggle`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArmOutcome {
    Armed,
    /// The same kind was already active and has been cancelled.
    Cancelled,
    /// A program of another kind was cancelled and this one armed.
    Replaced(ProgramKind),
    UnknownTarget,
}

/// Owns the active-programs set.
#[derive(Debug, Default)]
pub struct ProgramScheduler {
    programs: Vec<ProgramState>,
}

impl ProgramScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `kind` on `target`, or cancel it if that kind is already active.
    ///
    /// The arm bar/beat come from the last song position the host reported.
    pub fn arm_or_toggle(
        &mut self,
        registry: &TargetRegistry,
        transport: &TransportState,
        events: &mut Vec<AutomationEvent>,
        target: TargetKey,
        kind: ProgramKind,
        now: WallTime,
    ) -> ArmOutcome {
        if !registry.contains(target) {
            log::warn!("[PROGRAM] Unknown target {}, resetting its controls", target);
            events.push(AutomationEvent::ControlReset { target });
            return ArmOutcome::UnknownTarget;
        }

        let mut replaced = None;
        if let Some(existing) = self.get(target).map(|p| p.kind) {
            self.disarm(events, target);
            if existing == kind {
                return ArmOutcome::Cancelled;
            }
            replaced = Some(existing);
        }

        let position = transport.position();
        log::info!(
            "[PROGRAM] Armed '{}' on {} at bar {}, beat {}",
            kind,
            target,
            position.bar,
            position.beat
        );
        self.programs
            .push(ProgramState::new(target, kind, position, now));
        events.push(AutomationEvent::ProgramArmed { target, kind });

        match replaced {
            Some(old) => ArmOutcome::Replaced(old),
            None => ArmOutcome::Armed,
        }
    }

    /// Cancel the program on `target`, dropping its pending steps.
    ///
    /// Disarming a target without a program is a no-op.
    pub fn disarm(&mut self, events: &mut Vec<AutomationEvent>, target: TargetKey) -> bool {
        let Some(pos) = self.programs.iter().position(|p| p.target == target) else {
            return false;
        };
        let program = self.programs.remove(pos);
        log::info!(
            "[PROGRAM] Cancelled '{}' on {} ({} steps pending)",
            program.kind,
            target,
            program.remaining_steps.len()
        );
        events.push(AutomationEvent::ProgramCancelled {
            target,
            kind: program.kind,
        });
        true
    }

    /// Cancel any program whose target lives on `device`.
    pub fn disarm_device(&mut self, events: &mut Vec<AutomationEvent>, device: DeviceKey) -> usize {
        let targets: Vec<TargetKey> = self
            .programs
            .iter()
            .filter(|p| p.target.device == device)
            .map(|p| p.target)
            .collect();
        targets
            .into_iter()
            .filter(|t| self.disarm(events, *t))
            .count()
    }

    /// Planner: schedule steps whose predicates match this beat edge.
    ///
    /// Steps are due at `now`, or `now` plus their sub-beat delay at the
    /// current tempo. Re-planning a step by name overwrites its deadline.
    pub fn plan(&mut self, transport: &TransportState, position: SongPosition, now: WallTime) {
        let seconds_per_beat = transport.seconds_per_beat();
        for program in self.programs.iter_mut().filter(|p| !p.planning_done) {
            let planned = plan_beat(program.kind, program.arm_bar, position.bar, position.beat);
            for step in planned.steps {
                let deadline = now + step.beat_delay * seconds_per_beat;
                log::debug!(
                    "[PROGRAM] '{}' on {}: step '{}' due at {:.3}",
                    program.kind,
                    program.target,
                    step.name,
                    deadline
                );
                program.schedule(step.name, deadline, step.index);
            }
            if planned.final_step {
                program.planning_done = true;
            }
        }
    }

    /// Executor: apply every step whose deadline has passed.
    ///
    /// Steps fire in deadline order, ties broken by step index. A rejected
    /// write leaves the step pending for the next tick.
    pub fn execute(
        &mut self,
        registry: &mut TargetRegistry,
        clips: &mut dyn ClipLauncher,
        events: &mut Vec<AutomationEvent>,
        now: WallTime,
    ) {
        let mut retired: Vec<TargetKey> = Vec::new();

        for program in &mut self.programs {
            let target = program.target;
            if !registry.contains(target) {
                log::warn!("[PROGRAM] Target {} vanished, dropping '{}'", target, program.kind);
                events.push(AutomationEvent::ControlReset { target });
                retired.push(target);
                continue;
            }

            let mut completed = false;
            while let Some(step) = program.next_due(now).cloned() {
                let Some(def) = program.kind.step(step.step_index) else {
                    program.remaining_steps.remove(0);
                    continue;
                };
                match apply_step(registry, clips, events, target, def) {
                    Ok(()) => {
                        program.remaining_steps.remove(0);
                        log::debug!(
                            "[PROGRAM] '{}' on {}: fired '{}' at {:.3} (due {:.3})",
                            program.kind,
                            target,
                            step.name,
                            now,
                            step.deadline
                        );
                        events.push(AutomationEvent::ProgramStepFired {
                            target,
                            kind: program.kind,
                            step: step.name,
                        });
                        if def.completes {
                            completed = true;
                            break;
                        }
                    }
                    Err(err) => {
                        log::warn!("[PROGRAM] {}; step '{}' retried next tick", err, step.name);
                        break;
                    }
                }
            }

            if completed || (program.planning_done && program.remaining_steps.is_empty()) {
                log::info!("[PROGRAM] '{}' on {} completed", program.kind, target);
                events.push(AutomationEvent::ProgramCompleted {
                    target,
                    kind: program.kind,
                });
                retired.push(target);
            }
        }

        if !retired.is_empty() {
            self.programs.retain(|p| !retired.contains(&p.target));
        }
    }

    pub fn get(&self, target: TargetKey) -> Option<&ProgramState> {
        self.programs.iter().find(|p| p.target == target)
    }

    pub fn get_mut(&mut self, target: TargetKey) -> Option<&mut ProgramState> {
        self.programs.iter_mut().find(|p| p.target == target)
    }

    pub fn is_active(&self, target: TargetKey) -> bool {
        self.get(target).is_some()
    }

    /// Program active on any parameter of `device`.
    pub fn on_device(&self, device: DeviceKey) -> Option<&ProgramState> {
        self.programs.iter().find(|p| p.target.device == device)
    }

    pub fn active_count(&self) -> usize {
        self.programs.len()
    }

    pub fn is_idle(&self) -> bool {
        self.programs.is_empty()
    }

    pub fn targets(&self) -> Vec<TargetKey> {
        self.programs.iter().map(|p| p.target).collect()
    }
}

/// Apply one step's writes, then its side effects.
///
/// Side effects run only once every write went through, so a retried step
/// never launches clips twice. Roles the device lacks are skipped.
fn apply_step(
    registry: &mut TargetRegistry,
    clips: &mut dyn ClipLauncher,
    events: &mut Vec<AutomationEvent>,
    target: TargetKey,
    def: &StepDef,
) -> Result<()> {
    for &(role, value) in def.writes {
        let param = target.with_role(role);
        match registry.lookup_mut(param) {
            Some(handle) => {
                write_constrained(param, handle, value)?;
            }
            None => log::trace!("[PROGRAM] {} has no '{}' parameter", target.device, role),
        }
    }

    for action in def.actions {
        match *action {
            StepAction::FireQueuedClips => {
                let count = clips.fire_queued_clips();
                events.push(AutomationEvent::QueuedClipsFired { count });
            }
            StepAction::ToggleDevice(on) => {
                events.push(AutomationEvent::DeviceToggled {
                    target: target.with_role(ParamRole::DeviceOn),
                    on,
                });
            }
        }
    }
    Ok(())
}
