//! Program step tables.
//!
//! Each [`ProgramKind`] owns an ordered table of [`StepDef`]s. A step is armed
//! by a bar/beat predicate relative to the bar the program was armed on, and
//! carries the parameter writes and side effects applied when it fires.
//!
//! Build-up program (grid length per beat, bars relative to the arm bar):
//!
//! ```text
//! Beat  | 1 | 2 | 3       | 4
//! ------+---+---+---------+----------------
//! Bar 1 | 1 | 2 | 3       | 4
//! Bar 2 | 1 | 2 | 3       | 4
//! Bar 3 | 1 | 2 | 1       | 2
//! Bar 4 | 1 | 1 | 1/2 1/2 | 1/4 1/4 1/4 1/4
//! ```

use crate::target::ParamRole;
use std::fmt;

/// Kinds of beat programs a device can run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProgramKind {
    /// Four-bar beat-repeat build-up ending in a drop.
    BuildUp,
    /// Launch the queued clips on beat 2 of the fourth bar.
    Next4,
    /// Launch the queued clips on beat 2 of the eighth bar.
    Next8,
}

impl ProgramKind {
    pub const ALL: [ProgramKind; 3] = [ProgramKind::BuildUp, ProgramKind::Next4, ProgramKind::Next8];

    pub fn as_str(self) -> &'static str {
        match self {
            ProgramKind::BuildUp => "buildup",
            ProgramKind::Next4 => "next4",
            ProgramKind::Next8 => "next8",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }

    /// The kind's step table, in step-index order.
    pub fn steps(self) -> &'static [StepDef] {
        match self {
            ProgramKind::BuildUp => BUILD_UP,
            ProgramKind::Next4 => NEXT_4,
            ProgramKind::Next8 => NEXT_8,
        }
    }

    pub fn step(self, index: u32) -> Option<&'static StepDef> {
        self.steps().iter().find(|s| s.index == index)
    }
}

impl fmt::Display for ProgramKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Side effect a step performs besides parameter writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepAction {
    /// Launch clips the user queued for the next scene change.
    FireQueuedClips,
    /// Light or darken the remote device toggle.
    ToggleDevice(bool),
}

/// One row of a program's step table.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepDef {
    pub name: &'static str,
    pub index: u32,
    /// Bars after the arm bar (0 = the arm bar itself).
    pub bar_offset: i64,
    /// 1-based beat within that bar.
    pub beat: u32,
    /// Delay after the beat edge, in beats.
    pub beat_delay: f64,
    pub writes: &'static [(ParamRole, f64)],
    pub actions: &'static [StepAction],
    /// Firing this step ends the program.
    pub completes: bool,
}

impl StepDef {
    /// Whether the step's predicate holds at this song position.
    pub fn is_due(&self, arm_bar: i64, bar: i64, beat: u32) -> bool {
        bar - arm_bar == self.bar_offset && beat == self.beat
    }
}

/// Steps whose predicates matched one beat edge.
#[derive(Debug, Default)]
pub struct PlannedBeat {
    pub steps: Vec<&'static StepDef>,
    /// The kind's last step has been planned; no further planning needed.
    pub final_step: bool,
}

/// Evaluate a kind's table at one beat edge.
///
/// No matching predicate is not an error: nothing is due yet.
pub fn plan_beat(kind: ProgramKind, arm_bar: i64, bar: i64, beat: u32) -> PlannedBeat {
    let table = kind.steps();
    let steps: Vec<&'static StepDef> = table
        .iter()
        .filter(|s| s.is_due(arm_bar, bar, beat))
        .collect();
    let final_step = table
        .last()
        .is_some_and(|last| steps.iter().any(|s| s.index == last.index));
    PlannedBeat { steps, final_step }
}

const BUILD_UP: &[StepDef] = &[
    StepDef {
        name: "4 beats",
        index: 1,
        bar_offset: 1,
        beat: 1,
        beat_delay: 0.0,
        writes: &[
            (ParamRole::DeviceOn, 1.0),
            (ParamRole::Repeat, 1.0),
            (ParamRole::FilterOn, 1.0),
            (ParamRole::Variation, 0.0),
            (ParamRole::Pitch, 0.0),
            (ParamRole::PitchDecay, 0.0),
            (ParamRole::Volume, 0.85),
            (ParamRole::Decay, 0.0),
            // "Ins" mix mode
            (ParamRole::MixType, 1.0),
            (ParamRole::Grid, 15.0),
            (ParamRole::FilterFreq, 0.6),
            (ParamRole::FilterWidth, 8.0),
        ],
        actions: &[StepAction::ToggleDevice(true)],
        completes: false,
    },
    StepDef {
        name: "2 beats",
        index: 2,
        bar_offset: 3,
        beat: 1,
        beat_delay: 0.0,
        writes: &[(ParamRole::Grid, 13.0), (ParamRole::FilterFreq, 0.70)],
        actions: &[],
        completes: false,
    },
    StepDef {
        name: "1 beat",
        index: 3,
        bar_offset: 4,
        beat: 1,
        beat_delay: 0.0,
        writes: &[(ParamRole::Grid, 11.0), (ParamRole::FilterFreq, 0.75)],
        actions: &[StepAction::FireQueuedClips],
        completes: false,
    },
    StepDef {
        name: "1/2 beat",
        index: 4,
        bar_offset: 4,
        beat: 3,
        beat_delay: 0.0,
        writes: &[(ParamRole::Grid, 9.0)],
        actions: &[],
        completes: false,
    },
    StepDef {
        name: "1/4 beat",
        index: 5,
        bar_offset: 4,
        beat: 3,
        beat_delay: 0.75,
        writes: &[(ParamRole::Grid, 7.0)],
        actions: &[],
        completes: false,
    },
    StepDef {
        name: "off",
        index: 6,
        bar_offset: 4,
        beat: 4,
        beat_delay: 0.70,
        writes: &[
            (ParamRole::DeviceOn, 0.0),
            (ParamRole::Repeat, 0.0),
            (ParamRole::FilterOn, 0.0),
        ],
        actions: &[StepAction::ToggleDevice(false)],
        completes: true,
    },
];

const NEXT_4: &[StepDef] = &[StepDef {
    name: "launch",
    index: 1,
    bar_offset: 4,
    beat: 2,
    beat_delay: 0.0,
    writes: &[],
    actions: &[StepAction::FireQueuedClips],
    completes: true,
}];

const NEXT_8: &[StepDef] = &[StepDef {
    name: "launch",
    index: 1,
    bar_offset: 8,
    beat: 2,
    beat_delay: 0.0,
    writes: &[],
    actions: &[StepAction::FireQueuedClips],
    completes: true,
}];
