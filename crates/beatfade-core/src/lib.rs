//! beatfade core - Parameter fades and beat-quantized programs for control surfaces.
//!
//! This crate provides the automation engine a control-surface plugin runs
//! against a live session:
//!
//! - **Targets** - Keys for automatable device parameters and their registry
//! - **Fades** - Time-bounded linear moves of one parameter, advanced per tick
//! - **Programs** - Step tables locked to bars and beats (build-up, next 4/8)
//! - **Scheduler** - Beat-edge planner plus tick-driven executor
//! - **Events** - Closed set of outbound events and remote notifications
//! - **State** - The owned session and its shared handle
//!
//! # Architecture
//!
//! The host drives everything from one thread through two callbacks: a
//! periodic tick (about every 100 ms) and an irregular beat-changed event.
//! Beat edges only plan step deadlines; all parameter writes happen on ticks.
//! The [`Session`] owns every piece of state, and the [`SessionHandle`]
//! turns host re-entry during a write into a logged no-op.

pub mod clips;
pub mod config;
pub mod error;
pub mod events;
pub mod fade;
pub mod parameter;
pub mod registry;
pub mod scheduler;
pub mod state;
pub mod steps;
pub mod target;
pub mod timing;

pub use clips::{ClipLauncher, ClipQueue, ClipSlot, NoClips};
pub use config::AutomationConfig;
pub use error::{AutomationError, Result};
pub use events::{AutomationEvent, Control, EventBus, FadeDirection, Notification};
pub use fade::{FadeEngine, FadeState};
pub use parameter::{MemoryParameter, ParameterHandle, WriteRejected};
pub use registry::{BoxedParameter, TargetRegistry};
pub use scheduler::{ArmOutcome, ProgramPhase, ProgramScheduler, ProgramState, ScheduledStep};
pub use state::{Session, SessionHandle};
pub use steps::{ProgramKind, StepAction, StepDef};
pub use target::{DeviceKey, ParamRole, TargetKey, TrackType};
pub use timing::{
    Bars, Beats, ManualClock, SongPosition, SystemClock, TimeSignature, TransportState, WallClock,
    WallTime,
};
