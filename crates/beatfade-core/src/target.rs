//! Identity of automatable parameters.
//!
//! A [`TargetKey`] names one parameter instance: the track it lives on
//! ([`DeviceKey`]) and the role the parameter plays on that track's device
//! ([`ParamRole`]). Keys are stable for the lifetime of the underlying device.

use std::fmt;

/// Kind of track a device lives on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TrackType {
    /// A regular audio/MIDI track.
    Primary,
    /// A return (send) track.
    Auxiliary,
}

impl TrackType {
    /// Short name used in logs and notifications.
    pub fn as_str(self) -> &'static str {
        match self {
            TrackType::Primary => "track",
            TrackType::Auxiliary => "return",
        }
    }
}

/// Identifies the device instance on one track.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceKey {
    pub track_type: TrackType,
    /// Absolute track index within its track type.
    pub index: u32,
}

impl DeviceKey {
    pub fn new(track_type: TrackType, index: u32) -> Self {
        Self { track_type, index }
    }

    pub fn primary(index: u32) -> Self {
        Self::new(TrackType::Primary, index)
    }

    pub fn auxiliary(index: u32) -> Self {
        Self::new(TrackType::Auxiliary, index)
    }

    /// Key for the given parameter role on this device.
    pub fn target(self, role: ParamRole) -> TargetKey {
        TargetKey { device: self, role }
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.track_type.as_str(), self.index)
    }
}

/// Role a parameter plays on its device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParamRole {
    /// Mixer volume of the track itself.
    TrackVolume,
    /// Dry/wet mix of an effect device.
    DryWet,
    /// Device on/off switch.
    DeviceOn,
    Repeat,
    /// Beat-repeat grid, quantized 0..=15 (1/256 bar .. 1 bar).
    Grid,
    Variation,
    Pitch,
    PitchDecay,
    Volume,
    Decay,
    FilterOn,
    FilterFreq,
    FilterWidth,
    MixType,
}

impl ParamRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ParamRole::TrackVolume => "volume",
            ParamRole::DryWet => "drywet",
            ParamRole::DeviceOn => "dev",
            ParamRole::Repeat => "repeat",
            ParamRole::Grid => "grid",
            ParamRole::Variation => "variat",
            ParamRole::Pitch => "pitch",
            ParamRole::PitchDecay => "pdecay",
            ParamRole::Volume => "devvolume",
            ParamRole::Decay => "decay",
            ParamRole::FilterOn => "filter",
            ParamRole::FilterFreq => "ffreq",
            ParamRole::FilterWidth => "fwidth",
            ParamRole::MixType => "mtype",
        }
    }
}

impl fmt::Display for ParamRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One automatable parameter instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetKey {
    pub device: DeviceKey,
    pub role: ParamRole,
}

impl TargetKey {
    pub fn new(track_type: TrackType, index: u32, role: ParamRole) -> Self {
        DeviceKey::new(track_type, index).target(role)
    }

    /// A sibling parameter on the same device.
    pub fn with_role(self, role: ParamRole) -> Self {
        self.device.target(role)
    }

    pub fn track_type(&self) -> TrackType {
        self.device.track_type
    }

    pub fn index(&self) -> u32 {
        self.device.index
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device, self.role)
    }
}
