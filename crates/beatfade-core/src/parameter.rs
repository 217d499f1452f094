//! Host parameter access.
//!
//! The host owns every numeric control; the engines only read bounds and
//! read/write the value through a [`ParameterHandle`]. [`MemoryParameter`] is
//! an in-process implementation used by tests and the simulated host.

use crate::error::{AutomationError, Result};
use crate::target::TargetKey;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Reason a host refused a parameter write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteRejected(pub String);

impl fmt::Display for WriteRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to a host-owned numeric control.
pub trait ParameterHandle {
    /// Display name reported by the host.
    fn name(&self) -> &str;

    fn value(&self) -> f64;

    /// Write a new value. Callers clamp to `[min, max]` first.
    fn set_value(&mut self, value: f64) -> std::result::Result<(), WriteRejected>;

    fn min(&self) -> f64;

    fn max(&self) -> f64;

    /// Discrete (stepped) rather than continuous.
    fn is_quantized(&self) -> bool;

    /// Map a parameter value to the 0..1 range of a remote control.
    ///
    /// Quantized values pass through unchanged.
    fn to_normalized(&self, value: f64) -> f64 {
        let span = self.max() - self.min();
        if self.is_quantized() || span <= f64::EPSILON {
            value
        } else {
            (value - self.min()) / span
        }
    }

    /// Inverse of [`ParameterHandle::to_normalized`].
    fn from_normalized(&self, control: f64) -> f64 {
        if self.is_quantized() {
            control
        } else {
            control * (self.max() - self.min()) + self.min()
        }
    }
}

/// Clamp `value` into the parameter's range, rounding quantized parameters.
pub fn constrain(handle: &dyn ParameterHandle, value: f64) -> f64 {
    let (lo, hi) = (handle.min(), handle.max());
    let value = if lo <= hi { value.clamp(lo, hi) } else { value };
    if handle.is_quantized() {
        value.round()
    } else {
        value
    }
}

/// Constrain and write a value, returning what was written.
pub fn write_constrained(
    target: TargetKey,
    handle: &mut dyn ParameterHandle,
    value: f64,
) -> Result<f64> {
    let value = constrain(handle, value);
    handle
        .set_value(value)
        .map_err(|rejected| AutomationError::HostWriteRejected {
            target,
            reason: rejected.0,
        })?;
    Ok(value)
}

type WriteListener = Box<dyn FnMut(f64)>;

struct MemoryParameterInner {
    value: f64,
    min: f64,
    max: f64,
    quantized: bool,
    reject_writes: bool,
    writes: usize,
    on_write: Option<WriteListener>,
}

/// In-memory parameter standing in for a host control.
///
/// Clones share state, so a test can register one copy and inspect the
/// other. A write listener mimics the host firing a value-changed
/// notification synchronously from inside the write.
#[derive(Clone)]
pub struct MemoryParameter {
    name: Rc<str>,
    inner: Rc<RefCell<MemoryParameterInner>>,
}

impl MemoryParameter {
    /// Continuous parameter starting at `min`.
    pub fn new(name: impl Into<String>, min: f64, max: f64) -> Self {
        let name: String = name.into();
        Self {
            name: Rc::from(name),
            inner: Rc::new(RefCell::new(MemoryParameterInner {
                value: min,
                min,
                max,
                quantized: false,
                reject_writes: false,
                writes: 0,
                on_write: None,
            })),
        }
    }

    /// Stepped parameter starting at `min`.
    pub fn quantized(name: impl Into<String>, min: f64, max: f64) -> Self {
        let param = Self::new(name, min, max);
        param.inner.borrow_mut().quantized = true;
        param
    }

    pub fn with_value(self, value: f64) -> Self {
        self.inner.borrow_mut().value = value;
        self
    }

    pub fn get(&self) -> f64 {
        self.inner.borrow().value
    }

    /// Make subsequent writes fail (or succeed again).
    pub fn reject_writes(&self, reject: bool) {
        self.inner.borrow_mut().reject_writes = reject;
    }

    /// Number of accepted writes so far.
    pub fn write_count(&self) -> usize {
        self.inner.borrow().writes
    }

    /// Install a callback fired after every accepted write.
    pub fn on_write(&self, listener: impl FnMut(f64) + 'static) {
        self.inner.borrow_mut().on_write = Some(Box::new(listener));
    }
}

impl fmt::Debug for MemoryParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("MemoryParameter")
            .field("name", &self.name)
            .field("value", &inner.value)
            .field("min", &inner.min)
            .field("max", &inner.max)
            .finish_non_exhaustive()
    }
}

impl ParameterHandle for MemoryParameter {
    fn name(&self) -> &str {
        &self.name
    }

    fn value(&self) -> f64 {
        self.get()
    }

    fn set_value(&mut self, value: f64) -> std::result::Result<(), WriteRejected> {
        let listener = {
            let mut inner = self.inner.borrow_mut();
            if inner.reject_writes {
                return Err(WriteRejected(format!(
                    "'{}' is read-only in this context",
                    self.name
                )));
            }
            inner.value = value;
            inner.writes += 1;
            inner.on_write.take()
        };

        // Run the listener without holding the borrow; it may read us back.
        if let Some(mut listener) = listener {
            listener(value);
            let mut inner = self.inner.borrow_mut();
            if inner.on_write.is_none() {
                inner.on_write = Some(listener);
            }
        }
        Ok(())
    }

    fn min(&self) -> f64 {
        self.inner.borrow().min
    }

    fn max(&self) -> f64 {
        self.inner.borrow().max
    }

    fn is_quantized(&self) -> bool {
        self.inner.borrow().quantized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{DeviceKey, ParamRole};

    #[test]
    fn test_constrain_clamps_and_rounds() {
        let fader = MemoryParameter::new("Volume", 0.0, 1.0);
        assert!((constrain(&fader, 1.4) - 1.0).abs() < 1e-9);
        assert!((constrain(&fader, -0.2)).abs() < 1e-9);

        let grid = MemoryParameter::quantized("Grid", 0.0, 15.0);
        assert!((constrain(&grid, 12.6) - 13.0).abs() < 1e-9);
        assert!((constrain(&grid, 22.0) - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalized_mapping() {
        let freq = MemoryParameter::new("Filter Freq", 50.0, 18000.0);
        assert!((freq.to_normalized(50.0)).abs() < 1e-9);
        assert!((freq.to_normalized(18000.0) - 1.0).abs() < 1e-9);
        assert!((freq.from_normalized(0.5) - 9025.0).abs() < 1e-6);

        let grid = MemoryParameter::quantized("Grid", 0.0, 15.0);
        assert!((grid.to_normalized(11.0) - 11.0).abs() < 1e-9);
    }

    #[test]
    fn test_rejected_write_leaves_value() {
        let target = DeviceKey::primary(0).target(ParamRole::TrackVolume);
        let param = MemoryParameter::new("Volume", 0.0, 1.0).with_value(0.3);
        param.reject_writes(true);
        let mut handle = param.clone();
        let err = write_constrained(target, &mut handle, 0.8).unwrap_err();
        assert!(err.is_retryable());
        assert!((param.get() - 0.3).abs() < 1e-9);
        assert_eq!(param.write_count(), 0);
    }

    #[test]
    fn test_write_listener_sees_new_value() {
        let param = MemoryParameter::new("Volume", 0.0, 1.0);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let probe = param.clone();
        param.on_write(move |v| sink.borrow_mut().push((v, probe.get())));

        let mut handle = param.clone();
        handle.set_value(0.25).unwrap();
        handle.set_value(0.5).unwrap();
        assert_eq!(*seen.borrow(), vec![(0.25, 0.25), (0.5, 0.5)]);
    }
}
