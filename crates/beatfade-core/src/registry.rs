//! Target registry.
//!
//! Maps [`TargetKey`]s to live [`ParameterHandle`]s. The registry is built
//! from the host's device graph and rebuilt wholesale on structural change;
//! the session cancels automation for keys that disappear.

use crate::parameter::ParameterHandle;
use crate::target::{DeviceKey, TargetKey};
use std::collections::HashMap;

/// Owned handle to a host parameter.
pub type BoxedParameter = Box<dyn ParameterHandle>;

#[derive(Default)]
pub struct TargetRegistry {
    params: HashMap<TargetKey, BoxedParameter>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a parameter, returning the handle it replaced.
    pub fn register(&mut self, target: TargetKey, handle: BoxedParameter) -> Option<BoxedParameter> {
        log::debug!("[REGISTRY] register {} ('{}')", target, handle.name());
        self.params.insert(target, handle)
    }

    pub fn unregister(&mut self, target: TargetKey) -> Option<BoxedParameter> {
        let removed = self.params.remove(&target);
        if removed.is_some() {
            log::debug!("[REGISTRY] unregister {}", target);
        }
        removed
    }

    pub fn lookup(&self, target: TargetKey) -> Option<&dyn ParameterHandle> {
        self.params.get(&target).map(|p| p.as_ref())
    }

    pub fn lookup_mut(&mut self, target: TargetKey) -> Option<&mut (dyn ParameterHandle + 'static)> {
        self.params.get_mut(&target).map(|p| p.as_mut())
    }

    pub fn contains(&self, target: TargetKey) -> bool {
        self.params.contains_key(&target)
    }

    /// Current value of a registered parameter.
    pub fn value(&self, target: TargetKey) -> Option<f64> {
        self.lookup(target).map(|p| p.value())
    }

    /// All registered keys on one device.
    pub fn device_targets(&self, device: DeviceKey) -> Vec<TargetKey> {
        let mut keys: Vec<TargetKey> = self
            .params
            .keys()
            .filter(|key| key.device == device)
            .copied()
            .collect();
        keys.sort();
        keys
    }

    /// Replace every registration, returning the keys that no longer exist.
    pub fn rebuild<I>(&mut self, entries: I) -> Vec<TargetKey>
    where
        I: IntoIterator<Item = (TargetKey, BoxedParameter)>,
    {
        let fresh: HashMap<TargetKey, BoxedParameter> = entries.into_iter().collect();
        let mut removed: Vec<TargetKey> = self
            .params
            .keys()
            .filter(|key| !fresh.contains_key(key))
            .copied()
            .collect();
        removed.sort();
        log::info!(
            "[REGISTRY] rebuilt with {} targets ({} removed)",
            fresh.len(),
            removed.len()
        );
        self.params = fresh;
        removed
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

impl std::fmt::Debug for TargetRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetRegistry")
            .field("targets", &self.params.len())
            .finish_non_exhaustive()
    }
}
