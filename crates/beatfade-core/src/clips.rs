//! Queued clip launching.
//!
//! The surrounding plugin lets the user queue clips for the next drop. Some
//! program steps launch them; the launch itself belongs to the host session,
//! reached through a [`ClipLauncher`].

/// Hook used by program steps to launch whatever clips are queued.
pub trait ClipLauncher {
    /// Launch and clear the queued clips, returning how many were launched.
    fn fire_queued_clips(&mut self) -> usize;
}

/// Launcher for sessions without clip queuing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoClips;

impl ClipLauncher for NoClips {
    fn fire_queued_clips(&mut self) -> usize {
        0
    }
}

/// Slot of a queued clip: absolute track and scene index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ClipSlot {
    pub track: u32,
    pub scene: u32,
}

type LaunchFn = Box<dyn FnMut(ClipSlot)>;

/// Clips queued for the next launch, fired through a host callback.
pub struct ClipQueue {
    queued: Vec<ClipSlot>,
    launch: LaunchFn,
}

impl ClipQueue {
    pub fn new(launch: impl FnMut(ClipSlot) + 'static) -> Self {
        Self {
            queued: Vec::new(),
            launch: Box::new(launch),
        }
    }

    /// Queue a clip; queuing the same slot twice is a no-op.
    pub fn queue(&mut self, track: u32, scene: u32) {
        let slot = ClipSlot { track, scene };
        if !self.queued.contains(&slot) {
            self.queued.push(slot);
        }
    }

    pub fn queued(&self) -> &[ClipSlot] {
        &self.queued
    }
}

impl ClipLauncher for ClipQueue {
    fn fire_queued_clips(&mut self) -> usize {
        let slots = std::mem::take(&mut self.queued);
        for slot in &slots {
            log::debug!("[CLIPS] Launching track {} scene {}", slot.track, slot.scene);
            (self.launch)(*slot);
        }
        slots.len()
    }
}

impl std::fmt::Debug for ClipQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClipQueue")
            .field("queued", &self.queued)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_fire_launches_and_clears() {
        let launched = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&launched);
        let mut queue = ClipQueue::new(move |slot| sink.borrow_mut().push(slot));
        queue.queue(1, 4);
        queue.queue(3, 4);
        queue.queue(1, 4);

        assert_eq!(queue.fire_queued_clips(), 2);
        assert!(queue.queued().is_empty());
        assert_eq!(
            *launched.borrow(),
            vec![ClipSlot { track: 1, scene: 4 }, ClipSlot { track: 3, scene: 4 }]
        );
        assert_eq!(queue.fire_queued_clips(), 0);
    }
}
