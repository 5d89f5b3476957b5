//! Double-buffered inspection records.
//!
//! The emulation thread fills the back buffer between frames and flips it
//! with a release barrier; readers always observe a full-frame-consistent
//! snapshot without taking a lock on the hot path.

use std::sync::atomic::{AtomicUsize, Ordering};

use commodore_agnus::AgnusInfo;
use commodore_denise::DeniseInfo;
use commodore_paula::PaulaInfo;
use mos_cia_8520::CiaInfo;

/// A full-machine inspection record.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MachineInfo {
    pub cycle: u64,
    pub frame: u64,
    pub agnus: AgnusInfo,
    pub denise: DeniseInfo,
    pub paula: PaulaInfo,
    pub cia_a: CiaInfo,
    pub cia_b: CiaInfo,
}

pub struct Inspector {
    buffers: [MachineInfo; 2],
    /// Index of the buffer readers may access.
    front: AtomicUsize,
}

impl Inspector {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffers: [MachineInfo::default(); 2],
            front: AtomicUsize::new(0),
        }
    }

    /// Emulation side: record a new snapshot and flip it to the front.
    pub fn publish(&mut self, info: MachineInfo) {
        let back = 1 - self.front.load(Ordering::Relaxed);
        self.buffers[back] = info;
        self.front.store(back, Ordering::Release);
    }

    /// Reader side: the most recently published frame-consistent record.
    #[must_use]
    pub fn read(&self) -> MachineInfo {
        self.buffers[self.front.load(Ordering::Acquire)]
    }
}

impl Default for Inspector {
    fn default() -> Self {
        Self::new()
    }
}
