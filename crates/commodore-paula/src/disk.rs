//! Disk controller and drive model.
//!
//! The controller shifts MFM words off the rotating track image. A read
//! transfer is armed by the DSKLEN double-write protocol, waits for the
//! DSKSYNC pattern when word sync is enabled, and raises DSKBLK once the
//! programmed number of words has been delivered. If no sync mark shows
//! up within a revolution budget, the controller falls back to the first
//! plausible sync it sees.

use format_adf::Adf;
use log::{debug, warn};

use crate::mfm::{encode_track, SYNC_WORD};

/// Scanned words before auto-sync kicks in (two full revolutions).
const AUTO_SYNC_BUDGET: u32 = 2 * crate::mfm::MFM_TRACK_WORDS as u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiskState {
    #[default]
    Idle,
    /// Scanning the bit stream for the sync pattern.
    WaitingForSync { scanned: u32 },
    /// Delivering words to memory.
    Transferring { words_left: u16 },
}

/// Outcome of one disk DMA slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskDmaResult {
    /// Nothing to transfer this slot.
    Idle,
    /// The sync pattern matched; DSKSYN should be raised.
    SyncFound,
    /// One word for memory.
    Word(u16),
    /// Transfer complete; DSKBLK should be raised.
    Done,
}

pub struct DiskController {
    disk: Option<Adf>,
    pub cylinder: usize,
    pub head: usize,
    pub motor_on: bool,

    /// Encoded MFM image of the track under the head.
    track: Vec<u16>,
    track_stale: bool,
    /// Rotation position within the track, in words.
    word_pos: usize,

    pub dsklen: u16,
    dsklen_prev: u16,
    pub dsksync: u16,
    pub state: DiskState,
    /// Knob: sync on the first standard mark after the sync budget runs
    /// out.
    pub auto_sync: bool,
}

impl DiskController {
    #[must_use]
    pub fn new() -> Self {
        Self {
            disk: None,
            cylinder: 0,
            head: 0,
            motor_on: false,
            track: Vec::new(),
            track_stale: true,
            word_pos: 0,
            dsklen: 0,
            dsklen_prev: 0,
            dsksync: SYNC_WORD,
            state: DiskState::Idle,
            auto_sync: true,
        }
    }

    pub fn reset(&mut self) {
        let disk = self.disk.take();
        *self = Self::new();
        self.disk = disk;
    }

    pub fn insert_disk(&mut self, adf: Adf) {
        self.disk = Some(adf);
        self.track_stale = true;
        debug!("disk inserted");
    }

    pub fn eject_disk(&mut self) -> Option<Adf> {
        self.track_stale = true;
        self.state = DiskState::Idle;
        self.disk.take()
    }

    #[must_use]
    pub fn has_disk(&self) -> bool {
        self.disk.is_some()
    }

    #[must_use]
    pub fn disk(&self) -> Option<&Adf> {
        self.disk.as_ref()
    }

    /// Head stepping from the drive control lines.
    pub fn step_head(&mut self, inward: bool) {
        if inward {
            self.cylinder = (self.cylinder + 1).min(79);
        } else {
            self.cylinder = self.cylinder.saturating_sub(1);
        }
        self.track_stale = true;
    }

    pub fn select_head(&mut self, upper: bool) {
        let head = usize::from(upper);
        if head != self.head {
            self.head = head;
            self.track_stale = true;
        }
    }

    pub fn poke_dsksync(&mut self, value: u16) {
        self.dsksync = value;
    }

    /// DSKLEN double-write protocol: DMA starts only when two consecutive
    /// writes both carry bit 15.
    pub fn poke_dsklen(&mut self, value: u16, wordsync: bool) {
        self.dsklen_prev = self.dsklen;
        self.dsklen = value;

        if value & 0x8000 != 0 && self.dsklen_prev & 0x8000 != 0 {
            let words = value & 0x3FFF;
            if value & 0x4000 != 0 {
                // Write transfers land in the track buffer as raw MFM.
                warn!("disk write DMA of {words} words (raw MFM, not decoded)");
            }
            self.state = if wordsync {
                DiskState::WaitingForSync { scanned: 0 }
            } else {
                DiskState::Transferring { words_left: words }
            };
            debug!("disk DMA armed: {words} words, wordsync={wordsync}");
        }
    }

    fn refresh_track(&mut self) {
        if !self.track_stale {
            return;
        }
        self.track_stale = false;
        self.track.clear();
        if let Some(disk) = &self.disk {
            if let Ok(sectors) = disk.read_track(self.cylinder, self.head) {
                let track_nr = (self.cylinder * 2 + self.head) as u8;
                self.track = encode_track(sectors, track_nr);
            }
        }
        self.word_pos = 0;
    }

    /// The word currently under the head; the disk keeps rotating.
    fn shift_word(&mut self) -> Option<u16> {
        self.refresh_track();
        if self.track.is_empty() {
            return None;
        }
        let word = self.track[self.word_pos];
        self.word_pos = (self.word_pos + 1) % self.track.len();
        Some(word)
    }

    /// Service one disk DMA slot.
    pub fn dma_slot(&mut self) -> DiskDmaResult {
        match self.state {
            DiskState::Idle => DiskDmaResult::Idle,
            DiskState::WaitingForSync { scanned } => {
                let Some(word) = self.shift_word() else {
                    return DiskDmaResult::Idle;
                };
                let wanted = if self.auto_sync && scanned >= AUTO_SYNC_BUDGET {
                    SYNC_WORD
                } else {
                    self.dsksync
                };
                if word == wanted {
                    let words = self.dsklen & 0x3FFF;
                    self.state = DiskState::Transferring { words_left: words };
                    debug!("disk sync matched after {scanned} words");
                    return DiskDmaResult::SyncFound;
                }
                self.state = DiskState::WaitingForSync {
                    scanned: scanned + 1,
                };
                DiskDmaResult::Idle
            }
            DiskState::Transferring { words_left } => {
                if words_left == 0 {
                    self.state = DiskState::Idle;
                    return DiskDmaResult::Done;
                }
                let Some(word) = self.shift_word() else {
                    return DiskDmaResult::Idle;
                };
                self.state = DiskState::Transferring {
                    words_left: words_left - 1,
                };
                DiskDmaResult::Word(word)
            }
        }
    }
}

impl Default for DiskController {
    fn default() -> Self {
        Self::new()
    }
}
