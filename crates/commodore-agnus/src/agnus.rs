//! DMA slot arbitration and the display-window flip-flops.

use log::trace;

use crate::beam::{Beam, VideoStandard};
use crate::CCKS_PER_LINE;

// DMACON enable bits.
pub const DMA_AUD0: u16 = 0x0001;
pub const DMA_AUD1: u16 = 0x0002;
pub const DMA_AUD2: u16 = 0x0004;
pub const DMA_AUD3: u16 = 0x0008;
pub const DMA_DSK: u16 = 0x0010;
pub const DMA_SPR: u16 = 0x0020;
pub const DMA_BLT: u16 = 0x0040;
pub const DMA_COP: u16 = 0x0080;
pub const DMA_BPL: u16 = 0x0100;
pub const DMA_MASTER: u16 = 0x0200;
pub const DMA_BLTPRI: u16 = 0x0400;
pub const DMA_BBUSY: u16 = 0x4000;

/// Maps the position within an 8-CCK lores fetch group to the plane
/// fetched there. The interleaved order comes from the chip's DDF
/// sequencer; BPL1 is always last and triggers the shift-register load.
const LORES_GROUP_TO_PLANE: [Option<u8>; 8] = [
    None,
    Some(3),
    Some(5),
    Some(1),
    None,
    Some(2),
    Some(4),
    Some(0),
];

/// Hires fetch groups are 4 CCKs wide and fetch every slot.
const HIRES_GROUP_TO_PLANE: [Option<u8>; 4] = [Some(3), Some(1), Some(2), Some(0)];

/// The channel a colour-clock slot is reserved for, before enable bits and
/// the low-priority fillers are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchAction {
    /// Free slot: Copper, then Blitter, then the CPU may claim it.
    #[default]
    Idle,
    Refresh,
    Disk,
    Audio(u8),
    /// Sprite slot pair; even CCK fetches POS/DATA, odd CTL/DATB.
    Sprite(u8),
    Bitplane(u8),
}

/// The channel that actually owns a slot once enables are known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotOwner {
    Refresh,
    Disk,
    Audio(u8),
    Sprite(u8),
    Bitplane(u8),
    Copper,
    Blitter,
    Cpu,
}

/// Inspector record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AgnusInfo {
    pub vpos: u16,
    pub hpos: u16,
    pub dmacon: u16,
    pub diwstrt: u16,
    pub diwstop: u16,
    pub ddfstrt: u16,
    pub ddfstop: u16,
    pub bplcon0: u16,
    pub bpl_pt: [u32; 6],
    pub spr_pt: [u32; 8],
    pub h_flop: bool,
    pub v_flop: bool,
}

pub struct Agnus {
    pub beam: Beam,

    pub dmacon: u16,
    pub bplcon0: u16,
    pub diwstrt: u16,
    pub diwstop: u16,
    pub ddfstrt: u16,
    pub ddfstop: u16,

    pub bpl_pt: [u32; 6],
    pub bpl1mod: i16,
    pub bpl2mod: i16,
    pub spr_pt: [u32; 8],
    pub dsk_pt: u32,
    pub aud_lc: [u32; 4],

    /// Horizontal display-window flip-flop plus its per-line transition
    /// records (in lores pixel units, i.e. DIW register units).
    pub h_flop: bool,
    pub h_flop_on: Option<u16>,
    pub h_flop_off: Option<u16>,
    /// Vertical display-window flip-flop.
    pub v_flop: bool,

    /// Per-line slot reservation table, rebuilt when a display register
    /// changes.
    fetch_table: [FetchAction; CCKS_PER_LINE as usize],
    fetch_table_dirty: bool,
    /// Position of the first BPL1 fetch of the line, if any. Denise derives
    /// its first canvas pixel from this.
    pub first_bpl1_h: Option<u16>,

    /// Fidelity knob: drop the rest of a line's fetches for a channel whose
    /// pointer was rewritten mid-line.
    pub pointer_drops: bool,
    dropped_bpl_lines: u8,
}

impl Agnus {
    #[must_use]
    pub fn new(standard: VideoStandard) -> Self {
        let mut agnus = Self {
            beam: Beam::new(standard),
            dmacon: 0,
            bplcon0: 0,
            diwstrt: 0,
            diwstop: 0,
            ddfstrt: 0,
            ddfstop: 0,
            bpl_pt: [0; 6],
            bpl1mod: 0,
            bpl2mod: 0,
            spr_pt: [0; 8],
            dsk_pt: 0,
            aud_lc: [0; 4],
            h_flop: false,
            h_flop_on: None,
            h_flop_off: None,
            v_flop: false,
            fetch_table: [FetchAction::Idle; CCKS_PER_LINE as usize],
            fetch_table_dirty: true,
            first_bpl1_h: None,
            pointer_drops: false,
            dropped_bpl_lines: 0,
        };
        agnus.rebuild_fetch_table();
        agnus
    }

    pub fn reset(&mut self, hard: bool) {
        let standard = self.beam.standard;
        let knob = self.pointer_drops;
        *self = Self::new(standard);
        self.pointer_drops = knob;
        if !hard {
            // A soft reset keeps the beam free-running.
            self.beam = Beam::new(standard);
        }
    }

    // --- register interface ---------------------------------------------

    /// DMACON uses the set/clear protocol: bit 15 selects whether the low
    /// bits are set or cleared.
    pub fn poke_dmacon(&mut self, value: u16) {
        if value & 0x8000 != 0 {
            self.dmacon |= value & 0x7FFF;
        } else {
            self.dmacon &= !(value & 0x7FFF);
        }
        self.fetch_table_dirty = true;
    }

    pub fn poke_bplcon0(&mut self, value: u16) {
        self.bplcon0 = value;
        self.fetch_table_dirty = true;
    }

    pub fn poke_diwstrt(&mut self, value: u16) {
        self.diwstrt = value;
        self.fetch_table_dirty = true;
    }

    pub fn poke_diwstop(&mut self, value: u16) {
        self.diwstop = value;
        self.fetch_table_dirty = true;
    }

    pub fn poke_ddfstrt(&mut self, value: u16) {
        self.ddfstrt = value & 0x00FC;
        self.fetch_table_dirty = true;
    }

    pub fn poke_ddfstop(&mut self, value: u16) {
        self.ddfstop = value & 0x00FC;
        self.fetch_table_dirty = true;
    }

    pub fn poke_bpl_pt_hi(&mut self, plane: usize, value: u16) {
        self.bpl_pt[plane] = (self.bpl_pt[plane] & 0x0000_FFFF) | (u32::from(value & 0x7) << 16);
        self.note_pointer_write();
    }

    pub fn poke_bpl_pt_lo(&mut self, plane: usize, value: u16) {
        self.bpl_pt[plane] = (self.bpl_pt[plane] & 0xFFFF_0000) | u32::from(value & 0xFFFE);
        self.note_pointer_write();
    }

    pub fn poke_spr_pt_hi(&mut self, sprite: usize, value: u16) {
        self.spr_pt[sprite] =
            (self.spr_pt[sprite] & 0x0000_FFFF) | (u32::from(value & 0x7) << 16);
    }

    pub fn poke_spr_pt_lo(&mut self, sprite: usize, value: u16) {
        self.spr_pt[sprite] = (self.spr_pt[sprite] & 0xFFFF_0000) | u32::from(value & 0xFFFE);
    }

    /// Mid-line bitplane pointer rewrites optionally drop the remaining
    /// fetches of the line (guest software relies on either behavior; the
    /// knob selects the stricter model).
    fn note_pointer_write(&mut self) {
        if self.pointer_drops && self.in_bitplane_fetch_window(self.beam.h) {
            self.dropped_bpl_lines = 1;
            trace!(
                "bitplane pointer rewrite inside the fetch window at ({}, {})",
                self.beam.v,
                self.beam.h
            );
        }
    }

    // --- derived state --------------------------------------------------

    #[must_use]
    pub fn dma_enabled(&self, bit: u16) -> bool {
        (self.dmacon & DMA_MASTER) != 0 && (self.dmacon & bit) != 0
    }

    #[must_use]
    pub fn num_bitplanes(&self) -> u8 {
        (((self.bplcon0 >> 12) & 0x07) as u8).min(6)
    }

    #[must_use]
    pub fn hires(&self) -> bool {
        self.bplcon0 & 0x8000 != 0
    }

    #[must_use]
    pub fn interlace(&self) -> bool {
        self.bplcon0 & 0x0004 != 0
    }

    /// Vertical display-window bounds. V8 of the stop position is the
    /// complement of its top bit (OCS rule).
    #[must_use]
    pub fn diw_vstrt(&self) -> u16 {
        self.diwstrt >> 8
    }

    #[must_use]
    pub fn diw_vstop(&self) -> u16 {
        let v = self.diwstop >> 8;
        if self.diwstop & 0x8000 == 0 {
            v | 0x100
        } else {
            v
        }
    }

    /// Horizontal bounds in lores pixels; the stop side carries H8 set.
    #[must_use]
    pub fn diw_hstrt(&self) -> u16 {
        self.diwstrt & 0xFF
    }

    #[must_use]
    pub fn diw_hstop(&self) -> u16 {
        (self.diwstop & 0xFF) | 0x100
    }

    /// Fetch start/stop snapped to the fetch-group quantum.
    #[must_use]
    pub fn fetch_start(&self) -> u16 {
        let quantum = if self.hires() { 4 } else { 8 };
        (self.ddfstrt.max(0x18)) & !(quantum - 1)
    }

    #[must_use]
    pub fn fetch_stop(&self) -> u16 {
        let quantum = if self.hires() { 4 } else { 8 };
        (self.ddfstop.min(0xD8)) & !(quantum - 1)
    }

    #[must_use]
    pub fn in_bitplane_fetch_window(&self, h: u16) -> bool {
        let quantum = if self.hires() { 4 } else { 8 };
        h >= self.fetch_start() && h < self.fetch_stop() + quantum
    }

    // --- per-line bookkeeping -------------------------------------------

    /// Line-start housekeeping: update the vertical flip-flop, clear the
    /// horizontal transition records, rebuild the fetch table if needed.
    ///
    /// The vertical window uses genuine flip-flop semantics: it is SET when
    /// the beam reaches VSTRT and CLEARED at VSTOP, never recomputed from a
    /// range check. An unreachable VSTRT therefore keeps the display off.
    pub fn begin_line(&mut self) {
        let v = self.beam.v;
        if v == self.diw_vstrt() {
            self.v_flop = true;
        }
        if v == self.diw_vstop() {
            self.v_flop = false;
        }
        self.h_flop = false;
        self.h_flop_on = None;
        self.h_flop_off = None;
        self.dropped_bpl_lines = self.dropped_bpl_lines.saturating_sub(1);
        if self.fetch_table_dirty {
            self.rebuild_fetch_table();
        }
    }

    /// Per-colour-clock display window update. `h_flop` turns on when the
    /// beam crosses DIW HSTRT and off at HSTOP; the transition positions
    /// are latched for the border painter.
    pub fn update_h_window(&mut self, h: u16) {
        if !self.v_flop {
            return;
        }
        let pixel = h * 2;
        if !self.h_flop && self.h_flop_on.is_none() && pixel >= self.diw_hstrt() {
            self.h_flop = true;
            self.h_flop_on = Some(self.diw_hstrt());
        }
        if self.h_flop && pixel >= self.diw_hstop() {
            self.h_flop = false;
            self.h_flop_off = Some(self.diw_hstop());
        }
    }

    /// A line renders as border only when the vertical window is closed or
    /// the horizontal flip-flop never fired.
    #[must_use]
    pub fn line_is_blank(&self) -> bool {
        !self.v_flop || self.h_flop_on.is_none()
    }

    /// Add the per-line modulus to the bitplane pointers (end of a line
    /// that carried bitplane DMA).
    pub fn add_bpl_modulos(&mut self) {
        for plane in 0..usize::from(self.num_bitplanes()) {
            let modulus = if plane % 2 == 0 {
                self.bpl1mod
            } else {
                self.bpl2mod
            };
            self.bpl_pt[plane] = (self.bpl_pt[plane] as i64 + i64::from(modulus)) as u32;
        }
    }

    // --- slot allocation ------------------------------------------------

    /// Rebuild the per-line slot reservation table.
    ///
    /// Geometry only: fixed chipset slots first, then the bitplane fetch
    /// window for the current plane count and resolution. Enables are
    /// applied at query time so a DMACON write mid-line takes effect
    /// without a rebuild.
    pub fn rebuild_fetch_table(&mut self) {
        self.fetch_table = [FetchAction::Idle; CCKS_PER_LINE as usize];
        self.fetch_table_dirty = false;
        self.first_bpl1_h = None;

        // Fixed slots: memory refresh, disk, audio, sprites.
        for h in 0x01..=0x03 {
            self.fetch_table[h] = FetchAction::Refresh;
        }
        self.fetch_table[0x1B] = FetchAction::Refresh;
        for h in 0x04..=0x06 {
            self.fetch_table[h] = FetchAction::Disk;
        }
        for (channel, h) in (0x07..=0x0A).enumerate() {
            self.fetch_table[h] = FetchAction::Audio(channel as u8);
        }
        for h in 0x0B..=0x1A {
            self.fetch_table[h] = FetchAction::Sprite(((h - 0x0B) / 2) as u8);
        }

        // Bitplane fetch window, enumerated in canonical group order.
        let planes = self.num_bitplanes();
        if planes == 0 {
            return;
        }
        let start = self.fetch_start();
        let stop = self.fetch_stop();
        let (group, table): (u16, &[Option<u8>]) = if self.hires() {
            (4, &HIRES_GROUP_TO_PLANE)
        } else {
            (8, &LORES_GROUP_TO_PLANE)
        };

        let mut h = start;
        while h <= stop + (group - 1) && h < CCKS_PER_LINE {
            let pos = usize::from((h - start) % group);
            if let Some(plane) = table[pos] {
                if plane < planes {
                    self.fetch_table[usize::from(h)] = FetchAction::Bitplane(plane);
                    if plane == 0 && self.first_bpl1_h.is_none() {
                        self.first_bpl1_h = Some(h);
                    }
                }
            }
            h += 1;
        }
    }

    #[must_use]
    pub fn fetch_action(&self, h: u16) -> FetchAction {
        self.fetch_table[usize::from(h)]
    }

    /// Resolve the owner of a colour-clock slot under the current enables.
    ///
    /// `copper_wants` / `blitter_wants` report whether those engines have
    /// work pending; the priority chain is refresh, disk, audio, sprites,
    /// bitplanes, Copper, Blitter, CPU. The CPU yields whenever any other
    /// holder is armed.
    #[must_use]
    pub fn slot_owner(&self, h: u16, copper_wants: bool, blitter_wants: bool) -> SlotOwner {
        match self.fetch_table[usize::from(h)] {
            FetchAction::Refresh => return SlotOwner::Refresh,
            FetchAction::Disk if self.dma_enabled(DMA_DSK) => return SlotOwner::Disk,
            FetchAction::Audio(ch) if self.dma_enabled(1 << ch) => {
                return SlotOwner::Audio(ch);
            }
            FetchAction::Sprite(nr) if self.dma_enabled(DMA_SPR) && self.v_flop_for_sprites() => {
                return SlotOwner::Sprite(nr);
            }
            FetchAction::Bitplane(plane)
                if self.dma_enabled(DMA_BPL) && self.v_flop && self.dropped_bpl_lines == 0 =>
            {
                return SlotOwner::Bitplane(plane);
            }
            _ => {}
        }

        // Free slot: Copper runs on even colour clocks only.
        if copper_wants && self.dma_enabled(DMA_COP) && h % 2 == 0 {
            return SlotOwner::Copper;
        }
        if blitter_wants && self.dma_enabled(DMA_BLT) {
            return SlotOwner::Blitter;
        }
        SlotOwner::Cpu
    }

    /// Sprite DMA runs during the whole frame outside vertical blank; the
    /// per-sprite vertical windows are handled by the sprite sequencer.
    fn v_flop_for_sprites(&self) -> bool {
        self.beam.v >= self.beam.standard.first_visible_line()
    }

    #[must_use]
    pub fn info(&self) -> AgnusInfo {
        AgnusInfo {
            vpos: self.beam.v,
            hpos: self.beam.h,
            dmacon: self.dmacon,
            diwstrt: self.diwstrt,
            diwstop: self.diwstop,
            ddfstrt: self.ddfstrt,
            ddfstop: self.ddfstop,
            bplcon0: self.bplcon0,
            bpl_pt: self.bpl_pt,
            spr_pt: self.spr_pt,
            h_flop: self.h_flop,
            v_flop: self.v_flop,
        }
    }
}

impl emu_core::Component for Agnus {
    type Info = AgnusInfo;

    fn name(&self) -> &'static str {
        "Agnus"
    }

    fn reset(&mut self, hard: bool) {
        Agnus::reset(self, hard);
    }

    fn inspect(&self) -> AgnusInfo {
        self.info()
    }
}
