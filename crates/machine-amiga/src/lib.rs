//! The Amiga machine.
//!
//! Owns the event wheel, the chipset models, memory, and both CIAs, and
//! sequences them in colour-clock steps. Each colour clock first drains
//! the wheel, then executes the DMA slot the arbiter hands out, then
//! advances the beam; line and frame boundaries run as wheel events so
//! every timed side effect shares one deterministic order.

pub mod bus;
pub mod command;
pub mod config;
pub mod custom_regs;
pub mod error;
pub mod inspector;
pub mod memory;
pub mod snapshot;

pub use command::{command_queue, Command, CommandResult, CommandSender};
pub use config::{AmigaConfig, BlitterAccuracy, ConfigOption};
pub use error::AmigaError;
pub use inspector::{Inspector, MachineInfo};

pub use amiga_fs;
pub use commodore_agnus;
pub use commodore_denise;
pub use commodore_paula;
pub use emu_core;
pub use format_adf;
pub use mos_cia_8520;

use commodore_agnus::agnus::{SlotOwner, DMA_BLT, DMA_COP};
use commodore_agnus::beam::BeamEdge;
use commodore_agnus::{Agnus, Blitter, Copper, CCKS_PER_LINE};
use commodore_denise::Denise;
use commodore_paula::{DiskDmaResult, Paula, INT_BLIT, INT_DSKBLK, INT_DSKSYN, INT_EXTER, INT_PORTS, INT_VERTB};
use emu_core::{Cycle, EventKind, EventSlot, EventWheel, PendingEvent};
use format_adf::Adf;
use log::{debug, trace};
use mos_cia_8520::Cia8520;

use crate::command::CommandReceiver;
use crate::config::BlitterAccuracy as Accuracy;
use crate::memory::{BusAgent, Memory};

/// Colour clocks per E-clock (the CIA timer clock).
const CCKS_PER_ECLOCK: u8 = 5;
/// Sprite DMA begins below the vertical blanking area.
const SPRITE_DMA_FIRST_LINE: u16 = 25;

/// Power/run state of the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecState {
    #[default]
    Off,
    Paused,
    Running,
}

/// Per-sprite DMA sequencer: each sprite owns two slots per line.
#[derive(Debug, Clone, Copy, Default)]
struct SpriteUnit {
    vstart: u16,
    vstop: u16,
    /// Set while the unit expects control words instead of image data.
    awaiting_ctl: bool,
}

/// Host input state reflected into the chip registers.
#[derive(Debug, Clone, Copy, Default)]
struct InputState {
    mouse_x: u8,
    mouse_y: u8,
    joy_horizontal: i8,
    joy_vertical: i8,
    joy_fire: bool,
    mouse_left: bool,
}

impl InputState {
    /// Mouse counters live in JOY0DAT (Y high byte, X low byte).
    fn joy0dat(&self) -> u16 {
        (u16::from(self.mouse_y) << 8) | u16::from(self.mouse_x)
    }

    /// Digital joystick encoding: direction lines fold into the counter
    /// bits (down = bit0 XOR bit1, up = bit8 XOR bit9).
    fn joy1dat(&self) -> u16 {
        let right = self.joy_horizontal > 0;
        let left = self.joy_horizontal < 0;
        let down = self.joy_vertical > 0;
        let up = self.joy_vertical < 0;
        (u16::from(right) << 1)
            | u16::from(down ^ right)
            | (u16::from(left) << 9)
            | (u16::from(up ^ left) << 8)
    }
}

pub struct Amiga {
    pub config: AmigaConfig,
    pub wheel: EventWheel,
    pub agnus: Agnus,
    pub copper: Copper,
    pub blitter: Blitter,
    pub denise: Denise,
    pub paula: Paula,
    pub cia_a: Cia8520,
    pub cia_b: Cia8520,
    pub memory: Memory,
    pub inspector: Inspector,

    state: ExecState,
    suspend_depth: u32,
    commands: CommandReceiver,

    cycle: Cycle,
    frame: u64,
    eclock_phase: u8,
    line_had_bpl_dma: bool,
    sprites: [SpriteUnit; 8],
    input: InputState,
}

impl Amiga {
    /// Build a machine and the host's command handle.
    #[must_use]
    pub fn new(config: AmigaConfig, rom: Vec<u8>) -> (Self, CommandSender) {
        let (sender, receiver) = command_queue(64);
        let mut agnus = Agnus::new(config.video);
        agnus.pointer_drops = config.pointer_drops;
        let mut cia_a = Cia8520::new("CIA-A");
        cia_a.tod_bug = config.tod_bug;
        let mut cia_b = Cia8520::new("CIA-B");
        cia_b.tod_bug = config.tod_bug;
        // CIA-A port A inputs: /FIR1,/FIR0 high, drive status lines idle.
        cia_a.external_a = 0xEB;

        let mut memory = Memory::new(config.chip_ram, config.slow_ram, config.fast_ram, rom);
        memory.floating_bus = config.floating_bus_pattern;

        let mut amiga = Self {
            config,
            wheel: EventWheel::new(),
            agnus,
            copper: Copper::new(),
            blitter: Blitter::new(),
            denise: Denise::new(),
            paula: Paula::new(),
            cia_a,
            cia_b,
            memory,
            inspector: Inspector::new(),
            state: ExecState::Off,
            suspend_depth: 0,
            commands: receiver,
            cycle: Cycle::ZERO,
            frame: 0,
            eclock_phase: 0,
            line_had_bpl_dma: false,
            sprites: [SpriteUnit::default(); 8],
            input: InputState::default(),
        };
        amiga.agnus.begin_line();
        amiga.denise.begin_of_line(amiga.agnus.first_bpl1_h);
        (amiga, sender)
    }

    #[must_use]
    pub fn state(&self) -> ExecState {
        self.state
    }

    #[must_use]
    pub fn cycle(&self) -> Cycle {
        self.cycle
    }

    #[must_use]
    pub fn frame(&self) -> u64 {
        self.frame
    }

    // --- power and run state --------------------------------------------

    pub fn power_on(&mut self) -> Result<(), AmigaError> {
        if self.state != ExecState::Off {
            return Err(AmigaError::PoweredOn);
        }
        self.hard_reset();
        self.state = ExecState::Paused;
        Ok(())
    }

    pub fn power_off(&mut self) -> Result<(), AmigaError> {
        if self.state == ExecState::Off {
            return Err(AmigaError::PoweredOff);
        }
        self.state = ExecState::Off;
        Ok(())
    }

    pub fn run(&mut self) -> Result<(), AmigaError> {
        match self.state {
            ExecState::Off => Err(AmigaError::PoweredOff),
            _ => {
                self.state = ExecState::Running;
                Ok(())
            }
        }
    }

    pub fn pause(&mut self) -> Result<(), AmigaError> {
        match self.state {
            ExecState::Off => Err(AmigaError::PoweredOff),
            _ => {
                self.state = ExecState::Paused;
                Ok(())
            }
        }
    }

    /// Nested suspension: the first call parks the emulation at the next
    /// event boundary; `resume` calls unwind it.
    pub fn suspend(&mut self) {
        self.suspend_depth += 1;
    }

    pub fn resume(&mut self) {
        self.suspend_depth = self.suspend_depth.saturating_sub(1);
    }

    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.suspend_depth > 0
    }

    /// Soft reset: what the RESET line clears.
    pub fn reset(&mut self) {
        self.agnus.reset(false);
        self.copper.reset();
        self.blitter.reset();
        self.denise.reset(false);
        self.paula.reset(false);
        self.cia_a.reset();
        self.cia_b.reset();
        self.memory.reset(false);
        self.restart_timing();
    }

    /// Hard reset: power-on state.
    pub fn hard_reset(&mut self) {
        self.agnus.reset(true);
        self.copper.reset();
        self.blitter.reset();
        self.denise.reset(true);
        self.paula.reset(true);
        self.cia_a.reset();
        self.cia_b.reset();
        self.memory.reset(true);
        self.frame = 0;
        self.restart_timing();
    }

    fn restart_timing(&mut self) {
        self.wheel.clear();
        self.cycle = Cycle::ZERO;
        self.eclock_phase = 0;
        self.line_had_bpl_dma = false;
        self.sprites = [SpriteUnit::default(); 8];
        self.agnus.begin_line();
        self.denise.begin_of_line(self.agnus.first_bpl1_h);
    }

    /// Resume timing from a restored snapshot.
    pub(crate) fn restore_timing(&mut self, cycle: u64, frame: u64) {
        self.wheel.restart_at(Cycle(cycle));
        self.cycle = Cycle(cycle);
        self.frame = frame;
        self.eclock_phase = 0;
        self.line_had_bpl_dma = false;
    }

    // --- main loop ------------------------------------------------------

    /// Advance up to `ccks` colour clocks; stops early at a suspension
    /// point. Returns the number actually executed.
    pub fn advance(&mut self, ccks: u64) -> u64 {
        let mut executed = 0;
        while executed < ccks {
            if self.suspend_depth > 0 || self.state != ExecState::Running {
                break;
            }
            self.emulate_cck();
            executed += 1;
        }
        executed
    }

    /// Emulate exactly one frame boundary to the next (test and step use).
    pub fn emulate_frame(&mut self) {
        let frame = self.frame;
        while self.frame == frame {
            self.emulate_cck();
        }
    }

    /// One colour clock: drain due events, execute the DMA slot decision,
    /// advance the beam.
    pub fn emulate_cck(&mut self) {
        self.cycle += 1;
        let cycle = self.cycle;

        while let Some(event) = self.wheel.pop_due(cycle) {
            self.service(event);
        }
        self.wheel.sync(cycle);

        let h = self.agnus.beam.h;
        self.agnus.update_h_window(h);
        self.execute_dma_slot(h);

        self.copper
            .check_wait(self.agnus.beam.v, self.agnus.beam.h);
        self.paula.tick_audio();

        self.eclock_phase += 1;
        if self.eclock_phase == CCKS_PER_ECLOCK {
            self.eclock_phase = 0;
            self.cia_a.tick_eclock();
            self.cia_b.tick_eclock();
        }
        if self.cia_a.irq_active() {
            self.paula.request_interrupt(INT_PORTS);
        }
        if self.cia_b.irq_active() {
            self.paula.request_interrupt(INT_EXTER);
        }
        // The overlay follows CIA-A port A bit 0.
        self.memory.overlay = self.cia_a.port_a_output() & 0x01 != 0;

        match self.agnus.beam.advance(self.agnus.interlace()) {
            BeamEdge::None => {}
            BeamEdge::EndOfLine => {
                self.wheel
                    .schedule(EventSlot::Beam, cycle, EventKind::EndOfLine, 0);
                while let Some(event) = self.wheel.pop_due(cycle) {
                    self.service(event);
                }
            }
            BeamEdge::EndOfFrame => {
                self.wheel
                    .schedule(EventSlot::Beam, cycle, EventKind::EndOfFrame, 0);
                while let Some(event) = self.wheel.pop_due(cycle) {
                    self.service(event);
                }
            }
        }
    }

    /// Wheel event dispatch.
    fn service(&mut self, event: PendingEvent) {
        match (event.slot, event.kind) {
            (EventSlot::Beam, EventKind::EndOfLine) => self.end_of_line(false),
            (EventSlot::Beam, EventKind::EndOfFrame) => self.end_of_line(true),
            (EventSlot::Blitter, EventKind::BltStep) => self.blitter_step(),
            (EventSlot::RasterIrq, EventKind::RasTrigger) => {
                self.paula.request_interrupt(INT_VERTB);
            }
            (EventSlot::Secondary, EventKind::SecInspect) => self.publish_inspection(),
            _ => {
                trace!("unhandled event {:?}/{:?}", event.slot, event.kind);
            }
        }
    }

    /// The line that just finished wraps up, then the new line is set up.
    fn end_of_line(&mut self, end_of_frame: bool) {
        // The beam has already wrapped; the finished line is the previous
        // one. On a frame wrap in interlace the LOF toggle has also flipped,
        // so the finished field used the opposite length.
        let finished_v = if end_of_frame {
            let finished_long = if self.agnus.interlace() {
                !self.agnus.beam.long_frame
            } else {
                self.agnus.beam.long_frame
            };
            self.agnus.beam.standard.lines_per_frame(finished_long) - 1
        } else {
            self.agnus.beam.v - 1
        };

        self.denise.end_of_line(
            finished_v,
            self.agnus.v_flop,
            self.agnus.line_is_blank(),
            self.agnus.h_flop_on,
            self.agnus.h_flop_off,
        );
        if self.line_had_bpl_dma {
            self.agnus.add_bpl_modulos();
            self.line_had_bpl_dma = false;
        }
        // CIA-B counts scanlines through its TOD input.
        self.cia_b.tod_pulse();

        if end_of_frame {
            self.end_of_frame();
        }

        if self.agnus.beam.v == SPRITE_DMA_FIRST_LINE {
            for sprite in &mut self.sprites {
                sprite.awaiting_ctl = true;
            }
        }

        self.agnus.begin_line();
        self.denise.begin_of_line(self.agnus.first_bpl1_h);
        self.copper.check_wait(self.agnus.beam.v, 0);
    }

    fn end_of_frame(&mut self) {
        // The vertical blank interrupt and the inspector flip are ordinary
        // wheel events; they dispatch after this handler in slot order.
        self.wheel
            .schedule(EventSlot::RasterIrq, self.cycle, EventKind::RasTrigger, 0);
        self.wheel
            .schedule(EventSlot::Secondary, self.cycle, EventKind::SecInspect, 0);

        if self.agnus.dma_enabled(DMA_COP) {
            self.copper.restart_cop1();
        }
        // CIA-A counts frames through its TOD input.
        self.cia_a.tod_pulse();

        self.denise
            .prepare_for_next_frame(self.agnus.beam.long_frame, self.agnus.interlace());

        self.frame += 1;
        self.drain_commands();
    }

    fn publish_inspection(&mut self) {
        let info = MachineInfo {
            cycle: self.cycle.get(),
            frame: self.frame,
            agnus: self.agnus.info(),
            denise: self.denise.info(),
            paula: self.paula.info(),
            cia_a: self.cia_a.info(),
            cia_b: self.cia_b.info(),
        };
        self.inspector.publish(info);
    }

    // --- DMA slot execution ---------------------------------------------

    fn execute_dma_slot(&mut self, h: u16) {
        let owner = self.agnus.slot_owner(
            h,
            self.copper.wants_bus(),
            self.blitter.is_busy() && self.agnus.dma_enabled(DMA_BLT),
        );
        match owner {
            SlotOwner::Bitplane(plane) => self.bitplane_fetch(plane),
            SlotOwner::Sprite(nr) => self.sprite_fetch(nr, h),
            SlotOwner::Disk => self.disk_slot(),
            SlotOwner::Audio(channel) => self.audio_slot(usize::from(channel)),
            SlotOwner::Copper => self.copper_slot(),
            SlotOwner::Refresh | SlotOwner::Blitter | SlotOwner::Cpu => {}
        }
    }

    fn bitplane_fetch(&mut self, plane: u8) {
        let plane = usize::from(plane);
        let word = self
            .memory
            .read_dma16(BusAgent::Bitplane, self.agnus.bpl_pt[plane]);
        self.agnus.bpl_pt[plane] = self.agnus.bpl_pt[plane].wrapping_add(2);
        self.denise.poke_bpldat(plane, word);
        self.line_had_bpl_dma = true;

        // BPL1 ends the fetch group: load the shifters and decode.
        if plane == 0 {
            self.denise.load_shift_registers();
            self.denise.draw_group(self.agnus.hires());
        }
    }

    /// Sprite slot pair: the even slot fetches POS (or DATA), the odd slot
    /// CTL (or DATB), per the unit's vertical state.
    fn sprite_fetch(&mut self, nr: u8, h: u16) {
        let nr = usize::from(nr);
        let first_slot = (h - 0x0B) % 2 == 0;
        let line = self.agnus.beam.v;
        let unit = self.sprites[nr];

        let active = line >= unit.vstart && line < unit.vstop && !unit.awaiting_ctl;
        if !active && !unit.awaiting_ctl && line != unit.vstop {
            return;
        }

        let word = self
            .memory
            .read_dma16(BusAgent::Sprite, self.agnus.spr_pt[nr]);
        self.agnus.spr_pt[nr] = self.agnus.spr_pt[nr].wrapping_add(2);

        if unit.awaiting_ctl || line == unit.vstop {
            if first_slot {
                self.denise.poke_spr_pos(nr, word);
                self.sprites[nr].vstart =
                    ((word >> 8) & 0xFF) | (self.sprites[nr].vstart & 0x100);
                self.sprites[nr].awaiting_ctl = true;
            } else {
                self.denise.poke_spr_ctl(nr, word);
                let unit = &mut self.sprites[nr];
                unit.vstart = (unit.vstart & 0xFF) | (((word >> 2) & 0x01) << 8);
                unit.vstop = ((word >> 8) & 0xFF) | (((word >> 1) & 0x01) << 8);
                unit.awaiting_ctl = false;
            }
        } else if first_slot {
            self.denise.poke_spr_data(nr, word);
        } else {
            self.denise.poke_spr_datb(nr, word);
        }
    }

    fn disk_slot(&mut self) {
        match self.paula.disk.dma_slot() {
            DiskDmaResult::Idle => {}
            DiskDmaResult::SyncFound => self.paula.request_interrupt(INT_DSKSYN),
            DiskDmaResult::Word(word) => {
                self.memory
                    .write_dma16(BusAgent::Disk, self.agnus.dsk_pt, word);
                self.agnus.dsk_pt = self.agnus.dsk_pt.wrapping_add(2);
            }
            DiskDmaResult::Done => self.paula.request_interrupt(INT_DSKBLK),
        }
    }

    fn audio_slot(&mut self, channel: usize) {
        if self.paula.audio_dma_request(channel) {
            let word = self
                .memory
                .read_dma16(BusAgent::Audio, self.paula.audio_pointer(channel));
            self.paula.audio_dma_word(channel, word);
        }
    }

    fn copper_slot(&mut self) {
        self.memory.stats.copper += 1;
        let v = self.agnus.beam.v;
        let h = self.agnus.beam.h;
        let move_result = {
            let memory = &self.memory;
            self.copper.tick(v, h, |addr| memory.read_chip16(addr))
        };
        if let Some((reg, value)) = move_result {
            self.poke_custom16(reg, value);
        }
    }

    fn blitter_step(&mut self) {
        if !self.agnus.dma_enabled(DMA_BLT) {
            // Blitter DMA disabled mid-blit: retry next line.
            self.wheel.schedule_rel(
                EventSlot::Blitter,
                u64::from(CCKS_PER_LINE),
                EventKind::BltStep,
                0,
            );
            return;
        }
        let done = self.blitter.step(&mut ChipBus(&mut self.memory));
        self.memory.stats.blitter += 1;
        if done {
            self.paula.request_interrupt(INT_BLIT);
            debug!("blit complete at cycle {}", self.cycle);
        } else {
            let delay = self.blitter.ccks_per_step();
            self.wheel
                .schedule_rel(EventSlot::Blitter, delay, EventKind::BltStep, 0);
        }
    }

    // --- custom register file -------------------------------------------

    /// Chipset register write dispatch.
    pub fn poke_custom16(&mut self, offset: u16, value: u16) {
        use custom_regs as reg;
        let offset = offset & 0x1FE;
        match offset {
            reg::DSKPTH => self.agnus.dsk_pt = (self.agnus.dsk_pt & 0xFFFF) | (u32::from(value & 0x7) << 16),
            reg::DSKPTL => self.agnus.dsk_pt = (self.agnus.dsk_pt & 0xFFFF_0000) | u32::from(value & 0xFFFE),
            reg::DSKLEN => {
                let wordsync = self.paula.wordsync_enabled();
                self.paula.disk.poke_dsklen(value, wordsync);
            }
            reg::DSKSYNC => self.paula.disk.poke_dsksync(value),
            reg::VPOSW => trace!("VPOSW write ignored ({value:04X})"),
            reg::COPCON => self.copper.poke_copcon(value),
            reg::SERDAT | reg::SERPER | reg::POTGO => {}
            reg::BLTCON0 => self.blitter.bltcon0 = value,
            reg::BLTCON1 => self.blitter.bltcon1 = value,
            reg::BLTAFWM => self.blitter.afwm = value,
            reg::BLTALWM => self.blitter.alwm = value,
            reg::BLTCPTH => self.blitter.cpt = (self.blitter.cpt & 0xFFFF) | (u32::from(value & 0x7) << 16),
            reg::BLTCPTL => self.blitter.cpt = (self.blitter.cpt & 0xFFFF_0000) | u32::from(value & 0xFFFE),
            reg::BLTBPTH => self.blitter.bpt = (self.blitter.bpt & 0xFFFF) | (u32::from(value & 0x7) << 16),
            reg::BLTBPTL => self.blitter.bpt = (self.blitter.bpt & 0xFFFF_0000) | u32::from(value & 0xFFFE),
            reg::BLTAPTH => self.blitter.apt = (self.blitter.apt & 0xFFFF) | (u32::from(value & 0x7) << 16),
            reg::BLTAPTL => self.blitter.apt = (self.blitter.apt & 0xFFFF_0000) | u32::from(value & 0xFFFE),
            reg::BLTDPTH => self.blitter.dpt = (self.blitter.dpt & 0xFFFF) | (u32::from(value & 0x7) << 16),
            reg::BLTDPTL => self.blitter.dpt = (self.blitter.dpt & 0xFFFF_0000) | u32::from(value & 0xFFFE),
            reg::BLTSIZE => {
                self.blitter.poke_bltsize(value);
                match self.config.blitter_accuracy {
                    Accuracy::Fast => {
                        while !self.blitter_finish_one_step() {}
                        self.paula.request_interrupt(INT_BLIT);
                    }
                    Accuracy::Exact => {
                        let delay = self.blitter.ccks_per_step();
                        self.wheel
                            .schedule_rel(EventSlot::Blitter, delay, EventKind::BltStep, 0);
                    }
                }
            }
            reg::BLTCMOD => self.blitter.cmod = value as i16,
            reg::BLTBMOD => self.blitter.bmod = value as i16,
            reg::BLTAMOD => self.blitter.amod = value as i16,
            reg::BLTDMOD => self.blitter.dmod = value as i16,
            reg::BLTCDAT => self.blitter.cdat = value,
            reg::BLTBDAT => self.blitter.bdat = value,
            reg::BLTADAT => self.blitter.adat = value,
            reg::COP1LCH => self.copper.poke_cop1lc_hi(value),
            reg::COP1LCL => self.copper.poke_cop1lc_lo(value),
            reg::COP2LCH => self.copper.poke_cop2lc_hi(value),
            reg::COP2LCL => self.copper.poke_cop2lc_lo(value),
            reg::COPJMP1 => self.copper.restart_cop1(),
            reg::COPJMP2 => self.copper.restart_cop2(),
            reg::DIWSTRT => self.agnus.poke_diwstrt(value),
            reg::DIWSTOP => self.agnus.poke_diwstop(value),
            reg::DDFSTRT => self.agnus.poke_ddfstrt(value),
            reg::DDFSTOP => self.agnus.poke_ddfstop(value),
            reg::DMACON => {
                self.agnus.poke_dmacon(value);
                self.paula.sync_audio_dma(self.agnus.dmacon);
                if self.blitter.is_busy()
                    && self.agnus.dma_enabled(DMA_BLT)
                    && !self.wheel.is_armed(EventSlot::Blitter)
                {
                    let delay = self.blitter.ccks_per_step();
                    self.wheel
                        .schedule_rel(EventSlot::Blitter, delay, EventKind::BltStep, 0);
                }
            }
            reg::CLXCON => self.denise.poke_clxcon(value),
            reg::INTENA => self.paula.poke_intena(value),
            reg::INTREQ => self.paula.poke_intreq(value),
            reg::ADKCON => self.paula.poke_adkcon(value),
            _ if (reg::AUD0_BASE..reg::AUD0_BASE + 4 * reg::AUD_CHANNEL_SPAN).contains(&offset) => {
                let channel = usize::from((offset - reg::AUD0_BASE) / reg::AUD_CHANNEL_SPAN);
                match (offset - reg::AUD0_BASE) % reg::AUD_CHANNEL_SPAN {
                    0x0 => self.paula.poke_aud_lc_hi(channel, value),
                    0x2 => self.paula.poke_aud_lc_lo(channel, value),
                    0x4 => self.paula.poke_aud_len(channel, value),
                    0x6 => self.paula.poke_aud_per(channel, value),
                    0x8 => self.paula.poke_aud_vol(channel, value),
                    0xA => self.paula.poke_aud_dat(channel, value),
                    _ => {}
                }
            }
            _ if (reg::BPL1PTH..reg::BPL_PT_END).contains(&offset) => {
                let index = usize::from((offset - reg::BPL1PTH) / 4);
                if offset % 4 == 0 {
                    self.agnus.poke_bpl_pt_hi(index, value);
                } else {
                    self.agnus.poke_bpl_pt_lo(index, value);
                }
            }
            reg::BPLCON0 => {
                self.agnus.poke_bplcon0(value);
                self.denise.poke_bplcon0(value);
            }
            reg::BPLCON1 => self.denise.poke_bplcon1(value),
            reg::BPLCON2 => self.denise.poke_bplcon2(value),
            reg::BPL1MOD => self.agnus.bpl1mod = (value & 0xFFFE) as i16,
            reg::BPL2MOD => self.agnus.bpl2mod = (value & 0xFFFE) as i16,
            _ if (reg::BPL1DAT..reg::BPL_DAT_END).contains(&offset) => {
                let plane = usize::from((offset - reg::BPL1DAT) / 2);
                self.denise.poke_bpldat(plane, value);
                if plane == 0 {
                    self.denise.load_shift_registers();
                }
            }
            _ if (reg::SPR0PTH..reg::SPR_PT_END).contains(&offset) => {
                let index = usize::from((offset - reg::SPR0PTH) / 4);
                if offset % 4 == 0 {
                    self.agnus.poke_spr_pt_hi(index, value);
                } else {
                    self.agnus.poke_spr_pt_lo(index, value);
                }
            }
            _ if (reg::SPR0POS..reg::SPR_END).contains(&offset) => {
                let index = usize::from((offset - reg::SPR0POS) / 8);
                match (offset - reg::SPR0POS) % 8 {
                    0 => {
                        self.denise.poke_spr_pos(index, value);
                        self.sprites[index].vstart =
                            ((value >> 8) & 0xFF) | (self.sprites[index].vstart & 0x100);
                    }
                    2 => {
                        self.denise.poke_spr_ctl(index, value);
                        let unit = &mut self.sprites[index];
                        unit.vstart = (unit.vstart & 0xFF) | (((value >> 2) & 0x01) << 8);
                        unit.vstop = ((value >> 8) & 0xFF) | (((value >> 1) & 0x01) << 8);
                    }
                    4 => self.denise.poke_spr_data(index, value),
                    6 => self.denise.poke_spr_datb(index, value),
                    _ => {}
                }
            }
            _ if (reg::COLOR00..reg::COLOR_END).contains(&offset) => {
                let index = usize::from((offset - reg::COLOR00) / 2);
                self.denise.poke_color(index, value, self.agnus.beam.h);
            }
            _ => {
                trace!("write to unused register ${offset:03X} = {value:04X}");
            }
        }
    }

    /// Chipset register read dispatch.
    pub fn peek_custom16(&mut self, offset: u16) -> u16 {
        use custom_regs as reg;
        let offset = offset & 0x1FE;
        match offset {
            reg::DMACONR => {
                let busy = if self.blitter.is_busy() { 0x4000 } else { 0 };
                (self.agnus.dmacon & 0x07FF) | busy
            }
            reg::VPOSR => {
                let lof = if self.agnus.beam.long_frame { 0x8000 } else { 0 };
                lof | ((self.agnus.beam.v >> 8) & 0x1)
            }
            reg::VHPOSR => ((self.agnus.beam.v & 0xFF) << 8) | (self.agnus.beam.h & 0xFF),
            reg::CLXDAT => self.denise.peek_clxdat(),
            reg::ADKCONR => self.paula.adkcon,
            reg::INTENAR => self.paula.intena,
            reg::INTREQR => self.paula.intreq,
            reg::JOY0DAT => self.input.joy0dat(),
            reg::JOY1DAT => self.input.joy1dat(),
            reg::POTGOR => 0xFFFF,
            reg::SERDATR => 0x3000, // transmit buffer empty, shift empty
            reg::DSKBYTR => {
                let reading =
                    !matches!(self.paula.disk.state, commodore_paula::DiskState::Idle);
                if reading {
                    0x8000 | u16::from(self.paula.disk.dsklen & 0x4000 != 0) << 14
                } else {
                    0
                }
            }
            reg::BLTDDAT => 0,
            _ => {
                // Write-only and unused registers float.
                u16::from(self.memory.floating_bus) << 8 | u16::from(self.memory.floating_bus)
            }
        }
    }

    /// Debugger-surface register read with access checking.
    pub fn debug_read_register(&mut self, offset: u16) -> Result<u16, AmigaError> {
        match custom_regs::access(offset) {
            custom_regs::RegAccess::WriteOnly => Err(AmigaError::RegWriteOnly(offset)),
            custom_regs::RegAccess::Unused => Err(AmigaError::RegUnused(offset)),
            _ => Ok(self.peek_custom16(offset)),
        }
    }

    /// Debugger-surface register write with access checking.
    pub fn debug_write_register(&mut self, offset: u16, value: u16) -> Result<(), AmigaError> {
        match custom_regs::access(offset) {
            custom_regs::RegAccess::ReadOnly => Err(AmigaError::RegReadOnly(offset)),
            custom_regs::RegAccess::Unused => Err(AmigaError::RegUnused(offset)),
            _ => {
                self.poke_custom16(offset, value);
                Ok(())
            }
        }
    }

    // --- media ----------------------------------------------------------

    /// Mount a disk image; identification is by length alone.
    pub fn insert_disk_bytes(&mut self, bytes: Vec<u8>) -> Result<(), AmigaError> {
        let len = bytes.len();
        let adf = Adf::from_bytes(bytes).map_err(|_| {
            if len < format_adf::ADF_SIZE_DD {
                AmigaError::FileTooSmall
            } else {
                AmigaError::FileTooLarge
            }
        })?;
        self.paula.disk.insert_disk(adf);
        Ok(())
    }

    pub fn eject_disk(&mut self) -> Option<Adf> {
        self.paula.disk.eject_disk()
    }

    /// Interpret the mounted image as an AmigaDOS volume (import/export
    /// path of the filesystem model).
    pub fn mounted_volume(&self) -> Result<amiga_fs::FileSystem, AmigaError> {
        let disk = self.paula.disk.disk().ok_or(AmigaError::DiskMissing)?;
        Ok(amiga_fs::FileSystem::from_adf(disk)?)
    }

    // --- command processing ---------------------------------------------

    /// Drain the host command queue (runs at frame boundaries).
    fn drain_commands(&mut self) {
        while let Some(command) = self.commands.next() {
            let (name, result) = self.execute_command(command);
            self.commands.report(name, result);
        }
    }

    fn execute_command(&mut self, command: Command) -> (&'static str, Result<(), AmigaError>) {
        match command {
            Command::Reset => {
                self.reset();
                ("RESET", Ok(()))
            }
            Command::HardReset => {
                self.hard_reset();
                ("HARD_RESET", Ok(()))
            }
            Command::InsertDisk(bytes) => ("INSERT_DISK", self.insert_disk_bytes(bytes)),
            Command::EjectDisk => {
                self.eject_disk();
                ("EJECT_DISK", Ok(()))
            }
            Command::KeyPress(code) => {
                self.cia_a.receive_serial_byte(keyboard_wire_byte(code, false));
                ("KEY_PRESS", Ok(()))
            }
            Command::KeyRelease(code) => {
                self.cia_a.receive_serial_byte(keyboard_wire_byte(code, true));
                ("KEY_RELEASE", Ok(()))
            }
            Command::MouseMove { dx, dy } => {
                self.input.mouse_x = self.input.mouse_x.wrapping_add(dx as u8);
                self.input.mouse_y = self.input.mouse_y.wrapping_add(dy as u8);
                ("MOUSE_MOVE", Ok(()))
            }
            Command::MouseButton { button, down } => {
                if button == 0 {
                    self.input.mouse_left = down;
                    self.update_fire_lines();
                }
                ("MOUSE_BUTTON", Ok(()))
            }
            Command::JoystickAxis { horizontal, vertical } => {
                self.input.joy_horizontal = horizontal;
                self.input.joy_vertical = vertical;
                ("JOYSTICK_AXIS", Ok(()))
            }
            Command::JoystickButton { button, down } => {
                if button == 0 {
                    self.input.joy_fire = down;
                    self.update_fire_lines();
                }
                ("JOYSTICK_BUTTON", Ok(()))
            }
            Command::PowerOn => ("POWER_ON", self.power_on()),
            Command::PowerOff => ("POWER_OFF", self.power_off()),
            Command::Pause => ("PAUSE", self.pause()),
            Command::Run => ("RUN", self.run()),
            Command::StepInto => {
                // With the CPU external, a step is one colour clock.
                self.emulate_cck();
                ("STEP_INTO", Ok(()))
            }
            Command::StepOver => {
                // Step over advances a whole rasterline.
                for _ in 0..CCKS_PER_LINE {
                    self.emulate_cck();
                }
                ("STEP_OVER", Ok(()))
            }
        }
    }

    /// Fire buttons are active-low inputs on CIA-A port A.
    fn update_fire_lines(&mut self) {
        let mut pins = self.cia_a.external_a | 0xC0;
        if self.input.mouse_left {
            pins &= !0x40; // /FIR0
        }
        if self.input.joy_fire {
            pins &= !0x80; // /FIR1
        }
        self.cia_a.external_a = pins;
    }

    /// Process pending commands immediately (test hook; the run loop does
    /// this at frame boundaries).
    pub fn process_commands_now(&mut self) {
        self.drain_commands();
    }

    fn blitter_finish_one_step(&mut self) -> bool {
        self.blitter.step(&mut ChipBus(&mut self.memory))
    }

    /// Configuration changes route through here so power locks apply.
    pub fn configure(&mut self, option: ConfigOption, value: i64) -> Result<(), AmigaError> {
        let powered = self.state != ExecState::Off;
        self.config.set_option(option, value, powered)?;
        // Propagate the live-tunable knobs.
        self.agnus.pointer_drops = self.config.pointer_drops;
        self.cia_a.tod_bug = self.config.tod_bug;
        self.cia_b.tod_bug = self.config.tod_bug;
        self.memory.floating_bus = self.config.floating_bus_pattern;
        Ok(())
    }

    /// The stable (host-readable) frame buffer.
    #[must_use]
    pub fn stable_frame(&self) -> &commodore_denise::FrameBuffer {
        self.denise.frames.stable()
    }
}

/// Keyboard wire format: the 7-bit code and the release flag, inverted.
fn keyboard_wire_byte(code: u8, release: bool) -> u8 {
    !((code << 1) | u8::from(release))
}

/// The blitter's view of chip memory.
struct ChipBus<'a>(&'a mut Memory);

impl commodore_agnus::BlitterBus for ChipBus<'_> {
    fn read_word(&mut self, addr: u32) -> u16 {
        self.0.read_chip16(addr)
    }

    fn write_word(&mut self, addr: u32, value: u16) {
        self.0.write_chip16(addr, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_rom() -> Vec<u8> {
        vec![0u8; 256 * 1024]
    }

    fn powered_machine() -> Amiga {
        let (mut amiga, _tx) = Amiga::new(AmigaConfig::default(), small_rom());
        amiga.power_on().expect("power on");
        amiga.run().expect("run");
        amiga
    }

    #[test]
    fn power_state_transitions_are_checked() {
        let (mut amiga, _tx) = Amiga::new(AmigaConfig::default(), small_rom());
        assert_eq!(amiga.run(), Err(AmigaError::PoweredOff));
        amiga.power_on().expect("power on");
        assert_eq!(amiga.power_on(), Err(AmigaError::PoweredOn));
        amiga.run().expect("run");
        amiga.pause().expect("pause");
        amiga.power_off().expect("off");
        assert_eq!(amiga.pause(), Err(AmigaError::PoweredOff));
    }

    #[test]
    fn beam_and_cycle_advance_together() {
        let mut amiga = powered_machine();
        let executed = amiga.advance(100);
        assert_eq!(executed, 100);
        assert_eq!(amiga.cycle().get(), 100);
        assert_eq!(amiga.agnus.beam.h, 100);
    }

    #[test]
    fn suspension_parks_at_the_next_boundary() {
        let mut amiga = powered_machine();
        amiga.suspend();
        assert_eq!(amiga.advance(100), 0, "suspended machine executes nothing");
        amiga.resume();
        assert_eq!(amiga.advance(100), 100);
    }

    #[test]
    fn frame_counter_ticks_once_per_frame() {
        let mut amiga = powered_machine();
        let per_frame = u64::from(CCKS_PER_LINE) * 313;
        amiga.advance(per_frame);
        assert_eq!(amiga.frame(), 1);
        assert_eq!(amiga.agnus.beam.v, 0);
    }

    #[test]
    fn vertb_fires_at_frame_wrap() {
        let mut amiga = powered_machine();
        amiga.poke_custom16(custom_regs::INTENA, 0x8000 | 0x4000 | 0x0020);
        let per_frame = u64::from(CCKS_PER_LINE) * 313;
        amiga.advance(per_frame);
        assert_ne!(amiga.paula.intreq & (1 << INT_VERTB), 0);
        assert_eq!(amiga.paula.ipl(), 3);
    }

    #[test]
    fn dmaconr_reflects_blitter_busy() {
        let mut amiga = powered_machine();
        amiga.poke_custom16(custom_regs::DMACON, 0x8000 | 0x0200 | 0x0040);
        amiga.poke_custom16(custom_regs::BLTCON0, 0x09F0); // A->D
        amiga.poke_custom16(custom_regs::BLTSIZE, (1 << 6) | 1);
        assert_ne!(amiga.peek_custom16(custom_regs::DMACONR) & 0x4000, 0);

        amiga.advance(64);
        assert_eq!(
            amiga.peek_custom16(custom_regs::DMACONR) & 0x4000,
            0,
            "blit finished through event steps"
        );
        assert_ne!(amiga.paula.intreq & (1 << INT_BLIT), 0);
    }

    #[test]
    fn fast_blitter_accuracy_completes_synchronously() {
        let (mut amiga, _tx) = Amiga::new(AmigaConfig::default(), small_rom());
        amiga.power_on().expect("on");
        amiga.configure(ConfigOption::BlitterAccuracy, 0).expect("fast");
        amiga.memory.write_chip16(0x1000, 0xABCD);
        amiga.poke_custom16(custom_regs::BLTCON0, 0x09F0);
        amiga.poke_custom16(custom_regs::BLTAPTL, 0x1000);
        amiga.poke_custom16(custom_regs::BLTDPTL, 0x2000);
        amiga.poke_custom16(custom_regs::BLTSIZE, (1 << 6) | 1);
        assert_eq!(amiga.memory.read_chip16(0x2000), 0xABCD);
    }

    #[test]
    fn copper_move_reaches_the_color_table() {
        let mut amiga = powered_machine();
        // Copper list: MOVE $0ABC to COLOR00, then park.
        amiga.memory.write_chip16(0x100, 0x0180);
        amiga.memory.write_chip16(0x102, 0x0ABC);
        amiga.memory.write_chip16(0x104, 0xFFFF);
        amiga.memory.write_chip16(0x106, 0xFFFE);
        amiga.poke_custom16(custom_regs::COP1LCL, 0x100);
        amiga.poke_custom16(custom_regs::DMACON, 0x8000 | 0x0200 | 0x0080);
        amiga.poke_custom16(custom_regs::COPJMP1, 0);

        amiga.advance(u64::from(CCKS_PER_LINE) * 320);
        // The recorded colour change lands when a visible line resolves.
        assert_eq!(amiga.denise.colorizer.color(0), 0x0ABC);
    }

    #[test]
    fn overlay_follows_cia_a_port_bit() {
        let mut amiga = powered_machine();
        assert!(amiga.memory.overlay, "ROM overlay active at power-on");
        // Drive the overlay pin low: DDRA bit 0 output, PRA bit 0 zero.
        amiga.cia_a.write(0x02, 0x01);
        amiga.cia_a.write(0x00, 0x00);
        amiga.advance(1);
        assert!(!amiga.memory.overlay);
    }

    #[test]
    fn commands_drain_at_frame_boundaries() {
        let (mut amiga, mut tx) = Amiga::new(AmigaConfig::default(), small_rom());
        amiga.power_on().expect("on");
        amiga.run().expect("run");

        tx.submit(Command::JoystickAxis {
            horizontal: 1,
            vertical: 0,
        })
        .expect("queued");
        let per_frame = u64::from(CCKS_PER_LINE) * 313;
        amiga.advance(per_frame);

        let result = tx.poll_result().expect("processed at frame boundary");
        assert_eq!(result.command, "JOYSTICK_AXIS");
        assert_eq!(result.result, Ok(()));
        assert_eq!(amiga.peek_custom16(custom_regs::JOY1DAT) & 0x0003, 0x0003);
    }

    #[test]
    fn insert_disk_validates_size() {
        let mut amiga = powered_machine();
        assert_eq!(
            amiga.insert_disk_bytes(vec![0; 1000]),
            Err(AmigaError::FileTooSmall)
        );
        amiga
            .insert_disk_bytes(vec![0; format_adf::ADF_SIZE_DD])
            .expect("valid image");
        assert!(amiga.paula.disk.has_disk());
    }

    #[test]
    fn debug_register_access_is_classified() {
        let mut amiga = powered_machine();
        assert_eq!(
            amiga.debug_write_register(custom_regs::DMACONR, 0),
            Err(AmigaError::RegReadOnly(custom_regs::DMACONR))
        );
        assert_eq!(
            amiga.debug_read_register(custom_regs::DMACON),
            Err(AmigaError::RegWriteOnly(custom_regs::DMACON))
        );
        assert!(amiga.debug_read_register(custom_regs::VHPOSR).is_ok());
    }

    #[test]
    fn keyboard_bytes_use_the_wire_encoding() {
        assert_eq!(keyboard_wire_byte(0x45, false), !(0x45 << 1));
        assert_eq!(keyboard_wire_byte(0x45, true), !((0x45 << 1) | 1));
    }

    #[test]
    fn components_share_the_capability_set() {
        fn exercise<C: emu_core::Component>(component: &mut C) -> &'static str {
            let _ = component.inspect();
            component.reset(false);
            component.name()
        }

        let mut amiga = powered_machine();
        assert_eq!(exercise(&mut amiga.agnus), "Agnus");
        assert_eq!(exercise(&mut amiga.denise), "Denise");
        assert_eq!(exercise(&mut amiga.paula), "Paula");
        assert_eq!(exercise(&mut amiga.cia_a), "CIA-A");
    }

    #[test]
    fn mounted_volume_requires_a_disk() {
        let mut amiga = powered_machine();
        assert!(matches!(
            amiga.mounted_volume(),
            Err(AmigaError::DiskMissing)
        ));

        // A formatted image mounts and exposes its volume name.
        let mut fs = amiga_fs::FileSystem::format(
            format_adf::Density::Dd,
            amiga_fs::FsVolumeType::Ofs,
            "Workbench",
            true,
        );
        let adf = fs.to_adf().expect("export");
        amiga
            .insert_disk_bytes(adf.data().to_vec())
            .expect("mount image");
        let volume = amiga.mounted_volume().expect("interpret volume");
        assert_eq!(volume.name().as_str(), "Workbench");
    }

    #[test]
    fn inspector_snapshot_is_frame_consistent() {
        let mut amiga = powered_machine();
        let per_frame = u64::from(CCKS_PER_LINE) * 313;
        amiga.advance(per_frame + 500);
        let info = amiga.inspector.read();
        assert_eq!(info.frame, 1);
        assert_eq!(
            info.agnus.vpos, 0,
            "published at the frame boundary, not mid-frame"
        );
    }
}
