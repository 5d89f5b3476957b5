//! MOS 8520 Complex Interface Adapter.
//!
//! Two of these sit in every machine: CIA-A (keyboard, disk status, ROM
//! overlay) and CIA-B (disk control, serial handshake). Each provides two
//! 8-bit ports, a pair of chained interval timers clocked by the E-clock,
//! a 24-bit time-of-day counter pulsed by a sync line, a serial register,
//! and an interrupt controller feeding Paula's PORTS/EXTER bits.

use log::trace;

/// One interval timer. Timer B can additionally count timer A underflows.
#[derive(Debug, Clone, Copy)]
struct Timer {
    counter: u16,
    latch: u16,
    running: bool,
    oneshot: bool,
    force_load: bool,
    /// High byte frozen by a low-byte read until the high byte is read.
    read_hi_latch: Option<u8>,
}

impl Timer {
    fn new() -> Self {
        Self {
            counter: 0xFFFF,
            latch: 0xFFFF,
            running: false,
            oneshot: false,
            force_load: false,
            read_hi_latch: None,
        }
    }

    /// One E-clock step (or one timer-A underflow in chained mode).
    /// Returns true on underflow.
    fn count(&mut self) -> bool {
        if self.counter == 0 {
            self.counter = self.latch;
            if self.oneshot {
                self.running = false;
            }
            true
        } else {
            self.counter -= 1;
            false
        }
    }

    fn read_lo(&mut self) -> u8 {
        self.read_hi_latch = Some((self.counter >> 8) as u8);
        self.counter as u8
    }

    fn read_hi(&mut self) -> u8 {
        self.read_hi_latch
            .take()
            .unwrap_or((self.counter >> 8) as u8)
    }

    fn write_lo(&mut self, value: u8) {
        self.latch = (self.latch & 0xFF00) | u16::from(value);
    }

    /// Writing the high byte reloads a stopped timer; in one-shot mode it
    /// also starts it (8520 behavior).
    fn write_hi(&mut self, value: u8) -> bool {
        self.latch = (self.latch & 0x00FF) | (u16::from(value) << 8);
        if !self.running {
            self.counter = self.latch;
            if self.oneshot {
                self.running = true;
                return true;
            }
        }
        false
    }

    fn apply_control(&mut self, value: u8) {
        self.running = value & 0x01 != 0;
        self.oneshot = value & 0x08 != 0;
        if value & 0x10 != 0 {
            self.force_load = true;
        }
    }
}

// ICR bits.
const ICR_TA: u8 = 0x01;
const ICR_TB: u8 = 0x02;
const ICR_ALARM: u8 = 0x04;
const ICR_SP: u8 = 0x08;

/// Inspector record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CiaInfo {
    pub timer_a: u16,
    pub timer_b: u16,
    pub timer_a_running: bool,
    pub timer_b_running: bool,
    pub tod: u32,
    pub alarm: u32,
    pub icr_status: u8,
    pub icr_mask: u8,
}

pub struct Cia8520 {
    label: &'static str,
    port_a: u8,
    port_b: u8,
    ddr_a: u8,
    ddr_b: u8,
    /// Input levels on the pins not driven by the chip.
    pub external_a: u8,
    pub external_b: u8,

    timer_a: Timer,
    timer_b: Timer,
    cra: u8,
    crb: u8,

    icr_status: u8,
    icr_mask: u8,
    sdr: u8,

    tod: u32,
    alarm: u32,
    /// Reading the TOD high byte freezes a snapshot until the low byte is
    /// read; writing the high byte halts the counter until the low byte
    /// restarts it.
    tod_latch: Option<u32>,
    tod_halted: bool,
    /// Model the silicon defect some titles depend on: the alarm match
    /// fires one pulse early because the comparison happens before the
    /// increment carry settles.
    pub tod_bug: bool,
}

impl Cia8520 {
    #[must_use]
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            port_a: 0xFF,
            port_b: 0xFF,
            ddr_a: 0,
            ddr_b: 0,
            external_a: 0xFF,
            external_b: 0xFF,
            timer_a: Timer::new(),
            timer_b: Timer::new(),
            cra: 0,
            crb: 0,
            icr_status: 0,
            icr_mask: 0,
            sdr: 0,
            tod: 0,
            alarm: 0,
            tod_latch: None,
            tod_halted: false,
            tod_bug: false,
        }
    }

    /// RESET line: registers clear, the TOD counter keeps its value.
    pub fn reset(&mut self) {
        let tod = self.tod;
        let alarm = self.alarm;
        let external_a = self.external_a;
        let external_b = self.external_b;
        let tod_bug = self.tod_bug;
        *self = Self::new(self.label);
        self.tod = tod;
        self.alarm = alarm;
        self.external_a = external_a;
        self.external_b = external_b;
        self.tod_bug = tod_bug;
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// One E-clock tick for both timers, honoring the chain mode.
    pub fn tick_eclock(&mut self) {
        if self.timer_a.force_load {
            self.timer_a.counter = self.timer_a.latch;
            self.timer_a.force_load = false;
        }
        let mut a_underflow = false;
        if self.timer_a.running && self.cra & 0x20 == 0 {
            a_underflow = self.timer_a.count();
            if a_underflow {
                self.icr_status |= ICR_TA;
                if self.timer_a.oneshot {
                    self.cra &= !0x01;
                }
            }
        }

        if self.timer_b.force_load {
            self.timer_b.counter = self.timer_b.latch;
            self.timer_b.force_load = false;
        }
        if self.timer_b.running {
            let should_count = match (self.crb >> 5) & 0x03 {
                0x00 => true,
                0x02 | 0x03 => a_underflow,
                _ => false,
            };
            if should_count && self.timer_b.count() {
                self.icr_status |= ICR_TB;
                if self.timer_b.oneshot {
                    self.crb &= !0x01;
                }
            }
        }
    }

    /// Pulse the TOD counter from its sync input (CIA-A: VSYNC, CIA-B:
    /// HSYNC).
    pub fn tod_pulse(&mut self) {
        if self.tod_halted {
            return;
        }
        self.tod = self.tod.wrapping_add(1) & 0xFF_FFFF;
        if self.tod_bug {
            // Defective comparator: the match is evaluated before the
            // increment carry settles, so the alarm fires one pulse early.
            if (self.tod.wrapping_add(1) & 0xFF_FFFF) == self.alarm {
                trace!("CIA-{}: early TOD alarm (silicon bug model)", self.label);
                self.icr_status |= ICR_ALARM;
            }
        } else if self.tod == self.alarm {
            self.icr_status |= ICR_ALARM;
        }
    }

    /// A complete serial byte arrived (keyboard clocking CNT).
    pub fn receive_serial_byte(&mut self, byte: u8) {
        self.sdr = byte;
        self.icr_status |= ICR_SP;
    }

    #[must_use]
    pub fn irq_active(&self) -> bool {
        self.icr_status & self.icr_mask & 0x1F != 0
    }

    #[must_use]
    pub fn port_a_output(&self) -> u8 {
        (self.port_a & self.ddr_a) | (self.external_a & !self.ddr_a)
    }

    #[must_use]
    pub fn port_b_output(&self) -> u8 {
        (self.port_b & self.ddr_b) | (self.external_b & !self.ddr_b)
    }

    pub fn read(&mut self, reg: u8) -> u8 {
        match reg & 0x0F {
            0x00 => self.port_a_output(),
            0x01 => self.port_b_output(),
            0x02 => self.ddr_a,
            0x03 => self.ddr_b,
            0x04 => self.timer_a.read_lo(),
            0x05 => self.timer_a.read_hi(),
            0x06 => self.timer_b.read_lo(),
            0x07 => self.timer_b.read_hi(),
            0x08 => {
                // Reading the low byte releases the read latch.
                let value = self.tod_latch.take().unwrap_or(self.tod);
                value as u8
            }
            0x09 => (self.tod_latch.unwrap_or(self.tod) >> 8) as u8,
            0x0A => {
                // Reading the high byte freezes a consistent snapshot.
                if self.tod_latch.is_none() {
                    self.tod_latch = Some(self.tod);
                }
                (self.tod_latch.unwrap_or(self.tod) >> 16) as u8
            }
            0x0C => self.sdr,
            0x0D => {
                let any = if self.irq_active() { 0x80 } else { 0x00 };
                let result = self.icr_status | any;
                self.icr_status = 0;
                result
            }
            0x0E => self.cra,
            0x0F => self.crb,
            _ => 0xFF,
        }
    }

    pub fn write(&mut self, reg: u8, value: u8) {
        match reg & 0x0F {
            0x00 => self.port_a = value,
            0x01 => self.port_b = value,
            0x02 => self.ddr_a = value,
            0x03 => self.ddr_b = value,
            0x04 => self.timer_a.write_lo(value),
            0x05 => {
                if self.timer_a.write_hi(value) {
                    self.cra |= 0x01;
                }
            }
            0x06 => self.timer_b.write_lo(value),
            0x07 => {
                if self.timer_b.write_hi(value) {
                    self.crb |= 0x01;
                }
            }
            0x08 => {
                self.write_tod_byte(0, value);
                self.tod_halted = false;
            }
            0x09 => self.write_tod_byte(1, value),
            0x0A => {
                self.write_tod_byte(2, value);
                self.tod_halted = true;
            }
            0x0C => self.sdr = value,
            0x0D => {
                if value & 0x80 != 0 {
                    self.icr_mask |= value & 0x1F;
                } else {
                    self.icr_mask &= !(value & 0x1F);
                }
            }
            0x0E => {
                // The LOAD strobe (bit 4) never reads back.
                self.cra = value & !0x10;
                self.timer_a.apply_control(value);
            }
            0x0F => {
                self.crb = value & !0x10;
                self.timer_b.apply_control(value);
            }
            _ => {}
        }
    }

    /// CRB bit 7 selects whether TOD writes target the counter or alarm.
    fn write_tod_byte(&mut self, byte: u8, value: u8) {
        let shift = u32::from(byte) * 8;
        let mask = !(0xFFu32 << shift);
        let target = if self.crb & 0x80 != 0 {
            &mut self.alarm
        } else {
            &mut self.tod
        };
        *target = ((*target & mask) | (u32::from(value) << shift)) & 0xFF_FFFF;
    }

    #[must_use]
    pub fn tod_counter(&self) -> u32 {
        self.tod
    }

    /// Restore counter state from an inspection record (snapshot path).
    pub fn apply_info(&mut self, info: &CiaInfo) {
        self.timer_a.counter = info.timer_a;
        self.timer_a.running = info.timer_a_running;
        self.timer_b.counter = info.timer_b;
        self.timer_b.running = info.timer_b_running;
        self.tod = info.tod & 0xFF_FFFF;
        self.alarm = info.alarm & 0xFF_FFFF;
        self.icr_status = info.icr_status;
        self.icr_mask = info.icr_mask;
    }

    #[must_use]
    pub fn info(&self) -> CiaInfo {
        CiaInfo {
            timer_a: self.timer_a.counter,
            timer_b: self.timer_b.counter,
            timer_a_running: self.timer_a.running,
            timer_b_running: self.timer_b.running,
            tod: self.tod,
            alarm: self.alarm,
            icr_status: self.icr_status,
            icr_mask: self.icr_mask,
        }
    }
}

impl emu_core::Component for Cia8520 {
    type Info = CiaInfo;

    fn name(&self) -> &'static str {
        self.label
    }

    fn reset(&mut self, _hard: bool) {
        Cia8520::reset(self);
    }

    fn inspect(&self) -> CiaInfo {
        self.info()
    }
}
