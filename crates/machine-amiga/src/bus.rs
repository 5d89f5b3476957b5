//! CPU bus contract.
//!
//! The 68k core lives outside the machine and calls these entry points for
//! every bus transaction. Chip-bus accesses contend with DMA: the machine
//! advances colour clocks until the arbiter hands the CPU a free slot, so
//! heavy DMA traffic stalls the processor exactly as on hardware. Fast RAM
//! sits on the processor's local bus and never contends.

use commodore_agnus::agnus::{SlotOwner, DMA_BLT};

use crate::memory::{Bank, BusAgent};
use crate::Amiga;

/// CPU clocks per colour clock.
const CPU_CLOCKS_PER_CCK: u32 = 2;

impl Amiga {
    fn cpu_owns_chip_slot(&self) -> bool {
        let owner = self.agnus.slot_owner(
            self.agnus.beam.h,
            self.copper.wants_bus(),
            self.blitter.is_busy() && self.agnus.dma_enabled(DMA_BLT),
        );
        owner == SlotOwner::Cpu
    }

    /// Stall until the arbiter frees a slot for the CPU, emulating the
    /// chipset while waiting.
    fn wait_for_chip_slot(&mut self) {
        while !self.cpu_owns_chip_slot() {
            self.emulate_cck();
        }
    }

    /// A chip-bus transaction: wait for the slot, then consume it.
    fn chip_transaction<T>(&mut self, access: impl FnOnce(&mut Self) -> T) -> T {
        self.wait_for_chip_slot();
        let value = access(self);
        self.emulate_cck();
        value
    }

    /// CIA register access: CIA-A answers on odd addresses, CIA-B on even.
    fn cia_read8(&mut self, addr: u32) -> u8 {
        let reg = ((addr >> 8) & 0x0F) as u8;
        if addr & 1 != 0 {
            self.cia_a.read(reg)
        } else {
            self.cia_b.read(reg)
        }
    }

    fn cia_write8(&mut self, addr: u32, value: u8) {
        let reg = ((addr >> 8) & 0x0F) as u8;
        if addr & 1 != 0 {
            self.cia_a.write(reg, value);
        } else {
            self.cia_b.write(reg, value);
        }
    }

    // --- the contract ---------------------------------------------------

    pub fn cpu_read8(&mut self, addr: u32) -> u8 {
        match self.memory.bank(addr) {
            Bank::FastRam => self.memory.read8(BusAgent::Cpu, addr),
            Bank::Cia => self.chip_transaction(|amiga| amiga.cia_read8(addr)),
            Bank::Custom => {
                let word = self.cpu_read_custom(addr);
                if addr & 1 == 0 {
                    (word >> 8) as u8
                } else {
                    word as u8
                }
            }
            _ => self.chip_transaction(|amiga| amiga.memory.read8(BusAgent::Cpu, addr)),
        }
    }

    pub fn cpu_read16(&mut self, addr: u32) -> u16 {
        match self.memory.bank(addr) {
            Bank::FastRam => self.memory.read16(BusAgent::Cpu, addr),
            Bank::Cia => self.chip_transaction(|amiga| u16::from(amiga.cia_read8(addr + 1))),
            Bank::Custom => self.cpu_read_custom(addr),
            _ => self.chip_transaction(|amiga| amiga.memory.read16(BusAgent::Cpu, addr)),
        }
    }

    pub fn cpu_read32(&mut self, addr: u32) -> u32 {
        let hi = self.cpu_read16(addr);
        let lo = self.cpu_read16(addr.wrapping_add(2));
        (u32::from(hi) << 16) | u32::from(lo)
    }

    pub fn cpu_write8(&mut self, addr: u32, value: u8) {
        match self.memory.bank(addr) {
            Bank::FastRam => self.memory.write8(BusAgent::Cpu, addr, value),
            Bank::Cia => self.chip_transaction(|amiga| amiga.cia_write8(addr, value)),
            Bank::Custom => {
                // Byte writes to custom registers replicate onto both
                // halves of the data bus.
                let word = (u16::from(value) << 8) | u16::from(value);
                self.cpu_write_custom(addr, word);
            }
            _ => self.chip_transaction(|amiga| amiga.memory.write8(BusAgent::Cpu, addr, value)),
        }
    }

    pub fn cpu_write16(&mut self, addr: u32, value: u16) {
        match self.memory.bank(addr) {
            Bank::FastRam => self.memory.write16(BusAgent::Cpu, addr, value),
            Bank::Cia => {
                self.chip_transaction(|amiga| amiga.cia_write8(addr + 1, value as u8));
            }
            Bank::Custom => self.cpu_write_custom(addr, value),
            _ => self.chip_transaction(|amiga| amiga.memory.write16(BusAgent::Cpu, addr, value)),
        }
    }

    pub fn cpu_write32(&mut self, addr: u32, value: u32) {
        self.cpu_write16(addr, (value >> 16) as u16);
        self.cpu_write16(addr.wrapping_add(2), value as u16);
    }

    fn cpu_read_custom(&mut self, addr: u32) -> u16 {
        let offset = (addr & 0x1FE) as u16;
        self.chip_transaction(|amiga| amiga.peek_custom16(offset))
    }

    fn cpu_write_custom(&mut self, addr: u32, value: u16) {
        let offset = (addr & 0x1FE) as u16;
        self.chip_transaction(|amiga| amiga.poke_custom16(offset, value));
    }

    /// Current interrupt priority level requested by the chipset.
    #[must_use]
    pub fn irq_level(&self) -> u8 {
        self.paula.ipl()
    }

    /// CPU interrupt acknowledge for a level.
    pub fn ack_interrupt(&mut self, level: u8) {
        self.paula.ack_interrupt(level);
    }

    /// Account internal CPU cycles (no bus access): the machine advances
    /// the event wheel by the equivalent colour clocks.
    pub fn elapse_cpu_cycles(&mut self, cpu_clocks: u32) {
        let ccks = u64::from(cpu_clocks / CPU_CLOCKS_PER_CCK);
        for _ in 0..ccks {
            self.emulate_cck();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AmigaConfig;
    use crate::custom_regs;

    fn machine() -> Amiga {
        let (mut amiga, _tx) = Amiga::new(AmigaConfig::default(), vec![0x5A; 256 * 1024]);
        amiga.power_on().expect("power");
        amiga
    }

    #[test]
    fn chip_ram_access_consumes_a_colour_clock() {
        let mut amiga = machine();
        let before = amiga.cycle().get();
        amiga.cpu_write16(0x0400, 0x1234);
        assert!(amiga.cycle().get() > before, "the access burned bus time");
        // The overlay is active after power-on: reads under 2MB hit ROM.
        assert_eq!(amiga.cpu_read16(0x0400), 0x5A5A);
    }

    #[test]
    fn rom_reads_come_from_kickstart_space() {
        let mut amiga = machine();
        assert_eq!(amiga.cpu_read8(0xF8_0000), 0x5A);
        assert_eq!(amiga.cpu_read32(0xF8_0000), 0x5A5A_5A5A);
    }

    #[test]
    fn cpu_stalls_while_dma_owns_the_slots() {
        let mut amiga = machine();
        // Enable six-plane lores bitplane DMA across a wide fetch window
        // and park the beam inside it.
        amiga.poke_custom16(custom_regs::DMACON, 0x8000 | 0x0200 | 0x0100);
        amiga.poke_custom16(custom_regs::BPLCON0, 6 << 12);
        amiga.poke_custom16(custom_regs::DDFSTRT, 0x38);
        amiga.poke_custom16(custom_regs::DDFSTOP, 0xD0);
        amiga.agnus.poke_diwstrt(0x2C81);
        amiga.agnus.poke_diwstop(0xF4C1);
        amiga.agnus.v_flop = true;
        amiga.agnus.rebuild_fetch_table();
        // Park the beam on a bitplane slot.
        while amiga.agnus.beam.h != 0x39 || !amiga.agnus.v_flop {
            amiga.emulate_cck();
        }

        let start = amiga.cycle().get();
        amiga.cpu_write16(0x0600, 0xAAAA);
        let elapsed = amiga.cycle().get() - start;
        assert!(
            elapsed > 1,
            "the CPU had to yield to bitplane DMA (elapsed {elapsed})"
        );
    }

    #[test]
    fn custom_register_word_access_via_the_bus() {
        let mut amiga = machine();
        amiga.cpu_write16(0xDFF000 + u32::from(custom_regs::INTENA), 0x8000 | 0x4000 | 0x0020);
        assert_eq!(
            amiga.cpu_read16(0xDFF000 + u32::from(custom_regs::INTENAR)),
            0x4020
        );
    }

    #[test]
    fn cia_access_selects_the_chip_by_address_parity() {
        let mut amiga = machine();
        amiga.cpu_write8(0xBFE201, 0x03); // CIA-A DDRA
        amiga.cpu_write8(0xBFE001, 0x02); // CIA-A PRA
        let pra = amiga.cpu_read8(0xBFE001);
        assert_eq!(pra & 0x03, 0x02, "driven bits read back");
    }

    #[test]
    fn irq_level_tracks_paula() {
        let mut amiga = machine();
        assert_eq!(amiga.irq_level(), 0);
        amiga.poke_custom16(custom_regs::INTENA, 0x8000 | 0x4000 | 0x0004);
        amiga.poke_custom16(custom_regs::INTREQ, 0x8000 | 0x0004);
        assert_eq!(amiga.irq_level(), 1);
        amiga.ack_interrupt(1);
        assert_eq!(amiga.irq_level(), 0);
    }

    #[test]
    fn elapsed_internal_cycles_advance_the_wheel() {
        let mut amiga = machine();
        let before = amiga.cycle().get();
        amiga.elapse_cpu_cycles(8);
        assert_eq!(amiga.cycle().get(), before + 4);
    }
}
