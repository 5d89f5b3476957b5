//! Blitter — block-memory logic, area fill, and line drawing.
//!
//! Three source channels (A, B, C) and a destination (D), each with its own
//! pointer, modulo, and data register. A 256-entry minterm function decides
//! how the shifted source bits combine. A BLTSIZE write arms the engine;
//! the machine then paces the work through per-word event steps at DMA-slot
//! speed and raises the completion interrupt when the last word is written.

use log::trace;

const USEA: u16 = 0x0800;
const USEB: u16 = 0x0400;
const USEC: u16 = 0x0200;
const USED: u16 = 0x0100;

/// Chip-bus access as seen by the blitter channels.
pub trait BlitterBus {
    fn read_word(&mut self, addr: u32) -> u16;
    fn write_word(&mut self, addr: u32, value: u16);
}

const LINE: u16 = 0x0001;
const DESC: u16 = 0x0002;
const FCI: u16 = 0x0004;
const IFE: u16 = 0x0008;
const EFE: u16 = 0x0010;
const SING: u16 = 0x0002;

struct AreaRun {
    width_words: u32,
    height: u32,
    row: u32,
    col: u32,
    a_prev: u16,
    b_prev: u16,
    fill_carry: bool,
}

struct LineRun {
    remaining: u32,
    error: i16,
    pixel_bit: u16,
    texture: u16,
    major_is_y: bool,
    x_neg: bool,
    y_neg: bool,
    row_pixel_written: bool,
}

enum Run {
    Area(AreaRun),
    Line(LineRun),
}

pub struct Blitter {
    pub bltcon0: u16,
    pub bltcon1: u16,
    pub afwm: u16,
    pub alwm: u16,
    pub apt: u32,
    pub bpt: u32,
    pub cpt: u32,
    pub dpt: u32,
    pub amod: i16,
    pub bmod: i16,
    pub cmod: i16,
    pub dmod: i16,
    pub adat: u16,
    pub bdat: u16,
    pub cdat: u16,
    pub bltsize: u16,
    run: Option<Run>,
}

impl Blitter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            bltcon0: 0,
            bltcon1: 0,
            afwm: 0xFFFF,
            alwm: 0xFFFF,
            apt: 0,
            bpt: 0,
            cpt: 0,
            dpt: 0,
            amod: 0,
            bmod: 0,
            cmod: 0,
            dmod: 0,
            adat: 0,
            bdat: 0,
            cdat: 0,
            bltsize: 0,
            run: None,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.run.is_some()
    }

    fn minterm(&self, a: u16, b: u16, c: u16) -> u16 {
        let lf = self.bltcon0 as u8;
        let mut result = 0u16;
        for bit in 0..16 {
            let index = ((a >> bit) & 1) << 2 | ((b >> bit) & 1) << 1 | ((c >> bit) & 1);
            if (lf >> index) & 1 != 0 {
                result |= 1 << bit;
            }
        }
        result
    }

    /// A BLTSIZE write arms the engine with (height, width) and starts the
    /// word sequencer.
    pub fn poke_bltsize(&mut self, value: u16) {
        self.bltsize = value;
        let height = match (value >> 6) & 0x3FF {
            0 => 1024,
            h => u32::from(h),
        };
        let width_words = match value & 0x3F {
            0 => 64,
            w => u32::from(w),
        };

        if self.bltcon1 & LINE != 0 {
            self.arm_line(height);
        } else {
            trace!("blit armed: {width_words} words x {height} rows");
            self.run = Some(Run::Area(AreaRun {
                width_words,
                height,
                row: 0,
                col: 0,
                a_prev: 0,
                b_prev: 0,
                fill_carry: self.bltcon1 & FCI != 0,
            }));
        }
    }

    fn arm_line(&mut self, length: u32) {
        // SUD/SUL/AUL form a hardware octant code (HRM Appendix A).
        let sud = self.bltcon1 & 0x0010 != 0;
        let sul = self.bltcon1 & 0x0008 != 0;
        let aul = self.bltcon1 & 0x0004 != 0;
        let octant = match (u8::from(sud) << 2) | (u8::from(sul) << 1) | u8::from(aul) {
            0b000 => 6,
            0b001 => 1,
            0b010 => 5,
            0b011 => 2,
            0b100 => 7,
            0b101 => 4,
            0b110 => 0,
            _ => 3,
        };
        let (major_is_y, x_neg, y_neg) = match octant {
            0 => (false, false, false),
            1 => (true, false, false),
            2 => (true, true, false),
            3 => (false, true, false),
            4 => (false, true, true),
            5 => (true, true, true),
            6 => (true, false, true),
            _ => (false, false, true),
        };

        trace!("line blit armed: {length} pixels, octant {octant}");
        self.run = Some(Run::Line(LineRun {
            remaining: length,
            error: self.apt as i16,
            pixel_bit: (self.bltcon0 >> 12) & 0xF,
            texture: self.bdat,
            major_is_y,
            x_neg,
            y_neg,
            row_pixel_written: false,
        }));
    }

    /// Number of colour clocks one word step occupies on the bus, derived
    /// from the enabled channel count.
    #[must_use]
    pub fn ccks_per_step(&self) -> u64 {
        let channels = u64::from(self.bltcon0 & USEA != 0)
            + u64::from(self.bltcon0 & USEB != 0)
            + u64::from(self.bltcon0 & USEC != 0)
            + u64::from(self.bltcon0 & USED != 0);
        channels.max(2)
    }

    /// Execute one word step. Returns `true` when the blit finished (the
    /// caller raises the BLIT interrupt).
    pub fn step(&mut self, bus: &mut impl BlitterBus) -> bool {
        let Some(run) = self.run.take() else {
            return true;
        };
        match run {
            Run::Area(state) => self.step_area(state, bus),
            Run::Line(state) => self.step_line(state, bus),
        }
    }

    fn step_area(&mut self, mut st: AreaRun, bus: &mut impl BlitterBus) -> bool {
        let desc = self.bltcon1 & DESC != 0;
        let ptr_step: i64 = if desc { -2 } else { 2 };
        let a_shift = u32::from((self.bltcon0 >> 12) & 0xF);
        let b_shift = u32::from((self.bltcon1 >> 12) & 0xF);

        // Channel reads refresh the data registers, so a later blit with
        // the channel disabled sees the last fetched value.
        let a_raw = if self.bltcon0 & USEA != 0 {
            let word = bus.read_word(self.apt);
            self.apt = (i64::from(self.apt) + ptr_step) as u32;
            self.adat = word;
            word
        } else {
            self.adat
        };
        let b_raw = if self.bltcon0 & USEB != 0 {
            let word = bus.read_word(self.bpt);
            self.bpt = (i64::from(self.bpt) + ptr_step) as u32;
            self.bdat = word;
            word
        } else {
            self.bdat
        };
        let c_val = if self.bltcon0 & USEC != 0 {
            let word = bus.read_word(self.cpt);
            self.cpt = (i64::from(self.cpt) + ptr_step) as u32;
            self.cdat = word;
            word
        } else {
            self.cdat
        };

        // First/last word masks gate channel A once per row.
        let mut a_masked = a_raw;
        if st.col == 0 {
            a_masked &= self.afwm;
        }
        if st.col == st.width_words - 1 {
            a_masked &= self.alwm;
        }

        // The barrel shifter carries bits across the word boundary; the
        // carry registers persist across rows.
        let (a_shifted, b_shifted) = if desc {
            let a = ((u32::from(a_masked) << 16 | u32::from(st.a_prev)) >> (16 - a_shift)) as u16;
            let b = ((u32::from(b_raw) << 16 | u32::from(st.b_prev)) >> (16 - b_shift)) as u16;
            (a, b)
        } else {
            let a = ((u32::from(st.a_prev) << 16 | u32::from(a_masked)) >> a_shift) as u16;
            let b = ((u32::from(st.b_prev) << 16 | u32::from(b_raw)) >> b_shift) as u16;
            (a, b)
        };
        st.a_prev = a_masked;
        st.b_prev = b_raw;

        let mut result = self.minterm(a_shifted, b_shifted, c_val);

        // Area fill walks the word bit 0 upward, toggling the carry at
        // every set bit.
        if self.bltcon1 & (IFE | EFE) != 0 {
            let exclusive = self.bltcon1 & EFE != 0;
            let mut filled = 0u16;
            for bit in 0..16u16 {
                let d_bit = (result >> bit) & 1 != 0;
                st.fill_carry ^= d_bit;
                let out = if exclusive {
                    st.fill_carry ^ d_bit
                } else {
                    st.fill_carry || d_bit
                };
                if out {
                    filled |= 1 << bit;
                }
            }
            result = filled;
        }

        if self.bltcon0 & USED != 0 {
            bus.write_word(self.dpt, result);
            self.dpt = (i64::from(self.dpt) + ptr_step) as u32;
        }

        // Advance the word counters; apply the modulos at the row edge.
        st.col += 1;
        if st.col == st.width_words {
            st.col = 0;
            st.row += 1;
            st.fill_carry = self.bltcon1 & FCI != 0;
            let sign: i64 = if desc { -1 } else { 1 };
            if self.bltcon0 & USEA != 0 {
                self.apt = (i64::from(self.apt) + sign * i64::from(self.amod)) as u32;
            }
            if self.bltcon0 & USEB != 0 {
                self.bpt = (i64::from(self.bpt) + sign * i64::from(self.bmod)) as u32;
            }
            if self.bltcon0 & USEC != 0 {
                self.cpt = (i64::from(self.cpt) + sign * i64::from(self.cmod)) as u32;
            }
            if self.bltcon0 & USED != 0 {
                self.dpt = (i64::from(self.dpt) + sign * i64::from(self.dmod)) as u32;
            }
            if st.row == st.height {
                return true;
            }
        }
        self.run = Some(Run::Area(st));
        false
    }

    fn step_line(&mut self, mut st: LineRun, bus: &mut impl BlitterBus) -> bool {
        if st.remaining == 0 {
            self.apt = st.error as u16 as u32;
            self.bdat = st.texture;
            return true;
        }
        st.remaining -= 1;

        let pixel_mask = 0x8000u16 >> st.pixel_bit;

        // Channel A carries the pixel, B the rotating texture pattern, C
        // the destination read-back.
        let a_val = pixel_mask;
        let b_val = if self.bltcon0 & USEB != 0 {
            if st.texture & 0x8000 != 0 {
                0xFFFF
            } else {
                0
            }
        } else {
            0xFFFF
        };
        let c_val = bus.read_word(self.cpt);
        self.cdat = c_val;

        let mut result = self.minterm(a_val, b_val, c_val);
        // Line mode only ever modifies the addressed pixel.
        result = (result & pixel_mask) | (c_val & !pixel_mask);

        // SING restricts output to one pixel per raster row.
        let sing = self.bltcon1 & SING != 0;
        if !sing || !st.row_pixel_written {
            bus.write_word(self.dpt, result);
            st.row_pixel_written = true;
        }

        if self.bltcon0 & USEB != 0 {
            st.texture = st.texture.rotate_left(1);
        }

        let step_x = |st: &mut LineRun, cpt: &mut u32, dpt: &mut u32| {
            if st.x_neg {
                if st.pixel_bit == 0 {
                    st.pixel_bit = 15;
                    *cpt = cpt.wrapping_sub(2);
                    *dpt = dpt.wrapping_sub(2);
                } else {
                    st.pixel_bit -= 1;
                }
            } else if st.pixel_bit == 15 {
                st.pixel_bit = 0;
                *cpt = cpt.wrapping_add(2);
                *dpt = dpt.wrapping_add(2);
            } else {
                st.pixel_bit += 1;
            }
        };
        let step_y = |st: &mut LineRun, cmod: i16, cpt: &mut u32, dpt: &mut u32| {
            let delta = if st.y_neg {
                -i64::from(cmod)
            } else {
                i64::from(cmod)
            };
            *cpt = (i64::from(*cpt) + delta) as u32;
            *dpt = (i64::from(*dpt) + delta) as u32;
            st.row_pixel_written = false;
        };

        let mut cpt = self.cpt;
        let mut dpt = self.dpt;
        if st.error >= 0 {
            // Diagonal step: both axes move.
            step_x(&mut st, &mut cpt, &mut dpt);
            step_y(&mut st, self.cmod, &mut cpt, &mut dpt);
            st.error = st.error.wrapping_add(self.amod);
        } else if st.major_is_y {
            step_y(&mut st, self.cmod, &mut cpt, &mut dpt);
            st.error = st.error.wrapping_add(self.bmod);
        } else {
            step_x(&mut st, &mut cpt, &mut dpt);
            st.error = st.error.wrapping_add(self.bmod);
        }
        self.cpt = cpt;
        self.dpt = dpt;

        if st.remaining == 0 {
            self.apt = st.error as u16 as u32;
            self.bdat = st.texture;
            return true;
        }
        self.run = Some(Run::Line(st));
        false
    }
}

impl Default for Blitter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Ram(HashMap<u32, u16>);

    impl Ram {
        fn new() -> Self {
            Ram(HashMap::new())
        }
        fn set(&mut self, addr: u32, val: u16) {
            self.0.insert(addr, val);
        }
        fn get(&self, addr: u32) -> u16 {
            *self.0.get(&addr).unwrap_or(&0)
        }
    }

    impl BlitterBus for Ram {
        fn read_word(&mut self, addr: u32) -> u16 {
            self.get(addr)
        }
        fn write_word(&mut self, addr: u32, value: u16) {
            self.set(addr, value);
        }
    }

    fn run_blit(blitter: &mut Blitter, ram: &mut Ram) -> u32 {
        let mut steps = 0;
        loop {
            steps += 1;
            if blitter.step(ram) {
                return steps;
            }
            assert!(steps < 100_000, "blit must terminate");
        }
    }

    #[test]
    fn copy_blit_moves_words() {
        let mut blitter = Blitter::new();
        let mut ram = Ram::new();
        for i in 0..4u32 {
            ram.set(0x1000 + i * 2, 0x1100 + i as u16);
        }

        blitter.bltcon0 = USEA | USED | 0x00F0; // D = A
        blitter.apt = 0x1000;
        blitter.dpt = 0x2000;
        blitter.poke_bltsize((2 << 6) | 2); // 2 rows x 2 words

        let steps = run_blit(&mut blitter, &mut ram);
        assert_eq!(steps, 4, "one step per destination word");
        for i in 0..4u32 {
            assert_eq!(ram.get(0x2000 + i * 2), 0x1100 + i as u16);
        }
        assert!(!blitter.is_busy());
    }

    #[test]
    fn minterm_combines_three_sources() {
        let mut blitter = Blitter::new();
        let mut ram = Ram::new();
        ram.set(0x1000, 0xF0F0); // A
        ram.set(0x2000, 0xCCCC); // B
        ram.set(0x3000, 0xAAAA); // C

        // LF $E2 = (A AND B) OR (NOT A AND C): the cookie-cut idiom.
        blitter.bltcon0 = USEA | USEB | USEC | USED | 0x00E2;
        blitter.apt = 0x1000;
        blitter.bpt = 0x2000;
        blitter.cpt = 0x3000;
        blitter.dpt = 0x4000;
        blitter.poke_bltsize((1 << 6) | 1);

        run_blit(&mut blitter, &mut ram);
        assert_eq!(ram.get(0x4000), (0xF0F0 & 0xCCCC) | (!0xF0F0 & 0xAAAA));
    }

    #[test]
    fn first_and_last_word_masks_apply_once_per_row() {
        let mut blitter = Blitter::new();
        let mut ram = Ram::new();
        for i in 0..6u32 {
            ram.set(0x1000 + i * 2, 0xFFFF);
        }

        blitter.bltcon0 = USEA | USED | 0x00F0;
        blitter.afwm = 0x0FFF;
        blitter.alwm = 0xFFF0;
        blitter.apt = 0x1000;
        blitter.dpt = 0x2000;
        blitter.poke_bltsize((2 << 6) | 3); // 2 rows x 3 words

        run_blit(&mut blitter, &mut ram);
        for row in 0..2u32 {
            let base = 0x2000 + row * 6;
            assert_eq!(ram.get(base), 0x0FFF, "first word masked");
            assert_eq!(ram.get(base + 2), 0xFFFF, "middle word untouched");
            assert_eq!(ram.get(base + 4), 0xFFF0, "last word masked");
        }
    }

    #[test]
    fn shifter_carries_across_word_boundary() {
        let mut blitter = Blitter::new();
        let mut ram = Ram::new();
        ram.set(0x1000, 0x8001);
        ram.set(0x1002, 0x0000);

        blitter.bltcon0 = USEA | USED | 0x00F0 | (4 << 12); // shift A by 4
        blitter.apt = 0x1000;
        blitter.dpt = 0x2000;
        blitter.poke_bltsize((1 << 6) | 2);

        run_blit(&mut blitter, &mut ram);
        assert_eq!(ram.get(0x2000), 0x0800, "word shifted right by 4");
        assert_eq!(ram.get(0x2002), 0x1000, "low bit carried into next word");
    }

    #[test]
    fn inclusive_fill_closes_between_transitions() {
        let mut blitter = Blitter::new();
        let mut ram = Ram::new();
        ram.set(0x1000, 0x4004); // two transition bits

        blitter.bltcon0 = USEA | USED | 0x00F0;
        blitter.bltcon1 = IFE;
        blitter.apt = 0x1000;
        blitter.dpt = 0x2000;
        blitter.poke_bltsize((1 << 6) | 1);

        run_blit(&mut blitter, &mut ram);
        assert_eq!(ram.get(0x2000), 0x7FFC, "area between the bits filled");
    }

    #[test]
    fn fill_carry_resets_per_row() {
        let mut blitter = Blitter::new();
        let mut ram = Ram::new();
        ram.set(0x1000, 0x0100); // row 1: one transition, fill to the left edge
        ram.set(0x1002, 0x0000); // row 2: nothing set

        blitter.bltcon0 = USEA | USED | 0x00F0;
        blitter.bltcon1 = IFE;
        blitter.apt = 0x1000;
        blitter.dpt = 0x2000;
        blitter.poke_bltsize((2 << 6) | 1); // 2 rows x 1 word

        run_blit(&mut blitter, &mut ram);
        assert_eq!(ram.get(0x2000), 0xFF00);
        assert_eq!(ram.get(0x2002), 0x0000, "carry must not leak into the next row");
    }

    #[test]
    fn descending_mode_walks_memory_backwards() {
        let mut blitter = Blitter::new();
        let mut ram = Ram::new();
        ram.set(0x1000, 0x1111);
        ram.set(0x1002, 0x2222);

        blitter.bltcon0 = USEA | USED | 0x00F0;
        blitter.bltcon1 = DESC;
        blitter.apt = 0x1002;
        blitter.dpt = 0x2002;
        blitter.poke_bltsize((1 << 6) | 2);

        run_blit(&mut blitter, &mut ram);
        assert_eq!(ram.get(0x2002), 0x2222);
        assert_eq!(ram.get(0x2000), 0x1111);
    }

    #[test]
    fn line_mode_draws_a_horizontal_run() {
        let mut blitter = Blitter::new();
        let mut ram = Ram::new();

        // Octant 0 (+X major): SUD:SUL:AUL = 110.
        blitter.bltcon0 = USEA | USEC | USED | 0x00CA; // standard line minterm
        blitter.bltcon1 = LINE | 0x0010 | 0x0008;
        blitter.cmod = 8; // row stride, unused for a horizontal run
        blitter.dmod = 8;
        blitter.apt = (-1i16) as u16 as u32; // error starts negative
        blitter.amod = -8; // 4*(dy-dx) with dy=0, dx=2
        blitter.bmod = 0; // 4*dy
        blitter.bdat = 0xFFFF;
        blitter.cpt = 0x2000;
        blitter.dpt = 0x2000;
        blitter.poke_bltsize((4 << 6) | 2); // length 4

        run_blit(&mut blitter, &mut ram);
        assert_eq!(
            ram.get(0x2000) & 0xF000,
            0xF000,
            "four pixels drawn from bit 15 rightwards"
        );
        assert!(!blitter.is_busy());
    }

    #[test]
    fn bltsize_zero_fields_mean_maximum_size() {
        let mut blitter = Blitter::new();
        let mut ram = Ram::new();
        blitter.bltcon0 = 0x00F0; // no channels, pure sequencing
        blitter.poke_bltsize(0);
        let mut steps = 0u32;
        while !blitter.step(&mut ram) {
            steps += 1;
        }
        assert_eq!(steps + 1, 1024 * 64, "1024 rows x 64 words");
    }
}
