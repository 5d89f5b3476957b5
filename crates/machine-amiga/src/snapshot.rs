//! Snapshots.
//!
//! The envelope is binary: the `VASNAP` magic, a three-byte semantic
//! version, and a preview thumbnail, followed by the serialized component
//! tree. The tree itself is JSON with bulk memory base64-coded; every
//! component contributes a plain state record, mirroring the inspection
//! path.

use base64::Engine;
use commodore_agnus::copper::State as CopperState;
use commodore_denise::{HPIXELS, VPIXELS};
use commodore_paula::AudioState;
use mos_cia_8520::CiaInfo;
use serde::{Deserialize, Serialize};

use crate::error::AmigaError;
use crate::Amiga;

pub const SNAPSHOT_MAGIC: &[u8; 6] = b"VASNAP";
pub const SNAPSHOT_VERSION: (u8, u8, u8) = (1, 0, 0);

/// Thumbnail decimation factor (one sample per 8x8 pixel block).
const THUMB_STRIDE: usize = 8;

#[derive(Serialize, Deserialize)]
struct TimingState {
    cycle: u64,
    frame: u64,
    beam_v: u16,
    beam_h: u16,
    long_frame: bool,
}

#[derive(Serialize, Deserialize)]
struct AgnusState {
    dmacon: u16,
    bplcon0: u16,
    diwstrt: u16,
    diwstop: u16,
    ddfstrt: u16,
    ddfstop: u16,
    bpl_pt: [u32; 6],
    bpl1mod: i16,
    bpl2mod: i16,
    spr_pt: [u32; 8],
    dsk_pt: u32,
    v_flop: bool,
}

#[derive(Serialize, Deserialize)]
struct CopperSnap {
    state: u8,
    pc: u32,
    cop1lc: u32,
    cop2lc: u32,
    ir1: u16,
    ir2: u16,
    danger: bool,
}

#[derive(Serialize, Deserialize)]
struct BlitterState {
    bltcon0: u16,
    bltcon1: u16,
    afwm: u16,
    alwm: u16,
    apt: u32,
    bpt: u32,
    cpt: u32,
    dpt: u32,
    amod: i16,
    bmod: i16,
    cmod: i16,
    dmod: i16,
    adat: u16,
    bdat: u16,
    cdat: u16,
}

#[derive(Serialize, Deserialize)]
struct SpriteState {
    hstrt: u16,
    data: u16,
    datb: u16,
    armed: bool,
    attached: bool,
}

#[derive(Serialize, Deserialize)]
struct DeniseState {
    bplcon0: u16,
    bplcon1: u16,
    bplcon2: u16,
    bpldat: [u16; 6],
    clxcon: u16,
    palette: Vec<u16>,
    sprites: Vec<SpriteState>,
}

#[derive(Serialize, Deserialize)]
struct AudioChannelState {
    state: u8,
    lc: u32,
    len: u16,
    per: u16,
    vol: u8,
    dat: u16,
    ptr: u32,
    len_counter: u16,
}

#[derive(Serialize, Deserialize)]
struct PaulaState {
    intena: u16,
    intreq: u16,
    adkcon: u16,
    audio: Vec<AudioChannelState>,
    dsklen: u16,
    dsksync: u16,
}

#[derive(Serialize, Deserialize)]
struct CiaState {
    timer_a: u16,
    timer_b: u16,
    timer_a_running: bool,
    timer_b_running: bool,
    tod: u32,
    alarm: u32,
    icr_status: u8,
    icr_mask: u8,
}

#[derive(Serialize, Deserialize)]
struct MemoryState {
    chip_ram: String,
    slow_ram: String,
    fast_ram: String,
    overlay: bool,
}

#[derive(Serialize, Deserialize)]
struct MachineSnapshot {
    timing: TimingState,
    agnus: AgnusState,
    copper: CopperSnap,
    blitter: BlitterState,
    denise: DeniseState,
    paula: PaulaState,
    cia_a: CiaState,
    cia_b: CiaState,
    memory: MemoryState,
}

fn b64() -> base64::engine::GeneralPurpose {
    base64::engine::general_purpose::STANDARD
}

fn cia_state(info: &CiaInfo) -> CiaState {
    CiaState {
        timer_a: info.timer_a,
        timer_b: info.timer_b,
        timer_a_running: info.timer_a_running,
        timer_b_running: info.timer_b_running,
        tod: info.tod,
        alarm: info.alarm,
        icr_status: info.icr_status,
        icr_mask: info.icr_mask,
    }
}

fn cia_info(state: &CiaState) -> CiaInfo {
    CiaInfo {
        timer_a: state.timer_a,
        timer_b: state.timer_b,
        timer_a_running: state.timer_a_running,
        timer_b_running: state.timer_b_running,
        tod: state.tod,
        alarm: state.alarm,
        icr_status: state.icr_status,
        icr_mask: state.icr_mask,
    }
}

impl Amiga {
    /// Serialize the component tree into a snapshot buffer.
    #[must_use]
    pub fn save_snapshot(&self) -> Vec<u8> {
        let state = self.collect_state();
        let payload = serde_json::to_vec(&state).unwrap_or_default();

        let thumb_w = HPIXELS / THUMB_STRIDE;
        let thumb_h = VPIXELS / THUMB_STRIDE;
        let stable = &self.denise.frames.stable().data;

        let mut out =
            Vec::with_capacity(13 + thumb_w * thumb_h * 4 + payload.len());
        out.extend_from_slice(SNAPSHOT_MAGIC);
        out.push(SNAPSHOT_VERSION.0);
        out.push(SNAPSHOT_VERSION.1);
        out.push(SNAPSHOT_VERSION.2);
        out.extend_from_slice(&(thumb_w as u16).to_be_bytes());
        out.extend_from_slice(&(thumb_h as u16).to_be_bytes());
        for y in 0..thumb_h {
            for x in 0..thumb_w {
                let pixel = stable[y * THUMB_STRIDE * HPIXELS + x * THUMB_STRIDE];
                out.extend_from_slice(&pixel.to_be_bytes());
            }
        }
        out.extend_from_slice(&payload);
        out
    }

    /// Restore the machine from a snapshot buffer.
    pub fn restore_snapshot(&mut self, bytes: &[u8]) -> Result<(), AmigaError> {
        if bytes.len() < 13 || &bytes[0..6] != SNAPSHOT_MAGIC {
            return Err(AmigaError::SnapCorrupted);
        }
        let (major, minor) = (bytes[6], bytes[7]);
        if (major, minor) < (SNAPSHOT_VERSION.0, SNAPSHOT_VERSION.1) {
            return Err(AmigaError::SnapTooOld);
        }
        if (major, minor) > (SNAPSHOT_VERSION.0, SNAPSHOT_VERSION.1) {
            return Err(AmigaError::SnapTooNew);
        }

        let thumb_w = usize::from(u16::from_be_bytes([bytes[9], bytes[10]]));
        let thumb_h = usize::from(u16::from_be_bytes([bytes[11], bytes[12]]));
        let payload_start = 13 + thumb_w * thumb_h * 4;
        if bytes.len() < payload_start {
            return Err(AmigaError::SnapCorrupted);
        }

        let state: MachineSnapshot = serde_json::from_slice(&bytes[payload_start..])
            .map_err(|_| AmigaError::SnapCorrupted)?;
        self.apply_state(&state)
    }

    fn collect_state(&self) -> MachineSnapshot {
        let engine = b64();
        MachineSnapshot {
            timing: TimingState {
                cycle: self.cycle().get(),
                frame: self.frame(),
                beam_v: self.agnus.beam.v,
                beam_h: self.agnus.beam.h,
                long_frame: self.agnus.beam.long_frame,
            },
            agnus: AgnusState {
                dmacon: self.agnus.dmacon,
                bplcon0: self.agnus.bplcon0,
                diwstrt: self.agnus.diwstrt,
                diwstop: self.agnus.diwstop,
                ddfstrt: self.agnus.ddfstrt,
                ddfstop: self.agnus.ddfstop,
                bpl_pt: self.agnus.bpl_pt,
                bpl1mod: self.agnus.bpl1mod,
                bpl2mod: self.agnus.bpl2mod,
                spr_pt: self.agnus.spr_pt,
                dsk_pt: self.agnus.dsk_pt,
                v_flop: self.agnus.v_flop,
            },
            copper: CopperSnap {
                state: match self.copper.state {
                    CopperState::Idle => 0,
                    CopperState::Fetch1 => 1,
                    CopperState::Fetch2 => 2,
                    CopperState::Wait => 3,
                },
                pc: self.copper.pc,
                cop1lc: self.copper.cop1lc,
                cop2lc: self.copper.cop2lc,
                ir1: self.copper.ir1,
                ir2: self.copper.ir2,
                danger: self.copper.danger,
            },
            blitter: BlitterState {
                bltcon0: self.blitter.bltcon0,
                bltcon1: self.blitter.bltcon1,
                afwm: self.blitter.afwm,
                alwm: self.blitter.alwm,
                apt: self.blitter.apt,
                bpt: self.blitter.bpt,
                cpt: self.blitter.cpt,
                dpt: self.blitter.dpt,
                amod: self.blitter.amod,
                bmod: self.blitter.bmod,
                cmod: self.blitter.cmod,
                dmod: self.blitter.dmod,
                adat: self.blitter.adat,
                bdat: self.blitter.bdat,
                cdat: self.blitter.cdat,
            },
            denise: DeniseState {
                bplcon0: self.denise.bplcon0,
                bplcon1: self.denise.bplcon1,
                bplcon2: self.denise.bplcon2,
                bpldat: self.denise.bpldat,
                clxcon: self.denise.clxcon,
                palette: (0..32).map(|i| self.denise.colorizer.color(i)).collect(),
                sprites: (0..8)
                    .map(|nr| {
                        let (hstrt, data, datb, armed, attached) = self.denise.sprite_state(nr);
                        SpriteState {
                            hstrt,
                            data,
                            datb,
                            armed,
                            attached,
                        }
                    })
                    .collect(),
            },
            paula: PaulaState {
                intena: self.paula.intena,
                intreq: self.paula.intreq,
                adkcon: self.paula.adkcon,
                audio: self
                    .paula
                    .audio
                    .iter()
                    .map(|ch| AudioChannelState {
                        state: match ch.state {
                            AudioState::Idle => 0,
                            AudioState::DmaLatchLength => 1,
                            AudioState::DmaLatchData => 2,
                            AudioState::PlayHigh => 3,
                            AudioState::PlayLow => 4,
                        },
                        lc: ch.lc,
                        len: ch.len,
                        per: ch.per,
                        vol: ch.vol,
                        dat: ch.dat,
                        ptr: ch.ptr,
                        len_counter: ch.len_counter,
                    })
                    .collect(),
                dsklen: self.paula.disk.dsklen,
                dsksync: self.paula.disk.dsksync,
            },
            cia_a: cia_state(&self.cia_a.info()),
            cia_b: cia_state(&self.cia_b.info()),
            memory: MemoryState {
                chip_ram: engine.encode(&self.memory.chip_ram),
                slow_ram: engine.encode(&self.memory.slow_ram),
                fast_ram: engine.encode(&self.memory.fast_ram),
                overlay: self.memory.overlay,
            },
        }
    }

    fn apply_state(&mut self, state: &MachineSnapshot) -> Result<(), AmigaError> {
        let engine = b64();

        let chip = engine
            .decode(&state.memory.chip_ram)
            .map_err(|_| AmigaError::SnapCorrupted)?;
        if chip.len() != self.memory.chip_ram.len() {
            return Err(AmigaError::SnapCorrupted);
        }
        self.memory.chip_ram.copy_from_slice(&chip);
        let slow = engine
            .decode(&state.memory.slow_ram)
            .map_err(|_| AmigaError::SnapCorrupted)?;
        if slow.len() == self.memory.slow_ram.len() {
            self.memory.slow_ram.copy_from_slice(&slow);
        }
        let fast = engine
            .decode(&state.memory.fast_ram)
            .map_err(|_| AmigaError::SnapCorrupted)?;
        if fast.len() == self.memory.fast_ram.len() {
            self.memory.fast_ram.copy_from_slice(&fast);
        }
        self.memory.overlay = state.memory.overlay;

        // Register state flows back through the poke paths so derived
        // state (fetch tables, scroll quartet, HAM flag) recomputes.
        self.agnus.poke_diwstrt(state.agnus.diwstrt);
        self.agnus.poke_diwstop(state.agnus.diwstop);
        self.agnus.poke_ddfstrt(state.agnus.ddfstrt);
        self.agnus.poke_ddfstop(state.agnus.ddfstop);
        self.agnus.poke_bplcon0(state.agnus.bplcon0);
        self.agnus.dmacon = state.agnus.dmacon;
        self.agnus.bpl_pt = state.agnus.bpl_pt;
        self.agnus.bpl1mod = state.agnus.bpl1mod;
        self.agnus.bpl2mod = state.agnus.bpl2mod;
        self.agnus.spr_pt = state.agnus.spr_pt;
        self.agnus.dsk_pt = state.agnus.dsk_pt;
        self.agnus.v_flop = state.agnus.v_flop;
        self.agnus.beam.v = state.timing.beam_v;
        self.agnus.beam.h = state.timing.beam_h;
        self.agnus.beam.long_frame = state.timing.long_frame;
        self.agnus.rebuild_fetch_table();

        self.copper.state = match state.copper.state {
            1 => CopperState::Fetch1,
            2 => CopperState::Fetch2,
            3 => CopperState::Wait,
            _ => CopperState::Idle,
        };
        self.copper.pc = state.copper.pc;
        self.copper.cop1lc = state.copper.cop1lc;
        self.copper.cop2lc = state.copper.cop2lc;
        self.copper.ir1 = state.copper.ir1;
        self.copper.ir2 = state.copper.ir2;
        self.copper.danger = state.copper.danger;

        self.blitter.bltcon0 = state.blitter.bltcon0;
        self.blitter.bltcon1 = state.blitter.bltcon1;
        self.blitter.afwm = state.blitter.afwm;
        self.blitter.alwm = state.blitter.alwm;
        self.blitter.apt = state.blitter.apt;
        self.blitter.bpt = state.blitter.bpt;
        self.blitter.cpt = state.blitter.cpt;
        self.blitter.dpt = state.blitter.dpt;
        self.blitter.amod = state.blitter.amod;
        self.blitter.bmod = state.blitter.bmod;
        self.blitter.cmod = state.blitter.cmod;
        self.blitter.dmod = state.blitter.dmod;
        self.blitter.adat = state.blitter.adat;
        self.blitter.bdat = state.blitter.bdat;
        self.blitter.cdat = state.blitter.cdat;

        self.denise.poke_bplcon0(state.denise.bplcon0);
        self.denise.poke_bplcon1(state.denise.bplcon1);
        self.denise.poke_bplcon2(state.denise.bplcon2);
        self.denise.poke_clxcon(state.denise.clxcon);
        for (plane, &word) in state.denise.bpldat.iter().enumerate() {
            self.denise.poke_bpldat(plane, word);
        }
        for (index, &value) in state.denise.palette.iter().enumerate().take(32) {
            self.denise.colorizer.set_color(index, value);
        }
        for (nr, sprite) in state.denise.sprites.iter().enumerate().take(8) {
            self.denise.restore_sprite(
                nr,
                sprite.hstrt,
                sprite.data,
                sprite.datb,
                sprite.armed,
                sprite.attached,
            );
        }

        self.paula.intena = state.paula.intena;
        self.paula.intreq = state.paula.intreq;
        self.paula.adkcon = state.paula.adkcon;
        for (index, saved) in state.paula.audio.iter().enumerate().take(4) {
            let channel = &mut self.paula.audio[index];
            channel.state = match saved.state {
                1 => AudioState::DmaLatchLength,
                2 => AudioState::DmaLatchData,
                3 => AudioState::PlayHigh,
                4 => AudioState::PlayLow,
                _ => AudioState::Idle,
            };
            channel.lc = saved.lc;
            channel.len = saved.len;
            channel.per = saved.per;
            channel.vol = saved.vol;
            channel.dat = saved.dat;
            channel.ptr = saved.ptr;
            channel.len_counter = saved.len_counter;
        }
        self.paula.disk.poke_dsksync(state.paula.dsksync);

        self.cia_a.apply_info(&cia_info(&state.cia_a));
        self.cia_b.apply_info(&cia_info(&state.cia_b));

        self.restore_timing(state.timing.cycle, state.timing.frame);
        Ok(())
    }
}
