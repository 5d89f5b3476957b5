//! Audio channel state machines.
//!
//! Each of the four channels runs the hardware's five-state sequencer:
//! idle, two DMA latch states, and the two-byte play phases. DMA words
//! arrive through the channel's dedicated slot; the period timer paces the
//! byte output. Channels 0 and 2 can modulate their neighbour's volume or
//! period instead of driving their own DAC.

/// Hardware sequencer states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioState {
    #[default]
    Idle,
    /// DMA restarted: latch the length counter, request the first word.
    DmaLatchLength,
    /// First word requested, waiting for it to arrive.
    DmaLatchData,
    /// Emitting the high byte of the current word.
    PlayHigh,
    /// Emitting the low byte.
    PlayLow,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AudioChannel {
    pub state: AudioState,
    /// Location (sample block start), word length, period, volume.
    pub lc: u32,
    pub len: u16,
    pub per: u16,
    pub vol: u8,
    pub dat: u16,

    /// Running DMA pointer and word countdown.
    pub ptr: u32,
    pub len_counter: u16,
    /// Word being played and the prefetched next word.
    current: u16,
    next: Option<u16>,
    period_counter: u16,
    /// Most recent DAC byte.
    pub sample: i8,
    /// Set while the channel wants another DMA word.
    pub dma_request: bool,
}

/// Side effects of a channel step the machine must apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelEffects {
    /// Raise the channel's interrupt bit.
    pub irq: bool,
    /// Value to forward to the neighbour's volume register (modulation).
    pub modulate_volume: Option<u8>,
    /// Value to forward to the neighbour's period register (modulation).
    pub modulate_period: Option<u16>,
}

/// Hardware floor for the period counter.
const MIN_PERIOD: u16 = 124;

impl AudioChannel {
    fn effective_period(&self) -> u16 {
        self.per.max(MIN_PERIOD)
    }

    fn block_len(&self) -> u16 {
        self.len
    }

    /// DMA enable edge: restart or stop the sequencer.
    pub fn set_dma_enabled(&mut self, enabled: bool) {
        match (enabled, self.state) {
            (true, AudioState::Idle) => {
                self.state = AudioState::DmaLatchLength;
                self.ptr = self.lc & 0x00FF_FFFE;
                self.len_counter = self.block_len();
                self.period_counter = self.effective_period();
                self.next = None;
                self.dma_request = true;
            }
            (false, _) => {
                self.state = AudioState::Idle;
                self.dma_request = false;
                self.next = None;
            }
            _ => {}
        }
    }

    /// A DMA word arrived on this channel's slot.
    pub fn dma_word(&mut self, word: u16) -> ChannelEffects {
        let mut effects = ChannelEffects::default();
        self.dat = word;
        match self.state {
            AudioState::DmaLatchLength => {
                // The first fetched word starts the block; the block-start
                // interrupt fires here.
                self.state = AudioState::DmaLatchData;
                self.current = word;
                self.advance_pointer(&mut effects);
                effects.irq = true;
                self.state = AudioState::PlayHigh;
                self.period_counter = self.effective_period();
                self.dma_request = true;
            }
            AudioState::PlayHigh | AudioState::PlayLow | AudioState::DmaLatchData => {
                self.next = Some(word);
                self.advance_pointer(&mut effects);
                self.dma_request = false;
            }
            AudioState::Idle => {}
        }
        effects
    }

    fn advance_pointer(&mut self, effects: &mut ChannelEffects) {
        self.ptr = self.ptr.wrapping_add(2) & 0x00FF_FFFE;
        self.len_counter = self.len_counter.wrapping_sub(1);
        if self.len_counter == 0 {
            // Block exhausted: wrap to the location register and raise the
            // channel interrupt.
            self.ptr = self.lc & 0x00FF_FFFE;
            self.len_counter = self.block_len();
            effects.irq = true;
        }
    }

    /// Non-DMA playback: the CPU feeds AUDxDAT directly.
    pub fn cpu_word(&mut self, word: u16) -> ChannelEffects {
        self.dat = word;
        if self.state == AudioState::Idle {
            self.current = word;
            self.state = AudioState::PlayHigh;
            self.period_counter = self.effective_period();
            // One-shot mode requests the next word via interrupt.
            return ChannelEffects {
                irq: true,
                ..ChannelEffects::default()
            };
        }
        self.next = Some(word);
        ChannelEffects::default()
    }

    /// One colour clock of the period timer.
    ///
    /// `vol_modulator` / `per_modulator` reflect the neighbour-modulation
    /// bits of ADKCON for this channel.
    pub fn tick(&mut self, vol_modulator: bool, per_modulator: bool) -> ChannelEffects {
        let mut effects = ChannelEffects::default();
        if !matches!(self.state, AudioState::PlayHigh | AudioState::PlayLow) {
            return effects;
        }

        self.period_counter = self.period_counter.saturating_sub(1);
        if self.period_counter != 0 {
            return effects;
        }
        self.period_counter = self.effective_period();

        match self.state {
            AudioState::PlayHigh => {
                self.emit((self.current >> 8) as u8, vol_modulator, per_modulator, &mut effects);
                self.state = AudioState::PlayLow;
            }
            AudioState::PlayLow => {
                self.emit(self.current as u8, vol_modulator, per_modulator, &mut effects);
                match self.next.take() {
                    Some(word) => {
                        self.current = word;
                        self.state = AudioState::PlayHigh;
                        self.dma_request = true;
                    }
                    None => {
                        // Starved: stay silent until data shows up again.
                        self.state = AudioState::Idle;
                    }
                }
            }
            _ => unreachable!(),
        }
        effects
    }

    fn emit(
        &mut self,
        byte: u8,
        vol_modulator: bool,
        per_modulator: bool,
        effects: &mut ChannelEffects,
    ) {
        if vol_modulator {
            effects.modulate_volume = Some(byte & 0x7F);
        } else if per_modulator {
            effects.modulate_period = Some(u16::from(byte) << 8 | u16::from(byte));
        } else {
            self.sample = byte as i8;
        }
    }

    /// Current DAC contribution scaled by volume, in [-1, 1].
    #[must_use]
    pub fn mix(&self) -> f32 {
        let amplitude = f32::from(self.sample) / 128.0;
        let volume = f32::from(self.vol.min(64)) / 64.0;
        amplitude * volume
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dma_channel() -> AudioChannel {
        let mut ch = AudioChannel {
            lc: 0x1000,
            len: 2,
            per: 124,
            vol: 64,
            ..AudioChannel::default()
        };
        ch.set_dma_enabled(true);
        ch
    }

    #[test]
    fn dma_enable_walks_the_latch_states() {
        let mut ch = dma_channel();
        assert_eq!(ch.state, AudioState::DmaLatchLength);
        assert!(ch.dma_request);

        let fx = ch.dma_word(0x7F80);
        assert!(fx.irq, "block start raises the channel interrupt");
        assert_eq!(ch.state, AudioState::PlayHigh);
    }

    #[test]
    fn period_timer_paces_high_and_low_bytes() {
        let mut ch = dma_channel();
        ch.dma_word(0x7F80);
        ch.dma_word(0x0102); // prefetched next word

        for _ in 0..124 {
            ch.tick(false, false);
        }
        assert_eq!(ch.sample, 0x7F, "high byte first");
        assert_eq!(ch.state, AudioState::PlayLow);

        for _ in 0..124 {
            ch.tick(false, false);
        }
        assert_eq!(ch.sample, -128, "low byte second");
        assert_eq!(ch.state, AudioState::PlayHigh, "next word keeps playing");
    }

    #[test]
    fn block_wrap_raises_interrupt_and_reloads_pointer() {
        let mut ch = dma_channel();
        ch.dma_word(0x0000);
        let fx = ch.dma_word(0x1111); // second word of a len=2 block
        assert!(fx.irq, "length exhausted wraps and interrupts");
        assert_eq!(ch.ptr, 0x1000, "pointer reloaded from the location register");
    }

    #[test]
    fn disable_stops_the_sequencer() {
        let mut ch = dma_channel();
        ch.dma_word(0x7F80);
        ch.set_dma_enabled(false);
        assert_eq!(ch.state, AudioState::Idle);
        let fx = ch.tick(false, false);
        assert_eq!(fx, ChannelEffects::default());
    }

    #[test]
    fn starved_channel_falls_back_to_idle() {
        let mut ch = dma_channel();
        ch.dma_word(0x7F80);
        for _ in 0..(124 * 2) {
            ch.tick(false, false);
        }
        assert_eq!(ch.state, AudioState::Idle, "no prefetched word to continue");
    }

    #[test]
    fn cpu_written_data_plays_without_dma() {
        let mut ch = AudioChannel {
            per: 124,
            vol: 64,
            ..AudioChannel::default()
        };
        let fx = ch.cpu_word(0x40C0);
        assert!(fx.irq);
        for _ in 0..124 {
            ch.tick(false, false);
        }
        assert_eq!(ch.sample, 0x40);
    }

    #[test]
    fn volume_modulator_redirects_samples() {
        let mut ch = dma_channel();
        ch.dma_word(0x2000);
        let mut modulated = None;
        for _ in 0..124 {
            let fx = ch.tick(true, false);
            if fx.modulate_volume.is_some() {
                modulated = fx.modulate_volume;
            }
        }
        assert_eq!(modulated, Some(0x20), "byte routed to the neighbour volume");
        assert_eq!(ch.sample, 0, "own DAC untouched while modulating");
    }

    #[test]
    fn mix_scales_by_volume() {
        let mut ch = AudioChannel {
            vol: 32,
            ..AudioChannel::default()
        };
        ch.sample = 64;
        assert!((ch.mix() - 0.25).abs() < 1e-6);
    }
}
