//! The four frame buffers and the working/stable exchange.
//!
//! Two buffers per field (long/short). Within one field the working and
//! stable buffers swap at every frame end; in interlace the active field
//! alternates as well, so four buffers cycle in pairs.

use crate::{HPIXELS, VPIXELS};

/// One field-sized RGBA image plus the flags of the field it holds.
pub struct FrameBuffer {
    pub data: Vec<u32>,
    pub long_frame: bool,
    pub interlace: bool,
}

impl FrameBuffer {
    fn new(long_frame: bool) -> Self {
        Self {
            data: vec![0xFF00_0000; HPIXELS * VPIXELS],
            long_frame,
            interlace: false,
        }
    }
}

/// Buffer identifiers: index into the buffer array.
pub const LONG_FRAME_1: usize = 0;
pub const LONG_FRAME_2: usize = 1;
pub const SHORT_FRAME_1: usize = 2;
pub const SHORT_FRAME_2: usize = 3;

pub struct FrameSet {
    pub buffers: [FrameBuffer; 4],
    pub working_long: usize,
    pub stable_long: usize,
    pub working_short: usize,
    pub stable_short: usize,
    /// The buffer currently being rendered into.
    pub frame_buffer: usize,
}

impl FrameSet {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffers: [
                FrameBuffer::new(true),
                FrameBuffer::new(true),
                FrameBuffer::new(false),
                FrameBuffer::new(false),
            ],
            working_long: LONG_FRAME_1,
            stable_long: LONG_FRAME_2,
            working_short: SHORT_FRAME_1,
            stable_short: SHORT_FRAME_2,
            frame_buffer: LONG_FRAME_1,
        }
    }

    #[must_use]
    pub fn working(&self) -> &FrameBuffer {
        &self.buffers[self.frame_buffer]
    }

    pub fn working_mut(&mut self) -> &mut FrameBuffer {
        &mut self.buffers[self.frame_buffer]
    }

    /// The stable buffer of the field currently being rendered; hosts read
    /// this one.
    #[must_use]
    pub fn stable(&self) -> &FrameBuffer {
        if self.frame_buffer == self.working_long || self.frame_buffer == self.stable_long {
            &self.buffers[self.stable_long]
        } else {
            &self.buffers[self.stable_short]
        }
    }

    /// Rotate buffers at the end of a frame. Within a field the working
    /// buffer becomes stable and vice versa; interlace alternates fields,
    /// otherwise the same field is rendered twice in a row.
    pub fn prepare_for_next_frame(&mut self, long_frame: bool, interlace: bool) {
        debug_assert_ne!(self.working_long, self.stable_long);
        debug_assert_ne!(self.working_short, self.stable_short);

        if self.frame_buffer == LONG_FRAME_1 || self.frame_buffer == LONG_FRAME_2 {
            self.working_long = self.stable_long;
            self.stable_long = self.frame_buffer;
            self.frame_buffer = if interlace {
                self.working_short
            } else {
                self.working_long
            };
        } else {
            self.working_short = self.stable_short;
            self.stable_short = self.frame_buffer;
            self.frame_buffer = self.working_long;
        }

        let buffer = &mut self.buffers[self.frame_buffer];
        buffer.long_frame = long_frame;
        buffer.interlace = interlace;
    }
}

impl Default for FrameSet {
    fn default() -> Self {
        Self::new()
    }
}
