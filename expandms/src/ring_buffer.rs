//! A sliding-window history buffer shared by every LZ-family codec in this
//! crate: LZSS's 4096-byte window, MSZIP's 32 KiB window (shared across an
//! entire CAB folder, not reset per block), LZX's `2^window_bits` window,
//! and Zeck's 4096-byte window. Runtime-sized, since LZX and Quantum pick
//! their window size from a container-declared field rather than a
//! compile-time constant.

use crate::error::ExpandError;

#[derive(Clone, Debug)]
pub struct RingBuffer {
    buffer: Box<[u8]>,
    position: usize,
    /// How many bytes of real decoded data have been pushed so far,
    /// capped at the buffer's capacity. Distinguishes "still the initial
    /// fill value" from "genuine history" for [`Self::recall_checked`].
    filled: usize,
}

impl RingBuffer {
    /// Allocates a window of `size` bytes filled with `fill`. The LZSS
    /// dialects prime the window with spaces so a match that reaches back
    /// past anything written so far still decodes to something
    /// deterministic instead of garbage; MSZIP and LZX start from zero.
    pub fn new(size: usize, fill: u8) -> Self {
        Self {
            buffer: vec![fill; size.max(1)].into_boxed_slice(),
            position: 0,
            filled: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// How many bytes of genuine history are available for a checked
    /// recall, as opposed to the window's raw capacity.
    pub fn filled(&self) -> usize {
        self.filled
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    /// Moves the write cursor without touching the buffer's contents, as
    /// the SZDD/KWAJ LZSS dialect does before the first byte is decoded
    /// (its window starts mostly-primed, with the cursor already 16 or 18
    /// bytes from the end).
    pub fn set_position(&mut self, new_position: usize) {
        assert!(
            new_position < self.buffer.len(),
            "position {} out of range for a window of size {}",
            new_position,
            self.buffer.len(),
        );
        self.position = new_position;
    }

    pub fn push(&mut self, value: u8) {
        self.buffer[self.position] = value;
        self.position = (self.position + 1) % self.buffer.len();
        if self.filled < self.buffer.len() {
            self.filled += 1;
        }
    }

    pub fn extend<I: IntoIterator<Item = u8>>(&mut self, iterable: I) {
        for item in iterable {
            self.push(item);
        }
    }

    /// Reproduces `length` bytes starting `distance` bytes behind the
    /// current write position, writing each one back into the window as
    /// it goes, so self-overlapping matches (`distance < length`) behave
    /// the way every LZ77 decoder expects.
    pub fn recall(&mut self, distance: usize, length: usize) -> Vec<u8> {
        let mut index = if distance > self.position {
            self.buffer.len() - (distance - self.position)
        } else {
            self.position - distance
        };
        let mut out = Vec::with_capacity(length);
        for _ in 0..length {
            let b = self.buffer[index];
            out.push(b);
            self.push(b);
            index = (index + 1) % self.buffer.len();
        }
        out
    }

    /// Like [`Self::recall`], but validates the distance against how much
    /// of the window is genuine history (`spec.md` §7: "match offset
    /// exceeds current window fill"). Used by codecs (LZX, MSZIP,
    /// Quantum) whose match offsets come straight off the bitstream and
    /// so can be corrupt input rather than a decoder-internal bug.
    pub fn recall_checked(&mut self, distance: usize, length: usize) -> Result<Vec<u8>, ExpandError> {
        if distance == 0 || distance > self.filled {
            return Err(ExpandError::CorruptBitstream(format!(
                "match distance {} exceeds window fill {}",
                distance,
                self.filled,
            )));
        }
        Ok(self.recall(distance, length))
    }

    /// Copies bytes starting at an absolute window index rather than a
    /// distance behind the cursor, used by the SZDD/KWAJ LZSS dialect
    /// (`spec.md` §4.5), whose match position is an absolute offset into
    /// the shared window.
    pub fn recall_absolute(&mut self, mut position: usize, length: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(length);
        for _ in 0..length {
            let b = self.buffer[position];
            position = (position + 1) % self.buffer.len();
            out.push(b);
            self.push(b);
        }
        out
    }
}
