//! Codec state machines (`spec.md` §4.4): LZSS, MSZIP, LZX, Quantum, and
//! Zeck LZ77. Each codec owns a sliding window and whatever per-block
//! state its format needs, and is driven a folder/section at a time by
//! the container framers in [`crate::container`].

pub mod lzss;
pub mod lzx;
pub mod mszip;
pub mod quantum;
pub mod zeck;

/// LZSS dialect: the two formats differ only in their window's initial
/// cursor position (`spec.md` §4.4.1).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LzssDialect {
    /// SZDD: cursor starts 16 bytes from the end of the window.
    Szdd,
    /// The QBASIC variant (KWAJ's "SZ" method): cursor starts at window
    /// position 0.
    KwajSz,
}

#[derive(Clone, Copy, Debug)]
pub struct LzssConfig {
    pub dialect: LzssDialect,
}

#[derive(Clone, Copy, Debug)]
pub struct MszipConfig {
    /// `spec.md` §4.4.2: successive blocks in one CAB/KWAJ folder share a
    /// 32 KiB history window rather than each starting from scratch.
    pub share_history_across_blocks: bool,
}

impl Default for MszipConfig {
    fn default() -> Self {
        Self { share_history_across_blocks: true }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct LzxConfig {
    pub window_bits: u8,
    pub reset_interval_frames: u32,
    pub intel_filesize: u32,
    pub is_delta: bool,
}

impl LzxConfig {
    pub fn window_size(&self) -> usize {
        1usize << self.window_bits
    }
}

#[derive(Clone, Copy, Debug)]
pub struct QuantumConfig {
    pub window_bits: u8,
}

#[derive(Clone, Copy, Debug)]
pub struct ZeckConfig {
    pub has_phrases: bool,
}
