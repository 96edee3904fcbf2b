//! Pixel sample types. A raster stores either one byte per pixel or two big-endian bytes per
//! pixel, depending on its maximum value.
use byteorder::{BigEndian, ByteOrder};
use std::fmt::Debug;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SampleDepth {
    U8,
    U16,
}

impl SampleDepth {
    /// Depth needed for rasters whose largest sample is `max_value`.
    pub fn for_max_value(max_value: u32) -> Self {
        if max_value > u8::MAX as u32 {
            SampleDepth::U16
        } else {
            SampleDepth::U8
        }
    }

    pub fn size_in_bytes(self) -> usize {
        match self {
            SampleDepth::U8 => 1,
            SampleDepth::U16 => 2,
        }
    }
}

pub trait Sample: Copy + Default + PartialEq + Debug + Send + Sync + 'static {
    const DEPTH: SampleDepth;

    fn to_f64(self) -> f64;

    /// Rounds to the nearest integer and saturates to the range of the sample type.
    fn from_f64_rounded(value: f64) -> Self;

    /// Decodes `src` (big-endian raster bytes) into `dst`. `src` must hold exactly
    /// `dst.len() * DEPTH.size_in_bytes()` bytes.
    fn decode_into(src: &[u8], dst: &mut [Self]);

    /// Encodes `src` as big-endian raster bytes into `dst`.
    fn encode_into(src: &[Self], dst: &mut [u8]);
}

impl Sample for u8 {
    const DEPTH: SampleDepth = SampleDepth::U8;

    #[inline(always)]
    fn to_f64(self) -> f64 {
        self as f64
    }

    #[inline(always)]
    fn from_f64_rounded(value: f64) -> Self {
        value.round() as u8
    }

    fn decode_into(src: &[u8], dst: &mut [Self]) {
        dst.copy_from_slice(src);
    }

    fn encode_into(src: &[Self], dst: &mut [u8]) {
        dst.copy_from_slice(src);
    }
}

impl Sample for u16 {
    const DEPTH: SampleDepth = SampleDepth::U16;

    #[inline(always)]
    fn to_f64(self) -> f64 {
        self as f64
    }

    #[inline(always)]
    fn from_f64_rounded(value: f64) -> Self {
        value.round() as u16
    }

    fn decode_into(src: &[u8], dst: &mut [Self]) {
        BigEndian::read_u16_into(src, dst);
    }

    fn encode_into(src: &[Self], dst: &mut [u8]) {
        BigEndian::write_u16_into(src, dst);
    }
}
