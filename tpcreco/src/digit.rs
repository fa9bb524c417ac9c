//! Decoded readout samples.

/// One sampled amplitude on one pad at one time bin.
///
/// Pad and time are signed so that decoder output outside the valid range is
/// representable and can be dropped explicitly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DigitSample {
    pub sector: u16,
    pub row: u16,
    pub pad: i32,
    pub time: i32,
    pub amplitude: f32,
}

impl DigitSample {
    pub fn new(sector: usize, row: usize, pad: i32, time: i32, amplitude: f32) -> Self {
        Self {
            sector: sector as u16,
            row: row as u16,
            pad,
            time,
            amplitude,
        }
    }
}
