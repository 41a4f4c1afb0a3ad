//! H.264 bitstream massaging for the hardware path.
//!
//! MP4 tracks carry AVCC data: parameter sets live in the codec private
//! data (`avcC` box) and every NAL unit is prefixed with a 4-byte big-endian
//! length. The hardware core wants Annex-B: raw NAL units behind `00 00 01`
//! start codes.

use tracing::warn;

/// Annex-B start code.
pub const START_CODE: [u8; 3] = [0, 0, 1];

/// SPS and PPS slices extracted from an `avcC` box.
///
/// Layout assumed: one SPS whose length fits in the low byte at offset 7,
/// followed by one PPS with its length byte at `10 + sps_len`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParameterSets<'a> {
    pub sps: &'a [u8],
    pub pps: &'a [u8],
}

impl<'a> ParameterSets<'a> {
    #[must_use]
    pub fn from_avcc(extradata: &'a [u8]) -> Option<Self> {
        let sps_len = *extradata.get(7)? as usize;
        let sps = extradata.get(8..8 + sps_len)?;

        let pps_len = *extradata.get(10 + sps_len)? as usize;
        let pps = extradata.get(11 + sps_len..11 + sps_len + pps_len)?;

        Some(Self { sps, pps })
    }

    /// The SPS as a start-code-prefixed Annex-B unit.
    #[must_use]
    pub fn sps_unit(&self) -> Vec<u8> {
        prefixed(self.sps)
    }

    /// The PPS as a start-code-prefixed Annex-B unit.
    #[must_use]
    pub fn pps_unit(&self) -> Vec<u8> {
        prefixed(self.pps)
    }
}

fn prefixed(nal: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(START_CODE.len() + nal.len());
    out.extend_from_slice(&START_CODE);
    out.extend_from_slice(nal);
    out
}

/// Rewrite a packet of 4-byte length-prefixed NAL units into Annex-B form,
/// appending to `out`.
///
/// A length that runs past the end of the packet stops the rewrite; the
/// units already emitted stay valid.
pub fn rewrite_length_prefixed(data: &[u8], out: &mut Vec<u8>) {
    let mut offset = 0usize;
    while offset + 4 < data.len() {
        let size = u32::from_be_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]) as usize;
        offset += 4;

        let Some(unit) = data.get(offset..offset + size) else {
            warn!(offset, size, "NAL length overruns packet; rewrite truncated");
            return;
        };
        out.extend_from_slice(&START_CODE);
        out.extend_from_slice(unit);
        offset += size;
    }
}
