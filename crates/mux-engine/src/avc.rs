//! H.264 bitstream helpers for the MP4 writer.
//!
//! Encoders hand out access units either in Annex B form (start-code
//! delimited) or already length-prefixed. MP4 `avc1` samples must be
//! length-prefixed, with SPS/PPS carried in the `avcC` record instead of the
//! sample data.

pub const NAL_NON_IDR_SLICE: u8 = 1;
pub const NAL_IDR_SLICE: u8 = 5;
pub const NAL_SEI: u8 = 6;
pub const NAL_SPS: u8 = 7;
pub const NAL_PPS: u8 = 8;
pub const NAL_AUD: u8 = 9;

/// Whether `data` begins with an Annex B start code.
pub fn is_annex_b(data: &[u8]) -> bool {
    data.starts_with(&[0, 0, 1]) || data.starts_with(&[0, 0, 0, 1])
}

/// NAL unit type of a NAL payload (without start code or length prefix).
pub fn nal_type(nal: &[u8]) -> Option<u8> {
    nal.first().map(|b| b & 0x1F)
}

/// Split an Annex B buffer into NAL payloads.
///
/// Handles both 3- and 4-byte start codes. Trailing zero bytes before the
/// next start code are treated as part of the start code.
pub fn split_annex_b(data: &[u8]) -> Vec<&[u8]> {
    let mut starts = Vec::new();
    let mut i = 0;
    while i + 2 < data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            starts.push((i, i + 3));
            i += 3;
        } else {
            i += 1;
        }
    }

    let mut nals = Vec::with_capacity(starts.len());
    for (idx, &(_, payload_start)) in starts.iter().enumerate() {
        let mut end = match starts.get(idx + 1) {
            Some(&(next_code, _)) => next_code,
            None => data.len(),
        };
        while end > payload_start && data[end - 1] == 0 && idx + 1 < starts.len() {
            end -= 1;
        }
        if end > payload_start {
            nals.push(&data[payload_start..end]);
        }
    }
    nals
}

/// Convert one access unit to length-prefixed form, dropping parameter sets
/// and access unit delimiters. Data that is not Annex B is returned unchanged.
pub fn annex_b_to_length_prefixed(data: &[u8]) -> Vec<u8> {
    if !is_annex_b(data) {
        return data.to_vec();
    }
    let mut out = Vec::with_capacity(data.len());
    for nal in split_annex_b(data) {
        if matches!(nal_type(nal), Some(NAL_SPS | NAL_PPS | NAL_AUD)) {
            continue;
        }
        out.extend_from_slice(&(nal.len() as u32).to_be_bytes());
        out.extend_from_slice(nal);
    }
    out
}

/// First SPS and PPS found in an Annex B access unit.
pub fn find_parameter_sets(data: &[u8]) -> Option<(&[u8], &[u8])> {
    let nals = split_annex_b(data);
    let sps = nals.iter().find(|n| nal_type(n) == Some(NAL_SPS))?;
    let pps = nals.iter().find(|n| nal_type(n) == Some(NAL_PPS))?;
    Some((sps, pps))
}

/// Build an AVCDecoderConfigurationRecord with 4-byte NAL lengths.
pub fn build_avcc_record(sps: &[u8], pps: &[u8]) -> Vec<u8> {
    let mut record = Vec::with_capacity(11 + sps.len() + pps.len());
    record.push(1);
    if sps.len() >= 4 {
        record.extend_from_slice(&sps[1..4]);
    } else {
        // High profile, level 4.0
        record.extend_from_slice(&[0x64, 0x00, 0x28]);
    }
    record.push(0xFF);
    record.push(0xE1);
    record.extend_from_slice(&(sps.len() as u16).to_be_bytes());
    record.extend_from_slice(sps);
    record.push(1);
    record.extend_from_slice(&(pps.len() as u16).to_be_bytes());
    record.extend_from_slice(pps);
    record
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPS: &[u8] = &[0x67, 0x64, 0x00, 0x28, 0xAC];
    const PPS: &[u8] = &[0x68, 0xEE, 0x3C, 0x80];
    const IDR: &[u8] = &[0x65, 0x88, 0x84, 0x00];

    fn annex_b(nals: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for (i, nal) in nals.iter().enumerate() {
            if i == 0 {
                out.extend_from_slice(&[0, 0, 0, 1]);
            } else {
                out.extend_from_slice(&[0, 0, 1]);
            }
            out.extend_from_slice(nal);
        }
        out
    }

    #[test]
    fn test_split_mixed_start_codes() {
        let data = annex_b(&[SPS, PPS, IDR]);
        let nals = split_annex_b(&data);
        assert_eq!(nals, vec![SPS, PPS, IDR]);
    }

    #[test]
    fn test_length_prefixed_drops_parameter_sets() {
        let data = annex_b(&[SPS, PPS, IDR]);
        let out = annex_b_to_length_prefixed(&data);
        let mut expected = (IDR.len() as u32).to_be_bytes().to_vec();
        expected.extend_from_slice(IDR);
        assert_eq!(out, expected);
    }

    #[test]
    fn test_non_annex_b_passes_through() {
        let data = vec![0, 0, 0, 4, 0x65, 1, 2, 3];
        assert_eq!(annex_b_to_length_prefixed(&data), data);
    }

    #[test]
    fn test_avcc_record_from_parameter_sets() {
        let data = annex_b(&[SPS, PPS, IDR]);
        let (sps, pps) = find_parameter_sets(&data).unwrap();
        let record = build_avcc_record(sps, pps);
        assert_eq!(&record[..4], &[1, 0x64, 0x00, 0x28]);
        assert_eq!(record[4], 0xFF);
        assert_eq!(record[5], 0xE1);
        assert_eq!(record.len(), 11 + SPS.len() + PPS.len());
    }

    #[test]
    fn test_no_parameter_sets_in_delta_frame() {
        let data = annex_b(&[&[0x41, 0x9A, 0x00]]);
        assert!(find_parameter_sets(&data).is_none());
    }
}
