//! H.264 NAL unit utilities
//!
//! Matroska stores H.264 as AVCC (length-prefixed NALs) with the parameter
//! sets in the `avcC` codec private record. OpenH264 wants Annex B.

/// Annex B start code (4-byte version)
const ANNEX_B_START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// Rewrite AVCC length prefixes as Annex B start codes.
///
/// A truncated trailing NAL is dropped.
pub fn avcc_to_annexb(data: &[u8], nal_length_size: usize) -> Vec<u8> {
    if data.is_empty() || nal_length_size == 0 || nal_length_size > 4 {
        return data.to_vec();
    }

    let mut result = Vec::with_capacity(data.len() + 16);
    let mut offset = 0;

    while offset + nal_length_size <= data.len() {
        let nal_len = read_be_uint(&data[offset..offset + nal_length_size]);
        offset += nal_length_size;

        if nal_len == 0 || offset + nal_len > data.len() {
            break;
        }

        result.extend_from_slice(&ANNEX_B_START_CODE);
        result.extend_from_slice(&data[offset..offset + nal_len]);
        offset += nal_len;
    }

    result
}

/// Parse an `avcC` record into Annex B SPS/PPS plus the NAL length size.
pub fn parse_avcc_extradata(extradata: &[u8]) -> Option<(Vec<u8>, usize)> {
    // [0] version=1, [1..4] profile/compat/level,
    // [4] 0xFC | (nal_length_size - 1), [5] 0xE0 | num_sps, SPS..., num_pps, PPS...
    if extradata.len() < 7 || extradata[0] != 1 {
        return None;
    }

    let nal_length_size = ((extradata[4] & 0x03) + 1) as usize;
    let num_sps = (extradata[5] & 0x1F) as usize;

    let mut result = Vec::with_capacity(extradata.len() + 16);
    let mut offset = 6;

    for _ in 0..num_sps {
        offset = copy_parameter_set(extradata, offset, &mut result)?;
    }

    if let Some(&num_pps) = extradata.get(offset) {
        offset += 1;
        for _ in 0..num_pps {
            match copy_parameter_set(extradata, offset, &mut result) {
                Some(next) => offset = next,
                None => break,
            }
        }
    }

    Some((result, nal_length_size))
}

/// Copy one u16-length-prefixed parameter set; returns the offset after it.
fn copy_parameter_set(data: &[u8], offset: usize, out: &mut Vec<u8>) -> Option<usize> {
    let len_bytes = data.get(offset..offset + 2)?;
    let len = u16::from_be_bytes([len_bytes[0], len_bytes[1]]) as usize;
    let nal = data.get(offset + 2..offset + 2 + len)?;
    out.extend_from_slice(&ANNEX_B_START_CODE);
    out.extend_from_slice(nal);
    Some(offset + 2 + len)
}

fn read_be_uint(data: &[u8]) -> usize {
    data.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_avcc_to_annexb() {
        let avcc = vec![0x00, 0x00, 0x00, 0x05, 0x67, 0x42, 0x00, 0x1e, 0x9a];
        let annexb = avcc_to_annexb(&avcc, 4);

        assert_eq!(&annexb[0..4], &ANNEX_B_START_CODE);
        assert_eq!(&annexb[4..], &[0x67, 0x42, 0x00, 0x1e, 0x9a]);
    }

    #[test]
    fn test_avcc_two_byte_lengths_and_truncation() {
        let avcc = vec![0x00, 0x02, 0x65, 0x88, 0x00, 0x09, 0x41];
        let annexb = avcc_to_annexb(&avcc, 2);
        assert_eq!(annexb, vec![0, 0, 0, 1, 0x65, 0x88]);
    }

    #[test]
    fn test_parse_avcc_extradata() {
        let extradata = vec![
            0x01, 0x42, 0x00, 0x1e, 0xFF, // version, profile, compat, level, length size 4
            0xE1, 0x00, 0x02, 0x67, 0x42, // 1 SPS of 2 bytes
            0x01, 0x00, 0x01, 0x68, // 1 PPS of 1 byte
        ];
        let (sets, length_size) = parse_avcc_extradata(&extradata).unwrap();
        assert_eq!(length_size, 4);
        assert_eq!(sets, vec![0, 0, 0, 1, 0x67, 0x42, 0, 0, 0, 1, 0x68]);
    }

    #[test]
    fn test_parse_avcc_rejects_garbage() {
        assert!(parse_avcc_extradata(&[]).is_none());
        assert!(parse_avcc_extradata(&[0x02, 0, 0, 0, 0, 0, 0]).is_none());
    }
}
