//! EBML element walking and Matroska block headers.
//!
//! Only what the block scanner needs: element headers, unsigned integers, and
//! the SimpleBlock/Block header with all three lacing schemes resolved into
//! per-frame byte ranges.
//!
//! ```text
//! [track: vint] [timecode: i16] [flags: u8] [lacing header?] [frame data...]
//! ```

use std::io::{self, Read, Seek, SeekFrom};

pub const ID_EBML: u32 = 0x1A45_DFA3;
pub const ID_SEGMENT: u32 = 0x1853_8067;
pub const ID_CLUSTER: u32 = 0x1F43_B675;
pub const ID_TIMESTAMP: u32 = 0xE7;
pub const ID_SIMPLE_BLOCK: u32 = 0xA3;
pub const ID_BLOCK_GROUP: u32 = 0xA0;
pub const ID_BLOCK: u32 = 0xA1;
pub const ID_REFERENCE_BLOCK: u32 = 0xFB;

/// Level-1 children of Segment. Seeing one ends an unknown-size cluster.
pub const LEVEL1_IDS: [u32; 8] = [
    0x114D_9B74, // SeekHead
    0x1549_A966, // Info
    0x1654_AE6B, // Tracks
    ID_CLUSTER,
    0x1C53_BB6B, // Cues
    0x1941_A469, // Attachments
    0x1043_A770, // Chapters
    0x1254_C367, // Tags
];

pub const UNKNOWN_SIZE: u64 = u64::MAX;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ElementHeader {
    pub id: u32,
    /// `UNKNOWN_SIZE` for live-style elements.
    pub size: u64,
    pub position: u64,
    pub header_len: u64,
}

impl ElementHeader {
    pub fn data_offset(&self) -> u64 {
        self.position + self.header_len
    }

    pub fn end(&self) -> Option<u64> {
        (self.size != UNKNOWN_SIZE).then(|| self.data_offset().saturating_add(self.size))
    }
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

fn vint_width(first: u8) -> io::Result<usize> {
    match first.leading_zeros() {
        n @ 0..=7 => Ok(n as usize + 1),
        _ => Err(invalid("invalid EBML vint leading byte 0x00")),
    }
}

/// Value bits of a vint's leading byte. An 8-byte vint has none.
fn vint_mask(first: u8, width: usize) -> u8 {
    first & (0xFFu16 >> width) as u8
}

fn read_byte<R: Read>(reader: &mut R) -> io::Result<u8> {
    let mut b = [0u8; 1];
    reader.read_exact(&mut b)?;
    Ok(b[0])
}

/// Read an element header at the current position. `Ok(None)` at clean EOF.
pub fn read_header<R: Read + Seek>(reader: &mut R) -> io::Result<Option<ElementHeader>> {
    let position = reader.stream_position()?;

    let first = match read_byte(reader) {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };
    let id_width = vint_width(first)?;
    if id_width > 4 {
        return Err(invalid(format!("element id wider than 4 bytes at {}", position)));
    }
    let mut id = first as u32;
    for _ in 1..id_width {
        id = (id << 8) | read_byte(reader)? as u32;
    }

    let first = read_byte(reader)?;
    let width = vint_width(first)?;
    let mut size = vint_mask(first, width) as u64;
    for _ in 1..width {
        size = (size << 8) | read_byte(reader)? as u64;
    }
    if size == (1u64 << (7 * width)) - 1 {
        size = UNKNOWN_SIZE;
    }

    let header_len = reader.stream_position()? - position;
    Ok(Some(ElementHeader {
        id,
        size,
        position,
        header_len,
    }))
}

pub fn read_uint<R: Read>(reader: &mut R, size: u64) -> io::Result<u64> {
    if size > 8 {
        return Err(invalid(format!("uint element of {} bytes", size)));
    }
    let mut value = 0u64;
    for _ in 0..size {
        value = (value << 8) | read_byte(reader)? as u64;
    }
    Ok(value)
}

/// Read an element's payload. `limit` is the end of the enclosing data (the
/// parent's end or the stream length); a payload reaching past it is rejected
/// before anything is allocated.
pub fn read_payload<R: Read + Seek>(reader: &mut R, header: &ElementHeader, limit: u64) -> io::Result<Vec<u8>> {
    let end = header
        .end()
        .ok_or_else(|| invalid("cannot read payload of unknown size"))?;
    if end > limit {
        return Err(invalid(format!(
            "element at {} claims {} bytes, past end {}",
            header.position, header.size, limit
        )));
    }
    let mut buf = vec![0u8; header.size as usize];
    reader.seek(SeekFrom::Start(header.data_offset()))?;
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Unsigned vint inside block data. Returns (value, bytes consumed).
fn parse_vint(data: &[u8]) -> io::Result<(u64, usize)> {
    let first = *data.first().ok_or_else(|| invalid("truncated vint"))?;
    let width = vint_width(first)?;
    if data.len() < width {
        return Err(invalid("truncated vint"));
    }
    let mut value = vint_mask(first, width) as u64;
    for &b in &data[1..width] {
        value = (value << 8) | b as u64;
    }
    Ok((value, width))
}

/// Signed vint used by EBML lacing size deltas.
fn parse_svint(data: &[u8]) -> io::Result<(i64, usize)> {
    let (raw, width) = parse_vint(data)?;
    let bias = (1i64 << (7 * width - 1)) - 1;
    Ok((raw as i64 - bias, width))
}

/// Header fields of a SimpleBlock or Block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub track_number: u64,
    pub timecode: i16,
    pub keyframe: bool,
    /// (offset relative to the block payload start, length)
    pub frames: Vec<(u64, u64)>,
}

/// Parse a block payload, resolving lacing into frame ranges.
pub fn parse_block_header(data: &[u8]) -> io::Result<BlockHeader> {
    let (track_number, mut pos) = parse_vint(data)?;
    if data.len() < pos + 3 {
        return Err(invalid("truncated block header"));
    }
    let timecode = i16::from_be_bytes([data[pos], data[pos + 1]]);
    let flags = data[pos + 2];
    pos += 3;

    let keyframe = flags & 0x80 != 0;
    let lacing = (flags >> 1) & 0x03;

    if lacing == 0 {
        return Ok(BlockHeader {
            track_number,
            timecode,
            keyframe,
            frames: vec![(pos as u64, (data.len() - pos) as u64)],
        });
    }

    let count = *data.get(pos).ok_or_else(|| invalid("missing lace count"))? as usize + 1;
    pos += 1;

    let mut sizes: Vec<u64> = Vec::with_capacity(count);
    match lacing {
        // Xiph
        0b01 => {
            for _ in 0..count - 1 {
                let mut size = 0u64;
                loop {
                    let b = *data.get(pos).ok_or_else(|| invalid("truncated xiph lace"))?;
                    pos += 1;
                    size += b as u64;
                    if b != 0xFF {
                        break;
                    }
                }
                sizes.push(size);
            }
        }
        // EBML
        0b11 => {
            let (first, used) = parse_vint(&data[pos..])?;
            pos += used;
            sizes.push(first);
            let mut prev = first as i64;
            for _ in 1..count - 1 {
                let (delta, used) = parse_svint(&data[pos..])?;
                pos += used;
                prev += delta;
                if prev < 0 {
                    return Err(invalid("negative EBML lace size"));
                }
                sizes.push(prev as u64);
            }
        }
        // Fixed
        _ => {
            let remaining = (data.len() - pos) as u64;
            if remaining % count as u64 != 0 {
                return Err(invalid("fixed lacing not evenly divisible"));
            }
            sizes.extend(std::iter::repeat(remaining / count as u64).take(count - 1));
        }
    }

    let laced: u64 = sizes.iter().sum();
    let remaining = (data.len() - pos) as u64;
    if laced > remaining {
        return Err(invalid("lace sizes exceed block"));
    }
    sizes.push(remaining - laced);

    let mut offset = pos as u64;
    let frames = sizes
        .into_iter()
        .map(|len| {
            let range = (offset, len);
            offset += len;
            range
        })
        .collect();

    Ok(BlockHeader {
        track_number,
        timecode,
        keyframe,
        frames,
    })
}

/// Split Xiph-laced codec private data (Vorbis: identification, comment, setup).
pub fn split_xiph_packets(data: &[u8]) -> io::Result<Vec<&[u8]>> {
    let count = *data.first().ok_or_else(|| invalid("empty xiph header"))? as usize + 1;
    let mut pos = 1;
    let mut sizes = Vec::with_capacity(count);
    for _ in 0..count - 1 {
        let mut size = 0usize;
        loop {
            let b = *data.get(pos).ok_or_else(|| invalid("truncated xiph header"))?;
            pos += 1;
            size += b as usize;
            if b != 0xFF {
                break;
            }
        }
        sizes.push(size);
    }

    let mut packets = Vec::with_capacity(count);
    for size in sizes {
        let end = pos + size;
        if end > data.len() {
            return Err(invalid("xiph packet past end of header"));
        }
        packets.push(&data[pos..end]);
        pos = end;
    }
    packets.push(&data[pos..]);
    Ok(packets)
}
