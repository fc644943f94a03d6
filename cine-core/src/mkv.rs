// MKV (Matroska/WebM) demuxer
// Track table via the matroska-demuxer crate, block byte ranges via our own
// cluster walk (the crate hands out frame copies, not file positions).

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use matroska_demuxer::{MatroskaFile, TrackEntry, TrackType};

use crate::demuxer::{Container, ContainerBlock, ContainerInfo, Demuxer, FrameRange, TrackInfo, TrackKind};
use crate::ebml::{self, ElementHeader, UNKNOWN_SIZE};
use crate::error::{PlayerError, Result};

// ============================================================================
// Track conversion
// ============================================================================

fn convert_track(track: &TrackEntry) -> Option<TrackInfo> {
    let number = track.track_number().get();
    let codec_id = track.codec_id();
    let codec_private = track.codec_private().map(|p| p.to_vec()).unwrap_or_default();

    let info = match track.track_type() {
        TrackType::Video => {
            let video = track.video()?;
            let width = video
                .display_width()
                .map(|w| w.get())
                .unwrap_or_else(|| video.pixel_width().get());
            let height = video
                .display_height()
                .map(|h| h.get())
                .unwrap_or_else(|| video.pixel_height().get());
            TrackInfo::video(number, codec_id, width as u32, height as u32)
        }
        TrackType::Audio => {
            let audio = track.audio()?;
            TrackInfo::audio(
                number,
                codec_id,
                audio.sampling_frequency() as u32,
                audio.channels().get() as u32,
            )
        }
        _ => return None,
    };

    Some(info.with_codec_private(codec_private))
}

// ============================================================================
// WebM demuxer
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct WebmDemuxer;

impl Demuxer for WebmDemuxer {
    fn open(&self, path: &Path) -> Result<Container> {
        let open_err = |e: io::Error| PlayerError::ContainerOpen(format!("{}: {}", path.display(), e));

        let file = File::open(path).map_err(open_err)?;
        let mkv = MatroskaFile::open(file)
            .map_err(|e| PlayerError::ContainerOpen(format!("Failed to parse MKV: {:?}", e)))?;

        let timestamp_scale = mkv.info().timestamp_scale().get();
        let tracks: Vec<TrackInfo> = mkv.tracks().iter().filter_map(convert_track).collect();

        let mut reader = BufReader::new(File::open(path).map_err(open_err)?);
        let blocks = scan_blocks(&mut reader, timestamp_scale).map_err(open_err)?;
        if blocks.is_empty() {
            return Err(PlayerError::ContainerOpen(format!(
                "{}: no parsable cluster",
                path.display()
            )));
        }

        let (display_width, display_height) = tracks
            .iter()
            .find(|t| t.kind == TrackKind::Video)
            .map(|t| (t.width, t.height))
            .unwrap_or((0, 0));

        tracing::info!(
            path = %path.display(),
            tracks = tracks.len(),
            blocks = blocks.len(),
            "WebM container parsed"
        );

        let info = ContainerInfo {
            display_width,
            display_height,
            tracks,
            blocks,
        };
        Ok(Container::new(info, reader))
    }
}

// ============================================================================
// Cluster walk
// ============================================================================

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

fn seek_past<R: Seek>(reader: &mut R, header: &ElementHeader) -> io::Result<()> {
    let end = header
        .end()
        .ok_or_else(|| invalid("unknown-size element cannot be skipped"))?;
    reader.seek(SeekFrom::Start(end))?;
    Ok(())
}

/// Walk every cluster of the first segment and list its blocks in file order.
///
/// A read error part-way through (truncated download) ends the walk; the
/// blocks found so far are kept.
pub fn scan_blocks<R: Read + Seek>(reader: &mut R, timestamp_scale: u64) -> io::Result<Vec<ContainerBlock>> {
    let stream_len = reader.seek(SeekFrom::End(0))?;
    reader.seek(SeekFrom::Start(0))?;

    let segment = loop {
        match ebml::read_header(reader)? {
            None => return Err(invalid("no Segment element")),
            Some(h) if h.id == ebml::ID_SEGMENT => break h,
            Some(h) => seek_past(reader, &h)?,
        }
    };

    reader.seek(SeekFrom::Start(segment.data_offset()))?;
    let segment_end = segment.end().map_or(stream_len, |end| end.min(stream_len));
    let mut blocks = Vec::new();

    loop {
        let pos = reader.stream_position()?;
        if pos >= segment_end {
            break;
        }
        let header = match ebml::read_header(reader) {
            Ok(Some(h)) => h,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("Segment walk stopped at {}: {}", pos, e);
                break;
            }
        };

        if header.id != ebml::ID_CLUSTER {
            if header.end().is_none() {
                break;
            }
            seek_past(reader, &header)?;
            continue;
        }

        if let Err(e) = scan_cluster(reader, &header, segment_end, timestamp_scale, &mut blocks) {
            tracing::warn!("Cluster at {} unreadable: {}", header.position, e);
            break;
        }
        if header.size != UNKNOWN_SIZE {
            seek_past(reader, &header)?;
        }
    }

    Ok(blocks)
}

fn scan_cluster<R: Read + Seek>(
    reader: &mut R,
    cluster: &ElementHeader,
    segment_end: u64,
    timestamp_scale: u64,
    blocks: &mut Vec<ContainerBlock>,
) -> io::Result<()> {
    let end = cluster.end().map_or(segment_end, |end| end.min(segment_end));
    let mut cluster_ts = 0u64;

    reader.seek(SeekFrom::Start(cluster.data_offset()))?;
    loop {
        let pos = reader.stream_position()?;
        if pos >= end {
            break;
        }
        let Some(child) = ebml::read_header(reader)? else {
            break;
        };

        if cluster.size == UNKNOWN_SIZE && ebml::LEVEL1_IDS.contains(&child.id) {
            reader.seek(SeekFrom::Start(child.position))?;
            break;
        }

        match child.id {
            ebml::ID_TIMESTAMP => cluster_ts = ebml::read_uint(reader, child.size)?,
            ebml::ID_SIMPLE_BLOCK => {
                let payload = ebml::read_payload(reader, &child, end)?;
                push_block(blocks, &child, &payload, None, cluster_ts, timestamp_scale);
            }
            ebml::ID_BLOCK_GROUP => scan_block_group(reader, &child, end, cluster_ts, timestamp_scale, blocks)?,
            _ => {}
        }
        seek_past(reader, &child)?;
    }

    Ok(())
}

fn scan_block_group<R: Read + Seek>(
    reader: &mut R,
    group: &ElementHeader,
    cluster_end: u64,
    cluster_ts: u64,
    timestamp_scale: u64,
    blocks: &mut Vec<ContainerBlock>,
) -> io::Result<()> {
    let end = group.end().ok_or_else(|| invalid("unknown-size BlockGroup"))?;
    if end > cluster_end {
        return Err(invalid("BlockGroup runs past its cluster"));
    }
    let mut block: Option<(ElementHeader, Vec<u8>)> = None;
    let mut has_reference = false;

    reader.seek(SeekFrom::Start(group.data_offset()))?;
    while reader.stream_position()? < end {
        let Some(child) = ebml::read_header(reader)? else {
            break;
        };
        match child.id {
            ebml::ID_BLOCK => block = Some((child, ebml::read_payload(reader, &child, end)?)),
            ebml::ID_REFERENCE_BLOCK => has_reference = true,
            _ => {}
        }
        seek_past(reader, &child)?;
    }

    if let Some((header, payload)) = block {
        push_block(blocks, &header, &payload, Some(!has_reference), cluster_ts, timestamp_scale);
    }
    Ok(())
}

fn push_block(
    blocks: &mut Vec<ContainerBlock>,
    element: &ElementHeader,
    payload: &[u8],
    keyframe: Option<bool>,
    cluster_ts: u64,
    timestamp_scale: u64,
) {
    let header = match ebml::parse_block_header(payload) {
        Ok(h) => h,
        Err(e) => {
            tracing::warn!("Skipping malformed block at {}: {}", element.position, e);
            return;
        }
    };

    let base = element.data_offset();
    let timestamp_ns = (cluster_ts as i64 + header.timecode as i64).saturating_mul(timestamp_scale as i64);

    blocks.push(ContainerBlock {
        track_number: header.track_number,
        timestamp_ns,
        keyframe: keyframe.unwrap_or(header.keyframe),
        frames: header
            .frames
            .iter()
            .map(|&(offset, len)| FrameRange {
                offset: base + offset,
                len,
            })
            .collect(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn size_vint(len: usize) -> Vec<u8> {
        if len < 0x7F {
            vec![0x80 | len as u8]
        } else {
            assert!(len < 0x3FFF);
            vec![0x40 | (len >> 8) as u8, len as u8]
        }
    }

    fn element(id: &[u8], payload: &[u8]) -> Vec<u8> {
        let mut out = id.to_vec();
        out.extend(size_vint(payload.len()));
        out.extend_from_slice(payload);
        out
    }

    fn simple_block(track: u8, timecode: i16, flags: u8, frame: &[u8]) -> Vec<u8> {
        let mut payload = vec![0x80 | track];
        payload.extend_from_slice(&timecode.to_be_bytes());
        payload.push(flags);
        payload.extend_from_slice(frame);
        element(&[0xA3], &payload)
    }

    fn ebml_header() -> Vec<u8> {
        element(&[0x1A, 0x45, 0xDF, 0xA3], &element(&[0x42, 0x82], b"webm"))
    }

    const CLUSTER: [u8; 4] = [0x1F, 0x43, 0xB6, 0x75];
    const SEGMENT: [u8; 4] = [0x18, 0x53, 0x80, 0x67];

    #[test]
    fn test_scan_simple_blocks() {
        let mut cluster = element(&[0xE7], &[0x64]); // timestamp 100
        cluster.extend(simple_block(1, 0, 0x80, &[1, 2, 3]));
        cluster.extend(simple_block(2, 5, 0x80, &[9, 9]));
        cluster.extend(simple_block(1, 33, 0x00, &[4, 5]));

        let mut file = ebml_header();
        file.extend(element(&SEGMENT, &element(&CLUSTER, &cluster)));

        let blocks = scan_blocks(&mut Cursor::new(&file), 1_000_000).unwrap();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].track_number, 1);
        assert_eq!(blocks[0].timestamp_ns, 100_000_000);
        assert!(blocks[0].keyframe);
        assert_eq!(blocks[1].track_number, 2);
        assert_eq!(blocks[1].timestamp_ns, 105_000_000);
        assert_eq!(blocks[2].timestamp_ns, 133_000_000);
        assert!(!blocks[2].keyframe);

        // Frame ranges point at the payload bytes in the file
        let range = blocks[2].frames[0];
        let start = range.offset as usize;
        assert_eq!(&file[start..start + range.len as usize], &[4, 5]);
    }

    #[test]
    fn test_scan_block_group_keyframe_from_reference() {
        let mut block_payload = vec![0x81, 0x00, 0x00, 0x00];
        block_payload.extend_from_slice(&[7, 7, 7]);
        let plain = element(&[0xBB], &[]); // unrelated child
        let mut group_key = element(&[0xA1], &block_payload);
        group_key.extend(plain);
        let mut group_ref = element(&[0xA1], &block_payload);
        group_ref.extend(element(&[0xFB], &[0x01]));

        let mut cluster = element(&[0xE7], &[0x00]);
        cluster.extend(element(&[0xA0], &group_key));
        cluster.extend(element(&[0xA0], &group_ref));

        let mut file = ebml_header();
        file.extend(element(&SEGMENT, &element(&CLUSTER, &cluster)));

        let blocks = scan_blocks(&mut Cursor::new(&file), 1_000_000).unwrap();
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].keyframe);
        assert!(!blocks[1].keyframe);
        assert_eq!(blocks[0].frames[0].len, 3);
    }

    #[test]
    fn test_scan_unknown_size_clusters() {
        let mut segment_body = Vec::new();
        for ts in [0u8, 40] {
            segment_body.extend_from_slice(&CLUSTER);
            segment_body.push(0xFF); // unknown size
            segment_body.extend(element(&[0xE7], &[ts]));
            segment_body.extend(simple_block(1, 0, 0x80, &[ts, ts]));
        }

        let mut file = ebml_header();
        file.extend_from_slice(&SEGMENT);
        file.push(0xFF);
        file.extend(segment_body);

        let blocks = scan_blocks(&mut Cursor::new(&file), 1_000_000).unwrap();
        let stamps: Vec<i64> = blocks.iter().map(|b| b.timestamp_ns).collect();
        assert_eq!(stamps, vec![0, 40_000_000]);
    }

    #[test]
    fn test_truncated_file_keeps_found_blocks() {
        let mut cluster = element(&[0xE7], &[0x00]);
        cluster.extend(simple_block(1, 0, 0x80, &[1]));
        let mut file = ebml_header();
        file.extend(element(&SEGMENT, &[element(&CLUSTER, &cluster), CLUSTER.to_vec()].concat()));
        // Second cluster header is cut off after its id
        let blocks = scan_blocks(&mut Cursor::new(&file), 1_000_000).unwrap();
        assert_eq!(blocks.len(), 1);
    }

    #[test]
    fn test_scan_eight_byte_segment_size() {
        let mut cluster = element(&[0xE7], &[0x00]);
        cluster.extend(simple_block(1, 0, 0x80, &[1]));
        cluster.extend(simple_block(1, 20, 0x80, &[2]));
        let body = element(&CLUSTER, &cluster);

        let mut file = ebml_header();
        file.extend_from_slice(&SEGMENT);
        file.push(0x01);
        file.extend_from_slice(&(body.len() as u64).to_be_bytes()[1..]);
        file.extend(body);

        let blocks = scan_blocks(&mut Cursor::new(&file), 1_000_000).unwrap();
        let stamps: Vec<i64> = blocks.iter().map(|b| b.timestamp_ns).collect();
        assert_eq!(stamps, vec![0, 20_000_000]);
    }

    #[test]
    fn test_oversized_block_ends_walk() {
        let mut body = CLUSTER.to_vec();
        body.push(0xFF);
        body.extend(element(&[0xE7], &[0x00]));
        body.extend(simple_block(1, 0, 0x80, &[1]));
        // SimpleBlock claiming 2^48 bytes
        body.extend_from_slice(&[0xA3, 0x03, 0, 0, 0, 0, 0, 0x81, 0x00, 0x00, 0x80, 0x02]);

        let mut file = ebml_header();
        file.extend_from_slice(&SEGMENT);
        file.push(0xFF);
        file.extend(body);

        let blocks = scan_blocks(&mut Cursor::new(&file), 1_000_000).unwrap();
        assert_eq!(blocks.len(), 1);
    }

    #[test]
    fn test_corrupt_block_size_finds_nothing() {
        let mut body = CLUSTER.to_vec();
        body.push(0xFF);
        body.extend_from_slice(&[0xA3, 0x03, 0, 0, 0, 0, 0, 0x81, 0x00, 0x00, 0x80, 0x02]);
        let mut file = ebml_header();
        file.extend_from_slice(&SEGMENT);
        file.push(0xFF);
        file.extend(body);

        let blocks = scan_blocks(&mut Cursor::new(&file), 1_000_000).unwrap();
        assert!(blocks.is_empty());
    }

    #[test]
    fn test_missing_segment_is_error() {
        let file = ebml_header();
        assert!(scan_blocks(&mut Cursor::new(&file), 1_000_000).is_err());
    }

    #[test]
    fn test_open_missing_file() {
        let err = WebmDemuxer.open(Path::new("/no/such/file.webm")).unwrap_err();
        assert!(matches!(err, PlayerError::ContainerOpen(_)));
    }

    #[test]
    fn test_open_garbage_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.webm");
        std::fs::write(&path, b"not a matroska file at all").unwrap();
        let err = WebmDemuxer.open(&path).unwrap_err();
        assert_eq!(err.code(), 1);
    }
}
