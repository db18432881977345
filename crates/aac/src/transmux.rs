//! ADTS channel-configuration rewriting with persistent resynchronization.
//!
//! Both entry points keep carried-over bytes in a caller-owned workspace
//! between calls. A zero in the workspace head byte means "synchronized; the
//! following 0xff is the sync word" and is restored before parsing, so the
//! scan for the sync pattern only runs after a discontinuity.

use bytes_util::{BitCursor, BitSink};
use memchr::memchr_iter;

use crate::adts::{AdtsHeader, SampleFrequencyIndex};
use crate::element::{self, ID_CPE, ID_END, ID_SCE};
use crate::error::TransmuxError;

/// Zero padding appended while a frame is parsed; Huffman reads that spill
/// past the payload see zero bits and fail the overrun check afterwards.
const EXTRA_WORKSPACE_BYTES: usize = 16;

fn sync_payload(workspace: &mut Vec<u8>, payload: &[u8]) -> bool {
    if !workspace.is_empty() && workspace[0] == 0 {
        // No need to resync
        workspace.extend_from_slice(payload);
        workspace[0] = 0xff;
    } else {
        // Resync
        workspace.extend_from_slice(payload);
        let mut start = workspace.len();
        for i in memchr_iter(0xff, workspace) {
            if i + 1 >= workspace.len() || workspace[i + 1] & 0xf0 == 0xf0 {
                start = i;
                break;
            }
        }
        workspace.drain(..start);
        if workspace.len() < 2 {
            return false;
        }
    }
    debug_assert_eq!(workspace[0], 0xff);
    true
}

/// Walks whole ADTS frames forward from the workspace head and carries over
/// whatever follows them. Called after a malformed frame so the stream
/// resumes at the next frame boundary; clears everything when sync is lost.
fn skip_frames(workspace: &mut Vec<u8>, len_bytes: usize) {
    workspace.truncate(len_bytes);
    let mut i = 0usize;
    while len_bytes - i > 0 {
        if workspace[i] != 0xff {
            workspace.clear();
            return;
        }
        if len_bytes - i < AdtsHeader::SIZE {
            break;
        }
        if workspace[i + 1] & 0xf0 != 0xf0 {
            workspace.clear();
            return;
        }
        let mut cur = BitCursor::new(&workspace[i..]);
        cur.set_pos(30);
        let frame_length = cur.read_bits(13) as usize;
        if frame_length < AdtsHeader::SIZE {
            workspace.clear();
            return;
        }
        if len_bytes - i < frame_length {
            break;
        }
        i += frame_length;
    }

    workspace.drain(..i);
    if !workspace.is_empty() {
        debug_assert_eq!(workspace[0], 0xff);
        // This 0 means synchronized 0xff.
        workspace[0] = 0;
    }
}

fn copy_bits(sink: &mut BitSink, cur: &mut BitCursor, mut count: usize) {
    while count >= 32 {
        sink.put_bits(cur.read_bits(32), 32);
        count -= 32;
    }
    if count > 0 {
        sink.put_bits(cur.read_bits(count as u32), count as u32);
    }
}

/// Re-emits the SCE at bit range `begin..end`, either verbatim or wrapped in
/// a CPE that carries the individual_channel_stream twice, then terminates
/// the block with ID_END and byte alignment.
fn emit_channel_element(sink: &mut BitSink, aac: &[u8], begin: usize, end: usize, to_stereo: bool) {
    let mut cur = BitCursor::new(aac);
    if to_stereo {
        cur.set_pos(begin + 3);
        let element_instance_tag = cur.read_bits(4);
        sink.put_bits(ID_CPE, 3);
        sink.put_bits(element_instance_tag, 4);
        sink.put_bit(false); // common_window = 0
        let stream_start = cur.pos();
        // Left individual_channel_stream
        copy_bits(sink, &mut cur, end - stream_start);
        // Right individual_channel_stream, duplicated from the same bits
        cur.set_pos(stream_start);
        copy_bits(sink, &mut cur, end - stream_start);
    } else {
        cur.set_pos(begin);
        copy_bits(sink, &mut cur, end - begin);
    }
    sink.put_bits(ID_END, 3);
    sink.align();
}

/// Appends one output ADTS frame: the source header with protection_absent
/// forced and the channel configuration replaced, the rewritten elements,
/// and the back-patched aac_frame_length.
fn emit_frame(
    sink: &mut BitSink,
    aac: &[u8],
    elements: impl Iterator<Item = (usize, usize)>,
    to_stereo: bool,
) {
    let head = sink.byte_len();
    sink.put_bytes(&aac[..AdtsHeader::SIZE]);
    {
        let bytes = sink.bytes_mut();
        bytes[head + 1] |= 0x01; // protection_absent = 1
        bytes[head + 3] = (bytes[head + 3] & 0x3f) | if to_stereo { 0x80 } else { 0x40 };
    }
    for (begin, end) in elements {
        emit_channel_element(sink, aac, begin, end, to_stereo);
    }
    // aac_frame_length, bits [30..42]
    let frame_length = sink.byte_len() - head;
    let bytes = sink.bytes_mut();
    bytes[head + 3] = (bytes[head + 3] & 0xfc) | (frame_length >> 11) as u8;
    bytes[head + 4] = (frame_length >> 3) as u8;
    bytes[head + 5] = ((frame_length << 5) as u8) | (bytes[head + 5] & 0x1f);
}

struct FrameHead {
    header: AdtsHeader,
    is_32khz: bool,
}

enum HeadCheck {
    Frame(FrameHead),
    NeedMoreData,
    Fail(TransmuxError),
}

/// Validates the frame head at the workspace start. `expected_channels` is
/// the only channel_configuration the caller can rewrite.
fn check_frame_head(workspace: &mut Vec<u8>, len: usize, expected_channels: u8) -> HeadCheck {
    if workspace[0] != 0xff {
        workspace.clear();
        return HeadCheck::Fail(TransmuxError::Desync);
    }
    if len < AdtsHeader::SIZE {
        return HeadCheck::NeedMoreData;
    }
    if workspace[1] & 0xf0 != 0xf0 {
        workspace.clear();
        return HeadCheck::Fail(TransmuxError::Desync);
    }
    let header = AdtsHeader::parse(workspace).expect("sync verified");
    // Frequencies other than 48/44.1/32 kHz are not supported.
    let is_32khz = match header.sampling_frequency_index {
        SampleFrequencyIndex::Freq48000 | SampleFrequencyIndex::Freq44100 => false,
        SampleFrequencyIndex::Freq32000 => true,
        other => {
            skip_frames(workspace, len);
            return HeadCheck::Fail(TransmuxError::UnsupportedSamplingFrequency(other as u8));
        }
    };
    if header.channel_configuration != expected_channels {
        skip_frames(workspace, len);
        return HeadCheck::Fail(TransmuxError::UnsupportedChannelConfiguration(
            header.channel_configuration,
        ));
    }
    if header.frame_length < AdtsHeader::SIZE {
        workspace.clear();
        return HeadCheck::Fail(TransmuxError::Desync);
    }
    if len < header.frame_length {
        return HeadCheck::NeedMoreData;
    }
    HeadCheck::Frame(FrameHead { header, is_32khz })
}

fn body_cursor(header: &AdtsHeader) -> usize {
    if header.protection_absent {
        AdtsHeader::BODY_POS
    } else {
        // adts(_header)_error_check
        AdtsHeader::BODY_POS + (header.blocks_in_frame as usize + 1) * 16
    }
}

/// Splits dual-mono frames (`channel_configuration == 0`, exactly two SCEs
/// per block) into two single-channel ADTS streams, optionally uplifting
/// either output to stereo. Output frames accumulate in the dest buffers;
/// unfinished input stays in the workspace for the next call.
pub fn transmux_dual_mono(
    dest_left: &mut Vec<u8>,
    dest_right: &mut Vec<u8>,
    workspace: &mut Vec<u8>,
    left_to_stereo: bool,
    right_to_stereo: bool,
    payload: &[u8],
) -> Result<(), TransmuxError> {
    dest_left.clear();
    dest_right.clear();
    if !sync_payload(workspace, payload) {
        // No ADTS frames, done.
        return Ok(());
    }
    let mut len = workspace.len();
    workspace.resize(len + EXTRA_WORKSPACE_BYTES, 0);
    let mut left = BitSink::new();
    let mut right = BitSink::new();

    let result = loop {
        if len == 0 {
            break Ok(());
        }
        let head = match check_frame_head(workspace, len, 0) {
            HeadCheck::Frame(head) => head,
            HeadCheck::NeedMoreData => break Ok(()),
            HeadCheck::Fail(e) => break Err(e),
        };

        let mut elements = [[(0usize, 0usize); 2]; 4];
        let mut cur = BitCursor::new(workspace);
        cur.set_pos(body_cursor(&head.header));
        match locate_blocks(&mut cur, &head, &mut elements) {
            Ok(()) => {}
            Err(e) => {
                skip_frames(workspace, len);
                break Err(e);
            }
        }

        let blocks = head.header.blocks_in_frame as usize + 1;
        emit_frame(
            &mut left,
            workspace,
            elements[..blocks].iter().map(|pair| pair[0]),
            left_to_stereo,
        );
        emit_frame(
            &mut right,
            workspace,
            elements[..blocks].iter().map(|pair| pair[1]),
            right_to_stereo,
        );

        // Erase current frame.
        workspace.drain(..head.header.frame_length);
        len -= head.header.frame_length;
    };
    if result.is_ok() {
        skip_frames(workspace, len);
    }
    *dest_left = left.into_bytes();
    *dest_right = right.into_bytes();
    result
}

/// Uplifts mono frames (`channel_configuration == 1`, one SCE per block) to
/// stereo frames whose CPE carries the channel twice.
pub fn transmux_mono_to_stereo(
    dest: &mut Vec<u8>,
    workspace: &mut Vec<u8>,
    payload: &[u8],
) -> Result<(), TransmuxError> {
    dest.clear();
    if !sync_payload(workspace, payload) {
        // No ADTS frames, done.
        return Ok(());
    }
    let mut len = workspace.len();
    workspace.resize(len + EXTRA_WORKSPACE_BYTES, 0);
    let mut sink = BitSink::new();

    let result = loop {
        if len == 0 {
            break Ok(());
        }
        let head = match check_frame_head(workspace, len, 1) {
            HeadCheck::Frame(head) => head,
            HeadCheck::NeedMoreData => break Ok(()),
            HeadCheck::Fail(e) => break Err(e),
        };

        let mut elements = [[(0usize, 0usize); 1]; 4];
        let mut cur = BitCursor::new(workspace);
        cur.set_pos(body_cursor(&head.header));
        match locate_blocks(&mut cur, &head, &mut elements) {
            Ok(()) => {}
            Err(e) => {
                skip_frames(workspace, len);
                break Err(e);
            }
        }

        let blocks = head.header.blocks_in_frame as usize + 1;
        emit_frame(
            &mut sink,
            workspace,
            elements[..blocks].iter().map(|one| one[0]),
            true,
        );

        workspace.drain(..head.header.frame_length);
        len -= head.header.frame_length;
    };
    if result.is_ok() {
        skip_frames(workspace, len);
    }
    *dest = sink.into_bytes();
    result
}

/// Locates the `N` SCEs of each raw data block; every block must contain
/// exactly `N` and end with ID_END on a byte boundary.
fn locate_blocks<const N: usize>(
    cur: &mut BitCursor,
    head: &FrameHead,
    elements: &mut [[(usize, usize); N]; 4],
) -> Result<(), TransmuxError> {
    let header = &head.header;
    for block in elements.iter_mut().take(header.blocks_in_frame as usize + 1) {
        let mut sce_count = 0usize;
        loop {
            let begin = cur.pos();
            let id = element::raw_data_block(cur, header.frame_length, head.is_32khz)
                .ok_or(TransmuxError::MalformedFrame)?;
            if id == ID_END {
                break;
            }
            if id == ID_SCE {
                if sce_count >= N {
                    return Err(TransmuxError::MalformedFrame);
                }
                block[sce_count] = (begin, cur.pos());
                sce_count += 1;
            }
        }
        if sce_count != N {
            return Err(TransmuxError::MalformedFrame);
        }
        cur.byte_align();
        if header.blocks_in_frame != 0 && !header.protection_absent {
            // adts_raw_data_block_error_check
            cur.skip(16);
        }
    }
    if cur.is_overrun(header.frame_length) {
        return Err(TransmuxError::MalformedFrame);
    }
    Ok(())
}
