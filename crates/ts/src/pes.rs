//! PES unit accumulation.
//!
//! The accumulator keeps whole 188-byte packets, not just payloads, so a
//! finished unit can still be inspected for in-band PCR and so passthrough
//! repacketization keeps the original headers available.

use crate::packet;

/// Reassembly cap; a unit larger than this means a malformed broadcast and
/// the accumulator waits for the next unit start.
pub const PES_MAX: usize = 0x20000;

const START_CODE: [u8; 3] = [0x00, 0x00, 0x01];

/// Collects consecutive packets of one PID into a complete PES unit.
#[derive(Debug, Clone, Default)]
pub struct PesAccumulator {
    packets: Vec<u8>,
}

impl PesAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.packets.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// The accumulated whole packets.
    pub fn packets(&self) -> &[u8] {
        &self.packets
    }

    /// Adds one packet. Returns `true` when the buffered payload now holds a
    /// complete PES unit; the caller consumes it and then calls [`clear`].
    ///
    /// Any discontinuity (counter gap, missing start code, overflow) drops
    /// the buffer and accumulation restarts at the next unit start.
    ///
    /// [`clear`]: PesAccumulator::clear
    pub fn push(&mut self, packet: &[u8], unit_start: bool) -> bool {
        if unit_start {
            self.packets.clear();
            self.packets.extend_from_slice(&packet[..packet::PACKET_SIZE]);
        } else if !self.packets.is_empty() && self.packets.len() < PES_MAX {
            let last = &self.packets[self.packets.len() - packet::PACKET_SIZE..];
            let expected = (packet::continuity_counter(last) + 1) & 0x0f;
            if packet::continuity_counter(packet) != expected {
                self.packets.clear();
                return false;
            }
            self.packets.extend_from_slice(&packet[..packet::PACKET_SIZE]);
        } else {
            return false;
        }

        // Walk the payload without concatenating it: the completion check
        // needs only the total size and the first six payload bytes.
        let mut head = [0u8; 6];
        let mut head_len = 0usize;
        let mut payload_len = 0usize;
        for chunk in self.packets.chunks_exact(packet::PACKET_SIZE) {
            let payload = packet::payload(chunk);
            for &b in payload.iter().take(head.len() - head_len) {
                head[head_len] = b;
                head_len += 1;
            }
            payload_len += payload.len();
        }
        if head_len >= START_CODE.len() && head[..3] != START_CODE {
            self.packets.clear();
            return false;
        }
        if head_len >= 6 {
            let pes_packet_length = (head[4] as usize) << 8 | head[5] as usize;
            return 6 + pes_packet_length <= payload_len;
        }
        false
    }

    /// Concatenates the payloads of the accumulated packets and returns the
    /// last PCR field seen in their adaptation fields, if any.
    pub fn concat_payload(&self) -> (Vec<u8>, Option<[u8; 6]>) {
        let mut payload = Vec::new();
        let mut pcr = None;
        for chunk in self.packets.chunks_exact(packet::PACKET_SIZE) {
            if let Some(field) = packet::pcr_field(chunk) {
                pcr = Some(field.try_into().unwrap());
            }
            payload.extend_from_slice(packet::payload(chunk));
        }
        (payload, pcr)
    }
}

/// The parts of a PES header the rewriters care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PesHeader {
    pub stream_id: u8,
    /// PES_packet_length (0 means unbounded, video only).
    pub packet_length: usize,
    /// Offset of the first payload byte behind the optional header fields.
    pub payload_offset: usize,
    pub pts: Option<u64>,
}

/// Parses the header of a complete PES unit.
pub fn parse_header(pes: &[u8]) -> crate::Result<PesHeader> {
    if pes.len() < 6 {
        return Err(crate::TsError::InsufficientData {
            expected: 6,
            actual: pes.len(),
        });
    }
    if pes[..3] != START_CODE {
        return Err(crate::TsError::InvalidStartCode);
    }
    let stream_id = pes[3];
    let packet_length = (pes[4] as usize) << 8 | pes[5] as usize;
    // padding_stream and private_stream_2 carry no optional header
    if stream_id == 0xbe || stream_id == 0xbf {
        return Ok(PesHeader {
            stream_id,
            packet_length,
            payload_offset: 6,
            pts: None,
        });
    }
    if pes.len() < 9 {
        return Err(crate::TsError::InsufficientData {
            expected: 9,
            actual: pes.len(),
        });
    }
    let pts_dts_flags = pes[7] >> 6;
    let payload_offset = 9 + pes[8] as usize;
    let pts = if pts_dts_flags >= 2 && pes.len() >= 14 {
        Some(decode_pts(&pes[9..14]))
    } else {
        None
    };
    Ok(PesHeader {
        stream_id,
        packet_length,
        payload_offset,
        pts,
    })
}

/// Decodes a 33-bit timestamp from the five PTS bytes of a PES header.
pub fn decode_pts(b: &[u8]) -> u64 {
    (b[4] as u64) >> 1
        | (b[3] as u64) << 7
        | ((b[2] & 0xfe) as u64) << 14
        | (b[1] as u64) << 22
        | ((b[0] & 0x0e) as u64) << 29
}

/// Encodes a 33-bit timestamp into the five-byte PTS field form with the
/// `0010` prefix and marker bits set.
pub fn encode_pts(pts: u64) -> [u8; 5] {
    [
        ((pts >> 29) as u8 & 0x0e) | 0x21,
        (pts >> 22) as u8,
        (pts >> 14) as u8 | 1,
        (pts >> 7) as u8,
        (pts << 1) as u8 | 1,
    ]
}

/// Extracts the PTS of an audio PES (`stream_id` 0b110xxxxx) from the first
/// payload of a unit-start packet.
pub fn audio_pts(unit_start: bool, payload: &[u8]) -> Option<u64> {
    if !unit_start || payload.len() < 6 || payload[..3] != START_CODE {
        return None;
    }
    let stream_id = payload[3];
    let pes_packet_length = (payload[4] as usize) << 8 | payload[5] as usize;
    if stream_id & 0xe0 == 0xc0 && pes_packet_length >= 3 && payload.len() >= 9 {
        let pts_dts_flags = payload[7] >> 6;
        if pts_dts_flags >= 2 && pes_packet_length >= 8 && payload.len() >= 14 {
            return Some(decode_pts(&payload[9..14]));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts_packet(pid: u16, cc: u8, unit_start: bool, payload: &[u8]) -> Vec<u8> {
        assert!(payload.len() <= 184);
        let mut packet = vec![0u8; 188];
        packet[0] = 0x47;
        packet[1] = (if unit_start { 0x40 } else { 0 }) | (pid >> 8) as u8;
        packet[2] = pid as u8;
        if payload.len() == 184 {
            packet[3] = 0x10 | cc;
            packet[4..].copy_from_slice(payload);
        } else {
            // stuff with an adaptation field so the payload fills the tail
            packet[3] = 0x30 | cc;
            let adaptation_length = 183 - payload.len();
            packet[4] = adaptation_length as u8;
            if adaptation_length > 0 {
                packet[5] = 0;
                for b in &mut packet[6..5 + adaptation_length] {
                    *b = 0xff;
                }
            }
            packet[188 - payload.len()..].copy_from_slice(payload);
        }
        packet
    }

    fn pes_header(stream_id: u8, body_len: usize, pts: Option<u64>) -> Vec<u8> {
        let header_data_len = if pts.is_some() { 5 } else { 0 };
        let mut pes = vec![0x00, 0x00, 0x01, stream_id];
        let pes_packet_length = 3 + header_data_len + body_len;
        pes.push((pes_packet_length >> 8) as u8);
        pes.push(pes_packet_length as u8);
        pes.push(0x80);
        pes.push(if pts.is_some() { 0x80 } else { 0x00 });
        pes.push(header_data_len as u8);
        if let Some(pts) = pts {
            pes.extend_from_slice(&encode_pts(pts));
        }
        pes
    }

    #[test]
    fn test_accumulates_across_packets() {
        let mut pes = pes_header(0xbd, 300, Some(90000));
        pes.extend_from_slice(&vec![0xaa; 300]);

        let mut acc = PesAccumulator::new();
        assert!(!acc.push(&ts_packet(0x0130, 0, true, &pes[..184]), true));
        assert!(acc.push(&ts_packet(0x0130, 1, false, &pes[184..]), false));
        let (payload, pcr) = acc.concat_payload();
        assert_eq!(&payload[..pes.len()], &pes[..]);
        assert!(pcr.is_none());
    }

    #[test]
    fn test_counter_gap_drops_unit() {
        let mut pes = pes_header(0xbd, 300, None);
        pes.extend_from_slice(&vec![0xaa; 300]);

        let mut acc = PesAccumulator::new();
        assert!(!acc.push(&ts_packet(0x0130, 0, true, &pes[..184]), true));
        assert!(!acc.push(&ts_packet(0x0130, 3, false, &pes[184..]), false));
        assert!(acc.is_empty());
    }

    #[test]
    fn test_rejects_missing_start_code() {
        let mut acc = PesAccumulator::new();
        assert!(!acc.push(&ts_packet(0x0130, 0, true, &[0xffu8; 184]), true));
        assert!(acc.is_empty());
    }

    #[test]
    fn test_single_packet_unit_completes() {
        let mut pes = pes_header(0xbd, 10, Some(1234));
        pes.extend_from_slice(&[0x80, 0xff, 1, 2, 3, 4, 5, 6, 7, 8]);
        let mut acc = PesAccumulator::new();
        assert!(acc.push(&ts_packet(0x0130, 0, true, &pes), true));
    }

    #[test]
    fn test_pts_roundtrip_across_wrap() {
        for pts in [0u64, 90000, 0x1_0000_0000, 0x1_ffff_ffff] {
            assert_eq!(decode_pts(&encode_pts(pts)), pts & 0x1_ffff_ffff);
        }
    }

    #[test]
    fn test_parse_header() {
        let mut pes = pes_header(0xbd, 20, Some(90000));
        pes.extend_from_slice(&[0u8; 20]);
        let header = parse_header(&pes).unwrap();
        assert_eq!(header.stream_id, 0xbd);
        assert_eq!(header.packet_length, 3 + 5 + 20);
        assert_eq!(header.payload_offset, 14);
        assert_eq!(header.pts, Some(90000));

        // private_stream_2 has no optional header
        let pes = [0x00, 0x00, 0x01, 0xbf, 0x00, 0x03, 0xaa, 0xbb, 0xcc];
        let header = parse_header(&pes).unwrap();
        assert_eq!(header.payload_offset, 6);
        assert_eq!(header.pts, None);

        assert!(parse_header(&[0x00, 0x00, 0x02, 0xbd, 0x00, 0x00]).is_err());
    }

    #[test]
    fn test_audio_pts() {
        let mut pes = pes_header(0xc0, 100, Some(123456789 & 0x1_ffff_ffff));
        pes.extend_from_slice(&[0u8; 100]);
        assert_eq!(audio_pts(true, &pes), Some(123456789));
        assert_eq!(audio_pts(false, &pes), None);
        // private stream is not an audio stream id
        let pes = pes_header(0xbd, 100, Some(42));
        assert_eq!(audio_pts(true, &pes), None);
    }
}
