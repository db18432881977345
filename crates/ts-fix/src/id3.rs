//! ARIB caption PES to ID3 timed metadata conversion.
//!
//! Caption and superimpose streams are stripped from the first program's
//! PMT, which instead advertises an ID3 metadata stream on the lowest
//! removed PID. Each accumulated caption PES is re-emitted there as an
//! ID3v2.4 `PRIV` frame owned by `arib-b24.js`, the shape web players
//! expect for timed metadata.

use std::collections::HashSet;

use ts::packet;
use ts::pes::{self, PesAccumulator};
use ts::psi::PsiSection;
use ts::{Pat, crc::crc32};

use crate::mux;

const PES_PRIVATE_DATA: u8 = 0x06;
const PRIVATE_STREAM_1: u8 = 0xbd;
const PRIVATE_STREAM_2: u8 = 0xbf;

const PTS_MASK: i64 = 0x1_ffff_ffff;
const PTS_WRAP: i64 = 0x2_0000_0000;
const ACCEPTABLE_PTS_DIFF: i64 = 90000 * 10;

/// Converts ARIB caption PES into an ID3 timed-metadata stream.
#[derive(Debug, Default)]
pub struct Id3Converter {
    enabled: bool,
    treat_unknown_private_data_as_superimpose: bool,
    insert_inappropriate_5bytes_into_pes_payload: bool,
    force_monotonous_pts: bool,
    last_id3_pts: i64,
    packets: Vec<u8>,
    pat: Pat,
    first_pmt_pid: u16,
    first_pmt_psi: PsiSection,
    remove_pids: HashSet<u16>,
    caption_pid: u16,
    superimpose_pid: u16,
    caption_unit: PesAccumulator,
    superimpose_unit: PesAccumulator,
    pcr_pid: u16,
    pcr: i64,
    id3_pid: u16,
    id3_counter: u8,
    pmt_counter: u8,
    buf: Vec<u8>,
}

impl Id3Converter {
    pub fn new() -> Self {
        Self {
            last_id3_pts: -1,
            pcr: -1,
            ..Self::default()
        }
    }

    /// Bit 0 enables conversion, bit 1 treats untagged private data as
    /// superimpose, bit 2 inserts five zero bytes into the PES payload (a
    /// player workaround, off by default), bit 3 clamps the emitted PTS
    /// forward.
    pub fn set_flags(&mut self, flags: u32) {
        self.enabled = flags & 1 != 0;
        self.treat_unknown_private_data_as_superimpose = flags & 2 != 0;
        self.insert_inappropriate_5bytes_into_pes_payload = flags & 4 != 0;
        self.force_monotonous_pts = flags & 8 != 0;
    }

    /// Output packets produced so far (188-byte aligned).
    pub fn packets(&self) -> &[u8] {
        &self.packets
    }

    pub fn clear_packets(&mut self) {
        self.packets.clear();
    }

    pub fn add_packet(&mut self, packet: &[u8; 188]) {
        if !self.enabled {
            self.packets.extend_from_slice(packet);
            return;
        }

        let unit_start = packet::unit_start(packet);
        let pid = packet::pid(packet);
        let counter = packet::continuity_counter(packet);
        let payload = packet::payload(packet);

        if pid == 0 {
            self.pat.feed(payload, unit_start, counter);
            let first_pmt = self.pat.first_program().map(|r| r.pmt_pid);
            if self.first_pmt_pid != 0 && first_pmt != Some(self.first_pmt_pid) {
                self.first_pmt_pid = 0;
                self.first_pmt_psi.reset();
            }
            if let Some(pmt_pid) = first_pmt {
                self.first_pmt_pid = pmt_pid;
            }
            self.packets.extend_from_slice(packet);
        } else if pid == self.first_pmt_pid {
            loop {
                let done = self.first_pmt_psi.feed(payload, unit_start, counter);
                if self.first_pmt_psi.is_valid() && self.first_pmt_psi.table_id() == 2 {
                    self.add_pmt(pid);
                }
                if done {
                    break;
                }
            }
        } else if pid == self.pcr_pid {
            if let Some(pcr) = packet::pcr(packet) {
                self.pcr = pcr as i64;
            }
            self.packets.extend_from_slice(packet);
        } else if self.remove_pids.contains(&pid) {
            if pid == self.caption_pid || pid == self.superimpose_pid {
                let unit = if pid == self.caption_pid {
                    &mut self.caption_unit
                } else {
                    &mut self.superimpose_unit
                };
                if unit.push(packet, unit_start) {
                    let (pes, _) = unit.concat_payload();
                    unit.clear();
                    self.convert_private_data_pes(&pes);
                }
            }
        } else {
            self.packets.extend_from_slice(packet);
        }
    }

    /// Re-emits the PMT without the caption streams, advertising the ID3
    /// metadata stream instead.
    fn add_pmt(&mut self, pid: u16) {
        if self.first_pmt_psi.section_length() < 9 {
            return;
        }
        let table = self.first_pmt_psi.data().to_vec();
        let section_length = self.first_pmt_psi.section_length();
        let service_id = (table[3] as u16) << 8 | table[4] as u16;
        self.pcr_pid = (table[8] as u16 & 0x1f) << 8 | table[9] as u16;
        if self.pcr_pid == ts::PID_NULL {
            self.pcr = -1;
        }
        let mut program_info_length = (table[10] as usize & 0x03) << 8 | table[11] as usize;
        let mut pos = 3 + 9 + program_info_length;
        if section_length < pos {
            return;
        }

        let mut buf = std::mem::take(&mut self.buf);
        buf.clear();
        buf.push(0);
        buf.extend_from_slice(&table[..pos]);

        let mut caption_pids = [0u16; 2];
        let mut superimpose_pids = [0u16; 2];
        let mut min_remove_pid = 0x2000u16;
        self.remove_pids.clear();
        let table_len = 3 + section_length - 4;
        while pos + 4 < table_len {
            let stream_type = table[pos];
            let es_pid = (table[pos + 1] as u16 & 0x1f) << 8 | table[pos + 2] as u16;
            let es_info_length = (table[pos + 3] as usize & 0x03) << 8 | table[pos + 4] as usize;
            if pos + 5 + es_info_length <= table_len {
                let component_tag = component_tag(&table[pos + 5..pos + 5 + es_info_length]);
                // ARIB caption/superimpose
                if stream_type == PES_PRIVATE_DATA
                    && (component_tag == 0x30
                        || component_tag == 0x87
                        || component_tag == 0x38
                        || component_tag == 0x88
                        || (component_tag == 0xff
                            && self.treat_unknown_private_data_as_superimpose))
                {
                    if component_tag == 0x30 || component_tag == 0x87 {
                        caption_pids[(component_tag != 0x30) as usize] = es_pid;
                    } else {
                        superimpose_pids[(component_tag != 0x38) as usize] = es_pid;
                    }
                    // Remove from PMT
                    self.remove_pids.insert(es_pid);
                    min_remove_pid = min_remove_pid.min(es_pid);
                } else {
                    // Remain
                    buf.extend_from_slice(&table[pos..pos + 5 + es_info_length]);
                    if self.id3_pid == es_pid {
                        // Reassign PID, rare case.
                        self.id3_pid = 0;
                    }
                }
            }
            pos += 5 + es_info_length;
        }

        // Prioritize "A-Profile"
        let caption_pid = if caption_pids[0] != 0 {
            caption_pids[0]
        } else {
            caption_pids[1]
        };
        if self.caption_pid != caption_pid {
            self.caption_pid = caption_pid;
            self.caption_unit.clear();
        }
        let superimpose_pid = if superimpose_pids[0] != 0 {
            superimpose_pids[0]
        } else {
            superimpose_pids[1]
        };
        if self.superimpose_pid != superimpose_pid {
            self.superimpose_pid = superimpose_pid;
            self.superimpose_unit.clear();
        }

        if self.id3_pid == 0 && min_remove_pid < 0x2000 {
            self.id3_pid = min_remove_pid;
        }
        if self.id3_pid != 0 {
            // Add ID3 Timed Metadata
            let metadata_pointer_desc = [
                0x26, 15, 0xff, 0xff, b'I', b'D', b'3', b' ', 0xff, b'I', b'D', b'3', b' ', 0x00,
                0x1f, (service_id >> 8) as u8, service_id as u8,
            ];
            let metadata_desc = [
                0x26, 13, 0xff, 0xff, b'I', b'D', b'3', b' ', 0xff, b'I', b'D', b'3', b' ', 0xff,
                0x0f,
            ];
            // Add to 1st descriptor loop
            program_info_length += metadata_pointer_desc.len();
            if program_info_length <= 1023 {
                buf[11] = 0xf0 | (program_info_length >> 8) as u8;
                buf[12] = program_info_length as u8;
                let tail = buf.split_off(13);
                buf.extend_from_slice(&metadata_pointer_desc);
                buf.extend_from_slice(&tail);
            }
            // Add to 2nd descriptor loop
            buf.push(0x15);
            buf.push(0xe0 | (self.id3_pid >> 8) as u8);
            buf.push(self.id3_pid as u8);
            buf.push(0xf0);
            buf.push(metadata_desc.len() as u8);
            buf.extend_from_slice(&metadata_desc);
        }
        buf[2] = (buf[2] & 0xf0) | ((buf.len() + 4 - 4) >> 8) as u8;
        buf[3] = (buf.len() + 4 - 4) as u8;
        let crc = crc32(&buf[1..]);
        buf.extend_from_slice(&crc.to_be_bytes());

        mux::push_section_packets(&mut self.packets, pid, &mut self.pmt_counter, &buf);
        self.buf = buf;
    }

    /// Wraps one ARIB caption PES payload as an ID3 `PRIV` frame PES on the
    /// metadata PID.
    fn convert_private_data_pes(&mut self, pes: &[u8]) {
        let Ok(header) = pes::parse_header(pes) else {
            return;
        };
        let end = (6 + header.packet_length).min(pes.len());
        let (payload_pos, pts) = match header.stream_id {
            PRIVATE_STREAM_1 => (header.payload_offset, header.pts),
            PRIVATE_STREAM_2 if self.pcr >= 0 => (6, Some(self.pcr as u64)),
            _ => return,
        };
        let Some(mut pts) = pts else { return };
        if payload_pos + 1 >= end {
            return;
        }
        let data_identifier = pes[payload_pos];
        let private_stream_id = pes[payload_pos + 1];
        if (data_identifier != 0x80 && data_identifier != 0x81) || private_stream_id != 0xff {
            // Not an ARIB Synchronized/Asynchronous PES data
            return;
        }
        if self.force_monotonous_pts {
            if self.last_id3_pts >= 0
                && (PTS_WRAP + self.last_id3_pts - pts as i64) & PTS_MASK < ACCEPTABLE_PTS_DIFF
            {
                // Prevent PTS goes back
                pts = self.last_id3_pts as u64;
            }
            self.last_id3_pts = pts as i64;
        }

        // ID3 Timed Metadata
        let mut buf = std::mem::take(&mut self.buf);
        buf.clear();
        buf.extend_from_slice(&[0x00, 0x00, 0x01, PRIVATE_STREAM_1, 0x00, 0x00]);
        buf.extend_from_slice(&[0x80, 0x80, 5]);
        buf.extend_from_slice(&pes::encode_pts(pts));
        if self.insert_inappropriate_5bytes_into_pes_payload {
            buf.extend_from_slice(&[0; 5]);
        }
        buf.extend_from_slice(b"ID3\x04\x00\x00");
        buf.extend_from_slice(&[0; 4]); // ID3 frame length
        let priv_frame_pos = buf.len();
        buf.extend_from_slice(b"PRIV");
        buf.extend_from_slice(&[0; 4]); // PRIV frame length
        buf.extend_from_slice(&[0x00, 0x00]);
        let priv_payload_pos = buf.len();
        buf.extend_from_slice(b"arib-b24.js\x00");
        buf.extend_from_slice(&pes[payload_pos..end]);

        // Set length fields
        let priv_len = buf.len() - priv_payload_pos;
        buf[priv_payload_pos - 6..priv_payload_pos - 2].copy_from_slice(&syncsafe(priv_len));
        let id3_len = buf.len() - priv_frame_pos;
        buf[priv_frame_pos - 4..priv_frame_pos].copy_from_slice(&syncsafe(id3_len));
        let pes_len = buf.len() - 6;
        buf[4] = (pes_len >> 8) as u8;
        buf[5] = pes_len as u8;

        mux::push_pes_packets(&mut self.packets, self.id3_pid, &mut self.id3_counter, &buf, None);
        self.buf = buf;
    }
}

/// Four-by-seven-bit big-endian length encoding (ID3v2).
fn syncsafe(len: usize) -> [u8; 4] {
    [
        (len >> 21) as u8 & 0x7f,
        (len >> 14) as u8 & 0x7f,
        (len >> 7) as u8 & 0x7f,
        len as u8 & 0x7f,
    ]
}

/// The component_tag from a stream_identifier_descriptor (0x52), or 0xff.
fn component_tag(es_info: &[u8]) -> u8 {
    let mut pos = 0usize;
    while pos + 2 < es_info.len() {
        if es_info[pos] == 0x52 {
            return es_info[pos + 2];
        }
        pos += 2 + es_info[pos + 1] as usize;
    }
    0xff
}
