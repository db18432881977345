//! Program selection and PID renumbering.
//!
//! The filter follows one program out of the multiplex and re-emits it on a
//! fixed PID layout so downstream consumers never have to renegotiate:
//! PAT on 0x0000, PMT on 0x01f0, video on 0x0100, audio on 0x0110/0x0111,
//! captions on 0x0130, superimpose on 0x0138 and a PCR-only stream on
//! 0x01ff. PAT and PMT are synthesized; audio can be transmuxed or
//! replaced by silence so the advertised tracks always exist.

use ts::packet;
use ts::pes::{self, PesAccumulator};
use ts::psi::PsiSection;
use ts::{Pat, PmtRef, crc::crc32};

use crate::mux;

const PID_VIDEO: u16 = 0x0100;
const PID_AUDIO1: u16 = 0x0110;
const PID_AUDIO2: u16 = 0x0111;
const PID_CAPTION: u16 = 0x0130;
const PID_SUPERIMPOSE: u16 = 0x0138;
const PID_PMT: u16 = 0x01f0;

const H_262_VIDEO: u8 = 0x02;
const PES_PRIVATE_DATA: u8 = 0x06;
const ADTS_TRANSPORT: u8 = 0x0f;
const AVC_VIDEO: u8 = 0x1b;
const H_265_VIDEO: u8 = 0x24;

const PTS_MASK: i64 = 0x1_ffff_ffff;
const PTS_WRAP: i64 = 0x2_0000_0000;
/// Silent-audio PTS jumps beyond this many ticks force a resync to the
/// target instead of looping toward it.
const ACCEPTABLE_PTS_DIFF: i64 = 90000 * 10;

/// One 1024-sample silent AAC-LC frame, 48 kHz stereo, with ADTS header.
const ADTS_2CH_48KHZ_SILENT: [u8; 13] = [
    0xff, 0xf1, 0x4c, 0x80, 0x01, 0xbf, 0xfc, 0x21, 0x10, 0x04, 0x60, 0x8c, 0x1c,
];

/// Rewrites one selected program onto the fixed PID layout.
#[derive(Debug, Default)]
pub struct ServiceFilter {
    program_number_or_index: i32,
    audio1_mode: u8,
    audio2_mode: u8,
    audio1_mux_to_stereo: bool,
    audio2_mux_to_stereo: bool,
    audio1_mux_dual_mono: bool,
    caption_mode: u8,
    superimpose_mode: u8,

    packets: Vec<u8>,
    pat: Pat,
    pmt_psi: PsiSection,
    video_pid: u16,
    audio1_pid: u16,
    audio2_pid: u16,
    caption_pid: u16,
    superimpose_pid: u16,
    pcr_pid: u16,
    pcr: i64,
    pat_counter: u8,
    pmt_counter: u8,
    audio1_pes_counter: u8,
    audio2_pes_counter: u8,
    audio1_pes_counter_base: i32,
    audio2_pes_counter_base: i32,
    is_audio1_dual_mono: bool,
    audio1_unit: PesAccumulator,
    audio2_unit: PesAccumulator,
    audio1_mux_workspace: Vec<u8>,
    audio2_mux_workspace: Vec<u8>,
    audio1_dual_mono_workspace: Vec<u8>,
    audio1_pts: i64,
    audio2_pts: i64,
    audio1_pts_pcr_diff: i64,
    audio2_pts_pcr_diff: i64,
    buf: Vec<u8>,
    dest_left: Vec<u8>,
    dest_right: Vec<u8>,
    last_pat: Vec<u8>,
    last_pmt: Vec<u8>,
}

impl ServiceFilter {
    pub fn new() -> Self {
        Self {
            pcr: -1,
            audio1_pes_counter_base: -2,
            audio2_pes_counter_base: -2,
            audio1_pts: -1,
            audio2_pts: -1,
            audio2_pts_pcr_diff: -1,
            ..Self::default()
        }
    }

    /// Positive selects by program_number, negative by 1-based position
    /// among the non-NIT entries, zero passes every packet through.
    pub fn set_program_number_or_index(&mut self, n: i32) {
        self.program_number_or_index = n;
    }

    /// Low two bits: 0 passthrough, 1 synthesize silence when absent.
    /// Bit 2 uplifts mono to stereo, bit 3 splits dual mono.
    pub fn set_audio1_mode(&mut self, mode: u32) {
        self.audio1_mode = (mode & 3) as u8;
        self.audio1_mux_to_stereo = mode & 4 != 0;
        self.audio1_mux_dual_mono = mode & 8 != 0;
    }

    /// Low two bits: 0 passthrough, 1 synthesize silence when absent,
    /// 2 drop, 3 mirror audio1. Bit 2 uplifts mono to stereo.
    pub fn set_audio2_mode(&mut self, mode: u32) {
        self.audio2_mode = (mode & 3) as u8;
        self.audio2_mux_to_stereo = mode & 4 != 0;
    }

    /// 0 passthrough, 1 synthesize an empty PMT entry, 2 drop.
    pub fn set_caption_mode(&mut self, mode: u32) {
        self.caption_mode = mode as u8;
    }

    /// 0 passthrough, 1 synthesize an empty PMT entry, 2 drop.
    pub fn set_superimpose_mode(&mut self, mode: u32) {
        self.superimpose_mode = mode as u8;
    }

    /// Output packets produced so far (188-byte aligned).
    pub fn packets(&self) -> &[u8] {
        &self.packets
    }

    pub fn clear_packets(&mut self) {
        self.packets.clear();
    }

    pub fn add_packet(&mut self, packet: &[u8; 188]) {
        if self.program_number_or_index == 0 {
            self.packets.extend_from_slice(packet);
            return;
        }

        let unit_start = packet::unit_start(packet);
        let pid = packet::pid(packet);
        let counter = packet::continuity_counter(packet);

        if pid == 0 {
            self.pat
                .feed(packet::payload(packet), unit_start, counter);
            match self.find_target_pmt() {
                Some(target) => {
                    if unit_start {
                        let transport_stream_id = self.pat.transport_stream_id;
                        let program_number = target.program_number;
                        let add_nit = self.pat.nit().is_some();
                        self.add_pat(transport_stream_id, program_number, add_nit);
                    }
                }
                None => {
                    self.video_pid = 0;
                    self.audio1_pid = 0;
                    self.audio2_pid = 0;
                    self.caption_pid = 0;
                    self.superimpose_pid = 0;
                    self.pcr_pid = 0;
                    self.pcr = -1;
                    self.reset_audio_state();
                }
            }
            return;
        }

        let Some(target) = self.find_target_pmt() else {
            return;
        };
        let target = *target;

        if pid == target.pmt_pid {
            loop {
                let done =
                    self.pmt_psi
                        .feed(packet::payload(packet), unit_start, counter);
                if self.pmt_psi.is_valid()
                    && self.pmt_psi.table_id() == 2
                    && self.pmt_psi.current_next()
                {
                    self.add_pmt();
                }
                if done {
                    break;
                }
            }
        }
        if pid == self.pcr_pid {
            if let Some(pcr_base) = packet::pcr(packet) {
                if pid != self.video_pid
                    && pid != self.audio1_pid
                    && pid != self.audio2_pid
                    && pid != self.caption_pid
                    && pid != self.superimpose_pid
                {
                    let pcr_field: [u8; 6] =
                        packet::pcr_field(packet).unwrap().try_into().unwrap();
                    self.add_pcr_adaptation(&pcr_field);
                }
                self.pcr = pcr_base as i64;
                if self.audio1_mode == 1 && self.audio1_pid == 0 {
                    self.audio1_pes_counter_base = -1;
                    let target_pts = (self.pcr + self.audio1_pts_pcr_diff) & PTS_MASK;
                    Self::add_audio_pes_packets(
                        &mut self.packets,
                        0,
                        target_pts,
                        &mut self.audio1_pts,
                        &mut self.audio1_pes_counter,
                    );
                }
                if self.audio2_mode == 1 && self.audio2_pid == 0 {
                    if self.audio2_pts_pcr_diff < 0 {
                        self.audio2_pts_pcr_diff = self.audio1_pts_pcr_diff;
                    }
                    self.audio2_pes_counter_base = -1;
                    let target_pts = (self.pcr + self.audio2_pts_pcr_diff) & PTS_MASK;
                    Self::add_audio_pes_packets(
                        &mut self.packets,
                        1,
                        target_pts,
                        &mut self.audio2_pts,
                        &mut self.audio2_pes_counter,
                    );
                }
            }
        }
        if pid == self.video_pid {
            self.change_pid_and_add_packet(packet, PID_VIDEO, None);
        } else if pid == self.audio1_pid {
            self.handle_audio1(packet, unit_start, counter);
        } else if pid == self.audio2_pid {
            self.handle_audio2(packet, unit_start, counter);
        } else if pid == self.caption_pid {
            self.change_pid_and_add_packet(packet, PID_CAPTION, None);
        } else if pid == self.superimpose_pid {
            self.change_pid_and_add_packet(packet, PID_SUPERIMPOSE, None);
        } else if pid < 0x0030 {
            self.packets.extend_from_slice(packet);
        } else if let Some(nit) = self.pat.nit() {
            if pid == nit.pmt_pid {
                // NIT pid should be 0x0010. This case is unusual.
                self.change_pid_and_add_packet(packet, ts::PID_NIT, None);
            }
        }
    }

    fn find_target_pmt(&self) -> Option<&PmtRef> {
        if self.program_number_or_index < 0 {
            let index = (-self.program_number_or_index) as usize;
            return self
                .pat
                .pmt
                .iter()
                .filter(|r| r.program_number != 0)
                .nth(index - 1);
        }
        self.pat
            .pmt
            .iter()
            .find(|r| r.program_number as i32 == self.program_number_or_index)
    }

    fn reset_audio_state(&mut self) {
        self.audio1_unit.clear();
        self.audio2_unit.clear();
        self.audio1_mux_workspace.clear();
        self.audio2_mux_workspace.clear();
        self.audio1_dual_mono_workspace.clear();
        self.is_audio1_dual_mono = false;
    }

    fn add_pat(&mut self, transport_stream_id: u16, program_number: u16, add_nit: bool) {
        let mut buf = std::mem::take(&mut self.buf);
        buf.clear();
        buf.resize(9, 0);
        buf[1] = 0x00;
        buf[2] = 0xb0;
        buf[3] = if add_nit { 17 } else { 13 };
        buf[4] = (transport_stream_id >> 8) as u8;
        buf[5] = transport_stream_id as u8;
        buf[6] = if self.last_pat.len() > 6 {
            self.last_pat[6]
        } else {
            0xc1
        };
        if add_nit {
            buf.extend_from_slice(&[0x00, 0x00, 0xe0, 0x10]);
        }
        buf.push((program_number >> 8) as u8);
        buf.push(program_number as u8);
        // PMT_PID=0x01f0
        buf.push(0xe1);
        buf.push(0xf0);
        Self::seal_section(&mut buf, &mut self.last_pat);

        mux::push_section_packets(&mut self.packets, ts::PID_PAT, &mut self.pat_counter, &buf);
        self.buf = buf;
    }

    /// Appends the CRC: reused from the previous emission when the body is
    /// byte-identical, recomputed with a bumped version_number otherwise.
    fn seal_section(buf: &mut Vec<u8>, last: &mut Vec<u8>) {
        if last.len() == buf.len() + 4 && last[..buf.len()] == buf[..] {
            // Copy CRC
            buf.extend_from_slice(&last[last.len() - 4..]);
        } else {
            // Increment version number
            buf[6] = 0xc1 | ((((buf[6] >> 1) + 1) & 0x1f) << 1);
            let crc = crc32(&buf[1..]);
            buf.extend_from_slice(&crc.to_be_bytes());
            *last = buf.clone();
        }
    }

    fn add_pmt(&mut self) {
        if self.pmt_psi.section_length() < 9 {
            return;
        }
        let table = self.pmt_psi.data().to_vec();
        let section_length = self.pmt_psi.section_length();
        let program_number = (table[3] as u16) << 8 | table[4] as u16;
        self.pcr_pid = (table[8] as u16 & 0x1f) << 8 | table[9] as u16;
        if self.pcr_pid == ts::PID_NULL {
            self.pcr = -1;
        }
        let program_info_length = (table[10] as usize & 0x03) << 8 | table[11] as usize;
        let mut pos = 3 + 9 + program_info_length;
        if section_length < pos {
            return;
        }

        let mut buf = std::mem::take(&mut self.buf);
        buf.clear();
        buf.resize(13, 0);
        buf[1] = 0x02;
        buf[4] = (program_number >> 8) as u8;
        buf[5] = program_number as u8;
        buf[6] = if self.last_pmt.len() > 6 {
            self.last_pmt[6]
        } else {
            0xc1
        };
        // PCR_PID=0x01ff
        buf[9] = 0xe1;
        buf[10] = 0xff;
        buf[11] = 0xc0 | (program_info_length >> 8) as u8;
        buf[12] = program_info_length as u8;
        // Copy 1st descriptor loop
        buf.extend_from_slice(&table[12..pos]);

        let last_audio1_pid = self.audio1_pid;
        let last_audio2_pid = self.audio2_pid;
        self.video_pid = 0;
        self.audio1_pid = 0;
        self.audio2_pid = 0;
        self.caption_pid = 0;
        self.superimpose_pid = 0;
        let mut video_desc_pos = 0usize;
        let mut audio1_desc_pos = 0usize;
        let mut audio2_desc_pos = 0usize;
        let mut caption_desc_pos = 0usize;
        let mut superimpose_desc_pos = 0usize;
        let mut maybe_c_profile = false;
        let mut audio1_component_tag_unknown = true;

        let table_len = 3 + section_length - 4;
        while pos + 4 < table_len {
            let stream_type = table[pos];
            let es_pid = (table[pos + 1] as u16 & 0x1f) << 8 | table[pos + 2] as u16;
            let es_info_length = (table[pos + 3] as usize & 0x03) << 8 | table[pos + 4] as usize;
            if pos + 5 + es_info_length <= table_len {
                let component_tag = component_tag(&table[pos + 5..pos + 5 + es_info_length]);
                match stream_type {
                    H_262_VIDEO | AVC_VIDEO | H_265_VIDEO => {
                        if (self.video_pid == 0 && component_tag == 0xff)
                            || component_tag == 0x00
                            || component_tag == 0x81
                        {
                            self.video_pid = es_pid;
                            video_desc_pos = pos;
                            maybe_c_profile = component_tag == 0x81;
                        }
                    }
                    ADTS_TRANSPORT => {
                        if (self.audio1_pid == 0 && component_tag == 0xff)
                            || component_tag == 0x10
                            || component_tag == 0x83
                            || component_tag == 0x85
                        {
                            self.audio1_pid = es_pid;
                            audio1_desc_pos = pos;
                            audio1_component_tag_unknown = component_tag == 0xff;
                        } else if component_tag == 0x11 && self.audio2_mode != 2 {
                            self.audio2_pid = es_pid;
                            audio2_desc_pos = pos;
                        }
                    }
                    PES_PRIVATE_DATA => {
                        if component_tag == 0x30 || component_tag == 0x87 {
                            if self.caption_mode != 2 {
                                self.caption_pid = es_pid;
                                caption_desc_pos = pos;
                            }
                        } else if (component_tag == 0x38 || component_tag == 0x88)
                            && self.superimpose_mode != 2
                        {
                            self.superimpose_pid = es_pid;
                            superimpose_desc_pos = pos;
                        }
                    }
                    _ => {}
                }
            }
            pos += 5 + es_info_length;
        }

        if self.audio1_pid != last_audio1_pid {
            self.audio1_pts = -1;
            self.audio1_unit.clear();
            self.audio1_mux_workspace.clear();
            self.audio1_dual_mono_workspace.clear();
            self.is_audio1_dual_mono = false;
        }
        if self.audio2_pid != last_audio2_pid {
            self.audio2_pts = -1;
            self.audio2_unit.clear();
            self.audio2_mux_workspace.clear();
        }

        let audio1_present = self.audio1_pid != 0 || self.audio1_mode == 1;
        let audio2_synthesized = self.audio2_mode == 1
            || (self.audio2_mode == 3 && audio1_present)
            || (self.audio1_mux_dual_mono && self.is_audio1_dual_mono && self.audio1_pid != 0);

        if self.video_pid != 0 {
            buf.push(table[video_desc_pos]);
            // PID=0x0100
            buf.push(0xe1);
            buf.push(0x00);
            let es_info_length =
                (table[video_desc_pos + 3] as usize & 0x03) << 8 | table[video_desc_pos + 4] as usize;
            buf.extend_from_slice(&table[video_desc_pos + 3..video_desc_pos + 5 + es_info_length]);
            if self.pcr_pid == self.video_pid {
                buf[9] = 0xe1;
                buf[10] = 0x00;
            }
        }
        if audio1_present {
            buf.push(ADTS_TRANSPORT);
            // PID=0x0110
            buf.push(0xe1);
            buf.push(0x10);
            if self.audio1_pid != 0 {
                let es_info_length = (table[audio1_desc_pos + 3] as usize & 0x03) << 8
                    | table[audio1_desc_pos + 4] as usize;
                if audio1_component_tag_unknown && (self.audio2_pid != 0 || audio2_synthesized) {
                    let es_info_new_length = es_info_length + 3;
                    buf.push(0xf0 | (es_info_new_length >> 8) as u8);
                    buf.push(es_info_new_length as u8);
                    buf.push(0x52);
                    buf.push(1);
                    buf.push(if maybe_c_profile { 0x83 } else { 0x10 });
                } else {
                    buf.push(0xf0 | (es_info_length >> 8) as u8);
                    buf.push(es_info_length as u8);
                }
                buf.extend_from_slice(
                    &table[audio1_desc_pos + 5..audio1_desc_pos + 5 + es_info_length],
                );
                if self.pcr_pid == self.audio1_pid {
                    buf[9] = 0xe1;
                    buf[10] = 0x10;
                }
            } else {
                buf.extend_from_slice(&[0xf0, 3, 0x52, 1]);
                buf.push(if maybe_c_profile { 0x83 } else { 0x10 });
            }
        }
        if self.audio2_pid != 0 || audio2_synthesized {
            buf.push(ADTS_TRANSPORT);
            // PID=0x0111
            buf.push(0xe1);
            buf.push(0x11);
            if self.audio2_pid != 0 {
                let es_info_length = (table[audio2_desc_pos + 3] as usize & 0x03) << 8
                    | table[audio2_desc_pos + 4] as usize;
                buf.extend_from_slice(
                    &table[audio2_desc_pos + 3..audio2_desc_pos + 5 + es_info_length],
                );
                if self.pcr_pid == self.audio2_pid {
                    buf[9] = 0xe1;
                    buf[10] = 0x11;
                }
            } else {
                buf.extend_from_slice(&[0xf0, 3, 0x52, 1]);
                buf.push(if maybe_c_profile { 0x85 } else { 0x11 });
            }
        }
        if self.caption_pid != 0 || self.caption_mode == 1 {
            buf.push(PES_PRIVATE_DATA);
            // PID=0x0130
            buf.push(0xe1);
            buf.push(0x30);
            if self.caption_pid != 0 {
                let es_info_length = (table[caption_desc_pos + 3] as usize & 0x03) << 8
                    | table[caption_desc_pos + 4] as usize;
                buf.extend_from_slice(
                    &table[caption_desc_pos + 3..caption_desc_pos + 5 + es_info_length],
                );
                if self.pcr_pid == self.caption_pid {
                    buf[9] = 0xe1;
                    buf[10] = 0x30;
                }
            } else {
                buf.push(0xf0);
                buf.push(3 + if maybe_c_profile { 0 } else { 5 });
                buf.extend_from_slice(&[0x52, 1]);
                buf.push(if maybe_c_profile { 0x87 } else { 0x30 });
                if !maybe_c_profile {
                    // data_component_descriptor
                    buf.extend_from_slice(&[0xfd, 3, 0x00, 0x08, 0x3d]);
                }
            }
        }
        if self.superimpose_pid != 0 || self.superimpose_mode == 1 {
            buf.push(PES_PRIVATE_DATA);
            // PID=0x0138
            buf.push(0xe1);
            buf.push(0x38);
            if self.superimpose_pid != 0 {
                let es_info_length = (table[superimpose_desc_pos + 3] as usize & 0x03) << 8
                    | table[superimpose_desc_pos + 4] as usize;
                buf.extend_from_slice(
                    &table[superimpose_desc_pos + 3..superimpose_desc_pos + 5 + es_info_length],
                );
                if self.pcr_pid == self.superimpose_pid {
                    buf[9] = 0xe1;
                    buf[10] = 0x38;
                }
            } else {
                buf.push(0xf0);
                buf.push(3 + if maybe_c_profile { 0 } else { 5 });
                // component_tag=0x38
                buf.extend_from_slice(&[0x52, 1]);
                buf.push(if maybe_c_profile { 0x88 } else { 0x38 });
                if !maybe_c_profile {
                    // data_component_descriptor
                    buf.extend_from_slice(&[0xfd, 3, 0x00, 0x08, 0x3c]);
                }
            }
        }

        buf[2] = 0xb0 | ((buf.len() + 4 - 4) >> 8) as u8;
        buf[3] = (buf.len() + 4 - 4) as u8;
        Self::seal_section(&mut buf, &mut self.last_pmt);

        mux::push_section_packets(&mut self.packets, PID_PMT, &mut self.pmt_counter, &buf);
        self.buf = buf;
    }

    /// Emits a 188-byte adaptation-only packet carrying just the PCR on the
    /// fixed output PID, with the extension zeroed.
    fn add_pcr_adaptation(&mut self, pcr: &[u8; 6]) {
        self.packets.extend_from_slice(&[0x47, 0x01, 0xff, 0x20, 183, 0x10]);
        self.packets.extend_from_slice(&pcr[..4]);
        // pcr_extension=0
        self.packets.push((pcr[4] & 0x80) | 0x7e);
        self.packets.push(0);
        let padded = self.packets.len() / 188 * 188 + 188;
        self.packets.resize(padded, 0xff);
    }

    fn change_pid_and_add_packet(&mut self, packet: &[u8; 188], pid: u16, counter: Option<u8>) {
        self.packets.push(0x47);
        self.packets.push((packet[1] & 0xe0) | (pid >> 8) as u8);
        self.packets.push(pid as u8);
        self.packets.push(match counter {
            Some(counter) => (packet[3] & 0xf0) | counter,
            None => packet[3],
        });
        self.packets.extend_from_slice(&packet[4..188]);
    }

    fn handle_audio1(&mut self, packet: &[u8; 188], unit_start: bool, counter: u8) {
        if self.audio1_mux_dual_mono || self.audio1_mux_to_stereo {
            if self.audio1_unit.push(packet, unit_start) {
                self.flush_audio1_unit();
                self.audio1_unit.clear();
            }
            return;
        }
        let payload = packet::payload(packet);
        if let Some(pts) = pes::audio_pts(unit_start, payload) {
            if self.pcr >= 0 {
                self.audio1_pts_pcr_diff = PTS_WRAP + pts as i64 - self.pcr;
            }
        }
        if self.audio1_pes_counter_base < 0 {
            // Keep counter continuity
            self.audio1_pes_counter_base = if self.audio1_pes_counter_base < -1 {
                0
            } else {
                (0x10 + self.audio1_pes_counter as i32 + 1 - counter as i32) & 0x0f
            };
        }
        self.audio1_pes_counter =
            ((self.audio1_pes_counter_base + counter as i32) & 0x0f) as u8;
        self.change_pid_and_add_packet(packet, PID_AUDIO1, Some(self.audio1_pes_counter));

        if self.audio2_mode == 3 && self.audio2_pid == 0 {
            if self.audio2_pes_counter_base < 0 {
                self.audio2_pes_counter_base = if self.audio2_pes_counter_base < -1 {
                    0
                } else {
                    (0x10 + self.audio2_pes_counter as i32 + 1 - counter as i32) & 0x0f
                };
            }
            self.audio2_pes_counter =
                ((self.audio2_pes_counter_base + counter as i32) & 0x0f) as u8;
            self.change_pid_and_add_packet(packet, PID_AUDIO2, Some(self.audio2_pes_counter));
        }
    }

    fn handle_audio2(&mut self, packet: &[u8; 188], unit_start: bool, counter: u8) {
        if self.audio2_mux_to_stereo {
            if self.audio2_unit.push(packet, unit_start) {
                self.flush_audio2_unit();
                self.audio2_unit.clear();
            }
            return;
        }
        let payload = packet::payload(packet);
        if let Some(pts) = pes::audio_pts(unit_start, payload) {
            if self.pcr >= 0 {
                self.audio2_pts_pcr_diff = PTS_WRAP + pts as i64 - self.pcr;
            }
        }
        if self.audio2_pes_counter_base < 0 {
            // Keep counter continuity
            self.audio2_pes_counter_base = if self.audio2_pes_counter_base < -1 {
                0
            } else {
                (0x10 + self.audio2_pes_counter as i32 + 1 - counter as i32) & 0x0f
            };
        }
        self.audio2_pes_counter =
            ((self.audio2_pes_counter_base + counter as i32) & 0x0f) as u8;
        self.change_pid_and_add_packet(packet, PID_AUDIO2, Some(self.audio2_pes_counter));
    }

    /// Runs the requested transmux over a completed audio1 PES unit and
    /// re-wraps the result. A stream that turns out not to match the
    /// requested channel layout passes through unchanged.
    fn flush_audio1_unit(&mut self) {
        let (pes_buf, pcr_field) = self.audio1_unit.concat_payload();
        let Ok(header) = pes::parse_header(&pes_buf) else {
            return;
        };
        let end = (6 + header.packet_length).min(pes_buf.len());
        if header.payload_offset > end {
            return;
        }
        if let Some(pts) = header.pts {
            if self.pcr >= 0 {
                self.audio1_pts_pcr_diff = PTS_WRAP + pts as i64 - self.pcr;
            }
        }

        let mut left = std::mem::take(&mut self.dest_left);
        let mut right = std::mem::take(&mut self.dest_right);
        let es = &pes_buf[header.payload_offset..end];
        let passthrough;
        if self.audio1_mux_dual_mono {
            let mut workspace = std::mem::take(&mut self.audio1_dual_mono_workspace);
            let result = aac::transmux_dual_mono(
                &mut left,
                &mut right,
                &mut workspace,
                self.audio1_mux_to_stereo,
                self.audio2_mux_to_stereo,
                es,
            );
            self.audio1_dual_mono_workspace = workspace;
            match result {
                Ok(()) => {
                    self.is_audio1_dual_mono = true;
                    passthrough = false;
                }
                Err(aac::TransmuxError::UnsupportedChannelConfiguration(_)) => {
                    self.is_audio1_dual_mono = false;
                    passthrough = left.is_empty() && right.is_empty();
                }
                Err(e) => {
                    tracing::debug!(error = %e, "dual-mono transmux failed");
                    passthrough = false;
                }
            }
        } else {
            let mut workspace = std::mem::take(&mut self.audio1_mux_workspace);
            let result = aac::transmux_mono_to_stereo(&mut left, &mut workspace, es);
            self.audio1_mux_workspace = workspace;
            match result {
                Ok(()) => passthrough = false,
                Err(aac::TransmuxError::UnsupportedChannelConfiguration(_)) => {
                    passthrough = left.is_empty();
                }
                Err(e) => {
                    tracing::debug!(error = %e, "mono-to-stereo transmux failed");
                    passthrough = false;
                }
            }
        }

        let head = &pes_buf[..header.payload_offset];
        if passthrough {
            let pes = rewrap_pes(head, es);
            mux::push_pes_packets(
                &mut self.packets,
                PID_AUDIO1,
                &mut self.audio1_pes_counter,
                &pes,
                pcr_field.as_ref(),
            );
            if self.audio2_mode == 3 && self.audio2_pid == 0 {
                mux::push_pes_packets(
                    &mut self.packets,
                    PID_AUDIO2,
                    &mut self.audio2_pes_counter,
                    &pes,
                    None,
                );
            }
        } else {
            if !left.is_empty() {
                let pes = rewrap_pes(head, &left);
                mux::push_pes_packets(
                    &mut self.packets,
                    PID_AUDIO1,
                    &mut self.audio1_pes_counter,
                    &pes,
                    pcr_field.as_ref(),
                );
                if self.audio2_mode == 3 && self.audio2_pid == 0 && !self.audio1_mux_dual_mono {
                    mux::push_pes_packets(
                        &mut self.packets,
                        PID_AUDIO2,
                        &mut self.audio2_pes_counter,
                        &pes,
                        None,
                    );
                }
            }
            if !right.is_empty() && self.audio2_pid == 0 && self.audio2_mode != 2 {
                let pes = rewrap_pes(head, &right);
                mux::push_pes_packets(
                    &mut self.packets,
                    PID_AUDIO2,
                    &mut self.audio2_pes_counter,
                    &pes,
                    None,
                );
            }
        }
        self.dest_left = left;
        self.dest_right = right;
    }

    fn flush_audio2_unit(&mut self) {
        let (pes_buf, pcr_field) = self.audio2_unit.concat_payload();
        let Ok(header) = pes::parse_header(&pes_buf) else {
            return;
        };
        let end = (6 + header.packet_length).min(pes_buf.len());
        if header.payload_offset > end {
            return;
        }
        if let Some(pts) = header.pts {
            if self.pcr >= 0 {
                self.audio2_pts_pcr_diff = PTS_WRAP + pts as i64 - self.pcr;
            }
        }

        let mut dest = std::mem::take(&mut self.dest_left);
        let mut workspace = std::mem::take(&mut self.audio2_mux_workspace);
        let es = &pes_buf[header.payload_offset..end];
        let result = aac::transmux_mono_to_stereo(&mut dest, &mut workspace, es);
        self.audio2_mux_workspace = workspace;
        let passthrough = match result {
            Ok(()) => false,
            Err(aac::TransmuxError::UnsupportedChannelConfiguration(_)) => dest.is_empty(),
            Err(e) => {
                tracing::debug!(error = %e, "mono-to-stereo transmux failed");
                false
            }
        };

        let head = &pes_buf[..header.payload_offset];
        let body = if passthrough { es } else { &dest[..] };
        if !body.is_empty() {
            let pes = rewrap_pes(head, body);
            mux::push_pes_packets(
                &mut self.packets,
                PID_AUDIO2,
                &mut self.audio2_pes_counter,
                &pes,
                pcr_field.as_ref(),
            );
        }
        self.dest_left = dest;
    }

    /// Synthesizes 64 ms silent-audio PES packets until the clock would run
    /// ahead of `target_pts`. A target far outside the acceptance window
    /// snaps the clock instead of looping toward it.
    fn add_audio_pes_packets(
        packets: &mut Vec<u8>,
        index: u8,
        target_pts: i64,
        pts: &mut i64,
        counter: &mut u8,
    ) {
        let pts_diff = (PTS_WRAP + target_pts - *pts) & PTS_MASK;
        if *pts < 0
            || (ACCEPTABLE_PTS_DIFF < pts_diff && pts_diff < PTS_WRAP - ACCEPTABLE_PTS_DIFF)
        {
            *pts = target_pts;
        }
        loop {
            let next_pts = (*pts + 90000 * 64 / 1000) & PTS_MASK;
            if (PTS_WRAP + target_pts - next_pts) & PTS_MASK > 900000 {
                break;
            }
            Self::add_64msec_audio_pes_packet(packets, index, *pts as u64, counter);
            *pts = next_pts;
        }
    }

    /// One self-contained 188-byte PES packet carrying three silent stereo
    /// ADTS frames (1024 samples each at 48 kHz = 64 ms).
    fn add_64msec_audio_pes_packet(packets: &mut Vec<u8>, index: u8, pts: u64, counter: &mut u8) {
        const PES_BYTES: usize = 6 + 8 + 13 * 3;
        packets.push(0x47);
        // PID=0x0110+index
        packets.push(0x41);
        packets.push(0x10 | index);
        *counter = (*counter + 1) & 0x0f;
        packets.push(0x30 | *counter);
        packets.push((188 - 5 - PES_BYTES) as u8);
        packets.push(0x40);
        // stuffing
        let stuffed = packets.len() + 188 - 6 - PES_BYTES;
        packets.resize(stuffed, 0xff);
        // PES
        packets.extend_from_slice(&[0x00, 0x00, 0x01, 0xc0 | index, 0x00, (8 + 13 * 3) as u8]);
        // alignment by audio sync word
        packets.push(0x84);
        // has PTS
        packets.push(0x80);
        packets.push(5);
        packets.extend_from_slice(&pes::encode_pts(pts));
        // 1024samples(1frame) / 48000hz * 3 = 0.064sec
        for _ in 0..3 {
            packets.extend_from_slice(&ADTS_2CH_48KHZ_SILENT);
        }
    }
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

/// A new PES unit from a source header and a replacement payload, with
/// PES_packet_length recomputed.
fn rewrap_pes(head: &[u8], body: &[u8]) -> Vec<u8> {
    let mut pes = Vec::with_capacity(head.len() + body.len());
    pes.extend_from_slice(head);
    pes.extend_from_slice(body);
    let packet_length = pes.len() - 6;
    pes[4] = (packet_length >> 8) as u8;
    pes[5] = packet_length as u8;
    pes
}
