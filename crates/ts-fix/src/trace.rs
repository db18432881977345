//! Caption trace output.
//!
//! Watches the first program's PMT for A-profile caption and superimpose
//! streams, reassembles their PES, and prints one decoded line per caption
//! with the PTS and the offset from the current program clock.

use std::io::Write;

use arib_b24::{CaptionParser, ParseError};
use ts::packet;
use ts::pes::{self, PesAccumulator};
use ts::psi::PsiSection;
use ts::Pat;

const PRIVATE_STREAM_1: u8 = 0xbd;
const PRIVATE_STREAM_2: u8 = 0xbf;

const PTS_MASK: i64 = 0x1_ffff_ffff;
const PTS_WRAP: i64 = 0x2_0000_0000;

#[derive(Default)]
struct CaptionStream {
    pid: u16,
    unit: PesAccumulator,
    parser: CaptionParser,
}

/// Decodes ARIB captions from the stream into a line-based text sink.
pub struct CaptionTracer {
    sink: Option<Box<dyn Write + Send>>,
    pat: Pat,
    first_pmt_pid: u16,
    first_pmt_psi: PsiSection,
    caption: CaptionStream,
    superimpose: CaptionStream,
    pcr_pid: u16,
    pcr: i64,
    buf: Vec<u8>,
}

impl CaptionTracer {
    /// A tracer writing to `sink`; with `None` every packet is ignored.
    pub fn new(sink: Option<Box<dyn Write + Send>>) -> Self {
        Self {
            sink,
            pat: Pat::new(),
            first_pmt_pid: 0,
            first_pmt_psi: PsiSection::new(),
            caption: CaptionStream::default(),
            superimpose: CaptionStream::default(),
            pcr_pid: 0,
            pcr: -1,
            buf: Vec::new(),
        }
    }

    pub fn add_packet(&mut self, packet: &[u8; 188]) {
        if self.sink.is_none() {
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
        } else if pid == self.first_pmt_pid {
            loop {
                let done = self.first_pmt_psi.feed(payload, unit_start, counter);
                if self.first_pmt_psi.is_valid() && self.first_pmt_psi.table_id() == 2 {
                    self.check_pmt();
                }
                if done {
                    break;
                }
            }
        } else if pid == self.pcr_pid {
            if let Some(pcr) = packet::pcr(packet) {
                let first_pcr = self.pcr < 0;
                self.pcr = pcr as i64;
                if first_pcr {
                    let sink = self.sink.as_mut().unwrap();
                    let _ = writeln!(sink, "pcrpid=0x{:04X};pcr={:010}", self.pcr_pid, self.pcr);
                    let _ = sink.flush();
                }
            }
        } else if pid == self.caption.pid || pid == self.superimpose.pid {
            let stream = if pid == self.caption.pid {
                &mut self.caption
            } else {
                &mut self.superimpose
            };
            if stream.unit.push(packet, unit_start) {
                let (pes, _) = stream.unit.concat_payload();
                stream.unit.clear();
                self.output_private_data_pes(pid, &pes);
            }
        }
    }

    fn check_pmt(&mut self) {
        if self.first_pmt_psi.section_length() < 9 {
            return;
        }
        let table = self.first_pmt_psi.data().to_vec();
        let section_length = self.first_pmt_psi.section_length();
        self.pcr_pid = (table[8] as u16 & 0x1f) << 8 | table[9] as u16;
        if self.pcr_pid == ts::PID_NULL {
            self.pcr = -1;
        }
        let program_info_length = (table[10] as usize & 0x03) << 8 | table[11] as usize;
        let mut pos = 3 + 9 + program_info_length;
        if section_length < pos {
            return;
        }

        let mut caption_pid = 0u16;
        let mut superimpose_pid = 0u16;
        let table_len = 3 + section_length - 4;
        while pos + 4 < table_len {
            let stream_type = table[pos];
            let es_pid = (table[pos + 1] as u16 & 0x1f) << 8 | table[pos + 2] as u16;
            let es_info_length = (table[pos + 3] as usize & 0x03) << 8 | table[pos + 4] as usize;
            if pos + 5 + es_info_length <= table_len {
                let component_tag = component_tag(&table[pos + 5..pos + 5 + es_info_length]);
                // ARIB caption/superimpose ("A-Profile" only)
                if stream_type == 0x06 {
                    if component_tag == 0x30 {
                        caption_pid = es_pid;
                    } else if component_tag == 0x38 {
                        superimpose_pid = es_pid;
                    }
                }
            }
            pos += 5 + es_info_length;
        }

        if self.caption.pid != caption_pid {
            self.caption.pid = caption_pid;
            self.caption.unit.clear();
            self.caption.parser.reset();
        }
        if self.superimpose.pid != superimpose_pid {
            self.superimpose.pid = superimpose_pid;
            self.superimpose.unit.clear();
            self.superimpose.parser.reset();
        }
    }

    fn output_private_data_pes(&mut self, pid: u16, pes: &[u8]) {
        let Ok(header) = pes::parse_header(pes) else {
            return;
        };
        let end = (6 + header.packet_length).min(pes.len());
        let (payload_pos, pts) = match header.stream_id {
            PRIVATE_STREAM_1 => (header.payload_offset, header.pts),
            // asynchronous captions take their timestamp from the clock
            PRIVATE_STREAM_2 if self.pcr >= 0 => (6, Some(self.pcr as u64)),
            _ => return,
        };
        let Some(pts) = pts else { return };
        if payload_pos + 1 >= end {
            return;
        }
        let data_identifier = pes[payload_pos];
        let private_stream_id = pes[payload_pos + 1];
        if (data_identifier != 0x80 && data_identifier != 0x81) || private_stream_id != 0xff {
            // Not an ARIB Synchronized/Asynchronous PES data
            return;
        }

        let parser = if pid == self.caption.pid {
            &mut self.caption.parser
        } else {
            &mut self.superimpose.parser
        };
        let result = parser.parse(&mut self.buf, &pes[payload_pos..end]);
        if result == Err(ParseError::NeedManagement) {
            return;
        }

        let mut pts_pcr_diff = (PTS_WRAP + pts as i64 - self.pcr) & PTS_MASK;
        if pts_pcr_diff >= 0x1_0000_0000 {
            pts_pcr_diff -= PTS_WRAP;
        }
        let pcr_rel = if self.pcr < 0 {
            -9999999
        } else {
            pts_pcr_diff.clamp(-9999999, 9999999)
        };
        let kind = if data_identifier == 0x81 {
            "superimpose"
        } else {
            "caption"
        };

        let sink = self.sink.as_mut().unwrap();
        let _ = write!(sink, "pts={pts:010};pcrrel={pcr_rel:+08};b24{kind}=");
        let _ = match result {
            Ok(()) => {
                self.buf.push(b'\n');
                sink.write_all(&self.buf)
            }
            Err(e) => {
                let err = match e {
                    ParseError::Crc => "crc",
                    ParseError::Unsupported => "unsupported",
                    _ => "unknown",
                };
                writeln!(sink, "err={err}")
            }
        };
        let _ = sink.flush();
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
