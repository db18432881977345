//! Caption data group parsing (ARIB STD-B24 part 3, chapter 9).
//!
//! The parser walks data groups out of PES private data, tracks the
//! announced language set and DRCS definitions, and renders everything into
//! the escaped text form: structural length fields become `%={` / `%=}`
//! braces, statement bodies become UTF-8, the rest is `%XX`-escaped.

use thiserror::Error;
use ts::crc::crc16_ccitt;

use crate::decoder::decode_units;
use crate::drcs::DrcsMap;
use crate::text::{push_byte, push_escaped, push_escaped_data};

/// Why a caption PES produced no text.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    #[error("data group truncated")]
    Truncated,

    #[error("data group CRC mismatch")]
    Crc,

    #[error("unsupported data group")]
    Unsupported,

    #[error("caption data for an unannounced language")]
    NeedManagement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum LangTag {
    #[default]
    Absent,
    Unknown,
    Ucs,
    Arib8,
    Arib8Latin,
}

const GS_DRCS_0: u8 = 0x40;

const BEGIN_UNIT_BRACE: &[u8] = b"%={";
const END_UNIT_BRACE: &[u8] = b"%=}";

/// Stateful caption parser for one elementary stream. Language tags persist
/// from the last caption management data; DRCS definitions persist until
/// [`reset`].
///
/// [`reset`]: CaptionParser::reset
#[derive(Debug, Clone, Default)]
pub struct CaptionParser {
    drcs: DrcsMap,
    lang_tags: [LangTag; 8],
}

impl CaptionParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets languages and DRCS definitions (the stream changed).
    pub fn reset(&mut self) {
        self.drcs.clear();
        self.lang_tags = [LangTag::Absent; 8];
    }

    /// Parses one PES private payload (starting at the data_identifier) and
    /// appends the text form to `out`. `out` is cleared first.
    pub fn parse(&mut self, out: &mut Vec<u8>, data: &[u8]) -> Result<(), ParseError> {
        out.clear();
        if data.len() < 3 {
            return Err(ParseError::Truncated);
        }
        let mut pos = 3 + (data[2] & 0x0f) as usize;
        if pos + 4 >= data.len() {
            return Err(ParseError::Truncated);
        }

        // data_group()
        let dgi_type = (data[pos] >> 2) & 0x1f;
        let data_group_end = pos + 5 + (((data[pos + 3] as usize) << 8) | data[pos + 4] as usize);
        if dgi_type > 8 {
            return Err(ParseError::Unsupported);
        }
        if dgi_type != 0 && self.lang_tags[dgi_type as usize - 1] == LangTag::Absent {
            return Err(ParseError::NeedManagement);
        }
        if data_group_end + 2 > data.len() {
            return Err(ParseError::Truncated);
        }
        if crc16_ccitt(&data[pos..data_group_end + 2]) != 0 {
            return Err(ParseError::Crc);
        }
        out.push(b'0' + dgi_type);
        out.push(b'=');
        pos += push_escaped_data(out, &data[pos..pos + 3]);
        // omit data_group_size
        pos += 2;
        if pos + 3 >= data_group_end {
            return Err(ParseError::Truncated);
        }

        // caption_management_data() or caption_data()
        let tmd = data[pos] >> 6;
        push_escaped(out, data[pos]);
        pos += 1;
        if (dgi_type != 0 && tmd == 1) || tmd == 2 {
            if pos + 7 >= data_group_end {
                return Err(ParseError::Truncated);
            }
            pos += push_escaped_data(out, &data[pos..pos + 5]);
        }

        let mut lang = LangTag::Unknown;
        if dgi_type == 0 {
            // caption_management_data()
            self.lang_tags = [LangTag::Absent; 8];
            let num_languages = data[pos];
            push_escaped(out, data[pos]);
            pos += 1;

            for _ in 0..num_languages {
                if pos + 7 >= data_group_end {
                    break;
                }
                let tag = (data[pos] >> 5) as usize;
                let dmf = data[pos] & 0x0f;
                push_escaped(out, data[pos]);
                pos += 1;
                if (12..=14).contains(&dmf) {
                    if pos + 7 >= data_group_end {
                        return Err(ParseError::Truncated);
                    }
                    push_escaped(out, data[pos]);
                    pos += 1;
                }
                let tcs = (data[pos + 3] >> 2) & 0x03;
                lang = match tcs {
                    1 => LangTag::Ucs,
                    2 | 3 => LangTag::Unknown,
                    _ => {
                        if data[pos..pos + 3] == *b"por" || data[pos..pos + 3] == *b"spa" {
                            LangTag::Arib8Latin
                        } else {
                            LangTag::Arib8
                        }
                    }
                };
                self.lang_tags[tag] = lang;
                for _ in 0..3 {
                    if data[pos] < 0x80 {
                        push_byte(out, data[pos]);
                    } else {
                        push_escaped(out, data[pos]);
                    }
                    pos += 1;
                }
                // tcs 0->1: the text form below is already decoded
                let eight_unit = lang == LangTag::Arib8 || lang == LangTag::Arib8Latin;
                push_escaped(out, data[pos] | if eight_unit { 0x04 } else { 0 });
                pos += 1;
            }
        } else {
            // caption_data()
            lang = self.lang_tags[dgi_type as usize - 1];
        }

        let data_unit_loop_end = pos
            + 3
            + (((data[pos] as usize) << 16)
                | ((data[pos + 1] as usize) << 8)
                | data[pos + 2] as usize);
        if data_unit_loop_end > data_group_end {
            return Err(ParseError::Truncated);
        }
        pos += 3;

        // Replace data_unit_loop_length with "%={"
        out.extend_from_slice(BEGIN_UNIT_BRACE);

        while pos + 4 < data_unit_loop_end {
            // data_unit()
            push_escaped(out, data[pos]);
            pos += 1;
            let unit_parameter = data[pos];
            if unit_parameter == 0x30 && (lang == LangTag::Arib8 || lang == LangTag::Arib8Latin) {
                // "shall be the DRCS-0 set" (STD-B24)
                push_escaped(out, 0x31);
                pos += 1;
            } else {
                push_escaped(out, data[pos]);
                pos += 1;
            }
            let data_unit_size = ((data[pos] as usize) << 16)
                | ((data[pos + 1] as usize) << 8)
                | data[pos + 2] as usize;
            pos += 3;
            if pos + data_unit_size > data_unit_loop_end {
                return Err(ParseError::Truncated);
            }
            // Replace data_unit_size with "%={"
            out.extend_from_slice(BEGIN_UNIT_BRACE);

            if unit_parameter == 0x20 {
                // Statement body
                match lang {
                    LangTag::Arib8 | LangTag::Arib8Latin => {
                        decode_units(
                            out,
                            &data[pos..pos + data_unit_size],
                            &self.drcs,
                            lang == LangTag::Arib8Latin,
                        );
                        pos += data_unit_size;
                    }
                    LangTag::Ucs => {
                        push_ucs(out, &data[pos..pos + data_unit_size]);
                        pos += data_unit_size;
                    }
                    _ => {
                        pos += push_escaped_data(out, &data[pos..pos + data_unit_size]);
                    }
                }
            } else if unit_parameter == 0x30 || unit_parameter == 0x31 {
                pos = self.parse_drcs_structure(out, data, pos, data_unit_size, unit_parameter);
            } else {
                pos += push_escaped_data(out, &data[pos..pos + data_unit_size]);
            }
            out.extend_from_slice(END_UNIT_BRACE);
        }
        out.extend_from_slice(END_UNIT_BRACE);

        // omit CRC_16
        Ok(())
    }

    /// Walks a Drcs_data_structure(), assigning private code points to the
    /// defined character codes and echoing the glyph data escaped.
    fn parse_drcs_structure(
        &mut self,
        out: &mut Vec<u8>,
        data: &[u8],
        mut pos: usize,
        data_unit_size: usize,
        unit_parameter: u8,
    ) -> usize {
        let drcs_data_end = pos + data_unit_size;
        if pos >= drcs_data_end {
            return pos;
        }
        let number_of_code = data[pos];
        push_escaped(out, data[pos]);
        pos += 1;
        for _ in 0..number_of_code {
            if pos + 2 >= drcs_data_end {
                break;
            }
            let char_code = if unit_parameter == 0x31 {
                ((data[pos] as u16) << 8) | data[pos + 1] as u16
            } else {
                ((data[pos].wrapping_sub(GS_DRCS_0) as u16) << 8) | data[pos + 1] as u16
            };
            // U+EC00 - U+EFFF (1024 characters)
            let code_point = self.drcs.assign(char_code) as u32;
            push_escaped(out, (code_point >> 8) as u8);
            push_escaped(out, code_point as u8);
            pos += 2;

            let number_of_font = data[pos];
            push_escaped(out, data[pos]);
            pos += 1;
            for _ in 0..number_of_font {
                if pos >= drcs_data_end {
                    break;
                }
                let mode = data[pos] & 0x0f;
                push_escaped(out, data[pos]);
                pos += 1;
                let mut n = drcs_data_end - pos;
                if mode <= 1 {
                    if n >= 3 {
                        let depth = data[pos] as u32;
                        let bits = match depth {
                            0 => 1,
                            1..=2 => 2,
                            3..=6 => 3,
                            7..=14 => 4,
                            15..=30 => 5,
                            31..=62 => 6,
                            63..=126 => 7,
                            127..=254 => 8,
                            _ => 9,
                        };
                        n = 3 + (bits as usize * data[pos + 1] as usize * data[pos + 2] as usize
                            + 7)
                            / 8;
                    }
                } else if n >= 4 {
                    n = 4 + (((data[pos + 2] as usize) << 8) | data[pos + 3] as usize);
                }
                pos += push_escaped_data(out, &data[pos..pos + n.min(drcs_data_end - pos)]);
            }
        }
        pos
    }
}

/// A UCS statement body: UTF-16 byte-order marks fall back to escapes,
/// UTF-8 passes through with C1 controls in caret notation.
fn push_ucs(out: &mut Vec<u8>, data: &[u8]) {
    if !data.is_empty() && (data[0] == 0xfe || data[0] == 0xff) {
        push_escaped_data(out, data);
        return;
    }
    let mut i = 0;
    while i < data.len() {
        if data[i] == 0xc2 && i + 1 < data.len() && (0x80..=0x9f).contains(&data[i + 1]) {
            // C1, caret notation
            out.push(b'%');
            push_byte(out, b'^');
            i += 1;
            push_byte(out, data[i] - 0x40);
        } else {
            push_byte(out, data[i]);
        }
        i += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_group(dgi_type: u8, body: &[u8]) -> Vec<u8> {
        let mut payload = vec![0x80, 0xff, 0x00];
        let mut group = vec![dgi_type << 2, 0x00, 0x00];
        group.extend_from_slice(&(body.len() as u16).to_be_bytes());
        group.extend_from_slice(body);
        let crc = crc16_ccitt(&group);
        payload.extend_from_slice(&group);
        payload.extend_from_slice(&crc.to_be_bytes());
        payload
    }

    fn management_body(iso_code: &[u8; 3]) -> Vec<u8> {
        let mut body = vec![
            0x00, // TMD
            0x01, // num_languages
            0x00, // language_tag 0, DMF 0
        ];
        body.extend_from_slice(iso_code);
        body.push(0x00); // format, TCS 0 (8-unit code)
        body.extend_from_slice(&[0x00, 0x00, 0x00]); // data_unit_loop_length
        body
    }

    fn statement_body(units: &[u8]) -> Vec<u8> {
        let mut body = vec![0x00]; // TMD
        let loop_len = units.len() as u32 + 5;
        body.extend_from_slice(&loop_len.to_be_bytes()[1..]);
        body.push(0x1f); // unit_separator
        body.push(0x20); // statement
        body.extend_from_slice(&(units.len() as u32).to_be_bytes()[1..]);
        body.extend_from_slice(units);
        body
    }

    #[test]
    fn test_caption_needs_management_first() {
        let mut parser = CaptionParser::new();
        let mut out = Vec::new();
        let caption = data_group(1, &statement_body(&[0x24, 0x22]));
        assert_eq!(
            parser.parse(&mut out, &caption),
            Err(ParseError::NeedManagement)
        );
    }

    #[test]
    fn test_management_then_statement() {
        let mut parser = CaptionParser::new();
        let mut out = Vec::new();
        parser
            .parse(&mut out, &data_group(0, &management_body(b"jpn")))
            .unwrap();
        let text = String::from_utf8(out.clone()).unwrap();
        assert!(text.starts_with("0="));
        assert!(text.contains("jpn"));
        assert!(text.ends_with("%={%=}"));

        parser
            .parse(&mut out, &data_group(1, &statement_body(&[0x24, 0x22])))
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("1="));
        assert!(text.contains("%={あ%=}"), "{text}");
    }

    #[test]
    fn test_latin_language_decodes_ascii() {
        let mut parser = CaptionParser::new();
        let mut out = Vec::new();
        parser
            .parse(&mut out, &data_group(0, &management_body(b"por")))
            .unwrap();
        parser
            .parse(&mut out, &data_group(1, &statement_body(b"Ola")))
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("%={Ola%=}"), "{text}");
    }

    #[test]
    fn test_crc_failure() {
        let mut parser = CaptionParser::new();
        let mut out = Vec::new();
        let mut group = data_group(0, &management_body(b"jpn"));
        let last = group.len() - 1;
        group[last] ^= 0xff;
        assert_eq!(parser.parse(&mut out, &group), Err(ParseError::Crc));
    }

    #[test]
    fn test_unsupported_group() {
        let mut parser = CaptionParser::new();
        let mut out = Vec::new();
        let group = data_group(9, &[0x00, 0x00, 0x00, 0x00]);
        assert_eq!(parser.parse(&mut out, &group), Err(ParseError::Unsupported));
    }

    #[test]
    fn test_truncated_group() {
        let mut parser = CaptionParser::new();
        let mut out = Vec::new();
        let mut group = data_group(0, &management_body(b"jpn"));
        group.truncate(group.len() - 4);
        assert_eq!(parser.parse(&mut out, &group), Err(ParseError::Truncated));
    }

    #[test]
    fn test_drcs_definition_assigns_code_points() {
        let mut parser = CaptionParser::new();
        let mut out = Vec::new();
        parser
            .parse(&mut out, &data_group(0, &management_body(b"jpn")))
            .unwrap();

        // one 2-byte DRCS code with one tiny mode-2 font
        let mut body = vec![0x00]; // TMD
        let drcs = [
            0x01, // number_of_code
            0x41, 0x21, // character_code
            0x01, // number_of_font
            0x02, // font_id / mode 2
            0x00, 0x00, 0x00, 0x01, // geometry, 1 data byte
            0xaa,
        ];
        let mut units = vec![0x1f, 0x31];
        units.extend_from_slice(&(drcs.len() as u32).to_be_bytes()[1..]);
        units.extend_from_slice(&drcs);
        let loop_len = units.len() as u32;
        body.extend_from_slice(&loop_len.to_be_bytes()[1..]);
        body.extend_from_slice(&units);

        parser.parse(&mut out, &data_group(1, &body)).unwrap();
        let text = String::from_utf8(out.clone()).unwrap();
        // U+EC00 is escaped as its code point bytes
        assert!(text.contains("%EC%00"), "{text}");

        // the statement body can now reference the glyph: designate DRCS-0
        // to G0 two-byte (ESC $ ( 0x20 F) and emit the code
        parser
            .parse(
                &mut out,
                &data_group(
                    1,
                    &statement_body(&[0x1b, 0x24, 0x28, 0x20, 0x40, 0x41, 0x21]),
                ),
            )
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains('\u{ec00}'), "{text}");
    }
}
