//! 8-unit-code decoding (ARIB STD-B24 part 2, chapter 7).
//!
//! Four designation buffers G0-G3 each hold a graphic set or DRCS; GL and GR
//! pick which buffer the 0x21-0x7E and 0xA1-0xFE ranges invoke. Control
//! codes move those mappings around, and everything unprintable is echoed in
//! `%XX` or `%^X` notation so the trace output stays one line per caption.

use crate::drcs::DrcsMap;
use crate::tables;
use crate::text::{push_ascii, push_byte, push_char};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GsClass {
    OneByteG,
    TwoByteG,
    OneByteDrcs,
    TwoByteDrcs,
}

const GS_HIRAGANA: u8 = 0x30;
const GS_KATAKANA: u8 = 0x31;
const GS_PROP_ASCII: u8 = 0x36;
const GS_PROP_HIRAGANA: u8 = 0x37;
const GS_PROP_KATAKANA: u8 = 0x38;
const GS_JIS_KANJI1: u8 = 0x39;
const GS_JIS_KANJI2: u8 = 0x3a;
const GS_ADDITIONAL_SYMBOLS: u8 = 0x3b;
const GS_KANJI: u8 = 0x42;
const GS_JISX_KATAKANA: u8 = 0x49;
const GS_ASCII: u8 = 0x4a;
const GS_LATIN_EXTENSION: u8 = 0x4b;
const GS_LATIN_SPECIAL: u8 = 0x4c;
const GS_DRCS_0: u8 = 0x40;
const GS_DRCS_1: u8 = 0x41;
const GS_DRCS_15: u8 = 0x4f;
const GS_MACRO: u8 = 0x70;

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn has_more(&self) -> bool {
        self.pos < self.data.len()
    }

    /// Reads the next byte, or 0 past the end (the stream just runs dry).
    fn next(&mut self) -> u8 {
        let byte = self.data.get(self.pos).copied().unwrap_or(0);
        if self.has_more() {
            self.pos += 1;
        }
        byte
    }
}

struct Arib8State {
    gbuf: [(GsClass, u8); 4],
    gl: usize,
    gr: usize,
    latin: bool,
}

impl Arib8State {
    fn new(latin: bool) -> Self {
        let mut state = Self {
            gbuf: [(GsClass::OneByteG, GS_ASCII); 4],
            gl: 0,
            gr: 2,
            latin,
        };
        state.initialize();
        state
    }

    fn initialize(&mut self) {
        if self.latin {
            self.gbuf[0] = (GsClass::OneByteG, GS_ASCII);
            self.gbuf[2] = (GsClass::OneByteG, GS_LATIN_EXTENSION);
            self.gbuf[3] = (GsClass::OneByteG, GS_LATIN_SPECIAL);
        } else {
            self.gbuf[0] = (GsClass::TwoByteG, GS_KANJI);
            self.gbuf[2] = (GsClass::OneByteG, GS_HIRAGANA);
            self.gbuf[3] = (GsClass::OneByteDrcs, GS_MACRO);
        }
        self.gbuf[1] = (GsClass::OneByteG, GS_ASCII);
        self.gl = 0;
        self.gr = 2;
    }
}

/// Decodes an 8-unit-code statement body into the escaped UTF-8 text form.
pub fn decode_units(out: &mut Vec<u8>, data: &[u8], drcs: &DrcsMap, latin: bool) {
    let mut state = Arib8State::new(latin);
    decode_with(out, &mut Reader::new(data), drcs, &mut state);
}

fn decode_with(out: &mut Vec<u8>, reader: &mut Reader, drcs: &DrcsMap, state: &mut Arib8State) {
    let mut gss: Option<usize> = None;
    while reader.has_more() {
        let b = reader.next();
        if b <= 0x20 {
            // C0
            gss = None;
            match b {
                0x0e => state.gl = 1, // LS1
                0x0f => state.gl = 0, // LS0
                0x19 => gss = Some(2), // SS2
                0x1d => gss = Some(3), // SS3
                0x1b => {
                    // ESC
                    let b = reader.next();
                    if b == 0x24 {
                        let b = reader.next();
                        if (0x28..=0x2b).contains(&b) {
                            let c = reader.next();
                            if c == 0x20 {
                                state.gbuf[b as usize - 0x28] =
                                    (GsClass::TwoByteDrcs, reader.next());
                            } else if (0x29..=0x2b).contains(&b) {
                                state.gbuf[b as usize - 0x28] = (GsClass::TwoByteDrcs, c);
                            }
                        } else {
                            state.gbuf[0] = (GsClass::TwoByteG, b);
                        }
                    } else if (0x28..=0x2b).contains(&b) {
                        let c = reader.next();
                        if c == 0x20 {
                            state.gbuf[b as usize - 0x28] = (GsClass::OneByteDrcs, reader.next());
                        } else {
                            state.gbuf[b as usize - 0x28] = (GsClass::OneByteG, c);
                        }
                    } else {
                        match b {
                            0x6e => state.gl = 2, // LS2
                            0x6f => state.gl = 3, // LS3
                            0x7c => state.gr = 3, // LS3R
                            0x7d => state.gr = 2, // LS2R
                            0x7e => state.gr = 1, // LS1R
                            _ => {}
                        }
                    }
                }
                0 => {}
                _ => {
                    push_byte(out, b);
                    if b == 0x0c {
                        // CS
                        state.initialize();
                    } else if b == 0x16 {
                        // PAPF
                        push_ascii(out, reader.next());
                    } else if b == 0x1c {
                        // APS
                        push_ascii(out, reader.next());
                        push_ascii(out, reader.next());
                    }
                }
            }
        } else if (0x7f..=0xa0).contains(&b) {
            // C1
            gss = None;
            if b == 0x95 {
                // MACRO definition (unsupported); skip to the closing 0x95 0x4f
                let mut b = reader.next();
                while reader.has_more() {
                    let c = reader.next();
                    if b == 0x95 && c == 0x4f {
                        break;
                    }
                    b = c;
                }
            } else {
                if b == 0x7f {
                    push_byte(out, b);
                } else if b == 0xa0 {
                    push_byte(out, 0xc2);
                    push_byte(out, b);
                } else {
                    // caret notation
                    out.push(b'%');
                    push_byte(out, b'^');
                    push_byte(out, b - 0x40);
                }
                if matches!(b, 0x8b | 0x91 | 0x93 | 0x94 | 0x97 | 0x98) {
                    // SZX, FLC, POL, WMM, HLC, RPC
                    push_ascii(out, reader.next());
                } else if b == 0x90 {
                    // COL
                    let b = reader.next();
                    push_ascii(out, b);
                    if b == 0x20 {
                        push_ascii(out, reader.next());
                    }
                } else if b == 0x9d {
                    // TIME
                    let mut b = reader.next();
                    push_ascii(out, b);
                    if b == 0x20 {
                        push_ascii(out, reader.next());
                    } else {
                        while reader.has_more() && !(0x40..=0x43).contains(&b) {
                            b = reader.next();
                            push_ascii(out, b);
                        }
                    }
                } else if b == 0x9b {
                    // CSI
                    let mut b = b;
                    while reader.has_more() && b != 0x20 {
                        b = reader.next();
                        push_ascii(out, b);
                    }
                    let b = reader.next();
                    push_ascii(out, b);
                    if b == 0x53 {
                        // SWF
                        state.initialize();
                    }
                }
            }
        } else if b < 0xff {
            // GL, GR
            let g = match gss.take() {
                Some(index) => state.gbuf[index],
                None => state.gbuf[if b < 0x7f { state.gl } else { state.gr }],
            };
            let b = b & 0x7f;
            match g.0 {
                GsClass::OneByteG => {
                    if g.1 == GS_ASCII || g.1 == GS_PROP_ASCII {
                        if state.latin {
                            push_byte(out, b);
                        } else {
                            push_char(out, tables::FULLWIDTH_ASCII[b as usize - 0x21]);
                        }
                    } else {
                        let table = match g.1 {
                            GS_HIRAGANA | GS_PROP_HIRAGANA => Some(&tables::HIRAGANA),
                            GS_KATAKANA | GS_PROP_KATAKANA => Some(&tables::KATAKANA),
                            GS_JISX_KATAKANA => Some(&tables::JISX_KATAKANA),
                            GS_LATIN_EXTENSION => Some(&tables::LATIN_EXTENSION),
                            GS_LATIN_SPECIAL => Some(&tables::LATIN_SPECIAL),
                            _ => None,
                        };
                        match table {
                            Some(table) => push_char(out, table[b as usize - 0x21]),
                            None => push_char(out, '\u{fffd}'),
                        }
                    }
                }
                GsClass::TwoByteG => {
                    let c = reader.next() & 0x7f;
                    if matches!(
                        g.1,
                        GS_JIS_KANJI1 | GS_JIS_KANJI2 | GS_ADDITIONAL_SYMBOLS | GS_KANJI
                    ) {
                        if b < 0x21 + 84 && (0x21..0x21 + 94).contains(&c) {
                            push_char(out, tables::jis_char(b, c));
                        } else {
                            push_char(out, tables::gaiji_char((b as u16) << 8 | c as u16));
                        }
                    } else {
                        push_char(out, '\u{fffd}');
                    }
                }
                GsClass::OneByteDrcs => {
                    if (GS_DRCS_1..=GS_DRCS_15).contains(&g.1) {
                        let char_code = ((g.1 - GS_DRCS_0) as u16) << 8 | b as u16;
                        push_char(out, drcs.lookup(char_code).unwrap_or('\u{fffd}'));
                    } else if g.1 == GS_MACRO {
                        if (0x60..=0x6f).contains(&b) {
                            let body = &tables::DEFAULT_MACROS[b as usize & 0x0f];
                            decode_with(out, &mut Reader::new(body), drcs, state);
                        } else {
                            push_char(out, '\u{fffd}');
                        }
                    } else {
                        push_char(out, '\u{fffd}');
                    }
                }
                GsClass::TwoByteDrcs => {
                    let c = reader.next() & 0x7f;
                    if g.1 == GS_DRCS_0 {
                        let char_code = (b as u16) << 8 | c as u16;
                        push_char(out, drcs.lookup(char_code).unwrap_or('\u{fffd}'));
                    } else {
                        push_char(out, '\u{fffd}');
                    }
                }
            }
        } else {
            gss = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(data: &[u8]) -> String {
        let mut out = Vec::new();
        decode_units(&mut out, data, &DrcsMap::new(), false);
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_default_kanji_in_g0() {
        // JIS row 4 cell 2 = あ, row 16 cell 1 = 亜
        assert_eq!(decode(&[0x24, 0x22, 0x30, 0x21]), "あ亜");
    }

    #[test]
    fn test_gr_invokes_hiragana() {
        assert_eq!(decode(&[0xa2]), "あ");
    }

    #[test]
    fn test_ls1_switches_to_ascii() {
        // LS1 then 'A' maps through the fullwidth table
        assert_eq!(decode(&[0x0e, 0x41]), "Ａ");
    }

    #[test]
    fn test_esc_designation_and_ls2() {
        // designate katakana to G2, LS2, then cell 2
        assert_eq!(decode(&[0x1b, 0x2a, GS_KATAKANA, 0x1b, 0x6e, 0x22]), "ア");
    }

    #[test]
    fn test_single_shift() {
        // SS2 invokes G2 (hiragana) for one character, then G0 resumes
        assert_eq!(decode(&[0x19, 0x22, 0x30, 0x21]), "あ亜");
    }

    #[test]
    fn test_latin_mode() {
        let mut out = Vec::new();
        decode_units(&mut out, &[0x41, 0x42], &DrcsMap::new(), true);
        assert_eq!(out, b"AB");
    }

    #[test]
    fn test_control_echo() {
        // APS consumes two argument bytes
        assert_eq!(decode(&[0x1c, 0x40, 0x41]), "%1C@A");
        // C1 control in caret notation with one argument (SZX)
        assert_eq!(decode(&[0x8b, 0x60]), "%^K`");
    }

    #[test]
    fn test_default_macro_designates_and_prints() {
        // SS3 invokes the macro buffer; macro 0x60 redesignates the G sets
        // and ends with LS2R, so the following GR byte invokes hiragana
        assert_eq!(decode(&[0x1d, 0x60, 0xa2]), "あ");
    }

    #[test]
    fn test_drcs_lookup() {
        let mut map = DrcsMap::new();
        let assigned = map.assign(0x0121); // DRCS-1, code 0x21
        let mut out = Vec::new();
        // designate DRCS-1 to G1 (ESC 0x29 0x20 F), LS1, then 0x21
        decode_units(&mut out, &[0x1b, 0x29, 0x20, 0x41, 0x0e, 0x21], &map, false);
        assert_eq!(out, assigned.to_string().as_bytes());
    }

    #[test]
    fn test_unknown_drcs_is_replacement() {
        assert_eq!(
            decode(&[0x1b, 0x29, 0x20, 0x41, 0x0e, 0x21]),
            "\u{fffd}"
        );
    }
}
