//! Huffman decoding for the raw-data-block walker.
//!
//! The branch tables are generated by the build script from the code-length
//! tables in `codebooks.rs`; each node is a `[left, right]` pair where values
//! below 500 index another node and values from 500 encode a leaf.

use bytes_util::BitCursor;

#[cfg(test)]
mod codebooks;

include!(concat!(env!("OUT_DIR"), "/huffman_trees.rs"));

/// Longest codeword over all books; decode walks are bounded by it.
pub const MAX_CODEWORD_LEN: usize = 19;

const LEAF_BASE: u16 = 500;
const INVALID: u16 = u16::MAX;

/// Escape magnitude in spectrum book 11: the actual value follows as a
/// unary-prefixed field.
pub const ESC_FLAG: i32 = 16;

static SPECTRUM_TREES: [&[[u16; 2]]; 11] = [
    &SPECTRUM1_TREE,
    &SPECTRUM2_TREE,
    &SPECTRUM3_TREE,
    &SPECTRUM4_TREE,
    &SPECTRUM5_TREE,
    &SPECTRUM6_TREE,
    &SPECTRUM7_TREE,
    &SPECTRUM8_TREE,
    &SPECTRUM9_TREE,
    &SPECTRUM10_TREE,
    &SPECTRUM11_TREE,
];

/// Four spectral coefficients from one of the quad books (1-4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpectrumQuad {
    /// True when the book carries magnitudes and sign bits follow for each
    /// nonzero coefficient.
    pub is_unsigned: bool,
    pub w: i32,
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

/// Two spectral coefficients from one of the pair books (5-11).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpectrumPair {
    pub is_unsigned: bool,
    pub y: i32,
    pub z: i32,
}

fn decode(tree: &[[u16; 2]], cur: &mut BitCursor) -> Option<usize> {
    let mut node = 0usize;
    for _ in 0..=MAX_CODEWORD_LEN {
        let next = tree[node][cur.read_bit() as usize];
        if next == INVALID {
            return None;
        }
        if next >= LEAF_BASE {
            return Some((next - LEAF_BASE) as usize);
        }
        node = next as usize;
    }
    None
}

/// Decodes one dpcm scalefactor (offset from the previous, -60..=60).
pub fn decode_scalefactor(cur: &mut BitCursor) -> Option<i32> {
    decode(&SCALEFACTOR_TREE, cur).map(|index| index as i32 - 60)
}

/// Decodes a quad from spectrum book `codebook` (1..=4).
pub fn decode_spectrum_quad(codebook: u32, cur: &mut BitCursor) -> Option<SpectrumQuad> {
    debug_assert!((1..=4).contains(&codebook));
    let index = decode(SPECTRUM_TREES[codebook as usize - 1], cur)? as i32;
    let is_unsigned = codebook >= 3;
    let off = if is_unsigned { 0 } else { 1 };
    Some(SpectrumQuad {
        is_unsigned,
        w: index / 27 - off,
        x: index / 9 % 3 - off,
        y: index / 3 % 3 - off,
        z: index % 3 - off,
    })
}

/// Decodes a pair from spectrum book `codebook` (5..=11).
pub fn decode_spectrum_pair(codebook: u32, cur: &mut BitCursor) -> Option<SpectrumPair> {
    debug_assert!((5..=11).contains(&codebook));
    let index = decode(SPECTRUM_TREES[codebook as usize - 1], cur)? as i32;
    let (modulus, off) = match codebook {
        5 | 6 => (9, 4),
        7 | 8 => (8, 0),
        9 | 10 => (13, 0),
        _ => (17, 0),
    };
    Some(SpectrumPair {
        is_unsigned: codebook >= 7,
        y: index / modulus - off,
        z: index % modulus - off,
    })
}

#[cfg(test)]
mod tests {
    use super::generated_codes::CODEBOOK_CODES;
    use super::*;

    fn bits_of(code: u32, len: u8) -> Vec<u8> {
        let mut sink = bytes_util::BitSink::new();
        sink.put_bits(code, len as u32);
        sink.into_bytes()
    }

    #[test]
    fn test_every_codeword_roundtrips() {
        for (book, codes) in CODEBOOK_CODES.iter().enumerate() {
            let tree: &[[u16; 2]] = if book == 0 {
                &SCALEFACTOR_TREE
            } else {
                SPECTRUM_TREES[book - 1]
            };
            for (index, &(code, len)) in codes.iter().enumerate() {
                let bytes = bits_of(code, len);
                let mut cur = BitCursor::new(&bytes);
                assert_eq!(
                    decode(tree, &mut cur),
                    Some(index),
                    "book {book} index {index}"
                );
                assert_eq!(cur.pos(), len as usize, "book {book} index {index}");
            }
        }
    }

    #[test]
    fn test_codeword_lengths_match_tables() {
        assert_eq!(codebooks::MAX_CODEWORD_LEN, MAX_CODEWORD_LEN);
        for (codes, bits) in CODEBOOK_CODES.iter().zip(codebooks::CODEBOOK_BITS) {
            for (&(_, len), &expected) in codes.iter().zip(bits) {
                assert_eq!(len, expected);
            }
        }
    }

    #[test]
    fn test_scalefactor_center_is_single_bit() {
        // dpcm 0 is by far the most common symbol
        let bytes = [0u8];
        let mut cur = BitCursor::new(&bytes);
        assert_eq!(decode_scalefactor(&mut cur), Some(0));
        assert_eq!(cur.pos(), 1);
    }

    #[test]
    fn test_quad_value_mapping() {
        // book 1: all-zero quad sits at index 40
        let (code, len) = CODEBOOK_CODES[1][40];
        let bytes = bits_of(code, len);
        let mut cur = BitCursor::new(&bytes);
        let quad = decode_spectrum_quad(1, &mut cur).unwrap();
        assert_eq!(
            quad,
            SpectrumQuad {
                is_unsigned: false,
                w: 0,
                x: 0,
                y: 0,
                z: 0
            }
        );

        // book 3 is unsigned: index 80 is (2, 2, 2, 2)
        let (code, len) = CODEBOOK_CODES[3][80];
        let bytes = bits_of(code, len);
        let mut cur = BitCursor::new(&bytes);
        let quad = decode_spectrum_quad(3, &mut cur).unwrap();
        assert_eq!(
            quad,
            SpectrumQuad {
                is_unsigned: true,
                w: 2,
                x: 2,
                y: 2,
                z: 2
            }
        );
    }

    #[test]
    fn test_pair_value_mapping_and_escape() {
        // book 5 is signed around 0: index 0 is (-4, -4)
        let (code, len) = CODEBOOK_CODES[5][0];
        let bytes = bits_of(code, len);
        let mut cur = BitCursor::new(&bytes);
        let pair = decode_spectrum_pair(5, &mut cur).unwrap();
        assert_eq!(pair.y, -4);
        assert_eq!(pair.z, -4);
        assert!(!pair.is_unsigned);

        // book 11: index 17 * 16 + 16 carries the escape magnitude twice
        let (code, len) = CODEBOOK_CODES[11][17 * 16 + 16];
        let bytes = bits_of(code, len);
        let mut cur = BitCursor::new(&bytes);
        let pair = decode_spectrum_pair(11, &mut cur).unwrap();
        assert_eq!(pair.y, ESC_FLAG);
        assert_eq!(pair.z, ESC_FLAG);
        assert!(pair.is_unsigned);
    }

    #[test]
    fn test_unreachable_branch_fails_cleanly() {
        // all-ones input longer than any codeword must terminate
        let bytes = [0xffu8; 4];
        let mut cur = BitCursor::new(&bytes);
        let _ = decode(&SCALEFACTOR_TREE, &mut cur);
        assert!(cur.pos() <= MAX_CODEWORD_LEN + 1);
    }
}
