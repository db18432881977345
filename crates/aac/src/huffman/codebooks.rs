// Code-length tables for the scalefactor and spectrum Huffman codebooks
// (ISO/IEC 13818-7 Annex A). Codewords are assigned canonically and compiled
// into branch tables by the build script; decode only ever needs the tree.
//
// Spectrum books 1-4 carry quads, 5-11 pairs. Books 1, 2, 5 and 6 are
// signed; the rest take separate sign bits per nonzero coefficient.

/// Longest codeword over all books.
pub(crate) const MAX_CODEWORD_LEN: usize = 19;

pub(crate) static SCALEFACTOR_BITS: [u8; 121] = [
    19, 19, 19, 19, 19, 19, 19, 19, 19, 19, 19, 19, 19, 19, 19, 19, 19, 19, 19, 19,
    18, 18, 18, 18, 18, 18, 18, 18, 18, 18, 18, 18, 18, 17, 17, 16, 16, 15, 15, 14,
    14, 13, 13, 12, 12, 11, 11, 10, 10, 9, 9, 8, 8, 7, 7, 6, 6, 5, 4, 3,
    1,
    4, 5, 6, 6, 7, 7, 8, 8, 8, 9, 9, 10, 10, 11, 11, 12, 12, 13, 13, 14,
    14, 15, 15, 16, 16, 17, 17, 18, 18, 18, 18, 18, 18, 18, 18, 18, 18, 18, 18, 18,
    18, 19, 19, 19, 19, 19, 19, 19, 19, 19, 19, 19, 19, 19, 19, 19, 19, 19, 19, 19,
];

// Quad books: index = 27 w + 9 x + 3 y + z over the (biased) coefficients.

pub(crate) static SPECTRUM1_BITS: [u8; 81] = [
    11, 10, 11, 10, 7, 10, 11, 10, 11,
    9, 7, 9, 7, 5, 7, 9, 7, 9,
    11, 9, 11, 9, 7, 9, 11, 9, 11,
    9, 7, 9, 7, 5, 7, 9, 7, 9,
    7, 5, 7, 5, 1, 5, 7, 5, 7,
    9, 7, 9, 7, 5, 7, 9, 7, 9,
    11, 9, 11, 9, 7, 9, 11, 9, 11,
    9, 7, 9, 7, 5, 7, 9, 7, 9,
    11, 10, 11, 10, 7, 10, 11, 10, 11,
];

pub(crate) static SPECTRUM2_BITS: [u8; 81] = [
    9, 8, 9, 8, 7, 8, 9, 8, 9,
    7, 6, 7, 6, 5, 6, 7, 6, 7,
    9, 8, 9, 8, 7, 8, 9, 8, 9,
    7, 7, 7, 7, 5, 7, 7, 7, 7,
    6, 4, 6, 4, 3, 4, 6, 4, 6,
    7, 7, 7, 7, 5, 7, 7, 7, 7,
    9, 8, 9, 8, 7, 8, 9, 8, 9,
    7, 6, 7, 6, 5, 6, 7, 6, 7,
    9, 8, 9, 8, 7, 8, 9, 8, 9,
];

pub(crate) static SPECTRUM3_BITS: [u8; 81] = [
    1, 4, 6, 4, 6, 8, 6, 8, 10,
    4, 6, 8, 6, 8, 10, 8, 10, 11,
    6, 8, 10, 8, 10, 11, 10, 11, 13,
    4, 6, 8, 6, 8, 10, 8, 10, 11,
    6, 8, 10, 8, 10, 11, 10, 11, 13,
    8, 10, 11, 10, 11, 13, 11, 13, 14,
    6, 8, 10, 8, 10, 11, 10, 11, 13,
    8, 10, 11, 10, 11, 13, 11, 13, 14,
    10, 11, 13, 11, 13, 14, 13, 14, 16,
];

pub(crate) static SPECTRUM4_BITS: [u8; 81] = [
    4, 4, 5, 4, 5, 6, 5, 6, 8,
    4, 5, 6, 5, 6, 8, 6, 8, 9,
    5, 6, 8, 6, 8, 9, 8, 9, 10,
    4, 5, 6, 5, 6, 8, 6, 8, 9,
    5, 6, 8, 6, 8, 9, 8, 9, 10,
    6, 8, 9, 8, 9, 10, 9, 10, 11,
    5, 6, 8, 6, 8, 9, 8, 9, 10,
    6, 8, 9, 8, 9, 10, 9, 10, 11,
    8, 9, 10, 9, 10, 11, 10, 11, 12,
];

// Pair books: index = m y + z with m the value modulus of the book.

pub(crate) static SPECTRUM5_BITS: [u8; 81] = [
    13, 13, 12, 11, 10, 11, 12, 13, 13,
    13, 12, 11, 10, 7, 10, 11, 12, 13,
    12, 11, 10, 7, 6, 7, 10, 11, 12,
    11, 10, 7, 6, 4, 6, 7, 10, 11,
    10, 7, 6, 4, 1, 4, 6, 7, 10,
    11, 10, 7, 6, 4, 6, 7, 10, 11,
    12, 11, 10, 7, 6, 7, 10, 11, 12,
    13, 12, 11, 10, 7, 10, 11, 12, 13,
    13, 13, 12, 11, 10, 11, 12, 13, 13,
];

pub(crate) static SPECTRUM6_BITS: [u8; 81] = [
    11, 10, 9, 8, 7, 8, 9, 10, 11,
    10, 9, 8, 7, 6, 7, 8, 9, 10,
    9, 8, 7, 6, 5, 6, 7, 8, 9,
    8, 7, 6, 5, 4, 5, 6, 7, 8,
    7, 6, 5, 4, 4, 4, 5, 6, 7,
    8, 7, 6, 5, 4, 5, 6, 7, 8,
    9, 8, 7, 6, 5, 6, 7, 8, 9,
    10, 9, 8, 7, 6, 7, 8, 9, 10,
    11, 10, 9, 8, 7, 8, 9, 10, 11,
];

pub(crate) static SPECTRUM7_BITS: [u8; 64] = [
    1, 3, 5, 6, 7, 8, 9, 10,
    3, 5, 6, 7, 8, 9, 10, 11,
    5, 6, 7, 8, 9, 10, 11, 11,
    6, 7, 8, 9, 10, 11, 11, 12,
    7, 8, 9, 10, 11, 11, 12, 12,
    8, 9, 10, 11, 11, 12, 12, 13,
    9, 10, 11, 11, 12, 12, 13, 13,
    10, 11, 11, 12, 12, 13, 13, 14,
];

pub(crate) static SPECTRUM8_BITS: [u8; 64] = [
    3, 4, 4, 5, 5, 6, 6, 8,
    4, 4, 5, 5, 6, 6, 8, 8,
    4, 5, 5, 6, 6, 8, 8, 9,
    5, 5, 6, 6, 8, 8, 9, 10,
    5, 6, 6, 8, 8, 9, 10, 11,
    6, 6, 8, 8, 9, 10, 11, 12,
    6, 8, 8, 9, 10, 11, 12, 14,
    8, 8, 9, 10, 11, 12, 14, 16,
];

pub(crate) static SPECTRUM9_BITS: [u8; 169] = [
    1, 3, 5, 6, 7, 8, 9, 10, 12, 13, 14, 15, 15,
    3, 5, 6, 7, 8, 9, 10, 12, 13, 14, 15, 15, 15,
    5, 6, 7, 8, 9, 10, 12, 13, 14, 15, 15, 15, 15,
    6, 7, 8, 9, 10, 12, 13, 14, 15, 15, 15, 15, 15,
    7, 8, 9, 10, 12, 13, 14, 15, 15, 15, 15, 15, 16,
    8, 9, 10, 12, 13, 14, 15, 15, 15, 15, 15, 16, 16,
    9, 10, 12, 13, 14, 15, 15, 15, 15, 15, 16, 16, 16,
    10, 12, 13, 14, 15, 15, 15, 15, 15, 16, 16, 16, 17,
    12, 13, 14, 15, 15, 15, 15, 15, 16, 16, 16, 17, 17,
    13, 14, 15, 15, 15, 15, 15, 16, 16, 16, 17, 17, 18,
    14, 15, 15, 15, 15, 15, 16, 16, 16, 17, 17, 18, 18,
    15, 15, 15, 15, 15, 16, 16, 16, 17, 17, 18, 18, 19,
    15, 15, 15, 15, 16, 16, 16, 17, 17, 18, 18, 19, 19,
];

pub(crate) static SPECTRUM10_BITS: [u8; 169] = [
    3, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10,
    4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10, 10,
    5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10, 10, 11,
    5, 6, 6, 7, 7, 8, 8, 9, 9, 10, 10, 11, 11,
    6, 6, 7, 7, 8, 8, 9, 9, 10, 10, 11, 11, 12,
    6, 7, 7, 8, 8, 9, 9, 10, 10, 11, 11, 12, 12,
    7, 7, 8, 8, 9, 9, 10, 10, 11, 11, 12, 12, 13,
    7, 8, 8, 9, 9, 10, 10, 11, 11, 12, 12, 13, 13,
    8, 8, 9, 9, 10, 10, 11, 11, 12, 12, 13, 13, 14,
    8, 9, 9, 10, 10, 11, 11, 12, 12, 13, 13, 14, 14,
    9, 9, 10, 10, 11, 11, 12, 12, 13, 13, 14, 14, 14,
    9, 10, 10, 11, 11, 12, 12, 13, 13, 14, 14, 14, 14,
    10, 10, 11, 11, 12, 12, 13, 13, 14, 14, 14, 14, 14,
];

pub(crate) static SPECTRUM11_BITS: [u8; 289] = [
    3, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 9, 10, 10, 10, 10,
    4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 9, 10, 10, 10, 10, 11,
    5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 9, 10, 10, 10, 10, 11, 11,
    5, 6, 6, 7, 7, 8, 8, 9, 9, 9, 10, 10, 10, 10, 11, 11, 11,
    6, 6, 7, 7, 8, 8, 9, 9, 9, 10, 10, 10, 10, 11, 11, 11, 11,
    6, 7, 7, 8, 8, 9, 9, 9, 10, 10, 10, 10, 11, 11, 11, 11, 13,
    7, 7, 8, 8, 9, 9, 9, 10, 10, 10, 10, 11, 11, 11, 11, 13, 13,
    7, 8, 8, 9, 9, 9, 10, 10, 10, 10, 11, 11, 11, 11, 13, 13, 13,
    8, 8, 9, 9, 9, 10, 10, 10, 10, 11, 11, 11, 11, 13, 13, 13, 13,
    8, 9, 9, 9, 10, 10, 10, 10, 11, 11, 11, 11, 13, 13, 13, 13, 13,
    9, 9, 9, 10, 10, 10, 10, 11, 11, 11, 11, 13, 13, 13, 13, 13, 14,
    9, 9, 10, 10, 10, 10, 11, 11, 11, 11, 13, 13, 13, 13, 13, 14, 14,
    9, 10, 10, 10, 10, 11, 11, 11, 11, 13, 13, 13, 13, 13, 14, 14, 14,
    10, 10, 10, 10, 11, 11, 11, 11, 13, 13, 13, 13, 13, 14, 14, 14, 14,
    10, 10, 10, 11, 11, 11, 11, 13, 13, 13, 13, 13, 14, 14, 14, 14, 14,
    10, 10, 11, 11, 11, 11, 13, 13, 13, 13, 13, 14, 14, 14, 14, 14, 14,
    10, 11, 11, 11, 11, 13, 13, 13, 13, 13, 14, 14, 14, 14, 14, 14, 14,
];

/// All twelve books in tree order: scalefactor first, then spectrum 1-11.
pub(crate) static CODEBOOK_BITS: [&[u8]; 12] = [
    &SCALEFACTOR_BITS,
    &SPECTRUM1_BITS,
    &SPECTRUM2_BITS,
    &SPECTRUM3_BITS,
    &SPECTRUM4_BITS,
    &SPECTRUM5_BITS,
    &SPECTRUM6_BITS,
    &SPECTRUM7_BITS,
    &SPECTRUM8_BITS,
    &SPECTRUM9_BITS,
    &SPECTRUM10_BITS,
    &SPECTRUM11_BITS,
];
