// Generates the Huffman branch tables from the codebook code-length tables.
//
// Codewords are assigned canonically (symbols ordered by length, then index)
// and inserted into a binary tree encoded as (left, right) pairs: 0..500 is
// an internal node index, 500+ is a leaf carrying the code index, and
// u16::MAX marks a branch no codeword reaches.

use std::env;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

include!("src/huffman/codebooks.rs");

const LEAF_BASE: u16 = 500;
const INVALID: u16 = u16::MAX;

const TREE_NAMES: [&str; 12] = [
    "SCALEFACTOR_TREE",
    "SPECTRUM1_TREE",
    "SPECTRUM2_TREE",
    "SPECTRUM3_TREE",
    "SPECTRUM4_TREE",
    "SPECTRUM5_TREE",
    "SPECTRUM6_TREE",
    "SPECTRUM7_TREE",
    "SPECTRUM8_TREE",
    "SPECTRUM9_TREE",
    "SPECTRUM10_TREE",
    "SPECTRUM11_TREE",
];

fn main() {
    println!("cargo:rerun-if-changed=src/huffman/codebooks.rs");
    println!("cargo:rerun-if-changed=build.rs");

    let mut out = String::new();
    out.push_str("// Generated by build.rs from codebooks.rs. Do not edit.\n\n");

    let mut max_len = 0usize;
    let mut codes_rows = Vec::new();
    for (book, (&bits, name)) in CODEBOOK_BITS.iter().zip(TREE_NAMES).enumerate() {
        let codes = assign_canonical(bits);
        let tree = build_tree(&codes, book);
        max_len = max_len.max(bits.iter().map(|&b| b as usize).max().unwrap());

        writeln!(out, "pub static {}: [[u16; 2]; {}] = [", name, tree.len()).unwrap();
        for row in tree.chunks(5) {
            out.push_str("    ");
            for node in row {
                write!(out, "[{}, {}], ", node[0], node[1]).unwrap();
            }
            out.push('\n');
        }
        out.push_str("];\n\n");

        let mut row = String::new();
        for &(code, len) in &codes {
            write!(row, "({code:#x}, {len}), ").unwrap();
        }
        codes_rows.push(format!(
            "static CODES_{book}: [(u32, u8); {}] = [{row}];",
            codes.len()
        ));
    }
    assert_eq!(max_len, MAX_CODEWORD_LEN, "codebooks changed; update MAX_CODEWORD_LEN");

    // The canonical (codeword, length) assignments, for the decode tests.
    out.push_str("#[cfg(test)]\nmod generated_codes {\n");
    for row in &codes_rows {
        out.push_str("    #[rustfmt::skip]\n    ");
        out.push_str(row);
        out.push('\n');
    }
    out.push_str("    pub(super) static CODEBOOK_CODES: [&[(u32, u8)]; 12] = [\n        ");
    for book in 0..12 {
        write!(out, "&CODES_{book}, ").unwrap();
    }
    out.push_str("\n    ];\n}\n");

    let out_dir = env::var("OUT_DIR").unwrap();
    fs::write(Path::new(&out_dir).join("huffman_trees.rs"), out).unwrap();
}

/// Canonical code assignment; the Kraft sum of every book is at most one,
/// so the running code can never overflow its length.
fn assign_canonical(bits: &[u8]) -> Vec<(u32, u8)> {
    let mut order: Vec<usize> = (0..bits.len()).collect();
    order.sort_by_key(|&i| (bits[i], i));

    let mut codes = vec![(0u32, 0u8); bits.len()];
    let mut code = 0u32;
    let mut prev_len = 0u8;
    for &i in &order {
        let len = bits[i];
        code <<= len - prev_len;
        assert!(code < 1 << len, "codebook oversubscribed at index {i}");
        codes[i] = (code, len);
        code += 1;
        prev_len = len;
    }
    codes
}

fn build_tree(codes: &[(u32, u8)], book: usize) -> Vec<[u16; 2]> {
    let mut tree: Vec<[u16; 2]> = vec![[0, 0]];
    for (index, &(code, len)) in codes.iter().enumerate() {
        let mut current = 0usize;
        let mut len = len as u32;
        while len > 0 {
            len -= 1;
            let branch = ((code >> len) & 1) as usize;
            let next = tree[current][branch];
            if next == 0 {
                if len == 0 {
                    tree[current][branch] = LEAF_BASE + index as u16;
                } else {
                    let node = tree.len() as u16;
                    assert!(node < LEAF_BASE, "codebook {book} tree too large");
                    tree[current][branch] = node;
                    tree.push([0, 0]);
                    current = node as usize;
                }
            } else {
                assert!(next < LEAF_BASE, "codebook {book} overwrites a leaf at index {index}");
                current = next as usize;
            }
        }
    }
    // Branches no codeword reaches fail the decode instead of looping.
    for node in &mut tree {
        for child in node.iter_mut() {
            if *child == 0 {
                *child = INVALID;
            }
        }
    }
    tree
}
