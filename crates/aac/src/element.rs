//! Raw-data-block syntax walking (ISO/IEC 14496-3).
//!
//! The walker reads exactly as many bits as each syntax element occupies so
//! the transmuxer learns where channel elements begin and end. Coefficient
//! values are discarded; only their bit widths matter here.

use bytes_util::BitCursor;

use crate::huffman;

pub(crate) const ID_SCE: u32 = 0;
pub(crate) const ID_CPE: u32 = 1;
const ID_DSE: u32 = 4;
const ID_PCE: u32 = 5;
const ID_FIL: u32 = 6;
pub(crate) const ID_END: u32 = 7;

const ONLY_LONG_SEQUENCE: u32 = 0;
const LONG_START_SEQUENCE: u32 = 1;
const EIGHT_SHORT_SEQUENCE: u32 = 2;

const ZERO_HCB: u32 = 0;
const FIRST_PAIR_HCB: u32 = 5;
const ESC_HCB: u32 = 11;
const NOISE_HCB: u32 = 13;

const EXT_DYNAMIC_RANGE: u32 = 11;
const EXT_SBR_DATA: u32 = 13;
const EXT_SBR_DATA_CRC: u32 = 14;

const PRED_SFB_MAX: usize = 40;

static SWB_OFFSET_LONG_WINDOW_48KHZ: [u16; 64] = [
    0, 4, 8, 12, 16, 20, 24, 28, 32, 36, 40, 48, 56, 64, 72, 80, 88, 96, 108, 120, 132, 144, 160,
    176, 196, 216, 240, 264, 292, 320, 352, 384, 416, 448, 480, 512, 544, 576, 608, 640, 672, 704,
    736, 768, 800, 832, 864, 896, 928, 1024,
    // padding
    1024, 1024, 1024, 1024, 1024, 1024, 1024, 1024, 1024, 1024, 1024, 1024, 1024, 1024,
];

static SWB_OFFSET_LONG_WINDOW_32KHZ: [u16; 64] = [
    0, 4, 8, 12, 16, 20, 24, 28, 32, 36, 40, 48, 56, 64, 72, 80, 88, 96, 108, 120, 132, 144, 160,
    176, 196, 216, 240, 264, 292, 320, 352, 384, 416, 448, 480, 512, 544, 576, 608, 640, 672, 704,
    736, 768, 800, 832, 864, 896, 928, 960, 992, 1024,
    // padding
    1024, 1024, 1024, 1024, 1024, 1024, 1024, 1024, 1024, 1024, 1024, 1024,
];

static SWB_OFFSET_SHORT_WINDOW_48KHZ: [u16; 16] = [
    0, 4, 8, 12, 16, 20, 28, 36, 44, 56, 68, 80, 96, 112, 128,
    // padding
    128,
];

fn check_overrun(len_bytes: usize, cur: &BitCursor) -> bool {
    !cur.is_overrun(len_bytes)
}

/// Walks a single_channel_element including its individual_channel_stream.
/// Returns false on overrun or unsupported syntax.
fn single_channel_element(cur: &mut BitCursor, len_bytes: usize, is_32khz: bool) -> bool {
    cur.skip(4); // element_instance_tag

    // individual_channel_stream(0)
    cur.skip(8); // global_gain

    // ics_info
    cur.skip(1); // ics_reserved_bit
    let window_sequence = cur.read_bits(2);
    cur.skip(1); // window_shape
    let max_sfb;
    let mut num_window_groups = 1usize;
    let mut window_group_length = [1u32; 8];
    if window_sequence == EIGHT_SHORT_SEQUENCE {
        max_sfb = cur.read_bits(4) as usize;
        let scale_factor_grouping = cur.read_bits(7);
        for i in (0..7).rev() {
            if (scale_factor_grouping >> i) & 1 != 0 {
                window_group_length[num_window_groups - 1] += 1;
            } else {
                window_group_length[num_window_groups] = 1;
                num_window_groups += 1;
            }
        }
    } else {
        max_sfb = cur.read_bits(6) as usize;
        let predictor_data_present = cur.read_bit();
        if predictor_data_present {
            let predictor_reset = cur.read_bit();
            if predictor_reset {
                cur.skip(5);
            }
            cur.skip(max_sfb.min(PRED_SFB_MAX));
        }
    }

    // Determine sect_sfb_offset
    let num_windows;
    let mut sect_sfb_offset = [[0u32; 64]; 8];
    if window_sequence == EIGHT_SHORT_SEQUENCE {
        num_windows = 8;
        for g in 0..num_window_groups {
            let mut offset = 0u32;
            for i in 0..max_sfb {
                sect_sfb_offset[g][i] = offset;
                offset += (SWB_OFFSET_SHORT_WINDOW_48KHZ[i + 1] - SWB_OFFSET_SHORT_WINDOW_48KHZ[i])
                    as u32
                    * window_group_length[g];
            }
            sect_sfb_offset[g][max_sfb] = offset;
        }
    } else {
        num_windows = 1;
        let table = if is_32khz {
            &SWB_OFFSET_LONG_WINDOW_32KHZ
        } else {
            &SWB_OFFSET_LONG_WINDOW_48KHZ
        };
        for (dst, &src) in sect_sfb_offset[0].iter_mut().zip(&table[..max_sfb + 1]) {
            *dst = src as u32;
        }
    }

    // section_data
    let mut num_sec = [0usize; 8];
    let mut sect_cb = [[0u32; 64]; 8];
    let mut sect_end = [[0usize; 64]; 8];
    let mut sfb_cb = [[0u32; 64]; 8];
    let sect_len_incr_bits = if window_sequence == EIGHT_SHORT_SEQUENCE { 3 } else { 5 };
    let sect_esc_val = if window_sequence == EIGHT_SHORT_SEQUENCE { 7 } else { 31 };
    for g in 0..num_window_groups {
        let mut i = 0usize;
        let mut k = 0usize;
        while k < max_sfb {
            if i >= 64 || !check_overrun(len_bytes, cur) {
                return false;
            }
            sect_cb[g][i] = cur.read_bits(4);
            let mut sect_len = 0usize;
            loop {
                if !check_overrun(len_bytes, cur) {
                    return false;
                }
                let sect_len_incr = cur.read_bits(sect_len_incr_bits) as usize;
                sect_len += sect_len_incr;
                if k + sect_len > max_sfb {
                    return false;
                }
                if sect_len_incr != sect_esc_val {
                    break;
                }
            }
            if sect_len == 0 {
                return false;
            }
            for sfb in k..k + sect_len {
                sfb_cb[g][sfb] = sect_cb[g][i];
            }
            k += sect_len;
            sect_end[g][i] = k;
            i += 1;
        }
        num_sec[g] = i;
    }

    // scale_factor_data; the noise PCM branch fires once per element,
    // shared across window groups
    let mut noise_pcm_flag = true;
    for g in 0..num_window_groups {
        for sfb in 0..max_sfb {
            if sfb_cb[g][sfb] != ZERO_HCB {
                if !check_overrun(len_bytes, cur) {
                    return false;
                }
                if sfb_cb[g][sfb] == NOISE_HCB && noise_pcm_flag {
                    noise_pcm_flag = false;
                    cur.skip(9);
                } else if huffman::decode_scalefactor(cur).is_none() {
                    return false;
                }
            }
        }
    }

    if !check_overrun(len_bytes, cur) {
        return false;
    }
    let pulse_data_present = cur.read_bit();
    if pulse_data_present {
        // pulse_data
        let number_pulse = cur.read_bits(2);
        cur.skip(6 + 9 * (number_pulse as usize + 1));
    }

    if !check_overrun(len_bytes, cur) {
        return false;
    }
    let tns_data_present = cur.read_bit();
    if tns_data_present {
        // tns_data
        let n_filt_bits = if window_sequence == EIGHT_SHORT_SEQUENCE { 1 } else { 2 };
        let length_bits = if window_sequence == EIGHT_SHORT_SEQUENCE { 4 } else { 6 };
        let order_bits = if window_sequence == EIGHT_SHORT_SEQUENCE { 3 } else { 5 };
        for _ in 0..num_windows {
            if !check_overrun(len_bytes, cur) {
                return false;
            }
            let n_filt = cur.read_bits(n_filt_bits);
            let mut coef_res = 0;
            if n_filt != 0 {
                coef_res = cur.read_bits(1);
            }
            for _ in 0..n_filt {
                cur.skip(length_bits as usize);
                if !check_overrun(len_bytes, cur) {
                    return false;
                }
                let order = cur.read_bits(order_bits);
                if order != 0 {
                    cur.skip(1); // direction
                    let coef_compress = cur.read_bits(1);
                    cur.skip((3 + coef_res - coef_compress) as usize * order as usize);
                }
            }
        }
    }

    if !check_overrun(len_bytes, cur) {
        return false;
    }
    let gain_control_data_present = cur.read_bit();
    if gain_control_data_present {
        // gain_control_data (ISO/IEC 13818-7 8.3.2)
        let max_band = cur.read_bits(2);
        let wd_count = match window_sequence {
            ONLY_LONG_SEQUENCE => 1,
            EIGHT_SHORT_SEQUENCE => 8,
            _ => 2,
        };
        for _ in 1..=max_band {
            for wd in 0..wd_count {
                if !check_overrun(len_bytes, cur) {
                    return false;
                }
                let adjust_num = cur.read_bits(3);
                let adjust_bits = match window_sequence {
                    ONLY_LONG_SEQUENCE => 9,
                    EIGHT_SHORT_SEQUENCE => 6,
                    LONG_START_SEQUENCE => {
                        if wd == 0 {
                            8
                        } else {
                            6
                        }
                    }
                    _ => {
                        if wd == 0 {
                            8
                        } else {
                            9
                        }
                    }
                };
                cur.skip(adjust_bits * adjust_num as usize);
            }
        }
    }

    if !check_overrun(len_bytes, cur) {
        return false;
    }
    // spectral_data
    for g in 0..num_window_groups {
        let mut sect_start = 0usize;
        for i in 0..num_sec[g] {
            let codebook = sect_cb[g][i];
            if codebook == ZERO_HCB || codebook > ESC_HCB {
                sect_start = sect_end[g][i];
                continue;
            }
            let coef_end = sect_sfb_offset[g][sect_end[g][i]];
            let mut k = sect_sfb_offset[g][sect_start];
            while k < coef_end {
                if !check_overrun(len_bytes, cur) {
                    return false;
                }
                if codebook < FIRST_PAIR_HCB {
                    let Some(quad) = huffman::decode_spectrum_quad(codebook, cur) else {
                        return false;
                    };
                    if quad.is_unsigned {
                        for value in [quad.w, quad.x, quad.y, quad.z] {
                            if value != 0 {
                                cur.skip(1);
                            }
                        }
                    }
                    k += 4;
                } else {
                    let Some(pair) = huffman::decode_spectrum_pair(codebook, cur) else {
                        return false;
                    };
                    if pair.is_unsigned {
                        for value in [pair.y, pair.z] {
                            if value != 0 {
                                cur.skip(1);
                            }
                        }
                    }
                    k += 2;
                    if codebook == ESC_HCB {
                        for value in [pair.y, pair.z] {
                            if value == huffman::ESC_FLAG {
                                let mut count = 0;
                                while cur.read_bit() {
                                    count += 1;
                                    if count > 8 {
                                        return false;
                                    }
                                }
                                cur.skip(count + 4);
                            }
                        }
                    }
                }
            }
            sect_start = sect_end[g][i];
        }
    }
    true
}

fn data_stream_element(cur: &mut BitCursor) {
    cur.skip(4); // element_instance_tag
    let data_byte_align_flag = cur.read_bit();
    let mut cnt = cur.read_bits(8) as usize;
    if cnt == 255 {
        cnt += cur.read_bits(8) as usize;
    }
    if data_byte_align_flag {
        cur.byte_align();
    }
    cur.skip(8 * cnt);
}

fn program_config_element(cur: &mut BitCursor, len_bytes: usize) -> bool {
    cur.skip(10); // element_instance_tag, object_type, sampling_frequency_index
    let num_front_channel_elements = cur.read_bits(4) as usize;
    let num_side_channel_elements = cur.read_bits(4) as usize;
    let num_back_channel_elements = cur.read_bits(4) as usize;
    let num_lfe_channel_elements = cur.read_bits(2) as usize;
    let num_assoc_data_elements = cur.read_bits(3) as usize;
    let num_valid_cc_elements = cur.read_bits(4) as usize;
    if cur.read_bit() {
        cur.skip(4); // mono_mixdown_element_number
    }
    if cur.read_bit() {
        cur.skip(4); // stereo_mixdown_element_number
    }
    if cur.read_bit() {
        cur.skip(3); // matrix_mixdown_idx, pseudo_surround_enable
    }
    cur.skip(5 * num_front_channel_elements);
    cur.skip(5 * num_side_channel_elements);
    cur.skip(5 * num_back_channel_elements);
    cur.skip(4 * num_lfe_channel_elements);
    cur.skip(4 * num_assoc_data_elements);
    cur.skip(5 * num_valid_cc_elements);

    if !check_overrun(len_bytes, cur) {
        return false;
    }
    cur.byte_align();
    let comment_field_bytes = cur.read_bits(8) as usize;
    cur.skip(8 * comment_field_bytes);
    true
}

/// Refuses fill payloads whose extension types the transmux cannot carry
/// (dynamic range control and SBR).
fn fill_element(cur: &mut BitCursor) -> bool {
    let mut cnt = cur.read_bits(4) as usize;
    if cnt == 15 {
        cnt += cur.read_bits(8) as usize - 1;
    }
    if cnt > 0 {
        // extension_payload
        let extension_type = cur.read_bits(4);
        if extension_type == EXT_DYNAMIC_RANGE
            || extension_type == EXT_SBR_DATA
            || extension_type == EXT_SBR_DATA_CRC
        {
            return false;
        }
        cur.skip(8 * (cnt - 1) + 4);
    }
    true
}

/// Reads one syntactic element and returns its id, or `None` when the
/// element is malformed, overruns `len_bytes`, or is unsupported.
pub(crate) fn raw_data_block(cur: &mut BitCursor, len_bytes: usize, is_32khz: bool) -> Option<u32> {
    if !check_overrun(len_bytes, cur) {
        return None;
    }
    let id = cur.read_bits(3);
    match id {
        ID_SCE => single_channel_element(cur, len_bytes, is_32khz).then_some(id),
        ID_DSE => {
            data_stream_element(cur);
            Some(id)
        }
        ID_PCE => program_config_element(cur, len_bytes).then_some(id),
        ID_FIL => fill_element(cur).then_some(id),
        ID_END => Some(id),
        _ => None,
    }
}

/// Appends a minimal SCE (long window, max_sfb 0, no optional data) for the
/// transmux tests.
#[cfg(test)]
pub(crate) fn put_minimal_sce(sink: &mut bytes_util::BitSink, instance_tag: u32) {
    sink.put_bits(ID_SCE, 3);
    sink.put_bits(instance_tag, 4);
    sink.put_bits(0x80, 8); // global_gain
    sink.put_bits(0, 1); // ics_reserved_bit
    sink.put_bits(ONLY_LONG_SEQUENCE, 2);
    sink.put_bits(0, 1); // window_shape
    sink.put_bits(0, 6); // max_sfb = 0
    sink.put_bits(0, 1); // predictor_data_present
    sink.put_bits(0, 1); // pulse_data_present
    sink.put_bits(0, 1); // tns_data_present
    sink.put_bits(0, 1); // gain_control_data_present
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes_util::BitSink;

    #[test]
    fn test_minimal_sce_parses() {
        let mut sink = BitSink::new();
        put_minimal_sce(&mut sink, 0);
        sink.put_bits(ID_END, 3);
        let bytes = sink.into_bytes();
        let mut cur = BitCursor::new(&bytes);
        assert_eq!(raw_data_block(&mut cur, bytes.len(), false), Some(ID_SCE));
        assert_eq!(raw_data_block(&mut cur, bytes.len(), false), Some(ID_END));
    }

    #[test]
    fn test_dse_skips_payload() {
        let mut sink = BitSink::new();
        sink.put_bits(ID_DSE, 3);
        sink.put_bits(0, 4); // element_instance_tag
        sink.put_bits(1, 1); // data_byte_align_flag
        sink.put_bits(3, 8); // count
        sink.align();
        sink.put_bytes(&[0xaa, 0xbb, 0xcc]);
        sink.put_bits(ID_END, 3);
        let bytes = sink.into_bytes();
        let mut cur = BitCursor::new(&bytes);
        assert_eq!(raw_data_block(&mut cur, bytes.len(), false), Some(ID_DSE));
        assert_eq!(raw_data_block(&mut cur, bytes.len(), false), Some(ID_END));
    }

    #[test]
    fn test_fil_refuses_sbr() {
        let mut sink = BitSink::new();
        sink.put_bits(ID_FIL, 3);
        sink.put_bits(2, 4); // count
        sink.put_bits(EXT_SBR_DATA, 4);
        sink.put_bits(0, 12);
        let bytes = sink.into_bytes();
        let mut cur = BitCursor::new(&bytes);
        assert_eq!(raw_data_block(&mut cur, bytes.len(), false), None);
    }

    #[test]
    fn test_cpe_id_is_not_walked_here() {
        let mut sink = BitSink::new();
        sink.put_bits(ID_CPE, 3);
        sink.put_bits(0, 13);
        let bytes = sink.into_bytes();
        let mut cur = BitCursor::new(&bytes);
        assert_eq!(raw_data_block(&mut cur, bytes.len(), false), None);
    }

    #[test]
    fn test_overrun_is_detected() {
        let mut sink = BitSink::new();
        put_minimal_sce(&mut sink, 0);
        let bytes = sink.into_bytes();
        // claim a shorter logical length than the element needs
        let mut cur = BitCursor::new(&bytes);
        assert_eq!(raw_data_block(&mut cur, 1, false), None);
    }
}
