use bytes_util::BitCursor;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

/// Sampling Frequency Index
///
/// ISO/IEC 13818-7 encodes the commonly used frequencies in 4 bits; this is
/// that table. The transmuxer only accepts the broadcast set (48/44.1/32 kHz).
#[derive(FromPrimitive, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SampleFrequencyIndex {
    /// 96000 Hz
    Freq96000 = 0x0,
    /// 88200 Hz
    Freq88200 = 0x1,
    /// 64000 Hz
    Freq64000 = 0x2,
    /// 48000 Hz
    Freq48000 = 0x3,
    /// 44100 Hz
    Freq44100 = 0x4,
    /// 32000 Hz
    Freq32000 = 0x5,
    /// 24000 Hz
    Freq24000 = 0x6,
    /// 22050 Hz
    Freq22050 = 0x7,
    /// 16000 Hz
    Freq16000 = 0x8,
    /// 12000 Hz
    Freq12000 = 0x9,
    /// 11025 Hz
    Freq11025 = 0xa,
    /// 8000 Hz
    Freq8000 = 0xb,
    /// 7350 Hz
    Freq7350 = 0xc,
    /// Reserved
    FreqReserved = 0xd,
    /// Reserved
    FreqReserved2 = 0xe,
    /// Escape (the frequency is carried as an explicit 24-bit value)
    FreqEscape = 0xf,
}

impl SampleFrequencyIndex {
    /// The actual frequency in Hz, when the index maps to one.
    pub const fn to_freq(self) -> Option<u32> {
        match self {
            SampleFrequencyIndex::Freq96000 => Some(96000),
            SampleFrequencyIndex::Freq88200 => Some(88200),
            SampleFrequencyIndex::Freq64000 => Some(64000),
            SampleFrequencyIndex::Freq48000 => Some(48000),
            SampleFrequencyIndex::Freq44100 => Some(44100),
            SampleFrequencyIndex::Freq32000 => Some(32000),
            SampleFrequencyIndex::Freq24000 => Some(24000),
            SampleFrequencyIndex::Freq22050 => Some(22050),
            SampleFrequencyIndex::Freq16000 => Some(16000),
            SampleFrequencyIndex::Freq12000 => Some(12000),
            SampleFrequencyIndex::Freq11025 => Some(11025),
            SampleFrequencyIndex::Freq8000 => Some(8000),
            SampleFrequencyIndex::Freq7350 => Some(7350),
            _ => None,
        }
    }
}

/// The fixed+variable ADTS frame header (ISO/IEC 13818-7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdtsHeader {
    pub protection_absent: bool,
    pub sampling_frequency_index: SampleFrequencyIndex,
    pub channel_configuration: u8,
    /// Total frame length in bytes, header included.
    pub frame_length: usize,
    /// number_of_raw_data_blocks_in_frame (one less than the block count)
    pub blocks_in_frame: u8,
}

impl AdtsHeader {
    /// Header size in bytes (the optional CRC words are not part of it).
    pub const SIZE: usize = 7;

    /// Bit offset of the first raw data block (or of the error check when
    /// protection is present).
    pub const BODY_POS: usize = Self::SIZE * 8;

    /// Parses the 7-byte header at the start of `data`. Returns `None` when
    /// the sync word is missing or the slice is too short.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE || data[0] != 0xff || data[1] & 0xf0 != 0xf0 {
            return None;
        }
        let mut cur = BitCursor::new(data);
        cur.set_pos(12); // syncword
        cur.skip(3); // ID, layer
        let protection_absent = cur.read_bit();
        cur.skip(2); // profile
        let sampling_frequency_index =
            SampleFrequencyIndex::from_u32(cur.read_bits(4)).expect("4-bit index");
        cur.skip(1); // private_bit
        let channel_configuration = cur.read_bits(3) as u8;
        cur.skip(4); // original/copy, home, copyright id bits
        let frame_length = cur.read_bits(13) as usize;
        cur.skip(11); // adts_buffer_fullness
        let blocks_in_frame = cur.read_bits(2) as u8;
        Some(Self {
            protection_absent,
            sampling_frequency_index,
            channel_configuration,
            frame_length,
            blocks_in_frame,
        })
    }
}
