//-----------------------------------------------------------------------------
// Module checksum
// Incremental checksum engine for memory image validation
//
// The algorithm is selected once at build time via cargo features and
// fixes the width of the checksum scalar. All state is passed explicitly
// between calls, so a checksum can be computed incrementally across non
// contiguous memory regions or emulated flash block boundaries:
//
//   compute(A ++ B, init, true) == compute(B, compute(A, init, true), false)
//
// holds bit exact for every algorithm. The word based ADD variants
// require block sizes and chunk boundaries that are multiples of the
// word size.

//-----------------------------------------------------------------------------

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::daq::{MtaAddress, MtaFault, MtaReader};

//-------------------------------------------------------------------------------------------------
// ChecksumAlgorithm

/// A build time selectable checksum algorithm
///
/// `Value` fixes the accumulator width (u8, u16 or u32).
pub trait ChecksumAlgorithm {
    type Value: Copy + Default + PartialEq + std::fmt::Debug + std::fmt::UpperHex;

    const NAME: &'static str;

    /// Checksum `data`, continuing from `start_value` unless `first_call`
    /// selects the algorithm's defined initial value instead.
    fn compute(data: &[u8], start_value: Self::Value, first_call: bool) -> Self::Value;
}

/// Checksum with the build time selected default algorithm
pub fn checksum(data: &[u8], start_value: ChecksumValue, first_call: bool) -> ChecksumValue {
    DefaultChecksum::compute(data, start_value, first_call)
}

//-------------------------------------------------------------------------------------------------
// CRC table generation

const fn reflect(data: u32, n_bits: u32) -> u32 {
    let mut reflection = 0u32;
    let mut bit = 0;
    let mut data = data;
    while bit < n_bits {
        if data & 0x01 != 0 {
            reflection |= 1 << ((n_bits - 1) - bit);
        }
        data >>= 1;
        bit += 1;
    }
    reflection
}

const fn crc16_table_msb(poly: u16) -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut idx = 0;
    while idx < 256 {
        let mut crc = (idx as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000 != 0 { (crc << 1) ^ poly } else { crc << 1 };
            bit += 1;
        }
        table[idx] = crc;
        idx += 1;
    }
    table
}

const fn crc16_table_lsb(poly: u16) -> [u16; 256] {
    let poly = reflect(poly as u32, 16) as u16;
    let mut table = [0u16; 256];
    let mut idx = 0;
    while idx < 256 {
        let mut crc = idx as u16;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ poly } else { crc >> 1 };
            bit += 1;
        }
        table[idx] = crc;
        idx += 1;
    }
    table
}

const fn crc32_table_lsb(poly: u32) -> [u32; 256] {
    let poly = reflect(poly, 32);
    let mut table = [0u32; 256];
    let mut idx = 0;
    while idx < 256 {
        let mut crc = idx as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ poly } else { crc >> 1 };
            bit += 1;
        }
        table[idx] = crc;
        idx += 1;
    }
    table
}

//-------------------------------------------------------------------------------------------------
// CRC algorithms
//
// The reflected variants keep their state in reflected form throughout,
// the final XOR is applied on return and removed again when a call
// resumes from a previous result, which makes chained calls exactly
// equivalent to one pass over the concatenated data.

/// CRC-16, polynomial 0x8005 reflected, check value 0xBB3D
pub struct Crc16;

impl Crc16 {
    const TABLE: [u16; 256] = crc16_table_lsb(0x8005);
    const INITIAL: u16 = 0x0000;
    const FINAL_XOR: u16 = 0x0000;
}

impl ChecksumAlgorithm for Crc16 {
    type Value = u16;
    const NAME: &'static str = "CRC-16";

    fn compute(data: &[u8], start_value: u16, first_call: bool) -> u16 {
        let mut state = if first_call { Self::INITIAL } else { start_value ^ Self::FINAL_XOR };
        for &byte in data {
            state = Self::TABLE[((state ^ byte as u16) & 0xFF) as usize] ^ (state >> 8);
        }
        state ^ Self::FINAL_XOR
    }
}

/// CRC-16-CCITT, polynomial 0x1021, initial value 0xFFFF, check value 0x29B1
pub struct Crc16Ccitt;

impl Crc16Ccitt {
    const TABLE: [u16; 256] = crc16_table_msb(0x1021);
    const INITIAL: u16 = 0xFFFF;
}

impl ChecksumAlgorithm for Crc16Ccitt {
    type Value = u16;
    const NAME: &'static str = "CRC-CCITT";

    fn compute(data: &[u8], start_value: u16, first_call: bool) -> u16 {
        let mut state = if first_call { Self::INITIAL } else { start_value };
        for &byte in data {
            state = Self::TABLE[(((state >> 8) ^ byte as u16) & 0xFF) as usize] ^ (state << 8);
        }
        state
    }
}

/// CRC-32, polynomial 0x04C11DB7 reflected, check value 0xCBF43926
pub struct Crc32;

impl Crc32 {
    const TABLE: [u32; 256] = crc32_table_lsb(0x04C11DB7);
    const INITIAL: u32 = 0xFFFFFFFF;
    const FINAL_XOR: u32 = 0xFFFFFFFF;
}

impl ChecksumAlgorithm for Crc32 {
    type Value = u32;
    const NAME: &'static str = "CRC-32";

    fn compute(data: &[u8], start_value: u32, first_call: bool) -> u32 {
        let mut state = if first_call { Self::INITIAL } else { start_value ^ Self::FINAL_XOR };
        for &byte in data {
            state = Self::TABLE[((state ^ byte as u32) & 0xFF) as usize] ^ (state >> 8);
        }
        state ^ Self::FINAL_XOR
    }
}

//-------------------------------------------------------------------------------------------------
// Additive algorithms
//
// ADD_11/12/14 add bytes, ADD_22/24 add 16 bit words, ADD_44 adds 32 bit
// words, always little endian, overflows are ignored. Trailing bytes that
// do not fill a word are ignored, block sizes must be multiples of the
// word size.

/// Add BYTE into a BYTE checksum
pub struct Add11;

impl ChecksumAlgorithm for Add11 {
    type Value = u8;
    const NAME: &'static str = "ADD_11";

    fn compute(data: &[u8], start_value: u8, first_call: bool) -> u8 {
        let mut result = if first_call { 0 } else { start_value };
        for &byte in data {
            result = result.wrapping_add(byte);
        }
        result
    }
}

/// Add BYTE into a WORD checksum
pub struct Add12;

impl ChecksumAlgorithm for Add12 {
    type Value = u16;
    const NAME: &'static str = "ADD_12";

    fn compute(data: &[u8], start_value: u16, first_call: bool) -> u16 {
        let mut result = if first_call { 0 } else { start_value };
        for &byte in data {
            result = result.wrapping_add(byte as u16);
        }
        result
    }
}

/// Add BYTE into a DWORD checksum
pub struct Add14;

impl ChecksumAlgorithm for Add14 {
    type Value = u32;
    const NAME: &'static str = "ADD_14";

    fn compute(data: &[u8], start_value: u32, first_call: bool) -> u32 {
        let mut result = if first_call { 0 } else { start_value };
        for &byte in data {
            result = result.wrapping_add(byte as u32);
        }
        result
    }
}

/// Add WORD into a WORD checksum
pub struct Add22;

impl ChecksumAlgorithm for Add22 {
    type Value = u16;
    const NAME: &'static str = "ADD_22";

    fn compute(data: &[u8], start_value: u16, first_call: bool) -> u16 {
        let mut result = if first_call { 0 } else { start_value };
        for word in data.chunks_exact(2) {
            result = result.wrapping_add(u16::from_le_bytes([word[0], word[1]]));
        }
        result
    }
}

/// Add WORD into a DWORD checksum
pub struct Add24;

impl ChecksumAlgorithm for Add24 {
    type Value = u32;
    const NAME: &'static str = "ADD_24";

    fn compute(data: &[u8], start_value: u32, first_call: bool) -> u32 {
        let mut result = if first_call { 0 } else { start_value };
        for word in data.chunks_exact(2) {
            result = result.wrapping_add(u16::from_le_bytes([word[0], word[1]]) as u32);
        }
        result
    }
}

/// Add DWORD into a DWORD checksum
pub struct Add44;

impl ChecksumAlgorithm for Add44 {
    type Value = u32;
    const NAME: &'static str = "ADD_44";

    fn compute(data: &[u8], start_value: u32, first_call: bool) -> u32 {
        let mut result = if first_call { 0 } else { start_value };
        for word in data.chunks_exact(4) {
            result = result.wrapping_add(u32::from_le_bytes([word[0], word[1], word[2], word[3]]));
        }
        result
    }
}

//-------------------------------------------------------------------------------------------------
// Build time algorithm selection

#[cfg(feature = "crc32")]
pub type DefaultChecksum = Crc32;

#[cfg(all(feature = "crc16", not(feature = "crc32")))]
pub type DefaultChecksum = Crc16;

#[cfg(all(feature = "crc16_ccitt", not(any(feature = "crc32", feature = "crc16"))))]
pub type DefaultChecksum = Crc16Ccitt;

#[cfg(all(feature = "add44", not(any(feature = "crc32", feature = "crc16", feature = "crc16_ccitt"))))]
pub type DefaultChecksum = Add44;

#[cfg(all(feature = "add24", not(any(feature = "crc32", feature = "crc16", feature = "crc16_ccitt", feature = "add44"))))]
pub type DefaultChecksum = Add24;

#[cfg(all(feature = "add22", not(any(feature = "crc32", feature = "crc16", feature = "crc16_ccitt", feature = "add44", feature = "add24"))))]
pub type DefaultChecksum = Add22;

#[cfg(all(feature = "add14", not(any(feature = "crc32", feature = "crc16", feature = "crc16_ccitt", feature = "add44", feature = "add24", feature = "add22"))))]
pub type DefaultChecksum = Add14;

#[cfg(all(feature = "add12", not(any(feature = "crc32", feature = "crc16", feature = "crc16_ccitt", feature = "add44", feature = "add24", feature = "add22", feature = "add14"))))]
pub type DefaultChecksum = Add12;

#[cfg(all(feature = "add11", not(any(feature = "crc32", feature = "crc16", feature = "crc16_ccitt", feature = "add44", feature = "add24", feature = "add22", feature = "add14", feature = "add12"))))]
pub type DefaultChecksum = Add11;

#[cfg(not(any(
    feature = "crc32",
    feature = "crc16",
    feature = "crc16_ccitt",
    feature = "add44",
    feature = "add24",
    feature = "add22",
    feature = "add14",
    feature = "add12",
    feature = "add11"
)))]
pub type DefaultChecksum = Crc16Ccitt;

/// Checksum scalar of the build time selected algorithm
pub type ChecksumValue = <DefaultChecksum as ChecksumAlgorithm>::Value;

//-------------------------------------------------------------------------------------------------
// ChecksumJob
// Chunked background calculation over a target memory range, advanced one
// chunk per main loop tick so lengthy CRC calculations do not stall the
// command processor

/// Bytes checksummed per [`ChecksumJob::step`] call
pub const CHECKSUM_CHUNK_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobState {
    Idle,
    RunningInitial,
    RunningRemaining,
}

/// Background checksum calculation over an MTA range
pub struct ChecksumJob<A: ChecksumAlgorithm = DefaultChecksum> {
    state: JobState,
    mta: MtaAddress,
    remaining: u32,
    interim: A::Value,
}

impl<A: ChecksumAlgorithm> Default for ChecksumJob<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: ChecksumAlgorithm> ChecksumJob<A> {
    pub fn new() -> ChecksumJob<A> {
        ChecksumJob {
            state: JobState::Idle,
            mta: MtaAddress::new(0, 0),
            remaining: 0,
            interim: A::Value::default(),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state == JobState::Idle
    }

    /// Start a calculation over `size` bytes at `mta`
    ///
    /// False if a job is already running or `size` is zero.
    pub fn start(&mut self, mta: MtaAddress, size: u32) -> bool {
        if self.state != JobState::Idle || size == 0 {
            return false;
        }
        debug!("checksum job start: {} mta={} size={}", A::NAME, mta, size);
        self.state = JobState::RunningInitial;
        self.mta = mta;
        self.remaining = size;
        true
    }

    /// Advance the calculation by one chunk
    ///
    /// Returns Ok(None) while running, Ok(Some(value)) on completion. A
    /// memory fault aborts the job.
    pub fn step(&mut self, mem: &impl MtaReader) -> Result<Option<A::Value>, MtaFault> {
        if self.state == JobState::Idle {
            return Ok(None);
        }
        let chunk = (self.remaining as usize).min(CHECKSUM_CHUNK_SIZE);
        let mut buffer = [0u8; CHECKSUM_CHUNK_SIZE];
        if let Err(fault) = mem.read(self.mta, &mut buffer[..chunk]) {
            warn!("checksum job aborted, mta {} not accessible", self.mta);
            self.state = JobState::Idle;
            return Err(fault);
        }
        let first_call = self.state == JobState::RunningInitial;
        self.interim = A::compute(&buffer[..chunk], self.interim, first_call);
        self.state = JobState::RunningRemaining;
        self.mta = self.mta.add_offset(chunk as u32);
        self.remaining -= chunk as u32;
        if self.remaining == 0 {
            self.state = JobState::Idle;
            debug!("checksum job done: 0x{:X}", self.interim);
            return Ok(Some(self.interim));
        }
        Ok(None)
    }
}

//-------------------------------------------------------------------------------------------------
//-------------------------------------------------------------------------------------------------
// Test module
