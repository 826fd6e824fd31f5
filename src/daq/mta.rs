//-----------------------------------------------------------------------------
// Module mta
// Memory transfer address and memory access abstraction

//-----------------------------------------------------------------------------

/// Memory transfer address
///
/// An opaque target memory handle: address extension plus 32 bit address.
/// The DAQ core never dereferences an MTA itself, resolution to readable
/// bytes is delegated to an [`MtaReader`] collaborator.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MtaAddress {
    pub ext: u8,
    pub address: u32,
}

impl MtaAddress {
    /// Address extension for standard (non paged) memory
    pub const EXT_DEFAULT: u8 = 0;

    pub const fn new(ext: u8, address: u32) -> MtaAddress {
        MtaAddress { ext, address }
    }

    /// The MTA advanced by `offset` bytes within the same extension
    pub fn add_offset(&self, offset: u32) -> MtaAddress {
        MtaAddress {
            ext: self.ext,
            address: self.address.wrapping_add(offset),
        }
    }
}

impl std::fmt::Display for MtaAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:0x{:08X}", self.ext, self.address)
    }
}

//-------------------------------------------------------------------------------------------------
// MtaReader

/// Fault indicator returned when an MTA range can not be resolved to readable memory
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("memory transfer address not accessible")]
pub struct MtaFault;

/// Memory access collaborator
///
/// Resolves an MTA to readable bytes, including any flash emulation or
/// address remapping the target provides. Implementations must fill the
/// complete destination slice or fail.
pub trait MtaReader {
    fn read(&self, mta: MtaAddress, dst: &mut [u8]) -> Result<(), MtaFault>;
}

// Any closure with the matching signature is a reader, convenient for tests and embedding
impl<F> MtaReader for F
where
    F: Fn(MtaAddress, &mut [u8]) -> Result<(), MtaFault>,
{
    fn read(&self, mta: MtaAddress, dst: &mut [u8]) -> Result<(), MtaFault> {
        self(mta, dst)
    }
}

//-------------------------------------------------------------------------------------------------
// SliceMemory

/// Maps a base address onto a byte slice, extension 0 only
///
/// Reads outside the slice or with a foreign address extension fault.
#[derive(Debug)]
pub struct SliceMemory<'a> {
    base: u32,
    data: &'a [u8],
}

impl<'a> SliceMemory<'a> {
    pub fn new(base: u32, data: &'a [u8]) -> SliceMemory<'a> {
        SliceMemory { base, data }
    }
}

impl MtaReader for SliceMemory<'_> {
    fn read(&self, mta: MtaAddress, dst: &mut [u8]) -> Result<(), MtaFault> {
        if mta.ext != MtaAddress::EXT_DEFAULT {
            return Err(MtaFault);
        }
        let start = mta.address.wrapping_sub(self.base) as usize;
        let end = start.checked_add(dst.len()).ok_or(MtaFault)?;
        let src = self.data.get(start..end).ok_or(MtaFault)?;
        dst.copy_from_slice(src);
        Ok(())
    }
}

//-------------------------------------------------------------------------------------------------
//-------------------------------------------------------------------------------------------------
// Test module

#[cfg(test)]
mod mta_tests {

    use super::*;

    #[test]
    fn test_slice_memory() {
        let mem = [0x11u8, 0x22, 0x33, 0x44];
        let reader = SliceMemory::new(0x1000, &mem);

        let mut buf = [0u8; 2];
        reader.read(MtaAddress::new(0, 0x1001), &mut buf).unwrap();
        assert_eq!(buf, [0x22, 0x33]);

        // Out of range
        assert_eq!(reader.read(MtaAddress::new(0, 0x1003), &mut buf), Err(MtaFault));
        // Below base wraps far out of range
        assert_eq!(reader.read(MtaAddress::new(0, 0x0FFF), &mut buf), Err(MtaFault));
        // Foreign address extension
        assert_eq!(reader.read(MtaAddress::new(1, 0x1000), &mut buf), Err(MtaFault));
    }

    #[test]
    fn test_closure_reader() {
        let reader = |mta: MtaAddress, dst: &mut [u8]| {
            dst.fill(mta.ext);
            Ok(())
        };
        let mut buf = [0u8; 3];
        reader.read(MtaAddress::new(7, 0), &mut buf).unwrap();
        assert_eq!(buf, [7, 7, 7]);
    }

    #[test]
    fn test_add_offset() {
        let mta = MtaAddress::new(2, 0x100);
        assert_eq!(mta.add_offset(8), MtaAddress::new(2, 0x108));
    }
}
