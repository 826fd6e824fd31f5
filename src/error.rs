//-----------------------------------------------------------------------------
// Module error
// DAQ error taxonomy and XCP wire error codes

//-----------------------------------------------------------------------------

/// XCP response code for a successful command
/// Deliberately distinct from all error codes, which are small integers
pub const ERR_SUCCESS: u8 = 0xFF;

// XCP error codes used by the DAQ core, from the XCP protocol error table
pub const ERR_OUT_OF_RANGE: u8 = 0x22;
pub const ERR_SEQUENCE: u8 = 0x29;
pub const ERR_DAQ_CONFIG: u8 = 0x2A;
pub const ERR_MEMORY_OVERFLOW: u8 = 0x30;

/// Errors returned by the DAQ entity allocator and processor state machine
///
/// Every operation is total: invalid input yields one of these values,
/// never a panic. All variants are recoverable, the caller decides the
/// next legal operation (typically `free_daq` to restart configuration).
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaqError {
    /// Operation invoked in an allocation phase or processor state where it is not permitted
    #[error("sequence error, operation not permitted in current state")]
    Sequence,

    /// Entity pool capacity exceeded, no partial state change
    #[error("memory overflow, DAQ entity pool exhausted")]
    MemoryOverflow,

    /// Index or parameter outside the configured bounds
    #[error("parameter out of range")]
    OutOfRange,

    /// DAQ configuration is not valid for measurement
    #[error("DAQ configuration not valid")]
    DaqConfig,
}

impl DaqError {
    /// The XCP wire error code for this error
    pub fn code(&self) -> u8 {
        match self {
            DaqError::Sequence => ERR_SEQUENCE,
            DaqError::MemoryOverflow => ERR_MEMORY_OVERFLOW,
            DaqError::OutOfRange => ERR_OUT_OF_RANGE,
            DaqError::DaqConfig => ERR_DAQ_CONFIG,
        }
    }
}

pub type DaqResult<T> = Result<T, DaqError>;

/// Encode a DAQ operation result as an XCP response code byte
pub fn return_code(result: &DaqResult<()>) -> u8 {
    match result {
        Ok(()) => ERR_SUCCESS,
        Err(e) => e.code(),
    }
}

//-------------------------------------------------------------------------------------------------
//-------------------------------------------------------------------------------------------------
// Test module
