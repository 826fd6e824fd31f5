//-----------------------------------------------------------------------------
// Crate xcp_daq
// Path: src/lib.rs
//
// Measurement and calibration data acquisition (DAQ) engine of an XCP
// protocol stack. A measurement tool dynamically configures at runtime
// which target memory locations are sampled, how they are grouped into
// transmission packets and when they are emitted. Designed for memory
// constrained targets: all capacities are fixed at build time and the
// data path never allocates or blocks.

// This crate is a library
#![crate_type = "lib"]
// The library crate is named "xcp_daq"
#![crate_name = "xcp_daq"]

//-----------------------------------------------------------------------------

// Submodule daq
mod daq;
pub use daq::DaqProcessor;
pub use daq::DaqProcessorState;
pub use daq::StartStopMode;
pub use daq::XCP_DAQ_MAX_EVENT_CHANNEL;
pub use daq::XcpDaq;
pub use daq::daq_processor;
pub use daq::mta::{MtaAddress, MtaFault, MtaReader, SliceMemory};
pub use daq::pool::{AllocState, DaqEntity, DaqList, DaqListMode, EntityPool, Odt, OdtEntry};
pub use daq::queue::{DtoConsumer, DtoMessage, DtoProducer, DtoQueue};
pub use daq::{DAQ_PROPERTY_CONFIG_TYPE_DYNAMIC, DAQ_PROPERTY_PID_OFF_SUPPORTED, DAQ_PROPERTY_PRESCALER_SUPPORTED, DAQ_PROPERTY_TIMESTAMP_SUPPORTED};

// Submodule error
mod error;
pub use error::{DaqError, DaqResult, ERR_SUCCESS, return_code};

// Public submodule checksum
pub mod checksum;
pub use checksum::{ChecksumAlgorithm, ChecksumJob, ChecksumValue, DefaultChecksum};

//-----------------------------------------------------------------------------
// Build time configuration of the default instance

/// Capacity of the DAQ entity pool in slots
pub const XCP_DAQ_MAX_DYNAMIC_ENTITIES: usize = 256;

/// Depth of the DTO transmission queue in messages
pub const XCP_DAQ_QUEUE_SIZE: usize = 32;

/// Maximum DTO message length in bytes
pub const XCP_MAX_DTO: usize = 8;
