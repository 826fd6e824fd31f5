//-----------------------------------------------------------------------------
// Module daq
// DAQ processor state machine and event trigger
//
// The processor is the outer gate in front of the entity pool: allocation
// is only legal once the processor is initialized, measurement only once
// the configuration has been validated and started. Sampling is driven by
// the scheduler/event source through trigger_event() and main_function(),
// which walk the started DAQ lists, copy the configured memory ranges
// into DTO messages and hand them to the transmission queue. The sampling
// path never blocks, a full queue drops the sample.

//-----------------------------------------------------------------------------

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use once_cell::sync::Lazy;
use parking_lot::Mutex;

pub mod mta;
pub mod pool;
pub mod queue;

pub use mta::{MtaAddress, MtaFault, MtaReader, SliceMemory};
pub use pool::{AllocState, DaqEntity, DaqList, DaqListMode, EntityPool, Odt, OdtEntry};
pub use queue::{DtoConsumer, DtoMessage, DtoProducer, DtoQueue};

use crate::error::{DaqError, DaqResult};

/// Number of event channels, fixed at build time
pub const XCP_DAQ_MAX_EVENT_CHANNEL: u16 = 16;

// DAQ processor property bits for GET_DAQ_PROCESSOR_INFO
pub const DAQ_PROPERTY_CONFIG_TYPE_DYNAMIC: u8 = 0x01;
pub const DAQ_PROPERTY_PRESCALER_SUPPORTED: u8 = 0x02;
pub const DAQ_PROPERTY_TIMESTAMP_SUPPORTED: u8 = 0x10;
pub const DAQ_PROPERTY_PID_OFF_SUPPORTED: u8 = 0x20;

//-------------------------------------------------------------------------------------------------
// DaqProcessorState

/// Lifecycle state of the DAQ processor
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum DaqProcessorState {
    #[default]
    Uninit = 0,
    ConfigInvalid = 1,
    ConfigValid = 2,
    Stopped = 3,
    Running = 4,
}

/// Mode parameter of START_STOP_DAQ_LIST
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartStopMode {
    Stop = 0,
    Start = 1,
    Select = 2,
}

//-------------------------------------------------------------------------------------------------
// DaqPointer

// Configuration cursor set by SET_DAQ_PTR and advanced by WRITE_DAQ.
// After writing the last entry of an ODT the cursor is past the end and
// the next write fails until the pointer is set again.
#[derive(Debug, Default, Clone, Copy)]
struct DaqPointer {
    list: u16,
    odt: u8,
    entry: u8,
}

//-------------------------------------------------------------------------------------------------
// DaqProcessor

/// The DAQ measurement engine
///
/// Combines the entity pool, the transmission queue and the processor
/// lifecycle. `N` is the entity pool capacity, `Q` the queue depth in
/// messages and `MAX_MSG` the maximum DTO length in bytes, all fixed at
/// build time. No operation allocates or blocks.
#[derive(Debug)]
pub struct DaqProcessor<const N: usize, const Q: usize, const MAX_MSG: usize> {
    state: DaqProcessorState,
    pool: EntityPool<N>,
    queue: DtoQueue<Q, MAX_MSG>,
    daq_pointer: DaqPointer,
    queue_overruns: u32,
}

impl<const N: usize, const Q: usize, const MAX_MSG: usize> Default for DaqProcessor<N, Q, MAX_MSG> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize, const Q: usize, const MAX_MSG: usize> DaqProcessor<N, Q, MAX_MSG> {
    pub const fn new() -> DaqProcessor<N, Q, MAX_MSG> {
        DaqProcessor {
            state: DaqProcessorState::Uninit,
            pool: EntityPool::new(),
            queue: DtoQueue::new(),
            daq_pointer: DaqPointer { list: 0, odt: 0, entry: 0 },
            queue_overruns: 0,
        }
    }

    /// Initialize the processor, from any state
    ///
    /// Releases the entity pool, empties the queue and enters
    /// ConfigInvalid, after which configuration download is legal.
    pub fn init(&mut self) {
        self.pool.free();
        self.queue.reset();
        self.daq_pointer = DaqPointer::default();
        self.queue_overruns = 0;
        self.state = DaqProcessorState::ConfigInvalid;
        info!("DAQ processor initialized, pool capacity {} entities, queue depth {}", N, Q);
    }

    pub fn state(&self) -> DaqProcessorState {
        self.state
    }

    /// Set the processor state directly, for the protocol layer
    pub fn set_processor_state(&mut self, state: DaqProcessorState) {
        trace!("DAQ processor state {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    // Configuration operations are not permitted before init
    fn check_configurable(&self) -> DaqResult<()> {
        if self.state == DaqProcessorState::Uninit {
            return Err(DaqError::Sequence);
        }
        Ok(())
    }

    //---------------------------------------------------------------------------------------------
    // Allocation protocol (FREE_DAQ / ALLOC_DAQ / ALLOC_ODT / ALLOC_ODT_ENTRY)

    /// Release the DAQ configuration and restart the session
    ///
    /// Always succeeds. From any configured state the processor returns
    /// to ConfigInvalid.
    pub fn free_daq(&mut self) -> DaqResult<()> {
        self.pool.free();
        self.daq_pointer = DaqPointer::default();
        if self.state != DaqProcessorState::Uninit {
            self.state = DaqProcessorState::ConfigInvalid;
        }
        Ok(())
    }

    /// Allocate `count` DAQ lists
    pub fn alloc_daq(&mut self, count: u16) -> DaqResult<()> {
        self.check_configurable()?;
        self.pool.alloc_daq(count)?;
        self.state = DaqProcessorState::ConfigInvalid;
        Ok(())
    }

    /// Allocate `count` ODTs for DAQ list `list`
    pub fn alloc_odt(&mut self, list: u16, count: u16) -> DaqResult<()> {
        self.check_configurable()?;
        self.pool.alloc_odt(list, count)?;
        self.state = DaqProcessorState::ConfigInvalid;
        Ok(())
    }

    /// Allocate `count` ODT entries for ODT `odt` of DAQ list `list`
    pub fn alloc_odt_entry(&mut self, list: u16, odt: u8, count: u16) -> DaqResult<()> {
        self.check_configurable()?;
        self.pool.alloc_odt_entry(list, odt, count)?;
        self.state = DaqProcessorState::ConfigInvalid;
        Ok(())
    }

    /// Validate the downloaded configuration
    ///
    /// On success the processor enters ConfigValid and the configuration
    /// may be started, otherwise it stays ConfigInvalid.
    pub fn validate(&mut self) -> DaqResult<()> {
        self.check_configurable()?;
        if self.pool.validate() {
            self.state = DaqProcessorState::ConfigValid;
            Ok(())
        } else {
            warn!("DAQ configuration not valid");
            self.state = DaqProcessorState::ConfigInvalid;
            Err(DaqError::DaqConfig)
        }
    }

    /// Read only access to the entity pool
    pub fn pool(&self) -> &EntityPool<N> {
        &self.pool
    }

    //---------------------------------------------------------------------------------------------
    // Configuration commands (SET_DAQ_PTR / WRITE_DAQ / SET_DAQ_LIST_MODE / CLEAR_DAQ_LIST)

    /// Set the configuration cursor to (list, odt, entry)
    pub fn set_daq_ptr(&mut self, list: u16, odt: u8, entry: u8) -> DaqResult<()> {
        self.check_configurable()?;
        if !self.pool.validate_odt_entry(list, odt, entry) {
            return Err(DaqError::OutOfRange);
        }
        self.daq_pointer = DaqPointer { list, odt, entry };
        debug!("SET_DAQ_PTR [daq: {} odt: {} entry: {}]", list, odt, entry);
        Ok(())
    }

    /// Write one memory reference at the cursor and advance it
    ///
    /// The cursor advances within one and the same ODT, after the last
    /// entry it is invalid until set again.
    pub fn write_daq(&mut self, mta: MtaAddress, size: u8) -> DaqResult<()> {
        self.check_configurable()?;
        let ptr = self.daq_pointer;
        let entry = self.pool.odt_entry_mut(ptr.list, ptr.odt, ptr.entry)?;
        entry.mta = mta;
        entry.length = size as i32;
        debug!("WRITE_DAQ [mta: {} size: {}]", mta, size);
        self.daq_pointer.entry = ptr.entry.wrapping_add(1);
        Ok(())
    }

    /// Set mode, event channel and prescaler of a DAQ list
    ///
    /// ALTERNATING and TIMESTAMP are mutually exclusive. A prescaler of
    /// zero counts as one.
    pub fn set_list_mode(&mut self, list: u16, mode: DaqListMode, event_channel: u16, prescaler: u8) -> DaqResult<()> {
        self.check_configurable()?;
        if mode.contains(DaqListMode::ALTERNATING | DaqListMode::TIMESTAMP) {
            return Err(DaqError::OutOfRange);
        }
        if event_channel >= XCP_DAQ_MAX_EVENT_CHANNEL {
            return Err(DaqError::OutOfRange);
        }
        let entry = self.pool.list_mut(list)?;
        entry.mode = mode;
        entry.event_channel = event_channel;
        entry.prescaler = prescaler.max(1);
        entry.counter = 0;
        debug!("SET_DAQ_LIST_MODE [mode: {:?} daq: {} event: {} prescaler: {}]", mode, list, event_channel, prescaler);
        Ok(())
    }

    /// Reset every ODT entry of a DAQ list to unconfigured
    pub fn clear_daq_list(&mut self, list: u16) -> DaqResult<()> {
        self.check_configurable()?;
        let daq_list = *self.pool.list(list)?;
        for odt in 0..daq_list.num_odts {
            let num_entries = self.pool.odt(list, odt)?.num_entries;
            for entry in 0..num_entries {
                let e = self.pool.odt_entry_mut(list, odt, entry)?;
                e.mta = MtaAddress::default();
                e.length = 0;
            }
        }
        self.pool.list_mut(list)?.mode = DaqListMode::empty();
        debug!("CLEAR_DAQ_LIST [daq: {}]", list);
        Ok(())
    }

    //---------------------------------------------------------------------------------------------
    // Start/stop (START_STOP_DAQ_LIST / START_STOP_SYNCH)

    /// Start, stop or select a single DAQ list, returns its first PID
    pub fn start_stop_list(&mut self, list: u16, mode: StartStopMode) -> DaqResult<u8> {
        self.check_configurable()?;
        let entry = self.pool.list_mut(list)?;
        match mode {
            StartStopMode::Stop => {
                entry.mode.remove(DaqListMode::STARTED);
            }
            StartStopMode::Start => {
                entry.mode.insert(DaqListMode::STARTED);
                entry.counter = 0;
                entry.odt_cursor = 0;
            }
            StartStopMode::Select => {
                entry.mode.insert(DaqListMode::SELECTED);
            }
        }
        self.pool.first_pid(list)
    }

    /// Start all selected lists on the same tick, processor enters Running
    ///
    /// The SELECTED flag is consumed on acknowledge.
    pub fn start_selected(&mut self) -> DaqResult<()> {
        match self.state {
            DaqProcessorState::ConfigValid | DaqProcessorState::Stopped | DaqProcessorState::Running => {}
            _ => return Err(DaqError::Sequence),
        }
        self.start_stop_lists(true);
        self.state = DaqProcessorState::Running;
        info!("DAQ started");
        Ok(())
    }

    /// Stop all selected lists, the processor state is unchanged
    pub fn stop_selected(&mut self) -> DaqResult<()> {
        self.check_configurable()?;
        self.start_stop_lists(false);
        Ok(())
    }

    /// Stop measurement, processor enters Stopped
    pub fn stop_all(&mut self) -> DaqResult<()> {
        self.check_configurable()?;
        self.start_stop_lists(false);
        self.state = DaqProcessorState::Stopped;
        info!("DAQ stopped");
        Ok(())
    }

    // The slave resets the SELECTED flag as soon as the related
    // START_STOP_SYNCH has been acknowledged.
    fn start_stop_lists(&mut self, start: bool) {
        for idx in 0..self.pool.list_count() {
            let Ok(entry) = self.pool.list_mut(idx) else {
                continue;
            };
            if entry.mode.contains(DaqListMode::SELECTED) {
                if start {
                    entry.mode.insert(DaqListMode::STARTED);
                    entry.counter = 0;
                    entry.odt_cursor = 0;
                } else {
                    entry.mode.remove(DaqListMode::STARTED);
                }
                entry.mode.remove(DaqListMode::SELECTED);
            }
        }
    }

    /// DAQ processor property byte for GET_DAQ_PROCESSOR_INFO
    pub fn get_properties(&self) -> u8 {
        DAQ_PROPERTY_CONFIG_TYPE_DYNAMIC | DAQ_PROPERTY_PRESCALER_SUPPORTED | DAQ_PROPERTY_TIMESTAMP_SUPPORTED | DAQ_PROPERTY_PID_OFF_SUPPORTED
    }

    //---------------------------------------------------------------------------------------------
    // Sampling (TRIGGER_EVENT / MAIN_FUNCTION)

    /// Sample all started DAQ lists bound to `channel`
    ///
    /// Called by the scheduler or an event source, non reentrant. Does
    /// nothing unless the processor is Running.
    pub fn trigger_event(&mut self, channel: u16, mem: &impl MtaReader, timestamp: u32) {
        if self.state != DaqProcessorState::Running {
            return;
        }
        if channel >= XCP_DAQ_MAX_EVENT_CHANNEL {
            return;
        }
        for list in 0..self.pool.list_count() {
            self.sample_list(list, Some(channel), mem, timestamp);
        }
    }

    /// Polling mode entry point, samples every started list on each tick
    pub fn main_function(&mut self, mem: &impl MtaReader, timestamp: u32) {
        if self.state != DaqProcessorState::Running {
            return;
        }
        for list in 0..self.pool.list_count() {
            self.sample_list(list, None, mem, timestamp);
        }
    }

    // Assemble and enqueue one DTO for a single list. Any fault drops the
    // sample for this list, the measurement cadence is never stalled.
    fn sample_list(&mut self, list: u16, channel: Option<u16>, mem: &impl MtaReader, timestamp: u32) {
        let Ok(entry) = self.pool.list_mut(list) else {
            return;
        };
        if !entry.mode.contains(DaqListMode::STARTED) {
            return;
        }
        if let Some(channel) = channel {
            if entry.event_channel != channel {
                return;
            }
        }
        entry.counter = entry.counter.wrapping_add(1);
        if entry.counter < entry.prescaler {
            return;
        }
        entry.counter = 0;

        let mode = entry.mode;
        let num_odts = entry.num_odts;
        if num_odts == 0 {
            return;
        }
        let odt_number = if mode.contains(DaqListMode::ALTERNATING) {
            let cursor = entry.odt_cursor % num_odts;
            entry.odt_cursor = (cursor + 1) % num_odts;
            cursor
        } else {
            0
        };

        let Ok(first_pid) = self.pool.first_pid(list) else {
            return;
        };
        let Ok(odt) = self.pool.odt(list, odt_number) else {
            return;
        };
        let odt = *odt;

        let mut dto = [0u8; MAX_MSG];
        let mut len: usize = 0;
        if !mode.contains(DaqListMode::PID_OFF) {
            dto[len] = first_pid.wrapping_add(odt_number);
            len += 1;
        }
        if mode.contains(DaqListMode::TIMESTAMP) {
            if len + 4 > MAX_MSG {
                warn!("DTO of list {} too long for timestamp", list);
                return;
            }
            dto[len..len + 4].copy_from_slice(&timestamp.to_le_bytes());
            len += 4;
        }
        for entry_number in 0..odt.num_entries {
            let Ok(odt_entry) = self.pool.odt_entry(list, odt_number, entry_number) else {
                return;
            };
            if odt_entry.length <= 0 {
                // Unconfigured entry
                continue;
            }
            let size = odt_entry.length as usize;
            if len + size > MAX_MSG {
                warn!("DTO of list {} exceeds maximum message length {}", list, MAX_MSG);
                return;
            }
            if mem.read(odt_entry.mta, &mut dto[len..len + size]).is_err() {
                warn!("list {}: mta {} not accessible, sample dropped", list, odt_entry.mta);
                return;
            }
            len += size;
        }

        if !self.queue.enqueue(&dto[..len]) {
            // Queue full, the sample is lost, never retry or block
            self.queue_overruns = self.queue_overruns.wrapping_add(1);
            trace!("list {}: transmit queue full, sample dropped", list);
        }
    }

    //---------------------------------------------------------------------------------------------
    // Queue access for the transport layer

    /// Reset the transmission queue to empty
    pub fn queue_init(&mut self) {
        self.queue.reset();
        self.queue_overruns = 0;
    }

    /// Take the oldest pending DTO, None if the queue is empty
    pub fn dequeue_dto(&mut self) -> Option<DtoMessage<MAX_MSG>> {
        self.queue.dequeue()
    }

    /// Number of pending DTO messages
    pub fn queue_level(&self) -> usize {
        self.queue.len()
    }

    /// Samples dropped because the transmission queue was full
    pub fn queue_overruns(&self) -> u32 {
        self.queue_overruns
    }
}

//-------------------------------------------------------------------------------------------------
// Default instance

/// The default DAQ processor with the build time configured capacities
pub type XcpDaq = DaqProcessor<{ crate::XCP_DAQ_MAX_DYNAMIC_ENTITIES }, { crate::XCP_DAQ_QUEUE_SIZE }, { crate::XCP_MAX_DTO }>;

static DAQ_PROCESSOR: Lazy<Mutex<XcpDaq>> = Lazy::new(|| Mutex::new(XcpDaq::new()));

/// The process wide DAQ processor instance
pub fn daq_processor() -> &'static Mutex<XcpDaq> {
    &DAQ_PROCESSOR
}

//-------------------------------------------------------------------------------------------------
// Test helpers


//-------------------------------------------------------------------------------------------------
//-------------------------------------------------------------------------------------------------
// Test module

#[cfg(test)]
mod daq_tests {

    use super::daq_test::test_setup;
    use super::*;

    const N: usize = 100;
    const Q: usize = 4;
    const MAX_MSG: usize = 16;

    type TestDaq = DaqProcessor<N, Q, MAX_MSG>;

    // One list, one ODT, two entries reading from `image` at 0x1000
    fn configured(image_len: u8) -> TestDaq {
        test_setup();
        let mut daq = TestDaq::new();
        daq.init();
        daq.free_daq().unwrap();
        daq.alloc_daq(1).unwrap();
        daq.alloc_odt(0, 1).unwrap();
        daq.alloc_odt_entry(0, 0, 2).unwrap();
        daq.set_daq_ptr(0, 0, 0).unwrap();
        daq.write_daq(MtaAddress::new(0, 0x1000), 2).unwrap();
        daq.write_daq(MtaAddress::new(0, 0x1000 + image_len as u32 - 2), 2).unwrap();
        daq.validate().unwrap();
        daq
    }

    #[test]
    fn test_alloc_requires_init() {
        test_setup();
        let mut daq = TestDaq::new();
        assert_eq!(daq.alloc_daq(1), Err(DaqError::Sequence));
        assert_eq!(daq.alloc_odt(0, 1), Err(DaqError::Sequence));
        assert_eq!(daq.alloc_odt_entry(0, 0, 1), Err(DaqError::Sequence));
        assert_eq!(daq.state(), DaqProcessorState::Uninit);

        daq.init();
        assert_eq!(daq.state(), DaqProcessorState::ConfigInvalid);
        assert_eq!(daq.alloc_daq(1), Ok(()));
    }

    #[test]
    fn test_validate_gates_start() {
        test_setup();
        let mut daq = TestDaq::new();
        daq.init();
        // Nothing configured
        assert_eq!(daq.validate(), Err(DaqError::DaqConfig));
        assert_eq!(daq.state(), DaqProcessorState::ConfigInvalid);
        assert_eq!(daq.start_selected(), Err(DaqError::Sequence));

        daq.alloc_daq(1).unwrap();
        daq.alloc_odt(0, 1).unwrap();
        daq.alloc_odt_entry(0, 0, 1).unwrap();
        assert_eq!(daq.validate(), Ok(()));
        assert_eq!(daq.state(), DaqProcessorState::ConfigValid);
        assert_eq!(daq.start_selected(), Ok(()));
        assert_eq!(daq.state(), DaqProcessorState::Running);
    }

    #[test]
    fn test_free_returns_to_config_invalid() {
        let mut daq = configured(16);
        assert_eq!(daq.state(), DaqProcessorState::ConfigValid);
        daq.free_daq().unwrap();
        assert_eq!(daq.state(), DaqProcessorState::ConfigInvalid);
        assert_eq!(daq.pool().counts(), (0, 0, 0));
    }

    #[test]
    fn test_write_daq_advances_and_bounds() {
        let mut daq = configured(16);
        daq.set_daq_ptr(0, 0, 0).unwrap();
        daq.write_daq(MtaAddress::new(0, 0x2000), 1).unwrap();
        daq.write_daq(MtaAddress::new(0, 0x2001), 1).unwrap();
        // Cursor is past the last entry of the ODT
        assert_eq!(daq.write_daq(MtaAddress::new(0, 0x2002), 1), Err(DaqError::OutOfRange));
        // Bad pointer targets
        assert_eq!(daq.set_daq_ptr(0, 1, 0), Err(DaqError::OutOfRange));
        assert_eq!(daq.set_daq_ptr(1, 0, 0), Err(DaqError::OutOfRange));

        assert_eq!(daq.pool().odt_entry(0, 0, 0).unwrap().mta, MtaAddress::new(0, 0x2000));
        assert_eq!(daq.pool().odt_entry(0, 0, 1).unwrap().length, 1);
    }

    #[test]
    fn test_set_list_mode_validation() {
        let mut daq = configured(16);
        assert_eq!(
            daq.set_list_mode(0, DaqListMode::ALTERNATING | DaqListMode::TIMESTAMP, 0, 1),
            Err(DaqError::OutOfRange)
        );
        assert_eq!(daq.set_list_mode(0, DaqListMode::SELECTED, XCP_DAQ_MAX_EVENT_CHANNEL, 1), Err(DaqError::OutOfRange));
        assert_eq!(daq.set_list_mode(1, DaqListMode::SELECTED, 0, 1), Err(DaqError::OutOfRange));
        assert_eq!(daq.set_list_mode(0, DaqListMode::SELECTED, 2, 0), Ok(()));
        let list = daq.pool().list(0).unwrap();
        assert_eq!(list.event_channel, 2);
        // Prescaler zero counts as one
        assert_eq!(list.prescaler, 1);
    }

    #[test]
    fn test_acquisition_round_trip() {
        let image: Vec<u8> = (0u8..16).collect();
        let mem = SliceMemory::new(0x1000, &image);

        let mut daq = configured(16);
        daq.set_list_mode(0, DaqListMode::SELECTED, 3, 1).unwrap();
        daq.start_selected().unwrap();

        // SELECTED is consumed by the synchronized start
        assert!(!daq.pool().list(0).unwrap().mode.contains(DaqListMode::SELECTED));
        assert!(daq.pool().list(0).unwrap().mode.contains(DaqListMode::STARTED));

        // Wrong channel, nothing is sampled
        daq.trigger_event(1, &mem, 0);
        assert_eq!(daq.queue_level(), 0);

        daq.trigger_event(3, &mem, 0);
        let dto = daq.dequeue_dto().unwrap();
        // pid 0, entry 0 = image[0..2], entry 1 = image[14..16]
        assert_eq!(dto.as_slice(), &[0, 0, 1, 14, 15]);
        assert!(daq.dequeue_dto().is_none());
    }

    #[test]
    fn test_trigger_requires_running() {
        let image = [0u8; 16];
        let mem = SliceMemory::new(0x1000, &image);
        let mut daq = configured(16);
        daq.set_list_mode(0, DaqListMode::SELECTED | DaqListMode::STARTED, 0, 1).unwrap();
        // Not started, processor is only ConfigValid
        daq.trigger_event(0, &mem, 0);
        assert_eq!(daq.queue_level(), 0);
    }

    #[test]
    fn test_pid_off_and_timestamp() {
        let image: Vec<u8> = (0u8..16).collect();
        let mem = SliceMemory::new(0x1000, &image);

        let mut daq = configured(16);
        daq.set_list_mode(0, DaqListMode::SELECTED | DaqListMode::PID_OFF, 0, 1).unwrap();
        daq.start_selected().unwrap();
        daq.trigger_event(0, &mem, 0);
        assert_eq!(daq.dequeue_dto().unwrap().as_slice(), &[0, 1, 14, 15]);

        daq.stop_all().unwrap();
        daq.set_list_mode(0, DaqListMode::SELECTED | DaqListMode::TIMESTAMP, 0, 1).unwrap();
        daq.start_selected().unwrap();
        daq.trigger_event(0, &mem, 0xA1B2C3D4);
        assert_eq!(daq.dequeue_dto().unwrap().as_slice(), &[0, 0xD4, 0xC3, 0xB2, 0xA1, 0, 1, 14, 15]);
    }

    #[test]
    fn test_alternating_odts() {
        test_setup();
        let image: Vec<u8> = (0u8..16).collect();
        let mem = SliceMemory::new(0x1000, &image);

        let mut daq = TestDaq::new();
        daq.init();
        daq.alloc_daq(1).unwrap();
        daq.alloc_odt(0, 2).unwrap();
        daq.alloc_odt_entry(0, 0, 1).unwrap();
        daq.alloc_odt_entry(0, 1, 1).unwrap();
        daq.set_daq_ptr(0, 0, 0).unwrap();
        daq.write_daq(MtaAddress::new(0, 0x1000), 1).unwrap();
        daq.set_daq_ptr(0, 1, 0).unwrap();
        daq.write_daq(MtaAddress::new(0, 0x1008), 1).unwrap();
        daq.validate().unwrap();
        daq.set_list_mode(0, DaqListMode::SELECTED | DaqListMode::ALTERNATING, 0, 1).unwrap();
        daq.start_selected().unwrap();

        // Successive triggers alternate through the ODTs with their PIDs
        daq.trigger_event(0, &mem, 0);
        daq.trigger_event(0, &mem, 0);
        daq.trigger_event(0, &mem, 0);
        assert_eq!(daq.dequeue_dto().unwrap().as_slice(), &[0, 0]);
        assert_eq!(daq.dequeue_dto().unwrap().as_slice(), &[1, 8]);
        assert_eq!(daq.dequeue_dto().unwrap().as_slice(), &[0, 0]);
    }

    #[test]
    fn test_prescaler() {
        let image = [7u8; 16];
        let mem = SliceMemory::new(0x1000, &image);

        let mut daq = configured(16);
        daq.set_list_mode(0, DaqListMode::SELECTED, 0, 3).unwrap();
        daq.start_selected().unwrap();

        for _ in 0..6 {
            daq.trigger_event(0, &mem, 0);
        }
        // Every third trigger produces a sample
        assert_eq!(daq.queue_level(), 2);
    }

    #[test]
    fn test_queue_overrun_drops_sample() {
        let image = [1u8; 16];
        let mem = SliceMemory::new(0x1000, &image);

        let mut daq = configured(16);
        daq.set_list_mode(0, DaqListMode::SELECTED, 0, 1).unwrap();
        daq.start_selected().unwrap();

        for _ in 0..Q {
            daq.trigger_event(0, &mem, 0);
        }
        assert_eq!(daq.queue_level(), Q);
        assert_eq!(daq.queue_overruns(), 0);

        // Queue is full, the sample is dropped without blocking
        daq.trigger_event(0, &mem, 0);
        assert_eq!(daq.queue_level(), Q);
        assert_eq!(daq.queue_overruns(), 1);

        assert!(daq.dequeue_dto().is_some());
        daq.trigger_event(0, &mem, 0);
        assert_eq!(daq.queue_level(), Q);
    }

    #[test]
    fn test_mta_fault_drops_sample() {
        let image = [0u8; 4];
        // Image too small for the configured entries
        let mem = SliceMemory::new(0x1000, &image);

        let mut daq = configured(16);
        daq.set_list_mode(0, DaqListMode::SELECTED, 0, 1).unwrap();
        daq.start_selected().unwrap();
        daq.trigger_event(0, &mem, 0);
        // No partial DTO is enqueued
        assert_eq!(daq.queue_level(), 0);
    }

    #[test]
    fn test_unconfigured_entries_skipped() {
        test_setup();
        let image: Vec<u8> = (0u8..16).collect();
        let mem = SliceMemory::new(0x1000, &image);

        let mut daq = TestDaq::new();
        daq.init();
        daq.alloc_daq(1).unwrap();
        daq.alloc_odt(0, 1).unwrap();
        daq.alloc_odt_entry(0, 0, 3).unwrap();
        // Only the middle entry is configured
        daq.set_daq_ptr(0, 0, 1).unwrap();
        daq.write_daq(MtaAddress::new(0, 0x1004), 2).unwrap();
        daq.validate().unwrap();
        daq.set_list_mode(0, DaqListMode::SELECTED, 0, 1).unwrap();
        daq.start_selected().unwrap();
        daq.trigger_event(0, &mem, 0);
        assert_eq!(daq.dequeue_dto().unwrap().as_slice(), &[0, 4, 5]);
    }

    #[test]
    fn test_synchronized_start_stop() {
        test_setup();
        let image = [3u8; 16];
        let mem = SliceMemory::new(0x1000, &image);

        let mut daq = TestDaq::new();
        daq.init();
        daq.alloc_daq(2).unwrap();
        daq.alloc_odt(0, 1).unwrap();
        daq.alloc_odt(1, 1).unwrap();
        daq.alloc_odt_entry(0, 0, 1).unwrap();
        daq.alloc_odt_entry(1, 0, 1).unwrap();
        daq.set_daq_ptr(0, 0, 0).unwrap();
        daq.write_daq(MtaAddress::new(0, 0x1000), 1).unwrap();
        daq.set_daq_ptr(1, 0, 0).unwrap();
        daq.write_daq(MtaAddress::new(0, 0x1001), 1).unwrap();
        daq.validate().unwrap();

        daq.set_list_mode(0, DaqListMode::SELECTED, 0, 1).unwrap();
        daq.set_list_mode(1, DaqListMode::SELECTED, 0, 1).unwrap();
        daq.start_selected().unwrap();
        daq.trigger_event(0, &mem, 0);
        // Both lists emit on the same tick, in list order
        assert_eq!(daq.dequeue_dto().unwrap().as_slice(), &[0, 3]);
        assert_eq!(daq.dequeue_dto().unwrap().as_slice(), &[1, 3]);

        // Stop one list via select + stop_selected
        daq.start_stop_list(0, StartStopMode::Select).unwrap();
        daq.stop_selected().unwrap();
        assert_eq!(daq.state(), DaqProcessorState::Running);
        daq.trigger_event(0, &mem, 0);
        assert_eq!(daq.dequeue_dto().unwrap().as_slice(), &[1, 3]);
        assert!(daq.dequeue_dto().is_none());

        daq.stop_all().unwrap();
        assert_eq!(daq.state(), DaqProcessorState::Stopped);
        daq.trigger_event(0, &mem, 0);
        assert!(daq.dequeue_dto().is_none());
    }

    #[test]
    fn test_start_stop_single_list_returns_first_pid() {
        test_setup();
        let mut daq = TestDaq::new();
        daq.init();
        daq.alloc_daq(2).unwrap();
        daq.alloc_odt(0, 2).unwrap();
        daq.alloc_odt(1, 1).unwrap();
        daq.alloc_odt_entry(0, 0, 1).unwrap();
        daq.alloc_odt_entry(1, 0, 1).unwrap();

        assert_eq!(daq.start_stop_list(0, StartStopMode::Select), Ok(0));
        assert_eq!(daq.start_stop_list(1, StartStopMode::Start), Ok(2));
        assert!(daq.pool().list(1).unwrap().mode.contains(DaqListMode::STARTED));
        assert_eq!(daq.start_stop_list(1, StartStopMode::Stop), Ok(2));
        assert!(!daq.pool().list(1).unwrap().mode.contains(DaqListMode::STARTED));
        assert_eq!(daq.start_stop_list(2, StartStopMode::Start), Err(DaqError::OutOfRange));
    }

    #[test]
    fn test_main_function_services_all_channels() {
        test_setup();
        let image = [9u8; 16];
        let mem = SliceMemory::new(0x1000, &image);

        let mut daq = TestDaq::new();
        daq.init();
        daq.alloc_daq(2).unwrap();
        daq.alloc_odt(0, 1).unwrap();
        daq.alloc_odt(1, 1).unwrap();
        daq.alloc_odt_entry(0, 0, 1).unwrap();
        daq.alloc_odt_entry(1, 0, 1).unwrap();
        daq.set_daq_ptr(0, 0, 0).unwrap();
        daq.write_daq(MtaAddress::new(0, 0x1000), 1).unwrap();
        daq.set_daq_ptr(1, 0, 0).unwrap();
        daq.write_daq(MtaAddress::new(0, 0x1002), 1).unwrap();
        daq.validate().unwrap();
        // Lists bound to different event channels
        daq.set_list_mode(0, DaqListMode::SELECTED, 1, 1).unwrap();
        daq.set_list_mode(1, DaqListMode::SELECTED, 5, 1).unwrap();
        daq.start_selected().unwrap();

        daq.main_function(&mem, 0);
        assert_eq!(daq.queue_level(), 2);
    }

    #[test]
    fn test_get_properties() {
        let daq = TestDaq::new();
        let properties = daq.get_properties();
        assert_ne!(properties & DAQ_PROPERTY_CONFIG_TYPE_DYNAMIC, 0);
        assert_ne!(properties & DAQ_PROPERTY_PRESCALER_SUPPORTED, 0);
    }

    #[test]
    fn test_default_instance() {
        test_setup();
        let mut daq = daq_processor().lock();
        daq.init();
        assert_eq!(daq.state(), DaqProcessorState::ConfigInvalid);
        assert_eq!(daq.pool().capacity(), crate::XCP_DAQ_MAX_DYNAMIC_ENTITIES as u16);
    }
}
