//-----------------------------------------------------------------------------
// Module pool
// DAQ entity pool and bump allocator
//
// A flat, fixed capacity array of tagged slots from which DAQ lists, ODTs
// and ODT entries are carved under the XCP configuration protocol:
// allocation must proceed strictly list -> ODT -> ODT entry and can never
// go back, only a full free restarts configuration. Within one stage,
// repeated allocation calls append cumulatively.

//-----------------------------------------------------------------------------

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use bitflags::bitflags;

use super::mta::MtaAddress;
use crate::error::{DaqError, DaqResult};

//-------------------------------------------------------------------------------------------------
// DaqListMode

bitflags! {
    /// DAQ list mode byte as used by SET_DAQ_LIST_MODE / GET_DAQ_LIST_MODE
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct DaqListMode: u8 {
        /// Transmit the ODTs of this list in alternating mode, one ODT per trigger
        const ALTERNATING = 0x01;
        /// Direction bit, set for STIM, clear for DAQ
        const DIRECTION = 0x02;
        /// Append a timestamp to the DTO
        const TIMESTAMP = 0x10;
        /// Suppress the leading identifier byte
        const PID_OFF = 0x20;
        /// List is selected for a synchronized start/stop
        const SELECTED = 0x40;
        /// List is actively sampling
        const STARTED = 0x80;
    }
}

//-------------------------------------------------------------------------------------------------
// Entity slot variants

/// A dynamically allocated DAQ list
///
/// `first_odt` is an absolute index into the entity pool, the list's ODTs
/// occupy the contiguous range `first_odt .. first_odt + num_odts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaqList {
    pub num_odts: u8,
    pub first_odt: u16,
    pub mode: DaqListMode,
    pub event_channel: u16,
    pub prescaler: u8,
    pub counter: u8,
    pub odt_cursor: u8,
}

impl Default for DaqList {
    fn default() -> Self {
        DaqList {
            num_odts: 0,
            first_odt: 0,
            mode: DaqListMode::empty(),
            event_channel: 0,
            prescaler: 1,
            counter: 0,
            odt_cursor: 0,
        }
    }
}

/// An object descriptor table, a group of memory references transmitted together
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Odt {
    pub num_entries: u8,
    pub first_entry: u16,
}

/// One memory reference within an ODT
///
/// A non-positive length marks the entry as unconfigured, it is skipped
/// during sampling.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OdtEntry {
    pub mta: MtaAddress,
    pub length: i32,
}

/// One slot of the entity pool
///
/// The variant of a slot never changes after allocation, except through a
/// global [`EntityPool::free`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum DaqEntity {
    #[default]
    Unused,
    DaqList(DaqList),
    Odt(Odt),
    OdtEntry(OdtEntry),
}

//-------------------------------------------------------------------------------------------------
// Allocation state machine

/// Allocation protocol state, advances one way within a configuration session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocState {
    /// Before the first free, nothing but a free is permitted
    Idle,
    AfterFree,
    AfterAllocDaq,
    AfterAllocOdt,
    AfterAllocOdtEntry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AllocCall {
    FreeDaq,
    AllocDaq,
    AllocOdt,
    AllocOdtEntry,
}

impl AllocState {
    // Total transition legality function, every (state, call) pair has a defined outcome
    fn permits(self, call: AllocCall) -> bool {
        match (self, call) {
            (_, AllocCall::FreeDaq) => true,
            (AllocState::Idle, _) => false,
            (AllocState::AfterFree, AllocCall::AllocDaq) => true,
            (AllocState::AfterFree, _) => false,
            (AllocState::AfterAllocDaq, AllocCall::AllocDaq | AllocCall::AllocOdt) => true,
            (AllocState::AfterAllocDaq, AllocCall::AllocOdtEntry) => false,
            (AllocState::AfterAllocOdt, AllocCall::AllocOdt | AllocCall::AllocOdtEntry) => true,
            (AllocState::AfterAllocOdt, AllocCall::AllocDaq) => false,
            (AllocState::AfterAllocOdtEntry, AllocCall::AllocOdtEntry) => true,
            (AllocState::AfterAllocOdtEntry, _) => false,
        }
    }
}

//-------------------------------------------------------------------------------------------------
// EntityPool

/// Fixed capacity DAQ entity pool with bump allocation
///
/// `N` is the build time pool capacity in entity slots. The pool owns all
/// configuration state of the DAQ lists, the processor reads it while
/// running and the transport layer reconfigures it through the allocation
/// protocol.
#[derive(Debug)]
pub struct EntityPool<const N: usize> {
    entities: [DaqEntity; N],
    alloc_state: AllocState,
    entity_count: u16,
    list_count: u16,
    odt_count: u16,
}

impl<const N: usize> Default for EntityPool<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> EntityPool<N> {
    const UNUSED: DaqEntity = DaqEntity::Unused;

    pub const fn new() -> EntityPool<N> {
        EntityPool {
            entities: [Self::UNUSED; N],
            alloc_state: AllocState::Idle,
            entity_count: 0,
            list_count: 0,
            odt_count: 0,
        }
    }

    /// Release the complete pool and restart the configuration session
    ///
    /// Always succeeds, idempotent. Clears every slot, resets all counts
    /// and returns the allocation state machine to its initial stage.
    pub fn free(&mut self) {
        self.entity_count = 0;
        self.list_count = 0;
        self.odt_count = 0;
        for entity in self.entities.iter_mut() {
            *entity = DaqEntity::Unused;
        }
        self.alloc_state = AllocState::AfterFree;
    }

    /// Append `count` DAQ lists to the pool
    ///
    /// Permitted while no ODT has been allocated yet, repeated calls
    /// append cumulatively. On overflow the pool is left unchanged.
    pub fn alloc_daq(&mut self, count: u16) -> DaqResult<()> {
        if !self.alloc_state.permits(AllocCall::AllocDaq) {
            warn!("alloc_daq({}) not permitted in {:?}", count, self.alloc_state);
            return Err(DaqError::Sequence);
        }
        if self.entity_count as usize + count as usize > N {
            warn!("alloc_daq({}): pool exhausted, {} of {} slots used", count, self.entity_count, N);
            return Err(DaqError::MemoryOverflow);
        }
        self.alloc_state = AllocState::AfterAllocDaq;
        for idx in self.entity_count..self.entity_count + count {
            self.entities[idx as usize] = DaqEntity::DaqList(DaqList::default());
        }
        self.list_count += count;
        self.entity_count += count;
        debug!("alloc_daq({}): {} lists, {} entities", count, self.list_count, self.entity_count);
        Ok(())
    }

    /// Append `count` ODTs to DAQ list `list`
    ///
    /// The first successful call ends the list stage of the session.
    pub fn alloc_odt(&mut self, list: u16, count: u16) -> DaqResult<()> {
        if !self.alloc_state.permits(AllocCall::AllocOdt) {
            warn!("alloc_odt({}, {}) not permitted in {:?}", list, count, self.alloc_state);
            return Err(DaqError::Sequence);
        }
        if list >= self.list_count {
            return Err(DaqError::OutOfRange);
        }
        if self.entity_count as usize + count as usize > N {
            warn!("alloc_odt({}, {}): pool exhausted, {} of {} slots used", list, count, self.entity_count, N);
            return Err(DaqError::MemoryOverflow);
        }
        // num_odts is transmitted in a single byte
        let num_odts = self.list(list)?.num_odts;
        let new_num_odts = (num_odts as u16).checked_add(count).filter(|n| *n <= u8::MAX as u16).ok_or(DaqError::OutOfRange)?;

        self.alloc_state = AllocState::AfterAllocOdt;
        for idx in self.entity_count..self.entity_count + count {
            self.entities[idx as usize] = DaqEntity::Odt(Odt::default());
        }
        let first_odt = self.entity_count;
        let daq_list = self.list_mut(list)?;
        daq_list.num_odts = new_num_odts as u8;
        daq_list.first_odt = first_odt;
        self.odt_count += count;
        self.entity_count += count;
        Ok(())
    }

    /// Append `count` ODT entries to ODT `odt` of DAQ list `list`
    ///
    /// The first successful call ends the ODT stage of the session. Entries
    /// are created unconfigured and are populated via WRITE_DAQ.
    pub fn alloc_odt_entry(&mut self, list: u16, odt: u8, count: u16) -> DaqResult<()> {
        if !self.alloc_state.permits(AllocCall::AllocOdtEntry) {
            warn!("alloc_odt_entry({}, {}, {}) not permitted in {:?}", list, odt, count, self.alloc_state);
            return Err(DaqError::Sequence);
        }
        let daq_list = self.list(list)?;
        if odt >= daq_list.num_odts {
            return Err(DaqError::OutOfRange);
        }
        let odt_index = daq_list.first_odt + odt as u16;
        if self.entity_count as usize + count as usize > N {
            warn!("alloc_odt_entry({}, {}, {}): pool exhausted, {} of {} slots used", list, odt, count, self.entity_count, N);
            return Err(DaqError::MemoryOverflow);
        }
        if count > u8::MAX as u16 {
            return Err(DaqError::OutOfRange);
        }
        // The target slot must be an ODT before anything is committed
        if !matches!(self.entities[odt_index as usize], DaqEntity::Odt(_)) {
            return Err(DaqError::OutOfRange);
        }

        self.alloc_state = AllocState::AfterAllocOdtEntry;
        for idx in self.entity_count..self.entity_count + count {
            self.entities[idx as usize] = DaqEntity::OdtEntry(OdtEntry::default());
        }
        let first_entry = self.entity_count;
        if let DaqEntity::Odt(o) = &mut self.entities[odt_index as usize] {
            o.first_entry = first_entry;
            o.num_entries = count as u8;
        }
        self.entity_count += count;
        Ok(())
    }

    //---------------------------------------------------------------------------------------------
    // Read accessors

    /// Current allocation counts: (entities, lists, ODTs)
    pub fn counts(&self) -> (u16, u16, u16) {
        (self.entity_count, self.list_count, self.odt_count)
    }

    /// Build time pool capacity in entity slots
    pub fn capacity(&self) -> u16 {
        N as u16
    }

    pub fn list_count(&self) -> u16 {
        self.list_count
    }

    pub fn alloc_state(&self) -> AllocState {
        self.alloc_state
    }

    /// The entity slot at `index`
    pub fn entity(&self, index: u16) -> DaqResult<&DaqEntity> {
        self.entities.get(index as usize).ok_or(DaqError::OutOfRange)
    }

    pub fn list(&self, list: u16) -> DaqResult<&DaqList> {
        if list >= self.list_count {
            return Err(DaqError::OutOfRange);
        }
        match &self.entities[list as usize] {
            DaqEntity::DaqList(l) => Ok(l),
            _ => Err(DaqError::OutOfRange),
        }
    }

    pub fn list_mut(&mut self, list: u16) -> DaqResult<&mut DaqList> {
        if list >= self.list_count {
            return Err(DaqError::OutOfRange);
        }
        match &mut self.entities[list as usize] {
            DaqEntity::DaqList(l) => Ok(l),
            _ => Err(DaqError::OutOfRange),
        }
    }

    pub fn odt(&self, list: u16, odt: u8) -> DaqResult<&Odt> {
        let daq_list = self.list(list)?;
        if odt >= daq_list.num_odts {
            return Err(DaqError::OutOfRange);
        }
        match self.entity(daq_list.first_odt + odt as u16)? {
            DaqEntity::Odt(o) => Ok(o),
            _ => Err(DaqError::OutOfRange),
        }
    }

    pub fn odt_entry(&self, list: u16, odt: u8, entry: u8) -> DaqResult<&OdtEntry> {
        let o = self.odt(list, odt)?;
        if entry >= o.num_entries {
            return Err(DaqError::OutOfRange);
        }
        match self.entity(o.first_entry + entry as u16)? {
            DaqEntity::OdtEntry(e) => Ok(e),
            _ => Err(DaqError::OutOfRange),
        }
    }

    pub fn odt_entry_mut(&mut self, list: u16, odt: u8, entry: u8) -> DaqResult<&mut OdtEntry> {
        let o = *self.odt(list, odt)?;
        if entry >= o.num_entries {
            return Err(DaqError::OutOfRange);
        }
        let index = (o.first_entry + entry as u16) as usize;
        match &mut self.entities[index] {
            DaqEntity::OdtEntry(e) => Ok(e),
            _ => Err(DaqError::OutOfRange),
        }
    }

    /// Identifier byte of the first ODT of DAQ list `list`
    ///
    /// PIDs are assigned in absolute ODT order over all lists.
    pub fn first_pid(&self, list: u16) -> DaqResult<u8> {
        if list >= self.list_count {
            return Err(DaqError::OutOfRange);
        }
        let mut pid: u16 = 0;
        for idx in 0..list {
            pid += self.list(idx)?.num_odts as u16;
        }
        if pid > u8::MAX as u16 {
            return Err(DaqError::OutOfRange);
        }
        Ok(pid as u8)
    }

    //---------------------------------------------------------------------------------------------
    // Validation

    /// Check the complete configuration for measurement readiness
    ///
    /// Every list must own at least one ODT and a non empty set of entries,
    /// all index ranges must be in bounds, correctly tagged and account for
    /// every allocated slot (no dangling and no overlapping ranges).
    pub fn validate(&self) -> bool {
        if self.entity_count == 0 || self.list_count == 0 || self.odt_count == 0 {
            return false;
        }
        let mut referenced_odts: u16 = 0;
        let mut referenced_entries: u16 = 0;
        for list in 0..self.list_count {
            let Ok(daq_list) = self.list(list) else {
                return false;
            };
            if daq_list.num_odts == 0 {
                return false;
            }
            referenced_odts += daq_list.num_odts as u16;
            let mut list_entries: u16 = 0;
            for odt in 0..daq_list.num_odts {
                let Ok(o) = self.odt(list, odt) else {
                    return false;
                };
                if (o.first_entry + o.num_entries as u16) > self.entity_count {
                    return false;
                }
                for entry in 0..o.num_entries {
                    if self.odt_entry(list, odt, entry).is_err() {
                        return false;
                    }
                }
                list_entries += o.num_entries as u16;
                referenced_entries += o.num_entries as u16;
            }
            if list_entries == 0 {
                return false;
            }
        }
        // Every allocated slot must be reachable from exactly one list
        referenced_odts == self.odt_count && referenced_entries == self.entity_count - self.list_count - self.odt_count
    }

    /// Check a single DAQ list: it exists and owns at least one ODT with entries
    pub fn validate_list(&self, list: u16) -> bool {
        let Ok(daq_list) = self.list(list) else {
            return false;
        };
        if daq_list.num_odts == 0 {
            return false;
        }
        (0..daq_list.num_odts).any(|odt| self.odt(list, odt).map(|o| o.num_entries > 0).unwrap_or(false))
    }

    /// Check that (list, odt, entry) addresses an allocated ODT entry
    pub fn validate_odt_entry(&self, list: u16, odt: u8, entry: u8) -> bool {
        self.odt_entry(list, odt, entry).is_ok()
    }
}

//-------------------------------------------------------------------------------------------------
//-------------------------------------------------------------------------------------------------
// Test module
