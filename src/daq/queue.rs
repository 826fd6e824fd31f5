//-----------------------------------------------------------------------------
// Module queue
// DTO transmission queue
//
// A bounded ring of fixed size message slots bridging the event trigger
// path (producer) and the transport layer (consumer). Lock free for
// exactly one producer and one consumer: the producer owns the tail
// index, the consumer owns the head index, each only ever reads the
// other's. Nothing in here blocks, capacity conditions are signalled by
// the return value.

//-----------------------------------------------------------------------------

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

//-------------------------------------------------------------------------------------------------
// DtoMessage

/// One data transmission object, stored by value in the queue
///
/// `MAX_MSG` is the build time maximum message length in bytes.
#[derive(Debug, Clone, Copy)]
pub struct DtoMessage<const MAX_MSG: usize> {
    len: u16,
    data: [u8; MAX_MSG],
}

impl<const MAX_MSG: usize> DtoMessage<MAX_MSG> {
    pub const fn empty() -> DtoMessage<MAX_MSG> {
        DtoMessage { len: 0, data: [0; MAX_MSG] }
    }

    /// Create a message from a payload, None if it exceeds `MAX_MSG`
    pub fn new(payload: &[u8]) -> Option<DtoMessage<MAX_MSG>> {
        if payload.len() > MAX_MSG {
            return None;
        }
        let mut msg = DtoMessage::empty();
        msg.len = payload.len() as u16;
        msg.data[..payload.len()].copy_from_slice(payload);
        Some(msg)
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The valid message bytes, stale bytes beyond `len` are unreachable
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}

impl<const MAX_MSG: usize> PartialEq for DtoMessage<MAX_MSG> {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl<const MAX_MSG: usize> Eq for DtoMessage<MAX_MSG> {}

//-------------------------------------------------------------------------------------------------
// DtoQueue

/// Bounded single producer single consumer transmission queue
///
/// `Q` is the usable capacity in messages. The head and tail counters run
/// freely and are reduced modulo `Q` for slot addressing, so all `Q`
/// slots are usable. FIFO order is exact.
#[derive(Debug)]
pub struct DtoQueue<const Q: usize, const MAX_MSG: usize> {
    slots: [UnsafeCell<DtoMessage<MAX_MSG>>; Q],
    /// Owned by the consumer, read by the producer
    head: AtomicUsize,
    /// Owned by the producer, read by the consumer
    tail: AtomicUsize,
}

// One producer writes slots at tail, one consumer reads slots at head,
// the full/empty checks keep the two index ranges disjoint
unsafe impl<const Q: usize, const MAX_MSG: usize> Sync for DtoQueue<Q, MAX_MSG> {}

impl<const Q: usize, const MAX_MSG: usize> Default for DtoQueue<Q, MAX_MSG> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const Q: usize, const MAX_MSG: usize> DtoQueue<Q, MAX_MSG> {
    pub const fn new() -> DtoQueue<Q, MAX_MSG> {
        DtoQueue {
            slots: [const { UnsafeCell::new(DtoMessage::empty()) }; Q],
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    /// Reset the queue to empty
    ///
    /// Stored message data is not cleared, length prefixing makes stale
    /// bytes unreachable.
    pub fn reset(&mut self) {
        *self.head.get_mut() = 0;
        *self.tail.get_mut() = 0;
    }

    /// Number of queued messages
    pub fn len(&self) -> usize {
        self.tail.load(Ordering::Acquire).wrapping_sub(self.head.load(Ordering::Acquire))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == Q
    }

    /// Build time queue capacity in messages
    pub fn capacity(&self) -> usize {
        Q
    }

    /// Split into the two role handles
    ///
    /// The exclusive borrow guarantees at most one producer and one
    /// consumer exist at a time, the handles may then be moved to
    /// different threads.
    pub fn split(&mut self) -> (DtoProducer<'_, Q, MAX_MSG>, DtoConsumer<'_, Q, MAX_MSG>) {
        let queue: &DtoQueue<Q, MAX_MSG> = self;
        (DtoProducer { queue }, DtoConsumer { queue })
    }

    // Producer side. Contract: at most one thread calls this at a time.
    pub(crate) fn enqueue(&self, payload: &[u8]) -> bool {
        if payload.len() > MAX_MSG {
            warn!("enqueue: message length {} exceeds maximum {}", payload.len(), MAX_MSG);
            return false;
        }
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if tail.wrapping_sub(head) == Q {
            return false;
        }
        // The slot at tail is outside the consumer's visible range until the store below
        unsafe {
            let slot = &mut *self.slots[tail % Q].get();
            slot.len = payload.len() as u16;
            slot.data[..payload.len()].copy_from_slice(payload);
        }
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        true
    }

    // Consumer side. Contract: at most one thread calls this at a time.
    pub(crate) fn dequeue(&self) -> Option<DtoMessage<MAX_MSG>> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        // The slot at head is not touched by the producer while the queue is non empty
        let msg = unsafe { *self.slots[head % Q].get() };
        self.head.store(head.wrapping_add(1), Ordering::Release);
        Some(msg)
    }
}

//-------------------------------------------------------------------------------------------------
// DtoProducer / DtoConsumer

/// Producer handle, the only way to enqueue from outside the processor
///
/// Owns the tail index. Not cloneable, there is exactly one.
#[derive(Debug)]
pub struct DtoProducer<'a, const Q: usize, const MAX_MSG: usize> {
    queue: &'a DtoQueue<Q, MAX_MSG>,
}

impl<const Q: usize, const MAX_MSG: usize> DtoProducer<'_, Q, MAX_MSG> {
    /// Append a message, false if the queue is full or the payload too long
    ///
    /// Never blocks, the queue state is unchanged on failure.
    pub fn enqueue(&mut self, payload: &[u8]) -> bool {
        self.queue.enqueue(payload)
    }

    pub fn is_full(&self) -> bool {
        self.queue.is_full()
    }
}

/// Consumer handle for the transport layer
///
/// Owns the head index. Not cloneable, there is exactly one.
#[derive(Debug)]
pub struct DtoConsumer<'a, const Q: usize, const MAX_MSG: usize> {
    queue: &'a DtoQueue<Q, MAX_MSG>,
}

impl<const Q: usize, const MAX_MSG: usize> DtoConsumer<'_, Q, MAX_MSG> {
    /// Take the oldest message, None if the queue is empty
    ///
    /// Never blocks, the queue state is unchanged when empty.
    pub fn dequeue(&mut self) -> Option<DtoMessage<MAX_MSG>> {
        self.queue.dequeue()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

//-------------------------------------------------------------------------------------------------
//-------------------------------------------------------------------------------------------------
// Test module

#[cfg(test)]
mod queue_tests {

    use super::*;

    const Q: usize = 4;
    const MAX_MSG: usize = 8;

    #[test]
    fn test_capacity_exact() {
        let queue: DtoQueue<Q, MAX_MSG> = DtoQueue::new();
        for i in 0..Q {
            assert!(queue.enqueue(b"test"), "enqueue {} must succeed", i);
        }
        assert!(queue.is_full());
        // The queue holds exactly Q messages, one more must fail without a state change
        assert!(!queue.enqueue(b"test"));
        assert_eq!(queue.len(), Q);

        for _ in 0..Q {
            let msg = queue.dequeue().unwrap();
            assert_eq!(msg.as_slice(), b"test");
        }
        assert!(queue.dequeue().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_fifo_order() {
        let queue: DtoQueue<Q, MAX_MSG> = DtoQueue::new();
        assert!(queue.enqueue(&[1]));
        assert!(queue.enqueue(&[2, 2]));
        assert!(queue.enqueue(&[3, 3, 3]));
        assert_eq!(queue.dequeue().unwrap().as_slice(), &[1]);
        assert_eq!(queue.dequeue().unwrap().as_slice(), &[2, 2]);
        assert_eq!(queue.dequeue().unwrap().as_slice(), &[3, 3, 3]);
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn test_wraparound() {
        let queue: DtoQueue<Q, MAX_MSG> = DtoQueue::new();
        // Push the indices through several full cycles of the slot ring
        for i in 0..(3 * Q as u32 + 1) {
            let payload = i.to_le_bytes();
            assert!(queue.enqueue(&payload));
            let msg = queue.dequeue().unwrap();
            assert_eq!(msg.as_slice(), &payload);
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_empty_dequeue_keeps_state() {
        let queue: DtoQueue<Q, MAX_MSG> = DtoQueue::new();
        assert!(queue.dequeue().is_none());
        assert!(queue.enqueue(&[42]));
        assert_eq!(queue.dequeue().unwrap().as_slice(), &[42]);
        assert!(queue.dequeue().is_none());
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_oversize_message_rejected() {
        let queue: DtoQueue<Q, MAX_MSG> = DtoQueue::new();
        assert!(!queue.enqueue(&[0u8; MAX_MSG + 1]));
        assert!(queue.is_empty());
        assert!(queue.enqueue(&[0u8; MAX_MSG]));
    }

    #[test]
    fn test_reset_discards_content() {
        let mut queue: DtoQueue<Q, MAX_MSG> = DtoQueue::new();
        assert!(queue.enqueue(b"old"));
        queue.reset();
        assert!(queue.is_empty());
        assert!(queue.enqueue(b"new"));
        assert_eq!(queue.dequeue().unwrap().as_slice(), b"new");
    }

    #[test]
    fn test_split_spsc_threads() {
        const COUNT: u32 = 10000;
        let mut queue: DtoQueue<Q, MAX_MSG> = DtoQueue::new();
        let (mut producer, mut consumer) = queue.split();

        std::thread::scope(|s| {
            s.spawn(move || {
                for i in 0..COUNT {
                    let payload = i.to_le_bytes();
                    // Spin until a slot frees up, the queue itself never blocks
                    while !producer.enqueue(&payload) {
                        std::thread::yield_now();
                    }
                }
            });
            s.spawn(move || {
                for i in 0..COUNT {
                    let msg = loop {
                        if let Some(msg) = consumer.dequeue() {
                            break msg;
                        }
                        std::thread::yield_now();
                    };
                    let value = u32::from_le_bytes(msg.as_slice().try_into().unwrap());
                    assert_eq!(value, i);
                }
            });
        });
    }
}
