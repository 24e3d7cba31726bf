use crate::{
    axis::{Axis, AxisArray, NUM_AXES},
    block::{Block, Profile},
};
use core::cell::{Cell, UnsafeCell};
use embassy_sync::blocking_mutex::{raw::RawMutex, Mutex as BlockingMutex};
use portable_atomic::{AtomicBool, AtomicF32, AtomicI32, AtomicUsize, Ordering};

/// Reported by the stepper after it dropped queued motion on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MotionEvent {
    /// Quickstop completed. `counts` are the step counters at the stop.
    Aborted {
        discarded: usize,
        counts: AxisArray<i32>,
    },
    /// An endstop stopped the running move.
    EndstopHit {
        axis: Axis,
        discarded: usize,
        counts: AxisArray<i32>,
    },
}

#[derive(Debug, Clone, Copy, Default)]
struct Handoff {
    busy: bool,
    profile: Profile,
}

struct Slot<M: RawMutex> {
    block: UnsafeCell<Block>,
    handoff: BlockingMutex<M, Cell<Handoff>>,
}

impl<M: RawMutex> Slot<M> {
    fn new() -> Self {
        Self {
            block: UnsafeCell::new(Block::default()),
            handoff: BlockingMutex::new(Cell::new(Handoff::default())),
        }
    }
}

/// State shared between the planner and the step interrupt.
///
/// The block ring is single-producer/single-consumer: `head` is only
/// written by the [`Producer`], `tail` only by the [`Consumer`]. Both are
/// free-running counters, the slot is `counter % N`. A block is written
/// before `head` moves past it and is never written again while queued.
/// Only the profile changes after publication, through a per-slot lock
/// that also carries the busy flag the consumer sets when it starts a
/// block. The flag stays set after release until the slot is reused.
pub struct MotionShared<M: RawMutex, const N: usize> {
    slots: [Slot<M>; N],
    head: AtomicUsize,
    tail: AtomicUsize,
    counts: [AtomicI32; NUM_AXES],
    abort: AtomicBool,
    resync: AtomicBool,
    endstops: AtomicBool,
    /// No block running and no delayed steps left in the stepper.
    settled: AtomicBool,
    feedrate_scale: AtomicF32,
    /// Latest event, overwritten by a newer one.
    event: BlockingMutex<M, Cell<Option<MotionEvent>>>,
}

// SAFETY: a slot's block is written only by the producer while the slot is
// outside the queued range and read only while inside it; head and tail
// publish with release/acquire ordering.
unsafe impl<M: RawMutex + Sync, const N: usize> Sync for MotionShared<M, N> {}

impl<M: RawMutex, const N: usize> Default for MotionShared<M, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex, const N: usize> MotionShared<M, N> {
    const CAPACITY_IS_POWER_OF_TWO: () = assert!(N >= 2 && N.is_power_of_two());

    pub fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::CAPACITY_IS_POWER_OF_TWO;
        Self {
            slots: core::array::from_fn(|_| Slot::new()),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            counts: core::array::from_fn(|_| AtomicI32::new(0)),
            abort: AtomicBool::new(false),
            resync: AtomicBool::new(false),
            endstops: AtomicBool::new(false),
            settled: AtomicBool::new(true),
            feedrate_scale: AtomicF32::new(1.0),
            event: BlockingMutex::new(Cell::new(None)),
        }
    }

    /// Hand out the two ends of the ring. The borrow keeps a second pair
    /// from being created.
    pub fn split(&mut self) -> (Producer<'_, M, N>, Consumer<'_, M, N>) {
        let shared: &Self = self;
        (Producer { shared }, Consumer { shared })
    }

    /// Scale applied to every feedrate at buffering time, e.g. from a
    /// temperature governor. Values outside `0.0..=1.0` are clamped.
    pub fn set_feedrate_scale(&self, scale: f32) {
        let scale = if scale.is_finite() {
            scale.clamp(0.0, 1.0)
        } else {
            1.0
        };
        self.feedrate_scale.store(scale, Ordering::Relaxed);
    }

    pub fn feedrate_scale(&self) -> f32 {
        self.feedrate_scale.load(Ordering::Relaxed)
    }

    fn slot(&self, counter: usize) -> &Slot<M> {
        &self.slots[counter & (N - 1)]
    }

    fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        self.head.load(Ordering::Acquire).wrapping_sub(tail)
    }

    fn counts(&self) -> AxisArray<i32> {
        core::array::from_fn(|i| self.counts[i].load(Ordering::SeqCst))
    }
}

/// Foreground end of the ring, owned by the planner.
pub struct Producer<'a, M: RawMutex, const N: usize> {
    shared: &'a MotionShared<M, N>,
}

impl<'a, M: RawMutex, const N: usize> Producer<'a, M, N> {
    pub fn shared(&self) -> &'a MotionShared<M, N> {
        self.shared
    }

    pub fn len(&self) -> usize {
        self.shared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn free(&self) -> usize {
        N - self.len()
    }

    pub fn is_full(&self) -> bool {
        self.len() >= N
    }

    pub fn head(&self) -> usize {
        self.shared.head.load(Ordering::Relaxed)
    }

    pub fn tail(&self) -> usize {
        self.shared.tail.load(Ordering::Acquire)
    }

    /// Publish a block with its initial profile. Hands the block back when
    /// the ring is full.
    pub fn push(&mut self, block: Block, profile: Profile) -> Result<usize, Block> {
        if self.is_full() {
            return Err(block);
        }
        let head = self.head();
        let slot = self.shared.slot(head);
        // SAFETY: the slot is outside [tail, head), the consumer does not
        // read it until head is published below.
        unsafe { *slot.block.get() = block };
        slot.handoff.lock(|h| {
            h.set(Handoff {
                busy: false,
                profile,
            })
        });
        self.shared
            .head
            .store(head.wrapping_add(1), Ordering::Release);
        Ok(head)
    }

    /// The block queued at `counter`, which must be in the queued range.
    pub fn block(&self, counter: usize) -> &Block {
        // SAFETY: queued blocks are not written until the consumer releases
        // them, and only the producer can write them afterwards.
        unsafe { &*self.shared.slot(counter).block.get() }
    }

    pub fn profile(&self, counter: usize) -> Profile {
        self.shared
            .slot(counter)
            .handoff
            .lock(|h| h.get().profile)
    }

    pub fn is_busy(&self, counter: usize) -> bool {
        self.shared.slot(counter).handoff.lock(|h| h.get().busy)
    }

    /// Replace the profile of a queued block unless the stepper already
    /// started or retired it; in that case the profile it ran with is
    /// returned.
    pub fn commit_profile(&mut self, counter: usize, profile: Profile) -> Result<(), Profile> {
        let queued = counter.wrapping_sub(self.tail()) < self.head().wrapping_sub(self.tail());
        self.shared.slot(counter).handoff.lock(|h| {
            let mut handoff = h.get();
            if handoff.busy || !queued {
                return Err(handoff.profile);
            }
            handoff.profile = profile;
            h.set(handoff);
            Ok(())
        })
    }

    pub fn request_abort(&mut self) {
        self.shared.abort.store(true, Ordering::SeqCst);
    }

    pub fn abort_pending(&self) -> bool {
        self.shared.abort.load(Ordering::SeqCst)
    }

    /// Clear and return the flag the stepper raises after an endstop hit.
    pub fn take_resync(&mut self) -> bool {
        self.shared.resync.swap(false, Ordering::SeqCst)
    }

    pub fn resync_pending(&self) -> bool {
        self.shared.resync.load(Ordering::SeqCst)
    }

    pub fn counts(&self) -> AxisArray<i32> {
        self.shared.counts()
    }

    /// The stepper finished everything it took, delayed steps included.
    /// Only meaningful together with an empty ring.
    pub fn stepper_settled(&self) -> bool {
        self.shared.settled.load(Ordering::SeqCst)
    }

    pub fn set_endstops_enabled(&mut self, enabled: bool) {
        self.shared.endstops.store(enabled, Ordering::SeqCst);
    }

    pub fn try_take_event(&mut self) -> Option<MotionEvent> {
        self.shared.event.lock(|e| e.take())
    }
}

/// Interrupt end of the ring, owned by the stepper.
pub struct Consumer<'a, M: RawMutex, const N: usize> {
    shared: &'a MotionShared<M, N>,
}

impl<'a, M: RawMutex, const N: usize> Consumer<'a, M, N> {
    fn tail(&self) -> usize {
        self.shared.tail.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.shared.head.load(Ordering::Acquire) == self.tail()
    }

    /// The oldest queued block, without starting it.
    pub fn front(&self) -> Option<Block> {
        if self.is_empty() {
            return None;
        }
        // SAFETY: inside the queued range, see `Producer::block`.
        Some(unsafe { *self.shared.slot(self.tail()).block.get() })
    }

    /// Start the oldest block: mark it busy and take its final profile.
    pub fn take(&mut self) -> Option<(Block, Profile)> {
        let block = self.front()?;
        self.shared.settled.store(false, Ordering::SeqCst);
        let profile = self.shared.slot(self.tail()).handoff.lock(|h| {
            let mut handoff = h.get();
            handoff.busy = true;
            h.set(handoff);
            handoff.profile
        });
        Some((block, profile))
    }

    /// Retire the oldest block and give its slot back to the producer.
    pub fn release(&mut self) {
        let tail = self.tail();
        self.shared
            .tail
            .store(tail.wrapping_add(1), Ordering::Release);
    }

    /// Drop everything queued. Returns the number of blocks dropped.
    pub fn discard_all(&mut self) -> usize {
        let mut discarded = 0;
        while !self.is_empty() {
            self.release();
            discarded += 1;
        }
        discarded
    }

    /// Drop the queued continuation segments of the move that was just cut
    /// short, up to the next block that starts a move of its own.
    pub fn discard_continued(&mut self) -> usize {
        let mut discarded = 0;
        while let Some(block) = self.front() {
            if !block.is_continued() {
                break;
            }
            self.release();
            discarded += 1;
        }
        discarded
    }

    pub fn abort_requested(&self) -> bool {
        self.shared.abort.load(Ordering::SeqCst)
    }

    pub fn ack_abort(&mut self) {
        self.shared.abort.store(false, Ordering::SeqCst);
    }

    pub fn load_counts(&self) -> AxisArray<i32> {
        self.shared.counts()
    }

    pub fn publish_counts(&mut self, counts: &AxisArray<i32>) {
        for (shared, count) in self.shared.counts.iter().zip(counts) {
            shared.store(*count, Ordering::SeqCst);
        }
    }

    pub fn set_settled(&mut self, settled: bool) {
        self.shared.settled.store(settled, Ordering::SeqCst);
    }

    pub fn set_resync(&mut self) {
        self.shared.resync.store(true, Ordering::SeqCst);
    }

    pub fn endstops_enabled(&self) -> bool {
        self.shared.endstops.load(Ordering::Relaxed)
    }

    pub fn signal(&mut self, event: MotionEvent) {
        self.shared.event.lock(|e| e.set(Some(event)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

    type Shared = MotionShared<CriticalSectionRawMutex, 4>;

    fn block(steps: u32) -> Block {
        Block {
            steps: [steps, 0, 0, 0],
            step_event_count: steps,
            ..Default::default()
        }
    }

    #[test]
    fn blocks_come_out_in_order() {
        let mut shared = Shared::new();
        let (mut producer, mut consumer) = shared.split();
        for n in 1..=4 {
            assert!(producer.push(block(n), Profile::default()).is_ok());
        }
        assert!(producer.is_full());
        assert!(producer.push(block(5), Profile::default()).is_err());

        for n in 1..=4 {
            let (b, _) = consumer.take().unwrap();
            assert_eq!(b.step_event_count, n);
            consumer.release();
        }
        assert!(consumer.take().is_none());
        assert!(producer.is_empty());
    }

    #[test]
    fn counters_wrap_around_the_ring() {
        let mut shared = Shared::new();
        let (mut producer, mut consumer) = shared.split();
        for n in 0..11 {
            producer.push(block(n), Profile::default()).unwrap();
            assert_eq!(consumer.take().unwrap().0.step_event_count, n);
            consumer.release();
        }
        assert_eq!(producer.head(), 11);
        assert_eq!(producer.tail(), 11);
    }

    #[test]
    fn busy_block_keeps_its_profile() {
        let mut shared = Shared::new();
        let (mut producer, mut consumer) = shared.split();
        let first = Profile {
            initial_rate: 1,
            ..Default::default()
        };
        let second = Profile {
            initial_rate: 2,
            ..Default::default()
        };
        let counter = producer.push(block(10), first).unwrap();
        assert_eq!(producer.commit_profile(counter, second), Ok(()));

        let (_, running) = consumer.take().unwrap();
        assert_eq!(running, second);
        assert!(producer.is_busy(counter));
        assert_eq!(producer.commit_profile(counter, first), Err(second));
    }

    #[test]
    fn retired_block_refuses_a_new_profile() {
        let mut shared = Shared::new();
        let (mut producer, mut consumer) = shared.split();
        let planned = Profile {
            final_rate: 3,
            ..Default::default()
        };
        let counter = producer.push(block(10), planned).unwrap();
        consumer.take().unwrap();
        consumer.release();

        assert!(producer.is_busy(counter));
        assert_eq!(producer.commit_profile(counter, Profile::default()), Err(planned));

        // a queued block that was never started still takes one
        let next = producer.push(block(5), Profile::default()).unwrap();
        assert!(!producer.is_busy(next));
        assert_eq!(producer.commit_profile(next, planned), Ok(()));
        assert_eq!(producer.commit_profile(next.wrapping_add(1), planned), Err(Profile::default()));
    }

    #[test]
    fn newest_event_wins() {
        let mut shared = Shared::new();
        let (mut producer, mut consumer) = shared.split();
        assert_eq!(producer.try_take_event(), None);
        consumer.signal(MotionEvent::Aborted {
            discarded: 1,
            counts: [0; NUM_AXES],
        });
        consumer.signal(MotionEvent::Aborted {
            discarded: 2,
            counts: [0; NUM_AXES],
        });
        assert_eq!(
            producer.try_take_event(),
            Some(MotionEvent::Aborted {
                discarded: 2,
                counts: [0; NUM_AXES],
            })
        );
        assert_eq!(producer.try_take_event(), None);
    }

    #[test]
    fn discard_continued_stops_at_next_move() {
        use crate::block::BlockFlags;

        let mut shared = Shared::new();
        let (mut producer, mut consumer) = shared.split();
        let mut continued = block(1);
        continued.flags = BlockFlags::CONTINUED;
        producer.push(continued, Profile::default()).unwrap();
        producer.push(continued, Profile::default()).unwrap();
        producer.push(block(7), Profile::default()).unwrap();

        assert_eq!(consumer.discard_continued(), 2);
        assert_eq!(consumer.front().unwrap().step_event_count, 7);
        assert_eq!(consumer.discard_all(), 1);
        assert!(producer.is_empty());
    }

    #[test]
    fn feedrate_scale_is_clamped() {
        let shared = Shared::new();
        shared.set_feedrate_scale(1.5);
        assert_eq!(shared.feedrate_scale(), 1.0);
        shared.set_feedrate_scale(0.25);
        assert_eq!(shared.feedrate_scale(), 0.25);
        shared.set_feedrate_scale(f32::NAN);
        assert_eq!(shared.feedrate_scale(), 1.0);
    }
}
