use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{fence, AtomicIsize, Ordering};

// =============================================================================
// CHASE-LEV WORK-STEALING DEQUE
// =============================================================================
//
// Fixed-capacity variant of the Chase-Lev deque (Arora/Blumofe/Plaxton
// lineage), specialized for the dispatcher:
//
// - `bottom` is owned by one worker thread. The owner pushes and pops at
//   the bottom (LIFO, best cache locality for freshly spawned work).
// - `top` is shared. Thieves pop at the top (FIFO, oldest work first) and
//   race each other - and the owner on the last item - with a CAS.
// - The buffer never grows; a full deque rejects the push and the
//   dispatcher spills to a sibling worker instead. This keeps memory
//   bounded and avoids reclamation machinery entirely.
//
// The SeqCst fences in `pop` and `steal` order the owner's bottom update
// against the thief's top read; this is the published algorithm's
// requirement, not an optimization.
//
// Speculative reads: `steal` copies the slot before its CAS. On CAS
// failure the copy is forgotten, not dropped - the item is still owned by
// whoever won the race.
//
// =============================================================================

/// Fixed-capacity work-stealing deque.
///
/// One owner pushes/pops the bottom; any number of thieves steal from the
/// top. Capacity must be a power of two.
pub struct StealDeque<T> {
    /// Thief end, advanced by CAS.
    top: CachePadded<AtomicIsize>,
    /// Owner end.
    bottom: CachePadded<AtomicIsize>,
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
}

// SAFETY: the protocol above confines each slot to a single accessor at a
// time; T only needs to move between threads.
unsafe impl<T: Send> Send for StealDeque<T> {}
unsafe impl<T: Send> Sync for StealDeque<T> {}

impl<T> StealDeque<T> {
    /// Deque holding up to `capacity` items (power of two).
    pub fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two(), "deque capacity must be a power of two");
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || UnsafeCell::new(MaybeUninit::uninit()));
        Self {
            top: CachePadded::new(AtomicIsize::new(0)),
            bottom: CachePadded::new(AtomicIsize::new(0)),
            slots: slots.into_boxed_slice(),
            mask: capacity - 1,
        }
    }

    /// Items currently enqueued (approximate under concurrency).
    pub fn len(&self) -> usize {
        let b = self.bottom.load(Ordering::Relaxed);
        let t = self.top.load(Ordering::Relaxed);
        b.saturating_sub(t).max(0) as usize
    }

    /// True when no item is enqueued (approximate under concurrency).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Capacity in items.
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Owner: push at the bottom. Returns the item when the deque is full.
    ///
    /// Must only be called by the owning worker.
    pub fn push(&self, item: T) -> Result<(), T> {
        let b = self.bottom.load(Ordering::Relaxed);
        let t = self.top.load(Ordering::Acquire);
        if (b - t) as usize >= self.capacity() {
            return Err(item);
        }
        // SAFETY: slot b is past every live item; only the owner writes here.
        unsafe {
            (*self.slots[(b as usize) & self.mask].get()).write(item);
        }
        self.bottom.store(b + 1, Ordering::Release);
        Ok(())
    }

    /// Owner: pop at the bottom (LIFO).
    ///
    /// Must only be called by the owning worker.
    pub fn pop(&self) -> Option<T> {
        let b = self.bottom.load(Ordering::Relaxed) - 1;
        self.bottom.store(b, Ordering::Relaxed);
        fence(Ordering::SeqCst);
        let t = self.top.load(Ordering::Relaxed);

        if t > b {
            // Already empty; restore bottom.
            self.bottom.store(b + 1, Ordering::Relaxed);
            return None;
        }

        // SAFETY: slot b held a live item; the fence ordered our bottom
        // update before the top read, so thieves see the shrunken deque.
        let item = unsafe { (*self.slots[(b as usize) & self.mask].get()).assume_init_read() };

        if t == b {
            // Last item: race the thieves for it.
            let won = self
                .top
                .compare_exchange(t, t + 1, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok();
            self.bottom.store(b + 1, Ordering::Relaxed);
            if won {
                return Some(item);
            }
            // A thief took it; our copy must not be dropped.
            std::mem::forget(item);
            return None;
        }

        Some(item)
    }

    /// Thief: steal from the top (FIFO).
    ///
    /// Safe from any thread.
    pub fn steal(&self) -> Steal<T> {
        let t = self.top.load(Ordering::Acquire);
        fence(Ordering::SeqCst);
        let b = self.bottom.load(Ordering::Acquire);

        if t >= b {
            return Steal::Empty;
        }

        // Speculative copy; ownership is only taken if the CAS wins.
        // SAFETY: slot t is within [top, bottom) and initialized.
        let item = unsafe { (*self.slots[(t as usize) & self.mask].get()).assume_init_read() };

        if self
            .top
            .compare_exchange(t, t + 1, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
        {
            Steal::Taken(item)
        } else {
            // Lost the race; the winner owns the item.
            std::mem::forget(item);
            Steal::Retry
        }
    }
}

impl<T> Drop for StealDeque<T> {
    fn drop(&mut self) {
        let t = self.top.load(Ordering::Relaxed);
        let b = self.bottom.load(Ordering::Relaxed);
        for i in t..b {
            // SAFETY: [top, bottom) holds live items and we have &mut self.
            unsafe {
                (*self.slots[(i as usize) & self.mask].get()).assume_init_drop();
            }
        }
    }
}

/// Outcome of a steal attempt.
#[derive(Debug)]
pub enum Steal<T> {
    /// Nothing to steal.
    Empty,
    /// Lost a race; trying again may succeed.
    Retry,
    /// Item taken from the victim.
    Taken(T),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_owner_lifo_order() {
        let deque = StealDeque::new(8);
        deque.push(1).unwrap();
        deque.push(2).unwrap();
        deque.push(3).unwrap();
        assert_eq!(deque.pop(), Some(3));
        assert_eq!(deque.pop(), Some(2));
        assert_eq!(deque.pop(), Some(1));
        assert_eq!(deque.pop(), None);
    }

    #[test]
    fn test_thief_fifo_order() {
        let deque = StealDeque::new(8);
        deque.push(1).unwrap();
        deque.push(2).unwrap();
        match deque.steal() {
            Steal::Taken(v) => assert_eq!(v, 1),
            other => panic!("expected oldest item, got {other:?}"),
        }
    }

    #[test]
    fn test_full_deque_returns_item() {
        let deque = StealDeque::new(2);
        deque.push(1).unwrap();
        deque.push(2).unwrap();
        assert_eq!(deque.push(3), Err(3));
    }

    #[test]
    fn test_concurrent_steal_no_loss_no_duplication() {
        const ITEMS: usize = 10_000;
        const THIEVES: usize = 4;

        let deque = Arc::new(StealDeque::new(1 << 14));
        let taken = Arc::new(AtomicUsize::new(0));
        let sum = Arc::new(AtomicUsize::new(0));

        for i in 0..ITEMS {
            deque.push(i).unwrap();
        }

        let thieves: Vec<_> = (0..THIEVES)
            .map(|_| {
                let deque = Arc::clone(&deque);
                let taken = Arc::clone(&taken);
                let sum = Arc::clone(&sum);
                thread::spawn(move || loop {
                    match deque.steal() {
                        Steal::Taken(v) => {
                            sum.fetch_add(v, Ordering::Relaxed);
                            taken.fetch_add(1, Ordering::Relaxed);
                        }
                        Steal::Retry => {}
                        Steal::Empty => {
                            if taken.load(Ordering::Relaxed) >= ITEMS {
                                break;
                            }
                            thread::yield_now();
                        }
                    }
                })
            })
            .collect();

        // The owner competes at the other end.
        let mut owner_sum = 0usize;
        while let Some(v) = deque.pop() {
            owner_sum += v;
            taken.fetch_add(1, Ordering::Relaxed);
        }
        sum.fetch_add(owner_sum, Ordering::Relaxed);

        for h in thieves {
            h.join().unwrap();
        }

        assert_eq!(taken.load(Ordering::Relaxed), ITEMS);
        assert_eq!(sum.load(Ordering::Relaxed), ITEMS * (ITEMS - 1) / 2);
    }

    #[test]
    fn test_drop_releases_pending_items() {
        static DROPS: AtomicUsize = AtomicUsize::new(0);
        #[derive(Debug)]
        struct Tracked;
        impl Drop for Tracked {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Ordering::SeqCst);
            }
        }

        DROPS.store(0, Ordering::SeqCst);
        {
            let deque = StealDeque::new(8);
            for _ in 0..5 {
                deque.push(Tracked).unwrap();
            }
            let _ = deque.pop();
        }
        assert_eq!(DROPS.load(Ordering::SeqCst), 5);
    }
}
