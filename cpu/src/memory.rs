//! The shared memory array and each processor's access to it.
//!
//! All processors share one flat array of words.  Alongside each
//! word we keep a few bits of metadata which the emulated machine
//! cannot see:
//!
//! - `LOCKED`: a processor is part way through a read-modify-write
//!   of the word.
//! - `UNINITIALIZED`: the word has never been written.  Reading it is
//!   not an error (the value is zero) but it is often a sign of a
//!   problem, so we log it.
//! - `WATCHED`: accesses to the word are logged.
//!
//! The lock discipline is that a processor holds at most one word
//! lock at a time, and releases it with the write which completes the
//! read-modify-write.  Violations are logged and repaired by force
//! releasing the stale lock; they never deadlock.
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use tracing::{event, Level};

use base::prelude::*;

use crate::fault::Fault;
use crate::memorymap::BankMap;

const LOCKED: u8 = 1;
const UNINITIALIZED: u8 = 2;
const WATCHED: u8 = 4;

/// Spins between yields of the host thread while waiting for a word
/// lock.
const SPINS_PER_YIELD: u64 = 100;
/// Spins after which a wait for a word lock is reported as a probable
/// deadlock.
const DEADLOCK_SPINS: u64 = 1_000_000;

#[derive(Debug)]
struct MemoryCell {
    word: AtomicU64,
    meta: AtomicU8,
}

impl MemoryCell {
    fn new() -> MemoryCell {
        MemoryCell {
            word: AtomicU64::new(0),
            meta: AtomicU8::new(UNINITIALIZED),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageOutOfRange {
    pub start: usize,
    pub len: usize,
    pub size: usize,
}

impl Display for ImageOutOfRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(
            f,
            "{} words at {:o} do not fit in a memory of {} words",
            self.len, self.start, self.size
        )
    }
}

impl Error for ImageOutOfRange {}

/// The memory shared by all processors.
#[derive(Debug)]
pub struct SharedMemory {
    cells: Box<[MemoryCell]>,
}

impl SharedMemory {
    pub fn new(words: usize) -> SharedMemory {
        SharedMemory {
            cells: (0..words).map(|_| MemoryCell::new()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Copy a memory image into the array, starting at index `start`.
    pub fn load(&self, start: usize, image: &[Word36]) -> Result<(), ImageOutOfRange> {
        let cells = start
            .checked_add(image.len())
            .and_then(|end| self.cells.get(start..end))
            .ok_or(ImageOutOfRange {
                start,
                len: image.len(),
                size: self.cells.len(),
            })?;
        for (cell, word) in cells.iter().zip(image) {
            cell.word.store(word.bits(), Ordering::Relaxed);
            cell.meta.fetch_and(!UNINITIALIZED, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Read a word without any of the checks or logging of a
    /// processor access.  For the host's use (dumps and tests).
    pub fn peek(&self, index: usize) -> Option<Word36> {
        self.cells
            .get(index)
            .map(|cell| Word36::truncating(cell.word.load(Ordering::Acquire)))
    }

    pub fn set_watch(&self, index: usize, watched: bool) -> bool {
        match self.cells.get(index) {
            Some(cell) => {
                if watched {
                    cell.meta.fetch_or(WATCHED, Ordering::Relaxed);
                } else {
                    cell.meta.fetch_and(!WATCHED, Ordering::Relaxed);
                }
                true
            }
            None => false,
        }
    }

    pub fn is_locked(&self, index: usize) -> bool {
        self.cells
            .get(index)
            .is_some_and(|cell| cell.meta.load(Ordering::Acquire) & LOCKED != 0)
    }

    fn release(&self, index: usize) {
        if let Some(cell) = self.cells.get(index) {
            cell.meta.fetch_and(!LOCKED, Ordering::Release);
        }
    }
}

/// Whether read-modify-write sequences interlock with other
/// processors.  Only needed when processors run on separate host
/// threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordLocking {
    Interlocked,
    Uncontended,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockStats {
    pub locks_taken: u64,
    pub immediate: u64,
    pub contended: u64,
    pub total_spins: u64,
    pub max_spins: u64,
    pub yields: u64,
    pub violations: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Read,
    Write,
}

impl Display for Direction {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.write_str(match self {
            Direction::Read => "read",
            Direction::Write => "write",
        })
    }
}

/// One processor's view of memory.
#[derive(Debug)]
pub struct MemoryAccess {
    cpu: usize,
    memory: Arc<SharedMemory>,
    map: BankMap,
    locking: WordLocking,
    held: Option<usize>,
    stats: LockStats,
    /// The instruction counter, for watch-point messages.
    ic: Word18,
}

impl MemoryAccess {
    pub fn new(cpu: usize, memory: Arc<SharedMemory>, map: BankMap, locking: WordLocking) -> MemoryAccess {
        MemoryAccess {
            cpu,
            memory,
            map,
            locking,
            held: None,
            stats: LockStats::default(),
            ic: Word18::ZERO,
        }
    }

    pub fn shared(&self) -> &Arc<SharedMemory> {
        &self.memory
    }

    pub fn map(&self) -> &BankMap {
        &self.map
    }

    pub fn set_map(&mut self, map: BankMap) {
        self.map = map;
    }

    pub fn stats(&self) -> &LockStats {
        &self.stats
    }

    pub fn holds_lock(&self) -> bool {
        self.held.is_some()
    }

    pub(crate) fn set_ic(&mut self, ic: Word18) {
        self.ic = ic;
    }

    /// Return (and reset) the number of lock-discipline violations
    /// since the last call.
    pub fn take_violations(&mut self) -> u64 {
        std::mem::take(&mut self.stats.violations)
    }

    fn index(&self, address: Word24) -> Result<usize, Fault> {
        match self.map.index_of(address) {
            Some(index) if index < self.memory.len() => Ok(index),
            _ => Err(Fault::nonexistent_address(address)),
        }
    }

    fn cell(&self, index: usize) -> &MemoryCell {
        &self.memory.cells[index]
    }

    fn note_access(&self, index: usize, meta: u8, direction: Direction, value: Word36) {
        if meta & WATCHED != 0 {
            event!(
                Level::WARN,
                "cpu {} ic {:06o}: watched location {:o} {} value {:012o}",
                self.cpu,
                self.ic,
                index,
                direction,
                value
            );
        }
    }

    fn load(&self, index: usize) -> Word36 {
        let cell = self.cell(index);
        let meta = cell.meta.load(Ordering::Relaxed);
        let value = Word36::truncating(cell.word.load(Ordering::Acquire));
        if meta & UNINITIALIZED != 0 {
            event!(
                Level::DEBUG,
                "cpu {} ic {:06o}: read of uninitialized location {:o}",
                self.cpu,
                self.ic,
                index
            );
        }
        self.note_access(index, meta, Direction::Read, value);
        value
    }

    fn store(&self, index: usize, value: Word36) {
        let cell = self.cell(index);
        cell.word.store(value.bits(), Ordering::Release);
        let meta = cell.meta.fetch_and(!UNINITIALIZED, Ordering::Relaxed);
        self.note_access(index, meta, Direction::Write, value);
    }

    pub fn read(&mut self, address: Word24) -> Result<Word36, Fault> {
        let index = self.index(address)?;
        Ok(self.load(index))
    }

    pub fn write(&mut self, address: Word24, value: Word36) -> Result<(), Fault> {
        let index = self.index(address)?;
        self.store(index, value);
        Ok(())
    }

    /// Read the even/odd pair containing `address`.
    pub fn read_pair(&mut self, address: Word24) -> Result<(Word36, Word36), Fault> {
        let even = address.and(!1);
        let odd = even | Word24::ONE;
        Ok((self.read(even)?, self.read(odd)?))
    }

    pub fn write_pair(&mut self, address: Word24, even: Word36, odd: Word36) -> Result<(), Fault> {
        let even_address = address.and(!1);
        // Check both before changing either.
        let e = self.index(even_address)?;
        let o = self.index(even_address | Word24::ONE)?;
        self.store(e, even);
        self.store(o, odd);
        Ok(())
    }

    /// Store those bits of `value` selected by `zone`, leaving the
    /// others unchanged.
    pub fn write_zone(&mut self, address: Word24, value: Word36, zone: Word36) -> Result<(), Fault> {
        let old = self.read_lock(address)?;
        let new = (old & !zone) | (value & zone);
        self.write_unlock(address, new)
    }

    /// Begin a read-modify-write: lock the word and read it.
    pub fn read_lock(&mut self, address: Word24) -> Result<Word36, Fault> {
        let index = self.index(address)?;
        match self.held {
            Some(held) if held == index => {
                self.stats.violations += 1;
                event!(
                    Level::ERROR,
                    "cpu {} ic {:06o}: location {:o} is already locked by this processor",
                    self.cpu,
                    self.ic,
                    index
                );
                return Ok(self.load(index));
            }
            Some(held) => {
                self.stats.violations += 1;
                event!(
                    Level::ERROR,
                    "cpu {} ic {:06o}: locking {:o} while still holding {:o}; releasing the stale lock",
                    self.cpu,
                    self.ic,
                    index,
                    held
                );
                self.memory.release(held);
                self.held = None;
            }
            None => (),
        }
        self.acquire(index);
        self.held = Some(index);
        Ok(self.load(index))
    }

    /// Complete a read-modify-write: store the word and unlock it.
    pub fn write_unlock(&mut self, address: Word24, value: Word36) -> Result<(), Fault> {
        let index = self.index(address)?;
        match self.held.take() {
            Some(held) if held == index => {
                self.store(index, value);
                self.memory.release(index);
            }
            Some(held) => {
                self.stats.violations += 1;
                event!(
                    Level::ERROR,
                    "cpu {} ic {:06o}: unlocking {:o} but the lock held is on {:o}; releasing it",
                    self.cpu,
                    self.ic,
                    index,
                    held
                );
                self.memory.release(held);
                self.store_unheld(index, value);
            }
            None => {
                self.stats.violations += 1;
                event!(
                    Level::ERROR,
                    "cpu {} ic {:06o}: unlocking {:o} which was not locked",
                    self.cpu,
                    self.ic,
                    index
                );
                self.store_unheld(index, value);
            }
        }
        Ok(())
    }

    /// Store to a word this processor has not locked.  Any lock on it
    /// belongs to another processor and must survive the store.
    fn store_unheld(&mut self, index: usize, value: Word36) {
        match self.locking {
            WordLocking::Interlocked => {
                self.acquire(index);
                self.store(index, value);
                self.memory.release(index);
            }
            WordLocking::Uncontended => self.store(index, value),
        }
    }

    /// Release any word lock this processor holds.  Used when a fault
    /// interrupts a read-modify-write and when the engine stops.
    pub fn unlock_all(&mut self) {
        if let Some(held) = self.held.take() {
            event!(
                Level::DEBUG,
                "cpu {}: releasing lock on {:o}",
                self.cpu,
                held
            );
            self.memory.release(held);
        }
    }

    fn acquire(&mut self, index: usize) {
        self.stats.locks_taken += 1;
        let cell = &self.memory.cells[index];
        match self.locking {
            WordLocking::Uncontended => {
                cell.meta.fetch_or(LOCKED, Ordering::Acquire);
                self.stats.immediate += 1;
            }
            WordLocking::Interlocked => {
                let mut spins: u64 = 0;
                let mut reported = false;
                while cell.meta.fetch_or(LOCKED, Ordering::Acquire) & LOCKED != 0 {
                    spins += 1;
                    if spins % SPINS_PER_YIELD == 0 {
                        self.stats.yields += 1;
                        std::thread::yield_now();
                    } else {
                        std::hint::spin_loop();
                    }
                    if spins == DEADLOCK_SPINS && !reported {
                        reported = true;
                        event!(
                            Level::ERROR,
                            "cpu {} ic {:06o}: waited {} spins for the lock on {:o}; possible deadlock",
                            self.cpu,
                            self.ic,
                            spins,
                            index
                        );
                    }
                }
                if spins == 0 {
                    self.stats.immediate += 1;
                } else {
                    self.stats.contended += 1;
                    self.stats.total_spins += spins;
                    self.stats.max_spins = self.stats.max_spins.max(spins);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memorymap::BANK_WORDS;

    fn access(memory: &Arc<SharedMemory>, cpu: usize, locking: WordLocking) -> MemoryAccess {
        let map = BankMap::identity(memory.len(), memory.len());
        MemoryAccess::new(cpu, Arc::clone(memory), map, locking)
    }

    fn addr(n: u32) -> Word24 {
        Word24::truncating(n)
    }

    #[test]
    fn test_read_write() {
        let memory = Arc::new(SharedMemory::new(BANK_WORDS));
        let mut m = access(&memory, 0, WordLocking::Uncontended);
        assert_eq!(m.read(addr(0o100)), Ok(Word36::ZERO));
        m.write(addr(0o100), Word36::truncating(0o123)).expect("mapped");
        assert_eq!(m.read(addr(0o100)), Ok(Word36::truncating(0o123)));
        assert_eq!(memory.peek(0o100), Some(Word36::truncating(0o123)));
    }

    #[test]
    fn test_unmapped_address_faults() {
        let memory = Arc::new(SharedMemory::new(BANK_WORDS));
        let mut m = access(&memory, 0, WordLocking::Uncontended);
        let fault = m
            .read(addr(BANK_WORDS as u32))
            .expect_err("beyond the end of memory");
        assert_eq!(fault.code, crate::fault::FaultCode::STR);
    }

    #[test]
    fn test_pairs_are_aligned() {
        let memory = Arc::new(SharedMemory::new(BANK_WORDS));
        let mut m = access(&memory, 0, WordLocking::Uncontended);
        m.write_pair(addr(0o11), Word36::truncating(1), Word36::truncating(2))
            .expect("mapped");
        assert_eq!(memory.peek(0o10), Some(Word36::truncating(1)));
        assert_eq!(memory.peek(0o11), Some(Word36::truncating(2)));
        assert_eq!(
            m.read_pair(addr(0o10)),
            Ok((Word36::truncating(1), Word36::truncating(2)))
        );
    }

    #[test]
    fn test_zone_write() {
        let memory = Arc::new(SharedMemory::new(BANK_WORDS));
        memory
            .load(5, &[Word36::truncating(0o111_111_111_111)])
            .expect("fits");
        let mut m = access(&memory, 0, WordLocking::Interlocked);
        m.write_zone(
            addr(5),
            Word36::truncating(0o777_777_777_777),
            Word36::truncating(0o000_000_777_000),
        )
        .expect("mapped");
        assert_eq!(memory.peek(5), Some(Word36::truncating(0o111_111_777_111)));
        assert!(!memory.is_locked(5));
        assert!(!m.holds_lock());
    }

    #[test]
    fn test_second_lock_releases_the_first() {
        let memory = Arc::new(SharedMemory::new(BANK_WORDS));
        let mut m = access(&memory, 0, WordLocking::Interlocked);
        m.read_lock(addr(1)).expect("mapped");
        assert!(memory.is_locked(1));
        m.read_lock(addr(2)).expect("mapped");
        assert!(!memory.is_locked(1));
        assert!(memory.is_locked(2));
        assert_eq!(m.take_violations(), 1);
        m.write_unlock(addr(2), Word36::ONE).expect("mapped");
        assert!(!memory.is_locked(2));
        assert_eq!(m.take_violations(), 0);
    }

    #[test]
    fn test_unlock_of_wrong_address() {
        let memory = Arc::new(SharedMemory::new(BANK_WORDS));
        let mut m = access(&memory, 0, WordLocking::Interlocked);
        m.read_lock(addr(1)).expect("mapped");
        m.write_unlock(addr(3), Word36::ONE).expect("mapped");
        // The stale lock is gone and the write still happened.
        assert!(!memory.is_locked(1));
        assert!(!memory.is_locked(3));
        assert_eq!(memory.peek(3), Some(Word36::ONE));
        assert_eq!(m.stats().violations, 1);
    }

    #[test]
    fn test_stray_unlock_keeps_other_processors_lock() {
        let memory = Arc::new(SharedMemory::new(BANK_WORDS));
        let mut p = access(&memory, 0, WordLocking::Uncontended);
        let mut q = access(&memory, 1, WordLocking::Uncontended);
        p.read_lock(addr(1)).expect("mapped");
        q.write_unlock(addr(1), Word36::ONE).expect("mapped");
        assert!(p.holds_lock());
        assert!(memory.is_locked(1));
        assert_eq!(memory.peek(1), Some(Word36::ONE));
        assert_eq!(q.stats().violations, 1);
        p.write_unlock(addr(1), Word36::truncating(2)).expect("mapped");
        assert!(!memory.is_locked(1));
        assert_eq!(p.stats().violations, 0);
    }

    #[test]
    fn test_stray_unlock_waits_for_interlocked_holder() {
        let memory = Arc::new(SharedMemory::new(BANK_WORDS));
        let mut p = access(&memory, 0, WordLocking::Interlocked);
        p.read_lock(addr(1)).expect("mapped");
        std::thread::scope(|s| {
            let shared = Arc::clone(&memory);
            let waiter = s.spawn(move || {
                let mut q = access(&shared, 1, WordLocking::Interlocked);
                q.write_unlock(addr(1), Word36::truncating(5)).expect("mapped");
                q.stats().violations
            });
            std::thread::sleep(std::time::Duration::from_millis(20));
            // The other processor cannot store until the lock is released.
            assert!(memory.is_locked(1));
            assert_eq!(memory.peek(1), Some(Word36::ZERO));
            p.write_unlock(addr(1), Word36::truncating(7)).expect("mapped");
            assert_eq!(waiter.join().expect("no panic"), 1);
        });
        assert!(!memory.is_locked(1));
        assert_eq!(memory.peek(1), Some(Word36::truncating(5)));
    }

    #[test]
    fn test_unlock_all() {
        let memory = Arc::new(SharedMemory::new(BANK_WORDS));
        let mut m = access(&memory, 0, WordLocking::Interlocked);
        m.read_lock(addr(7)).expect("mapped");
        m.unlock_all();
        assert!(!memory.is_locked(7));
        assert!(!m.holds_lock());
    }

    #[test]
    fn test_load_out_of_range() {
        let memory = SharedMemory::new(4);
        assert_eq!(
            memory.load(3, &[Word36::ZERO, Word36::ZERO]),
            Err(ImageOutOfRange {
                start: 3,
                len: 2,
                size: 4
            })
        );
    }

    #[test]
    fn test_contended_increments_are_not_lost() {
        let memory = Arc::new(SharedMemory::new(BANK_WORDS));
        const PER_THREAD: u64 = 2000;
        std::thread::scope(|s| {
            for cpu in 0..4 {
                let memory = Arc::clone(&memory);
                s.spawn(move || {
                    let mut m = access(&memory, cpu, WordLocking::Interlocked);
                    for _ in 0..PER_THREAD {
                        let old = m.read_lock(addr(0o40)).expect("mapped");
                        m.write_unlock(addr(0o40), old.wrapping_add(Word36::ONE))
                            .expect("mapped");
                    }
                    assert_eq!(m.stats().violations, 0);
                });
            }
        });
        assert_eq!(memory.peek(0o40), Some(Word36::truncating(4 * PER_THREAD)));
    }
}
