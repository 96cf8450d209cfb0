use std::io;
use std::path::Path;

use crate::arena::CodeArena;
use crate::tunables::MAX_SEARCH_COUNT;

/// A guest program counter. `0` is reserved (`SENTINEL_PC`) and is
/// never a legitimate value to look up, touch, or compile.
pub type GuestPc = u64;

/// Reserved sentinel meaning "vacant slot" in the directory.
pub const SENTINEL_PC: GuestPc = 0;

/// One directory slot: the translation metadata for a single guest
/// PC once it has been seen at least once.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub pc: GuestPc,
    /// Byte offset into the code arena. Valid only once a block has
    /// actually been compiled for this PC.
    pub offset: u64,
    /// Saturating interpretation-visit count.
    pub hot: u16,
    pub last_logical_time: u64,
    pub reused_distance: u64,
    pub priority: f64,
    pub period_priority: f64,
    /// Fast-tier residency flag (see the residency manager).
    pub in_dram: bool,
}

impl CacheEntry {
    fn vacant() -> Self {
        Self {
            pc: SENTINEL_PC,
            offset: 0,
            hot: 0,
            last_logical_time: 0,
            reused_distance: 0,
            priority: 0.0,
            period_priority: 0.0,
            in_dram: false,
        }
    }

    fn is_vacant(&self) -> bool {
        self.pc == SENTINEL_PC
    }
}

/// Open-addressed hash table mapping guest PCs to arena offsets, with
/// the code arena they point into.
///
/// Linear probing modulo the slot count; slots are never freed once
/// occupied, since both the hotness counter and the arena itself have
/// no notion of deletion.
pub struct Directory {
    entries: Vec<CacheEntry>,
    arena: CodeArena,
}

impl Directory {
    /// Create a directory with `capacity` slots over a freshly
    /// allocated code arena of `arena_size` bytes backed by
    /// `backing_path`.
    pub fn new(backing_path: &Path, arena_size: usize, capacity: usize) -> io::Result<Self> {
        assert!(capacity > 0, "directory must have at least one slot");
        Ok(Self {
            entries: (0..capacity).map(|_| CacheEntry::vacant()).collect(),
            arena: CodeArena::new(backing_path, arena_size)?,
        })
    }

    fn hash(&self, pc: GuestPc) -> usize {
        (pc as usize) % self.entries.len()
    }

    /// Probe for `pc`. Returns the slot index if found, `None` if a
    /// vacant slot is reached first (meaning `pc` has never been
    /// seen).
    ///
    /// # Panics
    /// Panics if more than `MAX_SEARCH_COUNT` slots are probed
    /// without resolving — the directory is undersized for the
    /// workload, which this spec treats as fatal.
    fn probe(&self, pc: GuestPc) -> Option<usize> {
        let mut idx = self.hash(pc);
        for _ in 0..MAX_SEARCH_COUNT {
            let e = &self.entries[idx];
            if e.is_vacant() {
                return None;
            }
            if e.pc == pc {
                return Some(idx);
            }
            idx = (idx + 1) % self.entries.len();
        }
        panic!("directory probe limit exceeded for pc {pc:#x}");
    }

    /// Probe for `pc`, initializing the first vacant slot reached if
    /// `pc` is absent.
    fn probe_or_create(&mut self, pc: GuestPc, now: u64) -> usize {
        let mut idx = self.hash(pc);
        for _ in 0..MAX_SEARCH_COUNT {
            if self.entries[idx].is_vacant() {
                let e = &mut self.entries[idx];
                e.pc = pc;
                e.last_logical_time = now;
                return idx;
            }
            if self.entries[idx].pc == pc {
                return idx;
            }
            idx = (idx + 1) % self.entries.len();
        }
        panic!("directory probe limit exceeded for pc {pc:#x}");
    }

    /// Shared access to a directory slot by index.
    pub fn entry(&self, idx: usize) -> &CacheEntry {
        &self.entries[idx]
    }

    /// Mutable access to a directory slot by index.
    pub fn entry_mut(&mut self, idx: usize) -> &mut CacheEntry {
        &mut self.entries[idx]
    }

    /// Look up a translated, hot block for `pc`.
    ///
    /// A pure function of directory state: repeated calls without an
    /// intervening `touch`/`add` return the same answer. Never
    /// creates an entry.
    pub fn lookup(&self, pc: GuestPc, hot_count: u16) -> Option<(usize, *const u8)> {
        assert_ne!(pc, SENTINEL_PC, "pc 0 is reserved");
        let idx = self.probe(pc)?;
        let e = &self.entries[idx];
        if e.hot >= hot_count {
            Some((idx, self.arena.ptr_at(e.offset as usize)))
        } else {
            None
        }
    }

    /// Record one interpreted visit to `pc`, creating its entry if
    /// this is the first visit, and return the updated (saturating)
    /// hotness count.
    pub fn touch(&mut self, pc: GuestPc, hot_count: u16, now: u64) -> u16 {
        assert_ne!(pc, SENTINEL_PC, "pc 0 is reserved");
        let idx = self.probe_or_create(pc, now);
        let e = &mut self.entries[idx];
        if e.hot < hot_count {
            e.hot += 1;
        }
        e.hot
    }

    /// Append `code` to the arena for `pc` and record its offset.
    ///
    /// Returns the directory index and host entry point of the new
    /// block. A block written for a given PC is never overwritten.
    pub fn add(&mut self, pc: GuestPc, code: &[u8], now: u64) -> (usize, *const u8) {
        assert_ne!(pc, SENTINEL_PC, "pc 0 is reserved");
        let start = self.arena.append(code);
        let idx = self.probe_or_create(pc, now);
        let e = &mut self.entries[idx];
        e.offset = start as u64;
        e.last_logical_time = now;
        (idx, self.arena.ptr_at(start))
    }

    /// Directory slot count (N).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bytes currently written to the backing arena.
    pub fn arena_offset(&self) -> usize {
        self.arena.offset()
    }

    /// Total arena capacity in bytes.
    pub fn arena_capacity(&self) -> usize {
        self.arena.capacity()
    }
}
