use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use dbt_core::{tunables, Directory, GuestPc};

use crate::promoter::HotnessPromoter;
use crate::residency::ResidencyManager;

/// Reason a dispatched block returned control to the execution loop.
///
/// `None` is not a reason the loop ever acts on: a callee returning
/// with it set is a fatal contract violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    None,
    DirectBranch,
    IndirectBranch,
    Interp,
    Ecall,
}

/// Guest machine state threaded through both the interpreter and
/// native dispatch.
///
/// Implementors own the guest register file and must expose it as a
/// flat pointer that native blocks (compiled by an external code
/// generator) and the interpreter both agree on the layout of.
pub trait GuestState {
    fn pc(&self) -> GuestPc;
    fn set_pc(&mut self, pc: GuestPc);
    fn exit_reason(&self) -> ExitReason;
    fn clear_exit_reason(&mut self);
    fn reenter_pc(&self) -> GuestPc;
    /// Pointer passed as the sole argument to native blocks and to
    /// the interpreter.
    fn native_arg(&mut self) -> *mut u8;
}

/// Guest basic-block front end: lifts guest code at `pc` into an
/// opaque intermediate form the code generator can lower.
pub trait FrontEnd<S: GuestState> {
    type Source;
    fn genblock(&mut self, state: &S, pc: GuestPc) -> Self::Source;
}

/// Host code generator: lowers a front end's intermediate form into
/// native machine code bytes to append to the code arena.
pub trait CodeGen<S: GuestState, Src> {
    fn compile(&mut self, state: &S, source: &Src) -> Vec<u8>;
}

/// Guest instruction-set interpreter.
pub trait Interpreter<S: GuestState> {
    /// Step one basic block. Must set `state`'s exit reason and
    /// reenter PC before returning.
    fn exec_block_interp(&mut self, state: &mut S);
}

/// Host-callable signature every compiled native block must have:
/// take the guest state pointer, set the exit reason and reenter PC,
/// and return.
type NativeBlock = unsafe extern "C" fn(*mut u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    Interp,
    Native,
}

/// Dispatch and instrumentation counters, kept as engine state rather
/// than process-wide globals so multiple engines can coexist.
#[derive(Debug, Default)]
pub struct EngineStats {
    pub outer_iters: u64,
    pub inner_iters: u64,
    pub mode_switches: u64,
    pub interp_dispatches: u64,
    pub native_dispatches: u64,
}

impl fmt::Display for EngineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== engine stats ===")?;
        writeln!(f, "outer iters:       {}", self.outer_iters)?;
        writeln!(f, "inner iters:       {}", self.inner_iters)?;
        writeln!(f, "mode switches:     {}", self.mode_switches)?;
        writeln!(f, "interp dispatches: {}", self.interp_dispatches)?;
        writeln!(f, "native dispatches: {}", self.native_dispatches)
    }
}

/// Ties the directory, hotness promoter, and residency manager
/// together into the top-level interpret/compile/dispatch loop.
pub struct Engine {
    pub directory: Directory,
    promoter: HotnessPromoter,
    pub residency: ResidencyManager,
    logical_time: u64,
    last_tier: Option<Tier>,
    pc_trace: BufWriter<File>,
    pub stats: EngineStats,
}

impl Engine {
    /// Build an engine with default tunables, a code arena backed by
    /// `backing_path`, and a PC-trace log appended to `trace_path`.
    pub fn new(backing_path: &Path, trace_path: &Path) -> io::Result<Self> {
        Self::with_tunables(
            backing_path,
            trace_path,
            tunables::CACHE_SIZE,
            tunables::CACHE_ENTRY_SIZE,
            tunables::CACHE_HOT_COUNT,
            tunables::QUEUE_MAX_SIZE,
            tunables::ATTENUATION_ALPHA,
        )
    }

    /// Build an engine with explicit tunables, for tests and for
    /// workloads that need a smaller arena or a lower promotion
    /// threshold than the defaults.
    #[allow(clippy::too_many_arguments)]
    pub fn with_tunables(
        backing_path: &Path,
        trace_path: &Path,
        arena_size: usize,
        directory_capacity: usize,
        hot_count: u16,
        queue_capacity: usize,
        alpha: f64,
    ) -> io::Result<Self> {
        let directory = Directory::new(backing_path, arena_size, directory_capacity)?;
        let pc_trace = BufWriter::new(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(trace_path)?,
        );
        Ok(Self {
            directory,
            promoter: HotnessPromoter::new(hot_count),
            residency: ResidencyManager::new(queue_capacity, alpha),
            logical_time: 0,
            // The reference seeds its mode flag as interpreted, so a
            // cold-start interp dispatch is not itself a mode switch.
            last_tier: Some(Tier::Interp),
            pc_trace,
            stats: EngineStats::default(),
        })
    }

    /// Blend residency priorities within the queue. The spec defines
    /// no fixed trigger for this; callers choose a schedule (e.g.
    /// every N logical ticks or wall-clock epoch).
    pub fn attenuate(&mut self) {
        self.residency.attenuate(&mut self.directory);
    }

    pub fn logical_time(&self) -> u64 {
        self.logical_time
    }

    /// Flush the PC-trace log. Buffered writes are not durable until
    /// this is called (or the engine is dropped).
    pub fn flush_trace(&mut self) -> io::Result<()> {
        self.pc_trace.flush()
    }

    fn trace(&mut self, pc: GuestPc) {
        self.pc_trace
            .write_all(&pc.to_le_bytes())
            .expect("pc-trace log write failed");
    }

    fn note_tier(&mut self, tier: Tier) {
        if self.last_tier != Some(tier) {
            self.stats.mode_switches += 1;
            self.last_tier = Some(tier);
        }
        match tier {
            Tier::Interp => self.stats.interp_dispatches += 1,
            Tier::Native => self.stats.native_dispatches += 1,
        }
    }

    /// Run the guest until it executes `ecall`, alternating
    /// interpretation and native dispatch and promoting/compiling hot
    /// blocks along the way.
    ///
    /// # Safety
    /// The caller must ensure `state.native_arg()` points to a guest
    /// state layout compatible with the native blocks `gen` produces
    /// for this `state` type; the engine has no way to check this
    /// itself since the code generator is an opaque collaborator.
    pub unsafe fn step<S, F, G, I, Src>(
        &mut self,
        state: &mut S,
        front: &mut F,
        gen: &mut G,
        interp: &mut I,
    ) -> ExitReason
    where
        S: GuestState,
        F: FrontEnd<S, Source = Src>,
        G: CodeGen<S, Src>,
        I: Interpreter<S>,
    {
        loop {
            self.stats.outer_iters += 1;
            let pc = state.pc();
            assert_ne!(pc, 0, "pc 0 is reserved");

            let mut dispatch = self.directory.lookup(pc, self.promoter.threshold());
            let mut hot = true;
            if dispatch.is_none() {
                hot = self.promoter.is_hot(&mut self.directory, pc, self.logical_time);
                if hot {
                    let source = front.genblock(state, pc);
                    let code = gen.compile(state, &source);
                    dispatch = Some(self.directory.add(pc, &code, self.logical_time));
                }
            }

            let mut current = dispatch.filter(|_| hot);

            loop {
                self.stats.inner_iters += 1;
                state.clear_exit_reason();
                self.note_tier(if current.is_some() { Tier::Native } else { Tier::Interp });
                self.trace(state.pc());

                match current {
                    Some((idx, ptr)) => {
                        self.logical_time += 1;
                        self.residency
                            .on_native_execute(&mut self.directory, idx, self.logical_time);
                        // SAFETY: ptr was produced by Directory::add/lookup
                        // for a block the code generator compiled for this
                        // state type; the function contract is upheld by
                        // that collaborator.
                        let block: NativeBlock = std::mem::transmute(ptr);
                        block(state.native_arg());
                    }
                    None => interp.exec_block_interp(state),
                }

                let reason = state.exit_reason();
                assert_ne!(
                    reason,
                    ExitReason::None,
                    "callee returned without setting exit_reason"
                );

                match reason {
                    ExitReason::DirectBranch | ExitReason::IndirectBranch => {
                        let reenter = state.reenter_pc();
                        state.set_pc(reenter);
                        match self.directory.lookup(reenter, self.promoter.threshold()) {
                            Some(next) => {
                                current = Some(next);
                                continue;
                            }
                            None => break,
                        }
                    }
                    ExitReason::Interp => {
                        state.set_pc(state.reenter_pc());
                        current = None;
                        continue;
                    }
                    ExitReason::Ecall => {
                        state.set_pc(state.reenter_pc());
                        break;
                    }
                    ExitReason::None => unreachable!(),
                }
            }

            match state.exit_reason() {
                ExitReason::DirectBranch | ExitReason::IndirectBranch => continue,
                ExitReason::Ecall => return ExitReason::Ecall,
                other => unreachable!("unexpected outer-loop exit reason: {other:?}"),
            }
        }
    }
}
