//! A synthetic guest used only by the engine-level integration tests:
//! a handful of `GuestOp`s, an interpreter that executes them in plain
//! Rust, and a hand-assembled x86-64 encoder that plays the role of an
//! external code generator without requiring a real guest ISA.

#![allow(dead_code)]

use std::collections::HashMap;
use std::rc::Rc;

use dbt_exec::{CodeGen, ExitReason, FrontEnd, GuestState, Interpreter};

const EXIT_REASON_OFF: i32 = 8;
const REENTER_PC_OFF: i32 = 16;
const COUNTER_OFF: i32 = 24;

/// Guest register file for the synthetic programs below. Field offsets
/// are load-bearing: the hand-assembled native blocks poke them
/// directly by byte offset, the same contract a real code generator
/// would have with its state layout.
#[repr(C)]
#[derive(Debug, Default)]
pub struct DemoState {
    pub pc: u64,
    pub exit_reason: u32,
    pub _pad: u32,
    pub reenter_pc: u64,
    pub counter: u64,
}

fn encode_reason(r: ExitReason) -> u32 {
    match r {
        ExitReason::None => 0,
        ExitReason::DirectBranch => 1,
        ExitReason::IndirectBranch => 2,
        ExitReason::Interp => 3,
        ExitReason::Ecall => 4,
    }
}

fn decode_reason(v: u32) -> ExitReason {
    match v {
        0 => ExitReason::None,
        1 => ExitReason::DirectBranch,
        2 => ExitReason::IndirectBranch,
        3 => ExitReason::Interp,
        4 => ExitReason::Ecall,
        other => panic!("unknown exit reason byte {other}"),
    }
}

impl GuestState for DemoState {
    fn pc(&self) -> u64 {
        self.pc
    }
    fn set_pc(&mut self, pc: u64) {
        self.pc = pc;
    }
    fn exit_reason(&self) -> ExitReason {
        decode_reason(self.exit_reason)
    }
    fn clear_exit_reason(&mut self) {
        self.exit_reason = encode_reason(ExitReason::None);
    }
    fn reenter_pc(&self) -> u64 {
        self.reenter_pc
    }
    fn native_arg(&mut self) -> *mut u8 {
        self as *mut DemoState as *mut u8
    }
}

/// One guest basic block's worth of synthetic behavior.
#[derive(Debug, Clone, Copy)]
pub enum GuestOp {
    DirectBranch(u64),
    IndirectBranch(u64),
    /// Decrements `state.counter`; branches to `self_pc` while it
    /// remains positive, to `exit_pc` once it hits zero. Used to drive
    /// a bounded tight loop through real promotion and native dispatch.
    CountedLoop { self_pc: u64, exit_pc: u64 },
    Ecall,
}

fn apply_interp(op: GuestOp, state: &mut DemoState) {
    match op {
        GuestOp::DirectBranch(target) => {
            state.reenter_pc = target;
            state.exit_reason = encode_reason(ExitReason::DirectBranch);
        }
        GuestOp::IndirectBranch(target) => {
            state.reenter_pc = target;
            state.exit_reason = encode_reason(ExitReason::IndirectBranch);
        }
        GuestOp::CountedLoop { self_pc, exit_pc } => {
            state.counter -= 1;
            state.reenter_pc = if state.counter > 0 { self_pc } else { exit_pc };
            state.exit_reason = encode_reason(ExitReason::DirectBranch);
        }
        GuestOp::Ecall => {
            state.reenter_pc = state.pc;
            state.exit_reason = encode_reason(ExitReason::Ecall);
        }
    }
}

fn emit_store_u32(buf: &mut Vec<u8>, disp: i32, imm: u32) {
    // C7 /0 id: MOV r/m32, imm32, with ModRM selecting [rdi+disp32].
    buf.push(0xC7);
    buf.push(0x87);
    buf.extend_from_slice(&disp.to_le_bytes());
    buf.extend_from_slice(&imm.to_le_bytes());
}

fn emit_store_exit(buf: &mut Vec<u8>, reason: ExitReason, target_pc: u64) {
    emit_store_u32(buf, EXIT_REASON_OFF, encode_reason(reason));
    emit_store_u32(buf, REENTER_PC_OFF, (target_pc & 0xFFFF_FFFF) as u32);
    emit_store_u32(buf, REENTER_PC_OFF + 4, (target_pc >> 32) as u32);
    buf.push(0xC3); // ret
}

/// Hand-assemble an x86-64 native block for `op`. Real code generators
/// lower a front end's IR; this one pattern-matches a fixed enum,
/// which is all the contract under test requires.
pub fn assemble(op: GuestOp) -> Vec<u8> {
    match op {
        GuestOp::DirectBranch(target) => {
            let mut buf = Vec::new();
            emit_store_exit(&mut buf, ExitReason::DirectBranch, target);
            buf
        }
        GuestOp::IndirectBranch(target) => {
            let mut buf = Vec::new();
            emit_store_exit(&mut buf, ExitReason::IndirectBranch, target);
            buf
        }
        GuestOp::Ecall => {
            let mut buf = Vec::new();
            emit_store_exit(&mut buf, ExitReason::Ecall, 0);
            buf
        }
        GuestOp::CountedLoop { self_pc, exit_pc } => {
            let mut exit_code = Vec::new();
            emit_store_exit(&mut exit_code, ExitReason::DirectBranch, exit_pc);
            let mut loop_code = Vec::new();
            emit_store_exit(&mut loop_code, ExitReason::DirectBranch, self_pc);

            let mut buf = Vec::new();
            // mov eax, [rdi+COUNTER_OFF]
            buf.push(0x8B);
            buf.push(0x87);
            buf.extend_from_slice(&COUNTER_OFF.to_le_bytes());
            // sub eax, 1
            buf.extend_from_slice(&[0x83, 0xE8, 0x01]);
            // mov [rdi+COUNTER_OFF], eax
            buf.push(0x89);
            buf.push(0x87);
            buf.extend_from_slice(&COUNTER_OFF.to_le_bytes());
            // cmp eax, 0
            buf.extend_from_slice(&[0x83, 0xF8, 0x00]);
            // jg rel8 -> skip exit_code, land on loop_code
            assert!(exit_code.len() <= 127);
            buf.push(0x7F);
            buf.push(exit_code.len() as u8);
            buf.extend(exit_code);
            buf.extend(loop_code);
            buf
        }
    }
}

/// Shares one guest program across the front end, code generator, and
/// interpreter roles. Cheap to clone (an `Rc` behind the scenes) so a
/// single harness can be handed to `Engine::step` three times without
/// three live `&mut` borrows of the same value.
#[derive(Clone)]
pub struct Harness(Rc<HashMap<u64, GuestOp>>);

impl Harness {
    pub fn new(program: HashMap<u64, GuestOp>) -> Self {
        Self(Rc::new(program))
    }

    fn op_at(&self, pc: u64) -> GuestOp {
        *self.0.get(&pc).unwrap_or_else(|| panic!("no guest op at pc {pc:#x}"))
    }
}

impl FrontEnd<DemoState> for Harness {
    type Source = GuestOp;
    fn genblock(&mut self, _state: &DemoState, pc: u64) -> GuestOp {
        self.op_at(pc)
    }
}

impl CodeGen<DemoState, GuestOp> for Harness {
    fn compile(&mut self, _state: &DemoState, source: &GuestOp) -> Vec<u8> {
        assemble(*source)
    }
}

impl Interpreter<DemoState> for Harness {
    fn exec_block_interp(&mut self, state: &mut DemoState) {
        let op = self.op_at(state.pc());
        apply_interp(op, state);
    }
}

/// A front end / code generator pair that panics if called — used to
/// assert that an already-hot, already-compiled chain of blocks never
/// re-enters promotion or compilation.
pub struct Unreachable;

impl FrontEnd<DemoState> for Unreachable {
    type Source = GuestOp;
    fn genblock(&mut self, _state: &DemoState, pc: u64) -> GuestOp {
        panic!("genblock should not be called for a pre-compiled, hot pc {pc:#x}");
    }
}

impl CodeGen<DemoState, GuestOp> for Unreachable {
    fn compile(&mut self, _state: &DemoState, _source: &GuestOp) -> Vec<u8> {
        panic!("compile should not be called for a pre-compiled, hot pc");
    }
}

impl Interpreter<DemoState> for Unreachable {
    fn exec_block_interp(&mut self, state: &mut DemoState) {
        panic!("interpreter should not be called for pc {:#x}", state.pc());
    }
}
