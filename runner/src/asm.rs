//! A minimal x86-64 encoder standing in for the host code generator
//! named as an external collaborator. It only has to emit the two
//! shapes of block this demo program needs: an unconditional branch
//! and a decrement-and-branch loop.

use dbt_core::GuestPc;
use dbt_exec::ExitReason;

use crate::cpu::{encode_exit_reason, Cpu};

fn emit_store_u32(buf: &mut Vec<u8>, disp: i32, imm: u32) {
    // C7 /0 id: MOV dword ptr [rdi+disp32], imm32.
    buf.push(0xC7);
    buf.push(0x87);
    buf.extend_from_slice(&disp.to_le_bytes());
    buf.extend_from_slice(&imm.to_le_bytes());
}

fn emit_set_reenter(buf: &mut Vec<u8>, reason: ExitReason, target: GuestPc) {
    emit_store_u32(buf, Cpu::EXIT_REASON_OFFSET, encode_exit_reason(reason));
    emit_store_u32(buf, Cpu::REENTER_PC_OFFSET, (target & 0xFFFF_FFFF) as u32);
    emit_store_u32(buf, Cpu::REENTER_PC_OFFSET + 4, (target >> 32) as u32);
    buf.push(0xC3); // ret
}

/// A block that decrements the shared iteration counter and branches
/// to `next` while it remains positive, or to `exit` once exhausted.
pub fn counted_branch(next: GuestPc, exit: GuestPc) -> Vec<u8> {
    let mut exit_code = Vec::new();
    emit_set_reenter(&mut exit_code, ExitReason::DirectBranch, exit);
    let mut loop_code = Vec::new();
    emit_set_reenter(&mut loop_code, ExitReason::DirectBranch, next);

    let mut buf = Vec::new();
    // mov eax, [rdi+COUNTER_OFFSET]
    buf.push(0x8B);
    buf.push(0x87);
    buf.extend_from_slice(&Cpu::COUNTER_OFFSET.to_le_bytes());
    // sub eax, 1
    buf.extend_from_slice(&[0x83, 0xE8, 0x01]);
    // mov [rdi+COUNTER_OFFSET], eax
    buf.push(0x89);
    buf.push(0x87);
    buf.extend_from_slice(&Cpu::COUNTER_OFFSET.to_le_bytes());
    // cmp eax, 0
    buf.extend_from_slice(&[0x83, 0xF8, 0x00]);
    // jg rel8, skipping exit_code to land on loop_code.
    assert!(exit_code.len() <= 127, "exit_code too long for a short jump");
    buf.push(0x7F);
    buf.push(exit_code.len() as u8);
    buf.extend(exit_code);
    buf.extend(loop_code);
    buf
}

/// An ecall: no further guest work, just report the exit.
pub fn ecall() -> Vec<u8> {
    let mut buf = Vec::new();
    emit_set_reenter(&mut buf, ExitReason::Ecall, 0);
    buf
}
