use dbt_core::GuestPc;
use dbt_exec::{ExitReason, GuestState};

/// Flat guest register file the synthetic program and its native
/// blocks agree on the layout of. Stands in for the real RISC-V
/// register file a linux-user front end would load ELF state into.
#[repr(C)]
#[derive(Debug, Default)]
pub struct Cpu {
    pub pc: GuestPc,
    pub exit_reason: u32,
    pub _pad: u32,
    pub reenter_pc: GuestPc,
    pub counter: u64,
}

impl Cpu {
    pub const EXIT_REASON_OFFSET: i32 = 8;
    pub const REENTER_PC_OFFSET: i32 = 16;
    pub const COUNTER_OFFSET: i32 = 24;
}

pub fn encode_exit_reason(reason: ExitReason) -> u32 {
    match reason {
        ExitReason::None => 0,
        ExitReason::DirectBranch => 1,
        ExitReason::IndirectBranch => 2,
        ExitReason::Interp => 3,
        ExitReason::Ecall => 4,
    }
}

fn decode_exit_reason(value: u32) -> ExitReason {
    match value {
        0 => ExitReason::None,
        1 => ExitReason::DirectBranch,
        2 => ExitReason::IndirectBranch,
        3 => ExitReason::Interp,
        4 => ExitReason::Ecall,
        other => panic!("unknown exit reason byte {other}"),
    }
}

impl GuestState for Cpu {
    fn pc(&self) -> GuestPc {
        self.pc
    }

    fn set_pc(&mut self, pc: GuestPc) {
        self.pc = pc;
    }

    fn exit_reason(&self) -> ExitReason {
        decode_exit_reason(self.exit_reason)
    }

    fn clear_exit_reason(&mut self) {
        self.exit_reason = encode_exit_reason(ExitReason::None);
    }

    fn reenter_pc(&self) -> GuestPc {
        self.reenter_pc
    }

    fn native_arg(&mut self) -> *mut u8 {
        self as *mut Cpu as *mut u8
    }
}

impl Cpu {
    pub fn set_reenter(&mut self, reason: ExitReason, pc: GuestPc) {
        self.exit_reason = encode_exit_reason(reason);
        self.reenter_pc = pc;
    }
}
