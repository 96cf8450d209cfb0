use std::collections::HashMap;
use std::rc::Rc;

use dbt_core::GuestPc;
use dbt_exec::{CodeGen, ExitReason, FrontEnd, GuestState, Interpreter};

use crate::asm;
use crate::cpu::Cpu;

/// A guest basic block's behavior, in the synthetic ISA this demo
/// invents in place of RISC-V decoding.
#[derive(Debug, Clone, Copy)]
pub enum Op {
    /// Round-robins through a fixed cycle of hot blocks, decrementing
    /// the shared budget on every visit and handing off to `exit`
    /// once it's spent.
    Hub { next: GuestPc, exit: GuestPc },
    Ecall,
}

/// The synthetic guest program: a fixed cycle of hub blocks plus an
/// ecall block, shared (by `Rc`) across the front end, code generator,
/// and interpreter roles `Engine::step` needs distinct values for.
#[derive(Clone)]
pub struct Program(Rc<HashMap<GuestPc, Op>>);

impl Program {
    /// Builds a round-robin cycle through `hubs`, falling through to
    /// `exit_pc` once the shared iteration budget is exhausted.
    pub fn cycle(hubs: &[GuestPc], exit_pc: GuestPc) -> Self {
        assert!(!hubs.is_empty(), "need at least one hub block");
        let mut ops = HashMap::with_capacity(hubs.len() + 1);
        for (i, &pc) in hubs.iter().enumerate() {
            let next = hubs[(i + 1) % hubs.len()];
            ops.insert(pc, Op::Hub { next, exit: exit_pc });
        }
        ops.insert(exit_pc, Op::Ecall);
        Self(Rc::new(ops))
    }

    fn op_at(&self, pc: GuestPc) -> Op {
        *self
            .0
            .get(&pc)
            .unwrap_or_else(|| panic!("no guest block at pc {pc:#x}"))
    }
}

impl FrontEnd<Cpu> for Program {
    type Source = Op;

    fn genblock(&mut self, _state: &Cpu, pc: GuestPc) -> Op {
        self.op_at(pc)
    }
}

impl CodeGen<Cpu, Op> for Program {
    fn compile(&mut self, _state: &Cpu, source: &Op) -> Vec<u8> {
        match *source {
            Op::Hub { next, exit } => asm::counted_branch(next, exit),
            Op::Ecall => asm::ecall(),
        }
    }
}

impl Interpreter<Cpu> for Program {
    fn exec_block_interp(&mut self, state: &mut Cpu) {
        match self.op_at(state.pc()) {
            Op::Hub { next, exit } => {
                state.counter -= 1;
                let target = if state.counter > 0 { next } else { exit };
                state.set_reenter(ExitReason::DirectBranch, target);
            }
            Op::Ecall => state.set_reenter(ExitReason::Ecall, state.pc()),
        }
    }
}
