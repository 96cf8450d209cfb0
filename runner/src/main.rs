use std::env;
use std::path::PathBuf;
use std::process;

use dbt_exec::Engine;
use dbt_runner::{Cpu, Program};

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 4 {
        eprintln!(
            "usage: dbt-runner <arena-backing-file> <pc-trace-log> <iteration-budget>"
        );
        process::exit(1);
    }

    let arena_path = PathBuf::from(&args[1]);
    let trace_path = PathBuf::from(&args[2]);
    let iterations: u64 = args[3]
        .parse()
        .expect("iteration budget must be a non-negative integer");

    let mut engine = Engine::new(&arena_path, &trace_path).expect("failed to build engine");

    // More hubs than the residency manager's default capacity (16),
    // so that once enough of them are promoted and compiled, admitting
    // the next one evicts the coldest resident entry. A small
    // iteration budget will only exercise promotion; a large one
    // exercises promotion, native dispatch, and eviction together.
    let hubs: Vec<u64> = (0u64..20).map(|i| 0x1000 + i * 0x1000).collect();
    let ecall_pc = 0x9000u64;
    let program = Program::cycle(&hubs, ecall_pc);

    let mut state = Cpu {
        pc: hubs[0],
        counter: iterations,
        ..Default::default()
    };

    // SAFETY: `state`'s layout matches what `program`'s code generator
    // assumes, since both are defined in this crate against the same
    // offsets.
    let reason = unsafe {
        engine.step(
            &mut state,
            &mut program.clone(),
            &mut program.clone(),
            &mut program.clone(),
        )
    };
    println!("guest exited via {reason:?}");

    engine.attenuate();
    engine.flush_trace().expect("failed to flush pc-trace log");

    print!("{}", engine.stats);
    println!("residency: {}", engine.residency.stats);
}
