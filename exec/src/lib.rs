//! Hotness promotion, residency management, and the top-level
//! interpret/compile/dispatch loop for a dynamic binary translator's
//! hot-path execution core.

pub mod engine;
pub mod promoter;
pub mod residency;

pub use engine::{CodeGen, Engine, EngineStats, ExitReason, FrontEnd, GuestState, Interpreter};
pub use promoter::HotnessPromoter;
pub use residency::{ResidencyManager, ResidencyStats};
