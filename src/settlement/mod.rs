// Settlement reconciliation core
pub mod engine;
pub mod mirror;
pub mod sweeper;

pub use engine::{EngineConfig, SettlementEngine};
pub use mirror::MirrorWriter;
pub use sweeper::ReconciliationSweeper;
