pub mod liveness;
pub mod strategy;

pub use liveness::LivenessState;
pub use strategy::{InstallRecord, StrategyKind};
