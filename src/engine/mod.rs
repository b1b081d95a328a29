pub mod evaluator;
pub mod executor;
pub mod genetic;
pub mod indicators;
pub mod ledger;
pub mod metrics;
pub mod optimizer;
pub mod orders;
pub mod position;
pub mod strategy;
pub mod walk_forward;
