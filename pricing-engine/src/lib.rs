//! Commercial-proposal pricing and tax calculation engine: a three-stage
//! pipeline (preparation, pure compute, commit) with deterministic,
//! idempotent, auditable outputs.

pub mod commit;
pub mod compute;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod prepare;
pub mod types;

pub use config::EngineConfig;
pub use error::{CalcError, CalcResult};
pub use orchestrator::Orchestrator;
pub use types::{CalculateRequest, CalculateResponse};
