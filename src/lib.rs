//! Multi-objective evolutionary optimization engine.
//!
//! The crate searches decision-variable space for a Pareto front of mutually
//! non-dominated solutions against competing objectives computed by an
//! external simulation model. Two algorithm families are supported behind one
//! configuration switch: non-dominated fronts with cuboid crowding distance,
//! and strength-based fitness with nearest-neighbor density. Model runs are
//! delegated to a [`dispatch::RunDispatcher`] the driver blocks on.

pub mod config;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod member;
pub mod objectives;
pub mod operators;
pub mod ranking;
pub mod selection;
pub mod summary;

pub use config::{
    ConstraintSense, ConstraintSpec, DecisionVariable, Direction, EnvironmentKind, GeneratorKind,
    MoeaConfig, ObjectiveSpec,
};
pub use dispatch::{ChanceShifter, InitialPopulation, RunBatch, RunDispatcher};
pub use driver::{BestCompromise, DriverState, Moea, MoeaReport, ObjectiveStats};
pub use error::MoeaError;
pub use member::Ensemble;
pub use ranking::{ParetoRanking, RankOutcome, SummaryKind};
