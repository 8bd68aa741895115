use crate::error::MoeaError;
use crate::member::Ensemble;

/// Evaluation results for one submitted decision-variable table: a response
/// row for every member that ran to completion, plus the ids that failed.
/// Failures are non-fatal here; the driver drops those members for the
/// generation and checks its minimum-member thresholds.
pub struct RunBatch {
    pub responses: Ensemble,
    pub failed: Vec<String>,
}

/// External run mechanism. The driver submits N parameter sets and blocks
/// until M ≤ N response sets return. The dispatcher may parallelize or
/// distribute internally; retries, if any, belong to it, not the core.
pub trait RunDispatcher {
    fn run(&mut self, generation: u32, dv: &Ensemble) -> Result<RunBatch, MoeaError>;
}

/// Shifts evaluated responses to account for uncertainty before feasibility
/// and objectives are judged. How the shift is computed is the implementor's
/// business; the core only re-projects the shifted table.
pub trait ChanceShifter {
    fn shift(
        &mut self,
        generation: u32,
        dv: &Ensemble,
        responses: &Ensemble,
    ) -> Result<Ensemble, MoeaError>;
}

/// Where the initial decision-variable population comes from.
pub enum InitialPopulation {
    /// A caller-provided table, e.g. read from a file by the application.
    Table(Ensemble),
    /// Uniform sampling within variable bounds, sized `member_count`.
    Sample,
}
