use serde::{Deserialize, Serialize};

use crate::error::MoeaError;

/// Whether larger or smaller raw values of an objective are better.
///
/// The engine works internally with minimization-oriented values; the
/// multiplier folds the direction in so "smaller is better" holds uniformly.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Minimize,
    Maximize,
}

impl Direction {
    pub fn multiplier(self) -> f64 {
        match self {
            Direction::Minimize => 1.0,
            Direction::Maximize => -1.0,
        }
    }
}

/// A named objective drawn from the response table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ObjectiveSpec {
    pub name: String,
    pub direction: Direction,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintSense {
    LessEqual,
    GreaterEqual,
}

/// A named inequality constraint on a response column. Violation is the
/// shortfall beyond `bound`, zero when satisfied.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConstraintSpec {
    pub name: String,
    pub sense: ConstraintSense,
    pub bound: f64,
}

impl ConstraintSpec {
    pub fn violation(&self, value: f64) -> f64 {
        match self.sense {
            ConstraintSense::LessEqual => (value - self.bound).max(0.0),
            ConstraintSense::GreaterEqual => (self.bound - value).max(0.0),
        }
    }
}

/// A decision variable with its repair bounds.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DecisionVariable {
    pub name: String,
    pub lower: f64,
    pub upper: f64,
}

/// Offspring generator families.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeneratorKind {
    /// Differential-vector recombination (DE/rand/1/bin).
    DifferentialEvolution,
    /// Simulated binary crossover followed by polynomial mutation.
    SimulatedBinary,
}

/// Environmental-selection families.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvironmentKind {
    /// Non-dominated fronts with cuboid crowding-distance tie-breaks.
    FrontsCrowding,
    /// Strength-based fitness with k-th nearest-neighbor density.
    StrengthDensity,
}

fn default_generators() -> Vec<GeneratorKind> {
    vec![GeneratorKind::DifferentialEvolution]
}

fn default_environment() -> EnvironmentKind {
    EnvironmentKind::FrontsCrowding
}

fn default_warn_min_members() -> usize {
    10
}

fn default_error_min_members() -> usize {
    4
}

fn default_de_scale() -> f64 {
    0.8
}

fn default_de_crossover() -> f64 {
    0.9
}

fn default_crossover_probability() -> f64 {
    0.9
}

fn default_sbx_eta() -> f64 {
    15.0
}

fn default_mutation_eta() -> f64 {
    20.0
}

/// The full configuration surface consumed (not owned) by the engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MoeaConfig {
    pub objectives: Vec<ObjectiveSpec>,
    #[serde(default)]
    pub constraints: Vec<ConstraintSpec>,
    pub decision_variables: Vec<DecisionVariable>,

    /// Population size carried between generations.
    pub member_count: usize,
    /// Upper bound on the elite archive.
    pub archive_size: usize,
    pub max_generations: u32,

    #[serde(default = "default_generators")]
    pub generators: Vec<GeneratorKind>,
    #[serde(default = "default_environment")]
    pub environment: EnvironmentKind,

    #[serde(default = "default_warn_min_members")]
    pub warn_min_members: usize,
    #[serde(default = "default_error_min_members")]
    pub error_min_members: usize,

    /// Count near-duplicate objective vectors as dominated during strength
    /// fitness instead of ignoring the tie.
    #[serde(default)]
    pub dup_as_dom: bool,

    /// Enables the chance-shift step before feasibility is judged. Requires a
    /// `ChanceShifter` to be installed on the driver.
    #[serde(default)]
    pub risk_objective: bool,

    #[serde(default = "default_de_scale")]
    pub de_scale: f64,
    #[serde(default = "default_de_crossover")]
    pub de_crossover: f64,
    #[serde(default = "default_crossover_probability")]
    pub crossover_probability: f64,
    #[serde(default = "default_sbx_eta")]
    pub sbx_eta: f64,
    /// Per-variable mutation probability; defaults to 1/num_variables.
    #[serde(default)]
    pub mutation_probability: Option<f64>,
    #[serde(default = "default_mutation_eta")]
    pub mutation_eta: f64,

    #[serde(default)]
    pub seed: u64,
}

impl MoeaConfig {
    pub fn effective_mutation_probability(&self) -> f64 {
        self.mutation_probability
            .unwrap_or(1.0 / self.decision_variables.len().max(1) as f64)
    }

    pub fn validate(&self) -> Result<(), MoeaError> {
        if self.objectives.is_empty() {
            return Err(MoeaError::Configuration(
                "at least one objective is required".into(),
            ));
        }
        if self.decision_variables.is_empty() {
            return Err(MoeaError::Configuration(
                "at least one decision variable is required".into(),
            ));
        }
        for dv in &self.decision_variables {
            if !(dv.lower < dv.upper) {
                return Err(MoeaError::Configuration(format!(
                    "decision variable '{}' has empty bounds [{}, {}]",
                    dv.name, dv.lower, dv.upper
                )));
            }
        }
        if self.generators.is_empty() {
            return Err(MoeaError::Configuration(
                "at least one generator must be selected".into(),
            ));
        }
        if self.member_count < 4 {
            // DE donor draws need four distinct members.
            return Err(MoeaError::Configuration(format!(
                "member_count must be at least 4, got {}",
                self.member_count
            )));
        }
        if self.archive_size == 0 {
            return Err(MoeaError::Configuration("archive_size must be positive".into()));
        }
        if self.error_min_members > self.member_count {
            return Err(MoeaError::Configuration(format!(
                "error_min_members ({}) exceeds member_count ({})",
                self.error_min_members, self.member_count
            )));
        }
        if self.warn_min_members < self.error_min_members {
            return Err(MoeaError::Configuration(format!(
                "warn_min_members ({}) is below error_min_members ({})",
                self.warn_min_members, self.error_min_members
            )));
        }
        for (name, p) in [
            ("de_crossover", self.de_crossover),
            ("crossover_probability", self.crossover_probability),
            (
                "mutation_probability",
                self.effective_mutation_probability(),
            ),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(MoeaError::Configuration(format!(
                    "{name} must lie in [0, 1], got {p}"
                )));
            }
        }
        let mut seen = std::collections::HashSet::new();
        for obj in &self.objectives {
            if !seen.insert(obj.name.as_str()) {
                return Err(MoeaError::Configuration(format!(
                    "objective '{}' listed twice",
                    obj.name
                )));
            }
        }
        Ok(())
    }
}
