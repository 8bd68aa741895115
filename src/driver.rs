use std::collections::HashMap;
use std::path::Path;

use itertools::Itertools;
use rand::prelude::*;
use rand::rngs::StdRng;
use tracing::{error, info, warn};

use crate::config::{EnvironmentKind, GeneratorKind, MoeaConfig};
use crate::dispatch::{ChanceShifter, InitialPopulation, RunDispatcher};
use crate::error::MoeaError;
use crate::member::Ensemble;
use crate::operators::{
    differential_evolution, polynomial_mutation, simulated_binary_crossover, DeParams,
    MutationParams, SbxParams,
};
use crate::ranking::{ParetoRanking, SummaryKind};
use crate::selection::{binary_tournament, environmental_selection};
use crate::summary::LineageLog;

/// Driver lifecycle. `Fatal` is absorbing; every fatal error passes through
/// the centralized reporting path before the state lands there.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DriverState {
    Uninitialized,
    Initializing,
    Iterating,
    Finalizing,
    Done,
    Fatal,
}

/// Distribution statistics for one objective across a population.
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectiveStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
}

/// The feasible member on the lowest front with the largest crowding
/// distance, reported at finalization.
#[derive(Clone, Debug)]
pub struct BestCompromise {
    pub id: String,
    pub decision_variables: HashMap<String, f64>,
    pub objectives: HashMap<String, f64>,
}

/// Final report: best-compromise solution plus objective distributions of the
/// initial and final populations.
#[derive(Debug)]
pub struct MoeaReport {
    pub generations: u32,
    pub best_compromise: Option<BestCompromise>,
    pub initial_objectives: HashMap<String, ObjectiveStats>,
    pub final_objectives: HashMap<String, ObjectiveStats>,
}

/// Generational evolutionary driver owning the population and archive.
pub struct Moea<D: RunDispatcher> {
    config: MoeaConfig,
    state: DriverState,
    rng: StdRng,
    engine: ParetoRanking,
    dispatcher: D,
    chance: Option<Box<dyn ChanceShifter>>,
    stop: Option<Box<dyn Fn() -> bool>>,

    dp: Ensemble,
    op: Ensemble,
    dp_archive: Ensemble,
    op_archive: Ensemble,

    lineage: LineageLog,
    generation: u32,
    member_counter: u64,
    initial_objectives: Option<HashMap<String, ObjectiveStats>>,
}

impl<D: RunDispatcher> Moea<D> {
    pub fn new(config: MoeaConfig, dispatcher: D, out_dir: &Path) -> Result<Self, MoeaError> {
        config.validate()?;
        let mut engine = ParetoRanking::new(config.dup_as_dom);
        engine.set_pointers(
            config.objectives.clone(),
            config.constraints.clone(),
            out_dir,
        )?;
        let lineage = LineageLog::create(out_dir)?;
        let dv_names: Vec<String> = config
            .decision_variables
            .iter()
            .map(|d| d.name.clone())
            .collect();
        Ok(Moea {
            rng: StdRng::seed_from_u64(config.seed),
            state: DriverState::Uninitialized,
            engine,
            dispatcher,
            chance: None,
            stop: None,
            dp: Ensemble::new(dv_names),
            op: Ensemble::new(vec![]),
            dp_archive: Ensemble::new(vec![]),
            op_archive: Ensemble::new(vec![]),
            lineage,
            generation: 0,
            member_counter: 0,
            initial_objectives: None,
            config,
        })
    }

    pub fn with_chance_shifter(mut self, shifter: Box<dyn ChanceShifter>) -> Self {
        self.chance = Some(shifter);
        self
    }

    /// Installs an external stop signal, polled before each generation.
    pub fn with_stop_signal(mut self, signal: Box<dyn Fn() -> bool>) -> Self {
        self.stop = Some(signal);
        self
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn population(&self) -> (&Ensemble, &Ensemble) {
        (&self.dp, &self.op)
    }

    pub fn archive(&self) -> (&Ensemble, &Ensemble) {
        (&self.dp_archive, &self.op_archive)
    }

    /// Centralized fatal path: log run context, absorb into `Fatal`.
    fn fatal(&mut self, err: MoeaError) -> MoeaError {
        error!(
            generation = self.generation,
            population = self.dp.len(),
            archive = self.dp_archive.len(),
            "fatal: {err}"
        );
        self.state = DriverState::Fatal;
        err
    }

    fn next_member_name(&mut self, generation: u32) -> String {
        self.member_counter += 1;
        format!("gen={}_member={}", generation, self.member_counter)
    }

    /// Loads or samples the initial population, evaluates it, seeds the
    /// archive from the initial non-dominated set, and runs sanity checks.
    pub fn initialize(&mut self, source: InitialPopulation) -> Result<(), MoeaError> {
        if self.state != DriverState::Uninitialized {
            return Err(MoeaError::Configuration(format!(
                "initialize called in state {:?}",
                self.state
            )));
        }
        self.state = DriverState::Initializing;
        match self.initialize_inner(source) {
            Ok(()) => {
                self.state = DriverState::Iterating;
                Ok(())
            }
            Err(err) => Err(self.fatal(err)),
        }
    }

    fn initialize_inner(&mut self, source: InitialPopulation) -> Result<(), MoeaError> {
        if self.config.risk_objective && self.chance.is_none() {
            return Err(MoeaError::Configuration(
                "risk objective enabled but no chance shifter installed".into(),
            ));
        }

        let dv_names: Vec<String> = self
            .config
            .decision_variables
            .iter()
            .map(|d| d.name.clone())
            .collect();
        self.dp = match source {
            InitialPopulation::Table(table) => {
                if table.col_names() != dv_names.as_slice() {
                    return Err(MoeaError::Configuration(format!(
                        "initial population columns {:?} do not match decision variables {:?}",
                        table.col_names(),
                        dv_names
                    )));
                }
                table
            }
            InitialPopulation::Sample => {
                let mut dp = Ensemble::new(dv_names);
                for _ in 0..self.config.member_count {
                    let rng = &mut self.rng;
                    let row: Vec<f64> = self
                        .config
                        .decision_variables
                        .iter()
                        .map(|dv| rng.gen_range(dv.lower..dv.upper))
                        .collect();
                    let id = self.next_member_name(0);
                    dp.push_row(id, &row)?;
                }
                dp
            }
        };
        info!(members = self.dp.len(), "initial population assembled");

        self.op = self.run_population(0)?;
        if self.dp.len() < self.config.error_min_members {
            return Err(MoeaError::InsufficientMembers {
                generation: 0,
                found: self.dp.len(),
                required: self.config.error_min_members,
            });
        }

        rank_with_environment(
            &mut self.engine,
            self.config.environment,
            0,
            &self.op,
            &self.dp,
            true,
            Some(SummaryKind::Population),
        )?;
        let first_front = self
            .engine
            .outcome()
            .expect("ranking just ran")
            .first_front()
            .to_vec();
        self.sanity_checks()?;
        self.initial_objectives = Some(self.objective_stats()?);

        self.dp_archive = self.dp.subset(&first_front)?;
        self.op_archive = self.op.subset(&first_front)?;
        rank_with_environment(
            &mut self.engine,
            self.config.environment,
            0,
            &self.op_archive,
            &self.dp_archive,
            false,
            Some(SummaryKind::Archive),
        )?;
        info!(archive = self.dp_archive.len(), "archive seeded from initial non-dominated set");
        Ok(())
    }

    /// Runs one generation per loop iteration until `max_generations`, an
    /// external stop signal, or a fatal condition.
    pub fn iterate_to_solution(&mut self) -> Result<(), MoeaError> {
        if self.state != DriverState::Iterating {
            return Err(MoeaError::Configuration(format!(
                "iterate_to_solution called in state {:?}",
                self.state
            )));
        }
        while self.generation < self.config.max_generations {
            if self.stop.as_ref().is_some_and(|signal| signal()) {
                info!(
                    generation = self.generation,
                    "stop signal received, ending iteration"
                );
                break;
            }
            self.generation += 1;
            match self.run_generation() {
                Ok(()) => {}
                Err(err) => return Err(self.fatal(err)),
            }
        }
        Ok(())
    }

    fn run_generation(&mut self) -> Result<(), MoeaError> {
        let generation = self.generation;

        // selection pool: current population plus archive
        let mut pool_dp = self.dp.clone();
        pool_dp.merge_from(&self.dp_archive)?;
        let mut pool_op = self.op.clone();
        pool_op.merge_from(&self.op_archive)?;
        match self.config.environment {
            EnvironmentKind::FrontsCrowding => {
                self.engine
                    .dominance_sort(generation, &pool_op, &pool_dp, false, None)?;
            }
            EnvironmentKind::StrengthDensity => {
                self.engine
                    .spea2_fitness(generation, &pool_op, &pool_dp, false, None)?;
            }
        }

        // generation: each configured operator contributes a share of offspring
        let offspring_dp = self.generate_offspring(generation, &pool_dp)?;

        // evaluation: failed runs drop their member, not the generation
        let prev_dp = std::mem::replace(&mut self.dp, offspring_dp);
        let prev_op = std::mem::replace(&mut self.op, Ensemble::new(vec![]));
        let offspring_op = self.run_population(generation)?;
        let offspring_dp = std::mem::replace(&mut self.dp, prev_dp);
        self.op = prev_op;

        // merge parents, offspring, archive and rank the union
        let mut merged_dp = self.dp.clone();
        merged_dp.merge_from(&offspring_dp)?;
        merged_dp.merge_from(&self.dp_archive)?;
        let mut merged_op = self.op.clone();
        merged_op.merge_from(&offspring_op)?;
        merged_op.merge_from(&self.op_archive)?;

        // environmental selection down to member_count
        let keep = environmental_selection(
            &mut self.engine,
            self.config.environment,
            self.config.member_count,
            generation,
            &merged_op,
            &merged_dp,
            true,
            None,
        )?;
        let outcome = self.engine.outcome().expect("ranking just ran");
        let first_front = outcome.first_front().to_vec();
        let feasible = outcome.fronts.iter().map(Vec::len).sum::<usize>();
        self.dp = merged_dp.subset(&keep)?;
        self.op = merged_op.subset(&keep)?;

        // archive update: merge in the new non-dominated set, then truncate
        let mut candidates = self.dp_archive.ids().to_vec();
        for id in &first_front {
            if !candidates.contains(id) {
                candidates.push(id.clone());
            }
        }
        let cand_dp = merged_dp.subset(&candidates)?;
        let cand_op = merged_op.subset(&candidates)?;
        let arc_keep = environmental_selection(
            &mut self.engine,
            self.config.environment,
            self.config.archive_size,
            generation,
            &cand_op,
            &cand_dp,
            false,
            None,
        )?;
        self.dp_archive = cand_dp.subset(&arc_keep)?;
        self.op_archive = cand_op.subset(&arc_keep)?;
        rank_with_environment(
            &mut self.engine,
            self.config.environment,
            generation,
            &self.op_archive,
            &self.dp_archive,
            false,
            Some(SummaryKind::Archive),
        )?;

        info!(
            generation,
            population = self.dp.len(),
            archive = self.dp_archive.len(),
            feasible,
            first_front = first_front.len(),
            "generation complete"
        );

        // re-rank the survivors so the summary block, the sanity checks, and
        // the next tournament all see the generation's actual population
        rank_with_environment(
            &mut self.engine,
            self.config.environment,
            generation,
            &self.op,
            &self.dp,
            false,
            Some(SummaryKind::Population),
        )?;
        self.sanity_checks()
    }

    fn generate_offspring(
        &mut self,
        generation: u32,
        pool_dp: &Ensemble,
    ) -> Result<Ensemble, MoeaError> {
        let dv_names: Vec<String> = self
            .config
            .decision_variables
            .iter()
            .map(|d| d.name.clone())
            .collect();
        let mut offspring = Ensemble::new(dv_names);
        let num_generators = self.config.generators.len();
        let share = self.config.member_count / num_generators;
        let generators = self.config.generators.clone();

        for (g_idx, kind) in generators.iter().enumerate() {
            let mut count = share;
            if g_idx == 0 {
                count += self.config.member_count % num_generators;
            }
            let generated = match kind {
                GeneratorKind::DifferentialEvolution => {
                    let parents = self.select_parents(pool_dp, count.max(4), 4)?;
                    differential_evolution(
                        &mut self.rng,
                        &parents,
                        &self.config.decision_variables,
                        count,
                        DeParams {
                            scale: self.config.de_scale,
                            crossover: self.config.de_crossover,
                        },
                    )
                }
                GeneratorKind::SimulatedBinary => {
                    let parents = self.select_parents(pool_dp, count.max(2), 2)?;
                    let mut generated = simulated_binary_crossover(
                        &mut self.rng,
                        &parents,
                        &self.config.decision_variables,
                        count,
                        SbxParams {
                            crossover_probability: self.config.crossover_probability,
                            eta: self.config.sbx_eta,
                        },
                    );
                    polynomial_mutation(
                        &mut self.rng,
                        &mut generated.rows,
                        &self.config.decision_variables,
                        MutationParams {
                            probability: self.config.effective_mutation_probability(),
                            eta: self.config.mutation_eta,
                        },
                    );
                    generated
                }
            };
            for (row, parents) in generated.rows.iter().zip(&generated.parents) {
                let child = self.next_member_name(generation);
                offspring.push_row(child.clone(), row)?;
                self.lineage.append(generation, &child, parents)?;
            }
        }
        Ok(offspring)
    }

    /// Tournament-selects a parent subset from the pool, deduplicated and
    /// topped up with random distinct members so the operator's minimum
    /// distinct-member requirement holds.
    fn select_parents(
        &mut self,
        pool_dp: &Ensemble,
        count: usize,
        min_distinct: usize,
    ) -> Result<Ensemble, MoeaError> {
        if pool_dp.len() < min_distinct {
            return Err(MoeaError::InsufficientMembers {
                generation: self.generation,
                found: pool_dp.len(),
                required: min_distinct,
            });
        }
        let pool_ids = pool_dp.ids().to_vec();
        let winners = binary_tournament(&mut self.rng, &pool_ids, count, &self.engine)?;
        let mut selected: Vec<String> = winners.into_iter().unique().collect();
        while selected.len() < min_distinct {
            let candidate = pool_ids[self.rng.gen_range(0..pool_ids.len())].clone();
            if !selected.contains(&candidate) {
                selected.push(candidate);
            }
        }
        pool_dp.subset(&selected)
    }

    /// Submits the current population for evaluation, drops failed members,
    /// and applies the chance shift when configured.
    fn run_population(&mut self, generation: u32) -> Result<Ensemble, MoeaError> {
        let batch = self.dispatcher.run(generation, &self.dp)?;
        if !batch.failed.is_empty() {
            warn!(
                generation,
                failed = batch.failed.len(),
                "dropping members whose runs failed"
            );
            self.dp.drop_ids(&batch.failed);
        }
        // keep the decision table aligned with returned responses
        let returned: std::collections::HashSet<String> =
            batch.responses.ids().iter().cloned().collect();
        self.dp.retain(&returned);
        let responses = batch.responses.subset(self.dp.ids())?;

        if self.config.risk_objective {
            if let Some(chance) = self.chance.as_mut() {
                return chance.shift(generation, &self.dp, &responses);
            }
        }
        Ok(responses)
    }

    /// Feasible-membership thresholds from the last population ranking.
    fn sanity_checks(&mut self) -> Result<(), MoeaError> {
        let outcome = self.engine.outcome().ok_or(MoeaError::NotInitialized)?;
        let feasible: usize = outcome.fronts.iter().map(Vec::len).sum();
        if feasible < self.config.error_min_members {
            return Err(MoeaError::InsufficientMembers {
                generation: self.generation,
                found: feasible,
                required: self.config.error_min_members,
            });
        }
        if feasible < self.config.warn_min_members {
            warn!(
                generation = self.generation,
                feasible,
                threshold = self.config.warn_min_members,
                "feasible membership is running low"
            );
        }
        Ok(())
    }

    fn objective_stats(&self) -> Result<HashMap<String, ObjectiveStats>, MoeaError> {
        let mut stats = HashMap::new();
        for spec in &self.config.objectives {
            let col = self.op.col(&spec.name).ok_or_else(|| {
                MoeaError::Configuration(format!(
                    "objective '{}' missing from response table",
                    spec.name
                ))
            })?;
            let values: Vec<f64> = (0..self.op.len()).map(|i| self.op.row_at(i)[col]).collect();
            let n = values.len().max(1) as f64;
            let mean = values.iter().sum::<f64>() / n;
            let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
            stats.insert(
                spec.name.clone(),
                ObjectiveStats {
                    min: values.iter().copied().fold(f64::INFINITY, f64::min),
                    max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                    mean,
                    std: var.sqrt(),
                },
            );
        }
        Ok(stats)
    }

    /// Reports the best-compromise solution and how the objective
    /// distributions moved over the run. The final summary rows are the last
    /// generation's blocks, written during iteration.
    pub fn finalize(&mut self) -> Result<MoeaReport, MoeaError> {
        if self.state != DriverState::Iterating {
            return Err(MoeaError::Configuration(format!(
                "finalize called in state {:?}",
                self.state
            )));
        }
        self.state = DriverState::Finalizing;
        let result = self.finalize_inner();
        match &result {
            Ok(_) => self.state = DriverState::Done,
            Err(_) => self.state = DriverState::Fatal,
        }
        result
    }

    fn finalize_inner(&mut self) -> Result<MoeaReport, MoeaError> {
        // crowding distances drive the compromise pick, so this last ranking
        // is always a dominance sort; no summary tag, the per-generation
        // blocks already cover this population
        self.engine
            .dominance_sort(self.generation, &self.op, &self.dp, true, None)?;
        let outcome = self.engine.outcome().expect("ranking just ran");

        let best_compromise = outcome
            .first_front()
            .iter()
            .max_by(|a, b| {
                let ca = outcome.crowding.get(*a).copied().unwrap_or(0.0);
                let cb = outcome.crowding.get(*b).copied().unwrap_or(0.0);
                ca.total_cmp(&cb).then_with(|| b.cmp(a))
            })
            .map(|id| {
                let dv_row = self.dp.row(id).expect("front member is in the population");
                let decision_variables = self
                    .dp
                    .col_names()
                    .iter()
                    .cloned()
                    .zip(dv_row.iter().copied())
                    .collect();
                let objectives = self
                    .config
                    .objectives
                    .iter()
                    .map(|spec| {
                        let v = self.op.value(id, &spec.name).unwrap_or(f64::NAN);
                        (spec.name.clone(), v)
                    })
                    .collect();
                BestCompromise {
                    id: id.clone(),
                    decision_variables,
                    objectives,
                }
            });

        let final_objectives = self.objective_stats()?;
        let initial_objectives = self
            .initial_objectives
            .clone()
            .ok_or(MoeaError::NotInitialized)?;
        for (name, stats) in &final_objectives {
            if let Some(init) = initial_objectives.get(name) {
                info!(
                    objective = name.as_str(),
                    initial_mean = init.mean,
                    final_mean = stats.mean,
                    initial_min = init.min,
                    final_min = stats.min,
                    "objective distribution change"
                );
            }
        }
        if let Some(best) = &best_compromise {
            info!(member = best.id.as_str(), "best compromise solution");
        }

        Ok(MoeaReport {
            generations: self.generation,
            best_compromise,
            initial_objectives,
            final_objectives,
        })
    }
}

/// Ranks with the configured environment family so summary rows carry the
/// matching metric column (crowding distance or strength fitness).
fn rank_with_environment(
    engine: &mut ParetoRanking,
    environment: EnvironmentKind,
    generation: u32,
    responses: &Ensemble,
    dv: &Ensemble,
    report: bool,
    tag: Option<SummaryKind>,
) -> Result<(), MoeaError> {
    match environment {
        EnvironmentKind::FrontsCrowding => {
            engine.dominance_sort(generation, responses, dv, report, tag)?;
        }
        EnvironmentKind::StrengthDensity => {
            engine.spea2_fitness(generation, responses, dv, report, tag)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        Direction, DecisionVariable, MoeaConfig, ObjectiveSpec,
    };
    use crate::dispatch::RunBatch;
    use crate::summary::{ARC_SUM_TAG, LINEAGE_TAG, POP_SUM_TAG};

    /// Two quadratic bowls offset from one another, so the Pareto front is
    /// the segment between their minima.
    struct QuadraticDispatcher {
        fail_every: Option<usize>,
    }

    impl RunDispatcher for QuadraticDispatcher {
        fn run(&mut self, _generation: u32, dv: &Ensemble) -> Result<RunBatch, MoeaError> {
            let mut responses = Ensemble::new(vec!["f1".into(), "f2".into()]);
            let mut failed = Vec::new();
            for (i, id) in dv.ids().iter().enumerate() {
                if let Some(k) = self.fail_every {
                    if (i + 1) % k == 0 {
                        failed.push(id.clone());
                        continue;
                    }
                }
                let x = dv.row_at(i)[0];
                let y = dv.row_at(i)[1];
                let f1 = x * x + y * y;
                let f2 = (x - 2.0).powi(2) + (y - 2.0).powi(2);
                responses.push_row(id.clone(), &[f1, f2])?;
            }
            Ok(RunBatch { responses, failed })
        }
    }

    fn config() -> MoeaConfig {
        MoeaConfig {
            objectives: vec![
                ObjectiveSpec {
                    name: "f1".into(),
                    direction: Direction::Minimize,
                },
                ObjectiveSpec {
                    name: "f2".into(),
                    direction: Direction::Minimize,
                },
            ],
            constraints: vec![],
            decision_variables: vec![
                DecisionVariable {
                    name: "x".into(),
                    lower: 0.0,
                    upper: 4.0,
                },
                DecisionVariable {
                    name: "y".into(),
                    lower: 0.0,
                    upper: 4.0,
                },
            ],
            member_count: 16,
            archive_size: 8,
            max_generations: 3,
            generators: vec![GeneratorKind::DifferentialEvolution],
            environment: EnvironmentKind::FrontsCrowding,
            warn_min_members: 6,
            error_min_members: 4,
            dup_as_dom: false,
            risk_objective: false,
            de_scale: 0.8,
            de_crossover: 0.9,
            crossover_probability: 0.9,
            sbx_eta: 15.0,
            mutation_probability: None,
            mutation_eta: 20.0,
            seed: 42,
        }
    }

    fn run_to_done(cfg: MoeaConfig, dir: &std::path::Path) -> (MoeaReport, Vec<String>, usize) {
        let mut driver = Moea::new(cfg, QuadraticDispatcher { fail_every: None }, dir)
            .expect("driver construction");
        driver.initialize(InitialPopulation::Sample).expect("initialize");
        driver.iterate_to_solution().expect("iterate");
        let report = driver.finalize().expect("finalize");
        assert_eq!(driver.state(), DriverState::Done);
        let (dp, _) = driver.population();
        let (arc_dp, _) = driver.archive();
        (report, dp.ids().to_vec(), arc_dp.len())
    }

    #[test]
    fn full_run_respects_population_and_archive_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config();
        let member_count = cfg.member_count;
        let archive_size = cfg.archive_size;
        let (report, population, archive_len) = run_to_done(cfg, dir.path());

        assert!(population.len() <= member_count);
        assert!(archive_len <= archive_size && archive_len > 0);
        assert_eq!(report.generations, 3);
        assert!(
            report.best_compromise.is_some(),
            "a feasible run must produce a compromise solution"
        );
        for tag in [POP_SUM_TAG, ARC_SUM_TAG, LINEAGE_TAG] {
            let text = std::fs::read_to_string(dir.path().join(tag)).unwrap();
            assert!(
                text.lines().count() > 1,
                "{tag} should contain rows beyond the header"
            );
        }
    }

    #[test]
    fn summary_rows_are_unique_per_generation_and_member() {
        let dir = tempfile::tempdir().unwrap();
        run_to_done(config(), dir.path());
        for tag in [POP_SUM_TAG, ARC_SUM_TAG] {
            let text = std::fs::read_to_string(dir.path().join(tag)).unwrap();
            let mut seen = std::collections::HashSet::new();
            for line in text.lines().skip(1) {
                let mut fields = line.split(',');
                let generation = fields.next().unwrap().to_string();
                let member = fields.next().unwrap().to_string();
                assert!(
                    seen.insert((generation.clone(), member.clone())),
                    "{tag} repeats generation {generation} member {member}"
                );
            }
        }
    }

    #[test]
    fn strength_density_environment_runs_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config();
        cfg.environment = EnvironmentKind::StrengthDensity;
        cfg.generators = vec![
            GeneratorKind::DifferentialEvolution,
            GeneratorKind::SimulatedBinary,
        ];
        let member_count = cfg.member_count;
        let archive_size = cfg.archive_size;
        let (report, population, archive_len) = run_to_done(cfg, dir.path());
        assert!(population.len() <= member_count);
        assert!(archive_len <= archive_size);
        assert!(report.best_compromise.is_some());
    }

    #[test]
    fn failed_runs_drop_members_but_not_the_generation() {
        let dir = tempfile::tempdir().unwrap();
        let mut driver = Moea::new(
            config(),
            QuadraticDispatcher {
                fail_every: Some(5),
            },
            dir.path(),
        )
        .unwrap();
        driver.initialize(InitialPopulation::Sample).expect("initialize");
        driver.iterate_to_solution().expect("iterate despite per-member failures");
        assert_eq!(driver.state(), DriverState::Iterating);
    }

    #[test]
    fn insufficient_feasible_members_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut driver = Moea::new(
            config(),
            QuadraticDispatcher {
                fail_every: Some(2), // half the population never evaluates
            },
            dir.path(),
        )
        .unwrap();
        // 8 survivors is still above the threshold; squeeze harder
        let mut driver2 = Moea::new(
            {
                let mut cfg = config();
                cfg.error_min_members = 12;
                cfg.warn_min_members = 12;
                cfg
            },
            QuadraticDispatcher {
                fail_every: Some(2),
            },
            dir.path(),
        )
        .unwrap();
        assert!(driver.initialize(InitialPopulation::Sample).is_ok());

        let err = driver2.initialize(InitialPopulation::Sample).unwrap_err();
        assert!(
            matches!(err, MoeaError::InsufficientMembers { .. }),
            "got {err:?}"
        );
        assert_eq!(driver2.state(), DriverState::Fatal);
        assert!(
            driver2.iterate_to_solution().is_err(),
            "no further generation may be produced after a fatal error"
        );
    }

    #[test]
    fn stop_signal_ends_iteration_before_the_next_generation() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let flag = Arc::new(AtomicBool::new(false));
        let polled = flag.clone();
        let mut driver = Moea::new(config(), QuadraticDispatcher { fail_every: None }, dir.path())
            .unwrap()
            .with_stop_signal(Box::new(move || polled.load(Ordering::Relaxed)));
        driver.initialize(InitialPopulation::Sample).unwrap();
        flag.store(true, Ordering::Relaxed);
        driver.iterate_to_solution().unwrap();
        assert_eq!(driver.generation(), 0, "no generation may run past the signal");
        let report = driver.finalize().expect("a stopped run still finalizes");
        assert_eq!(report.generations, 0);
    }

    #[test]
    fn runs_are_deterministic_for_a_fixed_seed() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        let (_, pop_a, _) = run_to_done(config(), dir_a.path());
        let (_, pop_b, _) = run_to_done(config(), dir_b.path());
        assert_eq!(pop_a, pop_b, "same seed and inputs must reproduce the run");
    }

    #[test]
    fn initialize_twice_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut driver =
            Moea::new(config(), QuadraticDispatcher { fail_every: None }, dir.path()).unwrap();
        driver.initialize(InitialPopulation::Sample).unwrap();
        assert!(driver.initialize(InitialPopulation::Sample).is_err());
    }

    #[test]
    fn risk_objective_without_shifter_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config();
        cfg.risk_objective = true;
        let mut driver =
            Moea::new(cfg, QuadraticDispatcher { fail_every: None }, dir.path()).unwrap();
        let err = driver.initialize(InitialPopulation::Sample).unwrap_err();
        assert!(matches!(err, MoeaError::Configuration(_)));
    }

    #[test]
    fn provided_initial_table_must_match_decision_variables() {
        let dir = tempfile::tempdir().unwrap();
        let mut driver =
            Moea::new(config(), QuadraticDispatcher { fail_every: None }, dir.path()).unwrap();
        let wrong = Ensemble::from_rows(
            vec!["x".into()],
            vec!["m0".into()],
            vec![vec![1.0]],
        )
        .unwrap();
        let err = driver
            .initialize(InitialPopulation::Table(wrong))
            .unwrap_err();
        assert!(matches!(err, MoeaError::Configuration(_)));
    }
}
