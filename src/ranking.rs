use std::collections::HashMap;
use std::path::Path;

use ndarray::ArrayView1;
use rayon::prelude::*;
use tracing::{info, warn};

use crate::config::{ConstraintSpec, EnvironmentKind, ObjectiveSpec};
use crate::error::MoeaError;
use crate::member::Ensemble;
use crate::objectives::{split_feasibility, violations, ObjectiveTable, FEASIBLE_TOLERANCE};
use crate::summary::{SummaryRow, SummaryWriter, ARC_SUM_TAG, POP_SUM_TAG};

/// Equality tolerance for objective comparisons, to keep floating-point noise
/// from manufacturing dominance relations.
pub const EPSILON: f64 = 1.0e-15;

/// Which summary file a ranking call should append to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SummaryKind {
    Population,
    Archive,
}

struct Binding {
    objectives: Vec<ObjectiveSpec>,
    constraints: Vec<ConstraintSpec>,
    population_summary: SummaryWriter,
    archive_summary: SummaryWriter,
}

/// Everything the last ranking call established, kept so tournament
/// comparisons and truncation can consult it without recomputing. Replaced
/// wholesale on the next call; never carried across generations by the driver.
#[derive(Clone, Debug)]
pub struct RankOutcome {
    pub environment: EnvironmentKind,
    /// Feasible fronts in rank order (rank 0 first).
    pub fronts: Vec<Vec<String>>,
    pub front_of: HashMap<String, usize>,
    /// Cuboid crowding distance, computed per front.
    pub crowding: HashMap<String, f64>,
    /// Strength fitness (strength/density rankings only).
    pub fitness: HashMap<String, f64>,
    /// k-th nearest-neighbor distance (strength/density rankings only).
    pub density: HashMap<String, f64>,
    pub violation: HashMap<String, f64>,
    /// Infeasible members, ascending by total violation.
    pub infeasible: Vec<String>,
    /// Duplicate members dropped before ranking.
    pub duplicates: Vec<String>,
    /// Per-member (raw, direction-adjusted) objective values, for reporting.
    pub objective_values: HashMap<String, (Vec<f64>, Vec<f64>)>,
}

impl RankOutcome {
    pub fn first_front(&self) -> &[String] {
        self.fronts.first().map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every ranked member after the first front: remaining feasible fronts in
    /// rank order, then infeasible members ascending by violation.
    pub fn remaining(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .fronts
            .iter()
            .skip(1)
            .flat_map(|f| f.iter().cloned())
            .collect();
        out.extend(self.infeasible.iter().cloned());
        out
    }

    pub fn ranked_ids(&self) -> Vec<String> {
        let mut out: Vec<String> = self.fronts.iter().flatten().cloned().collect();
        out.extend(self.infeasible.iter().cloned());
        out
    }

    pub fn is_feasible(&self, id: &str) -> bool {
        self.violation
            .get(id)
            .map(|v| *v <= FEASIBLE_TOLERANCE)
            .unwrap_or(false)
    }
}

/// The Pareto-ranking and diversity-metric engine.
///
/// Must be bound via [`ParetoRanking::set_pointers`] before any diversity or
/// selection query; the binding fixes the objective names, their direction
/// multipliers, the constraint set, and (re)creates the two on-disk summary
/// files.
pub struct ParetoRanking {
    epsilon: f64,
    dup_as_dom: bool,
    binding: Option<Binding>,
    outcome: Option<RankOutcome>,
}

impl ParetoRanking {
    pub fn new(dup_as_dom: bool) -> Self {
        ParetoRanking {
            epsilon: EPSILON,
            dup_as_dom,
            binding: None,
            outcome: None,
        }
    }

    /// Binds objectives, constraints, and the summary-file directory.
    pub fn set_pointers(
        &mut self,
        objectives: Vec<ObjectiveSpec>,
        constraints: Vec<ConstraintSpec>,
        dir: &Path,
    ) -> Result<(), MoeaError> {
        let names: Vec<String> = objectives.iter().map(|o| o.name.clone()).collect();
        let population_summary = SummaryWriter::create(dir, POP_SUM_TAG, &names)?;
        let archive_summary = SummaryWriter::create(dir, ARC_SUM_TAG, &names)?;
        self.binding = Some(Binding {
            objectives,
            constraints,
            population_summary,
            archive_summary,
        });
        Ok(())
    }

    fn binding(&self) -> Result<&Binding, MoeaError> {
        self.binding.as_ref().ok_or(MoeaError::NotInitialized)
    }

    pub fn outcome(&self) -> Option<&RankOutcome> {
        self.outcome.as_ref()
    }

    /// True iff `a` is no worse than `b` in every objective and strictly
    /// better in at least one, judged with the epsilon tolerance.
    pub fn dominates(&self, a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> bool {
        let mut strictly_better = false;
        for (&x, &y) in a.iter().zip(b.iter()) {
            if x > y + self.epsilon {
                return false;
            }
            if x < y - self.epsilon {
                strictly_better = true;
            }
        }
        strictly_better
    }

    /// True iff every objective differs by no more than the tolerance.
    pub fn equals(&self, a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> bool {
        a.iter().zip(b.iter()).all(|(&x, &y)| (x - y).abs() <= self.epsilon)
    }

    /// Ranks `responses` into feasibility classes and dominance fronts.
    ///
    /// Returns `(first_front_ids, remaining_ids)` where the first element is
    /// exactly the rank-0 front and the second is every other ranked member:
    /// the remaining feasible fronts in rank order followed by infeasible
    /// members ascending by violation. Cuboid crowding distances are computed
    /// per front and cached for `compare`.
    pub fn dominance_sort(
        &mut self,
        generation: u32,
        responses: &Ensemble,
        _dv: &Ensemble,
        report: bool,
        tag: Option<SummaryKind>,
    ) -> Result<(Vec<String>, Vec<String>), MoeaError> {
        let outcome = self.rank(generation, responses, EnvironmentKind::FrontsCrowding)?;
        let pair = (outcome.first_front().to_vec(), outcome.remaining());
        if report {
            self.report(generation, &outcome, "dominance sort");
        }
        self.write_summary(generation, &outcome, tag)?;
        self.outcome = Some(outcome);
        Ok(pair)
    }

    /// Strength/density fitness per member (lower is better). Members with a
    /// raw strength sum of zero are non-dominated. Cached for `compare`.
    pub fn spea2_fitness(
        &mut self,
        generation: u32,
        responses: &Ensemble,
        _dv: &Ensemble,
        report: bool,
        tag: Option<SummaryKind>,
    ) -> Result<HashMap<String, f64>, MoeaError> {
        let outcome = self.rank(generation, responses, EnvironmentKind::StrengthDensity)?;
        if report {
            self.report(generation, &outcome, "strength fitness");
        }
        self.write_summary(generation, &outcome, tag)?;
        let fitness = outcome.fitness.clone();
        self.outcome = Some(outcome);
        Ok(fitness)
    }

    /// Cuboid crowding distance for an explicit member subset (a front, or
    /// the whole set as the degenerate case). Boundary members on any axis
    /// receive infinite distance.
    pub fn cuboid_crowding_distance(
        &self,
        members: &[String],
        responses: &Ensemble,
    ) -> Result<HashMap<String, f64>, MoeaError> {
        let binding = self.binding()?;
        let subset = responses.subset(members)?;
        let table = ObjectiveTable::project(&binding.objectives, &subset)?;
        let rows: Vec<usize> = (0..table.len()).collect();
        let distances = cuboid_rows(&table, &rows);
        Ok(members
            .iter()
            .cloned()
            .zip(distances)
            .collect())
    }

    /// Distance to the k-th nearest neighbor in objective space, with
    /// k = floor(sqrt(set size)). Smaller means denser, less preferred.
    pub fn kth_nn_crowding_distance(
        &self,
        members: &[String],
        responses: &Ensemble,
    ) -> Result<HashMap<String, f64>, MoeaError> {
        let binding = self.binding()?;
        let subset = responses.subset(members)?;
        let table = ObjectiveTable::project(&binding.objectives, &subset)?;
        let rows: Vec<usize> = (0..table.len()).collect();
        let distances = kth_nn_rows(&table, &rows);
        Ok(members
            .iter()
            .cloned()
            .zip(distances)
            .collect())
    }

    /// Ids ordered best-first by the cached strength ranking: ascending
    /// fitness, ties broken by larger density distance, then lexical id.
    /// Requires a prior `spea2_fitness` call.
    pub fn strength_order(&self) -> Result<Vec<String>, MoeaError> {
        let outcome = self.outcome.as_ref().ok_or(MoeaError::NotInitialized)?;
        let mut ids: Vec<String> = outcome.fitness.keys().cloned().collect();
        ids.sort_by(|a, b| {
            outcome.fitness[a]
                .total_cmp(&outcome.fitness[b])
                .then_with(|| {
                    let da = outcome.density.get(a).copied().unwrap_or(0.0);
                    let db = outcome.density.get(b).copied().unwrap_or(0.0);
                    db.total_cmp(&da)
                })
                .then_with(|| a.cmp(b))
        });
        Ok(ids)
    }

    /// The `num_to_keep` members with the best strength fitness, ties broken
    /// by larger density distance, then lexical id.
    pub fn names_to_keep(
        &mut self,
        num_to_keep: usize,
        responses: &Ensemble,
        dv: &Ensemble,
    ) -> Result<Vec<String>, MoeaError> {
        self.spea2_fitness(0, responses, dv, false, None)?;
        let mut ids = self.strength_order()?;
        ids.truncate(num_to_keep);
        Ok(ids)
    }

    /// Tournament predicate: true iff `a` should be preferred over `b`.
    ///
    /// Feasibility wins outright; among infeasible members lower violation
    /// wins; then the cached ranking decides (front rank + crowding in the
    /// fronts family, fitness + density in the strength family); final ties
    /// fall back to lexical id order so sorts stay stable.
    pub fn compare(&self, a: &str, b: &str) -> Result<bool, MoeaError> {
        let outcome = self.outcome.as_ref().ok_or(MoeaError::NotInitialized)?;
        let feas_a = outcome.is_feasible(a);
        let feas_b = outcome.is_feasible(b);
        if feas_a != feas_b {
            return Ok(feas_a);
        }
        if !feas_a {
            let va = outcome.violation.get(a).copied().unwrap_or(f64::INFINITY);
            let vb = outcome.violation.get(b).copied().unwrap_or(f64::INFINITY);
            if va != vb {
                return Ok(va < vb);
            }
            return Ok(a < b);
        }
        match outcome.environment {
            EnvironmentKind::FrontsCrowding => {
                let fa = outcome.front_of.get(a).copied().unwrap_or(usize::MAX);
                let fb = outcome.front_of.get(b).copied().unwrap_or(usize::MAX);
                if fa != fb {
                    return Ok(fa < fb);
                }
                let ca = outcome.crowding.get(a).copied().unwrap_or(0.0);
                let cb = outcome.crowding.get(b).copied().unwrap_or(0.0);
                if ca != cb {
                    return Ok(ca > cb);
                }
            }
            EnvironmentKind::StrengthDensity => {
                let fa = outcome.fitness.get(a).copied().unwrap_or(f64::INFINITY);
                let fb = outcome.fitness.get(b).copied().unwrap_or(f64::INFINITY);
                if fa != fb {
                    return Ok(fa < fb);
                }
                let da = outcome.density.get(a).copied().unwrap_or(0.0);
                let db = outcome.density.get(b).copied().unwrap_or(0.0);
                if da != db {
                    return Ok(da > db);
                }
            }
        }
        Ok(a < b)
    }

    fn rank(
        &self,
        generation: u32,
        responses: &Ensemble,
        environment: EnvironmentKind,
    ) -> Result<RankOutcome, MoeaError> {
        let binding = self.binding()?;
        if responses.is_empty() {
            return Err(MoeaError::InsufficientMembers {
                generation,
                found: 0,
                required: 1,
            });
        }

        let table = ObjectiveTable::project(&binding.objectives, responses)?;
        let mut violation = violations(&binding.constraints, responses)?;

        // Duplicate objective vectors distort both domination counts and
        // density estimates. Under dup_as_dom they stay in and count as
        // dominated by their earlier twin; otherwise they are dropped here.
        let mut duplicates = Vec::new();
        let table = if self.dup_as_dom {
            table
        } else {
            let dropped_rows = find_duplicate_rows(&table, self.epsilon);
            if !dropped_rows.is_empty() {
                duplicates = dropped_rows.iter().map(|&i| table.id(i).to_string()).collect();
                warn!(
                    generation,
                    dropped = duplicates.len(),
                    "dropping duplicate members before ranking"
                );
                let mut kept_violation = Vec::with_capacity(violation.len() - dropped_rows.len());
                let dropped: std::collections::HashSet<usize> =
                    dropped_rows.iter().copied().collect();
                for (i, v) in violation.iter().enumerate() {
                    if !dropped.contains(&i) {
                        kept_violation.push(*v);
                    }
                }
                violation = kept_violation;
                table.without(&dropped_rows)
            } else {
                table
            }
        };

        let (feasible_rows, infeasible_rows) = split_feasibility(&violation);

        let (counts, dominated) =
            domination_containers(&table, &feasible_rows, self.epsilon, self.dup_as_dom);
        let front_rows = peel_fronts(&counts, &dominated);

        let mut fronts = Vec::with_capacity(front_rows.len());
        let mut front_of = HashMap::new();
        let mut crowding = HashMap::new();
        for (rank, positions) in front_rows.iter().enumerate() {
            let rows: Vec<usize> = positions.iter().map(|&p| feasible_rows[p]).collect();
            let distances = cuboid_rows(&table, &rows);
            let mut ids = Vec::with_capacity(rows.len());
            for (&row, distance) in rows.iter().zip(distances) {
                let id = table.id(row).to_string();
                front_of.insert(id.clone(), rank);
                crowding.insert(id.clone(), distance);
                ids.push(id);
            }
            fronts.push(ids);
        }

        let mut fitness = HashMap::new();
        let mut density = HashMap::new();
        if environment == EnvironmentKind::StrengthDensity {
            let (raw_fitness, densities) = spea_rows(&table, &feasible_rows, &dominated);
            let mut worst_feasible: f64 = 0.0;
            for ((&row, fit), dens) in feasible_rows.iter().zip(raw_fitness).zip(densities) {
                let id = table.id(row).to_string();
                worst_feasible = worst_feasible.max(fit);
                fitness.insert(id.clone(), fit);
                density.insert(id, dens);
            }
            // Infeasible members sit strictly behind every feasible one,
            // ordered among themselves by violation.
            for (k, (row, _)) in infeasible_rows.iter().enumerate() {
                let id = table.id(*row).to_string();
                fitness.insert(id.clone(), worst_feasible + 1.0 + k as f64);
                density.insert(id, 0.0);
            }
        }

        let infeasible: Vec<String> = infeasible_rows
            .iter()
            .map(|(row, _)| table.id(*row).to_string())
            .collect();
        let violation_map: HashMap<String, f64> = (0..table.len())
            .map(|i| (table.id(i).to_string(), violation[i]))
            .collect();
        let objective_values: HashMap<String, (Vec<f64>, Vec<f64>)> = (0..table.len())
            .map(|i| {
                (
                    table.id(i).to_string(),
                    (table.raw_vector(i).to_vec(), table.vector(i).to_vec()),
                )
            })
            .collect();

        Ok(RankOutcome {
            environment,
            fronts,
            front_of,
            crowding,
            fitness,
            density,
            violation: violation_map,
            infeasible,
            duplicates,
            objective_values,
        })
    }

    fn report(&self, generation: u32, outcome: &RankOutcome, what: &str) {
        info!(
            generation,
            members = outcome.violation.len(),
            fronts = outcome.fronts.len(),
            first_front = outcome.first_front().len(),
            infeasible = outcome.infeasible.len(),
            duplicates_dropped = outcome.duplicates.len(),
            "{what} complete"
        );
    }

    fn write_summary(
        &mut self,
        generation: u32,
        outcome: &RankOutcome,
        tag: Option<SummaryKind>,
    ) -> Result<(), MoeaError> {
        let Some(tag) = tag else { return Ok(()) };
        let binding = self.binding.as_mut().ok_or(MoeaError::NotInitialized)?;
        let infeasible_rank = outcome.fronts.len();
        let mut rows = Vec::new();
        for (id, violation) in outcome
            .violation
            .iter()
            .map(|(id, v)| (id.clone(), *v))
            .collect::<std::collections::BTreeMap<_, _>>()
        {
            let front = outcome
                .front_of
                .get(&id)
                .copied()
                .unwrap_or(infeasible_rank);
            let metric = match outcome.environment {
                EnvironmentKind::FrontsCrowding => {
                    outcome.crowding.get(&id).copied().unwrap_or(0.0)
                }
                EnvironmentKind::StrengthDensity => {
                    outcome.fitness.get(&id).copied().unwrap_or(f64::INFINITY)
                }
            };
            let (raw, adjusted) = outcome.objective_values.get(&id).cloned().unwrap_or_default();
            rows.push(SummaryRow {
                member: id,
                front,
                metric,
                violation,
                raw,
                adjusted,
            });
        }
        let writer = match tag {
            SummaryKind::Population => &mut binding.population_summary,
            SummaryKind::Archive => &mut binding.archive_summary,
        };
        writer.write_rows(generation, &rows)?;
        Ok(())
    }
}

/// Row indices (keep-first) whose full objective vector equals an earlier
/// row's within epsilon.
fn find_duplicate_rows(table: &ObjectiveTable, epsilon: f64) -> Vec<usize> {
    let mut dropped = Vec::new();
    let mut kept: Vec<usize> = Vec::new();
    for i in 0..table.len() {
        let duplicate = kept.iter().any(|&j| {
            table
                .vector(i)
                .iter()
                .zip(table.vector(j).iter())
                .all(|(&x, &y)| (x - y).abs() <= epsilon)
        });
        if duplicate {
            dropped.push(i);
        } else {
            kept.push(i);
        }
    }
    dropped
}

/// The O(N²) pairwise pass: for each feasible member, how many others
/// dominate it and which others it dominates. Parallelized over members.
fn domination_containers(
    table: &ObjectiveTable,
    rows: &[usize],
    epsilon: f64,
    dup_as_dom: bool,
) -> (Vec<usize>, Vec<Vec<usize>>) {
    let dominates = |a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>| {
        let mut strictly_better = false;
        for (&x, &y) in a.iter().zip(b.iter()) {
            if x > y + epsilon {
                return false;
            }
            if x < y - epsilon {
                strictly_better = true;
            }
        }
        strictly_better
    };
    let equals = |a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>| {
        a.iter().zip(b.iter()).all(|(&x, &y)| (x - y).abs() <= epsilon)
    };

    let per_member: Vec<(usize, Vec<usize>)> = (0..rows.len())
        .into_par_iter()
        .map(|p| {
            let a = table.vector(rows[p]);
            let mut count = 0;
            let mut dominated = Vec::new();
            for q in 0..rows.len() {
                if p == q {
                    continue;
                }
                let b = table.vector(rows[q]);
                if dominates(a, b) {
                    dominated.push(q);
                } else if dominates(b, a) {
                    count += 1;
                } else if dup_as_dom && equals(a, b) {
                    // the earlier row wins the tie
                    if p < q {
                        dominated.push(q);
                    } else {
                        count += 1;
                    }
                }
            }
            (count, dominated)
        })
        .collect();

    let mut counts = Vec::with_capacity(rows.len());
    let mut dominated = Vec::with_capacity(rows.len());
    for (c, d) in per_member {
        counts.push(c);
        dominated.push(d);
    }
    (counts, dominated)
}

/// Fast non-dominated sort: peel members with zero remaining dominators into
/// successive fronts. Positions index into the feasible row list.
fn peel_fronts(counts: &[usize], dominated: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let mut remaining = counts.to_vec();
    let mut assigned = vec![false; counts.len()];
    let mut fronts = Vec::new();

    let mut current: Vec<usize> = (0..counts.len()).filter(|&p| remaining[p] == 0).collect();
    while !current.is_empty() {
        for &p in &current {
            assigned[p] = true;
        }
        let mut next = Vec::new();
        for &p in &current {
            for &q in &dominated[p] {
                if assigned[q] {
                    continue;
                }
                remaining[q] -= 1;
                if remaining[q] == 0 {
                    next.push(q);
                }
            }
        }
        fronts.push(std::mem::take(&mut current));
        current = next;
    }
    fronts
}

/// Cuboid crowding distance over the given table rows. Boundary members per
/// axis get infinity; interior members accumulate the normalized gap between
/// their neighbors; a degenerate axis contributes nothing.
fn cuboid_rows(table: &ObjectiveTable, rows: &[usize]) -> Vec<f64> {
    let m = rows.len();
    let mut distance = vec![0.0_f64; m];
    if m == 0 {
        return distance;
    }
    if m <= 2 {
        return vec![f64::INFINITY; m];
    }
    let axes = table.names().len();
    for axis in 0..axes {
        let mut order: Vec<usize> = (0..m).collect();
        order.sort_by(|&a, &b| {
            table.vector(rows[a])[axis].total_cmp(&table.vector(rows[b])[axis])
        });
        let min = table.vector(rows[order[0]])[axis];
        let max = table.vector(rows[order[m - 1]])[axis];
        distance[order[0]] = f64::INFINITY;
        distance[order[m - 1]] = f64::INFINITY;
        let range = max - min;
        if range > 0.0 {
            for k in 1..m - 1 {
                let prev = table.vector(rows[order[k - 1]])[axis];
                let next = table.vector(rows[order[k + 1]])[axis];
                distance[order[k]] += (next - prev) / range;
            }
        }
    }
    distance
}

/// Distance to the k-th nearest neighbor in objective space for each row,
/// with k = floor(sqrt(m)). A member with no neighbors is infinitely sparse.
fn kth_nn_rows(table: &ObjectiveTable, rows: &[usize]) -> Vec<f64> {
    let m = rows.len();
    if m <= 1 {
        return vec![f64::INFINITY; m];
    }
    let k = ((m as f64).sqrt().floor() as usize).clamp(1, m - 1);
    (0..m)
        .into_par_iter()
        .map(|p| {
            let a = table.vector(rows[p]);
            let mut distances: Vec<f64> = (0..m)
                .filter(|&q| q != p)
                .map(|q| {
                    let b = table.vector(rows[q]);
                    a.iter()
                        .zip(b.iter())
                        .map(|(&x, &y)| (x - y) * (x - y))
                        .sum::<f64>()
                        .sqrt()
                })
                .collect();
            distances.sort_by(f64::total_cmp);
            distances[k - 1]
        })
        .collect()
}

/// SPEA2 fitness over the feasible rows: strength = how many a member
/// dominates; raw fitness = sum of the strengths of its dominators; total
/// fitness folds in a density term so ties among non-dominated members break
/// toward sparse regions. Lower is better; raw zero means non-dominated.
fn spea_rows(
    table: &ObjectiveTable,
    rows: &[usize],
    dominated: &[Vec<usize>],
) -> (Vec<f64>, Vec<f64>) {
    let strength: Vec<f64> = dominated.iter().map(|d| d.len() as f64).collect();
    let mut raw = vec![0.0_f64; rows.len()];
    for (p, dominated_by_p) in dominated.iter().enumerate() {
        for &q in dominated_by_p {
            raw[q] += strength[p];
        }
    }
    let density = kth_nn_rows(table, rows);
    let fitness: Vec<f64> = raw
        .iter()
        .zip(&density)
        .map(|(r, d)| r + 1.0 / (d + 2.0))
        .collect();
    (fitness, density)
}
