use rand::prelude::*;
use rand::rngs::StdRng;

use crate::config::DecisionVariable;
use crate::member::Ensemble;

/// Offspring decision-variable rows plus the parent ids behind each row,
/// in the order generated. The driver turns these into named members and
/// lineage records.
pub struct GeneratedRows {
    pub rows: Vec<Vec<f64>>,
    pub parents: Vec<Vec<String>>,
}

#[derive(Copy, Clone, Debug)]
pub struct DeParams {
    /// Scale factor F applied to the donor difference vector.
    pub scale: f64,
    /// Per-variable crossover probability CR.
    pub crossover: f64,
}

#[derive(Copy, Clone, Debug)]
pub struct SbxParams {
    pub crossover_probability: f64,
    /// Distribution index eta_c; larger concentrates children near parents.
    pub eta: f64,
}

#[derive(Copy, Clone, Debug)]
pub struct MutationParams {
    pub probability: f64,
    pub eta: f64,
}

pub fn clamp_to_bounds(value: f64, dv: &DecisionVariable) -> f64 {
    value.clamp(dv.lower, dv.upper)
}

/// DE/rand/1/bin: for each target, three distinct donors form a scaled
/// difference vector added to the first, crossed per-variable against the
/// target. One variable is always taken from the trial vector so every
/// offspring differs from its target parent.
pub fn differential_evolution(
    rng: &mut StdRng,
    pool: &Ensemble,
    bounds: &[DecisionVariable],
    count: usize,
    params: DeParams,
) -> GeneratedRows {
    assert!(pool.len() >= 4, "DE needs four distinct members");
    let nvars = bounds.len();
    let mut rows = Vec::with_capacity(count);
    let mut parents = Vec::with_capacity(count);

    for i in 0..count {
        let target = i % pool.len();
        let mut donors;
        loop {
            donors = rand::seq::index::sample(rng, pool.len(), 3).into_vec();
            if !donors.contains(&target) {
                break;
            }
        }
        let (d1, d2, d3) = (donors[0], donors[1], donors[2]);
        let target_row = pool.row_at(target);
        let forced = rng.gen_range(0..nvars);

        let mut child = Vec::with_capacity(nvars);
        for j in 0..nvars {
            let trial = pool.row_at(d1)[j]
                + params.scale * (pool.row_at(d2)[j] - pool.row_at(d3)[j]);
            let value = if j == forced || rng.gen_bool(params.crossover) {
                trial
            } else {
                target_row[j]
            };
            child.push(clamp_to_bounds(value, &bounds[j]));
        }
        rows.push(child);
        parents.push(vec![
            pool.ids()[target].clone(),
            pool.ids()[d1].clone(),
            pool.ids()[d2].clone(),
            pool.ids()[d3].clone(),
        ]);
    }
    GeneratedRows { rows, parents }
}

/// Spread factor for simulated binary crossover from one uniform draw.
fn sbx_beta(rng: &mut StdRng, eta: f64) -> f64 {
    let u: f64 = rng.gen();
    if u <= 0.5 {
        (2.0 * u).powf(1.0 / (eta + 1.0))
    } else {
        (1.0 / (2.0 * (1.0 - u))).powf(1.0 / (eta + 1.0))
    }
}

/// Simulated binary crossover over consecutive pool pairs, producing two
/// children reflected symmetrically around each parent pair.
pub fn simulated_binary_crossover(
    rng: &mut StdRng,
    pool: &Ensemble,
    bounds: &[DecisionVariable],
    count: usize,
    params: SbxParams,
) -> GeneratedRows {
    assert!(pool.len() >= 2, "SBX needs at least one parent pair");
    let nvars = bounds.len();
    let mut rows = Vec::with_capacity(count);
    let mut parents = Vec::with_capacity(count);

    let mut pair = 0;
    while rows.len() < count {
        let p1 = (2 * pair) % pool.len();
        let p2 = (2 * pair + 1) % pool.len();
        pair += 1;
        if p1 == p2 {
            continue;
        }
        let a = pool.row_at(p1);
        let b = pool.row_at(p2);

        let mut c1 = Vec::with_capacity(nvars);
        let mut c2 = Vec::with_capacity(nvars);
        for j in 0..nvars {
            let (v1, v2) = (a[j], b[j]);
            if rng.gen_bool(params.crossover_probability) && (v1 - v2).abs() > f64::EPSILON {
                let beta = sbx_beta(rng, params.eta);
                let mut x1 = 0.5 * ((1.0 + beta) * v1 + (1.0 - beta) * v2);
                let mut x2 = 0.5 * ((1.0 - beta) * v1 + (1.0 + beta) * v2);
                if rng.gen_bool(0.5) {
                    std::mem::swap(&mut x1, &mut x2);
                }
                c1.push(clamp_to_bounds(x1, &bounds[j]));
                c2.push(clamp_to_bounds(x2, &bounds[j]));
            } else {
                c1.push(v1);
                c2.push(v2);
            }
        }

        let pair_parents = vec![pool.ids()[p1].clone(), pool.ids()[p2].clone()];
        rows.push(c1);
        parents.push(pair_parents.clone());
        if rows.len() < count {
            rows.push(c2);
            parents.push(pair_parents);
        }
    }
    GeneratedRows { rows, parents }
}

/// Polynomial mutation applied in place: each variable independently perturbed
/// with the configured probability, magnitude shaped by eta_m, result clamped
/// back into bounds.
pub fn polynomial_mutation(
    rng: &mut StdRng,
    rows: &mut [Vec<f64>],
    bounds: &[DecisionVariable],
    params: MutationParams,
) {
    for row in rows.iter_mut() {
        for (j, dv) in bounds.iter().enumerate() {
            if !rng.gen_bool(params.probability) {
                continue;
            }
            let range = dv.upper - dv.lower;
            let x = row[j];
            let delta1 = (x - dv.lower) / range;
            let delta2 = (dv.upper - x) / range;
            let u: f64 = rng.gen();
            let exponent = 1.0 / (params.eta + 1.0);
            let deltaq = if u < 0.5 {
                let val = 2.0 * u + (1.0 - 2.0 * u) * (1.0 - delta1).powf(params.eta + 1.0);
                val.powf(exponent) - 1.0
            } else {
                let val = 2.0 * (1.0 - u)
                    + 2.0 * (u - 0.5) * (1.0 - delta2).powf(params.eta + 1.0);
                1.0 - val.powf(exponent)
            };
            row[j] = clamp_to_bounds(x + deltaq * range, dv);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn bounds() -> Vec<DecisionVariable> {
        vec![
            DecisionVariable {
                name: "x1".into(),
                lower: 0.0,
                upper: 1.0,
            },
            DecisionVariable {
                name: "x2".into(),
                lower: -5.0,
                upper: 5.0,
            },
        ]
    }

    fn pool(n: usize) -> Ensemble {
        let mut rng = StdRng::seed_from_u64(7);
        let ids: Vec<String> = (0..n).map(|i| format!("p{i}")).collect();
        let rows: Vec<Vec<f64>> = (0..n)
            .map(|_| vec![rng.gen_range(0.0..1.0), rng.gen_range(-5.0..5.0)])
            .collect();
        Ensemble::from_rows(vec!["x1".into(), "x2".into()], ids, rows).unwrap()
    }

    fn assert_in_bounds(rows: &[Vec<f64>], bounds: &[DecisionVariable]) {
        for row in rows {
            for (v, dv) in row.iter().zip(bounds) {
                assert!(
                    *v >= dv.lower && *v <= dv.upper,
                    "value {v} escaped bounds [{}, {}]",
                    dv.lower,
                    dv.upper
                );
            }
        }
    }

    #[test]
    fn de_offspring_stay_in_bounds_and_record_four_parents() {
        let mut rng = StdRng::seed_from_u64(1);
        let generated = differential_evolution(
            &mut rng,
            &pool(8),
            &bounds(),
            12,
            DeParams {
                scale: 0.8,
                crossover: 0.9,
            },
        );
        assert_eq!(generated.rows.len(), 12);
        assert_in_bounds(&generated.rows, &bounds());
        for parents in &generated.parents {
            assert_eq!(parents.len(), 4, "target plus three donors");
            let donors = &parents[1..];
            let unique: std::collections::HashSet<_> = donors.iter().collect();
            assert_eq!(unique.len(), 3, "donors must be distinct");
            assert!(
                !donors.contains(&parents[0]),
                "donors must not include the target"
            );
        }
    }

    #[test]
    fn sbx_offspring_stay_in_bounds_and_record_both_parents() {
        let mut rng = StdRng::seed_from_u64(2);
        let generated = simulated_binary_crossover(
            &mut rng,
            &pool(6),
            &bounds(),
            9,
            SbxParams {
                crossover_probability: 0.9,
                eta: 15.0,
            },
        );
        assert_eq!(generated.rows.len(), 9);
        assert_in_bounds(&generated.rows, &bounds());
        for parents in &generated.parents {
            assert_eq!(parents.len(), 2);
        }
    }

    #[test]
    fn mutation_with_zero_probability_is_identity() {
        let mut rng = StdRng::seed_from_u64(3);
        let original = vec![vec![0.5, 0.0], vec![0.25, 2.0]];
        let mut rows = original.clone();
        polynomial_mutation(
            &mut rng,
            &mut rows,
            &bounds(),
            MutationParams {
                probability: 0.0,
                eta: 20.0,
            },
        );
        assert_eq!(rows, original);
    }

    #[test]
    fn mutation_respects_bounds_at_full_probability() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut rows = vec![vec![0.0, 5.0], vec![1.0, -5.0], vec![0.5, 0.0]];
        polynomial_mutation(
            &mut rng,
            &mut rows,
            &bounds(),
            MutationParams {
                probability: 1.0,
                eta: 20.0,
            },
        );
        assert_in_bounds(&rows, &bounds());
    }

    #[test]
    fn operators_are_deterministic_for_a_fixed_seed() {
        let params = DeParams {
            scale: 0.8,
            crossover: 0.9,
        };
        let mut rng_a = StdRng::seed_from_u64(42);
        let mut rng_b = StdRng::seed_from_u64(42);
        let a = differential_evolution(&mut rng_a, &pool(8), &bounds(), 6, params);
        let b = differential_evolution(&mut rng_b, &pool(8), &bounds(), 6, params);
        assert_eq!(a.rows, b.rows, "same seed must reproduce the same offspring");
        assert_eq!(a.parents, b.parents);
    }
}
