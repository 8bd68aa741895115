use rand::prelude::*;
use rand::rngs::StdRng;
use tracing::debug;

use crate::config::EnvironmentKind;
use crate::error::MoeaError;
use crate::member::Ensemble;
use crate::ranking::{ParetoRanking, SummaryKind};

/// Binary tournament over a ranked pool: draw two, keep the one `compare`
/// prefers. Requires a prior ranking call on the engine.
pub fn binary_tournament(
    rng: &mut StdRng,
    pool: &[String],
    count: usize,
    engine: &ParetoRanking,
) -> Result<Vec<String>, MoeaError> {
    assert!(!pool.is_empty(), "tournament pool cannot be empty");
    let mut winners = Vec::with_capacity(count);
    for _ in 0..count {
        let a = &pool[rng.gen_range(0..pool.len())];
        let b = &pool[rng.gen_range(0..pool.len())];
        let winner = if engine.compare(a, b)? { a } else { b };
        winners.push(winner.clone());
    }
    Ok(winners)
}

/// Truncates the member set behind `responses` down to `num_to_keep` ids
/// using the configured environment family, ranking as a side effect (the
/// engine's cached outcome afterwards reflects this call).
///
/// Fronts/crowding: fill whole fronts in rank order; sort the overflowing
/// front by descending crowding distance and take the remainder; if the
/// feasible set runs out, continue with infeasible members by ascending
/// violation. Strength/density: keep the best ids by strength fitness.
pub fn environmental_selection(
    engine: &mut ParetoRanking,
    environment: EnvironmentKind,
    num_to_keep: usize,
    generation: u32,
    responses: &Ensemble,
    dv: &Ensemble,
    report: bool,
    tag: Option<SummaryKind>,
) -> Result<Vec<String>, MoeaError> {
    match environment {
        EnvironmentKind::FrontsCrowding => {
            engine.dominance_sort(generation, responses, dv, report, tag)?;
            let outcome = engine.outcome().expect("dominance_sort just ran");
            let mut keep: Vec<String> = Vec::with_capacity(num_to_keep);
            for front in &outcome.fronts {
                if keep.len() >= num_to_keep {
                    break;
                }
                if keep.len() + front.len() <= num_to_keep {
                    keep.extend(front.iter().cloned());
                } else {
                    let needed = num_to_keep - keep.len();
                    let mut overflow = front.clone();
                    overflow.sort_by(|a, b| {
                        let ca = outcome.crowding.get(a).copied().unwrap_or(0.0);
                        let cb = outcome.crowding.get(b).copied().unwrap_or(0.0);
                        cb.total_cmp(&ca).then_with(|| a.cmp(b))
                    });
                    keep.extend(overflow.into_iter().take(needed));
                    break;
                }
            }
            if keep.len() < num_to_keep {
                let shortfall = num_to_keep - keep.len();
                debug!(
                    generation,
                    shortfall, "feasible set exhausted, filling from infeasible members"
                );
                keep.extend(outcome.infeasible.iter().take(shortfall).cloned());
            }
            Ok(keep)
        }
        EnvironmentKind::StrengthDensity => {
            engine.spea2_fitness(generation, responses, dv, report, tag)?;
            let mut keep = engine.strength_order()?;
            keep.truncate(num_to_keep);
            Ok(keep)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Direction, ObjectiveSpec};
    use rand::SeedableRng;
    use tempfile::TempDir;

    fn bound_engine() -> (ParetoRanking, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = ParetoRanking::new(false);
        engine
            .set_pointers(
                vec![
                    ObjectiveSpec {
                        name: "o1".into(),
                        direction: Direction::Minimize,
                    },
                    ObjectiveSpec {
                        name: "o2".into(),
                        direction: Direction::Minimize,
                    },
                ],
                vec![],
                dir.path(),
            )
            .unwrap();
        (engine, dir)
    }

    fn layered_set() -> Ensemble {
        // front 0: a, b, c; front 1: d, e
        Ensemble::from_rows(
            vec!["o1".into(), "o2".into()],
            vec!["a".into(), "b".into(), "c".into(), "d".into(), "e".into()],
            vec![
                vec![1.0, 5.0],
                vec![2.0, 4.0],
                vec![3.0, 3.0],
                vec![2.0, 6.0],
                vec![4.0, 4.0],
            ],
        )
        .unwrap()
    }

    #[test]
    fn fronts_mode_fills_front_by_front() {
        let (mut engine, _dir) = bound_engine();
        let op = layered_set();
        let dv = Ensemble::new(vec![]);
        let keep = environmental_selection(
            &mut engine,
            EnvironmentKind::FrontsCrowding,
            4,
            0,
            &op,
            &dv,
            false,
            None,
        )
        .unwrap();
        assert_eq!(keep.len(), 4);
        for id in ["a", "b", "c"] {
            assert!(
                keep.contains(&id.to_string()),
                "whole first front must survive before any of front 1"
            );
        }
    }

    #[test]
    fn overflowing_front_keeps_boundary_members() {
        let (mut engine, _dir) = bound_engine();
        let op = layered_set();
        let dv = Ensemble::new(vec![]);
        let keep = environmental_selection(
            &mut engine,
            EnvironmentKind::FrontsCrowding,
            2,
            0,
            &op,
            &dv,
            false,
            None,
        )
        .unwrap();
        // a and c hold the axis extremes of front 0 and carry infinite
        // crowding distance, so they win the truncation.
        assert_eq!(keep.len(), 2);
        assert!(keep.contains(&"a".to_string()));
        assert!(keep.contains(&"c".to_string()));
    }

    #[test]
    fn strength_mode_respects_the_bound() {
        let (mut engine, _dir) = bound_engine();
        let op = layered_set();
        let dv = Ensemble::new(vec![]);
        let keep = environmental_selection(
            &mut engine,
            EnvironmentKind::StrengthDensity,
            3,
            0,
            &op,
            &dv,
            false,
            None,
        )
        .unwrap();
        assert_eq!(keep.len(), 3);
        // d and e are dominated; at most one of them can sneak past the
        // three non-dominated members, and only if fitness said so.
        let dominated_kept = ["d", "e"]
            .iter()
            .filter(|id| keep.contains(&id.to_string()))
            .count();
        assert_eq!(dominated_kept, 0, "dominated members must be truncated first");
    }

    #[test]
    fn strength_truncation_agrees_with_names_to_keep() {
        let (mut engine, _dir) = bound_engine();
        let op = layered_set();
        let dv = Ensemble::new(vec![]);
        let keep = environmental_selection(
            &mut engine,
            EnvironmentKind::StrengthDensity,
            3,
            0,
            &op,
            &dv,
            false,
            None,
        )
        .unwrap();
        let named = engine.names_to_keep(3, &op, &dv).unwrap();
        assert_eq!(keep, named, "truncation and the public query share one ordering");
    }

    #[test]
    fn tournament_winners_come_from_the_pool_and_repeat_with_seed() {
        let (mut engine, _dir) = bound_engine();
        let op = layered_set();
        let dv = Ensemble::new(vec![]);
        engine.dominance_sort(0, &op, &dv, false, None).unwrap();
        let pool: Vec<String> = op.ids().to_vec();

        let mut rng_a = StdRng::seed_from_u64(11);
        let winners_a = binary_tournament(&mut rng_a, &pool, 8, &engine).unwrap();
        assert_eq!(winners_a.len(), 8);
        for w in &winners_a {
            assert!(pool.contains(w));
        }

        let mut rng_b = StdRng::seed_from_u64(11);
        let winners_b = binary_tournament(&mut rng_b, &pool, 8, &engine).unwrap();
        assert_eq!(winners_a, winners_b);
    }
}
