use ndarray::{Array2, ArrayView1};

use crate::config::{ConstraintSpec, ObjectiveSpec};
use crate::error::MoeaError;
use crate::member::Ensemble;

/// Feasibility tolerance on the summed constraint violation.
pub const FEASIBLE_TOLERANCE: f64 = 1.0e-10;

/// Per-member objective vectors projected from a response table.
///
/// Direction multipliers are applied at projection time so every downstream
/// comparison minimizes. Rebuilt on every ranking call, never carried across
/// generations.
#[derive(Clone, Debug)]
pub struct ObjectiveTable {
    names: Vec<String>,
    ids: Vec<String>,
    /// Direction-adjusted values, row per member, column per objective.
    adjusted: Array2<f64>,
    /// Raw response values in the same layout, kept for reporting.
    raw: Array2<f64>,
}

impl ObjectiveTable {
    pub fn project(specs: &[ObjectiveSpec], responses: &Ensemble) -> Result<Self, MoeaError> {
        let mut cols = Vec::with_capacity(specs.len());
        for spec in specs {
            let col = responses.col(&spec.name).ok_or_else(|| {
                MoeaError::Configuration(format!(
                    "objective '{}' is not a column of the response table",
                    spec.name
                ))
            })?;
            cols.push((col, spec.direction.multiplier()));
        }

        let n = responses.len();
        let mut adjusted = Array2::zeros((n, specs.len()));
        let mut raw = Array2::zeros((n, specs.len()));
        for i in 0..n {
            let row = responses.row_at(i);
            for (j, (col, mult)) in cols.iter().enumerate() {
                raw[[i, j]] = row[*col];
                adjusted[[i, j]] = row[*col] * mult;
            }
        }

        Ok(ObjectiveTable {
            names: specs.iter().map(|s| s.name.clone()).collect(),
            ids: responses.ids().to_vec(),
            adjusted,
            raw,
        })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn id(&self, idx: usize) -> &str {
        &self.ids[idx]
    }

    /// Direction-adjusted objective vector of the member at `idx`.
    pub fn vector(&self, idx: usize) -> ArrayView1<'_, f64> {
        self.adjusted.row(idx)
    }

    pub fn raw_vector(&self, idx: usize) -> ArrayView1<'_, f64> {
        self.raw.row(idx)
    }

    /// Drops the listed row indices, preserving order of the rest.
    pub fn without(&self, drop: &[usize]) -> ObjectiveTable {
        let drop: std::collections::HashSet<usize> = drop.iter().copied().collect();
        let keep: Vec<usize> = (0..self.len()).filter(|i| !drop.contains(i)).collect();
        ObjectiveTable {
            names: self.names.clone(),
            ids: keep.iter().map(|&i| self.ids[i].clone()).collect(),
            adjusted: self.adjusted.select(ndarray::Axis(0), &keep),
            raw: self.raw.select(ndarray::Axis(0), &keep),
        }
    }
}

/// Summed constraint violation per member, aligned with the response table's
/// row order.
pub fn violations(
    constraints: &[ConstraintSpec],
    responses: &Ensemble,
) -> Result<Vec<f64>, MoeaError> {
    let mut cols = Vec::with_capacity(constraints.len());
    for c in constraints {
        let col = responses.col(&c.name).ok_or_else(|| {
            MoeaError::Configuration(format!(
                "constraint '{}' is not a column of the response table",
                c.name
            ))
        })?;
        cols.push(col);
    }
    let mut out = vec![0.0; responses.len()];
    for i in 0..responses.len() {
        let row = responses.row_at(i);
        out[i] = constraints
            .iter()
            .zip(&cols)
            .map(|(c, &col)| c.violation(row[col]))
            .sum();
    }
    Ok(out)
}

/// Splits row indices into the feasible set and the infeasible set ordered by
/// ascending total violation.
pub fn split_feasibility(violation: &[f64]) -> (Vec<usize>, Vec<(usize, f64)>) {
    let mut feasible = Vec::new();
    let mut infeasible = Vec::new();
    for (i, &v) in violation.iter().enumerate() {
        if v <= FEASIBLE_TOLERANCE {
            feasible.push(i);
        } else {
            infeasible.push((i, v));
        }
    }
    infeasible.sort_by(|a, b| a.1.total_cmp(&b.1));
    (feasible, infeasible)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConstraintSense, Direction};

    fn responses() -> Ensemble {
        Ensemble::from_rows(
            vec!["cost".into(), "yield".into(), "cap".into()],
            vec!["m0".into(), "m1".into()],
            vec![vec![2.0, 10.0, 0.5], vec![3.0, 12.0, 1.5]],
        )
        .unwrap()
    }

    fn specs() -> Vec<ObjectiveSpec> {
        vec![
            ObjectiveSpec {
                name: "cost".into(),
                direction: Direction::Minimize,
            },
            ObjectiveSpec {
                name: "yield".into(),
                direction: Direction::Maximize,
            },
        ]
    }

    #[test]
    fn projection_applies_direction_multiplier() {
        let table = ObjectiveTable::project(&specs(), &responses()).unwrap();
        assert_eq!(table.vector(0).to_vec(), vec![2.0, -10.0]);
        assert_eq!(table.raw_vector(0).to_vec(), vec![2.0, 10.0]);
    }

    #[test]
    fn unknown_objective_column_is_a_configuration_error() {
        let mut bad = specs();
        bad[0].name = "missing".into();
        assert!(ObjectiveTable::project(&bad, &responses()).is_err());
    }

    #[test]
    fn violations_sum_shortfall_beyond_bound() {
        let constraints = vec![ConstraintSpec {
            name: "cap".into(),
            sense: ConstraintSense::LessEqual,
            bound: 1.0,
        }];
        let v = violations(&constraints, &responses()).unwrap();
        assert_eq!(v[0], 0.0, "within bound must not accrue violation");
        assert!((v[1] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn feasibility_split_orders_infeasible_ascending() {
        let v = vec![0.0, 2.0, 0.5];
        let (feasible, infeasible) = split_feasibility(&v);
        assert_eq!(feasible, vec![0]);
        assert_eq!(
            infeasible.iter().map(|(i, _)| *i).collect::<Vec<_>>(),
            vec![2, 1],
            "least-violating member ranks first among the infeasible"
        );
    }

    #[test]
    fn without_drops_rows() {
        let table = ObjectiveTable::project(&specs(), &responses()).unwrap();
        let trimmed = table.without(&[0]);
        assert_eq!(trimmed.ids(), &["m1".to_string()]);
        assert_eq!(trimmed.vector(0).to_vec(), vec![3.0, -12.0]);
    }
}
