use std::collections::{HashMap, HashSet};

use ndarray::{Array2, ArrayView1, Axis};

use crate::error::MoeaError;

/// A dense member table: one row per member, one column per named quantity.
///
/// Both the decision-variable table and the response table are `Ensemble`s
/// kept as parallel pairs by the driver. Values live in a flat matrix and the
/// string id is kept only at the boundary (lookups, lineage, reporting), so
/// the O(N²) dominance pass never hashes strings.
#[derive(Clone, Debug)]
pub struct Ensemble {
    col_names: Vec<String>,
    col_index: HashMap<String, usize>,
    ids: Vec<String>,
    index: HashMap<String, usize>,
    values: Array2<f64>,
}

impl Ensemble {
    pub fn new(col_names: Vec<String>) -> Self {
        let col_index = col_names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i))
            .collect();
        let ncols = col_names.len();
        Ensemble {
            col_names,
            col_index,
            ids: Vec::new(),
            index: HashMap::new(),
            values: Array2::zeros((0, ncols)),
        }
    }

    pub fn from_rows(
        col_names: Vec<String>,
        ids: Vec<String>,
        rows: Vec<Vec<f64>>,
    ) -> Result<Self, MoeaError> {
        let mut ensemble = Ensemble::new(col_names);
        if ids.len() != rows.len() {
            return Err(MoeaError::Shape(format!(
                "{} ids for {} rows",
                ids.len(),
                rows.len()
            )));
        }
        for (id, row) in ids.into_iter().zip(rows) {
            ensemble.push_row(id, &row)?;
        }
        Ok(ensemble)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn col_names(&self) -> &[String] {
        &self.col_names
    }

    pub fn col(&self, name: &str) -> Option<usize> {
        self.col_index.get(name).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn row_at(&self, idx: usize) -> ArrayView1<'_, f64> {
        self.values.row(idx)
    }

    pub fn row(&self, id: &str) -> Option<ArrayView1<'_, f64>> {
        self.index_of(id).map(|i| self.values.row(i))
    }

    pub fn value(&self, id: &str, col_name: &str) -> Option<f64> {
        let row = self.index_of(id)?;
        let col = self.col(col_name)?;
        Some(self.values[[row, col]])
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn push_row(&mut self, id: String, row: &[f64]) -> Result<(), MoeaError> {
        if row.len() != self.col_names.len() {
            return Err(MoeaError::Shape(format!(
                "member '{}' has {} values, table has {} columns",
                id,
                row.len(),
                self.col_names.len()
            )));
        }
        if self.index.contains_key(&id) {
            return Err(MoeaError::Shape(format!("duplicate member id '{id}'")));
        }
        self.values
            .push_row(ArrayView1::from(row))
            .map_err(|e| MoeaError::Shape(e.to_string()))?;
        self.index.insert(id.clone(), self.ids.len());
        self.ids.push(id);
        Ok(())
    }

    /// Appends every member of `other` whose id is not already present.
    /// Returns the number of rows added.
    pub fn merge_from(&mut self, other: &Ensemble) -> Result<usize, MoeaError> {
        let mut added = 0;
        for (i, id) in other.ids.iter().enumerate() {
            if self.contains(id) {
                continue;
            }
            let row: Vec<f64> = other.values.row(i).to_vec();
            self.push_row(id.clone(), &row)?;
            added += 1;
        }
        Ok(added)
    }

    /// A new table holding exactly `keep` in the given order. Unknown ids are
    /// an error; the caller decides what survives.
    pub fn subset(&self, keep: &[String]) -> Result<Ensemble, MoeaError> {
        let mut indices = Vec::with_capacity(keep.len());
        for id in keep {
            match self.index_of(id) {
                Some(i) => indices.push(i),
                None => {
                    return Err(MoeaError::Shape(format!(
                        "member '{id}' not present in table"
                    )))
                }
            }
        }
        let values = self.values.select(Axis(0), &indices);
        let mut subset = Ensemble::new(self.col_names.clone());
        subset.values = values;
        subset.ids = keep.to_vec();
        subset.index = keep
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();
        Ok(subset)
    }

    /// Drops every member whose id is not in `keep`, preserving row order.
    pub fn retain(&mut self, keep: &HashSet<String>) {
        let survivors: Vec<String> = self
            .ids
            .iter()
            .filter(|id| keep.contains(*id))
            .cloned()
            .collect();
        // survivors are all present, subset cannot fail
        let trimmed = self
            .subset(&survivors)
            .expect("retained ids are a subset of the table");
        *self = trimmed;
    }

    pub fn drop_ids(&mut self, drop: &[String]) {
        let drop: HashSet<&str> = drop.iter().map(String::as_str).collect();
        let keep: HashSet<String> = self
            .ids
            .iter()
            .filter(|id| !drop.contains(id.as_str()))
            .cloned()
            .collect();
        self.retain(&keep);
    }
}
