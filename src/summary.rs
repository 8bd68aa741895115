use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::MoeaError;

pub const POP_SUM_TAG: &str = "pareto.summary.csv";
pub const ARC_SUM_TAG: &str = "pareto.archive.summary.csv";
pub const LINEAGE_TAG: &str = "lineage.csv";

/// One row of a per-generation Pareto summary file.
pub struct SummaryRow {
    pub member: String,
    pub front: usize,
    /// Crowding distance or strength fitness, depending on the environment.
    pub metric: f64,
    pub violation: f64,
    pub raw: Vec<f64>,
    pub adjusted: Vec<f64>,
}

/// Row-per-member-per-generation CSV writer for the population and archive
/// summaries. Created (truncating any previous file) exactly once when the
/// ranking engine is bound; appended to for the rest of the run.
pub struct SummaryWriter {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl SummaryWriter {
    pub fn create(dir: &Path, tag: &str, objective_names: &[String]) -> Result<Self, MoeaError> {
        let path = dir.join(tag);
        let file = File::create(&path)?;
        let mut writer = BufWriter::new(file);
        write!(writer, "generation,member,front,metric,violation")?;
        for name in objective_names {
            write!(writer, ",{name}_raw,{name}_adjusted")?;
        }
        writeln!(writer)?;
        writer.flush()?;
        debug!(path = %path.display(), "initialized pareto summary file");
        Ok(SummaryWriter { path, writer })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_rows(&mut self, generation: u32, rows: &[SummaryRow]) -> Result<(), MoeaError> {
        for row in rows {
            write!(
                self.writer,
                "{},{},{},{},{}",
                generation, row.member, row.front, row.metric, row.violation
            )?;
            for (raw, adjusted) in row.raw.iter().zip(&row.adjusted) {
                write!(self.writer, ",{raw},{adjusted}")?;
            }
            writeln!(self.writer)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

/// Append-only parent→child record, one row per generated offspring.
pub struct LineageLog {
    writer: BufWriter<File>,
}

impl LineageLog {
    pub fn create(dir: &Path) -> Result<Self, MoeaError> {
        let path = dir.join(LINEAGE_TAG);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "generation,child,parents")?;
        Ok(LineageLog { writer })
    }

    pub fn append(
        &mut self,
        generation: u32,
        child: &str,
        parents: &[String],
    ) -> Result<(), MoeaError> {
        writeln!(self.writer, "{},{},{}", generation, child, parents.join("|"))?;
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_header_lists_every_objective_twice() {
        let dir = tempfile::tempdir().unwrap();
        let names = vec!["cost".to_string(), "yield".to_string()];
        let mut w = SummaryWriter::create(dir.path(), POP_SUM_TAG, &names).unwrap();
        w.write_rows(
            0,
            &[SummaryRow {
                member: "gen=0_member=1".into(),
                front: 0,
                metric: f64::INFINITY,
                violation: 0.0,
                raw: vec![1.0, 2.0],
                adjusted: vec![1.0, -2.0],
            }],
        )
        .unwrap();
        let text = std::fs::read_to_string(w.path()).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "generation,member,front,metric,violation,cost_raw,cost_adjusted,yield_raw,yield_adjusted"
        );
        let row = lines.next().unwrap();
        assert!(row.starts_with("0,gen=0_member=1,0,inf,0"));
        assert!(row.ends_with("2,-2"));
    }

    #[test]
    fn lineage_rows_append_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = LineageLog::create(dir.path()).unwrap();
        log.append(1, "c1", &["p1".into(), "p2".into()]).unwrap();
        log.append(1, "c2", &["p3".into()]).unwrap();
        let text = std::fs::read_to_string(dir.path().join(LINEAGE_TAG)).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["generation,child,parents", "1,c1,p1|p2", "1,c2,p3"]);
    }
}
