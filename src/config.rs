//! Job files
//!
//! A job reads named NDJSON sources, runs one transform over them and
//! writes the result to an NDJSON file. Relative paths are resolved against
//! the directory of the job file.
//!
//! Example format:
//! ```yaml
//! sources:
//!   - name: orders
//!     path: orders.ndjson
//!   - name: items
//!     path: [items-2024.ndjson, items-2025.ndjson]
//!     filters:
//!       - column: status
//!         operator: equal
//!         value: shipped
//! transform:
//!   type: join
//!   left: orders
//!   right: items
//!   kind: left_outer
//!   keys:
//!     - left: id
//!       right: order_id
//! output: orders_with_items.ndjson
//! limit: 1000
//! ```

use crate::etl::{ComponentId, FilterConfig, Pipeline, Processor, RowFilter, UnionSource};
use crate::storage::{NdjsonSource, NdjsonWriter, SqliteEngine};
use crate::transform::compare::SourceFactory;
use crate::transform::join::RelationalEngine;
use crate::transform::{CompareConfig, DiffEngine, Join, JoinDefinition, TreeConfig, TreeProcessor};

use eyre::{Context, Result, eyre};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One file or several files read one after the other
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourcePath {
    One(PathBuf),
    Many(Vec<PathBuf>),
}

impl SourcePath {
    pub fn paths(&self) -> Vec<&Path> {
        match self {
            SourcePath::One(path) => vec![path.as_path()],
            SourcePath::Many(paths) => paths.iter().map(PathBuf::as_path).collect(),
        }
    }
}

/// Named NDJSON input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub path: SourcePath,
    #[serde(default)]
    pub filters: Vec<FilterConfig>,
}

impl SourceConfig {
    /// Open the source as a processor
    ///
    /// Several paths are chained; each chained table is named after its
    /// file stem.
    pub fn open(&self, base: &Path) -> crate::Result<Processor> {
        let paths = self.path.paths();
        let mut processor = match paths.as_slice() {
            [path] => NdjsonSource::processor(&self.name, base.join(path))?,
            paths => {
                let inputs = paths
                    .iter()
                    .map(|path| {
                        let table = path
                            .file_stem()
                            .map(|s| s.to_string_lossy().into_owned())
                            .unwrap_or_else(|| self.name.clone());
                        NdjsonSource::processor(table, base.join(path))
                    })
                    .collect::<crate::Result<Vec<_>>>()?;
                Processor::new(&self.name, UnionSource::new(inputs))
            }
        };
        processor.add_filter(RowFilter::from_config(&self.filters)?);
        Ok(processor)
    }
}

/// The transform a job runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransformConfig {
    /// Join of the sources named `left` and `right`
    Join(JoinDefinition),
    /// Pairwise diff of the named sources, in order
    Compare {
        sources: Vec<String>,
        #[serde(flatten)]
        options: CompareConfig,
    },
    /// Hierarchy built from one source
    Tree {
        source: String,
        #[serde(flatten)]
        config: TreeConfig,
    },
}

impl TransformConfig {
    fn kind(&self) -> &'static str {
        match self {
            TransformConfig::Join(_) => "join",
            TransformConfig::Compare { .. } => "compare",
            TransformConfig::Tree { .. } => "tree",
        }
    }
}

/// Job file contents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Component name used in logs and errors; the transform type when absent
    #[serde(default)]
    pub name: Option<String>,
    pub sources: Vec<SourceConfig>,
    pub transform: TransformConfig,
    pub output: PathBuf,
    /// Maximum number of output rows, 0 for all
    #[serde(default)]
    pub limit: usize,
    /// Filters applied to the transform output
    #[serde(default)]
    pub filters: Vec<FilterConfig>,
    /// SQLite database file for SQL joins, in memory when absent
    #[serde(default)]
    pub database: Option<PathBuf>,
    #[serde(skip)]
    base: PathBuf,
}

impl JobConfig {
    /// Read a job from a YAML file
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read job file: {}", path.display()))?;

        let mut job: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse job file: {}", path.display()))?;
        job.base = path.parent().map(Path::to_path_buf).unwrap_or_default();

        Ok(job)
    }

    /// Parse a job from YAML text, resolving paths against `base`
    pub fn from_yaml(yaml: &str, base: impl AsRef<Path>) -> Result<Self> {
        let mut job: Self = serde_yaml::from_str(yaml).with_context(|| "Failed to parse job YAML")?;
        job.base = base.as_ref().to_path_buf();
        Ok(job)
    }

    pub fn component(&self) -> ComponentId {
        ComponentId::new(self.name.as_deref().unwrap_or(self.transform.kind()))
    }

    pub fn output_path(&self) -> PathBuf {
        self.base.join(&self.output)
    }

    fn source(&self, name: &str) -> Result<&SourceConfig> {
        self.sources
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| eyre!("Source {} is not defined in job {}", name, self.component()))
    }

    fn open(&self, name: &str) -> Result<Processor> {
        self.source(name)?
            .open(&self.base)
            .wrap_err_with(|| format!("Failed to open source {}", name))
    }

    fn engine(&self) -> Result<Box<dyn RelationalEngine>> {
        let engine = match &self.database {
            Some(path) => SqliteEngine::open(self.base.join(path))
                .wrap_err_with(|| format!("Failed to open database {}", path.display()))?,
            None => SqliteEngine::open_in_memory()?,
        };
        Ok(Box::new(engine))
    }

    /// Build the job's output processor without pulling any row
    pub fn processor(&self) -> Result<Processor> {
        let component = self.component();
        let mut processor = match &self.transform {
            TransformConfig::Join(def) => {
                let left = self.open(&def.left)?;
                let right = self.open(&def.right)?;
                let engine = if def.needs_sql() { Some(self.engine()?) } else { None };
                Join::build(component.clone(), def, left, right, engine)?.into_processor(component.as_str())
            }
            TransformConfig::Compare { sources, options } => {
                let factories = sources
                    .iter()
                    .map(|name| -> Result<SourceFactory> {
                        let source = self.source(name)?.clone();
                        let base = self.base.clone();
                        Ok(Box::new(move || source.open(&base)))
                    })
                    .collect::<Result<Vec<_>>>()?;
                DiffEngine::new(component.clone(), options.clone(), factories)?
                    .into_processor(component.as_str())
            }
            TransformConfig::Tree { source, config } => {
                let input = self.open(source)?;
                TreeProcessor::new(component.clone(), config.clone(), input)?
                    .into_processor(component.as_str())
            }
        };
        processor.add_filter(RowFilter::from_config(&self.filters)?);
        processor.set_last_row(self.limit);
        Ok(processor)
    }

    /// Run the job, writing the output file
    ///
    /// `limit` overrides the job's own limit when given.
    pub async fn run(&self, limit: Option<usize>) -> Result<usize> {
        let mut processor = self.processor()?;
        if let Some(limit) = limit {
            processor.set_last_row(limit);
        }
        let output = self.output_path();
        let writer = NdjsonWriter::create(&output)?;
        log::debug!("Writing {} output to {}", self.component(), output.display());

        Pipeline::new(processor, writer).run().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{CompareMode, JoinKind, Reference};
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, lines: &[&str]) {
        std::fs::write(dir.join(name), lines.join("\n")).unwrap();
    }

    #[test]
    fn test_parse_transform_types() {
        let job = JobConfig::from_yaml(
            r#"
sources:
  - name: a
    path: a.ndjson
  - name: b
    path: [b1.ndjson, b2.ndjson]
transform:
  type: compare
  sources: [a, b]
  mode: key
  key_column: 2
  reference: origin
output: diff.ndjson
"#,
            "/data",
        )
        .unwrap();

        match &job.transform {
            TransformConfig::Compare { sources, options } => {
                assert_eq!(sources, &vec!["a".to_string(), "b".to_string()]);
                assert_eq!(options.mode, CompareMode::Key);
                assert_eq!(options.key_column, 2);
                assert_eq!(options.reference, Reference::Origin);
            }
            other => panic!("unexpected transform {:?}", other),
        }
        assert_eq!(job.sources[1].path.paths().len(), 2);
        assert_eq!(job.output_path(), PathBuf::from("/data/diff.ndjson"));
        assert_eq!(job.component().as_str(), "compare");
    }

    #[test]
    fn test_parse_join() {
        let job = JobConfig::from_yaml(
            r#"
name: enrich
sources: []
transform:
  type: join
  left: l
  right: r
  kind: right outer
  keys:
    - left: id
      right: id
output: out.ndjson
"#,
            ".",
        )
        .unwrap();
        let TransformConfig::Join(def) = &job.transform else {
            panic!("expected a join");
        };
        assert_eq!(def.kind, JoinKind::RightOuter);
        assert_eq!(job.component().as_str(), "enrich");
    }

    #[test]
    fn test_unknown_source_is_an_error() {
        let job = JobConfig::from_yaml(
            "sources: []\ntransform:\n  type: tree\n  source: missing\noutput: out.ndjson\n",
            ".",
        )
        .unwrap();
        let err = job.processor().unwrap_err();
        assert!(err.to_string().contains("Source missing is not defined"));
    }

    #[test]
    fn test_tree_job_processor() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "geo.ndjson",
            &[
                r#"{"region": "EU", "country": "FR"}"#,
                r#"{"region": "EU", "country": "DE"}"#,
            ],
        );
        let job = JobConfig::from_yaml(
            r#"
sources:
  - name: geo
    path: geo.ndjson
transform:
  type: tree
  source: geo
  levels:
    - column: region
    - column: country
output: tree.ndjson
filters:
  - column: parent
    operator: equal
    value: EU
"#,
            dir.path(),
        )
        .unwrap();

        let mut p = job.processor().unwrap();
        assert_eq!(p.schema().names(), vec!["parent", "child", "weight"]);
        let children: Vec<String> = p
            .collect_rows()
            .unwrap()
            .iter()
            .map(|r| r.value("child").unwrap().to_string())
            .collect();
        assert_eq!(children, vec!["FR", "DE"]);
    }

    #[test]
    fn test_chained_source_names_tables_by_file() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "jan.ndjson", &[r#"{"id": 1}"#]);
        write(dir.path(), "feb.ndjson", &[r#"{"id": 2}"#]);
        let source = SourceConfig {
            name: "months".to_string(),
            path: SourcePath::Many(vec!["jan.ndjson".into(), "feb.ndjson".into()]),
            filters: Vec::new(),
        };
        let mut p = source.open(dir.path()).unwrap();
        assert_eq!(p.name(), "months");
        p.next().unwrap();
        assert_eq!(p.origin(), "jan");
        p.next().unwrap();
        assert_eq!(p.origin(), "feb");
    }
}
