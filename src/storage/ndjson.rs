//! NDJSON (Newline Delimited JSON) file operations

use crate::error::{EtlError, Result as EtlResult};
use crate::etl::{Loader, Processor, Row, RowSource, Value};

use eyre::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

/// Stream rows from an NDJSON file
///
/// The first object defines the schema, in key order. Later objects are
/// mapped onto it by key; keys the schema lacks are dropped and missing
/// keys read as null. Blank lines are skipped.
pub struct NdjsonSource {
    path: PathBuf,
    lines: Option<Lines<BufReader<File>>>,
    line_number: usize,
    schema: Row,
    first: Option<Row>,
}

impl NdjsonSource {
    /// Open `path` and read the first object
    ///
    /// # Errors
    /// Fails when the file can't be opened or its first object can't be parsed
    pub fn open(path: impl AsRef<Path>) -> EtlResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let mut source = Self {
            path,
            lines: Some(BufReader::new(file).lines()),
            line_number: 0,
            schema: Row::new(),
            first: None,
        };
        if let Some(object) = source.read_object()? {
            let row = Row::from_pairs(object.iter().map(|(k, v)| (k.clone(), Value::from_json(v))));
            source.schema = row.blank();
            source.first = Some(row);
        }
        Ok(source)
    }

    /// Processor over the file
    pub fn processor(name: impl Into<String>, path: impl AsRef<Path>) -> EtlResult<Processor> {
        Ok(Processor::new(name, Self::open(path)?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_object(&mut self) -> EtlResult<Option<serde_json::Map<String, serde_json::Value>>> {
        let Some(lines) = self.lines.as_mut() else {
            return Ok(None);
        };
        for line in lines {
            let line = line?;
            self.line_number += 1;
            if line.trim().is_empty() {
                continue;
            }
            return match serde_json::from_str(&line)? {
                serde_json::Value::Object(object) => Ok(Some(object)),
                _ => Err(EtlError::config(
                    self.path.display().to_string(),
                    format!("line {} is not a JSON object", self.line_number),
                )),
            };
        }
        Ok(None)
    }
}

impl RowSource for NdjsonSource {
    fn schema(&self) -> &Row {
        &self.schema
    }

    fn fetch(&mut self) -> EtlResult<Option<Row>> {
        if let Some(first) = self.first.take() {
            return Ok(Some(first));
        }
        let Some(object) = self.read_object()? else {
            return Ok(None);
        };
        let mut row = self.schema.clone();
        for (key, value) in &object {
            row.set_value(key, Value::from_json(value));
        }
        Ok(Some(row))
    }

    fn release(&mut self) {
        self.lines = None;
        self.first = None;
    }
}

/// Write rows to an NDJSON file, one JSON object per line
pub struct NdjsonWriter {
    path: PathBuf,
}

impl NdjsonWriter {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Writer over a new, empty file at `path`
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let writer = Self::new(path);
        if let Some(parent) = writer.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        std::fs::write(&writer.path, "")
            .with_context(|| format!("Failed to create NDJSON file: {}", writer.path.display()))?;
        Ok(writer)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append rows to the NDJSON file
    pub fn append(&self, rows: &[Row]) -> Result<()> {
        use std::io::Write;

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open NDJSON file: {}", self.path.display()))?;

        for row in rows {
            writeln!(file, "{}", serde_json::to_string(&row.to_json())?)?;
        }

        Ok(())
    }
}

// Implement Loader trait for writing NDJSON files

impl Loader for NdjsonWriter {
    async fn load(&self, rows: Vec<Row>) -> Result<usize> {
        self.append(&rows)?;
        Ok(rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;
    use tempfile::NamedTempFile;

    #[test]
    fn test_read_write() {
        let temp = NamedTempFile::new().unwrap();
        let writer = NdjsonWriter::create(temp.path()).unwrap();

        writer
            .append(&[row! {"b" => 1, "a" => "x"}, row! {"b" => 2, "a" => "y"}])
            .unwrap();

        let mut p = NdjsonSource::processor("data", temp.path()).unwrap();
        assert_eq!(p.schema().names(), vec!["b", "a"]);
        let rows = p.collect_rows().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].value("a"), Some(&Value::from("y")));
    }

    #[test]
    fn test_later_objects_mapped_onto_schema() {
        let temp = NamedTempFile::new().unwrap();
        std::fs::write(
            temp.path(),
            "{\"id\": 1, \"name\": \"a\"}\n\n{\"name\": \"b\", \"extra\": true}\n",
        )
        .unwrap();

        let mut p = NdjsonSource::processor("data", temp.path()).unwrap();
        let rows = p.collect_rows().unwrap();
        assert_eq!(rows[1].names(), vec!["id", "name"]);
        assert!(rows[1].value("id").unwrap().is_null());
        assert_eq!(rows[1].value("name"), Some(&Value::from("b")));
    }

    #[test]
    fn test_empty_file() {
        let temp = NamedTempFile::new().unwrap();
        let mut p = NdjsonSource::processor("data", temp.path()).unwrap();
        assert!(p.schema().is_empty());
        assert!(p.next().unwrap().is_none());
    }

    #[test]
    fn test_non_object_line_fails() {
        let temp = NamedTempFile::new().unwrap();
        std::fs::write(temp.path(), "[1, 2]\n").unwrap();
        assert!(NdjsonSource::open(temp.path()).is_err());
    }

    #[tokio::test]
    async fn test_loader_appends_batches() {
        let temp = NamedTempFile::new().unwrap();
        let writer = NdjsonWriter::create(temp.path()).unwrap();
        writer.load(vec![row! {"a" => 1}]).await.unwrap();
        writer.load(vec![row! {"a" => 2}]).await.unwrap();

        let content = std::fs::read_to_string(temp.path()).unwrap();
        assert_eq!(content, "{\"a\":1}\n{\"a\":2}\n");
    }
}
