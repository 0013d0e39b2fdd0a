//! JSONL I/O primitives.
//!
//! Appends are atomic per record (open-append, write one line, flush,
//! sync); the rewritable files go through write-to-temp-then-rename for
//! crash safety. Reads tolerate blank lines and skip individual
//! un-parseable lines with a warning.

use std::io::Write;
use std::path::Path;

use serde_json::Value;

use sc_domain::error::Result;

/// Read all records from a JSONL file. A missing file reads as empty.
pub fn read_jsonl(path: &Path) -> Result<Vec<Value>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(path)?;
    let mut records = Vec::new();
    for (lineno, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(value) => records.push(value),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    line = lineno + 1,
                    error = %e,
                    "skipping corrupt JSONL line"
                );
            }
        }
    }
    Ok(records)
}

/// Append records, one JSON object per line.
pub fn append_jsonl(path: &Path, records: &[Value]) -> Result<()> {
    if records.is_empty() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    for record in records {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        file.write_all(line.as_bytes())?;
    }
    file.flush()?;
    file.sync_data()?;
    Ok(())
}

/// Overwrite a JSONL file via a temp file and atomic rename.
pub fn write_jsonl_atomic(path: &Path, records: &[Value]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut buf = String::new();
    for record in records {
        buf.push_str(&serde_json::to_string(record)?);
        buf.push('\n');
    }
    let tmp = path.with_extension("jsonl.tmp");
    std::fs::write(&tmp, buf)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn corrupt_and_blank_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        std::fs::write(
            &path,
            "{\"ok\": 1}\n\nnot json\n{\"ok\": 2}\n   \n{broken\n",
        )
        .unwrap();

        let records = read_jsonl(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["ok"], 1);
        assert_eq!(records[1]["ok"], 2);
    }

    #[test]
    fn append_then_rewrite_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");

        append_jsonl(&path, &[json!({"n": 1})]).unwrap();
        append_jsonl(&path, &[json!({"n": 2}), json!({"n": 3})]).unwrap();
        assert_eq!(read_jsonl(&path).unwrap().len(), 3);

        write_jsonl_atomic(&path, &[json!({"n": 9})]).unwrap();
        let records = read_jsonl(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["n"], 9);
    }

    #[test]
    fn missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_jsonl(&dir.path().join("absent.jsonl")).unwrap().is_empty());
    }
}
