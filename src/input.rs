use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{GatewayError, Result};
use crate::models::BatchRequest;

/// Batch files under `path`: the file itself, or every `.json` file below a directory
pub fn collect_batch_files(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        return Err(GatewayError::Validation(format!(
            "Input path does not exist: {}",
            path.display()
        )));
    }

    let mut files: Vec<PathBuf> = WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|p| {
            p.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
        })
        .filter(|p| !is_output_file(p))
        .collect();
    files.sort();
    Ok(files)
}

pub fn load_batch(path: &Path) -> Result<BatchRequest> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| {
        GatewayError::Validation(format!("{} is not a valid batch request: {}", path.display(), e))
    })
}

/// `<stem>.normalized.json`, next to the input unless `output_dir` is given
pub fn output_path_for(input: &Path, output_dir: Option<&Path>) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("batch");
    let dir = output_dir
        .map(Path::to_path_buf)
        .or_else(|| input.parent().map(Path::to_path_buf))
        .unwrap_or_default();
    dir.join(format!("{}.normalized.json", stem))
}

// Results written by a previous run are not inputs
fn is_output_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(".normalized.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    const BATCH: &str = r#"{
        "tenant_id": "t1",
        "items": [
            {"record_id": "r1", "type": "email_subject", "text": "Hola mundo"},
            {"record_id": "r2", "type": "call_note", "text": "Bonjour", "source_lang": "fr"}
        ]
    }"#;

    #[test]
    fn single_file_is_its_own_batch() {
        let temp = assert_fs::TempDir::new().unwrap();
        let file = temp.child("one.json");
        file.write_str(BATCH).unwrap();

        let files = collect_batch_files(file.path()).unwrap();
        assert_eq!(files, vec![file.path().to_path_buf()]);

        let batch = load_batch(file.path()).unwrap();
        assert_eq!(batch.tenant_id, "t1");
        assert_eq!(batch.target_lang, "en");
        assert_eq!(batch.items.len(), 2);
        assert_eq!(batch.items[1].source_lang.as_deref(), Some("fr"));
    }

    #[test]
    fn directory_walk_finds_json_and_skips_outputs() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("b.json").write_str(BATCH).unwrap();
        temp.child("nested/a.json").write_str(BATCH).unwrap();
        temp.child("b.normalized.json").write_str("{}").unwrap();
        temp.child("notes.txt").write_str("ignored").unwrap();

        let files = collect_batch_files(temp.path()).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.strip_prefix(temp.path()).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(names, vec!["b.json", "nested/a.json"]);
    }

    #[test]
    fn missing_path_is_rejected() {
        let temp = assert_fs::TempDir::new().unwrap();
        assert!(collect_batch_files(&temp.path().join("missing")).is_err());
    }

    #[test]
    fn malformed_batch_is_a_validation_error() {
        let temp = assert_fs::TempDir::new().unwrap();
        let file = temp.child("bad.json");
        file.write_str(r#"{"tenant_id": "t1"}"#).unwrap();
        assert!(matches!(load_batch(file.path()), Err(GatewayError::Validation(_))));
    }

    #[test]
    fn output_lands_next_to_input_by_default() {
        let input = Path::new("/data/batches/monday.json");
        assert_eq!(
            output_path_for(input, None),
            PathBuf::from("/data/batches/monday.normalized.json")
        );
        assert_eq!(
            output_path_for(input, Some(Path::new("/out"))),
            PathBuf::from("/out/monday.normalized.json")
        );
    }
}
