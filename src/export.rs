//! Saving downloaded exports to disk.

use std::path::{Path, PathBuf};

use miette::Diagnostic;
use thiserror::Error;

use crate::client::Download;

#[derive(Debug, Error, Diagnostic)]
pub enum ExportError {
    #[error("failed to create export directory: {path}")]
    #[diagnostic(
        code(crosswalk::export::create_dir),
        help("Set `export_dir` in the config or pass --out with a writable directory.")
    )]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write export: {path}")]
    #[diagnostic(
        code(crosswalk::export::write),
        help("Check free space and write permissions in the export directory.")
    )]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type ExportResult<T> = std::result::Result<T, ExportError>;

/// Reduce a server-suggested name to a bare file name.
///
/// Path separators and anything before them are dropped, control characters
/// are removed, and names that end up empty or dot-only become `fallback`.
pub fn sanitize_filename(name: &str, fallback: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| if matches!(c, ':' | '*' | '?' | '"' | '<' | '>' | '|') { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        fallback.to_string()
    } else {
        cleaned.to_string()
    }
}

/// Write `download` into `dir`, creating it when missing. Returns the file path.
pub fn save_download(dir: &Path, download: &Download) -> ExportResult<PathBuf> {
    std::fs::create_dir_all(dir).map_err(|e| ExportError::CreateDir {
        path: dir.display().to_string(),
        source: e,
    })?;
    let name = sanitize_filename(&download.filename, &fallback_name(download.content_type.as_deref()));
    let path = dir.join(name);
    std::fs::write(&path, &download.bytes).map_err(|e| ExportError::Write {
        path: path.display().to_string(),
        source: e,
    })?;
    tracing::info!(
        path = %path.display(),
        bytes = download.bytes.len(),
        content_type = download.content_type.as_deref().unwrap_or("unknown"),
        "export saved"
    );
    Ok(path)
}

/// File name for a download the server did not name usefully.
fn fallback_name(content_type: Option<&str>) -> String {
    let mime = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase())
        .unwrap_or_default();
    let ext = match mime.as_str() {
        "text/csv" => "csv",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => "xlsx",
        _ => "export",
    };
    format!("relationships.{ext}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filenames_never_escape_the_directory() {
        assert_eq!(sanitize_filename("relationships_1.csv", "x"), "relationships_1.csv");
        assert_eq!(sanitize_filename("../../etc/passwd", "x"), "passwd");
        assert_eq!(sanitize_filename("C:\\temp\\a.xlsx", "x"), "a.xlsx");
        assert_eq!(sanitize_filename("..", "x"), "x");
        assert_eq!(sanitize_filename("", "x"), "x");
        assert_eq!(sanitize_filename("a\nb?.csv", "x"), "ab_.csv");
    }

    #[test]
    fn save_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("exports").join("today");
        let download = Download {
            filename: "relationships_20240101_120000.csv".into(),
            content_type: Some("text/csv".into()),
            bytes: b"source_element_identifier\n".to_vec(),
        };
        let path = save_download(&dir, &download).unwrap();
        assert_eq!(path, dir.join("relationships_20240101_120000.csv"));
        assert_eq!(std::fs::read(&path).unwrap(), download.bytes);
    }

    #[test]
    fn unnamed_download_is_named_after_its_content_type() {
        let tmp = tempfile::tempdir().unwrap();
        let download = Download {
            filename: "..".into(),
            content_type: Some("text/csv; charset=utf-8".into()),
            bytes: b"x\n".to_vec(),
        };
        let path = save_download(tmp.path(), &download).unwrap();
        assert_eq!(path, tmp.path().join("relationships.csv"));

        let opaque = Download {
            content_type: None,
            ..download
        };
        let path = save_download(tmp.path(), &opaque).unwrap();
        assert_eq!(path, tmp.path().join("relationships.export"));
    }
}
