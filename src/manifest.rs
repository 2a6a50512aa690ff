//! CONL manifest of a finished batch

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::pipeline::Summary;

#[derive(Debug, Serialize)]
struct Manifest<'a> {
    generated_at: String,
    output: String,
    rows: usize,
    references: usize,
    downloaded: usize,
    skipped: usize,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    assets: BTreeMap<&'a str, &'a str>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    failed: BTreeMap<&'a str, &'a str>,
}

pub fn render_manifest(summary: &Summary) -> Result<String> {
    let manifest = Manifest {
        generated_at: chrono::Local::now().to_rfc3339(),
        output: summary.output.display().to_string(),
        rows: summary.rows,
        references: summary.references,
        downloaded: summary.downloaded,
        skipped: summary.skipped,
        assets: summary
            .assets
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect(),
        failed: summary
            .failed
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect(),
    };
    Ok(serde_conl::to_string(&manifest)?)
}

pub fn write_manifest(summary: &Summary, path: &Path) -> Result<()> {
    let conl = render_manifest(summary)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, conl).with_context(|| format!("Failed to write manifest: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_render_manifest() {
        let mut summary = Summary {
            output: PathBuf::from("output.csv"),
            rows: 2,
            references: 2,
            downloaded: 1,
            ..Default::default()
        };
        summary
            .assets
            .insert("/a.jpg".to_string(), "/u/0a1b2c3d-a.jpg".to_string());
        summary
            .failed
            .insert("/b.png".to_string(), "Failed to download image: 404 Not Found".to_string());

        let conl = render_manifest(&summary).unwrap();
        assert!(conl.contains("generated_at = "));
        assert!(conl.contains("downloaded = 1"));
        assert!(conl.contains("/u/0a1b2c3d-a.jpg"));
        assert!(conl.contains("404 Not Found"));
    }

    #[test]
    fn test_empty_sections_omitted() {
        let conl = render_manifest(&Summary::default()).unwrap();
        assert!(!conl.contains("assets"));
        assert!(!conl.contains("failed"));
    }
}
