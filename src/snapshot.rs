use anyhow::{anyhow, Context};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::config::CONFIG_FILE;

const MANIFEST_ENTRY: &str = "manifest.json";
const RUN_ENTRY: &str = "run/last_run.json";
const CONFIG_ENTRY: &str = "config/rosterd.json";
pub const BUNDLE_FORMAT_V1: &str = "rosterd-run-v1";

pub const LAST_RUN_FILE: &str = "last_run.json";

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
}

/// Persist the latest build result for audit; overwritten each run.
pub fn write_last_run(workspace: &Path, run: &serde_json::Value) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(workspace)?;
    let path = workspace.join(LAST_RUN_FILE);
    let text = serde_json::to_string_pretty(run).context("failed to serialize run snapshot")?;
    std::fs::write(&path, text)
        .with_context(|| format!("failed to write {}", path.to_string_lossy()))?;
    Ok(path)
}

/// Zip the last run snapshot (plus the workspace config when present) with a
/// checksummed manifest.
pub fn export_run_bundle(workspace: &Path, out_path: &Path) -> anyhow::Result<ExportSummary> {
    let run_path = workspace.join(LAST_RUN_FILE);
    if !run_path.is_file() {
        return Err(anyhow!(
            "no run snapshot found: {}",
            run_path.to_string_lossy()
        ));
    }
    let run_bytes = std::fs::read(&run_path)
        .with_context(|| format!("failed to read {}", run_path.to_string_lossy()))?;

    let config_path = workspace.join(CONFIG_FILE);
    let config_bytes = if config_path.is_file() {
        Some(std::fs::read(&config_path).with_context(|| {
            format!("failed to read {}", config_path.to_string_lossy())
        })?)
    } else {
        None
    };

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let exported_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let mut checksums = json!({ RUN_ENTRY: sha256_hex(&run_bytes) });
    if let Some(cfg) = &config_bytes {
        checksums[CONFIG_ENTRY] = json!(sha256_hex(cfg));
    }
    let manifest = json!({
        "format": BUNDLE_FORMAT_V1,
        "version": 1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": exported_at,
        "sourceWorkspace": workspace.to_string_lossy(),
        "checksums": checksums,
    });

    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    zip.start_file(RUN_ENTRY, opts)
        .context("failed to start run snapshot entry")?;
    zip.write_all(&run_bytes)
        .context("failed to write run snapshot entry")?;

    let mut entry_count = 2;
    if let Some(cfg) = &config_bytes {
        zip.start_file(CONFIG_ENTRY, opts)
            .context("failed to start config entry")?;
        zip.write_all(cfg).context("failed to write config entry")?;
        entry_count += 1;
    }

    zip.finish().context("failed to finalize zip bundle")?;

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT_V1.to_string(),
        entry_count,
    })
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        out.push_str(&format!("{:02x}", b));
    }
    out
}
