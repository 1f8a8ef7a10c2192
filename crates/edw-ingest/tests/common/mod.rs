//! Common test utilities for EDW ingest integration tests
//!
//! Each test gets an in-memory SQLite warehouse database, a temporary
//! warehouse root, and one or more "labs": temporary directories holding a
//! manifest plus the files it lists, submitted through `file://` URLs (or
//! served over HTTP by `wiremock`).

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use chrono::Utc;
use edw_common::fingerprint::md5_hex;
use edw_ingest::db::{connect, DbConfig};
use edw_ingest::{SubmitConfig, Submitter, WarehouseStore};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const EMAIL: &str = "lab@example.org";

/// Fixed mtime written into manifests
pub const MODIFIED: i64 = 1_700_000_000;

// ============================================================================
// Warehouse
// ============================================================================

pub struct TestWarehouse {
    pub store: WarehouseStore,
    pub root: TempDir,
    pub user_id: i64,
}

impl TestWarehouse {
    pub async fn start() -> Self {
        let pool = connect(&DbConfig::new("sqlite::memory:"))
            .await
            .expect("Failed to open in-memory database");
        let store = WarehouseStore::new(pool);
        let user = store.create_user(EMAIL, Utc::now()).await.unwrap();
        let root = tempfile::tempdir().unwrap();

        Self {
            store,
            root,
            user_id: user.id,
        }
    }

    pub fn config(&self) -> SubmitConfig {
        SubmitConfig::default()
            .with_database_url("sqlite::memory:")
            .with_warehouse_root(self.root.path())
            .with_max_parallel_fetches(4)
    }

    pub fn submitter(&self) -> Submitter {
        self.submitter_with(self.config())
    }

    pub fn submitter_with(&self, config: SubmitConfig) -> Submitter {
        Submitter::new(self.store.clone(), config).expect("Failed to build submitter")
    }

    /// Files in the content tree, scratch area excluded
    pub fn published(&self) -> Vec<PathBuf> {
        let mut found = Vec::new();
        walk(self.root.path(), &self.root.path().join("tmp"), &mut found);
        found.sort();
        found
    }
}

fn walk(dir: &Path, skip: &Path, found: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries {
        let path = entry.unwrap().path();
        if path == skip {
            continue;
        }
        if path.is_dir() {
            walk(&path, skip, found);
        } else {
            found.push(path);
        }
    }
}

// ============================================================================
// Manifest entries
// ============================================================================

#[derive(Debug, Clone)]
pub struct Entry {
    pub name: String,
    pub content: Vec<u8>,
    pub md5: String,
    /// Size written to the manifest when it should not match the bytes
    pub declared_size: Option<u64>,
    pub experiment: String,
    pub lab: String,
    /// `ucsc_db` value; `None` leaves it to the file's top directory
    pub assembly: Option<String>,
    pub replaces: Option<(String, String)>,
}

impl Entry {
    pub fn new(name: &str, content: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            md5: md5_hex(&content),
            content,
            declared_size: None,
            experiment: "ENCSR000AAA".to_string(),
            lab: "smith".to_string(),
            assembly: Some("hg19".to_string()),
            replaces: None,
        }
    }

    /// Declare a hash that does not match the bytes
    pub fn with_md5(mut self, md5: &str) -> Self {
        self.md5 = md5.to_string();
        self
    }

    pub fn with_declared_size(mut self, size: u64) -> Self {
        self.declared_size = Some(size);
        self
    }

    pub fn with_experiment(mut self, experiment: &str) -> Self {
        self.experiment = experiment.to_string();
        self
    }

    pub fn with_lab(mut self, lab: &str) -> Self {
        self.lab = lab.to_string();
        self
    }

    /// Leave `ucsc_db` out so it is derived from the file name
    pub fn placed_by_directory(mut self) -> Self {
        self.assembly = None;
        self
    }

    pub fn replacing(mut self, plate: &str, reason: &str) -> Self {
        self.replaces = Some((plate.to_string(), reason.to_string()));
        self
    }

    fn format(&self) -> &str {
        if self.name.ends_with(".bed") || self.name.ends_with(".bed.gz") {
            "bed"
        } else {
            "unknown"
        }
    }
}

/// BED text of `lines` records, distinct per `seed`
pub fn bed(seed: u64, lines: usize) -> Vec<u8> {
    let mut out = String::new();
    for i in 0..lines as u64 {
        let start = seed * 100_000 + i * 100;
        out.push_str(&format!("chr1\t{}\t{}\tpeak_{}_{}\n", start, start + 50, seed, i));
    }
    out.into_bytes()
}

pub fn manifest_text(entries: &[Entry]) -> String {
    let with_replaces = entries.iter().any(|e| e.replaces.is_some());
    let with_assembly = entries.iter().any(|e| e.assembly.is_some());

    let mut header = vec![
        "file_name",
        "format",
        "output_type",
        "experiment",
        "replicate",
        "enriched_in",
        "md5_sum",
        "size",
        "modified",
        "lab",
    ];
    if with_assembly {
        header.push("ucsc_db");
    }
    if with_replaces {
        header.extend(["replaces", "replace_reason"]);
    }

    let mut text = format!("#{}\n", header.join("\t"));
    for e in entries {
        let mut fields = vec![
            e.name.clone(),
            e.format().to_string(),
            "peaks".to_string(),
            e.experiment.clone(),
            "1".to_string(),
            "exon".to_string(),
            e.md5.clone(),
            e.declared_size.unwrap_or(e.content.len() as u64).to_string(),
            MODIFIED.to_string(),
            e.lab.clone(),
        ];
        if with_assembly {
            fields.push(e.assembly.clone().unwrap_or_else(|| "n/a".to_string()));
        }
        if with_replaces {
            let (plate, reason) = e
                .replaces
                .clone()
                .unwrap_or_else(|| ("n/a".to_string(), String::new()));
            fields.push(plate);
            fields.push(reason);
        }
        text.push_str(&fields.join("\t"));
        text.push('\n');
    }
    text
}

// ============================================================================
// Labs
// ============================================================================

/// A submitting lab's directory
pub struct Lab {
    pub dir: TempDir,
}

impl Lab {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write the files and a `manifest.txt` listing them; returns the manifest URL.
    pub fn publish(&self, entries: &[Entry]) -> String {
        for e in entries {
            let path = self.path().join(&e.name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(path, &e.content).unwrap();
        }
        self.write_manifest(&manifest_text(entries))
    }

    pub fn write_manifest(&self, text: &str) -> String {
        std::fs::write(self.path().join("manifest.txt"), text).unwrap();
        self.manifest_url()
    }

    pub fn dir_url(&self) -> String {
        format!("file://{}/", self.path().display())
    }

    pub fn manifest_url(&self) -> String {
        format!("{}manifest.txt", self.dir_url())
    }
}
