//! Command-line interface for coursepack.
//!
//! Provides commands for converting an extracted course package, inspecting
//! its manifest, publishing converted items and showing the configuration.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use crate::config::{config, ResolvedConfig};
use crate::core::manifest::ManifestNode;
use crate::core::{convert_package_with, WorkTarget};
use crate::domain::{ContentItem, PackageFile, SkipEntry};
use crate::publish::{PublishedItem, Publisher};

/// coursepack - Course package converter
#[derive(Parser, Debug)]
#[command(name = "coursepack")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Convert an extracted package and list the resulting items
    Convert {
        /// Directory the package was extracted into
        dir: PathBuf,

        /// Print items as JSON instead of a table
        #[arg(long)]
        json: bool,

        /// Also print the skip log
        #[arg(long)]
        skip_log: bool,
    },

    /// Show the manifest organization and the traversal plan
    Manifest {
        /// Directory the package was extracted into
        dir: PathBuf,
    },

    /// Convert a package and publish its items to the configured services
    Publish {
        /// Directory the package was extracted into
        dir: PathBuf,

        /// Override the root storage folder
        #[arg(long)]
        folder: Option<String>,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Convert {
                dir,
                json,
                skip_log,
            } => convert(&dir, json, skip_log),
            Commands::Manifest { dir } => show_manifest(&dir),
            Commands::Publish { dir, folder } => publish(&dir, folder).await,
            Commands::Config => show_config(),
        }
    }
}

/// Read every file below `dir` into package files named by their
/// `/`-separated path relative to `dir`
pub fn load_package(dir: &Path) -> Result<Vec<PackageFile>> {
    if !dir.is_dir() {
        anyhow::bail!("Package directory not found: {}", dir.display());
    }

    let root = dir
        .to_str()
        .with_context(|| format!("Package path is not valid UTF-8: {}", dir.display()))?;
    let pattern = Path::new(&glob::Pattern::escape(root)).join("**").join("*");
    let pattern = pattern.to_string_lossy();

    let mut files = Vec::new();
    for entry in glob::glob(&pattern).context("Invalid package glob pattern")? {
        let path = entry.context("Failed to read package directory entry")?;
        if !path.is_file() {
            continue;
        }

        let relative = path
            .strip_prefix(dir)
            .with_context(|| format!("File outside package: {}", path.display()))?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let data = std::fs::read(&path)
            .with_context(|| format!("Failed to read package file: {}", path.display()))?;
        files.push(PackageFile::new(name, data));
    }

    tracing::debug!(dir = %dir.display(), files = files.len(), "Loaded package");
    Ok(files)
}

/// Convert a package directory with the configured settings
fn convert_dir(dir: &Path, cfg: &ResolvedConfig) -> Result<(Vec<ContentItem>, Vec<SkipEntry>)> {
    let files = load_package(dir)?;
    let conversion = convert_package_with(files, &cfg.conversion)
        .with_context(|| format!("Failed to convert package: {}", dir.display()))?;
    let (items, skip_log) = conversion.finish();
    Ok((items, skip_log.entries().to_vec()))
}

#[derive(Serialize)]
struct ConvertReport<'a> {
    items: &'a [ContentItem],
    #[serde(skip_serializing_if = "Option::is_none")]
    skipped: Option<&'a [SkipEntry]>,
}

fn convert(dir: &Path, json: bool, show_skips: bool) -> Result<()> {
    let cfg = config()?;
    let (items, skipped) = convert_dir(dir, cfg)?;

    if json {
        let report = ConvertReport {
            items: &items,
            skipped: show_skips.then_some(skipped.as_slice()),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if items.is_empty() {
        println!("No items produced");
    } else {
        println!(
            "{:<24} {:<16} {:<30} {:>6} {:>6}",
            "TOPIC", "TYPE", "TITLE", "FILES", "QS"
        );
        println!("{}", "-".repeat(86));
        for item in &items {
            println!(
                "{:<24} {:<16} {:<30} {:>6} {:>6}",
                truncate(item.topic.as_deref().unwrap_or("-"), 24),
                item.work_type.to_string(),
                truncate(&item.title, 30),
                item.attachments.len(),
                item.question_count()
            );
            if let Some(ref error) = item.processing_error {
                println!("  ! {} ({})", error.message, error.stage);
            }
        }
    }

    if show_skips && !skipped.is_empty() {
        println!("\nSkipped:");
        for entry in &skipped {
            println!(
                "  {:<20} {:<30} {}",
                entry.id.as_deref().unwrap_or("-"),
                truncate(&entry.title, 30),
                entry.reason
            );
        }
    }

    eprintln!("\n[{} items, {} skipped]", items.len(), skipped.len());
    Ok(())
}

fn show_manifest(dir: &Path) -> Result<()> {
    let cfg = config()?;
    let files = load_package(dir)?;
    let conversion = convert_package_with(files, &cfg.conversion)
        .with_context(|| format!("Failed to read manifest in {}", dir.display()))?;
    let manifest = conversion.manifest();

    println!("Title: {}", manifest.title.as_deref().unwrap_or("(untitled)"));
    println!("Resources: {}", manifest.resources().len());

    println!("\nOrganization:");
    if manifest.organization().is_empty() {
        println!("  (none, using the resource list)");
    }
    for node in manifest.organization() {
        print_node(node, 1);
    }

    println!("\nPlan:");
    for unit in manifest.work_plan(cfg.conversion.max_topic_len) {
        let target = match unit.target {
            WorkTarget::Resource(ref id) => id.as_str(),
            WorkTarget::Empty => "(empty)",
        };
        println!(
            "  {:<24} {:<30} {}",
            truncate(unit.topic.as_deref().unwrap_or("-"), 24),
            truncate(&unit.title, 30),
            target
        );
    }

    Ok(())
}

fn print_node(node: &ManifestNode, depth: usize) {
    let indent = "  ".repeat(depth);
    match node.resource_ref {
        Some(ref resource) => println!("{}- {} -> {}", indent, node.title, resource),
        None => println!("{}+ {}", indent, node.title),
    }
    for child in &node.children {
        print_node(child, depth + 1);
    }
}

#[derive(Serialize)]
struct PublishReport<'a> {
    package: String,
    published_at: chrono::DateTime<chrono::Utc>,
    items: &'a [PublishedItem],
    skipped: &'a [SkipEntry],
}

async fn publish(dir: &Path, folder: Option<String>) -> Result<()> {
    let mut cfg = config()?.clone();
    if let Some(folder) = folder {
        cfg.publish.root_folder_id = folder;
    }

    let (items, skipped) = convert_dir(dir, &cfg)?;
    let publisher = Publisher::from_config(&cfg).context("Failed to set up service clients")?;

    let total = items.len();
    let published = publisher.publish_all(items).await;

    println!("{:<30} {:<8} {:<8} {:<8} {}", "TITLE", "FILES", "DOC", "FORM", "ERROR");
    println!("{}", "-".repeat(80));
    for result in &published {
        println!(
            "{:<30} {:<8} {:<8} {:<8} {}",
            truncate(&result.item.title, 30),
            result.uploads.len(),
            if result.document.is_some() { "yes" } else { "-" },
            if result.form.is_some() { "yes" } else { "-" },
            result
                .processing_error
                .as_ref()
                .map(|e| format!("{}: {}", e.stage, e.message))
                .unwrap_or_default()
        );
    }

    let report = PublishReport {
        package: dir.display().to_string(),
        published_at: chrono::Utc::now(),
        items: &published,
        skipped: &skipped,
    };
    let report_path = write_report(&cfg, &report)?;

    let failed = published.iter().filter(|p| p.processing_error.is_some()).count();
    eprintln!(
        "\n[{} items published, {} with errors, {} skipped; report: {}]",
        total - failed,
        failed,
        skipped.len(),
        report_path.display()
    );
    Ok(())
}

/// Write a publish report under `<home>/reports`
fn write_report(cfg: &ResolvedConfig, report: &PublishReport<'_>) -> Result<PathBuf> {
    let dir = cfg.home.join("reports");
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create report directory: {}", dir.display()))?;

    let path = dir.join(format!(
        "publish-{}.json",
        report.published_at.format("%Y%m%dT%H%M%SZ")
    ));
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(&path, json)
        .with_context(|| format!("Failed to write report: {}", path.display()))?;
    Ok(path)
}

fn show_config() -> Result<()> {
    let cfg = config()?;

    println!("Resolved configuration:");
    println!("  Home: {}", cfg.home.display());
    println!(
        "  Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none)".to_string())
    );

    println!("\nConversion:");
    println!("  max_topic_len: {}", cfg.conversion.max_topic_len);
    println!("  max_summary_len: {}", cfg.conversion.max_summary_len);
    println!("  ignore_patterns: {}", cfg.conversion.ignore_patterns.join(", "));

    println!("\nPublish:");
    println!("  root_folder_id: {}", cfg.publish.root_folder_id);
    println!("  concurrency: {}", cfg.publish.concurrency);
    println!("  http_timeout_seconds: {}", cfg.publish.http_timeout_seconds);
    println!("  retry.max_attempts: {}", cfg.publish.retry.max_attempts);
    println!("  create_documents: {}", cfg.publish.create_documents);

    println!("\nServices:");
    println!("  storage_url: {}", cfg.services.storage_url);
    println!("  upload_url: {}", cfg.services.upload_url);
    println!("  forms_url: {}", cfg.services.forms_url);
    println!("  script_url: {}", cfg.services.script_url);
    println!(
        "  script_id: {}",
        cfg.services.script_id.as_deref().unwrap_or("(not set)")
    );
    println!(
        "  access_token: {}",
        if cfg.services.access_token.is_some() {
            "(set)"
        } else {
            "(not set)"
        }
    );

    Ok(())
}

/// Truncate a string for table display
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_package_uses_relative_names() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("web_resources").join("img");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(temp.path().join("imsmanifest.xml"), "<manifest/>").unwrap();
        std::fs::write(nested.join("a.png"), [1u8, 2, 3]).unwrap();

        let mut files = load_package(temp.path()).unwrap();
        files.sort_by(|a, b| a.name.cmp(&b.name));

        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["imsmanifest.xml", "web_resources/img/a.png"]);
        assert_eq!(files[1].data, vec![1, 2, 3]);
    }

    #[test]
    fn test_load_package_dir_with_glob_characters() {
        let temp = TempDir::new().unwrap();
        let course = temp.path().join("Course [2024] *final*");
        std::fs::create_dir_all(&course).unwrap();
        std::fs::write(course.join("imsmanifest.xml"), "<manifest/>").unwrap();

        let files = load_package(&course).unwrap();

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "imsmanifest.xml");
    }

    #[test]
    fn test_load_package_missing_dir() {
        assert!(load_package(Path::new("/nonexistent/package")).is_err());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a much longer title", 10), "a much ...");
    }
}
