//! Package conversion entry point.
//!
//! [`convert_package`] validates the package, parses the manifest and plans
//! the traversal up front. Items are then produced lazily, one work unit at
//! a time, by iterating the returned [`Conversion`]. Per-node problems end up
//! in the skip log; only a missing or unreadable manifest fails the run.

use std::vec;

use thiserror::Error;
use tracing::{info, instrument};

use super::classify::WalkContext;
use super::manifest::{Manifest, ManifestError, WorkUnit};
use crate::config::ConversionSettings;
use crate::domain::{ContentItem, PackageFile, PackageFiles, SkipLog};

/// Run-level conversion failures
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("Package has no imsmanifest.xml")]
    MissingManifest,

    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

/// A planned conversion; yields content items in manifest order
#[derive(Debug)]
pub struct Conversion {
    files: PackageFiles,
    manifest: Manifest,
    settings: ConversionSettings,
    plan: vec::IntoIter<WorkUnit>,
    skip_log: SkipLog,
}

/// Convert a package with default settings
pub fn convert_package(files: Vec<PackageFile>) -> Result<Conversion, ConvertError> {
    convert_package_with(files, &ConversionSettings::default())
}

/// Convert a package, dropping files matched by the ignore patterns first
#[instrument(skip(files, settings), fields(files = files.len()))]
pub fn convert_package_with(
    files: Vec<PackageFile>,
    settings: &ConversionSettings,
) -> Result<Conversion, ConvertError> {
    let files = PackageFiles::new(files.into_iter().filter(|f| !settings.is_ignored(&f.name)));

    let manifest_file = files.manifest().ok_or(ConvertError::MissingManifest)?;
    let manifest = Manifest::parse(&manifest_file.name, &manifest_file.text())?;
    let plan = manifest.work_plan(settings.max_topic_len);

    info!(
        title = manifest.title.as_deref().unwrap_or("-"),
        resources = manifest.resources().len(),
        units = plan.len(),
        "Planned package conversion"
    );

    Ok(Conversion {
        files,
        manifest,
        settings: settings.clone(),
        plan: plan.into_iter(),
        skip_log: SkipLog::new(),
    })
}

impl Conversion {
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn files(&self) -> &PackageFiles {
        &self.files
    }

    /// Nodes skipped so far
    pub fn skip_log(&self) -> &SkipLog {
        &self.skip_log
    }

    /// Drain the remaining items and hand back the complete skip log
    pub fn finish(mut self) -> (Vec<ContentItem>, SkipLog) {
        let items: Vec<ContentItem> = self.by_ref().collect();
        info!(
            items = items.len(),
            skipped = self.skip_log.len(),
            "Package conversion finished"
        );
        (items, self.skip_log)
    }
}

impl Iterator for Conversion {
    type Item = ContentItem;

    fn next(&mut self) -> Option<ContentItem> {
        let mut ctx = WalkContext::new(
            &self.files,
            &self.manifest,
            &self.settings,
            &mut self.skip_log,
        );
        for unit in self.plan.by_ref() {
            if let Some(item) = ctx.classify(&unit) {
                return Some(item);
            }
        }
        None
    }
}
