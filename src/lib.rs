//! coursepack - Course package converter
//!
//! Converts an extracted learning-content package (an `imsmanifest.xml`
//! plus the files it references) into content items a course service can
//! ingest, and materializes those items as folders, uploads, documents and
//! quiz forms in external services.
//!
//! # Architecture
//!
//! Conversion is a pure, lazy pipeline:
//! - The manifest's organization tree is planned into ordered work units
//! - Each unit's resource is classified and turned into one item
//! - HTML is rewritten so local references become attachment placeholders
//! - Assessments are parsed into question definitions
//!
//! Publishing is concurrent and idempotent: every artifact is tagged with a
//! stable hash, looked up before creation, and deduplicated in flight.
//!
//! # Modules
//!
//! - `adapters`: External service contracts and their HTTP implementations
//! - `core`: Conversion logic (paths, manifest, rewrite, assessments)
//! - `domain`: Data structures (package files, content items, questions)
//! - `publish`: Artifact materialization and form image resolution
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # List the items of an extracted package
//! coursepack convert ./course --skip-log
//!
//! # Publish them
//! COURSEPACK_ACCESS_TOKEN=... coursepack publish ./course
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod publish;

// Re-export main types at crate root for convenience
pub use core::{convert_package, convert_package_with, Conversion, ConvertError};
pub use domain::{ContentItem, PackageFile, PackageFiles, SkipLog, WorkType};
pub use publish::{Materializer, PublishedItem, Publisher};
