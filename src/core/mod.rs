//! Package conversion.
//!
//! This module contains:
//! - Paths: reference classification and package path resolution
//! - Manifest: manifest parsing and traversal planning
//! - Rewrite: HTML rewriting into placeholders and summaries
//! - Qti: assessment parsing into question definitions
//! - Classify: resource classification into content items
//! - Pipeline: the lazy conversion entry point

pub mod classify;
pub mod manifest;
pub mod paths;
pub mod pipeline;
pub mod qti;
pub mod rewrite;
pub mod xml;

// Re-export commonly used types
pub use classify::{ResourceKind, WalkContext};
pub use manifest::{Manifest, ManifestError, ManifestNode, ResourceDescriptor, WorkTarget, WorkUnit};
pub use pipeline::{convert_package, convert_package_with, Conversion, ConvertError};
pub use qti::{parse_assessment, ParsedAssessment, QtiError};
pub use rewrite::{rewrite_html, RewriteResult};
