//! Domain types for the course-package converter.
//!
//! This module contains the core data structures:
//! - Package: files of the extracted package and the normalized lookup map
//! - Content: the pipeline's output unit and its attachments
//! - Question: the intermediate assessment model
//! - Skip: the audit record of nodes that produced no item

pub mod content;
pub mod package;
pub mod question;
pub mod skip;

// Re-export commonly used types
pub use content::{ContentItem, ItemState, PendingUpload, ProcessingError, Stage, WorkType};
pub use package::{normalize_key, PackageFile, PackageFiles};
pub use question::{Choice, Question, QuestionDef, QuestionType};
pub use skip::{SkipEntry, SkipLog};
