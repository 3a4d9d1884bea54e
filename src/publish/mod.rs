//! Artifact publishing in external services.
//!
//! This module contains:
//! - Materializer: idempotent find-or-create with in-flight deduplication
//! - Images: placeholder-based image URL resolution for forms
//! - Quiz: question definitions to form items
//! - Orchestrator: per-item publishing with ordered concurrency

pub mod images;
pub mod materializer;
pub mod orchestrator;
pub mod quiz;

pub use images::{is_secure_image_uri, resolve_images, DroppedImage, ImageRequest, ImageResolution};
pub use materializer::{stable_hash, ArtifactCache, Materialized, Materializer, HASH_PROPERTY};
pub use orchestrator::{PublishedDocument, PublishedItem, Publisher, UploadedFile};
pub use quiz::{form_items, publish_quiz, FormItem, FormQuestion, Grading, QuizOutcome};
