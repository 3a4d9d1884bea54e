//! Form Image Protocol Integration Tests
//!
//! Quiz publishing with question images: placeholder insertion, read-back,
//! URI validation with fallback, and placeholder cleanup.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{FakeDocuments, FakeForms, FakeStorage};
use coursepack::domain::{
    Choice, ContentItem, PackageFile, PendingUpload, Question, QuestionDef, QuestionType, WorkType,
};
use coursepack::publish::{publish_quiz, FormItem, Materializer};

fn quiz_item() -> ContentItem {
    let image = Arc::new(PackageFile::new("quiz/cell.png", vec![0x89, 0x50, 0x4E, 0x47]));

    let mut first = Question::new("Which organelle is shown?", QuestionType::SingleChoice);
    first.choices = vec![Choice::new("a", "Nucleus"), Choice::new("b", "Mitochondrion")];
    first.correct_answers = vec!["Mitochondrion".to_string()];
    first.required = true;
    first.image = Some(PendingUpload::from_file(image));

    let second = Question::new("Describe its function.", QuestionType::Paragraph);

    let mut item = ContentItem::new("quiz-1", "Cell quiz", WorkType::Assignment);
    item.assessment_questions = Some(vec![
        QuestionDef::Question(first),
        QuestionDef::Question(second),
    ]);
    item
}

fn image_of(item: &FormItem) -> Option<&str> {
    match item {
        FormItem::Question { image_uri, .. } => image_uri.as_deref(),
        FormItem::Image { image_uri, .. } => Some(image_uri),
        FormItem::PageBreak { .. } => None,
    }
}

#[tokio::test]
async fn test_insecure_processed_uri_falls_back_to_source() {
    let storage = Arc::new(FakeStorage {
        thumbnail_template: Some("https://lh3.googleusercontent.com/{id}=s220".to_string()),
        ..Default::default()
    });
    let forms = Arc::new(FakeForms::with_processed_uri("http://insecure.example.com/img"));
    let materializer = Materializer::new(
        storage.clone(),
        Arc::new(FakeDocuments::default()),
        forms.clone(),
    );

    let outcome = publish_quiz(&materializer, &quiz_item(), "folder-1").await.unwrap();

    assert!(outcome.created);
    assert_eq!(outcome.item_count, 2);
    assert!(outcome.removed_images.is_empty());

    // The placeholder was removed; only the real questions remain
    let live = forms.live_items();
    assert_eq!(live.len(), 2);
    assert!(live
        .iter()
        .all(|item| !matches!(item, FormItem::Image { .. })));
    assert_eq!(forms.deleted.lock().unwrap().len(), 1);

    let image = image_of(&live[0]).unwrap();
    assert!(image.starts_with("https://lh3.googleusercontent.com/"));
    assert_eq!(image_of(&live[1]), None);

    // Graded questions turn the form into a quiz
    assert!(forms.settings.lock().unwrap().unwrap().is_quiz);
}

#[tokio::test]
async fn test_unusable_image_is_dropped_with_reason() {
    let storage = Arc::new(FakeStorage {
        content_template: Some("http://drive.example.com/download/{id}".to_string()),
        ..Default::default()
    });
    let forms = Arc::new(FakeForms::with_processed_uri("http://insecure.example.com/img"));
    let materializer = Materializer::new(
        storage.clone(),
        Arc::new(FakeDocuments::default()),
        forms.clone(),
    );

    let outcome = publish_quiz(&materializer, &quiz_item(), "folder-1").await.unwrap();

    assert_eq!(outcome.removed_images.len(), 1);
    assert_eq!(outcome.removed_images[0].key, 0);
    assert!(!outcome.removed_images[0].reason.is_empty());

    // The question survives without its image
    let live = forms.live_items();
    assert_eq!(live.len(), 2);
    assert_eq!(image_of(&live[0]), None);
}

#[tokio::test]
async fn test_existing_form_is_left_untouched() {
    let storage = Arc::new(FakeStorage {
        thumbnail_template: Some("https://lh3.googleusercontent.com/{id}".to_string()),
        ..Default::default()
    });
    let forms = Arc::new(FakeForms::default());

    let first_run = Materializer::new(
        storage.clone(),
        Arc::new(FakeDocuments::default()),
        forms.clone(),
    );
    let created = publish_quiz(&first_run, &quiz_item(), "folder-1").await.unwrap();
    assert!(created.created);
    let items_after_first = forms.live_items().len();

    // A later run finds the tagged form in the folder
    let second_run = Materializer::new(
        storage.clone(),
        Arc::new(FakeDocuments::default()),
        forms.clone(),
    );
    let reused = publish_quiz(&second_run, &quiz_item(), "folder-1").await.unwrap();

    assert!(!reused.created);
    assert_eq!(reused.form_id, created.form_id);
    assert_eq!(forms.live_items().len(), items_after_first);
}

fn text_quiz() -> ContentItem {
    let mut graded = Question::new("2 + 2 = ?", QuestionType::SingleChoice);
    graded.choices = vec![Choice::new("a", "4"), Choice::new("b", "5")];
    graded.correct_answers = vec!["4".to_string()];

    let mut item = ContentItem::new("quiz-2", "Arithmetic", WorkType::Assignment);
    item.assessment_questions = Some(vec![
        QuestionDef::Question(graded),
        QuestionDef::Question(Question::new("Show your work.", QuestionType::Paragraph)),
    ]);
    item
}

#[tokio::test]
async fn test_rerun_fills_form_left_empty_by_failed_insert() {
    let storage = Arc::new(FakeStorage::new());
    let forms = Arc::new(FakeForms {
        fail_batch_inserts: AtomicUsize::new(1),
        ..Default::default()
    });

    let first_run = Materializer::new(
        storage.clone(),
        Arc::new(FakeDocuments::default()),
        forms.clone(),
    );
    assert!(publish_quiz(&first_run, &text_quiz(), "folder-1").await.is_err());
    assert!(forms.live_items().is_empty());

    let second_run = Materializer::new(
        storage.clone(),
        Arc::new(FakeDocuments::default()),
        forms.clone(),
    );
    let outcome = publish_quiz(&second_run, &text_quiz(), "folder-1").await.unwrap();

    assert!(outcome.created);
    assert_eq!(outcome.item_count, 2);
    assert_eq!(forms.live_items().len(), 2);
    // The tagged form from the failed run was reused, not duplicated
    assert_eq!(forms.forms_created.load(Ordering::SeqCst), 1);

    let third_run = Materializer::new(
        storage.clone(),
        Arc::new(FakeDocuments::default()),
        forms.clone(),
    );
    let untouched = publish_quiz(&third_run, &text_quiz(), "folder-1").await.unwrap();
    assert!(!untouched.created);
    assert_eq!(forms.live_items().len(), 2);
}

#[tokio::test]
async fn test_settings_failure_still_inserts_items() {
    let storage = Arc::new(FakeStorage::new());
    let forms = Arc::new(FakeForms {
        fail_settings: true,
        ..Default::default()
    });
    let materializer = Materializer::new(
        storage.clone(),
        Arc::new(FakeDocuments::default()),
        forms.clone(),
    );

    let outcome = publish_quiz(&materializer, &text_quiz(), "folder-1").await.unwrap();

    assert!(outcome.created);
    assert_eq!(outcome.item_count, 2);
    assert_eq!(forms.live_items().len(), 2);
    assert!(forms.settings.lock().unwrap().is_none());
}
