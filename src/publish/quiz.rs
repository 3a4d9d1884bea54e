//! Quiz forms built from parsed assessment questions.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::adapters::{FormService, FormSettings, ServiceError};
use crate::domain::{ContentItem, Question, QuestionDef, QuestionType};

use super::images::{self, DroppedImage, ImageRequest};
use super::materializer::Materializer;

/// Item sent to the form insertion script
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FormItem {
    Question {
        title: String,
        #[serde(skip_serializing_if = "String::is_empty")]
        description: String,
        question: FormQuestion,
        #[serde(skip_serializing_if = "Option::is_none")]
        image_uri: Option<String>,
        required: bool,
    },
    Image {
        title: String,
        image_uri: String,
    },
    PageBreak {
        title: String,
    },
}

/// Answer format of a form question
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FormQuestion {
    Choice {
        multiple: bool,
        shuffle: bool,
        options: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        grading: Option<Grading>,
    },
    Text {
        paragraph: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        grading: Option<Grading>,
    },
}

/// Answer key and score of a graded question
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Grading {
    pub points: u32,
    pub correct_answers: Vec<String>,
}

/// What publishing a quiz produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuizOutcome {
    pub form_id: String,
    /// False when an existing, already populated form was left untouched
    pub created: bool,
    pub item_count: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub removed_images: Vec<DroppedImage>,
}

fn grading_for(question: &Question) -> Option<Grading> {
    question.is_graded().then(|| Grading {
        points: question.point_value.unwrap_or(1).max(1),
        correct_answers: question.correct_answers.clone(),
    })
}

fn question_item(question: &Question, number: usize, image_uri: Option<String>) -> FormItem {
    let grading = grading_for(question);
    let form_question = match question.question_type {
        QuestionType::SingleChoice | QuestionType::MultipleChoice => FormQuestion::Choice {
            multiple: question.question_type == QuestionType::MultipleChoice,
            shuffle: question.shuffle,
            options: question.choices.iter().map(|c| c.text.clone()).collect(),
            grading,
        },
        QuestionType::ShortText => FormQuestion::Text {
            paragraph: false,
            grading,
        },
        QuestionType::Paragraph => FormQuestion::Text {
            paragraph: true,
            grading,
        },
    };

    let title = if question.title.trim().is_empty() {
        format!("Question {}", number)
    } else {
        question.title.clone()
    };

    FormItem::Question {
        title,
        description: question.description.clone(),
        question: form_question,
        image_uri,
        required: question.required,
    }
}

/// Convert question definitions into form items. `image_uris` maps a
/// definition index to its resolved image; standalone images without one
/// are left out.
pub fn form_items(defs: &[QuestionDef], image_uris: &HashMap<usize, String>) -> Vec<FormItem> {
    let mut items = Vec::with_capacity(defs.len());
    let mut number = 0;

    for (idx, def) in defs.iter().enumerate() {
        match def {
            QuestionDef::Question(question) => {
                number += 1;
                items.push(question_item(question, number, image_uris.get(&idx).cloned()));
            }
            QuestionDef::StandaloneImage { title, .. } => {
                if let Some(uri) = image_uris.get(&idx) {
                    items.push(FormItem::Image {
                        title: title.clone(),
                        image_uri: uri.clone(),
                    });
                }
            }
            QuestionDef::SectionBreak { title } => items.push(FormItem::PageBreak {
                title: title.clone(),
            }),
        }
    }

    items
}

/// Whether an existing form still needs its items. A form holding nothing
/// but leftover placeholders counts as empty; those placeholders are removed.
/// Read failures count as populated so the form is never filled twice.
async fn needs_items(forms: &dyn FormService, form_id: &str) -> bool {
    let items = match forms.get_form(form_id, "items(itemId,title)").await {
        Ok(items) => items,
        Err(e) => {
            warn!(form_id, error = %e, "Failed to read existing quiz, leaving it untouched");
            return false;
        }
    };

    let (leftovers, real): (Vec<_>, Vec<_>) = items
        .into_iter()
        .partition(|item| item.title.starts_with(images::TEMP_TITLE_PREFIX));
    if !real.is_empty() {
        return false;
    }

    let leftover_ids: Vec<String> = leftovers.into_iter().map(|item| item.item_id).collect();
    images::cleanup_placeholders(forms, form_id, &leftover_ids).await;
    true
}

/// Publish an assessment item as a quiz form inside `folder_id`.
///
/// A form found from an earlier run is only filled in when it has no items
/// yet, which happens when that run failed on the final insert.
#[instrument(skip(materializer, item), fields(item_id = %item.id))]
pub async fn publish_quiz(
    materializer: &Materializer,
    item: &ContentItem,
    folder_id: &str,
) -> Result<QuizOutcome, ServiceError> {
    let defs = item.assessment_questions.as_deref().unwrap_or_default();
    let forms = materializer.forms();

    let stable_id = format!("form:{}", item.id);
    let form = materializer
        .find_or_create_form(folder_id, &item.title, Some(&stable_id))
        .await?;
    let form_id = form.id().to_string();

    if !form.created {
        if !needs_items(forms, &form_id).await {
            info!(form_id = %form_id, "Quiz already exists");
            return Ok(QuizOutcome {
                form_id,
                created: false,
                item_count: 0,
                removed_images: Vec::new(),
            });
        }
        info!(form_id = %form_id, "Existing quiz is empty, filling it in");
    }

    let graded = defs
        .iter()
        .any(|def| def.as_question().is_some_and(Question::is_graded));
    if graded {
        if let Err(e) = forms
            .update_settings(&form_id, &FormSettings { is_quiz: true })
            .await
        {
            warn!(form_id = %form_id, error = %e, "Failed to enable quiz grading");
        }
    }

    let mut dropped = Vec::new();
    let mut requests = Vec::new();
    for (idx, def) in defs.iter().enumerate() {
        let Some(image) = def.image() else {
            continue;
        };
        match materializer
            .find_or_create_upload(folder_id, &item.id, image)
            .await
        {
            Ok(uploaded) => requests.push(ImageRequest {
                key: idx,
                title: def.title().to_string(),
                source_uri: images::image_source_uri(&uploaded.file),
            }),
            Err(e) => {
                warn!(path = %image.source_file.name, error = %e, "Question image upload failed");
                dropped.push(DroppedImage {
                    key: idx,
                    title: def.title().to_string(),
                    reason: format!("upload failed: {}", e),
                });
            }
        }
    }

    let resolution = images::resolve_images(forms, &form_id, &requests).await;
    dropped.extend(resolution.dropped);

    let items = form_items(defs, &resolution.resolved);
    let cleaned = images::cleanup_placeholders(forms, &form_id, &resolution.placeholders).await;

    match forms.run_batch_insert(&form_id, &items).await {
        Ok(ids) => {
            info!(form_id = %form_id, inserted = ids.len(), "Quiz items inserted");
            Ok(QuizOutcome {
                form_id,
                created: true,
                item_count: items.len(),
                removed_images: dropped,
            })
        }
        Err(e) => {
            if !cleaned {
                images::cleanup_placeholders(forms, &form_id, &resolution.placeholders).await;
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Choice;

    fn graded_choice() -> Question {
        let mut q = Question::new("Capital of France?", QuestionType::SingleChoice);
        q.choices = vec![Choice::new("A", "Paris"), Choice::new("B", "Lyon")];
        q.correct_answers = vec!["Paris".to_string()];
        q.required = true;
        q
    }

    #[test]
    fn test_form_items_cover_every_kind() {
        let defs = vec![
            QuestionDef::SectionBreak {
                title: "Part 1".to_string(),
            },
            QuestionDef::Question(graded_choice()),
            QuestionDef::Question(Question::new("Explain.", QuestionType::Paragraph)),
        ];

        let items = form_items(&defs, &HashMap::new());
        assert_eq!(items.len(), 3);
        assert!(matches!(items[0], FormItem::PageBreak { .. }));

        match &items[1] {
            FormItem::Question {
                question:
                    FormQuestion::Choice {
                        multiple,
                        options,
                        grading: Some(grading),
                        ..
                    },
                required,
                ..
            } => {
                assert!(!*multiple);
                assert_eq!(options, &vec!["Paris".to_string(), "Lyon".to_string()]);
                assert_eq!(grading.correct_answers, vec!["Paris"]);
                assert_eq!(grading.points, 1);
                assert!(*required);
            }
            other => panic!("unexpected item {:?}", other),
        }

        assert!(matches!(
            &items[2],
            FormItem::Question {
                question: FormQuestion::Text {
                    paragraph: true,
                    grading: None
                },
                ..
            }
        ));
    }

    #[test]
    fn test_untitled_question_gets_number() {
        let defs = vec![
            QuestionDef::Question(Question::new("First", QuestionType::ShortText)),
            QuestionDef::Question(Question::new("", QuestionType::ShortText)),
        ];
        let items = form_items(&defs, &HashMap::new());
        match &items[1] {
            FormItem::Question { title, .. } => assert_eq!(title, "Question 2"),
            other => panic!("unexpected item {:?}", other),
        }
    }

    #[test]
    fn test_form_item_wire_shape() {
        let item = FormItem::Image {
            title: "Diagram".to_string(),
            image_uri: "https://lh3.googleusercontent.com/x".to_string(),
        };
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["type"], "image");
        assert_eq!(value["image_uri"], "https://lh3.googleusercontent.com/x");

        let item = form_items(&[QuestionDef::Question(graded_choice())], &HashMap::new());
        let value = serde_json::to_value(&item[0]).unwrap();
        assert_eq!(value["type"], "question");
        assert_eq!(value["question"]["kind"], "choice");
        assert_eq!(value["question"]["grading"]["points"], 1);
    }
}
