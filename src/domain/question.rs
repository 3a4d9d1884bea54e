//! Intermediate question model produced by the assessment parser.

use serde::Serialize;

use super::content::PendingUpload;

/// How a question is answered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    SingleChoice,
    MultipleChoice,
    ShortText,
    Paragraph,
}

impl QuestionType {
    pub fn is_choice(self) -> bool {
        matches!(self, QuestionType::SingleChoice | QuestionType::MultipleChoice)
    }
}

/// One answer option of a choice question
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Choice {
    pub id: String,
    pub text: String,
}

impl Choice {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// A gradable or free-form question
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Question {
    pub title: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,

    pub question_type: QuestionType,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<Choice>,

    pub shuffle: bool,

    /// Option texts (choice) or literal answers (text)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub correct_answers: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub point_value: Option<u32>,

    /// Required and graded; only set when a correct answer is known
    pub required: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<PendingUpload>,
}

impl Question {
    pub fn new(title: impl Into<String>, question_type: QuestionType) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            question_type,
            choices: Vec::new(),
            shuffle: false,
            correct_answers: Vec::new(),
            point_value: None,
            required: false,
            image: None,
        }
    }

    pub fn is_graded(&self) -> bool {
        self.required && !self.correct_answers.is_empty()
    }

    /// Check the structural invariants: a title or an image, and at least
    /// one option for choice questions.
    pub fn is_valid(&self) -> bool {
        let has_heading = !self.title.trim().is_empty() || self.image.is_some();
        let has_options = !self.question_type.is_choice() || !self.choices.is_empty();
        has_heading && has_options
    }
}

/// One entry of a parsed assessment
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuestionDef {
    Question(Question),
    StandaloneImage { title: String, image: PendingUpload },
    /// Boundary between titled assessment sections
    SectionBreak { title: String },
}

impl QuestionDef {
    pub fn as_question(&self) -> Option<&Question> {
        match self {
            QuestionDef::Question(q) => Some(q),
            _ => None,
        }
    }

    pub fn image(&self) -> Option<&PendingUpload> {
        match self {
            QuestionDef::Question(q) => q.image.as_ref(),
            QuestionDef::StandaloneImage { image, .. } => Some(image),
            QuestionDef::SectionBreak { .. } => None,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            QuestionDef::Question(q) => &q.title,
            QuestionDef::StandaloneImage { title, .. } | QuestionDef::SectionBreak { title } => {
                title
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_question_invariants() {
        let mut q = Question::new("Pick one", QuestionType::SingleChoice);
        assert!(!q.is_valid());

        q.choices.push(Choice::new("A", "Paris"));
        assert!(q.is_valid());

        let untitled = Question::new("  ", QuestionType::Paragraph);
        assert!(!untitled.is_valid());
    }

    #[test]
    fn test_question_def_tagging() {
        let def = QuestionDef::Question(Question::new("Q1", QuestionType::ShortText));
        let value = serde_json::to_value(&def).unwrap();
        assert_eq!(value["kind"], "question");
        assert_eq!(value["question_type"], "short_text");
    }
}
