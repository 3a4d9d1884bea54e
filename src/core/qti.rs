//! Assessment (QTI 1.2 / QTI 2.x) parsing into question definitions.
//!
//! Items with an interaction element (`response_lid`, `response_str`,
//! `choiceInteraction`, ...) are read structurally, including their answer
//! key and point weight. Items without one fall back to reading their HTML
//! body block by block.
//!
//! Point weight precedence for graded questions:
//! 1. item metadata `points_possible` or `qmd_weighting`
//! 2. declared maximum score (`decvar maxvalue`, `SCORE` `normalMaximum`,
//!    or the positive entries of a response mapping)
//! 3. none, which becomes 1 when a correct answer was found

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use roxmltree::Node;
use scraper::{Html, Node as HtmlNode};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use super::paths::{self, ReferenceKind};
use super::rewrite::{body_of, collapse_whitespace, html_to_text, resolve_file};
use super::xml;
use crate::domain::{
    Choice, PackageFile, PackageFiles, PendingUpload, Question, QuestionDef, QuestionType,
};

/// Assessment parsing errors
#[derive(Debug, Error)]
pub enum QtiError {
    #[error("Invalid assessment XML: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("Not an assessment document")]
    NotAssessment,
}

/// An item that could not be turned into a question
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DroppedItem {
    pub ident: String,
    pub reason: String,
}

/// Result of parsing one assessment document
#[derive(Debug, Clone, Default)]
pub struct ParsedAssessment {
    pub title: Option<String>,
    pub description: String,
    pub questions: Vec<QuestionDef>,
    pub dropped: Vec<DroppedItem>,
}

const ITEM_ELEMENTS: &[&str] = &["item", "assessmentItem"];
const CONTAINER_ELEMENTS: &[&str] = &["section", "assessmentSection", "testPart"];
const INTERACTIONS: &[&str] = &[
    "response_lid",
    "response_str",
    "response_num",
    "choiceInteraction",
    "textEntryInteraction",
    "extendedTextInteraction",
];

/// Canvas question types with no form equivalent
const UNSUPPORTED_TYPES: &[&str] = &[
    "matching_question",
    "calculated_question",
    "multiple_dropdowns_question",
];

/// Whether a parsed XML document has the shape of an assessment
pub fn is_assessment_document(doc: &roxmltree::Document<'_>) -> bool {
    doc.descendants().any(|n| {
        if !n.is_element() {
            return false;
        }
        match n.tag_name().name() {
            "questestinterop" | "assessment" | "assessmentItem" | "assessmentTest" => true,
            "item" => xml::child(n, "presentation").is_some(),
            _ => false,
        }
    })
}

/// Parse an assessment document read from `source_path`
pub fn parse_assessment(
    files: &PackageFiles,
    source_path: &str,
    text: &str,
) -> Result<ParsedAssessment, QtiError> {
    let doc = xml::parse(text)?;
    if !is_assessment_document(&doc) {
        return Err(QtiError::NotAssessment);
    }

    let root = doc.root_element();
    let mut parser = QtiParser::new(files, source_path, text);

    let header = if xml::is_named(root, "questestinterop") {
        xml::child(root, "assessment").unwrap_or(root)
    } else {
        root
    };
    parser.result.title = xml::attr(header, "title").map(collapse_whitespace);
    parser.result.description = assessment_description(header);

    parser.walk(root, 0);
    debug!(
        path = source_path,
        questions = parser.result.questions.len(),
        dropped = parser.result.dropped.len(),
        "Parsed assessment"
    );

    Ok(parser.result)
}

fn assessment_description(node: Node<'_, '_>) -> String {
    ["qticomment", "objectives", "rubricBlock"]
        .iter()
        .filter_map(|name| xml::child(node, name))
        .map(material_text)
        .find(|text| !text.is_empty())
        .unwrap_or_default()
}

/// Text of a node's `mattext` blocks, HTML reduced to text
fn material_text(node: Node<'_, '_>) -> String {
    let blocks: Vec<String> = if xml::is_named(node, "mattext") {
        vec![mattext_to_text(node)]
    } else {
        xml::descendants(node, "mattext").map(mattext_to_text).collect()
    };
    let joined = if blocks.is_empty() {
        xml::text(node)
    } else {
        blocks.join(" ")
    };
    collapse_whitespace(&joined)
}

fn mattext_to_text(node: Node<'_, '_>) -> String {
    let raw = node.text().unwrap_or_default();
    if is_html_mattext(node) {
        html_to_text(raw)
    } else {
        collapse_whitespace(raw)
    }
}

fn is_html_mattext(node: Node<'_, '_>) -> bool {
    node.attribute("texttype")
        .is_some_and(|t| t.to_ascii_lowercase().contains("html"))
}

/// Parse a decimal weight; negative or unparseable values are ignored
fn parse_weight(raw: &str) -> Option<u32> {
    let value: f64 = raw.trim().parse().ok()?;
    (value.is_finite() && value >= 0.0).then(|| value.round() as u32)
}

fn is_positive(raw: &str) -> bool {
    raw.trim().parse::<f64>().is_ok_and(|v| v > 0.0)
}

/// `qtimetadatafield` label/entry pairs plus direct metadata elements
fn item_metadata(item: Node<'_, '_>) -> HashMap<String, String> {
    let mut meta = HashMap::new();
    for field in xml::descendants(item, "qtimetadatafield") {
        let label = xml::child(field, "fieldlabel").map(xml::text);
        let entry = xml::child(field, "fieldentry").map(xml::text);
        if let (Some(label), Some(entry)) = (label, entry) {
            meta.insert(label, entry);
        }
    }
    if let Some(itemmetadata) = xml::child(item, "itemmetadata") {
        for el in itemmetadata.descendants().filter(|n| n.is_element()) {
            if el.tag_name().name().starts_with("qmd_") {
                let value = xml::text(el);
                if !value.is_empty() {
                    meta.entry(el.tag_name().name().to_string()).or_insert(value);
                }
            }
        }
    }
    meta
}

fn already_numbered(text: &str) -> bool {
    Regex::new(r"^\s*(\d+|[A-Za-z])[.)]\s")
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}

struct QtiParser<'a> {
    files: &'a PackageFiles,
    source_path: &'a str,
    source_text: &'a str,
    result: ParsedAssessment,
    /// Questions emitted so far, for numbering
    number: usize,
}

impl<'a> QtiParser<'a> {
    fn new(files: &'a PackageFiles, source_path: &'a str, source_text: &'a str) -> Self {
        Self {
            files,
            source_path,
            source_text,
            result: ParsedAssessment::default(),
            number: 0,
        }
    }

    fn push(&mut self, question: Question) {
        self.number += 1;
        self.result.questions.push(QuestionDef::Question(question));
    }

    fn drop_item(&mut self, ident: &str, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(path = self.source_path, item = ident, reason = %reason, "Dropping assessment item");
        self.result.dropped.push(DroppedItem {
            ident: ident.to_string(),
            reason,
        });
    }

    /// Walk containers in document order; `depth` counts enclosing sections
    fn walk(&mut self, node: Node<'_, '_>, depth: usize) {
        if ITEM_ELEMENTS.contains(&node.tag_name().name()) && node.is_element() {
            self.item(node);
            return;
        }

        for child in xml::elements(node) {
            let name = child.tag_name().name();
            if ITEM_ELEMENTS.contains(&name) {
                self.item(child);
            } else if CONTAINER_ELEMENTS.contains(&name) {
                if depth > 0 {
                    if let Some(title) = xml::attr(child, "title") {
                        self.result.questions.push(QuestionDef::SectionBreak {
                            title: collapse_whitespace(title),
                        });
                    }
                }
                self.walk(child, depth + 1);
            } else if name == "assessmentItemRef" {
                self.item_ref(child);
            } else {
                self.walk(child, depth);
            }
        }
    }

    /// Follow a QTI 2 test's reference to a separate item file
    fn item_ref(&mut self, node: Node<'_, '_>) {
        let ident = xml::attr(node, "identifier").unwrap_or("item").to_string();
        let Some(href) = xml::attr(node, "href") else {
            self.drop_item(&ident, "item reference without href");
            return;
        };
        let Some(file) = resolve_file(self.files, self.source_path, href) else {
            self.drop_item(&ident, format!("referenced item not found: {}", href));
            return;
        };

        let text = file.text();
        match xml::parse(&text) {
            Ok(doc) => {
                let root = doc.root_element();
                if xml::is_named(root, "assessmentItem") {
                    let mut nested = QtiParser::new(self.files, &file.name, &text);
                    nested.number = self.number;
                    nested.item(root);
                    self.number = nested.number;
                    self.result.questions.extend(nested.result.questions);
                    self.result.dropped.extend(nested.result.dropped);
                } else {
                    self.drop_item(&ident, "referenced file is not an assessment item");
                }
            }
            Err(e) => self.drop_item(&ident, format!("unparseable item file: {}", e)),
        }
    }

    fn item(&mut self, item: Node<'_, '_>) {
        let ident = xml::attr(item, "ident")
            .or_else(|| xml::attr(item, "identifier"))
            .unwrap_or("item")
            .to_string();
        let meta = item_metadata(item);
        let canvas_type = meta.get("question_type").map(String::as_str);

        if let Some(kind) = canvas_type.filter(|t| UNSUPPORTED_TYPES.contains(t)) {
            self.drop_item(&ident, format!("unsupported question type: {}", kind));
            return;
        }

        let interaction = item
            .descendants()
            .find(|n| n.is_element() && INTERACTIONS.contains(&n.tag_name().name()));

        match interaction {
            Some(interaction) => match self.structured(item, interaction, &meta) {
                Ok(question) => self.push(question),
                Err(reason) => self.drop_item(&ident, reason),
            },
            None => {
                let before = self.result.questions.len();
                if let Some(html) = self.item_html(item) {
                    self.rich_text(&html);
                }
                if self.result.questions.len() == before {
                    self.drop_item(&ident, "no interaction and no readable content");
                }
            }
        }
    }

    /// HTML body of an item without an interaction
    fn item_html(&self, item: Node<'_, '_>) -> Option<String> {
        let html_blocks: Vec<&str> = xml::descendants(item, "mattext")
            .filter(|n| is_html_mattext(*n))
            .filter_map(|n| n.text())
            .collect();
        if !html_blocks.is_empty() {
            return Some(html_blocks.join("\n"));
        }

        if let Some(body) = xml::descendant(item, "itemBody").or_else(|| {
            xml::is_named(item, "itemBody").then_some(item)
        }) {
            let mut children = xml::elements(body);
            let first = children.next()?;
            let last = children.last().unwrap_or(first);
            return self
                .source_text
                .get(first.range().start..last.range().end)
                .map(str::to_string);
        }

        let plain: Vec<String> = xml::descendants(item, "mattext").map(mattext_to_text).collect();
        let plain = plain.join(" ");
        (!plain.trim().is_empty()).then(|| format!("<p>{}</p>", html_escape::encode_text(&plain)))
    }

    /// Resolve an image reference to a package image
    fn image(&self, reference: &str) -> Option<Arc<PackageFile>> {
        if paths::classify_reference(reference) != ReferenceKind::Local {
            debug!(reference, "Skipping non-package question image");
            return None;
        }
        let file = resolve_file(self.files, self.source_path, reference)?;
        file.is_image().then_some(file)
    }

    /// Read an item through its interaction element
    fn structured(
        &self,
        item: Node<'_, '_>,
        interaction: Node<'_, '_>,
        meta: &HashMap<String, String>,
    ) -> Result<Question, String> {
        let canvas_type = meta.get("question_type").map(String::as_str);

        let question_type = match interaction.tag_name().name() {
            "response_lid" => {
                let multiple = interaction
                    .attribute("rcardinality")
                    .is_some_and(|c| c.eq_ignore_ascii_case("multiple"))
                    || canvas_type == Some("multiple_answers_question");
                if multiple {
                    QuestionType::MultipleChoice
                } else {
                    QuestionType::SingleChoice
                }
            }
            "choiceInteraction" => {
                let max = interaction.attribute("maxChoices").unwrap_or("1").trim();
                if max == "1" {
                    QuestionType::SingleChoice
                } else {
                    QuestionType::MultipleChoice
                }
            }
            "response_str" => {
                let rows = xml::descendant(interaction, "render_fib")
                    .and_then(|fib| fib.attribute("rows"))
                    .and_then(|r| r.trim().parse::<u32>().ok())
                    .unwrap_or(1);
                let essay = matches!(
                    canvas_type,
                    Some("essay_question" | "file_upload_question")
                );
                if rows > 1 || essay {
                    QuestionType::Paragraph
                } else {
                    QuestionType::ShortText
                }
            }
            "extendedTextInteraction" => QuestionType::Paragraph,
            _ => QuestionType::ShortText,
        };

        let (stem, image_ref) = self.stem(item, interaction);
        let title = if stem.is_empty() {
            xml::attr(item, "title").map(collapse_whitespace).unwrap_or_default()
        } else {
            stem
        };

        let mut question = Question::new(title, question_type);
        question.image = image_ref
            .as_deref()
            .and_then(|r| self.image(r))
            .map(PendingUpload::from_file);

        if question_type.is_choice() {
            question.shuffle = shuffle_flag(interaction);
            question.choices = choices(interaction);
            if question.choices.is_empty() {
                return Err("choice question without options".to_string());
            }
        }

        let keys = correct_keys(item);
        question.correct_answers = if question_type.is_choice() {
            let mut answers = Vec::new();
            for key in &keys {
                if let Some(choice) = question.choices.iter().find(|c| &c.id == key) {
                    if !answers.contains(&choice.text) {
                        answers.push(choice.text.clone());
                    }
                }
            }
            if question_type == QuestionType::SingleChoice {
                answers.truncate(1);
            }
            answers
        } else {
            let mut answers: Vec<String> = Vec::new();
            for key in keys {
                if !answers.contains(&key) {
                    answers.push(key);
                }
            }
            answers
        };

        if !question.correct_answers.is_empty() {
            let weight = metadata_weight(meta).or_else(|| declared_weight(item));
            question.point_value = Some(weight.filter(|w| *w > 0).unwrap_or(1));
            question.required = true;
        }

        if !question.is_valid() {
            return Err("question has no title".to_string());
        }
        Ok(question)
    }

    /// Question text and first embedded image reference
    fn stem(&self, item: Node<'_, '_>, interaction: Node<'_, '_>) -> (String, Option<String>) {
        let mut parts: Vec<String> = Vec::new();
        let mut image: Option<String> = None;

        // QTI 1.2: material blocks in the presentation, outside responses
        if let Some(presentation) = xml::descendant(item, "presentation") {
            for material in xml::descendants(presentation, "material") {
                let in_response = material
                    .ancestors()
                    .any(|a| INTERACTIONS.contains(&a.tag_name().name()));
                if in_response {
                    continue;
                }
                for mattext in xml::descendants(material, "mattext") {
                    let raw = mattext.text().unwrap_or_default();
                    if is_html_mattext(mattext) {
                        if image.is_none() {
                            image = first_img_src(raw);
                        }
                        parts.push(html_to_text(raw));
                    } else {
                        parts.push(collapse_whitespace(raw));
                    }
                }
                if image.is_none() {
                    image = xml::descendant(material, "matimage")
                        .and_then(|m| xml::attr(m, "uri"))
                        .map(str::to_string);
                }
            }
        }

        // QTI 2.x: prompt plus item body text outside the interaction
        if parts.is_empty() {
            if let Some(prompt) = xml::child(interaction, "prompt") {
                parts.push(xml::text(prompt));
            }
            if let Some(body) = xml::descendant(item, "itemBody") {
                for block in xml::elements(body) {
                    if INTERACTIONS.contains(&block.tag_name().name())
                        || block
                            .descendants()
                            .any(|n| INTERACTIONS.contains(&n.tag_name().name()))
                    {
                        continue;
                    }
                    parts.push(xml::text(block));
                }
            }
            if image.is_none() {
                image = xml::descendants(item, "img")
                    .find_map(|img| xml::attr(img, "src"))
                    .map(str::to_string);
            }
        }

        let stem = collapse_whitespace(&parts.join(" "));
        (stem, image)
    }

    /// Read an HTML body block by block
    fn rich_text(&mut self, html: &str) {
        let doc = Html::parse_document(html);

        for block in body_of(&doc).children() {
            match block.value() {
                HtmlNode::Text(text) => {
                    let text = collapse_whitespace(text);
                    if !text.is_empty() {
                        self.paragraph(text);
                    }
                }
                HtmlNode::Element(el) if el.name() == "img" => {
                    let Some(file) = el.attr("src").and_then(|src| self.image(src.trim())) else {
                        continue;
                    };
                    let title = el
                        .attr("alt")
                        .map(collapse_whitespace)
                        .filter(|t| !t.is_empty())
                        .unwrap_or_else(|| file.file_name().to_string());
                    self.result.questions.push(QuestionDef::StandaloneImage {
                        title,
                        image: PendingUpload::from_file(file),
                    });
                }
                HtmlNode::Element(el) => {
                    if matches!(el.name(), "script" | "style") {
                        continue;
                    }
                    let mut raw = String::new();
                    for text in block.descendants().filter_map(|n| n.value().as_text()) {
                        raw.push_str(text);
                        raw.push(' ');
                    }
                    let text = collapse_whitespace(&raw);

                    let images: Vec<(Arc<PackageFile>, Option<String>)> = block
                        .descendants()
                        .filter_map(|n| n.value().as_element())
                        .filter(|e| e.name() == "img")
                        .filter_map(|e| {
                            let file = e.attr("src").and_then(|src| self.image(src.trim()))?;
                            let alt = e.attr("alt").map(collapse_whitespace).filter(|a| !a.is_empty());
                            Some((file, alt))
                        })
                        .collect();

                    if images.is_empty() {
                        if !text.is_empty() {
                            self.paragraph(text);
                        }
                        continue;
                    }

                    for (idx, (file, alt)) in images.into_iter().enumerate() {
                        let title = if idx == 0 && !text.is_empty() {
                            text.clone()
                        } else {
                            alt.unwrap_or_else(|| format!("Question {}", self.number + 1))
                        };
                        let mut question = Question::new(title, QuestionType::ShortText);
                        question.image = Some(PendingUpload::from_file(file));
                        self.push(question);
                    }
                }
                _ => {}
            }
        }
    }

    fn paragraph(&mut self, text: String) {
        let title = if already_numbered(&text) {
            text
        } else {
            format!("{}. {}", self.number + 1, text)
        };
        self.push(Question::new(title, QuestionType::Paragraph));
    }
}

fn first_img_src(html: &str) -> Option<String> {
    let doc = Html::parse_fragment(html);
    doc.root_element()
        .descendants()
        .filter_map(|n| n.value().as_element())
        .find(|e| e.name() == "img")
        .and_then(|e| e.attr("src"))
        .map(|s| s.trim().to_string())
}

fn shuffle_flag(interaction: Node<'_, '_>) -> bool {
    let raw = interaction.attribute("shuffle").or_else(|| {
        xml::descendant(interaction, "render_choice").and_then(|r| r.attribute("shuffle"))
    });
    raw.is_some_and(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "yes" | "true"))
}

/// Option identifier and text pairs, in document order
fn choices(interaction: Node<'_, '_>) -> Vec<Choice> {
    let mut out = Vec::new();
    for label in xml::descendants(interaction, "response_label")
        .chain(xml::descendants(interaction, "simpleChoice"))
    {
        let Some(id) = xml::attr(label, "ident").or_else(|| xml::attr(label, "identifier")) else {
            continue;
        };
        let text = if xml::descendant(label, "mattext").is_some() {
            material_text(label)
        } else {
            xml::text(label)
        };
        if !text.is_empty() {
            out.push(Choice::new(id, text));
        }
    }
    out
}

/// Identifiers or literal values that score positively
fn correct_keys(item: Node<'_, '_>) -> Vec<String> {
    let mut keys = Vec::new();

    for condition in xml::descendants(item, "respcondition") {
        let scores = condition
            .children()
            .filter(|n| xml::is_named(*n, "setvar") || xml::is_named(*n, "set_var"))
            .any(|setvar| {
                let action = setvar.attribute("action").unwrap_or("Set");
                !action.eq_ignore_ascii_case("subtract")
                    && setvar.text().is_some_and(is_positive)
            });
        if !scores {
            continue;
        }
        let Some(conditionvar) = xml::child(condition, "conditionvar") else {
            continue;
        };
        for varequal in xml::descendants(conditionvar, "varequal") {
            let negated = varequal
                .ancestors()
                .take_while(|a| *a != conditionvar)
                .any(|a| xml::is_named(a, "not"));
            if negated {
                continue;
            }
            let value = xml::text(varequal);
            if !value.is_empty() {
                keys.push(value);
            }
        }
    }

    // QTI 2.x answer keys
    for declaration in xml::descendants(item, "responseDeclaration") {
        if let Some(correct) = xml::child(declaration, "correctResponse") {
            keys.extend(
                xml::children(correct, "value")
                    .map(xml::text)
                    .filter(|v| !v.is_empty()),
            );
        }
        if let Some(mapping) = xml::child(declaration, "mapping") {
            for entry in xml::children(mapping, "mapEntry") {
                let positive = entry.attribute("mappedValue").is_some_and(is_positive);
                if let (true, Some(key)) = (positive, xml::attr(entry, "mapKey")) {
                    keys.push(key.to_string());
                }
            }
        }
    }

    keys
}

fn metadata_weight(meta: &HashMap<String, String>) -> Option<u32> {
    ["points_possible", "qmd_weighting"]
        .iter()
        .find_map(|key| meta.get(*key).and_then(|v| parse_weight(v)))
}

fn declared_weight(item: Node<'_, '_>) -> Option<u32> {
    if let Some(max) = xml::descendants(item, "decvar")
        .filter_map(|d| d.attribute("maxvalue"))
        .find_map(parse_weight)
    {
        return Some(max);
    }

    let score_max = xml::descendants(item, "outcomeDeclaration")
        .filter(|d| d.attribute("identifier") == Some("SCORE"))
        .filter_map(|d| d.attribute("normalMaximum"))
        .find_map(parse_weight);
    if score_max.is_some() {
        return score_max;
    }

    let mapped: f64 = xml::descendants(item, "mapEntry")
        .filter_map(|e| e.attribute("mappedValue"))
        .filter_map(|v| v.trim().parse::<f64>().ok())
        .filter(|v| *v > 0.0)
        .sum();
    (mapped > 0.0).then(|| mapped.round() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files() -> PackageFiles {
        PackageFiles::new(vec![
            PackageFile::new("quiz1/images/map.png", vec![1]),
            PackageFile::new("quiz1/images/chart.png", vec![2]),
            PackageFile::new(
                "items/q2.xml",
                r#"<assessmentItem identifier="q2" title="Q2">
                     <responseDeclaration identifier="RESPONSE" cardinality="single">
                       <correctResponse><value>B</value></correctResponse>
                     </responseDeclaration>
                     <itemBody>
                       <choiceInteraction responseIdentifier="RESPONSE" maxChoices="1" shuffle="true">
                         <prompt>Largest planet?</prompt>
                         <simpleChoice identifier="A">Mars</simpleChoice>
                         <simpleChoice identifier="B">Jupiter</simpleChoice>
                       </choiceInteraction>
                     </itemBody>
                   </assessmentItem>"#,
            ),
        ])
    }

    const CHOICE_QTI: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<questestinterop xmlns="http://www.imsglobal.org/xsd/ims_qtiasiv1p2">
  <assessment ident="a1" title="Geography Quiz">
    <qticomment>Capitals of Europe</qticomment>
    <section ident="root_section">
      <item ident="i1" title="Question">
        <itemmetadata><qtimetadata>
          <qtimetadatafield><fieldlabel>question_type</fieldlabel><fieldentry>multiple_choice_question</fieldentry></qtimetadatafield>
        </qtimetadata></itemmetadata>
        <presentation>
          <material><mattext texttype="text/html">&lt;p&gt;Capital of France?&lt;/p&gt;</mattext></material>
          <response_lid ident="response1" rcardinality="Single">
            <render_choice shuffle="No">
              <response_label ident="A"><material><mattext texttype="text/plain">Paris</mattext></material></response_label>
              <response_label ident="B"><material><mattext texttype="text/plain">Lyon</mattext></material></response_label>
            </render_choice>
          </response_lid>
        </presentation>
        <resprocessing>
          <outcomes><decvar maxvalue="100" minvalue="0" varname="SCORE" vartype="Decimal"/></outcomes>
          <respcondition continue="No">
            <conditionvar><varequal respident="response1">A</varequal></conditionvar>
            <setvar action="Set" varname="SCORE">100</setvar>
          </respcondition>
        </resprocessing>
      </item>
    </section>
  </assessment>
</questestinterop>"#;

    #[test]
    fn test_choice_question_answer_key() {
        let parsed = parse_assessment(&files(), "quiz1/assessment.xml", CHOICE_QTI).unwrap();

        assert_eq!(parsed.title.as_deref(), Some("Geography Quiz"));
        assert_eq!(parsed.description, "Capitals of Europe");
        assert_eq!(parsed.questions.len(), 1);

        let q = parsed.questions[0].as_question().unwrap();
        assert_eq!(q.title, "Capital of France?");
        assert_eq!(q.question_type, QuestionType::SingleChoice);
        assert_eq!(q.choices.len(), 2);
        assert_eq!(q.correct_answers, vec!["Paris"]);
        assert!(q.point_value.unwrap() >= 1);
        assert!(q.required);
    }

    #[test]
    fn test_metadata_weight_takes_precedence() {
        let xml = CHOICE_QTI.replace(
            "</qtimetadata>",
            "<qtimetadatafield><fieldlabel>points_possible</fieldlabel><fieldentry>2.0</fieldentry></qtimetadatafield></qtimetadata>",
        );
        let parsed = parse_assessment(&files(), "quiz1/assessment.xml", &xml).unwrap();
        let q = parsed.questions[0].as_question().unwrap();
        assert_eq!(q.point_value, Some(2));
    }

    #[test]
    fn test_multiple_answers_skip_negated_conditions() {
        let xml = r#"<questestinterop><assessment title="Q"><section ident="root_section">
          <item ident="m1">
            <presentation>
              <material><mattext>Pick primes</mattext></material>
              <response_lid ident="r" rcardinality="Multiple"><render_choice shuffle="Yes">
                <response_label ident="a"><material><mattext>2</mattext></material></response_label>
                <response_label ident="b"><material><mattext>3</mattext></material></response_label>
                <response_label ident="c"><material><mattext>4</mattext></material></response_label>
              </render_choice></response_lid>
            </presentation>
            <resprocessing>
              <respcondition>
                <conditionvar><and>
                  <varequal respident="r">a</varequal>
                  <varequal respident="r">b</varequal>
                  <not><varequal respident="r">c</varequal></not>
                </and></conditionvar>
                <setvar varname="SCORE" action="Set">100</setvar>
              </respcondition>
            </resprocessing>
          </item>
        </section></assessment></questestinterop>"#;

        let parsed = parse_assessment(&files(), "quiz.xml", xml).unwrap();
        let q = parsed.questions[0].as_question().unwrap();
        assert_eq!(q.question_type, QuestionType::MultipleChoice);
        assert!(q.shuffle);
        assert_eq!(q.correct_answers, vec!["2", "3"]);
        assert_eq!(q.point_value, Some(1));
    }

    #[test]
    fn test_essay_and_ungraded_text() {
        let xml = r#"<questestinterop><assessment title="Reflection"><section ident="root_section">
          <item ident="e1">
            <itemmetadata><qtimetadata><qtimetadatafield><fieldlabel>question_type</fieldlabel><fieldentry>essay_question</fieldentry></qtimetadatafield></qtimetadata></itemmetadata>
            <presentation>
              <material><mattext>Describe your week.</mattext></material>
              <response_str ident="r" rcardinality="Single"><render_fib/></response_str>
            </presentation>
          </item>
        </section></assessment></questestinterop>"#;

        let parsed = parse_assessment(&files(), "quiz.xml", xml).unwrap();
        let q = parsed.questions[0].as_question().unwrap();
        assert_eq!(q.question_type, QuestionType::Paragraph);
        assert!(!q.required);
        assert_eq!(q.point_value, None);
    }

    #[test]
    fn test_unsupported_item_dropped_file_continues() {
        let xml = r#"<questestinterop><assessment title="Mixed"><section ident="root_section">
          <item ident="bad">
            <itemmetadata><qtimetadata><qtimetadatafield><fieldlabel>question_type</fieldlabel><fieldentry>matching_question</fieldentry></qtimetadatafield></qtimetadata></itemmetadata>
            <presentation><material><mattext>Match</mattext></material></presentation>
          </item>
          <item ident="empty_choice">
            <presentation>
              <material><mattext>No options</mattext></material>
              <response_lid ident="r"><render_choice/></response_lid>
            </presentation>
          </item>
          <item ident="ok">
            <presentation>
              <material><mattext>Your name?</mattext></material>
              <response_str ident="r"><render_fib/></response_str>
            </presentation>
          </item>
        </section></assessment></questestinterop>"#;

        let parsed = parse_assessment(&files(), "quiz.xml", xml).unwrap();
        assert_eq!(parsed.questions.len(), 1);
        assert_eq!(parsed.dropped.len(), 2);
        assert!(parsed.dropped[0].reason.contains("matching_question"));
        assert_eq!(parsed.questions[0].title(), "Your name?");
    }

    #[test]
    fn test_rich_text_strategy() {
        let xml = r#"<questestinterop><assessment title="Worksheet"><section ident="root_section">
          <item ident="t1">
            <presentation><material><mattext texttype="text/html">&lt;p&gt;Read the passage.&lt;/p&gt;&lt;img src="images/map.png" alt="Map"&gt;&lt;p&gt;Label this chart &lt;img src="images/chart.png"&gt;&lt;/p&gt;&lt;p&gt;2. Already numbered&lt;/p&gt;</mattext></material></presentation>
          </item>
        </section></assessment></questestinterop>"#;

        let parsed = parse_assessment(&files(), "quiz1/assessment.xml", xml).unwrap();
        let titles: Vec<&str> = parsed.questions.iter().map(|q| q.title()).collect();
        assert_eq!(
            titles,
            vec!["1. Read the passage.", "Map", "Label this chart", "2. Already numbered"]
        );

        assert!(matches!(parsed.questions[1], QuestionDef::StandaloneImage { .. }));
        let labelled = parsed.questions[2].as_question().unwrap();
        assert_eq!(labelled.question_type, QuestionType::ShortText);
        assert_eq!(
            labelled.image.as_ref().unwrap().source_file.name,
            "quiz1/images/chart.png"
        );
    }

    #[test]
    fn test_interaction_wins_over_html_stem() {
        let xml = r#"<questestinterop><assessment title="Maps"><section ident="root_section">
          <item ident="m1">
            <presentation>
              <material><mattext texttype="text/html">&lt;p&gt;Which city is marked?&lt;/p&gt;&lt;img src="images/map.png"&gt;&lt;p&gt;Pick one.&lt;/p&gt;</mattext></material>
              <response_lid ident="r1" rcardinality="Single"><render_choice>
                <response_label ident="A"><material><mattext>Paris</mattext></material></response_label>
                <response_label ident="B"><material><mattext>Rome</mattext></material></response_label>
              </render_choice></response_lid>
            </presentation>
          </item>
        </section></assessment></questestinterop>"#;

        let parsed = parse_assessment(&files(), "quiz1/assessment.xml", xml).unwrap();

        assert_eq!(parsed.questions.len(), 1);
        let q = parsed.questions[0].as_question().unwrap();
        assert_eq!(q.question_type, QuestionType::SingleChoice);
        assert_eq!(q.choices.len(), 2);
        assert!(q.title.starts_with("Which city is marked?"));
    }

    #[test]
    fn test_nested_sections_become_breaks() {
        let xml = r#"<questestinterop><assessment title="Exam"><section ident="root_section">
          <section ident="s1" title="Part A">
            <item ident="a"><presentation><material><mattext>Q A</mattext></material><response_str ident="r"><render_fib/></response_str></presentation></item>
          </section>
          <section ident="s2" title="Part B">
            <item ident="b"><presentation><material><mattext>Q B</mattext></material><response_str ident="r"><render_fib/></response_str></presentation></item>
          </section>
        </section></assessment></questestinterop>"#;

        let parsed = parse_assessment(&files(), "quiz.xml", xml).unwrap();
        let titles: Vec<&str> = parsed.questions.iter().map(|q| q.title()).collect();
        assert_eq!(titles, vec!["Part A", "Q A", "Part B", "Q B"]);
        assert!(matches!(parsed.questions[0], QuestionDef::SectionBreak { .. }));
    }

    #[test]
    fn test_qti2_test_follows_item_refs() {
        let xml = r#"<assessmentTest identifier="t" title="Planets">
          <testPart identifier="p1">
            <assessmentSection identifier="s" title="Main" visible="true">
              <assessmentItemRef identifier="q2" href="../items/q2.xml"/>
              <assessmentItemRef identifier="q3" href="../items/missing.xml"/>
            </assessmentSection>
          </testPart>
        </assessmentTest>"#;

        let parsed = parse_assessment(&files(), "tests/test.xml", xml).unwrap();
        assert_eq!(parsed.title.as_deref(), Some("Planets"));

        let questions: Vec<&Question> = parsed.questions.iter().filter_map(QuestionDef::as_question).collect();
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].title, "Largest planet?");
        assert!(questions[0].shuffle);
        assert_eq!(questions[0].correct_answers, vec!["Jupiter"]);
        assert_eq!(parsed.dropped.len(), 1);
    }

    #[test]
    fn test_not_an_assessment() {
        let err = parse_assessment(&files(), "x.xml", "<topic><title>T</title></topic>").unwrap_err();
        assert!(matches!(err, QtiError::NotAssessment));

        let err = parse_assessment(&files(), "x.xml", "<broken").unwrap_err();
        assert!(matches!(err, QtiError::Xml(_)));
    }
}
