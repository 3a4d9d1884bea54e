//! Package files and the normalized lookup map.
//!
//! Every file of an extracted course package is loaded once into a
//! [`PackageFiles`] map. Lookups go through [`normalize_key`] so that
//! references written with different casing, percent-encoding, entities or
//! typographic look-alike characters still find the same file.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

/// Maximum number of percent-decoding rounds applied to a reference
pub const MAX_DECODE_ROUNDS: usize = 5;

/// A single file from the package
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageFile {
    /// Path inside the package, `/`-separated
    pub name: String,

    /// Raw file contents
    #[serde(skip)]
    pub data: Vec<u8>,

    /// Mime type (guessed from the extension when not supplied)
    pub mime_type: String,
}

impl PackageFile {
    /// Create a package file, guessing the mime type from the name
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        let name = name.into().replace('\\', "/");
        let mime_type = mime_for_path(&name).to_string();
        Self {
            name,
            data: data.into(),
            mime_type,
        }
    }

    /// Create a package file with an explicit mime type
    pub fn with_mime(
        name: impl Into<String>,
        data: impl Into<Vec<u8>>,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into().replace('\\', "/"),
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }

    /// Contents as text (lossy, BOM stripped)
    pub fn text(&self) -> Cow<'_, str> {
        let bytes = self
            .data
            .strip_prefix(&[0xEF, 0xBB, 0xBF][..])
            .unwrap_or(&self.data);
        String::from_utf8_lossy(bytes)
    }

    /// Last path segment
    pub fn file_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    /// Lower-cased extension without the dot
    pub fn extension(&self) -> Option<String> {
        let name = self.file_name();
        let (_, ext) = name.rsplit_once('.')?;
        Some(ext.to_ascii_lowercase())
    }

    pub fn is_html(&self) -> bool {
        matches!(self.extension().as_deref(), Some("html" | "htm" | "xhtml"))
            || self.mime_type.starts_with("text/html")
            || self.mime_type.starts_with("application/xhtml")
    }

    pub fn is_xml(&self) -> bool {
        matches!(self.extension().as_deref(), Some("xml" | "qti"))
            || self.mime_type.ends_with("/xml")
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    pub fn is_video(&self) -> bool {
        self.mime_type.starts_with("video/") || self.mime_type.starts_with("audio/")
    }
}

/// Guess a mime type from a file extension
pub fn mime_for_path(path: &str) -> &'static str {
    let ext = path
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "html" | "htm" => "text/html",
        "xhtml" => "application/xhtml+xml",
        "xml" | "qti" => "application/xml",
        "txt" => "text/plain",
        "css" => "text/css",
        "js" => "text/javascript",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "wav" => "audio/wav",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "ppt" => "application/vnd.ms-powerpoint",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}

/// Percent-decode repeatedly (bounded) until the value stops changing,
/// then decode HTML entities.
pub fn decode_reference(raw: &str) -> String {
    let mut current = raw.to_string();
    for _ in 0..MAX_DECODE_ROUNDS {
        let decoded = match urlencoding::decode(&current) {
            Ok(decoded) => decoded.into_owned(),
            Err(_) => break,
        };
        if decoded == current {
            break;
        }
        current = decoded;
    }
    html_escape::decode_html_entities(&current).into_owned()
}

/// Fold typographic look-alikes to the ASCII characters authoring tools
/// usually meant.
fn fold_homoglyph(c: char) -> char {
    match c {
        '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{2032}' => '\'',
        '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{2033}' => '"',
        '\u{2010}' | '\u{2011}' | '\u{2012}' | '\u{2013}' | '\u{2014}' | '\u{2212}' => '-',
        '\u{FF0F}' | '\u{2215}' | '\u{2044}' | '\\' => '/',
        '\u{00A0}' | '\u{2007}' | '\u{202F}' => ' ',
        other => other,
    }
}

/// Normalized lookup key for a package path
pub fn normalize_key(path: &str) -> String {
    let decoded = decode_reference(path);
    let folded: String = decoded.chars().map(fold_homoglyph).collect();
    let lowered = folded.to_lowercase();
    let mut key = lowered.as_str();
    loop {
        if let Some(rest) = key.strip_prefix("./") {
            key = rest;
        } else if let Some(rest) = key.strip_prefix('/') {
            key = rest;
        } else {
            break;
        }
    }
    key.to_string()
}

/// Package-wide file map, built once per run and read-only afterwards
#[derive(Debug, Clone, Default)]
pub struct PackageFiles {
    files: Vec<Arc<PackageFile>>,
    index: HashMap<String, usize>,
}

impl PackageFiles {
    /// Build the map. When two files normalize to the same key the first
    /// one wins.
    pub fn new(files: impl IntoIterator<Item = PackageFile>) -> Self {
        let mut map = Self::default();
        for file in files {
            let key = normalize_key(&file.name);
            if map.index.contains_key(&key) {
                tracing::debug!(path = %file.name, "Duplicate package path after normalization");
                continue;
            }
            map.index.insert(key, map.files.len());
            map.files.push(Arc::new(file));
        }
        map
    }

    /// Look up a file by any spelling of its path
    pub fn get(&self, path: &str) -> Option<&Arc<PackageFile>> {
        self.index
            .get(&normalize_key(path))
            .map(|&idx| &self.files[idx])
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Find the package manifest: the shallowest `imsmanifest.xml`
    pub fn manifest(&self) -> Option<&Arc<PackageFile>> {
        self.files
            .iter()
            .filter(|f| f.file_name().eq_ignore_ascii_case("imsmanifest.xml"))
            .min_by_key(|f| f.name.matches('/').count())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<PackageFile>> {
        self.files.iter()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_key_folds_case_and_encoding() {
        assert_eq!(normalize_key("Web%20Resources/Photo.PNG"), "web resources/photo.png");
        assert_eq!(normalize_key("./a/b.png"), "a/b.png");
        assert_eq!(normalize_key("/a/b.png"), "a/b.png");
        assert_eq!(normalize_key("a%2520b.png"), "a b.png");
        assert_eq!(normalize_key("Tom &amp; Jerry.pdf"), "tom & jerry.pdf");
    }

    #[test]
    fn test_normalize_key_homoglyphs() {
        assert_eq!(normalize_key("week\u{2013}1/it\u{2019}s.png"), "week-1/it's.png");
        assert_eq!(normalize_key("dir\\file.txt"), "dir/file.txt");
    }

    #[test]
    fn test_package_lookup_any_spelling() {
        let files = PackageFiles::new(vec![
            PackageFile::new("web_resources/My Image.png", vec![1, 2, 3]),
            PackageFile::new("imsmanifest.xml", "<manifest/>"),
        ]);

        assert!(files.contains("Web_Resources/my%20image.png"));
        assert!(files.contains("web_resources/My&#32;Image.png"));
        assert!(!files.contains("web_resources/other.png"));
        assert_eq!(files.manifest().unwrap().name, "imsmanifest.xml");
    }

    #[test]
    fn test_manifest_prefers_shallowest() {
        let files = PackageFiles::new(vec![
            PackageFile::new("nested/imsmanifest.xml", "<manifest/>"),
            PackageFile::new("IMSMANIFEST.XML", "<manifest/>"),
        ]);
        assert_eq!(files.manifest().unwrap().name, "IMSMANIFEST.XML");
    }

    #[test]
    fn test_mime_guessing() {
        assert!(PackageFile::new("a/b.HTML", "").is_html());
        assert!(PackageFile::new("quiz.xml", "").is_xml());
        assert!(PackageFile::new("pic.jpeg", "").is_image());
        assert!(PackageFile::new("clip.mp4", "").is_video());
        assert_eq!(mime_for_path("notes"), "application/octet-stream");
    }

    #[test]
    fn test_text_strips_bom() {
        let file = PackageFile::new("a.xml", b"\xEF\xBB\xBF<a/>".to_vec());
        assert_eq!(file.text(), "<a/>");
    }
}
