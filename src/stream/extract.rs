//! File extraction from the generated document.
//!
//! The model writes each output file between two markers:
//!
//! ````text
//! ### FILE: client/main.lua
//! ```lua
//! print('hi')
//! ```
//! ### END FILE
//! ````
//!
//! Anything outside the markers is prose for the user and never becomes
//! file content.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Opening marker, followed by the path up to end-of-line.
pub const FILE_MARKER: &str = "### FILE: ";
/// Closing marker.
pub const END_FILE_MARKER: &str = "### END FILE";

static FILE_SECTION: Lazy<Regex> = Lazy::new(|| {
    let pattern = format!(
        r"{}([^\n]+?)\n((?s:.*?)){}",
        regex::escape(FILE_MARKER),
        regex::escape(END_FILE_MARKER)
    );
    Regex::new(&pattern).expect("file section pattern")
});
static FENCE_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\A```[0-9A-Za-z_]*\r?\n?").expect("fence open pattern"));
static FENCE_CLOSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\r?\n?```\z").expect("fence close pattern"));

/// Kind of file, derived from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileCategory {
    /// `.lua`
    Script,
    /// `.json`
    StructuredData,
    /// `.sql`
    QuerySchema,
    /// `.html`
    Markup,
    /// `.css`
    Stylesheet,
    /// `.js`
    LogicScript,
    Unspecified,
}

impl FileCategory {
    /// Category of a file name. Everything after the last `.` counts as the
    /// extension, case-insensitively.
    pub fn from_name(name: &str) -> Self {
        let ext = name.rsplit('.').next().unwrap_or_default().to_ascii_lowercase();
        match ext.as_str() {
            "lua" => FileCategory::Script,
            "json" => FileCategory::StructuredData,
            "sql" => FileCategory::QuerySchema,
            "html" => FileCategory::Markup,
            "css" => FileCategory::Stylesheet,
            "js" => FileCategory::LogicScript,
            _ => FileCategory::Unspecified,
        }
    }
}

/// One complete output file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedFile {
    pub name: String,
    pub path: String,
    pub content: String,
    pub category: FileCategory,
}

impl GeneratedFile {
    /// Builds a file record, deriving `name` and `category` from the path.
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        let path = path.into();
        let name = match path.rsplit('/').next() {
            Some(last) if !last.is_empty() => last.to_string(),
            _ => path.clone(),
        };
        let category = FileCategory::from_name(&name);
        Self {
            name,
            path,
            content: content.into(),
            category,
        }
    }
}

/// Trims a section body and removes a fenced code block wrapped around it.
/// Backticks anywhere else in the body are left alone.
pub fn strip_code_fence(raw: &str) -> String {
    let trimmed = raw.trim();
    let opened = FENCE_OPEN.replace(trimmed, "");
    FENCE_CLOSE.replace(&opened, "").into_owned()
}

/// A section found by a scan, with the byte offset just past its closing marker.
struct Section {
    file: GeneratedFile,
    end: usize,
}

fn scan_sections(text: &str) -> impl Iterator<Item = Section> + '_ {
    FILE_SECTION.captures_iter(text).filter_map(|caps| {
        let whole = caps.get(0)?;
        let path = caps.get(1)?.as_str().trim();
        let body = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
        let end = whole.end();
        if path.is_empty() {
            return None;
        }
        Some(Section {
            file: GeneratedFile::new(path, strip_code_fence(body)),
            end,
        })
    })
}

/// Every complete file section in `text`, in textual order. Sections whose
/// closing marker has not arrived yet are not included.
pub fn parse_file_sections(text: &str) -> Vec<GeneratedFile> {
    scan_sections(text).map(|s| s.file).collect()
}

/// What to do when a path shows up again later in the same stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// The first section for a path is final.
    FirstWins,
    /// A later section with different content is delivered again and
    /// replaces the earlier one.
    #[default]
    LatestWins,
}

/// Finds newly completed file sections in a growing document.
///
/// The document passed to [`scan`](Self::scan) must only ever grow. The
/// extractor resumes after the last complete section it has seen, so each
/// section is looked at once; `emitted` keeps the per-path guarantee.
#[derive(Debug, Default)]
pub struct FileExtractor {
    policy: DuplicatePolicy,
    scan_offset: usize,
    emitted: HashMap<String, String>,
}

impl FileExtractor {
    pub fn new(policy: DuplicatePolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// Returns the sections completed since the previous scan that should be
    /// reported, in textual order.
    pub fn scan(&mut self, full_text: &str) -> Vec<GeneratedFile> {
        let Some(tail) = full_text.get(self.scan_offset..) else {
            debug_assert!(false, "document shrank between scans");
            return Vec::new();
        };

        let base = self.scan_offset;
        let mut fresh = Vec::new();
        for section in scan_sections(tail) {
            self.scan_offset = base + section.end;
            if let Some(file) = self.admit(section.file) {
                fresh.push(file);
            }
        }
        fresh
    }

    /// Paths reported so far.
    pub fn emitted_paths(&self) -> impl Iterator<Item = &str> {
        self.emitted.keys().map(String::as_str)
    }

    pub fn has_emitted(&self, path: &str) -> bool {
        self.emitted.contains_key(path)
    }

    fn admit(&mut self, file: GeneratedFile) -> Option<GeneratedFile> {
        match self.emitted.get_mut(&file.path) {
            None => {
                self.emitted.insert(file.path.clone(), file.content.clone());
                Some(file)
            }
            Some(_) if self.policy == DuplicatePolicy::FirstWins => None,
            Some(previous) if *previous == file.content => None,
            Some(previous) => {
                previous.clone_from(&file.content);
                Some(file)
            }
        }
    }
}
