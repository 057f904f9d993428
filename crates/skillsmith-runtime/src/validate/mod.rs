//! Skill content validator (C11, spec §4.11): the quality gate every
//! ingested descriptor must clear before it is written to the catalog.
//!
//! The frontmatter parser here is deliberately not `serde_yaml`: spec §4.11
//! calls for a lenient, line-oriented subset (`key: value`, inline
//! `[a, b]` arrays, `- item` block arrays, `#` comments, quoted strings)
//! that skips a malformed line rather than failing the whole descriptor.
//! Splitting the frontmatter block out of the document is the ordinary
//! delimiter-splitting job; the parse of what's inside it is this
//! hand-rolled subset.

use pulldown_cmark::{Event, HeadingLevel, Parser, Tag, TagEnd};
use std::collections::HashMap;

pub const MIN_CONTENT_LENGTH: usize = 100;
pub const MIN_DESCRIPTION_LENGTH: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrontmatterValue {
    Scalar(String),
    List(Vec<String>),
}

impl FrontmatterValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Scalar(s) => Some(s),
            Self::List(_) => None,
        }
    }
}

pub type Frontmatter = HashMap<String, FrontmatterValue>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    Empty,
    TooShort { len: usize, min: usize },
    MissingFrontmatter,
    MissingTitle,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "content is empty"),
            Self::TooShort { len, min } => write!(f, "content is {len} chars, below the {min}-char minimum"),
            Self::MissingFrontmatter => write!(f, "required frontmatter is absent"),
            Self::MissingTitle => write!(f, "no H1 heading found in the content body"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationWarning {
    ShortDescription { len: usize, min: usize },
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ShortDescription { len, min } => {
                write!(f, "description is {len} chars, below the {min}-char recommendation")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
    pub metadata: Option<Frontmatter>,
    pub content_length: usize,
    pub has_title: bool,
    pub has_frontmatter: bool,
    pub title: Option<String>,
    pub body: String,
}

impl ValidationResult {
    pub fn passes_quality_gate(&self, strict: bool) -> bool {
        self.valid && (self.has_frontmatter || !strict)
    }

    pub fn name(&self, fallback: &str) -> String {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("name"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| self.title.clone())
            .unwrap_or_else(|| fallback.to_string())
    }

    pub fn description(&self) -> String {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("description"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_default()
    }
}

/// Options mirroring spec §4.11's named thresholds.
#[derive(Debug, Clone, Copy)]
pub struct ValidateOptions {
    pub min_content_length: usize,
    pub min_description_length: usize,
    pub require_frontmatter: bool,
}

impl Default for ValidateOptions {
    fn default() -> Self {
        Self {
            min_content_length: MIN_CONTENT_LENGTH,
            min_description_length: MIN_DESCRIPTION_LENGTH,
            require_frontmatter: false,
        }
    }
}

pub fn validate(raw: &str, options: ValidateOptions) -> ValidationResult {
    let trimmed = raw.trim();
    let content_length = trimmed.chars().count();
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if trimmed.is_empty() {
        errors.push(ValidationError::Empty);
        return ValidationResult {
            valid: false,
            errors,
            warnings,
            metadata: None,
            content_length: 0,
            has_title: false,
            has_frontmatter: false,
            title: None,
            body: String::new(),
        };
    }
    if content_length < options.min_content_length {
        errors.push(ValidationError::TooShort {
            len: content_length,
            min: options.min_content_length,
        });
    }

    let (metadata, body) = extract_frontmatter(trimmed);
    let has_frontmatter = metadata.is_some();
    if options.require_frontmatter && !has_frontmatter {
        errors.push(ValidationError::MissingFrontmatter);
    }

    if let Some(description) = metadata
        .as_ref()
        .and_then(|m| m.get("description"))
        .and_then(|v| v.as_str())
    {
        if description.chars().count() < options.min_description_length {
            warnings.push(ValidationWarning::ShortDescription {
                len: description.chars().count(),
                min: options.min_description_length,
            });
        }
    }

    let title = extract_h1(&body);
    let has_title = title.is_some();
    if !has_title {
        errors.push(ValidationError::MissingTitle);
    }

    ValidationResult {
        valid: errors.is_empty(),
        errors,
        warnings,
        metadata,
        content_length,
        has_title,
        has_frontmatter,
        title,
        body,
    }
}

/// Splits a leading `---`-delimited block from the body. An opening `---`
/// with no matching closing line is treated as "no frontmatter" rather than
/// an error, consistent with this validator never hard-failing on malformed
/// input.
fn extract_frontmatter(content: &str) -> (Option<Frontmatter>, String) {
    if !content.starts_with("---") {
        return (None, content.to_string());
    }
    let after_first = &content[3..];
    let Some(end_pos) = after_first.find("\n---") else {
        return (None, content.to_string());
    };
    let yaml_block = &after_first[..end_pos];
    let body_start = 3 + end_pos + 4;
    let body = if body_start < content.len() {
        content[body_start..].trim_start_matches(['\r', '\n']).to_string()
    } else {
        String::new()
    };
    (Some(parse_frontmatter_block(yaml_block)), body)
}

fn unquote(value: &str) -> String {
    let value = value.trim();
    if value.len() >= 2 {
        let bytes = value.as_bytes();
        if (bytes[0] == b'"' && bytes[value.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[value.len() - 1] == b'\'')
        {
            return value[1..value.len() - 1].to_string();
        }
    }
    value.to_string()
}

fn strip_comment(line: &str) -> &str {
    // Only strips a trailing comment when the `#` is not inside a quoted
    // string, so `description: "rate#limit helper"` is left intact.
    let mut in_single = false;
    let mut in_double = false;
    for (i, c) in line.char_indices() {
        match c {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '#' if !in_single && !in_double => return &line[..i],
            _ => {}
        }
    }
    line
}

fn parse_inline_array(value: &str) -> Vec<String> {
    value
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(|item| unquote(item.trim()))
        .filter(|item| !item.is_empty())
        .collect()
}

fn parse_frontmatter_block(block: &str) -> Frontmatter {
    let lines: Vec<&str> = block.lines().collect();
    let mut metadata = Frontmatter::new();
    let mut i = 0;
    while i < lines.len() {
        let raw_line = strip_comment(lines[i]);
        let line = raw_line.trim();
        i += 1;
        if line.is_empty() {
            continue;
        }
        let Some(colon_pos) = line.find(':') else {
            continue; // malformed line, ignored rather than failing
        };
        let key = line[..colon_pos].trim();
        if key.is_empty() || key.contains(' ') {
            continue;
        }
        let value = line[colon_pos + 1..].trim();

        if value.is_empty() {
            // Possible block array: collect subsequent `- item` lines.
            let mut items = Vec::new();
            while i < lines.len() {
                let next = strip_comment(lines[i]).trim();
                let Some(item) = next.strip_prefix("- ").or_else(|| next.strip_prefix("-")) else {
                    break;
                };
                items.push(unquote(item.trim()));
                i += 1;
            }
            if !items.is_empty() {
                metadata.insert(key.to_string(), FrontmatterValue::List(items));
            }
            continue;
        }

        if value.starts_with('[') && value.ends_with(']') {
            metadata.insert(key.to_string(), FrontmatterValue::List(parse_inline_array(value)));
        } else {
            metadata.insert(key.to_string(), FrontmatterValue::Scalar(unquote(value)));
        }
    }
    metadata
}

fn extract_h1(body: &str) -> Option<String> {
    let parser = Parser::new(body);
    let mut in_h1 = false;
    let mut title = String::new();
    for event in parser {
        match event {
            Event::Start(Tag::Heading { level: HeadingLevel::H1, .. }) => in_h1 = true,
            Event::End(TagEnd::Heading(HeadingLevel::H1)) => {
                if !title.is_empty() {
                    return Some(title.trim().to_string());
                }
                in_h1 = false;
            }
            Event::Text(text) if in_h1 => title.push_str(&text),
            Event::Code(text) if in_h1 => title.push_str(&text),
            _ => {}
        }
    }
    None
}

const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    ("security", &["security", "auth", "vulnerab", "secret", "encrypt", "cve"]),
    ("testing", &["test", "spec", "assert", "mock", "coverage"]),
    ("devops", &["deploy", "ci/cd", "pipeline", "kubernetes", "docker", "infra", "terraform"]),
    ("documentation", &["document", "readme", "docstring", "changelog"]),
    ("productivity", &["workflow", "automat", "shortcut", "template"]),
    ("integrations", &["api", "webhook", "integrat", "connector", "plugin"]),
    ("development", &["code", "refactor", "debug", "build", "compile", "lint"]),
];

/// Keyword-based categorization (SPEC_FULL.md supplement — spec.md's C11
/// contract stops at `{valid, errors, warnings, metadata, ...}`; ingestion
/// needs `Skill::categories` populated from somewhere, and this is the
/// natural place given the validator already has the full text in hand).
pub fn categorize(result: &ValidationResult) -> Vec<String> {
    let haystack = format!("{}\n{}", result.description(), result.body).to_lowercase();
    let mut hits: Vec<String> = CATEGORY_KEYWORDS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|kw| haystack.contains(kw)))
        .map(|(category, _)| category.to_string())
        .collect();
    if hits.is_empty() {
        hits.push("development".to_string());
    }
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pad(body: &str) -> String {
        format!("{body}{}", " filler".repeat(20))
    }

    #[test]
    fn empty_content_is_invalid() {
        let result = validate("", ValidateOptions::default());
        assert!(!result.valid);
        assert_eq!(result.errors, vec![ValidationError::Empty]);
    }

    #[test]
    fn well_formed_skill_md_is_valid_with_metadata() {
        let raw = pad(
            "---\nname: react-tester\ndescription: Write jest tests for React components with security checks\ntags: [react, testing]\n---\n\n# React Tester\n\nHelps write tests.",
        );
        let result = validate(&raw, ValidateOptions::default());
        assert!(result.valid, "{:?}", result.errors);
        assert!(result.has_frontmatter);
        assert_eq!(result.name("fallback"), "react-tester");
        let tags = result.metadata.as_ref().unwrap().get("tags").unwrap();
        assert_eq!(tags, &FrontmatterValue::List(vec!["react".into(), "testing".into()]));
        assert!(categorize(&result).contains(&"testing".to_string()));
    }

    #[test]
    fn block_array_is_parsed() {
        let raw = pad("---\nname: deployer\ndescription: Deploys things\ntools:\n- Read\n- Bash\n---\n\n# Deployer\n\nBody.");
        let result = validate(&raw, ValidateOptions::default());
        let tools = result.metadata.as_ref().unwrap().get("tools").unwrap();
        assert_eq!(tools, &FrontmatterValue::List(vec!["Read".into(), "Bash".into()]));
    }

    #[test]
    fn malformed_lines_are_skipped_not_fatal() {
        let raw = pad("---\nname: ok\nthis line has no colon\ndescription: fine\n---\n\n# Ok\n\nBody text.");
        let result = validate(&raw, ValidateOptions::default());
        assert!(result.valid, "{:?}", result.errors);
        assert_eq!(result.name("fallback"), "ok");
    }

    #[test]
    fn missing_frontmatter_only_fails_when_required() {
        let raw = pad("# Some Skill\n\nNo frontmatter here, just prose describing a skill.");
        let lenient = validate(&raw, ValidateOptions::default());
        assert!(lenient.valid);
        assert!(!lenient.has_frontmatter);

        let strict = validate(
            &raw,
            ValidateOptions { require_frontmatter: true, ..Default::default() },
        );
        assert!(!strict.valid);
        assert!(strict.errors.contains(&ValidationError::MissingFrontmatter));
    }

    #[test]
    fn missing_title_is_an_error() {
        let raw = pad("---\nname: headless\ndescription: A skill with frontmatter but no heading\n---\n\nJust a paragraph, no H1.");
        let result = validate(&raw, ValidateOptions::default());
        assert!(!result.valid);
        assert!(result.errors.contains(&ValidationError::MissingTitle));
    }

    #[test]
    fn short_description_is_a_warning_not_an_error() {
        let raw = pad("---\nname: terse\ndescription: short\n---\n\n# Terse\n\nBody text here.");
        let result = validate(&raw, ValidateOptions::default());
        assert!(result.valid);
        assert!(matches!(result.warnings[0], ValidationWarning::ShortDescription { .. }));
    }

    #[test]
    fn comment_inside_quoted_value_is_preserved() {
        let raw = pad("---\nname: rate-limiter\ndescription: \"rate#limit helper for APIs\"\n---\n\n# Rate Limiter\n\nBody.");
        let result = validate(&raw, ValidateOptions::default());
        assert_eq!(result.description(), "rate#limit helper for APIs");
    }
}
