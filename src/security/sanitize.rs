//! Input sanitization.
//!
//! HTML goes through `ammonia` with one of three allow-list presets. URLs,
//! filenames, CSV cells, emails and search queries have their own rules.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::SanitizerConfig;
use crate::error::GuardError;
use crate::observability::metrics;

/// HTML allow-list presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HtmlPreset {
    /// Block and inline formatting, lists, tables and links.
    RichText,
    /// Inline formatting only.
    Basic,
    /// No markup at all.
    PlainText,
}

const RICH_TEXT_TAGS: &[&str] = &[
    "p", "br", "hr", "strong", "b", "em", "i", "u", "s", "sub", "sup", "h1", "h2", "h3", "h4",
    "h5", "h6", "ul", "ol", "li", "blockquote", "code", "pre", "a", "span", "table", "thead",
    "tbody", "tr", "th", "td",
];

const BASIC_TAGS: &[&str] = &["p", "br", "strong", "b", "em", "i", "u"];

const LINK_SCHEMES: &[&str] = &["http", "https", "mailto", "tel"];

const BLOCKED_SCHEMES: &[&str] = &["javascript:", "vbscript:", "data:", "file:", "blob:"];

/// Sanitize HTML with the given preset.
pub fn sanitize_html(input: &str, preset: HtmlPreset) -> String {
    match preset {
        HtmlPreset::RichText => {
            let tags: HashSet<&str> = RICH_TEXT_TAGS.iter().copied().collect();
            let mut tag_attributes = HashMap::new();
            tag_attributes.insert("a", HashSet::from(["href", "title", "target"]));
            tag_attributes.insert("td", HashSet::from(["colspan", "rowspan"]));
            tag_attributes.insert("th", HashSet::from(["colspan", "rowspan"]));

            ammonia::Builder::default()
                .tags(tags)
                .tag_attributes(tag_attributes)
                .generic_attributes(HashSet::new())
                .url_schemes(LINK_SCHEMES.iter().copied().collect())
                .link_rel(Some("noopener noreferrer"))
                .clean(input)
                .to_string()
        }
        HtmlPreset::Basic => ammonia::Builder::default()
            .tags(BASIC_TAGS.iter().copied().collect())
            .tag_attributes(HashMap::new())
            .generic_attributes(HashSet::new())
            .clean(input)
            .to_string(),
        HtmlPreset::PlainText => ammonia::Builder::empty()
            .clean_content_tags(HashSet::from(["script", "style"]))
            .clean(input)
            .to_string(),
    }
}

/// Rich-text sanitization for user-authored content.
pub fn sanitize_html_content(input: &str) -> String {
    sanitize_html(input, HtmlPreset::RichText)
}

/// Remove all markup, keeping text.
pub fn strip_html(input: &str) -> String {
    sanitize_html(input, HtmlPreset::PlainText)
}

/// Entity-escape text for insertion into HTML.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '/' => out.push_str("&#x2F;"),
            _ => out.push(c),
        }
    }
    out
}

/// Decode the character references a browser resolves inside attribute
/// values: decimal, hex, and the named ones that can hide a scheme.
fn decode_entities(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        match ENTITY_RE.captures(rest) {
            Some(caps) => {
                let decoded = if let Some(hex) = caps.name("hex") {
                    u32::from_str_radix(hex.as_str(), 16).ok().and_then(char::from_u32)
                } else if let Some(dec) = caps.name("dec") {
                    dec.as_str().parse::<u32>().ok().and_then(char::from_u32)
                } else {
                    caps.name("named").and_then(|n| match n.as_str().to_ascii_lowercase().as_str() {
                        "colon" => Some(':'),
                        "tab" => Some('\t'),
                        "newline" => Some('\n'),
                        "sol" => Some('/'),
                        "quest" => Some('?'),
                        "num" => Some('#'),
                        "amp" => Some('&'),
                        _ => None,
                    })
                };
                let matched = caps.get(0).map_or(1, |m| m.len());
                match decoded {
                    Some(c) => out.push(c),
                    None => out.push_str(&rest[..matched]),
                }
                rest = &rest[matched..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

static ENTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^&(?:#[xX](?P<hex>[0-9a-fA-F]{1,6});?|#(?P<dec>[0-9]{1,7});?|(?P<named>[a-zA-Z]+);)")
        .expect("entity regex is valid")
});

/// Return the URL if it is safe to place in an `href`/`src`.
///
/// Absolute URLs must use `http`, `https`, `mailto` or `tel`; relative URLs
/// pass. Anything that looks like a scheme but fails to parse is rejected.
pub fn sanitize_url(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    let probe: String = decode_entities(trimmed)
        .chars()
        .filter(|c| !c.is_control() && !c.is_whitespace())
        .collect::<String>()
        .to_ascii_lowercase();
    if BLOCKED_SCHEMES.iter().any(|scheme| probe.starts_with(scheme)) {
        return None;
    }

    match url::Url::parse(trimmed) {
        Ok(url) if LINK_SCHEMES.contains(&url.scheme()) => Some(trimmed.to_string()),
        Ok(_) => None,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            if probe.starts_with('#') {
                return Some(trimmed.to_string());
            }
            // A colon before any path or query delimiter means an unparsable
            // scheme, e.g. an entity-encoded "javascript:". An entity left in
            // the head may still decode to one in the browser.
            let head = trimmed.split(['/', '?']).next().unwrap_or_default();
            let probe_head = probe.split(['/', '?']).next().unwrap_or_default();
            if probe_head.contains(':') || head.contains('&') {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Err(_) => None,
    }
}

const RESERVED_FILENAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Reduce an uploaded filename to a safe single path component.
pub fn sanitize_filename(input: &str, max_length: usize) -> String {
    let base = input.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .filter(|c| !c.is_control() && !matches!(c, '<' | '>' | ':' | '"' | '|' | '?' | '*'))
        .collect();
    let trimmed = cleaned.trim_matches(|c: char| c == '.' || c.is_whitespace());
    if trimmed.is_empty() {
        return "unnamed".to_string();
    }

    let mut name = trimmed.to_string();
    let stem = name.split('.').next().unwrap_or_default().to_ascii_uppercase();
    if RESERVED_FILENAMES.contains(&stem.as_str()) {
        name.insert(0, '_');
    }

    truncate_filename(&name, max_length)
}

fn truncate_filename(name: &str, max_length: usize) -> String {
    let total = name.chars().count();
    if total <= max_length {
        return name.to_string();
    }

    let ext = name
        .rfind('.')
        .map(|idx| &name[idx..])
        .filter(|ext| ext.chars().count() <= max_length / 2)
        .unwrap_or("");
    let stem_len = name.chars().count() - ext.chars().count();
    let keep = max_length - ext.chars().count();
    let stem: String = name.chars().take(stem_len.min(keep)).collect();
    format!("{stem}{ext}")
}

/// Neutralise spreadsheet formula injection and quote the cell when needed.
pub fn sanitize_csv_cell(input: &str) -> String {
    let mut cell = String::with_capacity(input.len() + 3);
    if input.starts_with(&['=', '+', '-', '@', '\t', '\r'][..]) {
        cell.push('\'');
    }
    cell.push_str(input);

    if cell.contains(&[',', '"', '\n', '\r'][..]) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell
    }
}

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9._%+-]+@[a-z0-9](?:[a-z0-9-]*[a-z0-9])?(?:\.[a-z0-9](?:[a-z0-9-]*[a-z0-9])?)*\.[a-z]{2,}$")
        .expect("email regex is valid")
});

/// Normalise an email address, rejecting malformed ones.
pub fn sanitize_email(input: &str) -> Option<String> {
    let email = input.trim().to_ascii_lowercase();
    if email.len() > 254 || !EMAIL_RE.is_match(&email) {
        return None;
    }
    Some(email)
}

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("tag regex is valid"));

static SEARCH_META_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[<>{}\[\]\\^$|*+?()"';`]"#).expect("search regex is valid"));

/// Strip markup and query metacharacters from free-text search input.
pub fn sanitize_search_query(input: &str, max_length: usize) -> String {
    let without_tags = TAG_RE.replace_all(input, " ");
    let without_meta = SEARCH_META_RE.replace_all(&without_tags, " ");
    let collapsed = without_meta.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(max_length).collect::<String>().trim_end().to_string()
}

/// Strip markup from every string in a JSON value, keys included.
pub fn sanitize_json(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(strip_html(&s)),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_json).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (strip_html(&k), sanitize_json(v)))
                .collect(),
        ),
        other => other,
    }
}

static SUSPICIOUS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)<\s*(script|iframe|object|embed)\b|(javascript|vbscript)\s*:|data\s*:\s*text/html|<[^>]*\bon[a-z]+\s*=",
    )
    .expect("suspicious content regex is valid")
});

/// Heuristic check for script injection attempts.
pub fn contains_suspicious_content(input: &str) -> bool {
    SUSPICIOUS_RE.is_match(input)
}

/// What kind of value is being sanitized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SanitizeKind {
    #[serde(alias = "rich_text")]
    Html,
    Basic,
    PlainText,
    Url,
    Filename,
    CsvCell,
    Email,
    Search,
}

impl SanitizeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SanitizeKind::Html => "html",
            SanitizeKind::Basic => "basic",
            SanitizeKind::PlainText => "plain_text",
            SanitizeKind::Url => "url",
            SanitizeKind::Filename => "filename",
            SanitizeKind::CsvCell => "csv_cell",
            SanitizeKind::Email => "email",
            SanitizeKind::Search => "search",
        }
    }
}

impl fmt::Display for SanitizeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SanitizeKind {
    type Err = GuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "html" | "rich_text" => Ok(SanitizeKind::Html),
            "basic" => Ok(SanitizeKind::Basic),
            "plain_text" | "text" => Ok(SanitizeKind::PlainText),
            "url" => Ok(SanitizeKind::Url),
            "filename" => Ok(SanitizeKind::Filename),
            "csv_cell" | "csv" => Ok(SanitizeKind::CsvCell),
            "email" => Ok(SanitizeKind::Email),
            "search" => Ok(SanitizeKind::Search),
            other => Err(GuardError::InvalidInput(format!("unknown sanitize kind '{other}'"))),
        }
    }
}

/// Sanitizer bound to configured limits.
#[derive(Debug, Clone, Default)]
pub struct Sanitizer {
    config: SanitizerConfig,
}

impl Sanitizer {
    pub fn new(config: SanitizerConfig) -> Self {
        Self { config }
    }

    pub fn filename(&self, input: &str) -> String {
        sanitize_filename(input, self.config.max_filename_length)
    }

    pub fn search_query(&self, input: &str) -> String {
        sanitize_search_query(input, self.config.max_search_query_length)
    }

    /// Sanitize `input` as `kind`. URLs and emails that cannot be made safe
    /// are rejected rather than emptied.
    pub fn sanitize(&self, kind: SanitizeKind, input: &str) -> Result<String, GuardError> {
        if contains_suspicious_content(input) {
            tracing::warn!(kind = %kind, len = input.len(), "Suspicious content in input");
        }
        metrics::record_sanitized(kind.as_str());

        match kind {
            SanitizeKind::Html => Ok(sanitize_html(input, HtmlPreset::RichText)),
            SanitizeKind::Basic => Ok(sanitize_html(input, HtmlPreset::Basic)),
            SanitizeKind::PlainText => Ok(strip_html(input)),
            SanitizeKind::Url => sanitize_url(input)
                .ok_or_else(|| GuardError::InvalidInput("unsafe or malformed URL".into())),
            SanitizeKind::Filename => Ok(self.filename(input)),
            SanitizeKind::CsvCell => Ok(sanitize_csv_cell(input)),
            SanitizeKind::Email => sanitize_email(input)
                .ok_or_else(|| GuardError::InvalidInput("malformed email address".into())),
            SanitizeKind::Search => Ok(self.search_query(input)),
        }
    }
}
