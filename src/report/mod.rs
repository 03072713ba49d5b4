//! Report documents: narrative prose interleaved with executable code chunks.
//!
//! The source format is Quarto-flavoured markdown. Code chunks are fenced as
//! ```` ```{python} ````, optionally named by a leading `#| label: name` line,
//! and narrative may embed inline expressions written `` `{python} expr` ``.
//! Inline expressions stay source: they are evaluated against the document's
//! own execution, never frozen into literals.
//!
//! An inline expression belongs to the nearest code chunk above it and is
//! evaluated right after that chunk runs.

use std::{borrow::Cow, collections::HashSet, fmt, ops::Range};

use crate::{
    execution::{ErrorInfo, ExecutionResult},
    session::SessionError,
};

pub mod compiler;
pub mod disclaimer;
mod inline;
mod markup;
mod references;
pub mod synthesizer;

pub use compiler::{CompileError, CompiledDocument, DocumentCompiler, ExternalCompiler};
pub use disclaimer::DISCLAIMER;
pub use synthesizer::{
    ChunkTrace, FailureSummary, ReportSynthesizer, ResolvedInline, Synthesis, ValidationReport,
    VerifiedSource,
};

const CHUNK_OPEN: &str = "```{python}";
const FENCE: &str = "```";

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("malformed document ({location}): {message}")]
    Parse { location: String, message: String },

    #[error(
        "chunk `{chunk}` uses {}, which nothing earlier in the document defines or loads",
        .names.join(", ")
    )]
    UnresolvedReference { chunk: String, names: Vec<String> },

    #[error("chunk `{chunk}` does not parse: {}", .error.headline())]
    Syntax {
        chunk: String,
        fragment: String,
        error: ErrorInfo,
    },

    #[error("chunk `{chunk}` failed in a fresh session: {}", headline(.result))]
    Runtime {
        chunk: String,
        fragment: String,
        result: Box<ExecutionResult>,
    },

    #[error("inline expression `{expression}` after chunk `{chunk}` produced no displayable value")]
    InlineWithoutValue { chunk: String, expression: String },

    #[error("validation session failed: {0}")]
    Session(#[from] SessionError),
}

fn headline(result: &ExecutionResult) -> String {
    result.error().map(ErrorInfo::headline).unwrap_or_default()
}

impl ValidationError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Parse { .. } => "parse",
            Self::UnresolvedReference { .. } => "unresolved_reference",
            Self::Syntax { .. } => "syntax",
            Self::Runtime { .. } => "runtime",
            Self::InlineWithoutValue { .. } => "inline_without_value",
            Self::Session(_) => "session",
        }
    }

    /// The chunk the failure is attributed to, if any.
    pub fn chunk(&self) -> Option<&str> {
        match self {
            Self::UnresolvedReference { chunk, .. }
            | Self::Syntax { chunk, .. }
            | Self::Runtime { chunk, .. }
            | Self::InlineWithoutValue { chunk, .. } => Some(chunk),
            Self::Parse { .. } | Self::Session(_) => None,
        }
    }

    fn parse(location: Location, message: impl Into<String>) -> Self {
        Self::Parse {
            location: location.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Location {
    Line(usize),
    Section(usize),
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Line(n) => write!(f, "line {n}"),
            Self::Section(n) => write!(f, "section {n}"),
        }
    }
}

impl Location {
    /// The location `lines` lines further down, for line locations.
    fn advance(self, lines: usize) -> Self {
        match self {
            Self::Line(n) => Self::Line(n + lines),
            other => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineExpression {
    source: String,
    /// Index of the narrative section holding the expression.
    section: usize,
    /// Byte range of the tagged fragment within that narrative.
    span: Range<usize>,
}

impl InlineExpression {
    pub fn source(&self) -> &str {
        &self.source
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeChunk {
    label: String,
    explicit_label: bool,
    /// `#|` option lines other than the label, verbatim.
    options: Vec<String>,
    source: String,
    inline: Vec<InlineExpression>,
}

impl CodeChunk {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Inline expressions evaluated against the state this chunk leaves behind.
    pub fn inline(&self) -> &[InlineExpression] {
        &self.inline
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Section {
    Narrative(String),
    Code(CodeChunk),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportDocument {
    front_matter: Option<String>,
    sections: Vec<Section>,
}

/// A section before labels are assigned and inline expressions attached.
enum Raw {
    Narrative {
        text: String,
        at: Location,
    },
    Code {
        label: Option<String>,
        options: Vec<String>,
        source: String,
        at: Location,
    },
}

impl ReportDocument {
    pub fn parse(text: &str) -> Result<Self, ValidationError> {
        let (front_matter, body) = split_front_matter(text)?;
        let body = disclaimer::strip(body);
        let first_line = text[..text.len() - body.len()].matches('\n').count() + 1;
        let line_at = |offset: usize| Location::Line(first_line + body[..offset].matches('\n').count());

        let markup = markup::scan(body)
            .map_err(|e| ValidationError::parse(line_at(e.offset()), e.to_string()))?;
        let mut raw = Vec::new();
        let mut cursor = 0;
        for chunk in markup.chunks {
            let at = line_at(chunk.range.start);
            if !chunk.closed {
                return Err(ValidationError::parse(at, "code chunk is never closed"));
            }
            push_narrative(&mut raw, &body[cursor..chunk.range.start], line_at(cursor));
            let lines: Vec<&str> = chunk.content.split_inclusive('\n').collect();
            let (label, options, source) = split_chunk(&lines);
            raw.push(Raw::Code {
                label,
                options,
                source,
                at,
            });
            cursor = chunk.range.end;
        }
        push_narrative(&mut raw, &body[cursor..], line_at(cursor));

        assemble(front_matter, raw)
    }

    pub fn front_matter(&self) -> Option<&str> {
        self.front_matter.as_deref()
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn chunks(&self) -> impl Iterator<Item = &CodeChunk> {
        self.sections.iter().filter_map(|s| match s {
            Section::Code(chunk) => Some(chunk),
            Section::Narrative(_) => None,
        })
    }

    /// Every inline expression in document order, with the chunk it follows.
    pub fn inline_expressions(&self) -> impl Iterator<Item = (&CodeChunk, &InlineExpression)> {
        self.chunks()
            .flat_map(|chunk| chunk.inline.iter().map(move |expr| (chunk, expr)))
    }

    /// The document source, disclaimer first. Inline expressions stay source.
    pub fn render(&self) -> String {
        self.render_with(|_, text| Cow::Borrowed(text))
    }

    /// A preview where every inline expression is replaced by its value from
    /// `resolved` (document order, as validation produces it). Expressions
    /// without a matching value are left as source.
    pub fn resolve_inline(&self, resolved: &[ResolvedInline]) -> String {
        let mut values = resolved.iter();
        let mut per_section: Vec<(usize, Range<usize>, &str)> = Vec::new();
        for (_, expr) in self.inline_expressions() {
            match values.next() {
                Some(value) if value.expression == expr.source => {
                    per_section.push((expr.section, expr.span.clone(), value.value.as_str()));
                }
                _ => break,
            }
        }
        self.render_with(|section, text| {
            let replacements: Vec<(Range<usize>, &str)> = per_section
                .iter()
                .filter(|(s, _, _)| *s == section)
                .map(|(_, span, value)| (span.clone(), *value))
                .collect();
            if replacements.is_empty() {
                Cow::Borrowed(text)
            } else {
                Cow::Owned(inline::substitute(text, &replacements))
            }
        })
    }

    fn render_with<'a>(&'a self, narrative: impl Fn(usize, &'a str) -> Cow<'a, str>) -> String {
        let mut out = String::new();
        if let Some(front) = &self.front_matter {
            out.push_str("---\n");
            out.push_str(front);
            if !front.ends_with('\n') {
                out.push('\n');
            }
            out.push_str("---\n\n");
        }
        out.push_str(DISCLAIMER);
        out.push_str("\n\n");

        for (index, section) in self.sections.iter().enumerate() {
            match section {
                Section::Narrative(text) => {
                    out.push_str(&narrative(index, text));
                    out.push_str("\n\n");
                }
                Section::Code(chunk) => {
                    out.push_str(CHUNK_OPEN);
                    out.push('\n');
                    if chunk.explicit_label {
                        out.push_str(&format!("#| label: {}\n", chunk.label));
                    }
                    for option in &chunk.options {
                        out.push_str(option);
                        out.push('\n');
                    }
                    if !chunk.source.is_empty() {
                        out.push_str(&chunk.source);
                        out.push('\n');
                    }
                    out.push_str(FENCE);
                    out.push_str("\n\n");
                }
            }
        }
        while out.ends_with("\n\n") {
            out.pop();
        }
        out
    }
}

fn is_closing_fence(line: &str) -> bool {
    let line = line.trim();
    line.len() >= FENCE.len() && line.chars().all(|c| c == '`')
}

fn split_front_matter(text: &str) -> Result<(Option<String>, &str), ValidationError> {
    let Some(rest) = text.strip_prefix("---\n").or_else(|| text.strip_prefix("---\r\n")) else {
        return Ok((None, text));
    };
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let front = rest[..offset].to_string();
            return Ok((Some(front), &rest[offset + line.len()..]));
        }
        offset += line.len();
    }
    Err(ValidationError::parse(Location::Line(1), "front matter is never closed"))
}

/// Leading `#|` lines are chunk options; `label` names the chunk.
fn split_chunk(lines: &[&str]) -> (Option<String>, Vec<String>, String) {
    let mut label = None;
    let mut options = Vec::new();
    let mut body_start = 0;
    for line in lines {
        let Some(option) = line.trim_start().strip_prefix("#|") else {
            break;
        };
        body_start += 1;
        match option.trim().strip_prefix("label:") {
            Some(name) if !name.trim().is_empty() => label = Some(name.trim().to_string()),
            _ => options.push(line.trim_end().to_string()),
        }
    }
    let mut source: String = lines[body_start..].concat();
    while source.ends_with('\n') || source.ends_with('\r') {
        source.pop();
    }
    (label, options, source)
}

fn push_narrative(raw: &mut Vec<Raw>, text: &str, at: Location) {
    let leading = text.len() - text.trim_start_matches(['\n', '\r']).len();
    let skipped = text[..leading].matches('\n').count();
    let trimmed = text.trim_matches(['\n', '\r']);
    if !trimmed.trim().is_empty() {
        raw.push(Raw::Narrative {
            text: trimmed.to_string(),
            at: at.advance(skipped),
        });
    }
}

fn assemble(front_matter: Option<String>, raw: Vec<Raw>) -> Result<ReportDocument, ValidationError> {
    let mut sections = Vec::with_capacity(raw.len());
    let mut labels = HashSet::new();
    let mut chunk_count = 0;
    let mut last_chunk: Option<usize> = None;

    for item in raw {
        match item {
            Raw::Code {
                label,
                options,
                source,
                at,
            } => {
                chunk_count += 1;
                let (label, explicit_label) = match label {
                    Some(label) => (label, true),
                    None => (format!("chunk-{chunk_count}"), false),
                };
                if !labels.insert(label.clone()) {
                    return Err(ValidationError::parse(at, format!("duplicate chunk label `{label}`")));
                }
                sections.push(Section::Code(CodeChunk {
                    label,
                    explicit_label,
                    options,
                    source,
                    inline: Vec::new(),
                }));
                last_chunk = Some(sections.len() - 1);
            }
            Raw::Narrative { text, at } => {
                let index = sections.len();
                let markup = markup::scan(&text).map_err(|e| {
                    let line = text[..e.offset()].matches('\n').count();
                    ValidationError::parse(at.advance(line), e.to_string())
                })?;
                if !markup.chunks.is_empty() {
                    return Err(ValidationError::parse(at, "narrative contains a code chunk"));
                }
                let found = markup.inline;
                if let Some(first) = found.first() {
                    let owner = last_chunk.and_then(|i| match &mut sections[i] {
                        Section::Code(chunk) => Some(chunk),
                        Section::Narrative(_) => None,
                    });
                    let Some(chunk) = owner else {
                        return Err(ValidationError::parse(
                            at,
                            format!("inline expression `{}` appears before any code chunk", first.source),
                        ));
                    };
                    chunk.inline.extend(found.into_iter().map(|f| InlineExpression {
                        source: f.source,
                        section: index,
                        span: f.span,
                    }));
                }
                sections.push(Section::Narrative(text));
            }
        }
    }

    Ok(ReportDocument {
        front_matter,
        sections,
    })
}

/// Incremental authoring, one section at a time.
#[derive(Default)]
pub struct ReportBuilder {
    front_matter: Option<String>,
    raw: Vec<Raw>,
}

impl ReportBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// YAML front matter, without the `---` delimiters.
    pub fn front_matter(mut self, yaml: impl Into<String>) -> Self {
        self.front_matter = Some(yaml.into());
        self
    }

    pub fn narrative(mut self, text: impl Into<String>) -> Self {
        let at = Location::Section(self.raw.len() + 1);
        let text = text.into();
        let text = text.trim_matches(['\n', '\r']);
        if !text.trim().is_empty() {
            self.raw.push(Raw::Narrative {
                text: text.to_string(),
                at,
            });
        }
        self
    }

    pub fn code(self, source: impl Into<String>) -> Self {
        self.push_code(None, source.into())
    }

    pub fn labelled_code(self, label: impl Into<String>, source: impl Into<String>) -> Self {
        self.push_code(Some(label.into()), source.into())
    }

    fn push_code(mut self, label: Option<String>, source: String) -> Self {
        let at = Location::Section(self.raw.len() + 1);
        let source = source.trim_end_matches(['\n', '\r']).to_string();
        self.raw.push(Raw::Code {
            label,
            options: Vec::new(),
            source,
            at,
        });
        self
    }

    /// Fails on anything that would not read back as the same document.
    pub fn build(self) -> Result<ReportDocument, ValidationError> {
        for item in &self.raw {
            if let Raw::Code { source, at, label, .. } = item {
                if source.lines().any(is_closing_fence) {
                    return Err(ValidationError::parse(*at, "code contains a closing fence"));
                }
                if label.as_deref().is_some_and(|l| l.trim().is_empty() || l.contains(char::is_whitespace)) {
                    return Err(ValidationError::parse(*at, "chunk labels must be single words"));
                }
            }
        }
        let document = assemble(self.front_matter, self.raw)?;

        // Narrative can still change the structure around it, e.g. by opening
        // a fence it never closes.
        let reparsed = ReportDocument::parse(&document.render())?;
        if reparsed != document {
            let section = reparsed
                .sections
                .iter()
                .zip(&document.sections)
                .position(|(a, b)| a != b)
                .unwrap_or_else(|| reparsed.sections.len().min(document.sections.len()));
            return Err(ValidationError::parse(
                Location::Section(section + 1),
                "section does not read back as written",
            ));
        }
        Ok(document)
    }
}
