//! CommonMark structure of a report body: which fenced blocks are code chunks
//! and which code spans are inline expressions. Everything else, including
//! chunk syntax quoted inside other code blocks, is narrative.

use std::ops::Range;

use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag};

use super::inline::{self, InlineError};

const CHUNK_INFO: &str = "{python}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ChunkBlock {
    /// Byte range of the whole block, fences included.
    pub range: Range<usize>,
    pub content: String,
    pub closed: bool,
}

#[derive(Debug, Default)]
pub(crate) struct Markup {
    pub chunks: Vec<ChunkBlock>,
    pub inline: Vec<inline::Found>,
}

pub(crate) fn scan(text: &str) -> Result<Markup, InlineError> {
    let mut markup = Markup::default();
    // Every code block and code span, python or not.
    let mut code: Vec<Range<usize>> = Vec::new();
    let mut open: Option<ChunkBlock> = None;

    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    for (event, range) in Parser::new_ext(text, options).into_offset_iter() {
        match event {
            Event::Start(Tag::CodeBlock(kind)) => {
                code.push(range.clone());
                if is_chunk(&kind) {
                    open = Some(ChunkBlock {
                        closed: is_closed(&text[range.clone()]),
                        range,
                        content: String::new(),
                    });
                }
            }
            Event::Text(content) => {
                if let Some(chunk) = open.as_mut() {
                    chunk.content.push_str(&content);
                }
            }
            Event::End(Tag::CodeBlock(_)) => markup.chunks.extend(open.take()),
            Event::Code(content) => {
                code.push(range.clone());
                if let Some(found) = inline::expression(&content, range)? {
                    markup.inline.push(found);
                }
            }
            _ => {}
        }
    }

    // A tag the parser left as literal text has no closing backtick.
    let mut cursor = 0;
    while let Some(offset) = text[cursor..].find(inline::OPEN) {
        let at = cursor + offset;
        if !code.iter().any(|r| r.contains(&at)) {
            return Err(InlineError::Unterminated(at));
        }
        cursor = at + inline::OPEN.len();
    }
    Ok(markup)
}

fn is_chunk(kind: &CodeBlockKind<'_>) -> bool {
    matches!(kind, CodeBlockKind::Fenced(info) if info.trim() == CHUNK_INFO)
}

/// Whether the block's last line is a fence matching its opening one. An
/// unclosed fence runs to the end of its container.
fn is_closed(block: &str) -> bool {
    let strip = |line: &str| line.trim_start_matches([' ', '>']).trim_end().to_string();
    let mut lines = block.trim_end().lines();
    let Some(first) = lines.next().map(strip) else {
        return false;
    };
    let Some(fence) = first.chars().next() else {
        return false;
    };
    let width = first.len() - first.trim_start_matches(fence).len();
    lines
        .last()
        .map(strip)
        .is_some_and(|last| last.len() >= width && last.chars().all(|c| c == fence))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(text: &str) -> Vec<String> {
        scan(text).unwrap().chunks.into_iter().map(|c| c.content).collect()
    }

    #[test]
    fn backtick_and_tilde_chunks() {
        assert_eq!(chunks("```{python}\nx = 1\n```\n"), vec!["x = 1\n"]);
        assert_eq!(chunks("~~~{python}\ny = 2\n~~~\n"), vec!["y = 2\n"]);
    }

    #[test]
    fn chunk_syntax_quoted_in_other_blocks_is_not_a_chunk() {
        let tilde = "Example of chunk syntax:\n\n~~~markdown\n```{python}\nimport os\nos.remove('x')\n```\n~~~\n";
        assert!(chunks(tilde).is_empty());

        let indented = "Example:\n\n    ```{python}\n    import os\n    ```\n";
        assert!(chunks(indented).is_empty());

        let longer = "````markdown\n```{python}\n1 + 1\n```\n````\n";
        assert!(chunks(longer).is_empty());
    }

    #[test]
    fn other_languages_are_not_chunks() {
        assert!(chunks("```python\nx = 1\n```\n").is_empty());
        assert!(chunks("```{r}\nx <- 1\n```\n").is_empty());
    }

    #[test]
    fn fences_report_whether_they_close() {
        let markup = scan("```{python}\nx = 1\n```\n\n```{python}\ny = 2\n").unwrap();
        let closed: Vec<bool> = markup.chunks.iter().map(|c| c.closed).collect();
        assert_eq!(closed, vec![true, false]);
        assert_eq!(markup.chunks[1].range.start, 23);
    }

    #[test]
    fn inline_expressions_come_from_code_spans() {
        let text = "We kept `{python} len(df)` rows; `df.head()` peeks.";
        let markup = scan(text).unwrap();
        assert_eq!(markup.inline.len(), 1);
        assert_eq!(markup.inline[0].source, "len(df)");
        assert_eq!(&text[markup.inline[0].span.clone()], "`{python} len(df)`");
    }

    #[test]
    fn inline_tags_inside_code_blocks_are_text() {
        let text = "```\nwrite `{python} n` for values\n```\n\n    `{python} n`\n";
        let markup = scan(text).unwrap();
        assert!(markup.inline.is_empty());
    }

    #[test]
    fn unterminated_inline_tag_is_an_error() {
        assert_eq!(scan("value: `{python} len(df)").unwrap_err(), InlineError::Unterminated(7));
        assert_eq!(
            scan("a `{python} x\n\nnext paragraph `code`").unwrap_err(),
            InlineError::Unterminated(2)
        );
    }
}
