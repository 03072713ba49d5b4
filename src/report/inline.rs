//! Inline expressions in narrative text: `` `{python} expr` ``.

use std::ops::Range;

const TAG: &str = "{python}";
pub(crate) const OPEN: &str = "`{python}";

/// One inline expression found in a piece of narrative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Found {
    /// Byte range of the whole tagged fragment, backticks included.
    pub span: Range<usize>,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub(crate) enum InlineError {
    #[error("inline expression at byte {0} is empty")]
    Empty(usize),
    #[error("inline expression at byte {0} is not closed with a backtick")]
    Unterminated(usize),
}

impl InlineError {
    pub(crate) fn offset(&self) -> usize {
        match self {
            Self::Empty(offset) | Self::Unterminated(offset) => *offset,
        }
    }
}

/// The expression in an inline code span, if the span is tagged. `span` is
/// the byte range of the span, backticks included.
pub(crate) fn expression(code: &str, span: Range<usize>) -> Result<Option<Found>, InlineError> {
    let Some(body) = code.strip_prefix(TAG) else {
        return Ok(None);
    };
    let source = body.trim();
    if source.is_empty() {
        return Err(InlineError::Empty(span.start));
    }
    Ok(Some(Found {
        span,
        source: source.to_string(),
    }))
}

/// Replace each span with its value. `replacements` must be sorted by span and
/// non-overlapping, as the markup scan produces them.
pub(crate) fn substitute(text: &str, replacements: &[(Range<usize>, &str)]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for (span, value) in replacements {
        out.push_str(&text[cursor..span.start]);
        out.push_str(value);
        cursor = span.end;
    }
    out.push_str(&text[cursor..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_spans_are_expressions() {
        let found = expression("{python}  len(df) ", 8..27).unwrap().unwrap();
        assert_eq!(found.source, "len(df)");
        assert_eq!(found.span, 8..27);
        assert_eq!(expression("df.head()", 0..11).unwrap(), None);
        assert_eq!(expression("{python}   ", 7..20), Err(InlineError::Empty(7)));
    }

    #[test]
    fn substitution_keeps_surrounding_text() {
        let text = "n = `{python} n`, mean = `{python} m`.";
        let out = substitute(text, &[(4..16, "3"), (25..37, "1.5")]);
        assert_eq!(out, "n = 3, mean = 1.5.");
    }
}
