//! Incremental Markdown output that keeps consecutive code writes in one
//! fenced block and manages the newlines between pieces.

/// Six backticks, so fences inside captured output cannot close the block.
pub const CODE_FENCE: &str = "``````";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Newlines {
    pub before: bool,
    pub after: bool,
}

impl Newlines {
    pub const NONE: Self = Self { before: false, after: false };
    pub const BEFORE: Self = Self { before: true, after: false };
    pub const AFTER: Self = Self { before: false, after: true };
    pub const BOTH: Self = Self { before: true, after: true };
}

pub struct MarkdownStreamer<F: FnMut(&str)> {
    sink: F,
    in_code_block: bool,
    last_ends_with_newline: bool,
}

impl<F: FnMut(&str)> MarkdownStreamer<F> {
    pub fn new(sink: F) -> Self {
        Self {
            sink,
            in_code_block: false,
            last_ends_with_newline: true,
        }
    }

    /// Plain Markdown. Closes an open code block first.
    pub fn md(&mut self, text: &str, newlines: Newlines) -> &mut Self {
        if text.is_empty() {
            return self;
        }
        if self.in_code_block {
            self.close_code_block();
        }
        self.send(text, newlines);
        self
    }

    /// Code block content. Consecutive calls share one block.
    pub fn code(&mut self, text: &str, newlines: Newlines) -> &mut Self {
        if text.is_empty() {
            return self;
        }
        if !self.in_code_block {
            self.send(&format!("\n{CODE_FENCE}\n"), Newlines::BEFORE);
            self.in_code_block = true;
        }
        self.send(text, newlines);
        self
    }

    pub fn close(&mut self) -> &mut Self {
        if self.in_code_block {
            self.close_code_block();
        }
        self
    }

    fn send(&mut self, text: &str, newlines: Newlines) {
        if newlines.before && !self.last_ends_with_newline && !text.starts_with('\n') {
            (self.sink)("\n");
            self.last_ends_with_newline = true;
        }
        (self.sink)(text);
        self.last_ends_with_newline = text.ends_with('\n');
        if newlines.after && !self.last_ends_with_newline {
            (self.sink)("\n");
            self.last_ends_with_newline = true;
        }
    }

    fn close_code_block(&mut self) {
        self.send(&format!("{CODE_FENCE}\n"), Newlines::BEFORE);
        self.in_code_block = false;
    }
}
