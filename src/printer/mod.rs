//! Printers: text and markdown (termimad), plus transcript rendering.

pub mod markdown;
pub mod transcript;

use owo_colors::OwoColorize;
use termimad::MadSkin;

pub use markdown::{MarkdownStreamer, Newlines};
pub use transcript::{markdown_table, render_transcript};

pub struct TextPrinter {
    pub color: Option<&'static str>,
}

impl TextPrinter {
    /// Status lines go to stderr so stdout stays machine-readable.
    pub fn eprint(&self, text: &str) {
        eprintln!("{}", self.paint(text));
    }

    fn paint(&self, text: &str) -> String {
        match self.color {
            Some("green") => text.green().to_string(),
            Some("cyan") => text.cyan().to_string(),
            Some("magenta") => text.magenta().to_string(),
            Some("yellow") => text.yellow().to_string(),
            Some("red") => text.red().to_string(),
            _ => text.to_string(),
        }
    }
}

#[derive(Default)]
pub struct MarkdownPrinter {
    pub skin: MadSkin,
}

impl MarkdownPrinter {
    pub fn print(&self, text: &str) {
        self.skin.print_text(text);
        println!();
    }
}

/// Prints Markdown either through termimad or raw, depending on the user's
/// `PRETTIFY_MARKDOWN` choice.
pub fn print_markdown(text: &str, prettify: bool) {
    if prettify {
        MarkdownPrinter::default().print(text);
    } else {
        print!("{text}");
        if !text.ends_with('\n') {
            println!();
        }
    }
}
