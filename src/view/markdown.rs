use std::panic::{self, AssertUnwindSafe};

use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag, TagEnd};

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("markdown renderer panicked")]
    Panicked,

    #[error("io error: {0:?}")]
    IO(#[from] std::io::Error),
}

/// Markdown to plain terminal text: headings keep their `#` marks, list
/// items get bullets, code blocks are indented.
pub fn to_terminal(markdown: &str) -> String {
    let mut out = String::new();
    let mut lists: Vec<Option<u64>> = vec![];
    let mut in_code_block = false;

    for event in Parser::new_ext(markdown, Options::ENABLE_STRIKETHROUGH) {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                out.push_str(&"#".repeat(heading_depth(level)));
                out.push(' ');
            }
            Event::End(TagEnd::Heading(_)) => out.push_str("\n\n"),
            Event::End(TagEnd::Paragraph) => {
                if lists.is_empty() {
                    out.push_str("\n\n");
                } else {
                    out.push('\n');
                }
            }
            Event::Start(Tag::List(start)) => lists.push(start),
            Event::End(TagEnd::List(_)) => {
                lists.pop();
                if lists.is_empty() {
                    out.push('\n');
                }
            }
            Event::Start(Tag::Item) => {
                let depth = lists.len().saturating_sub(1);
                out.push_str(&"  ".repeat(depth));
                match lists.last_mut() {
                    Some(Some(n)) => {
                        out.push_str(&format!("{n}. "));
                        *n += 1;
                    }
                    _ => out.push_str("- "),
                }
            }
            Event::End(TagEnd::Item) => {
                if !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            Event::Start(Tag::CodeBlock(kind)) => {
                in_code_block = true;
                if let CodeBlockKind::Fenced(lang) = kind {
                    if !lang.is_empty() {
                        out.push_str(&format!("[{lang}]\n"));
                    }
                }
            }
            Event::End(TagEnd::CodeBlock) => {
                in_code_block = false;
                out.push('\n');
            }
            Event::Text(text) if in_code_block => {
                for line in text.lines() {
                    out.push_str("    ");
                    out.push_str(line);
                    out.push('\n');
                }
            }
            Event::Text(text) => out.push_str(&text),
            Event::Code(code) => {
                out.push('`');
                out.push_str(&code);
                out.push('`');
            }
            Event::SoftBreak | Event::HardBreak => out.push('\n'),
            Event::Rule => out.push_str("----\n\n"),
            _ => {}
        }
    }

    out.trim_end().to_string()
}

fn heading_depth(level: HeadingLevel) -> usize {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

/// Renders `markdown`, catching any panic inside the renderer.
pub fn render(markdown: &str) -> Result<String, RenderError> {
    panic::catch_unwind(AssertUnwindSafe(|| to_terminal(markdown))).map_err(|_| RenderError::Panicked)
}

/// Rendered text, or the raw input if rendering failed.
pub fn render_or_plain(markdown: &str) -> String {
    match render(markdown) {
        Ok(text) => text,
        Err(err) => {
            log::warn!("falling back to plain text: {err}");
            markdown.to_string()
        }
    }
}
