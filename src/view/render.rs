use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{IsTerminal, Stdout, Write};

use super::list::{ListState, Panel, PanelStatus, Row};
use super::markdown::{self, RenderError};
use crate::chat::{ChatMessage, MessageStatus, Role};
use crate::color::Rgb;

/// Presentation sink. Implementations must swallow their own failures;
/// nothing rendered here may take the list or a panel down.
pub trait Renderer {
    fn render_list(&self, state: &ListState, rows: &[Row]);

    /// Called on reveal and again for every change while visible.
    fn render_panel(&self, index: usize, title: &str, panel: &Panel);

    fn hide_panel(&self, index: usize);

    fn render_message(&self, index: usize, message: &ChatMessage);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Slot {
    Panel(usize),
    Message(usize),
}

/// Line-oriented output for a terminal.
///
/// Streaming text is appended in place: when the freshly rendered buffer
/// extends what was printed last time only the new suffix is written,
/// otherwise the block is printed again under its header.
pub struct TerminalRenderer<W: Write> {
    out: RefCell<W>,
    ansi: bool,
    printed: RefCell<HashMap<Slot, String>>,
}

impl TerminalRenderer<Stdout> {
    pub fn stdout() -> Self {
        let ansi = std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none();
        Self::new(std::io::stdout(), ansi)
    }
}

impl<W: Write> TerminalRenderer<W> {
    pub fn new(out: W, ansi: bool) -> Self {
        Self {
            out: RefCell::new(out),
            ansi,
            printed: RefCell::new(HashMap::new()),
        }
    }

    fn write(&self, text: &str) {
        let result: Result<(), RenderError> = (|| {
            let mut out = self.out.borrow_mut();
            out.write_all(text.as_bytes())?;
            out.flush()?;
            Ok(())
        })();

        if let Err(err) = result {
            log::warn!("render failed: {err}");
        }
    }

    /// `text` in the foreground color `hex`, or unchanged without ANSI support.
    pub fn paint(&self, hex: &str, text: &str) -> String {
        match Rgb::from_hex(hex) {
            Ok(rgb) if self.ansi => {
                format!("\x1b[38;2;{};{};{}m{text}\x1b[0m", rgb.r, rgb.g, rgb.b)
            }
            _ => text.to_string(),
        }
    }

    pub fn dim(&self, text: &str) -> String {
        if self.ansi {
            format!("\x1b[2m{text}\x1b[0m")
        } else {
            text.to_string()
        }
    }

    /// Prints `body` for `slot`, appending when possible. A finished block is
    /// closed with `footer` and forgotten.
    fn stream_block(&self, slot: Slot, header: &str, body: &str, finished: bool, footer: Option<&str>) {
        let rendered = markdown::render_or_plain(body);
        let mut printed = self.printed.borrow_mut();

        let mut chunk = String::new();
        match printed.get(&slot) {
            Some(previous) if rendered.starts_with(previous.as_str()) => {
                chunk.push_str(&rendered[previous.len()..]);
            }
            Some(_) => {
                chunk.push('\n');
                chunk.push_str(header);
                chunk.push('\n');
                chunk.push_str(&rendered);
            }
            None => {
                chunk.push_str(header);
                chunk.push('\n');
                chunk.push_str(&rendered);
            }
        }

        if finished {
            chunk.push('\n');
            if let Some(footer) = footer {
                chunk.push_str(&self.dim(footer));
                chunk.push('\n');
            }
            printed.remove(&slot);
        } else {
            printed.insert(slot, rendered);
        }

        drop(printed);
        self.write(&chunk);
    }
}

impl<W: Write> Renderer for TerminalRenderer<W> {
    fn render_list(&self, state: &ListState, rows: &[Row]) {
        self.printed
            .borrow_mut()
            .retain(|slot, _| !matches!(slot, Slot::Panel(_)));

        let text = match state {
            ListState::NoActiveDocument => "No active document.\n".to_string(),
            ListState::NotIndexed => {
                "This document is not indexed yet. Run `voyager index` on it first.\n".to_string()
            }
            ListState::Loading => "Loading similar documents...\n".to_string(),
            ListState::Empty => "No similar documents found.\n".to_string(),
            ListState::Failed(reason) => format!("Could not load similar documents: {reason}\n"),
            ListState::Ready => {
                let mut text = String::from("Similar documents\n");
                for (index, row) in rows.iter().enumerate() {
                    let marker = self.paint(&row.color, "●");
                    let title = self.paint(&row.color, &row.title);
                    text.push_str(&format!(
                        "{:>3}. {marker} {title} {}\n",
                        index + 1,
                        self.dim(&format!("{:.3}", row.score))
                    ));
                }
                text
            }
        };

        self.write(&text);
    }

    fn render_panel(&self, index: usize, title: &str, panel: &Panel) {
        let header = self.dim(&format!("── {}. {title} ──", index + 1));
        let (finished, footer) = match &panel.status {
            PanelStatus::Pending => {
                self.write(&format!("{header}\n{}", self.dim("loading summary...\n")));
                self.printed.borrow_mut().insert(Slot::Panel(index), String::new());
                return;
            }
            PanelStatus::Streaming => (false, None),
            PanelStatus::Complete => (true, None),
            PanelStatus::Cancelled => (true, Some("[summary cancelled]".to_string())),
            PanelStatus::Failed(reason) => (true, Some(format!("[incomplete: {reason}]"))),
        };

        self.stream_block(Slot::Panel(index), &header, &panel.text, finished, footer.as_deref());
    }

    fn hide_panel(&self, index: usize) {
        self.printed.borrow_mut().remove(&Slot::Panel(index));
    }

    fn render_message(&self, index: usize, message: &ChatMessage) {
        let header = match message.role {
            Role::User => self.dim("you>"),
            Role::Assistant => self.dim("voyager>"),
        };
        let (finished, footer) = match &message.status {
            MessageStatus::Streaming => (false, None),
            MessageStatus::Complete => (true, None),
            MessageStatus::Cancelled => (true, Some("[cancelled]".to_string())),
            MessageStatus::Failed(reason) => (true, Some(format!("[incomplete: {reason}]"))),
        };

        self.stream_block(Slot::Message(index), &header, &message.text, finished, footer.as_deref());
    }
}
