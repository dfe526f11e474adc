//! Script model
//!
//! A script is an immutable, ordered list of lines. Command lines carry the
//! command a parser resolved for them; everything else is a text line, which
//! is a label, a comment, a blank line or narrative text.

use sp_core::{COMMENT_MARKER, LABEL_MARKER};
use std::fmt;
use std::sync::Arc;

use crate::command::Command;

/// A loaded script
#[derive(Debug, Clone)]
pub struct Script {
    name: String,
    lines: Vec<Line>,
}

impl Script {
    pub fn new(name: impl Into<String>, lines: Vec<Line>) -> Self {
        Self {
            name: name.into(),
            lines,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    pub fn line(&self, index: usize) -> Option<&Line> {
        self.lines.get(index)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// One line of a script
#[derive(Debug, Clone)]
pub enum Line {
    Command(CommandLine),
    Text(TextLine),
}

impl Line {
    /// Shorthand for a text line
    pub fn text(text: impl Into<String>) -> Self {
        Line::Text(TextLine::new(text))
    }

    /// Shorthand for a command line with a resolved command
    pub fn command(command: Arc<dyn Command>, text: impl Into<String>) -> Self {
        Line::Command(CommandLine::new(command, text))
    }

    /// Source text of the line
    pub fn source(&self) -> &str {
        match self {
            Line::Command(line) => line.text(),
            Line::Text(line) => line.text(),
        }
    }

    /// Label name if this line declares one
    pub fn label(&self) -> Option<&str> {
        match self {
            Line::Text(line) => match line.kind() {
                TextKind::Label(name) => Some(name),
                _ => None,
            },
            Line::Command(_) => None,
        }
    }
}

/// A line that dispatches to a command
#[derive(Clone)]
pub struct CommandLine {
    command: Option<Arc<dyn Command>>,
    text: String,
}

impl CommandLine {
    pub fn new(command: Arc<dyn Command>, text: impl Into<String>) -> Self {
        Self {
            command: Some(command),
            text: text.into(),
        }
    }

    /// A command line whose keyword could not be resolved
    pub fn unresolved(text: impl Into<String>) -> Self {
        Self {
            command: None,
            text: text.into(),
        }
    }

    pub fn command(&self) -> Option<&Arc<dyn Command>> {
        self.command.as_ref()
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

impl fmt::Debug for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandLine")
            .field(
                "command_type",
                &self.command.as_ref().map(|c| c.command_type()),
            )
            .field("text", &self.text)
            .finish()
    }
}

/// A line without a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextLine {
    text: String,
}

/// What a text line means to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextKind<'a> {
    /// `#name`
    Label(&'a str),
    /// `// ...`
    Comment,
    Blank,
    /// Anything else, handed to the text presenter
    Narrative(&'a str),
}

impl TextLine {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn kind(&self) -> TextKind<'_> {
        let trimmed = self.text.trim();
        if trimmed.is_empty() {
            TextKind::Blank
        } else if trimmed.starts_with(COMMENT_MARKER) {
            TextKind::Comment
        } else if let Some(name) = trimmed.strip_prefix(LABEL_MARKER) {
            TextKind::Label(name.trim())
        } else {
            TextKind::Narrative(trimmed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_kinds() {
        assert_eq!(TextLine::new("#intro").kind(), TextKind::Label("intro"));
        assert_eq!(TextLine::new("  # spaced ").kind(), TextKind::Label("spaced"));
        assert_eq!(TextLine::new("// note").kind(), TextKind::Comment);
        assert_eq!(TextLine::new("   ").kind(), TextKind::Blank);
        assert_eq!(
            TextLine::new("Hello there.").kind(),
            TextKind::Narrative("Hello there.")
        );
    }

    #[test]
    fn test_empty_label_name() {
        assert_eq!(TextLine::new("#").kind(), TextKind::Label(""));
    }

    #[test]
    fn test_script_accessors() {
        let script = Script::new(
            "demo",
            vec![Line::text("#start"), Line::text("hi"), Line::text("// end")],
        );

        assert_eq!(script.name(), "demo");
        assert_eq!(script.len(), 3);
        assert_eq!(script.line(0).and_then(Line::label), Some("start"));
        assert_eq!(script.line(1).map(Line::source), Some("hi"));
        assert!(script.line(3).is_none());
    }

    #[test]
    fn test_unresolved_command_line() {
        let line = CommandLine::unresolved("@dance wildly");
        assert!(line.command().is_none());
        assert_eq!(line.text(), "@dance wildly");
        assert!(format!("{:?}", line).contains("None"));
    }
}
