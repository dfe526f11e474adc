//! Script text parser
//!
//! One source line becomes one script line. Lines starting with `@` are
//! command lines: the word after the marker picks a factory from the
//! registry and the rest of the line is handed to it. Unknown keywords
//! yield unresolved command lines, which preprocessing reports.

use std::collections::HashMap;
use std::sync::Arc;

use crate::builtin::{
    CallScript, ClearVariables, Gosub, Jump, Log, Return, SetVariable, Stop, Wait,
};
use crate::command::Command;
use crate::loader::LoaderError;
use crate::script::{CommandLine, Line, Script};

/// Marker that starts a command line
pub const COMMAND_MARKER: char = '@';

/// Builds a command from the arguments following its keyword
pub type CommandFactory = Arc<dyn Fn(&str) -> Result<Arc<dyn Command>, String> + Send + Sync>;

#[derive(Default)]
pub struct ScriptParser {
    factories: HashMap<String, CommandFactory>,
}

impl ScriptParser {
    /// Parser without any command keywords
    pub fn new() -> Self {
        Self::default()
    }

    /// Parser that knows the built-in commands
    pub fn with_builtins() -> Self {
        let mut parser = Self::new();
        parser.register("set", |args| Ok(Arc::new(SetVariable::parse(args)?)));
        parser.register("clear", |_| Ok(Arc::new(ClearVariables)));
        parser.register("jump", |args| Ok(Arc::new(Jump::parse(args)?)));
        parser.register("gosub", |args| Ok(Arc::new(Gosub::parse(args)?)));
        parser.register("return", |_| Ok(Arc::new(Return)));
        parser.register("stop", |args| Ok(Arc::new(Stop::parse(args))));
        parser.register("wait", |args| Ok(Arc::new(Wait::parse(args)?)));
        parser.register("log", |args| {
            Ok(Arc::new(Log {
                message: args.to_string(),
            }))
        });
        parser.register("call", |args| Ok(Arc::new(CallScript::parse(args)?)));
        parser
    }

    /// Register or replace the factory for `keyword`
    pub fn register<F>(&mut self, keyword: impl Into<String>, factory: F)
    where
        F: Fn(&str) -> Result<Arc<dyn Command>, String> + Send + Sync + 'static,
    {
        self.factories.insert(keyword.into(), Arc::new(factory));
    }

    pub fn keywords(&self) -> Vec<&str> {
        let mut keywords: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        keywords.sort_unstable();
        keywords
    }

    pub fn parse(&self, name: &str, source: &str) -> Result<Script, LoaderError> {
        let lines = source
            .lines()
            .enumerate()
            .map(|(index, raw)| {
                self.parse_line(raw).map_err(|message| LoaderError::Parse {
                    name: name.to_string(),
                    line: index,
                    message,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Script::new(name, lines))
    }

    fn parse_line(&self, raw: &str) -> Result<Line, String> {
        let text = raw.trim_end();
        let Some(body) = text.trim_start().strip_prefix(COMMAND_MARKER) else {
            return Ok(Line::text(text));
        };

        let (keyword, args) = match body.split_once(char::is_whitespace) {
            Some((keyword, args)) => (keyword, args.trim()),
            None => (body, ""),
        };

        match self.factories.get(keyword) {
            Some(factory) => {
                let command = factory(args).map_err(|e| format!("@{}: {}", keyword, e))?;
                Ok(Line::command(command, text))
            }
            None => Ok(Line::Command(CommandLine::unresolved(text))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::TextKind;

    #[test]
    fn test_parse_mixed_script() {
        let parser = ScriptParser::with_builtins();
        let source = "#start\n// note\nHello there.\n\n@set gold = 5\n@jump #start\n";
        let script = parser.parse("mixed", source).unwrap();

        assert_eq!(script.len(), 6);
        assert_eq!(script.line(0).and_then(Line::label), Some("start"));
        match script.line(1) {
            Some(Line::Text(text)) => assert_eq!(text.kind(), TextKind::Comment),
            other => panic!("expected comment, got {:?}", other),
        }
        match script.line(3) {
            Some(Line::Text(text)) => assert_eq!(text.kind(), TextKind::Blank),
            other => panic!("expected blank, got {:?}", other),
        }
        match script.line(4) {
            Some(Line::Command(line)) => {
                assert_eq!(line.command().map(|c| c.command_type()), Some("set"));
                assert_eq!(line.text(), "@set gold = 5");
            }
            other => panic!("expected command, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_keyword_is_unresolved() {
        let parser = ScriptParser::with_builtins();
        let script = parser.parse("s", "@dance wildly").unwrap();
        match script.line(0) {
            Some(Line::Command(line)) => assert!(line.command().is_none()),
            other => panic!("expected command line, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_arguments_fail_with_line() {
        let parser = ScriptParser::with_builtins();
        match parser.parse("s", "a\nb\n@jump nowhere") {
            Err(LoaderError::Parse { line, message, .. }) => {
                assert_eq!(line, 2);
                assert!(message.starts_with("@jump"));
            }
            other => panic!("expected parse error, got {:?}", other.map(|s| s.len())),
        }
    }

    #[test]
    fn test_custom_keyword() {
        let mut parser = ScriptParser::new();
        assert!(parser.keywords().is_empty());
        parser.register("pause", |_| Ok(Arc::new(crate::builtin::Return)));

        assert_eq!(parser.keywords(), vec!["pause"]);
        let script = parser.parse("s", "@pause").unwrap();
        assert!(matches!(
            script.line(0),
            Some(Line::Command(line)) if line.command().is_some()
        ));
    }
}
