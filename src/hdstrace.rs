//! Parser for the text listing `hdstrace` prints for an HDS container.
//!
//! The listing is requested with `full newline nlines=all widepage`, so every
//! element of every array is printed and nothing is elided. Shape:
//!
//! ```text
//! STATS  <STRUC>
//!
//!    NDF            <ADAM_PARNAME>  {structure}
//!       NAMEPTR     <_CHAR*132>     '/data/m31'
//!
//!    MAXIMUM        <_DOUBLE>       6.5D0
//!    MAXPOS(2)      <_INTEGER>      12,34
//!
//! End of Trace.
//! ```

use std::sync::OnceLock;

use regex::Regex;

use crate::errors::{Result, StarError};
use crate::record::{ResultRecord, Value};

const END_MARKER: &str = "End of Trace.";
const STRUCTURE_MARKER: &str = "{structure}";
const STRUCTURE_ARRAY_MARKER: &str = "{array of structures}";

/// Parameter-system bookkeeping that never carries a result.
const DROPPED_COMPONENT: &str = "adam_dyndef";
/// Name-pointer member of an `ADAM_PARNAME` structure.
const NAME_POINTER: &str = "nameptr";

fn component_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?P<indent>\s*)(?P<name>[A-Za-z_][A-Za-z0-9_]*)(?:\((?P<dims>[0-9,\s]+)\))?\s+<(?P<type>[^>]+)>\s*(?P<value>.*)$",
        )
        .expect("component regex")
    })
}

fn contents_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<indent>\s*)Contents of (?P<name>[A-Za-z_][A-Za-z0-9_]*)\([0-9,\s]+\)\s*$")
            .expect("contents regex")
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Struct,
    StructArray,
    Element,
}

#[derive(Debug)]
struct Frame {
    name: String,
    indent: usize,
    kind: FrameKind,
    fields: Vec<(String, Value)>,
    elements: Vec<Value>,
}

impl Frame {
    fn new(name: &str, indent: usize, kind: FrameKind) -> Self {
        Self {
            name: name.to_lowercase(),
            indent,
            kind,
            fields: Vec::new(),
            elements: Vec::new(),
        }
    }
}

/// A primitive whose value text may continue on following lines.
#[derive(Debug)]
struct Pending {
    name: String,
    hds_type: String,
    is_array: bool,
    text: String,
}

#[derive(Debug)]
struct Token {
    text: String,
    quoted: bool,
}

/// Parse a complete `hdstrace` listing into a record named after the
/// top-level object.
pub fn parse_trace(command: &str, listing: &str) -> Result<ResultRecord> {
    Parser {
        command,
        stack: Vec::new(),
        pending: None,
    }
    .run(listing)
}

struct Parser<'a> {
    command: &'a str,
    stack: Vec<Frame>,
    pending: Option<Pending>,
}

impl Parser<'_> {
    fn run(mut self, listing: &str) -> Result<ResultRecord> {
        let mut ended = false;

        for (lineno, raw) in listing.lines().enumerate() {
            let line = raw.trim_end();
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if trimmed == END_MARKER {
                ended = true;
                break;
            }

            if self.stack.is_empty() {
                let caps = component_re()
                    .captures(line)
                    .ok_or_else(|| self.error(lineno, "missing object header"))?;
                self.stack.push(Frame::new(
                    &caps["name"],
                    caps["indent"].len(),
                    FrameKind::Struct,
                ));
                continue;
            }

            if let Some(caps) = contents_re().captures(line) {
                self.flush()?;
                self.open_element(lineno, &caps["name"], caps["indent"].len())?;
                continue;
            }

            if let Some(caps) = component_re().captures(line) {
                self.flush()?;
                let indent = caps["indent"].len();
                self.close_to(indent)?;

                if self.top_kind() == Some(FrameKind::StructArray) {
                    return Err(self.error(lineno, "component outside any array element"));
                }

                let name = &caps["name"];
                let hds_type = &caps["type"];
                let value = caps["value"].trim();
                if value.starts_with(STRUCTURE_ARRAY_MARKER) {
                    self.stack
                        .push(Frame::new(name, indent, FrameKind::StructArray));
                } else if value.starts_with(STRUCTURE_MARKER) {
                    self.stack.push(Frame::new(name, indent, FrameKind::Struct));
                } else if hds_type.starts_with('_') {
                    self.pending = Some(Pending {
                        name: name.to_lowercase(),
                        hds_type: hds_type.to_uppercase(),
                        is_array: caps.name("dims").is_some(),
                        text: value.to_string(),
                    });
                } else {
                    return Err(self.error(lineno, format!("structure {name} has no contents")));
                }
                continue;
            }

            // `{Empty structure}` and similar annotations
            if trimmed.starts_with('{') {
                continue;
            }

            match self.pending.as_mut() {
                Some(pending) => {
                    if !pending.text.is_empty()
                        && !pending.text.ends_with(',')
                        && !trimmed.starts_with(',')
                    {
                        pending.text.push(',');
                    }
                    pending.text.push_str(trimmed);
                }
                None => return Err(self.error(lineno, format!("unrecognised line '{trimmed}'"))),
            }
        }

        if self.stack.is_empty() {
            return Err(StarError::malformed(self.command, "empty trace"));
        }
        if !ended {
            return Err(StarError::malformed(
                self.command,
                "trace ended without its terminator",
            ));
        }

        self.flush()?;
        while self.stack.len() > 1 {
            self.close_top()?;
        }
        let root = self
            .stack
            .pop()
            .ok_or_else(|| StarError::malformed(self.command, "empty trace"))?;
        Ok(tidy(ResultRecord::new(root.name, root.fields)))
    }

    fn error(&self, lineno: usize, reason: impl AsRef<str>) -> StarError {
        StarError::malformed(self.command, format!("line {}: {}", lineno + 1, reason.as_ref()))
    }

    fn top_kind(&self) -> Option<FrameKind> {
        self.stack.last().map(|f| f.kind)
    }

    fn flush(&mut self) -> Result<()> {
        let Some(pending) = self.pending.take() else {
            return Ok(());
        };
        let value = convert(self.command, &pending)?;
        match self.stack.last_mut() {
            Some(frame) => {
                frame.fields.push((pending.name, value));
                Ok(())
            }
            None => Err(StarError::malformed(self.command, "value outside any structure")),
        }
    }

    /// Close every frame the line at `indent` is no longer inside.
    fn close_to(&mut self, indent: usize) -> Result<()> {
        while self.stack.len() > 1 && self.stack.last().is_some_and(|f| indent <= f.indent) {
            self.close_top()?;
        }
        Ok(())
    }

    fn open_element(&mut self, lineno: usize, name: &str, indent: usize) -> Result<()> {
        let name = name.to_lowercase();
        loop {
            let at_array = self
                .stack
                .last()
                .is_some_and(|f| f.kind == FrameKind::StructArray && f.name == name);
            if at_array {
                break;
            }
            if self.stack.len() <= 1 {
                return Err(self.error(lineno, format!("contents of unknown array {name}")));
            }
            self.close_top()?;
        }
        self.stack.push(Frame::new(&name, indent, FrameKind::Element));
        Ok(())
    }

    fn close_top(&mut self) -> Result<()> {
        let frame = self
            .stack
            .pop()
            .ok_or_else(|| StarError::malformed(self.command, "unbalanced structure"))?;
        let parent = self
            .stack
            .last_mut()
            .ok_or_else(|| StarError::malformed(self.command, "unbalanced structure"))?;

        match frame.kind {
            FrameKind::Element => {
                parent
                    .elements
                    .push(Value::Group(ResultRecord::new(frame.name, frame.fields)));
            }
            FrameKind::StructArray => {
                parent.fields.push((frame.name, Value::Array(frame.elements)));
            }
            FrameKind::Struct => {
                let record = ResultRecord::new(frame.name.clone(), frame.fields);
                parent.fields.push((frame.name, Value::Group(record)));
            }
        }
        Ok(())
    }
}

fn convert(command: &str, pending: &Pending) -> Result<Value> {
    let tokens = split_tokens(command, &pending.text)?;
    if tokens.iter().any(|t| !t.quoted && t.text == "...") {
        return Err(StarError::malformed(
            command,
            format!("value of {} was truncated", pending.name),
        ));
    }

    let mut values = tokens
        .iter()
        .map(|t| scalar(command, &pending.hds_type, t))
        .collect::<Result<Vec<_>>>()?;

    if pending.is_array {
        return Ok(Value::Array(values));
    }
    match values.len() {
        1 => Ok(values.remove(0)),
        0 if pending.hds_type.starts_with("_CHAR") => Ok(Value::Text(String::new())),
        n => Err(StarError::malformed(
            command,
            format!("scalar {} has {n} values", pending.name),
        )),
    }
}

/// Split on commas outside single quotes; `''` inside quotes is a literal quote.
fn split_tokens(command: &str, text: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' if in_quotes => {
                if chars.peek() == Some(&'\'') {
                    chars.next();
                    current.push('\'');
                } else {
                    in_quotes = false;
                }
            }
            '\'' => {
                in_quotes = true;
                quoted = true;
            }
            ',' if !in_quotes => {
                tokens.push(finish_token(&mut current, &mut quoted));
            }
            _ => current.push(c),
        }
    }

    if in_quotes {
        return Err(StarError::malformed(command, "unterminated string value"));
    }
    if !current.trim().is_empty() || quoted {
        tokens.push(finish_token(&mut current, &mut quoted));
    }
    Ok(tokens)
}

fn finish_token(current: &mut String, quoted: &mut bool) -> Token {
    let token = Token {
        text: current.trim().to_string(),
        quoted: *quoted,
    };
    current.clear();
    *quoted = false;
    token
}

fn scalar(command: &str, hds_type: &str, token: &Token) -> Result<Value> {
    let text = token.text.as_str();
    if !token.quoted && text == "*" {
        return Ok(Value::Bad);
    }
    let invalid = || StarError::malformed(command, format!("'{text}' is not a valid {hds_type}"));

    if hds_type.starts_with("_CHAR") {
        return Ok(Value::Text(text.to_string()));
    }
    match hds_type {
        "_LOGICAL" => match text.to_ascii_uppercase().as_str() {
            "TRUE" | "T" | "YES" | "Y" => Ok(Value::Logical(true)),
            "FALSE" | "F" | "NO" | "N" => Ok(Value::Logical(false)),
            _ => Err(invalid()),
        },
        "_INTEGER" | "_INT64" | "_WORD" | "_UWORD" | "_BYTE" | "_UBYTE" => {
            text.parse::<i64>().map(Value::Integer).map_err(|_| invalid())
        }
        "_REAL" | "_DOUBLE" => text
            .replace(['D', 'd'], "E")
            .parse::<f64>()
            .map(Value::Real)
            .map_err(|_| invalid()),
        _ => Ok(Value::Text(text.to_string())),
    }
}

/// Drop bookkeeping components and unwrap parameter name pointers.
fn tidy(record: ResultRecord) -> ResultRecord {
    let name = record.name().to_string();
    let fields = record
        .iter()
        .filter(|(field, _)| *field != DROPPED_COMPONENT)
        .map(|(field, value)| {
            let value = match value {
                Value::Group(group)
                    if group.len() == 1 && group.field_names() == [NAME_POINTER] =>
                {
                    group.get(NAME_POINTER).cloned().unwrap_or(Value::Bad)
                }
                other => other.clone(),
            };
            (field.to_string(), value)
        })
        .collect();
    ResultRecord::new(name, fields)
}
