//! Parser for `.tst` test scripts.
//!
//! Commands are terminated by `;` or `,`; both `//` and `/* */` comments are
//! allowed. The runner in `simulators::hdl::tester` executes the parsed
//! command list against a chip.

use crate::definitions::LineNumber;
use crate::error::{SimError, SimResult};
use crate::parse::StringLexer;
use lazy_static::lazy_static;
use regex::Regex;

/// How a column renders its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberFormat {
    Binary,
    Decimal,
    Hex,
    Str,
}

impl NumberFormat {
    fn from_mode(mode: char) -> Option<Self> {
        match mode.to_ascii_uppercase() {
            'B' => Some(NumberFormat::Binary),
            'D' => Some(NumberFormat::Decimal),
            'X' => Some(NumberFormat::Hex),
            'S' => Some(NumberFormat::Str),
            _ => None,
        }
    }
}

/// One `pinName%M.L.W.R` column of an output-list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputColumn {
    pub pin_name: String,
    pub format: NumberFormat,
    pub left_pad: usize,
    pub width: usize,
    pub right_pad: usize,
}

impl Default for OutputColumn {
    fn default() -> Self {
        Self {
            pin_name: String::new(),
            format: NumberFormat::Binary,
            left_pad: 1,
            width: 1,
            right_pad: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TstCommand {
    /// resolve and install the chip under test
    Load {
        chip_name: String,
        source_line: LineNumber,
    },
    OutputFile {
        file_name: String,
        source_line: LineNumber,
    },
    CompareTo {
        file_name: String,
        source_line: LineNumber,
    },
    OutputList {
        columns: Vec<OutputColumn>,
        source_line: LineNumber,
    },
    Set {
        /// pin name, possibly with sub-bus notation `pin[i]` / `pin[i..j]`
        target: String,
        value: i64,
        source_line: LineNumber,
    },
    Eval {
        source_line: LineNumber,
    },
    Tick {
        source_line: LineNumber,
    },
    Tock {
        source_line: LineNumber,
    },
    Output {
        source_line: LineNumber,
    },
}

/// Parse the text of a `.tst` script into its command list.
pub fn parse_tst_string(source: &str, name: &str) -> SimResult<Vec<TstCommand>> {
    let clean = strip_comments(source);

    let mut commands = Vec::new();
    let mut line: LineNumber = 1;
    let mut current = String::new();

    for c in clean.chars() {
        if c == '\n' {
            line += 1;
        }
        if c == ';' || c == ',' {
            let cmd_str = current.trim().to_string();
            if !cmd_str.is_empty() {
                commands.push(parse_command(&cmd_str, name, line)?);
            }
            current.clear();
        } else {
            current.push(c);
        }
    }

    if !current.trim().is_empty() {
        return Err(SimError::parse(
            name,
            line,
            format!("Unterminated test command: '{}'", current.trim()),
        ));
    }

    Ok(commands)
}

fn strip_comments(source: &str) -> String {
    let mut walker = StringLexer::new(source);
    let mut clean = String::with_capacity(source.len());

    while let Some(current) = walker.current_char() {
        let c = current.content;
        if c == '/' {
            walker.advance();
            if walker.current_eq('/') {
                walker.take_chars_while(|c| c != '\n');
            } else if walker.current_eq('*') {
                if let Some(skipped) = walker.take_until_substr("*/") {
                    // keep newlines so line numbers stay correct
                    clean.extend(skipped.content.chars().filter(|&c| c == '\n'));
                }
            } else {
                clean.push('/');
            }
            continue;
        }

        walker.advance();
        clean.push(c);
    }

    clean
}

fn parse_command(cmd_str: &str, name: &str, line: LineNumber) -> SimResult<TstCommand> {
    let mut tokens = cmd_str.split_whitespace();
    let keyword = tokens.next().unwrap_or("");

    let command = match keyword {
        "load" => {
            let mut chip_name = tokens.next().unwrap_or("").to_string();
            if let Some(stripped) = chip_name.strip_suffix(".hdl") {
                chip_name = stripped.to_string();
            }
            TstCommand::Load {
                chip_name,
                source_line: line,
            }
        }
        "output-file" => TstCommand::OutputFile {
            file_name: tokens.next().unwrap_or("").to_string(),
            source_line: line,
        },
        "compare-to" => TstCommand::CompareTo {
            file_name: tokens.next().unwrap_or("").to_string(),
            source_line: line,
        },
        "output-list" => {
            let columns = tokens
                .map(|spec| parse_column_spec(spec, name, line))
                .collect::<SimResult<Vec<_>>>()?;
            TstCommand::OutputList {
                columns,
                source_line: line,
            }
        }
        "set" => {
            let target = tokens.next().unwrap_or("").to_string();
            if target.is_empty() {
                return Err(SimError::parse(name, line, "set requires a pin name"));
            }
            let value_str: String = tokens.collect::<Vec<_>>().concat();
            let value = parse_value(&value_str).ok_or_else(|| {
                SimError::parse(name, line, format!("Invalid set value: '{}'", value_str))
            })?;
            TstCommand::Set {
                target,
                value,
                source_line: line,
            }
        }
        "eval" => TstCommand::Eval { source_line: line },
        "tick" => TstCommand::Tick { source_line: line },
        "tock" => TstCommand::Tock { source_line: line },
        "output" => TstCommand::Output { source_line: line },
        _ => {
            return Err(SimError::parse(
                name,
                line,
                format!("Unknown test command: '{}'", keyword),
            ))
        }
    };

    Ok(command)
}

/// Parse a `pinName%M.L.W.R` column spec. A bare pin name keeps the default
/// format (binary, pads 1, width 1).
fn parse_column_spec(spec: &str, name: &str, line: LineNumber) -> SimResult<OutputColumn> {
    lazy_static! {
        static ref COLUMN_RE: Regex = Regex::new(
            r"^(?P<name>[a-zA-Z_][a-zA-Z0-9_\-]*(\[\d+(\.\.\d+)?\])?)%(?P<mode>[a-zA-Z])(?P<left>\d+)\.(?P<width>\d+)\.(?P<right>\d+)$"
        )
        .expect("column spec regex");
    }

    if !spec.contains('%') {
        return Ok(OutputColumn {
            pin_name: spec.to_string(),
            ..Default::default()
        });
    }

    let caps = COLUMN_RE.captures(spec).ok_or_else(|| {
        SimError::parse(
            name,
            line,
            format!("Invalid output-list column: '{}'", spec),
        )
    })?;

    let mode = caps["mode"].chars().next().unwrap_or('B');
    let format = NumberFormat::from_mode(mode).ok_or_else(|| {
        SimError::parse(
            name,
            line,
            format!("Invalid column format '{}', expected one of B, D, X, S", mode),
        )
    })?;

    let number = |key: &str| caps[key].parse::<usize>().unwrap_or(1);

    Ok(OutputColumn {
        pin_name: caps["name"].to_string(),
        format,
        left_pad: number("left"),
        width: number("width"),
        right_pad: number("right"),
    })
}

/// Parse a set value: decimal (possibly negative), `%B...` binary or
/// `%X...` hex.
pub fn parse_value(s: &str) -> Option<i64> {
    if s.is_empty() {
        return None;
    }

    if let Some(rest) = s.strip_prefix("%B").or_else(|| s.strip_prefix("%b")) {
        return i64::from_str_radix(rest, 2).ok();
    }
    if let Some(rest) = s.strip_prefix("%X").or_else(|| s.strip_prefix("%x")) {
        return i64::from_str_radix(rest, 16).ok();
    }

    s.parse::<i64>().ok()
}
