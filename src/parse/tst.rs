use crate::error::{SimError, SimResult};

use lazy_static::lazy_static;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberFormat {
    Binary,
    Decimal,
    Hex,
    String,
}

impl TryFrom<&str> for NumberFormat {
    type Error = ();
    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "B" => Ok(NumberFormat::Binary),
            "D" => Ok(NumberFormat::Decimal),
            "X" => Ok(NumberFormat::Hex),
            "S" => Ok(NumberFormat::String),
            _ => Err(()),
        }
    }
}

/// One column of an output-list: `pinName%M.L.W.R` where M is the format
/// and L/W/R are left padding, width and right padding in characters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputColumn {
    /// pin name, possibly with a `[i]` or `[i..j]` subscript
    pub pin: String,
    pub format: NumberFormat,
    pub left_pad: usize,
    pub width: usize,
    pub right_pad: usize,
}

/// A pin target with an optional sub-bus range; lo == -1 is the full pin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinTarget {
    pub name: String,
    pub lo: i32,
    pub hi: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TstCommand {
    Load(String),
    OutputFile(String),
    CompareTo(String),
    OutputList(Vec<OutputColumn>),
    Set { target: PinTarget, value: i64 },
    Eval,
    Tick,
    Tock,
    Output,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpannedCommand {
    pub command: TstCommand,
    pub source_line: usize,
}

/// Parse a .tst script. Commands are terminated by `,` or `;` (both are
/// plain terminators); comments are `//` and `/* ... */`.
pub fn parse_script(source: &str, name: &str) -> SimResult<Vec<SpannedCommand>> {
    let clean = strip_comments(source);

    let mut commands = Vec::new();
    let mut current = String::new();
    let mut line = 1usize;
    let mut chunk_line = 1usize;

    for c in clean.chars() {
        if c == ';' || c == ',' {
            let chunk = current.trim();
            if !chunk.is_empty() {
                commands.push(SpannedCommand {
                    command: parse_command(chunk, chunk_line, name)?,
                    source_line: chunk_line,
                });
            }
            current.clear();
            chunk_line = line;
            continue;
        }

        if c == '\n' {
            line += 1;
        }
        if current.trim().is_empty() {
            chunk_line = line;
        }
        current.push(c);
    }

    if !current.trim().is_empty() {
        return Err(SimError::parse(
            name,
            chunk_line,
            format!("Unterminated command: '{}'", current.trim()),
        ));
    }

    Ok(commands)
}

fn strip_comments(source: &str) -> String {
    let mut clean = String::with_capacity(source.len());
    let bytes: Vec<char> = source.chars().collect();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == '/' && i + 1 < bytes.len() && bytes[i + 1] == '/' {
            while i < bytes.len() && bytes[i] != '\n' {
                i += 1;
            }
            continue;
        }
        if bytes[i] == '/' && i + 1 < bytes.len() && bytes[i + 1] == '*' {
            i += 2;
            while i + 1 < bytes.len() && !(bytes[i] == '*' && bytes[i + 1] == '/') {
                // keep newlines so line numbers stay right
                if bytes[i] == '\n' {
                    clean.push('\n');
                }
                i += 1;
            }
            i += 2;
            continue;
        }
        clean.push(bytes[i]);
        i += 1;
    }

    clean
}

fn parse_command(chunk: &str, line: usize, name: &str) -> SimResult<TstCommand> {
    let tokens: Vec<&str> = chunk.split_whitespace().collect();
    let keyword = tokens[0];

    let expect_arg = |count: usize| -> SimResult<()> {
        if tokens.len() != count + 1 {
            return Err(SimError::parse(
                name,
                line,
                format!("'{}' expects {} argument(s)", keyword, count),
            ));
        }
        Ok(())
    };

    match keyword {
        "load" => {
            expect_arg(1)?;
            let chip = tokens[1].strip_suffix(".hdl").unwrap_or(tokens[1]);
            Ok(TstCommand::Load(chip.to_string()))
        }
        "output-file" => {
            expect_arg(1)?;
            Ok(TstCommand::OutputFile(tokens[1].to_string()))
        }
        "compare-to" => {
            expect_arg(1)?;
            Ok(TstCommand::CompareTo(tokens[1].to_string()))
        }
        "output-list" => {
            if tokens.len() < 2 {
                return Err(SimError::parse(name, line, "output-list needs columns"));
            }
            let columns = tokens[1..]
                .iter()
                .map(|spec| parse_column_spec(spec, line, name))
                .collect::<SimResult<Vec<_>>>()?;
            Ok(TstCommand::OutputList(columns))
        }
        "set" => {
            expect_arg(2)?;
            let target = parse_pin_target(tokens[1], line, name)?;
            let value = parse_value(tokens[2], line, name)?;
            Ok(TstCommand::Set { target, value })
        }
        "eval" => {
            expect_arg(0)?;
            Ok(TstCommand::Eval)
        }
        "tick" => {
            expect_arg(0)?;
            Ok(TstCommand::Tick)
        }
        "tock" => {
            expect_arg(0)?;
            Ok(TstCommand::Tock)
        }
        "output" => {
            expect_arg(0)?;
            Ok(TstCommand::Output)
        }
        _ => Err(SimError::parse(
            name,
            line,
            format!("Unknown test command: '{}'", keyword),
        )),
    }
}

fn parse_column_spec(spec: &str, line: usize, name: &str) -> SimResult<OutputColumn> {
    lazy_static! {
        static ref COLUMN_RE: Regex = Regex::new(
            r"^(?P<pin>[a-zA-Z_][a-zA-Z0-9_.\-]*(\[\d+(\.\.\d+)?\])?)%(?P<format>[BDXS])(?P<left>\d+)\.(?P<width>\d+)\.(?P<right>\d+)$"
        )
        .unwrap();
    }

    let Some(caps) = COLUMN_RE.captures(spec) else {
        // a bare pin name is allowed; defaults match a plain decimal cell
        if spec.chars().all(|c| c.is_ascii_alphanumeric() || "_.[]".contains(c)) {
            return Ok(OutputColumn {
                pin: spec.to_string(),
                format: NumberFormat::Decimal,
                left_pad: 1,
                width: 1,
                right_pad: 1,
            });
        }
        return Err(SimError::parse(
            name,
            line,
            format!("Invalid output-list column: '{}'", spec),
        ));
    };

    let num = |group: &str| caps[group].parse::<usize>().unwrap_or(0);

    Ok(OutputColumn {
        pin: caps["pin"].to_string(),
        format: NumberFormat::try_from(&caps["format"]).unwrap_or(NumberFormat::Decimal),
        left_pad: num("left"),
        width: num("width"),
        right_pad: num("right"),
    })
}

/// Split `pin`, `pin[i]` or `pin[i..j]` into name and range.
pub fn parse_pin_target(text: &str, line: usize, name: &str) -> SimResult<PinTarget> {
    let Some(bracket) = text.find('[') else {
        return Ok(PinTarget {
            name: text.to_string(),
            lo: -1,
            hi: -1,
        });
    };

    let pin_name = &text[..bracket];
    let rest = &text[bracket + 1..];
    let Some(range) = rest.strip_suffix(']') else {
        return Err(SimError::parse(
            name,
            line,
            format!("Invalid pin subscript: '{}'", text),
        ));
    };

    let bad = || SimError::parse(name, line, format!("Invalid pin subscript: '{}'", text));

    let (lo, hi) = match range.split_once("..") {
        Some((lo, hi)) => (
            lo.parse::<i32>().map_err(|_| bad())?,
            hi.parse::<i32>().map_err(|_| bad())?,
        ),
        None => {
            let bit = range.parse::<i32>().map_err(|_| bad())?;
            (bit, bit)
        }
    };

    Ok(PinTarget {
        name: pin_name.to_string(),
        lo,
        hi,
    })
}

/// Values are `%B…` binary, `%X…` hex, or decimal (possibly negative).
pub fn parse_value(text: &str, line: usize, name: &str) -> SimResult<i64> {
    let bad = || {
        SimError::parse(
            name,
            line,
            format!("Invalid value literal: '{}'", text),
        )
    };

    if let Some(bits) = text.strip_prefix("%B").or_else(|| text.strip_prefix("%b")) {
        return i64::from_str_radix(bits, 2).map_err(|_| bad());
    }
    if let Some(hex) = text.strip_prefix("%X").or_else(|| text.strip_prefix("%x")) {
        return i64::from_str_radix(hex, 16).map_err(|_| bad());
    }
    text.parse::<i64>().map_err(|_| bad())
}
