use crate::error::{SimError, SimResult};
use crate::simulators::vm::command::{ArithmeticOp, Segment, VmCommand, VmProgram};

use log::debug;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use walkdir::WalkDir;

/// A single .vm source file, identified by its basename.
///
/// The basename doubles as the static-segment key, so two files with the
/// same name share their statics (as they would in the reference tools).
pub struct SourceFile<'src> {
    name: String,
    source: &'src str,
}

impl<'src> SourceFile<'src> {
    pub fn new(name: impl Into<String>, source: &'src str) -> Self {
        Self {
            name: basename(&name.into()),
            source,
        }
    }
}

fn basename(name: &str) -> String {
    Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name)
        .to_string()
}

/// Parses .vm sources into a [`VmProgram`].
///
/// Source files are parsed in the order they are passed in; that order
/// determines static-segment allocation.
pub struct Parser<'src> {
    sources: Vec<SourceFile<'src>>,
    program: VmProgram,
    current_file: String,
    current_function: String,
    current_line: usize,
}

impl<'src> Parser<'src> {
    pub fn new(sources: Vec<SourceFile<'src>>) -> Self {
        Self {
            sources,
            program: VmProgram::default(),
            current_file: String::new(),
            current_function: String::new(),
            current_line: 0,
        }
    }

    pub fn parse(mut self) -> SimResult<VmProgram> {
        let sources = std::mem::take(&mut self.sources);
        for file in &sources {
            self.current_file = file.name.clone();
            self.current_line = 0;
            self.program.source_files.push(file.name.clone());
            debug!("parsing vm source '{}'", file.name);

            for line in file.source.lines() {
                self.current_line += 1;
                if let Some(cmd) = self.parse_line(line)? {
                    self.program.commands.push(cmd);
                }
            }
        }

        Ok(self.program)
    }

    fn parse_line(&mut self, line: &str) -> SimResult<Option<VmCommand>> {
        let code = match line.find("//") {
            Some(idx) => &line[..idx],
            None => line,
        };

        let tokens: Vec<&str> = code.split_whitespace().collect();
        if tokens.is_empty() {
            return Ok(None);
        }

        let keyword = tokens[0];
        if let Ok(op) = ArithmeticOp::from_str(keyword) {
            return Ok(Some(VmCommand::Arithmetic {
                op,
                line: self.current_line,
            }));
        }

        match keyword {
            "push" => self.parse_push_pop(&tokens, false).map(Some),
            "pop" => self.parse_push_pop(&tokens, true).map(Some),
            "label" => self.parse_label(&tokens).map(Some),
            "goto" => self.parse_goto(&tokens, false).map(Some),
            "if-goto" => self.parse_goto(&tokens, true).map(Some),
            "function" => self.parse_function(&tokens).map(Some),
            "call" => self.parse_call(&tokens).map(Some),
            "return" => {
                if tokens.len() != 1 {
                    return Err(self.error("return takes no arguments"));
                }
                Ok(Some(VmCommand::Return {
                    line: self.current_line,
                }))
            }
            _ => Err(self.unknown_command(keyword)),
        }
    }

    fn parse_push_pop(&mut self, tokens: &[&str], is_pop: bool) -> SimResult<VmCommand> {
        let name = if is_pop { "pop" } else { "push" };
        if tokens.len() != 3 {
            return Err(self.error(format!("{0} requires 2 arguments: {0} segment index", name)));
        }

        let segment = self.parse_segment(tokens[1])?;
        let index = self.parse_index(tokens[2])?;

        if is_pop && segment == Segment::Constant {
            return Err(self.error("Cannot pop to constant segment (constants are read-only)"));
        }
        if segment == Segment::Temp && index > 7 {
            return Err(self.error(format!("temp segment only has indices 0-7, got {}", index)));
        }
        if segment == Segment::Pointer && index > 1 {
            return Err(self.error(format!("pointer segment only has indices 0-1, got {}", index)));
        }

        let cmd = if is_pop {
            VmCommand::Pop {
                segment,
                index,
                file: self.current_file.clone(),
                line: self.current_line,
            }
        } else {
            VmCommand::Push {
                segment,
                index,
                file: self.current_file.clone(),
                line: self.current_line,
            }
        };
        Ok(cmd)
    }

    fn parse_segment(&self, token: &str) -> SimResult<Segment> {
        if let Ok(segment) = Segment::from_str(token) {
            return Ok(segment);
        }

        let suggestion = match token {
            "loc" | "lcl" => Some("local"),
            "arg" | "args" => Some("argument"),
            "const" => Some("constant"),
            "tmp" => Some("temp"),
            "ptr" => Some("pointer"),
            _ => None,
        };

        if let Some(correct) = suggestion {
            return Err(self.error(format!(
                "Unknown segment: {}",
                SimError::suggestion(token, correct)
            )));
        }

        Err(self.error(format!(
            "Unknown segment: '{}'. Valid segments: \
             local, argument, this, that, constant, static, temp, pointer",
            token
        )))
    }

    fn parse_index(&self, token: &str) -> SimResult<u16> {
        if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
            return Err(self.error(format!(
                "Index must be a non-negative integer, got '{}'",
                token
            )));
        }

        match token.parse::<u32>() {
            Ok(value) if value <= 32767 => Ok(value as u16),
            _ => Err(self.error(format!("Index out of range (max 32767), got {}", token))),
        }
    }

    fn parse_label(&mut self, tokens: &[&str]) -> SimResult<VmCommand> {
        if tokens.len() != 2 {
            return Err(self.error("label requires 1 argument: label labelName"));
        }

        let name = tokens[1].to_string();
        if !is_valid_label(&name) {
            return Err(self.error(format!(
                "Invalid label name: '{}'. Labels must start with a letter, _, :, or . \
                 and contain only letters, digits, _, :, and .",
                name
            )));
        }

        let scoped = self.scoped_label(&name);
        if self.program.labels.contains_key(&scoped) {
            return Err(self.error(format!(
                "Duplicate label: '{}' (already defined in this function)",
                name
            )));
        }
        self.program.labels.insert(scoped, self.program.commands.len());

        Ok(VmCommand::Label {
            name,
            line: self.current_line,
        })
    }

    fn parse_goto(&self, tokens: &[&str], conditional: bool) -> SimResult<VmCommand> {
        let name = if conditional { "if-goto" } else { "goto" };
        if tokens.len() != 2 {
            return Err(self.error(format!("{0} requires 1 argument: {0} labelName", name)));
        }

        let label = tokens[1].to_string();
        let cmd = if conditional {
            VmCommand::IfGoto {
                label,
                line: self.current_line,
            }
        } else {
            VmCommand::Goto {
                label,
                line: self.current_line,
            }
        };
        Ok(cmd)
    }

    fn parse_function(&mut self, tokens: &[&str]) -> SimResult<VmCommand> {
        if tokens.len() != 3 {
            return Err(self.error("function requires 2 arguments: function functionName nVars"));
        }

        let name = tokens[1].to_string();
        if !is_valid_identifier(&name) {
            return Err(self.error(format!("Invalid function name: '{}'", name)));
        }

        let n_locals = self.parse_index(tokens[2])?;

        if self.program.functions.contains_key(&name) {
            return Err(self.error(format!("Duplicate function definition: '{}'", name)));
        }
        self.program
            .functions
            .insert(name.clone(), self.program.commands.len());
        self.current_function = name.clone();

        Ok(VmCommand::Function {
            name,
            n_locals,
            line: self.current_line,
        })
    }

    fn parse_call(&self, tokens: &[&str]) -> SimResult<VmCommand> {
        if tokens.len() != 3 {
            return Err(self.error("call requires 2 arguments: call functionName nArgs"));
        }

        let name = tokens[1].to_string();
        if !is_valid_identifier(&name) {
            return Err(self.error(format!("Invalid function name: '{}'", name)));
        }
        let n_args = self.parse_index(tokens[2])?;

        Ok(VmCommand::Call {
            name,
            n_args,
            line: self.current_line,
        })
    }

    fn scoped_label(&self, label: &str) -> String {
        if self.current_function.is_empty() {
            label.to_string()
        } else {
            format!("{}${}", self.current_function, label)
        }
    }

    fn unknown_command(&self, keyword: &str) -> SimError {
        let suggestion = match keyword {
            "pussh" | "psh" => Some("push"),
            "popp" | "po" => Some("pop"),
            "ad" | "addd" => Some("add"),
            "substract" | "subtract" => Some("sub"),
            "ifgoto" | "if_goto" => Some("if-goto"),
            "func" => Some("function"),
            "ret" => Some("return"),
            _ => None,
        };

        match suggestion {
            Some(correct) => self.error(format!(
                "Unknown command: {}",
                SimError::suggestion(keyword, correct)
            )),
            None => self.error(format!("Unknown command: '{}'", keyword)),
        }
    }

    fn error(&self, message: impl Into<String>) -> SimError {
        SimError::parse(&self.current_file, self.current_line, message)
    }
}

fn is_valid_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '.' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

fn is_valid_label(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '.' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == ':')
}

/// Parse a single .vm file from disk.
pub fn parse_file(path: impl AsRef<Path>) -> SimResult<VmProgram> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .map_err(|e| SimError::file(path.to_string_lossy(), e.to_string()))?;

    let name = path.to_string_lossy().to_string();
    Parser::new(vec![SourceFile::new(name, &content)]).parse()
}

/// Parse every .vm file in a directory, sorted by name so that static
/// allocation order is deterministic.
pub fn parse_directory(dir: impl AsRef<Path>) -> SimResult<VmProgram> {
    let dir = dir.as_ref();
    let mut files = Vec::new();

    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| SimError::file(dir.to_string_lossy(), e.to_string()))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("vm") {
            let content = fs::read_to_string(path)
                .map_err(|e| SimError::file(path.to_string_lossy(), e.to_string()))?;
            files.push((path.to_string_lossy().to_string(), content));
        }
    }

    if files.is_empty() {
        return Err(SimError::file(
            dir.to_string_lossy(),
            "Directory contains no .vm files",
        ));
    }

    files.sort_by(|a, b| a.0.cmp(&b.0));

    let sources = files
        .iter()
        .map(|(name, content)| SourceFile::new(name.clone(), content))
        .collect();
    Parser::new(sources).parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_program() {
        let src = "
            // doubles its argument
            function Math.double 0
            push argument 0
            push argument 0
            add
            return";

        let program = Parser::new(vec![SourceFile::new("Math.vm", src)])
            .parse()
            .unwrap();

        assert_eq!(5, program.commands.len());
        assert_eq!(Some(&0), program.functions.get("Math.double"));
        assert_eq!(vec!["Math".to_string()], program.source_files);
        assert_eq!(
            VmCommand::Push {
                segment: Segment::Argument,
                index: 0,
                file: "Math".to_string(),
                line: 4,
            },
            program.commands[1]
        );
    }

    #[test]
    fn test_labels_are_scoped_to_their_function() {
        let src = "
            function Main.main 0
            label LOOP
            goto LOOP
            return
            function Main.other 0
            label LOOP
            goto LOOP
            return";

        let program = Parser::new(vec![SourceFile::new("Main.vm", src)])
            .parse()
            .unwrap();

        assert_eq!(Some(&1), program.labels.get("Main.main$LOOP"));
        assert_eq!(Some(&5), program.labels.get("Main.other$LOOP"));
    }

    #[test]
    fn test_duplicate_label_in_same_function_is_rejected() {
        let src = "
            function Main.main 0
            label X
            label X";

        let result = Parser::new(vec![SourceFile::new("Main.vm", src)]).parse();
        match result {
            Err(SimError::Parse { file, line, message }) => {
                assert_eq!("Main", file);
                assert_eq!(4, line);
                assert!(message.contains("Duplicate label"));
            }
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_function_is_rejected() {
        let src = "
            function Main.main 0
            return
            function Main.main 0
            return";

        let result = Parser::new(vec![SourceFile::new("Main.vm", src)]).parse();
        assert!(matches!(result, Err(SimError::Parse { .. })));
    }

    #[test]
    fn test_typo_suggestions() {
        let cases = [
            ("psh constant 1", "push"),
            ("ifgoto END", "if-goto"),
            ("func Main.main 0", "function"),
            ("ret", "return"),
        ];

        for (src, expected) in cases {
            let result = Parser::new(vec![SourceFile::new("Main.vm", src)]).parse();
            match result {
                Err(SimError::Parse { message, .. }) => {
                    assert!(
                        message.contains(&format!("did you mean '{}'", expected)),
                        "message '{}' should suggest '{}'",
                        message,
                        expected
                    );
                }
                other => panic!("expected parse error, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_segment_typo_suggestion() {
        let result = Parser::new(vec![SourceFile::new("Main.vm", "push const 1")]).parse();
        match result {
            Err(SimError::Parse { message, .. }) => {
                assert!(message.contains("did you mean 'constant'"));
            }
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_pop_constant_is_rejected() {
        let result = Parser::new(vec![SourceFile::new("Main.vm", "pop constant 5")]).parse();
        assert!(matches!(result, Err(SimError::Parse { .. })));
    }

    #[test]
    fn test_segment_index_bounds() {
        assert!(Parser::new(vec![SourceFile::new("M.vm", "push temp 8")])
            .parse()
            .is_err());
        assert!(Parser::new(vec![SourceFile::new("M.vm", "push pointer 2")])
            .parse()
            .is_err());
        assert!(Parser::new(vec![SourceFile::new("M.vm", "push constant 32768")])
            .parse()
            .is_err());
        assert!(Parser::new(vec![SourceFile::new("M.vm", "push constant 32767")])
            .parse()
            .is_ok());
    }

    #[test]
    fn test_source_files_accumulate_in_order() {
        let a = "push constant 1";
        let b = "push constant 2";
        let program = Parser::new(vec![
            SourceFile::new("A.vm", a),
            SourceFile::new("B.vm", b),
        ])
        .parse()
        .unwrap();

        assert_eq!(vec!["A".to_string(), "B".to_string()], program.source_files);
    }
}
