use crate::error::{SimError, SimResult};

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

/// Where a Jack variable lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JackVarKind {
    Local,
    Argument,
    Field,
    Static,
}

impl fmt::Display for JackVarKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            JackVarKind::Local => "local",
            JackVarKind::Argument => "argument",
            JackVarKind::Field => "field",
            JackVarKind::Static => "static",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JackVariable {
    pub name: String,
    pub type_name: String,
    pub kind: JackVarKind,
    pub index: u16,
}

/// One `MAP file:line -> vm_index [function]` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub jack_file: String,
    pub jack_line: usize,
    pub vm_index: usize,
    pub function_name: String,
}

/// Per-function variable tables, split by kind.
#[derive(Debug, Clone, Default)]
pub struct FunctionSymbols {
    pub function_name: String,
    pub class_name: String,
    pub locals: Vec<JackVariable>,
    pub arguments: Vec<JackVariable>,
    pub fields: Vec<JackVariable>,
    pub statics: Vec<JackVariable>,
}

/// Ordered field layout of a class, for heap inspection.
#[derive(Debug, Clone, Default)]
pub struct ClassLayout {
    pub class_name: String,
    pub fields: Vec<JackVariable>,
}

/// The bidirectional Jack line <-> VM command mapping plus the symbol
/// metadata carried by a .smap file. Immutable after load.
#[derive(Debug, Default)]
pub struct SourceMap {
    entries: Vec<SourceEntry>,
    vm_to_entry: HashMap<usize, usize>,
    line_to_entry: HashMap<(String, usize), usize>,
    function_symbols: HashMap<String, FunctionSymbols>,
    class_layouts: HashMap<String, ClassLayout>,
    current_function: String,
    current_class: String,
}

impl SourceMap {
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> SimResult {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| SimError::file(path.to_string_lossy(), e.to_string()))?;
        self.load_string(&content, &path.to_string_lossy())
    }

    pub fn load_string(&mut self, source: &str, name: &str) -> SimResult {
        self.clear();

        for (i, raw_line) in source.lines().enumerate() {
            let line_number = i + 1;
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            self.parse_line(line, line_number, name)?;
        }

        Ok(())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.vm_to_entry.clear();
        self.line_to_entry.clear();
        self.function_symbols.clear();
        self.class_layouts.clear();
        self.current_function.clear();
        self.current_class.clear();
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.function_symbols.is_empty() && self.class_layouts.is_empty()
    }

    pub fn entries(&self) -> &[SourceEntry] {
        &self.entries
    }

    pub fn entry_for_vm(&self, vm_index: usize) -> Option<&SourceEntry> {
        self.vm_to_entry.get(&vm_index).map(|&i| &self.entries[i])
    }

    /// The first VM index mapped from a (file, line) pair.
    pub fn vm_index_for_line(&self, file: &str, line: usize) -> Option<usize> {
        self.line_to_entry
            .get(&(file.to_string(), line))
            .map(|&i| self.entries[i].vm_index)
    }

    /// Every VM index mapped from a line, in entry order. A linear scan is
    /// fine at breakpoint-set time.
    pub fn all_vm_indices_for_line(&self, file: &str, line: usize) -> Vec<usize> {
        self.entries
            .iter()
            .filter(|e| e.jack_file == file && e.jack_line == line)
            .map(|e| e.vm_index)
            .collect()
    }

    pub fn function_symbols(&self, function_name: &str) -> Option<&FunctionSymbols> {
        self.function_symbols.get(function_name)
    }

    pub fn class_layout(&self, class_name: &str) -> Option<&ClassLayout> {
        self.class_layouts.get(class_name)
    }

    pub fn function_names(&self) -> Vec<&str> {
        self.function_symbols.keys().map(String::as_str).collect()
    }

    pub fn class_names(&self) -> Vec<&str> {
        self.class_layouts.keys().map(String::as_str).collect()
    }

    // =========================================================================
    // Parsing
    // =========================================================================

    fn parse_line(&mut self, line: &str, line_number: usize, name: &str) -> SimResult {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens[0] {
            "MAP" => self.parse_map(&tokens, line, line_number, name),
            "FUNC" => self.parse_func(&tokens, line, line_number, name),
            "VAR" => self.parse_var(&tokens, line, line_number, name),
            "CLASS" => self.parse_class(&tokens, line, line_number, name),
            "FIELD" => self.parse_field(&tokens, line, line_number, name),
            _ => Err(SimError::parse(
                name,
                line_number,
                format!("Unknown source map directive: '{}'", line),
            )),
        }
    }

    fn parse_map(
        &mut self,
        tokens: &[&str],
        line: &str,
        line_number: usize,
        name: &str,
    ) -> SimResult {
        // MAP Main:10 -> 45 [Main.main]
        if tokens.len() < 4 || tokens[2] != "->" {
            return Err(SimError::parse(
                name,
                line_number,
                format!("Invalid MAP format: '{}'", line),
            ));
        }

        let (jack_file, jack_line) = tokens[1].split_once(':').ok_or_else(|| {
            SimError::parse(
                name,
                line_number,
                format!("Invalid MAP source location: '{}'", tokens[1]),
            )
        })?;

        let jack_line: usize = jack_line.parse().map_err(|_| {
            SimError::parse(
                name,
                line_number,
                format!("Invalid line number in MAP: '{}'", tokens[1]),
            )
        })?;
        if jack_line == 0 {
            return Err(SimError::parse(
                name,
                line_number,
                "Jack line numbers start at 1",
            ));
        }

        let vm_index: usize = tokens[3].parse().map_err(|_| {
            SimError::parse(
                name,
                line_number,
                format!("Invalid vm index in MAP: '{}'", tokens[3]),
            )
        })?;

        let function_name = tokens
            .get(4)
            .and_then(|t| t.strip_prefix('['))
            .and_then(|t| t.strip_suffix(']'))
            .unwrap_or("")
            .to_string();

        let entry_index = self.entries.len();
        self.entries.push(SourceEntry {
            jack_file: jack_file.to_string(),
            jack_line,
            vm_index,
            function_name,
        });
        self.vm_to_entry.insert(vm_index, entry_index);

        // the first entry for a (file, line) wins the reverse lookup
        self.line_to_entry
            .entry((jack_file.to_string(), jack_line))
            .or_insert(entry_index);

        Ok(())
    }

    fn parse_func(
        &mut self,
        tokens: &[&str],
        line: &str,
        line_number: usize,
        name: &str,
    ) -> SimResult {
        if tokens.len() != 2 {
            return Err(SimError::parse(
                name,
                line_number,
                format!("Invalid FUNC format: '{}'", line),
            ));
        }

        let func_name = tokens[1].to_string();
        let class_name = func_name
            .split_once('.')
            .map(|(class, _)| class.to_string())
            .unwrap_or_default();

        self.current_function = func_name.clone();
        let symbols = self.function_symbols.entry(func_name.clone()).or_default();
        symbols.function_name = func_name;
        symbols.class_name = class_name;
        Ok(())
    }

    fn parse_var(
        &mut self,
        tokens: &[&str],
        line: &str,
        line_number: usize,
        name: &str,
    ) -> SimResult {
        // VAR local int sum 0
        if tokens.len() != 5 {
            return Err(SimError::parse(
                name,
                line_number,
                format!("Invalid VAR format: '{}'", line),
            ));
        }
        if self.current_function.is_empty() {
            return Err(SimError::parse(name, line_number, "VAR without preceding FUNC"));
        }

        let kind = match tokens[1] {
            "local" => JackVarKind::Local,
            "argument" => JackVarKind::Argument,
            "field" => JackVarKind::Field,
            "static" => JackVarKind::Static,
            other => {
                return Err(SimError::parse(
                    name,
                    line_number,
                    format!("Invalid variable kind: '{}'", other),
                ));
            }
        };

        let index: u16 = tokens[4].parse().map_err(|_| {
            SimError::parse(
                name,
                line_number,
                format!("Invalid variable index: '{}'", tokens[4]),
            )
        })?;

        let var = JackVariable {
            name: tokens[3].to_string(),
            type_name: tokens[2].to_string(),
            kind,
            index,
        };

        let symbols = self
            .function_symbols
            .entry(self.current_function.clone())
            .or_default();
        match kind {
            JackVarKind::Local => symbols.locals.push(var),
            JackVarKind::Argument => symbols.arguments.push(var),
            JackVarKind::Field => symbols.fields.push(var),
            JackVarKind::Static => symbols.statics.push(var),
        }
        Ok(())
    }

    fn parse_class(
        &mut self,
        tokens: &[&str],
        line: &str,
        line_number: usize,
        name: &str,
    ) -> SimResult {
        if tokens.len() != 2 {
            return Err(SimError::parse(
                name,
                line_number,
                format!("Invalid CLASS format: '{}'", line),
            ));
        }

        let class_name = tokens[1].to_string();
        self.current_class = class_name.clone();
        self.class_layouts
            .entry(class_name.clone())
            .or_default()
            .class_name = class_name.clone();
        Ok(())
    }

    fn parse_field(
        &mut self,
        tokens: &[&str],
        line: &str,
        line_number: usize,
        name: &str,
    ) -> SimResult {
        // FIELD int x
        if tokens.len() != 3 {
            return Err(SimError::parse(
                name,
                line_number,
                format!("Invalid FIELD format: '{}'", line),
            ));
        }
        if self.current_class.is_empty() {
            return Err(SimError::parse(
                name,
                line_number,
                "FIELD without preceding CLASS",
            ));
        }

        let layout = self
            .class_layouts
            .entry(self.current_class.clone())
            .or_default();
        let index = layout.fields.len() as u16;
        layout.fields.push(JackVariable {
            name: tokens[2].to_string(),
            type_name: tokens[1].to_string(),
            kind: JackVarKind::Field,
            index,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_source_map() {
        let mut smap = SourceMap::default();
        smap.load_string(
            "MAP Main:10 -> 0 [Main.main]\n\
             MAP Main:11 -> 3 [Main.main]\n\
             MAP Main:12 -> 7 [Main.main]\n\
             FUNC Main.main\n\
             VAR local int sum 0\n\
             VAR local int i 1\n\
             VAR argument int n 0\n\
             CLASS Point\n\
             FIELD int x\n\
             FIELD int y\n",
            "test.smap",
        )
        .unwrap();

        assert!(!smap.is_empty());
        assert_eq!(3, smap.entries().len());

        let entry = smap.entry_for_vm(0).unwrap();
        assert_eq!("Main", entry.jack_file);
        assert_eq!(10, entry.jack_line);
        assert_eq!("Main.main", entry.function_name);

        let symbols = smap.function_symbols("Main.main").unwrap();
        assert_eq!("Main", symbols.class_name);
        assert_eq!(2, symbols.locals.len());
        assert_eq!("sum", symbols.locals[0].name);
        assert_eq!(0, symbols.locals[0].index);
        assert_eq!(1, symbols.arguments.len());

        let layout = smap.class_layout("Point").unwrap();
        assert_eq!(2, layout.fields.len());
        assert_eq!("x", layout.fields[0].name);
        assert_eq!(0, layout.fields[0].index);
        assert_eq!(1, layout.fields[1].index);
    }

    #[test]
    fn test_reverse_lookup_returns_first_entry() {
        let mut smap = SourceMap::default();
        smap.load_string(
            "MAP Main:10 -> 0 [Main.main]\n\
             MAP Main:10 -> 1 [Main.main]\n\
             MAP Main:10 -> 2 [Main.main]\n\
             MAP Main:11 -> 3 [Main.main]\n\
             MAP Other:5 -> 10 [Other.foo]\n",
            "test.smap",
        )
        .unwrap();

        assert_eq!(Some(0), smap.vm_index_for_line("Main", 10));
        assert_eq!(None, smap.vm_index_for_line("Main", 99));
        assert_eq!(vec![0, 1, 2], smap.all_vm_indices_for_line("Main", 10));
        assert_eq!("Other", smap.entry_for_vm(10).unwrap().jack_file);
        assert_eq!(None, smap.entry_for_vm(99).map(|e| e.vm_index));
    }

    #[test]
    fn test_comments_and_blank_lines() {
        let mut smap = SourceMap::default();
        smap.load_string(
            "# comment\n\n   \nMAP Main:1 -> 0 [Main.main]\n",
            "test.smap",
        )
        .unwrap();
        assert_eq!(1, smap.entries().len());
    }

    #[test]
    fn test_directive_errors() {
        let mut smap = SourceMap::default();
        assert!(matches!(
            smap.load_string("INVALID line\n", "t"),
            Err(SimError::Parse { .. })
        ));
        assert!(matches!(
            smap.load_string("VAR local int x 0\n", "t"),
            Err(SimError::Parse { .. })
        ));
        assert!(matches!(
            smap.load_string("FIELD int x\n", "t"),
            Err(SimError::Parse { .. })
        ));
        assert!(matches!(
            smap.load_string("MAP Main10 -> 0\n", "t"),
            Err(SimError::Parse { .. })
        ));
    }

    #[test]
    fn test_metadata_listings() {
        let mut smap = SourceMap::default();
        smap.load_string(
            "FUNC Main.main\n\
             VAR local int x 0\n\
             FUNC Math.add\n\
             VAR argument int a 0\n\
             CLASS Point\n\
             FIELD int x\n\
             CLASS Circle\n\
             FIELD int radius\n",
            "t",
        )
        .unwrap();

        assert_eq!(2, smap.function_names().len());
        assert_eq!(2, smap.class_names().len());
    }
}
