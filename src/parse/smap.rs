//! Parser for `.smap` source maps: the bridge between Jack source locations
//! and VM command indices, plus the symbol tables and class layouts the
//! debugger reads variables through.
//!
//! Directives, one per line (`#` starts a comment):
//!
//! ```text
//! MAP   Main:10 -> 45 [Main.main]
//! FUNC  Main.main
//! VAR   local int sum 0
//! CLASS Point
//! FIELD int x
//! ```

use crate::definitions::LineNumber;
use crate::error::{SimError, SimResult};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JackVarKind {
    Local,
    Argument,
    Field,
    Static,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JackVariable {
    pub name: String,
    pub type_name: String,
    pub kind: JackVarKind,
    pub index: u16,
}

/// The four ordered variable lists of one function.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionSymbols {
    pub function_name: String,
    pub class_name: String,
    pub locals: Vec<JackVariable>,
    pub arguments: Vec<JackVariable>,
    pub fields: Vec<JackVariable>,
    pub statics: Vec<JackVariable>,
}

/// One MAP directive: a Jack line and the VM command it compiled to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub jack_file: String,
    pub jack_line: LineNumber,
    pub vm_command_index: usize,
    pub function_name: String,
}

/// The ordered field list of a class, field index = position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassLayout {
    pub class_name: String,
    pub fields: Vec<JackVariable>,
}

/// Bidirectional line <-> VM-index lookup plus symbol tables. Immutable
/// after loading completes.
#[derive(Debug, Default)]
pub struct SourceMap {
    entries: Vec<SourceEntry>,
    /// vm index -> entry index (forward, O(1))
    vm_to_entry: HashMap<usize, usize>,
    /// (file, line) -> first entry recorded (reverse, ordered)
    line_to_entry: BTreeMap<(String, LineNumber), usize>,
    function_symbols: HashMap<String, FunctionSymbols>,
    class_layouts: HashMap<String, ClassLayout>,

    current_func_name: String,
    current_class_name: String,
}

impl SourceMap {
    pub fn load_file(&mut self, file_path: &str) -> SimResult {
        let content = std::fs::read_to_string(file_path)
            .map_err(|e| SimError::file(file_path, format!("Cannot open source map file: {}", e)))?;
        self.load_string(&content, file_path)
    }

    pub fn load_string(&mut self, source: &str, name: &str) -> SimResult {
        self.clear();

        for (idx, raw_line) in source.lines().enumerate() {
            let line_num = idx + 1;
            let line = raw_line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            self.parse_line(line, line_num, name)?;
        }

        log::debug!(
            "source map '{}': {} entries, {} functions, {} classes",
            name,
            self.entries.len(),
            self.function_symbols.len(),
            self.class_layouts.len()
        );
        Ok(())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.vm_to_entry.clear();
        self.line_to_entry.clear();
        self.function_symbols.clear();
        self.class_layouts.clear();
        self.current_func_name.clear();
        self.current_class_name.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[SourceEntry] {
        &self.entries
    }

    // queries

    /// Forward lookup: which Jack location does a VM command map to?
    pub fn get_entry_for_vm(&self, vm_index: usize) -> Option<&SourceEntry> {
        self.vm_to_entry.get(&vm_index).map(|&i| &self.entries[i])
    }

    /// Reverse lookup: the first VM command recorded for a Jack line.
    pub fn get_vm_index_for_line(&self, file: &str, line: LineNumber) -> Option<usize> {
        self.line_to_entry
            .get(&(file.to_string(), line))
            .map(|&i| self.entries[i].vm_command_index)
    }

    /// All VM commands a Jack line compiled to, in recording order.
    /// Used for breakpoint synchronization.
    pub fn get_all_vm_indices_for_line(&self, file: &str, line: LineNumber) -> Vec<usize> {
        self.entries
            .iter()
            .filter(|e| e.jack_file == file && e.jack_line == line)
            .map(|e| e.vm_command_index)
            .collect()
    }

    pub fn get_function_symbols(&self, function_name: &str) -> Option<&FunctionSymbols> {
        self.function_symbols.get(function_name)
    }

    pub fn get_class_layout(&self, class_name: &str) -> Option<&ClassLayout> {
        self.class_layouts.get(class_name)
    }

    pub fn function_names(&self) -> Vec<&str> {
        self.function_symbols.keys().map(String::as_str).collect()
    }

    pub fn class_names(&self) -> Vec<&str> {
        self.class_layouts.keys().map(String::as_str).collect()
    }

    // parsing

    fn parse_line(&mut self, line: &str, line_num: LineNumber, source_name: &str) -> SimResult {
        if let Some(rest) = line.strip_prefix("MAP ") {
            self.parse_map(rest, line_num, source_name)
        } else if let Some(rest) = line.strip_prefix("FUNC ") {
            self.parse_func(rest, line_num, source_name)
        } else if let Some(rest) = line.strip_prefix("VAR ") {
            self.parse_var(rest, line_num, source_name)
        } else if let Some(rest) = line.strip_prefix("CLASS ") {
            self.parse_class(rest, line_num, source_name)
        } else if let Some(rest) = line.strip_prefix("FIELD ") {
            self.parse_field(rest, line_num, source_name)
        } else {
            Err(SimError::parse(
                source_name,
                line_num,
                format!("Unknown source map directive: '{}'", line),
            ))
        }
    }

    fn parse_map(&mut self, rest: &str, line_num: LineNumber, source_name: &str) -> SimResult {
        // Main:10 -> 45 [Main.main]
        let mut tokens = rest.split_whitespace();
        let location = tokens.next().unwrap_or("");
        let arrow = tokens.next().unwrap_or("");
        let index_str = tokens.next().unwrap_or("");

        if arrow != "->" {
            return Err(SimError::parse(
                source_name,
                line_num,
                format!("Invalid MAP format: 'MAP {}'", rest),
            ));
        }

        let (jack_file, line_str) = location.split_once(':').ok_or_else(|| {
            SimError::parse(
                source_name,
                line_num,
                format!("Invalid MAP source location: '{}'", location),
            )
        })?;

        let jack_line: LineNumber = line_str.parse().map_err(|_| {
            SimError::parse(
                source_name,
                line_num,
                format!("Invalid line number in MAP: '{}'", location),
            )
        })?;

        let vm_command_index: usize = index_str.parse().map_err(|_| {
            SimError::parse(
                source_name,
                line_num,
                format!("Invalid VM index in MAP: '{}'", index_str),
            )
        })?;

        let function_name = tokens
            .next()
            .and_then(|t| t.strip_prefix('['))
            .and_then(|t| t.strip_suffix(']'))
            .unwrap_or("")
            .to_string();

        let entry_index = self.entries.len();
        self.entries.push(SourceEntry {
            jack_file: jack_file.to_string(),
            jack_line,
            vm_command_index,
            function_name,
        });
        self.vm_to_entry.insert(vm_command_index, entry_index);

        // the reverse map keeps the first entry per (file, line)
        self.line_to_entry
            .entry((jack_file.to_string(), jack_line))
            .or_insert(entry_index);

        Ok(())
    }

    fn parse_func(&mut self, rest: &str, line_num: LineNumber, source_name: &str) -> SimResult {
        let func_name = rest.split_whitespace().next().unwrap_or("");
        if func_name.is_empty() {
            return Err(SimError::parse(
                source_name,
                line_num,
                format!("Invalid FUNC format: 'FUNC {}'", rest),
            ));
        }

        self.current_func_name = func_name.to_string();

        let class_name = func_name.split('.').next().unwrap_or("").to_string();
        let symbols = self
            .function_symbols
            .entry(func_name.to_string())
            .or_default();
        symbols.function_name = func_name.to_string();
        symbols.class_name = class_name;
        Ok(())
    }

    fn parse_var(&mut self, rest: &str, line_num: LineNumber, source_name: &str) -> SimResult {
        // local int sum 0
        let tokens: Vec<&str> = rest.split_whitespace().collect();
        if tokens.len() != 4 {
            return Err(SimError::parse(
                source_name,
                line_num,
                format!("Invalid VAR format: 'VAR {}'", rest),
            ));
        }

        if self.current_func_name.is_empty() {
            return Err(SimError::parse(
                source_name,
                line_num,
                "VAR without preceding FUNC",
            ));
        }

        let kind = match tokens[0] {
            "local" => JackVarKind::Local,
            "argument" => JackVarKind::Argument,
            "field" => JackVarKind::Field,
            "static" => JackVarKind::Static,
            other => {
                return Err(SimError::parse(
                    source_name,
                    line_num,
                    format!("Invalid variable kind: '{}'", other),
                ))
            }
        };

        let index: u16 = tokens[3].parse().map_err(|_| {
            SimError::parse(
                source_name,
                line_num,
                format!("Invalid variable index: '{}'", tokens[3]),
            )
        })?;

        let var = JackVariable {
            name: tokens[2].to_string(),
            type_name: tokens[1].to_string(),
            kind,
            index,
        };

        let symbols = self
            .function_symbols
            .entry(self.current_func_name.clone())
            .or_default();
        match kind {
            JackVarKind::Local => symbols.locals.push(var),
            JackVarKind::Argument => symbols.arguments.push(var),
            JackVarKind::Field => symbols.fields.push(var),
            JackVarKind::Static => symbols.statics.push(var),
        }
        Ok(())
    }

    fn parse_class(&mut self, rest: &str, line_num: LineNumber, source_name: &str) -> SimResult {
        let class_name = rest.split_whitespace().next().unwrap_or("");
        if class_name.is_empty() {
            return Err(SimError::parse(
                source_name,
                line_num,
                format!("Invalid CLASS format: 'CLASS {}'", rest),
            ));
        }

        self.current_class_name = class_name.to_string();
        self.class_layouts
            .entry(class_name.to_string())
            .or_default()
            .class_name = class_name.to_string();
        Ok(())
    }

    fn parse_field(&mut self, rest: &str, line_num: LineNumber, source_name: &str) -> SimResult {
        // int x
        let tokens: Vec<&str> = rest.split_whitespace().collect();
        if tokens.len() != 2 {
            return Err(SimError::parse(
                source_name,
                line_num,
                format!("Invalid FIELD format: 'FIELD {}'", rest),
            ));
        }

        if self.current_class_name.is_empty() {
            return Err(SimError::parse(
                source_name,
                line_num,
                "FIELD without preceding CLASS",
            ));
        }

        let layout = self
            .class_layouts
            .entry(self.current_class_name.clone())
            .or_default();
        let index = layout.fields.len() as u16;
        layout.fields.push(JackVariable {
            name: tokens[1].to_string(),
            type_name: tokens[0].to_string(),
            kind: JackVarKind::Field,
            index,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_map() -> SourceMap {
        let src = r#"
# generated by the Jack compiler
CLASS Point
FIELD int x
FIELD int y
FIELD Point next

FUNC Point.getX
VAR argument Point this 0
MAP Point:12 -> 3 [Point.getX]
MAP Point:13 -> 5 [Point.getX]

FUNC Main.main
VAR local int sum 0
VAR local Array data 1
VAR argument int argc 0
VAR static int counter 0
MAP Main:10 -> 45 [Main.main]
MAP Main:10 -> 46 [Main.main]
MAP Main:11 -> 48 [Main.main]
"#;
        let mut map = SourceMap::default();
        map.load_string(src, "test.smap").unwrap();
        map
    }

    #[test]
    fn test_forward_lookup() {
        let map = sample_map();
        let entry = map.get_entry_for_vm(45).unwrap();
        assert_eq!("Main", entry.jack_file);
        assert_eq!(10, entry.jack_line);
        assert_eq!("Main.main", entry.function_name);
        assert!(map.get_entry_for_vm(999).is_none());
    }

    #[test]
    fn test_reverse_lookup_keeps_first_entry() {
        let map = sample_map();
        assert_eq!(Some(45), map.get_vm_index_for_line("Main", 10));
        assert_eq!(Some(48), map.get_vm_index_for_line("Main", 11));
        assert_eq!(None, map.get_vm_index_for_line("Main", 99));
    }

    #[test]
    fn test_all_indices_for_line() {
        let map = sample_map();
        assert_eq!(vec![45, 46], map.get_all_vm_indices_for_line("Main", 10));
        assert_eq!(vec![3], map.get_all_vm_indices_for_line("Point", 12));
        assert!(map.get_all_vm_indices_for_line("Main", 99).is_empty());
    }

    #[test]
    fn test_every_map_entry_is_findable_both_ways() {
        let map = sample_map();
        for entry in map.entries() {
            let found = map.get_entry_for_vm(entry.vm_command_index).unwrap();
            assert_eq!(entry.jack_file, found.jack_file);
            assert_eq!(entry.jack_line, found.jack_line);
            assert!(map
                .get_all_vm_indices_for_line(&entry.jack_file, entry.jack_line)
                .contains(&entry.vm_command_index));
        }
    }

    #[test]
    fn test_function_symbols_by_kind() {
        let map = sample_map();
        let symbols = map.get_function_symbols("Main.main").unwrap();
        assert_eq!("Main", symbols.class_name);
        assert_eq!(2, symbols.locals.len());
        assert_eq!(1, symbols.arguments.len());
        assert_eq!(1, symbols.statics.len());
        assert_eq!("sum", symbols.locals[0].name);
        assert_eq!("Array", symbols.locals[1].type_name);
        assert_eq!(JackVarKind::Static, symbols.statics[0].kind);
    }

    #[test]
    fn test_class_layout_indices_follow_position() {
        let map = sample_map();
        let layout = map.get_class_layout("Point").unwrap();
        assert_eq!(3, layout.fields.len());
        assert_eq!(("x", 0), (layout.fields[0].name.as_str(), layout.fields[0].index));
        assert_eq!(("y", 1), (layout.fields[1].name.as_str(), layout.fields[1].index));
        assert_eq!(("next", 2), (layout.fields[2].name.as_str(), layout.fields[2].index));
    }

    #[test]
    fn test_var_without_func_is_parse_error() {
        let mut map = SourceMap::default();
        let err = map
            .load_string("VAR local int x 0\n", "bad.smap")
            .unwrap_err();
        assert!(err.message.contains("VAR without preceding FUNC"));
    }

    #[test]
    fn test_field_without_class_is_parse_error() {
        let mut map = SourceMap::default();
        let err = map.load_string("FIELD int x\n", "bad.smap").unwrap_err();
        assert!(err.message.contains("FIELD without preceding CLASS"));
    }

    #[test]
    fn test_unknown_directive_is_parse_error() {
        let mut map = SourceMap::default();
        let err = map.load_string("FROB Main:1 -> 2\n", "bad.smap").unwrap_err();
        assert!(err.message.contains("Unknown source map directive"));
        assert_eq!(Some(1), err.line);
    }

    #[test]
    fn test_malformed_map_lines() {
        let mut map = SourceMap::default();
        assert!(map.load_string("MAP Main:1 => 2\n", "bad.smap").is_err());

        let mut map = SourceMap::default();
        assert!(map.load_string("MAP Main1 -> 2\n", "bad.smap").is_err());

        let mut map = SourceMap::default();
        assert!(map.load_string("MAP Main:x -> 2\n", "bad.smap").is_err());
    }
}
