//! Line-oriented parser for `.vm` files.
//!
//! The parser accumulates commands from one or many files into a single
//! [VmProgram] with the label and function index tables the engine dispatches
//! through. Labels are scoped as `function$label`; the file basename owns the
//! static segment of its commands.

use crate::definitions::LineNumber;
use crate::error::{format_suggestion, SimError, SimResult};
use crate::parse::file_basename;
use crate::simulators::vm::command::{ArithmeticOp, Segment, VmCommand};
use std::collections::HashMap;
use std::str::FromStr;

/// A fully parsed multi-file VM program.
#[derive(Debug, Default, Clone)]
pub struct VmProgram {
    pub commands: Vec<VmCommand>,
    /// scoped label name -> command index
    pub label_positions: HashMap<String, usize>,
    /// function name -> index of its `function` command
    pub function_entry_points: HashMap<String, usize>,
    /// the files the program was assembled from, in parse order
    pub source_files: Vec<String>,
}

/// Accumulating parser over one or many `.vm` sources.
///
/// ```
/// use hack_emu::parse::bytecode::Parser;
///
/// let mut parser = Parser::default();
/// parser.parse_string("push constant 7\npush constant 8\nadd\n", "Main.vm").unwrap();
/// let program = parser.into_program();
/// assert_eq!(3, program.commands.len());
/// ```
#[derive(Default)]
pub struct Parser {
    commands: Vec<VmCommand>,
    label_positions: HashMap<String, usize>,
    function_entry_points: HashMap<String, usize>,
    source_files: Vec<String>,

    current_file: String,
    current_function: String,
    current_line: LineNumber,
}

impl Parser {
    pub fn parse_file(&mut self, file_path: &str) -> SimResult {
        let content = std::fs::read_to_string(file_path)
            .map_err(|e| SimError::file(file_path, format!("Could not open file: {}", e)))?;
        self.parse_string(&content, file_path)
    }

    pub fn parse_string(&mut self, source: &str, file_name: &str) -> SimResult {
        self.current_file = file_basename(file_name).to_string();
        self.source_files.push(file_name.to_string());
        self.current_line = 0;

        for line in source.lines() {
            self.current_line += 1;
            if let Some(command) = self.parse_line(line)? {
                self.commands.push(command);
            }
        }

        Ok(())
    }

    /// Parse every `*.vm` file in a directory, in lexicographic order.
    pub fn parse_directory(&mut self, directory_path: &str) -> SimResult {
        let entries = std::fs::read_dir(directory_path)
            .map_err(|e| SimError::file(directory_path, format!("Directory does not exist: {}", e)))?;

        let mut vm_files: Vec<String> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.extension().map_or(false, |ext| ext == "vm"))
            .filter_map(|p| p.to_str().map(str::to_owned))
            .collect();
        vm_files.sort();

        log::debug!("parsing {} .vm files from {}", vm_files.len(), directory_path);
        for file in vm_files {
            self.parse_file(&file)?;
        }
        Ok(())
    }

    pub fn into_program(self) -> VmProgram {
        VmProgram {
            commands: self.commands,
            label_positions: self.label_positions,
            function_entry_points: self.function_entry_points,
            source_files: self.source_files,
        }
    }

    // line parsing

    fn parse_line(&mut self, line: &str) -> SimResult<Option<VmCommand>> {
        let cleaned = match line.find("//") {
            Some(pos) => &line[..pos],
            None => line,
        }
        .trim();

        if cleaned.is_empty() {
            return Ok(None);
        }

        let tokens: Vec<&str> = cleaned.split_whitespace().collect();
        let keyword = tokens[0];

        if let Ok(op) = ArithmeticOp::from_str(keyword) {
            if tokens.len() != 1 {
                return Err(self.error(format!("{} takes no arguments", keyword)));
            }
            return Ok(Some(VmCommand::Arithmetic {
                op,
                source_line: self.current_line,
            }));
        }

        let command = match keyword {
            "push" => self.parse_push(&tokens)?,
            "pop" => self.parse_pop(&tokens)?,
            "label" => self.parse_label(&tokens)?,
            "goto" => self.parse_goto(&tokens)?,
            "if-goto" => self.parse_if_goto(&tokens)?,
            "function" => self.parse_function(&tokens)?,
            "call" => self.parse_call(&tokens)?,
            "return" => {
                if tokens.len() != 1 {
                    return Err(self.error("return takes no arguments"));
                }
                VmCommand::Return {
                    source_line: self.current_line,
                }
            }
            _ => return Err(self.unknown_command(keyword)),
        };

        Ok(Some(command))
    }

    fn parse_push(&mut self, tokens: &[&str]) -> SimResult<VmCommand> {
        if tokens.len() != 3 {
            return Err(self.error("push requires 2 arguments: push segment index"));
        }

        let segment = self.parse_segment(tokens[1])?;
        let index = self.parse_index(tokens[2])?;
        self.check_segment_index(segment, index, tokens[2])?;

        Ok(VmCommand::Push {
            segment,
            index,
            file_name: self.current_file.clone(),
            source_line: self.current_line,
        })
    }

    fn parse_pop(&mut self, tokens: &[&str]) -> SimResult<VmCommand> {
        if tokens.len() != 3 {
            return Err(self.error("pop requires 2 arguments: pop segment index"));
        }

        let segment = self.parse_segment(tokens[1])?;
        let index = self.parse_index(tokens[2])?;

        if segment == Segment::Constant {
            return Err(self.error("Cannot pop to constant segment (constants are read-only)"));
        }
        self.check_segment_index(segment, index, tokens[2])?;

        Ok(VmCommand::Pop {
            segment,
            index,
            file_name: self.current_file.clone(),
            source_line: self.current_line,
        })
    }

    fn check_segment_index(&self, segment: Segment, index: u16, index_str: &str) -> SimResult {
        if segment == Segment::Temp && index > 7 {
            return Err(self.error(format!(
                "temp segment only has indices 0-7, got {}",
                index_str
            )));
        }
        if segment == Segment::Pointer && index > 1 {
            return Err(self.error(format!(
                "pointer segment only has indices 0-1, got {}",
                index_str
            )));
        }
        Ok(())
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
        if self.label_positions.contains_key(&scoped) {
            return Err(self.error(format!(
                "Duplicate label: '{}' (already defined in this function)",
                name
            )));
        }
        self.label_positions.insert(scoped, self.commands.len());

        Ok(VmCommand::Label {
            name,
            source_line: self.current_line,
        })
    }

    fn parse_goto(&mut self, tokens: &[&str]) -> SimResult<VmCommand> {
        if tokens.len() != 2 {
            return Err(self.error("goto requires 1 argument: goto labelName"));
        }
        Ok(VmCommand::Goto {
            label: tokens[1].to_string(),
            source_line: self.current_line,
        })
    }

    fn parse_if_goto(&mut self, tokens: &[&str]) -> SimResult<VmCommand> {
        if tokens.len() != 2 {
            return Err(self.error("if-goto requires 1 argument: if-goto labelName"));
        }
        Ok(VmCommand::IfGoto {
            label: tokens[1].to_string(),
            source_line: self.current_line,
        })
    }

    fn parse_function(&mut self, tokens: &[&str]) -> SimResult<VmCommand> {
        if tokens.len() != 3 {
            return Err(self.error("function requires 2 arguments: function functionName nVars"));
        }

        let name = tokens[1].to_string();
        let num_locals = self.parse_index(tokens[2])?;

        if !is_valid_identifier(&name) {
            return Err(self.error(format!("Invalid function name: '{}'", name)));
        }

        // later labels are scoped to this function
        self.current_function = name.clone();

        if self.function_entry_points.contains_key(&name) {
            return Err(self.error(format!("Duplicate function definition: '{}'", name)));
        }
        self.function_entry_points
            .insert(name.clone(), self.commands.len());

        Ok(VmCommand::Function {
            name,
            num_locals,
            source_line: self.current_line,
        })
    }

    fn parse_call(&mut self, tokens: &[&str]) -> SimResult<VmCommand> {
        if tokens.len() != 3 {
            return Err(self.error("call requires 2 arguments: call functionName nArgs"));
        }

        Ok(VmCommand::Call {
            function: tokens[1].to_string(),
            num_args: self.parse_index(tokens[2])?,
            source_line: self.current_line,
        })
    }

    fn parse_segment(&self, segment_str: &str) -> SimResult<Segment> {
        if let Ok(segment) = Segment::from_str(segment_str) {
            return Ok(segment);
        }

        let suggestion = match segment_str {
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
                format_suggestion(segment_str, correct)
            )));
        }

        Err(self.error(format!(
            "Unknown segment: '{}'. Valid segments: local, argument, this, that, \
             constant, static, temp, pointer",
            segment_str
        )))
    }

    fn parse_index(&self, index_str: &str) -> SimResult<u16> {
        if index_str.is_empty() || !index_str.chars().all(|c| c.is_ascii_digit()) {
            return Err(self.error(format!(
                "Index must be a non-negative integer, got '{}'",
                index_str
            )));
        }

        match index_str.parse::<u32>() {
            Ok(value) if value <= 32767 => Ok(value as u16),
            Ok(_) => Err(self.error(format!("Index out of range (max 32767), got {}", index_str))),
            Err(_) => Err(self.error(format!("Invalid index: '{}'", index_str))),
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
                format_suggestion(keyword, correct)
            )),
            None => self.error(format!("Unknown command: '{}'", keyword)),
        }
    }

    fn scoped_label(&self, label: &str) -> String {
        if self.current_function.is_empty() {
            label.to_string()
        } else {
            format!("{}${}", self.current_function, label)
        }
    }

    fn error(&self, message: impl Into<String>) -> SimError {
        SimError::parse(&self.current_file, self.current_line, message)
    }
}

fn is_valid_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' || c == '.' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '.')
}

fn is_valid_label(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' || c == ':' || c == '.' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == ':' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;

    fn parse_one(source: &str) -> VmProgram {
        let mut parser = Parser::default();
        parser.parse_string(source, "Main.vm").unwrap();
        parser.into_program()
    }

    #[test]
    fn test_parse_basic_commands() {
        let program = parse_one(
            r#"
            // adds two constants
            push constant 7
            push constant 8
            add
            "#,
        );

        assert_eq!(
            vec![
                VmCommand::Push {
                    segment: Segment::Constant,
                    index: 7,
                    file_name: "Main".to_string(),
                    source_line: 3,
                },
                VmCommand::Push {
                    segment: Segment::Constant,
                    index: 8,
                    file_name: "Main".to_string(),
                    source_line: 4,
                },
                VmCommand::Arithmetic {
                    op: ArithmeticOp::Add,
                    source_line: 5,
                },
            ],
            program.commands
        );
    }

    #[test]
    fn test_labels_are_scoped_to_functions() {
        let program = parse_one(
            r#"
            function Main.main 0
            label LOOP
            goto LOOP
            return
            function Main.other 0
            label LOOP
            goto LOOP
            return
            "#,
        );

        assert_eq!(Some(&1), program.label_positions.get("Main.main$LOOP"));
        assert_eq!(Some(&5), program.label_positions.get("Main.other$LOOP"));
        assert_eq!(Some(&0), program.function_entry_points.get("Main.main"));
        assert_eq!(Some(&4), program.function_entry_points.get("Main.other"));
    }

    #[test]
    fn test_label_outside_function_is_unscoped() {
        let program = parse_one("label TOP\ngoto TOP\n");
        assert_eq!(Some(&0), program.label_positions.get("TOP"));
    }

    #[test]
    fn test_duplicate_label_in_function_is_error() {
        let mut parser = Parser::default();
        let err = parser
            .parse_string(
                "function Main.main 0\nlabel A\nlabel A\n",
                "Main.vm",
            )
            .unwrap_err();
        assert_eq!(ErrorCategory::Parse, err.category);
        assert!(err.message.contains("Duplicate label"));
        assert_eq!(Some(3), err.line);
    }

    #[test]
    fn test_same_label_in_different_functions_is_fine() {
        let program = parse_one(
            "function A.f 0\nlabel X\nreturn\nfunction B.g 0\nlabel X\nreturn\n",
        );
        assert_eq!(2, program.label_positions.len());
    }

    #[test]
    fn test_duplicate_function_is_error() {
        let mut parser = Parser::default();
        let err = parser
            .parse_string(
                "function Main.main 0\nreturn\nfunction Main.main 0\nreturn\n",
                "Main.vm",
            )
            .unwrap_err();
        assert!(err.message.contains("Duplicate function"));
    }

    #[test]
    fn test_pop_constant_is_error() {
        let mut parser = Parser::default();
        let err = parser.parse_string("pop constant 5\n", "Main.vm").unwrap_err();
        assert!(err.message.contains("constant"));
    }

    #[test]
    fn test_temp_and_pointer_index_limits() {
        let mut parser = Parser::default();
        assert!(parser.parse_string("push temp 8\n", "Main.vm").is_err());

        let mut parser = Parser::default();
        assert!(parser.parse_string("pop pointer 2\n", "Main.vm").is_err());

        let mut parser = Parser::default();
        assert!(parser
            .parse_string("push temp 7\npush pointer 1\n", "Main.vm")
            .is_ok());
    }

    #[test]
    fn test_index_out_of_range() {
        let mut parser = Parser::default();
        let err = parser
            .parse_string("push constant 32768\n", "Main.vm")
            .unwrap_err();
        assert!(err.message.contains("32767"));

        let mut parser = Parser::default();
        assert!(parser.parse_string("push constant -1\n", "Main.vm").is_err());
    }

    #[test]
    fn test_typo_suggestions() {
        let mut parser = Parser::default();
        let err = parser.parse_string("psh constant 1\n", "Main.vm").unwrap_err();
        assert!(err.message.contains("'psh' (did you mean 'push'?)"));

        let mut parser = Parser::default();
        let err = parser.parse_string("ifgoto END\n", "Main.vm").unwrap_err();
        assert!(err.message.contains("'ifgoto' (did you mean 'if-goto'?)"));

        let mut parser = Parser::default();
        let err = parser.parse_string("push const 1\n", "Main.vm").unwrap_err();
        assert!(err.message.contains("'const' (did you mean 'constant'?)"));
    }

    #[test]
    fn test_unknown_command_without_suggestion() {
        let mut parser = Parser::default();
        let err = parser.parse_string("frobnicate\n", "Main.vm").unwrap_err();
        assert_eq!(
            "Parse Error in Main:1 - Unknown command: 'frobnicate'",
            err.to_string()
        );
    }

    #[test]
    fn test_statics_carry_their_owning_file() {
        let mut parser = Parser::default();
        parser.parse_string("push static 0\n", "One.vm").unwrap();
        parser.parse_string("push static 0\n", "Two.vm").unwrap();
        let program = parser.into_program();

        assert_eq!(
            VmCommand::Push {
                segment: Segment::Static,
                index: 0,
                file_name: "One".to_string(),
                source_line: 1,
            },
            program.commands[0]
        );
        assert_eq!(
            VmCommand::Push {
                segment: Segment::Static,
                index: 0,
                file_name: "Two".to_string(),
                source_line: 1,
            },
            program.commands[1]
        );
        assert_eq!(vec!["One.vm", "Two.vm"], program.source_files);
    }

    #[test]
    fn test_multi_file_function_index() {
        let mut parser = Parser::default();
        parser
            .parse_string("function Sys.init 0\ncall Main.main 0\nreturn\n", "Sys.vm")
            .unwrap();
        parser
            .parse_string("function Main.main 0\npush constant 1\nreturn\n", "Main.vm")
            .unwrap();
        let program = parser.into_program();

        assert_eq!(Some(&0), program.function_entry_points.get("Sys.init"));
        assert_eq!(Some(&3), program.function_entry_points.get("Main.main"));
        assert_eq!(6, program.commands.len());
    }
}
