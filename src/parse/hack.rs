//! Loader for `.hack` files: one 16-bit instruction per line, written as
//! exactly 16 characters of '0' and '1'.

use crate::definitions::{Word, ROM_SIZE};
use crate::error::{SimError, SimResult};

/// Parse the text of a `.hack` file into instruction words.
///
/// Blank lines are skipped, trailing whitespace and CR are trimmed. Anything
/// else that is not exactly 16 binary digits is a parse error naming the line
/// and the offending character.
pub fn parse_hack_string(source: &str, file_name: &str) -> SimResult<Vec<Word>> {
    let mut instructions = Vec::new();

    for (idx, raw_line) in source.lines().enumerate() {
        let line_number = idx + 1;
        let line = raw_line.trim_end_matches(|c| c == '\r' || c == ' ' || c == '\t');

        if line.is_empty() {
            continue;
        }

        if instructions.len() >= ROM_SIZE {
            return Err(SimError::parse(
                file_name,
                line_number,
                format!(
                    "Program too large! ROM can hold at most {} instructions.",
                    ROM_SIZE
                ),
            ));
        }

        instructions.push(parse_binary_line(line, file_name, line_number)?);
    }

    log::debug!(
        "loaded {} instructions from {}",
        instructions.len(),
        file_name
    );
    Ok(instructions)
}

fn parse_binary_line(line: &str, file_name: &str, line_number: usize) -> SimResult<Word> {
    if line.chars().count() != 16 {
        return Err(SimError::parse(
            file_name,
            line_number,
            format!(
                "Expected 16-bit binary instruction (16 characters of '0' and '1'), \
                 got {} characters: \"{}\"",
                line.chars().count(),
                line
            ),
        ));
    }

    let mut result: Word = 0;
    for (i, c) in line.chars().enumerate() {
        match c {
            '1' => result |= 1 << (15 - i),
            '0' => {}
            _ => {
                return Err(SimError::parse(
                    file_name,
                    line_number,
                    format!(
                        "Invalid character '{}' at position {}. \
                         Only '0' and '1' are allowed in .hack files.",
                        c,
                        i + 1
                    ),
                ))
            }
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;

    #[test]
    fn test_parse_simple_program() {
        let src = "0000000000000010\n1110110000010000\n\n0000000000000011\r\n";
        let program = parse_hack_string(src, "Add.hack").unwrap();
        assert_eq!(vec![2, 0b1110110000010000, 3], program);
    }

    #[test]
    fn test_final_newline_is_optional() {
        let program = parse_hack_string("1111111111111111", "T.hack").unwrap();
        assert_eq!(vec![0xFFFF], program);
    }

    #[test]
    fn test_wrong_length_is_parse_error() {
        let err = parse_hack_string("01010\n", "Bad.hack").unwrap_err();
        assert_eq!(ErrorCategory::Parse, err.category);
        assert_eq!(Some("Bad.hack".to_string()), err.file);
        assert_eq!(Some(1), err.line);
    }

    #[test]
    fn test_invalid_character_names_position() {
        let err = parse_hack_string("00000000000000x0\n", "Bad.hack").unwrap_err();
        assert_eq!(ErrorCategory::Parse, err.category);
        assert!(err.message.contains("'x'"));
        assert!(err.message.contains("position 15"));
    }

    #[test]
    fn test_error_reports_correct_line() {
        let src = "0000000000000001\n0000000000000002\n";
        let err = parse_hack_string(src, "Bad.hack").unwrap_err();
        assert_eq!(Some(2), err.line);
    }
}
