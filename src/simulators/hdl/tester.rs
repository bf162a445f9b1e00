//! Executes parsed `.tst` scripts against a chip: drives pins, formats
//! output rows and diffs them against `.cmp` expectations.

use super::chip::{Chip, ChipResolver};
use crate::error::{SimError, SimResult};
use crate::parse::script::{parse_tst_string, NumberFormat, OutputColumn, TstCommand};

#[derive(Default)]
pub struct TstRunner {
    commands: Vec<TstCommand>,
    pos: usize,

    chip: Option<Chip>,

    output_columns: Vec<OutputColumn>,
    output: String,
    output_file_name: Option<String>,
    compare_file_name: Option<String>,

    compare_lines: Vec<String>,
    output_row: usize,
    comparison_error: Option<String>,

    clock_cycle: u64,
    in_tick_phase: bool,

    script_name: String,
}

impl TstRunner {
    /// Parse a test script, replacing any previously loaded one.
    pub fn parse(&mut self, source: &str, name: &str) -> SimResult {
        self.commands = parse_tst_string(source, name)?;
        self.script_name = name.to_string();
        self.pos = 0;
        self.output.clear();
        self.output_columns.clear();
        self.output_row = 0;
        self.comparison_error = None;
        self.clock_cycle = 0;
        self.in_tick_phase = false;
        Ok(())
    }

    /// Install the expected `.cmp` text. The first non-empty line is the
    /// header and is never compared against data rows.
    pub fn set_compare_data(&mut self, cmp_data: &str) {
        self.compare_lines = cmp_data
            .lines()
            .map(|line| line.trim_end_matches(|c| c == '\r' || c == ' ').to_string())
            .filter(|line| !line.is_empty())
            .collect();
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn command_count(&self) -> usize {
        self.commands.len()
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn output_file_name(&self) -> Option<&str> {
        self.output_file_name.as_deref()
    }

    pub fn compare_file_name(&self) -> Option<&str> {
        self.compare_file_name.as_deref()
    }

    pub fn has_comparison_error(&self) -> bool {
        self.comparison_error.is_some()
    }

    pub fn comparison_error(&self) -> Option<&str> {
        self.comparison_error.as_deref()
    }

    pub fn chip(&self) -> Option<&Chip> {
        self.chip.as_ref()
    }

    pub fn chip_mut(&mut self) -> Option<&mut Chip> {
        self.chip.as_mut()
    }

    /// Execute the next command. Returns false when the script is finished.
    pub fn step(&mut self, resolver: &mut dyn ChipResolver) -> SimResult<bool> {
        if self.pos >= self.commands.len() {
            return Ok(false);
        }
        let command = self.commands[self.pos].clone();
        self.execute(&command, resolver)?;
        self.pos += 1;
        Ok(self.pos < self.commands.len())
    }

    /// Execute every remaining command. A comparison failure is recorded
    /// (first mismatch only) and the run keeps going; only engine-level
    /// errors stop it.
    pub fn run_all(&mut self, resolver: &mut dyn ChipResolver) -> SimResult {
        while self.pos < self.commands.len() {
            let command = self.commands[self.pos].clone();
            self.execute(&command, resolver)?;
            self.pos += 1;
        }
        Ok(())
    }

    /// Rewind the script, clearing output and chip state.
    pub fn reset(&mut self) {
        self.pos = 0;
        self.output.clear();
        self.output_row = 0;
        self.comparison_error = None;
        self.clock_cycle = 0;
        self.in_tick_phase = false;
        if let Some(chip) = &mut self.chip {
            chip.reset();
        }
    }

    fn execute(&mut self, command: &TstCommand, resolver: &mut dyn ChipResolver) -> SimResult {
        match command {
            TstCommand::Load { chip_name, .. } => {
                self.chip = Some(resolver.resolve(chip_name)?);
                log::debug!("test script loaded chip '{}'", chip_name);
            }
            TstCommand::OutputFile { file_name, .. } => {
                self.output_file_name = Some(file_name.clone());
            }
            TstCommand::CompareTo { file_name, .. } => {
                self.compare_file_name = Some(file_name.clone());
            }
            TstCommand::OutputList { columns, .. } => {
                self.output_columns = columns.clone();
                self.emit_header();
            }
            TstCommand::Set { target, value, .. } => {
                let chip = self.require_chip()?;
                let (name, lo, hi) = split_sub_bus(target)?;
                if lo < 0 {
                    chip.set_pin(&name, *value)?;
                } else {
                    chip.set_pin_bits(&name, lo, hi, *value)?;
                }
            }
            TstCommand::Eval { .. } => {
                self.require_chip()?.eval()?;
            }
            TstCommand::Tick { .. } => {
                self.in_tick_phase = true;
                self.require_chip()?.tick()?;
            }
            TstCommand::Tock { .. } => {
                self.in_tick_phase = false;
                self.clock_cycle += 1;
                self.require_chip()?.tock()?;
            }
            TstCommand::Output { .. } => {
                self.emit_output_row()?;
            }
        }
        Ok(())
    }

    fn require_chip(&mut self) -> SimResult<&mut Chip> {
        self.chip
            .as_mut()
            .ok_or_else(|| SimError::runtime("No chip loaded"))
    }

    fn emit_header(&mut self) {
        let mut header = String::from("|");
        for col in &self.output_columns {
            let total = col.left_pad + col.width + col.right_pad;
            let name_len = col.pin_name.len();
            let pad_left = total.saturating_sub(name_len) / 2;
            let pad_right = (total.saturating_sub(name_len)).saturating_sub(pad_left);

            header.push_str(&" ".repeat(pad_left));
            header.push_str(&col.pin_name);
            header.push_str(&" ".repeat(pad_right));
            header.push('|');
        }
        self.output.push_str(&header);
        self.output.push('\n');
    }

    fn emit_output_row(&mut self) -> SimResult {
        let chip = self
            .chip
            .as_ref()
            .ok_or_else(|| SimError::runtime("No chip loaded"))?;

        let mut row = String::from("|");
        for col in &self.output_columns {
            if col.pin_name == "time" {
                let mut time_str = if self.in_tick_phase {
                    format!("{}+", self.clock_cycle)
                } else {
                    self.clock_cycle.to_string()
                };
                while time_str.len() < col.width {
                    time_str.insert(0, ' ');
                }
                row.push_str(&" ".repeat(col.left_pad));
                row.push_str(&time_str);
                row.push_str(&" ".repeat(col.right_pad));
                row.push('|');
                continue;
            }

            let (name, lo, hi) = split_sub_bus(&col.pin_name)?;
            let value = if lo < 0 {
                chip.get_pin(&name)?
            } else {
                chip.get_pin_bits(&name, lo, hi)?
            };

            row.push_str(&format_value(value, col));
            row.push('|');
        }

        self.output.push_str(&row);
        self.output.push('\n');
        self.output_row += 1;

        self.compare_row(&row);
        Ok(())
    }

    fn compare_row(&mut self, actual: &str) {
        if self.compare_lines.is_empty() || self.comparison_error.is_some() {
            return;
        }

        // line 0 of the compare data is the header
        let cmp_index = self.output_row;
        let expected = match self.compare_lines.get(cmp_index) {
            Some(line) => line,
            None => return,
        };

        if actual != expected {
            self.comparison_error = Some(format!(
                "Comparison failure at line {}:\nExpected: {}\n  Actual: {}",
                cmp_index + 1,
                expected,
                actual
            ));
        }
    }
}

/// Split `pin`, `pin[i]` or `pin[i..j]` into `(name, lo, hi)`;
/// `lo = hi = -1` for the plain form.
fn split_sub_bus(pin: &str) -> SimResult<(String, i32, i32)> {
    let bracket = match pin.find('[') {
        Some(idx) => idx,
        None => return Ok((pin.to_string(), -1, -1)),
    };

    let name = pin[..bracket].to_string();
    let range = pin[bracket + 1..]
        .strip_suffix(']')
        .ok_or_else(|| SimError::runtime(format!("Malformed pin reference: '{}'", pin)))?;

    let parse = |s: &str| {
        s.parse::<i32>()
            .map_err(|_| SimError::runtime(format!("Malformed pin reference: '{}'", pin)))
    };

    match range.find("..") {
        Some(dotdot) => {
            let lo = parse(&range[..dotdot])?;
            let hi = parse(&range[dotdot + 2..])?;
            Ok((name, lo, hi))
        }
        None => {
            let bit = parse(range)?;
            Ok((name, bit, bit))
        }
    }
}

fn format_value(value: i64, col: &OutputColumn) -> String {
    let formatted = match col.format {
        NumberFormat::Binary => (0..col.width)
            .rev()
            .map(|b| if (value >> b) & 1 == 1 { '1' } else { '0' })
            .collect(),
        NumberFormat::Decimal => {
            let signed = (value & 0xFFFF) as u16 as i16;
            let mut s = signed.to_string();
            while s.len() < col.width {
                s.insert(0, ' ');
            }
            s
        }
        NumberFormat::Hex => {
            let mut s = format!("{:x}", value & 0xFFFF);
            while s.len() < col.width {
                s.insert(0, '0');
            }
            s
        }
        NumberFormat::Str => value.to_string(),
    };

    format!(
        "{}{}{}",
        " ".repeat(col.left_pad),
        formatted,
        " ".repeat(col.right_pad)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulators::hdl::builtins;

    struct BuiltinOnly;

    impl ChipResolver for BuiltinOnly {
        fn resolve(&mut self, name: &str) -> SimResult<Chip> {
            builtins::instantiate(name)
                .ok_or_else(|| SimError::runtime(format!("Unknown chip: '{}'", name)))
        }
    }

    const AND_SCRIPT: &str = r#"
        load And.hdl,
        output-list a%B3.1.3 b%B3.1.3 out%B3.1.3;

        set a 0, set b 0, eval, output;
        set a 0, set b 1, eval, output;
        set a 1, set b 0, eval, output;
        set a 1, set b 1, eval, output;
    "#;

    const AND_EXPECTED: &str = "\
|   a   |   b   |  out  |
|   0   |   0   |   0   |
|   0   |   1   |   0   |
|   1   |   0   |   0   |
|   1   |   1   |   1   |
";

    #[test]
    fn test_and_truth_table_output() {
        let mut runner = TstRunner::default();
        runner.parse(AND_SCRIPT, "And.tst").unwrap();
        runner.run_all(&mut BuiltinOnly).unwrap();
        assert_eq!(AND_EXPECTED, runner.output());
        assert!(!runner.has_comparison_error());
    }

    #[test]
    fn test_comparison_success() {
        let mut runner = TstRunner::default();
        runner.parse(AND_SCRIPT, "And.tst").unwrap();
        runner.set_compare_data(AND_EXPECTED);
        runner.run_all(&mut BuiltinOnly).unwrap();
        assert!(!runner.has_comparison_error());
    }

    #[test]
    fn test_comparison_failure_reports_line() {
        let wrong = AND_EXPECTED.replace("|   1   |   1   |   1   |", "|   1   |   1   |   0   |");

        let mut runner = TstRunner::default();
        runner.parse(AND_SCRIPT, "And.tst").unwrap();
        runner.set_compare_data(&wrong);
        runner.run_all(&mut BuiltinOnly).unwrap();

        assert!(runner.has_comparison_error());
        let err = runner.comparison_error().unwrap();
        assert!(err.starts_with("Comparison failure at line 5:"));
        assert!(err.contains("Expected: |   1   |   1   |   0   |"));
        assert!(err.contains("  Actual: |   1   |   1   |   1   |"));
    }

    #[test]
    fn test_decimal_and_hex_formats() {
        let script = r#"
            load Not16;
            output-list in%D1.6.1 out%X1.4.1;
            set in -1, eval, output;
            set in 0, eval, output;
        "#;
        let mut runner = TstRunner::default();
        runner.parse(script, "Not16.tst").unwrap();
        runner.run_all(&mut BuiltinOnly).unwrap();

        let lines: Vec<&str> = runner.output().lines().collect();
        assert_eq!("|   in   | out  |", lines[0]);
        assert_eq!("|     -1 | 0000 |", lines[1]);
        assert_eq!("|      0 | ffff |", lines[2]);
    }

    #[test]
    fn test_time_pseudo_pin_and_clock() {
        let script = r#"
            load DFF;
            output-list time%S1.4.1 in%B1.1.1 out%B1.1.1;
            set in 1, tick, output;
            tock, output;
        "#;
        let mut runner = TstRunner::default();
        runner.parse(script, "DFF.tst").unwrap();
        runner.run_all(&mut BuiltinOnly).unwrap();

        let lines: Vec<&str> = runner.output().lines().collect();
        // tick phase renders with a +, tock increments the cycle
        assert_eq!("|   0+ | 1 | 0 |", lines[1]);
        assert_eq!("|    1 | 1 | 1 |", lines[2]);
    }

    #[test]
    fn test_set_with_sub_bus() {
        let script = r#"
            load Not16;
            output-list out%B1.16.1;
            set in %B0, set in[0..7] %B11111111, eval, output;
        "#;
        let mut runner = TstRunner::default();
        runner.parse(script, "T.tst").unwrap();
        runner.run_all(&mut BuiltinOnly).unwrap();

        let lines: Vec<&str> = runner.output().lines().collect();
        assert_eq!("| 1111111100000000 |", lines[1]);
    }

    #[test]
    fn test_output_without_chip_is_runtime_error() {
        let mut runner = TstRunner::default();
        runner.parse("eval;", "T.tst").unwrap();
        assert!(runner.run_all(&mut BuiltinOnly).is_err());
    }

    #[test]
    fn test_runner_keeps_going_after_mismatch_rows_when_stepped() {
        // stepping past a mismatch still executes later commands; only the
        // first failure is recorded
        let wrong = AND_EXPECTED.replace("|   0   |   0   |   0   |", "|   0   |   0   |   1   |");

        let mut runner = TstRunner::default();
        runner.parse(AND_SCRIPT, "And.tst").unwrap();
        runner.set_compare_data(&wrong);

        while runner.step(&mut BuiltinOnly).unwrap() {}
        assert!(runner.has_comparison_error());
        let err = runner.comparison_error().unwrap();
        assert!(err.contains("at line 2:"));
        // all four data rows were still produced
        assert_eq!(5, runner.output().lines().count());
    }
}
