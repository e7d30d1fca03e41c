use crate::error::{SimError, SimResult};
use crate::parse::tst::{parse_pin_target, NumberFormat, OutputColumn, SpannedCommand, TstCommand};
use crate::simulators::hdl::chip::{Chip, Resolve};

/// Executes parsed .tst commands against a chip produced by the resolver.
///
/// Output rows are collected into a string; when compare data is present,
/// every emitted line (header included) is checked against the matching
/// line and the first mismatch ends the run with a Logic error.
pub struct TstRunner {
    chip: Option<Chip>,
    output: String,
    output_columns: Vec<OutputColumn>,
    header_pending: bool,
    emitted_lines: usize,
    compare_lines: Option<Vec<String>>,
    comparison_error: Option<SimError>,
    output_file_name: Option<String>,
    compare_file_name: Option<String>,
    clock_cycle: u64,
    in_tick_phase: bool,
}

impl Default for TstRunner {
    fn default() -> Self {
        Self {
            chip: None,
            output: String::new(),
            output_columns: Vec::new(),
            header_pending: false,
            emitted_lines: 0,
            compare_lines: None,
            comparison_error: None,
            output_file_name: None,
            compare_file_name: None,
            clock_cycle: 0,
            in_tick_phase: false,
        }
    }
}

impl TstRunner {
    /// Supply the .cmp content to compare emitted rows against. The first
    /// line is the header row.
    pub fn set_compare_data(&mut self, cmp: &str) {
        let lines = cmp
            .lines()
            .map(|line| line.trim_end().to_string())
            .filter(|line| !line.is_empty())
            .collect();
        self.compare_lines = Some(lines);
    }

    /// Run all commands. Stops at the first comparison failure.
    pub fn run(&mut self, commands: &[SpannedCommand], resolver: &mut dyn Resolve) -> SimResult {
        for spanned in commands {
            self.execute(spanned, resolver)?;
            if self.comparison_error.is_some() {
                break;
            }
        }
        Ok(())
    }

    fn execute(&mut self, spanned: &SpannedCommand, resolver: &mut dyn Resolve) -> SimResult {
        match &spanned.command {
            TstCommand::Load(chip_name) => {
                let chip = resolver.resolve(chip_name)?.ok_or_else(|| {
                    SimError::runtime(format!("Could not load chip: '{}'", chip_name))
                })?;
                self.chip = Some(chip);
                Ok(())
            }
            TstCommand::OutputFile(file) => {
                self.output_file_name = Some(file.clone());
                Ok(())
            }
            TstCommand::CompareTo(file) => {
                // only records the name; the data itself arrives through
                // set_compare_data
                self.compare_file_name = Some(file.clone());
                Ok(())
            }
            TstCommand::OutputList(columns) => {
                self.output_columns = columns.clone();
                self.header_pending = true;
                Ok(())
            }
            TstCommand::Set { target, value } => {
                let chip = self.chip_mut()?;
                chip.set_pin_bits(&target.name, target.lo, target.hi, *value)
            }
            TstCommand::Eval => self.chip_mut()?.eval(),
            TstCommand::Tick => {
                self.in_tick_phase = true;
                self.chip_mut()?.tick()
            }
            TstCommand::Tock => {
                self.in_tick_phase = false;
                self.clock_cycle += 1;
                self.chip_mut()?.tock()
            }
            TstCommand::Output => self.do_output(),
        }
    }

    fn chip_mut(&mut self) -> SimResult<&mut Chip> {
        self.chip
            .as_mut()
            .ok_or_else(|| SimError::runtime("No chip loaded"))
    }

    fn do_output(&mut self) -> SimResult {
        if self.chip.is_none() {
            return Err(SimError::runtime("No chip loaded"));
        }

        if self.header_pending {
            let header = self.format_header();
            self.emit_line(header);
            self.header_pending = false;
            if self.comparison_error.is_some() {
                return Ok(());
            }
        }

        let columns = self.output_columns.clone();
        let mut row = String::from("|");
        for col in &columns {
            if col.pin == "time" {
                row.push_str(&self.format_time(col));
                row.push('|');
                continue;
            }

            let target = parse_pin_target(&col.pin, 0, "<tst>")?;
            let value = self
                .chip_mut()?
                .get_pin_bits(&target.name, target.lo, target.hi)?;
            row.push_str(&format_value(value, col));
            row.push('|');
        }

        self.emit_line(row);
        Ok(())
    }

    fn format_header(&self) -> String {
        let mut header = String::from("|");
        for col in &self.output_columns {
            let total = col.left_pad + col.width + col.right_pad;
            let name = if col.pin.len() > total {
                &col.pin[..total]
            } else {
                &col.pin
            };
            let left = (total - name.len()) / 2;
            let right = total - name.len() - left;
            header.push_str(&" ".repeat(left));
            header.push_str(name);
            header.push_str(&" ".repeat(right));
            header.push('|');
        }
        header
    }

    /// The time pseudo-pin prints the clock cycle, suffixed with `+` while
    /// in the tick phase.
    fn format_time(&self, col: &OutputColumn) -> String {
        let mut time = if self.in_tick_phase {
            format!("{}+", self.clock_cycle)
        } else {
            self.clock_cycle.to_string()
        };
        while time.len() < col.width {
            time.insert(0, ' ');
        }
        format!(
            "{}{}{}",
            " ".repeat(col.left_pad),
            time,
            " ".repeat(col.right_pad)
        )
    }

    fn emit_line(&mut self, line: String) {
        self.output.push_str(&line);
        self.output.push('\n');

        if let Some(compare) = &self.compare_lines {
            let row = self.emitted_lines;
            if let Some(expected) = compare.get(row) {
                let actual = line.trim_end();
                if actual != expected {
                    self.comparison_error = Some(SimError::Logic {
                        row: row + 1,
                        expected: expected.clone(),
                        actual: actual.to_string(),
                    });
                }
            }
        }

        self.emitted_lines += 1;
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn output_rows(&self) -> usize {
        self.emitted_lines
    }

    pub fn comparison_error(&self) -> Option<&SimError> {
        self.comparison_error.as_ref()
    }

    pub fn output_file_name(&self) -> Option<&str> {
        self.output_file_name.as_deref()
    }

    pub fn compare_file_name(&self) -> Option<&str> {
        self.compare_file_name.as_deref()
    }

    pub fn chip(&self) -> Option<&Chip> {
        self.chip.as_ref()
    }

    pub fn take_chip(&mut self) -> Option<Chip> {
        self.chip.take()
    }
}

fn format_value(value: i64, col: &OutputColumn) -> String {
    let formatted = match col.format {
        NumberFormat::Binary => {
            let mut bits = String::with_capacity(col.width);
            for b in (0..col.width).rev() {
                bits.push(if (value >> b) & 1 != 0 { '1' } else { '0' });
            }
            bits
        }
        NumberFormat::Decimal => {
            let mut text = ((value & 0xFFFF) as u16 as i16).to_string();
            while text.len() < col.width {
                text.insert(0, ' ');
            }
            text
        }
        NumberFormat::Hex => {
            let mut text = format!("{:x}", value & 0xFFFF);
            while text.len() < col.width {
                text.insert(0, '0');
            }
            text
        }
        NumberFormat::String => value.to_string(),
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
    use crate::parse::tst::parse_script;
    use crate::simulators::hdl::builtins::BUILTINS;

    struct BuiltinResolver;

    impl Resolve for BuiltinResolver {
        fn resolve(&mut self, name: &str) -> SimResult<Option<Chip>> {
            Ok(BUILTINS.get(name).map(|b| b.instantiate()))
        }
    }

    const AND_TST: &str = "
        load And.hdl,
        output-list a%B3.1.3 b%B3.1.3 out%B3.1.3;

        set a 0, set b 0, eval, output;
        set a 0, set b 1, eval, output;
        set a 1, set b 0, eval, output;
        set a 1, set b 1, eval, output;";

    const AND_CMP: &str = "\
|   a   |   b   |  out  |
|   0   |   0   |   0   |
|   0   |   1   |   0   |
|   1   |   0   |   0   |
|   1   |   1   |   1   |
";

    #[test]
    fn test_and_truth_table_output() {
        let commands = parse_script(AND_TST, "And.tst").unwrap();
        let mut runner = TstRunner::default();
        runner.run(&commands, &mut BuiltinResolver).unwrap();

        assert_eq!(AND_CMP, runner.output());
        assert!(runner.comparison_error().is_none());
    }

    #[test]
    fn test_comparison_passes_against_matching_cmp() {
        let commands = parse_script(AND_TST, "And.tst").unwrap();
        let mut runner = TstRunner::default();
        runner.set_compare_data(AND_CMP);
        runner.run(&commands, &mut BuiltinResolver).unwrap();
        assert!(runner.comparison_error().is_none());
    }

    #[test]
    fn test_comparison_failure_cites_row() {
        let broken = AND_CMP.replace("|   1   |   1   |   1   |", "|   1   |   1   |   0   |");

        let commands = parse_script(AND_TST, "And.tst").unwrap();
        let mut runner = TstRunner::default();
        runner.set_compare_data(&broken);
        runner.run(&commands, &mut BuiltinResolver).unwrap();

        match runner.comparison_error() {
            Some(SimError::Logic { row, expected, actual }) => {
                assert_eq!(5, *row);
                assert!(expected.contains("|   0   |"));
                assert!(actual.ends_with("|   1   |"));
            }
            other => panic!("expected logic error, got {:?}", other),
        }
    }

    #[test]
    fn test_decimal_column_right_justifies() {
        // a%D1.6.1 right-justifies within width 6 with one space padding
        // on each side
        let commands =
            parse_script("load Inc16; output-list in%D1.6.1 out%D1.6.1; set in 99, eval, output;", "t")
                .unwrap();
        let mut runner = TstRunner::default();
        runner.run(&commands, &mut BuiltinResolver).unwrap();

        let lines: Vec<&str> = runner.output().lines().collect();
        assert_eq!("|   in   |  out   |", lines[0]);
        assert_eq!("|     99 |    100 |", lines[1]);
    }

    #[test]
    fn test_decimal_column_is_signed() {
        let commands =
            parse_script("load Not16; output-list out%D1.6.1; set in 0, eval, output;", "t")
                .unwrap();
        let mut runner = TstRunner::default();
        runner.run(&commands, &mut BuiltinResolver).unwrap();

        let lines: Vec<&str> = runner.output().lines().collect();
        assert_eq!("|     -1 |", lines[1]);
    }

    #[test]
    fn test_time_pseudo_pin_phases() {
        let commands = parse_script(
            "load DFF; output-list time%S1.4.1 out%B1.1.1; \
             set in 1, tick, output; tock, output;",
            "t",
        )
        .unwrap();
        let mut runner = TstRunner::default();
        runner.run(&commands, &mut BuiltinResolver).unwrap();

        let lines: Vec<&str> = runner.output().lines().collect();
        // tick phase prints `0+`, after tock the cycle number is 1
        assert_eq!("|   0+ | 0 |", lines[1]);
        assert_eq!("|    1 | 1 |", lines[2]);
    }

    #[test]
    fn test_sub_bus_set_and_output() {
        let commands = parse_script(
            "load Not16; output-list in%B1.16.1; set in[0..7] %B11111111, eval, output;",
            "t",
        )
        .unwrap();
        let mut runner = TstRunner::default();
        runner.run(&commands, &mut BuiltinResolver).unwrap();

        let lines: Vec<&str> = runner.output().lines().collect();
        assert_eq!("| 0000000011111111 |", lines[1]);
    }

    #[test]
    fn test_set_without_chip_is_runtime_error() {
        let commands = parse_script("set a 1;", "t").unwrap();
        let mut runner = TstRunner::default();
        let result = runner.run(&commands, &mut BuiltinResolver);
        assert!(matches!(result, Err(SimError::Runtime { .. })));
    }

    #[test]
    fn test_unknown_chip_is_runtime_error() {
        let commands = parse_script("load NoSuchChip;", "t").unwrap();
        let mut runner = TstRunner::default();
        let result = runner.run(&commands, &mut BuiltinResolver);
        match result {
            Err(SimError::Runtime { message, .. }) => {
                assert!(message.contains("NoSuchChip"));
            }
            other => panic!("expected runtime error, got {:?}", other),
        }
    }
}
