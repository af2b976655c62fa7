//! Human-readable rendering of test results.

use std::fmt;

use colored::Colorize;

use crate::api::{State, Test, TestList};

const RULE_WIDTH: usize = 80;

impl fmt::Display for Test {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", "-".repeat(RULE_WIDTH))?;
        writeln!(f, "Image:      {}", self.spec.image)?;

        if !self.spec.entrypoint.is_empty() {
            writeln!(f, "Entrypoint: [{}]", self.spec.entrypoint.join(" "))?;
        }

        if !self.spec.labels.is_empty() {
            writeln!(f, "Labels:")?;
            for (key, value) in &self.spec.labels {
                writeln!(f, "\t{key:?}:{value:?}")?;
            }
        }

        if self.status.results.is_empty() {
            return Ok(());
        }

        writeln!(f, "Results:")?;
        for result in &self.status.results {
            if !result.name.is_empty() {
                writeln!(f, "\tName: {}", result.name)?;
            }
            writeln!(f, "\tState: {}", colored_state(result.state))?;

            if !result.suggestions.is_empty() {
                writeln!(f, "\tSuggestions:")?;
                for suggestion in &result.suggestions {
                    writeln!(f, "\t\t{suggestion}")?;
                }
            }

            if !result.errors.is_empty() {
                writeln!(f, "\tErrors:")?;
                for error in &result.errors {
                    writeln!(f, "\t\t{error}")?;
                }
            }

            if !result.log.is_empty() {
                writeln!(f, "\tLog:")?;
                for line in result.log.lines() {
                    writeln!(f, "\t\t{line}")?;
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

fn colored_state(state: State) -> colored::ColoredString {
    match state {
        State::Pass => state.as_str().green().bold(),
        State::Fail => state.as_str().red().bold(),
        State::Error => state.as_str().yellow().bold(),
    }
}

/// Render a whole list in text form.
pub fn render_text(list: &TestList) -> String {
    if list.is_empty() {
        return "0 tests selected\n".to_string();
    }
    list.items.iter().map(|test| format!("{test}\n")).collect()
}
