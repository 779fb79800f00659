//! Two-ended line cursor over the agent source

use crate::error::{AgentValidationError, GrammarViolation, ValidationResult};
use regex::Regex;

/// Lines still to be consumed, remembering where each came from
#[derive(Debug)]
pub(crate) struct LineCursor<'a> {
    lines: Vec<&'a str>,
    front: usize,
    back: usize,
}

impl<'a> LineCursor<'a> {
    pub(crate) fn new(source: &'a str) -> Self {
        let lines: Vec<&str> = source.split('\n').collect();
        let back = lines.len();
        Self {
            lines,
            front: 0,
            back,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.front >= self.back
    }

    /// 1-based number of the next front line
    pub(crate) fn line_number(&self) -> usize {
        self.front + 1
    }

    pub(crate) fn peek(&self) -> Option<&'a str> {
        (!self.is_empty()).then(|| self.lines[self.front])
    }

    pub(crate) fn next_line(&mut self) -> Option<&'a str> {
        let line = self.peek()?;
        self.front += 1;
        Some(line)
    }

    /// Take the front line, which must match `pattern`
    pub(crate) fn expect(&mut self, pattern: &Regex) -> ValidationResult<&'a str> {
        let line_no = self.line_number();
        let line = self
            .next_line()
            .ok_or(AgentValidationError::Grammar(GrammarViolation::MissingLine))?;
        if !pattern.is_match(line) {
            return Err(AgentValidationError::Grammar(
                GrammarViolation::UnexpectedLine { line: line_no },
            ));
        }
        Ok(line)
    }

    /// Take the back line, which must match `pattern`
    pub(crate) fn expect_last(&mut self, pattern: &Regex) -> ValidationResult<&'a str> {
        if self.is_empty() {
            return Err(AgentValidationError::Grammar(GrammarViolation::MissingLine));
        }
        self.back -= 1;
        let line = self.lines[self.back];
        if !pattern.is_match(line) {
            return Err(AgentValidationError::Grammar(
                GrammarViolation::UnexpectedLine {
                    line: self.back + 1,
                },
            ));
        }
        Ok(line)
    }
}
