use crate::definitions::LineNumber;
use std::{error, fmt};

/// What kind of problem occurred.
///
/// Every error in the suite falls into one of these buckets so that hosts can
/// present them consistently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// input text violates a grammar or structural constraint
    Parse,
    /// dynamic fault during execution
    Runtime,
    /// output does not match the expectation (test comparison)
    Logic,
    /// underlying I/O failure
    File,
    /// invariant violation inside the suite itself
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::Parse => "Parse Error",
            Self::Runtime => "Runtime Error",
            Self::Logic => "Logic Error",
            Self::File => "File Error",
            Self::Internal => "Internal Error",
        };
        write!(f, "{}", name)
    }
}

/// An error with full context: category, optional file, optional line and a
/// human-readable message.
///
/// Rendered as `"<Category> in <file>:<line> - <message>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimError {
    pub category: ErrorCategory,
    pub file: Option<String>,
    pub line: Option<LineNumber>,
    pub message: String,
}

pub type SimResult<T = ()> = Result<T, SimError>;

impl SimError {
    pub fn new(
        category: ErrorCategory,
        file: impl Into<String>,
        line: LineNumber,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            file: Some(file.into()),
            line: if line > 0 { Some(line) } else { None },
            message: message.into(),
        }
    }

    pub fn parse(file: impl Into<String>, line: LineNumber, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Parse, file, line, message)
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self {
            category: ErrorCategory::Runtime,
            file: None,
            line: None,
            message: message.into(),
        }
    }

    pub fn logic(message: impl Into<String>) -> Self {
        Self {
            category: ErrorCategory::Logic,
            file: None,
            line: None,
            message: message.into(),
        }
    }

    pub fn file(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category: ErrorCategory::File,
            file: Some(file.into()),
            line: None,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            category: ErrorCategory::Internal,
            file: None,
            line: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.category)?;
        if let Some(file) = &self.file {
            write!(f, " in {}", file)?;
            if let Some(line) = self.line {
                write!(f, ":{}", line)?;
            }
        }
        write!(f, " - {}", self.message)
    }
}

impl error::Error for SimError {}

impl From<std::io::Error> for SimError {
    fn from(err: std::io::Error) -> Self {
        Self {
            category: ErrorCategory::File,
            file: None,
            line: None,
            message: err.to_string(),
        }
    }
}

/// Format a typo suggestion: `'<wrong>' (did you mean '<correct>'?)`
pub fn format_suggestion(wrong: &str, correct: &str) -> String {
    format!("'{}' (did you mean '{}'?)", wrong, correct)
}
