use std::fmt;
use thiserror::Error;

/// Which kind of problem occurred. Hosts use this to decide whether a
/// failure is the user's source code, the running program, a failed
/// comparison, or the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Parse,
    Runtime,
    Logic,
    File,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Parse => write!(f, "Parse Error"),
            Self::Runtime => write!(f, "Runtime Error"),
            Self::Logic => write!(f, "Logic Error"),
            Self::File => write!(f, "File Error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimError {
    /// Malformed syntax in a .hack, .vm, .hdl, .tst or .smap input.
    /// Produced during load, never during execution.
    #[error("Parse Error in {file}:{line} - {message}")]
    Parse {
        file: String,
        line: usize,
        message: String,
    },

    /// Observed at execution time. `location` is the PC or ROM address
    /// when one applies.
    #[error("Runtime Error{} - {message}", fmt_location(.location))]
    Runtime {
        location: Option<usize>,
        message: String,
    },

    /// A .tst comparison failure.
    #[error("Logic Error at row {row} - expected '{expected}', got '{actual}'")]
    Logic {
        row: usize,
        expected: String,
        actual: String,
    },

    /// I/O problems at load time.
    #[error("File Error in {file} - {message}")]
    File { file: String, message: String },
}

fn fmt_location(location: &Option<usize>) -> String {
    match location {
        Some(at) => format!(" at {}", at),
        None => String::new(),
    }
}

impl SimError {
    pub fn parse(file: impl Into<String>, line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            file: file.into(),
            line,
            message: message.into(),
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            location: None,
            message: message.into(),
        }
    }

    pub fn runtime_at(location: usize, message: impl Into<String>) -> Self {
        Self::Runtime {
            location: Some(location),
            message: message.into(),
        }
    }

    pub fn file(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self::File {
            file: file.into(),
            message: message.into(),
        }
    }

    /// Format a suggestion for a typo, e.g. `'psh' (did you mean 'push'?)`
    pub fn suggestion(wrong: &str, correct: &str) -> String {
        format!("'{}' (did you mean '{}'?)", wrong, correct)
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Parse { .. } => ErrorCategory::Parse,
            Self::Runtime { .. } => ErrorCategory::Runtime,
            Self::Logic { .. } => ErrorCategory::Logic,
            Self::File { .. } => ErrorCategory::File,
        }
    }

    /// The PC or ROM address the error refers to, when one applies.
    pub fn location(&self) -> Option<usize> {
        match self {
            Self::Runtime { location, .. } => *location,
            _ => None,
        }
    }
}

pub type SimResult<T = ()> = Result<T, SimError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_carries_context() {
        let err = SimError::parse("Main.vm", 42, "Unknown command: 'psh' (did you mean 'push'?)");
        assert_eq!(
            "Parse Error in Main.vm:42 - Unknown command: 'psh' (did you mean 'push'?)",
            err.to_string()
        );

        let err = SimError::runtime_at(17, "Stack overflow");
        assert_eq!("Runtime Error at 17 - Stack overflow", err.to_string());
        assert_eq!(Some(17), err.location());
        assert_eq!(ErrorCategory::Runtime, err.category());
    }
}
