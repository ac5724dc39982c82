use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::MalformedInput {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::MalformedInput {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Only fatal conditions are represented here. A pass that recognizes a candidate pattern but
/// cannot prove its preconditions does not fail: it declines the rewrite, leaves the instruction
/// untouched and reports "no change" for it.
///
/// # Error Categories
///
/// ## Input Errors
/// - [`Error::MalformedInput`] - The function body or its type map violates an SSA invariant
///
/// ## Resolution Errors
/// - [`Error::UnresolvableFunction`] - No provider (or no overload) for a function a pass emits
///
/// ## Pipeline Errors
/// - [`Error::UnknownPass`] - A recipe names a pass identifier that does not exist
/// - [`Error::PassFailed`] - A pass aborted the recipe for the current function
/// - [`Error::Error`] - Miscellaneous failures
///
/// # Examples
///
/// ```rust
/// use matssa::{analysis::FunctionBody, analysis::validate, Error};
///
/// let body = FunctionBody::new("empty");
/// match validate(&body) {
///     Ok(()) => println!("valid"),
///     Err(Error::MalformedInput { message, file, line }) => {
///         eprintln!("invalid SSA: {} ({}:{})", message, file, line);
///     }
///     Err(e) => eprintln!("other error: {}", e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The function body or type map given to the pipeline is malformed.
    ///
    /// Raised by the SSA validator and by passes that find a dangling reference or a missing
    /// type entry. The error includes the source location where the malformation was detected.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed input - {file}:{line}: {message}")]
    MalformedInput {
        /// The message to be printed for the MalformedInput error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// A pass asked the function registry for a function it cannot provide.
    ///
    /// Either no provider is registered under `function`, or the provider has no overload
    /// accepting the given argument types.
    #[error("Unresolvable function '{function}' for arguments ({arguments})")]
    UnresolvableFunction {
        /// Name of the requested function
        function: String,
        /// Rendered argument types of the request
        arguments: String,
    },

    /// A recipe named a pass identifier that is not part of the catalog.
    #[error("Unknown pass identifier '{0}'")]
    UnknownPass(String),

    /// A pass failed and aborted the recipe for the current function.
    ///
    /// Earlier passes' changes are not rolled back.
    #[error("Pass '{pass}' failed: {source}")]
    PassFailed {
        /// Name of the failing pass
        pass: String,
        /// The underlying error
        #[source]
        source: Box<Error>,
    },

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_macro_records_location() {
        let err = malformed_error!("variable {} defined twice", "x$1");
        match err {
            Error::MalformedInput {
                message,
                file,
                line,
            } => {
                assert_eq!(message, "variable x$1 defined twice");
                assert!(file.ends_with("error.rs"));
                assert!(line > 0);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_pass_failed_display_includes_source() {
        let err = Error::PassFailed {
            pass: "loop-fusion".to_string(),
            source: Box::new(Error::UnknownPass("nope".to_string())),
        };
        let text = err.to_string();
        assert!(text.contains("loop-fusion"));
        assert!(text.contains("nope"));
    }
}
