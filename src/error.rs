use thiserror::Error;

macro_rules! config_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Config {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Config {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Every variant is an initialization-time configuration failure. Runtime queries (block and
/// instruction translation, module transitions, `is_symbolic`) never fail: a module without a
/// matching descriptor, or a program counter outside a module, simply means "do not
/// instrument".
///
/// # Error Categories
///
/// ## Range Errors
/// - [`Error::InvalidRange`] - A range whose start is not below its end
/// - [`Error::RangeOutOfBounds`] - A range reaching outside the module's mapped image
///
/// ## Entry Errors
/// - [`Error::MissingKey`] - A required configuration key is absent
/// - [`Error::UnknownModule`] - The referenced module could not be resolved to a layout
/// - [`Error::DuplicateDescriptor`] - Two entries share the same id
/// - [`Error::Config`] - Any other malformed configuration entry
///
/// # Examples
///
/// ```rust
/// use codesel::{selection::compile_ranges, Error};
///
/// match compile_ranges(&[(0x10, 0x08)], 0x1000, 0x100) {
///     Err(Error::InvalidRange { start, end }) => {
///         assert_eq!((start, end), (0x1010, 0x1008));
///     }
///     other => panic!("unexpected result: {other:?}"),
/// }
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A range whose start is not strictly below its end.
    ///
    /// Both addresses are reported after rebasing onto the module's native base.
    #[error("Invalid range [{start:#x}, {end:#x}) - start must be below end")]
    InvalidRange {
        /// Rebased start address
        start: u64,
        /// Rebased end address
        end: u64,
    },

    /// A range that lies (partly) outside the module image.
    ///
    /// Out-of-range addresses are rejected, never clamped.
    #[error(
        "Range [{start:#x}, {end:#x}) lies outside module image [{base:#x}, {base:#x} + {size:#x})"
    )]
    RangeOutOfBounds {
        /// Rebased start address
        start: u64,
        /// Rebased end address
        end: u64,
        /// Native base of the module
        base: u64,
        /// Mapped size of the module
        size: u64,
    },

    /// A configuration key that an entry requires was not found.
    #[error("Missing configuration key '{0}'")]
    MissingKey(String),

    /// The module named by an entry is not known to the module catalog.
    ///
    /// Without a native base and size, ranges can neither be validated nor compiled.
    #[error("Module '{0}' could not be resolved to a base and size")]
    UnknownModule(String),

    /// An entry reuses the id of an already registered descriptor.
    #[error("A selection descriptor with id '{0}' is already registered")]
    DuplicateDescriptor(String),

    /// The configuration entry is malformed.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Config - {file}:{line}: {message}")]
    Config {
        /// The message to be printed for the Config error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },
}
