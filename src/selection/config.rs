//! Configuration access for code selection.
//!
//! The configuration store itself belongs to the embedding framework; this module only fixes
//! the semantic contract of what is read from it ([`ConfigSource`]) and provides an in-memory
//! store ([`MemoryConfig`]) for embedders without one of their own.
//!
//! # Key Layout
//!
//! ```text
//! codesel.selections = ["app_main", "libc_in_init"]
//!
//! app_main.module   = "app.exe"
//! app_main.include  = [(0x1000, 0x2000)]
//! app_main.exclude  = [(0x1800, 0x1900)]
//!
//! libc_in_init.id      = "libc-init"        // optional, defaults to the entry key
//! libc_in_init.module  = "libc.so.6"
//! libc_in_init.context = "init"             // optional, absent or "*" matches any context
//! ```
//!
//! Range pairs are relative to the module's native base.

use rustc_hash::FxHashMap;

use crate::selection::RawRange;

/// Root key under which the list of selection entries lives by default.
pub const DEFAULT_ROOT: &str = "codesel";

/// Key suffix listing the selection entries under a root.
pub const KEY_SELECTIONS: &str = "selections";
/// Key suffix naming the descriptor id of an entry.
pub const KEY_ID: &str = "id";
/// Key suffix naming the module an entry targets.
pub const KEY_MODULE: &str = "module";
/// Key suffix naming the execution context an entry targets.
pub const KEY_CONTEXT: &str = "context";
/// Key suffix listing the include ranges of an entry.
pub const KEY_INCLUDE: &str = "include";
/// Key suffix listing the exclude ranges of an entry.
pub const KEY_EXCLUDE: &str = "exclude";

/// Join a section key and a suffix into a full configuration key.
#[must_use]
pub fn key(section: &str, suffix: &str) -> String {
    format!("{section}.{suffix}")
}

/// Read access to the external configuration store.
///
/// Implementations must be shareable across threads, as entries are compiled in parallel.
pub trait ConfigSource: Sync {
    /// Look up a string value.
    fn get_string(&self, key: &str) -> Option<String>;

    /// Look up an ordered list of raw `(start, end)` ranges.
    fn get_ranges(&self, key: &str) -> Option<Vec<RawRange>>;

    /// Look up an ordered list of strings.
    fn get_list(&self, key: &str) -> Option<Vec<String>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Value {
    String(String),
    Ranges(Vec<RawRange>),
    List(Vec<String>),
}

/// A [`ConfigSource`] held entirely in memory.
///
/// # Example
///
/// ```rust
/// use codesel::selection::{ConfigSource, MemoryConfig};
///
/// let config = MemoryConfig::new()
///     .with_selection("main", "app.exe", None, &[(0x0, 0x10)], &[]);
///
/// assert_eq!(config.get_list("codesel.selections"), Some(vec!["main".to_string()]));
/// assert_eq!(config.get_string("main.module").as_deref(), Some("app.exe"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryConfig {
    values: FxHashMap<String, Value>,
}

impl MemoryConfig {
    /// Creates an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a string value
    pub fn set_string(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), Value::String(value.into()));
    }

    /// Store a range list
    pub fn set_ranges(&mut self, key: impl Into<String>, ranges: &[RawRange]) {
        self.values.insert(key.into(), Value::Ranges(ranges.to_vec()));
    }

    /// Store a string list
    pub fn set_list(&mut self, key: impl Into<String>, items: Vec<String>) {
        self.values.insert(key.into(), Value::List(items));
    }

    /// Add a complete selection entry under [`DEFAULT_ROOT`].
    ///
    /// The entry key doubles as the descriptor id. Empty range lists are not stored, so an
    /// entry without includes selects the whole module.
    ///
    /// # Arguments
    /// * `entry` - The entry key (and descriptor id)
    /// * `module` - The module the entry targets
    /// * `context` - The execution context, or `None` for any context
    /// * `include` - Include ranges, relative to the native base
    /// * `exclude` - Exclude ranges, relative to the native base
    #[must_use]
    pub fn with_selection(
        mut self,
        entry: &str,
        module: &str,
        context: Option<&str>,
        include: &[RawRange],
        exclude: &[RawRange],
    ) -> Self {
        let list_key = key(DEFAULT_ROOT, KEY_SELECTIONS);
        let mut entries = self.get_list(&list_key).unwrap_or_default();
        entries.push(entry.to_string());
        self.set_list(list_key, entries);

        self.set_string(key(entry, KEY_MODULE), module);
        if let Some(context) = context {
            self.set_string(key(entry, KEY_CONTEXT), context);
        }
        if !include.is_empty() {
            self.set_ranges(key(entry, KEY_INCLUDE), include);
        }
        if !exclude.is_empty() {
            self.set_ranges(key(entry, KEY_EXCLUDE), exclude);
        }
        self
    }
}

impl ConfigSource for MemoryConfig {
    fn get_string(&self, key: &str) -> Option<String> {
        match self.values.get(key)? {
            Value::String(value) => Some(value.clone()),
            _ => None,
        }
    }

    fn get_ranges(&self, key: &str) -> Option<Vec<RawRange>> {
        match self.values.get(key)? {
            Value::Ranges(ranges) => Some(ranges.clone()),
            _ => None,
        }
    }

    fn get_list(&self, key: &str) -> Option<Vec<String>> {
        match self.values.get(key)? {
            Value::List(items) => Some(items.clone()),
            _ => None,
        }
    }
}

/// Behavioral settings of the code selector
///
/// These do not change which code is selected, only how the work is carried out and how
/// much is reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorConfig {
    /// Root key holding the list of selection entries
    pub root: String,

    /// Compile entries in parallel on the rayon thread pool
    pub parallel_compile: bool,

    /// Log (once per module) when a query rebases outside the module image
    pub warn_out_of_bounds: bool,

    /// Emit a disable signal at the end of a block that finished with instrumentation on.
    ///
    /// With this off, the mode a block starts in is unknown and the first tracked instruction
    /// of every block is signaled explicitly.
    pub close_blocks: bool,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            root: DEFAULT_ROOT.to_string(),
            parallel_compile: true,
            warn_out_of_bounds: true,
            close_blocks: true,
        }
    }
}

impl SelectorConfig {
    /// Default behavior without out-of-bounds diagnostics
    #[must_use]
    pub fn quiet() -> Self {
        Self {
            warn_out_of_bounds: false,
            ..Self::default()
        }
    }

    /// Default behavior, compiling entries on the calling thread only
    #[must_use]
    pub fn sequential() -> Self {
        Self {
            parallel_compile: false,
            ..Self::default()
        }
    }

    /// Read the entry list from a different root key
    #[must_use]
    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = root.into();
        self
    }
}
