//! Range compilation: from raw, module-relative range lists to a per-unit bitmap.
//!
//! Selection entries name the code they care about as half-open `[start, end)` intervals
//! relative to the module's native base. Compilation happens in two steps:
//!
//! 1. [`compile_ranges`] rebases every raw pair onto the native base and validates it against
//!    the module image, rejecting empty/inverted and out-of-image ranges.
//! 2. [`build_bitmap`] turns the validated include and exclude lists into an
//!    [`InstrumentationMap`]. Includes are applied first, then every exclude is carved out of
//!    them, so an exclude always wins regardless of the order in which ranges were listed.
//!    An empty include list stands for "the whole module".
//!
//! # Example
//!
//! ```rust
//! use codesel::selection::{build_bitmap, compile_ranges};
//!
//! let include = compile_ranges(&[(0x00, 0x10)], 0x1000, 0x100)?;
//! let exclude = compile_ranges(&[(0x08, 0x10)], 0x1000, 0x100)?;
//! let map = build_bitmap(&include, &exclude, 0x1000, 0x100);
//!
//! assert!(map.get(0x07));
//! assert!(!map.get(0x08));
//! # Ok::<(), codesel::Error>(())
//! ```

use std::fmt;

use crate::{selection::InstrumentationMap, Error, Result};

/// A raw `(start, end)` pair as found in configuration, relative to the module's native base.
pub type RawRange = (u64, u64);

/// A validated half-open `[start, end)` interval of absolute native addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AddressRange {
    /// First address covered by the range
    pub start: u64,
    /// First address past the range
    pub end: u64,
}

impl AddressRange {
    /// Number of units covered
    #[must_use]
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Always `false` for validated ranges
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Check if `address` falls inside the range
    #[must_use]
    pub fn contains(&self, address: u64) -> bool {
        address >= self.start && address < self.end
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x}, {:#x})", self.start, self.end)
    }
}

/// Rebase raw module-relative ranges onto `native_base` and validate them.
///
/// # Arguments
/// * `raw` - Ranges as listed in configuration, relative to the module's native base
/// * `native_base` - The address the module's ranges are written against
/// * `size` - The mapped size of the module
///
/// # Errors
/// * [`Error::InvalidRange`] if a range is empty or inverted
/// * [`Error::RangeOutOfBounds`] if a range does not lie within `[native_base, native_base + size)`
pub fn compile_ranges(raw: &[RawRange], native_base: u64, size: u64) -> Result<Vec<AddressRange>> {
    if size
        .checked_sub(1)
        .is_some_and(|last| native_base.checked_add(last).is_none())
    {
        return Err(config_error!(
            "Module image {:#x} + {:#x} overflows",
            native_base,
            size
        ));
    }

    raw.iter()
        .map(|&(start, end)| {
            if start >= end {
                return Err(Error::InvalidRange {
                    start: native_base.wrapping_add(start),
                    end: native_base.wrapping_add(end),
                });
            }

            let out_of_bounds = || Error::RangeOutOfBounds {
                start: native_base.wrapping_add(start),
                end: native_base.wrapping_add(end),
                base: native_base,
                size,
            };
            if end > size {
                return Err(out_of_bounds());
            }

            // An end exactly at the top of the address space has no absolute representation.
            let abs_end = native_base.checked_add(end).ok_or_else(out_of_bounds)?;
            Ok(AddressRange {
                start: native_base + start,
                end: abs_end,
            })
        })
        .collect()
}

/// Build the instrumentation bitmap of a module from validated include and exclude ranges.
///
/// Every unit inside an include range and outside all exclude ranges is set; every other
/// unit is clear. With no include ranges at all the whole module is included before the
/// excludes are applied.
///
/// # Arguments
/// * `include` - Validated include ranges (absolute native addresses)
/// * `exclude` - Validated exclude ranges (absolute native addresses)
/// * `native_base` - The module's native base
/// * `module_size` - The amount of units in the resulting map
#[must_use]
pub fn build_bitmap(
    include: &[AddressRange],
    exclude: &[AddressRange],
    native_base: u64,
    module_size: usize,
) -> InstrumentationMap {
    let mut map = if include.is_empty() {
        InstrumentationMap::full(module_size)
    } else {
        let mut map = InstrumentationMap::new(module_size);
        for range in include {
            apply(&mut map, range, native_base, true);
        }
        map
    };

    for range in exclude {
        apply(&mut map, range, native_base, false);
    }

    map
}

fn apply(map: &mut InstrumentationMap, range: &AddressRange, native_base: u64, state: bool) {
    let Some(offset) = range.start.checked_sub(native_base) else {
        return;
    };
    let (Ok(offset), Ok(count)) = (usize::try_from(offset), usize::try_from(range.len())) else {
        return;
    };

    map.set_range(offset, count, state);
}
