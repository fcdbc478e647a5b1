//! Regex backend selection: the full `regex` crate by default, `regex_lite`
//! when only the `lite` feature is enabled.

#[cfg(feature = "lite")]
pub(crate) use regex_lite::{Captures, Regex};
#[cfg(all(feature = "regex", not(feature = "lite")))]
pub(crate) use regex::{Captures, Regex};

#[cfg(not(any(feature = "regex", feature = "lite")))]
compile_error!("bibmerge requires either the \"regex\" or the \"lite\" feature");
