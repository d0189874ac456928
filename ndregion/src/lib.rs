//! Region algebra for multidimensional objects.
//!
//! Provides [`Region`], an immutable selection of a multidimensional
//! array made of one half-open [`Range`] per dimension. See [`Region`]
//! for more details.
//!
//! This crate is pure and synchronous: it has no notion of objects,
//! transfers or runtimes, so that it can be shared by the client core
//! and by tools that only need to validate or render regions.

/// A parser for regions written in indexing notation.
pub mod parse;

/// Core region and range types.
pub mod region;

/// A half-open interval along one dimension.
pub use region::Range;
/// A multidimensional selection.
pub use region::Region;
/// Errors that can occur during region construction, parsing or
/// resolution.
pub use region::RegionError;
