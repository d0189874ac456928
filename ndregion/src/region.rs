use std::fmt;

use itertools::Itertools;
use itertools::izip;
use serde::Deserialize;
use serde::Serialize;

// Regions are validated on construction and never mutated afterwards.

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegionError {
    #[error("region must have at least one dimension")]
    NoDimensions,

    #[error("empty range {range}")]
    EmptyRange { range: Range },

    #[error("negative bound {value}")]
    NegativeBound { value: i64 },

    #[error("bound `{token}` is out of range")]
    Overflow { token: String },

    #[error("unsupported stride {stride}; regions only support a stride of 1")]
    UnsupportedStride { stride: i64 },

    #[error("invalid region expression `{expr}`: {reason}")]
    InvalidExpression { expr: String, reason: String },

    #[error("region {region} has {region_dims} dimensions but the shape only has {shape_dims}")]
    TooManyDimensions {
        region: Region,
        region_dims: usize,
        shape_dims: usize,
    },

    #[error("region {region} has {region_dims} dimensions, expected {expected}")]
    DimensionMismatch {
        region: Region,
        region_dims: usize,
        expected: usize,
    },

    #[error("range {range} out of range for dimension {dim} of size {size}")]
    OutOfRange {
        range: Range,
        dim: usize,
        size: usize,
    },

    #[error("region {region} is not absolute")]
    NotAbsolute { region: Region },

    #[error("ordinal {ordinal} out of range for region {region} of {len} elements")]
    OrdinalOutOfRange {
        ordinal: usize,
        region: Region,
        len: usize,
    },
}

impl RegionError {
    /// Whether this error reports an integer that cannot be represented
    /// as a region bound (negative or too large), as opposed to a
    /// malformed but representable region.
    pub fn is_overflow(&self) -> bool {
        matches!(
            self,
            RegionError::NegativeBound { .. } | RegionError::Overflow { .. }
        )
    }
}

/// A half-open interval `[start, stop)` along one dimension, with an
/// implicit stride of 1. A missing `stop` means "to the end of the
/// dimension", which is only known once the region is resolved
/// against a shape.
///
/// Ranges are convertible from native Rust ranges and from scalar
/// indices; a scalar `n` is the interval `[n, n+1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range(pub usize, pub Option<usize>);

impl Range {
    /// Builds a range from signed bounds, as written in an indexing
    /// expression. Negative bounds are rejected rather than wrapped,
    /// and any explicit stride other than 1 is rejected.
    pub fn from_signed(
        start: Option<i64>,
        stop: Option<i64>,
        stride: Option<i64>,
    ) -> Result<Self, RegionError> {
        for value in [start, stop].into_iter().flatten() {
            if value < 0 {
                return Err(RegionError::NegativeBound { value });
            }
        }
        if let Some(stride) = stride {
            if stride != 1 {
                return Err(RegionError::UnsupportedStride { stride });
            }
        }
        let range = Range(
            start.map_or(0, |v| v as usize),
            stop.map(|v| v as usize),
        );
        range.validate()?;
        Ok(range)
    }

    pub fn start(&self) -> usize {
        self.0
    }

    pub fn stop(&self) -> Option<usize> {
        self.1
    }

    /// True iff the stop bound is explicit.
    pub fn is_bounded(&self) -> bool {
        self.1.is_some()
    }

    pub(crate) fn is_empty(&self) -> bool {
        matches!(self, Range(start, Some(stop)) if stop <= start)
    }

    pub(crate) fn validate(&self) -> Result<(), RegionError> {
        if self.is_empty() {
            return Err(RegionError::EmptyRange { range: *self });
        }
        Ok(())
    }

    pub(crate) fn resolve(&self, size: usize) -> (usize, usize) {
        match self {
            Range(start, Some(stop)) => (*start, *stop),
            Range(start, None) => (*start, size),
        }
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 != 0 {
            write!(f, "{}", self.0)?;
        }
        write!(f, ":")?;
        if let Some(stop) = self.1 {
            write!(f, "{}", stop)?;
        }
        Ok(())
    }
}

/// `usize::MAX` has no successor; it converts to an empty range,
/// which [`Region::new`] rejects.
impl From<usize> for Range {
    fn from(index: usize) -> Self {
        Self(index, Some(index.saturating_add(1)))
    }
}

impl From<std::ops::Range<usize>> for Range {
    fn from(r: std::ops::Range<usize>) -> Self {
        Self(r.start, Some(r.end))
    }
}

impl From<std::ops::RangeInclusive<usize>> for Range {
    fn from(r: std::ops::RangeInclusive<usize>) -> Self {
        Self(*r.start(), Some(r.end().saturating_add(1)))
    }
}

impl From<std::ops::RangeFrom<usize>> for Range {
    fn from(r: std::ops::RangeFrom<usize>) -> Self {
        Self(r.start, None)
    }
}

impl From<std::ops::RangeTo<usize>> for Range {
    fn from(r: std::ops::RangeTo<usize>) -> Self {
        Self(0, Some(r.end))
    }
}

impl From<std::ops::RangeFull> for Range {
    fn from(_: std::ops::RangeFull) -> Self {
        Self(0, None)
    }
}

/// A selection of a multidimensional object: one [`Range`] per
/// dimension, in dimension order.
///
/// A region is *absolute* when every range has an explicit stop, and
/// *relative* otherwise. Relative regions are turned into absolute
/// ones with [`Region::resolve`], given the shape of the object they
/// address. Regions may have fewer dimensions than the shape they are
/// resolved against; the missing trailing dimensions select the whole
/// extent.
///
/// Equality and hashing are structural over the ranges, so two
/// regions written differently but selecting the same intervals are
/// equal:
///
/// ```
/// use ndregion::Region;
///
/// let a: Region = "3, :5".parse().unwrap();
/// let b = ndregion::region![3..4, 0..5].unwrap();
/// assert_eq!(a, b);
/// assert_eq!(a.to_string(), "region[3:4, :5]");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<Range>", into = "Vec<Range>")]
pub struct Region {
    ranges: Vec<Range>,
}

impl TryFrom<Vec<Range>> for Region {
    type Error = RegionError;

    fn try_from(ranges: Vec<Range>) -> Result<Self, Self::Error> {
        Self::new(ranges)
    }
}

impl From<Region> for Vec<Range> {
    fn from(region: Region) -> Self {
        region.ranges
    }
}

impl Region {
    /// Creates a region from per-dimension ranges. At least one range
    /// is required, and no range may be empty.
    pub fn new(ranges: Vec<Range>) -> Result<Self, RegionError> {
        if ranges.is_empty() {
            return Err(RegionError::NoDimensions);
        }
        for range in &ranges {
            range.validate()?;
        }
        Ok(Self { ranges })
    }

    /// Creates a region from anything convertible into ranges.
    pub fn of<R, I>(ranges: I) -> Result<Self, RegionError>
    where
        R: Into<Range>,
        I: IntoIterator<Item = R>,
    {
        Self::new(ranges.into_iter().map(Into::into).collect())
    }

    /// The region covering every element of an object of the given
    /// shape.
    pub fn full(shape: &[usize]) -> Result<Self, RegionError> {
        Self::new(shape.iter().map(|size| Range(0, Some(*size))).collect())
    }

    /// The per-dimension ranges of this region.
    pub fn ranges(&self) -> &[Range] {
        &self.ranges
    }

    pub fn num_dim(&self) -> usize {
        self.ranges.len()
    }

    /// Whether every dimension has an explicit stop, so that resolving
    /// against any shape leaves the region unchanged.
    pub fn is_absolute(&self) -> bool {
        self.ranges.iter().all(Range::is_bounded)
    }

    /// Resolve this region against the provided shape, substituting the
    /// dimension size for every missing stop and padding missing
    /// trailing dimensions with their full extent. Explicit bounds are
    /// kept as written; use [`Region::check_bounds`] to validate them
    /// against the shape.
    pub fn resolve(&self, shape: &[usize]) -> Result<Region, RegionError> {
        if self.num_dim() > shape.len() {
            return Err(RegionError::TooManyDimensions {
                region: self.clone(),
                region_dims: self.num_dim(),
                shape_dims: shape.len(),
            });
        }

        let mut ranges = Vec::with_capacity(shape.len());
        for (dim, size) in shape.iter().enumerate() {
            let range = self.ranges.get(dim).copied().unwrap_or(Range(0, None));
            let (start, stop) = range.resolve(*size);
            if start >= stop {
                return Err(RegionError::OutOfRange {
                    range,
                    dim,
                    size: *size,
                });
            }
            ranges.push(Range(start, Some(stop)));
        }
        Ok(Region { ranges })
    }

    /// Checks that this (absolute) region lies within an object of the
    /// given shape, with matching dimensionality.
    pub fn check_bounds(&self, shape: &[usize]) -> Result<(), RegionError> {
        if self.num_dim() != shape.len() {
            return Err(RegionError::DimensionMismatch {
                region: self.clone(),
                region_dims: self.num_dim(),
                expected: shape.len(),
            });
        }
        for (dim, (range, size)) in self.ranges.iter().zip(shape).enumerate() {
            match range {
                Range(_, None) => {
                    return Err(RegionError::NotAbsolute {
                        region: self.clone(),
                    });
                }
                Range(_, Some(stop)) if stop > size => {
                    return Err(RegionError::OutOfRange {
                        range: *range,
                        dim,
                        size: *size,
                    });
                }
                _ => (),
            }
        }
        Ok(())
    }

    /// The `(start, stop)` pairs of an absolute region.
    pub fn intervals(&self) -> Result<Vec<(usize, usize)>, RegionError> {
        self.ranges
            .iter()
            .map(|range| match range {
                Range(start, Some(stop)) => Ok((*start, *stop)),
                Range(_, None) => Err(RegionError::NotAbsolute {
                    region: self.clone(),
                }),
            })
            .collect()
    }

    /// The per-dimension extents of an absolute region.
    pub fn sizes(&self) -> Result<Vec<usize>, RegionError> {
        Ok(self
            .intervals()?
            .into_iter()
            .map(|(start, stop)| stop - start)
            .collect())
    }

    /// The number of elements selected by an absolute region.
    pub fn num_elements(&self) -> Result<usize, RegionError> {
        Ok(self.sizes()?.iter().product())
    }

    /// Row-major flat offsets, within an object of the given shape, of
    /// every element selected by this region. Offsets are produced in
    /// the region's own row-major order, so the i-th offset corresponds
    /// to the i-th element of a buffer holding the region's data.
    pub fn locations(&self, shape: &[usize]) -> Result<impl Iterator<Item = usize>, RegionError> {
        self.check_bounds(shape)?;
        let intervals = self.intervals()?;
        let strides = row_major_strides(shape);

        Ok(intervals
            .into_iter()
            .map(|(start, stop)| start..stop)
            .multi_cartesian_product()
            .map(move |coords| izip!(coords, strides.iter()).map(|(c, s)| c * s).sum::<usize>()))
    }

    /// The absolute coordinates of the `ordinal`-th element (in
    /// row-major order) selected by this region.
    pub fn coordinates(&self, ordinal: usize) -> Result<Vec<usize>, RegionError> {
        let intervals = self.intervals()?;
        let len = self.num_elements()?;
        if ordinal >= len {
            return Err(RegionError::OrdinalOutOfRange {
                ordinal,
                region: self.clone(),
                len,
            });
        }

        let mut rest = ordinal;
        let mut coords = vec![0; intervals.len()];
        for (dim, (start, stop)) in intervals.iter().enumerate().rev() {
            let size = stop - start;
            coords[dim] = start + rest % size;
            rest /= size;
        }
        Ok(coords)
    }
}

fn row_major_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for dim in (0..shape.len().saturating_sub(1)).rev() {
        strides[dim] = strides[dim + 1] * shape[dim + 1];
    }
    strides
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "region[{}]", self.ranges.iter().join(", "))
    }
}

/// Construct a region from per-dimension ranges, using native Rust
/// range syntax. Evaluates to a `Result`, since the ranges are
/// validated.
///
/// ```
/// let r = ndregion::region![3, 4.., ..5, 6..7].unwrap();
/// assert_eq!(r.to_string(), "region[3:4, 4:, :5, 6:7]");
/// assert!(!r.is_absolute());
/// ```
#[macro_export]
macro_rules! region {
    ( $( $range:expr ),+ $(,)? ) => {
        $crate::Region::new(vec![ $( $crate::Range::from($range) ),+ ])
    };
}

#[cfg(test)]
mod tests {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::Hash;
    use std::hash::Hasher;

    use super::*;

    fn hash_of(region: &Region) -> u64 {
        let mut hasher = DefaultHasher::new();
        region.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_basic() {
        let r = region![2..4, 3..7, 9].unwrap();
        assert_eq!(r.num_dim(), 3);
        assert!(r.is_absolute());
        assert_eq!(r.intervals().unwrap(), vec![(2, 4), (3, 7), (9, 10)]);
        assert_eq!(r.sizes().unwrap(), vec![2, 4, 1]);
        assert_eq!(r.num_elements().unwrap(), 8);
    }

    #[test]
    fn test_invalid() {
        assert!(matches!(Region::new(vec![]), Err(RegionError::NoDimensions)));
        assert!(matches!(
            region![5..4],
            Err(RegionError::EmptyRange {
                range: Range(5, Some(4))
            })
        ));
        assert!(matches!(region![5..5], Err(RegionError::EmptyRange { .. })));
        assert!(matches!(region![..0], Err(RegionError::EmptyRange { .. })));

        let err = Range::from_signed(Some(-1), None, None).unwrap_err();
        assert!(err.is_overflow());
        let err = Range::from_signed(Some(-1), Some(-2), None).unwrap_err();
        assert_eq!(err, RegionError::NegativeBound { value: -1 });
        let err = Range::from_signed(None, None, Some(3)).unwrap_err();
        assert_eq!(err, RegionError::UnsupportedStride { stride: 3 });
        assert!(!err.is_overflow());
        assert_eq!(
            Range::from_signed(Some(1), Some(9), Some(1)).unwrap(),
            Range(1, Some(9))
        );
    }

    #[test]
    fn test_absolute() {
        assert_eq!(
            region![..].unwrap().resolve(&[3, 4]).unwrap(),
            region![0..3, 0..4].unwrap()
        );
        assert_eq!(
            region![..2, 6..].unwrap().resolve(&[10, 10]).unwrap(),
            region![0..2, 6..10].unwrap()
        );

        assert!(!region![..].unwrap().is_absolute());
        assert!(!region![..2, 6..].unwrap().is_absolute());
        assert!(!region![2..3, 4..].unwrap().is_absolute());
        assert!(region![2].unwrap().is_absolute());
        assert!(region![2..3, 4..9].unwrap().is_absolute());
        assert!(region![..].unwrap().resolve(&[3, 4]).unwrap().is_absolute());
    }

    #[test]
    fn test_resolve_keeps_explicit_bounds() {
        // Explicit bounds survive resolution regardless of the shape.
        for shape in [&[1][..], &[100], &[7, 2]] {
            let r = region![3..9].unwrap().resolve(shape).unwrap();
            assert_eq!(r.intervals().unwrap()[0], (3, 9));
            assert_eq!(r.num_dim(), shape.len());
        }
        let absolute = region![1..2, 3..4].unwrap();
        assert_eq!(absolute.resolve(&[8, 8]).unwrap(), absolute);
    }

    #[test]
    fn test_resolve_bad() {
        assert!(matches!(
            region![.., ..].unwrap().resolve(&[3]),
            Err(RegionError::TooManyDimensions {
                region_dims: 2,
                shape_dims: 1,
                ..
            })
        ));
        assert!(matches!(
            region![5..].unwrap().resolve(&[3]),
            Err(RegionError::OutOfRange { dim: 0, size: 3, .. })
        ));
    }

    #[test]
    fn test_hash_eq() {
        assert_eq!(region![..].unwrap(), region![..].unwrap());
        assert_ne!(region![..].unwrap(), region![.., ..].unwrap());
        assert_eq!(hash_of(&region![3].unwrap()), hash_of(&region![3].unwrap()));
        assert_ne!(
            hash_of(&region![..].unwrap()),
            hash_of(&region![.., ..].unwrap())
        );
        // Different spellings of the same intervals.
        assert_eq!(region![3].unwrap(), region![3..4].unwrap());
        assert_eq!(region![..5].unwrap(), region![0..5].unwrap());
        assert_eq!(region![2..=4].unwrap(), region![2..5].unwrap());
        assert_eq!(
            hash_of(&region![..5].unwrap()),
            hash_of(&region![0..5].unwrap())
        );
    }

    #[test]
    fn test_display() {
        let r = region![3, 4.., ..5, 6..7].unwrap();
        assert_eq!(r.to_string(), "region[3:4, 4:, :5, 6:7]");
        assert_eq!(region![..].unwrap().to_string(), "region[:]");
        assert_eq!(Range(3, None).to_string(), "3:");
        // A leading zero is never written out, so index 0 reads as `:1`.
        assert_eq!(region![0, 0..4].unwrap().to_string(), "region[:1, :4]");
        assert_eq!(region![0].unwrap(), "0:1".parse().unwrap());
    }

    #[test]
    fn test_locations() {
        let shape = [8, 8];
        let r = region![4..6, 4].unwrap();
        assert_eq!(r.locations(&shape).unwrap().collect::<Vec<_>>(), vec![36, 44]);

        let r = region![6, 5..7].unwrap();
        assert_eq!(r.locations(&shape).unwrap().collect::<Vec<_>>(), vec![53, 54]);

        let r = Region::full(&[2, 3]).unwrap();
        assert_eq!(
            r.locations(&[2, 3]).unwrap().collect::<Vec<_>>(),
            (0..6).collect::<Vec<_>>()
        );

        assert!(matches!(
            region![0..9].unwrap().locations(&[8]),
            Err(RegionError::OutOfRange { size: 8, .. })
        ));
        assert!(matches!(
            region![0..2].unwrap().locations(&[8, 8]),
            Err(RegionError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            region![2..].unwrap().locations(&[8]),
            Err(RegionError::NotAbsolute { .. })
        ));
    }

    #[test]
    fn test_coordinates() {
        let r = region![2..4, 3..6].unwrap();
        assert_eq!(r.coordinates(0).unwrap(), vec![2, 3]);
        assert_eq!(r.coordinates(2).unwrap(), vec![2, 5]);
        assert_eq!(r.coordinates(3).unwrap(), vec![3, 3]);
        assert!(matches!(
            r.coordinates(6),
            Err(RegionError::OrdinalOutOfRange { len: 6, .. })
        ));
    }

    #[test]
    fn test_serde() {
        let r = region![1..3, 4..].unwrap();
        let json = serde_json::to_string(&r).unwrap();
        assert_eq!(json, "[[1,3],[4,null]]");
        let back: Region = serde_json::from_str(&json).unwrap();
        assert_eq!(r, back);
    }

    #[test]
    fn test_serde_validates() {
        for json in ["[]", "[[5,4]]", "[[0,2],[3,3]]", r#"{"ranges":[]}"#] {
            assert!(
                serde_json::from_str::<Region>(json).is_err(),
                "{} should not deserialize",
                json
            );
        }
        let err = serde_json::from_str::<Region>("[[5,4]]").unwrap_err();
        assert!(err.to_string().contains("empty range 5:4"), "{}", err);
    }

    #[test]
    fn test_of() {
        let r = Region::of([2..4, 0..3]).unwrap();
        assert_eq!(r.intervals().unwrap(), vec![(2, 4), (0, 3)]);
        assert_eq!(r, region![2..4, 0..3].unwrap());
        assert_eq!(r, "2:4, :3".parse().unwrap());

        let mixed = Region::of([Range(3, Some(4)), Range::from(5..), Range::from(..2)]).unwrap();
        assert_eq!(mixed, "3, 5:, :2".parse().unwrap());
        assert_eq!(Region::of([1usize, 7]).unwrap(), region![1..2, 7..8].unwrap());

        assert_eq!(
            Region::of(Vec::<Range>::new()),
            Err(RegionError::NoDimensions)
        );
        assert_eq!(
            Region::of([0..2, 4..4]),
            Err(RegionError::EmptyRange {
                range: Range(4, Some(4))
            })
        );
        assert!(matches!(
            Region::of([3..1]),
            Err(RegionError::EmptyRange { .. })
        ));
    }

    #[test]
    fn test_index_at_limit() {
        assert!(matches!(
            region![usize::MAX],
            Err(RegionError::EmptyRange { .. })
        ));
        assert!(matches!(
            region![usize::MAX..=usize::MAX],
            Err(RegionError::EmptyRange { .. })
        ));
        assert_eq!(
            region![usize::MAX - 1].unwrap().intervals().unwrap(),
            vec![(usize::MAX - 1, usize::MAX)]
        );
    }
}
