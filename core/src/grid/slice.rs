use std::{
    fmt,
    ops::{Range, RangeFrom, RangeFull, RangeInclusive, RangeTo},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    geom::{Dim3D, Vec3},
};

/// Selection along a single axis, relative to the axis it is applied to.
///
/// Negative positions count from the end of the axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AxisSpec {
    #[default]
    Full,
    Index(isize),
    Range {
        start: Option<isize>,
        stop: Option<isize>,
        step: isize,
    },
}

impl AxisSpec {
    pub fn range(start: isize, stop: isize) -> Self {
        Self::Range {
            start: Some(start),
            stop: Some(stop),
            step: 1,
        }
    }

    pub fn stepped(start: Option<isize>, stop: Option<isize>, step: isize) -> Self {
        Self::Range { start, stop, step }
    }
}

impl From<RangeFull> for AxisSpec {
    fn from(_: RangeFull) -> Self {
        Self::Full
    }
}

impl From<isize> for AxisSpec {
    fn from(i: isize) -> Self {
        Self::Index(i)
    }
}

impl From<i32> for AxisSpec {
    fn from(i: i32) -> Self {
        Self::Index(i as isize)
    }
}

impl From<Range<isize>> for AxisSpec {
    fn from(r: Range<isize>) -> Self {
        Self::range(r.start, r.end)
    }
}

impl From<Range<i32>> for AxisSpec {
    fn from(r: Range<i32>) -> Self {
        Self::range(r.start as isize, r.end as isize)
    }
}

impl From<RangeInclusive<i32>> for AxisSpec {
    fn from(r: RangeInclusive<i32>) -> Self {
        Self::range(*r.start() as isize, *r.end() as isize + 1)
    }
}

impl From<RangeFrom<i32>> for AxisSpec {
    fn from(r: RangeFrom<i32>) -> Self {
        Self::stepped(Some(r.start as isize), None, 1)
    }
}

impl From<RangeTo<i32>> for AxisSpec {
    fn from(r: RangeTo<i32>) -> Self {
        Self::stepped(None, Some(r.end as isize), 1)
    }
}

/// A normalized selection along one axis of the unsliced grid: `len` cells
/// starting at `start`, `step` cells apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AxisRange {
    pub start: usize,
    pub len: usize,
    pub step: usize,
}

impl AxisRange {
    pub fn full(len: usize) -> Self {
        Self {
            start: 0,
            len,
            step: 1,
        }
    }

    /// Resolves `spec` against an axis of `len` cells.
    ///
    /// Out of bounds positions, empty selections and non-positive steps are errors,
    /// a sliced axis always keeps at least one cell.
    pub fn normalize(spec: AxisSpec, len: usize, axis: Dim3D) -> Result<Self> {
        let err = |reason: String| Error::Slice { axis, reason };
        let resolve = |i: isize| if i < 0 { i + len as isize } else { i };

        match spec {
            AxisSpec::Full => Ok(Self::full(len)),
            AxisSpec::Index(i) => {
                let pos = resolve(i);
                if pos < 0 || pos >= len as isize {
                    return Err(err(format!("index {i} out of bounds for {len} cells")));
                }
                Ok(Self {
                    start: pos as usize,
                    len: 1,
                    step: 1,
                })
            }
            AxisSpec::Range { start, stop, step } => {
                if step < 1 {
                    return Err(err(format!("step {step} has to be positive")));
                }
                let begin = start.map(resolve).unwrap_or(0);
                let end = stop.map(resolve).unwrap_or(len as isize);
                if begin < 0 || begin >= len as isize {
                    return Err(err(format!("start {begin} out of bounds for {len} cells")));
                }
                if end > len as isize {
                    return Err(err(format!("stop {end} out of bounds for {len} cells")));
                }
                if end <= begin {
                    return Err(err(format!("empty selection {begin}..{end}")));
                }
                let step = step as usize;
                let count = (end - begin) as usize;
                Ok(Self {
                    start: begin as usize,
                    len: (count + step - 1) / step,
                    step,
                })
            }
        }
    }

    /// Applies `inner`, which is relative to this range, giving a range relative to
    /// the unsliced axis.
    pub fn compose(self, inner: AxisRange) -> Self {
        Self {
            start: self.start + inner.start * self.step,
            len: inner.len,
            step: self.step * inner.step,
        }
    }

    /// Positions in the unsliced axis.
    pub fn indices(self) -> impl Iterator<Item = usize> + Clone {
        (0..self.len).map(move |i| self.start + i * self.step)
    }

    pub fn last(self) -> usize {
        self.start + (self.len - 1) * self.step
    }
}

/// Axis order in which multi-axis arguments and array axes are presented.
///
/// Storage is always native; this only permutes at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Indexing {
    /// `(x1, x2, x3)`
    #[default]
    Ijk,
    /// `(x3, x2, x1)`, the order PLUTO writes in
    Kji,
}

impl Indexing {
    /// Presentation position to axis.
    pub fn axes(self) -> [Dim3D; 3] {
        match self {
            Self::Ijk => [Dim3D::X1, Dim3D::X2, Dim3D::X3],
            Self::Kji => [Dim3D::X3, Dim3D::X2, Dim3D::X1],
        }
    }

    /// Brings a presentation ordered triple into axis order.
    pub fn to_axes<T>(self, [a, b, c]: [T; 3]) -> Vec3<T> {
        match self {
            Self::Ijk => Vec3::new(a, b, c),
            Self::Kji => Vec3::new(c, b, a),
        }
    }

    /// Brings an axis ordered triple into presentation order.
    pub fn present<T>(self, v: Vec3<T>) -> [T; 3] {
        match self {
            Self::Ijk => [v.x1, v.x2, v.x3],
            Self::Kji => [v.x3, v.x2, v.x1],
        }
    }
}

impl FromStr for Indexing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ijk" => Ok(Self::Ijk),
            "kji" => Ok(Self::Kji),
            _ => Err(format!("Unknown indexing convention '{s}'")),
        }
    }
}

impl fmt::Display for Indexing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ijk => "ijk",
            Self::Kji => "kji",
        })
    }
}

/// A three axis selection in presentation order, see [`Indexing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Slice3(pub [AxisSpec; 3]);

impl Slice3 {
    pub fn new(a: impl Into<AxisSpec>, b: impl Into<AxisSpec>, c: impl Into<AxisSpec>) -> Self {
        Self([a.into(), b.into(), c.into()])
    }

    pub fn full() -> Self {
        Self::default()
    }

    pub fn to_axes(self, indexing: Indexing) -> Vec3<AxisSpec> {
        indexing.to_axes(self.0)
    }
}

impl<A, B, C> From<(A, B, C)> for Slice3
where
    A: Into<AxisSpec>,
    B: Into<AxisSpec>,
    C: Into<AxisSpec>,
{
    fn from((a, b, c): (A, B, C)) -> Self {
        Self::new(a, b, c)
    }
}
