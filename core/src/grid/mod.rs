pub mod coordinates;
pub mod projection;
pub mod slice;

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use get_size::GetSize;
use ndarray::{s, Array1, ArrayView1};
use once_cell::sync::OnceCell;
use tracing::{instrument, warn};
use winnow::Parser;

use crate::{
    error::{Error, Result},
    formats::util::{f64, usize, words},
    geom::{Dim3D, Vec3, Vec3U},
    ws_separated,
};

use self::{
    coordinates::CoordinateSystem,
    slice::{AxisRange, AxisSpec, Indexing},
};

/// Structured grid of a simulation, possibly restricted to a sub-domain.
///
/// Slicing never mutates a grid, it creates a new one that shares the
/// interface coordinates of the unsliced grid.
#[derive(Debug, Clone)]
pub struct Grid {
    interfaces: Arc<Vec3<Vec<f64>>>,
    coordinates: CoordinateSystem,
    ranges: Vec3<AxisRange>,
    centers: OnceCell<Vec3<Array1<f64>>>,
}

/// Content of a `grid.out` file.
#[derive(Debug, Clone, PartialEq)]
pub struct GridFile {
    /// Cell interfaces per axis, `cells + 1` values each
    pub interfaces: Vec3<Vec<f64>>,
    /// Geometry given in the file header, if any
    pub geometry: Option<CoordinateSystem>,
}

impl GridFile {
    #[instrument]
    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(Error::io(path))?;
        Self::parse(&text, path)
    }

    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        let err = |line: usize, reason: String| Error::MalformedGrid {
            path: PathBuf::from(path),
            line,
            reason,
        };

        let mut geometry: Option<CoordinateSystem> = None;
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(i, l)| (i + 1, l))
            .filter(|(_, l)| !l.trim().is_empty())
            .filter(|(_, l)| {
                let Some(comment) = l.trim_start().strip_prefix('#') else {
                    return true;
                };
                let tokens = words(comment);
                if let [key, value, ..] = tokens.as_slice() {
                    if key.trim_end_matches(':') == "GEOMETRY" {
                        match value.parse::<CoordinateSystem>() {
                            Ok(g) => geometry = Some(g),
                            Err(e) => warn!(%e, "Ignoring grid geometry"),
                        }
                    }
                }
                false
            })
            .peekable();

        let mut axes = Vec::with_capacity(3);
        while let Some((line, content)) = lines.next() {
            let count = match words(content).as_slice() {
                [count] => count
                    .parse::<usize>()
                    .map_err(|e| err(line, format!("invalid cell count '{count}': {e}")))?,
                _ => return Err(err(line, "expected the cell count of the next axis".into())),
            };
            if count == 0 {
                return Err(err(line, "an axis needs at least one cell".into()));
            }
            if axes.len() == 3 {
                return Err(err(line, "more than three axes".into()));
            }

            let mut interfaces = Vec::with_capacity(count + 1);
            let mut last_right: f64 = 0.0;
            for cell in 0..count {
                // A single token starts the next axis
                let next = lines.next_if(|(_, l)| words(l).len() != 1);
                let Some((line, content)) = next else {
                    let at = lines.peek().map(|(l, _)| *l).unwrap_or(line);
                    return Err(err(
                        at,
                        format!("axis {} declares {count} cells but has {cell}", axes.len() + 1),
                    ));
                };
                let (_, left, right) = crate::formats::util::parse_line(
                    content,
                    ws_separated!(usize, f64, f64),
                )
                .map_err(|reason| err(line, reason))?;

                if right <= left {
                    return Err(err(
                        line,
                        format!("cell interfaces {left} and {right} are not increasing"),
                    ));
                }
                if let Some(&prev) = interfaces.last() {
                    let tolerance = 1e-9 * last_right.abs().max(1.0);
                    if left <= prev || left < last_right - tolerance {
                        return Err(err(
                            line,
                            format!(
                                "cell [{left}, {right}] overlaps the previous cell ending at {last_right}"
                            ),
                        ));
                    }
                }
                interfaces.push(left);
                last_right = right;
            }
            interfaces.push(last_right);
            axes.push(interfaces);
        }

        let Ok([x1, x2, x3]) = <[Vec<f64>; 3]>::try_from(axes) else {
            return Err(err(
                text.lines().count(),
                "expected exactly three axes".into(),
            ));
        };

        Ok(Self {
            interfaces: Vec3::new(x1, x2, x3),
            geometry,
        })
    }
}

impl Grid {
    /// A grid from cell interfaces, every axis needs at least one cell.
    pub fn new(interfaces: Vec3<Vec<f64>>, coordinates: CoordinateSystem) -> Result<Self> {
        let ranges = interfaces.as_ref().try_map(|axis, i| match i.len() {
            0 | 1 => Err(Error::MalformedGrid {
                path: PathBuf::new(),
                line: 0,
                reason: format!("axis {axis} has {} interfaces, at least 2 needed", i.len()),
            }),
            n => Ok(AxisRange::full(n - 1)),
        })?;
        Ok(Self {
            interfaces: Arc::new(interfaces),
            coordinates,
            ranges,
            centers: OnceCell::new(),
        })
    }

    /// Reads a grid file, taking the coordinate system from its header or defaulting to cartesian.
    pub fn parse(path: &Path) -> Result<Self> {
        let file = GridFile::read(path)?;
        Self::new(file.interfaces, file.geometry.unwrap_or_default())
    }

    pub fn with_coordinates(&self, coordinates: CoordinateSystem) -> Self {
        Self {
            coordinates,
            ..self.clone()
        }
    }

    pub fn coordinates(&self) -> CoordinateSystem {
        self.coordinates
    }

    /// Number of cells per axis, 1 for degenerate or single-index sliced axes.
    pub fn dims(&self) -> Vec3U {
        self.ranges.map(|r| r.len)
    }

    /// Dims in presentation order.
    pub fn shape(&self, indexing: Indexing) -> [usize; 3] {
        indexing.present(self.dims())
    }

    /// Dims of the unsliced grid.
    pub fn full_dims(&self) -> Vec3U {
        (*self.interfaces).as_ref().map(|i| i.len() - 1)
    }

    pub fn size(&self) -> usize {
        self.dims().product()
    }

    /// Active selection, relative to the unsliced grid.
    pub fn ranges(&self) -> Vec3<AxisRange> {
        self.ranges
    }

    pub fn is_sliced(&self) -> bool {
        self.ranges != self.full_dims().map(AxisRange::full)
    }

    /// Axes with more than one cell.
    pub fn reduced_dims(&self) -> Vec<Dim3D> {
        self.dims()
            .enumerate()
            .filter(|(_, n)| **n > 1)
            .map(|(d, _)| d)
            .collect()
    }

    /// Left cell edges.
    pub fn left(&self, axis: Dim3D) -> ArrayView1<'_, f64> {
        let r = self.ranges[axis];
        ArrayView1::from(&self.interfaces[axis][..]).slice_move(s![r.start..=r.last(); r.step])
    }

    /// Right cell edges.
    pub fn right(&self, axis: Dim3D) -> ArrayView1<'_, f64> {
        let r = self.ranges[axis];
        ArrayView1::from(&self.interfaces[axis][..])
            .slice_move(s![r.start + 1..=r.last() + 1; r.step])
    }

    /// Cell interfaces, one more than there are cells.
    ///
    /// For strided slices these are the left edges of the selected cells followed by
    /// the right edge of the last one.
    pub fn interfaces(&self, axis: Dim3D) -> Array1<f64> {
        let r = self.ranges[axis];
        let all = &self.interfaces[axis];
        if r.step == 1 {
            return Array1::from(all[r.start..=r.start + r.len].to_vec());
        }
        let mut out: Vec<f64> = r.indices().map(|i| all[i]).collect();
        out.push(all[r.last() + 1]);
        Array1::from(out)
    }

    /// Cell centers, the midpoints of the cell interfaces.
    pub fn centers(&self, axis: Dim3D) -> &Array1<f64> {
        &self.all_centers()[axis]
    }

    fn all_centers(&self) -> &Vec3<Array1<f64>> {
        self.centers.get_or_init(|| {
            Vec3::from([Dim3D::X1, Dim3D::X2, Dim3D::X3])
                .map(|d| (&self.left(d) + &self.right(d)) / 2.0)
        })
    }

    pub fn x1(&self) -> &Array1<f64> {
        self.centers(Dim3D::X1)
    }

    pub fn x2(&self) -> &Array1<f64> {
        self.centers(Dim3D::X2)
    }

    pub fn x3(&self) -> &Array1<f64> {
        self.centers(Dim3D::X3)
    }

    /// Cell centers by physical (`r`, `theta`, ...) or PLUTO (`x1`, ...) axis name.
    pub fn coordinate(&self, name: &str) -> Option<&Array1<f64>> {
        self.coordinates.axis(name).map(|d| self.centers(d))
    }

    pub fn widths(&self, axis: Dim3D) -> Array1<f64> {
        &self.right(axis) - &self.left(axis)
    }

    /// Lower and upper bound of the (sliced) domain.
    pub fn domain(&self, axis: Dim3D) -> (f64, f64) {
        let r = self.ranges[axis];
        let all = &self.interfaces[axis];
        (all[r.start], all[r.last() + 1])
    }

    /// Domain length `L` along `axis`.
    pub fn extent(&self, axis: Dim3D) -> f64 {
        let (lo, hi) = self.domain(axis);
        hi - lo
    }

    /// Restricts the grid; `spec` is relative to this grid, so slices compose.
    pub fn slice(&self, spec: Vec3<AxisSpec>) -> Result<Grid> {
        let ranges = self.ranges.zip(spec).try_map(|axis, (range, spec)| {
            AxisRange::normalize(spec, range.len, axis).map(|inner| range.compose(inner))
        })?;
        Ok(Self {
            interfaces: self.interfaces.clone(),
            coordinates: self.coordinates,
            ranges,
            centers: OnceCell::new(),
        })
    }

    /// Slice given in presentation order.
    pub fn slice_indexed(&self, spec: slice::Slice3, indexing: Indexing) -> Result<Grid> {
        self.slice(spec.to_axes(indexing))
    }
}

impl PartialEq for Grid {
    fn eq(&self, other: &Self) -> bool {
        self.coordinates == other.coordinates
            && self.ranges == other.ranges
            && (Arc::ptr_eq(&self.interfaces, &other.interfaces)
                || self.interfaces == other.interfaces)
    }
}

impl GetSize for Grid {
    fn get_heap_size(&self) -> usize {
        let interfaces = self.interfaces.get_heap_size();
        let centers = self
            .centers
            .get()
            .map(|c| c.iter().map(|a| a.len() * std::mem::size_of::<f64>()).sum())
            .unwrap_or(0);
        interfaces + centers
    }
}

impl std::fmt::Display for Grid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let d = self.dims();
        write!(
            f,
            "PLUTO Grid, Dimensions ({}, {}, {}), Coordinate System: '{}'",
            d.x1, d.x2, d.x3, self.coordinates
        )
    }
}
