use get_size::GetSize;
use ndarray::{Array3, ArrayView3, ShapeBuilder};
use parking_lot::RwLock;

use super::mmap::MappedFile;
use crate::{
    error::{Error, Result},
    formats::{DType, Precision},
    geom::{Vec3, Vec3U},
    grid::slice::{AxisRange, Indexing},
};

/// Where the selected elements of a field sit in its backing record.
///
/// Records are stored `x1` fastest, so the unsliced strides are `1`, `N1` and `N1 * N2`.
/// All quantities count elements, not bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldLayout {
    /// Selected cells per axis
    pub shape: Vec3U,
    /// Distance between selected cells per axis
    pub strides: Vec3U,
    /// Record position of the first selected cell
    pub first: usize,
    /// Elements in the whole record
    pub extent: usize,
}

impl FieldLayout {
    pub fn new(full: Vec3U, ranges: Vec3<AxisRange>) -> Self {
        let native = Vec3::new(1, full.x1, full.x1 * full.x2);
        let pairs = native.zip(ranges);
        Self {
            shape: ranges.map(|r| r.len),
            strides: pairs.map(|(s, r)| s * r.step),
            first: pairs.iter().map(|(s, r)| s * r.start).sum(),
            extent: full.product(),
        }
    }

    /// A record holding exactly the selection.
    pub fn contiguous(dims: Vec3U) -> Self {
        Self::new(dims, dims.map(AxisRange::full))
    }

    pub fn len(&self) -> usize {
        self.shape.product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn offset(&self, idx: Vec3U) -> usize {
        self.first
            + idx.x1 * self.strides.x1
            + idx.x2 * self.strides.x2
            + idx.x3 * self.strides.x3
    }

    /// Record positions of all selected cells in storage order.
    pub fn offsets(&self) -> impl Iterator<Item = usize> {
        let l = *self;
        (0..l.shape.x3).flat_map(move |k| {
            (0..l.shape.x2).flat_map(move |j| {
                (0..l.shape.x1).map(move |i| l.offset(Vec3::new(i, j, k)))
            })
        })
    }

    fn contains(&self, idx: Vec3U) -> bool {
        idx.x1 < self.shape.x1 && idx.x2 < self.shape.x2 && idx.x3 < self.shape.x3
    }
}

enum Storage {
    /// Values decoded on access from a private mapping
    Mapped {
        file: MappedFile,
        offset: usize,
        dtype: DType,
    },
    /// Values that had to be parsed up front
    Owned(RwLock<Vec<f64>>),
}

/// A borrowed, zero-copy view of a field in presentation order.
#[derive(Debug)]
pub enum FieldView<'a> {
    F32(ArrayView3<'a, f32>),
    F64(ArrayView3<'a, f64>),
}

impl FieldView<'_> {
    pub fn shape(&self) -> &[usize] {
        match self {
            FieldView::F32(v) => v.shape(),
            FieldView::F64(v) => v.shape(),
        }
    }
}

/// One variable of one output, restricted to a grid selection.
///
/// Indices and shapes are given in the field's [`Indexing`], storage stays in file order.
pub struct Field {
    name: String,
    storage: Storage,
    layout: FieldLayout,
    indexing: Indexing,
}

impl Field {
    /// A field decoding `layout.extent` values of `dtype` starting at byte `offset` of `file`.
    pub fn mapped(
        name: &str,
        file: MappedFile,
        offset: usize,
        dtype: DType,
        layout: FieldLayout,
        indexing: Indexing,
    ) -> Result<Self> {
        file.check_range(offset, layout.extent * dtype.size())?;
        Ok(Self {
            name: name.to_string(),
            storage: Storage::Mapped {
                file,
                offset,
                dtype,
            },
            layout,
            indexing,
        })
    }

    pub fn owned(
        name: &str,
        values: Vec<f64>,
        layout: FieldLayout,
        indexing: Indexing,
    ) -> Result<Self> {
        if values.len() != layout.extent {
            return Err(Error::ShapeMismatch {
                expected: indexing.present(layout.shape),
                found: vec![values.len()],
            });
        }
        Ok(Self {
            name: name.to_string(),
            storage: Storage::Owned(RwLock::new(values)),
            layout,
            indexing,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn indexing(&self) -> Indexing {
        self.indexing
    }

    pub fn layout(&self) -> FieldLayout {
        self.layout
    }

    /// Shape in presentation order, always three axes.
    pub fn shape(&self) -> [usize; 3] {
        self.indexing.present(self.layout.shape)
    }

    pub fn len(&self) -> usize {
        self.layout.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layout.is_empty()
    }

    /// Whether the values are read from a memory mapping.
    pub fn is_mapped(&self) -> bool {
        matches!(self.storage, Storage::Mapped { .. })
    }

    /// Runs `f` with a function decoding the value at a record position.
    fn with_reader<R>(&self, f: impl FnOnce(&dyn Fn(usize) -> f64) -> R) -> R {
        match &self.storage {
            Storage::Mapped {
                file,
                offset,
                dtype,
            } => {
                let map = file.read();
                let bytes = &map[*offset..];
                let size = dtype.size();
                f(&|pos| dtype.read(&bytes[pos * size..(pos + 1) * size]))
            }
            Storage::Owned(values) => {
                let values = values.read_recursive();
                f(&|pos| values[pos])
            }
        }
    }

    fn position(&self, index: [usize; 3]) -> Option<usize> {
        let idx = self.indexing.to_axes(index);
        self.layout.contains(idx).then(|| self.layout.offset(idx))
    }

    pub fn get(&self, index: [usize; 3]) -> Option<f64> {
        let pos = self.position(index)?;
        Some(self.with_reader(|read| read(pos)))
    }

    /// Overwrites one element in memory.
    ///
    /// Mapped fields are mapped copy-on-write, the change is visible through this field
    /// until it is dropped and never reaches the file.
    pub fn set(&self, index: [usize; 3], value: f64) -> Result<()> {
        let pos = self.position(index).ok_or(Error::FieldIndex {
            index,
            shape: self.shape(),
        })?;
        match &self.storage {
            Storage::Mapped {
                file,
                offset,
                dtype,
            } => {
                let mut map = file.write();
                let start = offset + pos * dtype.size();
                dtype.write(&mut map[start..start + dtype.size()], value);
            }
            Storage::Owned(values) => values.write()[pos] = value,
        }
        Ok(())
    }

    /// Folds over all selected values in storage order.
    ///
    /// The values stay read locked while `f` runs. `f` may read this field again,
    /// but calling [`Field::set`] on it from inside `f` deadlocks.
    pub fn fold<B>(&self, init: B, mut f: impl FnMut(B, f64) -> B) -> B {
        let layout = self.layout;
        self.with_reader(|read| layout.offsets().fold(init, |acc, pos| f(acc, read(pos))))
    }

    pub fn sum(&self) -> f64 {
        self.fold(0.0, |acc, v| acc + v)
    }

    pub fn mean(&self) -> f64 {
        self.sum() / self.len() as f64
    }

    pub fn min(&self) -> f64 {
        self.fold(f64::INFINITY, f64::min)
    }

    pub fn max(&self) -> f64 {
        self.fold(f64::NEG_INFINITY, f64::max)
    }

    /// Copies the selection into an owned array in presentation order.
    pub fn to_array(&self) -> Array3<f64> {
        let layout = self.layout;
        let indexing = self.indexing;
        self.with_reader(|read| {
            Array3::from_shape_fn(self.shape(), |(a, b, c)| {
                read(layout.offset(indexing.to_axes([a, b, c])))
            })
        })
    }

    /// Runs `f` on a view borrowing the backing memory directly.
    ///
    /// Returns `None` if the values cannot be viewed in place, i.e. the file is not in
    /// native byte order or the record is misaligned. Use [`Field::to_array`] then.
    ///
    /// The view borrows the locked values, so `f` must not call [`Field::set`] on this field.
    pub fn with_view<R>(&self, f: impl FnOnce(FieldView<'_>) -> R) -> Option<R> {
        let shape = self.shape();
        let [sa, sb, sc] = self.indexing.present(self.layout.strides);
        let shape = (shape[0], shape[1], shape[2]).strides((sa, sb, sc));
        let first = self.layout.first;

        match &self.storage {
            Storage::Owned(values) => {
                let values = values.read_recursive();
                let view = ArrayView3::from_shape(shape, &values[first..]).ok()?;
                Some(f(FieldView::F64(view)))
            }
            Storage::Mapped {
                file,
                offset,
                dtype,
            } => {
                if !dtype.is_native() {
                    return None;
                }
                let map = file.read();
                let bytes = map.get(*offset..*offset + self.layout.extent * dtype.size())?;
                match dtype.precision {
                    Precision::Double => {
                        let values: &[f64] = bytemuck::try_cast_slice(bytes).ok()?;
                        let view = ArrayView3::from_shape(shape, &values[first..]).ok()?;
                        Some(f(FieldView::F64(view)))
                    }
                    Precision::Single => {
                        let values: &[f32] = bytemuck::try_cast_slice(bytes).ok()?;
                        let view = ArrayView3::from_shape(shape, &values[first..]).ok()?;
                        Some(f(FieldView::F32(view)))
                    }
                }
            }
        }
    }
}

impl GetSize for Field {
    fn get_heap_size(&self) -> usize {
        let values = match &self.storage {
            Storage::Mapped { .. } => 0,
            Storage::Owned(values) => values.read().capacity() * std::mem::size_of::<f64>(),
        };
        values + self.name.get_heap_size()
    }
}

impl std::fmt::Debug for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("shape", &self.shape())
            .field("mapped", &self.is_mapped())
            .finish()
    }
}
