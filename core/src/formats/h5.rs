//! PLUTO's HDF5 output, `data.NNNN.<dbl|flt>.h5` with one `Timestep_N/vars/<var>`
//! dataset per variable.
//!
//! Needs the `hdf5` feature, without it these formats are reported as unavailable.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use indexmap::IndexSet;

use super::{
    manifest::Manifest, steps_from_manifest, Format, FormatReader, OpenRequest, StepInfo,
    StepLocation,
};
use crate::{
    error::{Error, Result},
    lazy_data::field::Field,
};

#[derive(Debug)]
#[cfg_attr(not(feature = "hdf5"), allow(dead_code))]
pub struct Hdf5Reader {
    format: Format,
    data_dir: PathBuf,
    manifest: Manifest,
}

impl Hdf5Reader {
    #[cfg(feature = "hdf5")]
    pub fn open(format: Format, data_dir: &Path, manifest: Manifest) -> Result<Self> {
        Ok(Self {
            format,
            data_dir: data_dir.to_path_buf(),
            manifest,
        })
    }

    #[cfg(not(feature = "hdf5"))]
    pub fn open(format: Format, _data_dir: &Path, _manifest: Manifest) -> Result<Self> {
        Err(unavailable(format))
    }

    #[cfg(feature = "hdf5")]
    fn group(step: &StepInfo) -> String {
        format!("Timestep_{}/vars", step.index)
    }
}

#[cfg(not(feature = "hdf5"))]
fn unavailable(format: Format) -> Error {
    Error::FormatUnavailable {
        format,
        reason: "built without the `hdf5` feature",
    }
}

impl FormatReader for Hdf5Reader {
    fn format(&self) -> Format {
        self.format
    }

    fn discover(&self) -> Result<Vec<StepInfo>> {
        Ok(steps_from_manifest(&self.manifest, |index| {
            StepLocation::File(
                self.data_dir
                    .join(format!("data.{index:04}.{}", self.format.extension())),
            )
        }))
    }

    #[cfg(feature = "hdf5")]
    fn variable_names(&self, step: &StepInfo) -> Result<Arc<IndexSet<String>>> {
        let file = hdf5::File::open(step.location.path_for(""))?;
        let present = file.group(&Self::group(step))?.member_names()?;
        // Keep the manifest order, HDF5 lists members alphabetically
        let mut names: IndexSet<String> = self
            .manifest
            .vars
            .iter()
            .filter(|v| present.contains(v))
            .cloned()
            .collect();
        names.extend(present);
        Ok(Arc::new(names))
    }

    #[cfg(not(feature = "hdf5"))]
    fn variable_names(&self, _step: &StepInfo) -> Result<Arc<IndexSet<String>>> {
        Err(unavailable(self.format))
    }

    /// Reads only the selected hyperslab of the dataset.
    #[cfg(feature = "hdf5")]
    fn open_variable(&self, request: OpenRequest<'_>) -> Result<Field> {
        use ndarray::{s, Array3};

        use crate::lazy_data::field::FieldLayout;

        let path = request.step.location.path_for(request.name);
        let file = hdf5::File::open(&path)?;
        let group = file.group(&Self::group(request.step))?;
        let dataset = group.dataset(request.name).map_err(|_| Error::UnknownVariable {
            name: request.name.to_string(),
            valid: group.member_names().unwrap_or_default(),
        })?;

        let full = request.grid.full_dims();
        let expected = vec![full.x3, full.x2, full.x1];
        if dataset.shape() != expected {
            return Err(Error::CorruptData {
                path,
                reason: format!(
                    "dataset {} has shape {:?}, the grid is {expected:?}",
                    request.name,
                    dataset.shape()
                ),
            });
        }

        let r = request.grid.ranges();
        let values: Array3<f64> = dataset.read_slice(s![
            r.x3.start..=r.x3.last();r.x3.step,
            r.x2.start..=r.x2.last();r.x2.step,
            r.x1.start..=r.x1.last();r.x1.step
        ])?;
        tracing::debug!(var = request.name, shape = ?values.shape(), "Read HDF5 hyperslab");
        Field::owned(
            request.name,
            values.into_raw_vec(),
            FieldLayout::contiguous(request.grid.dims()),
            request.indexing,
        )
    }

    #[cfg(not(feature = "hdf5"))]
    fn open_variable(&self, _request: OpenRequest<'_>) -> Result<Field> {
        Err(unavailable(self.format))
    }
}


#[cfg(all(test, feature = "hdf5"))]
mod tests {
    use super::*;
    use crate::{
        grid::slice::{AxisSpec, Indexing, Slice3},
        test_util::{self, Dataset, VARS},
    };

    #[test]
    fn reads_selected_hyperslab() {
        for format in [Format::DblH5, Format::FltH5] {
            let data = Dataset::new((5, 3, 2)).steps(2).build(format);
            let reader = format.open(data.data_dir()).unwrap();
            let steps = reader.discover().unwrap();
            assert_eq!(steps.len(), 2);

            let names = reader.variable_names(&steps[1]).unwrap();
            assert_eq!(names.iter().map(String::as_str).collect::<Vec<_>>(), VARS);

            let grid = data
                .grid()
                .slice_indexed(
                    Slice3::new(AxisSpec::stepped(Some(1), None, 2), 1.., 1),
                    Indexing::Ijk,
                )
                .unwrap();
            let open = |name| {
                reader.open_variable(OpenRequest {
                    step: &steps[1],
                    name,
                    grid: &grid,
                    indexing: Indexing::Ijk,
                })
            };

            let field = open("vx1").unwrap();
            assert_eq!(field.shape(), [2, 2, 1]);
            for (a, i) in [1, 3].into_iter().enumerate() {
                for (b, j) in [1, 2].into_iter().enumerate() {
                    assert_eq!(
                        field.get([a, b, 0]),
                        Some(test_util::value(1, 1, i, j, 1)),
                        "{format}"
                    );
                }
            }

            let err = open("bx1").unwrap_err();
            assert!(matches!(err, Error::UnknownVariable { .. }), "{err:?}");
        }
    }
}
