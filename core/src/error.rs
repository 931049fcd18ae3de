use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::{formats::Format, geom::Dim3D};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    #[error("No data directory with a grid file found in {}", .path.display())]
    #[diagnostic(
        code(pluto_tbx::sim::data_dir_not_found),
        help("Expected `grid.out` in the simulation directory, in `data/` or in the `output_dir` of pluto.ini")
    )]
    DataDirNotFound { path: PathBuf },

    #[error("No output of format {format} found in {}", .data_dir.display())]
    #[diagnostic(code(pluto_tbx::format::not_found))]
    FormatNotFound { format: Format, data_dir: PathBuf },

    #[error("No output found in {}, tried formats {}", .data_dir.display(), display_list(.tried))]
    #[diagnostic(code(pluto_tbx::format::no_data))]
    NoDataFound { data_dir: PathBuf, tried: Vec<Format> },

    #[error("Format {format} is unavailable: {reason}")]
    #[diagnostic(code(pluto_tbx::format::unavailable))]
    FormatUnavailable { format: Format, reason: &'static str },

    #[error("Malformed grid file {}, line {line}: {reason}", .path.display())]
    #[diagnostic(
        code(pluto_tbx::grid::malformed),
        help("Every axis needs a cell count followed by exactly that many `index left right` lines")
    )]
    MalformedGrid {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Malformed output manifest {}, line {line}: {reason}", .path.display())]
    #[diagnostic(
        code(pluto_tbx::manifest::malformed),
        help("Expected `index time dt nstep file_mode endianness var...` per line")
    )]
    MalformedManifest {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Malformed config file {}, line {line}: {reason}", .path.display())]
    #[diagnostic(code(pluto_tbx::config::malformed))]
    MalformedConfig {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Corrupt data file {}: {reason}", .path.display())]
    #[diagnostic(code(pluto_tbx::data::corrupt))]
    CorruptData { path: PathBuf, reason: String },

    #[error("'{name}' is not a data variable, valid variables are: {}", .valid.join(", "))]
    #[diagnostic(code(pluto_tbx::step::unknown_variable))]
    UnknownVariable { name: String, valid: Vec<String> },

    #[error("Output index {index} out of range for {len} outputs")]
    #[diagnostic(code(pluto_tbx::sim::index))]
    Index { index: isize, len: usize },

    #[error("Invalid slice on axis {axis}: {reason}")]
    #[diagnostic(code(pluto_tbx::grid::slice))]
    Slice { axis: Dim3D, reason: String },

    #[error("Iteration step must not be zero")]
    #[diagnostic(code(pluto_tbx::sim::step))]
    InvalidStep,

    #[error("Reduction of output {step} returned shape {found:?}, expected {expected:?}")]
    #[diagnostic(code(pluto_tbx::sim::reduce_shape))]
    ReduceShape {
        step: usize,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("Array of shape {found:?} does not match the grid shape {expected:?}")]
    #[diagnostic(code(pluto_tbx::step::shape_mismatch))]
    ShapeMismatch {
        expected: [usize; 3],
        found: Vec<usize>,
    },

    #[error("Cannot project grid: {reason}")]
    #[diagnostic(code(pluto_tbx::grid::projection))]
    Projection { reason: String },

    #[error("Element {index:?} is out of bounds for a field of shape {shape:?}")]
    #[diagnostic(code(pluto_tbx::field::index))]
    FieldIndex { index: [usize; 3], shape: [usize; 3] },

    #[error("I/O error on {}: {source}", .path.display())]
    #[diagnostic(code(pluto_tbx::io))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Shape error: {0}")]
    #[diagnostic(code(pluto_tbx::shape))]
    Shape(#[from] ndarray::ShapeError),

    #[cfg(feature = "hdf5")]
    #[error("HDF5 error: {0}")]
    #[diagnostic(code(pluto_tbx::hdf5))]
    Hdf5(#[from] hdf5::Error),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Error {
        let path = path.into();
        move |source| Error::Io { path, source }
    }

    /// Errors that mean "this format has nothing to offer here" while probing.
    pub(crate) fn is_format_absent(&self) -> bool {
        matches!(
            self,
            Error::FormatNotFound { .. } | Error::FormatUnavailable { .. }
        )
    }
}

fn display_list(formats: &[Format]) -> String {
    formats
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
