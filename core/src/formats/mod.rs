//! Readers for the output formats PLUTO writes.
//!
//! Every format comes with a manifest (`<ext>.out`) listing the written outputs,
//! the readers turn those into [`StepInfo`]s and open single variables of a step
//! as [`Field`]s.

use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use enum_dispatch::enum_dispatch;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use self::{
    binary::{BinaryOutput, MultiFileReader, SingleFileReader},
    h5::Hdf5Reader,
    manifest::{Endianness, FileMode, Manifest},
    vtk::VtkReader,
};
use crate::{
    error::{Error, Result},
    grid::Grid,
    grid::slice::Indexing,
    lazy_data::field::Field,
};

pub mod binary;
pub mod h5;
pub mod manifest;
pub mod util;
pub mod vtk;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Format {
    #[serde(rename = "dbl")]
    Dbl,
    #[serde(rename = "flt")]
    Flt,
    #[serde(rename = "vtk")]
    Vtk,
    #[serde(rename = "dbl.h5")]
    DblH5,
    #[serde(rename = "flt.h5")]
    FltH5,
}

impl Format {
    /// Probing order when no format is requested.
    pub const DEFAULT_PRIORITY: [Format; 5] = [
        Format::Dbl,
        Format::Flt,
        Format::Vtk,
        Format::DblH5,
        Format::FltH5,
    ];

    pub fn extension(self) -> &'static str {
        match self {
            Format::Dbl => "dbl",
            Format::Flt => "flt",
            Format::Vtk => "vtk",
            Format::DblH5 => "dbl.h5",
            Format::FltH5 => "flt.h5",
        }
    }

    pub fn manifest_path(self, data_dir: &Path) -> PathBuf {
        data_dir.join(format!("{}.out", self.extension()))
    }

    pub fn precision(self) -> Precision {
        match self {
            Format::Dbl | Format::DblH5 => Precision::Double,
            Format::Flt | Format::Vtk | Format::FltH5 => Precision::Single,
        }
    }

    /// Reads the manifest of this format in `data_dir` and sets up a reader for it.
    ///
    /// Fails with [`Error::FormatNotFound`] if there is no manifest or it lists no outputs.
    #[instrument]
    pub fn open(self, data_dir: &Path) -> Result<AnyReader> {
        let manifest = match Manifest::read(&self.manifest_path(data_dir))? {
            Some(manifest) if !manifest.is_empty() => manifest,
            _ => {
                debug!(format = %self, "No outputs listed");
                return Err(Error::FormatNotFound {
                    format: self,
                    data_dir: data_dir.to_path_buf(),
                });
            }
        };

        let reader: AnyReader = match self {
            Format::Dbl | Format::Flt => {
                let output = BinaryOutput::new(self, data_dir, manifest);
                match output.manifest.file_mode {
                    FileMode::Single => SingleFileReader(output).into(),
                    FileMode::Multiple => MultiFileReader(output).into(),
                }
            }
            Format::Vtk => VtkReader::new(data_dir, manifest).into(),
            Format::DblH5 | Format::FltH5 => Hdf5Reader::open(self, data_dir, manifest)?.into(),
        };
        Ok(reader)
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown format '{0}', expected one of dbl, flt, vtk, dbl.h5, flt.h5")]
pub struct UnknownFormat(pub String);

impl FromStr for Format {
    type Err = UnknownFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Format::DEFAULT_PRIORITY
            .into_iter()
            .find(|f| f.extension().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownFormat(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Precision {
    Single,
    Double,
}

impl Precision {
    pub fn size(self) -> usize {
        match self {
            Precision::Single => 4,
            Precision::Double => 8,
        }
    }
}

/// Element type of the values in a data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DType {
    pub precision: Precision,
    pub endianness: Endianness,
}

impl DType {
    pub fn new(precision: Precision, endianness: Endianness) -> Self {
        Self {
            precision,
            endianness,
        }
    }

    pub fn size(self) -> usize {
        self.precision.size()
    }

    /// Whether values can be viewed in place without decoding.
    pub fn is_native(self) -> bool {
        self.endianness.is_native()
    }

    /// Decodes the value at the start of `bytes`.
    pub fn read(self, bytes: &[u8]) -> f64 {
        match (self.precision, self.endianness) {
            (Precision::Double, Endianness::Little) => LittleEndian::read_f64(bytes),
            (Precision::Double, Endianness::Big) => BigEndian::read_f64(bytes),
            (Precision::Single, Endianness::Little) => LittleEndian::read_f32(bytes) as f64,
            (Precision::Single, Endianness::Big) => BigEndian::read_f32(bytes) as f64,
        }
    }

    /// Encodes `value` into the start of `bytes`, rounding to single precision if needed.
    pub fn write(self, bytes: &mut [u8], value: f64) {
        match (self.precision, self.endianness) {
            (Precision::Double, Endianness::Little) => LittleEndian::write_f64(bytes, value),
            (Precision::Double, Endianness::Big) => BigEndian::write_f64(bytes, value),
            (Precision::Single, Endianness::Little) => LittleEndian::write_f32(bytes, value as f32),
            (Precision::Single, Endianness::Big) => BigEndian::write_f32(bytes, value as f32),
        }
    }
}

/// Where the data of one step lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StepLocation {
    /// All variables in one file
    File(PathBuf),
    /// `<var>.NNNN.<ext>` in `dir`
    PerVariable {
        dir: PathBuf,
        index: usize,
        extension: &'static str,
    },
}

impl StepLocation {
    pub fn path_for(&self, var: &str) -> PathBuf {
        match self {
            StepLocation::File(path) => path.clone(),
            StepLocation::PerVariable {
                dir,
                index,
                extension,
            } => dir.join(format!("{var}.{index:04}.{extension}")),
        }
    }
}

/// One discovered output.
#[derive(Debug, Clone, PartialEq)]
pub struct StepInfo {
    /// Position in the list of outputs
    pub position: usize,
    /// Output number as used in file names
    pub index: usize,
    pub time: f64,
    /// Simulation timestep at the time of output
    pub dt: f64,
    pub nstep: u64,
    pub location: StepLocation,
}

/// Everything a reader needs to know to open a variable.
#[derive(Debug, Clone, Copy)]
pub struct OpenRequest<'a> {
    pub step: &'a StepInfo,
    pub name: &'a str,
    pub grid: &'a Grid,
    pub indexing: Indexing,
}

#[enum_dispatch]
pub trait FormatReader {
    fn format(&self) -> Format;

    /// Outputs in the order they were written.
    fn discover(&self) -> Result<Vec<StepInfo>>;

    /// Variables of a step in on-disk order.
    fn variable_names(&self, step: &StepInfo) -> Result<Arc<IndexSet<String>>>;

    /// Opens one variable, restricted to the active selection of `request.grid`.
    fn open_variable(&self, request: OpenRequest<'_>) -> Result<Field>;
}

#[enum_dispatch(FormatReader)]
#[derive(Debug)]
pub enum AnyReader {
    SingleFileReader,
    MultiFileReader,
    VtkReader,
    Hdf5Reader,
}

/// Turns manifest entries into steps, naming files with `location`.
pub(crate) fn steps_from_manifest(
    manifest: &Manifest,
    location: impl Fn(usize) -> StepLocation,
) -> Vec<StepInfo> {
    manifest
        .entries
        .iter()
        .enumerate()
        .map(|(position, e)| StepInfo {
            position,
            index: e.index,
            time: e.time,
            dt: e.dt,
            nstep: e.nstep,
            location: location(e.index),
        })
        .collect()
}

/// The location of a step in a format using `data.NNNN.<ext>` or `<var>.NNNN.<ext>` files.
pub(crate) fn data_location(
    data_dir: &Path,
    mode: FileMode,
    extension: &'static str,
    index: usize,
) -> StepLocation {
    match mode {
        FileMode::Single => {
            StepLocation::File(data_dir.join(format!("data.{index:04}.{extension}")))
        }
        FileMode::Multiple => StepLocation::PerVariable {
            dir: data_dir.to_path_buf(),
            index,
            extension,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_names() {
        for f in Format::DEFAULT_PRIORITY {
            assert_eq!(f.to_string().parse::<Format>(), Ok(f));
        }
        assert_eq!("DBL".parse::<Format>(), Ok(Format::Dbl));
        assert_eq!(Format::FltH5.to_string(), "flt.h5");
        assert!("hdf".parse::<Format>().is_err());
        assert_eq!(
            Format::Dbl.manifest_path(Path::new("/sim/data")),
            PathBuf::from("/sim/data/dbl.out")
        );
    }

    #[test]
    fn dtype_roundtrips_through_bytes() {
        let mut buf = [0u8; 8];
        for dtype in [
            DType::new(Precision::Double, Endianness::Little),
            DType::new(Precision::Double, Endianness::Big),
            DType::new(Precision::Single, Endianness::Little),
            DType::new(Precision::Single, Endianness::Big),
        ] {
            dtype.write(&mut buf, 1.5);
            assert_eq!(dtype.read(&buf), 1.5);
        }
        let big = DType::new(Precision::Single, Endianness::Big);
        big.write(&mut buf, 1.0);
        assert_eq!(&buf[..4], &[0x3f, 0x80, 0, 0]);
    }

    #[test]
    fn locations() {
        let dir = Path::new("/sim");
        assert_eq!(
            data_location(dir, FileMode::Single, "dbl", 7).path_for("rho"),
            PathBuf::from("/sim/data.0007.dbl")
        );
        assert_eq!(
            data_location(dir, FileMode::Multiple, "flt", 12).path_for("prs"),
            PathBuf::from("/sim/prs.0012.flt")
        );
    }

    #[test]
    fn missing_manifest_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        for format in Format::DEFAULT_PRIORITY {
            let err = format.open(dir.path()).unwrap_err();
            assert!(matches!(err, Error::FormatNotFound { .. }), "{err:?}");
        }
    }
}
