use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use indexmap::IndexSet;
use tracing::debug;

use super::{
    data_location, manifest::Manifest, steps_from_manifest, DType, Format, FormatReader,
    OpenRequest, StepInfo,
};
use crate::{
    error::{Error, Result},
    lazy_data::{
        field::{Field, FieldLayout},
        mmap::MappedFile,
    },
};

/// Raw `dbl`/`flt` output: headerless arrays of `x3, x2, x1` ordered values.
#[derive(Debug)]
pub struct BinaryOutput {
    pub format: Format,
    pub data_dir: PathBuf,
    pub manifest: Manifest,
    pub dtype: DType,
}

impl BinaryOutput {
    pub fn new(format: Format, data_dir: &Path, manifest: Manifest) -> Self {
        let dtype = DType::new(format.precision(), manifest.endianness);
        Self {
            format,
            data_dir: data_dir.to_path_buf(),
            manifest,
            dtype,
        }
    }

    fn steps(&self) -> Vec<StepInfo> {
        steps_from_manifest(&self.manifest, |index| {
            data_location(
                &self.data_dir,
                self.manifest.file_mode,
                self.format.extension(),
                index,
            )
        })
    }

    fn position(&self, name: &str) -> Result<usize> {
        self.manifest
            .vars
            .get_index_of(name)
            .ok_or_else(|| Error::UnknownVariable {
                name: name.to_string(),
                valid: self.manifest.vars.iter().cloned().collect(),
            })
    }

    /// Bytes of one variable on the full grid.
    fn record_size(&self, request: &OpenRequest<'_>) -> usize {
        request.grid.full_dims().product() * self.dtype.size()
    }

    fn map(&self, request: &OpenRequest<'_>, file: MappedFile, offset: usize) -> Result<Field> {
        let layout = FieldLayout::new(request.grid.full_dims(), request.grid.ranges());
        debug!(
            var = request.name,
            path = ?file.path(),
            offset,
            "Mapping variable"
        );
        Field::mapped(request.name, file, offset, self.dtype, layout, request.indexing)
    }
}

fn misaligned(file: &MappedFile, record: usize, what: &str) -> Error {
    Error::CorruptData {
        path: file.path().to_path_buf(),
        reason: format!(
            "file size {} is {what} the record size {record}",
            file.len()
        ),
    }
}

/// All variables of a step concatenated in `data.NNNN.<ext>`.
#[derive(Debug)]
pub struct SingleFileReader(pub BinaryOutput);

impl FormatReader for SingleFileReader {
    fn format(&self) -> Format {
        self.0.format
    }

    fn discover(&self) -> Result<Vec<StepInfo>> {
        Ok(self.0.steps())
    }

    fn variable_names(&self, _step: &StepInfo) -> Result<Arc<IndexSet<String>>> {
        Ok(self.0.manifest.vars.clone())
    }

    fn open_variable(&self, request: OpenRequest<'_>) -> Result<Field> {
        let position = self.0.position(request.name)?;
        let record = self.0.record_size(&request);
        let file = MappedFile::open(&request.step.location.path_for(request.name))?;
        let vars = self.0.manifest.vars.len();
        if file.len() != vars * record {
            return Err(misaligned(
                &file,
                record,
                &format!("not {vars} times"),
            ));
        }
        self.0.map(&request, file, position * record)
    }
}

/// One `<var>.NNNN.<ext>` file per variable.
#[derive(Debug)]
pub struct MultiFileReader(pub BinaryOutput);

impl FormatReader for MultiFileReader {
    fn format(&self) -> Format {
        self.0.format
    }

    fn discover(&self) -> Result<Vec<StepInfo>> {
        Ok(self.0.steps())
    }

    fn variable_names(&self, _step: &StepInfo) -> Result<Arc<IndexSet<String>>> {
        Ok(self.0.manifest.vars.clone())
    }

    fn open_variable(&self, request: OpenRequest<'_>) -> Result<Field> {
        self.0.position(request.name)?;
        let record = self.0.record_size(&request);
        let file = MappedFile::open(&request.step.location.path_for(request.name))?;
        if file.len() != record {
            return Err(misaligned(&file, record, "different from"));
        }
        self.0.map(&request, file, 0)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::{
        formats::AnyReader,
        grid::{slice::Indexing, Grid},
        test_util::{self, Dataset},
    };

    fn open(reader: &AnyReader, grid: &Grid, step: &StepInfo, name: &str) -> Result<Field> {
        reader.open_variable(OpenRequest {
            step,
            name,
            grid,
            indexing: Indexing::Ijk,
        })
    }

    #[test]
    fn single_file_offsets() {
        let data = Dataset::new((4, 3, 2)).steps(2).build(Format::Dbl);
        let reader = Format::Dbl.open(data.data_dir()).unwrap();
        assert!(matches!(reader, AnyReader::SingleFileReader(_)));
        let grid = data.grid();
        let steps = reader.discover().unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[1].time, 1.0);

        for (position, var) in test_util::VARS.iter().enumerate() {
            let field = open(&reader, &grid, &steps[1], var).unwrap();
            assert_eq!(field.shape(), [4, 3, 2]);
            for (i, j, k) in [(0, 0, 0), (3, 2, 1), (1, 2, 0)] {
                assert_eq!(
                    field.get([i, j, k]),
                    Some(test_util::value(1, position, i, j, k))
                );
            }
        }
    }

    #[test]
    fn multiple_files_float() {
        let data = Dataset::new((5, 2, 1)).multiple_files().build(Format::Flt);
        let reader = Format::Flt.open(data.data_dir()).unwrap();
        assert!(matches!(reader, AnyReader::MultiFileReader(_)));
        let steps = reader.discover().unwrap();
        let field = open(&reader, &data.grid(), &steps[0], "prs").unwrap();
        assert_eq!(field.get([4, 1, 0]), Some(test_util::value(0, 2, 4, 1, 0)));
    }

    #[test]
    fn unknown_variable() {
        let data = Dataset::new((2, 2, 2)).build(Format::Dbl);
        let reader = Format::Dbl.open(data.data_dir()).unwrap();
        let steps = reader.discover().unwrap();
        let err = open(&reader, &data.grid(), &steps[0], "temperature").unwrap_err();
        assert!(matches!(err, Error::UnknownVariable { .. }), "{err:?}");
    }

    #[test]
    fn truncated_files_are_corrupt() {
        let data = Dataset::new((4, 4, 1)).build(Format::Dbl);
        let path = data.data_dir().join("data.0000.dbl");
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 8]).unwrap();

        let reader = Format::Dbl.open(data.data_dir()).unwrap();
        let steps = reader.discover().unwrap();
        let err = open(&reader, &data.grid(), &steps[0], "rho").unwrap_err();
        assert!(matches!(err, Error::CorruptData { .. }), "{err:?}");
    }

    #[test]
    fn missing_variable_in_record_is_corrupt() {
        let data = Dataset::new((4, 4, 1)).build(Format::Dbl);
        let path = data.data_dir().join("data.0000.dbl");
        let bytes = fs::read(&path).unwrap();
        // drop the last variable completely, records stay aligned
        fs::write(&path, &bytes[..bytes.len() / 3 * 2]).unwrap();

        let reader = Format::Dbl.open(data.data_dir()).unwrap();
        let steps = reader.discover().unwrap();
        for var in test_util::VARS {
            let err = open(&reader, &data.grid(), &steps[0], var).unwrap_err();
            assert!(matches!(err, Error::CorruptData { .. }), "{err:?}");
        }
    }

    #[test]
    fn extra_record_is_corrupt() {
        let data = Dataset::new((4, 3, 2)).build(Format::Dbl);
        let path = data.data_dir().join("data.0000.dbl");
        let mut bytes = fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 3 * 24 * 8);
        bytes.extend(std::iter::repeat(0u8).take(24 * 8));
        fs::write(&path, &bytes).unwrap();

        let reader = Format::Dbl.open(data.data_dir()).unwrap();
        let steps = reader.discover().unwrap();
        let err = open(&reader, &data.grid(), &steps[0], "rho").unwrap_err();
        match err {
            Error::CorruptData { reason, .. } => assert!(reason.contains("768"), "{reason}"),
            e => panic!("unexpected error {e:?}"),
        }
    }
}
