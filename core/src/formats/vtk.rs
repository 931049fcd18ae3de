use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use indexmap::{IndexMap, IndexSet};
use tracing::{debug, instrument};

use super::{
    data_location,
    manifest::{Endianness, Manifest},
    steps_from_manifest,
    util::words,
    DType, Format, FormatReader, OpenRequest, Precision, StepInfo,
};
use crate::{
    error::{Error, Result},
    lazy_data::{
        field::{Field, FieldLayout},
        mmap::MappedFile,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Binary,
    Ascii,
}

/// Position of one `SCALARS` block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalarRecord {
    /// Byte offset of the first value
    pub offset: usize,
    /// Number of values
    pub count: usize,
    pub precision: Option<Precision>,
}

/// What we need from the header of a legacy VTK file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VtkHeader {
    pub encoding: Encoding,
    pub cells: Option<usize>,
    pub scalars: IndexMap<String, ScalarRecord>,
}

/// Size of a VTK data type in binary files.
fn type_size(name: &str) -> Option<usize> {
    Some(match name {
        "bit" | "char" | "unsigned_char" => 1,
        "short" | "unsigned_short" => 2,
        "int" | "unsigned_int" | "float" => 4,
        "long" | "unsigned_long" | "double" => 8,
        _ => return None,
    })
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
    encoding: Encoding,
}

impl<'a> Cursor<'a> {
    fn line(&mut self) -> Option<&'a [u8]> {
        if self.pos >= self.bytes.len() {
            return None;
        }
        let rest = &self.bytes[self.pos..];
        let end = rest.iter().position(|&b| b == b'\n').unwrap_or(rest.len());
        self.pos += (end + 1).min(rest.len());
        Some(&rest[..end])
    }

    /// Skips `count` values of `kind`, whitespace separated tokens in ASCII files.
    fn skip_values(&mut self, count: usize, kind: &str) -> std::result::Result<(), String> {
        match self.encoding {
            Encoding::Binary => {
                let size = type_size(kind).ok_or_else(|| format!("unknown data type '{kind}'"))?;
                let end = count
                    .checked_mul(size)
                    .and_then(|len| self.pos.checked_add(len))
                    .filter(|end| *end <= self.bytes.len())
                    .ok_or_else(|| {
                        format!("{count} values of type {kind} run past the end of the file")
                    })?;
                self.pos = end;
            }
            Encoding::Ascii => {
                for _ in 0..count {
                    self.token()
                        .ok_or_else(|| format!("expected {count} values, file ended early"))?;
                }
            }
        }
        Ok(())
    }

    fn token(&mut self) -> Option<&'a [u8]> {
        let rest = &self.bytes[self.pos.min(self.bytes.len())..];
        let start = rest.iter().position(|b| !b.is_ascii_whitespace())?;
        let len = rest[start..]
            .iter()
            .position(u8::is_ascii_whitespace)
            .unwrap_or(rest.len() - start);
        self.pos += start + len;
        Some(&rest[start..start + len])
    }
}

/// `a * b` for counts read from the header, which may be arbitrarily large.
fn product(a: usize, b: usize, what: &str) -> std::result::Result<usize, String> {
    a.checked_mul(b)
        .ok_or_else(|| format!("{what} {a} x {b} overflows"))
}

fn number(token: Option<&&str>, what: &str) -> std::result::Result<usize, String> {
    let token = token.ok_or_else(|| format!("missing {what}"))?;
    token
        .parse()
        .map_err(|e| format!("invalid {what} '{token}': {e}"))
}

/// Scans a legacy VTK header for the positions of its scalar fields.
///
/// Coordinate, point and other attribute payloads are skipped without decoding.
#[instrument(skip(bytes))]
pub fn scan(bytes: &[u8], path: &Path) -> Result<VtkHeader> {
    scan_inner(bytes).map_err(|reason| Error::CorruptData {
        path: path.to_path_buf(),
        reason,
    })
}

fn text(line: &[u8]) -> std::result::Result<&str, String> {
    std::str::from_utf8(line)
        .map(str::trim)
        .map_err(|_| "header line is not text".to_string())
}

fn scan_inner(bytes: &[u8]) -> std::result::Result<VtkHeader, String> {
    let mut cursor = Cursor {
        bytes,
        pos: 0,
        encoding: Encoding::Binary,
    };

    let magic = text(cursor.line().ok_or("file is empty")?)?;
    if !magic.starts_with("# vtk DataFile") {
        return Err(format!("not a legacy VTK file, starts with '{magic}'"));
    }
    cursor.line().ok_or("missing title line")?;
    cursor.encoding = match text(cursor.line().ok_or("missing encoding line")?)? {
        e if e.eq_ignore_ascii_case("binary") => Encoding::Binary,
        e if e.eq_ignore_ascii_case("ascii") => Encoding::Ascii,
        e => return Err(format!("unknown encoding '{e}'")),
    };

    let mut header = VtkHeader {
        encoding: cursor.encoding,
        cells: None,
        scalars: IndexMap::new(),
    };
    // Number of tuples of the attributes that follow, set by CELL_DATA or POINT_DATA
    let mut tuples: Option<usize> = None;

    while let Some(line) = cursor.line() {
        let line = text(line)?;
        let tokens = words(line);
        let Some(keyword) = tokens.first() else {
            continue;
        };

        match *keyword {
            "X_COORDINATES" | "Y_COORDINATES" | "Z_COORDINATES" => {
                let n = number(tokens.get(1), "coordinate count")?;
                cursor.skip_values(n, tokens.get(2).copied().unwrap_or("float"))?;
            }
            "POINTS" => {
                let n = number(tokens.get(1), "point count")?;
                let kind = tokens.get(2).copied().unwrap_or("float");
                cursor.skip_values(product(3, n, "point values")?, kind)?;
            }
            "CELL_DATA" => {
                let n = number(tokens.get(1), "cell count")?;
                header.cells = Some(n);
                tuples = Some(n);
            }
            "POINT_DATA" => tuples = Some(number(tokens.get(1), "point count")?),
            "FIELD" => {
                let arrays = number(tokens.get(2), "field array count")?;
                for _ in 0..arrays {
                    let array = text(cursor.line().ok_or("missing field array")?)?;
                    let array = words(array);
                    let components = number(array.get(1), "field components")?;
                    let count = number(array.get(2), "field tuples")?;
                    let kind = array.get(3).copied().unwrap_or("float");
                    cursor.skip_values(product(components, count, "field values")?, kind)?;
                }
            }
            "SCALARS" => {
                let name = tokens.get(1).ok_or("SCALARS without a name")?;
                let kind = tokens.get(2).copied().unwrap_or("float");
                let components = match tokens.get(3) {
                    Some(_) => number(tokens.get(3), "scalar components")?,
                    None => 1,
                };
                let tuples = tuples.ok_or("SCALARS before CELL_DATA or POINT_DATA")?;

                let table = text(cursor.line().ok_or("missing LOOKUP_TABLE")?)?;
                if !table.starts_with("LOOKUP_TABLE") {
                    return Err(format!("expected LOOKUP_TABLE after SCALARS {name}"));
                }

                let count = product(tuples, components, "scalar values")?;
                header.scalars.insert(
                    name.to_string(),
                    ScalarRecord {
                        offset: cursor.pos,
                        count,
                        precision: match kind {
                            "float" => Some(Precision::Single),
                            "double" => Some(Precision::Double),
                            _ => None,
                        },
                    },
                );
                cursor.skip_values(count, kind)?;
            }
            "VECTORS" | "NORMALS" => {
                let tuples = tuples.ok_or("attribute before CELL_DATA or POINT_DATA")?;
                let kind = tokens.get(2).copied().unwrap_or("float");
                cursor.skip_values(product(3, tuples, "vector values")?, kind)?;
            }
            _ => {}
        }
    }

    Ok(header)
}

/// Parses `count` whitespace separated numbers starting at byte `offset`.
fn parse_ascii(bytes: &[u8], offset: usize, count: usize) -> std::result::Result<Vec<f64>, String> {
    let mut cursor = Cursor {
        bytes,
        pos: offset,
        encoding: Encoding::Ascii,
    };
    (0..count)
        .map(|i| {
            let token = cursor
                .token()
                .ok_or_else(|| format!("expected {count} values, found {i}"))?;
            std::str::from_utf8(token)
                .ok()
                .and_then(|t| t.parse::<f64>().ok())
                .ok_or_else(|| format!("invalid value '{}'", String::from_utf8_lossy(token)))
        })
        .collect()
}

/// Legacy VTK output, always big endian.
///
/// Binary files are mapped, ASCII files have to be parsed completely when a variable is opened.
#[derive(Debug)]
pub struct VtkReader {
    data_dir: PathBuf,
    manifest: Manifest,
}

impl VtkReader {
    pub fn new(data_dir: &Path, manifest: Manifest) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            manifest,
        }
    }
}

impl FormatReader for VtkReader {
    fn format(&self) -> Format {
        Format::Vtk
    }

    fn discover(&self) -> Result<Vec<StepInfo>> {
        Ok(steps_from_manifest(&self.manifest, |index| {
            data_location(&self.data_dir, self.manifest.file_mode, "vtk", index)
        }))
    }

    fn variable_names(&self, _step: &StepInfo) -> Result<Arc<IndexSet<String>>> {
        Ok(self.manifest.vars.clone())
    }

    fn open_variable(&self, request: OpenRequest<'_>) -> Result<Field> {
        if !self.manifest.vars.contains(request.name) {
            return Err(Error::UnknownVariable {
                name: request.name.to_string(),
                valid: self.manifest.vars.iter().cloned().collect(),
            });
        }

        let path = request.step.location.path_for(request.name);
        let file = MappedFile::open(&path)?;
        let header = scan(&file.read(), &path)?;
        let corrupt = |reason: String| Error::CorruptData {
            path: path.clone(),
            reason,
        };

        let record = header
            .scalars
            .get(request.name)
            .copied()
            .ok_or_else(|| corrupt(format!("no SCALARS {} in file", request.name)))?;
        let full = request.grid.full_dims();
        if record.count != full.product() {
            return Err(corrupt(format!(
                "{} holds {} values, the grid has {} cells",
                request.name,
                record.count,
                full.product()
            )));
        }
        let layout = FieldLayout::new(full, request.grid.ranges());

        match header.encoding {
            Encoding::Binary => {
                let precision = record
                    .precision
                    .ok_or_else(|| corrupt(format!("{} is not floating point", request.name)))?;
                debug!(var = request.name, offset = record.offset, "Mapping VTK variable");
                Field::mapped(
                    request.name,
                    file,
                    record.offset,
                    DType::new(precision, Endianness::Big),
                    layout,
                    request.indexing,
                )
            }
            Encoding::Ascii => {
                debug!(var = request.name, path = ?path, "Parsing ASCII VTK variable");
                let values =
                    parse_ascii(&file.read(), record.offset, record.count).map_err(corrupt)?;
                Field::owned(request.name, values, layout, request.indexing)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        formats::AnyReader,
        grid::slice::{AxisSpec, Indexing, Slice3},
        test_util::{self, Dataset},
    };

    #[test]
    fn scans_binary_header() {
        let data = Dataset::new((3, 2, 2)).build(Format::Vtk);
        let path = data.data_dir().join("data.0000.vtk");
        let bytes = std::fs::read(&path).unwrap();
        let header = scan(&bytes, &path).unwrap();

        assert_eq!(header.encoding, Encoding::Binary);
        assert_eq!(header.cells, Some(12));
        assert_eq!(
            header.scalars.keys().map(String::as_str).collect::<Vec<_>>(),
            test_util::VARS.to_vec()
        );
        let rho = header.scalars["rho"];
        let vx1 = header.scalars["vx1"];
        assert_eq!(rho.count, 12);
        assert!(vx1.offset > rho.offset + 12 * 4);
        assert_eq!(&bytes[rho.offset - 21..rho.offset], b"LOOKUP_TABLE default\n");
    }

    #[test]
    fn reads_binary_and_ascii() {
        for ascii in [false, true] {
            let mut dataset = Dataset::new((4, 3, 2)).steps(2);
            if ascii {
                dataset = dataset.ascii();
            }
            let data = dataset.build(Format::Vtk);
            let reader = Format::Vtk.open(data.data_dir()).unwrap();
            assert!(matches!(reader, AnyReader::VtkReader(_)));
            let steps = reader.discover().unwrap();
            let grid = data.grid();
            let field = reader
                .open_variable(OpenRequest {
                    step: &steps[1],
                    name: "vx1",
                    grid: &grid,
                    indexing: Indexing::Ijk,
                })
                .unwrap();

            assert_eq!(field.is_mapped(), !ascii);
            assert_eq!(field.get([3, 2, 1]), Some(test_util::value(1, 1, 3, 2, 1)));
            assert_eq!(field.get([0, 1, 0]), Some(test_util::value(1, 1, 0, 1, 0)));
        }
    }

    #[test]
    fn applies_strided_selection() {
        for ascii in [false, true] {
            let mut dataset = Dataset::new((5, 3, 2));
            if ascii {
                dataset = dataset.ascii();
            }
            let data = dataset.build(Format::Vtk);
            let reader = Format::Vtk.open(data.data_dir()).unwrap();
            let steps = reader.discover().unwrap();
            let grid = data
                .grid()
                .slice_indexed(
                    Slice3::new(AxisSpec::stepped(Some(1), None, 2), 1.., 1),
                    Indexing::Ijk,
                )
                .unwrap();
            let field = reader
                .open_variable(OpenRequest {
                    step: &steps[0],
                    name: "rho",
                    grid: &grid,
                    indexing: Indexing::Ijk,
                })
                .unwrap();

            assert_eq!(field.shape(), [2, 2, 1]);
            for (a, i) in [1, 3].into_iter().enumerate() {
                for (b, j) in [1, 2].into_iter().enumerate() {
                    assert_eq!(
                        field.get([a, b, 0]),
                        Some(test_util::value(0, 0, i, j, 1)),
                        "ascii: {ascii}"
                    );
                }
            }
            assert_eq!(field.get([2, 0, 0]), None);
        }
    }

    #[test]
    fn multiple_files() {
        let data = Dataset::new((2, 2, 1)).multiple_files().build(Format::Vtk);
        let reader = Format::Vtk.open(data.data_dir()).unwrap();
        let steps = reader.discover().unwrap();
        let grid = data.grid();
        let field = reader
            .open_variable(OpenRequest {
                step: &steps[0],
                name: "prs",
                grid: &grid,
                indexing: Indexing::Kji,
            })
            .unwrap();
        assert_eq!(field.get([0, 1, 1]), Some(test_util::value(0, 2, 1, 1, 0)));
    }

    #[test]
    fn rejects_truncated_and_foreign_files() {
        let path = Path::new("x.vtk");
        assert!(scan(b"hello\n", path).is_err());

        let truncated = b"# vtk DataFile Version 2.0\nPLUTO\nBINARY\nDATASET RECTILINEAR_GRID\n\
                          X_COORDINATES 100 float\n\x00\x00";
        let err = scan(truncated, path).unwrap_err();
        assert!(matches!(err, Error::CorruptData { .. }), "{err:?}");

        let huge = b"# vtk DataFile Version 2.0\nPLUTO\nBINARY\nDATASET RECTILINEAR_GRID\n\
                     X_COORDINATES 4611686018427387905 float\n";
        let err = scan(huge, path).unwrap_err();
        assert!(matches!(err, Error::CorruptData { .. }), "{err:?}");

        let huge_points = b"# vtk DataFile Version 2.0\nPLUTO\nBINARY\nDATASET STRUCTURED_GRID\n\
                            POINTS 9223372036854775807 float\n";
        assert!(scan(huge_points, path).is_err());

        let huge_scalars = b"# vtk DataFile Version 2.0\nPLUTO\nBINARY\nDATASET RECTILINEAR_GRID\n\
                             CELL_DATA 9223372036854775807\n\
                             SCALARS rho float 4\nLOOKUP_TABLE default\n";
        assert!(scan(huge_scalars, path).is_err());

        let orphan = b"# vtk DataFile Version 2.0\nPLUTO\nASCII\n\
                       SCALARS rho float\nLOOKUP_TABLE default\n1\n";
        assert!(scan(orphan, path).is_err());
    }

    #[test]
    fn parses_ascii_values() {
        assert_eq!(parse_ascii(b"  1 2.5\n-3e2 ", 0, 3), Ok(vec![1.0, 2.5, -300.0]));
        assert!(parse_ascii(b"1 2", 0, 3).is_err());
        assert!(parse_ascii(b"1 x 3", 0, 3).is_err());
    }
}
