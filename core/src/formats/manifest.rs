use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use get_size::GetSize;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};
use winnow::Parser;

use super::util::{f64, u64, usize, words};
use crate::{
    error::{Error, Result},
    ws_separated,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileMode {
    /// All variables of a step in `data.NNNN.<ext>`
    Single,
    /// One `<var>.NNNN.<ext>` per variable and step
    Multiple,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Endianness {
    Little,
    Big,
}

impl Endianness {
    pub fn is_native(self) -> bool {
        match self {
            Endianness::Little => cfg!(target_endian = "little"),
            Endianness::Big => cfg!(target_endian = "big"),
        }
    }
}

/// One line of a manifest, i.e. one written output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Output number, used in file names
    pub index: usize,
    /// Simulation time
    pub time: f64,
    /// Simulation timestep at the time of output
    pub dt: f64,
    /// Integration steps taken so far
    pub nstep: u64,
}

/// A `<format>.out` file listing the outputs written in one format.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub path: PathBuf,
    pub entries: Vec<ManifestEntry>,
    pub file_mode: FileMode,
    pub endianness: Endianness,
    /// Variables in on-disk order
    pub vars: Arc<IndexSet<String>>,
}

impl Manifest {
    /// Reads a manifest, `Ok(None)` if there is no such file.
    #[instrument]
    pub fn read(path: &Path) -> Result<Option<Self>> {
        match fs::read_to_string(path) {
            Ok(text) => Self::parse(&text, path).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io(path)(e)),
        }
    }

    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        let err = |line: usize, reason: String| Error::MalformedManifest {
            path: path.to_path_buf(),
            line,
            reason,
        };

        let mut entries: Vec<ManifestEntry> = Vec::new();
        let mut header: Option<(FileMode, Endianness, IndexSet<String>)> = None;

        for (i, content) in text.lines().enumerate() {
            let line = i + 1;
            if content.trim().is_empty() {
                continue;
            }

            let (rest, (index, time, dt, nstep)) = ws_separated!(usize, f64, f64, u64)
                .parse_next(content)
                .map_err(|e| err(line, format!("could not parse step numbers: {e:?}")))?;

            let (file_mode, endianness, vars) = match words(rest).as_slice() {
                [mode, endianness, vars @ ..] if !vars.is_empty() => {
                    let mode = match *mode {
                        "single_file" => FileMode::Single,
                        "multiple_files" => FileMode::Multiple,
                        other => return Err(err(line, format!("unknown file mode '{other}'"))),
                    };
                    let endianness = match *endianness {
                        "little" => Endianness::Little,
                        "big" => Endianness::Big,
                        other => return Err(err(line, format!("unknown endianness '{other}'"))),
                    };
                    let vars: IndexSet<String> = vars.iter().map(|v| v.to_string()).collect();
                    (mode, endianness, vars)
                }
                _ => {
                    return Err(err(
                        line,
                        "expected file mode, endianness and at least one variable".into(),
                    ))
                }
            };

            if let Some(prev) = entries.last() {
                if index <= prev.index {
                    return Err(err(
                        line,
                        format!("output index {index} does not increase past {}", prev.index),
                    ));
                }
            }

            match &header {
                None => header = Some((file_mode, endianness, vars)),
                Some((m, e, v)) => {
                    if (*m, *e) != (file_mode, endianness) {
                        return Err(err(
                            line,
                            "file mode or endianness changed between outputs".into(),
                        ));
                    }
                    if *v != vars {
                        warn!(
                            line,
                            path = ?path,
                            "Variable list differs from the first output, using the first"
                        );
                    }
                }
            }

            entries.push(ManifestEntry {
                index,
                time,
                dt,
                nstep,
            });
        }

        let Some((file_mode, endianness, vars)) = header else {
            return Ok(Self {
                path: path.to_path_buf(),
                entries,
                file_mode: FileMode::Single,
                endianness: Endianness::Little,
                vars: Arc::default(),
            });
        };

        Ok(Self {
            path: path.to_path_buf(),
            entries,
            file_mode,
            endianness,
            vars: Arc::new(vars),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl GetSize for Manifest {
    fn get_heap_size(&self) -> usize {
        self.entries.len() * std::mem::size_of::<ManifestEntry>()
            + self.vars.iter().map(|v| v.get_heap_size()).sum::<usize>()
    }
}
