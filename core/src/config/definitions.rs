use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use indexmap::IndexMap;
use tracing::{instrument, warn};
use winnow::{
    ascii::{space0, space1},
    bytes::tag,
    sequence::preceded,
    IResult, Parser,
};

use crate::{
    error::{Error, Result},
    formats::util::non_ws,
    grid::coordinates::CoordinateSystem,
};

/// Compile time settings from `definitions.h`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Definitions {
    pub path: PathBuf,
    defines: IndexMap<String, String>,
}

fn define(i: &str) -> IResult<&str, &str> {
    preceded((space0, tag("#define"), space1), non_ws)
        .context("#define")
        .parse_next(i)
}

impl Definitions {
    /// Reads `definitions.h`, `Ok(None)` if there is no such file.
    #[instrument]
    pub fn read(path: &Path) -> Result<Option<Self>> {
        match fs::read_to_string(path) {
            Ok(text) => Self::parse(&text, path).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io(path)(e)),
        }
    }

    /// Collects all `#define KEY VALUE` lines, everything else is skipped.
    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        let mut defines = IndexMap::new();
        for (i, content) in text.lines().enumerate() {
            if !content.trim_start().starts_with("#define") {
                continue;
            }
            let Ok((rest, key)) = define(content) else {
                return Err(Error::MalformedConfig {
                    path: path.to_path_buf(),
                    line: i + 1,
                    reason: format!("invalid define '{}'", content.trim()),
                });
            };
            // Strip trailing comments
            let value = rest.split("/*").next().unwrap_or_default().trim();
            defines.insert(key.to_string(), value.to_string());
        }

        Ok(Self {
            path: path.to_path_buf(),
            defines,
        })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.defines.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.defines.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.defines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defines.is_empty()
    }

    /// The `GEOMETRY` define, if it names a known coordinate system.
    pub fn geometry(&self) -> Option<CoordinateSystem> {
        let value = self.get("GEOMETRY")?;
        match value.parse() {
            Ok(coordinates) => Some(coordinates),
            Err(e) => {
                warn!(%e, path = ?self.path, "Ignoring GEOMETRY define");
                None
            }
        }
    }
}
