use std::{
    fmt, fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
};

use indexmap::IndexMap;
use tracing::instrument;
use winnow::{
    bytes::{tag, take_till1},
    sequence::delimited,
    IResult, Parser,
};

use crate::{
    error::{Error, Result},
    formats::util::words,
};

/// The value tokens of one `pluto.ini` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IniValue(Vec<String>);

impl IniValue {
    /// The first token, which is the whole value for single valued entries.
    pub fn as_str(&self) -> &str {
        self.0.first().map_or("", String::as_str)
    }

    pub fn values(&self) -> &[String] {
        &self.0
    }

    pub fn is_list(&self) -> bool {
        self.0.len() > 1
    }

    pub fn parse<T: FromStr>(&self) -> Option<T> {
        self.as_str().parse().ok()
    }
}

impl fmt::Display for IniValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(" "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    entries: IndexMap<String, IniValue>,
}

impl Section {
    pub fn get(&self, key: &str) -> Option<&IniValue> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &IniValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for Section {
    /// Writes the section with its value columns aligned.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let columns = self.entries.values().map(|v| v.0.len()).max().unwrap_or(0);
        let mut widths = vec![0; columns + 1];
        for (key, value) in &self.entries {
            widths[0] = widths[0].max(key.len());
            for (w, v) in widths[1..].iter_mut().zip(&value.0) {
                *w = (*w).max(v.len());
            }
        }

        writeln!(f, "[{}]", self.name)?;
        writeln!(f)?;
        for (key, value) in &self.entries {
            write!(f, "{key:<width$}", width = widths[0])?;
            for (v, width) in value.0.iter().zip(&widths[1..]) {
                write!(f, "  {v:>width$}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Runtime parameters from `pluto.ini`.
///
/// Values are looked up by section and key, or by a `"section/key"` path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlutoIni {
    pub path: PathBuf,
    sections: IndexMap<String, Section>,
}

fn section_header(i: &str) -> IResult<&str, &str> {
    delimited(tag("["), take_till1(|c: char| c == ']'), tag("]"))
        .context("section header")
        .parse_next(i)
}

impl PlutoIni {
    /// Reads `pluto.ini`, `Ok(None)` if there is no such file.
    #[instrument]
    pub fn read(path: &Path) -> Result<Option<Self>> {
        match fs::read_to_string(path) {
            Ok(text) => Self::parse(&text, path).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io(path)(e)),
        }
    }

    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        let err = |line: usize, reason: String| Error::MalformedConfig {
            path: path.to_path_buf(),
            line,
            reason,
        };

        let mut sections: IndexMap<String, Section> = IndexMap::new();
        let mut current: Option<String> = None;

        for (i, content) in text.lines().enumerate() {
            let line = i + 1;
            let content = content.trim();
            if content.is_empty() {
                continue;
            }

            if content.starts_with('[') {
                let name = match section_header(content) {
                    Ok((rest, name)) if rest.trim().is_empty() => name.trim().to_string(),
                    _ => return Err(err(line, format!("invalid section header '{content}'"))),
                };
                sections.entry(name.clone()).or_insert_with(|| Section {
                    name: name.clone(),
                    entries: IndexMap::new(),
                });
                current = Some(name);
                continue;
            }

            let Some(section) = current.as_ref().and_then(|s| sections.get_mut(s)) else {
                return Err(err(line, "entry outside of a section".into()));
            };
            match words(content).as_slice() {
                [key, values @ ..] if !values.is_empty() => {
                    let value = IniValue(values.iter().map(|v| v.to_string()).collect());
                    section.entries.insert(key.to_string(), value);
                }
                _ => return Err(err(line, format!("entry '{content}' has no value"))),
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            sections,
        })
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.get(name)
    }

    pub fn sections(&self) -> impl Iterator<Item = &Section> {
        self.sections.values()
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&IniValue> {
        self.section(section)?.get(key)
    }

    /// Looks up `"section/key"`.
    pub fn lookup(&self, path: &str) -> Option<&IniValue> {
        let (section, key) = path.split_once('/')?;
        self.get(section, key)
    }

    /// `output_dir` of the static grid output, relative to the simulation directory.
    pub fn output_dir(&self) -> Option<&str> {
        self.get("Static Grid Output", "output_dir")
            .map(IniValue::as_str)
    }
}

impl fmt::Display for PlutoIni {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, section) in self.sections().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{section}")?;
        }
        Ok(())
    }
}
