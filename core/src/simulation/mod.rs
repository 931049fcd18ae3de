//! Opening a simulation and accessing its outputs.

use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use get_size::GetSize;
use indexmap::IndexSet;
use ndarray::Array1;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::{
    config::{Definitions, PlutoIni},
    error::{Error, Result},
    formats::{AnyReader, Format, FormatReader, StepInfo},
    geom::Dim3D,
    grid::{
        coordinates::CoordinateSystem,
        slice::{Indexing, Slice3},
        Grid, GridFile,
    },
    step::OutputStep,
};

pub mod iter;
pub mod reduce;


pub use iter::StepIter;
pub use reduce::ReduceOutput;

/// How to open a simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationOptions {
    /// Simulation directory, the one with `pluto.ini`
    pub path: PathBuf,
    /// Format to read, tried in `format_priority` order if unset
    pub format: Option<Format>,
    /// Overrides the coordinate system from the grid file and `definitions.h`
    pub coordinates: Option<CoordinateSystem>,
    pub indexing: Indexing,
    pub format_priority: Vec<Format>,
}

impl SimulationOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            format: None,
            coordinates: None,
            indexing: Indexing::default(),
            format_priority: Format::DEFAULT_PRIORITY.to_vec(),
        }
    }

    pub fn format(mut self, format: Format) -> Self {
        self.format = Some(format);
        self
    }

    pub fn coordinates(mut self, coordinates: CoordinateSystem) -> Self {
        self.coordinates = Some(coordinates);
        self
    }

    pub fn indexing(mut self, indexing: Indexing) -> Self {
        self.indexing = indexing;
        self
    }

    pub fn format_priority(mut self, priority: impl IntoIterator<Item = Format>) -> Self {
        self.format_priority = priority.into_iter().collect();
        self
    }

    #[instrument]
    pub fn open(&self) -> Result<Simulation> {
        let ini = OnceCell::new();
        let definitions = OnceCell::new();
        let data_dir = find_data_dir(&self.path, &ini)?;

        let reader = match self.format {
            Some(format) => format.open(&data_dir)?,
            None => detect(&data_dir, &self.format_priority)?,
        };
        let steps = reader.discover()?;
        info!(
            format = %reader.format(),
            steps = steps.len(),
            data_dir = ?data_dir,
            "Opened simulation"
        );

        let grid_file = GridFile::read(&data_dir.join("grid.out"))?;
        let coordinates = match self.coordinates.or(grid_file.geometry) {
            Some(coordinates) => coordinates,
            None => definitions
                .get_or_try_init(|| Definitions::read(&self.path.join("definitions.h")))?
                .as_ref()
                .and_then(Definitions::geometry)
                .unwrap_or_default(),
        };
        debug!(%coordinates, "Resolved coordinate system");

        let data = SimulationData {
            path: self.path.clone(),
            data_dir,
            reader: Arc::new(reader),
            steps,
            ini,
            definitions,
        };
        Ok(Simulation {
            data: Arc::new(data),
            grid: Arc::new(Grid::new(grid_file.interfaces, coordinates)?),
            indexing: self.indexing,
            kept: Mutex::new(BTreeMap::new()),
        })
    }
}

/// The directory with `grid.out`: the simulation directory, `data/` or the
/// `output_dir` configured in `pluto.ini`.
fn find_data_dir(path: &Path, ini: &OnceCell<Option<PlutoIni>>) -> Result<PathBuf> {
    for candidate in [path.to_path_buf(), path.join("data")] {
        if candidate.join("grid.out").is_file() {
            return Ok(candidate);
        }
    }

    let ini = ini.get_or_try_init(|| PlutoIni::read(&path.join("pluto.ini")))?;
    if let Some(output_dir) = ini.as_ref().and_then(PlutoIni::output_dir) {
        let candidate = path.join(output_dir);
        if candidate.join("grid.out").is_file() {
            return Ok(candidate);
        }
        debug!(dir = ?candidate, "No grid file in configured output directory");
    }

    Err(Error::DataDirNotFound {
        path: path.to_path_buf(),
    })
}

/// The first format in `priority` with outputs in `data_dir`.
fn detect(data_dir: &Path, priority: &[Format]) -> Result<AnyReader> {
    for &format in priority {
        match format.open(data_dir) {
            Ok(reader) if !reader.discover()?.is_empty() => return Ok(reader),
            Ok(_) => debug!(%format, "Format has no outputs"),
            Err(e) if e.is_format_absent() => debug!(%format, %e, "Skipping format"),
            Err(e) => return Err(e),
        }
    }
    Err(Error::NoDataFound {
        data_dir: data_dir.to_path_buf(),
        tried: priority.to_vec(),
    })
}

/// Everything about a simulation that does not change after opening it.
struct SimulationData {
    path: PathBuf,
    data_dir: PathBuf,
    reader: Arc<AnyReader>,
    steps: Vec<StepInfo>,
    ini: OnceCell<Option<PlutoIni>>,
    definitions: OnceCell<Option<Definitions>>,
}

/// A PLUTO run: its grid and the outputs written in one format.
///
/// Outputs are addressed by position, negative positions count from the end.
/// Steps fetched with `keep` stay cached in the simulation until forgotten.
pub struct Simulation {
    data: Arc<SimulationData>,
    grid: Arc<Grid>,
    indexing: Indexing,
    kept: Mutex<BTreeMap<usize, Arc<OutputStep>>>,
}

impl Simulation {
    /// Opens the simulation at `path` with default options.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        SimulationOptions::new(path).open()
    }

    pub fn path(&self) -> &Path {
        &self.data.path
    }

    pub fn data_dir(&self) -> &Path {
        &self.data.data_dir
    }

    pub fn format(&self) -> Format {
        self.data.reader.format()
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn coordinates(&self) -> CoordinateSystem {
        self.grid.coordinates()
    }

    pub fn indexing(&self) -> Indexing {
        self.indexing
    }

    /// Grid shape in presentation order.
    pub fn dims(&self) -> [usize; 3] {
        self.grid.shape(self.indexing)
    }

    pub fn len(&self) -> usize {
        self.data.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.steps.is_empty()
    }

    pub fn steps(&self) -> &[StepInfo] {
        &self.data.steps
    }

    /// Simulation time of every output.
    pub fn times(&self) -> Array1<f64> {
        self.data.steps.iter().map(|s| s.time).collect()
    }

    /// Time between consecutive outputs.
    pub fn output_dt(&self) -> Array1<f64> {
        self.data
            .steps
            .windows(2)
            .map(|w| w[1].time - w[0].time)
            .collect()
    }

    pub fn last_time(&self) -> Option<f64> {
        self.data.steps.last().map(|s| s.time)
    }

    /// Variables of the first output.
    pub fn vars(&self) -> Result<Arc<IndexSet<String>>> {
        match self.data.steps.first() {
            Some(step) => self.data.reader.variable_names(step),
            None => Ok(Arc::default()),
        }
    }

    /// `pluto.ini` of the simulation, if there is one.
    pub fn ini(&self) -> Result<Option<&PlutoIni>> {
        self.data
            .ini
            .get_or_try_init(|| PlutoIni::read(&self.data.path.join("pluto.ini")))
            .map(Option::as_ref)
    }

    /// `definitions.h` of the simulation, if there is one.
    pub fn definitions(&self) -> Result<Option<&Definitions>> {
        self.data
            .definitions
            .get_or_try_init(|| Definitions::read(&self.data.path.join("definitions.h")))
            .map(Option::as_ref)
    }

    /// Resolves a possibly negative position.
    pub fn position(&self, index: isize) -> Result<usize> {
        let len = self.len();
        let position = if index < 0 {
            index + len as isize
        } else {
            index
        };
        if position < 0 || position >= len as isize {
            return Err(Error::Index { index, len });
        }
        Ok(position as usize)
    }

    /// The output at `index`.
    ///
    /// With `keep` the step stays cached in the simulation, otherwise every call
    /// returns a fresh step that reads from disk again, unless the step was kept before.
    pub fn get(&self, index: isize, keep: bool) -> Result<Arc<OutputStep>> {
        let position = self.position(index)?;
        let mut kept = self.kept.lock();
        if let Some(step) = kept.get(&position) {
            return Ok(step.clone());
        }

        let step = Arc::new(OutputStep::new(
            self.data.steps[position].clone(),
            self.data.reader.clone(),
            self.grid.clone(),
            self.indexing,
        ));
        if keep {
            debug!(position, "Keeping step");
            kept.insert(position, step.clone());
        }
        Ok(step)
    }

    /// The output at `index`, kept in the simulation.
    pub fn step(&self, index: isize) -> Result<Arc<OutputStep>> {
        self.get(index, true)
    }

    /// Positions of the kept steps.
    pub fn kept(&self) -> Vec<usize> {
        self.kept.lock().keys().copied().collect()
    }

    /// Drops a step from the simulation and evicts its variables.
    pub fn forget(&self, index: isize) -> Result<bool> {
        let position = self.position(index)?;
        let removed = self.kept.lock().remove(&position);
        Ok(match removed {
            Some(step) => {
                step.evict();
                true
            }
            None => false,
        })
    }

    /// Drops all kept steps.
    pub fn clear(&self) {
        let kept = std::mem::take(&mut *self.kept.lock());
        for step in kept.values() {
            step.evict();
        }
    }

    /// All outputs in order. Steps are not kept.
    pub fn iter(&self) -> StepIter<'_> {
        StepIter::new(self, (0..self.len()).collect())
    }

    /// Outputs in `start..stop` every `step`, clamped like range slicing.
    ///
    /// Negative bounds count from the end, a negative `step` iterates backwards.
    pub fn iter_range(
        &self,
        start: Option<isize>,
        stop: Option<isize>,
        step: isize,
    ) -> Result<StepIter<'_>> {
        Ok(StepIter::new(self, iter::positions(self.len(), start, stop, step)?))
    }

    /// The same outputs on a part of the grid.
    ///
    /// Axes of `spec` are in this simulation's indexing and relative to its current grid,
    /// so slicing twice composes. Kept steps are not carried over.
    pub fn slice(&self, spec: impl Into<Slice3>) -> Result<Simulation> {
        let grid = self.grid.slice_indexed(spec.into(), self.indexing)?;
        debug!(dims = ?grid.dims(), "Sliced simulation");
        Ok(Simulation {
            data: self.data.clone(),
            grid: Arc::new(grid),
            indexing: self.indexing,
            kept: Mutex::new(BTreeMap::new()),
        })
    }

    /// A simulation over the same outputs and grid, read through a newly opened reader.
    ///
    /// Nothing but the grid is shared, so it can be used from another thread without
    /// touching the reader or the kept steps of `self`.
    pub(crate) fn with_own_reader(&self) -> Result<Simulation> {
        let data = &self.data;
        let reader = self.format().open(&data.data_dir)?;
        Ok(Simulation {
            data: Arc::new(SimulationData {
                path: data.path.clone(),
                data_dir: data.data_dir.clone(),
                reader: Arc::new(reader),
                steps: data.steps.clone(),
                ini: data.ini.clone(),
                definitions: data.definitions.clone(),
            }),
            grid: self.grid.clone(),
            indexing: self.indexing,
            kept: Mutex::new(BTreeMap::new()),
        })
    }

    /// Heap memory held by the grid and the kept steps, mapped data excluded.
    pub fn heap_size(&self) -> usize {
        self.get_heap_size()
    }
}

impl GetSize for Simulation {
    fn get_heap_size(&self) -> usize {
        let steps = self.data.steps.len() * std::mem::size_of::<StepInfo>();
        let kept: usize = self
            .kept
            .lock()
            .values()
            .map(|s| s.get_heap_size())
            .sum();
        self.grid.get_heap_size() + steps + kept
    }
}

impl<'a> IntoIterator for &'a Simulation {
    type Item = Result<Arc<OutputStep>>;
    type IntoIter = StepIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Display for Simulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data_dir = self
            .data_dir()
            .strip_prefix(self.path())
            .unwrap_or(self.data_dir());
        writeln!(f, "PLUTO simulation at '{}'", self.path().display())?;
        writeln!(f, "Data directory at '$SIM_DIR/{}'", data_dir.display())?;
        writeln!(
            f,
            "{} grid with dimensions {:?}",
            capitalize(&self.coordinates().to_string()),
            self.dims()
        )?;
        for axis in Dim3D::iter() {
            let (lo, hi) = self.grid.domain(axis);
            let prefix = if axis == Dim3D::X1 { "Domain:" } else { "" };
            writeln!(
                f,
                "{prefix:<8}{axis}: {lo:.2e} .. {hi:.2e} (L{axis} = {:.2e})",
                self.grid.extent(axis)
            )?;
        }
        match self.vars() {
            Ok(vars) => writeln!(
                f,
                "Available variables: {}",
                vars.iter().map(String::as_str).collect::<Vec<_>>().join(" ")
            ),
            Err(e) => writeln!(f, "Available variables: unavailable ({e})"),
        }
    }
}

impl fmt::Debug for Simulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Simulation")
            .field("path", &self.data.path)
            .field("format", &self.format())
            .field("coordinates", &self.coordinates())
            .field("dims", &self.dims())
            .field("steps", &self.len())
            .finish()
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
