use std::{fmt, sync::Arc};

use get_size::GetSize;
use indexmap::IndexSet;
use ndarray::{Array2, ArrayViewD, Axis, Ix2};
use once_cell::sync::OnceCell;
use tracing::instrument;

use crate::{
    error::{Error, Result},
    formats::{AnyReader, Format, FormatReader, OpenRequest, StepInfo},
    geom::Dim3D,
    grid::{projection::Projection, slice::Indexing, Grid},
    lazy_data::{cache::VariableCache, field::Field},
};

/// What to plot: a variable of the step or values computed by the caller.
#[derive(Debug, Clone)]
pub enum PlotSource<'a> {
    Variable(&'a str),
    /// Values on the step's grid, either full 3D in presentation order or already
    /// squeezed to the `(n_b, n_a)` plane of the projection
    Array(ArrayViewD<'a, f64>),
}

impl<'a> From<&'a str> for PlotSource<'a> {
    fn from(name: &'a str) -> Self {
        PlotSource::Variable(name)
    }
}

impl<'a> From<ArrayViewD<'a, f64>> for PlotSource<'a> {
    fn from(values: ArrayViewD<'a, f64>) -> Self {
        PlotSource::Array(values)
    }
}

/// Values and meshes ready to be drawn by a plotting frontend.
#[derive(Debug, Clone, PartialEq)]
pub struct PlotData {
    /// Shaped like the meshes of `projection`
    pub values: Array2<f64>,
    pub projection: Projection,
    /// Variable name, if plotting a variable
    pub label: Option<String>,
}

/// One output of a simulation.
///
/// Variables are opened on first access and cached until [`OutputStep::evict`] or until
/// the step is dropped.
pub struct OutputStep {
    info: StepInfo,
    reader: Arc<AnyReader>,
    grid: Arc<Grid>,
    indexing: Indexing,
    vars: OnceCell<Arc<IndexSet<String>>>,
    cache: VariableCache,
}

impl OutputStep {
    pub(crate) fn new(
        info: StepInfo,
        reader: Arc<AnyReader>,
        grid: Arc<Grid>,
        indexing: Indexing,
    ) -> Self {
        Self {
            info,
            reader,
            grid,
            indexing,
            vars: OnceCell::new(),
            cache: VariableCache::new(),
        }
    }

    /// Output number as used in file names.
    pub fn index(&self) -> usize {
        self.info.index
    }

    /// Position among the outputs of the simulation.
    pub fn position(&self) -> usize {
        self.info.position
    }

    /// Simulation time.
    pub fn t(&self) -> f64 {
        self.info.time
    }

    /// Simulation timestep at the time of output.
    pub fn dt(&self) -> f64 {
        self.info.dt
    }

    pub fn nstep(&self) -> u64 {
        self.info.nstep
    }

    pub fn info(&self) -> &StepInfo {
        &self.info
    }

    pub fn format(&self) -> Format {
        self.reader.format()
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn indexing(&self) -> Indexing {
        self.indexing
    }

    /// Names of the variables written in this output, in file order.
    pub fn vars(&self) -> Result<&IndexSet<String>> {
        self.vars
            .get_or_try_init(|| self.reader.variable_names(&self.info))
            .map(|v| &**v)
    }

    fn resolve(&self, name: &str) -> Result<String> {
        let vars = self.vars()?;
        if vars.contains(name) {
            return Ok(name.to_string());
        }
        let aliased = self.grid.coordinates().variable_name(name);
        if vars.contains(aliased.as_ref()) {
            return Ok(aliased.into_owned());
        }
        Err(Error::UnknownVariable {
            name: name.to_string(),
            valid: vars.iter().cloned().collect(),
        })
    }

    /// A variable by its PLUTO name or a coordinate system alias like `vr`.
    ///
    /// Repeated calls return the same field until it is evicted.
    #[instrument(skip(self), fields(step = self.info.index))]
    pub fn var(&self, name: &str) -> Result<Arc<Field>> {
        let name = self.resolve(name)?;
        self.cache.get(&name, || {
            self.reader.open_variable(OpenRequest {
                step: &self.info,
                name: &name,
                grid: &self.grid,
                indexing: self.indexing,
            })
        })
    }

    pub fn rho(&self) -> Result<Arc<Field>> {
        self.var("rho")
    }

    pub fn prs(&self) -> Result<Arc<Field>> {
        self.var("prs")
    }

    pub fn vx1(&self) -> Result<Arc<Field>> {
        self.var("vx1")
    }

    pub fn vx2(&self) -> Result<Arc<Field>> {
        self.var("vx2")
    }

    pub fn vx3(&self) -> Result<Arc<Field>> {
        self.var("vx3")
    }

    /// Whether a variable is materialized, without opening it.
    pub fn has(&self, name: &str) -> bool {
        match self.resolve(name) {
            Ok(name) => self.cache.has(&name),
            Err(_) => false,
        }
    }

    /// Materialized variables.
    pub fn loaded(&self) -> Vec<String> {
        self.cache.loaded()
    }

    /// Drops one materialized variable. Fails only for names that are not variables.
    pub fn forget(&self, name: &str) -> Result<bool> {
        let name = self.resolve(name)?;
        Ok(self.cache.forget(&name))
    }

    /// Drops all materialized variables and their mappings.
    pub fn evict(&self) {
        self.cache.evict();
    }

    /// Brings values on the grid to the `(n_b, n_a)` plane spanned by axes `a` and `b`.
    fn squeeze(&self, values: ArrayViewD<'_, f64>, [a, b]: [Dim3D; 2]) -> Result<Array2<f64>> {
        let dims = self.grid.dims();
        let shape = self.grid.shape(self.indexing);
        if values.shape() == [dims[b], dims[a]] {
            return Ok(values.into_dimensionality::<Ix2>()?.to_owned());
        }
        if values.shape() != shape {
            return Err(Error::ShapeMismatch {
                expected: shape,
                found: values.shape().to_vec(),
            });
        }

        let axes = self.indexing.axes();
        let pos = |d: Dim3D| axes.iter().position(|x| *x == d).unwrap_or_default();
        let (pa, pb) = (pos(a), pos(b));
        let other = (0..3).find(|p| *p != pa && *p != pb).unwrap_or_default();
        let plane = values
            .index_axis_move(Axis(other), 0)
            .into_dimensionality::<Ix2>()?;
        // rows run along b
        Ok(if pa < pb {
            plane.reversed_axes().to_owned()
        } else {
            plane.to_owned()
        })
    }

    /// Values for a 2D plot of this step, with the matching cartesian meshes.
    pub fn plot_source<'a>(&self, source: impl Into<PlotSource<'a>>) -> Result<PlotData> {
        let projection = self.grid.projection()?;
        let axes = projection.axes;

        let (values, label) = match source.into() {
            PlotSource::Variable(name) => {
                let field = self.var(name)?;
                let values = self.squeeze(field.to_array().into_dyn().view(), axes)?;
                (values, Some(field.name().to_string()))
            }
            PlotSource::Array(values) => (self.squeeze(values, axes)?, None),
        };

        Ok(PlotData {
            values,
            projection,
            label,
        })
    }
}

impl GetSize for OutputStep {
    fn get_heap_size(&self) -> usize {
        self.cache.get_heap_size()
    }
}

impl fmt::Display for OutputStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Output {}, time: {}, simulation step: {}",
            self.info.index, self.info.time, self.info.nstep
        )?;
        writeln!(f, "Grid: {}", self.grid)?;
        match self.vars() {
            Ok(vars) => write!(
                f,
                "Variables: {}",
                vars.iter().map(String::as_str).collect::<Vec<_>>().join(" ")
            ),
            Err(e) => write!(f, "Variables: unavailable ({e})"),
        }
    }
}

impl fmt::Debug for OutputStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputStep")
            .field("info", &self.info)
            .field("format", &self.reader.format())
            .field("loaded", &self.cache.loaded())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{Array3, IxDyn};

    use super::*;
    use crate::test_util::{self, Dataset, TestData};

    fn first_step(data: &TestData, format: Format, indexing: Indexing) -> OutputStep {
        let reader = format.open(data.data_dir()).unwrap();
        let info = reader.discover().unwrap().remove(0);
        OutputStep::new(info, Arc::new(reader), Arc::new(data.grid()), indexing)
    }

    #[test]
    fn metadata_and_vars() {
        let data = Dataset::new((3, 2, 1)).build(Format::Dbl);
        let step = first_step(&data, Format::Dbl, Indexing::Ijk);
        assert_eq!(step.index(), 0);
        assert_eq!(step.t(), 0.0);
        assert_eq!(step.dt(), 0.01);
        assert_eq!(step.format(), Format::Dbl);
        assert_eq!(
            step.vars().unwrap().iter().collect::<Vec<_>>(),
            vec!["rho", "vx1", "prs"]
        );
        assert!(step.to_string().contains("Variables: rho vx1 prs"));
    }

    #[test]
    fn unknown_variable_lists_names() {
        let data = Dataset::new((3, 2, 1)).build(Format::Dbl);
        let step = first_step(&data, Format::Dbl, Indexing::Ijk);
        match step.var("Bx1").unwrap_err() {
            Error::UnknownVariable { name, valid } => {
                assert_eq!(name, "Bx1");
                assert_eq!(valid, vec!["rho", "vx1", "prs"]);
            }
            e => panic!("unexpected error {e:?}"),
        }
        assert!(!step.has("Bx1"));
    }

    #[test]
    fn cached_until_forgotten() {
        let data = Dataset::new((3, 2, 2)).build(Format::Dbl);
        let step = first_step(&data, Format::Dbl, Indexing::Ijk);

        let rho = step.rho().unwrap();
        assert!(step.has("rho"));
        assert!(Arc::ptr_eq(&rho, &step.var("rho").unwrap()));

        rho.set([0, 0, 0], 42.0).unwrap();
        assert_eq!(step.rho().unwrap().get([0, 0, 0]), Some(42.0));

        assert!(step.forget("rho").unwrap());
        assert!(!step.has("rho"));
        assert_eq!(
            step.rho().unwrap().get([0, 0, 0]),
            Some(test_util::value(0, 0, 0, 0, 0))
        );

        step.evict();
        assert!(step.loaded().is_empty());
    }

    #[test]
    fn aliases() {
        let data = Dataset::new((3, 2, 1)).geometry("SPHERICAL").build(Format::Dbl);
        let reader = Format::Dbl.open(data.data_dir()).unwrap();
        let info = reader.discover().unwrap().remove(0);
        let step = OutputStep::new(info, Arc::new(reader), Arc::new(data.grid()), Indexing::Ijk);
        assert_eq!(step.grid().coordinates().to_string(), "spherical");
        let vr = step.var("vr").unwrap();
        assert_eq!(vr.name(), "vx1");
        assert!(Arc::ptr_eq(&vr, &step.vx1().unwrap()));
    }

    #[test]
    fn plot_source_from_variable() {
        let data = Dataset::new((4, 3, 1)).build(Format::Dbl);
        for indexing in [Indexing::Ijk, Indexing::Kji] {
            let step = first_step(&data, Format::Dbl, indexing);
            let plot = step.plot_source("prs").unwrap();
            assert_eq!(plot.values.shape(), &[3, 4]);
            assert_eq!(plot.projection.center.0.shape(), &[3, 4]);
            assert_eq!(plot.values[[2, 1]], test_util::value(0, 2, 1, 2, 0));
            assert_eq!(plot.label.as_deref(), Some("prs"));
        }
    }

    #[test]
    fn plot_source_from_array() {
        let data = Dataset::new((4, 3, 1)).build(Format::Dbl);
        let step = first_step(&data, Format::Dbl, Indexing::Ijk);

        let values = Array3::from_shape_fn((4, 3, 1), |(i, j, _)| (i * 10 + j) as f64).into_dyn();
        let plot = step.plot_source(values.view()).unwrap();
        assert_eq!(plot.values[[2, 3]], 32.0);
        assert_eq!(plot.label, None);

        let wrong = ndarray::ArrayD::<f64>::zeros(IxDyn(&[4, 4, 1]));
        let err = step.plot_source(wrong.view()).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { expected: [4, 3, 1], .. }), "{err:?}");
    }

    #[test]
    fn plot_needs_two_axes() {
        let data = Dataset::new((4, 3, 2)).build(Format::Dbl);
        let step = first_step(&data, Format::Dbl, Indexing::Ijk);
        assert!(matches!(step.plot_source("rho"), Err(Error::Projection { .. })));
    }
}
