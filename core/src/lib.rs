#![warn(clippy::complexity)]
#![warn(clippy::correctness)]
#![warn(clippy::perf)]
#![warn(clippy::style)]
#![warn(clippy::suspicious)]
#![warn(clippy::print_stdout)]
#![warn(clippy::print_stderr)]

//! Lazy access to the gridded output of PLUTO simulations.
//!
//! A [`Simulation`] discovers the data directory and output format of a run,
//! parses its [`Grid`] and hands out [`OutputStep`]s whose variables are
//! memory mapped on first access.

pub mod config;
pub mod error;
pub mod formats;
pub mod geom;
pub mod grid;
pub mod lazy_data;
pub mod simulation;
pub mod step;

#[cfg(test)]
pub(crate) mod test_util;

pub use error::{Error, Result};
pub use formats::Format;
pub use geom::{Dim3D, Vec3};
pub use grid::{
    coordinates::CoordinateSystem,
    slice::{AxisSpec, Indexing, Slice3},
    Grid,
};
pub use lazy_data::field::{Field, FieldView};
pub use simulation::{Simulation, SimulationOptions};
pub use step::{OutputStep, PlotData, PlotSource};
