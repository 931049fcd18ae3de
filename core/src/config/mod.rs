//! Read-only access to the run configuration next to the output.

pub mod definitions;
pub mod ini;

pub use definitions::Definitions;
pub use ini::{IniValue, PlutoIni};
