use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::geom::Dim3D;

/// Geometry of the PLUTO grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinateSystem {
    #[default]
    Cartesian,
    Cylindrical,
    Polar,
    Spherical,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown coordinate system '{0}'")]
pub struct UnknownCoordinateSystem(pub String);

impl FromStr for CoordinateSystem {
    type Err = UnknownCoordinateSystem;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cartesian" => Ok(Self::Cartesian),
            "cylindrical" => Ok(Self::Cylindrical),
            "polar" => Ok(Self::Polar),
            "spherical" => Ok(Self::Spherical),
            _ => Err(UnknownCoordinateSystem(s.trim().to_string())),
        }
    }
}

impl fmt::Display for CoordinateSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cartesian => "cartesian",
            Self::Cylindrical => "cylindrical",
            Self::Polar => "polar",
            Self::Spherical => "spherical",
        })
    }
}

impl CoordinateSystem {
    /// Physical names of the three axes.
    pub fn axis_names(self) -> [&'static str; 3] {
        match self {
            Self::Cartesian => ["x", "y", "z"],
            Self::Polar => ["r", "phi", "z"],
            // PLUTO's cylindrical geometry has no third axis name of its own
            Self::Cylindrical => ["r", "z", "x3"],
            Self::Spherical => ["r", "theta", "phi"],
        }
    }

    /// Resolves a physical axis name (`r`, `theta`, ...) or a PLUTO name (`x1`, ...).
    pub fn axis(self, name: &str) -> Option<Dim3D> {
        let pluto = Dim3D::iter().find(|d| d.to_string() == name);
        pluto.or_else(|| {
            self.axis_names()
                .iter()
                .position(|n| *n == name)
                .and_then(|i| Dim3D::iter().nth(i))
        })
    }

    /// Maps coordinate-system specific variable names to the names PLUTO writes,
    /// e.g. `vr` to `vx1` in spherical coordinates. Unknown names are passed through.
    pub fn variable_name<'a>(self, name: &'a str) -> std::borrow::Cow<'a, str> {
        let prefixes = ["v", "B", "fr"];
        for (dim, axis) in Dim3D::iter().zip(self.axis_names()) {
            for prefix in prefixes {
                let pluto = match prefix {
                    // radiative fluxes are written without the `x`
                    "fr" => format!("fr{}", dim.number()),
                    _ => format!("{prefix}{dim}"),
                };
                if name == format!("{prefix}{axis}") {
                    return pluto.into();
                }
                if prefix == "B" && name == format!("B{axis}s") {
                    return format!("{pluto}s").into();
                }
            }
        }
        name.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitive() {
        assert_eq!(
            "SPHERICAL".parse::<CoordinateSystem>(),
            Ok(CoordinateSystem::Spherical)
        );
        assert!("hyperbolic".parse::<CoordinateSystem>().is_err());
    }

    #[test]
    fn maps_axis_names() {
        assert_eq!(CoordinateSystem::Polar.axis("phi"), Some(Dim3D::X2));
        assert_eq!(CoordinateSystem::Polar.axis("x3"), Some(Dim3D::X3));
        assert_eq!(CoordinateSystem::Cartesian.axis("theta"), None);
    }

    #[test]
    fn maps_variable_names() {
        let sph = CoordinateSystem::Spherical;
        assert_eq!(sph.variable_name("vr"), "vx1");
        assert_eq!(sph.variable_name("vtheta"), "vx2");
        assert_eq!(sph.variable_name("Bphi"), "Bx3");
        assert_eq!(sph.variable_name("Bphis"), "Bx3s");
        assert_eq!(sph.variable_name("frr"), "fr1");
        assert_eq!(sph.variable_name("rho"), "rho");
        assert_eq!(CoordinateSystem::Cartesian.variable_name("vy"), "vx2");
    }
}
