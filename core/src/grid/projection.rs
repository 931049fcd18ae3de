use ndarray::{Array1, Array2, Zip};

use super::{coordinates::CoordinateSystem, Grid};
use crate::{
    error::{Error, Result},
    geom::Dim3D,
};

/// Two dimensional meshes of a grid with exactly two non-degenerate axes,
/// transformed to cartesian plotting coordinates.
///
/// Meshes follow the `meshgrid` convention: shape `(n_b, n_a)` for axes `(a, b)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    /// The two grid axes spanning the plane
    pub axes: [Dim3D; 2],
    /// Names of the plotting coordinates
    pub labels: [&'static str; 2],
    pub center: (Array2<f64>, Array2<f64>),
    pub edge: (Array2<f64>, Array2<f64>),
}

pub fn meshgrid(a: &Array1<f64>, b: &Array1<f64>) -> (Array2<f64>, Array2<f64>) {
    let shape = (b.len(), a.len());
    (
        Array2::from_shape_fn(shape, |(_, j)| a[j]),
        Array2::from_shape_fn(shape, |(i, _)| b[i]),
    )
}

type Transform = Box<dyn Fn(f64, f64) -> (f64, f64)>;

impl Grid {
    pub fn projection(&self) -> Result<Projection> {
        let reduced = self.reduced_dims();
        let [a, b] = <[Dim3D; 2]>::try_from(reduced.as_slice()).map_err(|_| Error::Projection {
            reason: format!(
                "need exactly two axes with more than one cell, grid has {}",
                reduced.len()
            ),
        })?;

        let names = self.coordinates.axis_names();
        let native = [names[a as usize], names[b as usize]];
        let unsupported = || Error::Projection {
            reason: format!("projection in ({}, {}) not supported", native[0], native[1]),
        };

        let (labels, transform): ([&'static str; 2], Option<Transform>) =
            match (self.coordinates, a, b) {
                (CoordinateSystem::Cartesian | CoordinateSystem::Cylindrical, _, _) => {
                    (native, None)
                }
                (CoordinateSystem::Polar, Dim3D::X1, Dim3D::X2) => (
                    ["x", "y"],
                    Some(Box::new(|r: f64, phi: f64| (r * phi.cos(), r * phi.sin())) as Transform),
                ),
                (CoordinateSystem::Polar, Dim3D::X1, Dim3D::X3) => (["r", "z"], None),
                (CoordinateSystem::Spherical, Dim3D::X1, Dim3D::X2) => (
                    ["x", "z"],
                    Some(
                        Box::new(|r: f64, theta: f64| (r * theta.sin(), r * theta.cos()))
                            as Transform,
                    ),
                ),
                (CoordinateSystem::Spherical, Dim3D::X1, Dim3D::X3) => {
                    // Equatorial-ish plane at the single remaining theta
                    let sin_theta = self.centers(Dim3D::X2)[0].sin();
                    (
                        ["x", "y"],
                        Some(Box::new(move |r: f64, phi: f64| {
                            (r * sin_theta * phi.cos(), r * sin_theta * phi.sin())
                        }) as Transform),
                    )
                }
                _ => return Err(unsupported()),
            };

        let mesh = |u: &Array1<f64>, v: &Array1<f64>| {
            let (mut x, mut y) = meshgrid(u, v);
            if let Some(t) = &transform {
                Zip::from(&mut x).and(&mut y).for_each(|x, y| {
                    (*x, *y) = t(*x, *y);
                });
            }
            (x, y)
        };

        Ok(Projection {
            axes: [a, b],
            labels,
            center: mesh(self.centers(a), self.centers(b)),
            edge: mesh(&self.interfaces(a), &self.interfaces(b)),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::f64::consts::FRAC_PI_2;

    use super::*;
    use crate::geom::Vec3;

    fn grid(cs: CoordinateSystem, x1: Vec<f64>, x2: Vec<f64>, x3: Vec<f64>) -> Grid {
        Grid::new(Vec3::new(x1, x2, x3), cs).unwrap()
    }

    #[test]
    fn meshgrid_shapes() {
        let (x, y) = meshgrid(&Array1::from(vec![1.0, 2.0, 3.0]), &Array1::from(vec![5.0, 6.0]));
        assert_eq!(x.shape(), &[2, 3]);
        assert_eq!(x[[1, 2]], 3.0);
        assert_eq!(y[[1, 2]], 6.0);
    }

    #[test]
    fn cartesian_passes_through() {
        let g = grid(
            CoordinateSystem::Cartesian,
            vec![0.0, 1.0, 2.0],
            vec![0.0, 1.0],
            vec![0.0, 2.0, 4.0],
        );
        let p = g.projection().unwrap();
        assert_eq!(p.axes, [Dim3D::X1, Dim3D::X3]);
        assert_eq!(p.labels, ["x", "z"]);
        assert_eq!(p.center.1[[1, 0]], 3.0);
        assert_eq!(p.edge.0.shape(), &[3, 3]);
    }

    #[test]
    fn polar_to_cartesian() {
        let g = grid(
            CoordinateSystem::Polar,
            vec![1.0, 3.0, 5.0],
            vec![-0.1, 0.1, FRAC_PI_2 - 0.1, FRAC_PI_2 + 0.1],
            vec![0.0, 1.0],
        );
        let p = g.projection().unwrap();
        assert_eq!(p.labels, ["x", "y"]);
        let (x, y) = &p.center;
        // r = 2 at phi = 0 and phi = pi/2
        assert!((x[[0, 0]] - 2.0).abs() < 1e-12 && y[[0, 0]].abs() < 1e-12);
        assert!(x[[2, 0]].abs() < 1e-12 && (y[[2, 0]] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn spherical_meridional_plane() {
        let g = grid(
            CoordinateSystem::Spherical,
            vec![1.0, 3.0, 5.0],
            vec![FRAC_PI_2 - 0.1, FRAC_PI_2 + 0.1, 2.0],
            vec![0.0, 1.0],
        );
        let p = g.projection().unwrap();
        assert_eq!(p.labels, ["x", "z"]);
        assert!((p.center.0[[0, 0]] - 2.0).abs() < 1e-12);
        assert!(p.center.1[[0, 0]].abs() < 1e-12);
    }

    #[test]
    fn needs_two_axes() {
        let g = grid(
            CoordinateSystem::Cartesian,
            vec![0.0, 1.0, 2.0],
            vec![0.0, 1.0],
            vec![0.0, 1.0],
        );
        assert!(matches!(g.projection(), Err(Error::Projection { .. })));
        let g = grid(
            CoordinateSystem::Spherical,
            vec![0.0, 1.0],
            vec![0.0, 1.0, 2.0],
            vec![0.0, 1.0, 2.0],
        );
        assert!(matches!(g.projection(), Err(Error::Projection { .. })));
    }
}
