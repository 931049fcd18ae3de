use std::ops::{Index, IndexMut};

use derive_more::Constructor;
use get_size::GetSize;
use serde::{Deserialize, Serialize};

/// One of the three grid axes, named like PLUTO names them (`x1`, `x2`, `x3`).
#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub enum Dim3D {
    X1 = 0,
    X2 = 1,
    X3 = 2,
}

impl Dim3D {
    pub fn iter() -> impl Iterator<Item = Dim3D> {
        [Dim3D::X1, Dim3D::X2, Dim3D::X3].into_iter()
    }

    /// 1-based axis number as used in PLUTO files and variable names.
    pub fn number(self) -> usize {
        self as usize + 1
    }
}

impl std::fmt::Display for Dim3D {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "x{}", self.number())
    }
}

/// Per-axis container, always stored in `(x1, x2, x3)` order.
#[derive(Constructor, Default, PartialEq, Eq, Debug, Copy, Clone, Hash, Serialize, Deserialize)]
pub struct Vec3<T> {
    pub x1: T,
    pub x2: T,
    pub x3: T,
}

pub type Vec3U = Vec3<usize>;

impl<T> From<(T, T, T)> for Vec3<T> {
    fn from((x1, x2, x3): (T, T, T)) -> Self {
        Vec3 { x1, x2, x3 }
    }
}

impl<T> From<Vec3<T>> for (T, T, T) {
    fn from(v: Vec3<T>) -> Self {
        (v.x1, v.x2, v.x3)
    }
}

impl<T> From<[T; 3]> for Vec3<T> {
    fn from([x1, x2, x3]: [T; 3]) -> Self {
        Vec3 { x1, x2, x3 }
    }
}

impl<T> From<Vec3<T>> for [T; 3] {
    fn from(v: Vec3<T>) -> Self {
        [v.x1, v.x2, v.x3]
    }
}

impl<T> Vec3<T> {
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        [&self.x1, &self.x2, &self.x3].into_iter()
    }

    pub fn enumerate(&self) -> impl Iterator<Item = (Dim3D, &T)> {
        Dim3D::iter().zip(self.iter())
    }

    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> Vec3<U> {
        Vec3 {
            x1: f(self.x1),
            x2: f(self.x2),
            x3: f(self.x3),
        }
    }

    pub fn as_ref(&self) -> Vec3<&T> {
        Vec3 {
            x1: &self.x1,
            x2: &self.x2,
            x3: &self.x3,
        }
    }

    pub fn try_map<U, E>(self, mut f: impl FnMut(Dim3D, T) -> Result<U, E>) -> Result<Vec3<U>, E> {
        Ok(Vec3 {
            x1: f(Dim3D::X1, self.x1)?,
            x2: f(Dim3D::X2, self.x2)?,
            x3: f(Dim3D::X3, self.x3)?,
        })
    }

    pub fn zip<U>(self, other: Vec3<U>) -> Vec3<(T, U)> {
        Vec3 {
            x1: (self.x1, other.x1),
            x2: (self.x2, other.x2),
            x3: (self.x3, other.x3),
        }
    }
}

impl Vec3U {
    pub fn product(&self) -> usize {
        self.x1 * self.x2 * self.x3
    }
}

impl<T> Index<Dim3D> for Vec3<T> {
    type Output = T;

    fn index(&self, i: Dim3D) -> &T {
        match i {
            Dim3D::X1 => &self.x1,
            Dim3D::X2 => &self.x2,
            Dim3D::X3 => &self.x3,
        }
    }
}

impl<T> IndexMut<Dim3D> for Vec3<T> {
    fn index_mut(&mut self, i: Dim3D) -> &mut T {
        match i {
            Dim3D::X1 => &mut self.x1,
            Dim3D::X2 => &mut self.x2,
            Dim3D::X3 => &mut self.x3,
        }
    }
}

impl<T: GetSize> GetSize for Vec3<T> {
    fn get_heap_size(&self) -> usize {
        self.iter().map(GetSize::get_heap_size).sum()
    }
}
