//! Synthetic PLUTO output for tests.

use std::{
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
};

use tempfile::TempDir;

use crate::{
    formats::{manifest::Endianness, DType, Format, Precision},
    grid::Grid,
};

pub const VARS: [&str; 3] = ["rho", "vx1", "prs"];

/// Contents of a `grid.out` with unit cells starting at 0 on every axis.
pub fn grid_file(dims: (usize, usize, usize), geometry: Option<&str>) -> String {
    let mut out = String::from("# FILE HEADER\n");
    if let Some(geometry) = geometry {
        let _ = writeln!(out, "# GEOMETRY:   {geometry}");
    }
    for res in [dims.0, dims.1, dims.2] {
        let _ = writeln!(out, "{res}");
        for i in 0..res {
            let _ = writeln!(out, " {i}   {:.12e}    {:.12e}", i as f64, (i + 1) as f64);
        }
    }
    out
}

/// Value of variable number `var` in cell `(i, j, k)` of output `step`, exact in single precision.
pub fn value(step: usize, var: usize, i: usize, j: usize, k: usize) -> f64 {
    (step * 10_000 + var * 1_000 + k * 100 + j * 10 + i) as f64 + 0.25
}

/// Where the data files go relative to the simulation directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataDir {
    Root,
    Data,
    /// `out/`, only announced in `pluto.ini`
    FromIni,
}

#[derive(Debug, Clone)]
pub struct Dataset {
    dims: (usize, usize, usize),
    steps: usize,
    multiple: bool,
    ascii: bool,
    endianness: Endianness,
    geometry: Option<&'static str>,
    constant: Option<(usize, f64)>,
    data_dir: DataDir,
    definitions: Option<&'static str>,
}

pub struct TestData {
    dir: TempDir,
    data_dir: PathBuf,
}

impl TestData {
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn grid(&self) -> Grid {
        Grid::parse(&self.data_dir.join("grid.out")).unwrap()
    }
}

impl Dataset {
    pub fn new(dims: (usize, usize, usize)) -> Self {
        Self {
            dims,
            steps: 1,
            multiple: false,
            ascii: false,
            endianness: Endianness::Little,
            geometry: None,
            constant: None,
            data_dir: DataDir::Root,
            definitions: None,
        }
    }

    pub fn steps(mut self, steps: usize) -> Self {
        self.steps = steps;
        self
    }

    pub fn multiple_files(mut self) -> Self {
        self.multiple = true;
        self
    }

    /// Writes VTK files as text.
    pub fn ascii(mut self) -> Self {
        self.ascii = true;
        self
    }

    pub fn big_endian(mut self) -> Self {
        self.endianness = Endianness::Big;
        self
    }

    pub fn geometry(mut self, geometry: &'static str) -> Self {
        self.geometry = Some(geometry);
        self
    }

    /// Fills variable `name` with `value` in every output.
    pub fn constant(mut self, name: &str, value: f64) -> Self {
        let var = VARS.iter().position(|v| *v == name).unwrap();
        self.constant = Some((var, value));
        self
    }

    pub fn data_dir(mut self, data_dir: DataDir) -> Self {
        self.data_dir = data_dir;
        self
    }

    /// Writes a `definitions.h` declaring this geometry.
    pub fn defined_geometry(mut self, geometry: &'static str) -> Self {
        self.definitions = Some(geometry);
        self
    }

    fn value(&self, step: usize, var: usize, i: usize, j: usize, k: usize) -> f64 {
        match self.constant {
            Some((v, value)) if v == var => value,
            _ => value(step, var, i, j, k),
        }
    }

    /// Values of one variable in storage order.
    fn values(&self, step: usize, var: usize) -> Vec<f64> {
        let (n1, n2, n3) = self.dims;
        let mut values = Vec::with_capacity(n1 * n2 * n3);
        for k in 0..n3 {
            for j in 0..n2 {
                for i in 0..n1 {
                    values.push(self.value(step, var, i, j, k));
                }
            }
        }
        values
    }

    pub fn build(&self, format: Format) -> TestData {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = match self.data_dir {
            DataDir::Root => dir.path().to_path_buf(),
            DataDir::Data => dir.path().join("data"),
            DataDir::FromIni => {
                fs::write(
                    dir.path().join("pluto.ini"),
                    "[Grid]\n\nX1-grid 1 0.0 4 u 4.0\n\n[Static Grid Output]\n\noutput_dir ./out\n",
                )
                .unwrap();
                dir.path().join("out")
            }
        };
        fs::create_dir_all(&data_dir).unwrap();
        if let Some(geometry) = self.definitions {
            fs::write(
                dir.path().join("definitions.h"),
                format!("#define  PHYSICS  HD\n#define  GEOMETRY  {geometry}\n"),
            )
            .unwrap();
        }

        fs::write(data_dir.join("grid.out"), grid_file(self.dims, self.geometry)).unwrap();

        let mode = if self.multiple {
            "multiple_files"
        } else {
            "single_file"
        };
        let endianness = match self.endianness {
            Endianness::Little => "little",
            Endianness::Big => "big",
        };
        let mut manifest = String::new();
        for step in 0..self.steps {
            let _ = writeln!(
                manifest,
                "{step} {:.6e} {:.6e} {} {mode} {endianness} {}",
                step as f64,
                0.01,
                step * 100,
                VARS.join(" ")
            );
        }
        fs::write(format.manifest_path(&data_dir), manifest).unwrap();

        for step in 0..self.steps {
            match format {
                Format::Dbl | Format::Flt => self.write_binary(&data_dir, format, step),
                Format::Vtk => self.write_vtk(&data_dir, step),
                #[cfg(feature = "hdf5")]
                Format::DblH5 | Format::FltH5 => self.write_h5(&data_dir, format, step),
                #[cfg(not(feature = "hdf5"))]
                Format::DblH5 | Format::FltH5 => {}
            }
        }

        TestData { dir, data_dir }
    }

    /// One `Timestep_N/vars` group per file, datasets shaped `(x3, x2, x1)`.
    #[cfg(feature = "hdf5")]
    fn write_h5(&self, data_dir: &Path, format: Format, step: usize) {
        let (n1, n2, n3) = self.dims;
        let path = data_dir.join(format!("data.{step:04}.{}", format.extension()));
        let file = hdf5::File::create(path).unwrap();
        let vars = file
            .create_group(&format!("Timestep_{step}"))
            .and_then(|g| g.create_group("vars"))
            .unwrap();
        for (var, name) in VARS.iter().enumerate() {
            let values = ndarray::Array3::from_shape_vec((n3, n2, n1), self.values(step, var))
                .unwrap();
            let builder = vars.new_dataset_builder();
            match format.precision() {
                Precision::Double => builder.with_data(&values).create(*name),
                Precision::Single => builder.with_data(&values.mapv(|v| v as f32)).create(*name),
            }
            .unwrap();
        }
    }

    fn write_binary(&self, data_dir: &Path, format: Format, step: usize) {
        let dtype = DType::new(format.precision(), self.endianness);
        let encode = |values: &[f64]| {
            let mut bytes = vec![0u8; values.len() * dtype.size()];
            for (chunk, v) in bytes.chunks_mut(dtype.size()).zip(values) {
                dtype.write(chunk, *v);
            }
            bytes
        };

        let ext = format.extension();
        if self.multiple {
            for (var, name) in VARS.iter().enumerate() {
                let path = data_dir.join(format!("{name}.{step:04}.{ext}"));
                fs::write(path, encode(&self.values(step, var))).unwrap();
            }
        } else {
            let bytes: Vec<u8> = (0..VARS.len())
                .flat_map(|var| encode(&self.values(step, var)))
                .collect();
            fs::write(data_dir.join(format!("data.{step:04}.{ext}")), bytes).unwrap();
        }
    }

    fn write_vtk(&self, data_dir: &Path, step: usize) {
        if self.multiple {
            for (var, name) in VARS.iter().enumerate() {
                let path = data_dir.join(format!("{name}.{step:04}.vtk"));
                fs::write(path, self.vtk(step, &[var])).unwrap();
            }
        } else {
            let all: Vec<usize> = (0..VARS.len()).collect();
            fs::write(data_dir.join(format!("data.{step:04}.vtk")), self.vtk(step, &all)).unwrap();
        }
    }

    /// A rectilinear grid legacy VTK file like PLUTO writes it.
    fn vtk(&self, step: usize, vars: &[usize]) -> Vec<u8> {
        let big = DType::new(Precision::Single, Endianness::Big);
        let payload = |out: &mut Vec<u8>, values: &[f64], dtype: DType| {
            if self.ascii {
                let text: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                out.extend_from_slice(text.join(" ").as_bytes());
            } else {
                for v in values {
                    let mut buf = [0u8; 8];
                    dtype.write(&mut buf, *v);
                    out.extend_from_slice(&buf[..dtype.size()]);
                }
            }
            out.push(b'\n');
        };

        let (n1, n2, n3) = self.dims;
        let mut out = Vec::new();
        out.extend_from_slice(b"# vtk DataFile Version 2.0\nPLUTO 4.4 output\n");
        let encoding: &[u8] = if self.ascii { b"ASCII\n" } else { b"BINARY\n" };
        out.extend_from_slice(encoding);
        out.extend_from_slice(b"DATASET RECTILINEAR_GRID\n");

        out.extend_from_slice(b"FIELD FieldData 1\nTIME 1 1 double\n");
        payload(&mut out, &[step as f64], DType::new(Precision::Double, Endianness::Big));

        out.extend_from_slice(format!("DIMENSIONS {} {} {}\n", n1 + 1, n2 + 1, n3 + 1).as_bytes());
        for (axis, n) in ["X", "Y", "Z"].into_iter().zip([n1, n2, n3]) {
            out.extend_from_slice(format!("{axis}_COORDINATES {} float\n", n + 1).as_bytes());
            let coords: Vec<f64> = (0..=n).map(|i| i as f64).collect();
            payload(&mut out, &coords, big);
        }

        out.extend_from_slice(format!("\nCELL_DATA {}\n", n1 * n2 * n3).as_bytes());
        for &var in vars {
            let header = format!("SCALARS {} float\nLOOKUP_TABLE default\n", VARS[var]);
            out.extend_from_slice(header.as_bytes());
            payload(&mut out, &self.values(step, var), big);
            out.push(b'\n');
        }
        out
    }
}
