//! Post-processing of recorded trajectories.

use crate::error::{MdError, Result};
use crate::topology::Topology;
use crate::trajectory::{DcdHeader, TrajectoryReader};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Euclidean distance between two points.
pub fn distance(a: &Vector3<f64>, b: &Vector3<f64>) -> f64 {
    (a - b).norm()
}

/// Angle at `b` formed by `a`-`b`-`c`, in radians within [0, π].
pub fn bond_angle(a: &Vector3<f64>, b: &Vector3<f64>, c: &Vector3<f64>) -> f64 {
    let u = a - b;
    let v = c - b;
    u.cross(&v).norm().atan2(u.dot(&v))
}

/// Signed dihedral between the planes (a, b, c) and (b, c, d), in (−π, π].
pub fn dihedral(a: &Vector3<f64>, b: &Vector3<f64>, c: &Vector3<f64>, d: &Vector3<f64>) -> f64 {
    let b1 = b - a;
    let b2 = c - b;
    let b3 = d - c;
    let n1 = b1.cross(&b2);
    let n2 = b2.cross(&b3);
    let phi = (b2.norm() * b1.dot(&n2)).atan2(n1.dot(&n2));
    if phi <= -PI {
        PI
    } else {
        phi
    }
}

/// A per-frame geometric quantity over a fixed tuple of atoms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Observable {
    /// Distance in nm.
    Distance([usize; 2]),
    /// Bond angle in radians.
    Angle([usize; 3]),
    /// Dihedral angle in radians.
    Dihedral([usize; 4]),
}

impl Observable {
    pub fn atoms(&self) -> &[usize] {
        match self {
            Observable::Distance(a) => a,
            Observable::Angle(a) => a,
            Observable::Dihedral(a) => a,
        }
    }

    pub fn evaluate(&self, positions: &[Vector3<f64>]) -> f64 {
        match *self {
            Observable::Distance([i, j]) => distance(&positions[i], &positions[j]),
            Observable::Angle([i, j, k]) => bond_angle(&positions[i], &positions[j], &positions[k]),
            Observable::Dihedral([i, j, k, l]) => {
                dihedral(&positions[i], &positions[j], &positions[k], &positions[l])
            }
        }
    }

    fn validate(&self, n_atoms: usize) -> Result<()> {
        let atoms = self.atoms();
        for (n, &a) in atoms.iter().enumerate() {
            if a >= n_atoms {
                return Err(MdError::Topology(format!(
                    "{} references atom {} but the trajectory has {} atoms",
                    self, a, n_atoms
                )));
            }
            if atoms[..n].contains(&a) {
                return Err(MdError::Topology(format!("{} repeats atom {}", self, a)));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Observable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (name, atoms) = match self {
            Observable::Distance(a) => ("distance", &a[..]),
            Observable::Angle(a) => ("angle", &a[..]),
            Observable::Dihedral(a) => ("dihedral", &a[..]),
        };
        let atoms: Vec<String> = atoms.iter().map(|a| a.to_string()).collect();
        write!(f, "{}({})", name, atoms.join("-"))
    }
}

/// Computes observables over a DCD trajectory that belongs to a known topology.
///
/// Every query re-opens the file and streams it, so results are produced
/// lazily and each query starts from the first frame.
#[derive(Debug, Clone)]
pub struct TrajectoryAnalyzer {
    path: PathBuf,
    header: DcdHeader,
}

impl TrajectoryAnalyzer {
    pub fn open<P: AsRef<Path>>(path: P, topology: &Topology) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let reader = TrajectoryReader::open(&path)?;
        if reader.n_atoms() != topology.n_atoms() {
            return Err(MdError::Topology(format!(
                "{} has {} atoms but the topology has {}",
                path.display(),
                reader.n_atoms(),
                topology.n_atoms()
            )));
        }
        Ok(TrajectoryAnalyzer {
            header: reader.header().clone(),
            path,
        })
    }

    pub fn header(&self) -> &DcdHeader {
        &self.header
    }

    /// Stream the frames from the beginning.
    pub fn frames(&self) -> Result<TrajectoryReader<BufReader<File>>> {
        TrajectoryReader::open(&self.path)
    }

    pub fn observable(&self, observable: Observable) -> Result<impl Iterator<Item = Result<f64>>> {
        observable.validate(self.header.n_atoms)?;
        let frames = self.frames()?;
        Ok(frames.map(move |frame| frame.map(|f| observable.evaluate(&f.positions))))
    }

    pub fn distances(&self, i: usize, j: usize) -> Result<impl Iterator<Item = Result<f64>>> {
        self.observable(Observable::Distance([i, j]))
    }

    pub fn angles(&self, i: usize, j: usize, k: usize) -> Result<impl Iterator<Item = Result<f64>>> {
        self.observable(Observable::Angle([i, j, k]))
    }

    pub fn dihedrals(&self, i: usize, j: usize, k: usize, l: usize) -> Result<impl Iterator<Item = Result<f64>>> {
        self.observable(Observable::Dihedral([i, j, k, l]))
    }

    /// Evaluate an observable over the whole trajectory.
    pub fn collect(&self, observable: Observable) -> Result<Vec<f64>> {
        self.observable(observable)?.collect()
    }
}

/// Equal-width histogram over the observed range of a set of values.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    edges: Vec<f64>,
    counts: Vec<usize>,
}

impl Histogram {
    pub fn new(values: &[f64], bins: usize) -> Result<Self> {
        if bins == 0 {
            return Err(MdError::Configuration("Histogram needs at least one bin".to_string()));
        }
        if values.is_empty() {
            return Err(MdError::Configuration("Histogram needs at least one value".to_string()));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(MdError::NumericalInstability(
                "cannot histogram non-finite values".to_string(),
            ));
        }

        let mut lo = values.iter().copied().fold(f64::INFINITY, f64::min);
        let mut hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if hi == lo {
            lo -= 0.5;
            hi += 0.5;
        }
        let width = (hi - lo) / bins as f64;
        let edges = (0..=bins).map(|b| lo + b as f64 * width).collect();

        let mut counts = vec![0; bins];
        for &v in values {
            let bin = (((v - lo) / width) as usize).min(bins - 1);
            counts[bin] += 1;
        }
        Ok(Histogram { edges, counts })
    }

    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    pub fn counts(&self) -> &[usize] {
        &self.counts
    }

    pub fn bins(&self) -> usize {
        self.counts.len()
    }

    pub fn bin_width(&self) -> f64 {
        self.edges[1] - self.edges[0]
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    pub fn centers(&self) -> Vec<f64> {
        self.edges.windows(2).map(|w| 0.5 * (w[0] + w[1])).collect()
    }

    /// Probability densities; they integrate to one over the range.
    pub fn densities(&self) -> Vec<f64> {
        let norm = self.total() as f64 * self.bin_width();
        self.counts.iter().map(|&c| c as f64 / norm).collect()
    }
}
