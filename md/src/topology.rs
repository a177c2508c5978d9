//! Topology store and the frozen [`System`] the engine simulates.
//!
//! A [`SystemBuilder`] collects atoms and bonded terms, validates every index
//! and parameter, derives the nonbonded exclusion and 1-4 lists from the bond
//! graph and hands back an immutable [`System`].

use crate::error::{MdError, Result};
use periodic_table_on_an_enum::Element;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet, VecDeque};

/// One atom and its per-atom force-field parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Atom {
    pub index: usize,
    pub symbol: String,
    pub atomic_number: u32,
    /// Mass in amu.
    pub mass: f64,
    /// Partial charge in e.
    pub charge: f64,
    /// Lennard-Jones sigma in nm.
    pub sigma: f64,
    /// Lennard-Jones well depth in kJ/mol.
    pub epsilon: f64,
}

impl Atom {
    pub fn is_hydrogen(&self) -> bool {
        self.atomic_number == 1
    }
}

/// Harmonic bond `½k(r−r₀)²`, or a rigid constraint when `constrained` is set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bond {
    pub i: usize,
    pub j: usize,
    /// Equilibrium length in nm.
    pub length: f64,
    /// Force constant in kJ/mol/nm².
    pub k: f64,
    pub constrained: bool,
}

/// Harmonic angle `½k(θ−θ₀)²` centred on atom `j`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Angle {
    pub i: usize,
    pub j: usize,
    pub k: usize,
    /// Equilibrium angle in radians.
    pub theta0: f64,
    /// Force constant in kJ/mol/rad².
    pub force_constant: f64,
}

/// Periodic torsion `k(1+cos(nφ−φ₀))` about the `j`–`k` bond.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Torsion {
    pub i: usize,
    pub j: usize,
    pub k: usize,
    pub l: usize,
    pub periodicity: u32,
    /// Phase in radians.
    pub phase: f64,
    /// Amplitude in kJ/mol.
    pub amplitude: f64,
}

/// Fixed distance between two atoms, derived from constrained bonds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Constraint {
    pub i: usize,
    pub j: usize,
    pub distance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombiningRule {
    /// Arithmetic mean of sigma, geometric mean of epsilon.
    #[default]
    LorentzBerthelot,
    /// Geometric mean of both sigma and epsilon.
    Geometric,
}

impl CombiningRule {
    pub fn combine(self, a: &Atom, b: &Atom) -> (f64, f64) {
        let epsilon = (a.epsilon * b.epsilon).sqrt();
        let sigma = match self {
            CombiningRule::LorentzBerthelot => 0.5 * (a.sigma + b.sigma),
            CombiningRule::Geometric => (a.sigma * b.sigma).sqrt(),
        };
        (sigma, epsilon)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum NonbondedMethod {
    /// Every non-excluded pair interacts.
    #[default]
    NoCutoff,
    /// Plain truncation at `cutoff` nm, no periodic images.
    CutoffNonPeriodic { cutoff: f64 },
}

/// Which bonds are turned into rigid constraints when the system is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintMode {
    /// Only bonds added with [`SystemBuilder::add_constraint`].
    #[default]
    None,
    /// Every bond involving a hydrogen atom.
    HBonds,
    /// Every bond.
    AllBonds,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NonbondedSettings {
    #[serde(default)]
    pub method: NonbondedMethod,
    #[serde(default)]
    pub combining_rule: CombiningRule,
    #[serde(default = "default_coulomb14_scale")]
    pub coulomb14_scale: f64,
    #[serde(default = "default_lj14_scale")]
    pub lj14_scale: f64,
}

fn default_coulomb14_scale() -> f64 {
    1.0 / 1.2
}

fn default_lj14_scale() -> f64 {
    0.5
}

impl Default for NonbondedSettings {
    fn default() -> Self {
        NonbondedSettings {
            method: NonbondedMethod::NoCutoff,
            combining_rule: CombiningRule::LorentzBerthelot,
            coulomb14_scale: default_coulomb14_scale(),
            lj14_scale: default_lj14_scale(),
        }
    }
}

/// Precomputed parameters for one interacting nonbonded pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairParameters {
    pub i: usize,
    pub j: usize,
    pub sigma: f64,
    /// Scaled well depth (1-4 scaling already applied).
    pub epsilon: f64,
    /// Scaled charge product q_i·q_j.
    pub charge_product: f64,
}

/// Immutable description of atoms and their connectivity.
#[derive(Debug, Clone)]
pub struct Topology {
    atoms: Vec<Atom>,
    bonds: Vec<Bond>,
}

impl Topology {
    pub fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    pub fn bonds(&self) -> &[Bond] {
        &self.bonds
    }

    pub fn n_atoms(&self) -> usize {
        self.atoms.len()
    }

    pub fn check_index(&self, index: usize) -> Result<()> {
        if index < self.atoms.len() {
            Ok(())
        } else {
            Err(MdError::Topology(format!(
                "atom index {} out of range for {} atoms",
                index,
                self.atoms.len()
            )))
        }
    }

    /// Atoms bonded to each atom, indexed by atom.
    pub fn neighbors(&self) -> Vec<Vec<usize>> {
        let mut neighbors = vec![Vec::new(); self.atoms.len()];
        for bond in &self.bonds {
            neighbors[bond.i].push(bond.j);
            neighbors[bond.j].push(bond.i);
        }
        neighbors
    }
}

/// Everything the force field, constraint solver and integrators need.
/// Built once by [`SystemBuilder`] and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct System {
    topology: Topology,
    angles: Vec<Angle>,
    torsions: Vec<Torsion>,
    constraints: Vec<Constraint>,
    nonbonded: NonbondedSettings,
    pairs: Vec<PairParameters>,
    masses: Vec<f64>,
    inv_masses: Vec<f64>,
}

impl System {
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn n_atoms(&self) -> usize {
        self.topology.n_atoms()
    }

    pub fn atoms(&self) -> &[Atom] {
        self.topology.atoms()
    }

    /// Harmonic (non-constrained) bonds.
    pub fn harmonic_bonds(&self) -> impl Iterator<Item = &Bond> {
        self.topology.bonds.iter().filter(|b| !b.constrained)
    }

    pub fn angles(&self) -> &[Angle] {
        &self.angles
    }

    pub fn torsions(&self) -> &[Torsion] {
        &self.torsions
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn nonbonded(&self) -> &NonbondedSettings {
        &self.nonbonded
    }

    /// Interacting nonbonded pairs with exclusions removed and 1-4 scaling applied.
    pub fn pairs(&self) -> &[PairParameters] {
        &self.pairs
    }

    pub fn masses(&self) -> &[f64] {
        &self.masses
    }

    pub fn inverse_masses(&self) -> &[f64] {
        &self.inv_masses
    }

    pub fn total_mass(&self) -> f64 {
        self.masses.iter().sum()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SystemBuilder {
    atoms: Vec<Atom>,
    bonds: Vec<Bond>,
    angles: Vec<Angle>,
    torsions: Vec<Torsion>,
    exclusions: Vec<(usize, usize)>,
    nonbonded: NonbondedSettings,
    constraint_mode: ConstraintMode,
}

impl SystemBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an atom and return its index.
    pub fn add_atom(
        &mut self,
        element: Element,
        mass: f64,
        charge: f64,
        sigma: f64,
        epsilon: f64,
    ) -> usize {
        let index = self.atoms.len();
        self.atoms.push(Atom {
            index,
            symbol: element.get_symbol().to_string(),
            atomic_number: element.get_atomic_number() as u32,
            mass,
            charge,
            sigma,
            epsilon,
        });
        index
    }

    pub fn add_bond(&mut self, i: usize, j: usize, length: f64, k: f64) -> &mut Self {
        self.bonds.push(Bond {
            i,
            j,
            length,
            k,
            constrained: false,
        });
        self
    }

    /// Add a rigid bond of fixed `length` nm.
    pub fn add_constraint(&mut self, i: usize, j: usize, length: f64) -> &mut Self {
        self.bonds.push(Bond {
            i,
            j,
            length,
            k: 0.0,
            constrained: true,
        });
        self
    }

    pub fn add_angle(&mut self, i: usize, j: usize, k: usize, theta0: f64, force_constant: f64) -> &mut Self {
        self.angles.push(Angle {
            i,
            j,
            k,
            theta0,
            force_constant,
        });
        self
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_torsion(
        &mut self,
        i: usize,
        j: usize,
        k: usize,
        l: usize,
        periodicity: u32,
        phase: f64,
        amplitude: f64,
    ) -> &mut Self {
        self.torsions.push(Torsion {
            i,
            j,
            k,
            l,
            periodicity,
            phase,
            amplitude,
        });
        self
    }

    /// Exclude a pair from nonbonded interactions in addition to the bonded neighbours.
    pub fn exclude(&mut self, i: usize, j: usize) -> &mut Self {
        self.exclusions.push((i, j));
        self
    }

    pub fn nonbonded(&mut self, settings: NonbondedSettings) -> &mut Self {
        self.nonbonded = settings;
        self
    }

    pub fn constraint_mode(&mut self, mode: ConstraintMode) -> &mut Self {
        self.constraint_mode = mode;
        self
    }

    /// Turn every bond involving a hydrogen into a rigid constraint.
    pub fn constrain_hydrogen_bonds(&mut self) -> &mut Self {
        self.constraint_mode(ConstraintMode::HBonds)
    }

    pub fn build(&self) -> Result<System> {
        let n = self.atoms.len();
        if n == 0 {
            return Err(MdError::Topology("system has no atoms".to_string()));
        }
        for atom in &self.atoms {
            if !(atom.mass.is_finite() && atom.mass > 0.0) {
                return Err(MdError::Topology(format!(
                    "atom {} ({}) must have a positive mass, got {}",
                    atom.index, atom.symbol, atom.mass
                )));
            }
            if !atom.charge.is_finite() || !(atom.sigma >= 0.0) || !(atom.epsilon >= 0.0) {
                return Err(MdError::Topology(format!(
                    "atom {} ({}) has invalid nonbonded parameters",
                    atom.index, atom.symbol
                )));
            }
        }

        let mut bonds = self.bonds.clone();
        for bond in &mut bonds {
            check_term(n, &[bond.i, bond.j], "bond")?;
            if !(bond.length.is_finite() && bond.length > 0.0) {
                return Err(MdError::Topology(format!(
                    "bond {}-{} must have a positive length",
                    bond.i, bond.j
                )));
            }
            let involves_hydrogen = self.atoms[bond.i].is_hydrogen() || self.atoms[bond.j].is_hydrogen();
            bond.constrained |= match self.constraint_mode {
                ConstraintMode::None => false,
                ConstraintMode::HBonds => involves_hydrogen,
                ConstraintMode::AllBonds => true,
            };
            if !bond.constrained && !(bond.k.is_finite() && bond.k >= 0.0) {
                return Err(MdError::Topology(format!(
                    "bond {}-{} has an invalid force constant {}",
                    bond.i, bond.j, bond.k
                )));
            }
        }
        for angle in &self.angles {
            check_term(n, &[angle.i, angle.j, angle.k], "angle")?;
        }
        for torsion in &self.torsions {
            check_term(n, &[torsion.i, torsion.j, torsion.k, torsion.l], "torsion")?;
        }
        for &(i, j) in &self.exclusions {
            check_term(n, &[i, j], "exclusion")?;
        }
        if let NonbondedMethod::CutoffNonPeriodic { cutoff } = self.nonbonded.method {
            if !(cutoff > 0.0) {
                return Err(MdError::Configuration("nonbonded cutoff must be positive".to_string()));
            }
        }

        let mut constraints = Vec::new();
        let mut constrained_pairs = HashSet::new();
        for bond in bonds.iter().filter(|b| b.constrained) {
            if !constrained_pairs.insert(ordered(bond.i, bond.j)) {
                return Err(MdError::Topology(format!(
                    "duplicate constraint between atoms {} and {}",
                    bond.i, bond.j
                )));
            }
            constraints.push(Constraint {
                i: bond.i,
                j: bond.j,
                distance: bond.length,
            });
        }

        let topology = Topology {
            atoms: self.atoms.clone(),
            bonds,
        };
        let pairs = self.pair_parameters(&topology);
        let masses: Vec<f64> = topology.atoms.iter().map(|a| a.mass).collect();
        let inv_masses = masses.iter().map(|&m| 1.0 / m).collect();

        tracing::debug!(
            "Built system: {} atoms, {} bonds, {} constraints, {} angles, {} torsions, {} nonbonded pairs",
            n,
            topology.bonds.len(),
            constraints.len(),
            self.angles.len(),
            self.torsions.len(),
            pairs.len()
        );

        Ok(System {
            topology,
            angles: self.angles.clone(),
            torsions: self.torsions.clone(),
            constraints,
            nonbonded: self.nonbonded,
            pairs,
            masses,
            inv_masses,
        })
    }

    /// Walk the bond graph: 1-2 and 1-3 neighbours are excluded, 1-4 neighbours
    /// are scaled, everything else interacts fully.
    fn pair_parameters(&self, topology: &Topology) -> Vec<PairParameters> {
        let n = topology.n_atoms();
        let neighbors = topology.neighbors();
        let mut excluded: HashSet<(usize, usize)> =
            self.exclusions.iter().map(|&(i, j)| ordered(i, j)).collect();
        let mut one_four = BTreeSet::new();

        for start in 0..n {
            let mut depth = vec![usize::MAX; n];
            depth[start] = 0;
            let mut queue = VecDeque::from([start]);
            while let Some(atom) = queue.pop_front() {
                if depth[atom] == 3 {
                    continue;
                }
                for &next in &neighbors[atom] {
                    if depth[next] == usize::MAX {
                        depth[next] = depth[atom] + 1;
                        queue.push_back(next);
                    }
                }
            }
            for (other, &d) in depth.iter().enumerate().skip(start + 1) {
                match d {
                    1 | 2 => {
                        excluded.insert((start, other));
                    }
                    3 => {
                        one_four.insert((start, other));
                    }
                    _ => {}
                }
            }
        }

        let rule = self.nonbonded.combining_rule;
        let atoms = topology.atoms();
        let mut pairs = Vec::with_capacity(n * n.saturating_sub(1) / 2);
        for i in 0..n {
            for j in (i + 1)..n {
                if excluded.contains(&(i, j)) {
                    continue;
                }
                let (sigma, mut epsilon) = rule.combine(&atoms[i], &atoms[j]);
                let mut charge_product = atoms[i].charge * atoms[j].charge;
                if one_four.contains(&(i, j)) {
                    epsilon *= self.nonbonded.lj14_scale;
                    charge_product *= self.nonbonded.coulomb14_scale;
                }
                if epsilon == 0.0 && charge_product == 0.0 {
                    continue;
                }
                pairs.push(PairParameters {
                    i,
                    j,
                    sigma,
                    epsilon,
                    charge_product,
                });
            }
        }
        pairs
    }
}

fn ordered(i: usize, j: usize) -> (usize, usize) {
    if i < j {
        (i, j)
    } else {
        (j, i)
    }
}

fn check_term(n_atoms: usize, indices: &[usize], what: &str) -> Result<()> {
    for (a, &index) in indices.iter().enumerate() {
        if index >= n_atoms {
            return Err(MdError::Topology(format!(
                "{} references atom {} but the system has {} atoms",
                what, index, n_atoms
            )));
        }
        if indices[..a].contains(&index) {
            return Err(MdError::Topology(format!(
                "{} {:?} repeats atom {}",
                what, indices, index
            )));
        }
    }
    Ok(())
}
