use crate::topology::{NonbondedMethod, PairParameters, System};
use crate::units::COULOMB;
use nalgebra::Vector3;
use rayon::prelude::*;

/// Below this many pairs the serial loop wins over rayon's scheduling.
const PARALLEL_PAIR_THRESHOLD: usize = 2048;

pub(super) struct NonbondedEvaluation {
    pub lennard_jones: f64,
    pub coulomb: f64,
    pub forces: Vec<Vector3<f64>>,
}

impl NonbondedEvaluation {
    fn zeros(n: usize) -> Self {
        NonbondedEvaluation {
            lennard_jones: 0.0,
            coulomb: 0.0,
            forces: vec![Vector3::zeros(); n],
        }
    }

    fn merge(mut self, other: Self) -> Self {
        self.lennard_jones += other.lennard_jones;
        self.coulomb += other.coulomb;
        for (f, g) in self.forces.iter_mut().zip(&other.forces) {
            *f += g;
        }
        self
    }

    fn accumulate(&mut self, pair: &PairParameters, positions: &[Vector3<f64>], cutoff2: f64) {
        let d = positions[pair.i] - positions[pair.j];
        let r2 = d.norm_squared();
        if r2 > cutoff2 {
            return;
        }

        let inv_r2 = 1.0 / r2;
        let sr2 = pair.sigma * pair.sigma * inv_r2;
        let sr6 = sr2 * sr2 * sr2;
        let sr12 = sr6 * sr6;
        let lj = 4.0 * pair.epsilon * (sr12 - sr6);
        let lj_virial = 24.0 * pair.epsilon * (2.0 * sr12 - sr6);

        let inv_r = inv_r2.sqrt();
        let coulomb = COULOMB * pair.charge_product * inv_r;

        // (−dU/dr)/r for both terms
        let f = d * ((lj_virial + coulomb) * inv_r2);
        self.forces[pair.i] += f;
        self.forces[pair.j] -= f;
        self.lennard_jones += lj;
        self.coulomb += coulomb;
    }
}

pub(super) fn evaluate(system: &System, positions: &[Vector3<f64>]) -> NonbondedEvaluation {
    let n = system.n_atoms();
    let cutoff2 = match system.nonbonded().method {
        NonbondedMethod::NoCutoff => f64::INFINITY,
        NonbondedMethod::CutoffNonPeriodic { cutoff } => cutoff * cutoff,
    };
    let pairs = system.pairs();

    if pairs.len() < PARALLEL_PAIR_THRESHOLD {
        let mut acc = NonbondedEvaluation::zeros(n);
        for pair in pairs {
            acc.accumulate(pair, positions, cutoff2);
        }
        return acc;
    }

    pairs
        .par_iter()
        .fold(
            || NonbondedEvaluation::zeros(n),
            |mut acc, pair| {
                acc.accumulate(pair, positions, cutoff2);
                acc
            },
        )
        .reduce(|| NonbondedEvaluation::zeros(n), NonbondedEvaluation::merge)
}
