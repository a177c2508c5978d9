use crate::topology::{Angle, Bond, Torsion};
use nalgebra::Vector3;

const MIN_SIN_THETA: f64 = 1e-8;

/// Accumulates the force of one harmonic bond and returns its energy.
pub(super) fn harmonic_bond(bond: &Bond, positions: &[Vector3<f64>], forces: &mut [Vector3<f64>]) -> f64 {
    let d = positions[bond.j] - positions[bond.i];
    let r = d.norm();
    let dr = r - bond.length;

    // F_i points along +d when stretched
    let f = d * (bond.k * dr / r);
    forces[bond.i] += f;
    forces[bond.j] -= f;

    0.5 * bond.k * dr * dr
}

pub(super) fn harmonic_angle(angle: &Angle, positions: &[Vector3<f64>], forces: &mut [Vector3<f64>]) -> f64 {
    let a = positions[angle.i] - positions[angle.j];
    let b = positions[angle.k] - positions[angle.j];
    let (ra, rb) = (a.norm(), b.norm());
    let (a_hat, b_hat) = (a / ra, b / rb);

    let cos_theta = a_hat.dot(&b_hat).clamp(-1.0, 1.0);
    let theta = cos_theta.acos();
    let sin_theta = (1.0 - cos_theta * cos_theta).sqrt().max(MIN_SIN_THETA);
    let dtheta = theta - angle.theta0;

    let prefactor = angle.force_constant * dtheta;
    // dθ/dr_i and dθ/dr_k
    let grad_i = (a_hat * cos_theta - b_hat) / (ra * sin_theta);
    let grad_k = (b_hat * cos_theta - a_hat) / (rb * sin_theta);

    let f_i = -grad_i * prefactor;
    let f_k = -grad_k * prefactor;
    forces[angle.i] += f_i;
    forces[angle.k] += f_k;
    forces[angle.j] -= f_i + f_k;

    0.5 * angle.force_constant * dtheta * dtheta
}

pub(super) fn periodic_torsion(
    torsion: &Torsion,
    positions: &[Vector3<f64>],
    forces: &mut [Vector3<f64>],
) -> f64 {
    let r_ij = positions[torsion.i] - positions[torsion.j];
    let r_kj = positions[torsion.k] - positions[torsion.j];
    let r_kl = positions[torsion.k] - positions[torsion.l];

    let m = r_ij.cross(&r_kj);
    let n = r_kj.cross(&r_kl);
    let (m2, n2) = (m.norm_squared(), n.norm_squared());
    let kj2 = r_kj.norm_squared();
    if m2 < 1e-24 || n2 < 1e-24 {
        // collinear atoms, dihedral undefined
        return torsion.amplitude * (1.0 + (-torsion.phase).cos());
    }

    let phi = dihedral_sign(&r_ij, &n) * m.cross(&n).norm().atan2(m.dot(&n));
    let periodicity = torsion.periodicity as f64;
    let arg = periodicity * phi - torsion.phase;
    let ddphi = -torsion.amplitude * periodicity * arg.sin();

    let kj = kj2.sqrt();
    let f_i = m * (-ddphi * kj / m2);
    let f_l = n * (ddphi * kj / n2);
    let p = r_ij.dot(&r_kj) / kj2;
    let q = r_kl.dot(&r_kj) / kj2;
    let s = f_i * p - f_l * q;

    forces[torsion.i] += f_i;
    forces[torsion.j] -= f_i - s;
    forces[torsion.k] -= f_l + s;
    forces[torsion.l] += f_l;

    torsion.amplitude * (1.0 + arg.cos())
}

fn dihedral_sign(r_ij: &Vector3<f64>, n: &Vector3<f64>) -> f64 {
    if r_ij.dot(n) < 0.0 {
        -1.0
    } else {
        1.0
    }
}
