use crate::config::SystemParams;
use color_eyre::eyre::{eyre, Result, WrapErr};
use md_engine::{System, SystemBuilder};
use nalgebra::Vector3;
use periodic_table_on_an_enum::Element;
use tracing::info;

/// The built system together with its starting coordinates.
pub struct PreparedSystem {
    pub system: System,
    pub positions: Vec<Vector3<f64>>,
}

/// Build the system described in the job file. Angles in the file are in
/// degrees and converted here.
pub fn build_system(params: &SystemParams) -> Result<PreparedSystem> {
    info!("\nPreparing system...");

    let mut builder = SystemBuilder::new();
    let mut positions = Vec::with_capacity(params.atoms.len());
    for atom in &params.atoms {
        let element =
            Element::from_symbol(&atom.element).ok_or_else(|| eyre!("Invalid element symbol: {}", atom.element))?;
        builder.add_atom(element, atom.mass, atom.charge, atom.sigma, atom.epsilon);
        positions.push(Vector3::new(atom.position[0], atom.position[1], atom.position[2]));
    }

    for bond in &params.bonds {
        let [i, j] = bond.atoms;
        builder.add_bond(i, j, bond.length, bond.k);
    }
    for angle in &params.angles {
        let [i, j, k] = angle.atoms;
        builder.add_angle(i, j, k, angle.theta0.to_radians(), angle.k);
    }
    for torsion in &params.torsions {
        let [i, j, k, l] = torsion.atoms;
        builder.add_torsion(i, j, k, l, torsion.periodicity, torsion.phase.to_radians(), torsion.amplitude);
    }
    for &[i, j] in &params.exclusions {
        builder.exclude(i, j);
    }
    builder.nonbonded(params.nonbonded).constraint_mode(params.constraints);

    let system = builder.build().wrap_err("Invalid system description")?;
    info!(
        "  {} atoms, {} bonds ({} constrained), {} angles, {} torsions, {} nonbonded pairs",
        system.n_atoms(),
        system.topology().bonds().len(),
        system.constraints().len(),
        system.angles().len(),
        system.torsions().len(),
        system.pairs().len()
    );

    Ok(PreparedSystem { system, positions })
}
