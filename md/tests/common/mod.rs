//! Small molecules shared by the integration tests.

#![allow(dead_code)]

use md_engine::config::{EquilibrationConfig, ProductionConfig};
use md_engine::{
    Femtoseconds, InversePicoseconds, Kelvin, MinimizerSettings, SimulationConfig, System, SystemBuilder,
};
use nalgebra::Vector3;
use periodic_table_on_an_enum::Element;
use std::path::Path;

/// United-atom butane: CH3-CH2-CH2-CH3 with a threefold torsion.
pub fn butane() -> (System, Vec<Vector3<f64>>) {
    let mut builder = SystemBuilder::new();
    let c0 = builder.add_atom(Element::Carbon, 15.035, 0.0, 0.3905, 0.7322);
    let c1 = builder.add_atom(Element::Carbon, 14.027, 0.0, 0.3905, 0.4937);
    let c2 = builder.add_atom(Element::Carbon, 14.027, 0.0, 0.3905, 0.4937);
    let c3 = builder.add_atom(Element::Carbon, 15.035, 0.0, 0.3905, 0.7322);
    let theta0 = 112.0_f64.to_radians();
    builder
        .add_bond(c0, c1, 0.153, 2.5e5)
        .add_bond(c1, c2, 0.153, 2.5e5)
        .add_bond(c2, c3, 0.153, 2.5e5)
        .add_angle(c0, c1, c2, theta0, 500.0)
        .add_angle(c1, c2, c3, theta0, 500.0)
        .add_torsion(c0, c1, c2, c3, 3, 0.0, 5.9);
    let positions = vec![
        Vector3::new(0.0, 0.0, 0.0),
        Vector3::new(0.09, 0.125, 0.0),
        Vector3::new(0.24, 0.125, 0.01),
        Vector3::new(0.33, 0.25, 0.0),
    ];
    (builder.build().unwrap(), positions)
}

/// All-atom methane with rigid C-H bonds.
pub fn methane() -> (System, Vec<Vector3<f64>>) {
    let mut builder = SystemBuilder::new();
    let c = builder.add_atom(Element::Carbon, 12.011, -0.24, 0.34, 0.4577);
    let directions = [
        Vector3::new(1.0, 1.0, 1.0),
        Vector3::new(1.0, -1.0, -1.0),
        Vector3::new(-1.0, 1.0, -1.0),
        Vector3::new(-1.0, -1.0, 1.0),
    ];
    let mut positions = vec![Vector3::zeros()];
    let mut hydrogens = Vec::new();
    for d in &directions {
        let h = builder.add_atom(Element::Hydrogen, 1.008, 0.06, 0.25, 0.125);
        builder.add_bond(c, h, 0.109, 2.8e5);
        positions.push(d.normalize() * 0.109);
        hydrogens.push(h);
    }
    let theta0 = 109.47_f64.to_radians();
    for a in 0..hydrogens.len() {
        for b in (a + 1)..hydrogens.len() {
            builder.add_angle(hydrogens[a], c, hydrogens[b], theta0, 276.0);
        }
    }
    builder.constrain_hydrogen_bonds();
    (builder.build().unwrap(), positions)
}

pub fn config(trajectory: &Path) -> SimulationConfig {
    SimulationConfig {
        temperature: Kelvin(150.0),
        friction: InversePicoseconds(1.0),
        timestep: Femtoseconds(1.0),
        constraint_tolerance: 1e-5,
        constraint_max_iterations: 500,
        minimization: MinimizerSettings::default(),
        equilibration: EquilibrationConfig {
            steps: 100,
            report_interval: 50,
        },
        production: ProductionConfig {
            steps: 200,
            report_interval: 100,
            trajectory_interval: 20,
            trajectory: trajectory.to_path_buf(),
        },
        seed: Some(2024),
        remove_com_motion: true,
        strict_reporters: false,
    }
}

/// Split console output into the equilibration and production tables,
/// dropping the header lines.
pub fn split_tables(console: &[u8]) -> (Vec<String>, Vec<String>) {
    let text = String::from_utf8(console.to_vec()).unwrap();
    let mut tables: Vec<Vec<String>> = Vec::new();
    for line in text.lines() {
        if line.starts_with('#') {
            tables.push(Vec::new());
        } else if let Some(table) = tables.last_mut() {
            table.push(line.to_string());
        }
    }
    let production = if tables.len() > 1 { tables.remove(1) } else { Vec::new() };
    let equilibration = if tables.is_empty() { Vec::new() } else { tables.remove(0) };
    (equilibration, production)
}
