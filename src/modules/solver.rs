//! Solver modules.

use anyhow::{bail, ensure};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::param;
use crate::registry::{LocalCatalog, Module};
use crate::schema::{ParamSchema, ParamSpec, Params};

pub fn catalog() -> LocalCatalog {
    LocalCatalog::new("solver")
        .register::<FlowSolver>("flowSolver")
        .register::<TimeIntegrator>("timeIntegrator")
}

#[derive(Debug, Clone, Deserialize)]
struct Turbulence {
    model: String,
    intensity: f64,
}

/// Steady flow solver
#[derive(Debug)]
pub struct FlowSolver {
    cfl: f64,
    max_iterations: u64,
    tolerance: f64,
    turbulence: Turbulence,
    residual: Option<f64>,
}

impl Module for FlowSolver {
    fn param_schema() -> ParamSchema {
        let turbulence = ParamSchema::builder()
            .param(
                "model",
                ParamSpec::string()
                    .with_enum(["laminar", "k-epsilon", "k-omega-sst"])
                    .with_default("laminar"),
            )
            .param(
                "intensity",
                ParamSpec::number().with_range(0.0, 1.0).with_default(0.05),
            )
            .build();

        ParamSchema::builder()
            .param(
                "cfl",
                ParamSpec::number()
                    .with_range(0.0, 10.0)
                    .with_default(0.5)
                    .described("Courant number"),
            )
            .param(
                "maxIterations",
                ParamSpec::integer().with_range(1.0, 1_000_000.0).with_default(1000),
            )
            .param(
                "tolerance",
                ParamSpec::number().with_minimum(0.0).with_default(1e-6),
            )
            .param(
                "turbulence",
                ParamSpec::object()
                    .with_properties(turbulence)
                    .with_default(json!({ "model": "laminar", "intensity": 0.05 })),
            )
            .build()
    }

    fn construct(params: &Params) -> anyhow::Result<Self> {
        Ok(Self {
            cfl: param(params, "cfl")?,
            max_iterations: param(params, "maxIterations")?,
            tolerance: param(params, "tolerance")?,
            turbulence: param(params, "turbulence")?,
            residual: None,
        })
    }

    fn initialize(&mut self) -> anyhow::Result<()> {
        ensure!(self.cfl > 0.0, "CFL number must be positive");
        self.residual = Some(1.0);
        debug!(model = %self.turbulence.model, "solver initialized");
        Ok(())
    }

    fn execute(&mut self) -> anyhow::Result<()> {
        let Some(mut residual) = self.residual else {
            bail!("solver executed before initialization");
        };

        // Each sweep is modelled as a fixed contraction of the residual.
        let factor = 1.0 / (1.0 + self.cfl);
        let mut iterations = 0;
        while residual > self.tolerance && iterations < self.max_iterations {
            residual *= factor;
            iterations += 1;
        }
        self.residual = Some(residual);

        info!(
            iterations,
            residual,
            converged = residual <= self.tolerance,
            turbulence = %self.turbulence.model,
            intensity = self.turbulence.intensity,
            "solver finished"
        );
        Ok(())
    }
}

/// Transient time stepping
#[derive(Debug)]
pub struct TimeIntegrator {
    scheme: String,
    dt: f64,
    steps: u64,
    time: f64,
}

impl Module for TimeIntegrator {
    fn param_schema() -> ParamSchema {
        ParamSchema::builder()
            .param(
                "scheme",
                ParamSpec::string()
                    .with_enum(["euler", "rk4", "bdf2"])
                    .with_default("euler"),
            )
            .param(
                "dt",
                ParamSpec::number()
                    .with_minimum(0.0)
                    .with_default(0.001)
                    .described("Time step in seconds"),
            )
            .param(
                "steps",
                ParamSpec::integer().with_minimum(1.0).with_default(100),
            )
            .build()
    }

    fn construct(params: &Params) -> anyhow::Result<Self> {
        Ok(Self {
            scheme: param(params, "scheme")?,
            dt: param(params, "dt")?,
            steps: param(params, "steps")?,
            time: 0.0,
        })
    }

    fn initialize(&mut self) -> anyhow::Result<()> {
        ensure!(self.dt > 0.0, "time step must be positive");
        self.time = 0.0;
        Ok(())
    }

    fn execute(&mut self) -> anyhow::Result<()> {
        self.time += self.dt * self.steps as f64;
        info!(scheme = %self.scheme, steps = self.steps, time = self.time, "time integration done");
        Ok(())
    }
}
