//! Result output modules.

use anyhow::ensure;
use serde_json::json;
use tracing::info;

use super::param;
use crate::registry::{LocalCatalog, Module};
use crate::schema::{ParamSchema, ParamSpec, Params};

pub fn catalog() -> LocalCatalog {
    LocalCatalog::new("output").register::<ResultWriter>("resultWriter")
}

/// Writes solution fields
#[derive(Debug)]
pub struct ResultWriter {
    directory: String,
    format: String,
    fields: Vec<String>,
    every_n_steps: u64,
    written: usize,
}

impl Module for ResultWriter {
    fn param_schema() -> ParamSchema {
        ParamSchema::builder()
            .param(
                "directory",
                ParamSpec::string().with_default("results"),
            )
            .param(
                "format",
                ParamSpec::string()
                    .with_enum(["vtk", "csv", "hdf5"])
                    .with_default("vtk"),
            )
            .param(
                "fields",
                ParamSpec::array()
                    .with_items(ParamSpec::string().with_enum(["pressure", "velocity", "temperature"]))
                    .with_default(json!(["pressure", "velocity"])),
            )
            .param(
                "everyNSteps",
                ParamSpec::integer().with_minimum(1.0).with_default(10),
            )
            .build()
    }

    fn construct(params: &Params) -> anyhow::Result<Self> {
        Ok(Self {
            directory: param(params, "directory")?,
            format: param(params, "format")?,
            fields: param(params, "fields")?,
            every_n_steps: param(params, "everyNSteps")?,
            written: 0,
        })
    }

    fn initialize(&mut self) -> anyhow::Result<()> {
        ensure!(!self.fields.is_empty(), "no fields selected for output");
        Ok(())
    }

    fn execute(&mut self) -> anyhow::Result<()> {
        for field in &self.fields {
            info!(
                directory = %self.directory,
                format = %self.format,
                field = %field,
                every = self.every_n_steps,
                "writing field"
            );
        }
        self.written += self.fields.len();
        Ok(())
    }

    fn release(&mut self) -> anyhow::Result<()> {
        info!(fields = self.written, "result writer closed");
        Ok(())
    }
}
