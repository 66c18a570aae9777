//! Mesh input modules.

use anyhow::bail;
use tracing::info;

use super::param;
use crate::registry::{LocalCatalog, Module};
use crate::schema::{ParamSchema, ParamSpec, Params};

pub fn catalog() -> LocalCatalog {
    LocalCatalog::new("mesh")
        .register::<MeshReader>("meshReader")
        .register::<MeshPartitioner>("meshPartitioner")
}

/// Reads a mesh file
#[derive(Debug)]
pub struct MeshReader {
    path: String,
    format: String,
    scale: f64,
    opened: bool,
}

impl Module for MeshReader {
    fn param_schema() -> ParamSchema {
        ParamSchema::builder()
            .param(
                "path",
                ParamSpec::string()
                    .with_default("mesh/cavity.msh")
                    .required()
                    .described("Mesh file to read"),
            )
            .param(
                "format",
                ParamSpec::string()
                    .with_enum(["gmsh", "openfoam", "cgns"])
                    .with_default("gmsh"),
            )
            .param(
                "scale",
                ParamSpec::number()
                    .with_minimum(0.0)
                    .with_default(1.0)
                    .described("Factor applied to every node coordinate"),
            )
            .build()
    }

    fn construct(params: &Params) -> anyhow::Result<Self> {
        Ok(Self {
            path: param(params, "path")?,
            format: param(params, "format")?,
            scale: param(params, "scale")?,
            opened: false,
        })
    }

    fn initialize(&mut self) -> anyhow::Result<()> {
        if self.path.trim().is_empty() {
            bail!("mesh path is empty");
        }
        if self.scale == 0.0 {
            bail!("a scale of 0 collapses the mesh");
        }
        self.opened = true;
        Ok(())
    }

    fn execute(&mut self) -> anyhow::Result<()> {
        if !self.opened {
            bail!("mesh '{}' was never opened", self.path);
        }
        info!(path = %self.path, format = %self.format, scale = self.scale, "reading mesh");
        Ok(())
    }

    fn release(&mut self) -> anyhow::Result<()> {
        self.opened = false;
        Ok(())
    }
}

/// Splits the mesh for parallel runs
#[derive(Debug)]
pub struct MeshPartitioner {
    partitions: u32,
    method: String,
}

impl Module for MeshPartitioner {
    fn param_schema() -> ParamSchema {
        ParamSchema::builder()
            .param(
                "partitions",
                ParamSpec::integer().with_range(1.0, 4096.0).with_default(1),
            )
            .param(
                "method",
                ParamSpec::string()
                    .with_enum(["metis", "scotch", "simple"])
                    .with_default("metis"),
            )
            .build()
    }

    fn construct(params: &Params) -> anyhow::Result<Self> {
        Ok(Self {
            partitions: param(params, "partitions")?,
            method: param(params, "method")?,
        })
    }

    fn execute(&mut self) -> anyhow::Result<()> {
        if self.partitions == 1 {
            info!("single partition, nothing to split");
        } else {
            info!(partitions = self.partitions, method = %self.method, "partitioning mesh");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: serde_json::Value) -> Params {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_reader_lifecycle() {
        let schema = MeshReader::param_schema();
        let mut reader = MeshReader::construct(&schema.defaults()).unwrap();
        reader.initialize().unwrap();
        reader.execute().unwrap();
        reader.release().unwrap();
        assert!(!reader.opened);
    }

    #[test]
    fn test_reader_rejects_zero_scale() {
        let schema = MeshReader::param_schema();
        let supplied = schema.with_defaults(&params(json!({ "scale": 0.0 })));
        let mut reader = MeshReader::construct(&supplied).unwrap();
        assert!(reader.initialize().is_err());
    }

    #[test]
    fn test_reader_execute_requires_initialize() {
        let schema = MeshReader::param_schema();
        let mut reader = MeshReader::construct(&schema.defaults()).unwrap();
        assert!(reader.execute().is_err());
    }

    #[test]
    fn test_partitioner_schema_bounds() {
        let errors = MeshPartitioner::param_schema().validate(&params(json!({ "partitions": 0 })));
        assert_eq!(errors.len(), 1);
    }
}
