//! JSON project definitions.
//!
//! ```json
//! {
//!   "name": "rosenbrock",
//!   "algorithm": "rosenbrock-v2",
//!   "password": "secret",
//!   "inputs": [
//!     { "name": "X", "type": "double", "start": -2.0, "end": 2.0, "steps": 40 },
//!     { "name": "A", "type": "double", "start": 1e-3, "end": 10.0, "steps": 4, "spacing": "logarithmic" }
//!   ],
//!   "outputs": [{ "name": "E", "type": "double" }],
//!   "densify": {
//!     "dimensions": ["X"],
//!     "target": "E",
//!     "passes": 3,
//!     "keep_fraction": 0.05,
//!     "amplification": 8.0
//!   },
//!   "reject_non_finite": true
//! }
//! ```
//!
//! A dimension whose `start` equals its `end` is a constant repeated
//! `steps` times.

use anyhow::Context;
use cascade::{Dimension, Project, RejectNonFinite, Sequencer, Spacing, ValueRange, VarKind};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpacingDef {
    #[default]
    Linear,
    Logarithmic,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputDef {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: VarKind,
    pub start: f64,
    pub end: f64,
    pub steps: usize,
    #[serde(default)]
    pub spacing: SpacingDef,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputDef {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: VarKind,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DensifyDef {
    pub dimensions: Vec<String>,
    pub target: String,
    pub passes: u32,
    pub keep_fraction: f64,
    pub amplification: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectDef {
    pub name: String,
    #[serde(default)]
    pub algorithm: String,
    pub password: String,
    pub inputs: Vec<InputDef>,
    pub outputs: Vec<OutputDef>,
    #[serde(default)]
    pub densify: Option<DensifyDef>,
    #[serde(default)]
    pub reject_non_finite: bool,
}

impl ProjectDef {
    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        serde_json::from_str(raw).context("malformed project definition")
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read project file {}", path.display()))?;
        Self::from_json(&raw)
    }

    /// Validates the definition and builds the project.
    pub fn build(self) -> anyhow::Result<Project> {
        let mut dimensions = Vec::with_capacity(self.inputs.len());
        for input in self.inputs {
            let spacing = match input.spacing {
                SpacingDef::Linear => Spacing::Linear,
                SpacingDef::Logarithmic => Spacing::Logarithmic,
            };
            let range = ValueRange::new(input.start, input.end, Some(input.steps), spacing)
                .with_context(|| format!("invalid range for input '{}'", input.name))?;
            dimensions.push(Dimension::new(input.name, input.kind, range)?);
        }
        let sequencer = Sequencer::new(dimensions)?;

        let mut builder = Project::builder(self.name, sequencer)
            .algorithm(self.algorithm)
            .password(self.password);
        for output in self.outputs {
            builder = builder.output(output.name, output.kind);
        }
        if let Some(d) = self.densify {
            builder = builder.densify(
                d.dimensions,
                d.target,
                d.passes,
                d.keep_fraction,
                d.amplification,
            );
        }
        if self.reject_non_finite {
            builder = builder.validator(RejectNonFinite);
        }
        Ok(builder.build()?)
    }
}
