//! Project definition: what to enumerate, what comes back, how to narrow.

use crate::{
    error::{Error, Result},
    sequencer::Sequencer,
    value::{Record, Schema, Value, VarKind, is_identifier},
};
use alloc::boxed::Box;
use core::fmt;

/// Project-level acceptance rules for combinations and results.
///
/// Both hooks default to accepting everything.
pub trait Validator: Send + Sync {
    /// Called on every fresh combination before it is handed out. A
    /// rejected combination is skipped for good.
    fn validate_input(&self, _combination: &Record) -> bool {
        true
    }

    /// Called on the merged input and output record of a submission.
    fn validate_output(&self, _record: &Record) -> bool {
        true
    }
}

/// Accepts every combination and every result.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl Validator for AcceptAll {}

/// Rejects results carrying NaN or infinite numbers.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectNonFinite;

impl Validator for RejectNonFinite {
    fn validate_output(&self, record: &Record) -> bool {
        record.values().all(Value::is_finite)
    }
}

/// Densification settings.
#[derive(Debug, Clone, PartialEq)]
pub struct DensifyConfig {
    /// Input dimensions that get narrowed.
    pub schema: Schema,
    /// Variable ranked in descending order to pick the kept records.
    pub target: String,
    /// Number of densification passes after the initial sweep.
    pub passes: u32,
    /// Fraction of records kept per pass, in `(0, 1]`.
    pub keep_fraction: f64,
    /// Growth of the sub-grid volume relative to the previous grid.
    pub amplification: f64,
}

/// A fully validated search project.
pub struct Project {
    name: String,
    algorithm: String,
    password: String,
    sequencer: Sequencer,
    inputs: Schema,
    outputs: Schema,
    densify: Option<DensifyConfig>,
    validator: Box<dyn Validator>,
}

impl fmt::Debug for Project {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Project")
            .field("name", &self.name)
            .field("algorithm", &self.algorithm)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("densify", &self.densify)
            .finish_non_exhaustive()
    }
}

impl Project {
    pub fn builder(name: impl Into<String>, sequencer: Sequencer) -> ProjectBuilder {
        ProjectBuilder {
            name: name.into(),
            algorithm: String::new(),
            password: String::new(),
            sequencer,
            outputs: Vec::new(),
            densify: None,
            validator: Box::new(AcceptAll),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn check_password(&self, key: &str) -> bool {
        self.password == key
    }

    pub fn sequencer(&self) -> &Sequencer {
        &self.sequencer
    }

    pub(crate) fn sequencer_mut(&mut self) -> &mut Sequencer {
        &mut self.sequencer
    }

    pub fn inputs(&self) -> &Schema {
        &self.inputs
    }

    pub fn outputs(&self) -> &Schema {
        &self.outputs
    }

    /// Inputs followed by outputs: the columns of a stored record.
    pub fn full_schema(&self) -> Schema {
        let mut all = self.inputs.clone();
        for (name, kind) in self.outputs.iter() {
            // Overlap was rejected at build time.
            let _ = all.push(name, kind);
        }
        all
    }

    pub const fn densify(&self) -> Option<&DensifyConfig> {
        self.densify.as_ref()
    }

    /// Number of densification passes allowed.
    pub fn densify_passes(&self) -> u32 {
        self.densify.as_ref().map_or(0, |d| d.passes)
    }

    pub fn validator(&self) -> &dyn Validator {
        self.validator.as_ref()
    }
}

/// Builder returned by [`Project::builder`].
pub struct ProjectBuilder {
    name: String,
    algorithm: String,
    password: String,
    sequencer: Sequencer,
    outputs: Vec<(String, VarKind)>,
    densify: Option<(Vec<String>, String, u32, f64, f64)>,
    validator: Box<dyn Validator>,
}

impl ProjectBuilder {
    pub fn algorithm(mut self, algorithm: impl Into<String>) -> Self {
        self.algorithm = algorithm.into();
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn output(mut self, name: impl Into<String>, kind: VarKind) -> Self {
        self.outputs.push((name.into(), kind));
        self
    }

    /// Enables densification over `dimensions`, ranking by `target`.
    pub fn densify<I, S>(
        mut self,
        dimensions: I,
        target: impl Into<String>,
        passes: u32,
        keep_fraction: f64,
        amplification: f64,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.densify = Some((
            dimensions.into_iter().map(Into::into).collect(),
            target.into(),
            passes,
            keep_fraction,
            amplification,
        ));
        self
    }

    pub fn validator(mut self, validator: impl Validator + 'static) -> Self {
        self.validator = Box::new(validator);
        self
    }

    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when:
    /// - the project name is not a plain identifier,
    /// - input and output names overlap,
    /// - the densification settings are inconsistent.
    pub fn build(self) -> Result<Project> {
        if !is_identifier(&self.name) {
            return Err(Error::config(format!(
                "project name '{}' is not a valid identifier",
                self.name
            )));
        }

        let inputs = self.sequencer.schema();
        if inputs.is_empty() {
            return Err(Error::config("project has no input dimension"));
        }
        let outputs = Schema::from_fields(self.outputs)?;
        let all = inputs.merged(&outputs)?;

        let densify = match self.densify {
            None => None,
            Some((dims, target, passes, keep_fraction, amplification)) => {
                let mut schema = Schema::new();
                for name in dims {
                    let Some(kind) = inputs.get(&name) else {
                        return Err(Error::config(format!(
                            "densification variable '{name}' is not an input"
                        )));
                    };
                    if !kind.is_numeric() {
                        return Err(Error::config(format!(
                            "densification variable '{name}' is not numeric"
                        )));
                    }
                    schema.push(name, kind)?;
                }
                match all.get(&target) {
                    Some(kind) if kind.is_numeric() => {}
                    Some(_) => {
                        return Err(Error::config(format!(
                            "densification target '{target}' is not numeric"
                        )));
                    }
                    None => {
                        return Err(Error::config(format!(
                            "densification target '{target}' is not a project variable"
                        )));
                    }
                }
                if !(keep_fraction > 0.0 && keep_fraction <= 1.0) {
                    return Err(Error::config(format!(
                        "keep fraction must be in (0, 1] (got {keep_fraction})"
                    )));
                }
                if !(amplification.is_finite() && amplification > 0.0) {
                    return Err(Error::config(format!(
                        "amplification must be positive (got {amplification})"
                    )));
                }
                Some(DensifyConfig {
                    schema,
                    target,
                    passes,
                    keep_fraction,
                    amplification,
                })
            }
        };

        Ok(Project {
            name: self.name,
            algorithm: self.algorithm,
            password: self.password,
            sequencer: self.sequencer,
            inputs,
            outputs,
            densify,
            validator: self.validator,
        })
    }
}
