//! Per-unit conversion pipeline
//!
//! **Stages:** load every source → merge (Merge mode) → middleware chain in
//! caller order → split (Split mode) → dump each project to a staging file.
//!
//! Plugins are resolved and their options validated once, when the pipeline
//! is built at submit time. `run` is blocking and is always called from a
//! worker thread.
//!
//! A failure at any stage ends the unit: the project is passed by value
//! through the chain, so a failed step drops whatever earlier steps produced
//! and nothing partial is ever dumped.

use crate::diagnostics::Diagnostics;
use crate::error::{Error, Result};
use crate::model::{artifact_name, ConversionMode, ConversionSettings, MiddlewareSelection, UnitSpec};
use crate::registry::{
    FormatConverter, Middleware, OptionBlob, OptionRole, PluginRegistry, Project, Unsupported,
};
use std::fs;
use std::sync::Arc;
use svbatch_common::events::{FailureKind, UnitFailure};
use tracing::debug;

/// One produced artifact, read back from staging
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Successful run
#[derive(Debug)]
pub struct PipelineOutput {
    pub artifacts: Vec<Artifact>,
    pub diagnostics: Diagnostics,
}

/// Failed run; warnings raised before the failure are kept
#[derive(Debug)]
pub struct PipelineFailure {
    pub failure: UnitFailure,
    pub diagnostics: Diagnostics,
}

struct ResolvedMiddleware<P: Project> {
    id: String,
    plugin: Arc<dyn Middleware<P>>,
    options: OptionBlob,
}

/// Resolved, validated conversion recipe shared by every unit of a batch
pub struct Pipeline<P: Project> {
    input: Arc<dyn FormatConverter<P>>,
    output: Arc<dyn FormatConverter<P>>,
    middlewares: Vec<ResolvedMiddleware<P>>,
    settings: ConversionSettings,
    output_suffix: String,
}

impl<P: Project> Pipeline<P> {
    /// Resolve plugins and validate option blobs
    ///
    /// Fails structurally on an unknown format or middleware id, rejected
    /// options, or a Split request without a track limit.
    pub fn resolve<R>(registry: &R, settings: &ConversionSettings) -> Result<Self>
    where
        R: PluginRegistry<Project = P> + ?Sized,
    {
        if settings.mode == ConversionMode::Split && settings.max_track_count == 0 {
            return Err(Error::InvalidBatch(
                "split mode requires max_track_count > 0".to_string(),
            ));
        }

        let input = registry
            .resolve_format(&settings.input_format)
            .ok_or_else(|| Error::UnsupportedFormat(settings.input_format.clone()))?;
        let output = registry
            .resolve_format(&settings.output_format)
            .ok_or_else(|| Error::UnsupportedFormat(settings.output_format.clone()))?;

        let input_options = input
            .validate_options(OptionRole::Input, &settings.input_options)
            .map_err(|reason| Error::InvalidOptions {
                plugin: settings.input_format.clone(),
                reason,
            })?;
        let output_options = output
            .validate_options(OptionRole::Output, &settings.output_options)
            .map_err(|reason| Error::InvalidOptions {
                plugin: settings.output_format.clone(),
                reason,
            })?;

        let mut middlewares = Vec::with_capacity(settings.middlewares.len());
        for selection in &settings.middlewares {
            let plugin = registry
                .resolve_middleware(&selection.id)
                .ok_or_else(|| Error::UnsupportedMiddleware(selection.id.clone()))?;
            let options = plugin
                .validate_options(&selection.options)
                .map_err(|reason| Error::InvalidOptions {
                    plugin: selection.id.clone(),
                    reason,
                })?;
            middlewares.push(ResolvedMiddleware {
                id: selection.id.clone(),
                plugin,
                options,
            });
        }

        let output_suffix = output.info().suffix.clone();
        let settings = ConversionSettings {
            input_options,
            output_options,
            middlewares: middlewares
                .iter()
                .map(|m| MiddlewareSelection::new(m.id.clone(), m.options.clone()))
                .collect(),
            ..settings.clone()
        };

        Ok(Self {
            input,
            output,
            middlewares,
            settings,
            output_suffix,
        })
    }

    /// Settings with validated option blobs
    pub fn settings(&self) -> &ConversionSettings {
        &self.settings
    }

    pub fn mode(&self) -> ConversionMode {
        self.settings.mode
    }

    /// Extension of dumped artifacts
    pub fn output_suffix(&self) -> &str {
        &self.output_suffix
    }

    /// Run one unit to completion (blocking)
    pub fn run(&self, unit: &UnitSpec) -> std::result::Result<PipelineOutput, PipelineFailure> {
        let mut diagnostics = Diagnostics::new();
        match self.execute(unit, &mut diagnostics) {
            Ok(artifacts) => Ok(PipelineOutput {
                artifacts,
                diagnostics,
            }),
            Err(failure) => Err(PipelineFailure {
                failure,
                diagnostics,
            }),
        }
    }

    fn execute(
        &self,
        unit: &UnitSpec,
        diagnostics: &mut Diagnostics,
    ) -> std::result::Result<Vec<Artifact>, UnitFailure> {
        let project = self.load(unit, diagnostics)?;
        let project = self.transform(unit, project, diagnostics)?;
        self.dump(unit, project, diagnostics)
    }

    fn load(&self, unit: &UnitSpec, diagnostics: &mut Diagnostics) -> std::result::Result<P, UnitFailure> {
        let mut loaded = Vec::with_capacity(unit.sources.len());
        for source in &unit.sources {
            debug!(unit_id = %unit.id, source = %source.display(), "Loading source");
            let project = self
                .input
                .load(source, &self.settings.input_options, diagnostics)
                .map_err(|e| stage_failure(FailureKind::Load, &source.display().to_string(), &e))?;
            loaded.push(project);
        }

        if self.settings.mode == ConversionMode::Merge {
            debug!(unit_id = %unit.id, count = loaded.len(), "Merging projects");
            return P::merge(loaded).map_err(|e| stage_failure(FailureKind::Merge, "merge", &e));
        }

        loaded
            .pop()
            .ok_or_else(|| UnitFailure::new(FailureKind::Load, "unit has no sources"))
    }

    fn transform(
        &self,
        unit: &UnitSpec,
        mut project: P,
        diagnostics: &mut Diagnostics,
    ) -> std::result::Result<P, UnitFailure> {
        for middleware in &self.middlewares {
            debug!(unit_id = %unit.id, middleware = %middleware.id, "Applying middleware");
            project = middleware
                .plugin
                .process(project, &middleware.options, diagnostics)
                .map_err(|e| stage_failure(FailureKind::Middleware, &middleware.id, &e))?;
        }
        Ok(project)
    }

    fn dump(
        &self,
        unit: &UnitSpec,
        project: P,
        diagnostics: &mut Diagnostics,
    ) -> std::result::Result<Vec<Artifact>, UnitFailure> {
        let parts = match self.settings.mode {
            ConversionMode::Split => {
                let parts = project
                    .split(self.settings.max_track_count)
                    .map_err(|e| stage_failure(FailureKind::Dump, "split", &e))?;
                if parts.is_empty() {
                    return Err(UnitFailure::new(FailureKind::Dump, "split produced no projects"));
                }
                parts
                    .into_iter()
                    .enumerate()
                    .map(|(i, part)| (artifact_name(Some(i + 1), &self.output_suffix), part))
                    .collect()
            }
            ConversionMode::Direct | ConversionMode::Merge => {
                vec![(artifact_name(None, &self.output_suffix), project)]
            }
        };

        let staging = tempfile::Builder::new()
            .prefix("svbatch-")
            .tempdir()
            .map_err(|e| {
                UnitFailure::new(FailureKind::Dump, format!("cannot create staging directory: {}", e))
            })?;

        let mut artifacts = Vec::with_capacity(parts.len());
        for (name, part) in parts {
            let path = staging.path().join(&name);
            debug!(unit_id = %unit.id, artifact = %name, "Dumping artifact");
            self.output
                .dump(&path, &part, &self.settings.output_options, diagnostics)
                .map_err(|e| stage_failure(FailureKind::Dump, &name, &e))?;

            let bytes = fs::read(&path).map_err(|e| {
                UnitFailure::new(FailureKind::Dump, format!("{}: no output written ({})", name, e))
            })?;
            artifacts.push(Artifact { name, bytes });
        }

        Ok(artifacts)
    }
}

/// Map a plugin error to a unit failure, keeping the context chain
fn stage_failure(kind: FailureKind, context: &str, error: &anyhow::Error) -> UnitFailure {
    let kind = if error.downcast_ref::<Unsupported>().is_some() {
        FailureKind::UnsupportedFormat
    } else {
        kind
    };
    UnitFailure::new(kind, format!("{}: {:#}", context, error))
}
