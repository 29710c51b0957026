//! Command-line plugins
//!
//! A plugin is an external program invoked once per operation:
//!
//! | Operation | Command line | stdin | stdout |
//! |---|---|---|---|
//! | load | `<program> <args..> load <path>` | options | project |
//! | dump | `<program> <args..> dump <path>` | `{project, options}` | ignored |
//! | process | `<program> <args..> process` | `{project, options}` | project |
//!
//! All payloads are JSON. stderr lines starting with `warning:` become
//! non-fatal diagnostics; a non-zero exit fails the operation with the rest
//! of stderr as the message.

use crate::config::CommandPluginConfig;
use crate::project::TrackDocument;
use anyhow::{bail, Context};
use serde::Serialize;
use serde_json::Value;
use std::io::{ErrorKind, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use svbatch_core::{
    Diagnostics, FormatConverter, Middleware, OptionBlob, OptionRole, PluginInfo,
};
use tracing::debug;

const WARNING_PREFIX: &str = "warning:";

/// Payload for `dump` and `process`
#[derive(Serialize)]
struct Envelope<'a> {
    project: &'a TrackDocument,
    options: &'a OptionBlob,
}

/// Runs one plugin program
#[derive(Debug, Clone)]
pub struct CommandRunner {
    program: String,
    args: Vec<String>,
}

impl CommandRunner {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Run `verb` with `input` on stdin and return stdout
    pub fn run(
        &self,
        verb: &str,
        path: Option<&Path>,
        input: &[u8],
        diagnostics: &mut Diagnostics,
    ) -> anyhow::Result<Vec<u8>> {
        let mut command = Command::new(&self.program);
        command.args(&self.args).arg(verb);
        if let Some(path) = path {
            command.arg(path);
        }

        debug!(program = %self.program, verb, "Running plugin command");

        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to start {}", self.program))?;

        // Feed stdin from a separate thread so a plugin that writes before it
        // reads cannot deadlock on a full pipe
        let stdin = child.stdin.take();
        let output = std::thread::scope(|scope| {
            if let Some(mut stdin) = stdin {
                scope.spawn(move || {
                    if let Err(e) = stdin.write_all(input) {
                        // Plugins that ignore stdin may exit before reading it
                        if e.kind() != ErrorKind::BrokenPipe {
                            debug!("Plugin stdin write failed: {}", e);
                        }
                    }
                });
            }
            child.wait_with_output()
        })
        .with_context(|| format!("failed to wait for {}", self.program))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut errors = Vec::new();
        for line in stderr.lines() {
            match line.strip_prefix(WARNING_PREFIX) {
                Some(warning) => diagnostics.warn(warning),
                None if !line.trim().is_empty() => errors.push(line.trim()),
                None => {}
            }
        }

        if !output.status.success() {
            let code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            if errors.is_empty() {
                bail!("{} {} exited with {}", self.program, verb, code);
            }
            bail!("{} {} exited with {}: {}", self.program, verb, code, errors.join("; "));
        }

        Ok(output.stdout)
    }
}

fn parse_project(stdout: &[u8], verb: &str) -> anyhow::Result<TrackDocument> {
    serde_json::from_slice(stdout).with_context(|| format!("{} produced an invalid project", verb))
}

fn plugin_info(id: &str, config: &CommandPluginConfig, format: bool) -> PluginInfo {
    let info = if format {
        PluginInfo::format(id, config.suffix.clone().unwrap_or_default())
    } else {
        PluginInfo::middleware(id)
    };
    match &config.name {
        Some(name) => info.with_name(name.clone()),
        None => info,
    }
}

/// Format converter backed by an external program
pub struct CommandFormat {
    info: PluginInfo,
    runner: CommandRunner,
    input_defaults: Value,
    output_defaults: Value,
}

impl CommandFormat {
    pub fn new(id: &str, config: &CommandPluginConfig) -> Self {
        Self {
            info: plugin_info(id, config, true),
            runner: CommandRunner::new(config.program.clone(), config.args.clone()),
            input_defaults: config.input_options.clone(),
            output_defaults: config.output_options.clone(),
        }
    }
}

impl FormatConverter<TrackDocument> for CommandFormat {
    fn info(&self) -> &PluginInfo {
        &self.info
    }

    fn default_options(&self, role: OptionRole) -> OptionBlob {
        let defaults = match role {
            OptionRole::Input => &self.input_defaults,
            OptionRole::Output => &self.output_defaults,
        };
        match defaults {
            Value::Null => Value::Object(Default::default()),
            other => other.clone(),
        }
    }

    fn load(
        &self,
        path: &Path,
        options: &OptionBlob,
        diagnostics: &mut Diagnostics,
    ) -> anyhow::Result<TrackDocument> {
        let input = serde_json::to_vec(options)?;
        let stdout = self.runner.run("load", Some(path), &input, diagnostics)?;
        parse_project(&stdout, "load")
    }

    fn dump(
        &self,
        path: &Path,
        project: &TrackDocument,
        options: &OptionBlob,
        diagnostics: &mut Diagnostics,
    ) -> anyhow::Result<()> {
        let input = serde_json::to_vec(&Envelope { project, options })?;
        self.runner.run("dump", Some(path), &input, diagnostics)?;
        Ok(())
    }
}

/// Middleware backed by an external program
pub struct CommandMiddleware {
    info: PluginInfo,
    runner: CommandRunner,
    defaults: Value,
}

impl CommandMiddleware {
    pub fn new(id: &str, config: &CommandPluginConfig) -> Self {
        Self {
            info: plugin_info(id, config, false),
            runner: CommandRunner::new(config.program.clone(), config.args.clone()),
            defaults: config.input_options.clone(),
        }
    }
}

impl Middleware<TrackDocument> for CommandMiddleware {
    fn info(&self) -> &PluginInfo {
        &self.info
    }

    fn default_options(&self) -> OptionBlob {
        match &self.defaults {
            Value::Null => Value::Object(Default::default()),
            other => other.clone(),
        }
    }

    fn process(
        &self,
        project: TrackDocument,
        options: &OptionBlob,
        diagnostics: &mut Diagnostics,
    ) -> anyhow::Result<TrackDocument> {
        let input = serde_json::to_vec(&Envelope {
            project: &project,
            options,
        })?;
        let stdout = self.runner.run("process", None, &input, diagnostics)?;
        parse_project(&stdout, "process")
    }
}
