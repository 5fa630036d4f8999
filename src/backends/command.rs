//! External command conversion backend.
//!
//! Runs a program with the staged PDF path substituted into its argument
//! template. Markdown is read from stdout, or from the first `.md` file the
//! program writes into a per-call output directory.

use super::{BackendKind, ConversionBackend};
use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

const INPUT_PLACEHOLDER: &str = "{input}";
const OUTPUT_DIR_PLACEHOLDER: &str = "{output_dir}";

/// Where a command leaves its markdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    Stdout,
    OutputDir,
}

/// Argument templates for one command backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub probe: Vec<String>,
    pub command: Vec<String>,
    pub output: OutputMode,
}

impl CommandSpec {
    /// Stock invocation for each backend. Probe and convert both run through
    /// `python`, so a passing probe means the same install can convert.
    pub fn defaults_for(kind: BackendKind, python: &str) -> Self {
        let import_probe = |module: &str| {
            vec![
                python.to_string(),
                "-c".to_string(),
                format!("import {}", module),
            ]
        };
        let python_argv = |parts: &[&str]| {
            std::iter::once(python)
                .chain(parts.iter().copied())
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
        };

        match kind {
            BackendKind::Pymupdf4llm => Self {
                probe: import_probe("pymupdf4llm"),
                command: python_argv(&[
                    "-c",
                    "import sys, pymupdf4llm; sys.stdout.write(pymupdf4llm.to_markdown(sys.argv[1]))",
                    INPUT_PLACEHOLDER,
                ]),
                output: OutputMode::Stdout,
            },
            BackendKind::Markitdown => Self {
                probe: import_probe("markitdown"),
                command: python_argv(&["-m", "markitdown", INPUT_PLACEHOLDER]),
                output: OutputMode::Stdout,
            },
            BackendKind::Marker => Self {
                probe: import_probe("marker.scripts.convert_single"),
                command: python_argv(&[
                    "-c",
                    "from marker.scripts.convert_single import convert_single_cli; convert_single_cli()",
                    INPUT_PLACEHOLDER,
                    "--output_dir",
                    OUTPUT_DIR_PLACEHOLDER,
                    "--output_format",
                    "markdown",
                ]),
                output: OutputMode::OutputDir,
            },
            BackendKind::Docling => Self {
                probe: import_probe("docling.cli.main"),
                command: python_argv(&[
                    "-c",
                    "from docling.cli.main import app; app()",
                    INPUT_PLACEHOLDER,
                    "--to",
                    "md",
                    "--output",
                    OUTPUT_DIR_PLACEHOLDER,
                ]),
                output: OutputMode::OutputDir,
            },
        }
    }
}

pub struct CommandBackend {
    name: String,
    spec: CommandSpec,
    probe_timeout: Duration,
}

impl CommandBackend {
    pub fn new(
        name: impl Into<String>,
        spec: CommandSpec,
        probe_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let name = name.into();
        if spec.probe.is_empty() {
            anyhow::bail!("{}: probe command is empty", name);
        }
        if spec.command.is_empty() {
            anyhow::bail!("{}: convert command is empty", name);
        }
        if spec.output == OutputMode::OutputDir
            && !spec.command.iter().any(|a| a.contains(OUTPUT_DIR_PLACEHOLDER))
        {
            anyhow::bail!(
                "{}: output_dir mode needs an {} placeholder",
                name,
                OUTPUT_DIR_PLACEHOLDER
            );
        }
        Ok(Self {
            name,
            spec,
            probe_timeout,
        })
    }

    async fn run_checked(&self, argv: &[String]) -> anyhow::Result<Output> {
        let output = run(argv).await?;
        if !output.status.success() {
            anyhow::bail!(failure_message(&output));
        }
        Ok(output)
    }
}

#[async_trait::async_trait]
impl ConversionBackend for CommandBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn probe(&self) -> anyhow::Result<()> {
        tokio::time::timeout(self.probe_timeout, self.run_checked(&self.spec.probe))
            .await
            .map_err(|_| anyhow!("probe timed out after {:?}", self.probe_timeout))??;
        Ok(())
    }

    async fn convert(&self, input: &Path) -> anyhow::Result<String> {
        match self.spec.output {
            OutputMode::Stdout => {
                let argv = substitute(&self.spec.command, input, None);
                let output = self.run_checked(&argv).await?;
                String::from_utf8(output.stdout)
                    .with_context(|| format!("{} wrote non-UTF-8 output", self.name))
            }
            OutputMode::OutputDir => {
                let mut builder = tempfile::Builder::new();
                builder.prefix("pdf2md-out-");
                // Keep the output next to the staged file so it shares its cleanup scope.
                let out_dir = match input.parent() {
                    Some(parent) => builder.tempdir_in(parent),
                    None => builder.tempdir(),
                }
                .context("Failed to create output directory")?;

                let argv = substitute(&self.spec.command, input, Some(out_dir.path()));
                self.run_checked(&argv).await?;

                let md_path = find_markdown(out_dir.path())?
                    .ok_or_else(|| anyhow!("{} produced no markdown file", self.name))?;
                debug!("CommandBackend {}: reading {:?}", self.name, md_path);
                let markdown = tokio::fs::read_to_string(&md_path)
                    .await
                    .with_context(|| format!("Failed to read {:?}", md_path))?;
                Ok(markdown)
            }
        }
    }
}

async fn run(argv: &[String]) -> anyhow::Result<Output> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| anyhow!("empty command"))?;

    info!("Running {} ({} args)", program, args.len());

    Command::new(program)
        .args(args)
        .env("PYTHONIOENCODING", "utf-8")
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!("Failed to spawn {}", program))
}

fn substitute(template: &[String], input: &Path, output_dir: Option<&Path>) -> Vec<String> {
    let input = input.to_string_lossy();
    let output_dir = output_dir.map(|d| d.to_string_lossy().into_owned());
    template
        .iter()
        .map(|arg| {
            let arg = arg.replace(INPUT_PLACEHOLDER, &input);
            match &output_dir {
                Some(dir) => arg.replace(OUTPUT_DIR_PLACEHOLDER, dir),
                None => arg,
            }
        })
        .collect()
}

fn failure_message(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if stderr.is_empty() {
        format!("command exited with {}", output.status)
    } else {
        stderr.to_string()
    }
}

/// First `.md` file under `dir`, depth-first in name order.
fn find_markdown(dir: &Path) -> anyhow::Result<Option<PathBuf>> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to list {:?}", dir))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .collect();
    entries.sort();

    for path in &entries {
        if path.is_file() && path.extension().map(|e| e == "md").unwrap_or(false) {
            return Ok(Some(path.clone()));
        }
    }
    for path in &entries {
        if path.is_dir() {
            if let Some(found) = find_markdown(path)? {
                return Ok(Some(found));
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    fn backend(command: Vec<String>, output: OutputMode) -> CommandBackend {
        CommandBackend::new(
            "test",
            CommandSpec {
                probe: vec!["true".to_string()],
                command,
                output,
            },
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_substitute_placeholders() {
        let template = vec![
            "tool".to_string(),
            "{input}".to_string(),
            "--out={output_dir}".to_string(),
        ];
        let argv = substitute(&template, Path::new("/tmp/a.pdf"), Some(Path::new("/tmp/out")));
        assert_eq!(argv, vec!["tool", "/tmp/a.pdf", "--out=/tmp/out"]);
    }

    #[test]
    fn test_output_dir_mode_requires_placeholder() {
        let result = CommandBackend::new(
            "docling",
            CommandSpec {
                probe: vec!["true".to_string()],
                command: vec!["docling".to_string(), "{input}".to_string()],
                output: OutputMode::OutputDir,
            },
            Duration::from_secs(1),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_default_commands_share_the_interpreter() {
        let python = "/opt/venv/bin/python";
        for kind in BackendKind::ALL {
            let spec = CommandSpec::defaults_for(kind, python);
            assert_eq!(spec.probe[0], python, "{} probe", kind);
            assert_eq!(spec.command[0], python, "{} command", kind);
            assert!(spec.command.iter().any(|a| a == INPUT_PLACEHOLDER), "{} input", kind);
        }
    }

    #[test]
    fn test_defaults_use_configured_python() {
        let spec = CommandSpec::defaults_for(BackendKind::Marker, "/opt/venv/bin/python");
        assert_eq!(spec.probe[0], "/opt/venv/bin/python");
        assert_eq!(spec.output, OutputMode::OutputDir);
        assert!(spec.command.iter().any(|a| a == OUTPUT_DIR_PLACEHOLDER));
    }

    #[tokio::test]
    async fn test_probe_success_and_failure() {
        let ok = backend(vec!["cat".to_string()], OutputMode::Stdout);
        assert!(ok.probe().await.is_ok());

        let failing = CommandBackend::new(
            "failing",
            CommandSpec {
                probe: vec!["false".to_string()],
                command: vec!["cat".to_string()],
                output: OutputMode::Stdout,
            },
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(failing.probe().await.is_err());
    }

    #[tokio::test]
    async fn test_probe_spawn_error() {
        let missing = CommandBackend::new(
            "missing",
            CommandSpec {
                probe: vec!["definitely-not-a-real-program-pdf2md".to_string()],
                command: vec!["cat".to_string()],
                output: OutputMode::Stdout,
            },
            Duration::from_secs(5),
        )
        .unwrap();
        let err = missing.probe().await.unwrap_err();
        assert!(err.to_string().contains("Failed to spawn"));
    }

    #[tokio::test]
    async fn test_convert_from_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("doc.pdf");
        std::fs::write(&input, "# Title\n\nbody").unwrap();

        let b = backend(
            vec!["cat".to_string(), "{input}".to_string()],
            OutputMode::Stdout,
        );
        let markdown = b.convert(&input).await.unwrap();
        assert_eq!(markdown, "# Title\n\nbody");
    }

    #[tokio::test]
    async fn test_convert_failure_carries_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("doc.pdf");
        std::fs::write(&input, "x").unwrap();

        let b = backend(sh("echo 'broken xref table' >&2; exit 3"), OutputMode::Stdout);
        let err = b.convert(&input).await.unwrap_err();
        assert_eq!(err.to_string(), "broken xref table");
    }

    #[tokio::test]
    async fn test_convert_from_output_dir_and_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("doc.pdf");
        std::fs::write(&input, "x").unwrap();

        let mut command = sh("mkdir -p \"$1/doc\" && printf '## Page 1' > \"$1/doc/doc.md\"");
        command.push("sh".to_string());
        command.push("{output_dir}".to_string());

        let b = backend(command, OutputMode::OutputDir);
        let markdown = b.convert(&input).await.unwrap();
        assert_eq!(markdown, "## Page 1");

        // Only the staged input is left behind.
        let remaining: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(remaining.len(), 1);
    }

    #[tokio::test]
    async fn test_output_dir_without_markdown_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("doc.pdf");
        std::fs::write(&input, "x").unwrap();

        let mut command = sh("touch \"$1/doc.json\"");
        command.push("sh".to_string());
        command.push("{output_dir}".to_string());

        let b = backend(command, OutputMode::OutputDir);
        let err = b.convert(&input).await.unwrap_err();
        assert!(err.to_string().contains("produced no markdown file"));
    }
}
