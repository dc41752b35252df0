/// Command execution for git and make invocations
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::ffi::OsStr;
use std::fmt;
use std::process::{ExitStatus, Stdio};
use tokio::process::Command;
use tracing::debug;

/// Result from command execution with captured output
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: ExitStatus,
}

impl CommandOutput {
    fn from_output(output: std::process::Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            status: output.status,
        }
    }

    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Return stdout if successful, otherwise error with exit status and stderr
    pub fn into_result(self) -> Result<String> {
        if self.success() {
            Ok(self.stdout)
        } else {
            anyhow::bail!("exited with {}: {}", self.status, self.stderr.trim())
        }
    }
}

/// Builder for executing external commands with common patterns
pub struct CommandBuilder {
    command: Command,
    display: String,
    context_msg: Option<String>,
}

impl CommandBuilder {
    /// Create a new command builder
    pub fn new<S: AsRef<OsStr>>(program: S) -> Self {
        let display = program.as_ref().to_string_lossy().to_string();
        let mut command = Command::new(program);
        command.stdout(Stdio::piped()).stderr(Stdio::piped());
        Self {
            command,
            display,
            context_msg: None,
        }
    }

    /// Build a command from an [`Invocation`]
    pub fn from_invocation(invocation: &Invocation) -> Self {
        let mut builder = Self::new(&invocation.program).args(&invocation.args);
        for (key, val) in &invocation.envs {
            builder = builder.env(key, val);
        }
        builder
    }

    /// Add a single argument
    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.display.push(' ');
        self.display.push_str(&arg.as_ref().to_string_lossy());
        self.command.arg(arg);
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self = self.arg(arg);
        }
        self
    }

    /// Set an environment variable
    pub fn env<K, V>(mut self, key: K, val: V) -> Self
    where
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.command.env(key, val);
        self
    }

    /// Set context message for error reporting
    pub fn context<S: Into<String>>(mut self, msg: S) -> Self {
        self.context_msg = Some(msg.into());
        self
    }

    /// Execute and return raw output
    pub async fn output(mut self) -> Result<CommandOutput> {
        debug!("exec (captured): {}", self.display);
        let output = if let Some(ctx) = &self.context_msg {
            self.command.output().await.context(ctx.clone())?
        } else {
            self.command.output().await?
        };
        Ok(CommandOutput::from_output(output))
    }

    /// Execute and return stdout on success, error on failure
    pub async fn run(self) -> Result<String> {
        let display = self.display.clone();
        self.output()
            .await?
            .into_result()
            .with_context(|| format!("`{}` failed", display))
    }

    /// Execute with stdout/stderr streamed to the terminal, error on non-zero exit
    pub async fn run_streaming(mut self) -> Result<()> {
        debug!("exec (streaming): {}", self.display);
        self.command.stdout(Stdio::inherit()).stderr(Stdio::inherit());

        let status = if let Some(ctx) = &self.context_msg {
            self.command.status().await.context(ctx.clone())?
        } else {
            self.command.status().await?
        };

        if !status.success() {
            anyhow::bail!("`{}` exited with {}", self.display, status);
        }
        Ok(())
    }
}

/// A single external command: program, arguments and extra environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, val: impl Into<String>) -> Self {
        self.envs.push((key.into(), val.into()));
        self
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Something that can execute an [`Invocation`]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run with output streamed, failing on non-zero exit
    async fn run(&self, invocation: &Invocation) -> Result<()>;

    /// Run with output captured, returning stdout
    async fn output(&self, invocation: &Invocation) -> Result<String>;
}

/// Runs invocations as real child processes
pub struct ShellRunner;

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, invocation: &Invocation) -> Result<()> {
        CommandBuilder::from_invocation(invocation)
            .context(format!("Failed to spawn {}", invocation.program))
            .run_streaming()
            .await
    }

    async fn output(&self, invocation: &Invocation) -> Result<String> {
        CommandBuilder::from_invocation(invocation)
            .context(format!("Failed to spawn {}", invocation.program))
            .run()
            .await
    }
}

/// Check if a command-line tool is installed
pub async fn check_tool_installed(
    tool_name: &str,
    version_args: &[&str],
    install_url: &str,
) -> Result<()> {
    let output = CommandBuilder::new(tool_name)
        .args(version_args)
        .output()
        .await;

    match output {
        Ok(out) if out.success() => Ok(()),
        _ => anyhow::bail!(
            "{} is not installed or not in PATH. Please install from {}",
            tool_name,
            install_url
        ),
    }
}
