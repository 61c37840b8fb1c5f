use anyhow::{Context, Result, anyhow};
use std::process::{Command, Output};
use tracing::{debug, trace};

/// A builder for executing external commands with unified error handling
pub struct Cmd {
    program: String,
    args: Vec<String>,
}

impl Cmd {
    /// Create a new command builder
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Add a single argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    fn command_line(&self) -> String {
        format!("{} {}", self.program, self.args.join(" "))
    }

    fn output(&self) -> Result<Output> {
        Command::new(&self.program)
            .args(&self.args)
            .output()
            .with_context(|| format!("Failed to execute command: {}", self.command_line()))
    }

    /// Execute the command and return the output.
    /// Returns an error if the command fails (non-zero exit code)
    pub fn run(self) -> Result<Output> {
        trace!(program = %self.program, args = ?self.args, "cmd:run start");

        let output = self.output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!(
                program = %self.program,
                args = ?self.args,
                status = ?output.status.code(),
                stderr = %stderr.trim(),
                "cmd:run failure"
            );
            return Err(anyhow!(
                "Command failed: {}\n{}",
                self.command_line(),
                stderr.trim()
            ));
        }
        trace!(program = %self.program, "cmd:run success");
        Ok(output)
    }

    /// Execute the command and return stdout as a trimmed string
    pub fn run_and_capture_stdout(self) -> Result<String> {
        let output = self.run()?;
        Ok(String::from_utf8(output.stdout)?.trim().to_string())
    }

    /// Execute the command and return stdout and stderr combined, regardless of exit status.
    /// Container logs are written to both streams.
    pub fn run_and_capture_all(self) -> Result<String> {
        trace!(program = %self.program, args = ?self.args, "cmd:capture start");
        let output = self.output()?;
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        trace!(
            program = %self.program,
            success = output.status.success(),
            "cmd:capture result"
        );
        Ok(text)
    }
}
