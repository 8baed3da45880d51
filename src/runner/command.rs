use anyhow::{Context, Result};
use std::fmt;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// An external command as an argument vector; never passed through a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    /// Written to the child's stdin, which is then closed.
    pub stdin: Option<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Build a tokio command with every stream piped.
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);
        cmd
    }
}

/// Shell-like rendering for notices and logs. Environment values are omitted
/// so credentials never end up in the transcript.
impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&quote(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", quote(arg))?;
        }
        Ok(())
    }
}

fn quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Result of a short, fully-buffered command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Captured {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl Captured {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Run a command to completion and collect its output.
///
/// Used for quick queries; long-running actions go through the runner.
pub async fn capture(spec: &CommandSpec) -> Result<Captured> {
    let mut child = spec
        .to_command()
        .spawn()
        .with_context(|| format!("spawn {}", spec.program))?;

    if let (Some(input), Some(mut stdin)) = (spec.stdin.as_deref(), child.stdin.take()) {
        stdin
            .write_all(input.as_bytes())
            .await
            .with_context(|| format!("write stdin of {}", spec.program))?;
    }

    let output = child
        .wait_with_output()
        .await
        .with_context(|| format!("wait for {}", spec.program))?;

    Ok(Captured {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_quotes_only_when_needed() {
        let spec = CommandSpec::new("migasfree")
            .arg("-ip")
            .arg("gimp inkscape")
            .env("_LOGIN_MP_PASS", "secret");
        assert_eq!(spec.to_string(), "migasfree -ip 'gimp inkscape'");
        assert_eq!(CommandSpec::new("echo").arg("it's").to_string(), r"echo 'it'\''s'");
        assert_eq!(CommandSpec::new("echo").arg("").to_string(), "echo ''");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn capture_collects_streams_and_code() {
        let spec = CommandSpec::new("bash")
            .arg("-c")
            .arg("read line; echo \"got $line\"; echo oops >&2; exit 3")
            .stdin("y\n");
        let out = capture(&spec).await.expect("must run");
        assert_eq!(out.code, Some(3));
        assert_eq!(out.stdout, "got y\n");
        assert_eq!(out.stderr, "oops\n");
        assert!(!out.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn capture_passes_environment() {
        let spec = CommandSpec::new("bash")
            .arg("-c")
            .arg("printf %s \"$_LOGIN_MP_USER\"")
            .env("_LOGIN_MP_USER", "alice");
        let out = capture(&spec).await.expect("must run");
        assert!(out.success());
        assert_eq!(out.stdout, "alice");
    }

    #[tokio::test]
    async fn capture_reports_missing_program() {
        let spec = CommandSpec::new("definitely-not-a-real-program-4821");
        assert!(capture(&spec).await.is_err());
    }
}
