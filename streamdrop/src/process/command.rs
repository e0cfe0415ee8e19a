//! Command descriptions produced by the backends.

use std::process::Stdio;

/// Program, arguments and extra environment of one child process.
///
/// Backends only describe what to run; [`ChildProcessSet`](super::ChildProcessSet)
/// does the spawning and owns the handles.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
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

    /// Value of an extra environment variable, if set.
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Build the tokio command. Stdout is discarded; stderr is piped only when
    /// the caller reads it.
    pub(crate) fn to_command(&self, capture_stderr: bool) -> tokio::process::Command {
        let mut cmd = process_utils::tokio_command(&self.program);
        cmd.args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(if capture_stderr {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let spec = CommandSpec::new("ffmpeg")
            .arg("-y")
            .args(["-i", "in"])
            .env("DISPLAY", ":99")
            .env("DISPLAY", ":100");
        assert_eq!(spec.program, "ffmpeg");
        assert_eq!(spec.args, vec!["-y", "-i", "in"]);
        assert_eq!(spec.env_value("DISPLAY"), Some(":100"));
        assert_eq!(spec.env_value("HOME"), None);
    }
}
