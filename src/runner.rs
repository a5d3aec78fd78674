//! Execution of external programs.
//!
//! Every external tool goes through a [`CommandRunner`], so the wrappers can be driven
//! by the real system ([`SystemRunner`]) or by a scripted replacement ([`crate::mock::MockRunner`]).

use std::fmt;
use std::path::PathBuf;

use duct::cmd;
use tracing::debug;

use crate::configuration::Environment;
use crate::error::Result;


/// A fully described call of an external program.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// The complete child environment. Nothing is inherited from the current process.
    pub env: Environment,
    pub current_dir: Option<PathBuf>,
}

impl Invocation {
    pub fn new<S: Into<String>>(program: S, args: Vec<String>, env: Environment) -> Invocation {
        Invocation {
            program: program.into(),
            args,
            env,
            current_dir: None,
        }
    }

    /// The program followed by its arguments.
    pub fn command_line(&self) -> Vec<String> {
        let mut line = Vec::with_capacity(self.args.len() + 1);
        line.push(self.program.clone());
        line.extend(self.args.iter().cloned());
        line
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.command_line().join(" "))
    }
}


/// Captured result of a finished process.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}


/// Resolves and runs external programs.
pub trait CommandRunner: Send + Sync {
    /// Locate `program` on the `PATH` of the given environment.
    fn resolve(&self, program: &str, env: &Environment) -> Option<PathBuf>;

    /// Run the invocation to completion. A non-zero exit code is not an error at this level.
    fn run(&self, invocation: &Invocation) -> Result<ProcessOutput>;
}


/// Runs programs on the host with `duct`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn resolve(&self, program: &str, env: &Environment) -> Option<PathBuf> {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        which::which_in(program, env.get("PATH"), cwd).ok()
    }

    fn run(&self, invocation: &Invocation) -> Result<ProcessOutput> {
        debug!("Running: {}", invocation);
        let mut expression = cmd(invocation.program.as_str(), &invocation.args)
            .full_env(&invocation.env)
            .stdout_capture()
            .stderr_capture()
            .unchecked();
        if let Some(dir) = &invocation.current_dir {
            expression = expression.dir(dir);
        }
        let output = expression.run()?;
        Ok(ProcessOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn invocation_displays_as_command_line() {
        let inv = Invocation::new("mri_convert", vec!["in.mgz".to_string(), "out.nii.gz".to_string()], Environment::new());
        assert_eq!("mri_convert in.mgz out.nii.gz", inv.to_string());
        assert_eq!(vec!["mri_convert", "in.mgz", "out.nii.gz"], inv.command_line());
    }

    #[test]
    fn programs_are_resolved_on_the_child_path_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = Environment::new();
        env.insert("PATH".to_string(), dir.path().to_string_lossy().into_owned());
        assert!(SystemRunner.resolve("surely-not-a-freesurfer-tool", &env).is_none());
    }
}
