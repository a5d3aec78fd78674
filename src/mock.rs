//! A scripted [`CommandRunner`] that records invocations instead of spawning processes.

use std::collections::{BTreeSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::configuration::Environment;
use crate::error::Result;
use crate::runner::{CommandRunner, Invocation, ProcessOutput};
use crate::wrapper::FsContext;


/// Records every invocation and replays queued outputs, or success when the queue is empty.
#[derive(Debug, Default)]
pub struct MockRunner {
    invocations: Mutex<Vec<Invocation>>,
    outputs: Mutex<VecDeque<ProcessOutput>>,
    missing: Mutex<BTreeSet<String>>,
}

impl MockRunner {
    pub fn new() -> MockRunner {
        MockRunner::default()
    }

    /// Queue the output of the next run.
    pub fn push_output(&self, exit_code: i32, stdout: &str, stderr: &str) {
        if let Ok(mut outputs) = self.outputs.lock() {
            outputs.push_back(ProcessOutput {
                exit_code,
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            });
        }
    }

    /// Make `resolve` fail for `program`.
    pub fn set_missing(&self, program: &str) {
        if let Ok(mut missing) = self.missing.lock() {
            missing.insert(program.to_string());
        }
    }

    /// All invocations run so far, in order.
    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// Command lines of all invocations run so far.
    pub fn command_lines(&self) -> Vec<Vec<String>> {
        self.invocations().iter().map(|i| i.command_line()).collect()
    }
}

/// A context on a fake `/opt/fs` installation, running commands through a fresh mock.
pub fn mock_context() -> (Arc<MockRunner>, FsContext) {
    let mock = Arc::new(MockRunner::new());
    let mut env = Environment::new();
    env.insert("FREESURFER_HOME".to_string(), "/opt/fs".to_string());
    env.insert("PATH".to_string(), "/opt/fs/bin".to_string());
    let ctx = FsContext::from_environment(env, mock.clone());
    (mock, ctx)
}

impl CommandRunner for MockRunner {
    fn resolve(&self, program: &str, _env: &Environment) -> Option<PathBuf> {
        let missing = self.missing.lock().map(|m| m.contains(program)).unwrap_or(false);
        if missing {
            None
        } else {
            Some(PathBuf::from(program))
        }
    }

    fn run(&self, invocation: &Invocation) -> Result<ProcessOutput> {
        if let Ok(mut invocations) = self.invocations.lock() {
            invocations.push(invocation.clone());
        }
        let next = self.outputs.lock().ok().and_then(|mut o| o.pop_front());
        Ok(next.unwrap_or_default())
    }
}
