//! Configuration of the wrapped toolchains from their shell setup scripts.
//!
//! A setup script (for instance FreeSurfer's `SetUpFreeSurfer.sh` or FSL's `fsl.sh`) is sourced
//! in a bash subshell and the variables it exports are captured from `printenv`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::debug;

use crate::error::{FsError, Result};
use crate::runner::{CommandRunner, Invocation, SystemRunner};

/// Environment variables of a child process, ordered by name.
pub type Environment = BTreeMap<String, String>;


/// Parse the environment set up by a shell script, using the host system.
///
/// # Examples
///
/// ```no_run
/// let env = fswrap::environment("/etc/fsl/5.0/fsl.sh", &fswrap::Environment::new()).unwrap();
/// println!("FSLDIR={:?}", env.get("FSLDIR"));
/// ```
pub fn environment<P: AsRef<Path>>(sh_file: P, seed: &Environment) -> Result<Environment> {
    environment_with_runner(sh_file, seed, &SystemRunner)
}


/// Parse the environment set up by a shell script.
///
/// The script is sourced by `bash` in a subshell whose environment is exactly `seed`, so only the
/// variables set up by the script (and the seed) are returned. `PWD` is excluded.
pub fn environment_with_runner<P: AsRef<Path>>(sh_file: P, seed: &Environment, runner: &dyn CommandRunner) -> Result<Environment> {
    let script = format!(". '{}' ; /usr/bin/printenv", sh_file.as_ref().display());
    let bash = runner
        .resolve("bash", &process_environment())
        .unwrap_or_else(|| PathBuf::from("/bin/bash"));
    let invocation = Invocation::new(
        bash.to_string_lossy(),
        vec!["-c".to_string(), script],
        seed.clone(),
    );
    let output = runner.run(&invocation)?;
    if !output.success() {
        return Err(FsError::EnvironmentParse(output.stderr));
    }
    let env = parse_printenv(&output.stdout)?;
    debug!("Parsed {} variables from '{}'.", env.len(), sh_file.as_ref().display());
    Ok(env)
}


/// Parse `printenv` output, one `NAME=value` per line. `export NAME='value'` lines are accepted too.
pub fn parse_printenv(stdout: &str) -> Result<Environment> {
    let re = Regex::new(r"^(\w+)=(\S*)$")?;
    let mut env = Environment::new();
    for line in stdout.lines() {
        let line = if line.starts_with("export") {
            line.replace("export ", "").replace('\'', "")
        } else {
            line.to_string()
        };
        if let Some(caps) = re.captures(&line) {
            let name = &caps[1];
            if name != "PWD" {
                env.insert(name.to_string(), caps[2].to_string());
            }
        }
    }
    Ok(env)
}


/// Concatenate two environments.
///
/// Keys present in both with different values get `env1[key] + ":" + env2[key]`, `PATH` style.
/// Equal values are kept once, keys only in `env2` are added.
pub fn concat_environment(env1: &Environment, env2: &Environment) -> Environment {
    let mut concat_env = env1.clone();
    for (key, value) in env2.iter() {
        match concat_env.get_mut(key) {
            Some(existing) => {
                if existing != value {
                    existing.push(':');
                    existing.push_str(value);
                }
            }
            None => {
                concat_env.insert(key.clone(), value.clone());
            }
        }
    }
    concat_env
}


/// Snapshot of the environment of the current process.
pub fn process_environment() -> Environment {
    std::env::vars().collect()
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::mock::MockRunner;

    fn env_of(pairs: &[(&str, &str)]) -> Environment {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn colliding_keys_are_joined_with_colon() {
        let env1 = env_of(&[("PATH", "/usr/bin"), ("FSLDIR", "/fsl"), ("A", "1")]);
        let env2 = env_of(&[("PATH", "/opt/fs/bin"), ("FSLDIR", "/fsl"), ("B", "2")]);
        let env = concat_environment(&env1, &env2);
        assert_eq!("/usr/bin:/opt/fs/bin", env["PATH"]);
        assert_eq!("/fsl", env["FSLDIR"]);
        assert_eq!("1", env["A"]);
        assert_eq!("2", env["B"]);
        assert_eq!(4, env.len());
    }

    #[test]
    fn concatenation_does_not_modify_inputs() {
        let env1 = env_of(&[("PATH", "/a")]);
        let env2 = env_of(&[("PATH", "/b")]);
        let _ = concat_environment(&env1, &env2);
        assert_eq!("/a", env1["PATH"]);
    }

    #[test]
    fn printenv_output_is_parsed() {
        let stdout = "FREESURFER_HOME=/opt/fs\nPWD=/home/me\nexport FSLDIR='/usr/share/fsl'\nWITH_SPACE=a b\n_=/usr/bin/printenv\nEMPTY=\n";
        let env = parse_printenv(stdout).unwrap();
        assert_eq!("/opt/fs", env["FREESURFER_HOME"]);
        assert_eq!("/usr/share/fsl", env["FSLDIR"]);
        assert_eq!("", env["EMPTY"]);
        assert!(!env.contains_key("PWD"));
        assert!(!env.contains_key("WITH_SPACE"));
        assert_eq!("/usr/bin/printenv", env["_"]);
    }

    #[test]
    fn the_script_is_sourced_in_a_seeded_subshell() {
        let mock = MockRunner::new();
        mock.push_output(0, "FREESURFER_HOME=/opt/fs\nSUBJECTS_DIR=/opt/fs/subjects\n", "");
        let seed = env_of(&[("FREESURFER_HOME", "/opt/fs")]);
        let env = environment_with_runner("/opt/fs/SetUpFreeSurfer.sh", &seed, &mock).unwrap();
        assert_eq!("/opt/fs/subjects", env["SUBJECTS_DIR"]);

        let calls = mock.invocations();
        assert_eq!(1, calls.len());
        assert_eq!("bash", calls[0].program);
        assert_eq!(vec!["-c", ". '/opt/fs/SetUpFreeSurfer.sh' ; /usr/bin/printenv"], calls[0].args);
        assert_eq!(seed, calls[0].env);
    }

    #[test]
    fn a_failing_script_reports_its_stderr() {
        let mock = MockRunner::new();
        mock.push_output(1, "", "no such file");
        match environment_with_runner("/nope.sh", &Environment::new(), &mock) {
            Err(FsError::EnvironmentParse(stderr)) => assert_eq!("no such file", stderr),
            other => panic!("unexpected {:?}", other),
        }
    }
}
