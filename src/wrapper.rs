//! Wrapping of FreeSurfer and HCP command line tools.
//!
//! A [`FsContext`] is configured once from FreeSurfer's setup script and then handed to every
//! wrapping function. It produces one [`FsWrapper`] per external call.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use regex::Regex;
use tracing::{debug, warn};

use crate::configuration::{concat_environment, environment_with_runner, Environment};
use crate::error::{FsError, Result};
use crate::info::{DEFAULT_FREESURFER_PATH, DEFAULT_FSL_PATH, FREESURFER_RELEASES};
use crate::runner::{CommandRunner, Invocation, ProcessOutput, SystemRunner};

const VERSION_REGEX: &str = r"\d.\d.\d";


/// A configured FreeSurfer installation.
#[derive(Clone)]
pub struct FsContext {
    shfile: Option<PathBuf>,
    environment: Environment,
    version: Option<String>,
    fsl_environment: Option<Environment>,
    runner: Arc<dyn CommandRunner>,
}

impl fmt::Debug for FsContext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("FsContext")
            .field("shfile", &self.shfile)
            .field("version", &self.version)
            .field("variables", &self.environment.len())
            .field("fsl", &self.fsl_environment.is_some())
            .finish()
    }
}

impl FsContext {
    /// Configure FreeSurfer from its setup script, running tools on the host.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// let ctx = fswrap::FsContext::configure("/i2bm/local/freesurfer/SetUpFreeSurfer.sh").unwrap();
    /// println!("FreeSurfer {:?}", ctx.version());
    /// ```
    pub fn configure<P: AsRef<Path>>(shfile: P) -> Result<FsContext> {
        FsContext::configure_with_runner(shfile, Arc::new(SystemRunner))
    }

    /// Configure FreeSurfer with the default setup script location.
    pub fn configure_default() -> Result<FsContext> {
        FsContext::configure(DEFAULT_FREESURFER_PATH)
    }

    /// Configure FreeSurfer from its setup script.
    ///
    /// The script is sourced with `FREESURFER_HOME` taken from the current process, if set. The
    /// release is read from `$FREESURFER_HOME/build-stamp.txt`; untested releases are reported
    /// with a warning.
    pub fn configure_with_runner<P: AsRef<Path>>(shfile: P, runner: Arc<dyn CommandRunner>) -> Result<FsContext> {
        let shfile = shfile.as_ref();
        if !shfile.is_file() {
            return Err(FsError::InvalidArgument(format!(
                "'{}' is not a valid file, can't configure FreeSurfer.", shfile.display())));
        }
        let mut seed = Environment::new();
        if let Ok(fs_home) = std::env::var("FREESURFER_HOME") {
            seed.insert("FREESURFER_HOME".to_string(), fs_home);
        }
        let environment = environment_with_runner(shfile, &seed, runner.as_ref())?;

        let fs_home = environment.get("FREESURFER_HOME").ok_or_else(|| {
            FsError::InvalidArgument(format!(
                "'{}' does not define FREESURFER_HOME, can't configure FreeSurfer.", shfile.display()))
        })?;
        let version_file = Path::new(fs_home).join("build-stamp.txt");
        let stamp = fs::read_to_string(&version_file)?;
        let re = Regex::new(VERSION_REGEX)?;
        let matches: Vec<&str> = re.find_iter(&stamp).map(|m| m.as_str()).collect();
        if matches.len() != 1 {
            return Err(FsError::InvalidArgument(format!(
                "Can't detect 'FREESURFER' version from version file '{}'. You have not provided a valid configuration file.",
                version_file.display())));
        }
        let version = matches[0].to_string();
        if !FREESURFER_RELEASES.contains(&version.as_str()) {
            warn!(
                "Installed '{}' version of FreeSurfer not tested. Currently supported version is '{:?}'.",
                version, FREESURFER_RELEASES
            );
        }
        debug!("Configured FreeSurfer {} from '{}'.", version, shfile.display());

        Ok(FsContext {
            shfile: Some(shfile.to_path_buf()),
            environment,
            version: Some(version),
            fsl_environment: None,
            runner,
        })
    }

    /// Build a context from an already parsed environment. No version check is performed.
    pub fn from_environment(environment: Environment, runner: Arc<dyn CommandRunner>) -> FsContext {
        FsContext {
            shfile: None,
            environment,
            version: None,
            fsl_environment: None,
            runner,
        }
    }

    /// Add the FSL environment parsed from its setup script, needed by commands like `trac-all`.
    pub fn with_fsl<P: AsRef<Path>>(self, fsl_sh: P) -> Result<FsContext> {
        let fsl = environment_with_runner(fsl_sh, &Environment::new(), self.runner.as_ref())?;
        Ok(self.with_fsl_environment(fsl))
    }

    /// Add the FSL environment from the default setup script location.
    pub fn with_default_fsl(self) -> Result<FsContext> {
        self.with_fsl(DEFAULT_FSL_PATH)
    }

    pub fn with_fsl_environment(mut self, fsl: Environment) -> FsContext {
        self.fsl_environment = Some(fsl);
        self
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn fsl_environment(&self) -> Option<&Environment> {
        self.fsl_environment.as_ref()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn shfile(&self) -> Option<&Path> {
        self.shfile.as_deref()
    }

    pub fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    /// `FREESURFER_HOME` of the configured installation.
    pub fn freesurfer_home(&self) -> Option<PathBuf> {
        self.environment.get("FREESURFER_HOME").map(PathBuf::from)
    }

    /// Prepare a call of a FreeSurfer command. `cmd[0]` is the program.
    pub fn wrapper<S: AsRef<str>>(&self, cmd: &[S]) -> FsWrapper<'_> {
        FsWrapper {
            ctx: self,
            cmd: cmd.iter().map(|s| s.as_ref().to_string()).collect(),
            extra_env: None,
            add_fsl_env: false,
            subjects_dir: None,
            current_dir: None,
        }
    }

    /// Shortcut for `self.wrapper(cmd).run()`.
    pub fn run<S: AsRef<str>>(&self, cmd: &[S]) -> Result<ProcessOutput> {
        self.wrapper(cmd).run()
    }
}


/// A single FreeSurfer command about to be run.
pub struct FsWrapper<'a> {
    ctx: &'a FsContext,
    cmd: Vec<String>,
    extra_env: Option<Environment>,
    add_fsl_env: bool,
    subjects_dir: Option<PathBuf>,
    current_dir: Option<PathBuf>,
}

impl<'a> FsWrapper<'a> {
    /// Additional variables, concatenated to the FreeSurfer environment.
    pub fn env(mut self, env: Environment) -> Self {
        self.extra_env = Some(env);
        self
    }

    /// Also include the FSL environment of the context.
    pub fn with_fsl(mut self) -> Self {
        self.add_fsl_env = true;
        self
    }

    /// The `SUBJECTS_DIR` of the child. Without it, the one of the current process is passed on.
    pub fn subjects_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.subjects_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Run the child in this working directory.
    pub fn current_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn command(&self) -> &[String] {
        &self.cmd
    }

    /// The complete environment the child will see.
    pub fn environment(&self) -> Result<Environment> {
        let mut env = self.ctx.environment.clone();
        if let Some(extra) = &self.extra_env {
            env = concat_environment(&env, extra);
        }
        if self.add_fsl_env {
            let fsl = self.ctx.fsl_environment.as_ref().ok_or_else(|| {
                FsError::InvalidArgument("The FSL environment is required but has not been configured.".to_string())
            })?;
            env = concat_environment(&env, fsl);
        }
        match &self.subjects_dir {
            Some(dir) => {
                env.insert("SUBJECTS_DIR".to_string(), dir.to_string_lossy().into_owned());
            }
            None => {
                if let Ok(dir) = std::env::var("SUBJECTS_DIR") {
                    env.insert("SUBJECTS_DIR".to_string(), dir);
                }
            }
        }
        if self.cmd.first().map(|c| c == "tkmedit").unwrap_or(false) {
            if let Ok(display) = std::env::var("DISPLAY") {
                env.insert("DISPLAY".to_string(), display);
            }
        }
        Ok(env)
    }

    /// Run the command.
    ///
    /// Fails with [`FsError::FreeSurferConfiguration`] if the program can not be found in the
    /// child environment, and with [`FsError::FreeSurferRuntime`] on a non-zero exit code.
    pub fn run(self) -> Result<ProcessOutput> {
        let program = self
            .cmd
            .first()
            .cloned()
            .ok_or_else(|| FsError::InvalidArgument("Empty FreeSurfer command.".to_string()))?;
        let env = self.environment()?;
        if self.ctx.runner.resolve(&program, &env).is_none() {
            return Err(FsError::FreeSurferConfiguration(program));
        }
        let mut invocation = Invocation::new(program.clone(), self.cmd[1..].to_vec(), env);
        invocation.current_dir = self.current_dir;
        debug!("FreeSurfer call: {}", invocation);
        let output = self.ctx.runner.run(&invocation)?;
        if !output.success() {
            return Err(FsError::FreeSurferRuntime(
                program,
                self.cmd[1..].join(" "),
                format!("{}{}", output.stderr, output.stdout),
            ));
        }
        Ok(output)
    }
}


/// The FreeSurfer and FSL environments the HCP pipelines run in.
#[derive(Clone)]
pub struct HcpContext {
    fs_environment: Environment,
    fsl_environment: Environment,
    runner: Arc<dyn CommandRunner>,
}

impl HcpContext {
    /// Parse the FreeSurfer and FSL setup scripts, running tools on the host.
    pub fn configure<P: AsRef<Path>, Q: AsRef<Path>>(fsconfig: P, fslconfig: Q) -> Result<HcpContext> {
        HcpContext::configure_with_runner(fsconfig, fslconfig, Arc::new(SystemRunner))
    }

    pub fn configure_with_runner<P: AsRef<Path>, Q: AsRef<Path>>(fsconfig: P, fslconfig: Q, runner: Arc<dyn CommandRunner>) -> Result<HcpContext> {
        let mut seed = Environment::new();
        if let Ok(fs_home) = std::env::var("FREESURFER_HOME") {
            seed.insert("FREESURFER_HOME".to_string(), fs_home);
        }
        let fs_environment = environment_with_runner(fsconfig, &seed, runner.as_ref())?;
        let fsl_environment = environment_with_runner(fslconfig, &Environment::new(), runner.as_ref())?;
        Ok(HcpContext { fs_environment, fsl_environment, runner })
    }

    pub fn from_environments(fs_environment: Environment, fsl_environment: Environment, runner: Arc<dyn CommandRunner>) -> HcpContext {
        HcpContext { fs_environment, fsl_environment, runner }
    }

    /// A wrapper running in the FreeSurfer, FSL and `env` environments, concatenated in this order.
    pub fn wrapper(&self, env: &Environment) -> HcpWrapper {
        let concat_env = concat_environment(&self.fs_environment, &self.fsl_environment);
        HcpWrapper {
            environment: concat_environment(&concat_env, env),
            runner: Arc::clone(&self.runner),
        }
    }
}


/// Runs HCP pipeline scripts, which take their options as `--key=value` arguments.
pub struct HcpWrapper {
    environment: Environment,
    runner: Arc<dyn CommandRunner>,
}

impl HcpWrapper {
    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// Format `[script, key1, value1, key2, value2, ...]` as `[script, "key1=value1", ...]`.
    pub fn format_command<S: AsRef<str>>(cmd: &[S]) -> Result<Vec<String>> {
        let (program, options) = cmd
            .split_first()
            .ok_or_else(|| FsError::InvalidArgument("Empty HCP command.".to_string()))?;
        if options.len() % 2 != 0 {
            return Err(FsError::InvalidArgument(format!(
                "HCP command '{}' expects key/value pairs, got {} trailing values.",
                program.as_ref(), options.len())));
        }
        let mut fcmd = vec![program.as_ref().to_string()];
        for pair in options.chunks(2) {
            fcmd.push(format!("{}={}", pair[0].as_ref(), pair[1].as_ref()));
        }
        Ok(fcmd)
    }

    /// Run an HCP script.
    pub fn call<S: AsRef<str>>(&self, cmd: &[S]) -> Result<ProcessOutput> {
        let fcmd = HcpWrapper::format_command(cmd)?;
        let program = fcmd[0].clone();
        if self.runner.resolve(&program, &self.environment).is_none() {
            return Err(FsError::HcpConfiguration(program));
        }
        let invocation = Invocation::new(program.clone(), fcmd[1..].to_vec(), self.environment.clone());
        debug!("HCP call: {}", invocation);
        let output = self.runner.run(&invocation)?;
        if !output.success() {
            let message = ["STDOUT", "----", output.stdout.as_str(), "STDERR", "----", output.stderr.as_str()].join("\n");
            let parameters: Vec<&str> = cmd.iter().map(|s| s.as_ref()).collect();
            return Err(FsError::HcpRuntime(program, parameters.join(" "), message));
        }
        Ok(output)
    }

    /// FreeSurfer release from `$FREESURFER_HOME/build-stamp.txt`.
    pub fn freesurfer_version(&self) -> Option<String> {
        let fs_home = self.environment.get("FREESURFER_HOME")?;
        let stamp = fs::read_to_string(Path::new(fs_home).join("build-stamp.txt")).ok()?;
        let first_line = stamp.lines().next()?;
        let re = Regex::new(VERSION_REGEX).ok()?;
        re.find(first_line).map(|m| m.as_str().to_string())
    }

    /// FSL release from `$FSLDIR/etc/fslversion`.
    pub fn fsl_version(&self) -> Option<String> {
        let basedir = self.environment.get("FSLDIR")?;
        let content = fs::read_to_string(Path::new(basedir).join("etc").join("fslversion")).ok()?;
        Some(content.trim_matches('\n').to_string())
    }

    /// Version printed on stderr by `gradient_unwarp.py -v`.
    pub fn gradunwarp_version(&self) -> Option<String> {
        let output = self.probe("gradient_unwarp.py", &["-v"])?;
        Some(output.stderr.trim_matches('\n').to_string())
    }

    /// Version reported by `wb_command -version`.
    pub fn wbcommand_version(&self) -> Option<String> {
        let output = self.probe("wb_command", &["-version"])?;
        let re = Regex::new(r"Version: \d.\d.\d").ok()?;
        re.find(&output.stdout).map(|m| m.as_str().replace("Version: ", ""))
    }

    /// HCP pipelines release from `$HCPPIPEDIR/version.txt`.
    pub fn hcp_version(&self) -> Option<String> {
        let basedir = self.environment.get("HCPPIPEDIR")?;
        let content = fs::read_to_string(Path::new(basedir).join("version.txt")).ok()?;
        Some(content.trim_matches('\n').to_string())
    }

    fn probe(&self, program: &str, args: &[&str]) -> Option<ProcessOutput> {
        let invocation = Invocation::new(
            program,
            args.iter().map(|a| a.to_string()).collect(),
            self.environment.clone(),
        );
        match self.runner.run(&invocation) {
            Ok(output) if output.success() => Some(output),
            _ => None,
        }
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::mock::{mock_context, MockRunner};

    #[test]
    fn a_successful_call_runs_the_exact_command() {
        let (mock, ctx) = mock_context();
        let out = ctx.wrapper(&["mri_info", "--vox2ras", "orig.mgz"]).run().unwrap();
        assert!(out.success());
        assert_eq!(vec![vec!["mri_info", "--vox2ras", "orig.mgz"]], mock.command_lines());
    }

    #[test]
    fn a_failing_call_carries_stderr_then_stdout() {
        let (mock, ctx) = mock_context();
        mock.push_output(1, "OUT", "ERR");
        match ctx.wrapper(&["recon-all", "-all", "-subjid", "s1"]).run() {
            Err(FsError::FreeSurferRuntime(command, parameters, output)) => {
                assert_eq!("recon-all", command);
                assert_eq!("-all -subjid s1", parameters);
                assert_eq!("ERROUT", output);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn a_missing_program_is_a_configuration_error_and_is_not_run() {
        let (mock, ctx) = mock_context();
        mock.set_missing("mris_expand");
        match ctx.wrapper(&["mris_expand"]).run() {
            Err(FsError::FreeSurferConfiguration(command)) => assert_eq!("mris_expand", command),
            other => panic!("unexpected {:?}", other),
        }
        assert!(mock.invocations().is_empty());
    }

    #[test]
    fn the_child_environment_is_assembled() {
        let (mock, ctx) = mock_context();
        let mut fsl = Environment::new();
        fsl.insert("PATH".to_string(), "/fsl/bin".to_string());
        fsl.insert("FSLDIR".to_string(), "/fsl".to_string());
        let ctx = ctx.with_fsl_environment(fsl);
        let mut extra = Environment::new();
        extra.insert("PATH".to_string(), "/usr/bin".to_string());
        ctx.wrapper(&["trac-all", "-prep"])
            .env(extra)
            .with_fsl()
            .subjects_dir("/data/subjects")
            .current_dir("/data")
            .run()
            .unwrap();
        let call = &mock.invocations()[0];
        assert_eq!("/opt/fs/bin:/usr/bin:/fsl/bin", call.env["PATH"]);
        assert_eq!("/fsl", call.env["FSLDIR"]);
        assert_eq!("/data/subjects", call.env["SUBJECTS_DIR"]);
        assert_eq!(Some(PathBuf::from("/data")), call.current_dir);
    }

    #[test]
    fn requesting_fsl_without_configuring_it_fails() {
        let (_mock, ctx) = mock_context();
        assert!(ctx.wrapper(&["bbregister"]).with_fsl().run().is_err());
    }

    #[test]
    fn configuration_reads_the_build_stamp() {
        let dir = tempfile::tempdir().unwrap();
        let shfile = dir.path().join("SetUpFreeSurfer.sh");
        fs::write(&shfile, "export FREESURFER_HOME=x\n").unwrap();
        fs::write(dir.path().join("build-stamp.txt"), "freesurfer-Linux-centos6_x86_64-stable-pub-v5.3.0\n").unwrap();
        let mock = Arc::new(MockRunner::new());
        mock.push_output(0, &format!("FREESURFER_HOME={}\n", dir.path().display()), "");
        let ctx = FsContext::configure_with_runner(&shfile, mock.clone()).unwrap();
        assert_eq!(Some("5.3.0"), ctx.version());
        assert_eq!(Some(dir.path().to_path_buf()), ctx.freesurfer_home());
    }

    #[test]
    fn an_ambiguous_build_stamp_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let shfile = dir.path().join("SetUpFreeSurfer.sh");
        fs::write(&shfile, "").unwrap();
        fs::write(dir.path().join("build-stamp.txt"), "v5.3.0 v6.0.0").unwrap();
        let mock = Arc::new(MockRunner::new());
        mock.push_output(0, &format!("FREESURFER_HOME={}\n", dir.path().display()), "");
        match FsContext::configure_with_runner(&shfile, mock) {
            Err(FsError::InvalidArgument(msg)) => assert!(msg.contains("Can't detect 'FREESURFER' version")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn a_missing_setup_script_is_rejected() {
        let mock = Arc::new(MockRunner::new());
        assert!(FsContext::configure_with_runner("/no/such/SetUpFreeSurfer.sh", mock.clone()).is_err());
        assert!(mock.invocations().is_empty());
    }

    fn hcp_context(mock: Arc<MockRunner>) -> HcpContext {
        let mut fs_env = Environment::new();
        fs_env.insert("PATH".to_string(), "/fs/bin".to_string());
        let mut fsl_env = Environment::new();
        fsl_env.insert("PATH".to_string(), "/fsl/bin".to_string());
        HcpContext::from_environments(fs_env, fsl_env, mock)
    }

    #[test]
    fn hcp_commands_are_formatted_as_key_value_pairs() {
        let mock = Arc::new(MockRunner::new());
        let mut extra = Environment::new();
        extra.insert("PATH".to_string(), "/hcp".to_string());
        let wrapper = hcp_context(mock.clone()).wrapper(&extra);
        assert_eq!("/fs/bin:/fsl/bin:/hcp", wrapper.environment()["PATH"]);
        wrapper.call(&["PreFreeSurferPipeline.sh", "--path", "/out", "--subject", "s1"]).unwrap();
        assert_eq!(
            vec![vec!["PreFreeSurferPipeline.sh", "--path=/out", "--subject=s1"]],
            mock.command_lines()
        );
        assert!(HcpWrapper::format_command(&["x.sh", "--path"]).is_err());
    }

    #[test]
    fn hcp_failures_report_both_streams() {
        let mock = Arc::new(MockRunner::new());
        mock.push_output(2, "o", "e");
        let wrapper = hcp_context(mock).wrapper(&Environment::new());
        match wrapper.call(&["FreeSurferPipeline.sh", "--subject", "s1"]) {
            Err(FsError::HcpRuntime(command, _, output)) => {
                assert_eq!("FreeSurferPipeline.sh", command);
                assert_eq!("STDOUT\n----\no\nSTDERR\n----\ne", output);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn hcp_version_probes() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("etc")).unwrap();
        fs::write(dir.path().join("etc").join("fslversion"), "5.0.9\n").unwrap();
        fs::write(dir.path().join("version.txt"), "v3.4.0\n").unwrap();
        let mock = Arc::new(MockRunner::new());
        mock.push_output(0, "Connectome Workbench\nVersion: 1.2.3\n", "");
        let mut extra = Environment::new();
        extra.insert("FSLDIR".to_string(), dir.path().to_string_lossy().into_owned());
        extra.insert("HCPPIPEDIR".to_string(), dir.path().to_string_lossy().into_owned());
        let wrapper = hcp_context(mock.clone()).wrapper(&extra);
        assert_eq!(Some("5.0.9".to_string()), wrapper.fsl_version());
        assert_eq!(Some("v3.4.0".to_string()), wrapper.hcp_version());
        assert_eq!(Some("1.2.3".to_string()), wrapper.wbcommand_version());
        assert_eq!(None, wrapper.freesurfer_version());
        mock.push_output(1, "", "");
        assert_eq!(None, wrapper.gradunwarp_version());
    }
}
