use fswrap::mock::MockRunner;
use fswrap::plots::polar_plot;
use fswrap::stattools::population_summary;
use fswrap::{FsContext, FsError, HcpContext};

use std::fs;
use std::path::Path;
use std::sync::Arc;

fn freesurfer_home(dir: &Path) -> String {
    let home = dir.join("freesurfer");
    fs::create_dir_all(&home).unwrap();
    fs::write(home.join("build-stamp.txt"), "freesurfer-Linux-centos6_x86_64-stable-pub-v5.3.0\n").unwrap();
    home.to_string_lossy().into_owned()
}

fn configured(dir: &Path) -> (Arc<MockRunner>, FsContext) {
    let shfile = dir.join("SetUpFreeSurfer.sh");
    fs::write(&shfile, "").unwrap();
    let mock = Arc::new(MockRunner::new());
    mock.push_output(0, &format!("FREESURFER_HOME={}\nPATH=/opt/fs/bin\nPWD=/tmp\n", freesurfer_home(dir)), "");
    let ctx = FsContext::configure_with_runner(&shfile, mock.clone()).unwrap();
    (mock, ctx)
}

#[test]
fn the_context_is_configured_from_the_setup_script() {
    let dir = tempfile::tempdir().unwrap();
    let (mock, ctx) = configured(dir.path());

    assert_eq!(Some("5.3.0"), ctx.version());
    assert_eq!("/opt/fs/bin", ctx.environment()["PATH"]);
    assert!(!ctx.environment().contains_key("PWD"));
    let sourcing = &mock.invocations()[0];
    assert_eq!("-c", sourcing.args[0]);
    assert!(sourcing.args[1].ends_with("; /usr/bin/printenv"));
}

#[test]
fn a_failing_setup_script_is_a_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let shfile = dir.path().join("SetUpFreeSurfer.sh");
    fs::write(&shfile, "").unwrap();
    let mock = Arc::new(MockRunner::new());
    mock.push_output(1, "", "missing dependency");
    match FsContext::configure_with_runner(&shfile, mock) {
        Err(FsError::EnvironmentParse(stderr)) => assert_eq!("missing dependency", stderr),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn recon_all_failures_carry_both_streams() {
    let dir = tempfile::tempdir().unwrap();
    let (mock, ctx) = configured(dir.path());
    let anat = dir.path().join("t1.nii.gz");
    fs::write(&anat, "").unwrap();

    mock.push_output(1, "out", "err");
    match fswrap::segmentation::recon_all(dir.path(), &anat, "ab123456", &ctx) {
        Err(FsError::FreeSurferRuntime(command, parameters, output)) => {
            assert_eq!("recon-all", command);
            assert!(parameters.starts_with("-all -subjid ab123456"));
            assert_eq!("errout", output);
        }
        other => panic!("unexpected {:?}", other),
    }

    mock.set_missing("recon-all");
    match fswrap::segmentation::recon_all(dir.path(), &anat, "ab123456", &ctx) {
        Err(FsError::FreeSurferConfiguration(command)) => assert_eq!("recon-all", command),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn invalid_arguments_are_rejected_before_any_process_is_spawned() {
    let dir = tempfile::tempdir().unwrap();
    let (mock, ctx) = configured(dir.path());
    let texture = dir.path().join("lh.thickness");
    fs::write(&texture, "").unwrap();
    let before = mock.invocations().len();

    let out = dir.path().join("out.mgz");
    assert!(fswrap::conversions::mri_surf2surf("mh", &texture, &out, 7, dir.path(), "s1", &ctx).is_err());
    assert!(fswrap::conversions::mri_surf2surf("lh", &texture, &out, 8, dir.path(), "s1", &ctx).is_err());
    assert_eq!(before, mock.invocations().len());
}

#[test]
fn hcp_pipelines_run_in_the_concatenated_environments() {
    let dir = tempfile::tempdir().unwrap();
    let (fsconfig, fslconfig) = (dir.path().join("fs.sh"), dir.path().join("fsl.sh"));
    fs::write(&fsconfig, "").unwrap();
    fs::write(&fslconfig, "").unwrap();
    let mock = Arc::new(MockRunner::new());
    mock.push_output(0, "PATH=/opt/fs/bin\nFREESURFER_HOME=/opt/fs\n", "");
    mock.push_output(0, "PATH=/opt/fsl/bin\nFSLDIR=/opt/fsl\n", "");
    let ctx = HcpContext::configure_with_runner(&fsconfig, &fslconfig, mock.clone()).unwrap();

    let (path, hcpdir, wb) = (dir.path().join("study"), dir.path().join("hcp"), dir.path().join("wb"));
    for d in [&path, &hcpdir, &wb].iter() {
        fs::create_dir_all(d).unwrap();
    }
    fswrap::hcp::postfreesurfer_hcp(&path, "Lola", &hcpdir, &wb, &ctx).unwrap();

    let call = mock.invocations().pop().unwrap();
    assert!(call.program.ends_with("PostFreeSurferPipeline.sh"));
    assert_eq!("--subject=Lola", call.args[1]);
    assert_eq!("/opt/fs/bin:/opt/fsl/bin", call.env["PATH"]);
    assert_eq!("/opt/fsl", call.env["FSLDIR"]);
    assert_eq!(hcpdir.to_string_lossy(), call.env["HCPPIPEDIR"].as_str());
}

#[test]
fn cohort_statistics_feed_the_polar_plots() {
    let dir = tempfile::tempdir().unwrap();
    let statsdir = dir.path().join("stats");
    fs::create_dir(&statsdir).unwrap();
    fs::write(
        statsdir.join("aseg_stats_volume.csv"),
        "Measure:volume,3rd-Ventricle,4th-Ventricle\n\
         ab123456,1337.6,1742.1\n\
         cd654321,1416.4,2303.9\n\
         ef000111,692.0,1297.8\n",
    ).unwrap();

    let popstats = population_summary(&statsdir, None).unwrap();
    let indstats = population_summary(&statsdir, Some("ab123456")).unwrap();
    let cohort = &popstats["aseg"]["volume"]["3rd-Ventricle"];
    assert_eq!(3, cohort.values.len());
    approx::assert_abs_diff_eq!(1148.6667, cohort.m, epsilon = 1e-3);
    assert_eq!(vec![1337.6], indstats["aseg"]["volume"]["3rd-Ventricle"].values);

    let snapfile = dir.path().join("polarplot-aseg.svg");
    polar_plot(&indstats["aseg"], &popstats["aseg"], &snapfile, Some("polarplot-aseg")).unwrap();
    let svg = fs::read_to_string(&snapfile).unwrap();
    assert!(svg.contains(">3rd-Ventricle</text>"));
    assert!(popstats["lh"].is_empty());
}
