//! Integrity check of a FreeSurfer processing directory.
//!
//! Each subject is checked twice: the number of files in every folder of the subject tree is
//! compared to reference counts, and the last line of `scripts/recon-all-status.log` must report
//! that `recon-all` finished without error.

use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{FsError, Result};
use crate::util::check_dir;

const RECONALL_SUCCESS: &str = "finished without error";

/// File counts of the folders of a `recon-all` subject, folders relative to the subject
/// directory.
pub const RECONALL_FOLDER_COUNTS: [(&str, usize); 13] = [
    ("bem", 0),
    ("label", 69),
    ("mri", 35),
    ("mri/orig", 1),
    ("mri/transforms", 13),
    ("mri/transforms/bak", 0),
    ("scripts", 11),
    ("src", 0),
    ("stats", 18),
    ("surf", 70),
    ("tmp", 0),
    ("touch", 67),
    ("trash", 0),
];


/// Expected number of files per folder of a subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderCounts(pub BTreeMap<String, usize>);

impl Default for FolderCounts {
    fn default() -> Self {
        FolderCounts(RECONALL_FOLDER_COUNTS.iter().map(|(k, v)| (k.to_string(), *v)).collect())
    }
}

impl FolderCounts {
    /// Also expect the outputs of the conversion step in `convert`, and of the quality check in
    /// `convert/qc`.
    pub fn with_conversion(mut self, conversion_count: Option<usize>, qc_count: Option<usize>) -> Self {
        if let Some(count) = conversion_count {
            self.0.insert("convert".to_string(), count);
        }
        if let Some(count) = qc_count {
            self.0.insert("convert/qc".to_string(), count);
        }
        self
    }
}


/// Observed state of one subject.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectStatus {
    /// File count of the reference folders found in the subject tree.
    pub counts: BTreeMap<String, usize>,
    /// Folders of the subject tree that have no reference count.
    pub extrapaths: Vec<String>,
    /// 0 if `recon-all` finished without error, 1 otherwise.
    pub exitcode: i32,
}

impl SubjectStatus {
    pub fn reconall_succeeded(&self) -> bool {
        self.exitcode == 0
    }

    /// Every reference folder exists with the expected number of files, and there is no other
    /// folder.
    pub fn matches(&self, reference: &FolderCounts) -> bool {
        self.extrapaths.is_empty() && self.counts == reference.0
    }
}


/// Summary over the subjects of a processing directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DataCheckReport {
    pub total: usize,
    pub success: usize,
    pub failed_sids: Vec<String>,
    pub count_success: usize,
    pub count_failed_sids: Vec<String>,
    pub subjects: BTreeMap<String, SubjectStatus>,
}


/// Whether the last non empty line of a `recon-all-status.log` reports a success.
pub fn reconall_finished<P: AsRef<Path>>(fslog: P) -> Result<bool> {
    let content = fs::read_to_string(fslog.as_ref())?;
    let last_line = content.lines().filter(|l| !l.trim().is_empty()).last().unwrap_or("");
    Ok(last_line.contains(RECONALL_SUCCESS))
}


/// Count the files of every folder of `siddir` and read its `recon-all` status.
///
/// A missing status log counts as a failure.
pub fn check_subject<P: AsRef<Path>>(siddir: P, reference: &FolderCounts) -> Result<SubjectStatus> {
    let siddir = siddir.as_ref();
    check_dir(siddir)?;
    let mut status = SubjectStatus { counts: BTreeMap::new(), extrapaths: Vec::new(), exitcode: 1 };
    let mut stack = vec![siddir.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut nb_files = 0;
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                nb_files += 1;
            }
        }
        if dir == siddir {
            continue;
        }
        let rpath = relative_folder(siddir, &dir);
        if reference.0.contains_key(&rpath) {
            status.counts.insert(rpath, nb_files);
        } else {
            status.extrapaths.push(rpath);
        }
    }
    status.extrapaths.sort();

    let fslog = siddir.join("scripts").join("recon-all-status.log");
    if fslog.is_file() && reconall_finished(&fslog)? {
        status.exitcode = 0;
    }
    Ok(status)
}

fn relative_folder(root: &Path, dir: &Path) -> String {
    dir.strip_prefix(root)
        .map(|rel| rel.iter().map(|c| c.to_string_lossy().into_owned()).collect::<Vec<_>>().join("/"))
        .unwrap_or_default()
}


/// Check the subjects of `fsdir` whose whole name matches `regex`, or only `subjectid`.
pub fn datacheck<P: AsRef<Path>>(
    fsdir: P,
    regex: &str,
    subjectid: Option<&str>,
    reference: &FolderCounts,
) -> Result<DataCheckReport> {
    let fsdir = fsdir.as_ref();
    if !fsdir.is_dir() {
        return Err(FsError::InvalidArgument(format!(
            "The directory '{}' does not exist!", fsdir.display())));
    }
    let re = Regex::new(&format!("^(?:{})$", regex))?;

    let sids: Vec<String> = match subjectid {
        Some(sid) => vec![sid.to_string()],
        None => {
            let mut names = Vec::new();
            for entry in fs::read_dir(fsdir)? {
                names.push(entry?.file_name().to_string_lossy().into_owned());
            }
            names.sort();
            names
        }
    };

    let mut report = DataCheckReport::default();
    for sid in sids.iter().filter(|sid| re.is_match(sid)) {
        let siddir: PathBuf = fsdir.join(sid);
        if !siddir.is_dir() {
            debug!("Skipping '{}', not a directory.", siddir.display());
            continue;
        }
        let status = check_subject(&siddir, reference)?;
        if status.reconall_succeeded() {
            report.success += 1;
        } else {
            report.failed_sids.push(sid.clone());
        }
        if status.matches(reference) {
            report.count_success += 1;
        } else {
            report.count_failed_sids.push(sid.clone());
        }
        report.subjects.insert(sid.clone(), status);
    }
    report.total = report.subjects.len();
    info!(
        "Data check of '{}': {}/{} succeeded, {}/{} with expected file counts.",
        fsdir.display(), report.success, report.total, report.count_success, report.total
    );
    Ok(report)
}


#[cfg(test)]
mod test {
    use super::*;

    fn populate(siddir: &Path, reference: &FolderCounts, status_line: &str) {
        for (folder, count) in reference.0.iter() {
            let dir = siddir.join(folder);
            fs::create_dir_all(&dir).unwrap();
            for idx in 0..*count {
                fs::write(dir.join(format!("f{}", idx)), "").unwrap();
            }
        }
        // The status log is one of the reference files of 'scripts'.
        fs::remove_file(siddir.join("scripts").join("f0")).unwrap();
        fs::write(
            siddir.join("scripts").join("recon-all-status.log"),
            format!("#@# Talairach\n{}\n\n", status_line),
        ).unwrap();
    }

    #[test]
    fn the_status_log_is_read_from_the_last_non_empty_line() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("recon-all-status.log");
        fs::write(&log, "#@# Skull Stripping\n#@#%# recon-all-run-time-hours 7.2\nrecon-all -s ab123456 finished without error at Mon\n\n").unwrap();
        assert!(reconall_finished(&log).unwrap());
        fs::write(&log, "finished without error\nrecon-all -s ab123456 exited with ERRORS\n").unwrap();
        assert!(!reconall_finished(&log).unwrap());
    }

    #[test]
    fn complete_subjects_pass_both_checks() {
        let dir = tempfile::tempdir().unwrap();
        let reference = FolderCounts::default().with_conversion(Some(2), None);
        populate(&dir.path().join("ab123456"), &reference, "recon-all -s ab123456 finished without error");
        populate(&dir.path().join("cd654321"), &reference, "recon-all -s cd654321 exited with ERRORS");
        fs::write(dir.path().join("cd654321").join("surf").join("lh.extra"), "").unwrap();
        fs::create_dir_all(dir.path().join("fsaverage").join("surf")).unwrap();

        let report = datacheck(dir.path(), r"[a-z]{2}\d{6}", None, &reference).unwrap();
        assert_eq!(2, report.total);
        assert_eq!(1, report.success);
        assert_eq!(vec!["cd654321".to_string()], report.failed_sids);
        assert_eq!(1, report.count_success);
        assert_eq!(vec!["cd654321".to_string()], report.count_failed_sids);
        assert_eq!(71, report.subjects["cd654321"].counts["surf"]);
    }

    #[test]
    fn unexpected_folders_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let reference = FolderCounts::default();
        let siddir = dir.path().join("ab123456");
        populate(&siddir, &reference, "finished without error");
        fs::create_dir_all(siddir.join("mri").join("tmp")).unwrap();

        let report = datacheck(dir.path(), r"[a-z]{2}\d{6}", Some("ab123456"), &reference).unwrap();
        let status = &report.subjects["ab123456"];
        assert!(status.reconall_succeeded());
        assert_eq!(vec!["mri/tmp".to_string()], status.extrapaths);
        assert!(!status.matches(&reference));
    }
}
