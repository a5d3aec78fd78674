//! Group statistics: FreeSurfer stats tables, population summaries and texture tables.

use ndarray::Array1;
use ndarray_npy::NpzWriter;
use serde::Serialize;
use tracing::{debug, info};

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use crate::conversions::mri_surf2surf;
use crate::error::{FsError, Result};
use crate::fs_mgh::read_mgh;
use crate::util::{check_dir, glob_paths, path_arg, path_component_from_end};
use crate::wrapper::FsContext;

/// Measures exported by `aparcstats2table` for each parcellation.
pub const APARC_MEASURES: [&str; 8] = [
    "area", "volume", "thickness", "thicknessstd", "meancurv", "gauscurv", "foldind", "curvind",
];

/// The Desikan (`aparc`) and Destrieux (`aparc.a2009s`) parcellations, with their table prefixes.
const PARCELLATIONS: [(Option<&str>, &str); 2] = [(None, "aparc"), (Some("aparc.a2009s"), "aparc.2009s")];


/// Subjects of `fsdir` having a `stats` folder.
fn subjects_with_stats(fsdir: &Path) -> Result<Vec<String>> {
    glob_paths(fsdir.join("*").join("stats"))?
        .iter()
        .map(|p| path_component_from_end(p, 2))
        .collect()
}

fn stats_outdir(outdir: &Path, name: &str) -> Result<PathBuf> {
    let fsoutdir = outdir.join(name);
    if !fsoutdir.is_dir() {
        fs::create_dir(&fsoutdir)?;
    }
    Ok(fsoutdir)
}


/// Tables of the cortical parcellation stats `?h.aparc.stats` and `?h.aparc.a2009s.stats`
/// of all the subjects of `fsdir`, built with `aparcstats2table`.
///
/// One table per parcellation, hemisphere and measure is written to
/// `<outdir>/stats/<aparc|aparc.2009s>_stats_<hemi>_<measure>.csv`. Returns the tables.
pub fn aparcstats2table<P: AsRef<Path>, Q: AsRef<Path>>(fsdir: P, outdir: Q, ctx: &FsContext) -> Result<Vec<PathBuf>> {
    let (fsdir, outdir) = (fsdir.as_ref(), outdir.as_ref());
    check_dir(fsdir)?;
    check_dir(outdir)?;
    let subjects = subjects_with_stats(fsdir)?;
    let fsoutdir = stats_outdir(outdir, "stats")?;

    let mut statfiles = Vec::new();
    for (parc, prefix) in PARCELLATIONS.iter() {
        for hemi in ["lh", "rh"].iter() {
            for meas in APARC_MEASURES.iter() {
                let statfile = fsoutdir.join(format!("{}_stats_{}_{}.csv", prefix, hemi, meas));
                let mut cmd = vec!["aparcstats2table".to_string(), "--subjects".to_string()];
                cmd.extend(subjects.iter().cloned());
                if let Some(parc) = parc {
                    cmd.extend(vec!["--parc".to_string(), parc.to_string()]);
                }
                cmd.extend(vec![
                    "--hemi".to_string(), hemi.to_string(),
                    "--meas".to_string(), meas.to_string(),
                    "--tablefile".to_string(), path_arg(&statfile),
                    "--delimiter".to_string(), "comma".to_string(),
                    "--parcid-only".to_string(),
                ]);
                ctx.wrapper(&cmd).subjects_dir(fsdir).run()?;
                statfiles.push(statfile);
            }
        }
    }
    info!("{} aparc tables written for {} subjects.", statfiles.len(), subjects.len());
    Ok(statfiles)
}


/// Table of the subcortical volumes `aseg.stats` of all the subjects of `fsdir`, built with
/// `asegstats2table` into `<outdir>/stats/aseg_stats_volume.csv`.
pub fn asegstats2table<P: AsRef<Path>, Q: AsRef<Path>>(fsdir: P, outdir: Q, ctx: &FsContext) -> Result<Vec<PathBuf>> {
    let (fsdir, outdir) = (fsdir.as_ref(), outdir.as_ref());
    check_dir(fsdir)?;
    check_dir(outdir)?;
    let subjects = subjects_with_stats(fsdir)?;
    let fsoutdir = stats_outdir(outdir, "stats")?;

    let statfile = fsoutdir.join("aseg_stats_volume.csv");
    let mut cmd = vec!["asegstats2table".to_string(), "--subjects".to_string()];
    cmd.extend(subjects.iter().cloned());
    cmd.extend(vec![
        "--meas".to_string(), "volume".to_string(),
        "--tablefile".to_string(), path_arg(&statfile),
        "--delimiter".to_string(), "comma".to_string(),
    ]);
    ctx.wrapper(&cmd).subjects_dir(fsdir).run()?;
    Ok(vec![statfile])
}


/// Tables of the TRACULA pathway statistics `dpath/<pathway>/pathstats.overall.txt` of all the
/// subjects of `fsdir`, one per pathway, in `<outdir>/overall_stats/<pathway>.csv`.
pub fn tractstats2table<P: AsRef<Path>, Q: AsRef<Path>>(fsdir: P, outdir: Q, ctx: &FsContext) -> Result<Vec<PathBuf>> {
    let (fsdir, outdir) = (fsdir.as_ref(), outdir.as_ref());
    check_dir(fsdir)?;
    check_dir(outdir)?;

    let mut pathwayfiles: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    for path in glob_paths(fsdir.join("*").join("dpath").join("*").join("pathstats.overall.txt"))? {
        let pathway = path_component_from_end(&path, 2)?;
        pathwayfiles.entry(pathway).or_default().push(path);
    }
    let fsoutdir = stats_outdir(outdir, "overall_stats")?;

    let mut statfiles = Vec::new();
    for (name, files) in pathwayfiles.iter() {
        let statfile = fsoutdir.join(format!("{}.csv", name));
        let mut cmd = vec!["tractstats2table".to_string(), "--inputs".to_string()];
        cmd.extend(files.iter().map(path_arg));
        cmd.extend(vec!["--overall".to_string(), "--tablefile".to_string(), path_arg(&statfile)]);
        ctx.wrapper(&cmd).subjects_dir(fsdir).run()?;
        statfiles.push(statfile);
    }
    Ok(statfiles)
}


/// Scores of one region over the population, or of one subject.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionStats {
    pub values: Vec<f64>,
    /// Mean.
    pub m: f64,
    /// Population standard deviation.
    pub s: f64,
}

impl RegionStats {
    pub fn from_values(values: Vec<f64>) -> RegionStats {
        let n = values.len() as f64;
        if values.is_empty() {
            return RegionStats { values, m: f64::NAN, s: f64::NAN };
        }
        let m = values.iter().sum::<f64>() / n;
        let s = (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / n).sqrt();
        RegionStats { values, m, s }
    }
}

/// `hemi` (`lh`, `rh` or `aseg`) to measure to region to scores.
pub type PopulationStats = BTreeMap<String, BTreeMap<String, BTreeMap<String, RegionStats>>>;


/// Mean and standard deviation of every region and measure over the subjects of the tables
/// produced by [`aparcstats2table`] and [`asegstats2table`] in `statsdir`.
///
/// With `sid`, only the scores of this subject are kept. The Destrieux tables are ignored.
pub fn population_summary<P: AsRef<Path>>(statsdir: P, sid: Option<&str>) -> Result<PopulationStats> {
    let statsdir = statsdir.as_ref();
    if !statsdir.is_dir() {
        return Err(FsError::InvalidArgument(format!(
            "'{}' FreeSurfer home directory does not exists.", statsdir.display())));
    }

    let mut popstats = PopulationStats::new();
    for hemi in ["lh", "rh", "aseg"].iter() {
        popstats.insert(hemi.to_string(), BTreeMap::new());
    }

    for fpath in glob_paths(statsdir.join("*.csv"))? {
        let basename = path_component_from_end(&fpath, 1)?;
        if basename.starts_with("aparc.2009s") {
            continue;
        }
        let stem = basename.split('.').next().unwrap_or_default();
        let parts: Vec<&str> = stem.split('_').collect();
        let (hemi, sname, subject_header) = match parts.as_slice() {
            [stype, _, sname] if stype.starts_with("aseg") => ("aseg".to_string(), sname.to_string(), "Measure:volume".to_string()),
            [stype, _, hemi, sname] if stype.starts_with("aparc") => {
                (hemi.to_string(), sname.to_string(), format!("{}.{}.{}", hemi, stype, sname))
            }
            _ => continue,
        };

        let mut columns: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        let mut reader = csv::Reader::from_path(&fpath)?;
        let headers = reader.headers()?.clone();
        let subject_col = headers.iter().position(|h| h == subject_header).ok_or_else(|| {
            FsError::InvalidArgument(format!("No '{}' column in '{}'.", subject_header, fpath.display()))
        })?;
        for record in reader.records() {
            let record = record?;
            if let Some(sid) = sid {
                if record.get(subject_col) != Some(sid) {
                    continue;
                }
            }
            for (col, (key, value)) in headers.iter().zip(record.iter()).enumerate() {
                if col == subject_col {
                    continue;
                }
                let value = value.trim().parse::<f64>().map_err(|_| {
                    FsError::InvalidArgument(format!(
                        "'{}' is not a number, in column '{}' of '{}'.", value, key, fpath.display()))
                })?;
                columns.entry(key.to_string()).or_default().push(value);
            }
        }
        debug!("Summarised {} regions from '{}'.", columns.len(), fpath.display());

        let regions = popstats.entry(hemi).or_default().entry(sname).or_default();
        for (region, values) in columns {
            regions.insert(region, RegionStats::from_values(values));
        }
    }
    Ok(popstats)
}


/// Output formats of [`textures2table`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    Numpy,
    Csv,
    All,
}

impl std::str::FromStr for SaveMode {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "numpy" => Ok(SaveMode::Numpy),
            "csv" => Ok(SaveMode::Csv),
            "all" => Ok(SaveMode::All),
            _ => Err(FsError::InvalidArgument(format!(
                "'{}' is not a valid save option must be in ['numpy', 'csv', 'all']", s))),
        }
    }
}


/// Gather the textures matched by `regex` under `fsdir` in one table, after resampling them
/// on the icosahedron of order `ico_order` with [`mri_surf2surf`].
///
/// The hemisphere is the first dot-separated part of the regex file name, e.g. `lh` for
/// `*/surf/lh.thickness`. Resampled textures go to `<outdir>/textures/<name>/<sid>_<name>.mgz`
/// and are removed afterwards unless `keep_individual_textures` is set. The table is written to
/// `<outdir>/textures/<name>.<ico_order>.csv` (one row per subject, 4 decimals) and/or
/// `<outdir>/textures/<name>.<ico_order>.npz` (one array per subject) depending on `save_mode`.
pub fn textures2table<P: AsRef<Path>, Q: AsRef<Path>>(
    regex: &str,
    ico_order: i32,
    fsdir: P,
    outdir: Q,
    keep_individual_textures: bool,
    save_mode: &str,
    ctx: &FsContext,
) -> Result<Vec<PathBuf>> {
    let (fsdir, outdir) = (fsdir.as_ref(), outdir.as_ref());
    check_dir(fsdir)?;
    check_dir(outdir)?;
    let save_mode: SaveMode = save_mode.parse()?;

    let textures = glob_paths(fsdir.join(regex))?;
    let basename = path_component_from_end(regex, 1)?;
    let hemi = basename.split('.').next().unwrap_or_default().to_string();
    let fsoutdir = outdir.join("textures");
    let surfacesdir = fsoutdir.join(&basename);
    fs::create_dir_all(&surfacesdir)?;

    let mut textures_map: BTreeMap<String, Array1<f32>> = BTreeMap::new();
    for texturefile in textures.iter() {
        let sid = texturefile
            .strip_prefix(fsdir)
            .ok()
            .and_then(|p| p.components().next())
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .unwrap_or_default();
        let resampled = surfacesdir.join(format!("{}_{}.mgz", sid, basename));
        mri_surf2surf(&hemi, texturefile, &resampled, ico_order, fsdir, &sid, ctx)?;

        let profile = read_mgh(&resampled)?;
        let shape = profile.header.shape();
        if shape.1 != 1 || shape.2 != 1 || shape.3 != 1 {
            return Err(FsError::InvalidArgument(format!(
                "Expected profile texture array of shape (*, 1, 1) not '{:?}'.", shape)));
        }
        if textures_map.contains_key(&sid) {
            return Err(FsError::InvalidArgument(format!(
                "Subject '{}' already treated. Check the intput 'regex'.", sid)));
        }
        let values = profile.data_f64()?.iter().map(|v| *v as f32).collect::<Array1<f32>>();
        textures_map.insert(sid, values);
    }

    if !keep_individual_textures {
        fs::remove_dir_all(&surfacesdir)?;
    }

    let mut textures_files = Vec::new();
    if save_mode != SaveMode::Numpy {
        let textures_file = fsoutdir.join(format!("{}.{}.csv", basename, ico_order));
        let mut writer = csv::WriterBuilder::new().flexible(true).from_path(&textures_file)?;
        for (sid, values) in textures_map.iter() {
            let mut row = vec![sid.clone()];
            row.extend(values.iter().map(|v| format!("{:.4}", v)));
            writer.write_record(&row)?;
        }
        writer.flush()?;
        textures_files.push(textures_file);
    }
    if save_mode != SaveMode::Csv {
        let textures_file = fsoutdir.join(format!("{}.{}.npz", basename, ico_order));
        let mut npz = NpzWriter::new(File::create(&textures_file)?);
        for (sid, values) in textures_map.iter() {
            npz.add_array(sid.as_str(), values)?;
        }
        npz.finish()?;
        textures_files.push(textures_file);
    }
    info!("Texture table of {} subjects: {:?}", textures_map.len(), textures_files);
    Ok(textures_files)
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::fs_mgh::{write_mgh, FsMgh};
    use crate::mock::mock_context;
    use approx::assert_abs_diff_eq;
    use ndarray::Array4;

    fn subjects(fsdir: &Path, names: &[&str]) {
        for name in names.iter() {
            fs::create_dir_all(fsdir.join(name).join("stats")).unwrap();
        }
    }

    #[test]
    fn aparc_tables_are_built_for_both_parcellations() {
        let fsdir = tempfile::tempdir().unwrap();
        let outdir = tempfile::tempdir().unwrap();
        subjects(fsdir.path(), &["Lola", "Lolo"]);
        let (mock, ctx) = mock_context();

        let statfiles = aparcstats2table(fsdir.path(), outdir.path(), &ctx).unwrap();
        assert_eq!(32, statfiles.len());
        assert_eq!(outdir.path().join("stats").join("aparc_stats_lh_area.csv"), statfiles[0]);
        assert_eq!(outdir.path().join("stats").join("aparc.2009s_stats_rh_curvind.csv"), statfiles[31]);

        let lines = mock.command_lines();
        assert_eq!(32, lines.len());
        assert_eq!(
            vec!["aparcstats2table", "--subjects", "Lola", "Lolo", "--hemi", "lh", "--meas", "area"],
            lines[0][..8].to_vec()
        );
        assert_eq!(vec!["--parc", "aparc.a2009s"], lines[16][4..6].to_vec());
        assert_eq!("--parcid-only", lines[16].last().unwrap());
        assert_eq!(path_arg(fsdir.path()), mock.invocations()[0].env["SUBJECTS_DIR"]);
    }

    #[test]
    fn the_aseg_table_is_built() {
        let fsdir = tempfile::tempdir().unwrap();
        let outdir = tempfile::tempdir().unwrap();
        subjects(fsdir.path(), &["Lola"]);
        let (mock, ctx) = mock_context();
        let statfiles = asegstats2table(fsdir.path(), outdir.path(), &ctx).unwrap();
        let statfile = outdir.path().join("stats").join("aseg_stats_volume.csv");
        assert_eq!(vec![statfile.clone()], statfiles);
        assert_eq!(
            vec![vec![
                "asegstats2table".to_string(), "--subjects".to_string(), "Lola".to_string(),
                "--meas".to_string(), "volume".to_string(),
                "--tablefile".to_string(), path_arg(&statfile),
                "--delimiter".to_string(), "comma".to_string(),
            ]],
            mock.command_lines()
        );
    }

    #[test]
    fn stats_tables_need_existing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let (mock, ctx) = mock_context();
        assert!(aparcstats2table("/no/such/fsdir", dir.path(), &ctx).is_err());
        assert!(asegstats2table(dir.path(), "/no/such/outdir", &ctx).is_err());
        assert!(tractstats2table("/no/such/fsdir", dir.path(), &ctx).is_err());
        assert!(mock.invocations().is_empty());
    }

    #[test]
    fn pathway_tables_group_the_subjects() {
        let fsdir = tempfile::tempdir().unwrap();
        let outdir = tempfile::tempdir().unwrap();
        for sid in ["Lola", "Lolo"].iter() {
            for pathway in ["lh.cst_AS", "fmajor_PP"].iter() {
                let dir = fsdir.path().join(sid).join("dpath").join(pathway);
                fs::create_dir_all(&dir).unwrap();
                fs::write(dir.join("pathstats.overall.txt"), "").unwrap();
            }
        }
        let (mock, ctx) = mock_context();
        let statfiles = tractstats2table(fsdir.path(), outdir.path(), &ctx).unwrap();
        let statdir = outdir.path().join("overall_stats");
        assert_eq!(vec![statdir.join("fmajor_PP.csv"), statdir.join("lh.cst_AS.csv")], statfiles);
        let first = &mock.command_lines()[0];
        assert_eq!(7, first.len());
        assert_eq!("--inputs", first[1]);
        assert!(first[2].ends_with("Lola/dpath/fmajor_PP/pathstats.overall.txt"));
        assert!(first[3].ends_with("Lolo/dpath/fmajor_PP/pathstats.overall.txt"));
    }

    fn write_tables(statsdir: &Path) {
        fs::write(
            statsdir.join("aparc_stats_lh_thickness.csv"),
            "lh.aparc.thickness,bankssts,cuneus\nLola,2.0,1.0\nLolo,4.0,3.0\n",
        ).unwrap();
        fs::write(
            statsdir.join("aseg_stats_volume.csv"),
            "Measure:volume,Left-Thalamus\nLola,7000\nLolo,9000\n",
        ).unwrap();
        fs::write(statsdir.join("aparc.2009s_stats_lh_area.csv"), "garbage").unwrap();
    }

    #[test]
    fn the_population_summary_has_mean_and_std() {
        let statsdir = tempfile::tempdir().unwrap();
        write_tables(statsdir.path());
        let popstats = population_summary(statsdir.path(), None).unwrap();
        let cuneus = &popstats["lh"]["thickness"]["cuneus"];
        assert_eq!(vec![1.0, 3.0], cuneus.values);
        assert_abs_diff_eq!(2.0, cuneus.m);
        assert_abs_diff_eq!(1.0, cuneus.s);
        assert_abs_diff_eq!(8000.0, popstats["aseg"]["volume"]["Left-Thalamus"].m);
        assert!(popstats["rh"].is_empty());
    }

    #[test]
    fn a_subject_summary_keeps_its_scores_only() {
        let statsdir = tempfile::tempdir().unwrap();
        write_tables(statsdir.path());
        let popstats = population_summary(statsdir.path(), Some("Lolo")).unwrap();
        let bankssts = &popstats["lh"]["thickness"]["bankssts"];
        assert_eq!(vec![4.0], bankssts.values);
        assert_abs_diff_eq!(0.0, bankssts.s);
        assert!(population_summary("/no/such/stats", None).is_err());
    }

    fn resampled_texture(outdir: &Path, sid: &str, shape: (usize, usize, usize, usize)) {
        let dir = outdir.join("textures").join("lh.sulc");
        fs::create_dir_all(&dir).unwrap();
        let data = Array4::<f32>::from_shape_fn(shape, |(i, _, _, _)| i as f32 / 3.0);
        write_mgh(dir.join(format!("{}_lh.sulc.mgz", sid)), &FsMgh::from_f32(data)).unwrap();
    }

    #[test]
    fn textures_are_gathered_in_csv_and_npz_tables() {
        let fsdir = tempfile::tempdir().unwrap();
        let outdir = tempfile::tempdir().unwrap();
        let texture = fsdir.path().join("Lola").join("surf").join("lh.sulc");
        fs::create_dir_all(texture.parent().unwrap()).unwrap();
        fs::write(&texture, "").unwrap();
        resampled_texture(outdir.path(), "Lola", (4, 1, 1, 1));
        let (mock, ctx) = mock_context();

        let files = textures2table("*/surf/lh.sulc", 7, fsdir.path(), outdir.path(), false, "all", &ctx).unwrap();
        let textures_dir = outdir.path().join("textures");
        assert_eq!(vec![textures_dir.join("lh.sulc.7.csv"), textures_dir.join("lh.sulc.7.npz")], files);
        assert!(!textures_dir.join("lh.sulc").exists());
        assert_eq!(
            "Lola,0.0000,0.3333,0.6667,1.0000\n",
            fs::read_to_string(textures_dir.join("lh.sulc.7.csv")).unwrap()
        );
        assert!(fs::metadata(textures_dir.join("lh.sulc.7.npz")).unwrap().len() > 0);

        let line = &mock.command_lines()[0];
        assert_eq!(vec!["mri_surf2surf", "--hemi", "lh"], line[..3].to_vec());
        assert_eq!("Lola", line[6]);
    }

    #[test]
    fn textures_must_be_single_column_profiles() {
        let fsdir = tempfile::tempdir().unwrap();
        let outdir = tempfile::tempdir().unwrap();
        let texture = fsdir.path().join("Lola").join("surf").join("lh.sulc");
        fs::create_dir_all(texture.parent().unwrap()).unwrap();
        fs::write(&texture, "").unwrap();
        resampled_texture(outdir.path(), "Lola", (4, 1, 2, 1));
        let (_, ctx) = mock_context();
        match textures2table("*/surf/lh.sulc", 7, fsdir.path(), outdir.path(), true, "csv", &ctx) {
            Err(FsError::InvalidArgument(msg)) => assert!(msg.starts_with("Expected profile texture array of shape")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unknown_save_modes_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (mock, ctx) = mock_context();
        assert!(textures2table("*/surf/lh.sulc", 7, dir.path(), dir.path(), false, "WRONG", &ctx).is_err());
        assert!(mock.invocations().is_empty());
    }
}
