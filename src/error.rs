use quick_error::quick_error;
use std::io::Error as IOError;

quick_error! {
    /// Error type for all error variants originated by this crate.
    #[derive(Debug)]
    pub enum FsError {
        /// A parameter is out of its allowed range, or an input path does not exist.
        InvalidArgument(msg: String) {
            display("{}", msg)
        }

        /// A FreeSurfer command exited with a non-zero code.
        FreeSurferRuntime(command: String, parameters: String, output: String) {
            display("FreeSurfer call for '{}' failed, with parameters: '{}'.Error:: {}.", command, parameters, output)
        }

        /// A FreeSurfer command could not be found in the configured environment.
        FreeSurferConfiguration(command: String) {
            display("FreeSurfer command '{}' not found.", command)
        }

        HcpRuntime(command: String, parameters: String, output: String) {
            display("HCP call for '{}' failed, with parameters: '{}'.Error:: {}.", command, parameters, output)
        }

        HcpConfiguration(command: String) {
            display("HCP command '{}' not found.", command)
        }

        /// Sourcing a shell configuration script failed.
        EnvironmentParse(stderr: String) {
            display("Could not parse 'sh_file' {}. Maybe you should check if all the dependencies are installed", stderr)
        }

        InvalidFsSurfaceFormat {
            display("Invalid FreeSurfer surf file")
        }

        UnsupportedFsAnnotFormatVersion {
            display("Unsupported FreeSurfer annot file format version")
        }

        InvalidFsMghFormat {
            display("Invalid FreeSurfer MGH file")
        }

        /// Mesh topology is inconsistent.
        InvalidMesh(msg: String) {
            display("Invalid mesh: {}", msg)
        }

        /// I/O Error
        Io(err: IOError) {
            from()
            source(err)
            display("I/O error: {}", err)
        }

        Csv(err: csv::Error) {
            from()
            source(err)
            display("CSV error: {}", err)
        }

        Json(err: serde_json::Error) {
            from()
            source(err)
            display("JSON error: {}", err)
        }

        Nifti(err: nifti::NiftiError) {
            from()
            source(err)
            display("NIfTI error: {}", err)
        }

        Npz(err: ndarray_npy::WriteNpzError) {
            from()
            source(err)
            display("npz error: {}", err)
        }

        Shape(err: ndarray::ShapeError) {
            from()
            source(err)
            display("Array shape error: {}", err)
        }

        Pattern(err: glob::PatternError) {
            from()
            source(err)
            display("Invalid glob pattern: {}", err)
        }

        Glob(err: glob::GlobError) {
            from()
            source(err)
            display("Glob error: {}", err)
        }

        Regex(err: regex::Error) {
            from()
            source(err)
            display("Invalid regex: {}", err)
        }
    }
}

/// Alias type for results originated from this crate.
pub type Result<T> = ::std::result::Result<T, FsError>;
