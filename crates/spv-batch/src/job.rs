//! Discovery of shader sources and the jobs derived from them.

use std::{
    collections::{BTreeSet, HashMap},
    ffi::{OsStr, OsString},
    fs, io,
    path::{Path, PathBuf},
};

/// Extensions recognized as shader sources when none are configured.
pub const DEFAULT_EXTENSIONS: [&str; 2] = ["frag", "vert"];

/// Extension appended to every compiled output.
pub const OUTPUT_EXTENSION: &str = "spv";

/// The set of file extensions (without the dot) treated as shader sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionSet(BTreeSet<String>);

impl ExtensionSet {
    /// Creates a set from the given extensions. A leading dot is ignored.
    #[inline]
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            extensions
                .into_iter()
                .map(|ext| ext.as_ref().trim_start_matches('.').to_owned())
                .filter(|ext| !ext.is_empty())
                .collect(),
        )
    }

    /// Whether `extension` (without the dot) is recognized.
    #[inline]
    #[must_use]
    pub fn contains(&self, extension: &str) -> bool {
        self.0.contains(extension)
    }

    /// Iterates over the recognized extensions in sorted order.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl Default for ExtensionSet {
    #[inline]
    fn default() -> Self {
        Self::new(DEFAULT_EXTENSIONS)
    }
}

/// How the output path of a job is derived from its source path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub enum OutputNaming {
    /// `<extension>.spv`, so `water.frag` becomes `frag.spv`.
    ///
    /// Every source sharing an extension writes to the same output.
    #[default]
    Extension,
    /// `<file name>.spv`, so `water.frag` becomes `water.frag.spv`.
    Stem,
}

impl OutputNaming {
    /// Output file name for a source named `file_name` with the given `extension`.
    #[inline]
    #[must_use]
    pub fn file_name(self, file_name: &OsStr, extension: &str) -> OsString {
        match self {
            Self::Extension => format!("{extension}.{OUTPUT_EXTENSION}").into(),
            Self::Stem => {
                let mut name = file_name.to_os_string();
                name.push(".");
                name.push(OUTPUT_EXTENSION);
                name
            }
        }
    }
}

/// One shader source to compile.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct ShaderJob {
    /// Path of the shader source.
    pub source: PathBuf,
    /// Path the compiled bytecode is written to.
    pub output: PathBuf,
    /// Recognized extension of the source, without the dot.
    pub extension: String,
}

impl ShaderJob {
    /// Creates a job for `source`, deriving its output inside `output_dir`.
    ///
    /// Returns `None` when `source` has no file name or no UTF-8 extension. The rest of the
    /// file name may be any bytes the platform allows.
    #[must_use]
    pub fn new(source: PathBuf, naming: OutputNaming, output_dir: &Path) -> Option<Self> {
        let file_name = source.file_name()?;
        let extension = source.extension().and_then(OsStr::to_str)?.to_owned();
        let output = output_dir.join(naming.file_name(file_name, &extension));
        Some(Self {
            source,
            output,
            extension,
        })
    }
}

/// An error indicating that shader sources could not be discovered.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DiscoverError {
    /// The shader directory does not exist or is not a directory.
    #[error("invalid shader directory '{}': {reason}", path.display())]
    InvalidDirectory {
        /// The offending path.
        path: PathBuf,
        /// Why it was rejected.
        reason: &'static str,
    },
    /// The shader directory could not be listed.
    #[error("could not read shader directory '{}': {source}", path.display())]
    ReadDir {
        /// The directory being listed.
        path: PathBuf,
        /// Source of the error.
        source: io::Error,
    },
}

/// Lists `directory` (non-recursively) and creates one [`ShaderJob`] for every regular file
/// whose extension is in `extensions`.
///
/// # Errors
///
/// Fails if `directory` is missing, is not a directory, or can't be listed.
/// Individual entries that can't be inspected are skipped.
pub fn discover(
    directory: &Path,
    extensions: &ExtensionSet,
    naming: OutputNaming,
    output_dir: &Path,
) -> Result<Vec<ShaderJob>, DiscoverError> {
    let metadata = fs::metadata(directory).map_err(|_err| DiscoverError::InvalidDirectory {
        path: directory.to_path_buf(),
        reason: "it does not exist",
    })?;
    if !metadata.is_dir() {
        return Err(DiscoverError::InvalidDirectory {
            path: directory.to_path_buf(),
            reason: "it is not a directory",
        });
    }

    let read_dir_err = |source| DiscoverError::ReadDir {
        path: directory.to_path_buf(),
        source,
    };
    let mut jobs = Vec::new();
    for maybe_entry in fs::read_dir(directory).map_err(read_dir_err)? {
        let entry = maybe_entry.map_err(read_dir_err)?;
        let path = entry.path();
        // Follows symlinks, so a link to a shader is compiled like the shader itself.
        match fs::metadata(&path) {
            Ok(metadata) if metadata.is_file() => {}
            Ok(_) => continue,
            Err(err) => {
                log::warn!("skipping '{}': {err}", path.display());
                continue;
            }
        }
        let recognized = path
            .extension()
            .and_then(OsStr::to_str)
            .is_some_and(|ext| extensions.contains(ext));
        if !recognized {
            log::trace!("ignoring '{}'", path.display());
            continue;
        }
        match ShaderJob::new(path.clone(), naming, output_dir) {
            Some(job) => jobs.push(job),
            None => log::warn!("skipping '{}': no usable file name", path.display()),
        }
    }
    // Only for stable log output, the batch itself treats jobs as unordered.
    jobs.sort_by(|lhs, rhs| lhs.source.cmp(&rhs.source));
    log::debug!(
        "discovered {} shader(s) in '{}'",
        jobs.len(),
        directory.display()
    );
    Ok(jobs)
}

/// Groups jobs writing to the same output, returning only the groups with more than one source.
#[must_use]
pub fn output_collisions(jobs: &[ShaderJob]) -> Vec<(&Path, Vec<&Path>)> {
    let mut by_output: HashMap<&Path, Vec<&Path>> = HashMap::new();
    for job in jobs {
        by_output
            .entry(job.output.as_path())
            .or_default()
            .push(job.source.as_path());
    }
    let mut collisions: Vec<_> = by_output
        .into_iter()
        .filter(|(_, sources)| sources.len() > 1)
        .collect();
    collisions.sort();
    collisions
}

#[cfg(test)]
mod test {
    use spv_batch_test_utils::ShaderDir;

    use super::*;

    fn file_names(jobs: &[ShaderJob]) -> Vec<&str> {
        jobs.iter()
            .filter_map(|job| job.source.file_name().and_then(OsStr::to_str))
            .collect()
    }

    #[test_log::test]
    fn keeps_only_recognized_extensions() {
        let dir =
            ShaderDir::with_files(["a.vert", "b.frag", "c.txt", "frag", "d.frag.bak"]).unwrap();
        let jobs = discover(
            dir.path(),
            &ExtensionSet::default(),
            OutputNaming::Extension,
            Path::new("."),
        )
        .unwrap();
        assert_eq!(file_names(&jobs), ["a.vert", "b.frag"]);
        assert_eq!(jobs[0].output, Path::new("./vert.spv"));
        assert_eq!(jobs[1].output, Path::new("./frag.spv"));
        assert_eq!(jobs[1].extension, "frag");
    }

    #[test_log::test]
    fn does_not_descend_into_subdirectories() {
        let dir = ShaderDir::with_files(["top.vert"]).unwrap();
        let nested = dir.add_dir("nested.frag").unwrap();
        std::fs::write(nested.join("deep.frag"), "").unwrap();
        let jobs = discover(
            dir.path(),
            &ExtensionSet::default(),
            OutputNaming::Extension,
            Path::new("."),
        )
        .unwrap();
        assert_eq!(file_names(&jobs), ["top.vert"]);
    }

    #[test_log::test]
    fn only_unrecognized_files_yield_no_jobs() {
        let dir = ShaderDir::with_files(["readme.md", "c.txt"]).unwrap();
        let jobs = discover(
            dir.path(),
            &ExtensionSet::default(),
            OutputNaming::Extension,
            Path::new("."),
        )
        .unwrap();
        assert!(jobs.is_empty());
    }

    #[test_log::test]
    fn configured_extensions_extend_the_set() {
        let dir = ShaderDir::with_files(["a.comp", "b.frag", "c.vert"]).unwrap();
        let extensions = ExtensionSet::new([".comp", "frag"]);
        let jobs = discover(dir.path(), &extensions, OutputNaming::Stem, Path::new("out")).unwrap();
        assert_eq!(file_names(&jobs), ["a.comp", "b.frag"]);
        assert_eq!(jobs[0].output, Path::new("out/a.comp.spv"));
    }

    #[cfg(unix)]
    #[test_log::test]
    fn non_utf8_file_names_are_compiled() {
        use std::os::unix::ffi::OsStrExt as _;

        let dir = ShaderDir::new().unwrap();
        let name = OsStr::from_bytes(b"w\xffater.frag");
        std::fs::write(dir.path().join(name), "").unwrap();

        let jobs = discover(
            dir.path(),
            &ExtensionSet::default(),
            OutputNaming::Extension,
            Path::new("."),
        )
        .unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].source.file_name(), Some(name));
        assert_eq!(jobs[0].output, Path::new("./frag.spv"));

        let jobs = discover(
            dir.path(),
            &ExtensionSet::default(),
            OutputNaming::Stem,
            Path::new("out"),
        )
        .unwrap();
        assert_eq!(
            jobs[0].output.file_name().map(OsStr::as_bytes),
            Some(&b"w\xffater.frag.spv"[..])
        );
    }

    #[cfg(unix)]
    #[test_log::test]
    fn symlinked_shaders_are_followed() {
        let dir = ShaderDir::new().unwrap();
        let real = dir.add_dir("real").unwrap();
        std::fs::write(real.join("water.frag"), "").unwrap();
        let link = |target: &Path, name: &str| {
            std::os::unix::fs::symlink(target, dir.path().join(name)).unwrap();
        };
        link(&real.join("water.frag"), "link.frag");
        link(&dir.path().join("gone.vert"), "dangling.vert");

        let jobs = discover(
            dir.path(),
            &ExtensionSet::default(),
            OutputNaming::Extension,
            Path::new("."),
        )
        .unwrap();
        assert_eq!(file_names(&jobs), ["link.frag"]);
    }

    #[test_log::test]
    fn missing_directory_is_invalid() {
        let dir = ShaderDir::new().unwrap();
        let missing = dir.path().join("nope");
        let err = discover(
            &missing,
            &ExtensionSet::default(),
            OutputNaming::Extension,
            Path::new("."),
        )
        .unwrap_err();
        assert!(matches!(err, DiscoverError::InvalidDirectory { .. }), "{err}");
    }

    #[test_log::test]
    fn file_is_not_a_directory() {
        let dir = ShaderDir::new().unwrap();
        let file = dir.add_file("a.vert").unwrap();
        let err = discover(
            &file,
            &ExtensionSet::default(),
            OutputNaming::Extension,
            Path::new("."),
        )
        .unwrap_err();
        assert!(err.to_string().contains("not a directory"), "{err}");
    }

    #[test]
    fn extension_naming_collides_and_stem_naming_does_not() {
        let sources = ["x/water.frag", "x/fire.frag", "x/sky.vert"];
        let jobs = |naming| -> Vec<ShaderJob> {
            sources
                .iter()
                .filter_map(|src| ShaderJob::new(PathBuf::from(src), naming, Path::new("out")))
                .collect()
        };

        let by_extension = jobs(OutputNaming::Extension);
        let collisions = output_collisions(&by_extension);
        assert_eq!(collisions.len(), 1);
        assert_eq!(collisions[0].0, Path::new("out/frag.spv"));
        assert_eq!(collisions[0].1.len(), 2);

        assert!(output_collisions(&jobs(OutputNaming::Stem)).is_empty());
    }
}
