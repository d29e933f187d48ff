//! Manage and merge the sources of config:
//! the optional `spv-batch.toml` file and the provided args.

use std::{
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context as _;
use spv_batch::{
    batch::{BatchCompiler, Cancellation},
    compile::{Compiler, DEFAULT_COMPILER, DEFAULT_TIMEOUT},
    job::{ExtensionSet, OutputNaming, DEFAULT_EXTENSIONS},
};

use crate::merge::merge;

/// File looked up in the shader directory when no `--config` is given.
pub const CONFIG_FILE_NAME: &str = "spv-batch.toml";

/// Options of a batch, from the command line or the config file.
#[derive(Clone, Debug, PartialEq, Eq, clap::Args, serde::Deserialize, serde::Serialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
#[non_exhaustive]
pub struct Options {
    /// Shader compiler to run, looked up on `PATH`.
    #[clap(long, default_value = DEFAULT_COMPILER)]
    pub compiler: String,

    /// Extension of the files to compile, without the dot. Can be repeated.
    #[clap(long = "extension", value_name = "EXT", default_values = DEFAULT_EXTENSIONS)]
    pub extensions: Vec<String>,

    /// Where to write the compiled `.spv` files.
    #[clap(long, default_value = ".")]
    pub output_dir: PathBuf,

    /// How output file names are derived.
    ///
    /// `extension` names every output after the source's extension (`frag.spv`), so shaders
    /// sharing an extension overwrite each other. `stem` keeps the source's file name
    /// (`water.frag.spv`).
    #[clap(long, value_enum, default_value_t)]
    pub output_naming: OutputNaming,

    /// Number of shaders compiled at once. Defaults to the available parallelism.
    #[clap(long, short)]
    pub jobs: Option<NonZeroUsize>,

    /// Seconds a single compiler invocation may take before it is killed.
    #[clap(long, default_value_t = DEFAULT_TIMEOUT.as_secs())]
    pub timeout: u64,

    /// Extra argument passed to the compiler before the source. Can be repeated.
    #[clap(long = "compiler-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub compiler_args: Vec<String>,

    /// Exit successfully even if some shaders failed to compile.
    #[clap(long, action)]
    pub allow_failures: bool,
}

impl Default for Options {
    #[inline]
    fn default() -> Self {
        Self {
            compiler: DEFAULT_COMPILER.to_owned(),
            extensions: DEFAULT_EXTENSIONS.map(str::to_owned).to_vec(),
            output_dir: PathBuf::from("."),
            output_naming: OutputNaming::default(),
            jobs: None,
            timeout: DEFAULT_TIMEOUT.as_secs(),
            compiler_args: Vec::new(),
            allow_failures: false,
        }
    }
}

impl Options {
    /// Reads options from a TOML config file.
    ///
    /// # Errors
    /// If the file can't be read or parsed.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("could not read config file '{}'", path.display()))?;
        let options = toml::from_str(&text)
            .with_context(|| format!("could not parse config file '{}'", path.display()))?;
        Ok(options)
    }

    /// Overrides the options of the config file at `path` with `self`.
    ///
    /// # Errors
    /// If the file can't be read or parsed.
    pub fn with_config_file(&self, path: &Path) -> anyhow::Result<Self> {
        let from_file = Self::from_file(path)?;
        let merged = merge(&from_file, self)?;
        Ok(merged)
    }

    /// The per-invocation timeout, with `0` meaning none.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout > 0).then(|| Duration::from_secs(self.timeout))
    }

    /// Creates a batch compiler configured by these options.
    #[must_use]
    pub fn batch_compiler(&self, cancellation: Cancellation) -> BatchCompiler {
        let compiler = Compiler::new(&self.compiler)
            .extra_args(&self.compiler_args)
            .timeout(self.timeout());
        BatchCompiler::from(compiler)
            .extensions(ExtensionSet::new(&self.extensions))
            .naming(self.output_naming)
            .output_dir(&self.output_dir)
            .jobs(self.jobs)
            .cancellation(cancellation)
    }
}

#[cfg(test)]
mod test {
    use clap::Parser as _;
    use spv_batch_test_utils::ShaderDir;

    use crate::Cli;

    use super::*;

    fn write_config(dir: &ShaderDir, lines: &[&str]) -> PathBuf {
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, lines.join("\n")).unwrap();
        path
    }

    #[test_log::test]
    fn defaults_match_the_command_line() {
        let cli = Cli::parse_from(["spv-batch", "shaders"]);
        assert_eq!(cli.options, Options::default());
    }

    #[test_log::test]
    fn values_from_config_file() {
        let dir = ShaderDir::new().unwrap();
        let path = write_config(
            &dir,
            &[
                "compiler = \"/opt/vulkan/bin/glslc\"",
                "extensions = [\"comp\", \"frag\"]",
                "output-naming = \"stem\"",
                "jobs = 2",
                "allow-failures = true",
            ],
        );
        let options = Options::default().with_config_file(&path).unwrap();
        assert_eq!(options.compiler, "/opt/vulkan/bin/glslc");
        assert_eq!(options.extensions, ["comp", "frag"]);
        assert_eq!(options.output_naming, OutputNaming::Stem);
        assert_eq!(options.jobs, NonZeroUsize::new(2));
        assert!(options.allow_failures);
        assert_eq!(options.timeout, 30);
    }

    #[test_log::test]
    fn config_file_overwritten_by_cli() {
        let dir = ShaderDir::new().unwrap();
        let path = write_config(&dir, &["output-dir = \"/the/moon\"", "timeout = 5"]);
        let cli = Cli::parse_from(["spv-batch", "shaders", "--output-dir", "/the/river"]);
        let options = cli.options.with_config_file(&path).unwrap();
        assert_eq!(options.output_dir, Path::new("/the/river"));
        assert_eq!(options.timeout, 5);
    }

    #[test_log::test]
    fn unknown_keys_are_rejected() {
        let dir = ShaderDir::new().unwrap();
        let path = write_config(&dir, &["optimise = true"]);
        let err = Options::from_file(&path).unwrap_err();
        assert!(format!("{err:#}").contains("could not parse config file"), "{err:#}");
    }

    #[test_log::test]
    fn zero_timeout_disables_it() {
        let options = Options {
            timeout: 0,
            ..Options::default()
        };
        assert_eq!(options.timeout(), None);
        assert_eq!(Options::default().timeout(), Some(DEFAULT_TIMEOUT));
    }

    #[test_log::test]
    fn builds_a_configured_batch_compiler() {
        let cli = Cli::parse_from([
            "spv-batch",
            "shaders",
            "--compiler",
            "glslangValidator",
            "--extension",
            "comp",
            "--compiler-arg",
            "-O",
            "--jobs",
            "3",
            "--timeout",
            "7",
        ]);
        let batch = cli.options.batch_compiler(Cancellation::new());
        assert_eq!(batch.compiler.program, "glslangValidator");
        assert_eq!(batch.compiler.extra_args, ["-O"]);
        assert_eq!(batch.compiler.timeout, Some(Duration::from_secs(7)));
        assert_eq!(batch.extensions, ExtensionSet::new(["comp"]));
        assert_eq!(batch.jobs, NonZeroUsize::new(3));
    }
}
