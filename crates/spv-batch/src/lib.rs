//! Batch compiler of GLSL shader directories into SPIR-V.
//!
//! This library scans one directory for shader sources (`.frag` and `.vert` by default),
//! runs an external compiler such as `glslc` once per source on a pool of worker threads,
//! and reports every outcome as it arrives. A failing, hanging or missing compiler for
//! one shader never aborts the rest of the batch.
//!
//! # How it works
//!
//! 1. The compiler is asked for its version once, so a missing compiler is reported
//!    before any file is looked at.
//! 2. The directory is listed (non-recursively) into [`ShaderJob`](job::ShaderJob)s.
//! 3. Every job is handed to a free worker, which runs
//!    `<compiler> <source> -o <output>` through a [`ProcessRunner`](command::ProcessRunner)
//!    under a timeout.
//! 4. Results are collected in completion order into a [`BatchReport`](batch::BatchReport).
//!
//! ```no_run
//! use std::path::Path;
//!
//! use spv_batch::{batch::BatchCompiler, compile::Compiler};
//!
//! let mut batch = BatchCompiler::from(Compiler::new("glslc"));
//! let report = batch.compile_all(Path::new("shaders"))?;
//! assert!(report.is_success());
//! # Ok::<(), spv_batch::batch::BatchError>(())
//! ```

pub mod batch;
pub mod command;
pub mod compile;
pub mod job;


/// Central function to write to the user.
///
/// Writes and flushes the formatted text to the given [`io::Write`](std::io::Write),
/// returning the [`io::Result`](std::io::Result).
#[macro_export]
macro_rules! user_output {
    ($dst: expr, $($args: tt)*) => { {
        use ::std::io::Write as _;

        let dst = &mut $dst;
        match ::std::write!(dst, $($args)*) {
            Ok(()) => dst.flush(),
            Err(err) => Err(err),
        }
    } };
}
