/*!
 * Segment transforms for compress mode
 *
 * A transform takes one rank's private segment file and produces its
 * compressed form next to it. The pipeline only needs the output path and
 * whether the transform succeeded; the output's size decides the rank's
 * slot in the shared destination.
 *
 * Zstd and gzip both decode a concatenation of independently compressed
 * frames as one stream, which is what makes segment-wise compression
 * reassemble into a valid file.
 */

use std::ffi::OsString;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::config::{Codec, CompressConfig};
use crate::error::{CollateError, Result};

/// Byte transform applied to one segment file
pub trait Transform: Send + Sync {
    /// Short name for log lines
    fn name(&self) -> &str;

    /// Suffix the transform appends to its input's name
    fn suffix(&self) -> &str;

    /// Transform `input` and return the path of the produced file
    ///
    /// On success `input` may have been consumed; on failure no output is left behind.
    fn transform(&self, input: &Path) -> Result<PathBuf>;
}

/// In-process Zstd compression
#[derive(Debug, Clone)]
pub struct ZstdTransform {
    level: i32,
}

impl ZstdTransform {
    pub fn new(level: i32) -> Self {
        Self { level }
    }
}

impl Transform for ZstdTransform {
    fn name(&self) -> &str {
        "zstd"
    }

    fn suffix(&self) -> &str {
        ".zst"
    }

    fn transform(&self, input: &Path) -> Result<PathBuf> {
        let output_path = with_suffix(input, self.suffix());
        let cleanup = TempFileCleanup::new(&output_path);

        let reader = BufReader::new(File::open(input)?);
        let mut writer = BufWriter::new(File::create(&output_path)?);
        zstd::stream::copy_encode(reader, &mut writer, self.level)
            .map_err(|e| CollateError::Compression(e.to_string()))?;
        writer.flush()?;

        cleanup.keep();
        std::fs::remove_file(input)?;
        Ok(output_path)
    }
}

/// External compressor invoked as `program args... FILE`, expected to produce `FILE<suffix>`
#[derive(Debug, Clone)]
pub struct CommandTransform {
    program: String,
    args: Vec<String>,
    suffix: String,
}

impl CommandTransform {
    pub fn new(program: impl Into<String>, args: Vec<String>, suffix: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args,
            suffix: suffix.into(),
        }
    }
}

impl Transform for CommandTransform {
    fn name(&self) -> &str {
        &self.program
    }

    fn suffix(&self) -> &str {
        &self.suffix
    }

    fn transform(&self, input: &Path) -> Result<PathBuf> {
        let output_path = with_suffix(input, &self.suffix);
        let cleanup = TempFileCleanup::new(&output_path);

        debug!("Running {} {:?} {}", self.program, self.args, input.display());
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(input)
            .status()
            .map_err(|e| CollateError::Transform {
                program: self.program.clone(),
                path: input.to_path_buf(),
                status: e.to_string(),
            })?;

        if !status.success() {
            return Err(CollateError::Transform {
                program: self.program.clone(),
                path: input.to_path_buf(),
                status: status.to_string(),
            });
        }

        if !output_path.is_file() {
            return Err(CollateError::Transform {
                program: self.program.clone(),
                path: input.to_path_buf(),
                status: format!("no output at {}", output_path.display()),
            });
        }

        cleanup.keep();
        Ok(output_path)
    }
}

/// Build the transform selected by `config`
pub fn build_transform(config: &CompressConfig) -> Box<dyn Transform> {
    match &config.codec {
        Codec::Zstd { level } => Box::new(ZstdTransform::new(*level)),
        Codec::Command {
            program,
            args,
            suffix,
        } => Box::new(CommandTransform::new(program.clone(), args.clone(), suffix.clone())),
    }
}

/// Decode a (possibly multi-frame) Zstd file into `dest_path`
///
/// Returns the number of decoded bytes.
pub fn decompress_file(source_path: &Path, dest_path: &Path) -> Result<u64> {
    let cleanup = TempFileCleanup::new(dest_path);

    let reader = BufReader::new(File::open(source_path)?);
    let mut decoder = zstd::stream::read::Decoder::new(reader)
        .map_err(|e| CollateError::Compression(e.to_string()))?;
    let mut writer = BufWriter::new(File::create(dest_path)?);
    let decoded = std::io::copy(&mut decoder, &mut writer)
        .map_err(|e| CollateError::Compression(format!("{}: {}", source_path.display(), e)))?;
    writer.flush()?;

    cleanup.keep();
    Ok(decoded)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// RAII helper for temporary file cleanup
///
/// Removes the file on drop unless `keep` was called.
pub(crate) struct TempFileCleanup {
    path: PathBuf,
    armed: bool,
}

impl TempFileCleanup {
    pub(crate) fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            armed: true,
        }
    }

    pub(crate) fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileCleanup {
    fn drop(&mut self) {
        if self.armed && self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                tracing::warn!(
                    "Failed to clean up temporary file {}: {}",
                    self.path.display(),
                    e
                );
            }
        }
    }
}
