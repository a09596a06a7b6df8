use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use crate::config::PdfPolicy;
use crate::error::Result;

use super::{OptimizationTier, TierOutcome};

/// Screen-resolution rewrite through an external Ghostscript binary.
///
/// The process runs to completion with no timeout.
#[derive(Debug, Clone)]
pub struct Ghostscript {
    program: PathBuf,
    resolution_dpi: u32,
    compatibility_level: String,
}

impl Ghostscript {
    pub fn new(program: PathBuf, policy: &PdfPolicy) -> Self {
        Self {
            program,
            resolution_dpi: policy.resolution_dpi,
            compatibility_level: policy.compatibility_level.clone(),
        }
    }

    /// Command line passed to the binary.
    pub fn arguments(&self, source: &Path, dest: &Path) -> Vec<OsString> {
        let dpi = self.resolution_dpi;
        let mut args: Vec<OsString> = [
            "-sDEVICE=pdfwrite".to_string(),
            "-dPDFSETTINGS=/screen".to_string(),
            format!("-dCompatibilityLevel={}", self.compatibility_level),
            "-dNOPAUSE".to_string(),
            "-dQUIET".to_string(),
            "-dBATCH".to_string(),
            "-dColorImageDownsampleType=/Bicubic".to_string(),
            format!("-dColorImageResolution={dpi}"),
            "-dGrayImageDownsampleType=/Bicubic".to_string(),
            format!("-dGrayImageResolution={dpi}"),
            "-dMonoImageDownsampleType=/Bicubic".to_string(),
            format!("-dMonoImageResolution={dpi}"),
        ]
        .into_iter()
        .map(OsString::from)
        .collect();

        let mut output = OsString::from("-sOutputFile=");
        output.push(dest);
        args.push(output);
        args.push(source.as_os_str().to_owned());
        args
    }
}

#[async_trait]
impl OptimizationTier for Ghostscript {
    fn name(&self) -> &'static str {
        "ghostscript"
    }

    async fn try_optimize(&self, source: &Path, dest: &Path) -> Result<TierOutcome> {
        log::debug!("running {}", self.program.display());
        let output = Command::new(&self.program)
            .args(self.arguments(source, dest))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await;

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                return Ok(TierOutcome::Skipped(format!(
                    "cannot run '{}': {}",
                    self.program.display(),
                    e
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Ok(TierOutcome::Skipped(format!(
                "'{}' exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            )));
        }

        Ok(TierOutcome::Optimized)
    }
}
