//! PDF optimization.
//!
//! Optimization is a list of tiers tried in order until one produces the
//! destination file. The default list puts an external Ghostscript run first
//! and the in-process `lopdf` rewrite second. A tier that cannot run reports
//! [`TierOutcome::Skipped`]; a tier that fails hard ends the job.

mod ghostscript;
mod images;
mod library;

pub use ghostscript::Ghostscript;
pub use images::{extract_images, recompress_images};
pub use library::{LibraryOptimizer, optimize_document};

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::config::{PdfPolicy, RasterPolicy};
use crate::error::{Error, IoContext, PdfStage, Result};

/// Result of a single tier attempt that did not fail hard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierOutcome {
    /// The destination now holds the optimized document.
    Optimized,
    /// The tier could not run; the reason is logged and the next tier runs.
    Skipped(String),
}

/// One strategy for shrinking a PDF.
#[async_trait]
pub trait OptimizationTier: Send + Sync {
    /// Short name used in log lines.
    fn name(&self) -> &'static str;

    async fn try_optimize(&self, source: &Path, dest: &Path) -> Result<TierOutcome>;
}

pub struct PdfOptimizer {
    tiers: Vec<Box<dyn OptimizationTier>>,
    keep_smaller: bool,
}

impl PdfOptimizer {
    /// External tool (when configured) followed by the library fallback.
    pub fn new(policy: &PdfPolicy, raster: &RasterPolicy) -> Self {
        let mut tiers: Vec<Box<dyn OptimizationTier>> = Vec::new();
        if let Some(program) = &policy.ghostscript {
            tiers.push(Box::new(Ghostscript::new(program.clone(), policy)));
        }
        tiers.push(Box::new(LibraryOptimizer::new(
            policy.optimization,
            raster.clone(),
        )));
        Self::with_tiers(tiers, policy.keep_smaller)
    }

    pub fn with_tiers(tiers: Vec<Box<dyn OptimizationTier>>, keep_smaller: bool) -> Self {
        Self { tiers, keep_smaller }
    }

    pub fn tier_names(&self) -> Vec<&'static str> {
        self.tiers.iter().map(|tier| tier.name()).collect()
    }

    /// Optimize `source` into `dest`, returning the name of the tier that won.
    pub async fn optimize(&self, source: &Path, dest: &Path) -> Result<&'static str> {
        let original_size = fs::metadata(source).await.at(source)?.len();

        // Tiers never read and write the same file
        let mut scratch = Scratch::default();
        let input = if same_file(source, dest).await {
            let staged = scratch.file(dest, ".source");
            fs::copy(source, &staged).await.at(&staged)?;
            staged
        } else {
            source.to_path_buf()
        };

        let mut winner = None;
        for tier in &self.tiers {
            match tier.try_optimize(&input, dest).await? {
                TierOutcome::Optimized => {
                    winner = Some(tier.name());
                    break;
                }
                TierOutcome::Skipped(reason) => {
                    log::warn!("{} unavailable, trying next tier: {}", tier.name(), reason);
                }
            }
        }

        let Some(winner) = winner else {
            return Err(Error::Optimization {
                stage: PdfStage::Finalize,
                message: "no optimization tier produced an output".to_string(),
            });
        };
        log::info!("optimized '{}' with {}", source.display(), winner);

        if self.keep_smaller {
            let optimized_size = fs::metadata(dest)
                .await
                .map_err(|e| Error::Optimization {
                    stage: PdfStage::Finalize,
                    message: format!("{} produced no output: {}", winner, e),
                })?
                .len();
            if optimized_size > original_size {
                log::info!(
                    "optimized output is larger ({} > {} bytes), keeping the original",
                    optimized_size,
                    original_size
                );
                fs::copy(&input, dest).await.at(dest)?;
            }
        }

        Ok(winner)
    }
}

/// Temporary files and directories removed when dropped, on every exit path.
#[derive(Debug, Default)]
pub(crate) struct Scratch {
    files: Vec<PathBuf>,
    dirs: Vec<PathBuf>,
}

impl Scratch {
    /// Register `base` + `suffix` as a scratch file.
    pub(crate) fn file(&mut self, base: &Path, suffix: &str) -> PathBuf {
        let path = with_suffix(base, suffix);
        self.files.push(path.clone());
        path
    }

    /// Register `base` + `suffix` as a scratch directory.
    pub(crate) fn dir(&mut self, base: &Path, suffix: &str) -> PathBuf {
        let path = with_suffix(base, suffix);
        self.dirs.push(path.clone());
        path
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        for file in &self.files {
            let _ = std::fs::remove_file(file);
        }
        for dir in &self.dirs {
            let _ = std::fs::remove_dir_all(dir);
        }
    }
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = base.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

async fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a).await, fs::canonicalize(b).await) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        outcome: TierOutcome,
        output: Option<Vec<u8>>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl OptimizationTier for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn try_optimize(&self, _source: &Path, dest: &Path) -> Result<TierOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(bytes) = &self.output {
                fs::write(dest, bytes).await.at(dest)?;
            }
            Ok(self.outcome.clone())
        }
    }

    fn tier(outcome: TierOutcome, output: Option<&[u8]>, calls: &Arc<AtomicUsize>) -> Box<dyn OptimizationTier> {
        Box::new(Fixed {
            outcome,
            output: output.map(<[u8]>::to_vec),
            calls: Arc::clone(calls),
        })
    }

    #[tokio::test]
    async fn first_successful_tier_wins() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.pdf");
        let dest = dir.path().join("out.pdf");
        fs::write(&source, b"0123456789").await.unwrap();

        let skipped = Arc::new(AtomicUsize::new(0));
        let winner = Arc::new(AtomicUsize::new(0));
        let unused = Arc::new(AtomicUsize::new(0));
        let optimizer = PdfOptimizer::with_tiers(
            vec![
                tier(TierOutcome::Skipped("missing".into()), None, &skipped),
                tier(TierOutcome::Optimized, Some(b"small"), &winner),
                tier(TierOutcome::Optimized, Some(b"other"), &unused),
            ],
            true,
        );

        optimizer.optimize(&source, &dest).await.unwrap();
        assert_eq!(skipped.load(Ordering::SeqCst), 1);
        assert_eq!(winner.load(Ordering::SeqCst), 1);
        assert_eq!(unused.load(Ordering::SeqCst), 0);
        assert_eq!(fs::read(&dest).await.unwrap(), b"small");
    }

    #[tokio::test]
    async fn exhausted_tiers_report_finalize_stage() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.pdf");
        fs::write(&source, b"data").await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let optimizer =
            PdfOptimizer::with_tiers(vec![tier(TierOutcome::Skipped("no".into()), None, &calls)], true);

        let result = optimizer.optimize(&source, &dir.path().join("out.pdf")).await;
        assert!(matches!(
            result,
            Err(Error::Optimization { stage: PdfStage::Finalize, .. })
        ));
    }

    #[tokio::test]
    async fn larger_output_is_replaced_by_source() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.pdf");
        let dest = dir.path().join("out.pdf");
        fs::write(&source, b"tiny").await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let optimizer = PdfOptimizer::with_tiers(
            vec![tier(TierOutcome::Optimized, Some(b"much larger output"), &calls)],
            true,
        );

        optimizer.optimize(&source, &dest).await.unwrap();
        assert_eq!(fs::read(&dest).await.unwrap(), b"tiny");
    }

    #[test]
    fn ghostscript_runs_before_library_fallback() {
        let raster = RasterPolicy::default();
        let optimizer = PdfOptimizer::new(&PdfPolicy::default(), &raster);
        assert_eq!(optimizer.tier_names(), ["ghostscript", "lopdf"]);

        let policy = PdfPolicy {
            ghostscript: None,
            ..PdfPolicy::default()
        };
        assert_eq!(PdfOptimizer::new(&policy, &raster).tier_names(), ["lopdf"]);
    }

    #[test]
    fn scratch_paths_are_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("out.pdf");
        let (file, folder) = {
            let mut scratch = Scratch::default();
            let file = scratch.file(&base, ".temp1");
            let folder = scratch.dir(&base, ".tempdir");
            std::fs::write(&file, b"x").unwrap();
            std::fs::create_dir_all(folder.join("nested")).unwrap();
            (file, folder)
        };
        assert_eq!(file, dir.path().join("out.pdf.temp1"));
        assert!(!file.exists());
        assert!(!folder.exists());
    }
}
