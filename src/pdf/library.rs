//! In-process fallback built on `lopdf`.
//!
//! Embedded images are extracted to a scratch directory and recompressed
//! there; the structural rewrite then runs twice, source to intermediate and
//! intermediate to destination. The recompressed images are not written back
//! into the document.

use async_trait::async_trait;
use lopdf::Document;
use lopdf::xref::XrefType;
use std::path::Path;
use tokio::fs;

use crate::config::{PdfOptimizationConfig, RasterPolicy};
use crate::error::{Error, PdfStage, Result};
use crate::io::blocking;

use super::images::{extract_images, recompress_images};
use super::{OptimizationTier, Scratch, TierOutcome};

#[derive(Debug, Clone)]
pub struct LibraryOptimizer {
    config: PdfOptimizationConfig,
    raster: RasterPolicy,
}

impl LibraryOptimizer {
    pub fn new(config: PdfOptimizationConfig, raster: RasterPolicy) -> Self {
        Self { config, raster }
    }

    async fn structural_pass(&self, input: &Path, output: &Path, stage: PdfStage) -> Result<()> {
        let (input, output_owned) = (input.to_path_buf(), output.to_path_buf());
        let config = self.config;
        blocking(output, move || {
            optimize_document(&input, &output_owned, &config).map_err(|message| Error::Optimization {
                stage,
                message,
            })
        })
        .await
    }
}

#[async_trait]
impl OptimizationTier for LibraryOptimizer {
    fn name(&self) -> &'static str {
        "lopdf"
    }

    async fn try_optimize(&self, source: &Path, dest: &Path) -> Result<TierOutcome> {
        let mut scratch = Scratch::default();
        let intermediate = scratch.file(dest, ".temp1");
        let image_dir = scratch.dir(dest, ".tempdir");

        fs::create_dir_all(&image_dir)
            .await
            .map_err(|e| Error::Optimization {
                stage: PdfStage::Setup,
                message: format!("cannot create '{}': {}", image_dir.display(), e),
            })?;

        let (src, dir) = (source.to_path_buf(), image_dir.clone());
        match blocking(source, move || extract_images(&src, &dir)).await {
            Ok(images) => {
                log::debug!("extracted {} embedded images", images.len());
                let raster = self.raster.clone();
                match blocking(&image_dir, move || Ok(recompress_images(&images, &raster))).await {
                    Ok(count) => log::debug!("recompressed {count} embedded images"),
                    Err(e) => log::warn!("image recompression failed: {e}"),
                }
            }
            Err(e) => {
                log::warn!("image extraction failed, continuing with structural optimization: {e}");
            }
        }

        self.structural_pass(source, &intermediate, PdfStage::FirstPass)
            .await?;
        self.structural_pass(&intermediate, dest, PdfStage::FinalPass)
            .await?;

        Ok(TierOutcome::Optimized)
    }
}

/// Load `input`, rewrite it per `config`, and save to `output`.
pub fn optimize_document(
    input: &Path,
    output: &Path,
    config: &PdfOptimizationConfig,
) -> std::result::Result<(), String> {
    let mut doc =
        Document::load(input).map_err(|e| format!("cannot load '{}': {}", input.display(), e))?;

    apply_config(&mut doc, config);

    doc.save(output)
        .map_err(|e| format!("cannot save '{}': {}", output.display(), e))?;
    Ok(())
}

fn apply_config(doc: &mut Document, config: &PdfOptimizationConfig) {
    if config.reader15 && doc.version.as_str() < "1.5" {
        doc.version = "1.5".to_string();
    }

    if config.write_object_streams {
        doc.delete_zero_length_streams();
        doc.prune_objects();
        doc.renumber_objects();
        doc.compress();
    }

    if config.write_xref_streams {
        doc.reference_table.cross_reference_type = XrefType::CrossReferenceStream;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{Object, Stream, dictionary};

    fn sample_document(path: &Path) {
        let mut doc = Document::with_version("1.4");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });
        let text = "BT /F1 12 Tf 72 720 Td (repeated line of text) Tj ET\n".repeat(50);
        let content_id = doc.add_object(Stream::new(dictionary! {}, text.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.save(path).unwrap();
    }

    #[test]
    fn structural_pass_keeps_document_loadable() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.pdf");
        let output = dir.path().join("out.pdf");
        sample_document(&input);

        optimize_document(&input, &output, &PdfOptimizationConfig::high_compression()).unwrap();

        let doc = Document::load(&output).unwrap();
        assert_eq!(doc.version, "1.5");
        assert_eq!(doc.get_pages().len(), 1);
    }

    #[test]
    fn unreadable_input_reports_message() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("garbage.pdf");
        std::fs::write(&input, b"definitely not a pdf").unwrap();

        let result = optimize_document(&input, &dir.path().join("o.pdf"), &PdfOptimizationConfig::default());
        assert!(result.unwrap_err().contains("garbage.pdf"));
    }

    #[tokio::test]
    async fn fallback_tier_cleans_scratch_space() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.pdf");
        let output = dir.path().join("out.pdf");
        sample_document(&input);

        let tier = LibraryOptimizer::new(PdfOptimizationConfig::default(), RasterPolicy::default());
        let outcome = tier.try_optimize(&input, &output).await.unwrap();

        assert_eq!(outcome, TierOutcome::Optimized);
        assert!(output.exists());
        assert!(!dir.path().join("out.pdf.temp1").exists());
        assert!(!dir.path().join("out.pdf.tempdir").exists());
    }

    #[tokio::test]
    async fn failed_first_pass_names_the_stage() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.pdf");
        std::fs::write(&input, b"%PDF-1.4 broken").unwrap();

        let tier = LibraryOptimizer::new(PdfOptimizationConfig::default(), RasterPolicy::default());
        let result = tier.try_optimize(&input, &dir.path().join("out.pdf")).await;

        assert!(matches!(
            result,
            Err(Error::Optimization { stage: PdfStage::FirstPass, .. })
        ));
        assert!(!dir.path().join("out.pdf.tempdir").exists());
    }

    #[tokio::test]
    async fn broken_embedded_image_does_not_stop_the_tier() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.pdf");
        let output = dir.path().join("out.pdf");
        sample_document(&input);

        let mut doc = Document::load(&input).unwrap();
        doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 8,
                "Height" => 8,
                "Filter" => "DCTDecode",
            },
            b"not a jpeg".to_vec(),
        ));
        doc.save(&input).unwrap();

        let tier = LibraryOptimizer::new(PdfOptimizationConfig::default(), RasterPolicy::default());
        let outcome = tier.try_optimize(&input, &output).await.unwrap();

        assert_eq!(outcome, TierOutcome::Optimized);
        assert_eq!(Document::load(&output).unwrap().get_pages().len(), 1);
    }
}
