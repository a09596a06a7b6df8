//! End-to-end tests for the filepress job entry points

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use filepress::zip::{DosDateTime, EntryHeader, ZipWriter};
use filepress::{Archiver, Error, ProgressTracker, Settings, compress, extract};
use image::{Rgb, RgbImage};
use lopdf::{Document, Object, Stream, dictionary};

fn recording_tracker() -> (ProgressTracker, Arc<Mutex<Vec<(u64, u64)>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let tracker = ProgressTracker::new(move |written, total| {
        sink.lock().unwrap().push((written, total));
    });
    (tracker, seen)
}

fn assert_monotonic_and_complete(seen: &[(u64, u64)], total: u64) {
    assert!(!seen.is_empty());
    assert_eq!(seen[0], (0, total), "baseline must be reported first");
    assert!(seen.windows(2).all(|w| w[0].0 <= w[1].0), "progress went backwards: {seen:?}");
    assert!(seen.iter().all(|(written, t)| *written <= *t));
    assert_eq!(seen.last(), Some(&(total, total)));
}

async fn hostile_archive(path: &Path, name: &str) {
    let mut writer = ZipWriter::new(Vec::new(), path);
    let mut buffer = vec![0u8; 64];
    let header = EntryHeader {
        name: name.to_string(),
        origin: PathBuf::from("payload"),
        unix_mode: 0o100644,
        modified: DosDateTime::EPOCH,
        size_hint: 4,
    };
    writer
        .write_entry(header, &mut &b"root"[..], &mut buffer)
        .await
        .unwrap();
    std::fs::write(path, writer.finish().await.unwrap()).unwrap();
}

fn sample_pdf(path: &Path) {
    let mut doc = Document::with_version("1.4");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for page in 0..3 {
        let text = format!("BT /F1 10 Tf 50 {} Td (page {} body text) Tj ET\n", 700, page).repeat(80);
        let content_id = doc.add_object(Stream::new(dictionary! {}, text.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => 3,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).unwrap();
}

#[tokio::test]
async fn test_directory_round_trip() {
    let src = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(src.path().join("nested/deeper")).unwrap();
    std::fs::write(src.path().join("ten.txt"), vec![1u8; 10]).unwrap();
    std::fs::write(src.path().join("nested/twenty.bin"), vec![2u8; 20]).unwrap();
    std::fs::write(src.path().join("nested/deeper/thirty.dat"), vec![3u8; 30]).unwrap();

    let archive = work.path().join("out/bundle.zip");
    compress(src.path(), &archive, "zip").await.unwrap();
    assert!(archive.exists());

    let restored = work.path().join("restored");
    extract(&archive, &restored).await.unwrap();

    for (relative, size, byte) in [
        ("ten.txt", 10, 1u8),
        ("nested/twenty.bin", 20, 2u8),
        ("nested/deeper/thirty.dat", 30, 3u8),
    ] {
        let data = std::fs::read(restored.join(relative)).unwrap();
        assert_eq!(data.len(), size, "{relative}");
        assert!(data.iter().all(|b| *b == byte), "{relative}");
    }
}

#[tokio::test]
async fn test_compressible_text_round_trip() {
    let src = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    // Compresses to well under one read buffer but inflates past it
    let text = "line of ordinary log text\n".repeat(4000);
    std::fs::write(src.path().join("log.txt"), &text).unwrap();

    let archive = work.path().join("logs.zip");
    compress(src.path(), &archive, "zip").await.unwrap();
    assert!(std::fs::metadata(&archive).unwrap().len() < 32 * 1024);

    let restored = work.path().join("restored");
    extract(&archive, &restored).await.unwrap();
    assert_eq!(std::fs::read_to_string(restored.join("log.txt")).unwrap(), text);
}

#[tokio::test]
async fn test_unsupported_format_creates_nothing() {
    let work = tempfile::tempdir().unwrap();
    let source = work.path().join("input.txt");
    std::fs::write(&source, b"content").unwrap();
    let dest = work.path().join("new/output.tar");

    let err = compress(&source, &dest, "tar").await.unwrap_err();
    assert!(matches!(err, Error::UnsupportedFormat(ref name) if name == "tar"));
    assert!(err.to_string().contains("tar"));
    assert!(!dest.exists());
    assert!(!work.path().join("new").exists());
}

#[tokio::test]
async fn test_traversal_entries_are_rejected() {
    let work = tempfile::tempdir().unwrap();

    for (file, name) in [
        ("parent.zip", "../../etc/passwd"),
        ("absolute.zip", "/etc/passwd"),
        ("windows.zip", "..\\..\\evil.txt"),
    ] {
        let archive = work.path().join(file);
        hostile_archive(&archive, name).await;

        let dest = work.path().join(format!("{file}.out"));
        let err = extract(&archive, &dest).await.unwrap_err();
        assert!(matches!(err, Error::IllegalPath { .. }), "{name}: {err}");
        assert_eq!(std::fs::read_dir(&dest).unwrap().count(), 0, "{name}");
    }
    assert!(!work.path().join("evil.txt").exists());
}

#[tokio::test]
async fn test_compress_progress_reaches_total() {
    let src = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    std::fs::write(src.path().join("a.bin"), vec![7u8; 300_000]).unwrap();
    std::fs::write(src.path().join("b.txt"), b"short").unwrap();

    let (mut tracker, seen) = recording_tracker();
    let archive = work.path().join("p.zip");
    Archiver::default()
        .compress_with_progress(src.path(), &archive, "ZIP", &mut tracker)
        .await
        .unwrap();

    assert_monotonic_and_complete(&seen.lock().unwrap(), 300_005);

    let (mut tracker, seen) = recording_tracker();
    Archiver::default()
        .extract_with_progress(&archive, &work.path().join("x"), &mut tracker)
        .await
        .unwrap();
    assert_monotonic_and_complete(&seen.lock().unwrap(), 300_005);
}

#[tokio::test]
async fn test_large_png_is_downsampled() {
    let work = tempfile::tempdir().unwrap();
    let source = work.path().join("wide.png");
    RgbImage::from_fn(2000, 1500, |x, _| Rgb([(x / 8) as u8, 40, 200]))
        .save(&source)
        .unwrap();

    let dest = work.path().join("small.png");
    let (mut tracker, seen) = recording_tracker();
    Archiver::default()
        .compress_with_progress(&source, &dest, "png", &mut tracker)
        .await
        .unwrap();

    let output = image::open(&dest).unwrap();
    assert_eq!((output.width(), output.height()), (1400, 1050));

    let size = std::fs::metadata(&source).unwrap().len();
    assert_monotonic_and_complete(&seen.lock().unwrap(), size);
}

#[tokio::test]
async fn test_pdf_falls_back_without_external_tool() {
    let work = tempfile::tempdir().unwrap();
    let source = work.path().join("report.pdf");
    sample_pdf(&source);

    let mut settings = Settings::default();
    settings.pdf.ghostscript = Some(work.path().join("missing-gs"));
    let dest = work.path().join("out/report.pdf");

    Archiver::new(settings)
        .compress(&source, &dest, "pdf")
        .await
        .unwrap();

    let original = std::fs::metadata(&source).unwrap().len();
    let optimized = std::fs::metadata(&dest).unwrap().len();
    assert!(optimized <= original, "{optimized} > {original}");

    let doc = Document::load(&dest).unwrap();
    assert_eq!(doc.get_pages().len(), 3);
    assert!(!work.path().join("out/report.pdf.temp1").exists());
    assert!(!work.path().join("out/report.pdf.tempdir").exists());
}

#[tokio::test]
async fn test_format_mismatch_and_missing_source() {
    let work = tempfile::tempdir().unwrap();
    let source = work.path().join("photo.png");
    std::fs::write(&source, b"not really").unwrap();

    let err = compress(&source, &work.path().join("o.pdf"), "pdf").await.unwrap_err();
    assert!(matches!(err, Error::FormatMismatch { .. }));

    let err = compress(&work.path().join("absent"), &work.path().join("o.zip"), "zip")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Path { .. }));

    let err = extract(&work.path().join("absent.zip"), work.path()).await.unwrap_err();
    assert!(matches!(err, Error::Path { .. }));
}

#[tokio::test]
async fn test_listing_reports_entries() {
    let src = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    std::fs::write(src.path().join("one.txt"), b"1").unwrap();
    std::fs::write(src.path().join("two.txt"), b"22").unwrap();

    let archive = work.path().join("l.zip");
    compress(src.path(), &archive, "zip").await.unwrap();

    let entries = Archiver::default().list(&archive).await.unwrap();
    let names: Vec<_> = entries.iter().map(|e| e.file_name.as_str()).collect();
    assert_eq!(names, ["one.txt", "two.txt"]);
    assert_eq!(entries[1].uncompressed_size, 2);
}
