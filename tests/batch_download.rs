//! End-to-end batch runs against a local HTTP server.

mod common;

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use common::Route;
use image_batch_downloader::base_system::diagnostics::{Level, MemorySink};
use image_batch_downloader::download::{
    BatchDownloader, BatchOptions, BatchStatus, HttpOptions,
};
use tempfile::TempDir;

struct Run {
    _root: TempDir,
    images: PathBuf,
    sink: Arc<MemorySink>,
    status: BatchStatus,
}

fn run_batch(list: &str, concurrency: usize) -> Run {
    let root = tempfile::tempdir().unwrap();
    let list_path = root.path().join("sample_urls.txt");
    fs::write(&list_path, list).unwrap();
    let images = root.path().join("test_images");
    let sink = Arc::new(MemorySink::new());

    let http = HttpOptions::default();
    let batch = BatchDownloader::with_http(
        BatchOptions {
            list_path,
            images_dir: images.clone(),
            concurrency,
        },
        &http,
        sink.clone(),
    )
    .expect("batch setup");
    let status = batch.download();

    Run {
        _root: root,
        images,
        sink,
        status,
    }
}

fn downloaded(dir: &Path) -> Vec<(String, Vec<u8>)> {
    let mut out: Vec<_> = fs::read_dir(dir)
        .unwrap()
        .map(|e| {
            let path = e.unwrap().path();
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            (name, fs::read(&path).unwrap())
        })
        .collect();
    out.sort();
    out
}

fn contents(files: &[(String, Vec<u8>)]) -> HashSet<Vec<u8>> {
    files.iter().map(|(_, c)| c.clone()).collect()
}

#[test]
fn downloads_every_listed_image() {
    let server = common::start(vec![
        ("/img1.jpg", Route::ok("IMAGE_CONTENT_1")),
        ("/img2.jpg", Route::ok("IMAGE_CONTENT_2")),
        ("/img3.jpg", Route::ok("IMAGE_CONTENT_3")),
    ]);
    let list = format!(
        "{}\n{}\n{}",
        server.url("/img1.jpg"),
        server.url("/img2.jpg"),
        server.url("/img3.jpg")
    );

    let run = run_batch(&list, 2);

    let files = downloaded(&run.images);
    assert_eq!(files.len(), 3);
    assert_eq!(
        contents(&files),
        HashSet::from([
            b"IMAGE_CONTENT_1".to_vec(),
            b"IMAGE_CONTENT_2".to_vec(),
            b"IMAGE_CONTENT_3".to_vec(),
        ])
    );
    for (name, _) in &files {
        assert!(name.starts_with("img") && name.ends_with(".jpg"), "{name}");
    }
    assert_eq!(
        run.sink
            .messages(Level::Info)
            .iter()
            .filter(|m| *m == "Download complete!")
            .count(),
        1
    );
    assert_eq!(
        run.status,
        BatchStatus::Completed {
            dispatched: 3,
            fatal_failures: 0
        }
    );
}

#[test]
fn invalid_tokens_are_warned_and_skipped() {
    let server = common::start(vec![("/img1.jpg", Route::ok("IMAGE_CONTENT_1"))]);
    let list = format!("http://invalid.url\n{}", server.url("/img1.jpg"));

    let run = run_batch(&list, 2);

    let files = downloaded(&run.images);
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].1, b"IMAGE_CONTENT_1");
    assert_eq!(
        run.sink.messages(Level::Warn),
        vec!["Invalid image URL: http://invalid.url"]
    );
    assert_eq!(server.hits(), 1);
}

#[test]
fn a_404_is_logged_and_the_rest_continue() {
    let server = common::start(vec![
        ("/nonexistent.jpg", Route::status(404)),
        ("/img1.jpg", Route::ok("IMAGE_CONTENT_1")),
    ]);
    let missing = server.url("/nonexistent.jpg");
    let list = format!("{missing}\n{}", server.url("/img1.jpg"));

    let run = run_batch(&list, 2);

    let files = downloaded(&run.images);
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].1, b"IMAGE_CONTENT_1");
    assert_eq!(
        run.sink.messages(Level::Error),
        vec![format!("Failed to download {missing}: 404 Not Found")]
    );
    assert!(run.sink.contains(Level::Info, "Downloaded img1.jpg"));
    assert!(run.status.is_clean());
}

#[test]
fn same_file_name_on_two_hosts_never_overwrites() {
    let first = common::start(vec![("/img.jpg", Route::ok("IMAGE_CONTENT_1"))]);
    let second = common::start(vec![("/img.jpg", Route::ok("IMAGE_CONTENT_2"))]);
    let list = format!("{}\n{}", first.url("/img.jpg"), second.url("/img.jpg"));

    let run = run_batch(&list, 2);

    let files = downloaded(&run.images);
    assert_eq!(files.len(), 2);
    assert_ne!(files[0].0, files[1].0);
    assert_eq!(
        contents(&files),
        HashSet::from([b"IMAGE_CONTENT_1".to_vec(), b"IMAGE_CONTENT_2".to_vec()])
    );
}

#[test]
fn large_bodies_are_written_byte_for_byte() {
    let body: Vec<u8> = (0u8..=255).cycle().take(300 * 1024).collect();
    let server = common::start(vec![("/big.png", Route::ok(body.clone()))]);

    let run = run_batch(&server.url("/big.png"), 1);

    let files = downloaded(&run.images);
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].1, body);
}

#[test]
fn never_more_fetches_in_flight_than_workers() {
    let paths: Vec<String> = (0..6).map(|i| format!("/slow{i}.gif")).collect();
    let routes = paths
        .iter()
        .map(|p| (p.as_str(), Route::ok(p.as_bytes().to_vec())))
        .collect();
    let server = common::start_with_delay(routes, Duration::from_millis(150));
    let list = paths
        .iter()
        .map(|p| server.url(p))
        .collect::<Vec<_>>()
        .join(" ");

    let run = run_batch(&list, 2);

    assert_eq!(downloaded(&run.images).len(), 6);
    assert_eq!(server.hits(), 6);
    assert!(
        server.peak_in_flight() <= 2,
        "peak was {}",
        server.peak_in_flight()
    );
}

#[test]
fn server_errors_do_not_leave_files_behind() {
    let server = common::start(vec![
        ("/a.bmp", Route::status(500)),
        ("/b.bmp", Route::status(403)),
        ("/c.bmp", Route::ok("C")),
    ]);
    let list = format!(
        "{} {} {}",
        server.url("/a.bmp"),
        server.url("/b.bmp"),
        server.url("/c.bmp")
    );

    let run = run_batch(&list, 3);

    let files = downloaded(&run.images);
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].1, b"C");
    assert_eq!(run.sink.count(Level::Error), 2);
    assert!(run.sink.contains(Level::Info, "Download complete!"));
}

#[test]
fn missing_list_file_aborts_before_any_request() {
    let root = tempfile::tempdir().unwrap();
    let sink = Arc::new(MemorySink::new());
    let batch = BatchDownloader::with_http(
        BatchOptions {
            list_path: root.path().join("does_not_exist.txt"),
            images_dir: root.path().join("images"),
            concurrency: 2,
        },
        &HttpOptions::default(),
        sink.clone(),
    )
    .unwrap();

    let status = batch.download();

    assert_eq!(status, BatchStatus::Aborted { dispatched: 0 });
    assert_eq!(sink.count(Level::Error), 1);
    assert!(!sink.contains(Level::Info, "Download complete!"));
    assert!(root.path().join("images").is_dir());
}

#[test]
fn slow_responses_are_waited_out() {
    let server = common::start_with_delay(
        vec![("/slow.png", Route::ok("SLOW_BUT_COMPLETE"))],
        Duration::from_millis(1500),
    );

    let run = run_batch(&server.url("/slow.png"), 1);

    let files = downloaded(&run.images);
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].1, b"SLOW_BUT_COMPLETE");
    assert_eq!(run.sink.count(Level::Error), 0);
    assert!(run.status.is_clean());
}

#[test]
fn very_long_file_names_are_shortened_not_rejected() {
    let wide = format!("/{}.jpg", "%E5%9B%BE".repeat(100));
    let long_ext = format!("/a.{}.jpg", "b".repeat(250));
    let server = common::start(vec![
        (wide.as_str(), Route::ok("WIDE")),
        (long_ext.as_str(), Route::ok("LONG_EXT")),
    ]);
    let list = format!("{}\n{}", server.url(&wide), server.url(&long_ext));

    let run = run_batch(&list, 2);

    let files = downloaded(&run.images);
    assert_eq!(files.len(), 2, "log: {:?}", run.sink.records());
    assert_eq!(
        contents(&files),
        HashSet::from([b"WIDE".to_vec(), b"LONG_EXT".to_vec()])
    );
    for (name, _) in &files {
        assert!(name.len() <= 255, "{name} is {} bytes", name.len());
        assert!(name.ends_with(".jpg"));
    }
    assert_eq!(run.sink.count(Level::Error), 0);
}
