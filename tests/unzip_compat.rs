use std::cell::RefCell;
use std::process::Command;
use std::rc::Rc;
use tempfile::tempdir;
use tokio::sync::oneshot;
use tokio::task::LocalSet;
use zip_pump::{ArchiveGenerator, Entry, EntrySource, StreamingZipWriter};

// Archives produced by the generator and the writer are checked with `unzip -t`.
// If `unzip` is not present on the system, the tests are skipped.

fn unzip_available() -> bool {
    if Command::new("unzip").arg("-v").output().is_err() {
        eprintln!("skipping test: `unzip` not found");
        return false;
    }
    true
}

fn assert_unzip_accepts(bytes: &[u8]) {
    let dir = tempdir().unwrap();
    let zip_path = dir.path().join("compat.zip");
    std::fs::write(&zip_path, bytes).unwrap();

    let output = Command::new("unzip")
        .arg("-t")
        .arg(&zip_path)
        .output()
        .expect("failed to run unzip");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(
        output.status.success(),
        "unzip reported failure: {} {}",
        stdout,
        stderr
    );
}

#[tokio::test]
async fn unzip_accepts_generator_output() {
    if !unzip_available() {
        return;
    }

    let archive = LocalSet::new()
        .run_until(async {
            let source = EntrySource::new(vec![
                Entry::from_text("hello.txt", "hello from test"),
                Entry::from_bytes("empty.txt", Vec::new()),
                Entry::from_text("docs/r\u{e9}sum\u{e9}.md", "utf-8 name"),
                // a moderate amount of data to ensure a non-trivial archive
                Entry::from_bytes("big.bin", vec![0u8; 1024 * 1024]),
            ]);
            let generator = ArchiveGenerator::new(source);

            let bytes = Rc::new(RefCell::new(Vec::new()));
            let (tx, rx) = oneshot::channel();
            let sink = bytes.clone();
            generator.attach(
                move |chunk| sink.borrow_mut().extend_from_slice(&chunk),
                |err| panic!("archive failed: {err}"),
                move || {
                    let _ = tx.send(());
                },
            );
            rx.await.unwrap();
            let archive = bytes.borrow().clone();
            archive
        })
        .await;

    assert_unzip_accepts(&archive);
}

#[test]
fn unzip_accepts_writer_output() {
    if !unzip_available() {
        return;
    }

    let mut writer = StreamingZipWriter::new(Vec::new());
    writer.start_entry("hello.txt").unwrap();
    writer.write_data(b"hello from test").unwrap();
    writer.start_entry("big.bin").unwrap();
    for _ in 0..1024 {
        writer.write_data(&[7u8; 1024]).unwrap();
    }
    let bytes = writer.finish().unwrap();

    assert_unzip_accepts(&bytes);
}

#[test]
fn unzip_accepts_zip64_local_headers() {
    if !unzip_available() {
        return;
    }

    let mut writer = StreamingZipWriter::new(Vec::new()).with_zip64_entries(true);
    writer.start_entry("hello.txt").unwrap();
    writer.write_data(b"hello from test").unwrap();
    writer.start_entry("empty.txt").unwrap();
    let bytes = writer.finish().unwrap();

    assert_unzip_accepts(&bytes);
}
