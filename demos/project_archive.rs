//! Scaffold a small Rust project as a ZIP archive
//!
//! Generates the project files in memory, streams them through an
//! `ArchiveGenerator` and writes the archive to disk.
//!
//! Run with: RUST_LOG=zip_pump=debug cargo run --example project_archive -- my-app

use std::cell::RefCell;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::rc::Rc;
use tokio::sync::oneshot;
use tokio::task::LocalSet;
use tracing_subscriber::EnvFilter;
use zip_pump::{ArchiveError, ArchiveGenerator, Entry, EntrySource, StreamingZipReader};

fn scaffold(project: &str) -> EntrySource {
    let cargo_toml = format!(
        "[package]\nname = \"{project}\"\nversion = \"0.1.0\"\nedition = \"2021\"\n\n[dependencies]\n"
    );
    let main_rs = format!("fn main() {{\n    println!(\"Hello from {project}!\");\n}}\n");
    let readme = format!("# {project}\n\nGenerated project skeleton.\n");

    EntrySource::new(vec![
        Entry::from_text(format!("{project}/Cargo.toml"), cargo_toml),
        Entry::from_text(format!("{project}/src/main.rs"), main_rs),
        Entry::from_text(format!("{project}/README.md"), readme),
        Entry::from_text(format!("{project}/.gitignore"), "/target\n"),
    ])
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let project = std::env::args().nth(1).unwrap_or_else(|| "my-app".to_string());
    let zip_path = format!("{project}.zip");
    println!("Scaffolding {project} into {zip_path}...");

    let file = Rc::new(RefCell::new(BufWriter::new(File::create(&zip_path)?)));

    let outcome: Result<u64, ArchiveError> = LocalSet::new()
        .run_until(async {
            let generator = ArchiveGenerator::new(scaffold(&project));
            let (tx, rx) = oneshot::channel();
            let tx = Rc::new(RefCell::new(Some(tx)));

            let sink = file.clone();
            let tx_err = tx.clone();
            generator.attach(
                move |chunk| {
                    if let Err(err) = sink.borrow_mut().write_all(&chunk) {
                        eprintln!("write failed: {err}");
                    }
                },
                move |err| {
                    if let Some(tx) = tx_err.borrow_mut().take() {
                        let _ = tx.send(Err(err));
                    }
                },
                move || {
                    if let Some(tx) = tx.borrow_mut().take() {
                        let _ = tx.send(Ok(()));
                    }
                },
            );

            match rx.await {
                Ok(Ok(())) => Ok(generator.bytes_emitted()),
                Ok(Err(err)) => Err(err),
                Err(_) => Err(ArchiveError::Cancelled),
            }
        })
        .await;

    let bytes = outcome?;
    file.borrow_mut().flush()?;
    println!("✓ Wrote {bytes} bytes");

    let reader = StreamingZipReader::open(&zip_path)?;
    for entry in reader.entries() {
        println!(
            "  {} ({} -> {} bytes)",
            entry.name, entry.uncompressed_size, entry.compressed_size
        );
    }

    Ok(())
}
