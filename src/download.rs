//! HTTP download adapter
//!
//! Bridges an [`ArchiveGenerator`] to an HTTP response body. Chunks travel
//! through a bounded `mpsc` channel; when the channel is full the generator is
//! paused until the body reader catches up, and when the body is dropped the
//! generator is closed.

use crate::error::{ArchiveError, Result};
use crate::{ArchiveGenerator, EntrySource, GeneratorConfig};
use bytes::Bytes;
use futures_util::Stream;
use http::header::{HeaderMap, HeaderValue, CONTENT_DISPOSITION, CONTENT_TYPE};
use http::{Response, StatusCode};
use hyper::body::{Body, Frame};
use std::cell::Cell;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task;
use tokio_util::task::LocalPoolHandle;

/// `Content-Type` sent with every archive download
pub const ZIP_CONTENT_TYPE: &str = "application/zip, application/octet-stream";

/// Chunks buffered between the generator and the response body
const CHANNEL_DEPTH: usize = 8;

type Outcome = Option<ArchiveError>;

/// Headers announcing `<name>.zip` as a downloadable attachment
pub fn attachment_headers(name: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(ZIP_CONTENT_TYPE));

    let disposition = format!("attachment; filename=\"{}.zip\"", sanitize_filename(name));
    match HeaderValue::from_str(&disposition) {
        Ok(value) => {
            headers.insert(CONTENT_DISPOSITION, value);
        }
        Err(err) => tracing::warn!(%err, "invalid content-disposition dropped"),
    }
    headers
}

fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            ' ' => ' ',
            c if c.is_ascii_graphic() => c,
            _ => '_',
        })
        .collect()
}

/// Feed a generator's output into `sender` until it terminates
///
/// A full channel pauses the generator; a drain task waits for capacity,
/// delivers the held chunk and resumes. A dropped receiver closes the
/// generator. Terminal errors other than cancellation are forwarded as the
/// last item.
///
/// Must run inside a tokio `LocalSet`.
pub async fn pump(generator: ArchiveGenerator, sender: mpsc::Sender<Result<Bytes>>) {
    let (done_tx, done_rx) = oneshot::channel::<Outcome>();
    let done = Rc::new(Cell::new(Some(done_tx)));

    let weak = generator.downgrade();
    let data_tx = sender.clone();
    let on_data = move |chunk: Bytes| match data_tx.try_send(Ok(chunk)) {
        Ok(()) => {}
        Err(TrySendError::Full(item)) => {
            let Some(generator) = weak.upgrade() else {
                return;
            };
            generator.pause();
            let tx = data_tx.clone();
            task::spawn_local(async move {
                if tx.send(item).await.is_err() {
                    tracing::debug!("download body dropped while paused");
                    generator.close();
                } else if let Err(err) = generator.resume() {
                    tracing::debug!(%err, "generator closed while draining");
                }
            });
        }
        Err(TrySendError::Closed(_)) => {
            tracing::debug!("download body dropped");
            if let Some(generator) = weak.upgrade() {
                generator.close();
            }
        }
    };

    let done_on_error = Rc::clone(&done);
    let on_error = move |err: ArchiveError| {
        if let Some(tx) = done_on_error.take() {
            let _ = tx.send(Some(err));
        }
    };
    let on_end = move || {
        if let Some(tx) = done.take() {
            let _ = tx.send(None);
        }
    };

    generator.attach(on_data, on_error, on_end);

    match done_rx.await {
        Ok(None) => tracing::debug!(
            bytes = generator.bytes_emitted(),
            "download stream complete"
        ),
        Ok(Some(ArchiveError::Cancelled)) => {}
        Ok(Some(err)) => {
            let _ = sender.send(Err(err)).await;
        }
        Err(_) => tracing::warn!("generator dropped without terminating"),
    }
}

/// Response body streaming archive chunks from [`pump`]
pub struct ArchiveBody {
    first: Option<Bytes>,
    rx: Option<mpsc::Receiver<Result<Bytes>>>,
}

impl ArchiveBody {
    /// Body reading from the receiving half of a [`pump`] channel
    pub fn new(rx: mpsc::Receiver<Result<Bytes>>) -> Self {
        Self {
            first: None,
            rx: Some(rx),
        }
    }

    /// Body with no content
    pub fn empty() -> Self {
        Self {
            first: None,
            rx: None,
        }
    }
}

impl Stream for ArchiveBody {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if let Some(chunk) = this.first.take() {
            return Poll::Ready(Some(Ok(chunk)));
        }
        let Some(rx) = this.rx.as_mut() else {
            return Poll::Ready(None);
        };
        match rx.poll_recv(cx) {
            Poll::Ready(None) => {
                this.rx = None;
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

impl Body for ArchiveBody {
    type Data = Bytes;
    type Error = ArchiveError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>>>> {
        self.poll_next(cx)
            .map(|item| item.map(|chunk| chunk.map(Frame::data)))
    }

    fn is_end_stream(&self) -> bool {
        self.first.is_none() && self.rx.is_none()
    }
}

/// Stream `source` as `<name>.zip`
///
/// The generator runs pinned to one of `pool`'s threads. The response is
/// built once the first event arrives: an error, or the task ending before
/// any archive byte, yields `500 Internal Server Error`. Otherwise the
/// response is `200 OK` with the archive streamed in the body.
pub async fn download_zip(
    pool: &LocalPoolHandle,
    name: &str,
    source: EntrySource,
    config: GeneratorConfig,
) -> Response<ArchiveBody> {
    tracing::info!(archive = %name, "starting archive download");

    let (tx, mut rx) = mpsc::channel(CHANNEL_DEPTH);
    pool.spawn_pinned(move || async move {
        match ArchiveGenerator::with_config(source, config) {
            Ok(generator) => pump(generator, tx).await,
            Err(err) => {
                let _ = tx.send(Err(err)).await;
            }
        }
    });

    let first = rx.recv().await;
    respond(name, first, rx)
}

/// Build the response from the first event of the archive channel
fn respond(
    name: &str,
    first: Option<Result<Bytes>>,
    rx: mpsc::Receiver<Result<Bytes>>,
) -> Response<ArchiveBody> {
    match first {
        Some(Ok(chunk)) => {
            let mut response = Response::new(ArchiveBody {
                first: Some(chunk),
                rx: Some(rx),
            });
            *response.headers_mut() = attachment_headers(name);
            response
        }
        Some(Err(err)) => {
            tracing::error!(archive = %name, error = %err, "archive failed before first byte");
            server_error()
        }
        // Even an empty archive has an end record; no event means the task died
        None => {
            tracing::error!(archive = %name, "archive task ended before first byte");
            server_error()
        }
    }
}

fn server_error() -> Response<ArchiveBody> {
    let mut response = Response::new(ArchiveBody::empty());
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}
