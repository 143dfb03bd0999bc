//! Presenter publishing to the connected pages.
//!
use std::{
    io::Cursor,
    sync::{Arc, Mutex, PoisonError},
};

use bytes::Bytes;
use common::protocol::{PageEvent, PageSnapshot, UiState, ViewModel};
use futures::{stream, Stream, StreamExt};
use image::{codecs::jpeg::JpegEncoder, RgbImage};
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};

use crate::presenter::Presenter;

pub type EventReceiver = broadcast::Receiver<PageEvent>;
pub type BytesReceiver = broadcast::Receiver<Bytes>;

const JPEG_QUALITY: u8 = 70;
const EVENT_CAPACITY: usize = 64;

/// Broadcasts page events and preview frames to every subscriber and keeps a
/// snapshot for pages connecting later.
pub struct BroadcastPresenter {
    events_tx: broadcast::Sender<PageEvent>,
    frames_tx: broadcast::Sender<Bytes>,
    snapshot: Mutex<PageSnapshot>,
}

impl BroadcastPresenter {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let (frames_tx, _) = broadcast::channel(4);
        Self {
            events_tx,
            frames_tx,
            snapshot: Mutex::new(PageSnapshot::default()),
        }
    }

    pub fn subscribe_events(&self) -> EventReceiver {
        self.events_tx.subscribe()
    }

    /// Preview frames as multipart stream items.
    pub fn subscribe_frames(&self) -> BytesReceiver {
        self.frames_tx.subscribe()
    }

    pub fn snapshot(&self) -> PageSnapshot {
        self.snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish(&self, event: PageEvent) {
        // Hold the lock while sending to keep snapshot and stream in order
        let mut snapshot = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
        snapshot.apply(&event);
        if self.events_tx.send(event).is_err() {
            log::trace!("No page listening for events");
        }
    }
}

/// Events for one page: the current snapshot first, then every update.
///
/// A page that falls behind gets a fresh snapshot in place of the events it
/// missed.
pub fn page_events(presenter: Arc<BroadcastPresenter>) -> impl Stream<Item = PageEvent> {
    // Subscribe before reading the snapshot so no update falls in between
    let rx = presenter.subscribe_events();
    let current = PageEvent::Snapshot(presenter.snapshot());

    let updates = BroadcastStream::new(rx).map(move |item| match item {
        Ok(event) => event,
        Err(BroadcastStreamRecvError::Lagged(missed)) => {
            log::debug!("Page missed {missed} events, resending its state");
            PageEvent::Snapshot(presenter.snapshot())
        }
    });

    stream::iter([current]).chain(updates)
}

impl Default for BroadcastPresenter {
    fn default() -> Self {
        Self::new()
    }
}

impl Presenter for BroadcastPresenter {
    fn show_status(&self, state: UiState, message: &str) {
        self.publish(PageEvent::Status {
            state,
            message: message.to_owned(),
        });
    }

    fn set_controls_enabled(&self, enabled: bool) {
        self.publish(PageEvent::Controls { enabled });
    }

    fn set_switch_visible(&self, visible: bool) {
        self.publish(PageEvent::SwitchCamera { visible });
    }

    fn render_rows(&self, class_count: usize) {
        self.publish(PageEvent::Rows { count: class_count });
    }

    fn update_rows(&self, view: &ViewModel) {
        self.publish(PageEvent::Predictions(view.clone()));
    }

    fn show_frame(&self, frame: &RgbImage) {
        if self.frames_tx.receiver_count() == 0 {
            return;
        }
        match encode_jpeg(frame) {
            Ok(jpeg) => {
                self.frames_tx.send(as_jpeg_stream_item(&jpeg)).ok();
            }
            Err(err) => log::warn!("Failed to encode preview frame: {err}"),
        }
    }
}

fn encode_jpeg(frame: &RgbImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Cursor::new(Vec::new());
    let (width, height) = frame.dimensions();
    JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY).encode(
        frame,
        width,
        height,
        image::ColorType::Rgb8,
    )?;

    Ok(buf.into_inner())
}

pub fn as_jpeg_stream_item(data: &[u8]) -> Bytes {
    Bytes::copy_from_slice(
        &[
            "--frame\r\nContent-Type: image/jpeg\r\n\r\n".as_bytes(),
            data,
            "\r\n\r\n".as_bytes(),
        ]
        .concat(),
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use common::protocol::RowView;

    #[test]
    fn test_events_reach_subscribers_in_order() {
        let presenter = BroadcastPresenter::new();
        let mut rx = presenter.subscribe_events();

        presenter.show_status(UiState::Loading, "Loading model...");
        presenter.render_rows(2);

        assert_eq!(
            rx.try_recv().ok(),
            Some(PageEvent::Status {
                state: UiState::Loading,
                message: "Loading model...".into()
            })
        );
        assert_eq!(rx.try_recv().ok(), Some(PageEvent::Rows { count: 2 }));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_snapshot_without_subscribers() {
        let presenter = BroadcastPresenter::new();
        let view = ViewModel {
            rows: vec![RowView {
                class_name: "cat".into(),
                probability: 1.0,
                fill_percent: 100.0,
                label: "100.0%".into(),
                is_top: true,
            }],
            top: Some(0),
        };

        presenter.set_controls_enabled(false);
        presenter.render_rows(1);
        presenter.update_rows(&view);
        presenter.show_status(UiState::Active, "");

        let snapshot = presenter.snapshot();
        assert_eq!(snapshot.state, UiState::Active);
        assert!(!snapshot.controls_enabled);
        assert_eq!(snapshot.row_count, 1);
        assert_eq!(snapshot.latest, Some(view));
    }

    #[tokio::test]
    async fn test_page_starts_from_snapshot() {
        let presenter = Arc::new(BroadcastPresenter::new());
        presenter.render_rows(3);
        presenter.show_status(UiState::Active, "");

        let mut events = Box::pin(page_events(presenter.clone()));
        presenter.set_switch_visible(true);

        match events.next().await {
            Some(PageEvent::Snapshot(snapshot)) => {
                assert_eq!(snapshot.row_count, 3);
                assert_eq!(snapshot.state, UiState::Active);
            }
            other => panic!("expected a snapshot, got {other:?}"),
        }
        assert_eq!(
            events.next().await,
            Some(PageEvent::SwitchCamera { visible: true })
        );
    }

    #[tokio::test]
    async fn test_lagging_page_gets_snapshot() {
        let presenter = Arc::new(BroadcastPresenter::new());
        let mut events = Box::pin(page_events(presenter.clone()));
        assert!(matches!(
            events.next().await,
            Some(PageEvent::Snapshot(_))
        ));

        presenter.show_status(UiState::Error, "No cameras found.");
        presenter.render_rows(2);
        for _ in 0..EVENT_CAPACITY {
            presenter.update_rows(&ViewModel::default());
        }

        match events.next().await {
            Some(PageEvent::Snapshot(snapshot)) => {
                assert_eq!(snapshot.state, UiState::Error);
                assert_eq!(snapshot.message, "No cameras found.");
                assert_eq!(snapshot.row_count, 2);
                assert_eq!(snapshot.latest, Some(ViewModel::default()));
            }
            other => panic!("expected a snapshot, got {other:?}"),
        }
    }

    #[test]
    fn test_frames_are_multipart_jpegs() {
        let presenter = BroadcastPresenter::new();
        let frame = RgbImage::from_pixel(8, 8, image::Rgb([200, 10, 10]));

        // Nobody listens, nothing is encoded
        presenter.show_frame(&frame);

        let mut rx = presenter.subscribe_frames();
        presenter.show_frame(&frame);

        let item = rx.try_recv().expect("frame item");
        let header = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
        assert!(item.starts_with(header));
        assert!(item.ends_with(b"\r\n\r\n"));
        // JPEG start-of-image marker
        assert_eq!(&item[header.len()..header.len() + 2], &[0xFF, 0xD8]);
    }
}
