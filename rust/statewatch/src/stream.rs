use crate::session::{VisibleWatches, WatchListView};
use futures_util::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// Stream of published [`WatchListView`]s.
///
/// Yields the current view first, then each later publish. A slow reader
/// skips intermediate views and only sees the latest one.
pub struct WatchListStream {
    inner: WatchStream<Arc<WatchListView>>,
}

impl WatchListStream {
    pub fn new(rx: watch::Receiver<Arc<WatchListView>>) -> Self {
        Self {
            inner: WatchStream::new(rx),
        }
    }

    /// Only the visible part of each view.
    pub fn visible(self) -> impl Stream<Item = VisibleWatches> {
        self.map(|view| view.visible.clone())
    }
}

impl Stream for WatchListStream {
    type Item = Arc<WatchListView>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}
