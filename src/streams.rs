//! Streams over `tokio::sync::watch` channels.
//!
//! Observers get the current value immediately, then every later change.

use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::watch;

/// Stream every published value, starting with the current one.
///
/// Ends when the sender is dropped.
pub fn watch_stream<T>(rx: watch::Receiver<T>) -> BoxStream<'static, T>
where
    T: Clone + Send + Sync + 'static,
{
    stream::unfold((rx, true), |(mut rx, first)| async move {
        if !first {
            rx.changed().await.ok()?;
        }
        let value = rx.borrow_and_update().clone();
        Some((value, (rx, false)))
    })
    .boxed()
}

/// Stream one projection of the published value, emitting only when it
/// differs from the last emitted one.
pub fn distinct<T, U>(rx: watch::Receiver<T>, select: fn(&T) -> U) -> BoxStream<'static, U>
where
    T: Send + Sync + 'static,
    U: PartialEq + Clone + Send + 'static,
{
    stream::unfold((rx, None::<U>), move |(mut rx, last)| async move {
        loop {
            if last.is_some() {
                rx.changed().await.ok()?;
            }
            let value = select(&rx.borrow_and_update());
            if last.as_ref() != Some(&value) {
                return Some((value.clone(), (rx, Some(value))));
            }
        }
    })
    .boxed()
}
