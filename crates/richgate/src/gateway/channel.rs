//! Transport boundary.
//!
//! The session never touches sockets. A [`Connector`] opens a channel and
//! hands back a [`ChannelHandle`]: a sender for outgoing frames and a
//! receiver of lifecycle events.

use tokio::sync::mpsc;

/// Buffer size of the frame and event queues.
pub const CHANNEL_CAPACITY: usize = 32;

/// Lifecycle events reported by a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The transport is open and frames may be sent.
    Opened,
    /// A text frame arrived.
    Frame(String),
    /// The transport closed.
    Closed {
        /// Close code, if the peer sent one.
        code: Option<u16>,
        /// Close reason.
        reason: String,
    },
    /// The transport failed.
    Error(String),
}

/// Commands accepted by a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelCommand {
    /// Send a text frame.
    Frame(String),
    /// Close the transport.
    Close,
}

/// Session side of an open channel.
#[derive(Debug)]
pub struct ChannelHandle {
    /// Outgoing frames and close requests.
    pub outbound: mpsc::Sender<ChannelCommand>,
    /// Lifecycle events.
    pub events: mpsc::Receiver<ChannelEvent>,
}

/// Transport side of an open channel.
#[derive(Debug)]
pub struct ChannelPeer {
    /// Lifecycle events to report.
    pub events: mpsc::Sender<ChannelEvent>,
    /// Frames and close requests from the session.
    pub outbound: mpsc::Receiver<ChannelCommand>,
}

impl ChannelHandle {
    /// Create a connected handle/peer pair.
    #[must_use]
    pub fn pair() -> (Self, ChannelPeer) {
        let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(CHANNEL_CAPACITY);

        (
            Self {
                outbound: outbound_tx,
                events: events_rx,
            },
            ChannelPeer {
                events: events_tx,
                outbound: outbound_rx,
            },
        )
    }
}

/// Opens channels to a gateway URL.
///
/// `open` must return immediately; connection progress is reported through
/// [`ChannelEvent`]s. Dropping the returned handle's sender aborts the
/// channel, including one that is still connecting.
pub trait Connector: Send + Sync + 'static {
    /// Start opening a channel to `url`.
    fn open(&self, url: &str) -> ChannelHandle;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_is_wired() {
        let (mut handle, mut peer) = ChannelHandle::pair();

        peer.events
            .send(ChannelEvent::Opened)
            .await
            .expect("event send");
        assert_eq!(handle.events.recv().await, Some(ChannelEvent::Opened));

        handle
            .outbound
            .send(ChannelCommand::Frame("{}".into()))
            .await
            .expect("frame send");
        assert_eq!(
            peer.outbound.recv().await,
            Some(ChannelCommand::Frame("{}".into()))
        );
    }

    #[tokio::test]
    async fn test_dropping_handle_closes_peer() {
        let (handle, mut peer) = ChannelHandle::pair();
        drop(handle);
        assert_eq!(peer.outbound.recv().await, None);
        assert!(peer.events.is_closed());
    }
}
