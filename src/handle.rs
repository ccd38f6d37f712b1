//! Cross-task sending. Commands are queued on a channel and applied by the
//! owning manager at the start of its next `poll()`.

use crate::error::{ConnectionError, NetError, Result};
use crate::peer::PeerId;
use crate::protocol::DeliveryMode;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

/// Commands applied by the poll loop
#[derive(Debug)]
pub(crate) enum Command {
    Send {
        peer: PeerId,
        payload: Bytes,
        mode: DeliveryMode,
        reply: Option<oneshot::Sender<Result<()>>>,
    },
    SendToAll {
        payload: Bytes,
        mode: DeliveryMode,
    },
    Disconnect {
        peer: PeerId,
    },
}

/// Clonable handle for sending from other tasks or threads.
///
/// Obtained from [`NetManager::handle`](crate::NetManager::handle). Nothing
/// touches the socket until the manager is polled again.
#[derive(Debug, Clone)]
pub struct SendHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

fn closed() -> NetError {
    NetError::connection(ConnectionError::Closed)
}

impl SendHandle {
    pub(crate) fn new(cmd_tx: mpsc::UnboundedSender<Command>) -> Self {
        Self { cmd_tx }
    }

    fn submit(&self, cmd: Command) -> Result<()> {
        self.cmd_tx.send(cmd).map_err(|_| closed())
    }

    /// Queue a message. Errors such as an unknown peer are logged when the
    /// command is applied; use [`send_confirmed`](Self::send_confirmed) to
    /// observe them.
    pub fn send(&self, peer: PeerId, payload: impl Into<Bytes>, mode: DeliveryMode) -> Result<()> {
        self.submit(Command::Send {
            peer,
            payload: payload.into(),
            mode,
            reply: None,
        })
    }

    /// Queue a message and wait until the poll loop has accepted or refused it
    pub async fn send_confirmed(
        &self,
        peer: PeerId,
        payload: impl Into<Bytes>,
        mode: DeliveryMode,
    ) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Send {
            peer,
            payload: payload.into(),
            mode,
            reply: Some(reply),
        })?;
        rx.await.unwrap_or_else(|_| Err(closed()))
    }

    /// Queue a message for every connected peer
    pub fn send_to_all(&self, payload: impl Into<Bytes>, mode: DeliveryMode) -> Result<()> {
        self.submit(Command::SendToAll {
            payload: payload.into(),
            mode,
        })
    }

    /// Queue a local disconnect
    pub fn disconnect(&self, peer: PeerId) -> Result<()> {
        self.submit(Command::Disconnect { peer })
    }

    /// The manager was dropped or stopped
    pub fn is_closed(&self) -> bool {
        self.cmd_tx.is_closed()
    }
}
