use thiserror::Error;
use tokio::sync::oneshot;

/// The error kinds that can surface on a pending connect, read or write. Everything else
///  (undecodable datagrams, stray handshakes, acks outside the window, oversize data packets)
///  is swallowed with a trace and never reaches the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The socket was closed (or dropped) while the operation was pending.
    #[error("operation aborted")]
    OperationAborted,

    /// The multiplexer could not allocate a connection id.
    #[error("connection id space exhausted")]
    ResourceExhausted,
}

/// One-shot completion handle returned by the socket's `start_*` operations. The operation
///  itself never blocks; awaiting `wait` is the only suspension point the caller sees.
///
/// If the socket goes away without explicitly resolving the slot, the dropped sender half
///  surfaces as `OperationAborted` - closing and dropping behave the same from the caller's
///  point of view.
pub struct Completion<T> {
    receiver: oneshot::Receiver<Result<T, TransportError>>,
}

impl<T> Completion<T> {
    pub(crate) fn pair() -> (CompletionSlot<T>, Completion<T>) {
        let (sender, receiver) = oneshot::channel();
        (CompletionSlot { sender }, Completion { receiver })
    }

    pub async fn wait(self) -> Result<T, TransportError> {
        self.receiver
            .await
            .unwrap_or(Err(TransportError::OperationAborted))
    }
}

/// The promise half of a pending operation, stored in the socket's pending slot. At most one
///  exists per operation kind per socket.
pub(crate) struct CompletionSlot<T> {
    sender: oneshot::Sender<Result<T, TransportError>>,
}

impl<T> CompletionSlot<T> {
    pub fn complete(self, result: Result<T, TransportError>) {
        // the caller may have dropped its Completion - nothing to signal then
        let _ = self.sender.send(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_complete_resolves_wait() {
        let (slot, completion) = Completion::pair();
        slot.complete(Ok(5usize));
        assert_eq!(completion.wait().await, Ok(5));
    }

    #[tokio::test]
    async fn test_error_is_passed_through() {
        let (slot, completion) = Completion::<usize>::pair();
        slot.complete(Err(TransportError::ResourceExhausted));
        assert_eq!(completion.wait().await, Err(TransportError::ResourceExhausted));
    }

    #[tokio::test]
    async fn test_dropped_slot_surfaces_as_aborted() {
        let (slot, completion) = Completion::<usize>::pair();
        drop(slot);
        assert_eq!(completion.wait().await, Err(TransportError::OperationAborted));
    }
}
