use tokio::sync::{mpsc, oneshot};

use crate::{Flow, FlowError, collector::{EmitterCollector, FlowCollector}};

pub(crate) struct Emission<T> {
    value: T,
    ack: oneshot::Sender<Result<(), FlowError>>,
}

/// Handed to flow bodies to emit elements downstream.
///
/// [`FlowEmitter::emit`] returns only after the downstream collector has
/// processed the element, so an unbuffered flow never runs ahead of its
/// collector. When it fails, the body should stop and return the error.
pub struct FlowEmitter<T> {
    sender: mpsc::Sender<Emission<T>>,
}

impl<T> Clone for FlowEmitter<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<T> std::fmt::Debug for FlowEmitter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowEmitter").finish_non_exhaustive()
    }
}

impl<T: Send + 'static> FlowEmitter<T> {
    pub(crate) fn new() -> (Self, mpsc::Receiver<Emission<T>>) {
        let (sender, emissions) = mpsc::channel(1);
        (Self { sender }, emissions)
    }

    /// # Errors
    ///
    /// * If the downstream collector failed on this element
    /// * [`FlowError::Cancelled`] if the collection is no longer running
    pub async fn emit(&self, value: T) -> Result<(), FlowError> {
        let (ack, acked) = oneshot::channel();
        self.sender
            .send(Emission { value, ack })
            .await
            .map_err(|_| FlowError::Cancelled)?;
        acked.await.unwrap_or(Err(FlowError::Cancelled))
    }

    /// Collects `flow`, emitting each of its elements.
    ///
    /// # Errors
    ///
    /// * If `flow` fails, or the downstream collector fails
    pub async fn emit_all(&self, flow: &Flow<T>) -> Result<(), FlowError> {
        flow.collect_into(&mut EmitterCollector { emitter: self }).await
    }
}

/// Runs a flow body alongside the loop that hands its emissions to
/// `downstream`, and returns whichever fails first.
pub(crate) async fn drive<T, Fut>(
    body: Fut,
    mut emissions: mpsc::Receiver<Emission<T>>,
    downstream: &mut dyn FlowCollector<T>,
) -> Result<(), FlowError>
where
    T: Send + 'static,
    Fut: Future<Output = Result<(), FlowError>> + Send,
{
    let forward = async {
        while let Some(Emission { value, ack }) = emissions.recv().await {
            let result = downstream.emit(value).await;
            let failure = result.as_ref().err().cloned();
            if ack.send(result).is_err() {
                log::trace!("emitter stopped waiting for its acknowledgement");
            }
            if let Some(e) = failure {
                return Err(e);
            }
        }
        Ok(())
    };
    tokio::pin!(body, forward);

    tokio::select! {
        biased;
        forwarded = &mut forward => match forwarded {
            Ok(()) => body.await,
            Err(e) => Err(e),
        },
        produced = &mut body => produced,
    }
}
