use async_trait::async_trait;
use bollard::container::{
    AttachContainerOptions, AttachContainerResults, InspectContainerOptions, KillContainerOptions,
    LogOutput, RemoveContainerOptions, StartContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::Docker;
use futures_util::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::sandbox::{OutputSender, Sandbox, SandboxError};

/// One Docker container.
pub struct DockerSandbox {
    docker: Docker,
    id: String,
}

impl DockerSandbox {
    pub fn new(docker: Docker, id: String) -> Self {
        Self { docker, id }
    }
}

impl std::fmt::Debug for DockerSandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerSandbox").field("id", &self.id).finish()
    }
}

#[async_trait]
impl Sandbox for DockerSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(
        &self,
        cancel: CancellationToken,
        stdout: OutputSender,
        stderr: OutputSender,
    ) -> Result<(), SandboxError> {
        // attach first so no early output is lost
        let options = AttachContainerOptions::<String> {
            stdout: Some(true),
            stderr: Some(true),
            stream: Some(true),
            ..Default::default()
        };
        let AttachContainerResults { mut output, .. } =
            self.docker.attach_container(&self.id, Some(options)).await?;

        self.docker
            .start_container(&self.id, None::<StartContainerOptions<String>>)
            .await?;
        debug!(id = %self.id, "container started");

        forward_output(&mut output, &cancel, &stdout, &stderr).await
    }

    async fn is_running(&self) -> Result<bool, SandboxError> {
        let inspect = self
            .docker
            .inspect_container(&self.id, None::<InspectContainerOptions>)
            .await?;
        Ok(inspect
            .state
            .and_then(|state| state.running)
            .unwrap_or(false))
    }

    async fn kill(&self) -> Result<(), SandboxError> {
        self.docker
            .kill_container(&self.id, None::<KillContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn delete(&self) -> Result<(), SandboxError> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker.remove_container(&self.id, Some(options)).await?;
        Ok(())
    }
}

/// Demultiplexes attached output into the two channels.
///
/// Returns when the stream ends or fails, when `cancel` fires, or when both
/// receivers are gone. A consumer that stops reading never blocks
/// cancellation.
async fn forward_output<S>(
    output: &mut S,
    cancel: &CancellationToken,
    stdout: &OutputSender,
    stderr: &OutputSender,
) -> Result<(), SandboxError>
where
    S: Stream<Item = Result<LogOutput, DockerError>> + Unpin,
{
    loop {
        if stdout.is_closed() && stderr.is_closed() {
            debug!("output receivers closed");
            return Ok(());
        }

        let next = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            next = output.next() => next,
        };
        let (tx, message) = match next {
            None => return Ok(()),
            Some(Ok(LogOutput::StdOut { message })) => (stdout, message),
            Some(Ok(LogOutput::StdErr { message })) => (stderr, message),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
        };

        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            sent = tx.send(message.to_vec()) => {
                // a single closed receiver only drops its own chunks
                if sent.is_err() {
                    debug!("dropping output chunk for closed receiver");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn chunk(text: &'static str, stderr: bool) -> Result<LogOutput, DockerError> {
        if stderr {
            Ok(LogOutput::StdErr {
                message: text.into(),
            })
        } else {
            Ok(LogOutput::StdOut {
                message: text.into(),
            })
        }
    }

    #[tokio::test]
    async fn test_forward_output_demuxes_streams() {
        let mut output = stream::iter(vec![
            chunk("a", false),
            chunk("b", true),
            chunk("c", false),
        ]);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let (err_tx, mut err_rx) = mpsc::channel(8);

        forward_output(&mut output, &CancellationToken::new(), &out_tx, &err_tx)
            .await
            .unwrap();

        assert_eq!(out_rx.recv().await.unwrap(), b"a".to_vec());
        assert_eq!(out_rx.recv().await.unwrap(), b"c".to_vec());
        assert_eq!(err_rx.recv().await.unwrap(), b"b".to_vec());
        assert!(out_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cancel_while_consumer_is_stalled() {
        let cancel = CancellationToken::new();
        let (out_tx, _out_rx) = mpsc::channel(1);
        let (err_tx, _err_rx) = mpsc::channel(1);

        let token = cancel.clone();
        let forward = tokio::spawn(async move {
            let mut output = stream::repeat_with(|| chunk("x", false));
            forward_output(&mut output, &token, &out_tx, &err_tx).await
        });

        // the unread channel is full, forwarding is blocked on send
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), forward)
            .await
            .expect("forwarding returns after cancellation")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_returns_when_receivers_are_gone() {
        let (out_tx, out_rx) = mpsc::channel(1);
        let (err_tx, err_rx) = mpsc::channel(1);
        drop(out_rx);
        drop(err_rx);

        let mut output = stream::repeat_with(|| chunk("x", false));
        let result = tokio::time::timeout(
            Duration::from_secs(1),
            forward_output(&mut output, &CancellationToken::new(), &out_tx, &err_tx),
        )
        .await
        .expect("forwarding stops without receivers");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_stream_error_is_returned() {
        let mut output = stream::iter(vec![
            chunk("a", false),
            Err(DockerError::DockerStreamError {
                error: "connection reset".to_string(),
            }),
        ]);
        let (out_tx, _out_rx) = mpsc::channel(8);
        let (err_tx, _err_rx) = mpsc::channel(8);

        let result =
            forward_output(&mut output, &CancellationToken::new(), &out_tx, &err_tx).await;
        assert!(matches!(result, Err(SandboxError::Docker(_))));
    }
}
