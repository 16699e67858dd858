use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::codec::{BytesCodec, FramedRead};
use tracing::{debug, info, warn};

use super::state::RunStateMachine;
use super::{RunItem, StreamEncodings};
use crate::config::Command;
use crate::error::{ExecError, StreamKind};
use crate::event::ExecutionEvent;
use crate::pipe::{OutputSink, PipeSource, PipeTarget, TextEncoding};
use crate::process::{ProcessHandle, ProcessLifecycle, ProcessStdio, check_startable};
use crate::signals::CancelSignals;

pub(crate) type EventSender = mpsc::Sender<RunItem>;

/// One execution of a command, from spawn to terminal outcome
pub(crate) struct Run<M> {
    pub(crate) manager: Arc<M>,
    pub(crate) command: Command,
    pub(crate) signals: CancelSignals,
    pub(crate) encodings: StreamEncodings,
    pub(crate) events: EventSender,
}

impl<M: ProcessLifecycle> Run<M> {
    /// Drive the run to completion, emitting `Started` and line events on the
    /// way. Returns the exit code; the caller emits the terminal item.
    pub(crate) async fn execute(self) -> Result<i32, ExecError> {
        let Run {
            manager,
            command,
            signals,
            encodings,
            events,
        } = self;
        let mut machine = RunStateMachine::new();

        check_startable(&command)?;
        let mut handle = manager.spawn_process(&command).await?;
        let pid = handle
            .get_pid()
            .ok_or_else(|| ExecError::process_error("spawned process reported no id"))?;

        if signals.forceful.is_cancelled() {
            info!(pid, "Forceful cancellation requested before start; killing process");
            return Err(stop_forcefully(&mut machine, &mut handle, &command, &signals).await);
        }

        machine.started();
        info!(pid, command = %command.display_line(), "Process started");
        let _ = events
            .send(Ok(ExecutionEvent::Started { process_id: pid }))
            .await;

        let stdio = handle.take_stdio();
        let mut pipes = Box::pin(pump_pipes(stdio, &command, &events, encodings));
        let mut pipes_done = false;

        let status = loop {
            tokio::select! {
                biased;

                _ = signals.forceful.cancelled() => {
                    return Err(stop_forcefully(&mut machine, &mut handle, &command, &signals).await);
                }

                _ = signals.graceful.cancelled(), if !machine.is_stopping() => {
                    if machine.graceful_requested() {
                        let signal = command.config.graceful_signal;
                        info!(pid, ?signal, "Graceful cancellation requested; asking process to stop");
                        let result = handle.request_graceful_stop(signal).await;
                        if !result.is_success() {
                            warn!(pid, ?result, "Failed to deliver graceful stop request");
                        }
                    }
                }

                result = &mut pipes, if !pipes_done => {
                    pipes_done = true;
                    if let Err(e) = result {
                        warn!(pid, error = %e, "Pipe failed; killing process");
                        handle.kill(command.config.kill_process_tree).await;
                        return Err(e);
                    }
                }

                status = handle.wait() => match status {
                    Ok(status) => break status,
                    Err(e) => {
                        handle.kill(command.config.kill_process_tree).await;
                        return Err(ExecError::process_error(format!(
                            "waiting for process {pid}: {e}"
                        )));
                    }
                },
            }
        };

        let exit_code = status.exit_code().unwrap_or(-1);
        info!(pid, exit_code, "Process exited");

        // Output written just before exit may still be in flight.
        if !pipes_done {
            tokio::select! {
                biased;

                _ = signals.forceful.cancelled() => {
                    return Err(stop_forcefully(&mut machine, &mut handle, &command, &signals).await);
                }

                result = &mut pipes => result?,
            }
        }
        drop(pipes);

        machine.completed(exit_code).into_result(&signals)
    }
}

async fn stop_forcefully<H: ProcessHandle>(
    machine: &mut RunStateMachine,
    handle: &mut H,
    command: &Command,
    signals: &CancelSignals,
) -> ExecError {
    let outcome = machine.forceful_requested();
    let result = handle.kill(command.config.kill_process_tree).await;
    if !result.is_success() {
        warn!(?result, command = %command.target_path, "Forceful kill did not succeed");
    }
    match outcome.into_result(signals) {
        Err(e) => e,
        Ok(_) => ExecError::process_error("forceful stop resolved to a completed run"),
    }
}

/// Feed stdin and drain stdout/stderr concurrently until all three are done
async fn pump_pipes(
    stdio: ProcessStdio,
    command: &Command,
    events: &EventSender,
    encodings: StreamEncodings,
) -> Result<(), ExecError> {
    let ProcessStdio {
        stdin,
        stdout,
        stderr,
    } = stdio;
    let capacity = command.config.read_buffer_size;

    // Sinks belong to this run only and are dropped with it.
    let stdout_sink = PipeTarget::merge([
        command.stdout.clone(),
        line_events(events, StreamKind::StandardOutput, encodings.stdout),
    ])
    .open();
    let stderr_sink = PipeTarget::merge([
        command.stderr.clone(),
        line_events(events, StreamKind::StandardError, encodings.stderr),
    ])
    .open();

    tokio::try_join!(
        feed_input(stdin, &command.stdin),
        drain_output(stdout, stdout_sink, StreamKind::StandardOutput, capacity),
        drain_output(stderr, stderr_sink, StreamKind::StandardError, capacity),
    )?;

    Ok(())
}

/// Target turning output lines into execution events
fn line_events(events: &EventSender, stream: StreamKind, encoding: TextEncoding) -> PipeTarget {
    let events = events.clone();
    PipeTarget::to_async_delegate(
        move |text| {
            let events = events.clone();
            async move {
                let event = match stream {
                    StreamKind::StandardError => ExecutionEvent::StandardErrorLine { text },
                    _ => ExecutionEvent::StandardOutputLine { text },
                };
                // A consumer that went away does not stop the run.
                let _ = events.send(Ok(event)).await;
                Ok(())
            }
        },
        encoding,
    )
}

async fn feed_input(
    stdin: Option<Box<dyn AsyncWrite + Send + Unpin>>,
    source: &PipeSource,
) -> Result<(), ExecError> {
    let Some(mut stdin) = stdin else {
        return Ok(());
    };

    match source.copy_to(&mut *stdin).await {
        Ok(()) => {}
        Err(e) if is_broken_pipe(&e) => {
            debug!("Process closed its input before consuming all of it");
            return Ok(());
        }
        Err(e) => return Err(ExecError::pipe(StreamKind::StandardInput, e)),
    }

    if let Err(e) = stdin.shutdown().await {
        debug!(error = %e, "Closing process input failed");
    }
    debug!(stream = %StreamKind::StandardInput, "Pipe finished");
    Ok(())
}

async fn drain_output(
    reader: Option<Box<dyn AsyncRead + Send + Unpin>>,
    mut sink: Box<dyn OutputSink>,
    stream: StreamKind,
    capacity: usize,
) -> Result<(), ExecError> {
    if let Some(reader) = reader {
        let mut frames = FramedRead::with_capacity(reader, BytesCodec::new(), capacity);
        while let Some(frame) = frames.next().await {
            let chunk = frame.map_err(|e| ExecError::pipe(stream, e))?;
            sink.write_chunk(&chunk)
                .await
                .map_err(|e| ExecError::pipe(stream, e))?;
        }
    }

    sink.finish()
        .await
        .map_err(|e| ExecError::pipe(stream, e))?;
    debug!(%stream, "Pipe drained");
    Ok(())
}

fn is_broken_pipe(error: &anyhow::Error) -> bool {
    error.chain().any(|cause| {
        cause
            .downcast_ref::<std::io::Error>()
            .is_some_and(|io| io.kind() == std::io::ErrorKind::BrokenPipe)
    })
}
