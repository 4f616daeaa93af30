//! Line bridge between a text stream and the command channel
//!
//! Each input line becomes one submission. Up to the channel's window of
//! lines are kept outstanding, so the device buffer stays full while a
//! stream is piped in. Results are written back in input order as
//! `ok <command>` or `error <command>: <reason>`, one per line.

use plotlink_communication::{Command, CommandChannel, PendingSubmission};
use plotlink_core::{CommandError, Result};
use std::collections::VecDeque;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Counters for one bridged stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSummary {
    /// Lines submitted and acknowledged
    pub acknowledged: usize,
    /// Lines that failed, including ones refused before submission
    pub failed: usize,
    /// Blank or comment-only lines
    pub skipped: usize,
}

/// One input line waiting for its report
enum Slot {
    Sent(Command, PendingSubmission),
    Refused(Command, CommandError),
    Invalid(CommandError),
}

impl Slot {
    async fn settle(self, summary: &mut StreamSummary) -> String {
        let (command, outcome) = match self {
            Slot::Sent(command, pending) => {
                let outcome = pending.wait().await;
                (command, outcome)
            }
            Slot::Refused(command, e) => (command, Err(e)),
            Slot::Invalid(e) => {
                summary.failed += 1;
                return format!("error {}\n", e);
            }
        };

        match outcome {
            Ok(_) => {
                summary.acknowledged += 1;
                format!("ok {}\n", command)
            }
            Err(e) => {
                summary.failed += 1;
                format!("error {}: {}\n", command, e)
            }
        }
    }
}

/// Send the configured startup commands as one batch
pub async fn send_startup(
    channel: &CommandChannel,
    commands: &[String],
) -> std::result::Result<usize, CommandError> {
    if commands.is_empty() {
        return Ok(0);
    }
    tracing::info!("Sending {} startup command(s)", commands.len());
    channel.submit(commands).await
}

/// Submit every line of `input`, reporting each one to `output` in order
pub async fn stream_lines<R, W>(
    channel: &CommandChannel,
    input: R,
    output: &mut W,
) -> Result<StreamSummary>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let window = channel.window_size();
    let mut summary = StreamSummary::default();
    let mut outstanding: VecDeque<Slot> = VecDeque::with_capacity(window);
    let mut lines = input.lines();

    while let Some(line) = lines.next_line().await? {
        let slot = match Command::parse(&line) {
            Ok(None) => {
                summary.skipped += 1;
                continue;
            }
            Ok(Some(command)) => match channel.enqueue([command.as_str()]).await {
                Ok(pending) => Slot::Sent(command, pending),
                Err(e) => Slot::Refused(command, e),
            },
            Err(e) => Slot::Invalid(e),
        };
        outstanding.push_back(slot);

        while outstanding.len() >= window {
            if let Some(oldest) = outstanding.pop_front() {
                report(oldest, &mut summary, output).await?;
            }
        }
    }

    while let Some(slot) = outstanding.pop_front() {
        report(slot, &mut summary, output).await?;
    }

    Ok(summary)
}

async fn report<W>(slot: Slot, summary: &mut StreamSummary, output: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let line = slot.settle(summary).await;
    output.write_all(line.as_bytes()).await?;
    output.flush().await?;
    Ok(())
}
