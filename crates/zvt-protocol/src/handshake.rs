//! Turn-taking between ECR and terminal.
//!
//! Every APDU is acknowledged by the receiver once it has been consumed:
//! `80 00` to accept, `84 00 <reason>` to reject. A response group is sent
//! frame by frame; the sender waits for the ACK of every frame except the
//! last one before sending the next.
//!
//! ```text
//! sender                 receiver
//!   | -- frame 1 ------------> |
//!   | <------------- ACK ----- |
//!   | -- frame 2 ------------> |
//!   | <------------- ACK ----- |
//!   | -- frame N (last) -----> |   no ACK wait
//! ```
//!
//! The helpers here are generic over any [`FrameTransport`], in practice a
//! `Framed<_, ZvtCodec>` over a TCP stream or an in-memory duplex pipe.

use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tracing::{debug, warn};
use zvt_core::{Error, Result, constants::NACK_MALFORMED};

use crate::frame::Frame;

/// A bidirectional stream of frames.
pub trait FrameTransport:
    Stream<Item = Result<Frame>> + Sink<Frame, Error = Error> + Unpin + Send
{
}

impl<T> FrameTransport for T where
    T: Stream<Item = Result<Frame>> + Sink<Frame, Error = Error> + Unpin + Send
{
}

/// What came back after sending a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    Acknowledged,
    Rejected(u8),
    TimedOut,
}

/// One frame of a response group and the delay before sending it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseStep {
    pub frame: Frame,
    pub delay: Duration,
}

impl ResponseStep {
    pub fn new(frame: Frame) -> Self {
        ResponseStep {
            frame,
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Accounting of one [`send_group`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupReport {
    pub frames_sent: usize,
    pub ack_waits: usize,
    pub acknowledged: usize,
    pub rejected: usize,
    pub timeouts: usize,
}

/// Wait for the peer's ACK or NACK.
///
/// # Errors
///
/// [`Error::Connection`] when the stream ends, [`Error::Protocol`] when an
/// APDU arrives instead of a control frame, and any decode error.
pub async fn await_ack<T: FrameTransport>(transport: &mut T, timeout: Duration) -> Result<AckOutcome> {
    match tokio::time::timeout(timeout, transport.next()).await {
        Err(_) => Ok(AckOutcome::TimedOut),
        Ok(None) => Err(Error::connection("peer closed the connection while an ACK was due")),
        Ok(Some(Err(err))) => Err(err),
        Ok(Some(Ok(Frame::Ack))) => Ok(AckOutcome::Acknowledged),
        Ok(Some(Ok(Frame::Nack { reason }))) => Ok(AckOutcome::Rejected(reason)),
        Ok(Some(Ok(frame))) => Err(Error::protocol_with_raw(
            format!("expected ACK, received {frame}"),
            &frame.encode().unwrap_or_default(),
        )),
    }
}

/// Send a frame and wait for its acknowledgement.
pub async fn send_and_await_ack<T: FrameTransport>(
    transport: &mut T,
    frame: Frame,
    timeout: Duration,
) -> Result<AckOutcome> {
    debug!("-> {frame}");
    transport.send(frame).await?;
    let outcome = await_ack(transport, timeout).await?;
    debug!(?outcome, "<- acknowledgement");
    Ok(outcome)
}

/// Send a response group, waiting for the ACK of every frame but the last.
///
/// Each step's delay elapses before its frame is sent. A missing ACK is
/// logged and the group continues; a NACK is logged the same way.
///
/// # Errors
///
/// An APDU or undecodable frame in place of an ACK is rejected with
/// `NACK_MALFORMED` and ends the group with [`Error::Protocol`]. Transport
/// errors are returned as they are.
pub async fn send_group<T: FrameTransport>(
    transport: &mut T,
    steps: Vec<ResponseStep>,
    ack_timeout: Duration,
) -> Result<GroupReport> {
    let mut report = GroupReport::default();
    let total = steps.len();

    for (index, step) in steps.into_iter().enumerate() {
        if !step.delay.is_zero() {
            tokio::time::sleep(step.delay).await;
        }

        let is_last = index + 1 == total;
        let description = step.frame.to_string();
        if is_last {
            debug!(frame = index + 1, total, "-> {description} (last)");
            transport.send(step.frame).await?;
            report.frames_sent += 1;
            break;
        }

        debug!(frame = index + 1, total, "-> {description}");
        transport.send(step.frame).await?;
        report.frames_sent += 1;
        report.ack_waits += 1;

        let outcome = match await_ack(transport, ack_timeout).await {
            Ok(outcome) => outcome,
            Err(err @ Error::Protocol { .. }) => {
                warn!(frame = index + 1, "unexpected frame while awaiting ACK: {err}");
                if let Err(e) = reject(transport, NACK_MALFORMED).await {
                    debug!("NACK not delivered: {e}");
                }
                return Err(err);
            }
            Err(err) => return Err(err),
        };
        match outcome {
            AckOutcome::Acknowledged => report.acknowledged += 1,
            AckOutcome::Rejected(reason) => {
                report.rejected += 1;
                warn!(
                    frame = index + 1,
                    "peer rejected {description} with 0x{reason:02X}, continuing"
                );
            }
            AckOutcome::TimedOut => {
                report.timeouts += 1;
                warn!(
                    frame = index + 1,
                    timeout_ms = ack_timeout.as_millis() as u64,
                    "no ACK for {description}, continuing"
                );
            }
        }
    }

    Ok(report)
}

/// Accept the frame just consumed.
pub async fn acknowledge<T: FrameTransport>(transport: &mut T) -> Result<()> {
    transport.send(Frame::Ack).await
}

/// Reject the frame just consumed.
pub async fn reject<T: FrameTransport>(transport: &mut T, reason: u8) -> Result<()> {
    debug!("-> NACK(0x{reason:02X})");
    transport.send(Frame::Nack { reason }).await
}

/// Receive the next frame.
///
/// # Errors
///
/// [`Error::Timeout`] if nothing arrives in time, [`Error::Connection`] if
/// the stream ends.
pub async fn recv_frame<T: FrameTransport>(transport: &mut T, timeout: Duration) -> Result<Frame> {
    match tokio::time::timeout(timeout, transport.next()).await {
        Err(_) => Err(Error::timeout(
            "no frame received from peer",
            timeout.as_millis() as u64,
        )),
        Ok(None) => Err(Error::connection("connection closed by peer")),
        Ok(Some(result)) => {
            let frame = result?;
            debug!("<- {frame}");
            Ok(frame)
        }
    }
}
