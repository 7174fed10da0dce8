//! One simulated-terminal session per ECR connection.
//!
//! ```text
//! read frame ─> stray ACK/NACK? ─ yes ─> ignore
//!      │ no
//!      v
//! CommandRouter::dispatch ─> (ack delay) ─> NACK(reason)
//!                                      └──> ACK ─> send_group ─> release busy
//! ```
//!
//! Steps never overlap within a session. The session ends when the peer
//! closes the stream, a frame fails to decode (after NACKing it) or the
//! session is cancelled.

use std::net::SocketAddr;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zvt_core::{Result, constants::NACK_MALFORMED};
use zvt_protocol::{Frame, FrameTransport, handshake};
use zvt_simulator::{CommandRouter, Dispatch};

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The ECR closed the connection.
    PeerClosed,
    /// The session manager shut down.
    Cancelled,
}

pub struct TerminalSession<T> {
    id: u64,
    peer: SocketAddr,
    transport: T,
    router: CommandRouter,
    cancel: CancellationToken,
}

impl<T: FrameTransport> TerminalSession<T> {
    pub fn new(
        id: u64,
        peer: SocketAddr,
        transport: T,
        router: CommandRouter,
        cancel: CancellationToken,
    ) -> Self {
        TerminalSession {
            id,
            peer,
            transport,
            router,
            cancel,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Serve the connection until it ends.
    ///
    /// # Errors
    ///
    /// The decode or transport error that terminated the session. It never
    /// affects other sessions.
    pub async fn run(mut self) -> Result<SessionEnd> {
        info!(session = self.id, peer = %self.peer, "Session started");
        let cancel = self.cancel.clone();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Ok(SessionEnd::Cancelled),
            result = self.serve() => result,
        };
        match &outcome {
            Ok(end) => info!(session = self.id, peer = %self.peer, ?end, "Session ended"),
            Err(e) => warn!(session = self.id, peer = %self.peer, error = %e, "Session failed"),
        }
        outcome
    }

    async fn serve(&mut self) -> Result<SessionEnd> {
        loop {
            let frame = match self.transport.next().await {
                None => return Ok(SessionEnd::PeerClosed),
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    // Best effort: the peer may already be gone.
                    let _ = handshake::reject(&mut self.transport, NACK_MALFORMED).await;
                    return Err(e);
                }
            };

            if frame.is_control() {
                debug!(session = self.id, "Ignoring stray {frame}");
                continue;
            }
            self.handle(frame).await?;
        }
    }

    async fn handle(&mut self, frame: Frame) -> Result<()> {
        debug!(session = self.id, "<- {frame}");
        let dispatch = self.router.dispatch(&frame);
        let delays = self.router.state().config().delays;

        if !delays.ack().is_zero() {
            tokio::time::sleep(delays.ack()).await;
        }

        match dispatch {
            Dispatch::Reject(reason) => handshake::reject(&mut self.transport, reason).await,
            Dispatch::Respond {
                command,
                steps,
                guard,
            } => {
                handshake::acknowledge(&mut self.transport).await?;
                let report =
                    handshake::send_group(&mut self.transport, steps, delays.ack_timeout()).await?;
                // The terminal stays busy until the whole group is out.
                drop(guard);
                debug!(
                    session = self.id,
                    %command,
                    frames = report.frames_sent,
                    ack_waits = report.ack_waits,
                    timeouts = report.timeouts,
                    "Response group sent"
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::SinkExt;
    use std::time::Duration;
    use tokio::io::{AsyncWriteExt, duplex};
    use tokio_util::codec::Framed;
    use zvt_core::{
        Password,
        constants::{NACK_NOT_REGISTERED, NACK_UNSUPPORTED_COMMAND},
    };
    use zvt_protocol::{CommandCode, EcrRequest, TerminalMessage, ZvtCodec};
    use zvt_simulator::{DelayConfig, SimulatorConfig, SimulatorState};

    type Pipe = Framed<tokio::io::DuplexStream, ZvtCodec>;

    fn start() -> (Pipe, tokio::task::JoinHandle<Result<SessionEnd>>, CancellationToken) {
        let config = SimulatorConfig {
            delays: DelayConfig::instant(),
            print_receipts: false,
            ..Default::default()
        };
        let (ecr, terminal) = duplex(4096);
        let cancel = CancellationToken::new();
        let session = TerminalSession::new(
            1,
            "127.0.0.1:1".parse().unwrap(),
            Framed::new(terminal, ZvtCodec::new()),
            CommandRouter::new(SimulatorState::new(config)),
            cancel.clone(),
        );
        (
            Framed::new(ecr, ZvtCodec::new()),
            tokio::spawn(session.run()),
            cancel,
        )
    }

    async fn next(ecr: &mut Pipe) -> Frame {
        tokio::time::timeout(Duration::from_secs(2), ecr.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_registration_round_trip() {
        let (mut ecr, session, _) = start();
        let request = EcrRequest::registration(Password::default(), 0x8E, 978).unwrap();
        ecr.send(request.to_frame().unwrap()).await.unwrap();

        assert_eq!(next(&mut ecr).await, Frame::Ack);
        let completion = TerminalMessage::parse(&next(&mut ecr).await).unwrap();
        assert_eq!(completion.result_code(), Some(0));

        drop(ecr);
        assert_eq!(session.await.unwrap().unwrap(), SessionEnd::PeerClosed);
    }

    #[tokio::test]
    async fn test_nack_before_registration() {
        let (mut ecr, _session, _) = start();
        ecr.send(EcrRequest::authorization(100, 978).unwrap().to_frame().unwrap())
            .await
            .unwrap();
        assert_eq!(next(&mut ecr).await, Frame::nack(NACK_NOT_REGISTERED));
    }

    #[tokio::test]
    async fn test_stray_ack_is_ignored() {
        let (mut ecr, _session, _) = start();
        ecr.send(Frame::Ack).await.unwrap();
        ecr.send(Frame::Apdu {
            class: 0x08,
            instruction: 0x99,
            payload: Default::default(),
        })
        .await
        .unwrap();
        assert_eq!(next(&mut ecr).await, Frame::nack(NACK_UNSUPPORTED_COMMAND));
    }

    #[tokio::test]
    async fn test_truncated_frame_ends_session() {
        let (ecr, session, _) = start();
        let mut raw = ecr.into_inner();
        // Authorization announcing 7 payload bytes, then EOF after 2.
        raw.write_all(&[0x06, 0x01, 0x07, 0x04, 0x00]).await.unwrap();
        raw.shutdown().await.unwrap();

        assert!(session.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_cancel_ends_session() {
        let (_ecr, session, cancel) = start();
        cancel.cancel();
        assert_eq!(session.await.unwrap().unwrap(), SessionEnd::Cancelled);
    }

    #[tokio::test]
    async fn test_diagnosis_group_is_acked_between_frames() {
        let (mut ecr, _session, _) = start();
        let request = EcrRequest::registration(Password::default(), 0x8E, 978).unwrap();
        ecr.send(request.to_frame().unwrap()).await.unwrap();
        next(&mut ecr).await;
        next(&mut ecr).await;
        ecr.send(Frame::Ack).await.unwrap();

        ecr.send(Frame::apdu(CommandCode::Diagnosis, Vec::new())).await.unwrap();
        assert_eq!(next(&mut ecr).await, Frame::Ack);
        let status = next(&mut ecr).await;
        assert_eq!(status.command_code(), Some(CommandCode::IntermediateStatus));
        ecr.send(Frame::Ack).await.unwrap();
        let completion = next(&mut ecr).await;
        assert_eq!(completion.command_code(), Some(CommandCode::Completion));
    }
}
