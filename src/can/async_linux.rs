//! Async adapter over [`LinuxSocketCanTransceiver`] for host integrations
//! that want to `.await` CAN I/O instead of polling it from a tick loop
//! (demo harnesses, the lifecycle manager's own async runlevel driver).
//!
//! The cooperative DoCAN/UDS/lifecycle stack itself never awaits -- this
//! exists at the edge, for callers that are already tokio-based.

use tokio::io::unix::AsyncFd;

use crate::can::frame::CanFrame;
use crate::can::linux::{LinuxSocketCanTransceiver, OpenError};
use crate::can::transceiver::{CanTransceiver, SendResult};

pub struct AsyncLinuxCanTransceiver {
    async_fd: AsyncFd<LinuxSocketCanTransceiver>,
}

impl AsyncLinuxCanTransceiver {
    pub fn open(interface_name: &str) -> Result<Self, OpenError> {
        let transceiver = LinuxSocketCanTransceiver::open(interface_name)?;
        Ok(Self {
            async_fd: AsyncFd::new(transceiver)
                .map_err(OpenError::IOError)?,
        })
    }

    /// Await the next batch of received frames (at least one, unless the
    /// socket is closed out from under us).
    pub async fn recv(&self) -> std::io::Result<Vec<CanFrame>> {
        loop {
            let mut guard = self.async_fd.readable().await?;
            let frames = guard.get_inner().poll_rx();
            if frames.is_empty() {
                guard.clear_ready();
                continue;
            }
            return Ok(frames);
        }
    }

    pub async fn send(&self, frame: CanFrame) -> std::io::Result<SendResult> {
        let mut guard = self.async_fd.writable().await?;
        let result = guard.get_inner().send(frame);
        if result == SendResult::Queued {
            guard.clear_ready();
        }
        Ok(result)
    }
}

#[cfg(all(test, feature = "vcan_tests"))]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::time::Duration;

    const CAN: &str = "vcan0";

    #[tokio::test]
    #[serial]
    async fn async_bidirectional() {
        let a = tokio::task::spawn({
            let transceiver = AsyncLinuxCanTransceiver::open(CAN).unwrap();
            async move {
                let _ = tokio::time::timeout(Duration::from_secs(2), transceiver.recv()).await;
            }
        });

        let b = tokio::spawn({
            let transceiver = AsyncLinuxCanTransceiver::open(CAN).unwrap();
            async move {
                let mut interval = tokio::time::interval(Duration::from_millis(10));
                for _ in 0..100 {
                    let frame = CanFrame::new(0x80, &[], 0).unwrap();
                    let _ = transceiver.send(frame).await;
                    interval.tick().await;
                }
            }
        });

        let _ = tokio::join!(a, b);
    }
}
