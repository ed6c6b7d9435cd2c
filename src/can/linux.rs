//! Production [`CanTransceiver`] backed by a Linux `AF_CAN`/`SOCK_RAW`
//! socket, plus a kernel-offloaded periodic sender ([`BcmSocket`]) usable for
//! cyclic sends (e.g. TesterPresent suppression) without host-side timing.
//!
//! Reads are nonblocking; [`LinuxSocketCanTransceiver::poll_rx`] drains
//! whatever the kernel has queued for this socket without blocking the
//! calling execution context, consistent with the "no component blocks
//! synchronously" scheduling rule.

use std::mem::size_of;
use std::os::unix::prelude::*;
use std::sync::Mutex;

use thiserror::Error;

use crate::can::frame::CanFrame;
use crate::can::raw::{CANAddr, CANFilter, RawCanFrame, BCMInterval, BCMMessageHeader};
use crate::can::retry::ShouldRetry;
use crate::can::transceiver::{CanTransceiver, SendResult, TransceiverState};
use crate::can::{raw, sys};

#[derive(Debug, Error)]
pub enum OpenError {
    #[error("Target CAN network couldn't be found.")]
    LookupError(nix::Error),
    #[error("Failed to access or set-up CAN network socket.")]
    IOError(std::io::Error),
}

/// A single raw socketcan socket, opened on a named interface (`can0`,
/// `vcan0`, ...).
struct RawSocket {
    fd: RawFd,
}

impl RawSocket {
    fn open(interface_name: &str) -> Result<Self, OpenError> {
        let interface_index =
            nix::net::if_::if_nametoindex(interface_name).map_err(OpenError::LookupError)?;
        let sock_fd = unsafe { libc::socket(raw::PF_CAN, libc::SOCK_RAW, raw::CAN_RAW) };
        if sock_fd == -1 {
            return Err(OpenError::IOError(std::io::Error::last_os_error()));
        }

        let bind_result = unsafe {
            let addr = CANAddr::new(interface_index);
            let sockaddr_ptr = &addr as *const CANAddr;
            libc::bind(
                sock_fd,
                sockaddr_ptr as *const libc::sockaddr,
                std::mem::size_of::<CANAddr>() as u32,
            )
        };
        if bind_result == -1 {
            let e = std::io::Error::last_os_error();
            unsafe {
                libc::close(sock_fd);
            }
            return Err(OpenError::IOError(e));
        }

        let socket = Self { fd: sock_fd };
        sys::set_nonblocking(socket.fd).map_err(OpenError::IOError)?;
        Ok(socket)
    }

    fn read(&self) -> std::io::Result<RawCanFrame> {
        let mut frame = RawCanFrame::default();
        let read_result = unsafe {
            let frame_ptr = &mut frame as *mut RawCanFrame;
            libc::read(
                self.fd,
                frame_ptr as *mut libc::c_void,
                size_of::<RawCanFrame>(),
            )
        };
        if read_result as usize != size_of::<RawCanFrame>() {
            return Err(std::io::Error::last_os_error());
        }
        Ok(frame)
    }

    fn write(&self, frame: &RawCanFrame) -> std::io::Result<()> {
        let write_result = unsafe {
            let frame_ptr = frame as *const RawCanFrame;
            libc::write(
                self.fd,
                frame_ptr as *const libc::c_void,
                size_of::<RawCanFrame>(),
            )
        };
        if write_result as usize != size_of::<RawCanFrame>() {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }

    fn setup_filters(&self, filters: Option<Vec<CANFilter>>) -> std::io::Result<()> {
        let return_value = match filters {
            None => unsafe {
                libc::setsockopt(
                    self.fd,
                    raw::SOL_CAN_RAW,
                    raw::CAN_RAW_FILTER,
                    0 as *const libc::c_void,
                    0,
                )
            },
            Some(filters) => unsafe {
                let filters_ptr = &filters[0] as *const CANFilter;
                libc::setsockopt(
                    self.fd,
                    raw::SOL_CAN_RAW,
                    raw::CAN_RAW_FILTER,
                    filters_ptr as *const libc::c_void,
                    (size_of::<CANFilter>() * filters.len()) as u32,
                )
            },
        };
        if return_value != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }

    fn set_error_filter(&self, mask: u32) -> std::io::Result<()> {
        let result = unsafe {
            libc::setsockopt(
                self.fd,
                raw::SOL_CAN_RAW,
                raw::CAN_RAW_ERR_FILTER,
                (&mask as *const u32) as *const libc::c_void,
                size_of::<u32>() as u32,
            )
        };
        if result != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }

    fn set_read_timeout(&self, duration: std::time::Duration) -> std::io::Result<()> {
        sys::set_socket_option(self.fd, libc::SOL_SOCKET, libc::SO_RCVTIMEO, &sys::c_timeval_new(duration))
    }

    fn set_write_timeout(&self, duration: std::time::Duration) -> std::io::Result<()> {
        sys::set_socket_option(self.fd, libc::SOL_SOCKET, libc::SO_SNDTIMEO, &sys::c_timeval_new(duration))
    }
}

impl Drop for RawSocket {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

impl AsRawFd for RawSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

fn to_can_frame(raw: RawCanFrame, timestamp_us: u32) -> Option<CanFrame> {
    CanFrame::new(raw.id(), raw.data(), timestamp_us).ok()
}

fn to_raw_frame(frame: &CanFrame) -> Result<RawCanFrame, crate::can::raw::RawFrameError> {
    RawCanFrame::new(frame.id(), frame.payload(), false, false)
}

/// Production [`CanTransceiver`] implementation for a Linux CAN network
/// interface. `accept_all`/`drop_all` filters and the error filter mirror
/// the raw socket's `setsockopt` surface; everything else goes through the
/// trait.
pub struct LinuxSocketCanTransceiver {
    socket: RawSocket,
    state: Mutex<TransceiverState>,
}

impl LinuxSocketCanTransceiver {
    pub fn open(interface_name: &str) -> Result<Self, OpenError> {
        let socket = RawSocket::open(interface_name)?;
        socket
            .setup_filters(Some(vec![CANFilter::new(0, 0).unwrap()]))
            .map_err(OpenError::IOError)?;
        Ok(Self {
            socket,
            state: Mutex::new(TransceiverState::Open),
        })
    }

    pub fn set_read_timeout(&self, duration: std::time::Duration) -> std::io::Result<()> {
        self.socket.set_read_timeout(duration)
    }

    pub fn set_write_timeout(&self, duration: std::time::Duration) -> std::io::Result<()> {
        self.socket.set_write_timeout(duration)
    }

    pub fn set_error_reporting(&self, enabled: bool) -> std::io::Result<()> {
        self.socket
            .set_error_filter(if enabled { crate::can::raw::ERR_MASK } else { 0 })
    }
}

impl AsRawFd for LinuxSocketCanTransceiver {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

impl CanTransceiver for LinuxSocketCanTransceiver {
    fn state(&self) -> TransceiverState {
        *self.state.lock().unwrap()
    }

    fn send(&self, frame: CanFrame) -> SendResult {
        if *self.state.lock().unwrap() != TransceiverState::Open {
            return SendResult::Failed;
        }
        let raw = match to_raw_frame(&frame) {
            Ok(r) => r,
            Err(_) => return SendResult::Failed,
        };
        match self.socket.write(&raw) {
            Ok(()) => SendResult::Sent,
            Err(e) if e.should_retry() => SendResult::Queued,
            Err(_) => SendResult::Failed,
        }
    }

    fn poll_rx(&self) -> Vec<CanFrame> {
        let mut received = Vec::new();
        loop {
            match self.socket.read() {
                Ok(raw) => {
                    if let Some(frame) = to_can_frame(raw, 0) {
                        received.push(frame);
                    }
                }
                Err(e) if e.should_retry() => break,
                Err(_) => break,
            }
        }
        received
    }

    fn poll_tx_events(&self) -> Vec<(u32, bool)> {
        // The raw blocking/nonblocking write path above already reports
        // success synchronously; this socket type has no deferred
        // transmit-confirmation queue the way a BCM or mocked transceiver
        // does.
        Vec::new()
    }
}

/// Kernel-offloaded periodic frame sender (CAN broadcast manager). Used to
/// hand cyclic sends -- e.g. suppressing TesterPresent's S3 timeout -- to
/// the kernel instead of driving them from the tick loop.
pub struct BcmSocket {
    fd: RawFd,
}

impl BcmSocket {
    pub fn open(interface_name: &str) -> Result<Self, OpenError> {
        let interface_index =
            nix::net::if_::if_nametoindex(interface_name).map_err(OpenError::LookupError)?;
        let sock_fd = unsafe { libc::socket(raw::PF_CAN, libc::SOCK_DGRAM, raw::CAN_BCM) };
        if sock_fd == -1 {
            return Err(OpenError::IOError(std::io::Error::last_os_error()));
        }

        let connect_result = unsafe {
            let addr = CANAddr::new(interface_index);
            let sockaddr_ptr = &addr as *const CANAddr;
            libc::connect(
                sock_fd,
                sockaddr_ptr as *const libc::sockaddr,
                std::mem::size_of::<CANAddr>() as u32,
            )
        };
        if connect_result == -1 {
            let e = std::io::Error::last_os_error();
            unsafe {
                libc::close(sock_fd);
            }
            return Err(OpenError::IOError(e));
        }

        Ok(Self { fd: sock_fd })
    }

    pub fn send_periodically(&self, period_us: u64, frame: CanFrame) -> std::io::Result<()> {
        let raw_frame = to_raw_frame(&frame)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;
        let bcm_message = BCMMessageHeader {
            opcode: raw::TX_SETUP,
            flags: (raw::BCM_SETTIMER | raw::BCM_STARTTIMER) as u32,
            count: 0,
            ival1: BCMInterval {
                tv_sec: 0,
                tv_usec: 0,
            },
            ival2: BCMInterval {
                tv_sec: 0,
                tv_usec: period_us as libc::c_long,
            },
            can_id: raw_frame.id(),
            nframes: 1,
            frames: raw_frame,
        };

        let write_result = unsafe {
            let message_ptr = &bcm_message as *const BCMMessageHeader;
            libc::write(
                self.fd,
                message_ptr as *const libc::c_void,
                size_of::<BCMMessageHeader>(),
            )
        };

        if write_result == -1 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for BcmSocket {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}
