// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The bus driver facade: a bounded-deadline send primitive and a
//! receive stream timestamped by arrival, presented as an async sink+source
//! over the physical fieldbus device. Exclusively owned by whichever
//! [`crate::Bus`] opened it — no other component may send frames.

use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::codec::RawFrame;
use crate::error::BusError;

/// A frame as received, stamped with the instant it arrived.
#[derive(Debug, Clone, Copy)]
pub struct TimestampedFrame {
    pub frame: RawFrame,
    pub at: Instant,
}

/// Send/receive primitives a [`crate::Bus`] drives the enumeration engine
/// and device proxies through. Implementors must not drop frames between
/// calls to `receive` — inbound frames are buffered from the moment the
/// transport is opened, the way `debug-net-client` leaves its `UdpSocket`
/// bound and simply lets the kernel queue datagrams between `recv_from`
/// calls.
#[async_trait]
pub trait BusTransport {
    /// Enqueue `frame` onto the bus, blocking up to `deadline`. Returns
    /// [`BusError::SendTimeout`] if the deadline elapses first.
    async fn send(&self, frame: RawFrame, deadline: Duration) -> Result<(), BusError>;

    /// Wait up to `timeout` for the next inbound frame. `None` means the
    /// timeout elapsed with nothing arriving; it is not an error.
    async fn receive(&self, timeout: Duration) -> Option<TimestampedFrame>;
}

#[cfg(feature = "can")]
pub use self::can::CanTransport;

#[cfg(feature = "can")]
mod can {
    use super::*;
    use std::convert::TryFrom;

    use futures_util::StreamExt;
    use tokio::sync::Mutex;
    use tokio_socketcan::{CANFrame, CANSocket};

    /// A [`BusTransport`] backed by a Linux SocketCAN interface, the direct
    /// counterpart of `python-can`'s `interface='socketcan'` backend that
    /// the original firmware bridge opened its bus with.
    pub struct CanTransport {
        socket: Mutex<CANSocket>,
    }

    impl CanTransport {
        pub fn open(device_name: &str) -> Result<Self, BusError> {
            let socket = CANSocket::open(device_name)
                .map_err(|e| BusError::BusOpen(format!("{device_name}: {e}")))?;
            Ok(CanTransport { socket: Mutex::new(socket) })
        }
    }

    fn to_can_frame(frame: RawFrame) -> Result<CANFrame, BusError> {
        CANFrame::new(frame.id, &frame.data[..frame.dlc as usize], false, frame.extended)
            .map_err(|_| BusError::BusOpen("frame does not fit on the wire".into()))
    }

    #[async_trait]
    impl BusTransport for CanTransport {
        async fn send(&self, frame: RawFrame, deadline: Duration) -> Result<(), BusError> {
            let can_frame = to_can_frame(frame)?;
            let socket = self.socket.lock().await;
            let write = socket.write_frame(can_frame).map_err(|e| {
                BusError::BusOpen(format!("write_frame failed: {e}"))
            })?;
            tokio::time::timeout(deadline, write).await.map_err(|_| BusError::SendTimeout {
                frame: "raw",
                deadline_ms: deadline.as_millis() as u64,
            })?
        }

        async fn receive(&self, timeout: Duration) -> Option<TimestampedFrame> {
            let mut socket = self.socket.lock().await;
            match tokio::time::timeout(timeout, socket.next()).await {
                Ok(Some(Ok(can_frame))) => {
                    let mut data = [0u8; 8];
                    let len = can_frame.data().len().min(8);
                    data[..len].copy_from_slice(&can_frame.data()[..len]);
                    Some(TimestampedFrame {
                        frame: RawFrame {
                            id: can_frame.id(),
                            extended: can_frame.is_extended(),
                            dlc: u8::try_from(len).unwrap_or(8),
                            data,
                        },
                        at: Instant::now(),
                    })
                }
                _ => None,
            }
        }
    }
}

/// An in-process bus for tests and the scenario fixtures in `spec.md` §8,
/// standing in for real lighting nodes on the wire.
pub mod sim;
