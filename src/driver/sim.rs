// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! An in-memory bus simulating a set of lighting nodes, used by the crate's
//! own tests and available to downstream glue for testing against the
//! scenarios in `spec.md` §8 without real hardware.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::codec::Frame;
use crate::driver::{BusTransport, TimestampedFrame};
use crate::error::BusError;

struct SimulatedNode {
    words: [u16; 8],
    /// The QUID this node currently believes it belongs to; updated as
    /// `EnumUpdate` frames narrow the live subtree down to this node.
    current_quid: Cell<u16>,
    tid: Cell<Option<u16>>,
}

impl SimulatedNode {
    fn new(words: [u16; 8]) -> Self {
        SimulatedNode { words, current_quid: Cell::new(0), tid: Cell::new(None) }
    }
}

/// A fieldbus with zero or more simulated lighting nodes on it. The node
/// set is held in a `RefCell` so a test can swap it between two
/// enumeration runs on the same bus — e.g. to simulate a device vanishing
/// between runs (`spec.md` §8 Scenario 5).
pub struct SimulatedBus {
    nodes: RefCell<Vec<SimulatedNode>>,
    inbox: RefCell<VecDeque<TimestampedFrame>>,
    /// Frames sent by the engine/proxies, kept for assertions in tests.
    sent: RefCell<Vec<Frame>>,
}

impl SimulatedBus {
    pub fn new(dids: impl IntoIterator<Item = [u16; 8]>) -> Self {
        SimulatedBus {
            nodes: RefCell::new(dids.into_iter().map(SimulatedNode::new).collect()),
            inbox: RefCell::new(VecDeque::new()),
            sent: RefCell::new(Vec::new()),
        }
    }

    pub fn empty() -> Self {
        Self::new(std::iter::empty())
    }

    /// Every frame successfully sent through this bus so far, in order.
    pub fn sent_frames(&self) -> Vec<Frame> {
        self.sent.borrow().clone()
    }

    /// The TID each node currently believes it holds (`None` if unassigned).
    pub fn node_tids(&self) -> Vec<Option<u16>> {
        self.nodes.borrow().iter().map(|n| n.tid.get()).collect()
    }

    /// Replace the node set before a subsequent enumeration run.
    pub fn set_nodes(&self, dids: impl IntoIterator<Item = [u16; 8]>) {
        *self.nodes.borrow_mut() = dids.into_iter().map(SimulatedNode::new).collect();
    }

    fn handle(&self, frame: Frame) {
        let nodes = self.nodes.borrow();
        match frame {
            Frame::Reset => {
                for node in nodes.iter() {
                    node.current_quid.set(0);
                    node.tid.set(None);
                }
            }
            Frame::EnumQuery { quid, offset } => {
                for node in nodes.iter() {
                    if node.current_quid.get() == quid {
                        let word = node.words[offset as usize];
                        self.inbox.borrow_mut().push_back(TimestampedFrame {
                            frame: Frame::EnumQueryResp { word }.encode(),
                            at: Instant::now(),
                        });
                    }
                }
            }
            Frame::EnumUpdate { quid, offset, word, new_quid } => {
                for node in nodes.iter() {
                    if node.current_quid.get() == quid && node.words[offset as usize] == word {
                        node.current_quid.set(new_quid);
                    }
                }
            }
            Frame::EnumAssign { quid, tid } => {
                for node in nodes.iter() {
                    if node.current_quid.get() == quid {
                        node.tid.set(Some(tid));
                    }
                }
            }
            Frame::DimmerSet { .. } | Frame::EnumQueryResp { .. } => {
                // Nodes don't originate these and don't react to them here.
            }
        }
    }
}

#[async_trait]
impl BusTransport for SimulatedBus {
    async fn send(&self, frame: crate::codec::RawFrame, _deadline: Duration) -> Result<(), BusError> {
        if let Some(decoded) = Frame::decode(&frame) {
            self.sent.borrow_mut().push(decoded);
            self.handle(decoded);
        }
        Ok(())
    }

    async fn receive(&self, timeout: Duration) -> Option<TimestampedFrame> {
        if let Some(frame) = self.inbox.borrow_mut().pop_front() {
            return Some(frame);
        }
        tokio::time::sleep(timeout).await;
        None
    }
}
