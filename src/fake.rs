//! Recording stand-in for the peripheral registers.

use std::collections::VecDeque;
use std::vec::Vec;

use crate::registers::{BusRegisters, Flag};

/// One register access, in the order the engine made it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Event {
    /// A status flag was sampled. Acknowledge-failure samples are not recorded.
    Poll(Flag),
    Start,
    Stop,
    Ack(bool),
    Write(u8),
    Read(u8),
    ClearAddress,
    ClearAckFailure,
}

/// Slave that acknowledges everything and answers reads from a queue.
///
/// Flags settle on the first sample unless pinned.
#[derive(Default)]
pub(crate) struct FakeBus {
    pub log: Vec<Event>,
    rx: VecDeque<u8>,
    pinned: Option<(Flag, bool)>,
    nacked: Option<u8>,
    busy_polls: u32,
    start_pending: bool,
    address_acked: bool,
    ack_failure: bool,
}

impl FakeBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rx(bytes: &[u8]) -> Self {
        Self {
            rx: bytes.iter().copied().collect(),
            ..Self::default()
        }
    }

    /// Holds `flag` at `state` forever.
    pub fn pin(mut self, flag: Flag, state: bool) -> Self {
        self.pinned = Some((flag, state));
        self
    }

    /// NACKs whenever `byte` is written, as an address or as data.
    pub fn nack(mut self, byte: u8) -> Self {
        self.nacked = Some(byte);
        self
    }

    /// Reports the bus busy for the next `polls` samples.
    pub fn busy_for(mut self, polls: u32) -> Self {
        self.busy_polls = polls;
        self
    }

    /// Bytes written to the data register.
    pub fn writes(&self) -> Vec<u8> {
        self.log
            .iter()
            .filter_map(|event| match event {
                Event::Write(byte) => Some(*byte),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, event: Event) -> usize {
        self.log.iter().filter(|e| **e == event).count()
    }

    pub fn position(&self, event: Event) -> Option<usize> {
        self.log.iter().position(|e| *e == event)
    }
}

impl BusRegisters for FakeBus {
    fn is_set(&mut self, flag: Flag) -> bool {
        let state = match self.pinned {
            Some((pinned, state)) if pinned == flag => state,
            _ => match flag {
                Flag::BusBusy => {
                    if self.busy_polls > 0 {
                        self.busy_polls -= 1;
                        true
                    } else {
                        false
                    }
                }
                Flag::StartGenerated => self.start_pending,
                Flag::AddressAcked => self.address_acked,
                Flag::TransmitEmpty | Flag::ByteTransferFinished => true,
                Flag::ReceiveNotEmpty => !self.rx.is_empty(),
                Flag::AckFailure => self.ack_failure,
            },
        };
        if flag != Flag::AckFailure {
            self.log.push(Event::Poll(flag));
        }
        state
    }

    fn start_condition(&mut self) {
        self.log.push(Event::Start);
        self.start_pending = true;
    }

    fn stop_condition(&mut self) {
        self.log.push(Event::Stop);
    }

    fn set_acknowledge(&mut self, enable: bool) {
        self.log.push(Event::Ack(enable));
    }

    fn write_data(&mut self, byte: u8) {
        self.log.push(Event::Write(byte));
        let nacked = self.nacked == Some(byte);
        if self.start_pending {
            // first byte after a start is the address
            self.start_pending = false;
            self.address_acked = !nacked;
        }
        if nacked {
            self.ack_failure = true;
        }
    }

    fn read_data(&mut self) -> u8 {
        let byte = self.rx.pop_front().unwrap_or(0xFF);
        self.log.push(Event::Read(byte));
        byte
    }

    fn clear_address_flag(&mut self) {
        self.log.push(Event::ClearAddress);
        self.address_acked = false;
    }

    fn clear_ack_failure(&mut self) {
        self.log.push(Event::ClearAckFailure);
        self.ack_failure = false;
    }
}
