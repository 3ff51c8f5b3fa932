use core::fmt;
use core::iter::once;

use embedded_hal::i2c::{ErrorKind, ErrorType, NoAcknowledgeSource, Operation, SevenBitAddress};
use i2c_write_iter::Operation as IterOperation;

use crate::registers::{BusRegisters, Flag};

/// Status polls a single wait may spend under [`Config::DEFAULT`].
pub const DEFAULT_POLL_BUDGET: u32 = 100_000;

/// Engine configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Number of status polls a wait may spend before failing with [`Error::Timeout`].
    ///
    /// `None` polls forever.
    pub poll_budget: Option<u32>,
    /// Issue a stop condition at the end of [`I2C::burst_write`].
    ///
    /// When `false` the write leaves the bus held and the next burst chains onto it with a
    /// repeated start. See [`I2C::release`].
    pub emit_stop_on_write: bool,
}

impl Config {
    /// Bounded waits; burst writes leave the bus held.
    pub const DEFAULT: Self = Self {
        poll_budget: Some(DEFAULT_POLL_BUDGET),
        emit_stop_on_write: false,
    };

    /// Waits never give up.
    pub const UNBOUNDED: Self = Self {
        poll_budget: None,
        ..Self::DEFAULT
    };
}

impl Default for Config {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Data direction carried in bit 0 of the address byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    /// Master to slave.
    Write,
    /// Slave to master.
    Read,
}

impl Direction {
    const fn bit(self) -> u8 {
        match self {
            Direction::Write => 0,
            Direction::Read => 1,
        }
    }
}

/// Progress of the transaction currently on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Phase {
    /// No transaction owns the bus.
    Idle,
    /// A start or repeated start has been requested.
    StartPending,
    /// The address byte has been written.
    AddressSent(Direction),
    /// The slave acknowledged its address.
    AddressAcked(Direction),
    /// Data bytes are moving.
    Transferring(Direction),
    /// A stop condition has been requested.
    StopPending,
}

/// I2C transaction error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// `flag` did not reach the awaited state within the poll budget.
    Timeout {
        /// Flag being waited on.
        flag: Flag,
        /// Phase the transaction was in.
        phase: Phase,
    },
    /// The slave did not acknowledge an address or data byte.
    NoAcknowledge(NoAcknowledgeSource),
    /// A previous burst write still holds the bus.
    IncompleteTransfer,
    /// The 7-bit address does not fit in 7 bits.
    AddressOutOfRange(u8),
    /// The 7-bit address is in a reserved range.
    AddressReserved(u8),
    /// A read was requested into an empty buffer.
    InvalidReadBufferLength,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Timeout { flag, phase } => {
                write!(f, "timed out waiting on {:?} during {:?}", flag, phase)
            }
            Error::NoAcknowledge(source) => write!(f, "no acknowledge: {}", source),
            Error::IncompleteTransfer => f.write_str("bus still held by an unterminated write"),
            Error::AddressOutOfRange(addr) => write!(f, "address {:#04x} out of range", addr),
            Error::AddressReserved(addr) => write!(f, "address {:#04x} is reserved", addr),
            Error::InvalidReadBufferLength => f.write_str("empty read buffer"),
        }
    }
}

impl embedded_hal::i2c::Error for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Error::NoAcknowledge(source) => ErrorKind::NoAcknowledge(*source),
            _ => ErrorKind::Other,
        }
    }
}

/// Polled I2C master.
///
/// Every step of a transaction is gated on a status flag of the underlying
/// [`BusRegisters`]; nothing is interrupt or DMA driven.
///
/// The register-oriented operations ([`byte_read`](Self::byte_read),
/// [`burst_read`](Self::burst_read), [`burst_write`](Self::burst_write)) take the slave
/// address *pre-shifted*: the MPU6050 is `0xD0`, not `0x68`. Bit 0 belongs to the engine,
/// which clears it and substitutes the direction bit, so `0xD0` and `0xD1` address the same
/// device. The embedded-hal traits take the usual unshifted 7-bit address.
pub struct I2C<R> {
    regs: R,
    config: Config,
    phase: Phase,
    held: bool,
}

impl<R> I2C<R>
where
    R: BusRegisters,
{
    /// Creates a master on top of an initialised peripheral.
    pub fn new(regs: R, config: Config) -> Self {
        Self {
            regs,
            config,
            phase: Phase::Idle,
            held: false,
        }
    }

    /// Releases the register backend.
    pub fn free(self) -> R {
        self.regs
    }

    /// Active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Phase of the transaction in progress, or of the held write.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether a burst write left the bus without a stop condition.
    pub fn is_held(&self) -> bool {
        self.held
    }

    /// Emits the stop condition a held burst write skipped.
    pub fn release(&mut self) {
        if self.held {
            debug!("i2c: releasing held bus");
            self.regs.stop_condition();
            self.held = false;
            self.phase = Phase::Idle;
        }
    }

    /// Reads one register.
    ///
    /// Waits for the bus to go idle, writes `register`, then reads a single byte back after a
    /// repeated start. The byte is NACKed and the stop requested before it arrives.
    pub fn byte_read(&mut self, address: u8, register: u8) -> Result<u8, Error> {
        let header = Self::header(address)?;
        trace!("i2c: byte_read {=u8:#x} reg {=u8:#x}", header, register);

        self.ensure_released()?;
        self.wait_until(Flag::BusBusy, false)?;

        let mut byte = 0;
        let mut txn = Transaction::begin(self);
        txn.select_register(header, register)?;
        txn.receive(core::slice::from_mut(&mut byte), 1, true)?;
        Ok(byte)
    }

    /// Reads `buffer.len()` consecutive bytes starting at `register`.
    ///
    /// Does not wait for an idle bus, so it may follow a held [`burst_write`](Self::burst_write)
    /// directly. Every byte but the last is ACKed.
    pub fn burst_read(&mut self, address: u8, register: u8, buffer: &mut [u8]) -> Result<(), Error> {
        let header = Self::header(address)?;
        if buffer.is_empty() {
            return Err(Error::InvalidReadBufferLength);
        }
        trace!(
            "i2c: burst_read {=u8:#x} reg {=u8:#x} len {=usize}",
            header,
            register,
            buffer.len()
        );

        let total = buffer.len();
        let mut txn = Transaction::begin(self);
        txn.select_register(header, register)?;
        txn.receive(buffer, total, true)?;
        Ok(())
    }

    /// Writes `data` to consecutive registers starting at `register`.
    ///
    /// Each byte waits for the transmit register to empty and for the byte transfer to
    /// finish. The stop condition is only issued with [`Config::emit_stop_on_write`].
    pub fn burst_write(&mut self, address: u8, register: u8, data: &[u8]) -> Result<(), Error> {
        let header = Self::header(address)?;
        trace!(
            "i2c: burst_write {=u8:#x} reg {=u8:#x} len {=usize}",
            header,
            register,
            data.len()
        );

        let emit_stop = self.config.emit_stop_on_write;
        let mut txn = Transaction::begin(self);
        txn.address(header, Direction::Write)?;
        txn.clear_address();
        txn.transmit(core::iter::once(register).chain(data.iter().copied()))?;
        if emit_stop {
            txn.stop();
        } else {
            txn.keep_open();
        }
        Ok(())
    }

    /// Writes to the i2c bus consuming bytes for the given iterator.
    pub fn write_iter<U>(&mut self, address: SevenBitAddress, bytes: U) -> Result<(), Error>
    where
        U: IntoIterator<Item = u8>,
    {
        self.transaction_iter(address, once(IterOperation::WriteIter(bytes)))
    }

    /// Runs iterator-fed `operations` as one transaction against a 7-bit `address`.
    ///
    /// Adjacent operations of the same direction share one addressing phase and the
    /// final byte of a read run is the only one answered with a NACK. An empty read
    /// buffer fails with [`Error::InvalidReadBufferLength`] when it is reached; if the
    /// bus was already started the transaction is closed with a stop.
    pub fn transaction_iter<'a, O, U>(
        &mut self,
        address: SevenBitAddress,
        operations: O,
    ) -> Result<(), Error>
    where
        O: IntoIterator<Item = IterOperation<'a, U>>,
        U: IntoIterator<Item = u8>,
    {
        Self::validate(address)?;
        let mut operations = operations.into_iter().peekable();
        if operations.peek().is_none() {
            return Ok(());
        }
        self.ensure_released()?;
        self.wait_until(Flag::BusBusy, false)?;

        let header = address << 1;
        let mut txn = Transaction::begin(self);
        let mut previous = None;
        while let Some(operation) = operations.next() {
            let last = operations.peek().is_none();
            let read_follows = matches!(operations.peek(), Some(IterOperation::Read(_)));
            match operation {
                IterOperation::Read(buffer) => {
                    if buffer.is_empty() {
                        return Err(Error::InvalidReadBufferLength);
                    }
                    let first = previous != Some(Direction::Read);
                    let lone = first && buffer.len() == 1 && !read_follows;
                    if first {
                        txn.address(header, Direction::Read)?;
                        txn.arm_receive(lone, last);
                    }
                    txn.receive_chunk(buffer, !read_follows && !lone, last)?;
                    previous = Some(Direction::Read);
                }
                IterOperation::WriteIter(bytes) => {
                    if previous != Some(Direction::Write) {
                        txn.address(header, Direction::Write)?;
                        txn.clear_address();
                    }
                    txn.transmit(bytes)?;
                    if last {
                        txn.stop();
                    }
                    previous = Some(Direction::Write);
                }
            }
        }
        Ok(())
    }

    /// Runs `operations` as one transaction against a 7-bit `address`.
    ///
    /// Adjacent operations of the same kind share an addressing phase, a change of direction
    /// issues a repeated start, and a single stop ends the transaction.
    pub fn transaction_slice(
        &mut self,
        address: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Error> {
        Self::validate(address)?;
        if operations
            .iter()
            .any(|op| matches!(op, Operation::Read(buffer) if buffer.is_empty()))
        {
            return Err(Error::InvalidReadBufferLength);
        }
        if operations.is_empty() {
            return Ok(());
        }

        self.ensure_released()?;
        self.wait_until(Flag::BusBusy, false)?;

        let header = address << 1;
        let mut txn = Transaction::begin(self);
        let mut rest = operations;
        while !rest.is_empty() {
            let reading = matches!(rest[0], Operation::Read(_));
            let run_len = rest
                .iter()
                .take_while(|op| matches!(op, Operation::Read(_)) == reading)
                .count();
            let (run, tail) = core::mem::take(&mut rest).split_at_mut(run_len);
            let last = tail.is_empty();

            if reading {
                let total = run
                    .iter()
                    .map(|op| match op {
                        Operation::Read(buffer) => buffer.len(),
                        Operation::Write(_) => 0,
                    })
                    .sum();
                let slots = run
                    .iter_mut()
                    .filter_map(|op| match op {
                        Operation::Read(buffer) => Some(buffer.iter_mut()),
                        Operation::Write(_) => None,
                    })
                    .flatten();
                txn.address(header, Direction::Read)?;
                txn.receive(slots, total, last)?;
            } else {
                let bytes = run
                    .iter()
                    .filter_map(|op| match op {
                        Operation::Write(bytes) => Some(bytes.iter().copied()),
                        Operation::Read(_) => None,
                    })
                    .flatten();
                txn.address(header, Direction::Write)?;
                txn.clear_address();
                txn.transmit(bytes)?;
                if last {
                    txn.stop();
                }
            }
            rest = tail;
        }
        Ok(())
    }

    /// Address byte for a pre-shifted address, with bit 0 cleared.
    fn header(address: u8) -> Result<u8, Error> {
        let header = address & !1;
        Self::validate(header >> 1)?;
        Ok(header)
    }

    fn validate(address: SevenBitAddress) -> Result<(), Error> {
        if address >= 0x80 {
            Err(Error::AddressOutOfRange(address))
        } else if (address & 0x78) == 0 || (address & 0x78) == 0x78 {
            Err(Error::AddressReserved(address))
        } else {
            Ok(())
        }
    }

    fn ensure_released(&self) -> Result<(), Error> {
        if self.held {
            Err(Error::IncompleteTransfer)
        } else {
            Ok(())
        }
    }

    /// Polls `flag` until it reads `state`.
    ///
    /// Waits that a slave NACK can stall also watch the acknowledge-failure flag.
    fn wait_until(&mut self, flag: Flag, state: bool) -> Result<(), Error> {
        let mut polls: u32 = 0;
        loop {
            if flag.aborted_by_nack() && self.regs.is_set(Flag::AckFailure) {
                self.regs.clear_ack_failure();
                let source = match self.phase {
                    Phase::AddressSent(_) => NoAcknowledgeSource::Address,
                    _ => NoAcknowledgeSource::Data,
                };
                debug!("i2c: nack during {}", self.phase);
                return Err(Error::NoAcknowledge(source));
            }
            if self.regs.is_set(flag) == state {
                return Ok(());
            }

            polls = polls.saturating_add(1);
            if let Some(budget) = self.config.poll_budget {
                if polls >= budget {
                    warn!("i2c: timeout on {} during {}", flag, self.phase);
                    return Err(Error::Timeout {
                        flag,
                        phase: self.phase,
                    });
                }
            }
            core::hint::spin_loop();
        }
    }
}

/// Bus ownership for the duration of one transaction.
///
/// Dropping it emits the stop condition unless one was already requested or the
/// transaction was deliberately left open, so an early `?` return never strands the bus.
struct Transaction<'a, R>
where
    R: BusRegisters,
{
    i2c: &'a mut I2C<R>,
    keep_open: bool,
}

impl<'a, R> Transaction<'a, R>
where
    R: BusRegisters,
{
    fn begin(i2c: &'a mut I2C<R>) -> Self {
        Self {
            i2c,
            keep_open: false,
        }
    }

    /// (Repeated) start followed by the address byte; leaves the address flag set.
    fn address(&mut self, header: u8, direction: Direction) -> Result<(), Error> {
        let i2c = &mut *self.i2c;
        i2c.regs.start_condition();
        i2c.phase = Phase::StartPending;
        i2c.wait_until(Flag::StartGenerated, true)?;

        i2c.regs.write_data(header | direction.bit());
        i2c.phase = Phase::AddressSent(direction);
        i2c.wait_until(Flag::AddressAcked, true)?;
        i2c.phase = Phase::AddressAcked(direction);
        Ok(())
    }

    fn clear_address(&mut self) {
        self.i2c.regs.clear_address_flag();
        self.i2c.phase = Phase::Transferring(Direction::Write);
    }

    /// Points the slave at `register` and turns the bus around for reading.
    fn select_register(&mut self, header: u8, register: u8) -> Result<(), Error> {
        self.address(header, Direction::Write)?;
        self.clear_address();
        self.i2c.regs.write_data(register);
        self.i2c.wait_until(Flag::TransmitEmpty, true)?;
        self.address(header, Direction::Read)
    }

    fn transmit<U>(&mut self, bytes: U) -> Result<(), Error>
    where
        U: IntoIterator<Item = u8>,
    {
        for byte in bytes {
            self.i2c.wait_until(Flag::TransmitEmpty, true)?;
            self.i2c.regs.write_data(byte);
            self.i2c.wait_until(Flag::ByteTransferFinished, true)?;
        }
        Ok(())
    }

    /// Receives `total` bytes into `slots` once a read address has been acknowledged.
    ///
    /// The NACK (and stop, with `stop`) for the final byte is armed before that byte is
    /// awaited; arming it afterwards lets the slave clock out another byte. A lone byte
    /// must have the ACK disabled before the address flag is cleared.
    fn receive<'s, U>(&mut self, slots: U, total: usize, stop: bool) -> Result<(), Error>
    where
        U: IntoIterator<Item = &'s mut u8>,
    {
        self.arm_receive(total == 1, stop);

        let mut remaining = total;
        for slot in slots {
            if remaining == 1 && total > 1 {
                self.nack_next(stop);
            }
            self.i2c.wait_until(Flag::ReceiveNotEmpty, true)?;
            *slot = self.i2c.regs.read_data();
            remaining -= 1;
        }
        Ok(())
    }

    /// Clears the address flag and sets the ACK policy for the first received byte.
    fn arm_receive(&mut self, lone: bool, stop: bool) {
        if lone {
            self.i2c.regs.set_acknowledge(false);
            self.i2c.regs.clear_address_flag();
            self.i2c.phase = Phase::Transferring(Direction::Read);
            if stop {
                self.stop();
            }
        } else {
            self.i2c.regs.clear_address_flag();
            self.i2c.regs.set_acknowledge(true);
            self.i2c.phase = Phase::Transferring(Direction::Read);
        }
    }

    /// Fills `buffer` from an armed receiver; `nack_last` ends the read run on its final byte.
    fn receive_chunk(
        &mut self,
        buffer: &mut [u8],
        nack_last: bool,
        stop: bool,
    ) -> Result<(), Error> {
        let len = buffer.len();
        for (i, slot) in buffer.iter_mut().enumerate() {
            if nack_last && i + 1 == len {
                self.nack_next(stop);
            }
            self.i2c.wait_until(Flag::ReceiveNotEmpty, true)?;
            *slot = self.i2c.regs.read_data();
        }
        Ok(())
    }

    fn nack_next(&mut self, stop: bool) {
        self.i2c.regs.set_acknowledge(false);
        if stop {
            self.stop();
        }
    }

    fn stop(&mut self) {
        self.i2c.regs.stop_condition();
        self.i2c.phase = Phase::StopPending;
    }

    /// Ends the transaction without a stop condition.
    fn keep_open(mut self) {
        self.keep_open = true;
    }
}

impl<R> Drop for Transaction<'_, R>
where
    R: BusRegisters,
{
    fn drop(&mut self) {
        let i2c = &mut *self.i2c;
        if self.keep_open {
            i2c.held = true;
            return;
        }

        match i2c.phase {
            Phase::Idle | Phase::StopPending => {}
            phase => {
                warn!("i2c: transaction aborted during {}, issuing stop", phase);
                i2c.regs.stop_condition();
            }
        }
        i2c.held = false;
        i2c.phase = Phase::Idle;
    }
}

impl<R> ErrorType for I2C<R>
where
    R: BusRegisters,
{
    type Error = Error;
}

impl<R> embedded_hal::i2c::I2c for I2C<R>
where
    R: BusRegisters,
{
    fn transaction(
        &mut self,
        address: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Error> {
        self.transaction_slice(address, operations)
    }
}

impl<R> embedded_hal_async::i2c::I2c for I2C<R>
where
    R: BusRegisters,
{
    async fn transaction(
        &mut self,
        address: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Error> {
        self.transaction_slice(address, operations)
    }
}

impl<R> i2c_write_iter::I2cIter<SevenBitAddress> for I2C<R>
where
    R: BusRegisters,
{
    fn transaction_iter<'a, O, B>(
        &mut self,
        address: SevenBitAddress,
        operations: O,
    ) -> Result<(), Error>
    where
        O: IntoIterator<Item = IterOperation<'a, B>>,
        B: IntoIterator<Item = u8>,
    {
        I2C::transaction_iter(self, address, operations)
    }
}

impl<R> i2c_write_iter::non_blocking::I2cIter<SevenBitAddress> for I2C<R>
where
    R: BusRegisters,
{
    async fn transaction_iter<'a, O, B>(
        &mut self,
        address: SevenBitAddress,
        operations: O,
    ) -> Result<(), Error>
    where
        O: IntoIterator<Item = IterOperation<'a, B>>,
        B: IntoIterator<Item = u8>,
    {
        I2C::transaction_iter(self, address, operations)
    }
}
