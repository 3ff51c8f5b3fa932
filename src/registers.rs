/// Status flags the engine polls while driving a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Flag {
    /// The bus is occupied by a transaction (SR2.BUSY).
    BusBusy,
    /// A start or repeated start condition has been generated (SR1.SB).
    StartGenerated,
    /// The addressed slave acknowledged its address (SR1.ADDR).
    AddressAcked,
    /// The data register is empty and accepts the next byte (SR1.TXE).
    TransmitEmpty,
    /// The last byte has been fully shifted out (SR1.BTF).
    ByteTransferFinished,
    /// The data register holds a received byte (SR1.RXNE).
    ReceiveNotEmpty,
    /// The slave did not acknowledge the last address or data byte (SR1.AF).
    AckFailure,
}

impl Flag {
    /// Whether a slave NACK can abort a wait on this flag.
    pub(crate) fn aborted_by_nack(self) -> bool {
        matches!(
            self,
            Flag::AddressAcked | Flag::TransmitEmpty | Flag::ByteTransferFinished
        )
    }
}

/// Register-level access to a single I2C peripheral.
///
/// Implementations expose the raw status and control bits; all sequencing lives in
/// [`I2C`](crate::i2c::I2C). Reads take `&mut self` because several status reads have
/// side effects on the hardware.
pub trait BusRegisters {
    /// Samples a status flag.
    fn is_set(&mut self, flag: Flag) -> bool;

    /// Requests a start condition, or a repeated start when the bus is already owned.
    fn start_condition(&mut self);

    /// Requests a stop condition.
    fn stop_condition(&mut self);

    /// Enables or disables acknowledging received bytes.
    fn set_acknowledge(&mut self, enable: bool);

    /// Writes a byte to the data register.
    fn write_data(&mut self, byte: u8);

    /// Reads a byte from the data register.
    fn read_data(&mut self) -> u8;

    /// Clears [`Flag::AddressAcked`].
    ///
    /// The hardware only clears the flag through its status register read sequence.
    fn clear_address_flag(&mut self);

    /// Clears [`Flag::AckFailure`].
    fn clear_ack_failure(&mut self);
}
