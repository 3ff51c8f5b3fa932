use core::ops::Deref;

use fugit::HertzU32;
use ::stm32f4::stm32f411::i2c1::RegisterBlock;

use crate::registers::{BusRegisters, Flag};

const STANDARD_MODE_MAX: u32 = 100_000;
const FAST_MODE_MAX: u32 = 400_000;

/// STM32F4 `I2Cx` register block in master mode.
///
/// Clock gating, reset of the RCC domain and pin muxing are left to the caller.
pub struct Registers<B> {
    i2c: B,
}

impl<B> Registers<B>
where
    B: Deref<Target = RegisterBlock>,
{
    /// Resets the peripheral and configures it for `freq` given the APB1 clock `pclk1`.
    ///
    /// Up to 100 kHz runs in standard mode, up to 400 kHz in fast mode (duty 2).
    pub fn new(i2c: B, freq: HertzU32, pclk1: HertzU32) -> Self {
        let freq = freq.to_Hz();
        assert!(freq <= FAST_MODE_MAX);
        assert!(freq > 0);

        let pclk1 = pclk1.to_Hz();
        let pclk1_mhz = pclk1 / 1_000_000;
        assert!((2..=50).contains(&pclk1_mhz));

        i2c.cr1.modify(|_, w| w.pe().clear_bit());
        i2c.cr1.modify(|_, w| w.swrst().set_bit());
        i2c.cr1.modify(|_, w| w.swrst().clear_bit());

        i2c.cr2.modify(|_, w| unsafe { w.freq().bits(pclk1_mhz as u8) });

        if freq <= STANDARD_MODE_MAX {
            // Thigh = Tlow = CCR * Tpclk1, rise time 1000ns
            let ccr = (pclk1 / (2 * freq)).max(4);
            assert!(ccr <= 0xfff);
            i2c.ccr.write(|w| unsafe { w.ccr().bits(ccr as u16) });
            i2c.trise.write(|w| w.trise().bits((pclk1_mhz + 1) as u8));
        } else {
            // Tlow = 2 * Thigh, rise time 300ns
            let ccr = (pclk1 / (3 * freq)).max(1);
            assert!(ccr <= 0xfff);
            i2c.ccr
                .write(|w| unsafe { w.f_s().set_bit().duty().clear_bit().ccr().bits(ccr as u16) });
            i2c.trise
                .write(|w| w.trise().bits((pclk1_mhz * 300 / 1000 + 1) as u8));
        }

        i2c.cr1.modify(|_, w| w.pe().set_bit());

        Self { i2c }
    }

    /// Disables the peripheral and hands the register block back.
    pub fn free(self) -> B {
        self.i2c.cr1.modify(|_, w| w.pe().clear_bit());
        self.i2c
    }
}

impl<B> BusRegisters for Registers<B>
where
    B: Deref<Target = RegisterBlock>,
{
    #[inline]
    fn is_set(&mut self, flag: Flag) -> bool {
        let sr1 = || self.i2c.sr1.read();
        match flag {
            Flag::BusBusy => self.i2c.sr2.read().busy().bit_is_set(),
            Flag::StartGenerated => sr1().sb().bit_is_set(),
            Flag::AddressAcked => sr1().addr().bit_is_set(),
            Flag::TransmitEmpty => sr1().tx_e().bit_is_set(),
            Flag::ByteTransferFinished => sr1().btf().bit_is_set(),
            Flag::ReceiveNotEmpty => sr1().rx_ne().bit_is_set(),
            Flag::AckFailure => sr1().af().bit_is_set(),
        }
    }

    fn start_condition(&mut self) {
        self.i2c.cr1.modify(|_, w| w.start().set_bit());
    }

    fn stop_condition(&mut self) {
        self.i2c.cr1.modify(|_, w| w.stop().set_bit());
    }

    fn set_acknowledge(&mut self, enable: bool) {
        self.i2c.cr1.modify(|_, w| w.ack().bit(enable));
    }

    #[inline]
    fn write_data(&mut self, byte: u8) {
        self.i2c.dr.write(|w| w.dr().bits(byte));
    }

    #[inline]
    fn read_data(&mut self) -> u8 {
        self.i2c.dr.read().dr().bits()
    }

    fn clear_address_flag(&mut self) {
        // ADDR clears on SR1 read followed by SR2 read
        let _ = self.i2c.sr1.read();
        let _ = self.i2c.sr2.read();
    }

    fn clear_ack_failure(&mut self) {
        self.i2c.sr1.modify(|_, w| w.af().clear_bit());
    }
}
