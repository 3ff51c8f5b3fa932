//! # MPU6050 accelerometer demo
//!
//! Reads acceleration from an MPU6050 wired to I2C1 of an STM32F411 (PB8 = SCL, PB9 = SDA)
//! running from the 16 MHz HSI.
//!
//! The sensor is configured through the register-oriented calls, then sampled through the
//! embedded-hal async trait.
//!
//! See the `Cargo.toml` file for Copyright and license details.

#![no_std]
#![no_main]

use embedded_hal_async::i2c::I2c;
use fugit::RateExtU32;

use defmt_rtt as _;
use panic_probe as _;

use stm32f4::stm32f411 as pac;
use stm32f4_polled_i2c::{stm32f4::Registers, Config, I2C};

/// Pre-shifted bus address (AD0 low).
const DEVICE_ADDR: u8 = 0xD0;
const SMPLRT_DIV: u8 = 0x19;
const GYRO_CONFIG: u8 = 0x1B;
const ACCEL_CONFIG: u8 = 0x1C;
const ACCEL_XOUT_H: u8 = 0x3B;
const PWR_MGMT_1: u8 = 0x6B;
const WHO_AM_I: u8 = 0x75;

const LSB_PER_G: f32 = 16384.0;

fn enable_i2c1(dp: &pac::Peripherals) {
    dp.RCC.ahb1enr.modify(|_, w| w.gpioben().enabled());
    dp.RCC.apb1enr.modify(|_, w| w.i2c1en().enabled());

    dp.GPIOB
        .moder
        .modify(|_, w| w.moder8().alternate().moder9().alternate());
    dp.GPIOB
        .otyper
        .modify(|_, w| w.ot8().open_drain().ot9().open_drain());
    dp.GPIOB
        .pupdr
        .modify(|_, w| w.pupdr8().pull_up().pupdr9().pull_up());
    // AF4 on both pins
    dp.GPIOB
        .afrh
        .modify(|_, w| w.afrh8().af4().afrh9().af4());
}

async fn demo() {
    let dp = pac::Peripherals::take().unwrap();
    enable_i2c1(&dp);

    let regs = Registers::new(dp.I2C1, 100.kHz(), 16.MHz());
    let mut i2c = I2C::new(regs, Config::default());

    let who_am_i = i2c
        .byte_read(DEVICE_ADDR, WHO_AM_I)
        .expect("Failed to read WHO_AM_I");
    if who_am_i != 0x68 {
        defmt::error!("Unexpected WHO_AM_I {=u8:#x}", who_am_i);
        core::future::pending::<()>().await;
    }

    // wake up, 1 kHz sample rate, +-2 g, +-250 dps
    for (register, value) in [
        (PWR_MGMT_1, 0x00),
        (SMPLRT_DIV, 0x07),
        (ACCEL_CONFIG, 0x00),
        (GYRO_CONFIG, 0x00),
    ] {
        i2c.burst_write(DEVICE_ADDR, register, &[value])
            .expect("Failed to configure the sensor");
    }
    i2c.release();

    let mut raw = [0u8; 6];
    loop {
        i2c.write_read(DEVICE_ADDR >> 1, &[ACCEL_XOUT_H], &mut raw)
            .await
            .expect("Failed to read acceleration");

        let x = f32::from(i16::from_be_bytes([raw[0], raw[1]])) / LSB_PER_G;
        let y = f32::from(i16::from_be_bytes([raw[2], raw[3]])) / LSB_PER_G;
        let z = f32::from(i16::from_be_bytes([raw[4], raw[5]])) / LSB_PER_G;
        defmt::info!("Acceleration: x {=f32}g y {=f32}g z {=f32}g", x, y, z);
    }
}

/// Entry point to our bare-metal application.
#[cortex_m_rt::entry]
fn main() -> ! {
    let runtime = nostd_async::Runtime::new();
    let mut task = nostd_async::Task::new(demo());
    let handle = task.spawn(&runtime);
    handle.join();
    unreachable!()
}
