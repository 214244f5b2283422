//! Secure element driver (two-wire bus).
//!
//! Talks the ATECC608A-class command protocol at bus address `0x60`:
//!
//! ```text
//! wake:   write [0x00, 0x11],          sleep 10 ms
//! random: write [0x03, 0x1B],          sleep  5 ms, read 32 bytes
//! sha:    write [0x03, 0x47],          sleep  5 ms
//!         write [0x04, data...],       sleep 10 ms, read 32 bytes
//! ```
//!
//! The bus handle is exclusive and only ever held for a single
//! command/response exchange. On platforms without a two-wire bus the open
//! call fails, which routes the producer into software mode.

use std::thread;
use std::time::Duration;

use crate::error::{Error, Result};

/// Bus address of the secure element.
pub const DEVICE_ADDRESS: u16 = 0x60;

const WAKE_OPCODE: u8 = 0x00;
const WAKE_PARAMETER: u8 = 0x11;
const RANDOM_OPCODE: u8 = 0x1B;
const SHA_OPCODE: u8 = 0x47;
const COMMAND_FRAME: u8 = 0x03;
const DATA_FRAME: u8 = 0x04;

const WAKE_DELAY: Duration = Duration::from_millis(10);
const RANDOM_DELAY: Duration = Duration::from_millis(5);
const SHA_START_DELAY: Duration = Duration::from_millis(5);
const SHA_DATA_DELAY: Duration = Duration::from_millis(10);

/// Length of every device response we read: one random block or one digest.
pub const OUTPUT_LEN: usize = 32;

#[cfg(target_os = "linux")]
mod bus {
    use i2cdev::core::I2CDevice;
    use i2cdev::linux::LinuxI2CDevice;

    use crate::error::{Error, Result};

    pub struct Bus {
        device: LinuxI2CDevice,
    }

    impl Bus {
        pub fn open(bus_number: u8) -> Result<Self> {
            let path = format!("/dev/i2c-{bus_number}");
            let device = LinuxI2CDevice::new(&path, super::DEVICE_ADDRESS)
                .map_err(|e| Error::HardwareUnavailable(format!("{path}: {e}")))?;
            Ok(Self { device })
        }

        pub fn write(&mut self, data: &[u8]) -> Result<()> {
            self.device
                .write(data)
                .map_err(|e| Error::HardwareTransient(format!("bus write: {e}")))
        }

        pub fn read(&mut self, buf: &mut [u8]) -> Result<()> {
            self.device
                .read(buf)
                .map_err(|e| Error::HardwareTransient(format!("bus read: {e}")))
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod bus {
    use crate::error::{Error, Result};

    pub struct Bus;

    impl Bus {
        pub fn open(_bus_number: u8) -> Result<Self> {
            Err(Error::HardwareUnavailable(
                "no two-wire bus on this platform".into(),
            ))
        }

        pub fn write(&mut self, _data: &[u8]) -> Result<()> {
            unreachable!("bus cannot be opened on this platform")
        }

        pub fn read(&mut self, _buf: &mut [u8]) -> Result<()> {
            unreachable!("bus cannot be opened on this platform")
        }
    }
}

/// Exclusive handle on the secure element.
pub struct SecureElement {
    bus: bus::Bus,
    awake: bool,
}

impl SecureElement {
    /// Open the bus and wake the device once. Any failure here is permanent
    /// for this process; the caller falls back to software mode.
    pub fn open(bus_number: u8) -> Result<Self> {
        let bus = bus::Bus::open(bus_number)?;
        let mut element = Self { bus, awake: false };
        element
            .wake()
            .map_err(|e| Error::HardwareUnavailable(format!("wake failed: {e}")))?;
        Ok(element)
    }

    /// Send the wake sequence and give the device time to come up.
    pub fn wake(&mut self) -> Result<()> {
        self.bus.write(&[WAKE_OPCODE, WAKE_PARAMETER])?;
        thread::sleep(WAKE_DELAY);
        self.awake = true;
        Ok(())
    }

    /// Draw one 32-byte block from the on-die TRNG.
    pub fn random(&mut self) -> Result<[u8; OUTPUT_LEN]> {
        if !self.awake {
            self.wake()?;
        }
        self.bus.write(&[COMMAND_FRAME, RANDOM_OPCODE])?;
        thread::sleep(RANDOM_DELAY);
        let mut block = [0u8; OUTPUT_LEN];
        self.bus.read(&mut block)?;
        Ok(block)
    }

    /// Compute SHA-256 of `data` on the device.
    pub fn sha256(&mut self, data: &[u8]) -> Result<[u8; OUTPUT_LEN]> {
        if !self.awake {
            self.wake()?;
        }
        self.bus.write(&[COMMAND_FRAME, SHA_OPCODE])?;
        thread::sleep(SHA_START_DELAY);

        let mut payload = Vec::with_capacity(1 + data.len());
        payload.push(DATA_FRAME);
        payload.extend_from_slice(data);
        self.bus.write(&payload)?;
        thread::sleep(SHA_DATA_DELAY);

        let mut digest = [0u8; OUTPUT_LEN];
        self.bus.read(&mut digest)?;
        Ok(digest)
    }
}
