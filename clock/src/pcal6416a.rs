//! Board-internal PCAL6416A GPIO expander. Pins 0..=7 live on port 0 and
//! 8..=15 on port 1.

use embedded_hal::i2c::I2c;

pub const ADDRESS: u8 = 0x20;
const REG_OUTPUT_PORT0: u8 = 0x02;
const REG_CONFIG_PORT0: u8 = 0x06;

/// Gates the battery voltage divider feeding the ADC.
pub const BATTERY_ENABLE_PIN: u8 = 9;

pub struct Pcal6416a<I2C> {
    i2c: I2C,
}

impl<I2C: I2c> Pcal6416a<I2C> {
    pub fn new(i2c: I2C) -> Self {
        Self { i2c }
    }

    /// Drives `pin` as a push-pull output at the given level, leaving the
    /// other pins of its port untouched.
    pub fn set_output(&mut self, pin: u8, high: bool) -> Result<(), I2C::Error> {
        let port = pin / 8 % 2;
        let mask = 1 << (pin % 8);

        let output = self.read_register(REG_OUTPUT_PORT0 + port)?;
        let output = if high { output | mask } else { output & !mask };
        self.i2c.write(ADDRESS, &[REG_OUTPUT_PORT0 + port, output])?;

        let config = self.read_register(REG_CONFIG_PORT0 + port)?;
        self.i2c
            .write(ADDRESS, &[REG_CONFIG_PORT0 + port, config & !mask])
    }

    fn read_register(&mut self, register: u8) -> Result<u8, I2C::Error> {
        let mut value = [0_u8; 1];
        self.i2c.write_read(ADDRESS, &[register], &mut value)?;
        Ok(value[0])
    }
}
