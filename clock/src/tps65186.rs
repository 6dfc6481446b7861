//! Panel power management IC. Its thermistor input doubles as the board's
//! ambient temperature sensor.

use embedded_hal::{delay::DelayNs, i2c::I2c};

pub const ADDRESS: u8 = 0x48;
const REG_TMST_VALUE: u8 = 0x00;
const REG_TMST1: u8 = 0x0D;
const READ_THERM: u8 = 0x80;
const CONVERSION_MS: u32 = 5;

/// Triggers a thermistor conversion and returns whole degrees Celsius. The
/// panel supply must be powered for the chip to answer.
pub fn read_temperature<I2C: I2c>(
    i2c: &mut I2C,
    delay: &mut impl DelayNs,
) -> Result<i8, I2C::Error> {
    i2c.write(ADDRESS, &[REG_TMST1, READ_THERM])?;
    delay.delay_ms(CONVERSION_MS);

    let mut value = [0_u8; 1];
    i2c.write_read(ADDRESS, &[REG_TMST_VALUE], &mut value)?;
    Ok(value[0] as i8)
}
