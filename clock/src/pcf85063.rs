//! PCF85063A real-time clock on the board's I2C bus.
//!
//! The chip stores local wall-clock time in BCD starting at register 0x04
//! (seconds, minutes, hours, day, weekday, month, year).

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use embedded_hal::i2c::I2c;

pub const ADDRESS: u8 = 0x51;
const REG_SECONDS: u8 = 0x04;
/// Oscillator-stopped flag in the seconds register.
const OS_FLAG: u8 = 0x80;

#[derive(Debug)]
pub enum RtcError<E> {
    Bus(E),
    /// The registers hold no valid calendar date.
    InvalidTime,
}

pub struct Pcf85063<I2C> {
    i2c: I2C,
}

impl<I2C: I2c> Pcf85063<I2C> {
    pub fn new(i2c: I2C) -> Self {
        Self { i2c }
    }

    /// Current time and whether the oscillator stopped since the last set.
    pub fn read(&mut self) -> Result<(NaiveDateTime, bool), RtcError<I2C::Error>> {
        let mut buf = [0_u8; 7];
        self.i2c
            .write_read(ADDRESS, &[REG_SECONDS], &mut buf)
            .map_err(RtcError::Bus)?;

        let stopped = buf[0] & OS_FLAG != 0;
        let second = bcd_decode(buf[0] & 0x7F);
        let minute = bcd_decode(buf[1] & 0x7F);
        let hour = bcd_decode(buf[2] & 0x3F);
        let day = bcd_decode(buf[3] & 0x3F);
        let month = bcd_decode(buf[5] & 0x1F);
        let year = 2000 + i32::from(bcd_decode(buf[6]));

        let now = NaiveDate::from_ymd_opt(year, u32::from(month), u32::from(day))
            .and_then(|date| {
                date.and_hms_opt(u32::from(hour), u32::from(minute), u32::from(second))
            })
            .ok_or(RtcError::InvalidTime)?;
        Ok((now, stopped))
    }

    /// Writes `now`, clearing the oscillator-stopped flag. Years outside
    /// 2000..=2099 cannot be represented.
    pub fn write(&mut self, now: &NaiveDateTime) -> Result<(), RtcError<I2C::Error>> {
        if !(2000..=2099).contains(&now.year()) {
            return Err(RtcError::InvalidTime);
        }

        let data = [
            REG_SECONDS,
            bcd_encode(now.second().min(59) as u8),
            bcd_encode(now.minute() as u8),
            bcd_encode(now.hour() as u8),
            bcd_encode(now.day() as u8),
            now.weekday().num_days_from_sunday() as u8,
            bcd_encode(now.month() as u8),
            bcd_encode((now.year() - 2000) as u8),
        ];
        self.i2c.write(ADDRESS, &data).map_err(RtcError::Bus)
    }
}

fn bcd_decode(value: u8) -> u8 {
    (value & 0x0F) + (value >> 4) * 10
}

fn bcd_encode(value: u8) -> u8 {
    ((value / 10) << 4) | (value % 10)
}
