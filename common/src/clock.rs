use chrono::{DateTime, NaiveDateTime, Offset, TimeZone};
use chrono_tz::Tz;

use crate::types::{TimezoneLookup, LOOKUP_SUCCESS};

pub fn format_time(now: &NaiveDateTime) -> String {
    now.format("%H:%M").to_string()
}

pub fn format_date_time(now: &NaiveDateTime) -> String {
    now.format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn rtc_power_on_default() -> NaiveDateTime {
    NaiveDateTime::default()
}

/// UTC offset in seconds for `utc_epoch` according to a timezone lookup.
///
/// The IANA name wins when it parses so daylight saving follows the epoch
/// being set; otherwise the reported fixed offset is used. A rejected lookup
/// means UTC.
pub fn resolve_utc_offset(lookup: &TimezoneLookup, utc_epoch: i64) -> i32 {
    if !lookup.status.is_empty() && lookup.status != LOOKUP_SUCCESS {
        return 0;
    }

    let from_name = lookup
        .timezone
        .parse::<Tz>()
        .ok()
        .zip(DateTime::from_timestamp(utc_epoch, 0))
        .map(|(tz, utc)| {
            tz.offset_from_utc_datetime(&utc.naive_utc())
                .fix()
                .local_minus_utc()
        });

    from_name.unwrap_or(lookup.offset)
}
