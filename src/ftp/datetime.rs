//! FAT-style packed date and time words.
//!
//! A directory entry timestamp is two 16-bit words: the date packs
//! `year-1980:7 | month:4 | day:5`, the time packs
//! `hour:5 | minute:6 | seconds/2:5`. MDTM and MLSD exchange the same
//! information as a 14-digit `YYYYMMDDhhmmss` string.

use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveDateTime, TimeZone, Timelike};
use std::time::SystemTime;

pub fn pack_date(year: u16, month: u16, day: u16) -> u16 {
  ((year - 1980) & 0x7f) << 9 | (month & 0x0f) << 5 | (day & 0x1f)
}

pub fn pack_time(hour: u16, minute: u16, second: u16) -> u16 {
  (hour & 0x1f) << 11 | (minute & 0x3f) << 5 | (second / 2) & 0x1f
}

pub fn unpack_date(date: u16) -> (u16, u16, u16) {
  (1980 + (date >> 9), (date >> 5) & 0x0f, date & 0x1f)
}

pub fn unpack_time(time: u16) -> (u16, u16, u16) {
  (time >> 11, (time >> 5) & 0x3f, (time & 0x1f) * 2)
}

/// Formats a packed date/time pair as the 14-digit form used by MDTM
/// replies and MLSD `Modify` facts.
pub fn format_timestamp(date: u16, time: u16) -> String {
  let (year, month, day) = unpack_date(date);
  let (hour, minute, second) = unpack_time(time);
  format!("{year:04}{month:02}{day:02}{hour:02}{minute:02}{second:02}")
}

/// Parses a 14-digit `YYYYMMDDhhmmss` string into a packed date/time pair.
/// Fields are range checked; representable years are 1980 to 2107.
pub fn parse_timestamp(s: &str) -> Option<(u16, u16)> {
  if s.len() != 14 || !s.bytes().all(|b| b.is_ascii_digit()) {
    return None;
  }
  let num = |r: std::ops::Range<usize>| s[r].parse::<u16>().ok();
  let year = num(0..4)?;
  let month = num(4..6)?;
  let day = num(6..8)?;
  let hour = num(8..10)?;
  let minute = num(10..12)?;
  let second = num(12..14)?;
  if !(1980..=2107).contains(&year)
    || !(1..=12).contains(&month)
    || !(1..=31).contains(&day)
    || hour > 23
    || minute > 59
    || second > 59
  {
    return None;
  }
  Some((pack_date(year, month, day), pack_time(hour, minute, second)))
}

/// Packs a host file mtime into FAT date/time words. Times before the FAT
/// epoch collapse to zero, which listings treat as "no date".
pub fn pack_system_time(mtime: SystemTime) -> (u16, u16) {
  let secs = match mtime.duration_since(std::time::SystemTime::UNIX_EPOCH) {
    Ok(d) => d.as_secs() as i64,
    Err(_) => return (0, 0),
  };
  let local = match DateTime::from_timestamp(secs, 0) {
    Some(utc) => utc.with_timezone(&Local),
    None => return (0, 0),
  };
  if local.year() < 1980 {
    return (0, 0);
  }
  (
    pack_date(local.year() as u16, local.month() as u16, local.day() as u16),
    pack_time(local.hour() as u16, local.minute() as u16, local.second() as u16),
  )
}

/// Expands a packed date/time pair into a unix timestamp in local time.
/// Returns None for unrepresentable field combinations (e.g. Feb 30).
pub fn unpack_to_unix(date: u16, time: u16) -> Option<i64> {
  let (year, month, day) = unpack_date(date);
  let (hour, minute, second) = unpack_time(time);
  let naive: NaiveDateTime = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)?
    .and_hms_opt(hour as u32, minute as u32, second as u32)?;
  Some(Local.from_local_datetime(&naive).earliest()?.timestamp())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_pack_layout() {
    // 2020-02-19 is (40 << 9) | (2 << 5) | 19
    assert_eq!(pack_date(2020, 2, 19), 0x5053);
    // 13:45:28 is (13 << 11) | (45 << 5) | 14
    assert_eq!(pack_time(13, 45, 28), 0x6dae);
    assert_eq!(unpack_date(0x5053), (2020, 2, 19));
    assert_eq!(unpack_time(0x6dae), (13, 45, 28));
  }

  #[test]
  fn test_timestamp_round_trip() {
    for s in [
      "19800101000000",
      "20200219134528",
      "20991231235958",
      "21071231235958",
    ] {
      let (date, time) = parse_timestamp(s).unwrap();
      assert_eq!(format_timestamp(date, time), s);
    }
  }

  #[test]
  fn test_pack_unpack_identity() {
    // packing then unpacking is the identity on even seconds
    for (y, mo, d, h, mi, s) in [
      (1980, 1, 1, 0, 0, 0),
      (1999, 12, 31, 23, 59, 58),
      (2045, 6, 15, 12, 30, 30),
      (2107, 12, 31, 23, 59, 58),
    ] {
      assert_eq!(unpack_date(pack_date(y, mo, d)), (y, mo, d));
      assert_eq!(unpack_time(pack_time(h, mi, s)), (h, mi, s));
    }
  }

  #[test]
  fn test_parse_rejects_out_of_range() {
    assert!(parse_timestamp("19791231235959").is_none());
    assert!(parse_timestamp("21080101000000").is_none());
    assert!(parse_timestamp("20200019000000").is_none());
    assert!(parse_timestamp("20201301000000").is_none());
    assert!(parse_timestamp("20200100000000").is_none());
    assert!(parse_timestamp("20200219240000").is_none());
    assert!(parse_timestamp("20200219006000").is_none());
    assert!(parse_timestamp("20200219000060").is_none());
    assert!(parse_timestamp("2020021900000").is_none());
    assert!(parse_timestamp("20200219x00000").is_none());
  }

  #[test]
  fn test_odd_seconds_round_down() {
    let t = pack_time(10, 20, 31);
    assert_eq!(unpack_time(t), (10, 20, 30));
  }

  #[test]
  fn test_unpack_to_unix_rejects_bad_dates() {
    let feb30 = pack_date(2021, 2, 30);
    assert!(unpack_to_unix(feb30, 0).is_none());
    let ok = pack_date(2021, 2, 28);
    assert!(unpack_to_unix(ok, pack_time(12, 0, 0)).is_some());
  }
}
