// This file is part of Memory Lane, a personal screen activity recorder.
// Copyright (C) 2025 The Memory Lane Authors; see LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Partition-key types for the catalog and filesystem layout.
//!
//! `Day`, `Month`, and `SessionId` are fixed-width strings chosen so that
//! lexicographic order equals chronological order; code routinely compares
//! them with `<` against "today" or "this month".

use base::{bail, err, Error};
use jiff::civil::{Date, DateTime};
use jiff::Span;
use std::io::Write as _;
use std::str;

/// A calendar day in `YYYY-MM-DD` format.
#[derive(Copy, Clone, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Day([u8; 10]);

impl Day {
    pub fn from_date(d: Date) -> Self {
        let mut day = Day([0u8; 10]);
        write!(&mut day.0[..], "{}", d.strftime("%Y-%m-%d"))
            .expect("four-digit years format as exactly 10 bytes");
        day
    }

    pub fn parse(s: &str) -> Result<Self, Error> {
        if s.len() != 10 {
            bail!(InvalidArgument, msg("bad day {s:?}"));
        }
        Date::strptime("%Y-%m-%d", s).map_err(|e| err!(InvalidArgument, source(e)))?;
        let mut day = Day([0u8; 10]);
        day.0.copy_from_slice(s.as_bytes());
        Ok(day)
    }

    pub fn date(&self) -> Date {
        Date::strptime("%Y-%m-%d", self.as_str()).expect("days are validated on construction")
    }

    /// Returns the day `n` days earlier.
    pub fn minus_days(&self, n: i64) -> Result<Self, Error> {
        let d = self
            .date()
            .checked_sub(Span::new().days(n))
            .map_err(|e| err!(OutOfRange, source(e)))?;
        Ok(Day::from_date(d))
    }

    pub fn month(&self) -> Month {
        let mut m = Month([0u8; 7]);
        m.0.copy_from_slice(&self.0[..7]);
        m
    }

    pub fn as_str(&self) -> &str {
        str::from_utf8(&self.0[..]).expect("days are always UTF-8")
    }
}

impl AsRef<str> for Day {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl std::fmt::Display for Day {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Debug for Day {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl rusqlite::types::ToSql for Day {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl rusqlite::types::FromSql for Day {
    fn column_result(value: rusqlite::types::ValueRef) -> rusqlite::types::FromSqlResult<Self> {
        Day::parse(value.as_str()?)
            .map_err(|e| rusqlite::types::FromSqlError::Other(Box::new(e)))
    }
}

/// A calendar month in `YYYY-MM` format, the partition key for summaries.
#[derive(Copy, Clone, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Month([u8; 7]);

impl Month {
    pub fn parse(s: &str) -> Result<Self, Error> {
        let b = s.as_bytes();
        if b.len() != 7
            || b[4] != b'-'
            || !b[..4].iter().all(u8::is_ascii_digit)
            || !b[5..].iter().all(u8::is_ascii_digit)
        {
            bail!(InvalidArgument, msg("bad month {s:?}"));
        }
        let mut m = Month([0u8; 7]);
        m.0.copy_from_slice(b);
        Ok(m)
    }

    pub fn as_str(&self) -> &str {
        str::from_utf8(&self.0[..]).expect("months are always UTF-8")
    }
}

impl std::fmt::Display for Month {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Debug for Month {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

/// A session label in `HHMM-HHMM` format: the wall-clock minutes at which the
/// session window opens and closes.
#[derive(Copy, Clone, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SessionId([u8; 9]);

impl SessionId {
    /// Labels the window `[start, start + minutes)`.
    pub fn new(start: DateTime, minutes: i64) -> Result<Self, Error> {
        let end = start
            .checked_add(Span::new().minutes(minutes))
            .map_err(|e| err!(OutOfRange, source(e)))?;
        let mut id = SessionId([0u8; 9]);
        write!(
            &mut id.0[..],
            "{}-{}",
            start.strftime("%H%M"),
            end.strftime("%H%M")
        )
        .expect("HHMM-HHMM is 9 bytes");
        Ok(id)
    }

    pub fn parse(s: &str) -> Result<Self, Error> {
        let b = s.as_bytes();
        if b.len() != 9
            || b[4] != b'-'
            || !b[..4].iter().all(u8::is_ascii_digit)
            || !b[5..].iter().all(u8::is_ascii_digit)
        {
            bail!(InvalidArgument, msg("bad session label {s:?}"));
        }
        let mut id = SessionId([0u8; 9]);
        id.0.copy_from_slice(b);
        Ok(id)
    }

    pub fn as_str(&self) -> &str {
        str::from_utf8(&self.0[..]).expect("session labels are always UTF-8")
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Debug for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl rusqlite::types::ToSql for SessionId {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl rusqlite::types::FromSql for SessionId {
    fn column_result(value: rusqlite::types::ValueRef) -> rusqlite::types::FromSqlResult<Self> {
        SessionId::parse(value.as_str()?)
            .map_err(|e| rusqlite::types::FromSqlError::Other(Box::new(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jiff::civil::date;

    #[test]
    fn day_round_trip() {
        let d = Day::from_date(date(2025, 1, 10));
        assert_eq!(d.as_str(), "2025-01-10");
        assert_eq!(Day::parse("2025-01-10").unwrap(), d);
        assert_eq!(d.date(), date(2025, 1, 10));
        Day::parse("2025-1-10").unwrap_err();
        Day::parse("2025-13-01").unwrap_err();
        Day::parse("garbage-day").unwrap_err();
    }

    #[test]
    fn day_order_is_chronological() {
        let a = Day::parse("2024-12-31").unwrap();
        let b = Day::parse("2025-01-01").unwrap();
        let c = Day::parse("2025-01-10").unwrap();
        assert!(a < b && b < c);
    }

    #[test]
    fn day_arithmetic() {
        let d = Day::parse("2025-01-10").unwrap();
        assert_eq!(d.minus_days(7).unwrap().as_str(), "2025-01-03");
        assert_eq!(d.minus_days(10).unwrap().as_str(), "2024-12-31");
    }

    #[test]
    fn month_of_day() {
        let d = Day::parse("2025-01-10").unwrap();
        assert_eq!(d.month().as_str(), "2025-01");
        assert_eq!(Month::parse("2025-01").unwrap(), d.month());
        assert!(Month::parse("2024-12").unwrap() < d.month());
        Month::parse("2025-1").unwrap_err();
        Month::parse("2025/01").unwrap_err();
    }

    #[test]
    fn session_labels() {
        let s = SessionId::new(date(2025, 1, 10).at(10, 0, 0, 0), 30).unwrap();
        assert_eq!(s.as_str(), "1000-1030");
        assert_eq!(SessionId::parse("1000-1030").unwrap(), s);

        // Windows crossing midnight label with the next day's minutes.
        let s = SessionId::new(date(2025, 1, 10).at(23, 45, 0, 0), 30).unwrap();
        assert_eq!(s.as_str(), "2345-0015");

        SessionId::parse("100-1030").unwrap_err();
        SessionId::parse("1000_1030").unwrap_err();
    }

    #[test]
    fn sql_round_trip() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("create table t (day text, session text)")
            .unwrap();
        let d = Day::parse("2025-01-10").unwrap();
        let s = SessionId::parse("1000-1030").unwrap();
        conn.execute("insert into t values (?1, ?2)", rusqlite::params![d, s])
            .unwrap();
        let (d2, s2): (Day, SessionId) = conn
            .query_row("select day, session from t", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(d, d2);
        assert_eq!(s, s2);
    }
}
