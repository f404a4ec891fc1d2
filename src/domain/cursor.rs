// Copyright 2026 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Cursors
//!
//! A cursor records how far a run has progressed through the table. There are
//! two shapes, and a run uses exactly one of them:
//!
//! - [`Continuation`]: the store's opaque paging token, passed back verbatim.
//! - [`Watermark`]: the last exported `(timestamp, partition key, row key)`.
//!
//! Cursors are plain values. Every step produces a new one; nothing mutates a
//! cursor in place, which is what lets a replayed orchestration compare the
//! cursor it is about to send with the one history recorded.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::entities::{Row, RowKey};

/// Position of the last exported row in watermark order.
///
/// The key columns break ties between rows that share a timestamp, so two rows
/// written in the same tick are never mistaken for one another.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WatermarkPosition {
    pub timestamp: DateTime<Utc>,
    pub partition_key: String,
    pub row_key: String,
}

impl WatermarkPosition {
    pub fn new(timestamp: DateTime<Utc>, key: RowKey) -> Self {
        Self {
            timestamp,
            partition_key: key.partition_key,
            row_key: key.row_key,
        }
    }

    /// Whether this position sorts strictly before `row` stamped with `timestamp`.
    pub fn is_before(&self, timestamp: DateTime<Utc>, row: &Row) -> bool {
        (
            timestamp,
            row.partition_key.as_str(),
            row.row_key.as_str(),
        ) > (
            self.timestamp,
            self.partition_key.as_str(),
            self.row_key.as_str(),
        )
    }
}

/// Timestamp watermark cursor.
///
/// Variant order is the comparison order: `Beginning` sorts before every
/// position and `Exhausted` after every position.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Watermark {
    Beginning,
    At(WatermarkPosition),
    Exhausted,
}

/// Continuation-token cursor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Continuation {
    Start,
    Next(String),
    Done,
}

impl Continuation {
    /// Maps a store-reported token to a cursor. Absent and empty both mean done.
    pub fn from_token(token: Option<String>) -> Self {
        match token {
            Some(t) if !t.is_empty() => Continuation::Next(t),
            _ => Continuation::Done,
        }
    }

    /// The token to hand to the store, `None` for the first page.
    pub fn token(&self) -> Option<&str> {
        match self {
            Continuation::Next(t) => Some(t.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cursor {
    Token(Continuation),
    Watermark(Watermark),
}

impl Cursor {
    /// True once the cursor has reached its "no more data" sentinel.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Cursor::Token(Continuation::Done) | Cursor::Watermark(Watermark::Exhausted)
        )
    }

    /// The terminal sentinel of the same shape as `self`.
    pub fn terminal(&self) -> Cursor {
        match self {
            Cursor::Token(_) => Cursor::Token(Continuation::Done),
            Cursor::Watermark(_) => Cursor::Watermark(Watermark::Exhausted),
        }
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cursor::Token(Continuation::Start) => write!(f, "token:start"),
            Cursor::Token(Continuation::Next(t)) => write!(f, "token:{}", t),
            Cursor::Token(Continuation::Done) => write!(f, "token:done"),
            Cursor::Watermark(Watermark::Beginning) => write!(f, "watermark:beginning"),
            Cursor::Watermark(Watermark::At(p)) => write!(
                f,
                "watermark:{}@{}/{}",
                p.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true),
                p.partition_key,
                p.row_key
            ),
            Cursor::Watermark(Watermark::Exhausted) => write!(f, "watermark:exhausted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn pos(secs: i64, pk: &str, rk: &str) -> WatermarkPosition {
        WatermarkPosition::new(Utc.timestamp_opt(secs, 0).unwrap(), RowKey::new(pk, rk))
    }

    #[test]
    fn test_watermark_sentinels_bracket_positions() {
        let at = Watermark::At(pos(0, "a", "a"));
        assert!(Watermark::Beginning < at);
        assert!(at < Watermark::Exhausted);
        assert!(Watermark::At(pos(5, "z", "z")) < Watermark::At(pos(6, "a", "a")));
        assert!(Watermark::At(pos(5, "a", "b")) < Watermark::At(pos(5, "a", "c")));
    }

    #[test]
    fn test_is_before_breaks_ties_on_key() {
        let p = pos(10, "p", "r2");
        let ts = Utc.timestamp_opt(10, 0).unwrap();
        assert!(!p.is_before(ts, &Row::new("p", "r1")));
        assert!(!p.is_before(ts, &Row::new("p", "r2")));
        assert!(p.is_before(ts, &Row::new("p", "r3")));
        assert!(p.is_before(Utc.timestamp_opt(11, 0).unwrap(), &Row::new("a", "a")));
    }

    #[test]
    fn test_empty_token_is_done() {
        assert_eq!(Continuation::from_token(None), Continuation::Done);
        assert_eq!(Continuation::from_token(Some(String::new())), Continuation::Done);
        assert_eq!(
            Continuation::from_token(Some("abc".into())),
            Continuation::Next("abc".into())
        );
    }

    #[test]
    fn test_terminal() {
        assert!(Cursor::Token(Continuation::Done).is_terminal());
        assert!(!Cursor::Token(Continuation::Start).is_terminal());
        assert!(!Cursor::Watermark(Watermark::Beginning).is_terminal());
        assert_eq!(
            Cursor::Watermark(Watermark::At(pos(1, "a", "b"))).terminal(),
            Cursor::Watermark(Watermark::Exhausted)
        );
    }

    #[test]
    fn test_cursor_json_shape_is_stable() {
        let c = Cursor::Token(Continuation::Next("t1".into()));
        let json = serde_json::to_string(&c).unwrap();
        assert_eq!(json, r#"{"token":{"next":"t1"}}"#);
        let back: Cursor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
        assert_eq!(
            serde_json::to_string(&Cursor::Watermark(Watermark::Exhausted)).unwrap(),
            r#"{"watermark":"exhausted"}"#
        );
    }
}
