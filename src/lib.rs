//! Messagable: messaging between parties of a record graph.
//!
//! Parties may forward their messages to other parties and may expose
//! optional recipient groups. Sending resolves the addressed parties to a
//! flat, deduplicated set of terminal recipients and writes one message per
//! recipient plus a sender copy, atomically, to SQLite.
//!
//! See `DESIGN.md` for architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;
pub mod messaging;
