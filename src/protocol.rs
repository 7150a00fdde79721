//! Time protocol dispatcher.
//!
//! A permissive text protocol:
//! - Any input containing `TIME` (case-insensitive) gets the current time
//! - Any input containing `QUIT` (case-insensitive) closes the connection
//! - Everything else is ignored
//!
//! ## Protocol Format
//!
//! ```text
//! Server:   Welcome to Time Server. Send 'TIME' for current time, 'QUIT' to disconnect.\r\n
//! Request:  time
//! Response: JAM 14:30:05\r\n
//! Request:  quit
//! (connection closed)
//! ```
//!
//! Matching is substring containment over the whole normalized chunk, so
//! `what time is it` also triggers a time reply.

use chrono::NaiveTime;

/// Greeting sent once when a session starts.
pub const WELCOME: &[u8] =
    b"Welcome to Time Server. Send 'TIME' for current time, 'QUIT' to disconnect.\r\n";

const TIME_TOKEN: &str = "TIME";
const QUIT_TOKEN: &str = "QUIT";

/// What the session should do with one chunk of input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Action {
    /// Reply with the current time.
    pub time: bool,
    /// Close the session after any reply.
    pub quit: bool,
}

impl Action {
    /// No reply, keep reading.
    pub fn is_noop(&self) -> bool {
        !self.time && !self.quit
    }
}

/// Decode, trim and uppercase a raw chunk read from the client.
pub fn normalize(input: &[u8]) -> String {
    String::from_utf8_lossy(input).trim().to_uppercase()
}

/// Decide the action for a normalized command string.
pub fn dispatch(command: &str) -> Action {
    Action {
        time: command.contains(TIME_TOKEN),
        quit: command.contains(QUIT_TOKEN),
    }
}

/// Format the `JAM HH:MM:SS\r\n` reply.
pub fn time_reply(now: NaiveTime) -> String {
    format!("JAM {}\r\n", now.format("%H:%M:%S"))
}
