//! Protocol surface: dispatcher, wire types, and the polling watcher.
//!
//! Architecture:
//! - A reader thread forwards stdin lines into a bounded inbox.
//! - The watcher thread posts change events into the same inbox.
//! - The dispatcher thread drains the inbox in arrival order and is the
//!   sole writer on the response stream, so records never interleave.

pub mod dispatcher;
pub mod protocol;
pub mod watcher;

pub use dispatcher::Dispatcher;

/// One item in the dispatcher's inbox.
#[derive(Debug)]
pub enum Inbound {
    /// A raw command line from the input stream.
    Command(String),
    /// An unsolicited record (watcher event) to forward to the client.
    Event(protocol::Response),
    /// The input stream reached EOF; drain and shut down.
    InputClosed,
}

/// Inbox capacity. Producers block when the dispatcher falls behind, which
/// bounds memory and back-pressures a flooding client.
pub const INBOX_CAPACITY: usize = 256;
