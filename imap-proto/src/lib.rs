//! Wire-level IMAP4rev1 grammar: tags, client command lines, and upstream
//! response lines. No I/O; the proxy's forwarding pipeline builds on these
//! types to decide what to relay, rewrite, or synthesize.

pub mod command;
pub mod error;
pub mod response;
pub mod tag;

pub use command::{Command, LiteralArg, ParsedCommand};
pub use error::{CommandLineError, ResponseLineError};
pub use response::{
    format_tagged, format_untagged, CommandData, CommandDataLine, CommandResult,
    CommandResultLine, OngoingResponse, Response, ServerStatus,
};
pub use tag::Tag;
