use thiserror::Error;

/// Errors raised while parsing a single client command line.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum CommandLineError {
    #[error("line does not start with a tag")]
    NoTag,
    #[error("tag contains invalid characters")]
    InvalidTag,
    #[error("missing command name after tag")]
    NoCommandName,
    #[error("invalid literal length declaration")]
    InvalidLiteral,
    #[error("line is not terminated by CRLF")]
    NotCrlfTerminated,
    #[error("line contains invalid UTF-8 in the tag or command name")]
    InvalidEncoding,
}

/// Errors raised while parsing a single upstream response line.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ResponseLineError {
    #[error("line does not start with '*', '+' or a tag")]
    InvalidStart,
    #[error("tag contains invalid characters")]
    InvalidTag,
    #[error("missing result keyword after tag")]
    NoResult,
    #[error("unrecognized result keyword")]
    InvalidResult,
    #[error("invalid literal length declaration")]
    InvalidLiteral,
    #[error("line is not terminated by CRLF")]
    NotCrlfTerminated,
    #[error("line contains invalid UTF-8 where text was expected")]
    InvalidEncoding,
}
