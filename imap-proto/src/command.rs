use std::fmt;

use smol_str::SmolStr;

use crate::error::CommandLineError;
use crate::tag::Tag;

/// A literal length declaration trailing a command line (`{N}` or `{N+}`).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct LiteralArg {
    /// Octet count announced by the client.
    pub size: u64,
    /// `true` for a synchronizing literal (`{N}`, no trailing `+`): the
    /// receiving side must send a continuation request before the octets
    /// are read. `false` for a non-synchronizing literal (`{N+}`).
    pub wait_continuation: bool,
}

/// The subset of IMAP4rev1 commands the proxy must recognize by name because
/// they affect session state or require bespoke handling. Every other
/// command name is forwarded generically and classified as [`ParsedCommand::Other`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ParsedCommand {
    Login,
    Authenticate,
    StartTls,
    Select,
    Examine,
    Close,
    Unselect,
    Logout,
    Idle,
    Enable,
    Capability,
    NoOperation,
    Other,
}

impl ParsedCommand {
    fn classify(name: &str) -> Self {
        match name {
            "LOGIN" => ParsedCommand::Login,
            "AUTHENTICATE" => ParsedCommand::Authenticate,
            "STARTTLS" => ParsedCommand::StartTls,
            "SELECT" => ParsedCommand::Select,
            "EXAMINE" => ParsedCommand::Examine,
            "CLOSE" => ParsedCommand::Close,
            "UNSELECT" => ParsedCommand::Unselect,
            "LOGOUT" => ParsedCommand::Logout,
            "IDLE" => ParsedCommand::Idle,
            "ENABLE" => ParsedCommand::Enable,
            "CAPABILITY" => ParsedCommand::Capability,
            "NOOP" => ParsedCommand::NoOperation,
            _ => ParsedCommand::Other,
        }
    }

    /// Whether, on successful (`OK`) completion, this command changes
    /// `client_state` or `selected_mailbox` (spec.md §4.5).
    pub fn is_state_changing(self) -> bool {
        matches!(
            self,
            ParsedCommand::Login
                | ParsedCommand::Authenticate
                | ParsedCommand::Select
                | ParsedCommand::Examine
                | ParsedCommand::Close
                | ParsedCommand::Unselect
                | ParsedCommand::Logout
        )
    }
}

/// A single client command line, tag-addressed and classified, with its
/// argument bytes kept opaque exactly as received (spec.md §4.2).
#[derive(Debug, Clone)]
pub struct Command {
    pub tag: Tag,
    pub name: SmolStr,
    pub parsed: ParsedCommand,
    /// Bytes following the first space after the command name, up to (but
    /// excluding) the trailing CRLF and any literal-length marker. `None`
    /// when the command name was not followed by a space (no arguments).
    pub args: Option<Box<[u8]>>,
    pub literal_arg: Option<LiteralArg>,
}

impl Command {
    /// Parses one CRLF-terminated client line into `(tag, name, rest)`
    /// (spec.md §4.2). `line` must include the trailing CRLF.
    pub fn parse_line(line: &[u8]) -> Result<Command, CommandLineError> {
        let body = strip_crlf(line)?;

        let sp = memchr::memchr(b' ', body).ok_or(CommandLineError::NoCommandName)?;
        let (tag_bytes, rest) = body.split_at(sp);
        let tag = Tag::parse(tag_bytes).ok_or(CommandLineError::InvalidTag)?;
        let rest = &rest[1..]; // skip the space

        let (name_bytes, mut args_bytes) = match memchr::memchr(b' ', rest) {
            Some(p) => (&rest[..p], &rest[p + 1..]),
            None => (rest, &rest[rest.len()..]),
        };
        if name_bytes.is_empty() {
            return Err(CommandLineError::NoCommandName);
        }
        let name_str =
            std::str::from_utf8(name_bytes).map_err(|_| CommandLineError::InvalidEncoding)?;
        let name = SmolStr::new(name_str.to_ascii_uppercase());

        let literal_arg = match trailing_literal(args_bytes)? {
            Some((literal, consumed_len)) => {
                args_bytes = &args_bytes[..consumed_len];
                Some(literal)
            }
            None => None,
        };

        let args = if args_bytes.is_empty() {
            None
        } else {
            Some(Box::from(args_bytes))
        };

        Ok(Command {
            tag,
            parsed: ParsedCommand::classify(name.as_str()),
            name,
            args,
            literal_arg,
        })
    }

    /// Re-serializes `<tag> SP <name>[ SP <args>]` without a trailing CRLF
    /// (the caller appends CRLF when writing to the wire). Used to assemble
    /// the upstream-bound line after tag rewriting (spec.md testable
    /// property #5).
    pub fn render(&self, tag: &Tag) -> Vec<u8> {
        let mut out = Vec::with_capacity(tag.as_bytes().len() + self.name.len() + 2);
        out.extend_from_slice(tag.as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.name.as_bytes());
        if let Some(args) = &self.args {
            out.push(b' ');
            out.extend_from_slice(args);
        }
        if let Some(literal) = &self.literal_arg {
            out.push(b' ');
            out.extend_from_slice(b"{");
            out.extend_from_slice(literal.size.to_string().as_bytes());
            if !literal.wait_continuation {
                out.push(b'+');
            }
            out.extend_from_slice(b"}");
        }
        out
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.tag, self.name)
    }
}

fn strip_crlf(line: &[u8]) -> Result<&[u8], CommandLineError> {
    line.strip_suffix(b"\r\n")
        .ok_or(CommandLineError::NotCrlfTerminated)
}

/// Looks for a trailing `{N}` / `{N+}` literal marker at the very end of
/// `body`. Returns the literal descriptor plus the byte length of `body`
/// with the marker stripped.
fn trailing_literal(body: &[u8]) -> Result<Option<(LiteralArg, usize)>, CommandLineError> {
    if body.last() != Some(&b'}') {
        return Ok(None);
    }
    let Some(open) = memchr::memrchr(b'{', body) else {
        return Ok(None);
    };
    let mut digits = &body[open + 1..body.len() - 1];
    let wait_continuation = match digits.last() {
        Some(b'+') => {
            digits = &digits[..digits.len() - 1];
            false
        }
        _ => true,
    };
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        // not a literal marker at all (e.g. a quoted string ending in `}`
        // without a preceding atom boundary) -- only treat it as one when
        // the brace is the first non-digit character on the line or
        // preceded by whitespace.
        if open == 0 || body[open - 1] == b' ' {
            return Err(CommandLineError::InvalidLiteral);
        }
        return Ok(None);
    }
    if open != 0 && body[open - 1] != b' ' {
        return Ok(None);
    }
    let size: u64 = atoi::atoi(digits).ok_or(CommandLineError::InvalidLiteral)?;
    // `open` is the index of `{`, which is preceded by the separator space
    // checked above; drop that space too so the returned length doesn't
    // include it.
    let consumed_len = if open != 0 { open - 1 } else { 0 };
    Ok(Some((
        LiteralArg {
            size,
            wait_continuation,
        },
        consumed_len,
    )))
}
