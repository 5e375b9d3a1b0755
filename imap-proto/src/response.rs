use crate::error::ResponseLineError;
use crate::tag::Tag;

/// The three terminal keywords a tagged response can carry.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CommandResult {
    /// `OK`
    Success,
    /// `NO`
    Fail,
    /// `BAD`
    ProtocolError,
}

/// A parsed tagged response line: `<tag> SP (OK|NO|BAD) ...`.
#[derive(Debug, Clone)]
pub struct CommandResultLine {
    pub tag: Tag,
    pub result: CommandResult,
    /// Bytes after the result keyword, unparsed, CRLF excluded.
    pub text: Box<[u8]>,
}

/// Untagged status responses that the session supervisor must react to
/// regardless of any in-flight command (spec.md §4.4).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ServerStatus {
    /// `* BYE ...` — server is closing the connection.
    Close,
    /// `* OK ...` — informational, including the greeting and
    /// `[CAPABILITY ...]` response codes.
    Information,
    /// `* PREAUTH ...` — greeting indicates the connection is already
    /// authenticated.
    Authenticated,
}

/// Coarse classification of an untagged data response, used only to decide
/// whether the proxy must rewrite it (CAPABILITY/ENABLE) before relaying.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CommandData {
    Capability,
    Enabled,
    Other,
}

#[derive(Debug, Clone)]
pub struct CommandDataLine {
    pub command_data: CommandData,
    /// Size of a literal trailing this line, if the line ends in `{N}`.
    pub literal_data: Option<u64>,
}

/// A single parsed upstream response line (spec.md §4.4).
#[derive(Debug, Clone)]
pub enum Response {
    CommandResult(CommandResultLine),
    ServerStatus(ServerStatus),
    CommandData(CommandDataLine),
    /// `+ ...` — a continuation request.
    ContinuationRequest,
}

impl Response {
    pub fn parse_line(line: &[u8]) -> Result<Response, ResponseLineError> {
        let body = line
            .strip_suffix(b"\r\n")
            .ok_or(ResponseLineError::NotCrlfTerminated)?;
        if body.is_empty() {
            return Err(ResponseLineError::InvalidStart);
        }

        match body[0] {
            b'+' => Ok(Response::ContinuationRequest),
            b'*' => {
                let rest = body[1..].strip_prefix(b" ").unwrap_or(&body[1..]);
                parse_untagged(rest)
            }
            _ => parse_tagged(body),
        }
    }
}

fn parse_tagged(body: &[u8]) -> Result<Response, ResponseLineError> {
    let sp = memchr::memchr(b' ', body).ok_or(ResponseLineError::NoResult)?;
    let (tag_bytes, rest) = body.split_at(sp);
    let tag = Tag::parse(tag_bytes).ok_or(ResponseLineError::InvalidTag)?;
    let rest = &rest[1..];

    let (keyword, text) = match memchr::memchr(b' ', rest) {
        Some(p) => (&rest[..p], &rest[p + 1..]),
        None => (rest, &rest[rest.len()..]),
    };
    let result = match keyword {
        b"OK" => CommandResult::Success,
        b"NO" => CommandResult::Fail,
        b"BAD" => CommandResult::ProtocolError,
        _ => return Err(ResponseLineError::InvalidResult),
    };
    Ok(Response::CommandResult(CommandResultLine {
        tag,
        result,
        text: Box::from(text),
    }))
}

fn parse_untagged(rest: &[u8]) -> Result<Response, ResponseLineError> {
    let (keyword, mut args) = match memchr::memchr(b' ', rest) {
        Some(p) => (&rest[..p], &rest[p + 1..]),
        None => (rest, &rest[rest.len()..]),
    };
    let upper = keyword.to_ascii_uppercase();
    match upper.as_slice() {
        b"BYE" => Ok(Response::ServerStatus(ServerStatus::Close)),
        b"OK" => Ok(Response::ServerStatus(ServerStatus::Information)),
        b"PREAUTH" => Ok(Response::ServerStatus(ServerStatus::Authenticated)),
        _ => {
            let command_data = match upper.as_slice() {
                b"CAPABILITY" => CommandData::Capability,
                b"ENABLED" => CommandData::Enabled,
                _ => CommandData::Other,
            };
            let literal_data = trailing_literal_size(&mut args)?;
            Ok(Response::CommandData(CommandDataLine {
                command_data,
                literal_data,
            }))
        }
    }
}

fn trailing_literal_size(body: &mut &[u8]) -> Result<Option<u64>, ResponseLineError> {
    if body.last() != Some(&b'}') {
        return Ok(None);
    }
    let Some(open) = memchr::memrchr(b'{', body) else {
        return Ok(None);
    };
    if open == 0 || body[open - 1] != b' ' {
        return Ok(None);
    }
    let mut digits = &body[open + 1..body.len() - 1];
    if digits.last() == Some(&b'+') {
        digits = &digits[..digits.len() - 1];
    }
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(ResponseLineError::InvalidLiteral);
    }
    let size = atoi::atoi(digits).ok_or(ResponseLineError::InvalidLiteral)?;
    Ok(Some(size))
}

/// Tracks a multi-line untagged response that is interrupted by one or more
/// literals (e.g. a `FETCH` response carrying a `BODY[]` literal). Created
/// once the first line reports `literal_data`; fed each subsequent line
/// fragment until one reports no further literal, at which point the
/// response is complete.
#[derive(Debug, Default)]
pub struct OngoingResponse {
    pub literal_data: Option<u64>,
}

impl OngoingResponse {
    pub fn parse_continue_line(&mut self, line: &[u8]) -> Result<(), ResponseLineError> {
        let mut body = line
            .strip_suffix(b"\r\n")
            .ok_or(ResponseLineError::NotCrlfTerminated)?;
        self.literal_data = trailing_literal_size(&mut body)?;
        Ok(())
    }
}

/// Formats `<tag> SP <keyword> SP <text>\r\n`.
pub fn format_tagged(tag: &Tag, keyword: &str, text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(tag.as_bytes().len() + keyword.len() + text.len() + 4);
    out.extend_from_slice(tag.as_bytes());
    out.push(b' ');
    out.extend_from_slice(keyword.as_bytes());
    if !text.is_empty() {
        out.push(b' ');
        out.extend_from_slice(text.as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    out
}

/// Formats `* <keyword> <text>\r\n`.
pub fn format_untagged(keyword: &str, text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(keyword.len() + text.len() + 4);
    out.extend_from_slice(b"* ");
    out.extend_from_slice(keyword.as_bytes());
    if !text.is_empty() {
        out.push(b' ');
        out.extend_from_slice(text.as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    out
}
