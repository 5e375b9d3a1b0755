use std::fmt;

use smol_str::SmolStr;

/// An IMAP tag: a short, non-empty, whitespace-free ASCII token.
///
/// Cheap to clone (backed by `SmolStr`'s inline representation for the
/// common case of tags under 23 bytes, which covers both client-chosen tags
/// and the proxy's own `P%05u` tags).
#[derive(Debug, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Tag(SmolStr);

impl Tag {
    /// Parses a tag from the bytes preceding the first space in a command or
    /// response line. Returns `None` if the bytes are empty, non-ASCII, or
    /// contain whitespace or one of the characters IMAP forbids in atoms
    /// used as a tag (`+`, `(`, `)`, `{`, `%`, `*`, `"`, `\`).
    pub fn parse(raw: &[u8]) -> Option<Self> {
        if raw.is_empty() || raw.len() > 128 {
            return None;
        }
        if !raw.iter().all(|&b| is_tag_char(b)) {
            return None;
        }
        let s = std::str::from_utf8(raw).ok()?;
        Some(Tag(SmolStr::new(s)))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

fn is_tag_char(b: u8) -> bool {
    b.is_ascii_graphic() && !matches!(b, b'+' | b'(' | b')' | b'{' | b'%' | b'*' | b'"' | b'\\')
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl AsRef<str> for Tag {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_client_tags() {
        assert_eq!(Tag::parse(b"A001").unwrap().as_str(), "A001");
        assert_eq!(Tag::parse(b"P0001").unwrap().as_str(), "P0001");
    }

    #[test]
    fn rejects_empty_and_whitespace() {
        assert!(Tag::parse(b"").is_none());
        assert!(Tag::parse(b"A 1").is_none());
        assert!(Tag::parse(b"A\t1").is_none());
    }

    #[test]
    fn rejects_reserved_atom_specials() {
        assert!(Tag::parse(b"A*1").is_none());
        assert!(Tag::parse(b"A{1}").is_none());
        assert!(Tag::parse(b"A+").is_none());
    }
}
