/// Filters the capability tokens the upstream advertises down to the set
/// the proxy can safely pass through, folding `LITERAL+`/`LITERAL-` into a
/// single supported literal capability (grounded in
/// `g3proxy/src/inspect/imap/capability.rs`'s `check_supported`).
#[derive(Default)]
pub struct CapabilityFilter {
    has_non_sync_literal: bool,
}

impl CapabilityFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `Some(token)` if `cap` should be advertised to the client,
    /// `None` if the proxy cannot safely proxy it and must strip it.
    pub fn check_supported<'a>(&mut self, cap: &'a str) -> Option<&'a str> {
        if let Some(p) = memchr::memchr(b'=', cap.as_bytes()) {
            let name = &cap[..p];
            match name.as_bytes() {
                b"AUTH" | b"CONTEXT" | b"I18NLEVEL" | b"STATUS" | b"QUOTA" | b"RIGHTS"
                | b"APPENDLIMIT" | b"IMAPSIEVE" | b"SEARCH" | b"SORT" | b"URLAUTH" | b"UTF8" => {}
                b"COMPRESS" => return None,
                _ => return None,
            }
        } else {
            match cap.as_bytes() {
                b"IMAP4" | b"IMAP4rev1" => {}
                b"STARTTLS" => {}
                b"UIDPLUS" | b"SASL-IR" | b"MOVE" | b"ID" | b"UNSELECT" | b"CHILDREN"
                | b"IDLE" | b"NAMESPACE" | b"ESEARCH" | b"SEARCHRES" | b"ENABLE"
                | b"LIST-EXTENDED" | b"LIST-STATUS" | b"CREATE-SPECIAL-USE" | b"SPECIAL-USE" => {}
                b"LITERAL+" => {
                    return if !self.has_non_sync_literal {
                        self.has_non_sync_literal = true;
                        Some("LITERAL-")
                    } else {
                        None
                    };
                }
                b"LITERAL-" => {
                    if !self.has_non_sync_literal {
                        self.has_non_sync_literal = true;
                    } else {
                        return None;
                    }
                }
                b"BINARY" | b"CONVERT" | b"PARTIAL" | b"ESORT" | b"THREAD" | b"LANGUAGE"
                | b"MULTISEARCH" | b"MULTIAPPEND" | b"CONDSTORE" | b"QRESYNC" | b"ACL"
                | b"FILTERS" | b"INPROGRESS" | b"LIST-METADATA" | b"LIST-MYRIGHTS"
                | b"LOGIN-REFERRALS" | b"MAILBOX-REFERRALS" | b"METADATA"
                | b"METADATA-SERVER" | b"NOTIFY" | b"OBJECTID" | b"PREVIEW" | b"REPLACE"
                | b"SAVEDATE" | b"UIDONLY" | b"WITHIN" => {}
                b"CATENATE" => return None,
                b"UNAUTHENTICATE" => return None,
                b"URL-PARTIAL" => return None, // rfc5550
                _ => return None,
            }
        }
        Some(cap)
    }

    /// Filters a whole capability list, e.g. the text after `* CAPABILITY`.
    pub fn filter_list(&mut self, caps: &[String]) -> Vec<String> {
        caps.iter()
            .filter_map(|c| self.check_supported(c).map(str::to_string))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_compress_and_unauthenticate() {
        let mut f = CapabilityFilter::new();
        let caps = vec![
            "IMAP4rev1".to_string(),
            "COMPRESS=DEFLATE".to_string(),
            "UNAUTHENTICATE".to_string(),
            "IDLE".to_string(),
        ];
        assert_eq!(f.filter_list(&caps), vec!["IMAP4rev1", "IDLE"]);
    }

    #[test]
    fn folds_literal_plus_and_minus_into_one_token() {
        let mut f = CapabilityFilter::new();
        let caps = vec!["LITERAL+".to_string(), "LITERAL-".to_string()];
        assert_eq!(f.filter_list(&caps), vec!["LITERAL-"]);
    }

    #[test]
    fn strips_url_partial() {
        let mut f = CapabilityFilter::new();
        let caps = vec!["IMAP4rev1".to_string(), "URL-PARTIAL".to_string()];
        assert_eq!(f.filter_list(&caps), vec!["IMAP4rev1"]);
    }
}
