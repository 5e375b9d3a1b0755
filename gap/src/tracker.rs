use std::collections::HashMap;
use std::time::Instant;

use imap_proto::Tag;

/// Lifecycle phase of a [`ForwardedCommand`] (spec.md §3).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Phase {
    Issued,
    AwaitingContinuation,
    Completed,
    Cancelled,
}

/// The record of a command crossing the proxy (spec.md §3).
#[derive(Debug, Clone)]
pub struct ForwardedCommand {
    pub client_tag: Tag,
    pub upstream_tag: Tag,
    pub command: String,
    pub args: Option<Box<[u8]>>,
    pub submitted_at: Instant,
    pub phase: Phase,
    /// Monotonic submission order, independent of slab slot reuse. Lets
    /// `drain()` report records in the order the client issued them even
    /// after earlier slots have been freed and recycled (spec.md §4.6).
    seq: u64,
}

/// Owning store of in-flight commands, keyed by slab slot, with two tag
/// indices kept consistent by construction (Design Note "Two-map
/// consistency for tag tracker" — one owning store, two indices, rather
/// than two maps each holding a copy of the record).
pub struct TagTracker {
    next_upstream_seq: u64,
    next_bind_seq: u64,
    slots: Vec<Option<ForwardedCommand>>,
    by_client: HashMap<Tag, usize>,
    by_upstream: HashMap<Tag, usize>,
    free_slots: Vec<usize>,
}

impl TagTracker {
    pub fn new() -> Self {
        TagTracker {
            next_upstream_seq: 1,
            next_bind_seq: 0,
            slots: Vec::new(),
            by_client: HashMap::new(),
            by_upstream: HashMap::new(),
            free_slots: Vec::new(),
        }
    }

    /// Mints the next upstream tag. Monotone; never repeats within a
    /// session (spec.md §3 invariant 2).
    pub fn allocate(&mut self) -> Tag {
        let seq = self.next_upstream_seq;
        self.next_upstream_seq += 1;
        Tag::parse(format!("P{seq:04}").as_bytes()).expect("minted tag is always valid")
    }

    /// Binds a client tag to an upstream tag, recording the command.
    /// Returns `None` (`DuplicateClientTag`) if `client_tag` is currently
    /// in flight (spec.md §4.3).
    pub fn bind(
        &mut self,
        client_tag: Tag,
        upstream_tag: Tag,
        command: String,
        args: Option<Box<[u8]>>,
    ) -> Option<&ForwardedCommand> {
        if self.by_client.contains_key(&client_tag) {
            return None;
        }
        let seq = self.next_bind_seq;
        self.next_bind_seq += 1;
        let record = ForwardedCommand {
            client_tag: client_tag.clone(),
            upstream_tag: upstream_tag.clone(),
            command,
            args,
            submitted_at: Instant::now(),
            phase: Phase::Issued,
            seq,
        };
        let slot = match self.free_slots.pop() {
            Some(slot) => {
                self.slots[slot] = Some(record);
                slot
            }
            None => {
                self.slots.push(Some(record));
                self.slots.len() - 1
            }
        };
        self.by_client.insert(client_tag, slot);
        self.by_upstream.insert(upstream_tag, slot);
        self.slots[slot].as_ref()
    }

    pub fn lookup_by_client(&self, client_tag: &Tag) -> Option<&ForwardedCommand> {
        let slot = *self.by_client.get(client_tag)?;
        self.slots[slot].as_ref()
    }

    pub fn lookup_by_upstream(&self, upstream_tag: &Tag) -> Option<&ForwardedCommand> {
        let slot = *self.by_upstream.get(upstream_tag)?;
        self.slots[slot].as_ref()
    }

    /// Removes and returns the record bound to `upstream_tag`, if any. Used
    /// when a tagged final response arrives from upstream.
    pub fn complete(&mut self, upstream_tag: &Tag) -> Option<ForwardedCommand> {
        let slot = self.by_upstream.remove(upstream_tag)?;
        let record = self.slots[slot].take()?;
        self.by_client.remove(&record.client_tag);
        self.free_slots.push(slot);
        Some(record)
    }

    /// Removes the record bound to `client_tag` without completing it.
    /// Used for timeouts, disconnects, and denied rewrites.
    pub fn cancel(&mut self, client_tag: &Tag) -> Option<ForwardedCommand> {
        let slot = self.by_client.remove(client_tag)?;
        let record = self.slots[slot].take()?;
        self.by_upstream.remove(&record.upstream_tag);
        self.free_slots.push(slot);
        Some(record)
    }

    /// Clears every in-flight record, returning them in submission order
    /// (spec.md §4.6 "synthesized ... in submission order") rather than
    /// slab slot order, which diverges once a freed slot is reused.
    pub fn drain(&mut self) -> Vec<ForwardedCommand> {
        let mut records: Vec<ForwardedCommand> = self.slots.iter_mut().filter_map(Option::take).collect();
        records.sort_by_key(|r| r.seq);
        self.by_client.clear();
        self.by_upstream.clear();
        self.free_slots.clear();
        self.slots.clear();
        records
    }

    pub fn in_flight_count(&self) -> usize {
        self.by_client.len()
    }

    /// Removes and returns every record whose `submitted_at` is at or
    /// before `cutoff`. Used by the session supervisor's periodic timeout
    /// sweep (spec.md §5); does not touch records newer than the cutoff.
    pub fn expire_older_than(&mut self, cutoff: Instant) -> Vec<ForwardedCommand> {
        let stale: Vec<Tag> = self
            .slots
            .iter()
            .filter_map(|s| s.as_ref())
            .filter(|r| r.submitted_at <= cutoff)
            .map(|r| r.client_tag.clone())
            .collect();
        stale.into_iter().filter_map(|tag| self.cancel(&tag)).collect()
    }
}

impl Default for TagTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(s: &str) -> Tag {
        Tag::parse(s.as_bytes()).unwrap()
    }

    #[test]
    fn allocate_is_monotone_and_never_repeats() {
        let mut t = TagTracker::new();
        let a = t.allocate();
        let b = t.allocate();
        let c = t.allocate();
        assert_eq!(a.as_str(), "P0001");
        assert_eq!(b.as_str(), "P0002");
        assert_eq!(c.as_str(), "P0003");
    }

    #[test]
    fn bind_then_complete_clears_both_indices() {
        let mut t = TagTracker::new();
        let ut = t.allocate();
        t.bind(tag("A001"), ut.clone(), "NOOP".to_string(), None);
        assert!(t.lookup_by_client(&tag("A001")).is_some());
        assert!(t.lookup_by_upstream(&ut).is_some());

        let completed = t.complete(&ut).unwrap();
        assert_eq!(completed.client_tag.as_str(), "A001");
        assert!(t.lookup_by_client(&tag("A001")).is_none());
        assert!(t.lookup_by_upstream(&ut).is_none());
    }

    #[test]
    fn bind_then_cancel_clears_both_indices() {
        let mut t = TagTracker::new();
        let ut = t.allocate();
        t.bind(tag("A001"), ut.clone(), "NOOP".to_string(), None);
        let cancelled = t.cancel(&tag("A001")).unwrap();
        assert_eq!(cancelled.upstream_tag, ut);
        assert!(t.lookup_by_client(&tag("A001")).is_none());
        assert!(t.lookup_by_upstream(&ut).is_none());
    }

    #[test]
    fn duplicate_client_tag_while_in_flight_is_rejected() {
        let mut t = TagTracker::new();
        let ut1 = t.allocate();
        assert!(t
            .bind(tag("A004"), ut1, "NOOP".to_string(), None)
            .is_some());
        let ut2 = t.allocate();
        assert!(t
            .bind(tag("A004"), ut2, "CAPABILITY".to_string(), None)
            .is_none());
    }

    #[test]
    fn client_tag_reusable_after_completion() {
        let mut t = TagTracker::new();
        let ut1 = t.allocate();
        t.bind(tag("A004"), ut1.clone(), "NOOP".to_string(), None);
        t.complete(&ut1);
        let ut2 = t.allocate();
        assert!(t
            .bind(tag("A004"), ut2, "NOOP".to_string(), None)
            .is_some());
    }

    #[test]
    fn completing_a_cancelled_upstream_tag_returns_none() {
        let mut t = TagTracker::new();
        let ut = t.allocate();
        t.bind(tag("A006"), ut.clone(), "IDLE".to_string(), None);
        t.cancel(&tag("A006"));
        assert!(t.complete(&ut).is_none());
    }

    #[test]
    fn drain_clears_every_in_flight_record() {
        let mut t = TagTracker::new();
        let ut1 = t.allocate();
        let ut2 = t.allocate();
        t.bind(tag("A001"), ut1, "NOOP".to_string(), None);
        t.bind(tag("A002"), ut2, "CAPABILITY".to_string(), None);
        let drained = t.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(t.in_flight_count(), 0);
    }

    #[test]
    fn drain_preserves_submission_order_across_slot_reuse() {
        let mut t = TagTracker::new();
        let ut_a = t.allocate();
        t.bind(tag("A001"), ut_a.clone(), "NOOP".to_string(), None); // slot 0
        let ut_b = t.allocate();
        t.bind(tag("A002"), ut_b, "NOOP".to_string(), None); // slot 1
        t.complete(&ut_a); // frees slot 0
        let ut_c = t.allocate();
        t.bind(tag("A003"), ut_c, "NOOP".to_string(), None); // reuses slot 0

        let drained = t.drain();
        let tags: Vec<&str> = drained.iter().map(|r| r.client_tag.as_str()).collect();
        assert_eq!(tags, vec!["A002", "A003"]);
    }

    #[test]
    fn expire_older_than_only_cancels_stale_records() {
        let mut t = TagTracker::new();
        let ut1 = t.allocate();
        t.bind(tag("A001"), ut1, "IDLE".to_string(), None);
        let cutoff = Instant::now();
        let ut2 = t.allocate();
        t.bind(tag("A002"), ut2, "NOOP".to_string(), None);

        let expired = t.expire_older_than(cutoff);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].client_tag.as_str(), "A001");
        assert!(t.lookup_by_client(&tag("A001")).is_none());
        assert!(t.lookup_by_client(&tag("A002")).is_some());
    }

    #[test]
    fn slab_slot_reused_after_free_keeps_indices_consistent() {
        let mut t = TagTracker::new();
        let ut1 = t.allocate();
        t.bind(tag("A001"), ut1.clone(), "NOOP".to_string(), None);
        t.complete(&ut1);

        let ut2 = t.allocate();
        t.bind(tag("A002"), ut2.clone(), "CAPABILITY".to_string(), None);
        assert!(t.lookup_by_client(&tag("A001")).is_none());
        assert_eq!(
            t.lookup_by_client(&tag("A002")).unwrap().upstream_tag,
            ut2
        );
    }
}
