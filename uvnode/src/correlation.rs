//! In-flight request bookkeeping
//!
//! Every pending request lives in two tables, updated together:
//! * an exact-match table keyed by (port id, transfer id), used to resolve responses
//! * a deadline index ordered by (deadline, insertion order), used to expire requests
//!
//! Both tables are sorted vectors with binary search, so lookups are logarithmic and a tick
//! touches only the entries that actually expired.

use crate::core::{DatatypeHash, PortId, TransferId};
use crate::handler::{ReplyHandler, ReplyOutcome};
use crate::time::Instant;

/// Correlation key of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RequestKey {
    pub port: PortId,
    pub transfer_id: TransferId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CorrelationFull;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CorrelationStats {
    pub resolved: u64,
    pub expired: u64,
    pub cancelled: u64,
    pub unmatched_replies: u64,
}

struct Pending<'a> {
    key: RequestKey,
    deadline: Instant,
    sequence: u64,
    type_hash: Option<DatatypeHash>,
    handler: &'a dyn ReplyHandler,
}

#[derive(Clone, Copy)]
struct DeadlineEntry {
    deadline: Instant,
    sequence: u64,
    key: RequestKey,
}

impl DeadlineEntry {
    fn order(&self) -> (Instant, u64) {
        (self.deadline, self.sequence)
    }
}

/// Correlation and timeout engine for up to `R` in-flight requests
pub struct Correlation<'a, const R: usize> {
    table: heapless::Vec<Pending<'a>, R>,
    deadlines: heapless::Vec<DeadlineEntry, R>,
    sequence: u64,
    stats: CorrelationStats,
}

impl<const R: usize> Default for Correlation<'_, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, const R: usize> Correlation<'a, R> {
    pub const fn new() -> Self {
        Self {
            table: heapless::Vec::new(),
            deadlines: heapless::Vec::new(),
            sequence: 0,
            stats: CorrelationStats {
                resolved: 0,
                expired: 0,
                cancelled: 0,
                unmatched_replies: 0,
            },
        }
    }

    /// Registers a pending request
    ///
    /// # Panics
    ///
    /// Panics if the key is already pending: a transfer ID was reused while in flight.
    pub fn register(
        &mut self,
        port: PortId,
        transfer_id: TransferId,
        deadline: Instant,
        handler: &'a dyn ReplyHandler,
    ) -> Result<(), CorrelationFull> {
        self.insert(port, transfer_id, deadline, None, handler)
    }

    /// Registers a pending request whose response must carry `type_hash`
    ///
    /// # Panics
    ///
    /// Panics if the key is already pending.
    pub fn register_expecting(
        &mut self,
        port: PortId,
        transfer_id: TransferId,
        deadline: Instant,
        type_hash: DatatypeHash,
        handler: &'a dyn ReplyHandler,
    ) -> Result<(), CorrelationFull> {
        self.insert(port, transfer_id, deadline, Some(type_hash), handler)
    }

    /// Delivers a response to its continuation
    ///
    /// Returns `false` and counts an unmatched reply if nothing is pending under the key.
    pub fn resolve(&mut self, port: PortId, transfer_id: TransferId, payload: &[u8]) -> bool {
        let key = RequestKey { port, transfer_id };
        match self.take(key) {
            Some(pending) => {
                self.stats.resolved += 1;
                pending.handler.on_reply(ReplyOutcome::Response(payload));
                true
            }
            None => {
                self.stats.unmatched_replies += 1;
                debug!(
                    "unmatched reply on port {:?} transfer {:?}",
                    port.into_u16(),
                    transfer_id.into_u64()
                );
                false
            }
        }
    }

    /// Removes a pending request without invoking its continuation
    pub fn cancel(&mut self, port: PortId, transfer_id: TransferId) -> bool {
        let found = self.take(RequestKey { port, transfer_id }).is_some();
        if found {
            self.stats.cancelled += 1;
        }
        found
    }

    /// Expires every request with a deadline at or before `now`, oldest first
    ///
    /// Returns the number of expired requests.
    pub fn advance(&mut self, now: Instant) -> usize {
        let mut expired = 0;
        while let Some(first) = self.deadlines.first()
            && first.deadline <= now
        {
            let key = first.key;
            let pending = unwrap!(self.take(key));
            self.stats.expired += 1;
            expired += 1;
            pending.handler.on_reply(ReplyOutcome::Timeout);
        }
        expired
    }

    pub fn contains(&self, port: PortId, transfer_id: TransferId) -> bool {
        self.position(RequestKey { port, transfer_id }).is_ok()
    }

    /// Datatype the response is expected to carry, if the request was registered with one
    pub fn expected_type(&self, port: PortId, transfer_id: TransferId) -> Option<DatatypeHash> {
        let idx = self.position(RequestKey { port, transfer_id }).ok()?;
        self.table[idx].type_hash
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.first().map(|entry| entry.deadline)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.table.is_full()
    }

    pub fn stats(&self) -> CorrelationStats {
        self.stats
    }

    /// Drops a just-registered request whose transfer could not be sent
    pub(crate) fn withdraw(&mut self, port: PortId, transfer_id: TransferId) {
        self.take(RequestKey { port, transfer_id });
    }

    fn insert(
        &mut self,
        port: PortId,
        transfer_id: TransferId,
        deadline: Instant,
        type_hash: Option<DatatypeHash>,
        handler: &'a dyn ReplyHandler,
    ) -> Result<(), CorrelationFull> {
        let key = RequestKey { port, transfer_id };
        let idx = match self.position(key) {
            Ok(_) => panic!(
                "transfer {:?} on port {:?} reused while in flight",
                transfer_id.into_u64(),
                port.into_u16()
            ),
            Err(idx) => idx,
        };
        if self.table.is_full() {
            return Err(CorrelationFull);
        }

        let sequence = self.sequence;
        self.sequence += 1;
        let entry = DeadlineEntry {
            deadline,
            sequence,
            key,
        };
        let deadline_idx = self
            .deadlines
            .partition_point(|other| other.order() <= entry.order());

        let pending = Pending {
            key,
            deadline,
            sequence,
            type_hash,
            handler,
        };
        unwrap!(self.table.insert(idx, pending).ok());
        unwrap!(self.deadlines.insert(deadline_idx, entry).ok());
        debug_assert!(self.table.len() == self.deadlines.len());
        Ok(())
    }

    fn take(&mut self, key: RequestKey) -> Option<Pending<'a>> {
        let idx = self.position(key).ok()?;
        let pending = self.table.remove(idx);
        let order = (pending.deadline, pending.sequence);
        let deadline_idx = unwrap!(
            self.deadlines
                .binary_search_by(|entry| entry.order().cmp(&order))
                .ok()
        );
        self.deadlines.remove(deadline_idx);
        Some(pending)
    }

    fn position(&self, key: RequestKey) -> Result<usize, usize> {
        self.table.binary_search_by_key(&key, |pending| pending.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::RefCell;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Event {
        Response(u8),
        Timeout,
    }

    type Log = RefCell<heapless::Vec<(u8, Event), 16>>;

    /// Records outcomes tagged with the request they belong to
    struct Recorder<'l> {
        tag: u8,
        log: &'l Log,
    }

    impl ReplyHandler for Recorder<'_> {
        fn on_reply(&self, outcome: ReplyOutcome<'_>) {
            let event = match outcome {
                ReplyOutcome::Response(payload) => Event::Response(payload[0]),
                ReplyOutcome::Timeout => Event::Timeout,
            };
            self.log.borrow_mut().push((self.tag, event)).unwrap();
        }
    }

    fn ms(value: u64) -> Instant {
        Instant::from_millis(value)
    }

    const PORT: PortId = PortId::new(100);

    #[test]
    fn test_timeout_fires_once() {
        let log = &Log::default();
        let handler = Recorder { tag: 1, log };
        let mut engine: Correlation<'_, 4> = Correlation::new();
        engine
            .register(PORT, TransferId::new(7), ms(1000), &handler)
            .unwrap();

        assert_eq!(engine.advance(ms(999)), 0);
        assert!(log.borrow().is_empty());

        assert_eq!(engine.advance(ms(1000)), 1);
        assert_eq!(log.borrow().as_slice(), &[(1, Event::Timeout)]);
        assert!(engine.is_empty());

        assert_eq!(engine.advance(ms(2000)), 0);
        assert_eq!(log.borrow().len(), 1);
        assert_eq!(engine.stats().expired, 1);
    }

    #[test]
    fn test_resolve_once() {
        let log = &Log::default();
        let handler = Recorder { tag: 1, log };
        let mut engine: Correlation<'_, 4> = Correlation::new();
        engine
            .register(PORT, TransferId::new(7), ms(1000), &handler)
            .unwrap();

        assert!(engine.resolve(PORT, TransferId::new(7), &[42]));
        assert_eq!(log.borrow().as_slice(), &[(1, Event::Response(42))]);
        assert!(engine.is_empty());
        assert_eq!(engine.next_deadline(), None);

        assert!(!engine.resolve(PORT, TransferId::new(7), &[43]));
        assert_eq!(engine.advance(ms(5000)), 0);
        assert_eq!(log.borrow().len(), 1);
        assert_eq!(engine.stats().unmatched_replies, 1);
    }

    #[test]
    fn test_unregistered_reply_dropped() {
        let mut engine: Correlation<'_, 4> = Correlation::new();
        assert!(!engine.resolve(PORT, TransferId::new(3), &[1, 2, 3]));
        assert_eq!(engine.stats().unmatched_replies, 1);
        assert_eq!(engine.stats().resolved, 0);
    }

    #[test]
    fn test_expire_in_deadline_order() {
        let log = &Log::default();
        let early = Recorder { tag: 1, log };
        let middle = Recorder { tag: 2, log };
        let late = Recorder { tag: 3, log };
        let mut engine: Correlation<'_, 4> = Correlation::new();
        engine
            .register(PORT, TransferId::new(3), ms(300), &late)
            .unwrap();
        engine
            .register(PORT, TransferId::new(1), ms(100), &early)
            .unwrap();
        engine
            .register(PORT, TransferId::new(2), ms(200), &middle)
            .unwrap();

        assert_eq!(engine.advance(ms(250)), 2);
        assert_eq!(
            log.borrow().as_slice(),
            &[(1, Event::Timeout), (2, Event::Timeout)]
        );
        assert_eq!(engine.len(), 1);
        assert!(engine.contains(PORT, TransferId::new(3)));
        assert_eq!(engine.next_deadline(), Some(ms(300)));
    }

    #[test]
    fn test_equal_deadlines_expire_in_insertion_order() {
        let log = &Log::default();
        let first = Recorder { tag: 1, log };
        let second = Recorder { tag: 2, log };
        let third = Recorder { tag: 3, log };
        let mut engine: Correlation<'_, 4> = Correlation::new();
        engine
            .register(PortId::new(9), TransferId::new(0), ms(100), &first)
            .unwrap();
        engine
            .register(PortId::new(1), TransferId::new(5), ms(100), &second)
            .unwrap();
        engine
            .register(PortId::new(4), TransferId::new(2), ms(100), &third)
            .unwrap();

        // Removing the middle entry keeps both tables consistent
        assert!(engine.resolve(PortId::new(1), TransferId::new(5), &[7]));
        assert_eq!(engine.advance(ms(100)), 2);
        assert_eq!(
            log.borrow().as_slice(),
            &[(2, Event::Response(7)), (1, Event::Timeout), (3, Event::Timeout)]
        );
    }

    #[test]
    fn test_cancel_is_silent() {
        let log = &Log::default();
        let handler = Recorder { tag: 1, log };
        let mut engine: Correlation<'_, 4> = Correlation::new();
        engine
            .register(PORT, TransferId::new(7), ms(1000), &handler)
            .unwrap();

        assert!(engine.cancel(PORT, TransferId::new(7)));
        assert!(!engine.cancel(PORT, TransferId::new(7)));
        assert_eq!(engine.advance(ms(2000)), 0);
        assert!(!engine.resolve(PORT, TransferId::new(7), &[1]));
        assert!(log.borrow().is_empty());
        assert_eq!(engine.stats().cancelled, 1);
    }

    #[test]
    fn test_capacity() {
        let log = &Log::default();
        let handler = Recorder { tag: 1, log };
        let mut engine: Correlation<'_, 2> = Correlation::new();
        engine
            .register(PORT, TransferId::new(0), ms(10), &handler)
            .unwrap();
        engine
            .register(PORT, TransferId::new(1), ms(10), &handler)
            .unwrap();
        assert!(engine.is_full());
        assert_eq!(
            engine.register(PORT, TransferId::new(2), ms(10), &handler),
            Err(CorrelationFull)
        );
        assert_eq!(engine.len(), 2);
    }

    #[test]
    fn test_expected_type() {
        let log = &Log::default();
        let handler = Recorder { tag: 1, log };
        let hash = DatatypeHash::new(0xabcd);
        let mut engine: Correlation<'_, 2> = Correlation::new();
        engine
            .register_expecting(PORT, TransferId::new(1), ms(10), hash, &handler)
            .unwrap();
        engine
            .register(PORT, TransferId::new(2), ms(10), &handler)
            .unwrap();
        assert_eq!(engine.expected_type(PORT, TransferId::new(1)), Some(hash));
        assert_eq!(engine.expected_type(PORT, TransferId::new(2)), None);
        assert_eq!(engine.expected_type(PORT, TransferId::new(3)), None);
    }

    #[test]
    #[should_panic]
    fn test_reuse_in_flight_panics() {
        let log = &Log::default();
        let handler = Recorder { tag: 1, log };
        let mut engine: Correlation<'_, 4> = Correlation::new();
        engine
            .register(PORT, TransferId::new(7), ms(1000), &handler)
            .unwrap();
        let _ = engine.register(PORT, TransferId::new(7), ms(2000), &handler);
    }
}
