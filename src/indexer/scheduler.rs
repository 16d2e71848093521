//! Parse admission control.
//!
//! At most `limit` files are in flight. Requests beyond that wait in a FIFO
//! backlog holding each file once. A request for a file that is already in
//! flight marks the running parse stale: its result is dropped on
//! completion and the file goes to the back of the backlog, so the snapshot
//! that eventually lands is at least as new as the last request.
//!
//! A file is never in flight and in the backlog at the same time.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};

/// Outcome of a finished parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Whether the snapshot should be committed.
    pub commit: bool,
    /// File to hand to the worker slot that just freed up.
    pub next: Option<PathBuf>,
}

#[derive(Debug)]
pub struct Scheduler {
    limit: usize,
    in_flight: HashSet<PathBuf>,
    backlog: VecDeque<PathBuf>,
    queued: HashSet<PathBuf>,
    /// In-flight files requested again after dispatch.
    stale: HashSet<PathBuf>,
}

impl Scheduler {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            in_flight: HashSet::new(),
            backlog: VecDeque::new(),
            queued: HashSet::new(),
            stale: HashSet::new(),
        }
    }

    /// Ask for `file` to be parsed. Returns the file when it should be
    /// dispatched right away.
    pub fn request(&mut self, file: PathBuf) -> Option<PathBuf> {
        if self.in_flight.contains(&file) {
            self.stale.insert(file);
            return None;
        }
        if self.queued.contains(&file) {
            return None;
        }
        if self.in_flight.len() < self.limit {
            self.in_flight.insert(file.clone());
            return Some(file);
        }
        self.queued.insert(file.clone());
        self.backlog.push_back(file);
        None
    }

    /// Record that the parse of `file` finished.
    pub fn complete(&mut self, file: &Path) -> Completion {
        let was_in_flight = self.in_flight.remove(file);
        let was_stale = self.stale.remove(file);
        let commit = was_in_flight && !was_stale;

        if was_in_flight && was_stale && self.queued.insert(file.to_path_buf()) {
            self.backlog.push_back(file.to_path_buf());
        }

        Completion {
            commit,
            next: self.next(),
        }
    }

    fn next(&mut self) -> Option<PathBuf> {
        if self.in_flight.len() >= self.limit {
            return None;
        }
        let file = self.backlog.pop_front()?;
        self.queued.remove(&file);
        self.in_flight.insert(file.clone());
        Some(file)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    pub fn is_in_flight(&self, file: &Path) -> bool {
        self.in_flight.contains(file)
    }

    pub fn is_queued(&self, file: &Path) -> bool {
        self.queued.contains(file)
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight.is_empty() && self.backlog.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(name: &str) -> PathBuf {
        PathBuf::from(name)
    }

    fn assert_disjoint(s: &Scheduler) {
        for file in &s.backlog {
            assert!(!s.in_flight.contains(file), "{} both in flight and queued", file.display());
        }
        assert_eq!(s.backlog.len(), s.queued.len());
        assert!(s.in_flight.len() <= s.limit);
    }

    #[test]
    fn test_dispatch_until_full_then_backlog() {
        let mut s = Scheduler::new(2);
        assert_eq!(s.request(p("a.c")), Some(p("a.c")));
        assert_eq!(s.request(p("b.c")), Some(p("b.c")));
        assert_eq!(s.request(p("c.c")), None);
        assert_eq!(s.request(p("d.c")), None);
        assert_eq!(s.in_flight_len(), 2);
        assert_eq!(s.backlog_len(), 2);
        assert_disjoint(&s);

        let done = s.complete(Path::new("b.c"));
        assert!(done.commit);
        assert_eq!(done.next, Some(p("c.c")));
        assert!(s.is_in_flight(Path::new("c.c")));
        assert!(!s.is_queued(Path::new("c.c")));
        assert_disjoint(&s);
    }

    #[test]
    fn test_repeated_requests_before_dispatch_parse_once() {
        let mut s = Scheduler::new(1);
        s.request(p("busy.c"));
        for _ in 0..5 {
            assert_eq!(s.request(p("x.c")), None);
        }
        assert_eq!(s.backlog_len(), 1);

        let done = s.complete(Path::new("busy.c"));
        assert_eq!(done.next, Some(p("x.c")));
        let done = s.complete(Path::new("x.c"));
        assert!(done.commit);
        assert_eq!(done.next, None);
        assert!(s.is_idle());
    }

    #[test]
    fn test_request_during_parse_discards_result_and_reparses() {
        let mut s = Scheduler::new(4);
        assert_eq!(s.request(p("a.c")), Some(p("a.c")));
        assert_eq!(s.request(p("a.c")), None);
        assert_eq!(s.request(p("a.c")), None);
        assert!(!s.is_queued(Path::new("a.c")));
        assert_disjoint(&s);

        let done = s.complete(Path::new("a.c"));
        assert!(!done.commit);
        assert_eq!(done.next, Some(p("a.c")));

        let done = s.complete(Path::new("a.c"));
        assert!(done.commit);
        assert!(s.is_idle());
    }

    #[test]
    fn test_stale_file_goes_behind_existing_backlog() {
        let mut s = Scheduler::new(1);
        s.request(p("a.c"));
        s.request(p("b.c"));
        s.request(p("a.c"));
        assert_disjoint(&s);

        let done = s.complete(Path::new("a.c"));
        assert!(!done.commit);
        assert_eq!(done.next, Some(p("b.c")));
        assert!(s.is_queued(Path::new("a.c")));
        assert_disjoint(&s);

        let done = s.complete(Path::new("b.c"));
        assert!(done.commit);
        assert_eq!(done.next, Some(p("a.c")));
    }

    #[test]
    fn test_unknown_completion_is_not_committed() {
        let mut s = Scheduler::new(1);
        let done = s.complete(Path::new("never.c"));
        assert_eq!(done, Completion { commit: false, next: None });
    }

    #[test]
    fn test_invariants_hold_under_mixed_traffic() {
        let mut s = Scheduler::new(3);
        let files: Vec<PathBuf> = (0..8).map(|i| p(&format!("f{}.c", i))).collect();
        let mut running: Vec<PathBuf> = Vec::new();

        for round in 0..40 {
            let file = files[(round * 5) % files.len()].clone();
            if let Some(f) = s.request(file) {
                running.push(f);
            }
            if round % 3 == 2 && !running.is_empty() {
                let finished = running.remove(0);
                if let Some(next) = s.complete(&finished).next {
                    running.push(next);
                }
            }
            assert_disjoint(&s);
            assert_eq!(running.len(), s.in_flight_len());
        }
    }

    #[test]
    fn test_zero_limit_is_clamped() {
        let s = Scheduler::new(0);
        assert_eq!(s.limit(), 1);
    }
}
