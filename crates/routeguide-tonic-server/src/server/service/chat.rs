//! Shared note log behind `RouteChat`.
//!
//! One [`NoteLog`] lives for the whole process, so concurrent chat calls see
//! each other's notes at matching locations. Every call holds a
//! [`ChatSession`] that remembers, per location, how far into the log it has
//! already been answered. A new note is answered with every earlier note at
//! its location that this session has not been sent yet, including the
//! session's own earlier notes.
//!
//! Appending a note and snapshotting the notes before it happen under one
//! lock, so two calls writing to the same location never miss or duplicate
//! each other's notes.

use crate::server::telemetry::increment_chat_notes;
use parking_lot::Mutex;
use routeguide_tonic_core::{Error, geo::Location, proto::RouteNote};
use std::{collections::HashMap, sync::Arc};

#[derive(Debug, Default)]
struct LogState {
    by_location: HashMap<Location, Vec<RouteNote>>,
    total: usize,
    closed: bool,
}

/// Append-only, location-partitioned log of route notes.
#[derive(Debug, Default)]
pub struct NoteLog {
    state: Mutex<LogState>,
}

impl NoteLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `note` at `location` and returns the notes logged there from
    /// index `from` up to (not including) the new one, together with the
    /// new note's index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceShutdown`] once the log has been closed.
    pub fn append_and_scan(
        &self,
        location: Location,
        note: RouteNote,
        from: usize,
    ) -> Result<(Vec<RouteNote>, usize), Error> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::ServiceShutdown);
        }

        let notes = state.by_location.entry(location).or_default();
        let index = notes.len();
        let earlier = notes[from.min(index)..].to_vec();
        notes.push(note);
        state.total += 1;
        drop(state);

        increment_chat_notes();
        Ok((earlier, index))
    }

    /// Total notes logged across every location.
    pub fn len(&self) -> usize {
        self.state.lock().total
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Refuses further appends and releases the logged notes.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.by_location.clear();
    }

    /// Opens a session for one chat call.
    pub fn session(self: &Arc<Self>) -> ChatSession {
        ChatSession {
            log: Arc::clone(self),
            cursors: HashMap::new(),
        }
    }
}

/// Per-call view of the [`NoteLog`].
#[derive(Debug)]
pub struct ChatSession {
    log: Arc<NoteLog>,
    /// Per location, the first log index not yet sent to this caller.
    cursors: HashMap<Location, usize>,
}

impl ChatSession {
    /// Logs `note` and returns the earlier notes at its location that this
    /// caller has not received yet, oldest first.
    ///
    /// A note without a location is filed at the origin.
    pub fn exchange(&mut self, note: RouteNote) -> Result<Vec<RouteNote>, Error> {
        let location = note
            .location
            .as_ref()
            .map(Location::from)
            .unwrap_or_default();
        let cursor = self.cursors.get(&location).copied().unwrap_or(0);

        let (earlier, index) = self.log.append_and_scan(location, note, cursor)?;
        self.cursors.insert(location, index);
        Ok(earlier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use routeguide_tonic_core::proto::Point;

    fn note(latitude: i32, longitude: i32, message: &str) -> RouteNote {
        RouteNote {
            location: Some(Point {
                latitude,
                longitude,
            }),
            message: message.to_string(),
        }
    }

    fn messages(notes: &[RouteNote]) -> Vec<&str> {
        notes.iter().map(|n| n.message.as_str()).collect()
    }

    #[test]
    fn replays_earlier_notes_at_the_same_location() {
        let log = Arc::new(NoteLog::new());
        let mut chat = log.session();

        assert!(chat.exchange(note(0, 1, "N1")).unwrap().is_empty());
        assert_eq!(messages(&chat.exchange(note(0, 1, "N2")).unwrap()), ["N1"]);
        assert!(chat.exchange(note(0, 2, "N3")).unwrap().is_empty());
        assert_eq!(messages(&chat.exchange(note(0, 1, "N4")).unwrap()), ["N2"]);

        assert_eq!(log.len(), 4);
    }

    #[test]
    fn sessions_see_each_other() {
        let log = Arc::new(NoteLog::new());
        let mut alice = log.session();
        let mut bob = log.session();

        assert!(alice.exchange(note(5, 5, "a1")).unwrap().is_empty());
        assert_eq!(messages(&bob.exchange(note(5, 5, "b1")).unwrap()), ["a1"]);
        assert_eq!(
            messages(&alice.exchange(note(5, 5, "a2")).unwrap()),
            ["a1", "b1"]
        );
        assert_eq!(messages(&bob.exchange(note(5, 5, "b2")).unwrap()), ["b1", "a2"]);
    }

    #[test]
    fn missing_location_is_the_origin() {
        let log = Arc::new(NoteLog::new());
        let mut chat = log.session();
        let unplaced = RouteNote {
            location: None,
            message: "somewhere".into(),
        };

        chat.exchange(unplaced).unwrap();
        assert_eq!(messages(&chat.exchange(note(0, 0, "here")).unwrap()), ["somewhere"]);
    }

    #[test]
    fn closed_log_refuses_notes() {
        let log = Arc::new(NoteLog::new());
        let mut chat = log.session();
        chat.exchange(note(1, 1, "before")).unwrap();

        log.close();
        assert!(matches!(
            chat.exchange(note(1, 1, "after")),
            Err(Error::ServiceShutdown)
        ));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn concurrent_appends_are_not_lost() {
        let log = Arc::new(NoteLog::new());
        let writers: Vec<_> = (0..8)
            .map(|w| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    let mut chat = log.session();
                    let mut seen = 0;
                    for i in 0..100 {
                        seen += chat.exchange(note(7, 7, &format!("{w}-{i}"))).unwrap().len();
                    }
                    seen
                })
            })
            .collect();

        for writer in writers {
            writer.join().unwrap();
        }
        assert_eq!(log.len(), 800);
    }
}
