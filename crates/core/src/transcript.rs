//! Conversation transcript types.
//!
//! The transcript is owned by a collaborator of the session. The session
//! only appends finished entries to it and reads recent history back when
//! a new turn starts.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ragchat_endpoint::{HistoryEntry, Role, Source};
use serde::{Deserialize, Serialize};

const DEFAULT_TITLE: &str = "New chat";
const TITLE_MAX_CHARS: usize = 24;

/// An item in the conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub(crate) role: Role,
    pub(crate) content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) sources: Vec<Source>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub(crate) is_error: bool,
}

impl Entry {
    /// Creates a user entry.
    #[inline]
    pub fn user<S: Into<String>>(content: S) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            sources: vec![],
            is_error: false,
        }
    }

    /// Creates an assistant reply entry.
    #[inline]
    pub fn assistant<S: Into<String>>(content: S, sources: Vec<Source>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            sources,
            is_error: false,
        }
    }

    /// Creates an assistant entry describing a failed turn.
    #[inline]
    pub fn error<S: Into<String>>(content: S) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            sources: vec![],
            is_error: true,
        }
    }

    /// Returns the author of this entry.
    #[inline]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Returns the text of this entry.
    #[inline]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Returns the citations attached to a reply.
    #[inline]
    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    /// Returns `true` if this entry reports a failed turn rather than a
    /// reply. Such entries are never sent back as history.
    #[inline]
    pub fn is_error(&self) -> bool {
        self.is_error
    }
}

/// The conversation store the session records finished turns into.
pub trait Transcript: Send + Sync {
    /// Appends an entry to the given thread.
    fn append(&self, thread_id: &str, entry: Entry);

    /// Returns up to `limit` of the most recent non-error entries of the
    /// thread, oldest first.
    fn recent_history(&self, thread_id: &str, limit: usize) -> Vec<HistoryEntry>;
}

impl<T: Transcript + ?Sized> Transcript for Arc<T> {
    #[inline]
    fn append(&self, thread_id: &str, entry: Entry) {
        (**self).append(thread_id, entry)
    }

    #[inline]
    fn recent_history(&self, thread_id: &str, limit: usize) -> Vec<HistoryEntry> {
        (**self).recent_history(thread_id, limit)
    }
}

/// A conversation thread.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    id: String,
    title: String,
    entries: Vec<Entry>,
}

impl Thread {
    fn new(id: String) -> Self {
        Self {
            id,
            title: DEFAULT_TITLE.to_owned(),
            entries: vec![],
        }
    }

    /// Returns the thread id.
    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the title, derived from the first user message.
    #[inline]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Returns the entries, oldest first.
    #[inline]
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }
}

#[derive(Default)]
struct Threads {
    // Most recently created first.
    threads: Vec<Thread>,
    next_id: u64,
    // Deleted ids. Late appends to them are dropped.
    removed: HashSet<String>,
}

impl Threads {
    fn with_threads(threads: Vec<Thread>) -> Self {
        let next_id = threads
            .iter()
            .filter_map(|t| t.id.strip_prefix("thread:")?.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        Self {
            threads,
            next_id,
            removed: HashSet::new(),
        }
    }
}

/// An in-memory transcript holding several threads.
///
/// When opened with [`MemoryTranscript::open`], every change is also
/// written to a JSON file so the threads survive a restart. Write failures
/// are logged and otherwise ignored; the in-memory state stays
/// authoritative.
#[derive(Default)]
pub struct MemoryTranscript {
    state: Mutex<Threads>,
    file: Option<PathBuf>,
}

impl MemoryTranscript {
    /// Creates an empty transcript.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a transcript backed by the JSON file at `path`.
    ///
    /// A missing file starts an empty transcript. So does an unreadable or
    /// corrupt one, after logging a warning; it is replaced on the next
    /// change.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let threads = load_threads(&path);
        debug!("loaded {} threads from {}", threads.len(), path.display());
        Self {
            state: Mutex::new(Threads::with_threads(threads)),
            file: Some(path),
        }
    }

    /// Creates an empty thread and returns its id.
    pub fn new_thread(&self) -> String {
        let mut state = self.lock();
        state.next_id += 1;
        let id = format!("thread:{}", state.next_id);
        state.threads.insert(0, Thread::new(id.clone()));
        self.persist(&state);
        id
    }

    /// Returns a copy of every thread, most recently created first.
    pub fn threads(&self) -> Vec<Thread> {
        self.lock().threads.clone()
    }

    /// Returns a copy of the given thread.
    pub fn thread(&self, thread_id: &str) -> Option<Thread> {
        self.lock()
            .threads
            .iter()
            .find(|t| t.id == thread_id)
            .cloned()
    }

    /// Returns a copy of the entries of the given thread.
    pub fn entries(&self, thread_id: &str) -> Vec<Entry> {
        self.thread(thread_id)
            .map(|t| t.entries)
            .unwrap_or_default()
    }

    /// Deletes a thread. Returns `false` if there was no such thread.
    ///
    /// Entries appended to a deleted thread afterwards are discarded.
    pub fn remove_thread(&self, thread_id: &str) -> bool {
        let mut state = self.lock();
        let len = state.threads.len();
        state.threads.retain(|t| t.id != thread_id);
        if state.threads.len() == len {
            return false;
        }
        state.removed.insert(thread_id.to_owned());
        self.persist(&state);
        true
    }

    #[inline]
    fn lock(&self) -> MutexGuard<'_, Threads> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Called with the lock held so writes land in the order of changes.
    fn persist(&self, state: &Threads) {
        let Some(path) = &self.file else {
            return;
        };
        if let Err(err) = save_threads(path, &state.threads) {
            warn!("failed to save threads to {}: {err}", path.display());
        }
    }
}

fn load_threads(path: &Path) -> Vec<Thread> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return vec![],
        Err(err) => {
            warn!("failed to read threads from {}: {err}", path.display());
            return vec![];
        }
    };
    serde_json::from_slice(&data).unwrap_or_else(|err| {
        warn!("discarding corrupt threads file {}: {err}", path.display());
        vec![]
    })
}

fn save_threads(path: &Path, threads: &[Thread]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let data = serde_json::to_vec_pretty(threads)?;
    // Never leave a truncated file behind.
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)
}

impl Transcript for MemoryTranscript {
    fn append(&self, thread_id: &str, entry: Entry) {
        let mut state = self.lock();
        if state.removed.contains(thread_id) {
            debug!("dropping an entry for deleted thread {thread_id}");
            return;
        }
        let idx = match state.threads.iter().position(|t| t.id == thread_id) {
            Some(idx) => idx,
            None => {
                state.threads.insert(0, Thread::new(thread_id.to_owned()));
                0
            }
        };

        let thread = &mut state.threads[idx];
        let first_user_entry = entry.role == Role::User
            && !thread.entries.iter().any(|e| e.role == Role::User);
        if first_user_entry {
            thread.title = pick_title(&entry.content);
        }
        thread.entries.push(entry);
        self.persist(&state);
    }

    fn recent_history(&self, thread_id: &str, limit: usize) -> Vec<HistoryEntry> {
        let state = self.lock();
        let Some(thread) = state.threads.iter().find(|t| t.id == thread_id)
        else {
            return vec![];
        };

        let mut history: Vec<_> = thread
            .entries
            .iter()
            .rev()
            .filter(|e| !e.is_error)
            .take(limit)
            .map(|e| HistoryEntry {
                role: e.role,
                content: e.content.clone(),
            })
            .collect();
        history.reverse();
        history
    }
}

/// Derives a thread title from a message.
pub fn pick_title(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return DEFAULT_TITLE.to_owned();
    }
    if collapsed.chars().count() > TITLE_MAX_CHARS {
        let mut title: String = collapsed.chars().take(TITLE_MAX_CHARS).collect();
        title.push('…');
        return title;
    }
    collapsed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_title() {
        assert_eq!(pick_title("  hello \n  world "), "hello world");
        assert_eq!(pick_title("   "), "New chat");
        assert_eq!(
            pick_title("What are the opening hours of the library?"),
            "What are the opening hou…"
        );
        assert_eq!(
            pick_title("図書館の開館時間を教えてください。土曜日も開いていますか？"),
            "図書館の開館時間を教えてください。土曜日も開いて…"
        );
    }

    #[test]
    fn test_threads() {
        let transcript = MemoryTranscript::new();
        let first = transcript.new_thread();
        let second = transcript.new_thread();
        assert_ne!(first, second);

        let ids: Vec<_> = transcript
            .threads()
            .iter()
            .map(|t| t.id().to_owned())
            .collect();
        assert_eq!(ids, [second.clone(), first.clone()]);
        assert_eq!(transcript.thread(&first).unwrap().title(), "New chat");

        transcript.append(&first, Entry::user("Where is the station?"));
        transcript.append(&first, Entry::user("Second question"));
        assert_eq!(
            transcript.thread(&first).unwrap().title(),
            "Where is the station?"
        );

        assert!(transcript.remove_thread(&first));
        assert!(!transcript.remove_thread(&first));
        assert!(transcript.entries(&first).is_empty());
    }

    #[test]
    fn test_append_creates_thread() {
        let transcript = MemoryTranscript::new();
        transcript.append("external", Entry::user("Hi"));
        assert_eq!(transcript.entries("external").len(), 1);
    }

    #[test]
    fn test_append_to_deleted_thread_is_dropped() {
        let transcript = MemoryTranscript::new();
        let id = transcript.new_thread();
        transcript.append(&id, Entry::user("Hi"));
        assert!(transcript.remove_thread(&id));

        transcript.append(&id, Entry::assistant("late reply", vec![]));
        transcript.append(&id, Entry::error("late failure"));
        assert!(transcript.thread(&id).is_none());
        assert!(transcript.threads().is_empty());
    }

    fn temp_file(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "ragchat-transcript-{}-{name}.json",
            std::process::id()
        ));
        let _ = fs::remove_file(&path);
        path
    }

    #[test]
    fn test_open_restores_threads() {
        let path = temp_file("restore");
        let transcript = MemoryTranscript::open(&path);
        assert!(transcript.threads().is_empty());

        let first = transcript.new_thread();
        let second = transcript.new_thread();
        transcript.append(&first, Entry::user("When do you open?"));
        transcript.append(
            &first,
            Entry::assistant(
                "At nine.",
                vec![Source {
                    id: Some("hours".to_owned()),
                    title: None,
                    score: Some(0.5),
                }],
            ),
        );
        transcript.append(&first, Entry::error("HTTP 500"));
        assert!(transcript.remove_thread(&second));
        let saved = transcript.threads();
        drop(transcript);

        let reopened = MemoryTranscript::open(&path);
        assert_eq!(reopened.threads(), saved);
        assert_eq!(reopened.thread(&first).unwrap().title(), "When do you open?");
        // Ids keep counting from the highest one on disk.
        assert_eq!(reopened.new_thread(), "thread:2");

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_open_corrupt_file() {
        let path = temp_file("corrupt");
        fs::write(&path, "{ not json").unwrap();

        let transcript = MemoryTranscript::open(&path);
        assert!(transcript.threads().is_empty());
        let id = transcript.new_thread();
        assert_eq!(id, "thread:1");

        let reopened = MemoryTranscript::open(&path);
        assert_eq!(reopened.threads().len(), 1);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_recent_history() {
        let transcript = MemoryTranscript::new();
        let id = transcript.new_thread();
        transcript.append(&id, Entry::user("one"));
        transcript.append(&id, Entry::assistant("two", vec![]));
        transcript.append(&id, Entry::user("three"));
        transcript.append(&id, Entry::error("HTTP 500"));
        transcript.append(&id, Entry::user("four"));

        let history = transcript.recent_history(&id, 3);
        assert_eq!(
            history,
            [
                HistoryEntry::assistant("two"),
                HistoryEntry::user("three"),
                HistoryEntry::user("four"),
            ]
        );
        assert!(transcript.recent_history("missing", 3).is_empty());
    }
}
