//! Waitlist for holders that found the pool at capacity.

use std::collections::{HashSet, VecDeque};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::holder::HolderId;

/// Order in which waiters are promoted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueDiscipline {
    /// Oldest waiter first. Starvation free.
    #[default]
    Fifo,
    /// Newest waiter first. Early waiters can starve under sustained contention.
    Lifo,
}

impl QueueDiscipline {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fifo => "fifo",
            Self::Lifo => "lifo",
        }
    }
}

impl FromStr for QueueDiscipline {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fifo" => Ok(Self::Fifo),
            "lifo" => Ok(Self::Lifo),
            other => Err(format!("unknown queue discipline '{other}'")),
        }
    }
}

/// Placeholder for a holder pending capacity. Carries no lease fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WaitEntry {
    pub holder: HolderId,
    pub enqueued_at: DateTime<Utc>,
}

/// Ordered waitlist with O(1) membership checks.
///
/// Entries are stored oldest-first regardless of discipline; the discipline
/// only decides which end `dequeue_next` takes from.
#[derive(Debug, Default)]
pub struct WaitQueue {
    discipline: QueueDiscipline,
    entries: VecDeque<WaitEntry>,
    members: HashSet<HolderId>,
}

impl WaitQueue {
    pub fn new(discipline: QueueDiscipline) -> Self {
        Self {
            discipline,
            entries: VecDeque::new(),
            members: HashSet::new(),
        }
    }

    /// Append a holder. Returns `false` (and leaves the queue unchanged) if
    /// the holder is already waiting.
    pub fn enqueue(&mut self, holder: HolderId) -> bool {
        if !self.members.insert(holder.clone()) {
            return false;
        }
        self.entries.push_back(WaitEntry {
            holder,
            enqueued_at: Utc::now(),
        });
        true
    }

    pub fn dequeue_next(&mut self) -> Option<WaitEntry> {
        let entry = match self.discipline {
            QueueDiscipline::Fifo => self.entries.pop_front(),
            QueueDiscipline::Lifo => self.entries.pop_back(),
        }?;
        self.members.remove(&entry.holder);
        Some(entry)
    }

    /// Remove a specific waiter. Returns `true` only for the call that
    /// actually removed it.
    pub fn remove(&mut self, holder: &HolderId) -> bool {
        if !self.members.remove(holder) {
            return false;
        }
        if let Some(idx) = self.entries.iter().position(|e| &e.holder == holder) {
            self.entries.remove(idx);
        }
        true
    }

    pub fn contains(&self, holder: &HolderId) -> bool {
        self.members.contains(holder)
    }

    /// 1-based promotion position under the current discipline.
    pub fn position(&self, holder: &HolderId) -> Option<usize> {
        if !self.contains(holder) {
            return None;
        }
        let idx = self.entries.iter().position(|e| &e.holder == holder)?;
        Some(match self.discipline {
            QueueDiscipline::Fifo => idx + 1,
            QueueDiscipline::Lifo => self.entries.len() - idx,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Waiting holders in promotion order.
    pub fn holders(&self) -> Vec<HolderId> {
        let iter = self.entries.iter().map(|e| e.holder.clone());
        match self.discipline {
            QueueDiscipline::Fifo => iter.collect(),
            QueueDiscipline::Lifo => iter.rev().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> HolderId {
        HolderId::parse(name).unwrap()
    }

    #[test]
    fn fifo_serves_oldest_first() {
        let mut q = WaitQueue::new(QueueDiscipline::Fifo);
        q.enqueue(id("A"));
        q.enqueue(id("B"));
        q.enqueue(id("C"));

        assert_eq!(q.dequeue_next().unwrap().holder, id("A"));
        assert_eq!(q.dequeue_next().unwrap().holder, id("B"));
        assert_eq!(q.dequeue_next().unwrap().holder, id("C"));
        assert!(q.dequeue_next().is_none());
    }

    #[test]
    fn lifo_serves_newest_first() {
        let mut q = WaitQueue::new(QueueDiscipline::Lifo);
        q.enqueue(id("A"));
        q.enqueue(id("B"));
        q.enqueue(id("C"));

        assert_eq!(q.holders(), vec![id("C"), id("B"), id("A")]);
        assert_eq!(q.dequeue_next().unwrap().holder, id("C"));
        assert_eq!(q.position(&id("A")), Some(2));
    }

    #[test]
    fn enqueue_is_idempotent() {
        let mut q = WaitQueue::new(QueueDiscipline::Fifo);
        assert!(q.enqueue(id("A")));
        assert!(!q.enqueue(id("A")));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn remove_happens_exactly_once() {
        let mut q = WaitQueue::new(QueueDiscipline::Fifo);
        q.enqueue(id("A"));
        q.enqueue(id("B"));

        assert!(q.remove(&id("A")));
        assert!(!q.remove(&id("A")));
        assert!(!q.contains(&id("A")));
        assert_eq!(q.dequeue_next().unwrap().holder, id("B"));
        assert!(q.is_empty());
    }

    #[test]
    fn dequeued_holder_is_no_longer_member() {
        let mut q = WaitQueue::new(QueueDiscipline::Fifo);
        q.enqueue(id("A"));
        q.dequeue_next();
        assert!(!q.contains(&id("A")));
        assert!(q.enqueue(id("A")));
    }

    #[test]
    fn fifo_positions() {
        let mut q = WaitQueue::new(QueueDiscipline::Fifo);
        q.enqueue(id("A"));
        q.enqueue(id("B"));
        assert_eq!(q.position(&id("A")), Some(1));
        assert_eq!(q.position(&id("B")), Some(2));
        assert_eq!(q.position(&id("Z")), None);
    }

    #[test]
    fn discipline_parses_case_insensitively() {
        assert_eq!("FIFO".parse::<QueueDiscipline>(), Ok(QueueDiscipline::Fifo));
        assert_eq!("lifo".parse::<QueueDiscipline>(), Ok(QueueDiscipline::Lifo));
        assert!("stack".parse::<QueueDiscipline>().is_err());
    }

    #[test]
    fn discipline_defaults_to_fifo() {
        assert_eq!(QueueDiscipline::default(), QueueDiscipline::Fifo);
    }
}
