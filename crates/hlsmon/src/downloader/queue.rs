use crate::playlist::Segment;
use crate::sync::Event;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::time::Duration;

/// Segments of `latest` whose URL is absent from `previous`, in `latest` order.
pub fn merge_new_segments(previous: &[Segment], latest: &[Segment]) -> Vec<Segment> {
    let known: HashSet<&str> = previous.iter().map(|s| s.url.as_str()).collect();
    latest
        .iter()
        .filter(|s| !known.contains(s.url.as_str()))
        .cloned()
        .collect()
}

/// FIFO of segments awaiting download plus the "new segment" signal.
///
/// Unbounded: a fast-rotating playlist with a slow consumer keeps growing it.
pub struct PendingQueue {
    items: Mutex<VecDeque<Segment>>,
    new_segment: Event,
}

impl Default for PendingQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingQueue {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            new_segment: Event::auto(),
        }
    }

    /// Append every segment, repeated URLs included, and signal the consumer.
    pub fn push_all(&self, segments: impl IntoIterator<Item = Segment>) -> usize {
        let added = {
            let mut items = self.items.lock();
            let before = items.len();
            items.extend(segments);
            items.len() - before
        };
        if added > 0 {
            self.new_segment.set();
        }
        added
    }

    /// Append segments not already queued and signal the consumer.
    /// Returns how many were added. Used by live merges.
    pub fn push_new(&self, segments: impl IntoIterator<Item = Segment>) -> usize {
        let added = {
            let mut items = self.items.lock();
            let mut queued: HashSet<String> = items.iter().map(|s| s.url.clone()).collect();
            let before = items.len();
            for segment in segments {
                if queued.insert(segment.url.clone()) {
                    items.push_back(segment);
                }
            }
            items.len() - before
        };
        if added > 0 {
            self.new_segment.set();
        }
        added
    }

    pub fn pop_front(&self) -> Option<Segment> {
        self.items.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn urls(&self) -> Vec<String> {
        self.items.lock().iter().map(|s| s.url.clone()).collect()
    }

    /// Block until new segments are signalled or `timeout` passes.
    pub fn wait_new(&self, timeout: Duration) -> bool {
        self.new_segment.wait(timeout)
    }

    /// Wake a consumer blocked in [`Self::wait_new`].
    pub fn notify(&self) {
        self.new_segment.set();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segs(names: &[&str]) -> Vec<Segment> {
        names
            .iter()
            .enumerate()
            .map(|(i, n)| Segment::new(i as u64, 4, format!("http://h/{n}")))
            .collect()
    }

    fn urls(segments: &[Segment]) -> Vec<&str> {
        segments.iter().map(|s| s.url.as_str()).collect()
    }

    #[test]
    fn merge_keeps_only_unseen_urls_in_order() {
        let previous = segs(&["a.ts", "b.ts", "c.ts"]);
        let latest = segs(&["b.ts", "c.ts", "d.ts", "e.ts"]);
        let fresh = merge_new_segments(&previous, &latest);
        assert_eq!(urls(&fresh), vec!["http://h/d.ts", "http://h/e.ts"]);
    }

    #[test]
    fn merge_of_identical_lists_is_empty() {
        let list = segs(&["a.ts", "b.ts"]);
        assert!(merge_new_segments(&list, &list).is_empty());
    }

    #[test]
    fn merge_with_empty_previous_takes_everything() {
        let latest = segs(&["x.ts", "y.ts"]);
        assert_eq!(merge_new_segments(&[], &latest).len(), 2);
    }

    #[test]
    fn queue_rejects_urls_already_pending() {
        let queue = PendingQueue::new();
        assert_eq!(queue.push_new(segs(&["a.ts", "b.ts"])), 2);
        assert_eq!(queue.push_new(segs(&["b.ts", "c.ts"])), 1);
        assert_eq!(
            queue.urls(),
            vec!["http://h/a.ts", "http://h/b.ts", "http://h/c.ts"]
        );

        // Once popped, the URL may be queued again by a later merge.
        assert_eq!(queue.pop_front().unwrap().url, "http://h/a.ts");
        assert_eq!(queue.push_new(segs(&["a.ts"])), 1);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn push_all_keeps_repeated_urls() {
        let queue = PendingQueue::new();
        assert_eq!(queue.push_all(segs(&["ad.ts", "main.ts", "ad.ts"])), 3);
        assert_eq!(
            queue.urls(),
            vec!["http://h/ad.ts", "http://h/main.ts", "http://h/ad.ts"]
        );
    }

    #[test]
    fn push_signals_new_segment() {
        let queue = PendingQueue::new();
        assert!(!queue.wait_new(Duration::from_millis(10)));
        queue.push_all(segs(&["a.ts"]));
        assert!(queue.wait_new(Duration::from_millis(10)));
        // Auto-reset: consumed by the first wait.
        assert!(!queue.wait_new(Duration::from_millis(10)));
        assert!(!queue.is_empty());
    }
}
