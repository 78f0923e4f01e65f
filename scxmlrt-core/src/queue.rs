//! Event queues.
//!
//! Internal events are always consumed before external ones. Producers that
//! do not run on the interpreter's own call stack (other threads, child
//! machines, services) go through an [`EventSender`] into the inbox, which is
//! moved onto the external queue before each external dequeue.

use scxmlrt_model::Event;
use std::collections::VecDeque;
use tokio::sync::mpsc;

/// Cloneable, thread-safe handle for submitting events to one interpreter.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventSender {
    /// Enqueues an event. Returns false if the interpreter is gone.
    pub fn send(&self, event: Event) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Internal queue, external queue and inbox of one interpreter.
#[derive(Debug)]
pub struct EventQueues {
    internal: VecDeque<Event>,
    external: VecDeque<Event>,
    inbox_tx: mpsc::UnboundedSender<Event>,
    inbox_rx: mpsc::UnboundedReceiver<Event>,
}

impl Default for EventQueues {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueues {
    pub fn new() -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Self {
            internal: VecDeque::new(),
            external: VecDeque::new(),
            inbox_tx,
            inbox_rx,
        }
    }

    pub fn sender(&self) -> EventSender {
        EventSender {
            tx: self.inbox_tx.clone(),
        }
    }

    pub fn push_internal(&mut self, event: Event) {
        self.internal.push_back(event);
    }

    pub fn push_external(&mut self, event: Event) {
        self.external.push_back(event);
    }

    pub fn pop_internal(&mut self) -> Option<Event> {
        self.internal.pop_front()
    }

    /// Moves everything waiting in the inbox onto the external queue.
    pub fn drain_inbox(&mut self) -> usize {
        let mut moved = 0;
        while let Ok(event) = self.inbox_rx.try_recv() {
            self.external.push_back(event);
            moved += 1;
        }
        moved
    }

    pub fn pop_external(&mut self) -> Option<Event> {
        self.drain_inbox();
        self.external.pop_front()
    }

    /// Waits for the next inbox event.
    pub async fn recv_inbox(&mut self) -> Option<Event> {
        self.inbox_rx.recv().await
    }

    pub fn has_internal(&self) -> bool {
        !self.internal.is_empty()
    }

    pub fn has_external(&self) -> bool {
        !self.external.is_empty()
    }

    pub fn internal_len(&self) -> usize {
        self.internal.len()
    }

    pub fn external_len(&self) -> usize {
        self.external.len()
    }

    /// Drops every queued event.
    pub fn clear(&mut self) {
        self.internal.clear();
        self.external.clear();
        while self.inbox_rx.try_recv().is_ok() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_per_queue() {
        let mut q = EventQueues::new();
        q.push_external(Event::new("e1"));
        q.push_internal(Event::internal("i1"));
        q.push_external(Event::new("e2"));
        q.push_internal(Event::internal("i2"));

        assert_eq!(q.pop_internal().unwrap().name, "i1");
        assert_eq!(q.pop_internal().unwrap().name, "i2");
        assert!(q.pop_internal().is_none());
        assert_eq!(q.pop_external().unwrap().name, "e1");
        assert_eq!(q.pop_external().unwrap().name, "e2");
    }

    #[test]
    fn test_inbox_lands_behind_queued_external_events() {
        let mut q = EventQueues::new();
        let sender = q.sender();
        q.push_external(Event::new("direct"));
        assert!(sender.send(Event::new("remote")));
        assert_eq!(q.external_len(), 1);

        assert_eq!(q.pop_external().unwrap().name, "direct");
        assert_eq!(q.pop_external().unwrap().name, "remote");
    }

    #[test]
    fn test_sender_from_other_thread() {
        let mut q = EventQueues::new();
        let sender = q.sender();
        std::thread::spawn(move || {
            sender.send(Event::new("threaded"));
        })
        .join()
        .unwrap();
        assert_eq!(q.drain_inbox(), 1);
        assert!(q.has_external());
    }

    #[test]
    fn test_clear() {
        let mut q = EventQueues::new();
        q.push_internal(Event::internal("i"));
        q.sender().send(Event::new("x"));
        q.clear();
        assert!(!q.has_internal());
        assert!(q.pop_external().is_none());
    }
}
