//! Packets held back until the client finishes loading.

use std::collections::VecDeque;

use tidewire_protocol::Packet;

/// FIFO of normal-priority packets that arrived before the client loaded.
///
/// Packets leave the queue in arrival order and only as a whole: the
/// queue is either drained into the handlers or discarded.
#[derive(Debug, Default)]
pub struct PendingQueue {
    packets: VecDeque<Packet>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, packet: Packet) {
        self.packets.push_back(packet);
    }

    /// Removes and returns every queued packet, oldest first.
    pub fn take(&mut self) -> VecDeque<Packet> {
        std::mem::take(&mut self.packets)
    }

    pub fn clear(&mut self) {
        self.packets.clear();
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Packet> {
        self.packets.iter()
    }
}

#[cfg(test)]
mod tests {
    use tidewire_protocol::Invoke;

    use super::*;

    fn invoke(method: u16) -> Packet {
        Invoke {
            method,
            payload: vec![],
        }
        .into()
    }

    #[test]
    fn test_take_preserves_order_and_empties() {
        let mut queue = PendingQueue::new();
        queue.push(invoke(1));
        queue.push(invoke(2));
        queue.push(invoke(3));

        let taken: Vec<_> = queue.take().into_iter().collect();
        assert_eq!(taken, vec![invoke(1), invoke(2), invoke(3)]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_clear() {
        let mut queue = PendingQueue::new();
        queue.push(invoke(1));
        assert_eq!(queue.len(), 1);
        queue.clear();
        assert!(queue.is_empty());
    }
}
