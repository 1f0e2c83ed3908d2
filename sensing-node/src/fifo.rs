use std::collections::VecDeque;

/// Insertion-ordered buffer that never holds more than `capacity` items.
/// When full, the oldest item is evicted before a new one is appended.
#[derive(Debug, Clone)]
pub struct BoundedFifo<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedFifo<T> {
    /// A capacity of zero is raised to one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Appends `item`, returning the evicted oldest entry if the buffer was full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    /// Shrinking evicts oldest entries until the new bound holds. Returns how many were evicted.
    pub fn set_capacity(&mut self, capacity: usize) -> usize {
        self.capacity = capacity.max(1);
        let excess = self.items.len().saturating_sub(self.capacity);
        self.items.drain(..excess);
        excess
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.items.iter()
    }
}

impl<T: Clone> BoundedFifo<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_last_capacity_entries_in_order() {
        let mut fifo = BoundedFifo::with_capacity(3);
        let evicted: Vec<_> = (1..=7).filter_map(|i| fifo.push(i)).collect();
        assert_eq!(evicted, vec![1, 2, 3, 4]);
        assert_eq!(fifo.to_vec(), vec![5, 6, 7]);
        assert_eq!(fifo.len(), 3);
    }

    #[test]
    fn test_under_capacity_keeps_everything() {
        let mut fifo = BoundedFifo::with_capacity(10);
        for i in 0..4 {
            assert!(fifo.push(i).is_none());
        }
        assert_eq!(fifo.to_vec(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_shrinking_evicts_oldest() {
        let mut fifo = BoundedFifo::with_capacity(5);
        for i in 0..5 {
            fifo.push(i);
        }
        assert_eq!(fifo.set_capacity(2), 3);
        assert_eq!(fifo.to_vec(), vec![3, 4]);
        fifo.push(5);
        assert_eq!(fifo.to_vec(), vec![4, 5]);
    }

    #[test]
    fn test_zero_capacity_is_raised() {
        let mut fifo = BoundedFifo::with_capacity(0);
        fifo.push('a');
        fifo.push('b');
        assert_eq!(fifo.capacity(), 1);
        assert_eq!(fifo.to_vec(), vec!['b']);
    }
}
