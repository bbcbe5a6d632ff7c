//! CPU-priority and CPU-deadline max-heaps (spec §4.6).
//!
//! Both heaps share the same shape: a per-CPU "best value so far" array plus
//! a binary max-heap over `(value, cpu)` for fast best-overall lookup.
//! `set(cpu, value)` is O(log n); `find` linearly filters the heap's backing
//! array by a CPU mask and an optional fit predicate, matching the source's
//! "scans from the root while filtering" description rather than promising
//! a pruned O(log n) masked search.

use alloc::vec::Vec;

use super::task::CpuId;

/// A value ordered so that "no work of this kind" sorts as the best
/// (largest) possible key — the ideal push/pull target.
pub trait HeapKey: Copy + Ord {
    const BEST: Self;
}

/// CPU priority: 0 = CFS/normal, 1..=99 = RT priority, 100 = deadline
/// presence (spec §4.6). There is no "best" sentinel distinct from an
/// ordinary value for priority, so `BEST` is unused by the deadline heap
/// but required for the shared impl; priority heaps should prefer `find`
/// over relying on `BEST`.
impl HeapKey for u8 {
    const BEST: u8 = u8::MAX;
}

/// Deadline key: `None` ("no deadline task on this CPU") sorts above every
/// `Some(deadline)`, and among `Some`, a larger absolute deadline is a
/// better push target (more slack before the CPU's own work is due).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DlKey(pub Option<u64>);

impl HeapKey for DlKey {
    const BEST: DlKey = DlKey(None);
}

impl PartialOrd for DlKey {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DlKey {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        match (self.0, other.0) {
            (None, None) => core::cmp::Ordering::Equal,
            (None, Some(_)) => core::cmp::Ordering::Greater,
            (Some(_), None) => core::cmp::Ordering::Less,
            (Some(a), Some(b)) => a.cmp(&b),
        }
    }
}

/// A binary max-heap over `(key, cpu)` with O(log n) `set`.
pub struct CpuHeap<K: HeapKey> {
    heap: Vec<(K, CpuId)>,
    /// `pos[cpu]` is the index of `cpu` in `heap`, if present.
    pos: Vec<Option<usize>>,
}

impl<K: HeapKey> CpuHeap<K> {
    pub fn new(num_cpus: usize) -> Self {
        Self {
            heap: Vec::with_capacity(num_cpus),
            pos: alloc::vec![None; num_cpus],
        }
    }

    fn swap(&mut self, i: usize, j: usize) {
        self.heap.swap(i, j);
        self.pos[self.heap[i].1] = Some(i);
        self.pos[self.heap[j].1] = Some(j);
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.heap[parent].0 >= self.heap[i].0 {
                break;
            }
            self.swap(parent, i);
            i = parent;
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        loop {
            let (left, right) = (2 * i + 1, 2 * i + 2);
            let mut largest = i;
            if left < self.heap.len() && self.heap[left].0 > self.heap[largest].0 {
                largest = left;
            }
            if right < self.heap.len() && self.heap[right].0 > self.heap[largest].0 {
                largest = right;
            }
            if largest == i {
                break;
            }
            self.swap(i, largest);
            i = largest;
        }
    }

    /// Set `cpu`'s key, inserting or updating as needed. O(log n).
    pub fn set(&mut self, cpu: CpuId, value: K) {
        if let Some(idx) = self.pos[cpu] {
            let old = self.heap[idx].0;
            self.heap[idx].0 = value;
            if value > old {
                self.sift_up(idx);
            } else {
                self.sift_down(idx);
            }
        } else {
            self.heap.push((value, cpu));
            let idx = self.heap.len() - 1;
            self.pos[cpu] = Some(idx);
            self.sift_up(idx);
        }
    }

    pub fn clear(&mut self, cpu: CpuId) {
        let Some(idx) = self.pos[cpu] else { return };
        let last = self.heap.len() - 1;
        self.swap(idx, last);
        self.heap.pop();
        self.pos[cpu] = None;
        if idx < self.heap.len() {
            self.sift_down(idx);
            self.sift_up(idx);
        }
    }

    pub fn value(&self, cpu: CpuId) -> Option<K> {
        self.pos[cpu].map(|idx| self.heap[idx].0)
    }

    /// Best CPU in `mask` whose key satisfies `fits`, scanning the heap's
    /// backing array (spec §4.6: "scans from the root while filtering").
    pub fn find(&self, mask: u64, fits: impl Fn(K) -> bool) -> Option<CpuId> {
        self.heap
            .iter()
            .filter(|(key, cpu)| (mask & (1u64 << cpu)) != 0 && fits(*key))
            .max_by_key(|(key, _)| *key)
            .map(|(_, cpu)| *cpu)
    }

    pub fn best(&self) -> Option<(K, CpuId)> {
        self.heap.first().copied()
    }
}

pub type CpuPriorityHeap = CpuHeap<u8>;
pub type CpuDeadlineHeap = CpuHeap<DlKey>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_heap_prefers_no_deadline_cpu() {
        let mut heap = CpuDeadlineHeap::new(4);
        heap.set(0, DlKey(Some(100)));
        heap.set(1, DlKey(None));
        heap.set(2, DlKey(Some(50)));
        assert_eq!(heap.best(), Some((DlKey(None), 1)));
    }

    #[test]
    fn find_respects_mask_and_predicate() {
        let mut heap = CpuDeadlineHeap::new(4);
        heap.set(0, DlKey(Some(100)));
        heap.set(1, DlKey(Some(20)));
        heap.set(2, DlKey(Some(500)));
        // Exclude CPU 2 via mask; best remaining is CPU 0 (deadline 100).
        let mask = 0b0011;
        let target = heap.find(mask, |k| matches!(k.0, Some(d) if d > 20));
        assert_eq!(target, Some(0));
    }

    #[test]
    fn set_twice_is_idempotent_on_shape() {
        // R3: set(heap, cpu, p); set(heap, cpu, p) is a no-op on heap shape.
        let mut heap = CpuPriorityHeap::new(4);
        heap.set(0, 10);
        heap.set(1, 20);
        let before = heap.heap.clone();
        heap.set(1, 20);
        assert_eq!(heap.heap, before);
    }

    #[test]
    fn clear_removes_cpu() {
        let mut heap = CpuPriorityHeap::new(4);
        heap.set(0, 10);
        heap.set(1, 20);
        heap.clear(1);
        assert_eq!(heap.value(1), None);
        assert_eq!(heap.best(), Some((10, 0)));
    }
}
