use blockfs_shared::Bitmap;

/// Fixed-capacity arena of records with a parallel occupancy bitmap.
///
/// Slots are handed out first-fit by index, in the same way as blocks in the
/// block store. A released slot is reset to `T::default()`.
#[derive(Debug, Clone)]
pub struct RecordTable<T> {
    records: Vec<T>,
    occupied: Bitmap,
}

impl<T: Default + Clone> RecordTable<T> {
    /// Returns `None` for a zero capacity.
    pub fn new(capacity: usize) -> Option<Self> {
        Some(Self {
            records: vec![T::default(); capacity],
            occupied: Bitmap::new(capacity)?,
        })
    }

    /// Rebuild a table from its records and occupancy bitmap.
    pub fn from_parts(records: Vec<T>, occupied: Bitmap) -> Option<Self> {
        (records.len() == occupied.bit_count()).then_some(Self { records, occupied })
    }

    pub fn capacity(&self) -> usize {
        self.records.len()
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.occupied.total_set()
    }

    pub fn is_empty(&self) -> bool {
        self.occupied.first_set().is_none()
    }

    pub fn is_full(&self) -> bool {
        self.occupied.first_zero().is_none()
    }

    /// Claim the lowest free slot and fill it with `make(index)`.
    pub fn allocate_with(&mut self, make: impl FnOnce(usize) -> T) -> Option<usize> {
        let index = self.occupied.first_zero()?;
        self.occupied.set(index);
        self.records[index] = make(index);
        Some(index)
    }

    pub fn allocate(&mut self, record: T) -> Option<usize> {
        self.allocate_with(|_| record)
    }

    /// Free slot `index`. Returns `false` if it was not occupied.
    pub fn release(&mut self, index: usize) -> bool {
        if !self.occupied.test(index) {
            return false;
        }
        self.occupied.reset(index);
        self.records[index] = T::default();
        true
    }

    /// Free every occupied slot whose record matches `predicate`, returning how many were freed.
    pub fn release_where(&mut self, mut predicate: impl FnMut(&T) -> bool) -> usize {
        let matching: Vec<usize> = self
            .iter()
            .filter(|(_, record)| predicate(record))
            .map(|(index, _)| index)
            .collect();
        for &index in &matching {
            self.release(index);
        }
        matching.len()
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.occupied.test(index).then(|| &self.records[index])
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        if !self.occupied.test(index) {
            return None;
        }
        Some(&mut self.records[index])
    }

    /// Occupied slots in index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.records
            .iter()
            .enumerate()
            .filter(|(index, _)| self.occupied.test(*index))
    }

    /// Every record, occupied or not.
    pub fn records(&self) -> &[T] {
        &self.records
    }

    pub fn occupancy(&self) -> &Bitmap {
        &self.occupied
    }
}
