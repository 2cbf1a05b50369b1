// Dirty row tracking: the minimal set of row spans to re-upload.

/// Half-open span of texture rows `[min, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirtyRange {
    pub min: u32,
    pub max: u32,
}

impl DirtyRange {
    pub fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    pub fn rows(&self) -> u32 {
        self.max - self.min
    }
}

/// Ranges are kept sorted by `min`, and no two of them overlap or touch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirtyRanges {
    ranges: Vec<DirtyRange>,
}

impl DirtyRanges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark rows `[min, max)` dirty, merging with every range it overlaps
    /// or touches.
    pub fn insert(&mut self, min: u32, max: u32) {
        if min >= max {
            return;
        }

        // Skip ranges that end before the new one starts.
        let mut index = 0;
        while index < self.ranges.len() && self.ranges[index].max < min {
            index += 1;
        }

        if index == self.ranges.len() {
            self.ranges.push(DirtyRange::new(min, max));
            return;
        }

        if max < self.ranges[index].min {
            self.ranges.insert(index, DirtyRange::new(min, max));
            return;
        }

        let current = &mut self.ranges[index];
        current.min = current.min.min(min);
        current.max = current.max.max(max);
        let mut merged = *current;

        // Fold in every following range the grown one now reaches.
        let next = index + 1;
        let mut end = next;
        while end < self.ranges.len() && self.ranges[end].min <= merged.max {
            merged.max = merged.max.max(self.ranges[end].max);
            end += 1;
        }
        self.ranges[index] = merged;
        self.ranges.drain(next..end);
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn as_slice(&self) -> &[DirtyRange] {
        &self.ranges
    }

    pub fn iter(&self) -> impl Iterator<Item = &DirtyRange> {
        self.ranges.iter()
    }
}
