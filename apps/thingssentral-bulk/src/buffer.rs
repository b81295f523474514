/// Readings accumulated between two flushes.
///
/// Values and timestamps live in two parallel sequences that are only ever
/// pushed to or cleared together, so `values().len() == timestamps().len()`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    values: Vec<f32>,
    timestamps: Vec<String>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: f32, timestamp: impl Into<String>) {
        self.values.push(value);
        self.timestamps.push(timestamp.into());
    }

    /// Appends every reading of `other` after the readings already held.
    pub fn extend(&mut self, other: Batch) {
        self.values.extend(other.values);
        self.timestamps.extend(other.timestamps);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
        self.timestamps.clear();
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn timestamps(&self) -> &[String] {
        &self.timestamps
    }

    pub fn iter(&self) -> impl Iterator<Item = (f32, &str)> + '_ {
        self.values
            .iter()
            .copied()
            .zip(self.timestamps.iter().map(String::as_str))
    }

    /// Moves the readings out, leaving an empty batch behind.
    pub fn take(&mut self) -> Batch {
        std::mem::take(self)
    }
}
