//! Write-back buffer for dirty chunks
//!
//! Element writes land here first and reach the file when the owning
//! array is committed, when the budget is exceeded, or on flush.

use std::collections::BTreeMap;

use super::catalog::ArrayId;

pub type ChunkKey = (ArrayId, Vec<u64>);

#[derive(Debug)]
pub struct ChunkCache {
    chunks: BTreeMap<ChunkKey, Vec<u8>>,
    bytes: usize,
    budget: usize,
}

impl ChunkCache {
    pub fn new(budget: usize) -> Self {
        Self { chunks: BTreeMap::new(), bytes: 0, budget }
    }

    pub fn get(&self, key: &ChunkKey) -> Option<&Vec<u8>> {
        self.chunks.get(key)
    }

    pub fn get_mut(&mut self, key: &ChunkKey) -> Option<&mut Vec<u8>> {
        self.chunks.get_mut(key)
    }

    pub fn contains(&self, key: &ChunkKey) -> bool {
        self.chunks.contains_key(key)
    }

    pub fn insert(&mut self, key: ChunkKey, data: Vec<u8>) {
        self.bytes += data.len();
        if let Some(old) = self.chunks.insert(key, data) {
            self.bytes -= old.len();
        }
    }

    /// Dirty chunk coordinates of one array
    pub fn coords_of(&self, array: ArrayId) -> Vec<Vec<u64>> {
        self.chunks
            .range((array, Vec::new())..)
            .take_while(|((id, _), _)| *id == array)
            .map(|((_, coords), _)| coords.clone())
            .collect()
    }

    /// Remove and return all dirty chunks of one array.
    pub fn take_array(&mut self, array: ArrayId) -> Vec<(ChunkKey, Vec<u8>)> {
        let keys: Vec<ChunkKey> = self.coords_of(array).into_iter().map(|c| (array, c)).collect();
        keys.into_iter()
            .filter_map(|k| self.remove(&k).map(|data| (k, data)))
            .collect()
    }

    /// Remove and return every dirty chunk.
    pub fn take_all(&mut self) -> Vec<(ChunkKey, Vec<u8>)> {
        self.bytes = 0;
        std::mem::take(&mut self.chunks).into_iter().collect()
    }

    pub fn remove(&mut self, key: &ChunkKey) -> Option<Vec<u8>> {
        let data = self.chunks.remove(key)?;
        self.bytes -= data.len();
        Some(data)
    }

    /// Drop an array's dirty chunks without writing them.
    pub fn discard_array(&mut self, array: ArrayId) -> usize {
        self.take_array(array).len()
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn over_budget(&self) -> bool {
        self.bytes > self.budget
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accounting() {
        let mut cache = ChunkCache::new(10);
        cache.insert((1, vec![0]), vec![0; 6]);
        cache.insert((1, vec![1]), vec![0; 6]);
        assert_eq!(cache.bytes(), 12);
        assert!(cache.over_budget());

        cache.insert((1, vec![1]), vec![0; 2]);
        assert_eq!(cache.bytes(), 8);
        assert!(!cache.over_budget());
    }

    #[test]
    fn test_take_array_is_scoped() {
        let mut cache = ChunkCache::new(1024);
        cache.insert((1, vec![0, 0]), vec![1]);
        cache.insert((2, vec![0, 0]), vec![2]);
        cache.insert((2, vec![1, 0]), vec![3]);
        cache.insert((3, vec![0, 0]), vec![4]);

        assert_eq!(cache.coords_of(2), vec![vec![0, 0], vec![1, 0]]);
        let taken = cache.take_array(2);
        assert_eq!(taken.len(), 2);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.bytes(), 2);

        assert_eq!(cache.discard_array(1), 1);
        assert_eq!(cache.take_all().len(), 1);
        assert!(cache.is_empty());
        assert_eq!(cache.bytes(), 0);
    }
}
