use crate::error::ControllerError;
use crate::worker::ContainerWorker;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct ContainerId(pub u32);

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "container-{}", self.0)
    }
}

struct Entry {
    id: ContainerId,
    worker: Arc<dyn ContainerWorker>,
}

// pick() indexes into this order, so entries may only ever be appended, never
// reordered, for the lifetime of the process.
pub struct ContainerDirectory {
    entries: Vec<Entry>,
}

impl ContainerDirectory {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn insert(&mut self, id: ContainerId, worker: Arc<dyn ContainerWorker>) {
        self.entries.push(Entry { id, worker });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn all_ids(&self) -> Vec<ContainerId> {
        self.entries.iter().map(|e| e.id).collect()
    }

    pub fn worker(&self, id: ContainerId) -> Option<Arc<dyn ContainerWorker>> {
        self.entries
            .iter()
            .find(|e| e.id == id)
            .map(|e| Arc::clone(&e.worker))
    }

    pub fn pick(&self, fingerprint: &[u8]) -> Result<Arc<dyn ContainerWorker>, ControllerError> {
        if self.entries.is_empty() {
            return Err(ControllerError::ProcessNotFound);
        }
        let hash = crc32fast::hash(fingerprint);
        let index = (hash as usize) % self.entries.len();
        Ok(Arc::clone(&self.entries[index].worker))
    }

    pub fn first(&self) -> Option<Arc<dyn ContainerWorker>> {
        self.entries.first().map(|e| Arc::clone(&e.worker))
    }

    pub fn iter_workers(&self) -> impl Iterator<Item = &Arc<dyn ContainerWorker>> {
        self.entries.iter().map(|e| &e.worker)
    }
}

impl Default for ContainerDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use test_r::test;

    use super::*;
    use crate::worker::tests::StubWorker;

    fn directory_of(n: u32) -> ContainerDirectory {
        let mut dir = ContainerDirectory::new();
        for i in 0..n {
            dir.insert(ContainerId(i), Arc::new(StubWorker::new(ContainerId(i))));
        }
        dir
    }

    #[test]
    fn pick_is_deterministic_for_a_fixed_fingerprint() {
        let dir = directory_of(4);
        let expected = crc32fast::hash(b"addr/key") as usize % 4;
        let picked = dir.pick(b"addr/key").unwrap();
        assert_eq!(picked.container_id(), ContainerId(expected as u32));
    }

    #[test]
    fn pick_on_empty_directory_is_process_not_found() {
        let dir = ContainerDirectory::new();
        assert_eq!(dir.pick(b"x").unwrap_err(), ControllerError::ProcessNotFound);
    }

    #[test]
    fn all_ids_preserves_insertion_order() {
        let dir = directory_of(5);
        assert_eq!(
            dir.all_ids(),
            vec![
                ContainerId(0),
                ContainerId(1),
                ContainerId(2),
                ContainerId(3),
                ContainerId(4)
            ]
        );
    }
}
