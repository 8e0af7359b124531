use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::JobStore;
use crate::error::StoreError;
use crate::job::{Job, JobId};

/// Process-local job store.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<JobId, Job>> {
        match self.jobs.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Memory job store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<JobId, Job>> {
        match self.jobs.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Memory job store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

impl JobStore for MemoryJobStore {
    fn get(&self, id: &JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.read().get(id).cloned())
    }

    fn put(&self, job: &Job) -> Result<(), StoreError> {
        self.write().insert(job.id.clone(), job.clone());
        Ok(())
    }

    fn delete(&self, id: &JobId) -> Result<bool, StoreError> {
        Ok(self.write().remove(id).is_some())
    }

    fn list(&self) -> Result<Vec<Job>, StoreError> {
        let mut jobs: Vec<Job> = self.read().values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobStatus, SubmitRequest};

    #[test]
    fn test_put_get_delete() {
        let store = MemoryJobStore::new();
        let job = Job::new(SubmitRequest::new("Bacon Park Golf Course"));

        store.put(&job).unwrap();
        assert_eq!(store.get(&job.id).unwrap(), Some(job.clone()));

        assert!(store.delete(&job.id).unwrap());
        assert!(store.get(&job.id).unwrap().is_none());
        assert!(!store.delete(&job.id).unwrap());
    }

    #[test]
    fn test_put_replaces() {
        let store = MemoryJobStore::new();
        let mut job = Job::new(SubmitRequest::new("Pinehurst No. 2"));
        store.put(&job).unwrap();

        job.status = JobStatus::Rendering;
        job.progress = 70;
        store.put(&job).unwrap();

        let stored = store.get(&job.id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Rendering);
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_list_newest_first() {
        let store = MemoryJobStore::new();
        let mut first = Job::new(SubmitRequest::new("first"));
        let second = Job::new(SubmitRequest::new("second"));
        first.created_at = second.created_at - chrono::Duration::seconds(5);
        store.put(&first).unwrap();
        store.put(&second).unwrap();

        let names: Vec<String> = store
            .list()
            .unwrap()
            .into_iter()
            .map(|j| j.subject_name)
            .collect();
        assert_eq!(names, vec!["second", "first"]);
    }
}
