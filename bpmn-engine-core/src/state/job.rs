use crate::error::{ProcessingError, ProcessingResult};
use crate::records::JobRecord;
use crate::types::{Document, Key, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Persisted job state. `TIMED_OUT` and `FAILED` with retries left are
/// transitions back to `Activatable`, not resting states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Activatable,
    Activated,
    /// Failed with no retries left; waits for an incident to be resolved.
    Failed,
    NotFound,
}

#[derive(Clone, Debug, Default)]
pub struct JobStore {
    jobs: BTreeMap<Key, (JobState, JobRecord)>,
    activatable: BTreeMap<String, BTreeSet<Key>>,
    deadlines: BTreeSet<(Timestamp, Key)>,
}

impl JobStore {
    pub fn create(&mut self, key: Key, record: &JobRecord) {
        let mut stored = record.clone();
        stored.variables = Document::new();
        self.make_activatable(key, &stored.job_type);
        self.jobs.insert(key, (JobState::Activatable, stored));
    }

    pub fn get_state(&self, key: Key) -> JobState {
        self.jobs
            .get(&key)
            .map(|(state, _)| *state)
            .unwrap_or(JobState::NotFound)
    }

    pub fn get_job(&self, key: Key) -> Option<&JobRecord> {
        self.jobs.get(&key).map(|(_, record)| record)
    }

    /// Keys of activatable jobs of a type, oldest first.
    pub fn activatable_jobs(&self, job_type: &str, max: usize) -> Vec<Key> {
        self.activatable
            .get(job_type)
            .into_iter()
            .flatten()
            .take(max)
            .copied()
            .collect()
    }

    pub fn activate(
        &mut self,
        key: Key,
        worker: &str,
        deadline: Timestamp,
    ) -> ProcessingResult<()> {
        let (state, record) = self.entry(key)?;
        if *state != JobState::Activatable {
            return Err(illegal(key, "only activatable jobs can be activated"));
        }
        *state = JobState::Activated;
        record.worker = worker.to_string();
        record.deadline = deadline;
        let job_type = record.job_type.clone();
        self.remove_activatable(key, &job_type);
        self.deadlines.insert((deadline, key));
        Ok(())
    }

    pub fn time_out(&mut self, key: Key) -> ProcessingResult<()> {
        let (state, record) = self.entry(key)?;
        if *state != JobState::Activated {
            return Err(illegal(key, "only activated jobs can time out"));
        }
        *state = JobState::Activatable;
        let deadline = record.deadline;
        let job_type = record.job_type.clone();
        self.deadlines.remove(&(deadline, key));
        self.make_activatable(key, &job_type);
        Ok(())
    }

    /// Back to activatable if retries remain, otherwise `Failed`.
    pub fn fail(
        &mut self,
        key: Key,
        retries: u32,
        error_message: &str,
    ) -> ProcessingResult<JobState> {
        let (state, record) = self.entry(key)?;
        if *state != JobState::Activated {
            return Err(illegal(key, "only activated jobs can fail"));
        }
        record.retries = retries;
        record.error_message = error_message.to_string();
        let next = if retries > 0 {
            JobState::Activatable
        } else {
            JobState::Failed
        };
        *state = next;
        let deadline = record.deadline;
        let job_type = record.job_type.clone();
        self.deadlines.remove(&(deadline, key));
        if next == JobState::Activatable {
            self.make_activatable(key, &job_type);
        }
        Ok(next)
    }

    pub fn update_retries(&mut self, key: Key, retries: u32) -> ProcessingResult<()> {
        let (_, record) = self.entry(key)?;
        record.retries = retries;
        Ok(())
    }

    /// A failed job whose incident was resolved becomes activatable again.
    pub fn resolve(&mut self, key: Key) -> ProcessingResult<()> {
        let (state, record) = self.entry(key)?;
        if *state != JobState::Failed {
            return Ok(());
        }
        *state = JobState::Activatable;
        let job_type = record.job_type.clone();
        self.make_activatable(key, &job_type);
        Ok(())
    }

    /// Completed or canceled: the job goes to NOT_FOUND.
    pub fn delete(&mut self, key: Key) {
        if let Some((_, record)) = self.jobs.remove(&key) {
            self.remove_activatable(key, &record.job_type);
            self.deadlines.remove(&(record.deadline, key));
        }
    }

    /// Activated jobs whose deadline is strictly before `timestamp`.
    pub fn timed_out_before(&self, timestamp: Timestamp) -> Vec<Key> {
        self.deadlines
            .range(..(timestamp, Key::MIN))
            .map(|(_, key)| *key)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    fn entry(&mut self, key: Key) -> ProcessingResult<&mut (JobState, JobRecord)> {
        self.jobs
            .get_mut(&key)
            .ok_or_else(|| illegal(key, "job does not exist"))
    }

    fn make_activatable(&mut self, key: Key, job_type: &str) {
        self.activatable
            .entry(job_type.to_string())
            .or_default()
            .insert(key);
    }

    fn remove_activatable(&mut self, key: Key, job_type: &str) {
        if let Some(keys) = self.activatable.get_mut(job_type) {
            keys.remove(&key);
            if keys.is_empty() {
                self.activatable.remove(job_type);
            }
        }
    }
}

fn illegal(key: Key, reason: &str) -> ProcessingError {
    ProcessingError::IllegalJobState {
        key,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_job(job_type: &str) -> JobRecord {
        let mut variables = Document::new();
        variables.insert("secret".into(), json!("x"));
        JobRecord {
            job_type: job_type.into(),
            retries: 3,
            variables,
            ..JobRecord::default()
        }
    }

    #[test]
    fn test_variables_are_not_persisted() {
        let mut store = JobStore::default();
        store.create(1, &make_job("ship"));
        assert!(store.get_job(1).unwrap().variables.is_empty());
    }

    #[test]
    fn test_lifecycle_with_timeout_and_failure() {
        let mut store = JobStore::default();
        store.create(1, &make_job("ship"));
        assert_eq!(store.activatable_jobs("ship", 10), vec![1]);

        store.activate(1, "w1", 1_000).unwrap();
        assert!(store.activatable_jobs("ship", 10).is_empty());
        assert_eq!(store.timed_out_before(1_001), vec![1]);
        assert!(store.timed_out_before(1_000).is_empty());

        store.time_out(1).unwrap();
        assert_eq!(store.get_state(1), JobState::Activatable);

        store.activate(1, "w2", 2_000).unwrap();
        assert_eq!(store.fail(1, 2, "boom").unwrap(), JobState::Activatable);
        store.activate(1, "w2", 3_000).unwrap();
        assert_eq!(store.fail(1, 0, "boom").unwrap(), JobState::Failed);
        assert!(store.activatable_jobs("ship", 10).is_empty());

        store.update_retries(1, 1).unwrap();
        store.resolve(1).unwrap();
        assert_eq!(store.get_state(1), JobState::Activatable);

        store.delete(1);
        assert_eq!(store.get_state(1), JobState::NotFound);
        assert!(store.is_empty());
    }

    #[test]
    fn test_illegal_moves_rejected() {
        let mut store = JobStore::default();
        store.create(1, &make_job("ship"));
        assert!(store.time_out(1).is_err());
        assert!(store.fail(1, 1, "x").is_err());
        assert!(store.activate(2, "w", 1).is_err());
    }
}
