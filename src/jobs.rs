use std::collections::HashMap;

use tracing::{debug, warn};

use crate::error::{JobError, Result};
use crate::job::Pipeline;
use crate::status::JobState;
use crate::terminal;

/// Stable handle of a job while it is in the table.
pub type JobId = usize;

/// The shell's job table: every pipeline that is still worth tracking.
#[derive(Debug, Default)]
pub struct JobTable {
    jobs: HashMap<JobId, Pipeline>,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of a job and give it the next free id: one more than the
    /// largest id in use, so numbering restarts at 1 once the table is empty.
    pub fn insert(&mut self, mut job: Pipeline) -> JobId {
        let id = self.jobs.keys().copied().max().unwrap_or(0) + 1;
        job.assign_id(id);
        self.jobs.insert(id, job);
        id
    }

    pub fn get(&self, id: JobId) -> Option<&Pipeline> {
        self.jobs.get(&id)
    }

    pub fn get_mut(&mut self, id: JobId) -> Option<&mut Pipeline> {
        self.jobs.get_mut(&id)
    }

    pub fn remove(&mut self, id: JobId) -> Option<Pipeline> {
        self.jobs.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// All job ids, ascending.
    pub fn ids(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self.jobs.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// All jobs sorted by job id (ascending).
    pub fn jobs_sorted(&self) -> Vec<&Pipeline> {
        let mut list: Vec<(&JobId, &Pipeline)> = self.jobs.iter().collect();
        list.sort_by_key(|(id, _)| **id);
        list.into_iter().map(|(_, job)| job).collect()
    }

    /// The default target of `fg` and `bg`: the newest job that is in the
    /// background or stopped and has not completed.
    pub fn most_recent_eligible(&self) -> Option<JobId> {
        self.jobs
            .iter()
            .filter(|(_, job)| (job.is_background() || job.is_stopped()) && !job.is_completed())
            .map(|(id, _)| *id)
            .max()
    }

    /// Resolve a job argument (`N` or `%N`), falling back to the most recent
    /// eligible job when there is none.
    pub fn select(&self, arg: Option<&str>) -> Result<JobId> {
        let Some(arg) = arg else {
            return self
                .most_recent_eligible()
                .ok_or_else(|| JobError::user("no current job"));
        };

        let id = arg
            .strip_prefix('%')
            .unwrap_or(arg)
            .parse::<JobId>()
            .map_err(|_| JobError::user(format!("{arg}: invalid job id")))?;
        if self.jobs.contains_key(&id) {
            Ok(id)
        } else {
            Err(JobError::user(format!("{arg}: no such job")))
        }
    }

    /// Non-blocking status poll of every job.
    pub fn refresh(&mut self) {
        for job in self.jobs.values_mut() {
            job.wait(false);
        }
    }

    /// Collect every pending child status change and route it to the job
    /// that owns the process. Never blocks.
    pub fn reap(&mut self) {
        let flags = libc::WNOHANG | libc::WUNTRACED | libc::WCONTINUED;
        loop {
            match terminal::wait_pid(-1, flags) {
                Ok(Some((pid, raw_status))) => {
                    let owned = self
                        .jobs
                        .values_mut()
                        .any(|job| job.mark_process_status(pid, raw_status));
                    if !owned {
                        debug!(pid, "reaped a process that belongs to no job");
                    }
                }
                Ok(None) => break,
                Err(err) if err.raw_os_error() == Some(libc::ECHILD) => break,
                Err(err) => {
                    warn!(%err, "waitpid failed while reaping jobs");
                    break;
                }
            }
        }
    }

    /// Lines to show the user about jobs that changed state.
    ///
    /// Stopped jobs are reported once. Completed background jobs are reported
    /// once and removed; completed foreground jobs are removed silently.
    pub fn drain_notifications(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        for id in self.ids() {
            let Some(job) = self.jobs.get_mut(&id) else {
                continue;
            };
            match job.state() {
                JobState::Completed => {
                    if job.is_background() {
                        lines.push(job.format_job_info(JobState::Completed.label()));
                    }
                    self.jobs.remove(&id);
                }
                JobState::Stopped if !job.is_notified() => {
                    lines.push(job.format_job_info(JobState::Stopped.label()));
                    job.set_notified(true);
                }
                JobState::Stopped | JobState::Running => {}
            }
        }
        lines
    }

    /// Ids of jobs that are neither stopped nor completed, ascending.
    pub fn running_ids(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self
            .jobs
            .iter()
            .filter(|(_, job)| job.state() == JobState::Running)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }
}
