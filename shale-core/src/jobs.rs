//! Background job bookkeeping.
//!
//! Foreground pipelines are waited on synchronously by the command
//! executor; only backgrounded jobs are recorded here. The manager polls
//! for completed children at statement boundaries so non-interactive runs
//! do not accumulate zombies (interactive shells ignore `SIGCHLD`, which
//! reaps automatically).

use std::fmt::Display;

use crate::sys;

/// The execution state of a job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    /// The job is running.
    Running,
    /// The job is stopped.
    Stopped,
    /// The job has completed.
    Done,
}

impl Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "Running"),
            Self::Stopped => write!(f, "Stopped"),
            Self::Done => write!(f, "Done"),
        }
    }
}

/// A set of processes managed by the shell as a single unit.
#[derive(Debug)]
pub struct Job {
    /// Shell-internal job id.
    pub id: usize,
    /// Process ids of the job's members; the first is the group leader.
    pub pids: Vec<i32>,
    /// The command line that started the job.
    pub command_line: String,
    /// The job's current state.
    pub state: JobState,
}

impl Display for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}\t{}", self.id, self.state, self.command_line)
    }
}

impl Job {
    /// The pid representing the job (its group leader).
    pub fn representative_pid(&self) -> Option<i32> {
        self.pids.first().copied()
    }
}

/// Tracks the background jobs of a shell instance.
#[derive(Debug, Default)]
pub struct JobManager {
    jobs: Vec<Job>,
    next_id: usize,
}

impl JobManager {
    /// Returns a new, empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new background job and returns its id.
    pub fn add(&mut self, pids: Vec<i32>, command_line: String) -> usize {
        self.next_id += 1;
        let id = self.next_id;
        self.jobs.push(Job {
            id,
            pids,
            command_line,
            state: JobState::Running,
        });
        id
    }

    /// The jobs currently tracked.
    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    /// Polls every tracked job, removing those whose processes have all
    /// exited. Returns the completed jobs.
    pub fn poll(&mut self) -> Vec<Job> {
        let mut completed = vec![];

        let mut i = 0;
        while i != self.jobs.len() {
            let done = self.jobs[i].pids.iter().all(|pid| {
                match sys::signal::poll_child(*pid) {
                    Ok(Some(_)) => true,
                    Ok(None) => false,
                    // ECHILD: already reaped (SIGCHLD ignored).
                    Err(_) => true,
                }
            });

            if done {
                let mut job = self.jobs.remove(i);
                job.state = JobState::Done;
                tracing::debug!(target: "jobs", "job [{}] completed", job.id);
                completed.push(job);
            } else {
                i += 1;
            }
        }

        completed
    }
}
