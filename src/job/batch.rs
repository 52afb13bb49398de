use std::collections::{BTreeSet, VecDeque};
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use crate::cluster::WorkStation;
use crate::job::task::{ImageProperties, Task, TaskResult};

/// Tasks pushed to one peer, tracked until their results come back or the
/// batch goes quiet for too long.
#[derive(Debug, Clone)]
pub struct RemoteTaskBatch {
    pub id: Uuid,
    pub tasks: Vec<Task>,
    pub worker: WorkStation,
    pub last_refresh: Instant,
}

impl RemoteTaskBatch {
    pub fn new(tasks: Vec<Task>, worker: WorkStation) -> Self {
        Self {
            id: Uuid::new_v4(),
            tasks,
            worker,
            last_refresh: Instant::now(),
        }
    }

    /// Record a sign of life from the worker.
    pub fn refresh(&mut self) {
        self.last_refresh = Instant::now();
    }

    pub fn is_timed_out(&self, max_age: Duration) -> bool {
        self.last_refresh.elapsed() > max_age
    }

    pub fn task_ids(&self) -> BTreeSet<u32> {
        self.tasks.iter().map(Task::id).collect()
    }

    /// Frames this batch covers, dimensions included.
    pub fn frames(&self) -> BTreeSet<ImageProperties> {
        self.tasks.iter().map(|task| task.image).collect()
    }
}

/// Work borrowed from another peer's job. Results go back to the lender.
#[derive(Debug)]
pub struct RequestedTaskBatch {
    pub lender: WorkStation,
    tasks: VecDeque<Task>,
    results: Vec<TaskResult>,
}

impl RequestedTaskBatch {
    pub fn new(lender: WorkStation, tasks: Vec<Task>) -> Self {
        Self {
            lender,
            tasks: tasks.into(),
            results: Vec::new(),
        }
    }

    pub fn pop_task(&mut self) -> Option<Task> {
        self.tasks.pop_front()
    }

    pub fn record_result(&mut self, result: TaskResult) {
        self.results.push(result);
    }

    pub fn remaining(&self) -> usize {
        self.tasks.len()
    }

    pub fn into_results(self) -> (WorkStation, Vec<TaskResult>) {
        (self.lender, self.results)
    }
}
