//! Job state: tasks, batches lent to or borrowed from peers, and the
//! single-slot store holding the job this workstation owns.

pub mod batch;
pub mod state;
pub mod store;
pub mod task;

pub use batch::{RemoteTaskBatch, RequestedTaskBatch};
pub use state::{ComputationStatus, Job, JobSummary, SharedJob};
pub use store::JobStore;
pub use task::{Complex, FractalParameters, ImageProperties, Task, TaskResult};
