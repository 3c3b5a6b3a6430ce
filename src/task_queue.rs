use std::{
    collections::HashMap,
    fmt,
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex, PoisonError},
    thread,
};
use tokio::{runtime, sync::mpsc};
use tracing::{debug, error, warn};

type TaskOutput = Result<(), crate::error::Error>;
type BoxedTask = Pin<Box<dyn Future<Output = TaskOutput> + Send + 'static>>;

#[derive(Debug)]
pub enum Error {
    RuntimeBuild(String),
    Mutex(String),
    Send(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::RuntimeBuild(e) => write!(f, "failed to build Tokio runtime: {e}"),
            Error::Mutex(e) => write!(f, "mutex error: {e}"),
            Error::Send(e) => write!(f, "failed to send task: {e}"),
        }
    }
}

impl std::error::Error for Error {}

impl<T> From<PoisonError<T>> for Error {
    fn from(e: PoisonError<T>) -> Self {
        Error::Mutex(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskStatus {
    Queued,
    Running,
}

type Statuses = Arc<Mutex<HashMap<String, TaskStatus>>>;

/// Runs fire-and-forget tasks on a dedicated runtime, away from request handling.
///
/// A task submitted while another with the same reference is queued or running is dropped.
/// Failures are logged, never reported to the submitter.
pub struct TaskQueue {
    sender: mpsc::UnboundedSender<(String, BoxedTask)>,
    statuses: Statuses,
}

fn set_status(statuses: &Statuses, reference: &str, status: Option<TaskStatus>) {
    let mut st = statuses.lock().unwrap_or_else(PoisonError::into_inner);
    match status {
        Some(status) => st.insert(reference.to_string(), status),
        None => st.remove(reference),
    };
}

impl TaskQueue {
    pub fn new(worker_threads: usize) -> Result<Self, Error> {
        let (tx, mut rx) = mpsc::unbounded_channel::<(String, BoxedTask)>();
        let statuses: Statuses = Arc::new(Mutex::new(HashMap::new()));

        let rt = runtime::Builder::new_multi_thread()
            .worker_threads(worker_threads.max(1))
            .thread_name("task-queue")
            .enable_all()
            .build()
            .map_err(|e| Error::RuntimeBuild(e.to_string()))?;

        let statuses_clone = Arc::clone(&statuses);

        thread::spawn(move || {
            rt.block_on(async move {
                while let Some((reference, task)) = rx.recv().await {
                    set_status(&statuses_clone, &reference, Some(TaskStatus::Running));

                    let statuses_inner = Arc::clone(&statuses_clone);
                    tokio::spawn(async move {
                        match task.await {
                            Ok(()) => debug!("Task `{reference}` completed"),
                            Err(e) => error!("Task `{reference}` failed: {e}"),
                        }
                        set_status(&statuses_inner, &reference, None);
                    });
                }
            });
        });

        Ok(Self {
            sender: tx,
            statuses,
        })
    }

    pub fn submit<Fut>(&self, reference: &str, fut: Fut) -> Result<(), Error>
    where
        Fut: Future<Output = TaskOutput> + Send + 'static,
    {
        debug!("Submitting task with reference `{reference}`");
        let mut st = self.statuses.lock()?;
        if st.contains_key(reference) {
            warn!("Task `{reference}` is already pending, skipping");
            return Ok(());
        }
        st.insert(reference.to_string(), TaskStatus::Queued);
        drop(st);

        self.sender
            .send((reference.to_string(), Box::pin(fut)))
            .map_err(|e| Error::Send(e.to_string()))?;

        Ok(())
    }

    #[cfg(test)]
    pub fn status(&self, reference: &str) -> Result<Option<TaskStatus>, Error> {
        Ok(self.statuses.lock()?.get(reference).cloned())
    }
}
