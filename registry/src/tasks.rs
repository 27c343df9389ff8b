//! Background-task seam for fire-and-forget side effects.
//!
//! Side effects that must never block or fail a primary response (last-used
//! timestamps, index warming) go through a [`TaskSpawner`] instead of a bare
//! `tokio::spawn`, so tests can assert that a task was scheduled without
//! waiting for it to run.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

pub type BoxedTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

pub trait TaskSpawner: Send + Sync {
    fn spawn(&self, task: BoxedTask);
}

pub struct TokioSpawner;

impl TaskSpawner for TokioSpawner {
    fn spawn(&self, task: BoxedTask) {
        tokio::spawn(task);
    }
}

/// Collects tasks instead of running them. Tests drain and drive the
/// collected futures themselves.
#[derive(Default)]
pub struct CollectingSpawner {
    tasks: Mutex<Vec<BoxedTask>>,
}

impl CollectingSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scheduled(&self) -> usize {
        self.tasks.lock().expect("spawner lock poisoned").len()
    }

    pub fn drain(&self) -> Vec<BoxedTask> {
        self.tasks
            .lock()
            .expect("spawner lock poisoned")
            .drain(..)
            .collect()
    }
}

impl TaskSpawner for CollectingSpawner {
    fn spawn(&self, task: BoxedTask) {
        self.tasks.lock().expect("spawner lock poisoned").push(task);
    }
}
