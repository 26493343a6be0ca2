//! Asynchronous utilities for use with Tokio.
//!
//! Some of this stuff is frankly Rust magic, but it enables everything else we
//! do. We pay the complexity tax here to establish the async queue-based
//! architecture of everything else we do.
//!
//! Based on previous Rust experience, you should be able to leave this code
//! unchanged for years.

use std::{future::Future, pin::Pin};

use futures::Stream;
use tokio::task::JoinHandle;

use crate::prelude::*;

pub mod blocking_iter_streams;
pub mod io;

/// A boxed, type-erased future.
pub type BoxedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// A boxed, type-erased stream.
pub type BoxedStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;

/// A handle to a background worker task, joined on shutdown.
///
/// Most of our work queues spawn a Tokio task to drive requests concurrently.
/// [`JoinWorker`] is a thin wrapper that lets callers wait for that task to
/// finish (propagating panics) without having to remember the exact
/// `JoinHandle` plumbing every time.
pub struct JoinWorker {
    handle: Option<JoinHandle<Result<()>>>,
}

impl JoinWorker {
    /// Wrap a [`JoinHandle`].
    pub fn from_handle(handle: JoinHandle<Result<()>>) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    /// A worker handle for code paths that have no background task to join.
    pub fn noop() -> Self {
        Self { handle: None }
    }

    /// Wait for the worker to finish.
    pub async fn join(mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => handle.await.context("worker task panicked")?,
            None => Ok(()),
        }
    }
}

/// Report any command failures.
pub fn check_for_command_failure(
    command_name: &str,
    status: std::process::ExitStatus,
) -> Result<()> {
    if status.success() {
        Ok(())
    } else if let Some(exit_code) = status.code() {
        Err(anyhow::anyhow!(
            "{} failed with exit code {}",
            command_name,
            exit_code
        ))
    } else {
        // Not all platforms have exit codes.
        Err(anyhow::anyhow!("{} failed", command_name))
    }
}
