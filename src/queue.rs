//! The hand-off point between the engine and the host's task queues.
//!
//! Watchers flushed at `Pre` or `Post` do not run inside the write that
//! triggered them; their jobs are parked here until the embedder decides the
//! batch is over and calls [`flush_pre_jobs`] / [`flush_post_jobs`]. The
//! engine never drains these queues on its own.

use std::{cell::RefCell, collections::VecDeque, rc::Rc};

thread_local! {
    static PRE_JOBS: RefCell<VecDeque<Rc<dyn Fn()>>> = Default::default();
    static POST_JOBS: RefCell<VecDeque<Rc<dyn Fn()>>> = Default::default();
}

pub(crate) fn queue_pre_job(job: Rc<dyn Fn()>) {
    PRE_JOBS.with(|jobs| jobs.borrow_mut().push_back(job));
}

pub(crate) fn queue_post_job(job: Rc<dyn Fn()>) {
    POST_JOBS.with(|jobs| jobs.borrow_mut().push_back(job));
}

fn drain(jobs: &RefCell<VecDeque<Rc<dyn Fn()>>>) {
    // a job may enqueue further jobs; keep popping until the queue is dry.
    // popping before invoking means a panicking job forfeits only itself.
    loop {
        let next = jobs.borrow_mut().pop_front();
        match next {
            Some(job) => job(),
            None => break,
        }
    }
}

/// Runs all queued pre-flush watcher jobs, FIFO.
pub fn flush_pre_jobs() {
    PRE_JOBS.with(drain);
}

/// Runs all queued post-flush watcher jobs, FIFO.
pub fn flush_post_jobs() {
    POST_JOBS.with(drain);
}
