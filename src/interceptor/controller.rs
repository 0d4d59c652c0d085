// SPDX-License-Identifier: Apache-2.0

//! Capture Controller
//!
//! Process-wide rendezvous between paused call sites and the external
//! controller that inspects them:
//! 1. Producers enqueue a [`PauseContext`] and wait on its resolution
//! 2. The consumer pops contexts in FIFO order, one "current" at a time
//! 3. The consumer resumes (optionally with an updated document) or aborts

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mongodb::bson::Document;
use parking_lot::Mutex;
use qoregate_core::{CancellationToken, EventChannel, GateError, GateResult, Phase};
use tracing::{debug, error, info, warn};

use super::types::{PauseContext, PauseKind, PendingResolution};
use crate::metrics;

const ABORT_REASON: &str = "Command capture aborted";
const DEACTIVATE_REASON: &str = "Command capture deactivated";

/// FIFO queue of paused commands plus the single context under inspection
pub struct CaptureController {
    capturing: AtomicBool,
    queue: Mutex<VecDeque<Arc<PauseContext>>>,
    current: Mutex<Option<Arc<PauseContext>>>,
    available: EventChannel<()>,
}

impl CaptureController {
    pub fn new() -> Self {
        Self {
            capturing: AtomicBool::new(false),
            queue: Mutex::new(VecDeque::new()),
            current: Mutex::new(None),
            available: EventChannel::new("context:available"),
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    // ==================== Lifecycle ====================

    pub fn start(&self) {
        debug!("Command capture start");
        let _queue = self.queue.lock();
        self.capturing.store(true, Ordering::SeqCst);
    }

    /// Stops capturing and resumes every pending context unchanged.
    ///
    /// Returns the number of contexts released.
    pub fn stop(&self) -> usize {
        debug!("Command capture stop");

        let mut released = 0;
        for context in self.halt() {
            warn!(
                context_id = %context.id(),
                session_id = %context.session_id(),
                kind = %context.kind(),
                "Stop called with pending pause context"
            );
            if context.resume(None) {
                metrics::record_resume();
                released += 1;
            }
        }
        released
    }

    /// Stops capturing and aborts every pending context.
    ///
    /// Returns the number of contexts aborted.
    pub fn abort(&self) -> usize {
        warn!("Command capture abort");
        self.abort_all(ABORT_REASON)
    }

    pub fn activate(&self) {
        info!("Interception activated");
        self.start();
    }

    /// Deactivation is fail-closed: anything still waiting is aborted.
    pub fn deactivate(&self) -> usize {
        info!("Interception deactivated");
        self.abort_all(DEACTIVATE_REASON)
    }

    fn abort_all(&self, reason: &str) -> usize {
        let mut aborted = 0;
        for context in self.halt() {
            if context.abort(reason) {
                debug!(context_id = %context.id(), reason, "Aborted pending pause context");
                metrics::record_abort();
                aborted += 1;
            }
        }
        aborted
    }

    /// Turns capture off and takes the current context followed by the
    /// queue, in FIFO order.
    ///
    /// The flag flips under the queue lock, so an `enqueue` either lands
    /// before the drain or sees capture off and resumes its own context.
    fn halt(&self) -> Vec<Arc<PauseContext>> {
        let queued: Vec<Arc<PauseContext>> = {
            let mut queue = self.queue.lock();
            self.capturing.store(false, Ordering::SeqCst);
            queue.drain(..).collect()
        };

        let mut drained: Vec<Arc<PauseContext>> = self.current.lock().take().into_iter().collect();
        drained.extend(queued);
        drained
    }

    // ==================== Producer side ====================

    /// Queues a command paused by a session gate.
    pub fn pause(
        &self,
        session_id: &str,
        phase: Phase,
        command: Document,
        prior_result: Option<Document>,
    ) -> PendingResolution {
        let (context, pending) =
            PauseContext::new(session_id, PauseKind::Phase(phase), command, prior_result);
        self.enqueue(context);
        pending
    }

    /// Appends a context to the queue and signals availability.
    ///
    /// A context arriving while capture is off is resumed on the spot.
    pub fn enqueue(&self, context: Arc<PauseContext>) {
        let depth = {
            let mut queue = self.queue.lock();
            if self.is_capturing() {
                queue.push_back(Arc::clone(&context));
                Some(queue.len())
            } else {
                None
            }
        };

        let Some(depth) = depth else {
            debug!(context_id = %context.id(), "Capture inactive, resuming immediately");
            context.resume(None);
            return;
        };

        debug!(
            context_id = %context.id(),
            session_id = %context.session_id(),
            kind = %context.kind(),
            queue_depth = depth,
            "Pause"
        );
        metrics::record_pause(depth);
        self.available.emit(());
    }

    // ==================== Consumer side ====================

    /// Returns the context to inspect next, waiting for one if necessary.
    ///
    /// The current context is returned again until it is settled.
    pub async fn wait_next_context(&self, token: &CancellationToken) -> GateResult<Arc<PauseContext>> {
        loop {
            // Subscribe before looking, so a push in between still wakes us.
            let listener = self.available.once();

            if let Some(context) = self.claim_next() {
                return Ok(context);
            }

            if let Err(err) = listener.wait(token).await {
                debug!("Wait for next context cancelled");
                return Err(err);
            }
        }
    }

    fn claim_next(&self) -> Option<Arc<PauseContext>> {
        let mut current = self.current.lock();
        if let Some(context) = current.as_ref() {
            if !context.is_settled() {
                return Some(Arc::clone(context));
            }
        }

        let mut queue = self.queue.lock();
        while let Some(context) = queue.pop_front() {
            if context.is_settled() {
                // Withdrawn by its producer while queued.
                continue;
            }
            *current = Some(Arc::clone(&context));
            return Some(context);
        }

        *current = None;
        None
    }

    /// Resumes the current context.
    pub fn resume(&self, updated: Option<Document>) -> GateResult<()> {
        let Some(context) = self.current.lock().take() else {
            error!("Resume called while no context is paused");
            return Err(GateError::NotPaused);
        };

        if context.resume(updated) {
            debug!(context_id = %context.id(), "Resume");
            metrics::record_resume();
        }
        self.signal_if_pending();
        Ok(())
    }

    /// Resumes a specific context, queued or current.
    pub fn resume_context(&self, context: &Arc<PauseContext>, updated: Option<Document>) -> bool {
        self.detach(context);
        let resumed = context.resume(updated);
        if resumed {
            debug!(context_id = %context.id(), "Resume");
            metrics::record_resume();
        }
        self.signal_if_pending();
        resumed
    }

    /// Aborts a specific context, queued or current.
    pub fn abort_context(&self, context: &Arc<PauseContext>, reason: &str) -> bool {
        self.detach(context);
        let aborted = context.abort(reason);
        if aborted {
            warn!(context_id = %context.id(), reason, "Abort");
            metrics::record_abort();
        }
        self.signal_if_pending();
        aborted
    }

    fn detach(&self, context: &Arc<PauseContext>) {
        let mut current = self.current.lock();
        if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, context)) {
            *current = None;
            return;
        }
        drop(current);

        self.queue.lock().retain(|queued| !Arc::ptr_eq(queued, context));
    }

    fn signal_if_pending(&self) {
        if !self.queue.lock().is_empty() {
            self.available.emit(());
        }
    }

    // ==================== Inspection ====================

    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn current(&self) -> Option<Arc<PauseContext>> {
        self.current.lock().clone()
    }

    /// Number of consumers currently waiting for a context.
    pub fn waiting_consumers(&self) -> usize {
        self.available.listener_count()
    }
}

impl Default for CaptureController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::types::Resolution;
    use mongodb::bson::doc;

    fn capturing() -> Arc<CaptureController> {
        let controller = Arc::new(CaptureController::new());
        controller.start();
        controller
    }

    #[tokio::test]
    async fn pop_order_is_fifo_across_sessions() {
        let controller = capturing();
        let token = CancellationToken::new();

        let _a = controller.pause("s1", Phase::Pre, doc! { "find": "a" }, None);
        let _b = controller.pause("s2", Phase::Pre, doc! { "find": "b" }, None);
        let _c = controller.pause("s1", Phase::Post, doc! { "find": "c" }, Some(doc! { "ok": 1 }));
        assert_eq!(controller.queue_len(), 3);

        for expected in ["a", "b", "c"] {
            let context = controller.wait_next_context(&token).await.expect("context");
            assert_eq!(context.command().get_str("find").unwrap(), expected);
            controller.resume(None).expect("resume");
        }
        assert_eq!(controller.queue_len(), 0);
        assert!(controller.current().is_none());
    }

    #[tokio::test]
    async fn current_is_returned_until_settled() {
        let controller = capturing();
        let token = CancellationToken::new();

        let _a = controller.pause("s1", Phase::Pre, doc! { "insert": "a" }, None);
        let _b = controller.pause("s1", Phase::Pre, doc! { "insert": "b" }, None);

        let first = controller.wait_next_context(&token).await.expect("first");
        let again = controller.wait_next_context(&token).await.expect("again");
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(controller.queue_len(), 1);
    }

    #[tokio::test]
    async fn resume_without_current_is_a_usage_fault() {
        let controller = capturing();
        assert_eq!(controller.resume(None), Err(GateError::NotPaused));
    }

    #[tokio::test]
    async fn resume_delivers_update_or_original() {
        let controller = capturing();
        let token = CancellationToken::new();

        let pending = controller.pause("s1", Phase::Post, doc! { "find": "a" }, Some(doc! { "n": 1 }));
        controller.wait_next_context(&token).await.expect("context");
        controller.resume(Some(doc! { "n": 2 })).expect("resume");
        assert_eq!(
            pending.wait(None).await,
            Ok(Resolution::Resumed(Some(doc! { "n": 2 })))
        );

        let pending = controller.pause("s1", Phase::Post, doc! { "find": "a" }, Some(doc! { "n": 1 }));
        controller.wait_next_context(&token).await.expect("context");
        controller.resume(None).expect("resume");
        assert_eq!(pending.wait(None).await, Ok(Resolution::Resumed(None)));
    }

    #[tokio::test]
    async fn stop_resumes_everything_in_order() {
        let controller = capturing();
        let token = CancellationToken::new();

        let pendings: Vec<_> = (0..4)
            .map(|i| controller.pause("s", Phase::Pre, doc! { "insert": i }, None))
            .collect();
        let claimed = controller.wait_next_context(&token).await.expect("claimed");
        assert_eq!(claimed.command().get_i32("insert").unwrap(), 0);

        assert_eq!(controller.stop(), 4);
        assert!(!controller.is_capturing());
        assert_eq!(controller.queue_len(), 0);
        assert!(controller.current().is_none());

        for pending in pendings {
            assert_eq!(pending.wait(None).await, Ok(Resolution::Resumed(None)));
        }
        assert_eq!(controller.stop(), 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn stop_wakes_producers_in_push_order() {
        let controller = capturing();
        let token = CancellationToken::new();
        let woken = Arc::new(Mutex::new(Vec::new()));

        let pendings: Vec<_> = (0..5)
            .map(|i| controller.pause("s", Phase::Pre, doc! { "insert": i }, None))
            .collect();
        // The head of the queue is under inspection when capture stops.
        controller.wait_next_context(&token).await.expect("claimed");

        let waiters: Vec<_> = pendings
            .into_iter()
            .enumerate()
            .map(|(i, pending)| {
                let woken = Arc::clone(&woken);
                tokio::spawn(async move {
                    let resolution = pending.wait(None).await;
                    woken.lock().push(i);
                    resolution
                })
            })
            .collect();
        tokio::task::yield_now().await;
        assert!(woken.lock().is_empty());

        assert_eq!(controller.stop(), 5);
        for waiter in waiters {
            assert_eq!(waiter.await.expect("join"), Ok(Resolution::Resumed(None)));
        }
        assert_eq!(*woken.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn enqueue_racing_stop_never_strands_a_context() {
        for _ in 0..500 {
            let controller = capturing();

            let producer = {
                let controller = Arc::clone(&controller);
                std::thread::spawn(move || {
                    controller.pause("s", Phase::Pre, doc! { "insert": 1 }, None)
                })
            };
            let stopper = {
                let controller = Arc::clone(&controller);
                std::thread::spawn(move || controller.stop())
            };

            let pending = producer.join().expect("producer");
            stopper.join().expect("stopper");

            // Either stop drained it or enqueue saw capture off; nothing stays queued.
            assert_eq!(controller.queue_len(), 0);
            assert!(pending.context().is_settled());
        }
    }

    #[tokio::test]
    async fn abort_rejects_everything() {
        let controller = capturing();

        let pendings: Vec<_> = (0..3)
            .map(|i| controller.pause("s", Phase::Pre, doc! { "delete": i }, None))
            .collect();

        assert_eq!(controller.abort(), 3);
        for pending in pendings {
            assert_eq!(
                pending.wait(None).await,
                Ok(Resolution::Aborted(ABORT_REASON.to_string()))
            );
        }
        assert_eq!(controller.abort(), 0);
    }

    #[tokio::test]
    async fn enqueue_while_inactive_resumes_immediately() {
        let controller = Arc::new(CaptureController::new());
        let pending = controller.pause("s", Phase::Pre, doc! { "find": "a" }, None);
        assert_eq!(controller.queue_len(), 0);
        assert_eq!(pending.wait(None).await, Ok(Resolution::Resumed(None)));
    }

    #[tokio::test]
    async fn abort_context_removes_it_from_the_queue() {
        let controller = capturing();
        let token = CancellationToken::new();

        let first = controller.pause("s", Phase::Pre, doc! { "find": "a" }, None);
        let _second = controller.pause("s", Phase::Pre, doc! { "find": "b" }, None);
        let context = Arc::clone(first.context());

        assert!(controller.abort_context(&context, "policy denied"));
        assert!(!controller.resume_context(&context, None));
        assert_eq!(controller.queue_len(), 1);
        assert_eq!(
            first.wait(None).await,
            Ok(Resolution::Aborted("policy denied".to_string()))
        );

        let next = controller.wait_next_context(&token).await.expect("next");
        assert_eq!(next.command().get_str("find").unwrap(), "b");
    }

    #[tokio::test]
    async fn withdrawn_contexts_are_skipped() {
        let controller = capturing();
        let token = CancellationToken::new();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let withdrawn = controller.pause("s", Phase::Pre, doc! { "find": "gone" }, None);
        assert_eq!(
            withdrawn.wait(Some(&cancel)).await,
            Err(GateError::OperationCancelled)
        );
        let _kept = controller.pause("s", Phase::Pre, doc! { "find": "kept" }, None);

        let next = controller.wait_next_context(&token).await.expect("next");
        assert_eq!(next.command().get_str("find").unwrap(), "kept");
    }

    #[tokio::test]
    async fn waiting_consumer_wakes_on_push() {
        let controller = capturing();
        let token = CancellationToken::new();

        let consumer = {
            let controller = Arc::clone(&controller);
            let token = token.clone();
            tokio::spawn(async move { controller.wait_next_context(&token).await })
        };

        tokio::task::yield_now().await;
        assert_eq!(controller.waiting_consumers(), 1);

        let _pending = controller.pause("s", Phase::Pre, doc! { "update": "orders" }, None);
        let context = consumer.await.expect("join").expect("context");
        assert_eq!(context.command().get_str("update").unwrap(), "orders");
        assert_eq!(controller.waiting_consumers(), 0);
    }

    #[tokio::test]
    async fn cancelled_wait_leaves_no_listener() {
        let controller = capturing();
        let token = CancellationToken::new();

        let consumer = {
            let controller = Arc::clone(&controller);
            let token = token.clone();
            tokio::spawn(async move { controller.wait_next_context(&token).await })
        };

        tokio::task::yield_now().await;
        assert_eq!(controller.waiting_consumers(), 1);

        token.cancel();
        let result = consumer.await.expect("join");
        assert_eq!(result.unwrap_err(), GateError::OperationCancelled);
        assert_eq!(controller.waiting_consumers(), 0);
    }
}
