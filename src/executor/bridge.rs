//! Async topic bridge
//!
//! Adapts callback-style topic functions to the scheduler: the function runs
//! as its own task and the instance waits on a [`PendingTopic`] until the
//! callback fires.

use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::{oneshot, Semaphore};
use tracing::debug;

use crate::models::{
    CallbackTopicFn, ContextHandle, ErrorRecord, Failure, Outcome, Topic, TopicArgs,
};

type Slot = Arc<Mutex<Option<oneshot::Sender<Outcome<Topic>>>>>;

/// Callback handed to a callback-style topic function
///
/// Only the first invocation resumes the waiting context; later ones are
/// ignored. Dropping every clone without invoking it fails the topic.
#[derive(Clone, Debug)]
pub struct TopicCallback {
    slot: Slot,
}

impl TopicCallback {
    fn new(sender: oneshot::Sender<Outcome<Topic>>) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(sender))),
        }
    }

    /// Deliver the topic; returns false if the callback already fired
    pub fn resolve(&self, topic: impl Into<Topic>) -> bool {
        self.complete(Ok(topic.into()))
    }

    pub fn fail(&self, failure: Failure) -> bool {
        self.complete(Err(failure))
    }

    pub fn complete(&self, outcome: Outcome<Topic>) -> bool {
        match self.slot.lock().take() {
            Some(sender) => sender.send(outcome).is_ok(),
            None => false,
        }
    }
}

/// Topic whose value arrives through a [`TopicCallback`]
#[derive(Debug)]
pub struct PendingTopic {
    receiver: oneshot::Receiver<Outcome<Topic>>,
}

impl PendingTopic {
    /// Suspend until the callback fires
    pub async fn wait(self) -> Outcome<Topic> {
        match self.receiver.await {
            Ok(outcome) => outcome,
            Err(_) => Err(Failure::error(
                "CallbackDropped",
                "async topic callback dropped without being invoked",
            )),
        }
    }
}

/// Start a callback-style topic as a concurrent unit
///
/// The topic function holds a permit of `pool` while it runs; waiting for the
/// callback holds none.
pub fn spawn_callback_topic(
    topic: CallbackTopicFn,
    handle: ContextHandle,
    args: TopicArgs,
    pool: Arc<Semaphore>,
) -> PendingTopic {
    let (sender, receiver) = oneshot::channel();
    let callback = TopicCallback::new(sender);
    let guard = callback.clone();

    debug!("Waiting on async topic for {}", handle.id());
    tokio::spawn(async move {
        let permit = pool.acquire_owned().await.ok();
        let call = panic::catch_unwind(AssertUnwindSafe(|| topic(handle, args, callback)));
        drop(permit);
        if let Err(payload) = call {
            guard.fail(Failure::Error(ErrorRecord::from_panic(payload)));
        }
    });

    PendingTopic { receiver }
}
