//! Delivery of resolved notifications to listeners.

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, error, warn};

use super::resolve::Notification;

/// Where listeners run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DispatchMode {
    /// On the committing thread, before `commit` returns.
    ///
    /// Listeners run while the tree's commit lock is held, so a listener
    /// committing to the same tree gets [`DataTreeError::IllegalState`]
    /// instead of the commit. Use [`DispatchMode::Queued`] for listeners
    /// that write back.
    ///
    /// [`DataTreeError::IllegalState`]: crate::tree::DataTreeError::IllegalState
    #[default]
    Inline,
    /// On a dedicated notification thread, in commit order. Commits do not
    /// wait for listeners; [`DataTree::flush_notifications`] does.
    ///
    /// [`DataTree::flush_notifications`]: crate::tree::DataTree::flush_notifications
    Queued,
}

thread_local! {
    /// Dispatchers currently delivering inline on this thread.
    static DELIVERING: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

enum Message {
    Notify(Vec<Notification>),
    Flush(Sender<()>),
}

pub(crate) struct Dispatcher {
    queue: Option<Queue>,
}

struct Queue {
    sender: Option<Sender<Message>>,
    worker: Option<JoinHandle<()>>,
}

impl Dispatcher {
    pub(crate) fn new(mode: DispatchMode, name: &str) -> Self {
        let queue = match mode {
            DispatchMode::Inline => None,
            DispatchMode::Queued => {
                let (sender, receiver) = crossbeam_channel::unbounded();
                match thread::Builder::new()
                    .name(format!("{name}-listeners"))
                    .spawn(move || run(receiver))
                {
                    Ok(worker) => Some(Queue {
                        sender: Some(sender),
                        worker: Some(worker),
                    }),
                    Err(error) => {
                        warn!(tree = %name, %error, "failed to spawn notification thread, delivering inline");
                        None
                    }
                }
            }
        };
        Dispatcher { queue }
    }

    pub(crate) fn dispatch(&self, notifications: Vec<Notification>) {
        if notifications.is_empty() {
            return;
        }
        let Some(sender) = self.queue.as_ref().and_then(|queue| queue.sender.as_ref()) else {
            self.deliver_inline(notifications);
            return;
        };
        if let Err(crossbeam_channel::SendError(message)) = sender.send(Message::Notify(notifications)) {
            error!("notification thread is gone, delivering inline");
            if let Message::Notify(notifications) = message {
                self.deliver_inline(notifications);
            }
        }
    }

    /// Whether the current thread is inside a listener this dispatcher is
    /// running inline.
    pub(crate) fn is_delivering_inline(&self) -> bool {
        let id = self.id();
        DELIVERING.with(|delivering| delivering.borrow().contains(&id))
    }

    fn deliver_inline(&self, notifications: Vec<Notification>) {
        let id = self.id();
        DELIVERING.with(|delivering| delivering.borrow_mut().push(id));
        deliver(notifications);
        DELIVERING.with(|delivering| delivering.borrow_mut().pop());
    }

    fn id(&self) -> usize {
        self as *const Dispatcher as usize
    }

    /// Waits until everything dispatched so far was delivered.
    pub(crate) fn flush(&self) {
        let Some(queue) = &self.queue else {
            return;
        };
        if queue.is_worker_thread() {
            debug!("flush requested from a listener, skipped");
            return;
        }
        let Some(sender) = &queue.sender else {
            return;
        };
        let (done, wait) = crossbeam_channel::bounded(1);
        if sender.send(Message::Flush(done)).is_ok() {
            let _ = wait.recv();
        }
    }
}

impl Queue {
    fn is_worker_thread(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| worker.thread().id() == thread::current().id())
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        let Some(queue) = &mut self.queue else {
            return;
        };
        // Closing the channel lets the worker drain what is queued and exit.
        queue.sender.take();
        if queue.is_worker_thread() {
            return;
        }
        if let Some(worker) = queue.worker.take() {
            if worker.join().is_err() {
                error!("notification thread panicked");
            }
        }
    }
}

fn run(receiver: Receiver<Message>) {
    for message in receiver {
        match message {
            Message::Notify(notifications) => deliver(notifications),
            Message::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

fn deliver(notifications: Vec<Notification>) {
    for notification in notifications {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            notification.listener.on_data_changed(&notification.event)
        }));
        if result.is_err() {
            error!(scope = %notification.event.scope(), "data change listener panicked");
        }
    }
}
