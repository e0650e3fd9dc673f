use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// FIFO slot queue that serializes mutators and groups concurrent readers.
///
/// The queue holds two kinds of slots: writer slots (exclusive; writers in
/// one slot still run one at a time, in arrival order) and reader slots (a
/// shared counter; every reader of one slot runs concurrently once the slot
/// reaches the head). A caller whose kind matches the tail slot joins it,
/// otherwise a new slot is appended, so arrival order between reader groups
/// and writers is preserved: a reader enqueued after a writer observes that
/// writer's effects.
///
/// Guards release on drop, so an operation that returns early with an error
/// unblocks the next slot through the normal path. Dropping a pending
/// acquire future while it waits is not supported (there is no cancellation
/// of queued work); the queue tolerates it by skipping dead waiters at
/// grant time.
#[derive(Clone, Default)]
pub struct AccessQueue {
    state: Arc<Mutex<QueueState>>,
}

#[derive(Default)]
struct QueueState {
    slots: VecDeque<Slot>,
}

enum Slot {
    Readers {
        waiting: Vec<oneshot::Sender<()>>,
        running: usize,
        admitted: bool,
    },
    Writers {
        waiting: VecDeque<oneshot::Sender<()>>,
        active: bool,
    },
}

impl AccessQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire a shared slot. Resolves once every earlier writer slot has
    /// drained; all readers of one slot run concurrently.
    pub async fn acquire_read(&self) -> ReadGuard {
        let rx = {
            let mut st = self.state.lock().unwrap();
            match st.slots.back_mut() {
                Some(Slot::Readers {
                    waiting,
                    running,
                    admitted,
                }) => {
                    if *admitted {
                        // The tail is also the head and already running.
                        *running += 1;
                        None
                    } else {
                        let (tx, rx) = oneshot::channel();
                        waiting.push(tx);
                        Some(rx)
                    }
                }
                _ => {
                    if st.slots.is_empty() {
                        st.slots.push_back(Slot::Readers {
                            waiting: Vec::new(),
                            running: 1,
                            admitted: true,
                        });
                        None
                    } else {
                        let (tx, rx) = oneshot::channel();
                        st.slots.push_back(Slot::Readers {
                            waiting: vec![tx],
                            running: 0,
                            admitted: false,
                        });
                        Some(rx)
                    }
                }
            }
        };
        if let Some(rx) = rx {
            let _ = rx.await;
        }
        ReadGuard {
            state: self.state.clone(),
        }
    }

    /// Acquire the exclusive slot. Writers complete strictly in arrival
    /// order, never concurrently with each other or with readers.
    pub async fn acquire_write(&self) -> WriteGuard {
        let rx = {
            let mut st = self.state.lock().unwrap();
            match st.slots.back_mut() {
                Some(Slot::Writers { waiting, .. }) => {
                    let (tx, rx) = oneshot::channel();
                    waiting.push_back(tx);
                    Some(rx)
                }
                _ => {
                    if st.slots.is_empty() {
                        st.slots.push_back(Slot::Writers {
                            waiting: VecDeque::new(),
                            active: true,
                        });
                        None
                    } else {
                        let (tx, rx) = oneshot::channel();
                        let mut waiting = VecDeque::new();
                        waiting.push_back(tx);
                        st.slots.push_back(Slot::Writers {
                            waiting,
                            active: false,
                        });
                        Some(rx)
                    }
                }
            }
        };
        if let Some(rx) = rx {
            let _ = rx.await;
        }
        WriteGuard {
            state: self.state.clone(),
        }
    }

    /// Run `fut` inside an exclusive slot.
    pub async fn run_with_mutex<F, T>(&self, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let _guard = self.acquire_write().await;
        fut.await
    }

    /// Run `fut` inside a shared slot.
    pub async fn run_read_only<F, T>(&self, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let _guard = self.acquire_read().await;
        fut.await
    }
}

/// Advance the queue head after a slot drained, skipping waiters whose
/// receiving future has been dropped.
fn advance(st: &mut QueueState) {
    loop {
        let settled = match st.slots.front_mut() {
            None => true,
            Some(Slot::Readers {
                waiting,
                running,
                admitted,
            }) => {
                *admitted = true;
                for tx in waiting.drain(..) {
                    if tx.send(()).is_ok() {
                        *running += 1;
                    }
                }
                if *running == 0 {
                    st.slots.pop_front();
                    false
                } else {
                    true
                }
            }
            Some(Slot::Writers { waiting, active }) => {
                let mut granted = false;
                while let Some(tx) = waiting.pop_front() {
                    if tx.send(()).is_ok() {
                        *active = true;
                        granted = true;
                        break;
                    }
                }
                if granted {
                    true
                } else {
                    st.slots.pop_front();
                    false
                }
            }
        };
        if settled {
            break;
        }
    }
}

pub struct ReadGuard {
    state: Arc<Mutex<QueueState>>,
}

impl Drop for ReadGuard {
    fn drop(&mut self) {
        let mut st = self.state.lock().unwrap();
        if let Some(Slot::Readers {
            waiting,
            running,
            admitted,
        }) = st.slots.front_mut()
        {
            *running -= 1;
            if *running == 0 && waiting.is_empty() && *admitted {
                st.slots.pop_front();
                advance(&mut st);
            }
        }
    }
}

pub struct WriteGuard {
    state: Arc<Mutex<QueueState>>,
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        let mut st = self.state.lock().unwrap();
        if let Some(Slot::Writers { waiting, active }) = st.slots.front_mut() {
            *active = false;
            let mut granted = false;
            while let Some(tx) = waiting.pop_front() {
                if tx.send(()).is_ok() {
                    *active = true;
                    granted = true;
                    break;
                }
            }
            if !granted {
                st.slots.pop_front();
                advance(&mut st);
            }
        }
    }
}
