//! Ordered, single-threaded fan-out of listener registration and
//! notification events.
//!
//! All registration and notification traffic funnels through one
//! `crossbeam_channel` drained by a single dispatcher thread, so listeners
//! observe events in publish order and a removal is never raced by a
//! notification sent before it but processed after. `hdrhistogram` itself
//! reaches for the same crate for its internal recorder/reader handoff,
//! which is the reason it is already a dependency of this workspace.

use std::sync::Weak;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;

use super::PauseListener;

pub(super) enum Command {
    AddListener {
        id: u64,
        listener: Weak<dyn PauseListener>,
        high_priority: bool,
    },
    RemoveListener {
        id: u64,
    },
    Notify {
        length_nanos: u64,
        end_time_nanos: u64,
    },
    Shutdown,
}

struct Registered {
    id: u64,
    listener: Weak<dyn PauseListener>,
}

fn run(receiver: crossbeam_channel::Receiver<Command>) {
    let mut high: Vec<Registered> = Vec::new();
    let mut normal: Vec<Registered> = Vec::new();

    for command in receiver {
        match command {
            Command::AddListener {
                id,
                listener,
                high_priority,
            } => {
                let target = if high_priority { &mut high } else { &mut normal };
                target.push(Registered { id, listener });
            }
            Command::RemoveListener { id } => {
                high.retain(|r| r.id != id);
                normal.retain(|r| r.id != id);
            }
            Command::Notify {
                length_nanos,
                end_time_nanos,
            } => {
                for list in [&mut high, &mut normal] {
                    list.retain(|r| match r.listener.upgrade() {
                        Some(listener) => {
                            listener.on_pause(length_nanos, end_time_nanos);
                            true
                        }
                        None => false,
                    });
                }
            }
            Command::Shutdown => break,
        }
    }
}

/// Owns the dispatcher thread and the channel feeding it.
pub(super) struct Dispatcher {
    sender: Sender<Command>,
    join: Mutex<Option<JoinHandle<()>>>,
    next_id: std::sync::atomic::AtomicU64,
}

impl Dispatcher {
    pub(super) fn new() -> Self {
        let (sender, receiver) = unbounded();
        let join = std::thread::Builder::new()
            .name("lrec-pause-dispatch".into())
            .spawn(move || run(receiver))
            .expect("failed to spawn pause dispatcher thread");

        Dispatcher {
            sender,
            join: Mutex::new(Some(join)),
            next_id: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub(super) fn sender(&self) -> Sender<Command> {
        self.sender.clone()
    }

    pub(super) fn add_listener(
        &self,
        listener: Weak<dyn PauseListener>,
        high_priority: bool,
    ) -> u64 {
        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let _ = self.sender.send(Command::AddListener {
            id,
            listener,
            high_priority,
        });
        id
    }

    pub(super) fn remove_listener(&self, id: u64) {
        let _ = self.sender.send(Command::RemoveListener { id });
    }

    pub(super) fn notify(&self, length_nanos: u64, end_time_nanos: u64) {
        let _ = self.sender.send(Command::Notify {
            length_nanos,
            end_time_nanos,
        });
    }

    pub(super) fn shutdown(&self) {
        let _ = self.sender.send(Command::Shutdown);
        if let Some(join) = self.join.lock().take() {
            let _ = join.join();
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
