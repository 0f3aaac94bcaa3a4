//! Local command queue - commands issued between two submission ticks

use crate::types::{Command, EntityId, Input, InputBatch};
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};

/// Handle for issuing commands from input handling code, possibly on another thread
#[derive(Clone)]
pub struct CommandSender {
    sender: Sender<Input>,
}

impl CommandSender {
    /// Queue a command for the selected entities
    pub fn enqueue(&self, command: Command, selection: &[EntityId]) {
        let kind = command.kind;
        // The driver owns the receiver; a send only fails after it was dropped.
        if self.sender.send(Input::new(command, selection.to_vec())).is_err() {
            tracing::debug!("Command queue closed, dropping {:?}", kind);
        }
    }
}

/// Commands accumulated locally until the next step boundary
pub struct LocalCommandQueue {
    sender: Sender<Input>,
    receiver: Receiver<Input>,
}

impl LocalCommandQueue {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    /// Get a sender for issuing commands
    pub fn sender(&self) -> CommandSender {
        CommandSender {
            sender: self.sender.clone(),
        }
    }

    pub fn enqueue(&self, command: Command, selection: &[EntityId]) {
        self.sender().enqueue(command, selection);
    }

    /// Take everything queued so far, in issue order
    pub fn drain(&self) -> InputBatch {
        let mut inputs = Vec::new();
        loop {
            match self.receiver.try_recv() {
                Ok(input) => inputs.push(input),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        InputBatch { inputs }
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Discard queued commands
    pub fn clear(&self) {
        while self.receiver.try_recv().is_ok() {}
    }
}

impl Default for LocalCommandQueue {
    fn default() -> Self {
        Self::new()
    }
}
