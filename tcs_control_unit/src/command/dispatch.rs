//! Pending-reply bookkeeping.
//!
//! Every command that does not finish on the spot leaves one pending
//! reply tied to a subsystem. The dispatcher guarantees each pending reply
//! is answered exactly once (or retired silently when its channel sends a
//! new command) and never more than one is open per channel.

use tcs_common::consts::MAX_CHANNELS;
use tcs_common::control_unit::state::{ResponseCode, Subsystem};
use tcs_common::time::Timestamp;
use static_assertions::const_assert;
use tracing::debug;

use super::channel::ChannelId;
use crate::error::ControlError;

// The pending table holds one entry per channel.
const_assert!(MAX_CHANNELS >= ChannelId::ALL.len());

/// What the pending reply waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The command that started the subsystem's current operation.
    Operation,
    /// A paddle nudge riding on someone else's operation.
    Nudge,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pending {
    pub channel: ChannelId,
    pub subsystem: Subsystem,
    pub role: Role,
    /// Command text, for logs.
    pub command: String,
    pub since: Timestamp,
}

/// One response line for one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub channel: ChannelId,
    pub code: ResponseCode,
    pub message: String,
}

impl Reply {
    /// Wire form: `<code> <message>`.
    pub fn line(&self) -> String {
        format!("{} {}", self.code.code(), self.message)
    }
}

#[derive(Debug, Default)]
pub struct Dispatcher {
    pending: heapless::Vec<Pending, MAX_CHANNELS>,
    outbox: Vec<Reply>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> &[Pending] {
        &self.pending
    }

    pub fn is_pending(&self, channel: ChannelId) -> bool {
        self.pending.iter().any(|p| p.channel == channel)
    }

    /// Channel owning the current operation of `subsystem`.
    pub fn owner(&self, subsystem: Subsystem) -> Option<ChannelId> {
        self.pending
            .iter()
            .find(|p| p.subsystem == subsystem && p.role == Role::Operation)
            .map(|p| p.channel)
    }

    /// Replies produced since the last call.
    pub fn take_replies(&mut self) -> Vec<Reply> {
        std::mem::take(&mut self.outbox)
    }

    /// Queue a reply for a channel.
    pub fn reply(&mut self, channel: ChannelId, code: ResponseCode, message: impl Into<String>) {
        let message = message.into();
        debug!(%channel, code = code.code(), %message, "reply");
        self.outbox.push(Reply {
            channel,
            code,
            message,
        });
    }

    /// Drop a channel's pending reply without answering it.
    pub fn retire(&mut self, channel: ChannelId) {
        self.pending.retain(|p| p.channel != channel);
    }

    /// Record a new pending reply. A new operation supersedes everyone
    /// else waiting on the same subsystem.
    pub fn begin(
        &mut self,
        channel: ChannelId,
        subsystem: Subsystem,
        role: Role,
        command: &str,
        now: Timestamp,
    ) {
        self.retire(channel);
        if role == Role::Operation {
            self.answer_where(
                |p| p.subsystem == subsystem,
                ResponseCode::Interrupted,
                &format!("superseded by {channel}"),
            );
        }
        let pending = Pending {
            channel,
            subsystem,
            role,
            command: command.to_string(),
            since: now,
        };
        // One entry per channel at most; capacity is one per channel.
        let _ = self.pending.push(pending);
    }

    /// Operation finished: the owner gets `0`. Nudges stay pending.
    pub fn complete(&mut self, subsystem: Subsystem, message: &str) {
        self.answer_where(
            |p| p.subsystem == subsystem && p.role == Role::Operation,
            ResponseCode::Ok,
            message,
        );
    }

    /// Non-terminal progress for the owner.
    pub fn progress(&mut self, subsystem: Subsystem, message: &str) {
        if let Some(channel) = self.owner(subsystem) {
            self.reply(channel, ResponseCode::Progress, message);
        }
    }

    /// Operation aborted: the owner gets the failure code, everyone else
    /// waiting on the subsystem is interrupted.
    pub fn fail(&mut self, subsystem: Subsystem, error: &ControlError) {
        let message = error.to_string();
        self.answer_where(
            |p| p.subsystem == subsystem && p.role == Role::Operation,
            error.response_code(),
            &message,
        );
        self.interrupt(subsystem, &message);
    }

    /// Interrupt every reply pending on `subsystem`.
    pub fn interrupt(&mut self, subsystem: Subsystem, reason: &str) {
        self.answer_where(|p| p.subsystem == subsystem, ResponseCode::Interrupted, reason);
    }

    pub fn interrupt_all(&mut self, reason: &str) {
        self.answer_where(|_| true, ResponseCode::Interrupted, reason);
    }

    /// Hardware fault: every pending reply fails with `-6`.
    pub fn hardware_fault(&mut self, message: &str) {
        self.answer_where(|_| true, ResponseCode::HardwareError, message);
    }

    /// `stop` from `channel`: it gets `0`, others waiting on the stopped
    /// subsystems are interrupted.
    pub fn stop(&mut self, channel: ChannelId, subsystems: &[Subsystem]) {
        self.retire(channel);
        self.answer_where(
            |p| subsystems.contains(&p.subsystem),
            ResponseCode::Interrupted,
            &format!("stopped by {channel}"),
        );
        self.reply(channel, ResponseCode::Ok, "stopped");
    }

    fn answer_where(&mut self, mut pred: impl FnMut(&Pending) -> bool, code: ResponseCode, message: &str) {
        let mut i = 0;
        while i < self.pending.len() {
            if pred(&self.pending[i]) {
                let p = self.pending.swap_remove(i);
                debug!(channel = %p.channel, command = %p.command, "pending reply answered");
                self.reply(p.channel, code, message);
            } else {
                i += 1;
            }
        }
    }
}
