//! Lua filter pipeline.
//!
//! A user script is compiled once per run into a [`FilterScript`] and then
//! instantiated into one [`FilterContext`] per partition, so no interpreter
//! state is ever shared between workers. Evaluating a message yields a
//! [`Verdict`] and, in publish mode, the message the script wants published.
//!
//! Inside the script, `msg` holds the current message and three primitives
//! set the verdict flags:
//!
//! ```lua
//! if msg.value.type == "purchase" then
//!   msg.topic = "purchases"
//!   pass()
//!   commit()
//! end
//! ```

mod decode;
mod script;

use thiserror::Error;

pub use decode::MessageDecodeError;
pub use script::{FilterContext, FilterScript};

use crate::envelope::OutgoingMessage;

/// How messages cross the script boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterMode {
    /// Hand values to the script as plain strings instead of decoded JSON
    pub raw: bool,
    /// Decode the script's `msg` back into an outgoing message
    pub publish: bool,
}

/// Outcome flags set by the script. Every combination is meaningful.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Verdict {
    /// Deliver the message
    pub pass: bool,
    /// Make this the partition's last message
    pub stop: bool,
    /// Commit the group offset past this message
    pub commit: bool,
}

impl Verdict {
    /// What applies when no script is configured.
    pub fn pass_through() -> Self {
        Self {
            pass: true,
            stop: false,
            commit: false,
        }
    }
}

#[derive(Debug)]
pub struct Evaluation {
    pub verdict: Verdict,
    /// Present only in publish mode, and only when the verdict passes
    pub message: Option<OutgoingMessage>,
}

#[derive(Error, Debug)]
pub enum FilterError {
    #[error("filter script does not compile: {0}")]
    Compile(#[source] mlua::Error),
    #[error("failed to prepare filter runtime: {0}")]
    Runtime(#[source] mlua::Error),
    #[error("filter script failed on {topic}:{partition} at offset {offset}: {source}")]
    Execution {
        topic: String,
        partition: i32,
        offset: i64,
        #[source]
        source: mlua::Error,
    },
    #[error("filter produced an invalid message on {topic}:{partition} at offset {offset}: {source}")]
    InvalidMessage {
        topic: String,
        partition: i32,
        offset: i64,
        #[source]
        source: MessageDecodeError,
    },
}
