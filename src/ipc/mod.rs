// Cross-process command/status channel
// A pair of single-slot file mailboxes: commands flow controller -> host
// bridge (destructively consumed), status flows back (overwritten in place)

pub mod mailbox;
pub mod messages;

pub use mailbox::{ChannelError, ChannelHealth, CommandMailbox, StatusFile};
pub use messages::{Command, Status};
