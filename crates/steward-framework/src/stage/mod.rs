//! Built-in pipeline stages, in the order the runtime installs them.
//!
//! | stage            | consumes the message when                  |
//! |------------------|--------------------------------------------|
//! | [`DedupStage`]   | its id was already recorded                |
//! | [`QuoteStage`]   | never; parses a leading quote into state   |
//! | [`RecordStage`]  | never; appends to the history              |
//! | [`CommandStage`] | a command was handled or rate limited      |

mod command;
mod dedup;
mod quote;
mod record;

pub use command::{CommandStage, RouterSettings};
pub use dedup::DedupStage;
pub use quote::{QuoteStage, split_quote};
pub use record::RecordStage;
