mod championship;
mod class_limit;
mod document;
mod mutation;
mod roster_entry;

pub use championship::*;
pub use class_limit::*;
pub use document::*;
pub use mutation::*;
pub use roster_entry::*;
