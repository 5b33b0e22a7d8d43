mod header;
mod typeinfo;

pub use header::{ArrayHeader, Header, OBJECT_ALIGNMENT};
pub use typeinfo::{FinalizeFn, TraceFn, TypeFlags, TypeInfo};
