//! Transactional components.
//!
//! A component is one independently persisted storage structure (a term
//! table, a B+Tree index, a counter) that takes part in coordinated
//! commit and abort through [`TransactionalComponent`].

mod blob;
mod cell;
mod counter;
mod id;
mod traits;

pub use blob::TransBlob;
pub use counter::TransCounter;
pub use id::ComponentId;
pub use traits::{ComponentSelector, TransactionalComponent};
