//! # Domain Layer
//!
//! Fork tree, head selection and the sync queries over the combined chain.
//! Nothing here locks; the service layer owns synchronization.

pub mod errors;
pub mod fork_item;
pub mod fork_tree;
pub mod head_policy;
pub mod synopsis;

pub use errors::*;
pub use fork_item::*;
pub use fork_tree::*;
pub use head_policy::*;
pub use synopsis::*;
