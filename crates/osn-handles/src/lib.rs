//! Recyclable integer handles for objects that live on the server side.
//!
//! [`IndexAllocator`] hands out the smallest free integer and takes released
//! ones back. [`ObjectRegistry`] builds on it to bind each handle to a tagged
//! object and to check the tag on every typed lookup.

mod error;
mod handle;
mod index;
mod registry;

pub use error::HandleError;
pub use handle::HandleValue;
pub use index::{FreeRange, HandleState, IndexAllocator};
pub use registry::{Identity, ObjectRegistry, Tagged};

/// Result type for handle operations.
pub type HandleResult<T> = Result<T, HandleError>;
