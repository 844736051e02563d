mod id;
mod introspection;
mod random;

pub use id::*;
pub use introspection::*;
pub use random::*;
