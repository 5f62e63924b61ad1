//! Store-facing traits implemented by `counter_storage`.

mod traits;

pub use traits::*;
