mod dependencies;
mod key;
mod normalize;
mod read;
mod record;
mod store;

pub use dependencies::*;
pub use key::*;
pub use normalize::*;
pub use read::*;
pub use record::*;
pub use store::*;
