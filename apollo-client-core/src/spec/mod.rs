mod field_type;
mod operation;
mod selection;

pub use field_type::*;
pub use operation::*;
pub use selection::*;
