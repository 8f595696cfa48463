#[macro_use]
pub mod macros;

pub mod handle_shared;
pub mod is_null;
pub mod out;
