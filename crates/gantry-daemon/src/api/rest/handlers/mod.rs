//! API request handlers

mod gates;
mod health;
mod runs;

pub use gates::*;
pub use health::*;
pub use runs::*;
