//! Domain model module declarations.

pub mod chunk;
pub mod cycle;
pub mod message;
