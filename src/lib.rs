#![doc = include_str!("../README.md")]

pub mod data;
pub mod listener;
pub mod path;
pub mod prelude;
pub mod schema;
pub mod tree;
pub mod value;
