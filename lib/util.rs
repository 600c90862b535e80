mod assume;

pub use assume::*;
