#![allow(clippy::collapsible_if)]
#![cfg_attr(test, recursion_limit = "1024")]

/// Chess domain types.
pub mod chess;
/// Static position evaluation.
pub mod eval;
/// Minimax searching algorithm.
pub mod search;
/// Syzygy tablebase probing.
pub mod syzygy;
/// UCI protocol.
pub mod uci;
/// Assorted utilities.
pub mod util;
