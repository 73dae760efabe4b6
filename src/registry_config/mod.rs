// SPDX-License-Identifier: GPL-3.0-only
pub mod error;
pub mod parser;

pub use error::ParseError;
pub use parser::{parse, parse_inline};
