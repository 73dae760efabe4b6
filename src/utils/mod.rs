// SPDX-License-Identifier: GPL-3.0-only
pub mod path_sanitizer;

pub use path_sanitizer::{is_staging_name, validate_node_name};
