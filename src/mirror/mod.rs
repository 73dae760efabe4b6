// SPDX-License-Identifier: GPL-3.0-only
pub mod writer;

pub use writer::{MirrorWriter, WriteOutcome};
