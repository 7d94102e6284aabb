//! Preprocessing stage for C source code
//!
//! Runs before tree-sitter sees a file:
//!
//! 1. **Conditional Evaluation** - Evaluate `#if` groups against the live
//!    macro table, track `#define`/`#undef`, enter `#include`s
//! 2. **Blanking** - Replace directive and inactive lines with spaces so the
//!    active text keeps the original offsets
//!
//! The resulting active text is handed to the declaration extractor.

mod conditionals;
pub mod expr;

pub use conditionals::{evaluate_conditionals, MacroSite, Preprocessed};
