// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Analysis options.

/// Knobs that change how the graphs are built and solved. There is no
/// command-line layer here; embedders construct this directly.
#[derive(Clone, Debug)]
pub struct AnalysisOptions {
    /// When true, an unmodelled address value produces an Addr edge from the
    /// black-hole object; otherwise a Copy edge from the null pointer.
    pub hand_black_hole: bool,
    /// Treat the field at offset zero as the base object itself instead of
    /// materialising a distinct field node.
    pub first_field_eq_base: bool,
    /// Upper bound on per-object field expansion. Object-specific limits are
    /// clamped to this value.
    pub max_field_limit: u32,
    /// Bound on the number of outer solver iterations. `None` means iterate
    /// to fixpoint; callers that need a deadline set a bound and check
    /// [`crate::pta::BvDataPta::converged`] afterwards.
    pub max_iterations: Option<usize>,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        AnalysisOptions {
            hand_black_hole: false,
            first_field_eq_base: false,
            max_field_limit: 512,
            max_iterations: None,
        }
    }
}
