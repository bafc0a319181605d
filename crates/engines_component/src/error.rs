//! Descriptor validation errors.

/// A descriptor or the implementors supplied for it do not line up.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DescriptorError {
    /// The number of implementors differs from the number of reference-backed builders.
    #[error("`{kind}` declares {expected} reference-backed builder(s) but {found} implementor(s) were supplied")]
    ImplementorCount {
        /// Descriptor name.
        kind: &'static str,
        /// Reference-backed builders declared by the descriptor.
        expected: usize,
        /// Implementors supplied by the caller.
        found: usize,
    },

    /// An implementor is not of the type its builder expects.
    #[error("`{kind}` view `{view}` expects an implementor of type `{expected}`, got `{found}`")]
    ImplementorType {
        /// Descriptor name.
        kind: &'static str,
        /// View built from the implementor.
        view: &'static str,
        /// Implementor type declared by the view.
        expected: &'static str,
        /// Implementor type actually supplied.
        found: &'static str,
    },

    /// The same view kind appears twice in one descriptor.
    #[error("`{kind}` declares view `{view}` more than once")]
    DuplicateView {
        /// Descriptor name.
        kind: &'static str,
        /// The repeated view.
        view: &'static str,
    },

    /// A descriptor declared no builders at all.
    #[error("`{kind}` declares no component builders")]
    NoBuilders {
        /// Descriptor name.
        kind: &'static str,
    },
}
