use core::fmt;

/// Result alias for `betula`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the CF-tree and its derived structures.
///
/// Internal invariant violations (an empty node where a child is assumed, a
/// condensation pass that fails to shrink the tree) are *not* represented
/// here: those are logic defects and panic instead of degrading silently.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Operation requires a built tree, but nothing was inserted yet.
    EmptyTree,

    /// Point dimensionality does not match the tree.
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Found dimension.
        found: usize,
    },

    /// Invalid parameter value.
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// Error message.
        message: &'static str,
    },

    /// Too many leaves for a pairwise distance matrix.
    MatrixTooLarge {
        /// Number of leaves requested.
        leaves: usize,
        /// Hard upper bound.
        max: usize,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::EmptyTree => write!(f, "tree is empty, insert points first"),
            Error::DimensionMismatch { expected, found } => {
                write!(f, "dimension mismatch: expected {expected}, found {found}")
            }
            Error::InvalidParameter { name, message } => {
                write!(f, "invalid parameter '{name}': {message}")
            }
            Error::MatrixTooLarge { leaves, max } => {
                write!(
                    f,
                    "cannot build a pairwise distance matrix over {leaves} leaves (limit {max})"
                )
            }
        }
    }
}

impl std::error::Error for Error {}
