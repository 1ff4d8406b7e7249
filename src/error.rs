//! Errors raised when a builder is misused.

/// Misuse of a [`MapBuilder`](crate::map::MapBuilder) or a [`SubsetDeduper`](crate::dedup::SubsetDeduper).
///
/// Every error is detected eagerly at the point of misuse. A builder that has returned an error
/// should not be relied upon afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, derive_more::Display)]
pub enum Error {
    /// A map key is not part of the universe.
    #[display(fmt = "key is not in the universe")]
    InvalidKey,

    /// A subset element is not part of the universe.
    #[display(fmt = "element is not in the universe")]
    InvalidElement,

    /// A missing value was produced where a present one is required.
    #[display(fmt = "missing value supplier produced no value")]
    InvalidValue,

    /// The builder has already been consumed by a build.
    #[display(fmt = "builder has already been built")]
    AlreadyBuilt,

    /// A builder or completion token was used with a deduper it does not belong to.
    #[display(fmt = "builder or completion token belongs to another deduper")]
    WrongOwner,

    /// The lockstep add/finish protocol was broken.
    ///
    /// `index` is the universe index the caller tried to use, `open` the one currently open (if
    /// any).
    #[display(fmt = "protocol violation at index {:?} (open: {:?})", index, open)]
    ProtocolViolation {
        /// The index the caller referred to.
        index: Option<usize>,
        /// The index currently open, if any.
        open: Option<usize>,
    },
}

impl std::error::Error for Error {}

impl Error {
    /// Whether the error is one of the protocol violations.
    #[must_use]
    pub const fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::ProtocolViolation { .. })
    }
}
