//! Handle types
//!
//! Handles are opaque, process-local, non-zero integers. Two processes may
//! hold numerically equal handles referring to unrelated server-side state;
//! the correlation table keys on (handle, owning pid) for that reason.

use std::num::NonZeroU32;

/// The five kinds of client-visible references
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKind {
    Directory,
    Node,
    Record,
    AttrList,
    AttrValueList,
}

impl RefKind {
    /// The kind a parent handle must have, where one is required
    pub fn parent_kind(self) -> Option<RefKind> {
        match self {
            RefKind::Directory => None,
            RefKind::Node => Some(RefKind::Directory),
            RefKind::Record => Some(RefKind::Node),
            RefKind::AttrList => Some(RefKind::Node),
            RefKind::AttrValueList => Some(RefKind::AttrList),
        }
    }
}

macro_rules! reference {
    ($(#[$doc:meta])* $name:ident, $kind:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub(crate) u32);

        impl $name {
            pub const KIND: RefKind = $kind;

            /// Rewrap a raw handle value; for stub layers that carried the
            /// handle through a foreign interface. The value is only
            /// meaningful in the process that issued it.
            pub fn from_raw(raw: u32) -> Self {
                Self(raw)
            }

            pub fn raw(self) -> u32 {
                self.0
            }
        }
    };
}

reference!(
    /// A directory-session reference
    DirRef,
    RefKind::Directory
);
reference!(
    /// A directory-node reference
    NodeRef,
    RefKind::Node
);
reference!(
    /// An open-record reference
    RecordRef,
    RefKind::Record
);
reference!(
    /// An attribute-list reference
    AttrListRef,
    RefKind::AttrList
);
reference!(
    /// An attribute-value-list reference
    AttrValueListRef,
    RefKind::AttrValueList
);

/// Opaque cursor for resuming a paginated listing call
///
/// Zero on the wire means "no more data"; the type makes that sentinel
/// unrepresentable, so an in-hand token is always resumable or releasable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContinuationToken(NonZeroU32);

impl ContinuationToken {
    pub(crate) fn from_wire(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    pub fn raw(self) -> u32 {
        self.0.get()
    }
}

/// Pattern-match selector for node and record listing calls
///
/// The fixed node-set kinds carry no pattern list on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PatternMatch {
    Exact = 1,
    StartsWith = 2,
    EndsWith = 3,
    Contains = 4,
    /// Fixed set: nodes hosted by the local machine; no pattern is sent
    LocalNodes = 100,
}

impl PatternMatch {
    /// True for the fixed-set kinds that take no caller pattern
    pub fn is_fixed_set(self) -> bool {
        matches!(self, PatternMatch::LocalNodes)
    }
}
