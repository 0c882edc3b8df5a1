// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identifier newtypes.
//!
//! Every id in Hermod is a [`smol_str::SmolStr`] newtype. Control-plane
//! names (workflows, nodes, endpoints) arrive as arbitrary strings; ids the
//! engine mints itself (messages, approvals, outbox items) are generated as
//! `{prefix}{nanoid}` and sized to stay within `SmolStr`'s inline capacity,
//! so the hot path clones them without allocating.

use smol_str::SmolStr;

/// Random suffix length for generated ids. A 4-char prefix plus 19 nanoid
/// chars is 23 bytes, the largest string `SmolStr` stores inline.
pub const GENERATED_SUFFIX_LEN: usize = 19;

/// Define a `SmolStr` id newtype.
///
/// The bare form covers control-plane-assigned names. The `("pfx-")` form
/// additionally gives the type a `generate()` constructor for ids minted by
/// the execution plane.
#[macro_export]
macro_rules! define_name_id {
    (
        $(#[$meta:meta])*
        pub struct $name:ident;
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub smol_str::SmolStr);

        impl $name {
            pub fn new(s: impl AsRef<str>) -> Self {
                Self(smol_str::SmolStr::new(s.as_ref()))
            }

            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(smol_str::SmolStr::new(&s))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.0.as_str()
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                self.0.as_str()
            }
        }
    };
    (
        $(#[$meta:meta])*
        pub struct $name:ident($prefix:literal);
    ) => {
        $crate::define_name_id! {
            $(#[$meta])*
            pub struct $name;
        }

        impl $name {
            /// Mint a fresh `{prefix}{nanoid}` id.
            pub fn generate() -> Self {
                Self(smol_str::SmolStr::new(format!(
                    "{}{}",
                    $prefix,
                    nanoid::nanoid!({ $crate::id::GENERATED_SUFFIX_LEN })
                )))
            }
        }
    };
}

define_name_id! {
    /// Tenant namespace a workflow or endpoint belongs to. Opaque to the
    /// execution plane beyond equality.
    pub struct Vhost;
}

impl Vhost {
    pub fn default_vhost() -> Self {
        Self(SmolStr::new("/"))
    }
}

impl Default for Vhost {
    fn default() -> Self {
        Self::default_vhost()
    }
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
