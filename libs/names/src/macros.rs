//! Macros for defining typed name types.

use crate::{NameError, MAX_NAME_LEN};

/// Validates `s` as a resource name of the given kind.
///
/// Used by the code generated by [`define_name!`]; exposed so callers can
/// check a string without constructing a name.
pub fn validate_name(kind: &'static str, s: &str) -> Result<(), NameError> {
    let Some(first) = s.chars().next() else {
        return Err(NameError::Empty { kind });
    };

    if s.len() > MAX_NAME_LEN {
        return Err(NameError::TooLong {
            kind,
            len: s.len(),
            max: MAX_NAME_LEN,
        });
    }

    if !first.is_ascii_alphanumeric() {
        return Err(NameError::InvalidStart { kind });
    }

    if let Some(ch) = s
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(NameError::InvalidCharacter { kind, ch });
    }

    Ok(())
}

/// Macro to define a typed, validated name.
///
/// This generates a newtype wrapper around `String` with:
/// - A `KIND` constant used in error messages
/// - `parse()` to validate and construct from a string
/// - `as_str()` to borrow the canonical form
/// - `Display`, `FromStr`, `AsRef<str>` and `Borrow<str>` implementations
/// - `Serialize` and `Deserialize` implementations that validate on input
/// - `Ord`, `Hash`, and other standard traits
///
/// `Borrow<str>` lets ordered and hashed collections of names be queried
/// with a plain `&str`.
///
/// # Example
///
/// ```ignore
/// define_name!(ClusterName, "cluster");
///
/// let cluster: ClusterName = "k8s-east-1".parse()?;
/// assert_eq!(cluster.as_str(), "k8s-east-1");
/// ```
#[macro_export]
macro_rules! define_name {
    ($name:ident, $kind:literal) => {
        /// A validated name for this resource type.
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(String);

        impl $name {
            /// Human-readable resource kind, used in error messages.
            pub const KIND: &'static str = $kind;

            /// Parses and validates a name.
            pub fn parse(s: &str) -> Result<Self, $crate::NameError> {
                $crate::validate_name(Self::KIND, s)?;
                Ok(Self(s.to_owned()))
            }

            /// Returns the name as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consumes the name and returns the owned string.
            #[must_use]
            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::NameError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = $crate::NameError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                $crate::validate_name(Self::KIND, &s)?;
                Ok(Self(s))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Self::try_from(s).map_err(serde::de::Error::custom)
            }
        }
    };
}
