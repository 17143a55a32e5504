//! Macros for defining validated name types.

/// Validates a lowercase DNS-style name.
///
/// Allowed characters are `[a-z0-9-]`, plus `.` when `allow_dots` is set.
/// The first and last characters must be alphanumeric.
#[doc(hidden)]
pub fn validate_dns_name(
    kind: &'static str,
    value: &str,
    max: usize,
    allow_dots: bool,
) -> Result<(), crate::IdError> {
    if value.is_empty() {
        return Err(crate::IdError::Empty { kind });
    }
    if value.len() > max {
        return Err(crate::IdError::TooLong {
            kind,
            len: value.len(),
            max,
        });
    }

    for ch in value.chars() {
        let ok = ch.is_ascii_lowercase()
            || ch.is_ascii_digit()
            || ch == '-'
            || (allow_dots && ch == '.');
        if !ok {
            return Err(crate::IdError::InvalidCharacter {
                kind,
                ch,
                value: value.to_string(),
            });
        }
    }

    let alnum = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric());
    if !alnum(value.chars().next()) || !alnum(value.chars().last()) {
        return Err(crate::IdError::InvalidBoundary {
            kind,
            value: value.to_string(),
        });
    }

    Ok(())
}

/// Macro to define a validated name type.
///
/// This generates a newtype wrapper around `String` with:
/// - `KIND` and `MAX_LEN` constants
/// - `parse()` with DNS-style validation
/// - `as_str()`
/// - `Display`, `FromStr`, `AsRef<str>`
/// - `Serialize` and `Deserialize` implementations that validate on the way in
///
/// # Example
///
/// ```ignore
/// define_name!(Namespace, "namespace", 63, false);
///
/// let ns: Namespace = "team-a".parse()?;
/// ```
#[macro_export]
macro_rules! define_name {
    ($name:ident, $kind:literal, $max:literal, $allow_dots:literal) => {
        /// A validated name for this object kind.
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(String);

        impl $name {
            /// Human-readable kind used in error messages.
            pub const KIND: &'static str = $kind;

            /// Maximum length in bytes.
            pub const MAX_LEN: usize = $max;

            /// Parses and validates a name.
            pub fn parse(s: &str) -> Result<Self, $crate::IdError> {
                $crate::__validate_dns_name(Self::KIND, s, Self::MAX_LEN, $allow_dots)?;
                Ok(Self(s.to_string()))
            }

            /// Returns the name as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
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
                Self::parse(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}
