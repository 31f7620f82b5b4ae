//! Serde support for [`SecurityIdentifier`] (feature `serde`).
//!
//! Human-readable formats carry the canonical `S-1-…` string; binary
//! formats carry the Windows byte layout.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::SecurityIdentifier;

impl Serialize for SecurityIdentifier {
    #[inline]
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            serializer.collect_str(self)
        } else {
            serializer.serialize_bytes(&self.as_bytes())
        }
    }
}

impl<'de> Deserialize<'de> for SecurityIdentifier {
    #[inline]
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct SidVisitor;

        impl de::Visitor<'_> for SidVisitor {
            type Value = SecurityIdentifier;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a Windows SID as a string (e.g. \"S-1-…\") or as raw binary")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                SecurityIdentifier::from_str(v)
                    .map_err(|_| E::invalid_value(de::Unexpected::Str(v), &self))
            }

            fn visit_bytes<E>(self, v: &[u8]) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                SecurityIdentifier::try_from(v)
                    .map_err(|_| E::invalid_value(de::Unexpected::Bytes(v), &self))
            }
        }

        if deserializer.is_human_readable() {
            deserializer.deserialize_str(SidVisitor)
        } else {
            deserializer.deserialize_bytes(SidVisitor)
        }
    }
}

#[cfg(test)]
mod test {
    use serde_test::{Configure, Token, assert_tokens};

    use crate::well_known;

    // BUILTIN\Administrators, S-1-5-32-544, in the Windows binary layout.
    const BYTES: &[u8] = &[1, 2, 0, 0, 0, 0, 0, 5, 32, 0, 0, 0, 32, 2, 0, 0];

    #[test]
    fn human_readable_uses_the_display_form() {
        assert_tokens(
            &well_known::builtin_administrators().readable(),
            &[Token::Str("S-1-5-32-544")],
        );
    }

    #[test]
    fn compact_uses_the_binary_form() {
        assert_tokens(
            &well_known::builtin_administrators().compact(),
            &[Token::Bytes(BYTES)],
        );
    }
}
