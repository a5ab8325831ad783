use std::sync::LazyLock;

use regex::Regex;


/// implement packbytes traits for a bilge enum, so it can be a field of a packed header
#[macro_export]
macro_rules! pack_enum {
    ($t:ty) => {

        impl packbytes::ToBytes for $t {
            type Bytes = [u8; core::mem::size_of::<$t>()];

            fn to_le_bytes(self) -> Self::Bytes {
                <$t as bilge::Bitsized>::ArbitraryInt::from(self).to_le_bytes()
            }
            fn to_be_bytes(self) -> Self::Bytes {
                <$t as bilge::Bitsized>::ArbitraryInt::from(self).to_be_bytes()
            }
        }
        impl packbytes::FromBytes for $t {
            type Bytes = [u8; core::mem::size_of::<$t>()];

            fn from_le_bytes(bytes: Self::Bytes) -> Self {
                <$t>::from(<$t as bilge::Bitsized>::ArbitraryInt::from_le_bytes(bytes))
            }
            fn from_be_bytes(bytes: Self::Bytes) -> Self {
                <$t>::from(<$t as bilge::Bitsized>::ArbitraryInt::from_be_bytes(bytes))
            }
        }
    };
}

static SLOT_SUFFIX: LazyLock<Regex> = LazyLock::new(||
    Regex::new(r"\(Slot: [\w+]+\)").expect("slot suffix pattern is valid"));

/// remove every `(Slot: ...)` marker from a feeder label, as rendered by [crate::feeder::Feeder::name]
pub(crate) fn strip_slot_suffix(label: &str) -> String {
    SLOT_SUFFIX.replace_all(label, "").trim().to_owned()
}
