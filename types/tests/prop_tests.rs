use proptest::prelude::*;

use liquid_types::{Timestamp, WalletAddress};

proptest! {
    /// Normalization is idempotent.
    #[test]
    fn wallet_normalization_idempotent(raw in "[ ]{0,2}[A-Za-z0-9]{1,40}[ ]{0,2}") {
        let once = WalletAddress::new(&raw);
        let twice = WalletAddress::new(once.as_str());
        prop_assert_eq!(once, twice);
    }

    /// Addresses differing only in case are equal.
    #[test]
    fn wallet_case_insensitive(raw in "[A-Za-z0-9]{1,40}") {
        prop_assert_eq!(
            WalletAddress::new(raw.to_uppercase()),
            WalletAddress::new(raw.to_lowercase())
        );
    }

    /// ISO rendering parses back to the same second.
    #[test]
    fn iso8601_roundtrip(secs in 0u64..4_000_000_000) {
        let ts = Timestamp::new(secs);
        prop_assert_eq!(Timestamp::parse_iso8601(&ts.to_iso8601()).unwrap(), ts);
    }
}
