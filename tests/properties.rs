//! Property-based tests for retry backoff and the item pipeline.

mod common;

use common::ToyCrypto;
use itemwire::{
    backoff_for_attempt, ClientInfo, Clock, CryptoProvider, FreezeContext, Hash, Item,
    ManualClock, SerialFormat, Timestamp,
};
use proptest::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Quote {
    symbol: String,
    bid: i64,
    tags: Vec<String>,
}

fn arb_quote() -> impl Strategy<Value = Quote> {
    (
        prop::string::string_regex(r"[A-Z]{1,8}").unwrap(),
        any::<i64>(),
        prop::collection::vec(prop::string::string_regex(r"[a-z0-9 ]{0,12}").unwrap(), 0..6),
    )
        .prop_map(|(symbol, bid, tags)| Quote { symbol, bid, tags })
}

fn arb_format() -> impl Strategy<Value = SerialFormat> {
    prop_oneof![
        Just(SerialFormat::Undefined),
        Just(SerialFormat::Json),
        Just(SerialFormat::Schema),
        Just(SerialFormat::Binary),
    ]
}

/// Optional key id that the toy provider accepts.
fn arb_key() -> impl Strategy<Value = Option<String>> {
    prop::option::of(prop::string::string_regex(r"key-[a-z0-9]{1,6}").unwrap())
}

proptest! {
    /// Backoff stays within [0.125s, 15s] and never shrinks.
    #[test]
    fn backoff_bounded_and_non_decreasing(attempt in 1u32..5_000) {
        let delay = backoff_for_attempt(attempt);
        prop_assert!(delay >= Duration::from_millis(125));
        prop_assert!(delay <= Duration::from_secs(15));
        prop_assert!(backoff_for_attempt(attempt + 1) >= delay);
    }

    /// A value survives freeze, the wire and lazy decode, whatever the
    /// format and crypto layers.
    #[test]
    fn pipeline_preserves_value(
        quote in arb_quote(),
        format in arb_format(),
        transport in arb_key(),
        recipient in arb_key(),
        signer in arb_key(),
    ) {
        let crypto: Arc<dyn CryptoProvider> = Arc::new(ToyCrypto);
        let clock = ManualClock::new(Timestamp(1_700_000_000_000_000));
        let info = ClientInfo::default();
        let ctx = FreezeContext {
            crypto: &crypto,
            clock: &clock,
            client_info: &info,
            default_format: SerialFormat::Undefined,
        };

        let mut item = Item::builder("Quote.1")
            .object(quote.clone())
            .serial_format(format)
            .build();
        item.set_transport_key_id(transport.clone()).unwrap();
        item.set_recipient_key_id(recipient.clone()).unwrap();
        item.set_signer_key_id(signer.clone()).unwrap();
        item.freeze(&ctx).unwrap();

        let payload = item.payload().unwrap().to_vec();
        prop_assert_eq!(item.payload_hash(), Some(Hash::from_bytes(&payload)));

        let received = Item::from_wire(item.to_wire().unwrap(), Arc::clone(&crypto));
        prop_assert_eq!(received.is_secret(), recipient.is_some());
        prop_assert_eq!(received.is_signed(), signer.is_some());
        prop_assert_eq!(received.serial_format(), item.serial_format());
        prop_assert_eq!(&*received.data::<Quote>().unwrap().unwrap(), &quote);
    }

    /// Freeze turns a lifetime into an absolute expiry measured from
    /// the clock.
    #[test]
    fn lifetime_fixes_expiry(secs in 0u64..10_000_000) {
        let crypto: Arc<dyn CryptoProvider> = Arc::new(ToyCrypto);
        let clock = ManualClock::new(Timestamp(1_700_000_000_000_000));
        let info = ClientInfo::default();
        let ctx = FreezeContext {
            crypto: &crypto,
            clock: &clock,
            client_info: &info,
            default_format: SerialFormat::Undefined,
        };

        let mut item = Item::builder("Timed")
            .text("{}", "Doc")
            .lifetime(Duration::from_secs(secs))
            .build();
        item.freeze(&ctx).unwrap();

        prop_assert_eq!(item.created(), clock.now());
        prop_assert_eq!(item.expires().0 - item.created().0, secs as i64 * 1_000_000);
        prop_assert_eq!(item.is_current(clock.now()), secs > 0);
    }
}
