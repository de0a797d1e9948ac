//! Property tests for envelope and frame serialization.

use chrono::{DateTime, TimeZone, Utc};
use lantern_proto::{
    decode_frame, encode_frame, Destination, HopRecord, HubFrame, KeyEnvelope, MessageEnvelope,
    MessageKind, MeshPayload, Meta, MsgId, PeerFrame,
};
use proptest::prelude::*;

fn arb_timestamp() -> impl Strategy<Value = DateTime<Utc>> {
    // Whole seconds only: the wire form is RFC 3339 with whatever precision
    // chrono prints, and equality must survive the round trip.
    (1_500_000_000i64..2_000_000_000i64).prop_map(|secs| Utc.timestamp_opt(secs, 0).unwrap())
}

fn arb_hex_id() -> impl Strategy<Value = String> {
    any::<u128>().prop_map(|bits| format!("{bits:032x}"))
}

fn arb_meta() -> impl Strategy<Value = Meta> {
    (
        proptest::option::of("[a-z ]{0,20}"),
        proptest::option::of("[a-z ]{0,20}"),
        proptest::option::of("[0-9+]{0,15}"),
        proptest::option::of("[a-z0-9-]{0,20}"),
    )
        .prop_map(|(name, location, contact, image_ref)| Meta {
            name,
            location,
            contact,
            image_ref,
        })
}

fn arb_hops() -> impl Strategy<Value = Vec<HopRecord>> {
    proptest::collection::vec((arb_hex_id(), arb_timestamp()), 1..6).prop_map(|hops| {
        hops.into_iter().map(|(id, ts)| HopRecord::new(id, ts)).collect()
    })
}

prop_compose! {
    fn arb_broadcast()(
        bits in any::<u128>(),
        from in "user_[0-9a-f]{8}",
        payload in ".{0,64}",
        ttl in 0u8..=8,
        hops in arb_hops(),
        ts in arb_timestamp(),
        meta in arb_meta(),
    ) -> MessageEnvelope {
        let mut env = MessageEnvelope::broadcast(
            MsgId::from_bits(bits),
            hops[0].node_id.clone(),
            from,
            payload,
            meta,
            ts,
        );
        env.ttl = ttl;
        env.hops = hops;
        env
    }
}

prop_compose! {
    fn arb_key_envelope()(
        bits in any::<u128>(),
        from in "user_[0-9a-f]{8}",
        wrapped in proptest::collection::vec(any::<u8>(), 104),
    ) -> KeyEnvelope {
        use base64::{engine::general_purpose::STANDARD, Engine};
        KeyEnvelope::new(MsgId::from_bits(bits), from, STANDARD.encode(wrapped))
    }
}

proptest! {
    #[test]
    fn message_envelope_round_trip(env in arb_broadcast()) {
        let json = serde_json::to_string(&env).unwrap();
        let back: MessageEnvelope = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(back, env);
    }

    #[test]
    fn key_envelope_round_trip(key in arb_key_envelope()) {
        let json = serde_json::to_string(&key).unwrap();
        let back: KeyEnvelope = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(&back, &key);
        prop_assert_eq!(back.to, Destination::Admin);
        prop_assert!(key.validate().is_ok());
    }

    #[test]
    fn peer_frame_round_trip(env in arb_broadcast()) {
        let frame = MeshPayload::Message(env).into_peer_frame().unwrap();
        let text = encode_frame(&frame).unwrap();
        let back: PeerFrame = decode_frame(&text).unwrap();
        prop_assert_eq!(back, frame);
    }

    #[test]
    fn hub_frame_round_trip(env in arb_broadcast(), peer in arb_hex_id()) {
        let (envelope, envelope_type) = MeshPayload::Message(env).into_parts().unwrap();
        let frame = HubFrame::MeshMessage { envelope, from_peer: peer, envelope_type };
        let text = encode_frame(&frame).unwrap();
        let back: HubFrame = decode_frame(&text).unwrap();
        prop_assert_eq!(back, frame);
    }

    #[test]
    fn with_hop_preserves_payload_and_decrements(env in arb_broadcast(), ts in arb_timestamp()) {
        prop_assume!(env.ttl > 0);
        let relay = "ffffffffffffffffffffffffffffffff";
        let next = env.with_hop(relay, ts).unwrap();

        prop_assert_eq!(next.ttl, env.ttl - 1);
        prop_assert_eq!(next.hops.len(), env.hops.len() + 1);
        prop_assert_eq!(&next.payload, &env.payload);
        prop_assert_eq!(next.msg_id, env.msg_id);
        prop_assert_eq!(next.kind, MessageKind::Broadcast);
    }
}
