//! Property-based tests for the frame and field codecs.
//!
//! These tests use proptest to generate random valid inputs and verify that
//! wire-format invariants hold for all of them.

use proptest::prelude::*;
use zvt_protocol::{
    Frame, FieldSet, FieldValue,
    bmp::{decode_field, encode_field, tags},
    decode_frame,
};

/// Strategy for class/instruction pairs that are not reserved for ACK/NACK.
fn apdu_command() -> impl Strategy<Value = (u8, u8)> {
    (any::<u8>(), any::<u8>()).prop_filter("reserved control code", |(class, instr)| {
        !((*class == 0x80 || *class == 0x84) && *instr == 0x00)
    })
}

/// Strategy for printable ASCII text of bounded length.
fn printable(max: usize) -> impl Strategy<Value = String> {
    prop::string::string_regex(&format!("[ -~]{{0,{max}}}"))
        .expect("Failed to create printable text strategy")
}

/// Strategy for (tag, value) pairs accepted by the field codec.
fn field() -> impl Strategy<Value = (u8, FieldValue)> {
    prop_oneof![
        (0u64..=999_999_999_999).prop_map(|n| (tags::AMOUNT, FieldValue::Number(n))),
        (0u64..=999_999).prop_map(|n| (tags::TRACE_NUMBER, FieldValue::Number(n))),
        (0u64..=9_999).prop_map(|n| (tags::RECEIPT_NUMBER, FieldValue::Number(n))),
        (0u64..=99_999_999).prop_map(|n| (tags::TERMINAL_ID, FieldValue::Number(n))),
        any::<u8>().prop_map(|b| (tags::RESULT_CODE, FieldValue::Byte(b))),
        printable(255).prop_map(|s| (tags::ADDITIONAL_TEXT, FieldValue::Text(s))),
        prop::string::string_regex("([ -~]{0,14}[!-~])?")
            .expect("Failed to create VU strategy")
            .prop_map(|s| (tags::VU_NUMBER, FieldValue::Text(s))),
        prop::collection::vec(any::<u8>(), 0..=255)
            .prop_map(|b| (tags::AID, FieldValue::Bytes(b))),
    ]
}

proptest! {
    /// Property: every payload length round-trips, and the header uses the
    /// short form exactly up to 254 bytes.
    #[test]
    fn prop_frame_roundtrip(
        (class, instruction) in apdu_command(),
        payload in prop::collection::vec(any::<u8>(), 0..1024),
    ) {
        let frame = Frame::Apdu { class, instruction, payload: payload.clone().into() };
        let encoded = frame.encode().unwrap();

        if payload.len() <= 254 {
            prop_assert_eq!(encoded[2] as usize, payload.len());
            prop_assert_eq!(encoded.len(), payload.len() + 3);
        } else {
            prop_assert_eq!(encoded[2], 0xFF);
            prop_assert_eq!(
                u16::from_le_bytes([encoded[3], encoded[4]]) as usize,
                payload.len()
            );
            prop_assert_eq!(encoded.len(), payload.len() + 5);
        }

        prop_assert_eq!(decode_frame(&encoded).unwrap(), frame);
    }

    /// Property: any strict prefix of an encoded frame is malformed.
    #[test]
    fn prop_truncated_frame_is_malformed(
        (class, instruction) in apdu_command(),
        payload in prop::collection::vec(any::<u8>(), 0..300),
        cut in any::<prop::sample::Index>(),
    ) {
        let frame = Frame::Apdu { class, instruction, payload: payload.into() };
        let encoded = frame.encode().unwrap();
        let cut = cut.index(encoded.len());
        prop_assert!(decode_frame(&encoded[..cut]).is_err());
    }

    /// Property: decode_field(tag, encode_field(tag, v)) == v.
    #[test]
    fn prop_field_roundtrip((tag, value) in field()) {
        let encoded = encode_field(tag, &value).unwrap();
        prop_assert_eq!(decode_field(tag, &encoded).unwrap(), value);
    }

    /// Property: an unknown LL field anywhere in a payload never hides the
    /// known fields around it.
    #[test]
    fn prop_unknown_field_is_skipped(
        data in prop::collection::vec(any::<u8>(), 0..=255),
        amount in 0u64..=999_999_999_999,
    ) {
        let mut payload = vec![0xF7, data.len() as u8];
        payload.extend_from_slice(&data);
        payload.push(tags::AMOUNT);
        payload.extend(encode_field(tags::AMOUNT, &FieldValue::Number(amount)).unwrap());

        let set = FieldSet::parse(&payload).unwrap();
        prop_assert_eq!(set.number(tags::AMOUNT), Some(amount));
        prop_assert_eq!(set.unknown().len(), 1);
        prop_assert_eq!(&set.unknown()[0].data, &data);
    }

    /// Property: ACK and NACK are recognised regardless of what follows.
    #[test]
    fn prop_control_codes_take_precedence(reason in any::<u8>()) {
        prop_assert_eq!(decode_frame(&[0x80, 0x00]).unwrap(), Frame::Ack);
        prop_assert_eq!(decode_frame(&[0x84, 0x00, reason]).unwrap(), Frame::Nack { reason });
    }
}
