//! Tagged payload fields (BMPs).
//!
//! After any untagged prefix (password, config byte) a payload is a
//! sequence of `tag value` pairs. The layout of the value is a pure function
//! of the tag:
//!
//! | Layout        | Encoding                                |
//! |---------------|-----------------------------------------|
//! | `Bcd(n)`      | `n` bytes packed BCD, big-endian        |
//! | `Byte`        | one binary byte                         |
//! | `Ascii(n)`    | `n` bytes text, right padded with space |
//! | `LlVarAscii`  | one length byte, then text              |
//! | `LlVarBinary` | one length byte, then raw bytes         |
//!
//! Tags missing from [`layout`] are assumed to be LL-variable: the parser
//! skips them using their length byte and reports them as
//! [`UnknownField`]s instead of failing.

use std::fmt;

use zvt_core::{BatchTotals, Error, Result};

use crate::bcd::{decode_bcd, encode_bcd, max_value};

/// Well-known BMP tags.
pub mod tags {
    pub const TIMEOUT: u8 = 0x01;
    pub const MAX_STATUS_INFOS: u8 = 0x02;
    pub const SERVICE_BYTE: u8 = 0x03;
    pub const AMOUNT: u8 = 0x04;
    pub const TRACE_NUMBER: u8 = 0x0B;
    pub const TIME: u8 = 0x0C;
    pub const DATE: u8 = 0x0D;
    pub const EXPIRY_DATE: u8 = 0x0E;
    pub const CARD_SEQUENCE_NUMBER: u8 = 0x17;
    pub const PAYMENT_TYPE: u8 = 0x19;
    pub const PAN: u8 = 0x22;
    pub const RESULT_CODE: u8 = 0x27;
    pub const TERMINAL_ID: u8 = 0x29;
    pub const VU_NUMBER: u8 = 0x2A;
    pub const ORIGINAL_TRACE: u8 = 0x37;
    pub const AID: u8 = 0x3B;
    pub const ADDITIONAL_TEXT: u8 = 0x3C;
    pub const CURRENCY_CODE: u8 = 0x49;
    pub const TOTALS: u8 = 0x60;
    pub const RECEIPT_NUMBER: u8 = 0x87;
    pub const TURNOVER_NUMBER: u8 = 0x88;
    pub const CARD_TYPE: u8 = 0x8A;
    pub const CARD_NAME: u8 = 0x8B;
}

/// Byte layout of a field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldLayout {
    Bcd(usize),
    Byte,
    Ascii(usize),
    LlVarAscii,
    LlVarBinary,
}

/// Layout of a known tag.
pub fn layout(tag: u8) -> Option<FieldLayout> {
    use FieldLayout::*;
    use tags::*;

    let layout = match tag {
        TIMEOUT | MAX_STATUS_INFOS | SERVICE_BYTE | PAYMENT_TYPE | RESULT_CODE | CARD_TYPE => {
            Byte
        }
        AMOUNT => Bcd(6),
        TRACE_NUMBER | TIME | ORIGINAL_TRACE | TURNOVER_NUMBER => Bcd(3),
        DATE | EXPIRY_DATE | CARD_SEQUENCE_NUMBER | CURRENCY_CODE | RECEIPT_NUMBER => Bcd(2),
        TERMINAL_ID => Bcd(4),
        VU_NUMBER => Ascii(15),
        PAN | ADDITIONAL_TEXT | CARD_NAME => LlVarAscii,
        AID | TOTALS => LlVarBinary,
        _ => return None,
    };
    Some(layout)
}

/// Decoded value of a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Number(u64),
    Byte(u8),
    Text(String),
    Bytes(Vec<u8>),
}

impl FieldValue {
    pub fn as_number(&self) -> Option<u64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Byte(b) => Some(u64::from(*b)),
            _ => None,
        }
    }

    pub fn as_byte(&self) -> Option<u8> {
        match self {
            FieldValue::Byte(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            FieldValue::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FieldValue::Number(n) => write!(f, "{n}"),
            FieldValue::Byte(b) => write!(f, "0x{b:02X}"),
            FieldValue::Text(s) => write!(f, "{s:?}"),
            FieldValue::Bytes(b) => write!(f, "{}", crate::frame::to_hex(b)),
        }
    }
}

fn unknown_tag(tag: u8) -> Error {
    Error::protocol(format!("no layout known for BMP 0x{tag:02X}"))
}

fn mismatch(tag: u8, value: &FieldValue) -> Error {
    Error::protocol(format!(
        "value {value} does not match the layout of BMP 0x{tag:02X}"
    ))
}

/// Encode a value for `tag`, without the tag byte itself.
///
/// LL-variable layouts include their length byte.
///
/// # Errors
///
/// Returns [`Error::Protocol`] for unknown tags, values of the wrong kind,
/// numbers that overflow the BCD width and text that is not printable
/// ASCII or too long.
pub fn encode_field(tag: u8, value: &FieldValue) -> Result<Vec<u8>> {
    let layout = layout(tag).ok_or_else(|| unknown_tag(tag))?;
    match (layout, value) {
        (FieldLayout::Bcd(width), FieldValue::Number(n)) => encode_bcd(*n, width),
        (FieldLayout::Byte, FieldValue::Byte(b)) => Ok(vec![*b]),
        (FieldLayout::Ascii(width), FieldValue::Text(text)) => {
            check_ascii(tag, text)?;
            if text.len() > width || text.ends_with(' ') {
                return Err(Error::protocol(format!(
                    "BMP 0x{tag:02X} holds at most {width} characters without trailing spaces"
                )));
            }
            let mut out = text.as_bytes().to_vec();
            out.resize(width, b' ');
            Ok(out)
        }
        (FieldLayout::LlVarAscii, FieldValue::Text(text)) => {
            check_ascii(tag, text)?;
            ll_var(tag, text.as_bytes())
        }
        (FieldLayout::LlVarBinary, FieldValue::Bytes(bytes)) => ll_var(tag, bytes),
        _ => Err(mismatch(tag, value)),
    }
}

fn check_ascii(tag: u8, text: &str) -> Result<()> {
    if text.bytes().all(|b| (0x20..0x7F).contains(&b)) {
        Ok(())
    } else {
        Err(Error::protocol(format!(
            "BMP 0x{tag:02X} only accepts printable ASCII"
        )))
    }
}

fn ll_var(tag: u8, data: &[u8]) -> Result<Vec<u8>> {
    let len = u8::try_from(data.len()).map_err(|_| {
        Error::protocol(format!(
            "BMP 0x{tag:02X} value of {} bytes exceeds 255",
            data.len()
        ))
    })?;
    let mut out = Vec::with_capacity(data.len() + 1);
    out.push(len);
    out.extend_from_slice(data);
    Ok(out)
}

/// Read the value of `tag` from the start of `bytes`.
///
/// Returns the value and the number of bytes consumed.
pub fn read_field(tag: u8, bytes: &[u8]) -> Result<(FieldValue, usize)> {
    let layout = layout(tag).ok_or_else(|| unknown_tag(tag))?;
    let truncated =
        || Error::protocol_with_raw(format!("BMP 0x{tag:02X} is truncated"), bytes);

    match layout {
        FieldLayout::Bcd(width) => {
            let raw = bytes.get(..width).ok_or_else(truncated)?;
            Ok((FieldValue::Number(decode_bcd(raw)?), width))
        }
        FieldLayout::Byte => {
            let b = *bytes.first().ok_or_else(truncated)?;
            Ok((FieldValue::Byte(b), 1))
        }
        FieldLayout::Ascii(width) => {
            let raw = bytes.get(..width).ok_or_else(truncated)?;
            let text = ascii_text(tag, raw)?;
            Ok((FieldValue::Text(text.trim_end_matches(' ').to_string()), width))
        }
        FieldLayout::LlVarAscii => {
            let data = ll_var_data(bytes).ok_or_else(truncated)?;
            let text = ascii_text(tag, data)?;
            Ok((FieldValue::Text(text.to_string()), data.len() + 1))
        }
        FieldLayout::LlVarBinary => {
            let data = ll_var_data(bytes).ok_or_else(truncated)?;
            Ok((FieldValue::Bytes(data.to_vec()), data.len() + 1))
        }
    }
}

fn ll_var_data(bytes: &[u8]) -> Option<&[u8]> {
    let len = *bytes.first()? as usize;
    bytes.get(1..1 + len)
}

fn ascii_text(tag: u8, raw: &[u8]) -> Result<&str> {
    std::str::from_utf8(raw)
        .ok()
        .filter(|s| s.is_ascii())
        .ok_or_else(|| {
            Error::protocol_with_raw(format!("BMP 0x{tag:02X} is not ASCII text"), raw)
        })
}

/// Decode a complete encoded value of `tag` (inverse of [`encode_field`]).
pub fn decode_field(tag: u8, bytes: &[u8]) -> Result<FieldValue> {
    let (value, used) = read_field(tag, bytes)?;
    if used != bytes.len() {
        return Err(Error::protocol_with_raw(
            format!("{} trailing bytes after BMP 0x{tag:02X}", bytes.len() - used),
            bytes,
        ));
    }
    Ok(value)
}

/// A tagged value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub tag: u8,
    pub value: FieldValue,
}

/// A field whose tag has no known layout; skipped via its length byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownField {
    pub tag: u8,
    pub data: Vec<u8>,
}

/// Ordered collection of fields with unique tags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSet {
    fields: Vec<Field>,
    unknown: Vec<UnknownField>,
}

impl FieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set holding exactly one field. The value is not checked against the
    /// tag layout, so callers pass values whose layout is fixed by the tag.
    pub(crate) fn from_field(field: Field) -> Self {
        FieldSet {
            fields: vec![field],
            unknown: Vec::new(),
        }
    }

    /// Parse a sequence of tagged fields.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] for truncated values, invalid BCD or
    /// text, and tags that occur twice.
    pub fn parse(mut bytes: &[u8]) -> Result<Self> {
        let mut set = FieldSet::new();
        while let Some((&tag, rest)) = bytes.split_first() {
            if set.contains(tag) {
                return Err(Error::protocol(format!("duplicate BMP 0x{tag:02X}")));
            }
            if layout(tag).is_some() {
                let (value, used) = read_field(tag, rest)?;
                set.fields.push(Field { tag, value });
                bytes = &rest[used..];
            } else {
                let data = ll_var_data(rest).ok_or_else(|| {
                    Error::protocol_with_raw(
                        format!("unknown BMP 0x{tag:02X} is truncated"),
                        rest,
                    )
                })?;
                set.unknown.push(UnknownField {
                    tag,
                    data: data.to_vec(),
                });
                bytes = &rest[data.len() + 1..];
            }
        }
        Ok(set)
    }

    /// Add a field, validating the value against the tag layout.
    pub fn insert(&mut self, tag: u8, value: FieldValue) -> Result<()> {
        if self.contains(tag) {
            return Err(Error::protocol(format!("duplicate BMP 0x{tag:02X}")));
        }
        encode_field(tag, &value)?;
        self.fields.push(Field { tag, value });
        Ok(())
    }

    /// Builder form of [`FieldSet::insert`].
    pub fn with(mut self, tag: u8, value: FieldValue) -> Result<Self> {
        self.insert(tag, value)?;
        Ok(self)
    }

    pub fn contains(&self, tag: u8) -> bool {
        self.fields.iter().any(|f| f.tag == tag) || self.unknown.iter().any(|f| f.tag == tag)
    }

    pub fn get(&self, tag: u8) -> Option<&FieldValue> {
        self.fields.iter().find(|f| f.tag == tag).map(|f| &f.value)
    }

    pub fn number(&self, tag: u8) -> Option<u64> {
        self.get(tag).and_then(FieldValue::as_number)
    }

    pub fn byte(&self, tag: u8) -> Option<u8> {
        self.get(tag).and_then(FieldValue::as_byte)
    }

    pub fn text(&self, tag: u8) -> Option<&str> {
        self.get(tag).and_then(FieldValue::as_text)
    }

    pub fn bytes(&self, tag: u8) -> Option<&[u8]> {
        self.get(tag).and_then(FieldValue::as_bytes)
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn unknown(&self) -> &[UnknownField] {
        &self.unknown
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.unknown.is_empty()
    }

    /// Encode known fields in insertion order. Unknown fields are not
    /// re-emitted.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for field in &self.fields {
            out.push(field.tag);
            out.extend(encode_field(field.tag, &field.value)?);
        }
        Ok(out)
    }
}

/// Encode BMP 0x60 totals: count as `u32` then net total as `i64`, both
/// big-endian.
pub fn encode_totals(totals: &BatchTotals) -> FieldValue {
    let mut data = Vec::with_capacity(12);
    data.extend_from_slice(&totals.count.to_be_bytes());
    data.extend_from_slice(&totals.total_cents.to_be_bytes());
    FieldValue::Bytes(data)
}

/// Decode BMP 0x60 totals.
pub fn decode_totals(data: &[u8]) -> Result<BatchTotals> {
    let invalid = || Error::protocol_with_raw("totals must be exactly 12 bytes", data);
    if data.len() != 12 {
        return Err(invalid());
    }
    let count: [u8; 4] = data[..4].try_into().map_err(|_| invalid())?;
    let total: [u8; 8] = data[4..].try_into().map_err(|_| invalid())?;
    Ok(BatchTotals {
        count: u32::from_be_bytes(count),
        total_cents: i64::from_be_bytes(total),
    })
}

/// Amount value, rejecting amounts that do not fit BMP 0x04.
pub fn amount(cents: u64) -> Result<FieldValue> {
    if cents > max_value(6) {
        return Err(Error::protocol(format!(
            "amount {cents} exceeds 12 BCD digits"
        )));
    }
    Ok(FieldValue::Number(cents))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tags::*;

    #[rstest]
    #[case(AMOUNT, FieldValue::Number(1234), vec![0, 0, 0, 0, 0x12, 0x34])]
    #[case(TRACE_NUMBER, FieldValue::Number(42), vec![0, 0, 0x42])]
    #[case(CURRENCY_CODE, FieldValue::Number(978), vec![0x09, 0x78])]
    #[case(RESULT_CODE, FieldValue::Byte(0x64), vec![0x64])]
    #[case(PAN, FieldValue::Text("****1234".into()), b"\x08****1234".to_vec())]
    #[case(AID, FieldValue::Bytes(vec![0xA0, 0x00]), vec![0x02, 0xA0, 0x00])]
    fn test_encode_decode_field(
        #[case] tag: u8,
        #[case] value: FieldValue,
        #[case] expected: Vec<u8>,
    ) {
        let encoded = encode_field(tag, &value).unwrap();
        assert_eq!(encoded, expected);
        assert_eq!(decode_field(tag, &encoded).unwrap(), value);
    }

    #[test]
    fn test_vu_number_is_space_padded() {
        let value = FieldValue::Text("VU123".into());
        let encoded = encode_field(VU_NUMBER, &value).unwrap();
        assert_eq!(encoded.len(), 15);
        assert_eq!(&encoded[..5], b"VU123");
        assert_eq!(decode_field(VU_NUMBER, &encoded).unwrap(), value);
    }

    #[test]
    fn test_layout_mismatch_is_rejected() {
        assert!(encode_field(AMOUNT, &FieldValue::Text("12".into())).is_err());
        assert!(encode_field(RESULT_CODE, &FieldValue::Number(1)).is_err());
        assert!(encode_field(0xF5, &FieldValue::Byte(1)).is_err());
    }

    #[test]
    fn test_amount_overflow() {
        assert!(amount(999_999_999_999).is_ok());
        assert!(amount(1_000_000_000_000).is_err());
    }

    #[test]
    fn test_parse_field_set() {
        let bytes = [
            0x27, 0x00, // result code
            0x04, 0, 0, 0, 0, 0x10, 0x00, // amount 1000
            0x49, 0x09, 0x78, // currency
        ];
        let set = FieldSet::parse(&bytes).unwrap();
        assert_eq!(set.byte(RESULT_CODE), Some(0));
        assert_eq!(set.number(AMOUNT), Some(1000));
        assert_eq!(set.number(CURRENCY_CODE), Some(978));
        assert!(set.unknown().is_empty());
        assert_eq!(set.encode().unwrap(), bytes);
    }

    #[test]
    fn test_unknown_tag_is_skipped() {
        let bytes = [
            0xF7, 0x02, 0xAB, 0xCD, // unknown, LL 2
            0x27, 0x00,
        ];
        let set = FieldSet::parse(&bytes).unwrap();
        assert_eq!(set.byte(RESULT_CODE), Some(0));
        assert_eq!(
            set.unknown(),
            &[UnknownField {
                tag: 0xF7,
                data: vec![0xAB, 0xCD]
            }]
        );
    }

    #[test]
    fn test_duplicate_tag_is_rejected() {
        let err = FieldSet::parse(&[0x27, 0x00, 0x27, 0x64]).unwrap_err();
        assert!(err.to_string().contains("duplicate BMP 0x27"));

        let mut set = FieldSet::new();
        set.insert(RESULT_CODE, FieldValue::Byte(0)).unwrap();
        assert!(set.insert(RESULT_CODE, FieldValue::Byte(1)).is_err());
    }

    #[test]
    fn test_truncated_field() {
        assert!(FieldSet::parse(&[0x04, 0x00, 0x00]).is_err());
        assert!(FieldSet::parse(&[0x22, 0x05, b'a']).is_err());
        assert!(FieldSet::parse(&[0xF7]).is_err());
    }

    #[test]
    fn test_totals() {
        let totals = BatchTotals {
            count: 3,
            total_cents: -250,
        };
        let value = encode_totals(&totals);
        let data = value.as_bytes().unwrap();
        assert_eq!(&data[..4], &[0, 0, 0, 3]);
        assert_eq!(decode_totals(data).unwrap(), totals);
        assert!(decode_totals(&[0; 11]).is_err());
    }
}
