//! FRU inventory decoding.
//!
//! An inventory starts with an 8-byte common header whose area offsets are in
//! multiples of 8 bytes. Each area holds type/length-prefixed fields closed by
//! the `0xC1` end marker.

use core::fmt::Write as _;

use crate::error::{Error, Result};

/// Size of the common header.
pub const COMMON_HEADER_LEN: usize = 8;

/// Type/length byte that ends an area's field list.
const END_OF_FIELDS: u8 = 0xC1;

/// Language codes whose 8-bit text is copied verbatim.
const LANGUAGE_ENGLISH: [u8; 2] = [0, 25];

/// Encoding selected by bits 7:6 of a type/length byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldEncoding {
    /// Binary or unspecified; rendered as hex.
    #[default]
    Binary,
    /// BCD plus (digits, space, dash, period).
    BcdPlus,
    /// 6-bit ASCII packed 4 characters into 3 bytes.
    SixBitAscii,
    /// 8-bit text interpreted per the area's language code.
    Text,
}

impl FieldEncoding {
    fn from_type_length(type_length: u8) -> Self {
        match type_length >> 6 {
            0 => Self::Binary,
            1 => Self::BcdPlus,
            2 => Self::SixBitAscii,
            _ => Self::Text,
        }
    }
}

/// One decoded field: the raw bytes plus their ASCII rendering.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FruField {
    /// Field encoding.
    pub encoding: FieldEncoding,
    /// Bytes as stored.
    pub raw: Vec<u8>,
    /// ASCII rendering; empty when the field is absent or undecodable.
    pub value: String,
}

impl FruField {
    /// Whether the field carried no data.
    pub fn is_absent(&self) -> bool {
        self.raw.is_empty()
    }
}

/// Decode one field given its type/length byte and the bytes that follow.
///
/// `language` is the area's language code; `None` (chassis area) means English.
pub fn decode_field(type_length: u8, data: &[u8], language: Option<u8>) -> FruField {
    let encoding = FieldEncoding::from_type_length(type_length);
    let len = usize::from(type_length & 0x3F).min(data.len());
    let raw = data[..len].to_vec();

    let value = match encoding {
        FieldEncoding::Binary => hex_ascii(&raw),
        FieldEncoding::BcdPlus => raw.iter().map(|&b| bcd_plus(b)).collect(),
        FieldEncoding::SixBitAscii => six_bit_ascii(&raw),
        FieldEncoding::Text => {
            let english = language.is_none_or(|code| LANGUAGE_ENGLISH.contains(&code));
            if english {
                raw.iter()
                    .take_while(|&&b| b != 0)
                    .map(|&b| char::from(b))
                    .collect()
            } else {
                tracing::info!(
                    language = language.unwrap_or_default(),
                    "non-English FRU text field left empty"
                );
                String::new()
            }
        }
    };

    FruField {
        encoding,
        raw,
        value,
    }
}

fn hex_ascii(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02X}");
    }
    out
}

/// One BCD-plus character per byte, taken from the low nibble.
fn bcd_plus(byte: u8) -> char {
    match byte & 0x0F {
        d @ 0..=9 => char::from(b'0' + d),
        0x0A => ' ',
        0x0B => '-',
        0x0C => '.',
        _ => '?',
    }
}

fn six_bit_ascii(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 4 / 3 + 1);
    for group in bytes.chunks(3) {
        let mut packed = [0u8; 3];
        packed[..group.len()].copy_from_slice(group);
        let bits =
            u32::from(packed[0]) | (u32::from(packed[1]) << 8) | (u32::from(packed[2]) << 16);
        let chars = group.len() * 8 / 6;
        for i in 0..chars {
            let c = ((bits >> (6 * i)) & 0x3F) as u8;
            out.push(char::from(c + 0x20));
        }
    }
    out
}

/// Walk the type/length fields of an area starting at `start`.
///
/// Stops at the end marker or the end of the area. A field running past the
/// area is truncated.
fn decode_fields(area: &[u8], start: usize, language: Option<u8>) -> Vec<FruField> {
    let mut fields = Vec::new();
    let mut off = start;
    while let Some(&type_length) = area.get(off) {
        if type_length == END_OF_FIELDS {
            break;
        }
        let data = area.get(off + 1..).unwrap_or_default();
        fields.push(decode_field(type_length, data, language));
        off += 1 + usize::from(type_length & 0x3F);
    }
    fields
}

fn take(fields: &mut std::vec::IntoIter<FruField>) -> FruField {
    fields.next().unwrap_or_default()
}

/// Decoded common header. Offsets are in bytes, `0` meaning absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommonHeader {
    /// Format version (1).
    pub version: u8,
    /// Internal use area offset.
    pub internal_use: usize,
    /// Chassis info area offset.
    pub chassis: usize,
    /// Board info area offset.
    pub board: usize,
    /// Product info area offset.
    pub product: usize,
    /// Multi-record area offset.
    pub multi_record: usize,
}

impl CommonHeader {
    /// Decode the common header.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let header = data
            .get(..COMMON_HEADER_LEN)
            .ok_or(Error::Decode("FRU common header too short"))?;
        if header.iter().fold(0u8, |acc, &b| acc.wrapping_add(b)) != 0 {
            return Err(Error::Decode("FRU common header checksum"));
        }
        if header[0] & 0x0F != 0x01 {
            return Err(Error::Decode("unsupported FRU format version"));
        }
        Ok(Self {
            version: header[0] & 0x0F,
            internal_use: usize::from(header[1]) * 8,
            chassis: usize::from(header[2]) * 8,
            board: usize::from(header[3]) * 8,
            product: usize::from(header[4]) * 8,
            multi_record: usize::from(header[5]) * 8,
        })
    }
}

/// Chassis info area.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChassisArea {
    /// SMBIOS chassis type.
    pub chassis_type: u8,
    /// Chassis part number.
    pub part_number: FruField,
    /// Chassis serial number.
    pub serial_number: FruField,
    /// Custom fields.
    pub custom: Vec<FruField>,
}

/// Board info area.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BoardArea {
    /// Language code.
    pub language: u8,
    /// Manufacturing date, minutes since 1996-01-01 00:00.
    pub mfg_minutes: u32,
    /// Board manufacturer.
    pub manufacturer: FruField,
    /// Board product name.
    pub product: FruField,
    /// Board serial number.
    pub serial_number: FruField,
    /// Board part number.
    pub part_number: FruField,
    /// FRU file id.
    pub fru_file_id: FruField,
    /// Custom fields.
    pub custom: Vec<FruField>,
}

/// Product info area.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProductArea {
    /// Language code.
    pub language: u8,
    /// Product manufacturer.
    pub manufacturer: FruField,
    /// Product name.
    pub product: FruField,
    /// Part / model number.
    pub part_number: FruField,
    /// Product version.
    pub version: FruField,
    /// Product serial number.
    pub serial_number: FruField,
    /// Asset tag.
    pub asset_tag: FruField,
    /// FRU file id.
    pub fru_file_id: FruField,
    /// Custom fields.
    pub custom: Vec<FruField>,
}

/// A decoded FRU inventory.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FruInventory {
    /// Common header.
    pub header: CommonHeader,
    /// Chassis info area, if present and decodable.
    pub chassis: Option<ChassisArea>,
    /// Board info area, if present and decodable.
    pub board: Option<BoardArea>,
    /// Product info area, if present and decodable.
    pub product: Option<ProductArea>,
}

impl FruInventory {
    /// Decode an inventory image.
    ///
    /// A bad common header is an error. A bad area is logged and left out.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let header = CommonHeader::parse(data)?;

        let chassis = decode_area(data, header.chassis, "chassis", parse_chassis_area);
        let board = decode_area(data, header.board, "board", parse_board_area);
        let product = decode_area(data, header.product, "product", parse_product_area);

        Ok(Self {
            header,
            chassis,
            board,
            product,
        })
    }

    /// Best manufacturer name: product area first, then board area.
    pub fn manufacturer(&self) -> Option<&str> {
        let product = self.product.as_ref().map(|p| p.manufacturer.value.as_str());
        let board = self.board.as_ref().map(|b| b.manufacturer.value.as_str());
        product.filter(|s| !s.is_empty()).or(board.filter(|s| !s.is_empty()))
    }

    /// Best product name: product area first, then board area.
    pub fn product_name(&self) -> Option<&str> {
        let product = self.product.as_ref().map(|p| p.product.value.as_str());
        let board = self.board.as_ref().map(|b| b.product.value.as_str());
        product.filter(|s| !s.is_empty()).or(board.filter(|s| !s.is_empty()))
    }
}

fn decode_area<T>(
    data: &[u8],
    offset: usize,
    name: &'static str,
    parse: fn(&[u8]) -> Result<T>,
) -> Option<T> {
    if offset == 0 {
        return None;
    }
    let result = area_slice(data, offset).and_then(parse);
    match result {
        Ok(area) => Some(area),
        Err(err) => {
            tracing::warn!(area = name, error = %err, "skipping FRU area");
            None
        }
    }
}

/// Slice one area using its own length byte; tolerates an image truncated
/// before the area's end. A complete area must sum to zero.
fn area_slice(data: &[u8], offset: usize) -> Result<&[u8]> {
    let area = data
        .get(offset..)
        .filter(|a| a.len() >= 2)
        .ok_or(Error::Decode("FRU area outside inventory"))?;
    let declared = usize::from(area[1]) * 8;
    if declared > 0 && declared <= area.len() {
        let area = &area[..declared];
        if area.iter().fold(0u8, |acc, &b| acc.wrapping_add(b)) != 0 {
            return Err(Error::Decode("FRU area checksum mismatch"));
        }
        return Ok(area);
    }
    Ok(&area[..declared.min(area.len())])
}

fn parse_chassis_area(area: &[u8]) -> Result<ChassisArea> {
    let chassis_type = *area.get(2).ok_or(Error::Decode("chassis area too short"))?;
    let mut fields = decode_fields(area, 3, None).into_iter();
    Ok(ChassisArea {
        chassis_type,
        part_number: take(&mut fields),
        serial_number: take(&mut fields),
        custom: fields.collect(),
    })
}

fn parse_board_area(area: &[u8]) -> Result<BoardArea> {
    let fixed = area.get(..6).ok_or(Error::Decode("board area too short"))?;
    let language = fixed[2];
    let mfg_minutes = u32::from_le_bytes([fixed[3], fixed[4], fixed[5], 0]);
    let mut fields = decode_fields(area, 6, Some(language)).into_iter();
    Ok(BoardArea {
        language,
        mfg_minutes,
        manufacturer: take(&mut fields),
        product: take(&mut fields),
        serial_number: take(&mut fields),
        part_number: take(&mut fields),
        fru_file_id: take(&mut fields),
        custom: fields.collect(),
    })
}

fn parse_product_area(area: &[u8]) -> Result<ProductArea> {
    let language = *area.get(2).ok_or(Error::Decode("product area too short"))?;
    let mut fields = decode_fields(area, 3, Some(language)).into_iter();
    Ok(ProductArea {
        language,
        manufacturer: take(&mut fields),
        product: take(&mut fields),
        part_number: take(&mut fields),
        version: take(&mut fields),
        serial_number: take(&mut fields),
        asset_tag: take(&mut fields),
        fru_file_id: take(&mut fields),
        custom: fields.collect(),
    })
}

/// Helpers for building inventory images in tests.
#[cfg(test)]
pub(crate) mod build {
    /// An 8-bit text field.
    pub(crate) fn text(s: &str) -> Vec<u8> {
        let mut out = vec![0xC0 | s.len() as u8];
        out.extend_from_slice(s.as_bytes());
        out
    }

    /// Close an area: end marker, pad to 8 bytes, fix length and checksum.
    pub(crate) fn area(mut body: Vec<u8>) -> Vec<u8> {
        body.push(0xC1);
        while (body.len() + 1) % 8 != 0 {
            body.push(0x00);
        }
        body[1] = ((body.len() + 1) / 8) as u8;
        let sum = body.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        body.push(sum.wrapping_neg());
        body
    }

    /// A board + product inventory naming `manufacturer` and `product`.
    pub(crate) fn inventory(manufacturer: &str, product: &str) -> Vec<u8> {
        let mut board = vec![0x01, 0x00, 0x00, 0x10, 0x20, 0x30];
        board.extend(text(manufacturer));
        board.extend(text(product));
        board.extend(text("SN0001"));
        board.extend(text("PN-42"));
        board.extend([0x00]);
        let board = area(board);

        let mut prod = vec![0x01, 0x00, 0x19];
        prod.extend(text(manufacturer));
        prod.extend(text(product));
        prod.extend(text("PN-42"));
        prod.extend(text("1.0"));
        prod.extend(text("SN0001"));
        let prod = area(prod);

        let board_off = 1u8;
        let product_off = board_off + (board.len() / 8) as u8;
        let mut header = vec![0x01, 0x00, 0x00, board_off, product_off, 0x00, 0x00];
        let sum = header.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        header.push(sum.wrapping_neg());

        let mut image = header;
        image.extend(board);
        image.extend(prod);
        image
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bcd_plus_byte_0a_is_space() {
        let field = decode_field(0x41, &[0x0A], None);
        assert_eq!(field.encoding, FieldEncoding::BcdPlus);
        assert_eq!(field.value, " ");
    }

    #[test]
    fn bcd_plus_digits_dash_and_period() {
        let field = decode_field(0x44, &[0x01, 0x0B, 0x02, 0x0C], None);
        assert_eq!(field.value, "1-2.");
    }

    #[test]
    fn six_bit_zero_group_is_four_spaces() {
        let field = decode_field(0x83, &[0x00, 0x00, 0x00], None);
        assert_eq!(field.encoding, FieldEncoding::SixBitAscii);
        assert_eq!(field.value.as_bytes(), &[0x20; 4]);
    }

    #[test]
    fn six_bit_packs_ipmi() {
        // "IPMI" = 0x29 0x30 0x2D 0x29 in 6-bit ASCII.
        let bits: u32 = 0x29 | (0x30 << 6) | (0x2D << 12) | (0x29 << 18);
        let bytes = [bits as u8, (bits >> 8) as u8, (bits >> 16) as u8];
        let field = decode_field(0x83, &bytes, None);
        assert_eq!(field.value, "IPMI");
    }

    #[test]
    fn zero_length_field_is_absent() {
        let field = decode_field(0xC0, &[0x41, 0x42], Some(0));
        assert!(field.is_absent());
        assert_eq!(field.value, "");
    }

    #[test]
    fn binary_field_renders_hex() {
        let field = decode_field(0x02, &[0xDE, 0xAD], None);
        assert_eq!(field.value, "DEAD");
    }

    #[test]
    fn non_english_text_is_left_empty() {
        let field = decode_field(0xC2, b"AB", Some(3));
        assert_eq!(field.raw, b"AB");
        assert!(field.value.is_empty());

        let english = decode_field(0xC2, b"AB", Some(25));
        assert_eq!(english.value, "AB");
    }

    #[test]
    fn truncated_field_is_clamped() {
        let field = decode_field(0xC5, b"AB", None);
        assert_eq!(field.value, "AB");
    }

    #[test]
    fn inventory_areas_decode() {
        let image = build::inventory("N.A.T.", "NAT-MCH");
        let inv = FruInventory::parse(&image).expect("inventory");
        let board = inv.board.as_ref().expect("board");
        assert_eq!(board.manufacturer.value, "N.A.T.");
        assert_eq!(board.product.value, "NAT-MCH");
        assert_eq!(board.serial_number.value, "SN0001");
        assert_eq!(board.part_number.value, "PN-42");
        assert_eq!(board.mfg_minutes, 0x302010);
        let product = inv.product.as_ref().expect("product");
        assert_eq!(product.version.value, "1.0");
        assert_eq!(inv.manufacturer(), Some("N.A.T."));
        assert!(inv.chassis.is_none());
    }

    #[test]
    fn corrupt_area_is_skipped() {
        let mut image = build::inventory("N.A.T.", "NAT-MCH");
        if let Some(last) = image.last_mut() {
            *last ^= 0x01;
        }
        let inv = FruInventory::parse(&image).expect("inventory");
        assert!(inv.product.is_none());
        assert_eq!(inv.product_name(), Some("NAT-MCH"));
    }

    #[test]
    fn truncated_area_is_still_decoded() {
        let mut image = build::inventory("N.A.T.", "NAT-MCH");
        image.truncate(image.len() - 4);
        let inv = FruInventory::parse(&image).expect("inventory");
        let product = inv.product.as_ref().expect("product");
        assert_eq!(product.manufacturer.value, "N.A.T.");
    }

    #[test]
    fn bad_header_checksum_is_error() {
        let mut image = build::inventory("X", "Y");
        image[7] ^= 0x01;
        assert!(FruInventory::parse(&image).is_err());
    }
}
