use bson::{Bson, RawArray, RawBsonRef, RawDocument};

/// Coerce a `Bson` value into a boolean the way getLastError consumers do:
/// booleans and numbers by value, null and undefined as false, anything else
/// (including strings) as true.
pub(crate) fn as_bool(val: &Bson) -> bool {
    match *val {
        Bson::Boolean(b) => b,
        Bson::Int32(i) => i != 0,
        Bson::Int64(i) => i != 0,
        Bson::Double(f) => f != 0.0,
        Bson::Null | Bson::Undefined => false,
        _ => true,
    }
}

/// The number of digits in `n` in base 10.
pub(crate) fn num_decimal_digits(mut n: usize) -> usize {
    let mut digits = 1;

    while n >= 10 {
        n /= 10;
        digits += 1;
    }

    digits
}

/// The number of bytes the `index`-th entry of a BSON array occupies beyond
/// the entry's own length: the element type byte, the decimal string key, and
/// the key's null terminator.
pub(crate) fn array_entry_size_bytes(index: usize, doc_len: usize) -> usize {
    1 + num_decimal_digits(index) + 1 + doc_len
}

/// Checks that a replacement-style update document contains no dollar-prefixed
/// or dotted keys at any level and no invalid UTF-8. Interior NUL bytes in
/// string values are permitted (they are length-prefixed on the wire); keys
/// cannot contain NUL by construction.
pub(crate) fn is_valid_replacement_document(document: &RawDocument) -> bool {
    for element in document {
        let (key, value) = match element {
            Ok(element) => element,
            Err(_) => return false,
        };

        if key.starts_with('$') || key.contains('.') {
            return false;
        }

        if !is_valid_replacement_value(value) {
            return false;
        }
    }

    true
}

fn is_valid_replacement_value(value: RawBsonRef<'_>) -> bool {
    match value {
        RawBsonRef::Document(subdocument) => is_valid_replacement_document(subdocument),
        RawBsonRef::Array(array) => is_valid_replacement_array(array),
        _ => true,
    }
}

fn is_valid_replacement_array(array: &RawArray) -> bool {
    for item in array {
        match item {
            Ok(value) => {
                if !is_valid_replacement_value(value) {
                    return false;
                }
            }
            Err(_) => return false,
        }
    }

    true
}
