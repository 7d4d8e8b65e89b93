use std::{
    io::Write,
    sync::atomic::{AtomicI32, Ordering},
};

use lazy_static::lazy_static;

use crate::error::{ErrorKind, Result};

/// Obtains a new, unique request ID.
pub fn next_request_id() -> i32 {
    lazy_static! {
        static ref REQUEST_ID: AtomicI32 = AtomicI32::new(0);
    }

    REQUEST_ID.fetch_add(1, Ordering::SeqCst)
}

/// Serializes `string` to bytes and writes them to `writer` with a null
/// terminator appended.
pub(super) fn write_cstring<W: Write>(writer: &mut W, string: &str) -> Result<()> {
    if string.contains('\0') {
        return Err(ErrorKind::InvalidArgument {
            message: format!("cstring with interior null: {:?}", string),
        }
        .into());
    }

    // Write the string's UTF-8 bytes.
    writer.write_all(string.as_bytes())?;

    // Write the null terminator.
    writer.write_all(&[0])?;

    Ok(())
}
