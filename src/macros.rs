/// Tries to read a primitive off the cursor, tagging failures with the stream position.
/// Expands to a `DeserializationResult`, so callers append `?`.
macro_rules! try_read {
    ($cursor: ident, u8) => {
        try_read!($cursor, u8, "u8")
    };
    ($cursor: ident, u8, $t: expr) => {
        $cursor
            .read_u8()
            .map_err(|e| $crate::err::DeserializationError::FailedToRead {
                offset: $cursor.position(),
                t: $t,
                source: e,
            })
    };

    ($cursor: ident, i8) => {
        try_read!($cursor, i8, "i8")
    };
    ($cursor: ident, i8, $t: expr) => {
        $cursor
            .read_i8()
            .map_err(|e| $crate::err::DeserializationError::FailedToRead {
                offset: $cursor.position(),
                t: $t,
                source: e,
            })
    };

    ($cursor: ident, u16) => {
        try_read!($cursor, u16, "u16")
    };
    ($cursor: ident, u16, $t: expr) => {
        $cursor
            .read_u16::<byteorder::LittleEndian>()
            .map_err(|e| $crate::err::DeserializationError::FailedToRead {
                offset: $cursor.position(),
                t: $t,
                source: e,
            })
    };

    ($cursor: ident, i16) => {
        try_read!($cursor, i16, "i16")
    };
    ($cursor: ident, i16, $t: expr) => {
        $cursor
            .read_i16::<byteorder::LittleEndian>()
            .map_err(|e| $crate::err::DeserializationError::FailedToRead {
                offset: $cursor.position(),
                t: $t,
                source: e,
            })
    };

    ($cursor: ident, u32) => {
        try_read!($cursor, u32, "u32")
    };
    ($cursor: ident, u32, $t: expr) => {
        $cursor
            .read_u32::<byteorder::LittleEndian>()
            .map_err(|e| $crate::err::DeserializationError::FailedToRead {
                offset: $cursor.position(),
                t: $t,
                source: e,
            })
    };

    ($cursor: ident, i32) => {
        try_read!($cursor, i32, "i32")
    };
    ($cursor: ident, i32, $t: expr) => {
        $cursor
            .read_i32::<byteorder::LittleEndian>()
            .map_err(|e| $crate::err::DeserializationError::FailedToRead {
                offset: $cursor.position(),
                t: $t,
                source: e,
            })
    };

    ($cursor: ident, u64) => {
        try_read!($cursor, u64, "u64")
    };
    ($cursor: ident, u64, $t: expr) => {
        $cursor
            .read_u64::<byteorder::LittleEndian>()
            .map_err(|e| $crate::err::DeserializationError::FailedToRead {
                offset: $cursor.position(),
                t: $t,
                source: e,
            })
    };

    ($cursor: ident, i64) => {
        try_read!($cursor, i64, "i64")
    };
    ($cursor: ident, i64, $t: expr) => {
        $cursor
            .read_i64::<byteorder::LittleEndian>()
            .map_err(|e| $crate::err::DeserializationError::FailedToRead {
                offset: $cursor.position(),
                t: $t,
                source: e,
            })
    };

    ($cursor: ident, f32) => {
        try_read!($cursor, f32, "f32")
    };
    ($cursor: ident, f32, $t: expr) => {
        $cursor
            .read_f32::<byteorder::LittleEndian>()
            .map_err(|e| $crate::err::DeserializationError::FailedToRead {
                offset: $cursor.position(),
                t: $t,
                source: e,
            })
    };

    ($cursor: ident, f64) => {
        try_read!($cursor, f64, "f64")
    };
    ($cursor: ident, f64, $t: expr) => {
        $cursor
            .read_f64::<byteorder::LittleEndian>()
            .map_err(|e| $crate::err::DeserializationError::FailedToRead {
                offset: $cursor.position(),
                t: $t,
                source: e,
            })
    };

    // Booleans are stored as 32-bit words; irregular values are coerced to `true`.
    ($cursor: ident, bool) => {
        match try_read!($cursor, i32, "bool") {
            Ok(0) => Ok(false),
            Ok(1) => Ok(true),
            Ok(other) => {
                log::warn!("{other} is an unknown value for bool, coercing to `true`");
                Ok(true)
            }
            Err(e) => Err(e),
        }
    };

    ($cursor: ident, guid) => {
        $crate::guid::Guid::from_cursor($cursor)
    };

    ($cursor: ident, sid) => {
        $crate::ntsid::Sid::from_cursor($cursor)
    };

    ($cursor: ident, hex32) => {
        try_read!($cursor, u32, "hex32").map(|v| format!("0x{v:x}"))
    };

    ($cursor: ident, hex64) => {
        try_read!($cursor, u64, "hex64").map(|v| format!("0x{v:x}"))
    };

    ($cursor: ident, filetime) => {
        try_read!($cursor, u64, "filetime").map($crate::utils::datetime_from_filetime)
    };

    ($cursor: ident, systime) => {
        $crate::utils::read_systemtime($cursor)
    };

    ($cursor: ident, utf_16_str) => {
        $crate::utils::read_len_prefixed_utf16_string($cursor, false)
            .map(|s| std::borrow::Cow::Owned(s.unwrap_or_default()))
    };
}

/// Reads a `$size`-byte run of consecutive `$unit` elements.
/// We stop once at least `$size` bytes have been consumed since the start of the call.
macro_rules! try_read_sized_array {
    ($cursor: ident, $unit: ident, $size: ident) => {{
        let mut array = vec![];
        let start_pos = $cursor.position();

        loop {
            if ($cursor.position() - start_pos) >= u64::from($size) {
                break;
            }

            let val = try_read!($cursor, $unit)?;
            array.push(val);
        }

        array
    }};
}
