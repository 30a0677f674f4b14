mod binxml_utils;
mod time;

pub use binxml_utils::{
    read_ansi_string_by_size, read_len_prefixed_utf16_string, read_utf16_by_size,
    read_utf16_string_array, strip_control_chars,
};
pub use time::{datetime_from_filetime, format_utc, read_systemtime};
