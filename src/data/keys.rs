use rand::{TryRngCore, rngs::OsRng};

use crate::error::Error;

const KEY_BYTES: usize = 32;

/// Generate a random object key with an extension matching the given media type.
///
/// The key is 32 bytes from the OS random source encoded as unpadded url-safe base64, so it
/// never contains `/`, `+` or `,`.
pub fn generate_key(media_type: &str) -> Result<String, Error> {
    let mut key = [0u8; KEY_BYTES];
    OsRng
        .try_fill_bytes(&mut key)
        .map_err(|e| Error::RandomSourceError(e.to_string()))?;

    let file_name = data_encoding::BASE64URL_NOPAD.encode(&key);
    Ok(format!("{file_name}{}", media_type_to_extension(media_type)))
}

/// `image/png` -> `.png`, anything that isn't exactly `type/subtype` -> `.bin`
pub fn media_type_to_extension(media_type: &str) -> String {
    match media_type.split('/').collect::<Vec<_>>().as_slice() {
        [main_type, sub_type] if !main_type.is_empty() && !sub_type.is_empty() => {
            format!(".{sub_type}")
        }
        _ => String::from(".bin"),
    }
}
