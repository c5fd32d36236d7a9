use std::fmt;

use url::Url;

use crate::error::Error;

pub struct OptFmt<T>(pub Option<T>);

impl<T: fmt::Display> fmt::Display for OptFmt<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref t) = self.0 {
            fmt::Display::fmt(t, f)
        } else {
            f.write_str("-")
        }
    }
}

/// Append an object key to a base url, one path segment per `/` separated part of the key.
pub fn join_key_url(base: &Url, key: &str) -> Result<Url, Error> {
    let mut url = base.clone();
    {
        let mut path_segments = url
            .path_segments_mut()
            .map_err(|_| Error::InvalidUrlError(String::from("URL cannot be a base")))?;
        path_segments.pop_if_empty();
        for segment in key.split('/') {
            path_segments.push(segment);
        }
    }
    Ok(url)
}
