//! Stored-name generation and checks.
//!
//! A stored name is 32 lower-case hex characters from a random v4 UUID, followed by the
//! lower-cased extension of the uploaded file when it had one: `3f2a...9c.png`. Nothing else
//! from the client's filename ends up on disk.

use uuid::Uuid;

const ID_LEN: usize = 32;

/// Last path component of a client-supplied filename, `C:\tmp\cat.png` and `../cat.png` both
/// become `cat.png`.
pub fn base_name(filename: &str) -> &str {
    filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename)
}

/// The substring after the final `.` of the base name, lower-cased. Empty when there is no dot.
pub fn extension_of(filename: &str) -> String {
    base_name(filename)
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default()
}

pub fn unique_name(original_filename: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    let extension = extension_of(original_filename);
    if extension.is_empty() {
        id
    } else {
        format!("{id}.{extension}")
    }
}

/// True if `name` has the shape [`unique_name`] produces.
///
/// Anything that arrives from a request is checked with this before it is joined onto the
/// image directory.
pub fn is_stored_name(name: &str) -> bool {
    let (id, extension) = match name.split_once('.') {
        Some((id, extension)) => (id, Some(extension)),
        None => (name, None),
    };

    let id_ok = id.len() == ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    let extension_ok = match extension {
        None => true,
        Some(ext) => {
            !ext.is_empty()
                && !ext.contains(['/', '\\', '.', '\0'])
                && ext.to_lowercase() == ext
        }
    };

    id_ok && extension_ok
}
