//! Node-address prefix helpers shared by the HTTP listener and the REST client.
//!
//! The controller embeds the owning profile number into every node address it
//! sends over REST as a `n<NNN>_` prefix so that addresses stay unique across
//! node servers sharing one controller. `add_prefix`/`rem_prefix` are exact
//! inverses for any well-formed 1-3 digit profile number.

/// Zero-pad `profile_number` to 3 digits and prefix `address` with `n<NNN>_`.
pub fn add_prefix(profile_number: u32, address: &str) -> String {
    format!("n{:03}_{}", profile_number % 1000, address)
}

/// Strip a leading `n<NNN>_` prefix (5 bytes) from `address`.
///
/// Returns the input unchanged if it does not look like a prefixed address;
/// callers that already validated the prefix exists should prefer the
/// infallible slice form used internally by the HTTP listener.
pub fn rem_prefix(address: &str) -> &str {
    let bytes = address.as_bytes();
    if bytes.len() >= 5
        && bytes[0] == b'n'
        && bytes[1].is_ascii_digit()
        && bytes[2].is_ascii_digit()
        && bytes[3].is_ascii_digit()
        && bytes[4] == b'_'
    {
        &address[5..]
    } else {
        address
    }
}
