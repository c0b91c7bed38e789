use nix::unistd::{Uid, User};

/// Splits `haystack` at the first occurrence of `needle`, returning None if no needle was found
pub fn split_first(haystack: &[u8], needle: u8) -> Option<(&[u8], &[u8])> {
    let index = haystack.iter().position(|&c| c == needle)?;

    Some((&haystack[..index], &haystack[index + 1..]))
}

/// Returns the name of the user running this process
pub fn current_user() -> Option<String> {
    match User::from_uid(Uid::current()) {
        Ok(Some(user)) => Some(user.name),
        _ => std::env::var("USER")
            .or_else(|_| std::env::var("LOGNAME"))
            .ok()
            .filter(|v| !v.is_empty()),
    }
}
