/// Counts the distinct values yielded by `iter`, e.g. the users owning a set of jobs
pub fn count_unique<'a, I>(iter: I) -> usize
where
    I: IntoIterator<Item = &'a str>,
{
    let mut values = iter.into_iter().collect::<Vec<_>>();
    values.sort_unstable();
    values.dedup();
    values.len()
}

/// Converts an iterator of &str to an  ``--Format`` argument
pub fn format_string<'a, I, S>(iter: I) -> String
where
    I: Iterator<Item = &'a S>,
    S: ?Sized + AsRef<str> + 'a,
{
    iter
        // Remove limit on field length (defaults to 20)
        .map(|v| format!("{}:0", v.as_ref()))
        .collect::<Vec<_>>()
        // Join fields by a character that does not potentially appear in values
        .join("|,")
}
