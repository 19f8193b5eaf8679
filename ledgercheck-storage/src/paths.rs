//! File naming for state kept on local disk.

/// Replace every character outside `[A-Za-z0-9._ -]` with `%`.
///
/// Applied to generated file names only; directory components are never
/// derived from table identifiers.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '.' | '-' | '_' | ' ' => c,
            _ => '%',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_names_untouched() {
        assert_eq!(sanitize_file_name("BANK_LEDGER_A1.json"), "BANK_LEDGER_A1.json");
    }

    #[test]
    fn test_separators_and_symbols_replaced() {
        assert_eq!(sanitize_file_name("a/b\\c$d"), "a%b%c%d");
        assert_eq!(sanitize_file_name("Ünïcode"), "%n%code");
    }
}
