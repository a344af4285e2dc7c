//! Word-boundary completion entries for typeahead search.
//!
//! A text with `n` whitespace-separated words becomes `n` completion
//! entries, one per word. Each entry starts at its word and runs to the end
//! of the text, so a prefix query matching any word also matches the rest
//! of the phrase after it.

/// Build the completion entries for `text`, in word order.
///
/// Whitespace runs never produce empty entries, and trailing whitespace is
/// kept as part of the last entry.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut entries = Vec::new();
    let mut in_whitespace = true;

    for (pos, c) in text.char_indices() {
        if c.is_whitespace() {
            in_whitespace = true;
        } else if in_whitespace {
            in_whitespace = false;
            entries.push(text[pos..].to_string());
        }
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_entry_per_word() {
        assert_eq!(tokenize("a bb c"), vec!["a bb c", "bb c", "c"]);
    }

    #[test]
    fn test_surrounding_whitespace() {
        assert_eq!(tokenize("   x  "), vec!["x  "]);
    }

    #[test]
    fn test_empty_and_blank() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("   \t\n").is_empty());
    }

    #[test]
    fn test_collapsed_whitespace() {
        assert_eq!(
            tokenize("This  is\tcool"),
            vec!["This  is\tcool", "is\tcool", "cool"]
        );
    }

    #[test]
    fn test_repeated_words_kept() {
        assert_eq!(tokenize("moo moo"), vec!["moo moo", "moo"]);
    }

    #[test]
    fn test_multibyte_boundaries() {
        assert_eq!(tokenize("café über"), vec!["café über", "über"]);
    }

    #[test]
    fn test_entry_count_matches_words() {
        let text = "This is an amazing project";
        let entries = tokenize(text);
        assert_eq!(entries.len(), 5);
        assert!(entries.iter().all(|e| text.ends_with(e.as_str())));
    }
}
