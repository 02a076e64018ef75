fn is_word_separator(ch: char) -> bool {
    ch == '_' || ch == '-' || ch.is_whitespace()
}

/// `get_player_name` -> `getPlayerName`. Only the first letter of each segment is touched.
pub fn to_camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for (index, word) in name
        .split(is_word_separator)
        .filter(|word| !word.is_empty())
        .enumerate()
    {
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            if index == 0 {
                out.extend(first.to_lowercase());
            } else {
                out.extend(first.to_uppercase());
            }
            out.push_str(chars.as_str());
        }
    }
    out
}

/// `apple` -> `Apple`. Empty input yields an empty string.
pub fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod naming_tests {
    use super::*;

    #[test]
    fn camel_case_joins_segments() {
        assert_eq!(to_camel_case("get_player_name"), "getPlayerName");
        assert_eq!(to_camel_case("wordOne_wordTwo"), "wordOneWordTwo");
        assert_eq!(to_camel_case("my_hp"), "myHp");
    }

    #[test]
    fn camel_case_single_segment_only_touches_first_letter() {
        assert_eq!(to_camel_case("print"), "print");
        assert_eq!(to_camel_case("Print"), "print");
        assert_eq!(to_camel_case("printHTML"), "printHTML");
    }

    #[test]
    fn camel_case_skips_empty_segments_and_other_separators() {
        assert_eq!(to_camel_case("__to__int_"), "toInt");
        assert_eq!(to_camel_case("numeric-modifier name"), "numericModifierName");
        assert_eq!(to_camel_case(""), "");
        assert_eq!(to_camel_case("___"), "");
    }

    #[test]
    fn capitalize_uppercases_first_character() {
        assert_eq!(capitalize("apple"), "Apple");
        assert_eq!(capitalize("Apple"), "Apple");
        assert_eq!(capitalize("a"), "A");
        assert_eq!(capitalize("ßtate"), "SState");
    }

    #[test]
    fn capitalize_empty_is_empty() {
        assert_eq!(capitalize(""), "");
    }
}
