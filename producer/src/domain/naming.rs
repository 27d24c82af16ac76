//! Naming helpers shared by routing and header derivation.

/// Convert a snake_case or kebab-case identifier to camelCase.
///
/// Runs of `_` and `-` separate words. Every letter that follows a
/// non-letter starts a word and is upper-cased; the remaining letters are
/// lower-cased. The first character of the result is lower-cased.
///
/// # Examples
/// ```
/// use eventproducer::domain::naming::camel_case;
///
/// assert_eq!(camel_case("ligt_in_bouwblok"), "ligtInBouwblok");
/// assert_eq!(camel_case("test_case_2"), "testCase2");
/// assert_eq!(camel_case("ligt_in_2de_buurt"), "ligtIn2DeBuurt");
/// ```
pub fn camel_case(value: &str) -> String {
    let mut titled = String::with_capacity(value.len());
    let mut in_word = false;
    for ch in value.chars() {
        if ch == '_' || ch == '-' {
            in_word = false;
        } else if ch.is_alphabetic() {
            if in_word {
                titled.extend(ch.to_lowercase());
            } else {
                titled.extend(ch.to_uppercase());
            }
            in_word = true;
        } else {
            titled.push(ch);
            in_word = false;
        }
    }

    let mut chars = titled.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_lowercase().chain(chars).collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("test_case", "testCase")]
    #[case("test_case_2", "testCase2")]
    #[case("test", "test")]
    #[case("ligt_in_gebieden_bouwblok", "ligtInGebiedenBouwblok")]
    #[case("_private", "private")]
    #[case("ligt_in-gebied", "ligtInGebied")]
    #[case("ligt_in_2de_buurt", "ligtIn2DeBuurt")]
    #[case("ligt_in_BAG", "ligtInBag")]
    #[case("ligt__in--wijk", "ligtInWijk")]
    fn converts_snake_case(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(camel_case(input), expected);
    }
}
