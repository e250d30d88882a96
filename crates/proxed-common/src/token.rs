/// Result of splitting a combined `<apiKeyFragment>.<deviceOrTestToken>`
/// credential string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CombinedToken {
    pub api_key_fragment: String,
    pub token: Option<String>,
}

/// Splits at the *last* dot so the key fragment may itself contain dots.
///
/// A missing dot, or a dot as the final character, yields the whole input as
/// the fragment and no token. Total; never fails.
pub fn parse_combined_token(input: &str) -> CombinedToken {
    match input.rfind('.') {
        Some(pos) if pos + 1 < input.len() => CombinedToken {
            api_key_fragment: input[..pos].to_string(),
            token: Some(input[pos + 1..].to_string()),
        },
        _ => CombinedToken {
            api_key_fragment: input.to_string(),
            token: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(input: &str) -> (String, Option<String>) {
        let out = parse_combined_token(input);
        (out.api_key_fragment, out.token)
    }

    #[test]
    fn splits_at_last_dot() {
        assert_eq!(parsed("a.b.c"), ("a.b".to_string(), Some("c".to_string())));
    }

    #[test]
    fn no_dot_means_no_token() {
        assert_eq!(parsed("singleValue"), ("singleValue".to_string(), None));
    }

    #[test]
    fn trailing_dot_keeps_whole_input_as_fragment() {
        assert_eq!(parsed("apiKey."), ("apiKey.".to_string(), None));
    }

    #[test]
    fn leading_dot_yields_empty_fragment() {
        assert_eq!(parsed(".token"), (String::new(), Some("token".to_string())));
    }

    #[test]
    fn empty_input() {
        assert_eq!(parsed(""), (String::new(), None));
    }
}
