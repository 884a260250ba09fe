//! Splits one line of client input into tokens: bare words, quoted strings
//! (with backslash escapes), integers and floats, in that precedence order.
//! A hand-rolled scanner rather than a regex, since the grammar is simple
//! enough to walk directly and `Regex` isn't part of this server's
//! dependency stack.

use crate::error::BciError;
use crate::types::ParamValue;

pub fn tokenize(line: &str) -> Result<Vec<ParamValue>, BciError> {
    let chars: Vec<char> = line.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        while i < chars.len() && chars[i].is_whitespace() {
            i += 1;
        }
        if i >= chars.len() {
            break;
        }

        if chars[i] == '"' {
            i += 1;
            let mut value = String::new();
            while i < chars.len() && chars[i] != '"' {
                if chars[i] == '\\' && i + 1 < chars.len() {
                    value.push(chars[i + 1]);
                    i += 2;
                } else {
                    value.push(chars[i]);
                    i += 1;
                }
            }
            if i >= chars.len() {
                return Err(BciError::protocol(1, "unterminated quoted string"));
            }
            i += 1;
            tokens.push(ParamValue::Str(value));
            continue;
        }

        let start = i;
        while i < chars.len() && !chars[i].is_whitespace() {
            i += 1;
        }
        let word: String = chars[start..i].iter().collect();

        if let Ok(n) = word.parse::<i64>() {
            tokens.push(ParamValue::Int(n));
        } else if let Ok(f) = word.parse::<f64>() {
            tokens.push(ParamValue::Float(f));
        } else {
            tokens.push(ParamValue::Str(word));
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_bare_words_ints_and_floats() {
        let tokens = tokenize("device set emulator 42 -3.5").unwrap();
        assert_eq!(
            tokens,
            vec![
                ParamValue::Str("device".to_string()),
                ParamValue::Str("set".to_string()),
                ParamValue::Str("emulator".to_string()),
                ParamValue::Int(42),
                ParamValue::Float(-3.5),
            ]
        );
    }

    #[test]
    fn tokenizes_quoted_strings_with_escapes() {
        let tokens = tokenize(r#"marker trigger 7 "say \"hi\"""#).unwrap();
        assert_eq!(tokens[3], ParamValue::Str("say \"hi\"".to_string()));
    }

    #[test]
    fn rejects_unterminated_quote() {
        assert!(tokenize("device set \"oops").is_err());
    }
}
