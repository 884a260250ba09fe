//! Renders a `ParamValue` back into wire text, mirroring the tokenizer's
//! grammar: lists are space-joined recursively, numbers print plainly,
//! strings are quoted with embedded quotes escaped.

use crate::types::ParamValue;

pub fn encode(value: &ParamValue) -> String {
    match value {
        ParamValue::List(items) => items.iter().map(encode).collect::<Vec<_>>().join(" "),
        ParamValue::Int(i) => i.to_string(),
        ParamValue::Float(f) => f.to_string(),
        ParamValue::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        ParamValue::Str(s) => format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
    }
}

pub fn encode_list(values: &[ParamValue]) -> String {
    values.iter().map(encode).collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_scalars() {
        assert_eq!(encode(&ParamValue::Int(42)), "42");
        assert_eq!(encode(&ParamValue::Float(1.5)), "1.5");
        assert_eq!(encode(&ParamValue::Bool(true)), "1");
        assert_eq!(encode(&ParamValue::Bool(false)), "0");
    }

    #[test]
    fn encodes_strings_with_escaped_quotes() {
        assert_eq!(
            encode(&ParamValue::Str("say \"hi\"".to_string())),
            "\"say \\\"hi\\\"\""
        );
    }

    #[test]
    fn encodes_lists_space_joined() {
        let value = ParamValue::List(vec![ParamValue::Int(1), ParamValue::Str("a".to_string())]);
        assert_eq!(encode(&value), "1 \"a\"");
    }
}
