//! Per-category command dispatch: one parse routine per command category
//! (device, classifier, mode, marker). The dispatcher only knows how to walk
//! a token queue and call back into a
//! `CommandContext`; the Engine is the concrete implementation, so this
//! module stays ignorant of Recorder/ClassifierStateMachine/Device types.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::BciError;
use crate::types::ParamValue;

use super::encode::encode_list;

/// The operations a parsed command may need to perform against the running
/// server. Implemented by the Engine.
pub trait CommandContext {
    fn list_devices(&self) -> Vec<String>;
    fn set_device(&self, name: &str) -> Result<(), BciError>;
    fn open_device(&self) -> Result<(), BciError>;
    fn set_device_parameter(&self, name: &str, values: Vec<ParamValue>) -> Result<(), BciError>;
    fn get_device_parameter(&self, name: &str) -> Result<ParamValue, BciError>;

    fn list_classifiers(&self) -> Vec<String>;
    fn set_classifier(&self, name: &str) -> Result<(), BciError>;
    fn set_classifier_parameter(&self, name: &str, values: Vec<ParamValue>) -> Result<(), BciError>;
    fn get_classifier_parameter(&self, name: &str) -> Result<ParamValue, BciError>;

    fn set_mode(&self, mode: &str) -> Result<(), BciError>;
    fn get_mode(&self) -> Result<String, BciError>;

    fn set_marker(&self, code: i32, kind: &str, timestamp: f64) -> Result<(), BciError>;
}

type Tokens = VecDeque<ParamValue>;

fn pop_str(tokens: &mut Tokens) -> Option<String> {
    match tokens.pop_front() {
        Some(ParamValue::Str(s)) => Some(s),
        _ => None,
    }
}

fn peek_is_str(tokens: &Tokens, index: usize) -> bool {
    matches!(tokens.get(index), Some(ParamValue::Str(_)))
}

/// Parses and executes one already-tokenized line, returning every line that
/// should be sent back to the client. A malformed or rejected command yields
/// a single `ERROR <code> "<message>"` line instead of an `Err`, since every
/// failure mode here is a normal, recoverable protocol condition rather than
/// a server fault.
pub fn dispatch(ctx: &dyn CommandContext, mut tokens: Tokens) -> Vec<String> {
    match dispatch_inner(ctx, &mut tokens) {
        Ok(lines) => lines,
        Err(e) => vec![format!("ERROR {} \"{}\"", e.code(), e.message())],
    }
}

fn dispatch_inner(ctx: &dyn CommandContext, tokens: &mut Tokens) -> Result<Vec<String>, BciError> {
    if !peek_is_str(tokens, 0) {
        return Err(BciError::protocol(1, "Please specify command category"));
    }
    let category = pop_str(tokens).unwrap().to_ascii_lowercase();

    match category.as_str() {
        "ping" => Ok(vec!["PONG".to_string()]),
        "device" => dispatch_device(ctx, tokens),
        "classifier" => dispatch_classifier(ctx, tokens),
        "mode" => dispatch_mode(ctx, tokens),
        "marker" => dispatch_marker(ctx, tokens),
        _ => Err(BciError::protocol(1, "Unknown command category")),
    }
}

fn dispatch_device(ctx: &dyn CommandContext, tokens: &mut Tokens) -> Result<Vec<String>, BciError> {
    if !peek_is_str(tokens, 0) {
        return Err(BciError::protocol(101, "Please specify device command"));
    }
    let command = pop_str(tokens).unwrap().to_ascii_lowercase();

    match command.as_str() {
        "get" => {
            let names = ctx
                .list_devices()
                .into_iter()
                .map(ParamValue::Str)
                .collect::<Vec<_>>();
            Ok(vec![format!("DEVICE PROVIDE {}", encode_list(&names))])
        }
        "set" => {
            if !peek_is_str(tokens, 0) {
                return Err(BciError::protocol(102, "Please specify device to set"));
            }
            let name = pop_str(tokens).unwrap();
            ctx.set_device(&name)?;
            Ok(vec![])
        }
        "param" => {
            if !peek_is_str(tokens, 0) {
                return Err(BciError::protocol(103, "Please specify parameter operation"));
            }
            if !peek_is_str(tokens, 1) {
                return Err(BciError::protocol(104, "Please specify parameter name"));
            }
            let operation = pop_str(tokens).unwrap().to_ascii_lowercase();
            let name = pop_str(tokens).unwrap().to_ascii_lowercase();

            match operation.as_str() {
                "set" => {
                    if tokens.is_empty() {
                        return Err(BciError::protocol(105, "Please specify parameter value(s)"));
                    }
                    let values: Vec<ParamValue> = tokens.drain(..).collect();
                    ctx.set_device_parameter(&name, values)?;
                    Ok(vec![])
                }
                "get" => {
                    let value = ctx.get_device_parameter(&name)?;
                    Ok(vec![format!(
                        "DEVICE PARAM PROVIDE \"{name}\" {}",
                        encode_list(std::slice::from_ref(&value))
                    )])
                }
                _ => Ok(vec![]),
            }
        }
        "open" => {
            ctx.open_device()?;
            Ok(vec![])
        }
        _ => Err(BciError::protocol(101, "Unknown device command")),
    }
}

fn dispatch_classifier(ctx: &dyn CommandContext, tokens: &mut Tokens) -> Result<Vec<String>, BciError> {
    if !peek_is_str(tokens, 0) {
        return Err(BciError::protocol(201, "Please specify classifier command"));
    }
    let command = pop_str(tokens).unwrap().to_ascii_lowercase();

    match command.as_str() {
        "get" => {
            let names = ctx
                .list_classifiers()
                .into_iter()
                .map(ParamValue::Str)
                .collect::<Vec<_>>();
            Ok(vec![format!("CLASSIFIER PROVIDE {}", encode_list(&names))])
        }
        "set" => {
            if !peek_is_str(tokens, 0) {
                return Err(BciError::protocol(202, "Please specify classifier to set"));
            }
            let name = pop_str(tokens).unwrap();
            ctx.set_classifier(&name)?;
            Ok(vec![])
        }
        "param" => {
            if !peek_is_str(tokens, 0) {
                return Err(BciError::protocol(203, "Please specify parameter operation"));
            }
            if !peek_is_str(tokens, 1) {
                return Err(BciError::protocol(204, "Please specify parameter name"));
            }
            let operation = pop_str(tokens).unwrap().to_ascii_lowercase();
            let name = pop_str(tokens).unwrap().to_ascii_lowercase();

            match operation.as_str() {
                "set" => {
                    if tokens.is_empty() {
                        return Err(BciError::protocol(205, "Please specify parameter value(s)"));
                    }
                    let values: Vec<ParamValue> = tokens.drain(..).collect();
                    ctx.set_classifier_parameter(&name, values)?;
                    Ok(vec![])
                }
                "get" => {
                    let value = ctx.get_classifier_parameter(&name)?;
                    Ok(vec![format!(
                        "CLASSIFIER PARAM PROVIDE \"{name}\" {}",
                        encode_list(std::slice::from_ref(&value))
                    )])
                }
                _ => Err(BciError::protocol(201, "Unknown classifier command")),
            }
        }
        _ => Err(BciError::protocol(201, "Unknown classifier command")),
    }
}

fn dispatch_mode(ctx: &dyn CommandContext, tokens: &mut Tokens) -> Result<Vec<String>, BciError> {
    if !peek_is_str(tokens, 0) {
        return Err(BciError::protocol(301, "Please specify mode command"));
    }
    let command = pop_str(tokens).unwrap().to_ascii_lowercase();

    match command.as_str() {
        "set" => {
            if !peek_is_str(tokens, 0) {
                return Err(BciError::protocol(302, "Please specify mode to set"));
            }
            let mode = pop_str(tokens).unwrap();
            ctx.set_mode(&mode)?;
            Ok(vec![])
        }
        "get" => Ok(vec![format!("MODE PROVIDE \"{}\"", ctx.get_mode()?)]),
        _ => Err(BciError::protocol(301, "Unknown mode command")),
    }
}

fn dispatch_marker(ctx: &dyn CommandContext, tokens: &mut Tokens) -> Result<Vec<String>, BciError> {
    if tokens.len() < 2 {
        return Err(BciError::protocol(401, "Please specify both a marker code and type"));
    }

    let kind = pop_str(tokens).ok_or_else(|| BciError::protocol(402, "Unknown marker type"))?;
    if kind != "trigger" && kind != "switch" {
        return Err(BciError::protocol(402, "Unknown marker type"));
    }

    let code = match tokens.pop_front() {
        Some(ParamValue::Int(n)) => n as i32,
        _ => return Err(BciError::protocol(401, "Please specify an integer marker code")),
    };

    let timestamp = match tokens.pop_front() {
        Some(ParamValue::Float(f)) => f,
        Some(ParamValue::Int(n)) => n as f64,
        Some(_) => return Err(BciError::protocol(403, "Invalid timestamp")),
        None => SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64(),
    };

    ctx.set_marker(code, &kind, timestamp)?;
    Ok(vec![])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct MockCtx {
        markers: RefCell<Vec<(i32, String, f64)>>,
        mode: RefCell<String>,
    }

    impl CommandContext for MockCtx {
        fn list_devices(&self) -> Vec<String> {
            vec!["emulator".to_string()]
        }
        fn set_device(&self, _name: &str) -> Result<(), BciError> {
            Ok(())
        }
        fn open_device(&self) -> Result<(), BciError> {
            Ok(())
        }
        fn set_device_parameter(&self, _name: &str, _values: Vec<ParamValue>) -> Result<(), BciError> {
            Ok(())
        }
        fn get_device_parameter(&self, _name: &str) -> Result<ParamValue, BciError> {
            Ok(ParamValue::Int(1))
        }
        fn list_classifiers(&self) -> Vec<String> {
            vec!["boundary".to_string()]
        }
        fn set_classifier(&self, _name: &str) -> Result<(), BciError> {
            Ok(())
        }
        fn set_classifier_parameter(&self, _name: &str, _values: Vec<ParamValue>) -> Result<(), BciError> {
            Ok(())
        }
        fn get_classifier_parameter(&self, _name: &str) -> Result<ParamValue, BciError> {
            Ok(ParamValue::Float(0.5))
        }
        fn set_mode(&self, mode: &str) -> Result<(), BciError> {
            *self.mode.borrow_mut() = mode.to_string();
            Ok(())
        }
        fn get_mode(&self) -> Result<String, BciError> {
            Ok(self.mode.borrow().clone())
        }
        fn set_marker(&self, code: i32, kind: &str, timestamp: f64) -> Result<(), BciError> {
            self.markers.borrow_mut().push((code, kind.to_string(), timestamp));
            Ok(())
        }
    }

    fn tok(words: &[ParamValue]) -> Tokens {
        words.iter().cloned().collect()
    }

    #[test]
    fn ping_replies_pong() {
        let ctx = MockCtx::default();
        let lines = dispatch(&ctx, tok(&[ParamValue::Str("ping".to_string())]));
        assert_eq!(lines, vec!["PONG".to_string()]);
    }

    #[test]
    fn device_get_lists_devices() {
        let ctx = MockCtx::default();
        let lines = dispatch(
            &ctx,
            tok(&[ParamValue::Str("device".to_string()), ParamValue::Str("get".to_string())]),
        );
        assert_eq!(lines, vec!["DEVICE PROVIDE \"emulator\"".to_string()]);
    }

    #[test]
    fn unknown_category_yields_coded_error() {
        let ctx = MockCtx::default();
        let lines = dispatch(&ctx, tok(&[ParamValue::Str("bogus".to_string())]));
        assert_eq!(lines, vec!["ERROR 1 \"Unknown command category\"".to_string()]);
    }

    #[test]
    fn marker_without_timestamp_uses_current_time() {
        let ctx = MockCtx::default();
        let lines = dispatch(
            &ctx,
            tok(&[
                ParamValue::Str("marker".to_string()),
                ParamValue::Str("trigger".to_string()),
                ParamValue::Int(7),
            ]),
        );
        assert!(lines.is_empty());
        assert_eq!(ctx.markers.borrow()[0].0, 7);
        assert_eq!(ctx.markers.borrow()[0].1, "trigger");
    }

    #[test]
    fn marker_rejects_unknown_type() {
        let ctx = MockCtx::default();
        let lines = dispatch(
            &ctx,
            tok(&[
                ParamValue::Str("marker".to_string()),
                ParamValue::Str("bogus".to_string()),
                ParamValue::Int(7),
            ]),
        );
        assert_eq!(lines, vec!["ERROR 402 \"Unknown marker type\"".to_string()]);
    }

    #[test]
    fn mode_get_reports_current_mode() {
        let ctx = MockCtx::default();
        *ctx.mode.borrow_mut() = "idle".to_string();
        let lines = dispatch(
            &ctx,
            tok(&[ParamValue::Str("mode".to_string()), ParamValue::Str("get".to_string())]),
        );
        assert_eq!(lines, vec!["MODE PROVIDE \"idle\"".to_string()]);
    }
}
