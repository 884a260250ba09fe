//! Line-oriented protocol layer: tokenizes, dispatches, and replies over a
//! single TCP connection. The accept loop and server-side state (Recorder,
//! ClassifierStateMachine, device/classifier registries) live in `engine`,
//! which implements `CommandContext`.

pub mod dispatcher;
pub mod encode;
pub mod tokenizer;

pub use dispatcher::CommandContext;

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;

use log::{debug, warn};

/// Reads newline-delimited commands from `stream` until it closes or a write
/// fails, dispatching each through `ctx` and writing back every reply line.
pub fn serve_connection(stream: TcpStream, ctx: &dyn CommandContext) -> std::io::Result<()> {
    let peer = stream.peer_addr().ok();
    let mut writer = stream.try_clone()?;
    let reader = BufReader::new(stream);

    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("connection {peer:?} read error: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let tokens = match tokenizer::tokenize(&line) {
            Ok(tokens) => tokens.into_iter().collect(),
            Err(e) => {
                let reply = format!("ERROR {} \"{}\"\r\n", e.code(), e.message());
                if writer.write_all(reply.as_bytes()).is_err() {
                    break;
                }
                continue;
            }
        };

        debug!("{peer:?} -> {line}");
        let replies = dispatcher::dispatch(ctx, tokens);
        for reply in replies {
            if writer.write_all(format!("{reply}\r\n").as_bytes()).is_err() {
                return Ok(());
            }
        }
    }

    Ok(())
}
