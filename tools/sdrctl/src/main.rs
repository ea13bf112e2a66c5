// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! sdrctl - talk to a running sdrmgrd over its unix socket
//!
//! ```bash
//! sdrctl status
//! sdrctl --socket /tmp/sdrmgr.sock workers
//! sdrctl stop 3
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use sdrmgr::ctltool::{self, CtlCommand, HEADER_LEN};
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "sdrctl")]
#[command(author = "naskel.com")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Query and drive a running sdrmgrd")]
struct Args {
    /// Daemon unix socket
    #[arg(short, long, default_value = "/run/sdrmgr.sock")]
    socket: PathBuf,

    /// Reply timeout (seconds)
    #[arg(short, long, default_value = "5")]
    timeout: u64,

    /// Command and arguments (see `sdrctl help`)
    #[arg(required = true, num_args = 1..)]
    command: Vec<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let line = args.command.join(" ");

    let cmd: CtlCommand = line.parse().with_context(|| format!("'{line}'"))?;

    let mut stream = UnixStream::connect(&args.socket)
        .with_context(|| format!("Failed to connect to {}", args.socket.display()))?;
    stream.set_read_timeout(Some(Duration::from_secs(args.timeout)))?;

    let reply = exchange(&mut stream, &cmd.to_string())?;
    print!("{reply}");
    Ok(())
}

/// Send one command frame and read one reply frame.
fn exchange<S: Read + Write>(stream: &mut S, line: &str) -> Result<String> {
    stream
        .write_all(&ctltool::encode_frame(line))
        .context("Failed to send command")?;

    let mut header = [0u8; HEADER_LEN];
    stream
        .read_exact(&mut header)
        .context("No reply from daemon")?;
    let len = ctltool::frame_len(&header)?;

    let mut frame = vec![0u8; len];
    frame[..HEADER_LEN].copy_from_slice(&header);
    stream
        .read_exact(&mut frame[HEADER_LEN..])
        .context("Truncated reply")?;

    match ctltool::decode_frame(&frame) {
        Ok(text) => Ok(text.to_string()),
        Err(e) => bail!("bad reply: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Canned reply on read, captured request on write.
    struct Loopback {
        reply: Cursor<Vec<u8>>,
        sent: Vec<u8>,
    }

    impl Read for Loopback {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.reply.read(buf)
        }
    }

    impl Write for Loopback {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.sent.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_exchange() {
        let mut io = Loopback {
            reply: Cursor::new(ctltool::encode_frame("phase RUNNING\n")),
            sent: Vec::new(),
        };
        let text = exchange(&mut io, "status").expect("exchange");
        assert_eq!(text, "phase RUNNING\n");
        assert_eq!(ctltool::decode_frame(&io.sent), Ok("status"));
    }

    #[test]
    fn test_truncated_reply() {
        let mut frame = ctltool::encode_frame("workers table");
        frame.truncate(12);
        let mut io = Loopback {
            reply: Cursor::new(frame),
            sent: Vec::new(),
        };
        assert!(exchange(&mut io, "workers").is_err());
    }

    #[test]
    fn test_args() {
        let args = Args::try_parse_from(["sdrctl", "-s", "/tmp/x.sock", "stop", "4"]).expect("parse");
        assert_eq!(args.command.join(" ").parse::<CtlCommand>(), Ok(CtlCommand::Stop(4)));
        assert!(Args::try_parse_from(["sdrctl"]).is_err());
    }
}
