//! Encodes commands as RESP-style multi-bulk request frames.
//!
//! `*N\r\n$L\r\narg\r\n...` — the canonical framing used by the cluster's
//! text protocol. [`encode_commands`] returns a list of byte buffers rather
//! than one big buffer: once the accumulated frame or the next argument
//! would cross [`STREAM_THRESHOLD`], the partial buffer and the oversized
//! argument are flushed as separate chunks so a single huge `MIGRATE` key
//! does not force one large contiguous allocation.

const CRLF: &[u8] = b"\r\n";
/// Above this many bytes, stop accumulating into the current buffer and
/// flush it as its own write.
const STREAM_THRESHOLD: usize = 6 * 1024;

/// One argument of a command, before it is serialized onto the wire.
#[derive(Debug, Clone)]
pub enum CommandArg {
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl CommandArg {
    fn into_bytes(self) -> Vec<u8> {
        match self {
            CommandArg::Int(v) => v.to_string().into_bytes(),
            CommandArg::Float(v) => v.to_string().into_bytes(),
            CommandArg::Text(v) => v.into_bytes(),
            CommandArg::Bytes(v) => v,
        }
    }
}

impl From<&str> for CommandArg {
    fn from(v: &str) -> Self {
        CommandArg::Text(v.to_string())
    }
}

impl From<String> for CommandArg {
    fn from(v: String) -> Self {
        CommandArg::Text(v)
    }
}

impl From<i64> for CommandArg {
    fn from(v: i64) -> Self {
        CommandArg::Int(v)
    }
}

impl From<u16> for CommandArg {
    fn from(v: u16) -> Self {
        CommandArg::Int(v as i64)
    }
}

impl From<usize> for CommandArg {
    fn from(v: usize) -> Self {
        CommandArg::Int(v as i64)
    }
}

impl From<Vec<u8>> for CommandArg {
    fn from(v: Vec<u8>) -> Self {
        CommandArg::Bytes(v)
    }
}

/// Encodes a batch of commands as a sequence of frames to write, in order,
/// onto the same connection. Used both for a single `execute()` call (a
/// batch of one) and for `execute_bulk()` pipelining.
pub fn encode_commands(commands: Vec<Vec<CommandArg>>) -> Vec<Vec<u8>> {
    let mut output = Vec::new();
    let mut buf: Vec<u8> = Vec::new();

    for command in commands {
        buf.extend_from_slice(format!("*{}\r\n", command.len()).as_bytes());

        for arg in command {
            let arg = arg.into_bytes();
            if buf.len() > STREAM_THRESHOLD || arg.len() > STREAM_THRESHOLD {
                buf.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
                output.push(std::mem::take(&mut buf));
                output.push(arg);
                buf.extend_from_slice(CRLF);
            } else {
                buf.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
                buf.extend_from_slice(&arg);
                buf.extend_from_slice(CRLF);
            }
        }
    }
    output.push(buf);
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(words: &[&str]) -> Vec<CommandArg> {
        words.iter().map(|w| CommandArg::from(*w)).collect()
    }

    #[test]
    fn single_small_command_is_one_frame() {
        let frames = encode_commands(vec![args(&["set", "foo", "bar"])]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], b"*3\r\n$3\r\nset\r\n$3\r\nfoo\r\n$3\r\nbar\r\n");
    }

    #[test]
    fn bulk_commands_preserve_order() {
        let frames = encode_commands(vec![args(&["ping"]), args(&["cluster", "info"])]);
        assert_eq!(
            frames[0],
            b"*1\r\n$4\r\nping\r\n*2\r\n$7\r\ncluster\r\n$4\r\ninfo\r\n"
        );
    }

    #[test]
    fn oversized_argument_is_streamed_separately() {
        let big = vec![b'x'; STREAM_THRESHOLD + 10];
        let frames = encode_commands(vec![vec![
            CommandArg::from("set"),
            CommandArg::from("k"),
            CommandArg::from(big.clone()),
        ]]);
        // header+small args, then the oversized arg on its own, then trailing CRLF buffer
        assert!(frames.len() >= 3);
        assert!(frames.iter().any(|f| f == &big));
    }

    #[test]
    fn integer_and_float_args_render_as_text() {
        let frames = encode_commands(vec![vec![
            CommandArg::from("migrate"),
            CommandArg::Int(0),
            CommandArg::Float(30000.0),
        ]]);
        let joined: Vec<u8> = frames.into_iter().flatten().collect();
        let text = String::from_utf8(joined).unwrap();
        assert!(text.contains("$1\r\n0\r\n"));
        assert!(text.contains("30000"));
    }
}
