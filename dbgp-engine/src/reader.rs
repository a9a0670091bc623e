// Inbound command deframing
//
// IDE commands are plain text, each terminated by a control byte (< 0x20).
// Bytes arrive in arbitrary chunks, so partial commands are buffered until
// their terminator shows up.

use bytes::{Buf, BytesMut};

use crate::protocol::{DbgpError, DbgpResult, MAX_COMMAND_SIZE};

#[derive(Debug, Default)]
pub struct CommandDecoder {
    buf: BytesMut,
}

impl CommandDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes and return every command completed by it
    pub fn feed(&mut self, chunk: &[u8]) -> DbgpResult<Vec<String>> {
        let mut commands = Vec::new();

        for &byte in chunk {
            if byte < 0x20 {
                if !self.buf.is_empty() {
                    let line = String::from_utf8_lossy(&self.buf).into_owned();
                    self.buf.advance(self.buf.len());
                    commands.push(line);
                }
                continue;
            }

            if self.buf.len() >= MAX_COMMAND_SIZE {
                self.buf.clear();
                return Err(DbgpError::Protocol(format!(
                    "Command exceeds {} bytes without terminator",
                    MAX_COMMAND_SIZE
                )));
            }
            self.buf.extend_from_slice(&[byte]);
        }

        Ok(commands)
    }

    /// Bytes of an unterminated command still buffered
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_on_nul() {
        let mut decoder = CommandDecoder::new();
        let commands = decoder.feed(b"run -i 1\0stack_get -i 2\0").unwrap();

        assert_eq!(commands, vec!["run -i 1", "stack_get -i 2"]);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_any_control_byte_terminates() {
        let mut decoder = CommandDecoder::new();
        let commands = decoder.feed(b"run -i 1\nbreak -i 2\r\n\0").unwrap();

        assert_eq!(commands, vec!["run -i 1", "break -i 2"]);
    }

    #[test]
    fn test_partial_commands_are_buffered() {
        let mut decoder = CommandDecoder::new();

        assert!(decoder.feed(b"step_").unwrap().is_empty());
        assert_eq!(decoder.pending(), 5);

        let commands = decoder.feed(b"over -i 9\0").unwrap();
        assert_eq!(commands, vec!["step_over -i 9"]);
    }

    #[test]
    fn test_oversized_command_is_rejected() {
        let mut decoder = CommandDecoder::new();
        let chunk = vec![b'a'; MAX_COMMAND_SIZE + 1];

        assert!(matches!(decoder.feed(&chunk), Err(DbgpError::Protocol(_))));
        assert_eq!(decoder.pending(), 0);
    }
}
