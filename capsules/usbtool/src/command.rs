// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Text commands received on the OUT endpoint.
//!
//! A command is `<group> <command> [arg...]`: whitespace separated ASCII
//! tokens of at most eight characters, with up to four hexadecimal
//! arguments. Parsing stops at the first NUL.

use kernel::ErrorCode;

/// Longest accepted token.
pub const MAX_TOKEN: usize = 8;
/// Most arguments a command can carry.
pub const MAX_ARGS: usize = 4;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Send `length` bytes of the RAM buffer at `offset`.
    BufferRead { offset: u32, length: u32 },
    /// Receive `length` bytes into the RAM buffer at `offset`.
    BufferWrite { offset: u32, length: u32 },
    NandSelect { chip: u32 },
    /// Report a chip, the selected one if `chip` is `None`.
    NandInfo { chip: Option<u32> },
    NandBad,
    /// Read a block image into the RAM buffer at `offset`.
    NandRead { block: u32, offset: u32 },
    /// Program a block image from the RAM buffer at `offset`.
    NandWrite { block: u32, offset: u32 },
    NandErase { block: u32 },
    NandMark { block: u32, mark: u32 },
}

impl Command {
    /// Parse one command.
    ///
    /// Returns `NOSUPPORT` for a well-formed line naming an unknown command
    /// and `INVAL` for anything else that does not parse, including a known
    /// command with the wrong number of arguments.
    pub fn parse(input: &[u8]) -> Result<Command, ErrorCode> {
        let end = input.iter().position(|&b| b == 0).unwrap_or(input.len());
        let mut tokens = input[..end]
            .split(|b| b.is_ascii_whitespace())
            .filter(|t| !t.is_empty());

        let group = tokens.next().ok_or(ErrorCode::INVAL)?;
        let command = tokens.next().ok_or(ErrorCode::INVAL)?;
        if group.len() > MAX_TOKEN || command.len() > MAX_TOKEN {
            return Err(ErrorCode::INVAL);
        }

        let mut args = [0u32; MAX_ARGS];
        let mut count = 0;
        for token in tokens {
            if count == MAX_ARGS {
                return Err(ErrorCode::INVAL);
            }
            args[count] = parse_hex(token)?;
            count += 1;
        }
        let args = &args[..count];

        match (group, command, args) {
            (b"buffer", b"read", &[offset, length]) => Ok(Command::BufferRead { offset, length }),
            (b"buffer", b"write", &[offset, length]) => Ok(Command::BufferWrite { offset, length }),
            (b"nand", b"select", &[chip]) => Ok(Command::NandSelect { chip }),
            (b"nand", b"info", &[]) => Ok(Command::NandInfo { chip: None }),
            (b"nand", b"info", &[chip]) => Ok(Command::NandInfo { chip: Some(chip) }),
            (b"nand", b"bad", &[]) => Ok(Command::NandBad),
            (b"nand", b"read", &[block, offset]) => Ok(Command::NandRead { block, offset }),
            (b"nand", b"write", &[block, offset]) => Ok(Command::NandWrite { block, offset }),
            (b"nand", b"erase", &[block]) => Ok(Command::NandErase { block }),
            (b"nand", b"mark", &[block, mark]) => Ok(Command::NandMark { block, mark }),
            (b"buffer", b"read" | b"write", _)
            | (b"nand", b"select" | b"info" | b"bad" | b"read" | b"write" | b"erase" | b"mark", _) => {
                Err(ErrorCode::INVAL)
            }
            _ => Err(ErrorCode::NOSUPPORT),
        }
    }
}

/// Up to eight hex digits, optionally prefixed with `0x`.
fn parse_hex(token: &[u8]) -> Result<u32, ErrorCode> {
    let digits = match token {
        [b'0', b'x' | b'X', rest @ ..] => rest,
        _ => token,
    };
    if digits.is_empty() || digits.len() > MAX_TOKEN {
        return Err(ErrorCode::INVAL);
    }
    digits.iter().try_fold(0u32, |acc, &b| {
        let digit = char::from(b).to_digit(16).ok_or(ErrorCode::INVAL)?;
        Ok((acc << 4) | digit)
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn buffer_commands() {
        assert_eq!(
            Command::parse(b"buffer read 100 200"),
            Ok(Command::BufferRead {
                offset: 0x100,
                length: 0x200
            })
        );
        assert_eq!(
            Command::parse(b"  buffer\twrite 0x10 ffffffff\r\n"),
            Ok(Command::BufferWrite {
                offset: 0x10,
                length: 0xffff_ffff
            })
        );
    }

    #[test]
    fn nand_commands() {
        assert_eq!(
            Command::parse(b"nand select 1"),
            Ok(Command::NandSelect { chip: 1 })
        );
        assert_eq!(
            Command::parse(b"nand info"),
            Ok(Command::NandInfo { chip: None })
        );
        assert_eq!(
            Command::parse(b"nand info 0"),
            Ok(Command::NandInfo { chip: Some(0) })
        );
        assert_eq!(Command::parse(b"nand bad"), Ok(Command::NandBad));
        assert_eq!(
            Command::parse(b"nand read 7ff 400"),
            Ok(Command::NandRead {
                block: 0x7ff,
                offset: 0x400
            })
        );
        assert_eq!(
            Command::parse(b"nand write 3 0"),
            Ok(Command::NandWrite {
                block: 3,
                offset: 0
            })
        );
        assert_eq!(
            Command::parse(b"nand erase A"),
            Ok(Command::NandErase { block: 10 })
        );
        assert_eq!(
            Command::parse(b"nand mark 2 1"),
            Ok(Command::NandMark { block: 2, mark: 1 })
        );
    }

    #[test]
    fn stops_at_nul() {
        assert_eq!(Command::parse(b"nand bad\0garbage"), Ok(Command::NandBad));
        assert_eq!(Command::parse(b"\0nand bad"), Err(ErrorCode::INVAL));
    }

    #[test]
    fn rejects_malformed_lines() {
        assert_eq!(Command::parse(b""), Err(ErrorCode::INVAL));
        assert_eq!(Command::parse(b"nand"), Err(ErrorCode::INVAL));
        assert_eq!(Command::parse(b"nand erase"), Err(ErrorCode::INVAL));
        assert_eq!(Command::parse(b"nand erase 1 2"), Err(ErrorCode::INVAL));
        assert_eq!(Command::parse(b"buffer read 1"), Err(ErrorCode::INVAL));
        assert_eq!(Command::parse(b"buffer read xyz 1"), Err(ErrorCode::INVAL));
        assert_eq!(Command::parse(b"buffer read 0x 1"), Err(ErrorCode::INVAL));
        assert_eq!(Command::parse(b"buffer read 123456789 1"), Err(ErrorCode::INVAL));
        assert_eq!(Command::parse(b"nand mark 1 2 3 4 5"), Err(ErrorCode::INVAL));
        assert_eq!(Command::parse(b"bufferxyz read 1 2"), Err(ErrorCode::INVAL));
    }

    #[test]
    fn unknown_commands() {
        assert_eq!(Command::parse(b"nand format"), Err(ErrorCode::NOSUPPORT));
        assert_eq!(Command::parse(b"flash read 1 2"), Err(ErrorCode::NOSUPPORT));
    }
}
