//! Source line scanning.
//!
//! Operates on one preprocessed line at a time, producing the token stream
//! consumed by the layout and emission passes. Comment stripping happens
//! earlier, in the preprocessor, so `#` never reaches the scanner.

use super::{Cause, Result};

/// A scanned token with its source column.
#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    /// Token payload.
    pub kind: Kind,
    /// Column of the first character (1-indexed).
    pub col: usize,
}

/// Token payload.
#[derive(Clone, Debug, PartialEq)]
pub enum Kind {
    /// Identifier: mnemonic, label, or symbol reference.
    Ident(String),
    /// Assembler directive, stored without the leading dot.
    Directive(String),
    /// General-purpose register index.
    Reg(u8),
    /// Floating-point register index.
    FReg(u8),
    /// Integer literal, always non-negative (signs are separate tokens).
    Int(i64),
    /// Floating-point literal.
    Float(f64),
    /// String literal with escapes resolved.
    Str(String),
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `,`
    Comma,
    /// `:`
    Colon,
    /// `+`
    Plus,
    /// `-`
    Minus,
}

/// Scans a single line into tokens.
///
/// # Errors
///
/// Errors on malformed literals and unknown register names; the failing
/// column is carried in the returned [`Cause`] wrapper.
pub fn scan(line: &str) -> Result<Vec<Token>, (usize, Cause)> {
    Scanner::new(line).run()
}

struct Scanner<'s> {
    src: &'s [u8],
    pos: usize,
}

impl<'s> Scanner<'s> {
    fn new(line: &'s str) -> Self {
        Self {
            src: line.as_bytes(),
            pos: 0,
        }
    }

    fn run(mut self) -> Result<Vec<Token>, (usize, Cause)> {
        let mut out = Vec::new();
        while let Some(&ch) = self.src.get(self.pos) {
            let col = self.pos + 1;
            match ch {
                b' ' | b'\t' => {
                    self.pos += 1;
                    continue;
                }
                b'(' => out.push(self.punct(Kind::LParen)),
                b')' => out.push(self.punct(Kind::RParen)),
                b',' => out.push(self.punct(Kind::Comma)),
                b':' => out.push(self.punct(Kind::Colon)),
                b'+' => out.push(self.punct(Kind::Plus)),
                b'-' => out.push(self.punct(Kind::Minus)),
                b'$' => out.push(self.register()?),
                b'"' => out.push(self.string()?),
                b'\'' => out.push(self.character()?),
                b'.' => out.push(self.directive()?),
                b'0'..=b'9' => out.push(self.number()?),
                ch if is_ident_start(ch) => out.push(self.ident()),
                _ => return Err((col, Cause::BadToken(char::from(ch)))),
            }
        }
        Ok(out)
    }

    fn punct(&mut self, kind: Kind) -> Token {
        let col = self.pos + 1;
        self.pos += 1;
        Token { kind, col }
    }

    fn take_while(&mut self, keep: impl Fn(u8) -> bool) -> &'s str {
        let start = self.pos;
        while self.src.get(self.pos).copied().is_some_and(&keep) {
            self.pos += 1;
        }
        // Scanner input is line-based ASCII-compatible text.
        std::str::from_utf8(&self.src[start..self.pos]).unwrap_or_default()
    }

    fn register(&mut self) -> Result<Token, (usize, Cause)> {
        let col = self.pos + 1;
        self.pos += 1; // consume '$'
        let name = self.take_while(|ch| ch.is_ascii_alphanumeric());
        let kind = if let Some(num) = name.strip_prefix('f') {
            // `$f0` through `$f31`, but `$fp` is a GPR alias.
            if let Ok(idx) = num.parse::<u8>() {
                if idx >= 32 {
                    return Err((col, Cause::BadRegister(format!("$f{num}"))));
                }
                Kind::FReg(idx)
            } else {
                Kind::Reg(gpr(name).ok_or_else(|| (col, Cause::BadRegister(format!("${name}"))))?)
            }
        } else if let Ok(idx) = name.parse::<u8>() {
            if idx >= 32 {
                return Err((col, Cause::BadRegister(format!("${name}"))));
            }
            Kind::Reg(idx)
        } else {
            Kind::Reg(gpr(name).ok_or_else(|| (col, Cause::BadRegister(format!("${name}"))))?)
        };
        Ok(Token { kind, col })
    }

    fn string(&mut self) -> Result<Token, (usize, Cause)> {
        let col = self.pos + 1;
        self.pos += 1; // consume '"'
        let mut text = String::new();
        loop {
            match self.src.get(self.pos).copied() {
                None => return Err((col, Cause::UnclosedString)),
                Some(b'"') => {
                    self.pos += 1;
                    break;
                }
                Some(b'\\') => {
                    self.pos += 1;
                    let esc = self.src.get(self.pos).copied().ok_or((col, Cause::UnclosedString))?;
                    text.push(unescape(esc).ok_or((self.pos + 1, Cause::BadEscape(char::from(esc))))?);
                    self.pos += 1;
                }
                Some(ch) => {
                    text.push(char::from(ch));
                    self.pos += 1;
                }
            }
        }
        Ok(Token {
            kind: Kind::Str(text),
            col,
        })
    }

    fn character(&mut self) -> Result<Token, (usize, Cause)> {
        let col = self.pos + 1;
        self.pos += 1; // consume '\''
        let ch = match self.src.get(self.pos).copied() {
            None => return Err((col, Cause::UnclosedString)),
            Some(b'\\') => {
                self.pos += 1;
                let esc = self.src.get(self.pos).copied().ok_or((col, Cause::UnclosedString))?;
                unescape(esc).ok_or((self.pos + 1, Cause::BadEscape(char::from(esc))))?
            }
            Some(ch) => char::from(ch),
        };
        self.pos += 1;
        if self.src.get(self.pos).copied() != Some(b'\'') {
            return Err((col, Cause::UnclosedString));
        }
        self.pos += 1;
        Ok(Token {
            kind: Kind::Int(i64::from(u32::from(ch))),
            col,
        })
    }

    fn directive(&mut self) -> Result<Token, (usize, Cause)> {
        let col = self.pos + 1;
        self.pos += 1; // consume '.'
        let name = self.take_while(|ch| ch.is_ascii_alphanumeric() || ch == b'_');
        if name.is_empty() {
            return Err((col, Cause::BadToken('.')));
        }
        Ok(Token {
            kind: Kind::Directive(name.to_owned()),
            col,
        })
    }

    fn number(&mut self) -> Result<Token, (usize, Cause)> {
        let col = self.pos + 1;
        let text = self.take_while(|ch| {
            ch.is_ascii_alphanumeric() || ch == b'.' || ch == b'_'
        });
        // Radix-prefixed integers.
        let radix = [("0x", 16), ("0X", 16), ("0b", 2), ("0B", 2), ("0o", 8), ("0O", 8)]
            .into_iter()
            .find_map(|(prefix, radix)| text.strip_prefix(prefix).map(|rest| (rest, radix)));
        if let Some((digits, radix)) = radix {
            let value = i64::from_str_radix(&digits.replace('_', ""), radix)
                .map_err(|_| (col, Cause::BadNumber(text.to_owned())))?;
            return Ok(Token {
                kind: Kind::Int(value),
                col,
            });
        }
        // Floating-point literals contain a point or exponent.
        if text.contains('.') || text.contains('e') || text.contains('E') {
            let value: f64 = text
                .parse()
                .map_err(|_| (col, Cause::BadNumber(text.to_owned())))?;
            return Ok(Token {
                kind: Kind::Float(value),
                col,
            });
        }
        let value: i64 = text
            .parse()
            .map_err(|_| (col, Cause::BadNumber(text.to_owned())))?;
        Ok(Token {
            kind: Kind::Int(value),
            col,
        })
    }

    fn ident(&mut self) -> Token {
        let col = self.pos + 1;
        let name = self.take_while(|ch| is_ident_continue(ch));
        Token {
            kind: Kind::Ident(name.to_owned()),
            col,
        }
    }
}

fn is_ident_start(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || ch == b'_'
}

fn is_ident_continue(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || ch == b'_' || ch == b'.'
}

fn unescape(esc: u8) -> Option<char> {
    Some(match esc {
        b'n' => '\n',
        b't' => '\t',
        b'r' => '\r',
        b'0' => '\0',
        b'\\' => '\\',
        b'"' => '"',
        b'\'' => '\'',
        _ => return None,
    })
}

/// Resolves a general-purpose register name to its index.
#[must_use]
#[rustfmt::skip]
pub fn gpr(name: &str) -> Option<u8> {
    Some(match name {
        "zero" => 0,  "at" => 1,
        "v0" => 2,    "v1" => 3,
        "a0" => 4,    "a1" => 5,  "a2" => 6,  "a3" => 7,
        "t0" => 8,    "t1" => 9,  "t2" => 10, "t3" => 11,
        "t4" => 12,   "t5" => 13, "t6" => 14, "t7" => 15,
        "s0" => 16,   "s1" => 17, "s2" => 18, "s3" => 19,
        "s4" => 20,   "s5" => 21, "s6" => 22, "s7" => 23,
        "t8" => 24,   "t9" => 25,
        "k0" => 26,   "k1" => 27,
        "gp" => 28,   "sp" => 29, "fp" => 30, "ra" => 31,
        _ => return None,
    })
}

/// Returns the canonical name of a general-purpose register.
#[must_use]
#[rustfmt::skip]
pub fn gpr_name(index: u8) -> &'static str {
    const NAMES: [&str; 32] = [
        "zero", "at", "v0", "v1", "a0", "a1", "a2", "a3",
        "t0", "t1", "t2", "t3", "t4", "t5", "t6", "t7",
        "s0", "s1", "s2", "s3", "s4", "s5", "s6", "s7",
        "t8", "t9", "k0", "k1", "gp", "sp", "fp", "ra",
    ];
    NAMES[usize::from(index & 0x1f)]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(line: &str) -> Vec<Kind> {
        scan(line).unwrap().into_iter().map(|it| it.kind).collect()
    }

    #[test]
    fn scan_instruction_works() {
        assert_eq!(
            kinds("addi $t0, $zero, -7"),
            vec![
                Kind::Ident("addi".into()),
                Kind::Reg(8),
                Kind::Comma,
                Kind::Reg(0),
                Kind::Comma,
                Kind::Minus,
                Kind::Int(7),
            ]
        );
    }

    #[test]
    fn scan_offset_base_works() {
        assert_eq!(
            kinds("lw $t0, 4($sp)"),
            vec![
                Kind::Ident("lw".into()),
                Kind::Reg(8),
                Kind::Comma,
                Kind::Int(4),
                Kind::LParen,
                Kind::Reg(29),
                Kind::RParen,
            ]
        );
    }

    #[test]
    fn scan_label_works() {
        assert_eq!(
            kinds("loop: j loop"),
            vec![
                Kind::Ident("loop".into()),
                Kind::Colon,
                Kind::Ident("j".into()),
                Kind::Ident("loop".into()),
            ]
        );
    }

    #[test]
    fn scan_directive_works() {
        assert_eq!(
            kinds(".word 0x11223344, 10"),
            vec![
                Kind::Directive("word".into()),
                Kind::Int(0x1122_3344),
                Kind::Comma,
                Kind::Int(10),
            ]
        );
    }

    #[test]
    fn scan_string_escapes_work() {
        assert_eq!(
            kinds(r#".asciiz "hi\n""#),
            vec![Kind::Directive("asciiz".into()), Kind::Str("hi\n".into())]
        );
    }

    #[test]
    fn scan_numeric_register_works() {
        assert_eq!(kinds("$31"), vec![Kind::Reg(31)]);
        assert_eq!(kinds("$f12"), vec![Kind::FReg(12)]);
        assert_eq!(kinds("$fp"), vec![Kind::Reg(30)]);
    }

    #[test]
    fn scan_float_works() {
        assert_eq!(kinds("3.5"), vec![Kind::Float(3.5)]);
    }

    #[test]
    fn scan_unclosed_string_fails() {
        assert!(matches!(scan(".ascii \"oops"), Err((_, Cause::UnclosedString))));
    }

    #[test]
    fn scan_bad_register_fails() {
        assert!(matches!(scan("$t12"), Err((_, Cause::BadRegister(_)))));
    }

    #[test]
    fn scan_char_literal_works() {
        assert_eq!(kinds("'A'"), vec![Kind::Int(65)]);
        assert_eq!(kinds(r"'\n'"), vec![Kind::Int(10)]);
    }
}
