//! Layout and emission passes.
//!
//! Both passes walk the same parsed statement list through one placement
//! routine, so label binding, alignment, and cursor movement cannot drift
//! between them. The first pass builds the symbol table; the second encodes
//! instructions, expands pseudo-instructions, and materializes data.

use indexmap::IndexMap;

use super::dir::Directive;
use super::enc::{self, Arg};
use super::image::{BinaryImage, RelocKind, Segment, SourceLoc, Symbol};
use super::lex::{self, Kind as Tok, Token};
use super::pre::Line;
use super::pseudo::Table;
use super::{Cause, Error, Options, Phase, Result};

/// Runs both passes over preprocessed lines.
pub fn run(opts: &Options, pseudo: &Table, lines: &[Line]) -> Result<BinaryImage> {
    let parsed = parse_all(lines)?;
    let symbols = layout(opts, pseudo, &parsed)?;
    emit(opts, pseudo, &parsed, &symbols)
}

fn fail(phase: Phase, line: &Line, column: usize, cause: Cause) -> Error {
    Error {
        phase,
        file: line.file.clone(),
        line: line.num,
        column,
        cause,
    }
}

/// A parsed source statement with its pending labels.
#[derive(Debug)]
struct Parsed<'l> {
    line: &'l Line,
    labels: Vec<String>,
    col: usize,
    stmt: Stmt,
}

/// Statement payload.
#[derive(Debug)]
enum Stmt {
    Empty,
    Directive(Directive, Vec<Token>),
    Insn(String, Vec<Arg>),
}

fn parse_all<'l>(lines: &'l [Line]) -> Result<Vec<Parsed<'l>>> {
    lines.iter().map(parse_line).collect()
}

fn parse_line(line: &Line) -> Result<Parsed<'_>> {
    let toks =
        lex::scan(&line.text).map_err(|(col, cause)| fail(Phase::Layout, line, col, cause))?;
    // Peel off leading `name:` label definitions.
    let mut idx = 0;
    let mut labels = Vec::new();
    while let (Some(Token { kind: Tok::Ident(name), .. }), Some(Token { kind: Tok::Colon, .. })) =
        (toks.get(idx), toks.get(idx + 1))
    {
        labels.push(name.clone());
        idx += 2;
    }
    let Some(head) = toks.get(idx) else {
        return Ok(Parsed {
            line,
            labels,
            col: 1,
            stmt: Stmt::Empty,
        });
    };
    let col = head.col;
    let stmt = match &head.kind {
        Tok::Directive(name) => {
            let dir = Directive::from_name(name)
                .ok_or_else(|| fail(Phase::Layout, line, col, Cause::UnknownDirective(name.clone())))?;
            Stmt::Directive(dir, toks[idx + 1..].to_vec())
        }
        Tok::Ident(mnemonic) => {
            let args = enc::parse_args(&toks[idx + 1..])
                .map_err(|(col, cause)| fail(Phase::Layout, line, col, cause))?;
            Stmt::Insn(mnemonic.clone(), args)
        }
        _ => {
            return Err(fail(
                Phase::Layout,
                line,
                col,
                Cause::OperandType { expected: "statement" },
            ))
        }
    };
    Ok(Parsed {
        line,
        labels,
        col,
        stmt,
    })
}

/// Per-segment placement cursors.
#[derive(Clone, Copy, Debug)]
struct Cursors {
    text: u32,
    data: u32,
    ktext: u32,
    kdata: u32,
}

impl Cursors {
    fn new(opts: &Options) -> Self {
        Self {
            text: opts.text_base,
            data: opts.data_base,
            ktext: opts.ktext_base,
            kdata: opts.kdata_base,
        }
    }

    fn get(&mut self, seg: Segment) -> &mut u32 {
        match seg {
            Segment::Text => &mut self.text,
            Segment::Data => &mut self.data,
            Segment::Ktext => &mut self.ktext,
            Segment::Kdata => &mut self.kdata,
        }
    }
}

fn align_up(value: u32, align: u32) -> u32 {
    value.wrapping_add(align - 1) & !(align - 1)
}

/// Placement callbacks shared by both passes.
trait Sink {
    /// A label binding to `addr` within `seg`.
    fn label(&mut self, name: &str, seg: Segment, addr: u32, p: &Parsed) -> Result<()>;

    /// An external symbol declaration.
    fn extern_sym(&mut self, name: &str, p: &Parsed) -> Result<()>;

    /// A data directive placed at `addr`.
    fn data(&mut self, p: &Parsed, dir: Directive, toks: &[Token], seg: Segment, addr: u32)
        -> Result<()>;

    /// An instruction placed at `addr`.
    fn insn(&mut self, p: &Parsed, mnemonic: &str, args: &[Arg], seg: Segment, addr: u32)
        -> Result<()>;
}

/// Walks statements, resolving placement for every label and statement.
#[allow(clippy::too_many_lines)]
fn place(opts: &Options, pseudo: &Table, parsed: &[Parsed], sink: &mut impl Sink) -> Result<()> {
    let mut seg = Segment::Text;
    let mut cur = Cursors::new(opts);
    let mut auto_align = true;
    let mut pending: Vec<(&Parsed, &str)> = Vec::new();
    for p in parsed {
        for label in &p.labels {
            pending.push((p, label.as_str()));
        }
        match &p.stmt {
            Stmt::Empty => (),
            Stmt::Directive(dir, toks) => match dir {
                Directive::Segment(next) => {
                    // Labels left dangling bind to the old segment's cursor.
                    flush(&mut pending, seg, *cur.get(seg), sink)?;
                    seg = *next;
                    auto_align = true;
                    if let Some(origin) = segment_origin(p, toks)? {
                        let base = match seg {
                            Segment::Text => opts.text_base,
                            Segment::Data => opts.data_base,
                            Segment::Ktext => opts.ktext_base,
                            Segment::Kdata => opts.kdata_base,
                        };
                        // Backward origins would overlap already-emitted
                        // contents.
                        if origin < base
                            || origin < *cur.get(seg)
                            || (seg.is_code() && origin % 4 != 0)
                        {
                            return Err(fail(
                                Phase::Layout,
                                p.line,
                                p.col,
                                Cause::BadOrigin(i64::from(origin)),
                            ));
                        }
                        *cur.get(seg) = origin;
                    }
                }
                Directive::Align => {
                    let n = align_exponent(p, toks)?;
                    if n == 0 {
                        // Disable implicit alignment until the segment
                        // changes.
                        auto_align = false;
                    } else {
                        let cursor = cur.get(seg);
                        *cursor = align_up(*cursor, 1 << n);
                    }
                }
                Directive::Globl => {
                    // Accepted for compatibility; every symbol is visible.
                    for tok in toks {
                        match &tok.kind {
                            Tok::Ident(_) | Tok::Comma => (),
                            _ => {
                                return Err(fail(
                                    Phase::Layout,
                                    p.line,
                                    tok.col,
                                    Cause::OperandType { expected: "symbol" },
                                ))
                            }
                        }
                    }
                }
                Directive::Extern => {
                    let name = extern_name(p, toks)?;
                    sink.extern_sym(&name, p)?;
                }
                dir if dir.is_data() => {
                    if seg.is_code() {
                        return Err(fail(
                            Phase::Layout,
                            p.line,
                            p.col,
                            Cause::WrongSegment("data directive"),
                        ));
                    }
                    let align = if auto_align { dir.natural_align() } else { 1 };
                    let cursor = cur.get(seg);
                    let addr = align_up(*cursor, align);
                    flush(&mut pending, seg, addr, sink)?;
                    let size = data_size(p, *dir, toks)?;
                    sink.data(p, *dir, toks, seg, addr)?;
                    *cursor = addr + size;
                }
                _ => unreachable!("directive handled above"),
            },
            Stmt::Insn(mnemonic, args) => {
                if !seg.is_code() {
                    return Err(fail(
                        Phase::Layout,
                        p.line,
                        p.col,
                        Cause::WrongSegment("instruction"),
                    ));
                }
                let cursor = cur.get(seg);
                let addr = *cursor;
                flush(&mut pending, seg, addr, sink)?;
                let size = insn_size(opts, pseudo, p, mnemonic, args)?;
                sink.insn(p, mnemonic, args, seg, addr)?;
                *cursor = addr + size;
            }
        }
    }
    flush(&mut pending, seg, *cur.get(seg), sink)
}

fn flush(
    pending: &mut Vec<(&Parsed<'_>, &str)>,
    seg: Segment,
    addr: u32,
    sink: &mut impl Sink,
) -> Result<()> {
    for (p, label) in pending.drain(..) {
        sink.label(label, seg, addr, p)?;
    }
    Ok(())
}

/// Size in bytes occupied by an instruction statement.
fn insn_size(
    opts: &Options,
    pseudo: &Table,
    p: &Parsed,
    mnemonic: &str,
    args: &[Arg],
) -> Result<u32> {
    if enc::is_real(mnemonic) && enc::accepts(mnemonic, args) {
        return Ok(4);
    }
    if opts.pseudo {
        if let Some(entry) = pseudo.lookup(mnemonic, args) {
            return Ok(4 * entry.len(opts.delayed_branching) as u32);
        }
    }
    if enc::is_real(mnemonic) {
        // Known mnemonic, wrong operands: a precise cause comes out of the
        // encoder during emission.
        return Ok(4);
    }
    Err(fail(
        Phase::Layout,
        p.line,
        p.col,
        Cause::UnknownMnemonic(mnemonic.to_owned()),
    ))
}

fn segment_origin(p: &Parsed, toks: &[Token]) -> Result<Option<u32>> {
    match toks {
        [] => Ok(None),
        [Token { kind: Tok::Int(addr), .. }] if (0..=i64::from(u32::MAX)).contains(addr) => {
            Ok(Some(*addr as u32))
        }
        _ => Err(fail(
            Phase::Layout,
            p.line,
            p.col,
            Cause::OperandType { expected: "segment origin" },
        )),
    }
}

fn align_exponent(p: &Parsed, toks: &[Token]) -> Result<u32> {
    match toks {
        [Token { kind: Tok::Int(n), .. }] if (0..=16).contains(n) => Ok(*n as u32),
        [Token { kind: Tok::Int(n), .. }] => Err(fail(
            Phase::Layout,
            p.line,
            p.col,
            Cause::BadAlignment(*n as u32),
        )),
        _ => Err(fail(
            Phase::Layout,
            p.line,
            p.col,
            Cause::OperandType { expected: "alignment exponent" },
        )),
    }
}

fn extern_name(p: &Parsed, toks: &[Token]) -> Result<String> {
    match toks {
        [Token { kind: Tok::Ident(name), .. }]
        | [Token { kind: Tok::Ident(name), .. }, Token { kind: Tok::Int(_), .. }] => {
            Ok(name.clone())
        }
        _ => Err(fail(
            Phase::Layout,
            p.line,
            p.col,
            Cause::OperandType { expected: "symbol and size" },
        )),
    }
}

/// A parsed data item.
#[derive(Debug)]
enum Item {
    Int(i64),
    Float(f64),
    Str(String),
    Sym(String, i64),
}

fn parse_items(p: &Parsed, toks: &[Token]) -> Result<Vec<Item>> {
    let mut items = Vec::new();
    let mut iter = toks.iter().peekable();
    if iter.peek().is_none() {
        return Ok(items);
    }
    loop {
        let Some(tok) = iter.next() else {
            return Err(fail(
                Phase::Layout,
                p.line,
                p.col,
                Cause::OperandType { expected: "data item" },
            ));
        };
        let item = match &tok.kind {
            Tok::Int(value) => Item::Int(*value),
            Tok::Float(value) => Item::Float(*value),
            Tok::Str(text) => Item::Str(text.clone()),
            Tok::Ident(name) => {
                let mut addend = 0;
                while let Some(sign) = iter.peek().and_then(|it| match it.kind {
                    Tok::Plus => Some(1),
                    Tok::Minus => Some(-1),
                    _ => None,
                }) {
                    iter.next();
                    match iter.next().map(|it| &it.kind) {
                        Some(Tok::Int(value)) => addend += sign * value,
                        _ => {
                            return Err(fail(
                                Phase::Layout,
                                p.line,
                                tok.col,
                                Cause::OperandType { expected: "addend" },
                            ))
                        }
                    }
                }
                Item::Sym(name.clone(), addend)
            }
            Tok::Minus | Tok::Plus => {
                let sign: i64 = if tok.kind == Tok::Minus { -1 } else { 1 };
                match iter.next().map(|it| &it.kind) {
                    Some(Tok::Int(value)) => Item::Int(sign * value),
                    Some(Tok::Float(value)) => Item::Float(sign as f64 * value),
                    _ => {
                        return Err(fail(
                            Phase::Layout,
                            p.line,
                            tok.col,
                            Cause::OperandType { expected: "numeric item" },
                        ))
                    }
                }
            }
            _ => {
                return Err(fail(
                    Phase::Layout,
                    p.line,
                    tok.col,
                    Cause::OperandType { expected: "data item" },
                ))
            }
        };
        items.push(item);
        match iter.next() {
            None => break,
            Some(Token { kind: Tok::Comma, .. }) => (),
            Some(tok) => {
                return Err(fail(
                    Phase::Layout,
                    p.line,
                    tok.col,
                    Cause::OperandType { expected: "separator" },
                ))
            }
        }
    }
    Ok(items)
}

/// Size in bytes occupied by a data directive.
fn data_size(p: &Parsed, dir: Directive, toks: &[Token]) -> Result<u32> {
    let items = parse_items(p, toks)?;
    let size = match dir {
        Directive::Space => match items[..] {
            [Item::Int(n)] if (0..=i64::from(u32::MAX)).contains(&n) => n as u32,
            _ => {
                return Err(fail(
                    Phase::Layout,
                    p.line,
                    p.col,
                    Cause::OperandType { expected: "reservation size" },
                ))
            }
        },
        Directive::Ascii | Directive::Asciiz => {
            let terminator = u32::from(dir == Directive::Asciiz);
            let mut size = 0;
            for item in &items {
                let Item::Str(text) = item else {
                    return Err(fail(
                        Phase::Layout,
                        p.line,
                        p.col,
                        Cause::OperandType { expected: "string" },
                    ));
                };
                size += text.len() as u32 + terminator;
            }
            size
        }
        _ => dir.item_size() * items.len() as u32,
    };
    Ok(size)
}

/// First pass: builds the symbol table.
fn layout(
    opts: &Options,
    pseudo: &Table,
    parsed: &[Parsed],
) -> Result<IndexMap<String, Symbol>> {
    struct Pass1 {
        symbols: IndexMap<String, Symbol>,
    }
    impl Sink for Pass1 {
        fn label(&mut self, name: &str, seg: Segment, addr: u32, p: &Parsed) -> Result<()> {
            if self.symbols.contains_key(name) {
                return Err(fail(
                    Phase::Layout,
                    p.line,
                    p.col,
                    Cause::DuplicateLabel(name.to_owned()),
                ));
            }
            self.symbols.insert(
                name.to_owned(),
                Symbol {
                    name: name.to_owned(),
                    address: addr,
                    segment: Some(seg),
                },
            );
            Ok(())
        }

        fn extern_sym(&mut self, name: &str, p: &Parsed) -> Result<()> {
            match self.symbols.get(name) {
                // Repeated declarations are harmless.
                Some(sym) if sym.segment.is_none() => Ok(()),
                Some(_) => Err(fail(
                    Phase::Layout,
                    p.line,
                    p.col,
                    Cause::DuplicateLabel(name.to_owned()),
                )),
                None => {
                    self.symbols.insert(
                        name.to_owned(),
                        Symbol {
                            name: name.to_owned(),
                            address: 0,
                            segment: None,
                        },
                    );
                    Ok(())
                }
            }
        }

        fn data(&mut self, _: &Parsed, _: Directive, _: &[Token], _: Segment, _: u32) -> Result<()> {
            Ok(())
        }

        fn insn(&mut self, _: &Parsed, _: &str, _: &[Arg], _: Segment, _: u32) -> Result<()> {
            Ok(())
        }
    }

    let mut pass = Pass1 {
        symbols: IndexMap::new(),
    };
    place(opts, pseudo, parsed, &mut pass)?;
    Ok(pass.symbols)
}

/// Second pass: encodes instructions and materializes data.
fn emit(
    opts: &Options,
    pseudo: &Table,
    parsed: &[Parsed],
    symbols: &IndexMap<String, Symbol>,
) -> Result<BinaryImage> {
    struct Pass2<'a> {
        opts: &'a Options,
        pseudo: &'a Table,
        symbols: &'a IndexMap<String, Symbol>,
        image: BinaryImage,
    }

    impl Pass2<'_> {
        /// Appends an instruction word, zero-filling any origin gap.
        fn push_word(&mut self, seg: Segment, addr: u32, word: u32) {
            let base = self.image.base(seg);
            let words = match seg {
                Segment::Text => &mut self.image.text,
                Segment::Ktext => &mut self.image.ktext,
                _ => unreachable!("instructions only land in code segments"),
            };
            let idx = ((addr - base) / 4) as usize;
            while words.len() < idx {
                words.push(0);
            }
            words.push(word);
        }

        /// Appends data bytes, zero-filling alignment and origin gaps.
        fn push_bytes(&mut self, seg: Segment, addr: u32, bytes: &[u8]) {
            let base = self.image.base(seg);
            let data = match seg {
                Segment::Data => &mut self.image.data,
                Segment::Kdata => &mut self.image.kdata,
                _ => unreachable!("data only lands in data segments"),
            };
            let idx = (addr - base) as usize;
            while data.len() < idx {
                data.push(0);
            }
            data.extend_from_slice(bytes);
        }

        fn push_reloc(
            &mut self,
            seg: Segment,
            addr: u32,
            reloc: Option<(RelocKind, String, i32)>,
        ) {
            if let Some((kind, symbol, addend)) = reloc {
                let offset = addr - self.image.base(seg);
                self.image.relocations.push(super::Relocation {
                    segment: seg,
                    offset,
                    symbol,
                    kind,
                    addend,
                });
            }
        }

        fn push_source(&mut self, seg: Segment, addr: u32, p: &Parsed) {
            let base = self.image.base(seg);
            let index = if seg.is_code() {
                ((addr - base) / 4) as usize
            } else {
                (addr - base) as usize
            };
            self.image.source_map.push(SourceLoc {
                segment: seg,
                index,
                address: addr,
                file: p.line.file.clone(),
                line: p.line.num,
            });
        }

        fn int_bytes(&self, value: i64, size: usize) -> Vec<u8> {
            let bytes = (value as u64).to_le_bytes();
            let mut out = bytes[..size].to_vec();
            if !self.opts.little_endian {
                out.reverse();
            }
            out
        }

        fn encode_one(
            &mut self,
            p: &Parsed,
            mnemonic: &str,
            args: &[Arg],
            seg: Segment,
            pc: u32,
            reloc: Option<(RelocKind, String, i32)>,
        ) -> Result<()> {
            let ctx = enc::Ctx {
                pc,
                symbols: self.symbols,
            };
            let encoded = enc::encode(mnemonic, args, &ctx)
                .map_err(|cause| fail(Phase::Emit, p.line, p.col, cause))?;
            self.push_word(seg, pc, encoded.word);
            self.push_source(seg, pc, p);
            self.push_reloc(seg, pc, reloc.or(encoded.reloc));
            Ok(())
        }
    }

    impl Sink for Pass2<'_> {
        fn label(&mut self, _: &str, _: Segment, _: u32, _: &Parsed) -> Result<()> {
            Ok(())
        }

        fn extern_sym(&mut self, _: &str, _: &Parsed) -> Result<()> {
            Ok(())
        }

        fn data(
            &mut self,
            p: &Parsed,
            dir: Directive,
            toks: &[Token],
            seg: Segment,
            addr: u32,
        ) -> Result<()> {
            let items = parse_items(p, toks)?;
            self.push_source(seg, addr, p);
            let mut at = addr;
            for item in &items {
                let bytes = match (dir, item) {
                    (Directive::Byte, Item::Int(value)) => {
                        range_check(p, *value, -0x80, 0xff)?;
                        self.int_bytes(*value, 1)
                    }
                    (Directive::Half, Item::Int(value)) => {
                        range_check(p, *value, -0x8000, 0xffff)?;
                        self.int_bytes(*value, 2)
                    }
                    (Directive::Word, Item::Int(value)) => {
                        range_check(p, *value, -0x8000_0000, 0xffff_ffff)?;
                        self.int_bytes(*value, 4)
                    }
                    (Directive::Word, Item::Sym(name, addend)) => {
                        let Some(sym) = self.symbols.get(name) else {
                            return Err(fail(
                                Phase::Emit,
                                p.line,
                                p.col,
                                Cause::UndefinedSymbol(name.clone()),
                            ));
                        };
                        if sym.segment.is_none() {
                            self.push_reloc(
                                seg,
                                at,
                                Some((RelocKind::Mips32, name.clone(), *addend as i32)),
                            );
                            self.int_bytes(0, 4)
                        } else {
                            let value = sym.address.wrapping_add(*addend as u32);
                            self.int_bytes(i64::from(value), 4)
                        }
                    }
                    (Directive::Float, Item::Float(value)) => {
                        let bits = (*value as f32).to_bits();
                        self.int_bytes(i64::from(bits), 4)
                    }
                    (Directive::Float, Item::Int(value)) => {
                        let bits = (*value as f32).to_bits();
                        self.int_bytes(i64::from(bits), 4)
                    }
                    (Directive::Double, Item::Float(value)) => {
                        let bits = value.to_bits();
                        self.int_bytes(bits as i64, 8)
                    }
                    (Directive::Double, Item::Int(value)) => {
                        let bits = (*value as f64).to_bits();
                        self.int_bytes(bits as i64, 8)
                    }
                    (Directive::Ascii, Item::Str(text)) => text.clone().into_bytes(),
                    (Directive::Asciiz, Item::Str(text)) => {
                        let mut bytes = text.clone().into_bytes();
                        bytes.push(0);
                        bytes
                    }
                    (Directive::Space, Item::Int(count)) => vec![0; *count as usize],
                    _ => {
                        return Err(fail(
                            Phase::Emit,
                            p.line,
                            p.col,
                            Cause::OperandType { expected: "data item" },
                        ))
                    }
                };
                self.push_bytes(seg, at, &bytes);
                at += bytes.len() as u32;
            }
            Ok(())
        }

        fn insn(
            &mut self,
            p: &Parsed,
            mnemonic: &str,
            args: &[Arg],
            seg: Segment,
            addr: u32,
        ) -> Result<()> {
            if enc::is_real(mnemonic) && enc::accepts(mnemonic, args) {
                return self.encode_one(p, mnemonic, args, seg, addr, None);
            }
            let entry = self
                .opts
                .pseudo
                .then(|| self.pseudo.lookup(mnemonic, args))
                .flatten();
            let Some(entry) = entry else {
                // A real mnemonic with mismatched operands: let the encoder
                // produce the diagnostic.
                return self.encode_one(p, mnemonic, args, seg, addr, None);
            };
            let expansions = entry
                .expand(args, self.symbols, self.opts.delayed_branching)
                .map_err(|cause| fail(Phase::Emit, p.line, p.col, cause))?;
            let mut pc = addr;
            for expansion in expansions {
                let toks = lex::scan(&expansion.text)
                    .map_err(|(col, cause)| fail(Phase::Emit, p.line, col, cause))?;
                let Some(Token { kind: Tok::Ident(real), .. }) = toks.first() else {
                    return Err(fail(
                        Phase::Emit,
                        p.line,
                        p.col,
                        Cause::BadPseudoTable(expansion.text.clone()),
                    ));
                };
                let real = real.clone();
                let args = enc::parse_args(&toks[1..])
                    .map_err(|(col, cause)| fail(Phase::Emit, p.line, col, cause))?;
                self.encode_one(p, &real, &args, seg, pc, expansion.reloc)?;
                pc += 4;
            }
            Ok(())
        }
    }

    let mut pass = Pass2 {
        opts,
        pseudo,
        symbols,
        image: BinaryImage {
            text_base: opts.text_base,
            data_base: opts.data_base,
            ktext_base: opts.ktext_base,
            kdata_base: opts.kdata_base,
            little_endian: opts.little_endian,
            ..BinaryImage::default()
        },
    };
    place(opts, pseudo, parsed, &mut pass)?;

    // Publish the finished symbol tables.
    for sym in symbols.values() {
        if sym.segment.is_some() {
            pass.image.symbols.insert(sym.name.clone(), sym.address);
        }
        pass.image.symbol_table.push(sym.clone());
    }
    Ok(pass.image)
}

fn range_check(p: &Parsed, value: i64, lo: i64, hi: i64) -> Result<()> {
    if (lo..=hi).contains(&value) {
        Ok(())
    } else {
        Err(fail(
            Phase::Emit,
            p.line,
            p.col,
            Cause::ImmediateRange(value),
        ))
    }
}
