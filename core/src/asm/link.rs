//! Image linking.
//!
//! Merges assembled images into one: segment contents are appended with
//! 4-byte alignment, symbol addresses are shifted by their segment's
//! placement delta, and every relocation is applied once its symbol is
//! known. Relocations that survive the merge unresolved fail the link, not
//! the load.

use thiserror::Error;

use super::image::{BinaryImage, RelocKind, Relocation, Segment, Symbol};

/// Links a list of images into a single resolved image.
///
/// # Errors
///
/// Errors on empty input, endianness disagreement, duplicate definitions,
/// and unresolved external references.
pub fn link(images: &[BinaryImage]) -> Result<BinaryImage> {
    let mut iter = images.iter();
    let mut out = iter.next().ok_or(Error::Empty)?.clone();
    for image in iter {
        if image.little_endian != out.little_endian {
            return Err(Error::Endianness);
        }
        merge(&mut out, image)?;
    }
    resolve(&mut out)?;
    Ok(out)
}

/// Appends `image` onto `out`, fixing up symbols, relocations, and the
/// source map.
fn merge(out: &mut BinaryImage, image: &BinaryImage) -> Result<()> {
    const SEGMENTS: [Segment; 4] = [Segment::Text, Segment::Data, Segment::Ktext, Segment::Kdata];

    // Word-align the data segments before appending.
    for data in [&mut out.data, &mut out.kdata] {
        while data.len() % 4 != 0 {
            data.push(0);
        }
    }
    // Placement deltas, before any contents move.
    let delta =
        |seg: Segment| -> u32 { out.base(seg).wrapping_add(out.len(seg)).wrapping_sub(image.base(seg)) };
    let deltas: [u32; 4] = [
        delta(Segment::Text),
        delta(Segment::Data),
        delta(Segment::Ktext),
        delta(Segment::Kdata),
    ];
    let shift = |seg: Segment| deltas[SEGMENTS.iter().position(|&it| it == seg).unwrap_or(0)];
    let cursor: [u32; 4] = SEGMENTS.map(|seg| out.len(seg));

    // Relocations move with their segment's append offset.
    for reloc in &image.relocations {
        out.relocations.push(Relocation {
            offset: reloc.offset + cursor[SEGMENTS.iter().position(|&it| it == reloc.segment).unwrap_or(0)],
            ..reloc.clone()
        });
    }
    // Source map entries shift by their segment's delta.
    for loc in &image.source_map {
        let mut loc = loc.clone();
        let appended = cursor[SEGMENTS.iter().position(|&it| it == loc.segment).unwrap_or(0)];
        loc.address = loc.address.wrapping_add(shift(loc.segment));
        loc.index += if loc.segment.is_code() {
            (appended / 4) as usize
        } else {
            appended as usize
        };
        out.source_map.push(loc);
    }
    // Append contents.
    out.text.extend_from_slice(&image.text);
    out.ktext.extend_from_slice(&image.ktext);
    out.data.extend_from_slice(&image.data);
    out.kdata.extend_from_slice(&image.kdata);

    // Merge symbols.
    for sym in &image.symbol_table {
        match sym.segment {
            None => {
                // External declaration; keep at most one placeholder.
                if !out.symbol_table.iter().any(|it| it.name == sym.name) {
                    out.symbol_table.push(sym.clone());
                }
            }
            Some(seg) => {
                let address = sym.address.wrapping_add(shift(seg));
                if out.symbols.contains_key(&sym.name) {
                    return Err(Error::DuplicateSymbol(sym.name.clone()));
                }
                // A definition supersedes an external placeholder.
                out.symbol_table.retain(|it| {
                    it.name != sym.name || it.segment.is_some()
                });
                out.symbols.insert(sym.name.clone(), address);
                out.symbol_table.push(Symbol {
                    name: sym.name.clone(),
                    address,
                    segment: Some(seg),
                });
            }
        }
    }
    Ok(())
}

/// Applies every outstanding relocation against the merged symbol table.
fn resolve(out: &mut BinaryImage) -> Result<()> {
    let relocations = std::mem::take(&mut out.relocations);
    for reloc in relocations {
        let Some(&address) = out.symbols.get(&reloc.symbol) else {
            return Err(Error::UndefinedExtern(reloc.symbol));
        };
        let target = address.wrapping_add(reloc.addend as u32);
        patch(out, &reloc, target)?;
    }
    // Resolved definitions have replaced the external placeholders.
    out.symbol_table.retain(|it| it.segment.is_some());
    Ok(())
}

fn patch(out: &mut BinaryImage, reloc: &Relocation, target: u32) -> Result<()> {
    let place = out.base(reloc.segment) + reloc.offset;
    match reloc.segment {
        Segment::Text | Segment::Ktext => {
            let idx = (reloc.offset / 4) as usize;
            let words = match reloc.segment {
                Segment::Text => &mut out.text,
                _ => &mut out.ktext,
            };
            let word = words.get_mut(idx).ok_or(Error::Offset(reloc.offset))?;
            *word = apply(*word, reloc.kind, target, place)?;
        }
        Segment::Data | Segment::Kdata => {
            // Only full-width address constants land in data.
            if reloc.kind != RelocKind::Mips32 {
                return Err(Error::Kind(reloc.kind));
            }
            let idx = reloc.offset as usize;
            let little = out.little_endian;
            let data = match reloc.segment {
                Segment::Data => &mut out.data,
                _ => &mut out.kdata,
            };
            let bytes = data
                .get_mut(idx..idx + 4)
                .ok_or(Error::Offset(reloc.offset))?;
            let encoded = if little {
                target.to_le_bytes()
            } else {
                target.to_be_bytes()
            };
            bytes.copy_from_slice(&encoded);
        }
    }
    Ok(())
}

/// Rewrites one instruction word for a relocation kind.
fn apply(word: u32, kind: RelocKind, target: u32, place: u32) -> Result<u32> {
    Ok(match kind {
        RelocKind::Mips32 => target,
        RelocKind::Mips26 => (word & 0xfc00_0000) | ((target >> 2) & 0x03ff_ffff),
        RelocKind::MipsPc16 => {
            let offset = (i64::from(target) - i64::from(place) - 4) >> 2;
            if !(-0x8000..=0x7fff).contains(&offset) {
                return Err(Error::Range(target));
            }
            (word & 0xffff_0000) | (offset as u32 & 0xffff)
        }
        // The adjusted high half pairs with a sign-extending low-half
        // consumer.
        RelocKind::MipsHi16 => (word & 0xffff_0000) | (target.wrapping_add(0x8000) >> 16),
        RelocKind::MipsLo16 => (word & 0xffff_0000) | (target & 0xffff),
    })
}

/// A convenient type alias for [`Result`](std::result::Result).
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An error caused while [linking](link).
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum Error {
    /// No images supplied.
    #[error("no images to link")]
    Empty,
    /// Images disagree on byte order.
    #[error("endianness mismatch between images")]
    Endianness,
    /// A symbol is defined by more than one image.
    #[error("duplicate symbol: `{0}`")]
    DuplicateSymbol(String),
    /// An external symbol is referenced but never defined.
    #[error("undefined external symbol: `{0}`")]
    UndefinedExtern(String),
    /// A relocation points outside its segment.
    #[error("relocation offset out of range: {0:#x}")]
    Offset(u32),
    /// A relocation kind is not applicable to its segment.
    #[error("relocation kind not applicable: {0:?}")]
    Kind(RelocKind),
    /// A patched branch target does not fit its field.
    #[error("relocated branch target out of range: {0:#x}")]
    Range(u32),
}

#[cfg(test)]
mod tests {
    use super::super::{Assembler, Options};
    use super::*;

    fn assemble(src: &str) -> BinaryImage {
        Assembler::default().assemble("test.s", src).unwrap()
    }

    #[test]
    fn link_single_image_works() {
        let image = assemble("main: nop\n");
        let out = link(&[image.clone()]).unwrap();
        assert_eq!(out.text, image.text);
    }

    #[test]
    fn link_appends_segments() {
        let a = assemble(".data\nx: .word 1\n.text\nmain: nop\n");
        let b = assemble(".data\ny: .word 2\n.text\nsub: nop\n");
        let out = link(&[a, b]).unwrap();
        assert_eq!(out.text.len(), 2);
        assert_eq!(out.symbol("main"), Some(0x0040_0000));
        assert_eq!(out.symbol("sub"), Some(0x0040_0004));
        assert_eq!(out.symbol("x"), Some(0x1001_0000));
        assert_eq!(out.symbol("y"), Some(0x1001_0004));
    }

    #[test]
    fn link_resolves_extern_call() {
        let a = assemble(".extern helper 4\nmain: jal helper\n");
        let b = assemble("helper: jr $ra\n");
        let out = link(&[a, b]).unwrap();
        // helper lands at 0x00400004; jal target is address >> 2.
        assert_eq!(out.text[0], 0x0c00_0000 | (0x0040_0004 >> 2));
        assert!(out.relocations.is_empty());
    }

    #[test]
    fn link_resolves_extern_address_halves() {
        let a = assemble(".extern shared 4\nmain: la $t0, shared\n");
        let b = assemble(".data\nshared: .word 0\n");
        let out = link(&[a, b]).unwrap();
        // shared lands at the start of the merged data segment.
        assert_eq!(out.text[0], 0x3c01_1001);
        assert_eq!(out.text[1] & 0xffff, 0x0000);
    }

    #[test]
    fn link_duplicate_symbol_fails() {
        let a = assemble("main: nop\n");
        let b = assemble("main: nop\n");
        assert_eq!(
            link(&[a, b]).unwrap_err(),
            Error::DuplicateSymbol("main".to_owned())
        );
    }

    #[test]
    fn link_undefined_extern_fails() {
        let a = assemble(".extern missing 4\nmain: jal missing\n");
        assert_eq!(
            link(&[a]).unwrap_err(),
            Error::UndefinedExtern("missing".to_owned())
        );
    }

    #[test]
    fn link_endianness_mismatch_fails() {
        let a = assemble("main: nop\n");
        let big = Assembler::new(Options {
            little_endian: false,
            ..Options::default()
        });
        let b = big.assemble("other.s", "sub: nop\n").unwrap();
        assert_eq!(link(&[a, b]).unwrap_err(), Error::Endianness);
    }

    #[test]
    fn link_shifts_source_map() {
        let a = assemble("main: nop\n");
        let b = assemble("sub: nop\nnop\n");
        let out = link(&[a, b]).unwrap();
        let last = out.source_map.last().unwrap();
        assert_eq!(last.index, 2);
        assert_eq!(last.address, 0x0040_0008);
    }
}
