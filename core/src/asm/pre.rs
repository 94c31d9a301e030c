//! Source preprocessing.
//!
//! Runs before the layout pass: strips comments, splices `.include`d files
//! (detecting cycles), applies `.eqv` constant aliases (scoped to the file
//! that defines them), and expands `.macro` bodies with hygienic labels.

use std::collections::HashMap;

use super::{Cause, Error, Phase, Result};

/// Maximum nesting depth for macro expansion.
const MACRO_DEPTH: usize = 16;

/// Maximum substitution rounds before an `.eqv` chain is deemed recursive.
const EQV_ROUNDS: usize = 32;

/// A preprocessed source line.
#[derive(Clone, Debug)]
pub struct Line {
    /// Originating file name.
    pub file: String,
    /// Originating line number (1-indexed).
    pub num: usize,
    /// Line text with comments stripped and substitutions applied.
    pub text: String,
}

/// Preprocesses a source file into a flat line sequence.
///
/// # Errors
///
/// Errors on include cycles, missing includes, unterminated macros, and
/// recursive aliases.
pub fn process(
    file: &str,
    source: &str,
    includes: &HashMap<String, String>,
) -> Result<Vec<Line>> {
    // Splice includes and apply aliases.
    let mut gathered = Vec::new();
    let mut eqvs = HashMap::new();
    let mut stack = vec![file.to_owned()];
    gather(file, source, includes, &mut stack, &mut eqvs, &mut gathered)?;
    // Expand macros.
    let mut macros = Macros::default();
    macros.expand_all(&gathered)
}

fn fail(file: &str, num: usize, cause: Cause) -> Error {
    Error {
        phase: Phase::Preprocess,
        file: file.to_owned(),
        line: num,
        column: 1,
        cause,
    }
}

fn gather(
    file: &str,
    source: &str,
    includes: &HashMap<String, String>,
    stack: &mut Vec<String>,
    eqvs: &mut HashMap<String, Vec<(String, String)>>,
    out: &mut Vec<Line>,
) -> Result<()> {
    for (idx, raw) in source.lines().enumerate() {
        let num = idx + 1;
        let text = strip_comment(raw).trim_end();
        let trimmed = text.trim_start();
        if let Some(rest) = trimmed.strip_prefix(".include") {
            let path = parse_include(rest).ok_or_else(|| {
                fail(file, num, Cause::IncludeMissing(rest.trim().to_owned()))
            })?;
            if stack.iter().any(|it| it == &path) {
                return Err(fail(file, num, Cause::IncludeCycle(path)));
            }
            let body = includes
                .get(&path)
                .ok_or_else(|| fail(file, num, Cause::IncludeMissing(path.clone())))?;
            stack.push(path.clone());
            gather(&path, body, includes, stack, eqvs, out)?;
            stack.pop();
        } else if let Some(rest) = trimmed.strip_prefix(".eqv") {
            let (name, repl) = parse_eqv(rest)
                .ok_or_else(|| fail(file, num, Cause::BadMacro(".eqv".to_owned())))?;
            if contains_ident(&repl, &name) {
                return Err(fail(file, num, Cause::RecursiveEqv(name)));
            }
            eqvs.entry(file.to_owned()).or_default().push((name, repl));
        } else {
            let text = apply_eqvs(text, eqvs.get(file).map_or(&[][..], Vec::as_slice))
                .map_err(|name| fail(file, num, Cause::RecursiveEqv(name)))?;
            out.push(Line {
                file: file.to_owned(),
                num,
                text,
            });
        }
    }
    Ok(())
}

/// Strips a `#` comment, honoring string and character literals.
fn strip_comment(line: &str) -> &str {
    let mut quote = None;
    let mut escape = false;
    for (idx, ch) in line.char_indices() {
        if escape {
            escape = false;
            continue;
        }
        match (quote, ch) {
            (Some(_), '\\') => escape = true,
            (Some(open), close) if open == close => quote = None,
            (None, '"' | '\'') => quote = Some(ch),
            (None, '#') => return &line[..idx],
            _ => (),
        }
    }
    line
}

fn parse_include(rest: &str) -> Option<String> {
    let rest = rest.trim();
    let rest = rest.strip_prefix('"')?;
    let end = rest.find('"')?;
    Some(rest[..end].to_owned())
}

fn parse_eqv(rest: &str) -> Option<(String, String)> {
    let rest = rest.trim();
    let end = rest
        .find(|ch: char| !ch.is_ascii_alphanumeric() && ch != '_' && ch != '.')
        .unwrap_or(rest.len());
    if end == 0 {
        return None;
    }
    let (name, repl) = rest.split_at(end);
    Some((name.to_owned(), repl.trim().to_owned()))
}

/// Applies alias substitutions to fixpoint, bounded by [`EQV_ROUNDS`].
fn apply_eqvs(text: &str, eqvs: &[(String, String)]) -> std::result::Result<String, String> {
    let mut text = text.to_owned();
    for _ in 0..EQV_ROUNDS {
        let mut changed = false;
        for (name, repl) in eqvs {
            let next = subst_ident(&text, name, repl);
            changed |= next != text;
            text = next;
        }
        if !changed {
            return Ok(text);
        }
    }
    // Still changing after the bound: some alias chain loops.
    Err(eqvs.last().map(|(name, _)| name.clone()).unwrap_or_default())
}

/// Replaces whole-identifier occurrences of `name`, skipping literals.
fn subst_ident(text: &str, name: &str, repl: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut idx = 0;
    let mut quote = None::<u8>;
    while idx < bytes.len() {
        let ch = bytes[idx];
        if let Some(open) = quote {
            if ch == b'\\' {
                out.push_str(&text[idx..(idx + 2).min(text.len())]);
                idx += 2;
                continue;
            }
            if ch == open {
                quote = None;
            }
            out.push(char::from(ch));
            idx += 1;
            continue;
        }
        if ch == b'"' || ch == b'\'' {
            quote = Some(ch);
            out.push(char::from(ch));
            idx += 1;
            continue;
        }
        if is_ident_byte(ch) {
            let start = idx;
            while idx < bytes.len() && is_ident_byte(bytes[idx]) {
                idx += 1;
            }
            let word = &text[start..idx];
            out.push_str(if word == name { repl } else { word });
            continue;
        }
        out.push(char::from(ch));
        idx += 1;
    }
    out
}

fn contains_ident(text: &str, name: &str) -> bool {
    subst_ident(text, name, "\u{1}") != text
}

fn is_ident_byte(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || ch == b'_' || ch == b'.'
}

/// A recorded macro definition.
#[derive(Clone, Debug)]
struct Macro {
    /// Formal parameter names (without the `%` sigil).
    formals: Vec<String>,
    /// Body lines as defined.
    body: Vec<Line>,
    /// Labels defined within the body, for hygienic renaming.
    labels: Vec<String>,
}

/// Macro definition table and expansion state.
#[derive(Debug, Default)]
struct Macros {
    /// Definitions keyed by name and arity.
    table: HashMap<(String, usize), Macro>,
    /// Monotonic counter distinguishing expansion instances.
    instance: usize,
}

impl Macros {
    /// Collects definitions and expands calls over a line sequence.
    fn expand_all(&mut self, lines: &[Line]) -> Result<Vec<Line>> {
        let mut out = Vec::new();
        let mut iter = lines.iter();
        while let Some(line) = iter.next() {
            let trimmed = line.text.trim_start();
            if let Some(rest) = trimmed.strip_prefix(".macro") {
                let (name, formals) = parse_signature(rest)
                    .ok_or_else(|| fail(&line.file, line.num, Cause::BadMacro(rest.trim().to_owned())))?;
                let mut body = Vec::new();
                loop {
                    let Some(next) = iter.next() else {
                        return Err(fail(&line.file, line.num, Cause::UnterminatedMacro));
                    };
                    if next.text.trim() == ".end_macro" {
                        break;
                    }
                    body.push(next.clone());
                }
                let labels = body.iter().filter_map(|it| leading_label(&it.text)).collect();
                self.table.insert(
                    (name, formals.len()),
                    Macro {
                        formals,
                        body,
                        labels,
                    },
                );
            } else {
                self.expand_line(line, 0, &mut out)?;
            }
        }
        Ok(out)
    }

    /// Expands one line, recursing through nested macro calls.
    fn expand_line(&mut self, line: &Line, depth: usize, out: &mut Vec<Line>) -> Result<()> {
        if depth > MACRO_DEPTH {
            return Err(fail(&line.file, line.num, Cause::MacroDepth));
        }
        // A leading label sticks to the line; peel it off so a labeled macro
        // call still expands.
        if let Some(label) = leading_label(&line.text) {
            let rest = line.text.trim_start()[label.len()..]
                .trim_start()
                .strip_prefix(':')
                .unwrap_or_default()
                .trim_start()
                .to_owned();
            if parse_call(&rest)
                .is_some_and(|(name, args)| self.table.contains_key(&(name, args.len())))
            {
                out.push(Line {
                    file: line.file.clone(),
                    num: line.num,
                    text: format!("{label}:"),
                });
                let rest = Line {
                    file: line.file.clone(),
                    num: line.num,
                    text: rest,
                };
                return self.expand_line(&rest, depth, out);
            }
        }
        let Some((name, args)) = parse_call(&line.text) else {
            out.push(line.clone());
            return Ok(());
        };
        let Some(mac) = self.table.get(&(name, args.len())).cloned() else {
            out.push(line.clone());
            return Ok(());
        };
        self.instance += 1;
        let instance = self.instance;
        for body in &mac.body {
            let mut text = body.text.clone();
            // Substitute formal parameters.
            for (formal, arg) in mac.formals.iter().zip(&args) {
                text = text.replace(&format!("%{formal}"), arg);
            }
            // Rename body-local labels so repeated expansions stay distinct.
            for label in &mac.labels {
                text = subst_ident(&text, label, &format!("{label}_M{instance}"));
            }
            let expanded = Line {
                file: line.file.clone(),
                num: line.num,
                text,
            };
            self.expand_line(&expanded, depth + 1, out)?;
        }
        Ok(())
    }
}

/// Parses a `.macro` signature: `name`, `name(%a, %b)`, or `name %a, %b`.
fn parse_signature(rest: &str) -> Option<(String, Vec<String>)> {
    let rest = rest.trim();
    let end = rest
        .find(|ch: char| !ch.is_ascii_alphanumeric() && ch != '_')
        .unwrap_or(rest.len());
    if end == 0 {
        return None;
    }
    let (name, params) = rest.split_at(end);
    let params = params.trim().trim_start_matches('(').trim_end_matches(')');
    let mut formals = Vec::new();
    for param in params.split(',') {
        let param = param.trim();
        if param.is_empty() {
            continue;
        }
        formals.push(param.strip_prefix('%')?.to_owned());
    }
    Some((name.to_owned(), formals))
}

/// Parses a potential macro call into its name and top-level argument texts.
fn parse_call(text: &str) -> Option<(String, Vec<String>)> {
    let trimmed = text.trim();
    let end = trimmed
        .find(|ch: char| !ch.is_ascii_alphanumeric() && ch != '_')
        .unwrap_or(trimmed.len());
    if end == 0 {
        return None;
    }
    let (name, rest) = trimmed.split_at(end);
    // A trailing colon marks a label definition, not a call.
    if rest.trim_start().starts_with(':') {
        return None;
    }
    let rest = rest.trim();
    let args = if rest.is_empty() {
        Vec::new()
    } else {
        split_args(rest)
    };
    Some((name.to_owned(), args))
}

/// Splits an argument list on top-level commas.
fn split_args(text: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut depth = 0_i32;
    let mut start = 0;
    for (idx, ch) in text.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                args.push(text[start..idx].trim().to_owned());
                start = idx + 1;
            }
            _ => (),
        }
    }
    args.push(text[start..].trim().to_owned());
    args
}

fn leading_label(text: &str) -> Option<String> {
    let trimmed = text.trim_start();
    let end = trimmed
        .find(|ch: char| !ch.is_ascii_alphanumeric() && ch != '_' && ch != '.')
        .unwrap_or(trimmed.len());
    if end == 0 {
        return None;
    }
    let (name, rest) = trimmed.split_at(end);
    rest.trim_start()
        .starts_with(':')
        .then(|| name.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(lines: &[Line]) -> Vec<&str> {
        lines
            .iter()
            .map(|it| it.text.trim())
            .filter(|it| !it.is_empty())
            .collect()
    }

    #[test]
    fn strip_comment_works() {
        assert_eq!(strip_comment("addi $t0, $t0, 1 # bump"), "addi $t0, $t0, 1 ");
        assert_eq!(strip_comment(r#".asciiz "a # b" # tail"#), r#".asciiz "a # b" "#);
    }

    #[test]
    fn include_works() {
        let mut includes = HashMap::new();
        includes.insert("lib.s".to_owned(), "sub: jr $ra".to_owned());
        let lines = process("main.s", ".include \"lib.s\"\nmain: nop", &includes).unwrap();
        assert_eq!(texts(&lines), vec!["sub: jr $ra", "main: nop"]);
        assert_eq!(lines[0].file, "lib.s");
    }

    #[test]
    fn include_cycle_fails() {
        let mut includes = HashMap::new();
        includes.insert("a.s".to_owned(), ".include \"a.s\"".to_owned());
        let err = process("a.s", ".include \"a.s\"", &includes).unwrap_err();
        assert!(matches!(err.cause, Cause::IncludeCycle(_)));
    }

    #[test]
    fn eqv_substitutes_in_same_file() {
        let source = ".eqv LIMIT 10\naddi $t0, $zero, LIMIT";
        let lines = process("main.s", source, &HashMap::new()).unwrap();
        assert_eq!(texts(&lines), vec!["addi $t0, $zero, 10"]);
    }

    #[test]
    fn eqv_self_reference_fails() {
        let err = process("main.s", ".eqv N N+1", &HashMap::new()).unwrap_err();
        assert!(matches!(err.cause, Cause::RecursiveEqv(_)));
    }

    #[test]
    fn macro_expansion_works() {
        let source = "\
.macro inc (%reg)
addi %reg, %reg, 1
.end_macro
inc $t0
inc $t1";
        let lines = process("main.s", source, &HashMap::new()).unwrap();
        assert_eq!(
            texts(&lines),
            vec!["addi $t0, $t0, 1", "addi $t1, $t1, 1"]
        );
    }

    #[test]
    fn macro_labels_are_renamed_per_expansion() {
        let source = "\
.macro spin
wait: bne $t0, $zero, wait
.end_macro
spin
spin";
        let lines = process("main.s", source, &HashMap::new()).unwrap();
        let out = texts(&lines);
        assert_eq!(out.len(), 2);
        assert_ne!(out[0], out[1]);
        assert!(out[0].starts_with("wait_M1:"));
        assert!(out[1].starts_with("wait_M2:"));
    }

    #[test]
    fn unterminated_macro_fails() {
        let err = process("main.s", ".macro broken\nnop", &HashMap::new()).unwrap_err();
        assert!(matches!(err.cause, Cause::UnterminatedMacro));
    }

    #[test]
    fn nested_macro_depth_is_bounded() {
        let source = "\
.macro a
a
.end_macro
a";
        let err = process("main.s", source, &HashMap::new()).unwrap_err();
        assert!(matches!(err.cause, Cause::MacroDepth));
    }
}
