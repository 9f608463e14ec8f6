//! Parser for the textual IR form.
//!
//! Parsing happens in two steps: the text is read into per-block lists of
//! pending instructions that refer to values and blocks by name, then the
//! function is built with every name resolved. Instruction handles are
//! assigned in definition order (parameters first), so forward references
//! within a function resolve without placeholders.

use super::{Function, InsertPoint, InstData, InstId, Opcode, Type, BlockId};
use hashbrown::HashMap;

/// Parse every function in `text`.
pub fn parse_module(text: &str) -> Result<Vec<Function>, String> {
    let mut parser = Parser::new(text);
    let mut funcs = Vec::new();

    parser.skip_whitespace(true);
    while !parser.is_eof() {
        match parser.parse_function() {
            Ok(func) => funcs.push(func),
            Err(e) => {
                let context_start = parser.pos.saturating_sub(20);
                let context_end = (parser.pos + 20).min(text.len());
                log::debug!(
                    "parse failure context: '{}'",
                    text.get(context_start..context_end).unwrap_or("")
                );
                return Err(format!("{} (at byte {})", e, parser.pos));
            }
        }
        parser.skip_whitespace(true);
    }
    Ok(funcs)
}

struct PendingInst<'a> {
    name: Option<&'a str>,
    op: Opcode,
    operands: Vec<&'a str>,
    targets: Vec<&'a str>,
    constant: f64,
    extent: u32,
    callee: Option<&'a str>,
    differential: bool,
}

impl<'a> PendingInst<'a> {
    fn new(name: Option<&'a str>, op: Opcode) -> Self {
        Self {
            name,
            op,
            operands: Vec::new(),
            targets: Vec::new(),
            constant: 0.0,
            extent: 0,
            callee: None,
            differential: false,
        }
    }
}

struct PendingBlock<'a> {
    name: &'a str,
    differential: bool,
    insts: Vec<PendingInst<'a>>,
}

struct Parser<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.text.len()
    }

    fn current_char(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn advance(&mut self) {
        if let Some(ch) = self.current_char() {
            self.pos += ch.len_utf8();
        }
    }

    fn skip_whitespace(&mut self, skip_newlines: bool) {
        while let Some(ch) = self.current_char() {
            if ch == ';' {
                // Skip comment line
                while let Some(ch) = self.current_char() {
                    if ch == '\n' {
                        break;
                    }
                    self.advance();
                }
            } else if ch.is_whitespace() {
                if ch == '\n' && !skip_newlines {
                    break;
                }
                self.advance();
            } else {
                break;
            }
        }
    }

    fn try_read(&mut self, ch: char) -> bool {
        self.skip_whitespace(true);
        if self.current_char() == Some(ch) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, ch: char) -> Result<(), String> {
        if !self.try_read(ch) {
            return Err(format!(
                "Expected '{}' but found {:?}",
                ch,
                self.current_char()
            ));
        }
        Ok(())
    }

    fn read_identifier(&mut self) -> Result<&'a str, String> {
        self.skip_whitespace(true);
        let start = self.pos;

        match self.current_char() {
            Some(ch) if ch.is_alphanumeric() || ch == '_' => {}
            Some(ch) => return Err(format!("Expected identifier but found '{}'", ch)),
            None => return Err("Expected identifier but found EOF".to_string()),
        }

        while let Some(ch) = self.current_char() {
            if ch.is_alphanumeric() || ch == '_' || ch == '.' {
                self.advance();
            } else {
                break;
            }
        }
        Ok(&self.text[start..self.pos])
    }

    fn read_value_name(&mut self) -> Result<&'a str, String> {
        self.expect('%')?;
        self.read_identifier()
    }

    fn read_block_name(&mut self) -> Result<&'a str, String> {
        self.expect('^')?;
        self.read_identifier()
    }

    fn read_token(&mut self) -> &'a str {
        self.skip_whitespace(true);
        let start = self.pos;
        while let Some(ch) = self.current_char() {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '+' | '_') {
                self.advance();
            } else {
                break;
            }
        }
        &self.text[start..self.pos]
    }

    fn read_float(&mut self) -> Result<f64, String> {
        let token = self.read_token();
        token
            .parse::<f64>()
            .map_err(|_| format!("Expected number but found '{}'", token))
    }

    fn read_number(&mut self) -> Result<u32, String> {
        let token = self.read_token();
        token
            .parse::<u32>()
            .map_err(|_| format!("Expected integer but found '{}'", token))
    }

    /// `!diff` at the current position (same line).
    fn try_read_diff_tag(&mut self) -> Result<bool, String> {
        self.skip_whitespace(false);
        if self.current_char() != Some('!') {
            return Ok(false);
        }
        self.advance();
        let tag = self.read_identifier()?;
        if tag != "diff" {
            return Err(format!("Unknown tag '!{}'", tag));
        }
        Ok(true)
    }

    fn parse_function(&mut self) -> Result<Function, String> {
        let name = self.read_identifier()?;
        self.expect('(')?;

        let mut params = Vec::new();
        if !self.try_read(')') {
            loop {
                params.push(self.read_value_name()?);
                if self.try_read(')') {
                    break;
                }
                self.expect(',')?;
            }
        }
        self.expect('{')?;

        let mut blocks: Vec<PendingBlock<'a>> = Vec::new();
        loop {
            if self.try_read('}') {
                break;
            }
            if self.is_eof() {
                return Err(format!("Unterminated function {}", name));
            }

            if self.current_char() == Some('%') {
                let def = self.read_value_name()?;
                self.expect('=')?;
                let op_name = self.read_identifier()?;
                let inst = self.parse_inst(Some(def), op_name)?;
                Self::current_block(&mut blocks)?.insts.push(inst);
                continue;
            }

            let word = self.read_identifier()?;
            self.skip_whitespace(false);
            match self.current_char() {
                Some(':') => {
                    self.advance();
                    blocks.push(PendingBlock { name: word, differential: false, insts: Vec::new() });
                }
                Some('!') => {
                    self.try_read_diff_tag()?;
                    self.expect(':')?;
                    blocks.push(PendingBlock { name: word, differential: true, insts: Vec::new() });
                }
                _ => {
                    let inst = self.parse_inst(None, word)?;
                    Self::current_block(&mut blocks)?.insts.push(inst);
                }
            }
        }

        build_function(name, &params, blocks)
    }

    fn current_block<'b>(
        blocks: &'b mut [PendingBlock<'a>],
    ) -> Result<&'b mut PendingBlock<'a>, String> {
        blocks
            .last_mut()
            .ok_or_else(|| "Instruction outside of a block".to_string())
    }

    fn parse_inst(&mut self, def: Option<&'a str>, op_name: &str) -> Result<PendingInst<'a>, String> {
        let op = Opcode::from_str(op_name).ok_or_else(|| format!("Unknown opcode '{}'", op_name))?;
        let info = op.info();
        if def.is_some() && info.result == Type::Void {
            return Err(format!("'{}' does not produce a value", op_name));
        }

        let mut inst = PendingInst::new(def, op);
        match op {
            Opcode::Const => inst.constant = self.read_float()?,
            Opcode::Array => inst.extent = self.read_number()?,
            Opcode::Call => {
                self.expect('@')?;
                inst.callee = Some(self.read_identifier()?);
                self.skip_whitespace(false);
                if self.current_char() == Some('%') {
                    loop {
                        inst.operands.push(self.read_value_name()?);
                        self.skip_whitespace(false);
                        if self.current_char() != Some(',') {
                            break;
                        }
                        self.advance();
                    }
                }
            }
            _ => {
                for i in 0..info.op_count {
                    if i > 0 {
                        self.expect(',')?;
                    }
                    inst.operands.push(self.read_value_name()?);
                }
                for i in 0..info.succ_count {
                    if i > 0 || info.op_count > 0 {
                        self.expect(',')?;
                    }
                    inst.targets.push(self.read_block_name()?);
                }
            }
        }
        inst.differential = self.try_read_diff_tag()?;
        Ok(inst)
    }
}

fn build_function(name: &str, params: &[&str], blocks: Vec<PendingBlock<'_>>) -> Result<Function, String> {
    if blocks.is_empty() {
        return Err(format!("Function {} has no blocks", name));
    }

    // Handles are assigned in creation order, so names can be resolved up front.
    let mut values: HashMap<&str, InstId> = HashMap::new();
    let defined = params
        .iter()
        .copied()
        .map(Some)
        .chain(blocks.iter().flat_map(|b| b.insts.iter().map(|i| i.name)));
    for (idx, def) in defined.enumerate() {
        if let Some(def) = def {
            if values.insert(def, InstId(idx as u32)).is_some() {
                return Err(format!("Redefinition of %{}", def));
            }
        }
    }

    let mut block_ids: HashMap<&str, BlockId> = HashMap::new();
    for (idx, block) in blocks.iter().enumerate() {
        if block_ids.insert(block.name, BlockId(idx as u32)).is_some() {
            return Err(format!("Redefinition of block {}", block.name));
        }
    }

    let mut func = Function::new(name);
    for block in &blocks {
        let id = func.add_block(Some(block.name));
        if block.differential {
            func.mark_block_differential(id);
        }
    }

    let entry = BlockId(0);
    for &param in params {
        let id = func.create_inst(InsertPoint::End(entry), Opcode::Param, Vec::new(), Vec::new());
        func.set_name_hint(id, param);
    }

    for (block_idx, block) in blocks.iter().enumerate() {
        let block_id = BlockId(block_idx as u32);
        for pending in &block.insts {
            let operands = pending
                .operands
                .iter()
                .map(|n| {
                    values
                        .get(n)
                        .copied()
                        .ok_or_else(|| format!("Undefined value %{} in {}", n, name))
                })
                .collect::<Result<Vec<_>, _>>()?;
            let targets = pending
                .targets
                .iter()
                .map(|n| {
                    block_ids
                        .get(n)
                        .copied()
                        .ok_or_else(|| format!("Undefined block ^{} in {}", n, name))
                })
                .collect::<Result<Vec<_>, _>>()?;

            let mut data = InstData::new(pending.op, operands, targets);
            data.constant = pending.constant;
            data.extent = pending.extent;
            data.callee = pending.callee.map(str::to_string);
            data.name = pending.name.map(str::to_string);
            data.differential = pending.differential;
            func.create_from(InsertPoint::End(block_id), data);
        }

        let has_terminator = func.terminator(block_id).is_some();
        let terminators = func
            .block_insts(block_id)
            .iter()
            .filter(|&&i| func.opcode(i).info().is_terminator)
            .count();
        if !has_terminator || terminators != 1 {
            return Err(format!(
                "Block {} must end in exactly one terminator",
                block.name
            ));
        }
    }

    Ok(func)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Use;

    #[test]
    fn test_parse_two_block_function() {
        let text = r#"
; y = f(x); z = g(y)
fg(%x) {
entry:
  br ^body
body:
  %y = sin %x
  %z = mul %y, %x !diff
  ret %z
}
"#;
        let func = Function::parse(text).unwrap();

        assert_eq!(func.name(), "fg");
        assert_eq!(func.layout().len(), 2);
        assert_eq!(func.params().len(), 1);

        let x = func.find_inst("x").unwrap();
        let y = func.find_inst("y").unwrap();
        let z = func.find_inst("z").unwrap();
        assert_eq!(func.opcode(y), Opcode::Sin);
        assert!(func.is_differential(z));
        assert!(!func.is_differential(y));
        assert_eq!(func.operands(z), &[y, x]);
        assert_eq!(func.uses(y), &[Use::new(z, 0)]);

        let entry = func.entry_block().unwrap();
        assert_eq!(func.successors(entry), vec![func.find_block("body").unwrap()]);
    }

    #[test]
    fn test_parse_forward_reference_and_tags() {
        let text = r#"
loop_fn(%n) {
entry:
  %acc = var
  %buf = array 8
  %zero = const 0
  store %acc, %zero
  br ^head
head:
  %v = load %acc
  %e = elemaddr %buf, %v
  condbr %v, ^head, ^back
back !diff:
  %r = call @sample %v, %n
  ret %r
}
"#;
        let func = Function::parse(text).unwrap();
        let back = func.find_block("back").unwrap();
        assert!(func.is_block_differential(back));

        let buf = func.find_inst("buf").unwrap();
        assert_eq!(func.inst(buf).extent, 8);
        let r = func.find_inst("r").unwrap();
        assert_eq!(func.inst(r).callee.as_deref(), Some("sample"));
        assert_eq!(func.operands(r).len(), 2);
        assert!(func.find_inst("e").is_some());
    }

    #[test]
    fn test_print_parses_back() {
        let text = r#"
f(%a, %b) {
entry:
  br ^body
body:
  %c = const 2.5
  %d = add %a, %c
  %e = div %d, %b !diff
  ret %e
}
"#;
        let func = Function::parse(text).unwrap();
        let printed = func.print();
        let again = Function::parse(&printed).unwrap();
        assert_eq!(again.print(), printed);
        assert!(printed.contains("%c = const 2.5"));
        assert!(printed.contains("%e = div %d, %b !diff"));
    }

    #[test]
    fn test_parse_errors() {
        assert!(Function::parse("f() {\nentry:\n  %y = sin %nope\n  ret %y\n}").is_err());
        assert!(Function::parse("f() {\nentry:\n  %y = const 1\n}").is_err());
        assert!(Function::parse("f(%a) {\nentry:\n  %a = const 1\n  ret %a\n}").is_err());
        assert!(Function::parse("f() {\nentry:\n  %y = frob\n  ret %y\n}").is_err());
    }
}
