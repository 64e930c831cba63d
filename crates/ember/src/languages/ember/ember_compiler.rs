use super::ember_lexer::EmberLexer;
use super::ember_parsing::{parse_number, parse_string};
use super::{EmberToken, EmberTokenLabel};
use crate::errors::{CompilationError, CompilationErrors, SyntaxError};
use crate::interpreter::chunk::Chunk;
use crate::interpreter::function::FnProto;
use crate::interpreter::heap::{FnKey, GarbageCollector, Heap};
use crate::interpreter::table::MapKey;
use crate::interpreter::value_stack::StackValue;
use crate::interpreter::{OpCode, INC_BIAS};
use crate::FastHashMap;
use std::iter::Peekable;
use std::rc::Rc;

const MAX_LOCALS: usize = 256;
const MAX_UP_VALUES: usize = 256;
const MAX_ARGS: usize = 255;
const MAX_PARAMS: usize = 255;
const MAX_RETURNS: usize = 255;
const SCRIPT_NAME: &str = "main";

/// Operator precedence, low to high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment, // =
    Concat,     // ..
    Or,         // or
    And,        // and
    Equality,   // == !=
    Comparison, // < > <= >=
    Term,       // + -
    Factor,     // * / %
    Unary,      // ! - #
    Call,       // . : () []
    Primary,
}

impl Precedence {
    fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Concat,
            Precedence::Concat => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call | Precedence::Primary => Precedence::Primary,
        }
    }
}

fn infix_precedence(label: EmberTokenLabel) -> Precedence {
    match label {
        EmberTokenLabel::OpenParen
        | EmberTokenLabel::OpenBracket
        | EmberTokenLabel::Dot
        | EmberTokenLabel::Colon => Precedence::Call,
        EmberTokenLabel::Star | EmberTokenLabel::Slash | EmberTokenLabel::Percent => {
            Precedence::Factor
        }
        EmberTokenLabel::Plus | EmberTokenLabel::Minus => Precedence::Term,
        EmberTokenLabel::CmpLess
        | EmberTokenLabel::CmpGreater
        | EmberTokenLabel::CmpLessEqual
        | EmberTokenLabel::CmpGreaterEqual => Precedence::Comparison,
        EmberTokenLabel::CmpEqual | EmberTokenLabel::CmpNotEqual => Precedence::Equality,
        EmberTokenLabel::And => Precedence::And,
        EmberTokenLabel::Or => Precedence::Or,
        EmberTokenLabel::DoubleDot => Precedence::Concat,
        _ => Precedence::None,
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum FunctionType {
    Script,
    Function,
    Method,
}

struct Local<'source> {
    name: &'source str,
    /// `None` while declared but not yet initialized, so an initializer
    /// cannot read the variable it is defining.
    depth: Option<usize>,
    captured: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
struct UpValueDesc {
    index: u8,
    is_local: bool,
}

struct LoopState {
    scope_depth: usize,
    /// Bytecode offset `continue` jumps back to.
    start: usize,
    /// Forward jumps patched when the loop ends.
    breaks: Vec<usize>,
}

/// Per-function compiler state. Enclosing functions stack up below the one
/// currently being compiled.
struct FunctionState<'source> {
    chunk: Chunk,
    constants: FastHashMap<MapKey, u16>,
    name: Rc<str>,
    fn_type: FunctionType,
    arity: u8,
    variadic: bool,
    locals: Vec<Local<'source>>,
    up_values: Vec<UpValueDesc>,
    scope_depth: usize,
    /// Net number of values the emitted code leaves on the operand stack.
    pushed_values: isize,
    /// How many results the innermost call site should request.
    expected_values: usize,
    loop_state: Option<LoopState>,
}

impl<'source> FunctionState<'source> {
    fn new(name: Rc<str>, fn_type: FunctionType) -> Self {
        // slot 0 is reserved for the callee
        let reserved = Local {
            name: "",
            depth: Some(0),
            captured: false,
        };

        Self {
            chunk: Chunk::default(),
            constants: Default::default(),
            name,
            fn_type,
            arity: 0,
            variadic: false,
            locals: vec![reserved],
            up_values: Vec::new(),
            scope_depth: 0,
            pushed_values: 0,
            expected_values: 0,
            loop_state: None,
        }
    }
}

enum VarTarget {
    Local(usize),
    Global(u16),
}

#[derive(Default)]
pub struct Compiler {
    lexer: EmberLexer,
}

impl Compiler {
    /// Compiles `source` into a root function prototype. Strings and inner
    /// prototypes are interned/stored directly in the heap, so the caller
    /// freezes the collector around this.
    pub(crate) fn compile(
        &self,
        heap: &mut Heap,
        gc: &mut GarbageCollector,
        source: &str,
        module: &str,
    ) -> Result<FnKey, CompilationErrors> {
        CompilationJob::new(heap, gc, source, module, self.lexer.lex(source)).compile()
    }
}

struct CompilationJob<'heap, 'source, I: Iterator> {
    heap: &'heap mut Heap,
    gc: &'heap mut GarbageCollector,
    source: &'source str,
    module: Rc<str>,
    token_iter: Peekable<I>,
    previous: Option<EmberToken<'source>>,
    functions: Vec<FunctionState<'source>>,
    errors: Vec<CompilationError>,
    panicked: bool,
    fatal: bool,
    newlines: Vec<usize>,
}

impl<'heap, 'source, I> CompilationJob<'heap, 'source, I>
where
    I: Iterator<Item = Result<EmberToken<'source>, SyntaxError<EmberTokenLabel>>>,
{
    fn new(
        heap: &'heap mut Heap,
        gc: &'heap mut GarbageCollector,
        source: &'source str,
        module: &str,
        token_iter: I,
    ) -> Self {
        let newlines = source
            .bytes()
            .enumerate()
            .filter(|(_, b)| *b == b'\n')
            .map(|(i, _)| i)
            .collect();

        Self {
            heap,
            gc,
            source,
            module: module.into(),
            token_iter: token_iter.peekable(),
            previous: None,
            functions: vec![FunctionState::new(SCRIPT_NAME.into(), FunctionType::Script)],
            errors: Vec::new(),
            panicked: false,
            fatal: false,
            newlines,
        }
    }

    fn compile(mut self) -> Result<FnKey, CompilationErrors> {
        loop {
            if self.fatal {
                break;
            }

            match self.peek() {
                Ok(None) => break,
                Ok(Some(_)) => self.declaration(),
                Err(err) => {
                    self.report(err);
                    break;
                }
            }
        }

        // drop any locals the script left in scope
        self.emit_locals_cleanup(0, true);

        let (fn_key, _) = self.end_function();

        if self.errors.is_empty() {
            Ok(fn_key)
        } else {
            Err(self.errors.into())
        }
    }

    // ------------------------------------------------------------ frontend

    fn line_of(&self, offset: usize) -> usize {
        self.newlines.partition_point(|&n| n < offset) + 1
    }

    fn previous_offset(&self) -> usize {
        self.previous.map(|t| t.offset).unwrap_or(self.source.len())
    }

    fn line(&self) -> usize {
        self.line_of(self.previous_offset())
    }

    fn peek(&mut self) -> Result<Option<EmberToken<'source>>, CompilationError> {
        match self.token_iter.peek() {
            None => Ok(None),
            Some(Ok(token)) => Ok(Some(*token)),
            Some(Err(err)) => Err(err.clone().into()),
        }
    }

    fn advance(&mut self) -> Result<Option<EmberToken<'source>>, CompilationError> {
        match self.token_iter.next() {
            None => Ok(None),
            Some(Ok(token)) => {
                self.previous = Some(token);
                Ok(Some(token))
            }
            Some(Err(err)) => {
                self.fatal = true;
                Err(err.into())
            }
        }
    }

    fn expect_any(&mut self) -> Result<EmberToken<'source>, CompilationError> {
        self.advance()?
            .ok_or(CompilationError::SyntaxError(SyntaxError::UnexpectedEof))
    }

    fn expect(
        &mut self,
        label: EmberTokenLabel,
    ) -> Result<EmberToken<'source>, CompilationError> {
        let token = self.expect_any()?;

        if token.label != label {
            return Err(SyntaxError::new_unexpected_token(self.source, token).into());
        }

        Ok(token)
    }

    fn check(&mut self, label: EmberTokenLabel) -> Result<bool, CompilationError> {
        Ok(self.peek()?.is_some_and(|token| token.label == label))
    }

    fn match_label(&mut self, label: EmberTokenLabel) -> Result<bool, CompilationError> {
        if self.check(label)? {
            self.advance()?;
            return Ok(true);
        }

        Ok(false)
    }

    fn report(&mut self, error: CompilationError) {
        if !self.panicked {
            self.errors.push(error);
        }

        self.panicked = true;
    }

    /// Skips ahead to the next statement terminator so one mistake does not
    /// cascade into a wall of errors.
    fn synchronize(&mut self) {
        self.panicked = false;

        loop {
            let token = match self.peek() {
                Ok(Some(token)) => token,
                Ok(None) => return,
                Err(_) => {
                    self.fatal = true;
                    return;
                }
            };

            match token.label {
                EmberTokenLabel::SemiColon => {
                    let _ = self.advance();
                    return;
                }
                EmberTokenLabel::End | EmberTokenLabel::Else | EmberTokenLabel::ElseIf => return,
                _ => {
                    if self.advance().is_err() {
                        return;
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------ emission

    fn fs(&mut self) -> &mut FunctionState<'source> {
        self.functions.last_mut().unwrap()
    }

    fn emit_op(&mut self, op: OpCode) {
        let line = self.line();
        self.fs().chunk.write_op(op, line);
    }

    fn emit_u8(&mut self, byte: u8) {
        let line = self.line();
        self.fs().chunk.write_u8(byte, line);
    }

    fn emit_u16(&mut self, value: u16) {
        let line = self.line();
        self.fs().chunk.write_u16(value, line);
    }

    fn emit_jump(&mut self, op: OpCode) -> usize {
        let line = self.line();
        self.fs().chunk.write_jump(op, line)
    }

    fn patch_jump(&mut self, operand_index: usize) -> Result<(), CompilationError> {
        if self.fs().chunk.patch_jump(operand_index) {
            Ok(())
        } else {
            Err(CompilationError::new_jump_too_far(
                self.source,
                self.previous_offset(),
            ))
        }
    }

    fn emit_jump_back(&mut self, target: usize) -> Result<(), CompilationError> {
        let line = self.line();

        if self.fs().chunk.write_jump_back(target, line) {
            Ok(())
        } else {
            Err(CompilationError::new_jump_too_far(
                self.source,
                self.previous_offset(),
            ))
        }
    }

    fn write_pop(&mut self, mut count: usize) {
        while count > 0 {
            let batch = count.min(u8::MAX as usize);
            self.emit_op(OpCode::Pop);
            self.emit_u8(batch as u8);
            count -= batch;
        }
    }

    fn value_pushed(&mut self, count: isize) {
        self.fs().pushed_values += count;
    }

    fn value_popped(&mut self, count: isize) {
        self.fs().pushed_values -= count;
    }

    /// Emits pops or reports a missing expression to restore the declared
    /// stack balance at a statement boundary.
    fn align_stack(&mut self, target: isize) -> Result<(), CompilationError> {
        let pushed = self.fs().pushed_values;

        if pushed > target {
            self.write_pop((pushed - target) as usize);
        } else if pushed < target {
            return Err(CompilationError::new_missing_expression(
                self.source,
                self.previous_offset(),
            ));
        }

        self.fs().pushed_values = target;

        Ok(())
    }

    fn make_constant(&mut self, value: StackValue) -> Result<u16, CompilationError> {
        let map_key = MapKey::from(value);

        if let Some(&index) = self.fs().constants.get(&map_key) {
            return Ok(index);
        }

        let Some(index) = self.fs().chunk.add_constant(value) else {
            return Err(CompilationError::new_reached_constant_limit(
                self.source,
                self.previous_offset(),
            ));
        };

        self.fs().constants.insert(map_key, index);

        Ok(index)
    }

    fn identifier_constant(
        &mut self,
        token: EmberToken<'source>,
    ) -> Result<u16, CompilationError> {
        let key = self.heap.intern_bytes(self.gc, token.content.as_bytes());
        self.make_constant(StackValue::Bytes(key))
    }

    fn string_constant(&mut self, token: EmberToken<'source>) -> Result<u16, CompilationError> {
        let bytes = parse_string(self.source, token)?;
        let key = self.heap.intern_bytes(self.gc, &bytes);
        self.make_constant(StackValue::Bytes(key))
    }

    fn emit_constant(&mut self, value: StackValue) -> Result<(), CompilationError> {
        let constant = self.make_constant(value)?;
        self.emit_op(OpCode::LoadConst);
        self.emit_u16(constant);
        self.value_pushed(1);

        Ok(())
    }

    // ----------------------------------------------------- scopes & locals

    fn begin_scope(&mut self) {
        self.fs().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        let depth = self.fs().scope_depth - 1;
        self.fs().scope_depth = depth;
        self.emit_locals_cleanup(depth, true);
    }

    /// Emits the pops and upvalue closes for every local deeper than
    /// `to_depth`. Truncation is skipped for `break`/`continue`, which jump
    /// out without leaving their scope at compile time.
    fn emit_locals_cleanup(&mut self, to_depth: usize, truncate: bool) {
        let fs = self.functions.last_mut().unwrap();

        let mut kept = fs.locals.len();

        while kept > 0 {
            let local = &fs.locals[kept - 1];

            if local.depth.map_or(false, |depth| depth <= to_depth) {
                break;
            }

            kept -= 1;
        }

        let dropped: Vec<bool> = fs.locals[kept..]
            .iter()
            .rev()
            .map(|local| local.captured)
            .collect();

        if truncate {
            fs.locals.truncate(kept);
        }

        let mut pending_pops = 0;

        for captured in dropped {
            if captured {
                // the slot is captured; close it over instead of popping
                self.write_pop(pending_pops);
                pending_pops = 0;
                self.emit_op(OpCode::Close);
            } else {
                pending_pops += 1;
            }
        }

        self.write_pop(pending_pops);
    }

    fn add_local(&mut self, token: EmberToken<'source>) -> Result<(), CompilationError> {
        if self.fs().locals.len() > u8::MAX as usize {
            debug_assert_eq!(MAX_LOCALS, u8::MAX as usize + 1);

            return Err(CompilationError::new_too_many_locals(
                self.source,
                token.offset,
            ));
        }

        self.fs().locals.push(Local {
            name: token.content,
            depth: None,
            captured: false,
        });

        Ok(())
    }

    fn declare_local(
        &mut self,
        token: EmberToken<'source>,
        force_local: bool,
    ) -> Result<(), CompilationError> {
        if self.fs().scope_depth == 0 && !force_local {
            return Ok(());
        }

        let scope_depth = self.fs().scope_depth;

        for local in self.fs().locals.iter().rev() {
            match local.depth {
                Some(depth) if depth < scope_depth => break,
                _ => {}
            }

            if local.name == token.content {
                return Err(CompilationError::new_duplicate_local(
                    self.source,
                    token.offset,
                ));
            }
        }

        self.add_local(token)
    }

    fn parse_variable(&mut self, force_local: bool) -> Result<VarTarget, CompilationError> {
        let token = self.expect(EmberTokenLabel::Name)?;

        self.declare_local(token, force_local)?;

        if self.fs().scope_depth > 0 || force_local {
            return Ok(VarTarget::Local(self.fs().locals.len() - 1));
        }

        Ok(VarTarget::Global(self.identifier_constant(token)?))
    }

    fn mark_initialized(&mut self, index: usize) {
        let depth = self.fs().scope_depth;
        self.fs().locals[index].depth = Some(depth);
    }

    fn define_variable(&mut self, target: VarTarget) {
        match target {
            VarTarget::Local(index) => {
                self.mark_initialized(index);
                // the value stays on the stack as the local's slot
                self.value_popped(1);
            }
            VarTarget::Global(constant) => {
                self.emit_op(OpCode::SetGlobal);
                self.emit_u16(constant);
                self.value_popped(1);
            }
        }
    }

    // ------------------------------------------------------ name resolution

    fn resolve_local(function: &FunctionState, name: &str) -> Option<usize> {
        function
            .locals
            .iter()
            .enumerate()
            .rev()
            .find(|(_, local)| local.depth.is_some() && local.name == name)
            .map(|(index, _)| index)
    }

    fn add_up_value(
        &mut self,
        level: usize,
        index: u8,
        is_local: bool,
        token: EmberToken<'source>,
    ) -> Result<u8, CompilationError> {
        let function = &mut self.functions[level];
        let desc = UpValueDesc { index, is_local };

        if let Some(existing) = function.up_values.iter().position(|d| *d == desc) {
            return Ok(existing as u8);
        }

        if function.up_values.len() >= MAX_UP_VALUES {
            return Err(CompilationError::new_reached_capture_limit(
                self.source,
                token.offset,
            ));
        }

        function.up_values.push(desc);

        Ok((function.up_values.len() - 1) as u8)
    }

    /// Resolves a name against enclosing functions, chaining upvalues down
    /// through every level between the owning function and the current one.
    fn resolve_up_value(
        &mut self,
        token: EmberToken<'source>,
    ) -> Result<Option<u8>, CompilationError> {
        let top = self.functions.len() - 1;

        let mut found = None;

        for level in (0..top).rev() {
            if let Some(index) = Self::resolve_local(&self.functions[level], token.content) {
                self.functions[level].locals[index].captured = true;
                found = Some((level, index as u8));
                break;
            }
        }

        let Some((level, local_index)) = found else {
            return Ok(None);
        };

        let mut index = local_index;
        let mut is_local = true;

        for chain_level in level + 1..=top {
            index = self.add_up_value(chain_level, index, is_local, token)?;
            is_local = false;
        }

        Ok(Some(index))
    }

    // ----------------------------------------------------------- statements

    fn declaration(&mut self) {
        let function_depth = self.functions.len();

        if let Err(err) = self.statement() {
            self.report(err);
            // an error inside a nested function body unwinds without sealing
            // its state; recovery continues in the enclosing function
            self.functions.truncate(function_depth);
            self.synchronize();
        }
    }

    fn statement(&mut self) -> Result<(), CompilationError> {
        let saved_pushed = self.fs().pushed_values;

        let Some(token) = self.peek()? else {
            return Ok(());
        };

        match token.label {
            EmberTokenLabel::Var => {
                self.advance()?;
                self.var_declaration(false, 0)?;
            }
            EmberTokenLabel::Local => {
                self.advance()?;

                if self.match_label(EmberTokenLabel::Function)? {
                    self.local_function()?;
                } else {
                    self.var_declaration(true, 0)?;
                }
            }
            EmberTokenLabel::If => {
                self.advance()?;
                self.if_statement()?;
            }
            EmberTokenLabel::Do => {
                self.advance()?;
                self.begin_scope();
                self.block()?;
                self.end_scope();
            }
            EmberTokenLabel::While => {
                self.advance()?;
                self.while_statement()?;
            }
            EmberTokenLabel::For => {
                self.advance()?;
                self.for_statement()?;
            }
            EmberTokenLabel::Function => {
                self.advance()?;
                self.function_declaration()?;
            }
            EmberTokenLabel::Proto => {
                self.advance()?;
                self.proto_declaration()?;
            }
            EmberTokenLabel::Break => {
                self.advance()?;
                self.break_statement()?;
            }
            EmberTokenLabel::Continue => {
                self.advance()?;
                self.continue_statement()?;
            }
            EmberTokenLabel::Return => {
                self.advance()?;
                self.return_statement()?;
            }
            EmberTokenLabel::SemiColon => {
                self.advance()?;
            }
            _ => {
                // expression statement: any produced values get dropped
                self.expression(0, false)?;
            }
        }

        self.align_stack(saved_pushed)
    }

    /// Parses declarations until a block terminator, then consumes `end`.
    fn block(&mut self) -> Result<(), CompilationError> {
        loop {
            if self.fatal {
                return Ok(());
            }

            let Some(token) = self.peek()? else {
                break;
            };

            if token.label == EmberTokenLabel::End {
                break;
            }

            self.declaration();
        }

        self.expect(EmberTokenLabel::End)?;

        Ok(())
    }

    fn var_declaration(
        &mut self,
        force_local: bool,
        declared: usize,
    ) -> Result<(), CompilationError> {
        let target = self.parse_variable(force_local)?;
        let declared = declared + 1;

        if self.match_label(EmberTokenLabel::Assign)? {
            // distribute the value list over every declared name, padding
            // missing values with nil and dropping extras
            let mut remaining = declared as isize;

            loop {
                let needed = remaining.max(0) as usize;
                let pushed = self.expression(needed, false)?;
                remaining -= pushed;

                if !self.match_label(EmberTokenLabel::Comma)? {
                    break;
                }
            }

            while remaining > 0 {
                self.emit_op(OpCode::Nil);
                self.value_pushed(1);
                remaining -= 1;
            }
        } else if self.match_label(EmberTokenLabel::Comma)? {
            self.var_declaration(force_local, declared)?;
        } else {
            self.emit_op(OpCode::Nil);
            self.value_pushed(1);
        }

        self.define_variable(target);

        Ok(())
    }

    fn if_statement(&mut self) -> Result<(), CompilationError> {
        self.expression(1, true)?;
        self.expect(EmberTokenLabel::Then)?;

        let branch_jump = self.emit_jump(OpCode::PopJumpIfFalse);
        self.value_popped(1);

        self.begin_scope();

        loop {
            if self.fatal {
                return Ok(());
            }

            let Some(token) = self.peek()? else {
                return Err(SyntaxError::UnexpectedEof.into());
            };

            if matches!(
                token.label,
                EmberTokenLabel::End | EmberTokenLabel::Else | EmberTokenLabel::ElseIf
            ) {
                break;
            }

            self.declaration();
        }

        self.end_scope();

        if self.match_label(EmberTokenLabel::Else)? {
            let else_jump = self.emit_jump(OpCode::Jump);
            self.patch_jump(branch_jump)?;

            self.begin_scope();
            self.block()?;
            self.end_scope();

            self.patch_jump(else_jump)?;
        } else if self.match_label(EmberTokenLabel::ElseIf)? {
            let else_jump = self.emit_jump(OpCode::Jump);
            self.patch_jump(branch_jump)?;

            self.if_statement()?;

            self.patch_jump(else_jump)?;
        } else {
            self.patch_jump(branch_jump)?;
            self.expect(EmberTokenLabel::End)?;
        }

        Ok(())
    }

    fn start_loop(&mut self) {
        let scope_depth = self.fs().scope_depth;
        let start = self.fs().chunk.len();

        self.fs().loop_state = Some(LoopState {
            scope_depth,
            start,
            breaks: Vec::new(),
        });
    }

    /// Patches every pending `break` to land just past the loop.
    fn end_loop(&mut self) -> Result<(), CompilationError> {
        let breaks = match self.fs().loop_state.take() {
            Some(loop_state) => loop_state.breaks,
            None => Vec::new(),
        };

        for operand_index in breaks {
            self.patch_jump(operand_index)?;
        }

        Ok(())
    }

    fn while_statement(&mut self) -> Result<(), CompilationError> {
        let cached_loop = self.fs().loop_state.take();
        self.start_loop();

        let condition_start = self.fs().chunk.len();

        self.expression(1, true)?;
        self.expect(EmberTokenLabel::Do)?;

        let exit_jump = self.emit_jump(OpCode::PopJumpIfFalse);
        self.value_popped(1);

        self.begin_scope();
        self.block()?;
        self.end_scope();

        self.emit_jump_back(condition_start)?;

        self.end_loop()?;
        self.fs().loop_state = cached_loop;

        self.patch_jump(exit_jump)
    }

    fn for_statement(&mut self) -> Result<(), CompilationError> {
        if self.check(EmberTokenLabel::Name)? {
            return self.for_each_statement();
        }

        self.begin_scope();
        self.expect(EmberTokenLabel::OpenParen)?;

        // initializer
        if !self.match_label(EmberTokenLabel::SemiColon)? {
            self.statement()?;
            self.expect(EmberTokenLabel::SemiColon)?;
        }

        let cached_loop = self.fs().loop_state.take();
        self.start_loop();

        let mut loop_start = self.fs().chunk.len();

        // condition
        let mut exit_jump = None;

        if !self.match_label(EmberTokenLabel::SemiColon)? {
            self.expression(1, true)?;
            self.expect(EmberTokenLabel::SemiColon)?;

            exit_jump = Some(self.emit_jump(OpCode::PopJumpIfFalse));
            self.value_popped(1);
        }

        // step: runs after the body, so the body jumps here and the step
        // jumps back to the condition
        if !self.match_label(EmberTokenLabel::CloseParen)? {
            let body_jump = self.emit_jump(OpCode::Jump);

            let step_start = self.fs().chunk.len();

            if let Some(loop_state) = self.fs().loop_state.as_mut() {
                loop_state.start = step_start;
            }

            self.expression(0, true)?;
            self.expect(EmberTokenLabel::CloseParen)?;

            self.emit_jump_back(loop_start)?;
            loop_start = step_start;
            self.patch_jump(body_jump)?;
        }

        self.expect(EmberTokenLabel::Do)?;

        self.begin_scope();
        self.block()?;
        self.end_scope();

        self.emit_jump_back(loop_start)?;

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump)?;
        }

        self.end_loop()?;
        self.fs().loop_state = cached_loop;

        self.end_scope();

        Ok(())
    }

    fn for_each_statement(&mut self) -> Result<(), CompilationError> {
        self.begin_scope();

        // reserve an unnamed slot for the iterator state
        let reserved_depth = self.fs().scope_depth;
        self.fs().locals.push(Local {
            name: "",
            depth: Some(reserved_depth),
            captured: false,
        });

        self.begin_scope();

        // declare the value names the iterator populates
        let mut values = 0usize;

        loop {
            let target = self.parse_variable(true)?;
            self.define_variable(target);
            values += 1;

            if !self.match_label(EmberTokenLabel::Comma)? {
                break;
            }
        }

        if values > u8::MAX as usize {
            return Err(CompilationError::new_too_many_locals(
                self.source,
                self.previous_offset(),
            ));
        }

        self.expect(EmberTokenLabel::In)?;
        self.expression(1, true)?;
        self.expect(EmberTokenLabel::Do)?;

        self.emit_op(OpCode::Iter);

        let cached_loop = self.fs().loop_state.take();
        self.start_loop();

        if let Some(loop_state) = self.fs().loop_state.as_mut() {
            // break/continue must keep the iterator slot alive
            loop_state.scope_depth = reserved_depth;
        }

        let loop_start = self.fs().chunk.len();

        self.emit_op(OpCode::Next);
        self.emit_u8(values as u8);
        let next_patch = self.fs().chunk.len();
        self.emit_u16(u16::MAX);

        self.value_pushed(values as isize);

        self.block()?;

        // drop the value slots; Next repopulates them each iteration
        self.end_scope();

        self.emit_jump_back(loop_start)?;

        self.end_loop()?;
        self.fs().loop_state = cached_loop;

        self.patch_jump(next_patch)?;

        // drop the iterator slot
        self.end_scope();
        self.value_popped(1);

        Ok(())
    }

    fn break_statement(&mut self) -> Result<(), CompilationError> {
        let Some(to_depth) = self.fs().loop_state.as_ref().map(|l| l.scope_depth) else {
            return Err(CompilationError::new_unexpected_break(
                self.source,
                self.previous_offset(),
            ));
        };

        self.emit_locals_cleanup(to_depth, false);

        let jump = self.emit_jump(OpCode::Jump);

        if let Some(loop_state) = self.fs().loop_state.as_mut() {
            loop_state.breaks.push(jump);
        }

        Ok(())
    }

    fn continue_statement(&mut self) -> Result<(), CompilationError> {
        let Some((to_depth, start)) = self
            .fs()
            .loop_state
            .as_ref()
            .map(|l| (l.scope_depth, l.start))
        else {
            return Err(CompilationError::new_unexpected_continue(
                self.source,
                self.previous_offset(),
            ));
        };

        self.emit_locals_cleanup(to_depth, false);
        self.emit_jump_back(start)
    }

    fn return_statement(&mut self) -> Result<(), CompilationError> {
        if self.fs().fn_type == FunctionType::Script {
            return Err(CompilationError::new_unexpected_return(
                self.source,
                self.previous_offset(),
            ));
        }

        let follows_block = match self.peek()? {
            None => true,
            Some(token) => matches!(
                token.label,
                EmberTokenLabel::End
                    | EmberTokenLabel::Else
                    | EmberTokenLabel::ElseIf
                    | EmberTokenLabel::SemiColon
            ),
        };

        if follows_block {
            self.emit_op(OpCode::Nil);
            self.emit_op(OpCode::Return);
            self.emit_u8(1);
            return Ok(());
        }

        let mut count = 0usize;

        loop {
            self.expression(1, true)?;
            count += 1;

            if count > MAX_RETURNS {
                return Err(CompilationError::new_reached_argument_limit(
                    self.source,
                    self.previous_offset(),
                ));
            }

            if !self.match_label(EmberTokenLabel::Comma)? {
                break;
            }
        }

        self.emit_op(OpCode::Return);
        self.emit_u8(count as u8);
        self.value_popped(count as isize);

        Ok(())
    }

    // ------------------------------------------------------------ functions

    fn function_declaration(&mut self) -> Result<(), CompilationError> {
        let target = self.parse_variable(false)?;
        let name: Rc<str> = self.previous.map(|t| t.content).unwrap_or_default().into();

        // initialize early so the function may call itself
        if let VarTarget::Local(index) = target {
            self.mark_initialized(index);
        }

        self.function_body(FunctionType::Function, name)?;
        self.define_variable(target);

        Ok(())
    }

    fn local_function(&mut self) -> Result<(), CompilationError> {
        let target = self.parse_variable(true)?;
        let name: Rc<str> = self.previous.map(|t| t.content).unwrap_or_default().into();

        if let VarTarget::Local(index) = target {
            self.mark_initialized(index);
        }

        self.function_body(FunctionType::Function, name)?;
        self.define_variable(target);

        Ok(())
    }

    fn proto_declaration(&mut self) -> Result<(), CompilationError> {
        let target = self.parse_variable(false)?;

        let mut entries = 0u16;

        loop {
            if self.match_label(EmberTokenLabel::End)? {
                break;
            }

            if self.peek()?.is_none() {
                return Err(SyntaxError::UnexpectedEof.into());
            }

            self.expect(EmberTokenLabel::Function)?;

            let name_token = self.expect(EmberTokenLabel::Name)?;
            let field_constant = self.identifier_constant(name_token)?;
            let name: Rc<str> = name_token.content.into();

            // NewObject expects the key under the value
            self.emit_op(OpCode::LoadConst);
            self.emit_u16(field_constant);

            self.function_body(FunctionType::Method, name)?;
            self.value_popped(1);

            entries = entries.checked_add(1).ok_or_else(|| {
                CompilationError::new_reached_constant_limit(self.source, name_token.offset)
            })?;
        }

        self.emit_op(OpCode::NewObject);
        self.emit_u16(entries);
        self.value_pushed(1);

        self.define_variable(target);

        Ok(())
    }

    /// Compiles a function body (parameters through `end`) and emits the
    /// closure into the enclosing function.
    fn function_body(
        &mut self,
        fn_type: FunctionType,
        name: Rc<str>,
    ) -> Result<(), CompilationError> {
        self.functions.push(FunctionState::new(name, fn_type));

        self.begin_scope();
        self.expect(EmberTokenLabel::OpenParen)?;

        let mut arity = 0usize;
        let mut variadic = false;

        if !self.check(EmberTokenLabel::CloseParen)? {
            loop {
                if self.check(EmberTokenLabel::TripleDot)? {
                    break;
                }

                arity += 1;

                if arity > MAX_PARAMS {
                    return Err(CompilationError::new_reached_parameter_limit(
                        self.source,
                        self.previous_offset(),
                    ));
                }

                let target = self.parse_variable(true)?;
                self.define_variable(target);
                // populated by the caller at runtime
                self.value_pushed(1);

                if !self.match_label(EmberTokenLabel::Comma)? {
                    break;
                }
            }
        }

        if self.match_label(EmberTokenLabel::TripleDot)? {
            // the variadic table binds to one more declared name
            let target = self.parse_variable(true)?;
            self.define_variable(target);
            self.value_pushed(1);
            variadic = true;
        }

        self.expect(EmberTokenLabel::CloseParen)?;

        {
            let fs = self.fs();
            fs.arity = arity as u8;
            fs.variadic = variadic;
        }

        self.block()?;
        self.align_stack(0)?;
        self.end_scope();

        let (fn_key, up_values) = self.end_function();

        let constant = self.make_constant(StackValue::Function(fn_key))?;
        self.emit_op(OpCode::Closure);
        self.emit_u16(constant);
        self.value_pushed(1);

        // tell the vm which slots and upvalues populate the closure
        for desc in up_values {
            let directive = if desc.is_local {
                OpCode::GetLocal
            } else {
                OpCode::GetUpValue
            };

            self.emit_u8(directive as u8);
            self.emit_u8(desc.index);
        }

        Ok(())
    }

    /// Seals the current function with an implicit `return nil` and stores
    /// its prototype in the heap.
    fn end_function(&mut self) -> (FnKey, Vec<UpValueDesc>) {
        self.emit_op(OpCode::Nil);
        self.emit_op(OpCode::Return);
        self.emit_u8(1);

        let function = self.functions.pop().unwrap();

        let proto = FnProto {
            module: self.module.clone(),
            name: function.name,
            arity: function.arity,
            variadic: function.variadic,
            up_value_count: function.up_values.len() as u8,
            chunk: function.chunk,
        };

        let fn_key = self.heap.store_fn_proto(self.gc, proto);

        (fn_key, function.up_values)
    }

    // ----------------------------------------------------------- expressions

    /// Parses one expression, requesting `needed` values from call sites and
    /// trimming any excess. Returns how many values were actually produced.
    fn expression(
        &mut self,
        needed: usize,
        force_needed: bool,
    ) -> Result<isize, CompilationError> {
        let last_expected = self.fs().expected_values;
        let saved = self.fs().pushed_values + needed as isize;
        self.fs().expected_values = needed;

        self.parse_precedence(Precedence::Assignment)?;

        let pushed = self.fs().pushed_values;

        if pushed > saved {
            self.write_pop((pushed - saved) as usize);
            self.fs().pushed_values = saved;
        } else if force_needed && pushed < saved {
            return Err(CompilationError::new_missing_expression(
                self.source,
                self.previous_offset(),
            ));
        }

        self.fs().expected_values = last_expected;

        Ok(self.fs().pushed_values - (saved - needed as isize))
    }

    fn parse_precedence(&mut self, prec: Precedence) -> Result<(), CompilationError> {
        let Some(token) = self.advance()? else {
            return Err(SyntaxError::UnexpectedEof.into());
        };

        let can_assign = prec <= Precedence::Assignment;

        self.prefix(token, can_assign)?;

        loop {
            let Some(next) = self.peek()? else {
                break;
            };

            let next_prec = infix_precedence(next.label);

            if next_prec == Precedence::None || next_prec < prec {
                break;
            }

            let token = self.expect_any()?;
            self.infix(token, can_assign)?;
        }

        if can_assign && self.match_label(EmberTokenLabel::Assign)? {
            return Err(CompilationError::new_invalid_assignment(
                self.source,
                self.previous_offset(),
            ));
        }

        Ok(())
    }

    fn prefix(
        &mut self,
        token: EmberToken<'source>,
        can_assign: bool,
    ) -> Result<(), CompilationError> {
        match token.label {
            EmberTokenLabel::Numeral => {
                let Some(number) = parse_number(token.content) else {
                    return Err(CompilationError::new_invalid_number(
                        self.source,
                        token.offset,
                    ));
                };

                self.emit_constant(StackValue::Number(number))
            }
            EmberTokenLabel::StringLiteral => {
                let constant = self.string_constant(token)?;
                self.emit_op(OpCode::LoadConst);
                self.emit_u16(constant);
                self.value_pushed(1);
                Ok(())
            }
            EmberTokenLabel::Nil => {
                self.emit_op(OpCode::Nil);
                self.value_pushed(1);
                Ok(())
            }
            EmberTokenLabel::True => {
                self.emit_op(OpCode::True);
                self.value_pushed(1);
                Ok(())
            }
            EmberTokenLabel::False => {
                self.emit_op(OpCode::False);
                self.value_pushed(1);
                Ok(())
            }
            EmberTokenLabel::Name => self.named_variable(token, can_assign, true),
            EmberTokenLabel::OpenParen => {
                self.expression(1, true)?;
                self.expect(EmberTokenLabel::CloseParen)?;
                Ok(())
            }
            EmberTokenLabel::OpenCurly => self.dict_literal(),
            EmberTokenLabel::Minus => {
                self.parse_precedence(Precedence::Unary)?;
                self.emit_op(OpCode::Negate);
                Ok(())
            }
            EmberTokenLabel::Bang | EmberTokenLabel::Not => {
                self.parse_precedence(Precedence::Unary)?;
                self.emit_op(OpCode::Not);
                Ok(())
            }
            EmberTokenLabel::Pound => {
                self.parse_precedence(Precedence::Unary)?;
                self.emit_op(OpCode::Count);
                Ok(())
            }
            EmberTokenLabel::Function => {
                self.function_body(FunctionType::Function, "anonymous".into())
            }
            EmberTokenLabel::PlusPlus => self.prefix_increment(1),
            EmberTokenLabel::MinusMinus => self.prefix_increment(-1),
            _ => Err(SyntaxError::new_unexpected_token(self.source, token).into()),
        }
    }

    fn infix(
        &mut self,
        token: EmberToken<'source>,
        can_assign: bool,
    ) -> Result<(), CompilationError> {
        match token.label {
            EmberTokenLabel::OpenParen => self.call_expression(),
            EmberTokenLabel::OpenBracket => self.index_expression(can_assign),
            EmberTokenLabel::Dot => self.dot_expression(can_assign),
            EmberTokenLabel::Colon => self.colon_invoke(),
            EmberTokenLabel::DoubleDot => self.concat_expression(),
            EmberTokenLabel::And => self.and_expression(),
            EmberTokenLabel::Or => self.or_expression(),
            _ => self.binary_expression(token),
        }
    }

    fn binary_expression(
        &mut self,
        token: EmberToken<'source>,
    ) -> Result<(), CompilationError> {
        let prec = infix_precedence(token.label);
        self.parse_precedence(prec.next())?;

        match token.label {
            EmberTokenLabel::Plus => self.emit_op(OpCode::Add),
            EmberTokenLabel::Minus => self.emit_op(OpCode::Sub),
            EmberTokenLabel::Star => self.emit_op(OpCode::Mult),
            EmberTokenLabel::Slash => self.emit_op(OpCode::Div),
            EmberTokenLabel::Percent => self.emit_op(OpCode::Mod),
            EmberTokenLabel::CmpEqual => self.emit_op(OpCode::Equal),
            EmberTokenLabel::CmpGreater => self.emit_op(OpCode::Greater),
            EmberTokenLabel::CmpLess => self.emit_op(OpCode::Less),
            EmberTokenLabel::CmpGreaterEqual => self.emit_op(OpCode::GreaterEqual),
            EmberTokenLabel::CmpLessEqual => self.emit_op(OpCode::LessEqual),
            EmberTokenLabel::CmpNotEqual => {
                self.emit_op(OpCode::Equal);
                self.emit_op(OpCode::Not);
            }
            _ => {
                return Err(SyntaxError::new_unexpected_token(self.source, token).into());
            }
        }

        // two operands become one result
        self.value_popped(1);

        Ok(())
    }

    fn concat_expression(&mut self) -> Result<(), CompilationError> {
        let mut operands = 1isize;

        loop {
            self.parse_precedence(Precedence::Concat.next())?;
            operands += 1;

            if operands > u8::MAX as isize {
                return Err(CompilationError::new_reached_argument_limit(
                    self.source,
                    self.previous_offset(),
                ));
            }

            if !self.match_label(EmberTokenLabel::DoubleDot)? {
                break;
            }
        }

        self.emit_op(OpCode::Concat);
        self.emit_u8(operands as u8);
        self.value_popped(operands - 1);

        Ok(())
    }

    fn and_expression(&mut self) -> Result<(), CompilationError> {
        // short circuit: keep a falsy left operand without evaluating the right
        let jump = self.emit_jump(OpCode::JumpIfFalse);
        self.write_pop(1);

        self.parse_precedence(Precedence::And)?;

        self.patch_jump(jump)?;
        self.value_popped(1);

        Ok(())
    }

    fn or_expression(&mut self) -> Result<(), CompilationError> {
        // short circuit: accept the first truthy value
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);

        self.patch_jump(else_jump)?;
        self.write_pop(1);

        self.parse_precedence(Precedence::Or)?;

        self.patch_jump(end_jump)?;
        self.value_popped(1);

        Ok(())
    }

    fn parse_arguments(&mut self) -> Result<u8, CompilationError> {
        let mut count = 0usize;

        if !self.check(EmberTokenLabel::CloseParen)? {
            loop {
                self.expression(1, true)?;
                count += 1;

                if count > MAX_ARGS {
                    return Err(CompilationError::new_reached_argument_limit(
                        self.source,
                        self.previous_offset(),
                    ));
                }

                if !self.match_label(EmberTokenLabel::Comma)? {
                    break;
                }
            }
        }

        self.expect(EmberTokenLabel::CloseParen)?;

        Ok(count as u8)
    }

    fn expected_results(&mut self) -> u8 {
        self.fs().expected_values.min(u8::MAX as usize) as u8
    }

    fn call_expression(&mut self) -> Result<(), CompilationError> {
        let arg_count = self.parse_arguments()?;
        let expected = self.expected_results();

        self.emit_op(OpCode::Call);
        self.emit_u8(arg_count);
        self.emit_u8(expected);

        self.value_popped(arg_count as isize + 1);
        self.value_pushed(expected as isize);

        Ok(())
    }

    fn index_expression(&mut self, can_assign: bool) -> Result<(), CompilationError> {
        self.expression(1, true)?;
        self.expect(EmberTokenLabel::CloseBracket)?;

        if can_assign && self.match_label(EmberTokenLabel::Assign)? {
            self.expression(1, true)?;
            self.emit_op(OpCode::NewIndex);
            self.value_popped(2);
        } else if self.match_label(EmberTokenLabel::PlusPlus)? {
            self.emit_op(OpCode::IncIndex);
            self.emit_u8((INC_BIAS + 1) as u8);
        } else if self.match_label(EmberTokenLabel::MinusMinus)? {
            self.emit_op(OpCode::IncIndex);
            self.emit_u8((INC_BIAS - 1) as u8);
        } else {
            self.emit_op(OpCode::Index);
        }

        self.value_popped(1);

        Ok(())
    }

    fn dot_expression(&mut self, can_assign: bool) -> Result<(), CompilationError> {
        let name_token = self.expect(EmberTokenLabel::Name)?;
        let constant = self.identifier_constant(name_token)?;

        if can_assign && self.match_label(EmberTokenLabel::Assign)? {
            self.emit_op(OpCode::LoadConst);
            self.emit_u16(constant);

            self.expression(1, true)?;

            self.emit_op(OpCode::SetObject);
            self.value_popped(2);
        } else if self.match_label(EmberTokenLabel::PlusPlus)? {
            self.emit_op(OpCode::IncObject);
            self.emit_u8((INC_BIAS + 1) as u8);
            self.emit_u16(constant);
        } else if self.match_label(EmberTokenLabel::MinusMinus)? {
            self.emit_op(OpCode::IncObject);
            self.emit_u8((INC_BIAS - 1) as u8);
            self.emit_u16(constant);
        } else if self.match_label(EmberTokenLabel::OpenParen)? {
            self.emit_invoke(constant)?;
        } else {
            self.emit_op(OpCode::GetObject);
            self.emit_u16(constant);
        }

        Ok(())
    }

    fn colon_invoke(&mut self) -> Result<(), CompilationError> {
        let name_token = self.expect(EmberTokenLabel::Name)?;
        let constant = self.identifier_constant(name_token)?;

        self.expect(EmberTokenLabel::OpenParen)?;
        self.emit_invoke(constant)
    }

    fn emit_invoke(&mut self, name_constant: u16) -> Result<(), CompilationError> {
        // the method name sits between the receiver and the arguments
        self.emit_op(OpCode::LoadConst);
        self.emit_u16(name_constant);

        let arg_count = self.parse_arguments()?;
        let expected = self.expected_results();

        self.emit_op(OpCode::Invoke);
        self.emit_u8(arg_count);
        self.emit_u8(expected);

        self.value_popped(arg_count as isize + 1);
        self.value_pushed(expected as isize);

        Ok(())
    }

    fn dict_literal(&mut self) -> Result<(), CompilationError> {
        let mut entries = 0u16;

        if !self.match_label(EmberTokenLabel::CloseCurly)? {
            loop {
                let token = self.expect_any()?;

                let constant = match token.label {
                    EmberTokenLabel::Name => self.identifier_constant(token)?,
                    EmberTokenLabel::StringLiteral => self.string_constant(token)?,
                    EmberTokenLabel::Numeral => {
                        let Some(number) = parse_number(token.content) else {
                            return Err(CompilationError::new_invalid_number(
                                self.source,
                                token.offset,
                            ));
                        };

                        self.make_constant(StackValue::Number(number))?
                    }
                    _ => {
                        return Err(
                            SyntaxError::new_unexpected_token(self.source, token).into()
                        );
                    }
                };

                self.emit_op(OpCode::LoadConst);
                self.emit_u16(constant);
                self.value_pushed(1);

                self.expect(EmberTokenLabel::Colon)?;

                self.expression(1, true)?;
                self.value_popped(2);

                entries = entries.checked_add(1).ok_or_else(|| {
                    CompilationError::new_reached_constant_limit(self.source, token.offset)
                })?;

                if !self.match_label(EmberTokenLabel::Comma)? {
                    break;
                }
            }

            self.expect(EmberTokenLabel::CloseCurly)?;
        }

        self.emit_op(OpCode::NewDict);
        self.emit_u16(entries);
        self.value_pushed(1);

        Ok(())
    }

    fn named_variable(
        &mut self,
        token: EmberToken<'source>,
        can_assign: bool,
        can_increment: bool,
    ) -> Result<(), CompilationError> {
        enum Resolved {
            Local(u8),
            UpValue(u8),
            Global(u16),
        }

        let resolved = if let Some(index) =
            Self::resolve_local(self.functions.last().unwrap(), token.content)
        {
            Resolved::Local(index as u8)
        } else if let Some(index) = self.resolve_up_value(token)? {
            Resolved::UpValue(index)
        } else {
            Resolved::Global(self.identifier_constant(token)?)
        };

        if can_assign && self.match_label(EmberTokenLabel::Assign)? {
            self.expression(1, true)?;

            match resolved {
                Resolved::Local(slot) => {
                    self.emit_op(OpCode::SetLocal);
                    self.emit_u8(slot);
                }
                Resolved::UpValue(index) => {
                    self.emit_op(OpCode::SetUpValue);
                    self.emit_u8(index);
                }
                Resolved::Global(constant) => {
                    self.emit_op(OpCode::SetGlobal);
                    self.emit_u16(constant);
                }
            }

            self.value_popped(1);
        } else if can_increment
            && (self.check(EmberTokenLabel::PlusPlus)? || self.check(EmberTokenLabel::MinusMinus)?)
        {
            // postfix: the instruction leaves the pre-increment value behind
            let delta = if self.match_label(EmberTokenLabel::PlusPlus)? {
                1
            } else {
                self.expect(EmberTokenLabel::MinusMinus)?;
                -1
            };

            match resolved {
                Resolved::Local(slot) => {
                    self.emit_op(OpCode::IncLocal);
                    self.emit_u8((INC_BIAS + delta) as u8);
                    self.emit_u8(slot);
                }
                Resolved::UpValue(index) => {
                    self.emit_op(OpCode::IncUpValue);
                    self.emit_u8((INC_BIAS + delta) as u8);
                    self.emit_u8(index);
                }
                Resolved::Global(constant) => {
                    self.emit_op(OpCode::IncGlobal);
                    self.emit_u8((INC_BIAS + delta) as u8);
                    self.emit_u16(constant);
                }
            }

            self.value_pushed(1);
        } else {
            match resolved {
                Resolved::Local(slot) => {
                    self.emit_op(OpCode::GetLocal);
                    self.emit_u8(slot);
                }
                Resolved::UpValue(index) => {
                    self.emit_op(OpCode::GetUpValue);
                    self.emit_u8(index);
                }
                Resolved::Global(constant) => {
                    self.emit_op(OpCode::GetGlobal);
                    self.emit_u16(constant);
                }
            }

            self.value_pushed(1);
        }

        Ok(())
    }

    fn prefix_increment(&mut self, delta: i32) -> Result<(), CompilationError> {
        let name_token = self.expect(EmberTokenLabel::Name)?;

        if self.check(EmberTokenLabel::Dot)? || self.check(EmberTokenLabel::OpenBracket)? {
            // walk the selector path; the final selector takes the increment
            self.named_variable(name_token, false, false)?;

            loop {
                if self.match_label(EmberTokenLabel::Dot)? {
                    let field_token = self.expect(EmberTokenLabel::Name)?;
                    let constant = self.identifier_constant(field_token)?;

                    let last = !self.check(EmberTokenLabel::Dot)?
                        && !self.check(EmberTokenLabel::OpenBracket)?;

                    if last {
                        self.emit_op(OpCode::IncObject);
                        self.emit_u8((INC_BIAS + delta) as u8);
                        self.emit_u16(constant);
                        break;
                    }

                    self.emit_op(OpCode::GetObject);
                    self.emit_u16(constant);
                } else if self.match_label(EmberTokenLabel::OpenBracket)? {
                    self.expression(1, true)?;
                    self.expect(EmberTokenLabel::CloseBracket)?;

                    let last = !self.check(EmberTokenLabel::Dot)?
                        && !self.check(EmberTokenLabel::OpenBracket)?;

                    if last {
                        self.emit_op(OpCode::IncIndex);
                        self.emit_u8((INC_BIAS + delta) as u8);
                        self.value_popped(1);
                        break;
                    }

                    self.emit_op(OpCode::Index);
                    self.value_popped(1);
                } else {
                    return Err(CompilationError::new_invalid_assignment(
                        self.source,
                        self.previous_offset(),
                    ));
                }
            }
        } else {
            enum Resolved {
                Local(u8),
                UpValue(u8),
                Global(u16),
            }

            let resolved = if let Some(index) =
                Self::resolve_local(self.functions.last().unwrap(), name_token.content)
            {
                Resolved::Local(index as u8)
            } else if let Some(index) = self.resolve_up_value(name_token)? {
                Resolved::UpValue(index)
            } else {
                Resolved::Global(self.identifier_constant(name_token)?)
            };

            match resolved {
                Resolved::Local(slot) => {
                    self.emit_op(OpCode::IncLocal);
                    self.emit_u8((INC_BIAS + delta) as u8);
                    self.emit_u8(slot);
                }
                Resolved::UpValue(index) => {
                    self.emit_op(OpCode::IncUpValue);
                    self.emit_u8((INC_BIAS + delta) as u8);
                    self.emit_u8(index);
                }
                Resolved::Global(constant) => {
                    self.emit_op(OpCode::IncGlobal);
                    self.emit_u8((INC_BIAS + delta) as u8);
                    self.emit_u16(constant);
                }
            }

            self.value_pushed(1);
        }

        // the pre-increment value is on the stack; produce the new value
        self.emit_constant(StackValue::Number(delta as f64))?;
        self.emit_op(OpCode::Add);
        self.value_popped(1);

        Ok(())
    }
}
