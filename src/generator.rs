use crate::ast::{
    DataType, Expr, ExprCall, ExprInfix, InfixOp, NodeRef, PostfixOp, PrefixOp, ProcDef, ProcSig,
    Stmt, StmtDo, StmtFor, StmtIf, StmtWhile, TopLevel, TranslationUnit, VarDecl,
};
use crate::bit::Bit;
use crate::buf::Buf;
use crate::error::InternalError;
use crate::frame::{align_to_stride, Frame, VARIADIC_SLOT};
use crate::reg_alloc::{Reg, RegPool, ARG_COUNT};
use guard::guard;
use log::debug;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt::Display;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodegenError {
    #[error("too many arguments in call to `{name}`: {count} given, at most {max} supported")]
    TooManyArgs {
        name: String,
        count: usize,
        max: usize,
    },
    #[error("`{name}` takes {expected} arguments but {found} were given")]
    ExtraArgsToNonVariadic {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("cannot assign to `{0}`")]
    NotAssignable(String),
    #[error("use of undeclared variable `{0}`")]
    UndeclaredVariable(String),
    #[error("call to undeclared procedure `{0}`")]
    UndeclaredProcedure(String),
    #[error("redefinition of `{0}`")]
    Redefinition(String),
    #[error("global variable `{0}` is not supported")]
    UnsupportedGlobal(String),
    #[error("`{name}` has {count} parameters, at most {max} are supported")]
    TooManyParams {
        name: String,
        count: usize,
        max: usize,
    },
    #[error("internal compiler error: {0}")]
    Internal(#[from] InternalError),
}

/// Registers kept free while an operator chain holds pending operands.
const CHAIN_RESERVE: usize = 2;

/// Intra-procedure scratch used to address a far frame record.
const RECORD_BASE: &str = "x16";

/// Literal `mov` reaches anything MOVZ or MOVN can encode in one instruction.
const MOV_IMM_MIN: i64 = -0x1_0000;
const MOV_IMM_MAX: i64 = 0xffff;

/// String literals in first-use order, one label each.
#[derive(Debug, Default)]
struct StringPool {
    entries: Vec<String>,
}

impl StringPool {
    fn intern(&mut self, text: &str) -> String {
        let idx = match self.entries.iter().position(|s| s == text) {
            Some(idx) => idx,
            None => {
                self.entries.push(text.to_string());
                self.entries.len() - 1
            }
        };
        Self::label(idx)
    }

    fn label(idx: usize) -> String {
        format!(".L.str.{}", idx)
    }
}

#[derive(Debug, Clone, Copy)]
struct Local {
    offset: usize,
    ty: DataType,
}

#[derive(Debug)]
struct Generator {
    output: Buf,
    protos: HashMap<String, ProcSig>,
    strings: StringPool,
    proc_count: usize,
}

impl Generator {
    fn new() -> Generator {
        Generator {
            output: Buf::new(),
            protos: HashMap::new(),
            strings: StringPool::default(),
            proc_count: 0,
        }
    }

    fn unit(&mut self, unit: &TranslationUnit) -> Result<(), CodegenError> {
        for item in &unit.items {
            match item {
                TopLevel::ProcDecl(sig) => {
                    self.protos.insert(sig.name.clone(), sig.clone());
                }
                TopLevel::ProcDef(def) => self.proc_def(def)?,
                TopLevel::VarDecl(decl) => {
                    return Err(CodegenError::UnsupportedGlobal(decl.name.clone()))
                }
            }
        }
        debug!("{} string literals pooled", self.strings.entries.len());
        for (idx, text) in self.strings.entries.iter().enumerate() {
            self.output
                .append(format!("{}:\t.asciz {}\n", StringPool::label(idx), text));
        }
        Ok(())
    }

    fn proc_def(&mut self, def: &ProcDef) -> Result<(), CodegenError> {
        // registered before the body so recursive calls resolve
        self.protos.insert(def.sig.name.clone(), def.sig.clone());
        let proc_id = self.proc_count;
        self.proc_count += 1;
        let code = ProcGenerator::new(def, proc_id, &self.protos, &mut self.strings)?.generate()?;
        self.output.append(code.as_str());
        Ok(())
    }
}

/// State for one procedure definition, dropped once its code is emitted.
#[derive(Debug)]
struct ProcGenerator<'a> {
    def: &'a ProcDef,
    proc_id: usize,
    protos: &'a HashMap<String, ProcSig>,
    strings: &'a mut StringPool,
    output: Buf,
    frame: Frame,
    regs: RegPool,
    scopes: Vec<HashMap<String, Local>>,
    label_count: usize,
    ret_label: String,
    /// Bytes pushed below the frame by calls in progress.
    sp_shift: usize,
}

impl<'a> ProcGenerator<'a> {
    fn new(
        def: &'a ProcDef,
        proc_id: usize,
        protos: &'a HashMap<String, ProcSig>,
        strings: &'a mut StringPool,
    ) -> Result<ProcGenerator<'a>, CodegenError> {
        let count = def.sig.value_params().count();
        if count > ARG_COUNT {
            return Err(CodegenError::TooManyParams {
                name: def.sig.name.clone(),
                count,
                max: ARG_COUNT,
            });
        }
        let frame = Frame::new(def, protos)?;
        let mut gen = ProcGenerator {
            def,
            proc_id,
            protos,
            strings,
            output: Buf::new(),
            frame,
            regs: RegPool::new(),
            scopes: vec![HashMap::new()],
            label_count: 0,
            ret_label: String::new(),
            sp_shift: 0,
        };
        gen.ret_label = gen.new_label();
        Ok(gen)
    }

    fn generate(mut self) -> Result<Buf, CodegenError> {
        let def = self.def;
        let name = &def.sig.name;
        let size = self.frame.size;
        let record = self.frame.record_offset();

        self.output.append(format!("\t.global\t_{}\n\t.align\t4\n_{}:\n", name, name));
        self.emit("sub", format!("sp, sp, #{}", size));
        if self.frame.record_in_reach() {
            self.emit("stp", format!("x29, x30, [sp, #{}]", record));
            self.emit("add", format!("x29, sp, #{}", record));
        } else {
            self.emit("add", format!("{}, sp, #{}", RECORD_BASE, record));
            self.emit("stp", format!("x29, x30, [{}]", RECORD_BASE));
            self.emit("mov", format!("x29, {}", RECORD_BASE));
        }

        for (index, param) in def.sig.value_params().enumerate() {
            guard!(let Some(param_name) = &param.name else {
                return Err(InternalError::UnnamedParameter {
                    proc_name: name.clone(),
                    index,
                }
                .into());
            });
            let local = self.declare(param_name, param.ty)?;
            self.store(Reg::arg(index, param.ty.is_wide()), local)?;
        }

        for stmt in &def.body {
            self.stmt(stmt)?;
        }

        let ret_label = self.ret_label.clone();
        self.label(&ret_label);
        if self.frame.record_in_reach() {
            self.emit("ldp", format!("x29, x30, [sp, #{}]", record));
        } else {
            self.emit("add", format!("{}, sp, #{}", RECORD_BASE, record));
            self.emit("ldp", format!("x29, x30, [{}]", RECORD_BASE));
        }
        self.emit("add", format!("sp, sp, #{}", size));
        self.output.append("\tret\n");

        self.regs.check_balanced(name)?;
        Ok(self.output)
    }

    fn emit(&mut self, mnemonic: &str, operands: impl Display) {
        self.output.append(format!("\t{}\t{}\n", mnemonic, operands));
    }

    fn label(&mut self, label: &str) {
        self.output.append(format!("{}:\n", label));
    }

    fn new_label(&mut self) -> String {
        let label = format!(".LBB{}_{}", self.proc_id, self.label_count);
        self.label_count += 1;
        label
    }

    fn user_label(&self, name: &str) -> String {
        format!(".Lu{}_{}", self.proc_id, name)
    }

    fn get(&mut self, wide: bool) -> Result<Reg, CodegenError> {
        Ok(self.regs.get(wide)?)
    }

    fn free(&mut self, reg: Reg) -> Result<(), CodegenError> {
        Ok(self.regs.free(reg)?)
    }

    fn declare(&mut self, name: &str, ty: DataType) -> Result<Local, CodegenError> {
        let offset = self.frame.alloc(ty.size())?;
        let local = Local { offset, ty };
        let scope = self
            .scopes
            .last_mut()
            .ok_or_else(|| InternalError::Unimplemented("declaration outside any scope".into()))?;
        match scope.entry(name.to_string()) {
            Entry::Vacant(entry) => {
                entry.insert(local);
                Ok(local)
            }
            Entry::Occupied(_) => Err(CodegenError::Redefinition(name.to_string())),
        }
    }

    fn lookup(&self, name: &str) -> Result<Local, CodegenError> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
            .ok_or_else(|| CodegenError::UndeclaredVariable(name.to_string()))
    }

    fn assignable(&self, expr: &Expr) -> Result<Local, CodegenError> {
        match expr {
            Expr::Var(name) => self.lookup(name),
            _ => Err(CodegenError::NotAssignable(NodeRef::from(expr).label())),
        }
    }

    fn bit_of(ty: DataType) -> Result<Bit, CodegenError> {
        ty.bit()
            .ok_or_else(|| InternalError::Unimplemented(format!("value of type `{}`", ty)).into())
    }

    fn load(&mut self, dst: Reg, local: Local) -> Result<(), CodegenError> {
        let bit = Self::bit_of(local.ty)?;
        let signed = local.ty.is_signed();
        let wide = match bit {
            Bit::Bit64 => true,
            _ => signed && dst.wide,
        };
        self.emit(
            bit.load(signed, wide),
            format!("{}, [sp, #{}]", dst.with_width(wide), local.offset + self.sp_shift),
        );
        Ok(())
    }

    fn store(&mut self, src: Reg, local: Local) -> Result<(), CodegenError> {
        let bit = Self::bit_of(local.ty)?;
        self.emit(
            bit.store(),
            format!(
                "{}, [sp, #{}]",
                src.with_width(bit.is_wide()),
                local.offset + self.sp_shift
            ),
        );
        Ok(())
    }

    fn mov_imm(&mut self, dst: Reg, value: i64) {
        let value = if dst.wide { value } else { value as i32 as i64 };
        if (MOV_IMM_MIN..=MOV_IMM_MAX).contains(&value) {
            self.emit("mov", format!("{}, #{}", dst, value));
            return;
        }
        let bits = if dst.wide { value as u64 } else { value as u32 as u64 };
        let chunks = if dst.wide { 4 } else { 2 };
        self.emit("movz", format!("{}, #{}", dst, bits & 0xffff));
        for i in 1..chunks {
            let chunk = (bits >> (16 * i)) & 0xffff;
            if chunk != 0 {
                self.emit("movk", format!("{}, #{}, lsl #{}", dst, chunk, 16 * i));
            }
        }
    }

    /// Whether the value of `expr` needs a 64-bit register.
    fn is_wide(&self, expr: &Expr) -> bool {
        use InfixOp::*;
        match expr {
            Expr::IntLit(i) => i32::try_from(*i).is_err(),
            Expr::StrLit(_) => true,
            Expr::FloatLit(_) | Expr::CharLit(_) => false,
            Expr::Var(name) => self.lookup(name).map_or(false, |local| local.ty.is_wide()),
            Expr::Call(x) => self
                .protos
                .get(&x.name)
                .map_or(false, |sig| sig.return_type.is_wide()),
            Expr::Infix(x) => match x.op {
                Eq | Ne | Lt | Le | Gt | Ge | LogicalAnd | LogicalOr => false,
                Comma => self.is_wide(&x.rhs),
                Assign => self.is_wide(&x.lhs),
                op if op.compound_base().is_some() => self.is_wide(&x.lhs),
                _ => self.is_wide(&x.lhs) || self.is_wide(&x.rhs),
            },
            Expr::Prefix(x) => x.op != PrefixOp::LogicalNot && self.is_wide(&x.expr),
            Expr::Postfix(x) => self.is_wide(&x.expr),
            Expr::Ternary(x) => self.is_wide(&x.then) || self.is_wide(&x.else_),
        }
    }

    /// `dst` widened to 64 bits when `expr` needs it.
    fn fit(&self, dst: Reg, expr: &Expr) -> Reg {
        dst.with_width(dst.wide || self.is_wide(expr))
    }

    /// `dst` widened to 64 bits when `local` needs it.
    fn fit_local(dst: Reg, local: Local) -> Reg {
        dst.with_width(dst.wide || local.ty.is_wide())
    }

    fn condition(&mut self, cond: &Expr, target: &str) -> Result<(), CodegenError> {
        let reg = self.get(self.is_wide(cond))?;
        self.expr(cond, reg)?;
        self.emit("cbnz", format!("{}, {}", reg, target));
        self.free(reg)
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<(), CodegenError> {
        match stmt {
            Stmt::Empty => Ok(()),
            Stmt::Compound(stmts) => {
                self.scopes.push(HashMap::new());
                for stmt in stmts {
                    self.stmt(stmt)?;
                }
                self.scopes.pop();
                Ok(())
            }
            Stmt::If(x) => self.stmt_if(x),
            Stmt::While(x) => self.stmt_while(x),
            Stmt::Do(x) => self.stmt_do(x),
            Stmt::For(x) => self.stmt_for(x),
            Stmt::Return(x) => self.stmt_return(x.as_ref()),
            Stmt::Goto(name) => {
                let label = self.user_label(name);
                self.emit("b", label);
                Ok(())
            }
            Stmt::Label(name) => {
                let label = self.user_label(name);
                self.label(&label);
                Ok(())
            }
            Stmt::VarDecl(x) => self.stmt_var_decl(x),
            Stmt::Expr(x) => {
                let reg = self.get(self.is_wide(x))?;
                self.expr(x, reg)?;
                self.free(reg)
            }
        }
    }

    fn stmt_var_decl(&mut self, decl: &VarDecl) -> Result<(), CodegenError> {
        let local = self.declare(&decl.name, decl.ty)?;
        if let Some(init) = &decl.init {
            let reg = self.get(decl.ty.is_wide())?;
            self.expr(init, reg)?;
            self.store(reg, local)?;
            self.free(reg)?;
        }
        Ok(())
    }

    fn stmt_return(&mut self, value: Option<&Expr>) -> Result<(), CodegenError> {
        if let Some(value) = value {
            let wide = self.def.sig.return_type.is_wide();
            let reg = self.get(wide)?;
            self.expr(value, reg)?;
            self.emit("mov", format!("{}, {}", Reg::ret(wide), reg));
            self.free(reg)?;
        }
        let ret_label = self.ret_label.clone();
        self.emit("b", ret_label);
        Ok(())
    }

    fn stmt_if(&mut self, x: &StmtIf) -> Result<(), CodegenError> {
        let true_label = self.new_label();
        let false_label = self.new_label();
        let out_label = self.new_label();

        self.condition(&x.cond, &true_label)?;
        if let Some(else_) = &x.else_ {
            self.emit("b", &false_label);
            self.label(&false_label);
            self.stmt(else_)?;
        }
        self.emit("b", &out_label);
        self.label(&true_label);
        self.stmt(&x.then)?;
        self.emit("b", &out_label);
        self.label(&out_label);
        Ok(())
    }

    fn stmt_while(&mut self, x: &StmtWhile) -> Result<(), CodegenError> {
        let cond_label = self.new_label();
        let body_label = self.new_label();
        let out_label = self.new_label();

        self.label(&cond_label);
        self.condition(&x.cond, &body_label)?;
        self.emit("b", &out_label);
        self.label(&body_label);
        self.stmt(&x.body)?;
        self.emit("b", &cond_label);
        self.label(&out_label);
        Ok(())
    }

    fn stmt_do(&mut self, x: &StmtDo) -> Result<(), CodegenError> {
        let start_label = self.new_label();
        let cond_label = self.new_label();
        let out_label = self.new_label();

        self.label(&start_label);
        self.stmt(&x.body)?;
        self.label(&cond_label);
        self.condition(&x.cond, &start_label)?;
        self.emit("b", &out_label);
        self.label(&out_label);
        Ok(())
    }

    fn stmt_for(&mut self, x: &StmtFor) -> Result<(), CodegenError> {
        let cond_label = self.new_label();
        let body_label = self.new_label();
        let out_label = self.new_label();

        self.scopes.push(HashMap::new());
        self.stmt(&x.init)?;
        self.label(&cond_label);
        if let Some(cond) = &x.cond {
            self.condition(cond, &body_label)?;
            self.emit("b", &out_label);
        }
        self.label(&body_label);
        self.stmt(&x.body)?;
        if let Some(step) = &x.step {
            let reg = self.get(self.is_wide(step))?;
            self.expr(step, reg)?;
            self.free(reg)?;
        }
        self.emit("b", &cond_label);
        self.label(&out_label);
        self.scopes.pop();
        Ok(())
    }

    /// Evaluates `expr` into `dst`. Every scratch register taken on the way
    /// is released before returning; `dst` itself stays owned by the caller.
    fn expr(&mut self, expr: &Expr, dst: Reg) -> Result<(), CodegenError> {
        match expr {
            Expr::IntLit(i) => {
                self.mov_imm(dst, *i);
                Ok(())
            }
            Expr::CharLit(c) => {
                self.mov_imm(dst, *c as i64);
                Ok(())
            }
            Expr::FloatLit(_) => {
                Err(InternalError::Unimplemented("floating-point literal".into()).into())
            }
            Expr::StrLit(text) => {
                let label = self.strings.intern(text);
                self.emit("adr", format!("{}, {}", dst.wide(), label));
                Ok(())
            }
            Expr::Var(name) => {
                let local = self.lookup(name)?;
                self.load(dst, local)
            }
            Expr::Call(x) => self.call(x, dst),
            Expr::Infix(x) => self.infix(x, dst),
            Expr::Prefix(x) => self.prefix(x.op, &x.expr, dst),
            Expr::Postfix(x) => self.postfix(x.op, &x.expr, dst),
            Expr::Ternary(x) => {
                let then_label = self.new_label();
                let else_label = self.new_label();
                let out_label = self.new_label();

                let test = self.fit(dst, &x.cond);
                self.expr(&x.cond, test)?;
                self.emit("cbnz", format!("{}, {}", test, then_label));
                self.emit("b", &else_label);
                self.label(&else_label);
                self.expr(&x.else_, dst)?;
                self.emit("b", &out_label);
                self.label(&then_label);
                self.expr(&x.then, dst)?;
                self.label(&out_label);
                Ok(())
            }
        }
    }

    fn infix(&mut self, x: &ExprInfix, dst: Reg) -> Result<(), CodegenError> {
        use InfixOp::*;
        match x.op {
            op if op.is_arithmetic() => self.chain(x, dst),
            Comma => {
                self.expr(&x.lhs, dst)?;
                self.expr(&x.rhs, dst)
            }
            Assign => {
                let local = self.assignable(&x.lhs)?;
                let value = Self::fit_local(dst, local);
                self.expr(&x.rhs, value)?;
                self.store(value, local)
            }
            LogicalAnd => {
                let out_label = self.new_label();
                let lhs = self.fit(dst, &x.lhs);
                self.expr(&x.lhs, lhs)?;
                self.emit("cbz", format!("{}, {}", lhs, out_label));
                let rhs = self.fit(dst, &x.rhs);
                self.expr(&x.rhs, rhs)?;
                self.truthiness(rhs, dst);
                self.label(&out_label);
                Ok(())
            }
            LogicalOr => {
                let rhs_label = self.new_label();
                let out_label = self.new_label();
                let lhs = self.fit(dst, &x.lhs);
                self.expr(&x.lhs, lhs)?;
                self.emit("cbz", format!("{}, {}", lhs, rhs_label));
                self.emit("mov", format!("{}, #1", dst));
                self.emit("b", &out_label);
                self.label(&rhs_label);
                let rhs = self.fit(dst, &x.rhs);
                self.expr(&x.rhs, rhs)?;
                self.truthiness(rhs, dst);
                self.label(&out_label);
                Ok(())
            }
            Index | Member | Arrow => {
                Err(InternalError::Unimplemented(format!("operator `{}`", x.op)).into())
            }
            op => {
                guard!(let Some(base) = op.compound_base() else {
                    return Err(InternalError::Unimplemented(format!("operator `{}`", op)).into());
                });
                let local = self.assignable(&x.lhs)?;
                let value = Self::fit_local(dst, local);
                self.load(value, local)?;
                let rhs = self.get(value.wide)?;
                self.expr(&x.rhs, rhs)?;
                self.arith(base, value, rhs)?;
                self.free(rhs)?;
                self.store(value, local)
            }
        }
    }

    /// Lowers a left-leaning run of arithmetic operators: every operand is
    /// evaluated left to right into its own register, then folded into `dst`.
    fn chain(&mut self, x: &ExprInfix, dst: Reg) -> Result<(), CodegenError> {
        let mut spine = vec![(x.op, &*x.rhs)];
        let mut first = &*x.lhs;
        while let Expr::Infix(inner) = first {
            if !inner.op.is_arithmetic() {
                break;
            }
            spine.push((inner.op, &*inner.rhs));
            first = &*inner.lhs;
        }
        spine.reverse();

        let wide = self.is_wide(first) || spine.iter().any(|(_, rhs)| self.is_wide(rhs));
        let dst = dst.with_width(dst.wide || wide);
        self.expr(first, dst)?;
        let mut pending = Vec::new();
        for (op, rhs) in spine {
            if self.regs.available() <= CHAIN_RESERVE {
                self.fold(dst, &mut pending)?;
            }
            let reg = self.get(dst.wide)?;
            self.expr(rhs, reg)?;
            pending.push((op, reg));
        }
        self.fold(dst, &mut pending)
    }

    fn fold(&mut self, dst: Reg, pending: &mut Vec<(InfixOp, Reg)>) -> Result<(), CodegenError> {
        for (op, reg) in pending.drain(..) {
            self.arith(op, dst, reg)?;
            self.free(reg)?;
        }
        Ok(())
    }

    /// `dst = dst op rhs`
    fn arith(&mut self, op: InfixOp, dst: Reg, rhs: Reg) -> Result<(), CodegenError> {
        use InfixOp::*;
        let mnemonic = match op {
            Add => "add",
            Sub => "sub",
            Mul => "mul",
            Div => "sdiv",
            BitAnd => "and",
            BitOr => "orr",
            BitXor => "eor",
            Shl => "lsl",
            Shr => "asr",
            Mod => {
                let quotient = self.get(dst.wide)?;
                self.emit("sdiv", format!("{}, {}, {}", quotient, dst, rhs));
                self.emit("msub", format!("{}, {}, {}, {}", dst, quotient, rhs, dst));
                return self.free(quotient);
            }
            Eq | Ne | Lt | Le | Gt | Ge => {
                let cond = match op {
                    Eq => "eq",
                    Ne => "ne",
                    Lt => "lt",
                    Le => "le",
                    Gt => "gt",
                    _ => "ge",
                };
                self.emit("subs", format!("{}, {}, {}", dst, dst, rhs));
                self.emit("cset", format!("{}, {}", dst, cond));
                return Ok(());
            }
            _ => return Err(InternalError::Unimplemented(format!("operator `{}`", op)).into()),
        };
        self.emit(mnemonic, format!("{}, {}, {}", dst, dst, rhs));
        Ok(())
    }

    /// Sets `dst` to 1 when `src` is non-zero, else 0.
    fn truthiness(&mut self, src: Reg, dst: Reg) {
        self.emit("cmp", format!("{}, #0", src));
        self.emit("cset", format!("{}, ne", dst));
    }

    fn prefix(&mut self, op: PrefixOp, operand: &Expr, dst: Reg) -> Result<(), CodegenError> {
        match op {
            PrefixOp::Plus => self.expr(operand, dst),
            PrefixOp::Minus => {
                let value = self.fit(dst, operand);
                self.expr(operand, value)?;
                let zero = self.get(value.wide)?;
                self.emit("mov", format!("{}, #0", zero));
                self.emit("sub", format!("{}, {}, {}", value, zero, value));
                self.free(zero)
            }
            PrefixOp::Inc | PrefixOp::Dec => {
                let local = self.assignable(operand)?;
                let value = Self::fit_local(dst, local);
                self.load(value, local)?;
                let mnemonic = if op == PrefixOp::Inc { "add" } else { "sub" };
                self.emit(mnemonic, format!("{}, {}, #1", value, value));
                self.store(value, local)
            }
            PrefixOp::LogicalNot => {
                let value = self.fit(dst, operand);
                self.expr(operand, value)?;
                self.emit("cmp", format!("{}, #0", value));
                self.emit("cset", format!("{}, eq", dst));
                Ok(())
            }
            PrefixOp::BitNot => {
                let value = self.fit(dst, operand);
                self.expr(operand, value)?;
                self.emit("mvn", format!("{}, {}", value, value));
                Ok(())
            }
            PrefixOp::Deref | PrefixOp::AddrOf | PrefixOp::Sizeof => {
                Err(InternalError::Unimplemented(format!("operator `{}`", op)).into())
            }
        }
    }

    fn postfix(&mut self, op: PostfixOp, operand: &Expr, dst: Reg) -> Result<(), CodegenError> {
        let local = self.assignable(operand)?;
        let value = Self::fit_local(dst, local);
        self.load(value, local)?;
        let updated = self.get(value.wide)?;
        let mnemonic = match op {
            PostfixOp::Inc => "add",
            PostfixOp::Dec => "sub",
        };
        self.emit(mnemonic, format!("{}, {}, #1", updated, value));
        self.store(updated, local)?;
        self.free(updated)
    }

    /// Fixed arguments go straight into x0-x7; arguments past a variadic
    /// callee's fixed parameters are spilled to 8-byte slots from `sp`.
    /// Arguments that call out are evaluated first into scratch registers.
    /// Scratch registers live across the call are saved below the frame.
    fn call(&mut self, call: &ExprCall, dst: Reg) -> Result<(), CodegenError> {
        let protos = self.protos;
        let sig = protos
            .get(&call.name)
            .ok_or_else(|| CodegenError::UndeclaredProcedure(call.name.clone()))?;
        if call.args.len() > ARG_COUNT {
            return Err(CodegenError::TooManyArgs {
                name: call.name.clone(),
                count: call.args.len(),
                max: ARG_COUNT,
            });
        }
        let params: Vec<_> = sig.value_params().collect();
        if call.args.len() > params.len() && !sig.variadic {
            return Err(CodegenError::ExtraArgsToNonVariadic {
                name: call.name.clone(),
                expected: params.len(),
                found: call.args.len(),
            });
        }
        let (fixed, extra) = call.args.split_at(call.args.len().min(params.len()));

        let saved: Vec<Reg> = self
            .regs
            .live()
            .into_iter()
            .filter(|reg| reg.index != dst.index)
            .collect();
        let pushed = if saved.is_empty() {
            0
        } else {
            align_to_stride((extra.len() + saved.len()) * VARIADIC_SLOT)
        };
        if pushed > 0 {
            self.emit("sub", format!("sp, sp, #{}", pushed));
            self.sp_shift += pushed;
            for (i, reg) in saved.iter().enumerate() {
                let offset = (extra.len() + i) * VARIADIC_SLOT;
                self.emit("str", format!("{}, [sp, #{}]", reg, offset));
            }
        }

        let mut early = Vec::new();
        for (index, arg) in call.args.iter().enumerate() {
            if has_call(arg) {
                let wide = params.get(index).map_or(true, |param| param.ty.is_wide());
                let reg = self.get(wide)?;
                self.expr(arg, reg)?;
                early.push((index, reg));
            }
        }
        let early_reg = |index: usize| {
            early
                .iter()
                .find(|(i, _)| *i == index)
                .map(|(_, reg)| *reg)
        };

        for (slot, arg) in extra.iter().enumerate() {
            let offset = slot * VARIADIC_SLOT;
            match early_reg(fixed.len() + slot) {
                Some(reg) => self.emit("str", format!("{}, [sp, #{}]", reg, offset)),
                None => {
                    let reg = self.get(true)?;
                    self.expr(arg, reg)?;
                    self.emit("str", format!("{}, [sp, #{}]", reg, offset));
                    self.free(reg)?;
                }
            }
        }
        for (index, (arg, param)) in fixed.iter().zip(&params).enumerate() {
            let target = Reg::arg(index, param.ty.is_wide());
            match early_reg(index) {
                Some(reg) => self.emit("mov", format!("{}, {}", target, reg)),
                None => self.expr(arg, target)?,
            }
        }
        for (_, reg) in early {
            self.free(reg)?;
        }
        self.emit("bl", format!("_{}", call.name));

        if pushed > 0 {
            for (i, reg) in saved.iter().enumerate() {
                let offset = (extra.len() + i) * VARIADIC_SLOT;
                self.emit("ldr", format!("{}, [sp, #{}]", reg, offset));
            }
            self.emit("add", format!("sp, sp, #{}", pushed));
            self.sp_shift -= pushed;
        }
        self.emit("mov", format!("{}, {}", dst, Reg::ret(dst.wide)));
        Ok(())
    }
}

fn has_call(expr: &Expr) -> bool {
    let mut found = false;
    NodeRef::from(expr).walk(&mut |node| {
        if let NodeRef::Expr(Expr::Call(_)) = node {
            found = true;
        }
    });
    found
}

pub fn generate(unit: &TranslationUnit) -> Result<String, CodegenError> {
    let mut gen = Generator::new();
    gen.unit(unit)?;
    Ok(gen.output.into_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::BaseType;
    use crate::parser::Parser;

    fn compile(src: &str) -> Result<String, CodegenError> {
        generate(&Parser::new(src).parse().unwrap())
    }

    fn asm(src: &str) -> String {
        compile(src).unwrap()
    }

    /// Code for one expression inside an empty `int main(void)`, with `vars`
    /// bound to the given stack offsets.
    fn expr_asm(src: &str, vars: &[(&str, usize, DataType)], protos: &[&str]) -> (String, RegPool) {
        let def = ProcDef {
            sig: ProcSig {
                name: "main".to_string(),
                return_type: DataType::scalar(BaseType::Int),
                params: Vec::new(),
                variadic: false,
            },
            body: Vec::new(),
        };
        let mut table = HashMap::new();
        for proto in protos {
            let unit = Parser::new(proto).parse().unwrap();
            let TopLevel::ProcDecl(sig) = &unit.items[0] else { panic!() };
            table.insert(sig.name.clone(), sig.clone());
        }
        let mut strings = StringPool::default();
        let mut gen = ProcGenerator::new(&def, 0, &table, &mut strings).unwrap();
        for &(name, offset, ty) in vars {
            gen.scopes[0].insert(name.to_string(), Local { offset, ty });
        }
        let expr = Parser::new(src).expr().unwrap();
        let dst = gen.regs.get(false).unwrap();
        gen.expr(&expr, dst).unwrap();
        gen.regs.free(dst).unwrap();
        (gen.output.into_string(), gen.regs)
    }

    fn int() -> DataType {
        DataType::scalar(BaseType::Int)
    }

    #[test]
    fn left_to_right_chain() {
        let (out, _) = expr_asm("1 + 2 + 3", &[], &[]);
        assert_eq!(
            out,
            "\tmov\tw8, #1\n\tmov\tw9, #2\n\tmov\tw10, #3\n\tadd\tw8, w8, w9\n\tadd\tw8, w8, w10\n"
        );
    }

    #[test]
    fn multiplication_binds_tighter() {
        let (out, _) = expr_asm("x + 2 * 3", &[("x", 8, int())], &[]);
        assert_eq!(
            out,
            "\tldr\tw8, [sp, #8]\n\tmov\tw9, #2\n\tmov\tw10, #3\n\tmul\tw9, w9, w10\n\tadd\tw8, w8, w9\n"
        );
    }

    #[test]
    fn long_chains_fold_early() {
        let src = (1..=20).map(|i| i.to_string()).collect::<Vec<_>>().join(" + ");
        let (out, regs) = expr_asm(&src, &[], &[]);
        assert!(!out.contains("w15"));
        assert_eq!(out.matches("\tadd\t").count(), 19);
        assert_eq!(regs.acquired(), regs.released());
    }

    #[test]
    fn register_discipline() {
        let srcs = [
            "a = (b + 5, a <= b) ? f(a & b++, c) : a | b",
            "a += b * (c - --a) % 3",
            "!a && (b || ~c) ? -a : a++",
            "f(f(1, 2), g(\"x\", a, b, c, 1, 2, 3))",
        ];
        let vars = [("a", 0, int()), ("b", 4, int()), ("c", 8, int())];
        let protos = ["int f(int a, int b);", "int g(char *s, ...);"];
        for src in srcs {
            let (_, regs) = expr_asm(src, &vars, &protos);
            assert_eq!(regs.acquired(), regs.released(), "{}", src);
            assert!(regs.check_balanced("main").is_ok());
        }
    }

    #[test]
    fn minimal_procedure() {
        assert_eq!(
            asm("int main(void) { return 0; }"),
            "\t.global\t_main\n\t.align\t4\n_main:\n\
             \tsub\tsp, sp, #32\n\
             \tstp\tx29, x30, [sp, #16]\n\
             \tadd\tx29, sp, #16\n\
             \tmov\tw8, #0\n\
             \tmov\tw0, w8\n\
             \tb\t.LBB0_0\n\
             .LBB0_0:\n\
             \tldp\tx29, x30, [sp, #16]\n\
             \tadd\tsp, sp, #32\n\
             \tret\n"
        );
    }

    #[test]
    fn far_frame_record_goes_through_x16() {
        let decls = "long x; ".repeat(70);
        let out = asm(&format!("int main(void) {{ {} return 0; }}", decls));
        assert!(out.starts_with(
            "\t.global\t_main\n\t.align\t4\n_main:\n\
             \tsub\tsp, sp, #576\n\
             \tadd\tx16, sp, #560\n\
             \tstp\tx29, x30, [x16]\n\
             \tmov\tx29, x16\n"
        ));
        assert!(out.ends_with(
            "\tadd\tx16, sp, #560\n\
             \tldp\tx29, x30, [x16]\n\
             \tadd\tsp, sp, #576\n\
             \tret\n"
        ));
        assert!(!out.contains("[sp, #560]"));
    }

    #[test]
    fn parameters_are_spilled_by_width() {
        let out = asm("long f(char c, int i, long l, int *p) { return l; }");
        assert!(out.contains("\tsub\tsp, sp, #48\n"));
        assert!(out.contains("\tstrb\tw0, [sp, #31]\n"));
        assert!(out.contains("\tstr\tw1, [sp, #24]\n"));
        assert!(out.contains("\tstr\tx2, [sp, #16]\n"));
        assert!(out.contains("\tstr\tx3, [sp, #8]\n"));
        assert!(out.contains("\tldr\tx8, [sp, #16]\n\tmov\tx0, x8\n"));
    }

    #[test]
    fn narrow_loads_extend() {
        let (out, _) = expr_asm(
            "c + u",
            &[
                ("c", 0, DataType::scalar(BaseType::Char)),
                ("u", 2, DataType::scalar(BaseType::UnsignedShort)),
            ],
            &[],
        );
        assert!(out.starts_with("\tldrsb\tw8, [sp, #0]\n\tldrh\tw9, [sp, #2]\n"));
    }

    #[test]
    fn large_immediates() {
        let (out, _) = expr_asm("70000", &[], &[]);
        assert_eq!(out, "\tmovz\tw8, #4464\n\tmovk\tw8, #1, lsl #16\n");
        let (out, _) = expr_asm("-1", &[], &[]);
        assert!(out.starts_with("\tmov\tw8, #1\n\tmov\tw9, #0\n\tsub\tw8, w9, w8\n"));
    }

    #[test]
    fn calls_fill_argument_registers() {
        let out = asm("int add(int a, long b);\nint main(void) { return add(1, 2); }");
        assert!(out.contains("\tmov\tw0, #1\n\tmov\tx1, #2\n\tbl\t_add\n\tmov\tw8, w0\n"));
    }

    #[test]
    fn nested_call_arguments_are_evaluated_first() {
        let out = asm("int add(int a, int b);\nint main(void) { return add(1, add(2, 3)); }");
        assert_eq!(out.matches("\tbl\t_add\n").count(), 2);
        assert!(out.contains("\tmov\tw0, #2\n\tmov\tw1, #3\n\tbl\t_add\n"));
        assert!(out.contains("\tmov\tw9, w0\n\tmov\tw0, #1\n\tmov\tw1, w9\n\tbl\t_add\n\tmov\tw8, w0\n"));
    }

    #[test]
    fn nested_call_in_variadic_extra() {
        let src = "int printf(char *fmt, ...);\nint one(void);\n\
                   int main(void) { printf(\"%d %d\", 7, one()); return 0; }";
        let out = asm(src);
        let inner = out.find("\tbl\t_one\n").unwrap();
        let spill = out.find("\tmov\tx10, #7\n\tstr\tx10, [sp, #0]\n").unwrap();
        assert!(inner < spill);
        assert!(out.contains("\tstr\tx9, [sp, #8]\n"));
        assert!(out.contains("\tadr\tx0, .L.str.0\n\tbl\t_printf\n"));
    }

    #[test]
    fn long_assignment_statement_is_wide() {
        let out = asm("int main(void) { long x; x = 5000000000; return 0; }");
        assert!(out.contains(
            "\tmovz\tx8, #61952\n\tmovk\tx8, #10757, lsl #16\n\tmovk\tx8, #1, lsl #32\n\tstr\tx8, [sp, #8]\n"
        ));
        assert!(!out.contains("movz\tw8"));
    }

    #[test]
    fn long_comparison_and_test_are_wide() {
        let out = asm(
            "int main(void) { long a = 4294967296; long b = 0; if (a == b) return 1; if (a) return 2; return 0; }",
        );
        assert!(out.contains(
            "\tldr\tx8, [sp, #8]\n\tldr\tx9, [sp, #0]\n\tsubs\tx8, x8, x9\n\tcset\tx8, eq\n\tcbnz\tw8, "
        ));
        assert!(out.contains("\tldr\tx8, [sp, #8]\n\tcbnz\tx8, "));
    }

    #[test]
    fn long_updates_use_the_declared_width() {
        let vars = [("l", 0, DataType::scalar(BaseType::Long)), ("i", 8, int())];
        let (out, _) = expr_asm("l += i", &vars, &[]);
        assert_eq!(
            out,
            "\tldr\tx8, [sp, #0]\n\tldrsw\tx9, [sp, #8]\n\tadd\tx8, x8, x9\n\tstr\tx8, [sp, #0]\n"
        );
        let (out, _) = expr_asm("l++", &vars, &[]);
        assert_eq!(out, "\tldr\tx8, [sp, #0]\n\tadd\tx9, x8, #1\n\tstr\tx9, [sp, #0]\n");
        let (out, _) = expr_asm("!l", &vars, &[]);
        assert_eq!(out, "\tldr\tx8, [sp, #0]\n\tcmp\tx8, #0\n\tcset\tw8, eq\n");
    }

    #[test]
    fn variadic_extras_are_spilled() {
        let out = asm("int printf(char *fmt, ...);\nint main(void) { printf(\"%d %d\\n\", 1, 2); return 0; }");
        assert!(out.contains("\tmov\tx9, #1\n\tstr\tx9, [sp, #0]\n"));
        assert!(out.contains("\tmov\tx9, #2\n\tstr\tx9, [sp, #8]\n"));
        assert!(out.contains("\tadr\tx0, .L.str.0\n\tbl\t_printf\n"));
        assert!(out.ends_with(".L.str.0:\t.asciz \"%d %d\\n\"\n"));
    }

    #[test]
    fn identical_strings_share_a_label() {
        let out = asm("int puts(char *s);\nint main(void) { puts(\"a\"); puts(\"b\"); puts(\"a\"); }");
        assert_eq!(out.matches(".L.str.0\n").count(), 2);
        assert_eq!(out.matches(".L.str.1\n").count(), 1);
        assert!(out.ends_with(".L.str.0:\t.asciz \"a\"\n.L.str.1:\t.asciz \"b\"\n"));
    }

    #[test]
    fn arity_errors() {
        assert_eq!(
            compile("int f(int a);\nint main(void) { f(1, 2); }"),
            Err(CodegenError::ExtraArgsToNonVariadic {
                name: "f".to_string(),
                expected: 1,
                found: 2
            })
        );
        assert!(matches!(
            compile("int g(char *s, ...);\nint main(void) { g(\"\", 1, 2, 3, 4, 5, 6, 7, 8); }"),
            Err(CodegenError::TooManyArgs { count: 9, .. })
        ));
        assert_eq!(
            compile("int main(void) { h(); }"),
            Err(CodegenError::UndeclaredProcedure("h".to_string()))
        );
        assert!(matches!(
            compile("int f(int a, int b, int c, int d, int e, int f, int g, int h, int i) { return 0; }"),
            Err(CodegenError::TooManyParams { count: 9, .. })
        ));
    }

    #[test]
    fn recursion_resolves_own_prototype() {
        let out = asm("int fib(int n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); }");
        assert_eq!(out.matches("\tbl\t_fib\n").count(), 2);
    }

    #[test]
    fn live_scratch_registers_survive_calls() {
        let out = asm("int id(int v);\nint main(void) { int a; return a + id(a); }");
        // a sits at 12 in a 32-byte frame; the push moves it to 28
        assert!(out.contains(
            "\tldr\tw8, [sp, #12]\n\
             \tsub\tsp, sp, #16\n\
             \tstr\tx8, [sp, #0]\n\
             \tldr\tw0, [sp, #28]\n\
             \tbl\t_id\n\
             \tldr\tx8, [sp, #0]\n\
             \tadd\tsp, sp, #16\n\
             \tmov\tw9, w0\n\
             \tadd\tw8, w8, w9\n"
        ), "{}", out);
    }

    #[test]
    fn saved_registers_sit_above_variadic_spills() {
        let (out, regs) = expr_asm(
            "a + g(\"%d\", a)",
            &[("a", 0, int())],
            &["int g(char *s, ...);"],
        );
        assert!(out.contains("\tsub\tsp, sp, #16\n\tstr\tx8, [sp, #8]\n"));
        assert!(out.contains("\tldrsw\tx10, [sp, #16]\n\tstr\tx10, [sp, #0]\n"));
        assert!(out.contains("\tldr\tx8, [sp, #8]\n\tadd\tsp, sp, #16\n"));
        assert_eq!(regs.acquired(), regs.released());
    }

    #[test]
    fn user_errors() {
        assert_eq!(
            compile("int main(void) { return x; }"),
            Err(CodegenError::UndeclaredVariable("x".to_string()))
        );
        assert_eq!(
            compile("int main(void) { int a; 1 = a; }"),
            Err(CodegenError::NotAssignable("1".to_string()))
        );
        assert_eq!(
            compile("int main(void) { int a; a + 1 = 2; }"),
            Err(CodegenError::NotAssignable("+".to_string()))
        );
        assert_eq!(
            compile("int g = 1;\nint main(void) { return g; }"),
            Err(CodegenError::UnsupportedGlobal("g".to_string()))
        );
    }

    #[test]
    fn unimplemented_constructs_are_internal() {
        for src in [
            "int main(void) { float f = 1.5; }",
            "int main(void) { int a; return *a; }",
            "int main(void) { int a; return a[0]; }",
        ] {
            assert!(matches!(
                compile(src),
                Err(CodegenError::Internal(InternalError::Unimplemented(_)))
            ));
        }
        assert!(matches!(
            compile("int f(int) { return 0; }"),
            Err(CodegenError::Internal(InternalError::UnnamedParameter { index: 0, .. }))
        ));
    }

    #[test]
    fn block_scoping() {
        assert_eq!(
            compile("int main(void) { int a; int a; }"),
            Err(CodegenError::Redefinition("a".to_string()))
        );
        let out = asm("int main(void) { int a = 1; { int a = 2; } return a; }");
        assert!(out.contains("\tstr\tw8, [sp, #12]\n"));
        assert!(out.contains("\tstr\tw8, [sp, #8]\n"));
        assert!(out.contains("\tldr\tw8, [sp, #12]\n\tmov\tw0, w8\n"));
        assert_eq!(
            compile("int main(void) { { int b; } return b; }"),
            Err(CodegenError::UndeclaredVariable("b".to_string()))
        );
        assert!(compile("int main(void) { for (int i = 0; i < 2; i++) ; for (int i = 0; i < 2; i++) ; }").is_ok());
    }

    #[test]
    fn if_else_lowering() {
        let out = asm("int main(void) { int a; if (a) a = 1; else a = 2; }");
        let expected = "\tldr\tw8, [sp, #12]\n\
                        \tcbnz\tw8, .LBB0_1\n\
                        \tb\t.LBB0_2\n\
                        .LBB0_2:\n\
                        \tmov\tw8, #2\n\
                        \tstr\tw8, [sp, #12]\n\
                        \tb\t.LBB0_3\n\
                        .LBB0_1:\n\
                        \tmov\tw8, #1\n\
                        \tstr\tw8, [sp, #12]\n\
                        \tb\t.LBB0_3\n\
                        .LBB0_3:\n";
        assert!(out.contains(expected), "{}", out);
    }

    #[test]
    fn loop_lowering() {
        let out = asm("int main(void) { int i; while (i) i--; do i++; while (i < 3); }");
        assert!(out.contains(".LBB0_1:\n\tldr\tw8, [sp, #12]\n\tcbnz\tw8, .LBB0_2\n\tb\t.LBB0_3\n.LBB0_2:\n"));
        assert!(out.contains("\tb\t.LBB0_1\n.LBB0_3:\n"));
        assert!(out.contains(".LBB0_4:\n\tldr\tw8, [sp, #12]\n\tadd\tw9, w8, #1\n\tstr\tw9, [sp, #12]\n.LBB0_5:\n"));
        assert!(out.contains("\tcbnz\tw8, .LBB0_4\n\tb\t.LBB0_6\n.LBB0_6:\n"));
    }

    #[test]
    fn for_without_condition_loops_unconditionally() {
        let out = asm("int main(void) { for (;;) ; }");
        assert!(out.contains(".LBB0_1:\n.LBB0_2:\n\tb\t.LBB0_1\n.LBB0_3:\n"));
        assert!(!out.contains("cbnz"));
    }

    #[test]
    fn labels_are_per_procedure() {
        let out = asm("int f(void) { goto end; end: return 0; }\nint g(void) { loop: goto loop; }");
        assert!(out.contains("\tb\t.Lu0_end\n.Lu0_end:\n"));
        assert!(out.contains(".Lu1_loop:\n\tb\t.Lu1_loop\n"));
        assert!(out.contains(".LBB1_0:\n"));
    }

    #[test]
    fn postfix_returns_old_value() {
        let (out, _) = expr_asm("a++", &[("a", 4, int())], &[]);
        assert_eq!(out, "\tldr\tw8, [sp, #4]\n\tadd\tw9, w8, #1\n\tstr\tw9, [sp, #4]\n");
        let (out, _) = expr_asm("--a", &[("a", 4, int())], &[]);
        assert_eq!(out, "\tldr\tw8, [sp, #4]\n\tsub\tw8, w8, #1\n\tstr\tw8, [sp, #4]\n");
    }

    #[test]
    fn relational_and_modulo() {
        let (out, _) = expr_asm("a < 3", &[("a", 0, int())], &[]);
        assert!(out.ends_with("\tsubs\tw8, w8, w9\n\tcset\tw8, lt\n"));
        let (out, _) = expr_asm("a % 3", &[("a", 0, int())], &[]);
        assert!(out.ends_with("\tsdiv\tw10, w8, w9\n\tmsub\tw8, w10, w9, w8\n"));
    }
}
